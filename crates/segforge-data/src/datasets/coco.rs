//! COCO instance segmentation adapter.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use burn::config::Config;

use super::{default_object_classes, load_rgb};
use crate::{
    coco::{decode_mask, CocoAnnotation, CocoImage, CocoStore, MaskFold},
    error::{DatasetError, DatasetResult},
    pipeline::{PipelineConfig, SegmentationDataset, SegmentationSource, Split},
    sample::RawSample,
};

fn default_data_dir() -> String {
    "/data/COCO2017".to_owned()
}

fn default_annotation_dir() -> String {
    "/data/COCO2017/annotations".to_owned()
}

/// Configuration for [`CocoDataset`].
#[derive(Config, Debug)]
pub struct CocoDatasetConfig {
    /// Release year, appended to split names (`train2017`).
    #[config(default = 2017)]
    pub version: u32,
    /// Directory holding the `{split}{version}` image folders.
    #[config(default = "default_data_dir()")]
    pub data_dir: String,
    /// Directory holding `instances_{split}{version}.json`.
    #[config(default = "default_annotation_dir()")]
    pub annotation_dir: String,
    /// Non-crowd instances smaller than this area are excluded from the loss.
    #[config(default = 200.0)]
    pub min_area: f64,
    /// Category names to keep. Class ids follow the store's category order.
    #[config(default = "default_object_classes()")]
    pub classes: Vec<String>,
    /// Crop and augmentation parameters.
    #[config(default = "PipelineConfig::new()")]
    pub pipeline: PipelineConfig,
}

impl CocoDatasetConfig {
    /// Load the adapter for `split` and wrap it in the sampling pipeline.
    ///
    /// # Errors
    ///
    /// See [`CocoDataset::new`].
    pub fn init(&self, split: Split) -> DatasetResult<SegmentationDataset<CocoDataset>> {
        let source = CocoDataset::new(self, split)?;
        Ok(SegmentationDataset::new(source, &self.pipeline, split))
    }

    /// Path of the annotation store for `split`.
    pub fn annotation_file(&self, split: Split) -> PathBuf {
        Path::new(&self.annotation_dir).join(format!("instances_{split}{}.json", self.version))
    }

    /// Directory of the images for `split`.
    pub fn image_dir(&self, split: Split) -> PathBuf {
        Path::new(&self.data_dir).join(format!("{split}{}", self.version))
    }
}

/// COCO images with instance masks folded into one class map.
///
/// Per pixel the highest mapped class id wins. Crowd instances and instances
/// below `min_area` are removed from the validity mask instead.
#[derive(Debug)]
pub struct CocoDataset {
    store: CocoStore,
    annotations_by_image: HashMap<u64, Vec<usize>>,
    image_dir: PathBuf,
    class_map: HashMap<u64, u16>,
    class_names: Vec<String>,
    num_classes: usize,
    min_area: f64,
}

impl CocoDataset {
    /// Load the annotation store of `split`.
    ///
    /// # Errors
    ///
    /// [`DatasetError::AnnotationReadFailed`] or [`DatasetError::AnnotationParseFailed`]
    /// when the store cannot be loaded.
    pub fn new(config: &CocoDatasetConfig, split: Split) -> DatasetResult<Self> {
        let path = config.annotation_file(split);
        let bytes = std::fs::read(&path).map_err(|source| DatasetError::AnnotationReadFailed {
            path: path.clone(),
            source,
        })?;
        let store: CocoStore = serde_json::from_slice(&bytes)
            .map_err(|source| DatasetError::AnnotationParseFailed { path, source })?;

        Ok(Self::from_store(
            store,
            config.image_dir(split),
            &config.classes,
            config.min_area,
        ))
    }

    /// Build an adapter over an already parsed store.
    pub fn from_store(
        store: CocoStore,
        image_dir: PathBuf,
        classes: &[String],
        min_area: f64,
    ) -> Self {
        let allowed: HashSet<&str> = classes.iter().map(String::as_str).collect();
        let mut class_map = HashMap::new();
        let mut class_names = Vec::new();
        for category in &store.categories {
            if allowed.contains(category.name.as_str()) && !class_map.contains_key(&category.id) {
                class_names.push(category.name.clone());
                class_map.insert(category.id, class_names.len() as u16);
            }
        }
        if class_names.len() < allowed.len() {
            tracing::warn!(
                requested = allowed.len(),
                found = class_names.len(),
                "some requested classes are not in the annotation store"
            );
        }

        let annotations_by_image = store.annotations_by_image();
        tracing::info!(
            images = store.images.len(),
            annotations = store.annotations.len(),
            classes = class_names.len(),
            image_dir = %image_dir.display(),
            "loaded COCO annotations"
        );

        Self {
            store,
            annotations_by_image,
            image_dir,
            class_map,
            class_names,
            num_classes: classes.len(),
            min_area,
        }
    }

    /// Image record at `key`.
    pub fn image_info(&self, key: usize) -> Option<&CocoImage> {
        self.store.images.get(key)
    }

    /// COCO image id at `key`.
    pub fn image_id(&self, key: usize) -> Option<u64> {
        self.image_info(key).map(|info| info.id)
    }

    /// Category id to class id.
    pub const fn class_map(&self) -> &HashMap<u64, u16> {
        &self.class_map
    }

    /// Names of the kept classes; class id `i` is `class_names()[i - 1]`.
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn annotations_of(&self, image_id: u64) -> impl Iterator<Item = &CocoAnnotation> {
        self.annotations_by_image
            .get(&image_id)
            .into_iter()
            .flatten()
            .map(|&i| &self.store.annotations[i])
    }
}

impl SegmentationSource for CocoDataset {
    fn get_raw_data(&self, key: usize) -> DatasetResult<RawSample> {
        self.check_key(key)?;
        let info = &self.store.images[key];
        let image = load_rgb(&self.image_dir.join(&info.file_name))?;
        let (width, height) = image.dimensions();

        let fold = self
            .annotations_of(info.id)
            .try_fold(MaskFold::new(width, height), |fold, ann| -> DatasetResult<_> {
                let excluded = ann.is_crowd() || ann.area < self.min_area;
                let class_id = self.class_map.get(&ann.category_id).copied();
                if !excluded && class_id.is_none() {
                    return Ok(fold);
                }
                let region = decode_mask(&ann.segmentation, width, height).map_err(|reason| {
                    DatasetError::InvalidSegmentation {
                        annotation_id: ann.id,
                        reason,
                    }
                })?;
                Ok(match class_id {
                    _ if excluded => fold.exclude(&region),
                    Some(id) => fold.assign(&region, id),
                    None => fold,
                })
            })?;

        RawSample::new(image, fold.seg_mask, fold.loss_mask)
    }

    fn len(&self) -> usize {
        self.store.images.len()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
