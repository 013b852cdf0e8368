//! Fine-grained ADE20K adapter (full `ADE20K_2016_07_26` release).
//!
//! Samples are listed in `index_ade20k.mat`. Each image `X.jpg` has a
//! `X_seg.png` whose red and green channels pack the object class:
//! `class = (r / 10) * 256 + g`.

use std::path::{Path, PathBuf};

use burn::config::Config;
use image::Luma;

use super::{default_object_classes, load_rgb};
use crate::{
    error::{DatasetError, DatasetResult},
    matfile::{MatFile, MatValue},
    pipeline::{PipelineConfig, SegmentationDataset, SegmentationSource, Split},
    sample::{ClassMap, RawSample},
};

const INDEX_FILE: &str = "index_ade20k.mat";

fn default_root_dir() -> String {
    "/data/ADE20K_2016_07_26/".to_owned()
}

/// Configuration for [`FineGrainedAde20kDataset`].
#[derive(Config, Debug)]
pub struct FineGrainedAde20kDatasetConfig {
    /// Directory holding `index_ade20k.mat`. Folders in the index are relative
    /// to its parent.
    #[config(default = "default_root_dir()")]
    pub root_dir: String,
    /// Class names; only their count is used, as the number of encoded channels.
    #[config(default = "default_object_classes()")]
    pub classes: Vec<String>,
    /// Crop and augmentation parameters.
    #[config(default = "PipelineConfig::new()")]
    pub pipeline: PipelineConfig,
}

impl FineGrainedAde20kDatasetConfig {
    /// Load the adapter for `split` and wrap it in the sampling pipeline.
    ///
    /// # Errors
    ///
    /// See [`FineGrainedAde20kDataset::new`].
    pub fn init(
        &self,
        split: Split,
    ) -> DatasetResult<SegmentationDataset<FineGrainedAde20kDataset>> {
        let source = FineGrainedAde20kDataset::new(self, split)?;
        Ok(SegmentationDataset::new(source, &self.pipeline, split))
    }
}

/// Decode a packed class id from the red and green channels of a `_seg.png` pixel.
pub const fn packed_class_id(r: u8, g: u8) -> u16 {
    (r / 10) as u16 * 256 + g as u16
}

/// Annotation path of an image: the last four characters (the extension)
/// replaced by `_seg.png`.
pub fn segmentation_path(image_path: &Path) -> PathBuf {
    let name = image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem_end = name.char_indices().rev().nth(3).map_or(0, |(i, _)| i);
    image_path.with_file_name(format!("{}_seg.png", &name[..stem_end]))
}

/// Full ADE20K images with packed class ids.
///
/// Class ids are not remapped, so they span the whole packed range; the
/// encoder only emits channels for ids `1..=classes.len()`.
#[derive(Debug)]
pub struct FineGrainedAde20kDataset {
    images: Vec<PathBuf>,
    annotations: Vec<PathBuf>,
    object_names: Vec<String>,
    num_classes: usize,
}

impl FineGrainedAde20kDataset {
    /// Read the index of `split`.
    ///
    /// # Errors
    ///
    /// [`DatasetError::IndexReadFailed`] or [`DatasetError::InvalidMatFile`] when
    /// the index cannot be parsed, [`DatasetError::MissingIndexField`] when
    /// `index.filename` or `index.folder` is absent.
    pub fn new(config: &FineGrainedAde20kDatasetConfig, split: Split) -> DatasetResult<Self> {
        let root = Path::new(&config.root_dir);
        let index_path = root.join(INDEX_FILE);
        let file = MatFile::open(&index_path)?;

        let missing = |field: &str| DatasetError::MissingIndexField {
            path: index_path.clone(),
            field: field.to_owned(),
        };
        let index = file.get("index").ok_or_else(|| missing("index"))?;
        let strings_of = |field: &str| -> DatasetResult<Vec<String>> {
            index
                .field(field)
                .and_then(MatValue::strings)
                .ok_or_else(|| missing(field))
        };
        let filenames = strings_of("filename")?;
        let folders = strings_of("folder")?;
        if filenames.len() != folders.len() {
            return Err(DatasetError::InvalidMatFile {
                reason: format!(
                    "index has {} filenames but {} folders",
                    filenames.len(),
                    folders.len()
                ),
            });
        }
        let object_names = index
            .field("objectnames")
            .and_then(MatValue::strings)
            .unwrap_or_default();

        let base = root.join("..");
        let (images, annotations): (Vec<_>, Vec<_>) = filenames
            .iter()
            .zip(&folders)
            .filter(|(name, _)| name.contains(split.as_str()))
            .map(|(name, folder)| {
                let image = base.join(folder).join(name);
                let annotation = segmentation_path(&image);
                (image, annotation)
            })
            .unzip();

        tracing::info!(
            index = %index_path.display(),
            %split,
            images = images.len(),
            object_names = object_names.len(),
            "loaded fine-grained ADE20K index"
        );

        Ok(Self {
            images,
            annotations,
            object_names,
            num_classes: config.classes.len(),
        })
    }

    /// Name of a packed class id, from the index's `objectnames` when present.
    pub fn object_name(&self, class_id: u16) -> Option<&str> {
        let idx = usize::from(class_id).checked_sub(1)?;
        self.object_names.get(idx).map(String::as_str)
    }

    /// Image path of sample `key`.
    pub fn image_path(&self, key: usize) -> Option<&Path> {
        self.images.get(key).map(PathBuf::as_path)
    }
}

impl SegmentationSource for FineGrainedAde20kDataset {
    fn get_raw_data(&self, key: usize) -> DatasetResult<RawSample> {
        self.check_key(key)?;
        let image = load_rgb(&self.images[key])?;
        let annotation = load_rgb(&self.annotations[key])?;
        if annotation.dimensions() != image.dimensions() {
            return Err(DatasetError::SizeMismatch {
                what: format!("annotation {}", self.annotations[key].display()),
                expected: image.dimensions(),
                actual: annotation.dimensions(),
            });
        }

        let (width, height) = annotation.dimensions();
        let seg_mask = ClassMap::from_fn(width, height, |x, y| {
            let [r, g, _] = annotation.get_pixel(x, y).0;
            Luma([packed_class_id(r, g)])
        });
        RawSample::fully_valid(image, seg_mask)
    }

    fn len(&self) -> usize {
        self.images.len()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    use super::*;
    use crate::{
        crop::CropConfig,
        datasets::fixtures::{write_rgb, write_rgb_image},
        matfile::writer::{ade_index, header, string_cell, struct_scalar},
    };

    const FILES: [&str; 3] = [
        "ADE_train_00000001.jpg",
        "ADE_train_00000002.jpg",
        "ADE_val_00000001.jpg",
    ];
    const FOLDERS: [&str; 3] = [
        "ADE20K_2016_07_26/images/training/a/abbey",
        "ADE20K_2016_07_26/images/training/k/kitchen",
        "ADE20K_2016_07_26/images/validation/b/bedroom",
    ];

    /// Annotation whose left half is packed class 1, right half packed 517.
    fn annotation() -> RgbImage {
        RgbImage::from_fn(24, 18, |x, _| {
            if x < 12 {
                Rgb([0, 1, 0])
            } else {
                Rgb([20, 5, 0])
            }
        })
    }

    fn setup(compress: bool, write_files: bool) -> (TempDir, FineGrainedAde20kDatasetConfig) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("ADE20K_2016_07_26");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(
            root.join(INDEX_FILE),
            ade_index(&FILES, &FOLDERS, &["wall", "floor"], compress),
        )
        .unwrap();

        if write_files {
            for (name, folder) in FILES.iter().zip(FOLDERS) {
                let image = dir.path().join(folder).join(name);
                write_rgb(&image, 24, 18, Rgb([40, 80, 120]));
                write_rgb_image(&segmentation_path(&image), &annotation());
            }
        }

        let config = FineGrainedAde20kDatasetConfig::new()
            .with_root_dir(root.display().to_string())
            .with_classes(vec!["wall".into(), "floor".into()]);
        (dir, config)
    }

    #[test]
    fn packed_ids_decode_red_and_green() {
        assert_eq!(packed_class_id(20, 5), 517);
        assert_eq!(packed_class_id(29, 5), 517);
        assert_eq!(packed_class_id(0, 0), 0);
        assert_eq!(packed_class_id(255, 255), 25 * 256 + 255);
    }

    #[test]
    fn segmentation_path_replaces_extension() {
        assert_eq!(
            segmentation_path(Path::new("/a/b/ADE_train_00000001.jpg")),
            PathBuf::from("/a/b/ADE_train_00000001_seg.png")
        );
    }

    #[test]
    fn index_is_filtered_by_split() {
        for compress in [false, true] {
            let (_dir, config) = setup(compress, false);

            let train = FineGrainedAde20kDataset::new(&config, Split::Train).unwrap();
            assert_eq!(train.len(), 2);
            assert!(train
                .image_path(1)
                .unwrap()
                .ends_with("k/kitchen/ADE_train_00000002.jpg"));

            let val = FineGrainedAde20kDataset::new(&config, Split::Val).unwrap();
            assert_eq!(val.len(), 1);
            assert_eq!(val.object_name(2), Some("floor"));
            assert_eq!(val.object_name(0), None);
            assert_eq!(val.object_name(3), None);
        }
    }

    #[test]
    fn raw_sample_keeps_packed_ids() {
        let (_dir, config) = setup(false, true);
        let dataset = FineGrainedAde20kDataset::new(&config, Split::Train).unwrap();

        for key in 0..dataset.len() {
            let raw = dataset.get_raw_data(key).unwrap();
            assert_eq!(raw.dimensions(), (24, 18));
            assert_eq!(raw.seg_mask.get_pixel(3, 9).0[0], 1);
            assert_eq!(raw.seg_mask.get_pixel(20, 9).0[0], 517);
            assert!(raw.loss_mask.pixels().all(|p| p.0[0] == 1));
        }
    }

    #[test]
    fn missing_index_and_fields_are_reported() {
        let config = FineGrainedAde20kDatasetConfig::new().with_root_dir("/nonexistent/ade".into());
        assert!(matches!(
            FineGrainedAde20kDataset::new(&config, Split::Train),
            Err(DatasetError::IndexReadFailed { .. })
        ));

        let (dir, config) = setup(false, false);
        let mut bytes = header();
        bytes.extend(struct_scalar(
            "index",
            &[("filename", string_cell("", &FILES))],
        ));
        std::fs::write(dir.path().join("ADE20K_2016_07_26").join(INDEX_FILE), bytes).unwrap();
        assert!(matches!(
            FineGrainedAde20kDataset::new(&config, Split::Train),
            Err(DatasetError::MissingIndexField { ref field, .. }) if field == "folder"
        ));
    }

    #[test]
    fn missing_annotation_is_reported() {
        let (dir, config) = setup(false, true);
        std::fs::remove_file(segmentation_path(&dir.path().join(FOLDERS[0]).join(FILES[0])))
            .unwrap();
        let dataset = FineGrainedAde20kDataset::new(&config, Split::Train).unwrap();

        assert!(matches!(
            dataset.get_raw_data(0),
            Err(DatasetError::ImageOpenFailed { .. })
        ));
        assert!(dataset.get_raw_data(1).is_ok());
    }

    #[test]
    fn pipeline_yields_aligned_items_for_every_key() {
        let (_dir, config) = setup(true, true);
        let config = config.with_pipeline(
            PipelineConfig::new()
                .with_crop(CropConfig::new().with_crop_height(12).with_crop_width(16))
                .with_seed(Some(9)),
        );

        for split in [Split::Train, Split::Val] {
            let dataset = config.init(split).unwrap();
            assert!(!dataset.is_empty());
            for key in 0..dataset.len() {
                let item = dataset.sample(key).unwrap();
                assert_eq!((item.height, item.width), (12, 16));
                assert_eq!(item.image.len(), 3 * 12 * 16);
                assert_eq!(item.seg_mask.len(), 2 * 12 * 16);
                assert_eq!(item.loss_mask.len(), 12 * 16);
            }
        }
    }

    #[test]
    fn pipeline_encodes_only_low_ids() {
        let (_dir, config) = setup(false, true);
        let config = config.with_pipeline(
            PipelineConfig::new()
                .with_crop(CropConfig::new().with_crop_height(18).with_crop_width(24))
                .with_seed(Some(5)),
        );
        let dataset = config.init(Split::Val).unwrap();
        let item = dataset.sample(0).unwrap();

        assert_eq!(item.num_classes, 2);
        let class_one = item.class_plane(1).unwrap();
        let class_two = item.class_plane(2).unwrap();
        assert!(class_one.iter().any(|&v| v == 1.0));
        assert!(class_two.iter().all(|&v| v == 0.0));
        // Pixels of packed id 517 belong to no channel.
        assert_eq!(class_one[item.width - 1], 0.0);
    }
}
