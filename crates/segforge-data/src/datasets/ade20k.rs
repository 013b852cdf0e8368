//! ADE20K scene-parsing challenge adapter.
//!
//! Expected layout under `root_dir`:
//!
//! ```text
//! sceneCategories.txt          <image_name> <scene> per line
//! objectInfo150.txt            header, then one tab-separated row per raw class
//! images/{training,validation}/<image_name>.jpg
//! annotations/{training,validation}/<image_name>.png
//! ```

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use burn::config::Config;
use image::Luma;

use super::{default_ade20k_classes, load_rgb};
use crate::{
    error::{DatasetError, DatasetResult},
    pipeline::{PipelineConfig, SegmentationDataset, SegmentationSource, Split},
    sample::{ClassMap, RawSample},
};

const SCENE_MANIFEST: &str = "sceneCategories.txt";
const CLASS_MANIFEST: &str = "objectInfo150.txt";

fn default_root_dir() -> String {
    "/data/ADEChallengeData2016/".to_owned()
}

/// Configuration for [`Ade20kDataset`].
#[derive(Config, Debug)]
pub struct Ade20kDatasetConfig {
    /// Dataset root.
    #[config(default = "default_root_dir()")]
    pub root_dir: String,
    /// Class names to keep, as written in `objectInfo150.txt`.
    #[config(default = "default_ade20k_classes()")]
    pub classes: Vec<String>,
    /// Crop and augmentation parameters.
    #[config(default = "PipelineConfig::new()")]
    pub pipeline: PipelineConfig,
}

impl Ade20kDatasetConfig {
    /// Load the adapter for `split` and wrap it in the sampling pipeline.
    ///
    /// # Errors
    ///
    /// See [`Ade20kDataset::new`].
    pub fn init(&self, split: Split) -> DatasetResult<SegmentationDataset<Ade20kDataset>> {
        let source = Ade20kDataset::new(self, split)?;
        Ok(SegmentationDataset::new(source, &self.pipeline, split))
    }
}

/// Raw annotation value to dense class id.
///
/// Values without an allow-listed class, including out-of-table ones, map to 0.
#[derive(Debug, Clone)]
pub struct ClassLut {
    table: [u16; 256],
    names: Vec<String>,
}

impl ClassLut {
    /// Build the table from the class names of `objectInfo150.txt` in row order.
    ///
    /// Row `i` holds raw value `i + 1`. Allow-listed rows get ids `1, 2, ...`
    /// in row order.
    pub fn new(row_names: &[String], classes: &[String]) -> Self {
        let allowed: HashSet<&str> = classes.iter().map(String::as_str).collect();
        let mut table = [0u16; 256];
        let mut names = Vec::new();
        for (row, name) in row_names.iter().enumerate().take(255) {
            if allowed.contains(name.as_str()) {
                names.push(name.clone());
                table[row + 1] = names.len() as u16;
            }
        }
        Self { table, names }
    }

    /// Dense id of a raw annotation value.
    pub const fn get(&self, raw: u8) -> u16 {
        self.table[raw as usize]
    }

    /// Kept class names; dense id `i` is `names()[i - 1]`.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// ADE20K challenge images with single-channel class maps.
#[derive(Debug)]
pub struct Ade20kDataset {
    images: Vec<PathBuf>,
    annotations: Vec<PathBuf>,
    scenes: Vec<String>,
    lut: ClassLut,
    num_classes: usize,
}

impl Ade20kDataset {
    /// Read both manifests of `split`.
    ///
    /// # Errors
    ///
    /// [`DatasetError::ManifestReadFailed`] when a manifest is missing and
    /// [`DatasetError::MalformedManifest`] when a scene line does not hold
    /// exactly an image name and a scene.
    pub fn new(config: &Ade20kDatasetConfig, split: Split) -> DatasetResult<Self> {
        let root = Path::new(&config.root_dir);
        let sub_dir = match split {
            Split::Train => "training",
            Split::Val => "validation",
        };
        let image_dir = root.join("images").join(sub_dir);
        let annotation_dir = root.join("annotations").join(sub_dir);

        let excluded = match split {
            Split::Train => Split::Val.as_str(),
            Split::Val => Split::Train.as_str(),
        };

        let mut images = Vec::new();
        let mut annotations = Vec::new();
        let mut scenes = Vec::new();
        for (name, scene) in read_scene_manifest(&root.join(SCENE_MANIFEST))? {
            if name.contains(excluded) {
                continue;
            }
            images.push(image_dir.join(format!("{name}.jpg")));
            annotations.push(annotation_dir.join(format!("{name}.png")));
            scenes.push(scene);
        }

        let lut = ClassLut::new(&read_class_manifest(&root.join(CLASS_MANIFEST))?, &config.classes);
        tracing::info!(
            root = %root.display(),
            %split,
            images = images.len(),
            classes = lut.names().len(),
            "loaded ADE20K manifests"
        );

        Ok(Self {
            images,
            annotations,
            scenes,
            num_classes: config.classes.len(),
            lut,
        })
    }

    /// Scene label of sample `key`.
    pub fn scene(&self, key: usize) -> Option<&str> {
        self.scenes.get(key).map(String::as_str)
    }

    /// The raw-to-dense class table.
    pub const fn class_lut(&self) -> &ClassLut {
        &self.lut
    }
}

impl SegmentationSource for Ade20kDataset {
    fn get_raw_data(&self, key: usize) -> DatasetResult<RawSample> {
        self.check_key(key)?;
        let image = load_rgb(&self.images[key])?;

        let path = &self.annotations[key];
        let annotation = image::open(path)
            .map_err(|source| DatasetError::ImageOpenFailed {
                path: path.clone(),
                source,
            })?
            .to_luma8();
        if annotation.dimensions() != image.dimensions() {
            return Err(DatasetError::SizeMismatch {
                what: format!("annotation {}", path.display()),
                expected: image.dimensions(),
                actual: annotation.dimensions(),
            });
        }

        let (width, height) = annotation.dimensions();
        let seg_mask = ClassMap::from_fn(width, height, |x, y| {
            Luma([self.lut.get(annotation.get_pixel(x, y).0[0])])
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

fn read_manifest(path: &Path) -> DatasetResult<String> {
    std::fs::read_to_string(path).map_err(|source| DatasetError::ManifestReadFailed {
        path: path.to_path_buf(),
        source,
    })
}

/// `(image_name, scene)` pairs; blank lines are skipped.
fn read_scene_manifest(path: &Path) -> DatasetResult<Vec<(String, String)>> {
    let content = read_manifest(path)?;
    let mut entries = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [name, scene] = fields.as_slice() else {
            return Err(DatasetError::MalformedManifest {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: format!("expected `<image_name> <scene>`, got {} fields", fields.len()),
            });
        };
        entries.push(((*name).to_owned(), (*scene).to_owned()));
    }
    Ok(entries)
}

/// Class names of `objectInfo150.txt` in row order.
fn read_class_manifest(path: &Path) -> DatasetResult<Vec<String>> {
    let content = read_manifest(path)?;
    Ok(content
        .lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.rsplit('\t').next().unwrap_or(line).trim().to_owned())
        .collect())
}
