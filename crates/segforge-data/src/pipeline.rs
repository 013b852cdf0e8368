//! Sampling pipeline shared by every dataset adapter.
//!
//! A [`SegmentationSource`] loads raw samples; [`SegmentationDataset`] turns them
//! into encoded items by cropping, augmenting the image and encoding labels:
//!
//! ```text
//! get_raw_data(key) -> MultiCrop -> ImageTransform -> SegEncoder -> SegmentationItem
//! ```
//!
//! The crop and image transform are picked once from the [`Split`]. Every call
//! works on fresh buffers, so a dataset can be shared across loader workers.

use std::fmt;

use burn::{config::Config, data::dataset::Dataset};
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    augmentation::{AugmentConfig, ColorJitterConfig, EvalTransform, ImageTransform, TrainTransform},
    crop::{CropConfig, MultiCrop},
    encoder::SegEncoder,
    error::{DatasetError, DatasetResult},
    sample::{RawSample, SegmentationItem},
};

/// Dataset split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
}

impl Split {
    /// `true` for the training split.
    pub const fn is_train(self) -> bool {
        matches!(self, Self::Train)
    }

    /// Short name used in file names (`train` / `val`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loads raw samples from one on-disk annotation format.
///
/// Implementors are immutable after construction.
pub trait SegmentationSource: Send + Sync {
    /// Load the sample at `key`.
    ///
    /// # Errors
    ///
    /// [`DatasetError::IndexOutOfRange`] when `key >= len()`, or a resource error
    /// when the image or annotation cannot be read.
    fn get_raw_data(&self, key: usize) -> DatasetResult<RawSample>;

    /// Number of samples.
    fn len(&self) -> usize;

    /// Whether the source has no samples.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of one-hot channels the encoder produces.
    fn num_classes(&self) -> usize;

    /// Fail with [`DatasetError::IndexOutOfRange`] unless `key < len()`.
    fn check_key(&self, key: usize) -> DatasetResult<()> {
        let len = self.len();
        if key < len {
            Ok(())
        } else {
            Err(DatasetError::IndexOutOfRange { index: key, len })
        }
    }
}

/// Crop, augmentation and color jitter parameters shared by all datasets.
#[derive(Config, Debug)]
pub struct PipelineConfig {
    /// Affine crop parameters.
    #[config(default = "CropConfig::new()")]
    pub crop: CropConfig,
    /// Stochastic image augmentation.
    #[config(default = "AugmentConfig::new()")]
    pub augment: AugmentConfig,
    /// Color jitter ranges.
    #[config(default = "ColorJitterConfig::new()")]
    pub color_jitter: ColorJitterConfig,
    /// Base seed; when set, sample `k` always draws the same augmentation.
    pub seed: Option<u64>,
}

/// Encoded segmentation dataset over any [`SegmentationSource`].
pub struct SegmentationDataset<S> {
    source: S,
    split: Split,
    crop: Box<dyn MultiCrop>,
    transform: Box<dyn ImageTransform>,
    encoder: SegEncoder,
    seed: Option<u64>,
}

impl<S: SegmentationSource> SegmentationDataset<S> {
    /// Wrap `source`, selecting the random or the center crop from `split`.
    pub fn new(source: S, config: &PipelineConfig, split: Split) -> Self {
        let (crop, transform): (Box<dyn MultiCrop>, Box<dyn ImageTransform>) = if split.is_train()
        {
            (
                Box::new(config.crop.init_random()),
                Box::new(TrainTransform::new(
                    config.augment.init(),
                    config.color_jitter.init(),
                )),
            )
        } else {
            (Box::new(config.crop.init_center()), Box::new(EvalTransform))
        };
        let encoder = SegEncoder::new(source.num_classes());

        tracing::info!(
            %split,
            samples = source.len(),
            num_classes = encoder.num_classes(),
            crop_height = config.crop.crop_height,
            crop_width = config.crop.crop_width,
            "segmentation dataset ready"
        );

        Self {
            source,
            split,
            crop,
            transform,
            encoder,
            seed: config.seed,
        }
    }

    /// The wrapped adapter.
    pub const fn source(&self) -> &S {
        &self.source
    }

    /// The split this dataset was built for.
    pub const fn split(&self) -> Split {
        self.split
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.source.len()
    }

    /// Whether the dataset has no samples.
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Load, crop, augment and encode sample `key`.
    ///
    /// # Errors
    ///
    /// Propagates any error of [`SegmentationSource::get_raw_data`] or the crop.
    pub fn sample(&self, key: usize) -> DatasetResult<SegmentationItem> {
        let mut rng = self.rng(key);
        let raw = self.source.get_raw_data(key)?;
        let cropped = self.crop.crop(&raw, &mut rng)?;
        let image = self.transform.apply(cropped.image, &mut rng);
        let item = self
            .encoder
            .encode(&image, &cropped.seg_mask, &cropped.loss_mask);

        tracing::debug!(key, height = item.height, width = item.width, "encoded sample");
        Ok(item)
    }

    fn rng(&self, key: usize) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(key as u64)),
            None => StdRng::from_os_rng(),
        }
    }
}

impl<S: SegmentationSource> Dataset<SegmentationItem> for SegmentationDataset<S> {
    fn get(&self, index: usize) -> Option<SegmentationItem> {
        match self.sample(index) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::error!(index, error = %e, "failed to load sample");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.source.len()
    }
}
