//! Semantic segmentation sample pipeline for Burn.
//!
//! Three dataset adapters load raw samples (image, class map, validity mask)
//! from COCO, ADE20K and the fine-grained ADE20K release. A shared
//! [`SegmentationDataset`] crops them to a fixed size, augments the image on the
//! training split and one-hot encodes the labels. [`SegmentationBatcher`]
//! stacks the resulting items into tensors.
//!
//! ```rust,no_run
//! use segforge_data::{CocoDatasetConfig, Split};
//! use burn::data::dataset::Dataset;
//!
//! let dataset = CocoDatasetConfig::new().init(Split::Train).unwrap();
//! let item = dataset.get(0);
//! ```

pub mod augmentation;
pub mod batcher;
pub mod coco;
pub mod crop;
pub mod datasets;
pub mod encoder;
pub mod error;
pub mod matfile;
pub mod pipeline;
pub mod sample;

// Re-export commonly used types
pub use augmentation::{
    AugmentConfig, AugmentationMethod, ColorJitter, ColorJitterConfig, EvalTransform,
    ImageAugmentor, ImageTransform, TrainTransform,
};
pub use batcher::{SegmentationBatch, SegmentationBatcher};
pub use crop::{AffineParams, CenterAffineCrop, CropConfig, MultiCrop, RandomAffineCrop};
pub use datasets::{
    Ade20kDataset, Ade20kDatasetConfig, CocoDataset, CocoDatasetConfig, FineGrainedAde20kDataset,
    FineGrainedAde20kDatasetConfig,
};
pub use encoder::SegEncoder;
pub use error::{DatasetError, DatasetResult};
pub use pipeline::{PipelineConfig, SegmentationDataset, SegmentationSource, Split};
pub use sample::{ClassMap, RawSample, SegmentationItem, ValidityMask};
