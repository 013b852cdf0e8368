//! Raw and encoded sample types shared by every dataset adapter.

use image::{GrayImage, ImageBuffer, Luma, RgbImage};

use crate::error::{DatasetError, DatasetResult};

/// Per-pixel class ids. Wide enough for the packed fine-grained ADE20K id space.
pub type ClassMap = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Per-pixel validity, `1` where the pixel contributes to the loss and `0` otherwise.
pub type ValidityMask = GrayImage;

/// A sample exactly as an adapter loads it from disk.
///
/// All three grids share the same width and height.
#[derive(Debug, Clone)]
pub struct RawSample {
    /// RGB image.
    pub image: RgbImage,
    /// Class id per pixel, `0` is background.
    pub seg_mask: ClassMap,
    /// Validity per pixel.
    pub loss_mask: ValidityMask,
}

impl RawSample {
    /// Build a sample whose validity mask is all ones.
    pub fn fully_valid(image: RgbImage, seg_mask: ClassMap) -> DatasetResult<Self> {
        let (width, height) = seg_mask.dimensions();
        let loss_mask = ValidityMask::from_pixel(width, height, Luma([1]));
        Self::new(image, seg_mask, loss_mask)
    }

    /// Build a sample, checking that the three grids align.
    pub fn new(
        image: RgbImage,
        seg_mask: ClassMap,
        loss_mask: ValidityMask,
    ) -> DatasetResult<Self> {
        let expected = image.dimensions();
        if seg_mask.dimensions() != expected {
            return Err(DatasetError::SizeMismatch {
                what: "segmentation mask".to_owned(),
                expected,
                actual: seg_mask.dimensions(),
            });
        }
        if loss_mask.dimensions() != expected {
            return Err(DatasetError::SizeMismatch {
                what: "loss mask".to_owned(),
                expected,
                actual: loss_mask.dimensions(),
            });
        }
        Ok(Self {
            image,
            seg_mask,
            loss_mask,
        })
    }

    /// `(width, height)` of the sample.
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// An encoded sample, ready to be batched.
///
/// Following Burn's convention, datasets return plain buffers and the batcher
/// creates tensors on the target device.
#[derive(Debug, Clone)]
pub struct SegmentationItem {
    /// Image laid out as `[3, H, W]`.
    pub image: Vec<f32>,
    /// One-hot class mask laid out as `[N, H, W]`.
    pub seg_mask: Vec<f32>,
    /// Validity mask laid out as `[1, H, W]`.
    pub loss_mask: Vec<f32>,
    /// Number of one-hot channels `N`.
    pub num_classes: usize,
    /// Height in pixels.
    pub height: usize,
    /// Width in pixels.
    pub width: usize,
}

impl SegmentationItem {
    /// Number of pixels per channel.
    pub const fn pixels(&self) -> usize {
        self.height * self.width
    }

    /// The one-hot plane for class id `class_id` (1-based).
    pub fn class_plane(&self, class_id: usize) -> Option<&[f32]> {
        if class_id == 0 || class_id > self.num_classes {
            return None;
        }
        let plane = self.pixels();
        let start = (class_id - 1) * plane;
        Some(&self.seg_mask[start..start + plane])
    }

    /// Fraction of pixels that contribute to the loss.
    pub fn valid_ratio(&self) -> f32 {
        if self.loss_mask.is_empty() {
            return 0.0;
        }
        self.loss_mask.iter().sum::<f32>() / self.loss_mask.len() as f32
    }
}
