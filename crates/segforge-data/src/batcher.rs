//! Batching of encoded items into Burn tensors.

use std::marker::PhantomData;

use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Tensor, TensorData},
};

use crate::sample::SegmentationItem;

/// A batch of encoded segmentation samples.
#[derive(Debug, Clone)]
pub struct SegmentationBatch<B: Backend> {
    /// Images `[B, 3, H, W]`.
    pub images: Tensor<B, 4>,
    /// One-hot class masks `[B, N, H, W]`.
    pub seg_masks: Tensor<B, 4>,
    /// Validity masks `[B, 1, H, W]`.
    pub loss_masks: Tensor<B, 4>,
}

impl<B: Backend> SegmentationBatch<B> {
    /// `1 - loss_masks`, the invalid-region input of the focal loss.
    pub fn invalid_masks(&self) -> Tensor<B, 4> {
        self.loss_masks.clone().neg().add_scalar(1.0)
    }
}

/// Converts vectors of [`SegmentationItem`] into a [`SegmentationBatch`].
///
/// All items of a batch must share the same size and class count, which holds
/// for items produced by one dataset since crops have a fixed size.
#[derive(Clone, Default)]
pub struct SegmentationBatcher<B: Backend> {
    _phantom: PhantomData<B>,
}

impl<B: Backend> SegmentationBatcher<B> {
    /// Create a new batcher.
    pub const fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, SegmentationItem, SegmentationBatch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<SegmentationItem>, device: &B::Device) -> SegmentationBatch<B> {
        let batch_size = items.len();

        let mut images = Vec::with_capacity(batch_size);
        let mut seg_masks = Vec::with_capacity(batch_size);
        let mut loss_masks = Vec::with_capacity(batch_size);

        for item in items {
            let (h, w) = (item.height, item.width);
            images.push(Tensor::<B, 3>::from_data(
                TensorData::new(item.image, [3, h, w]),
                device,
            ));
            seg_masks.push(Tensor::<B, 3>::from_data(
                TensorData::new(item.seg_mask, [item.num_classes, h, w]),
                device,
            ));
            loss_masks.push(Tensor::<B, 3>::from_data(
                TensorData::new(item.loss_mask, [1, h, w]),
                device,
            ));
        }

        SegmentationBatch {
            images: Tensor::stack(images, 0),
            seg_masks: Tensor::stack(seg_masks, 0),
            loss_masks: Tensor::stack(loss_masks, 0),
        }
    }
}
