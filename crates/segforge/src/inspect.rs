//! Dataset inspection: sample the first keys of a dataset and summarize them.

use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, ElementConversion},
};
use segforge_data::{
    DatasetResult, SegmentationBatcher, SegmentationDataset, SegmentationItem,
    SegmentationSource,
};
use segforge_loss::FocalLoss;

/// Summary of the inspected samples.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectReport {
    /// Dataset length.
    pub len: usize,
    /// Number of samples actually loaded.
    pub inspected: usize,
    /// Output `(height, width)` of the items, `(0, 0)` if none were loaded.
    pub size: (usize, usize),
    /// Pixel count per class id `1..=N`, at index `id - 1`.
    pub class_pixels: Vec<u64>,
    /// Mean fraction of valid pixels.
    pub valid_ratio: f32,
    /// Focal loss of a constant 0.5 prediction against the inspected batch.
    pub baseline_loss: Option<f32>,
}

/// Load the first `samples` keys of `dataset`, log each and build a report.
///
/// # Errors
///
/// Fails on the first sample that cannot be loaded.
pub fn inspect<B: Backend, S: SegmentationSource>(
    dataset: &SegmentationDataset<S>,
    samples: usize,
    device: &B::Device,
) -> DatasetResult<InspectReport> {
    let count = samples.min(dataset.len());
    let items = (0..count)
        .map(|key| {
            let item = dataset.sample(key)?;
            tracing::info!(
                key,
                height = item.height,
                width = item.width,
                valid_ratio = item.valid_ratio(),
                "sample"
            );
            Ok(item)
        })
        .collect::<DatasetResult<Vec<_>>>()?;

    let num_classes = dataset.source().num_classes();
    let class_pixels = count_class_pixels(&items, num_classes);
    let valid_ratio = if items.is_empty() {
        0.0
    } else {
        items.iter().map(SegmentationItem::valid_ratio).sum::<f32>() / items.len() as f32
    };
    let size = items.first().map_or((0, 0), |item| (item.height, item.width));
    let baseline_loss = (!items.is_empty() && num_classes > 0)
        .then(|| baseline_loss::<B>(items, device));

    Ok(InspectReport {
        len: dataset.len(),
        inspected: count,
        size,
        class_pixels,
        valid_ratio,
        baseline_loss,
    })
}

fn count_class_pixels(items: &[SegmentationItem], num_classes: usize) -> Vec<u64> {
    let mut counts = vec![0u64; num_classes];
    for item in items {
        for (idx, count) in counts.iter_mut().enumerate() {
            if let Some(plane) = item.class_plane(idx + 1) {
                *count += plane.iter().filter(|&&v| v > 0.5).count() as u64;
            }
        }
    }
    counts
}

fn baseline_loss<B: Backend>(items: Vec<SegmentationItem>, device: &B::Device) -> f32 {
    let batch = SegmentationBatcher::<B>::new().batch(items, device);
    let output = batch.seg_masks.zeros_like().add_scalar(0.5);
    FocalLoss::new()
        .forward(output, batch.seg_masks.clone(), batch.invalid_masks())
        .into_scalar()
        .elem::<f32>()
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgb, RgbImage};
    use segforge_data::{
        ClassMap, CropConfig, DatasetError, PipelineConfig, RawSample, Split, ValidityMask,
    };

    use super::*;
    use crate::backend::{default_device, SelectedBackend};

    /// Left half class 1, right half class 3 (no channel), top row invalid.
    struct Halves;

    impl SegmentationSource for Halves {
        fn get_raw_data(&self, key: usize) -> DatasetResult<RawSample> {
            self.check_key(key)?;
            let image = RgbImage::from_pixel(8, 4, Rgb([100, 150, 200]));
            let seg_mask = ClassMap::from_fn(8, 4, |x, _| Luma([if x < 4 { 1 } else { 3 }]));
            let loss_mask = ValidityMask::from_fn(8, 4, |_, y| Luma([u8::from(y > 0)]));
            RawSample::new(image, seg_mask, loss_mask)
        }

        fn len(&self) -> usize {
            3
        }

        fn num_classes(&self) -> usize {
            2
        }
    }

    fn dataset() -> SegmentationDataset<Halves> {
        let config = PipelineConfig::new()
            .with_crop(CropConfig::new().with_crop_height(4).with_crop_width(8))
            .with_seed(Some(1));
        SegmentationDataset::new(Halves, &config, Split::Val)
    }

    #[test]
    fn report_summarizes_inspected_samples() {
        let report = inspect::<SelectedBackend, _>(&dataset(), 2, &default_device()).unwrap();

        assert_eq!(report.len, 3);
        assert_eq!(report.inspected, 2);
        assert_eq!(report.size, (4, 8));
        assert_eq!(report.class_pixels.len(), 2);
        assert!(report.class_pixels[0] > 0);
        assert_eq!(report.class_pixels[1], 0);
        assert!(report.valid_ratio > 0.5 && report.valid_ratio < 1.0);
        let loss = report.baseline_loss.unwrap();
        assert!(loss.is_finite() && loss > 0.0);
    }

    #[test]
    fn sample_count_is_capped_by_length() {
        let report = inspect::<SelectedBackend, _>(&dataset(), 10, &default_device()).unwrap();
        assert_eq!(report.inspected, 3);

        let empty = inspect::<SelectedBackend, _>(&dataset(), 0, &default_device()).unwrap();
        assert_eq!(empty.inspected, 0);
        assert_eq!(empty.size, (0, 0));
        assert_eq!(empty.baseline_loss, None);
    }

    #[test]
    fn dataset_errors_propagate() {
        struct Broken;

        impl SegmentationSource for Broken {
            fn get_raw_data(&self, _key: usize) -> DatasetResult<RawSample> {
                Err(DatasetError::IndexOutOfRange { index: 0, len: 0 })
            }

            fn len(&self) -> usize {
                1
            }

            fn num_classes(&self) -> usize {
                1
            }
        }

        let dataset = SegmentationDataset::new(Broken, &PipelineConfig::new(), Split::Val);
        assert!(inspect::<SelectedBackend, _>(&dataset, 1, &default_device()).is_err());
    }
}
