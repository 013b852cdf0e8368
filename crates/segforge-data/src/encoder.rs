//! Label encoding: class-id grids to one-hot channels.

use image::Rgb32FImage;

use crate::sample::{ClassMap, SegmentationItem, ValidityMask};

/// Converts a cropped, augmented sample into channel-first float buffers.
///
/// Class id `c` in `1..=num_classes` lights channel `c - 1`. Background (`0`)
/// and ids above `num_classes` have no channel, so every channel is zero there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegEncoder {
    num_classes: usize,
}

impl SegEncoder {
    /// Create an encoder producing `num_classes` one-hot channels.
    pub const fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }

    /// Number of one-hot channels.
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Encode one sample.
    ///
    /// # Panics
    ///
    /// Panics if the three grids do not share the same dimensions.
    pub fn encode(
        &self,
        image: &Rgb32FImage,
        seg_mask: &ClassMap,
        loss_mask: &ValidityMask,
    ) -> SegmentationItem {
        let dims = image.dimensions();
        assert_eq!(
            seg_mask.dimensions(),
            dims,
            "Segmentation mask {:?} must match image {dims:?}",
            seg_mask.dimensions()
        );
        assert_eq!(
            loss_mask.dimensions(),
            dims,
            "Loss mask {:?} must match image {dims:?}",
            loss_mask.dimensions()
        );

        let (width, height) = (dims.0 as usize, dims.1 as usize);
        let plane = width * height;

        SegmentationItem {
            image: Self::hwc_to_chw(image.as_raw(), plane),
            seg_mask: self.one_hot(seg_mask.as_raw(), plane),
            loss_mask: loss_mask.as_raw().iter().map(|&v| f32::from(v)).collect(),
            num_classes: self.num_classes,
            height,
            width,
        }
    }

    fn one_hot(&self, class_ids: &[u16], plane: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; self.num_classes * plane];
        for (idx, &class_id) in class_ids.iter().enumerate() {
            let class_id = class_id as usize;
            if (1..=self.num_classes).contains(&class_id) {
                out[(class_id - 1) * plane + idx] = 1.0;
            }
        }
        out
    }

    fn hwc_to_chw(interleaved: &[f32], plane: usize) -> Vec<f32> {
        let mut out = vec![0.0f32; 3 * plane];
        for (idx, rgb) in interleaved.chunks_exact(3).enumerate() {
            out[idx] = rgb[0];
            out[plane + idx] = rgb[1];
            out[2 * plane + idx] = rgb[2];
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgb};

    use super::*;

    fn grids() -> (Rgb32FImage, ClassMap, ValidityMask) {
        let image = Rgb32FImage::from_fn(3, 2, |x, y| Rgb([x as f32, y as f32, 7.0]));
        let seg_mask = ClassMap::from_raw(3, 2, vec![0, 1, 2, 3, 9, 1]).unwrap();
        let loss_mask = ValidityMask::from_raw(3, 2, vec![1, 1, 0, 1, 0, 1]).unwrap();
        (image, seg_mask, loss_mask)
    }

    #[test]
    fn encode_produces_channel_first_layouts() {
        let (image, seg_mask, loss_mask) = grids();
        let item = SegEncoder::new(3).encode(&image, &seg_mask, &loss_mask);

        assert_eq!((item.height, item.width), (2, 3));
        assert_eq!(item.image.len(), 3 * 6);
        assert_eq!(&item.image[0..6], &[0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
        assert_eq!(&item.image[6..12], &[0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert!(item.image[12..].iter().all(|&v| v == 7.0));
        assert_eq!(item.loss_mask, vec![1.0, 1.0, 0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn one_hot_channels_follow_ascending_class_ids() {
        let (image, seg_mask, loss_mask) = grids();
        let item = SegEncoder::new(3).encode(&image, &seg_mask, &loss_mask);

        assert_eq!(item.class_plane(1).unwrap(), &[0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        assert_eq!(item.class_plane(2).unwrap(), &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        assert_eq!(item.class_plane(3).unwrap(), &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn channel_sum_is_zero_or_one() {
        let (image, seg_mask, loss_mask) = grids();
        let item = SegEncoder::new(3).encode(&image, &seg_mask, &loss_mask);

        for idx in 0..item.pixels() {
            let sum: f32 = (1..=3).map(|c| item.class_plane(c).unwrap()[idx]).sum();
            assert!(sum == 0.0 || sum == 1.0);
        }
        // Background and the out-of-range id 9 have no channel.
        assert_eq!((1..=3).map(|c| item.class_plane(c).unwrap()[0]).sum::<f32>(), 0.0);
        assert_eq!((1..=3).map(|c| item.class_plane(c).unwrap()[4]).sum::<f32>(), 0.0);
    }

    #[test]
    #[should_panic = "Loss mask"]
    fn encode_rejects_misaligned_loss_mask() {
        let (image, seg_mask, _) = grids();
        let loss_mask = ValidityMask::from_pixel(2, 2, Luma([1]));
        SegEncoder::new(3).encode(&image, &seg_mask, &loss_mask);
    }
}
