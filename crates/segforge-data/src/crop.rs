//! Affine crops applied jointly to an image and its label grids.
//!
//! A crop maps the source sample onto a fixed `crop_height x crop_width` canvas with
//! one affine transform (scale, rotation, translation, optional horizontal flip).
//! The same transform is applied to the image, the class grid and the validity
//! grid so the three stay aligned:
//! - image: bilinear sampling, black outside the source;
//! - class grid: nearest sampling, background outside the source;
//! - validity grid: nearest sampling, invalid outside the source.
//!
//! The training crop draws its parameters at random, the evaluation crop is a
//! deterministic center crop at a fixed scale.

use burn::config::Config;
use image::{Luma, Rgb};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use rand::{rngs::StdRng, Rng};

use crate::{
    error::{DatasetError, DatasetResult},
    sample::{ClassMap, RawSample, ValidityMask},
};

/// Configuration for the affine crops.
#[derive(Config, Debug)]
pub struct CropConfig {
    /// Output height in pixels.
    #[config(default = 480)]
    pub crop_height: u32,
    /// Output width in pixels.
    #[config(default = 480)]
    pub crop_width: u32,
    /// Lower bound of the random zoom factor.
    #[config(default = 0.8)]
    pub min_scale: f32,
    /// Upper bound of the random zoom factor.
    #[config(default = 1.25)]
    pub max_scale: f32,
    /// Maximum absolute rotation in degrees.
    #[config(default = 10.0)]
    pub max_rotation_degrees: f32,
    /// Maximum shift of the crop center, as a fraction of the source size.
    #[config(default = 0.1)]
    pub max_translation: f32,
    /// Probability of a horizontal flip.
    #[config(default = 0.5)]
    pub flip_probability: f64,
    /// Zoom factor of the evaluation crop.
    #[config(default = 1.0)]
    pub center_scale: f32,
}

impl CropConfig {
    /// Initialize the randomized training crop.
    pub fn init_random(&self) -> RandomAffineCrop {
        self.assertions();
        RandomAffineCrop {
            config: self.clone(),
        }
    }

    /// Initialize the deterministic evaluation crop.
    pub fn init_center(&self) -> CenterAffineCrop {
        self.assertions();
        CenterAffineCrop {
            config: self.clone(),
        }
    }

    fn assertions(&self) {
        assert!(
            self.crop_height > 0 && self.crop_width > 0,
            "Crop size must be positive, got {}x{}",
            self.crop_height,
            self.crop_width
        );
        assert!(
            self.min_scale > 0.0 && self.min_scale <= self.max_scale,
            "Crop scale range must satisfy 0 < min_scale <= max_scale, got [{}, {}]",
            self.min_scale,
            self.max_scale
        );
        assert!(
            self.center_scale > 0.0,
            "Center crop scale must be positive, got {}",
            self.center_scale
        );
        assert!(
            self.max_rotation_degrees >= 0.0 && self.max_translation >= 0.0,
            "Rotation and translation bounds must be non-negative"
        );
        assert!(
            (0.0..=1.0).contains(&self.flip_probability),
            "Flip probability must be in [0, 1], got {}",
            self.flip_probability
        );
    }
}

/// Capability to crop a raw sample to a fixed size.
pub trait MultiCrop: Send + Sync {
    /// Crop all grids of `sample` with one shared transform.
    fn crop(&self, sample: &RawSample, rng: &mut StdRng) -> DatasetResult<RawSample>;
}

/// Parameters of one affine crop, mapping source to output coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineParams {
    /// Zoom relative to the cover-fit scale.
    pub scale: f32,
    /// Rotation in radians.
    pub rotation: f32,
    /// Shift of the source center as a fraction of `(width, height)`.
    pub translation: (f32, f32),
    /// Mirror horizontally.
    pub flip: bool,
}

impl AffineParams {
    /// Identity zoom, centered, no rotation.
    pub const fn centered(scale: f32) -> Self {
        Self {
            scale,
            rotation: 0.0,
            translation: (0.0, 0.0),
            flip: false,
        }
    }

    /// Row-major 3x3 matrix from source to output pixel coordinates.
    pub fn matrix(&self, source: (u32, u32), output: (u32, u32)) -> [f32; 9] {
        let (src_w, src_h) = (source.0 as f32, source.1 as f32);
        let (out_w, out_h) = (output.0 as f32, output.1 as f32);

        // Smallest scale at which the source covers the whole output.
        let cover = (out_w / src_w).max(out_h / src_h);
        let s = cover * self.scale;
        let f = if self.flip { -1.0 } else { 1.0 };
        let (sin, cos) = self.rotation.sin_cos();

        // Linear part: mirror x, then rotate and scale.
        let a00 = s * cos * f;
        let a01 = -s * sin;
        let a10 = s * sin * f;
        let a11 = s * cos;

        // Translate so the shifted source center lands on the output center.
        let cx = src_w * (0.5 + self.translation.0);
        let cy = src_h * (0.5 + self.translation.1);
        let tx = out_w / 2.0 - (a00 * cx + a01 * cy);
        let ty = out_h / 2.0 - (a10 * cx + a11 * cy);

        [a00, a01, tx, a10, a11, ty, 0.0, 0.0, 1.0]
    }
}

fn apply_affine(
    sample: &RawSample,
    params: &AffineParams,
    output: (u32, u32),
) -> DatasetResult<RawSample> {
    let matrix = params.matrix(sample.dimensions(), output);
    let projection =
        Projection::from_matrix(matrix).ok_or_else(|| DatasetError::DegenerateTransform {
            reason: format!("{params:?}"),
        })?;

    let (width, height) = output;
    let mut image = image::RgbImage::new(width, height);
    warp_into(
        &sample.image,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut image,
    );

    let mut seg_mask = ClassMap::new(width, height);
    warp_into(
        &sample.seg_mask,
        &projection,
        Interpolation::Nearest,
        Luma([0]),
        &mut seg_mask,
    );

    let mut loss_mask = ValidityMask::new(width, height);
    warp_into(
        &sample.loss_mask,
        &projection,
        Interpolation::Nearest,
        Luma([0]),
        &mut loss_mask,
    );

    Ok(RawSample {
        image,
        seg_mask,
        loss_mask,
    })
}

/// Randomized affine crop used for training.
#[derive(Debug, Clone)]
pub struct RandomAffineCrop {
    config: CropConfig,
}

impl RandomAffineCrop {
    /// Draw crop parameters within the configured bounds.
    pub fn sample_params(&self, rng: &mut StdRng) -> AffineParams {
        let c = &self.config;
        let scale = if c.max_scale > c.min_scale {
            rng.random_range(c.min_scale..=c.max_scale)
        } else {
            c.min_scale
        };
        let rotation = if c.max_rotation_degrees > 0.0 {
            rng.random_range(-c.max_rotation_degrees..=c.max_rotation_degrees)
                .to_radians()
        } else {
            0.0
        };
        let mut shift = || {
            if c.max_translation > 0.0 {
                rng.random_range(-c.max_translation..=c.max_translation)
            } else {
                0.0
            }
        };
        let translation = (shift(), shift());
        let flip = rng.random_bool(c.flip_probability);

        AffineParams {
            scale,
            rotation,
            translation,
            flip,
        }
    }
}

impl MultiCrop for RandomAffineCrop {
    fn crop(&self, sample: &RawSample, rng: &mut StdRng) -> DatasetResult<RawSample> {
        let params = self.sample_params(rng);
        tracing::trace!(?params, "random affine crop");
        apply_affine(
            sample,
            &params,
            (self.config.crop_width, self.config.crop_height),
        )
    }
}

/// Deterministic center crop used for evaluation.
#[derive(Debug, Clone)]
pub struct CenterAffineCrop {
    config: CropConfig,
}

impl MultiCrop for CenterAffineCrop {
    fn crop(&self, sample: &RawSample, _rng: &mut StdRng) -> DatasetResult<RawSample> {
        apply_affine(
            sample,
            &AffineParams::centered(self.config.center_scale),
            (self.config.crop_width, self.config.crop_height),
        )
    }
}

#[cfg(test)]
mod tests {
    use image::RgbImage;
    use rand::SeedableRng;

    use super::*;

    fn striped_sample(width: u32, height: u32) -> RawSample {
        let image = RgbImage::from_fn(width, height, |x, _| Rgb([(x * 10) as u8, 0, 0]));
        let seg_mask = ClassMap::from_fn(width, height, |x, _| Luma([(x / 4) as u16]));
        RawSample::fully_valid(image, seg_mask).unwrap()
    }

    #[test]
    fn center_crop_at_identity_scale_preserves_same_sized_input() {
        let crop = CropConfig::new()
            .with_crop_height(8)
            .with_crop_width(16)
            .init_center();
        let sample = striped_sample(16, 8);
        let mut rng = StdRng::seed_from_u64(0);

        let out = crop.crop(&sample, &mut rng).unwrap();

        assert_eq!(out.dimensions(), (16, 8));
        assert_eq!(out.seg_mask, sample.seg_mask);
        assert!(out.loss_mask.pixels().all(|p| p.0[0] == 1));
    }

    #[test]
    fn random_crop_output_has_configured_size_for_all_grids() {
        let crop = CropConfig::new()
            .with_crop_height(12)
            .with_crop_width(10)
            .init_random();
        let sample = striped_sample(40, 30);

        for seed in 0..8 {
            let mut rng = StdRng::seed_from_u64(seed);
            let out = crop.crop(&sample, &mut rng).unwrap();
            assert_eq!(out.image.dimensions(), (10, 12));
            assert_eq!(out.seg_mask.dimensions(), (10, 12));
            assert_eq!(out.loss_mask.dimensions(), (10, 12));
        }
    }

    #[test]
    fn nearest_sampling_never_invents_class_ids() {
        let crop = CropConfig::new()
            .with_crop_height(16)
            .with_crop_width(16)
            .with_max_rotation_degrees(30.0)
            .init_random();
        let sample = striped_sample(32, 32);

        for seed in 0..8 {
            let mut rng = StdRng::seed_from_u64(seed);
            let out = crop.crop(&sample, &mut rng).unwrap();
            assert!(out.seg_mask.pixels().all(|p| p.0[0] < 8));
            assert!(out.loss_mask.pixels().all(|p| p.0[0] <= 1));
        }
    }

    #[test]
    fn zoomed_out_center_crop_marks_padding_invalid() {
        let crop = CropConfig::new()
            .with_crop_height(16)
            .with_crop_width(16)
            .with_center_scale(0.5)
            .init_center();
        let sample = striped_sample(16, 16);
        let mut rng = StdRng::seed_from_u64(0);

        let out = crop.crop(&sample, &mut rng).unwrap();

        assert_eq!(out.loss_mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.seg_mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.loss_mask.get_pixel(8, 8).0[0], 1);
    }

    #[test]
    fn flip_mirrors_the_columns() {
        let params = AffineParams {
            flip: true,
            ..AffineParams::centered(1.0)
        };
        let m = params.matrix((10, 10), (10, 10));

        // x = 2 lands at 10 - 2 = 8.
        let x = m[0] * 2.0 + m[1] * 5.0 + m[2];
        assert!((x - 8.0).abs() < 1e-4);
    }

    #[test]
    #[should_panic = "Crop scale range"]
    fn inverted_scale_range_panics() {
        CropConfig::new()
            .with_min_scale(2.0)
            .with_max_scale(1.0)
            .init_random();
    }
}
