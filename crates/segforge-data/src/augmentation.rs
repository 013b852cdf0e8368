//! Photometric augmentation applied to the image only.
//!
//! Label grids are never touched here; geometric changes belong to [`crate::crop`].
//!
//! Training pipeline, in order:
//! 1. [`ImageAugmentor`]: sharpen/blur (`Enhance`), salt-and-pepper noise (`Pepper`),
//!    random desaturation (`Grayscale`);
//! 2. conversion to `[0, 1]` floats;
//! 3. [`ColorJitter`]: brightness, contrast, saturation and hue in random order.
//!
//! Evaluation only performs the float conversion.

use burn::config::Config;
use image::{imageops, Rgb, Rgb32FImage, RgbImage};
use rand::{rngs::StdRng, seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};

/// Available stochastic augmentation methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AugmentationMethod {
    /// Sharpen or blur with a random strength.
    Enhance,
    /// Salt-and-pepper noise.
    Pepper,
    /// Random conversion to grayscale.
    Grayscale,
}

/// Data augmentation configuration parameters.
#[derive(Config, Debug)]
pub struct AugmentConfig {
    /// Methods applied, in order.
    #[config(default = "vec![AugmentationMethod::Enhance, AugmentationMethod::Pepper]")]
    pub enabled_methods: Vec<AugmentationMethod>,
    /// Probability that `Enhance` changes the image at all.
    #[config(default = 0.5)]
    pub enhance_probability: f64,
    /// Upper bound of the sharpness factor; `1.0` is neutral, lower blurs.
    #[config(default = 3.0)]
    pub max_sharpness: f32,
    /// Per-pixel probability of pepper noise.
    #[config(default = 0.0015)]
    pub pepper_rate: f64,
    /// Probability of desaturating the whole image.
    #[config(default = 0.1)]
    pub grayscale_probability: f64,
}

impl AugmentConfig {
    /// Initialize an [`ImageAugmentor`].
    pub fn init(&self) -> ImageAugmentor {
        self.assertions();
        ImageAugmentor {
            config: self.clone(),
        }
    }

    fn assertions(&self) {
        for (name, p) in [
            ("enhance_probability", self.enhance_probability),
            ("pepper_rate", self.pepper_rate),
            ("grayscale_probability", self.grayscale_probability),
        ] {
            assert!(
                (0.0..=1.0).contains(&p),
                "{name} must be in [0, 1], got {p}"
            );
        }
        assert!(
            self.max_sharpness >= 0.0,
            "max_sharpness must be non-negative, got {}",
            self.max_sharpness
        );
    }
}

/// Color jitter ranges. Factors are drawn uniformly, hue shifts in turns.
#[derive(Config, Debug)]
pub struct ColorJitterConfig {
    /// Brightness factor drawn from `[max(0, 1 - x), 1 + x]`.
    #[config(default = 0.3)]
    pub brightness: f32,
    /// Contrast factor drawn from `[max(0, 1 - x), 1 + x]`.
    #[config(default = 0.3)]
    pub contrast: f32,
    /// Saturation factor drawn from `[max(0, 1 - x), 1 + x]`.
    #[config(default = 0.3)]
    pub saturation: f32,
    /// Hue shift drawn from `[-x, x]`, in turns.
    #[config(default = 0.1)]
    pub hue: f32,
}

impl ColorJitterConfig {
    /// Initialize a [`ColorJitter`].
    pub fn init(&self) -> ColorJitter {
        assert!(
            self.brightness >= 0.0 && self.contrast >= 0.0 && self.saturation >= 0.0,
            "Color jitter ranges must be non-negative"
        );
        assert!(
            (0.0..=0.5).contains(&self.hue),
            "Hue jitter must be in [0, 0.5], got {}",
            self.hue
        );
        ColorJitter {
            config: self.clone(),
        }
    }
}

/// Capability to turn a cropped RGB image into a float image in `[0, 1]`.
pub trait ImageTransform: Send + Sync {
    /// Transform `image`; the output keeps its dimensions.
    fn apply(&self, image: RgbImage, rng: &mut StdRng) -> Rgb32FImage;
}

fn to_unit_float(image: &RgbImage) -> Rgb32FImage {
    Rgb32FImage::from_fn(image.width(), image.height(), |x, y| {
        let Rgb([r, g, b]) = *image.get_pixel(x, y);
        Rgb([
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
        ])
    })
}

fn luminance(Rgb([r, g, b]): Rgb<f32>) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

/// Evaluation transform: float conversion only.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalTransform;

impl ImageTransform for EvalTransform {
    fn apply(&self, image: RgbImage, _rng: &mut StdRng) -> Rgb32FImage {
        to_unit_float(&image)
    }
}

/// Training transform: augmentor, float conversion, then color jitter.
#[derive(Debug, Clone)]
pub struct TrainTransform {
    augmentor: ImageAugmentor,
    jitter: ColorJitter,
}

impl TrainTransform {
    /// Combine an augmentor and a color jitter.
    pub const fn new(augmentor: ImageAugmentor, jitter: ColorJitter) -> Self {
        Self { augmentor, jitter }
    }
}

impl ImageTransform for TrainTransform {
    fn apply(&self, image: RgbImage, rng: &mut StdRng) -> Rgb32FImage {
        let image = self.augmentor.augment(image, rng);
        let mut image = to_unit_float(&image);
        self.jitter.apply(&mut image, rng);
        image
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JitterOp {
    Brightness,
    Contrast,
    Saturation,
    Hue,
}

/// Random brightness, contrast, saturation and hue changes.
#[derive(Debug, Clone)]
pub struct ColorJitter {
    config: ColorJitterConfig,
}

impl ColorJitter {
    fn factor(range: f32, rng: &mut StdRng) -> Option<f32> {
        if range <= 0.0 {
            return None;
        }
        Some(rng.random_range((1.0 - range).max(0.0)..=1.0 + range))
    }

    /// Jitter `image` in place; values stay in `[0, 1]`.
    pub fn apply(&self, image: &mut Rgb32FImage, rng: &mut StdRng) {
        let mut ops = [
            JitterOp::Brightness,
            JitterOp::Contrast,
            JitterOp::Saturation,
            JitterOp::Hue,
        ];
        ops.shuffle(rng);

        for op in ops {
            match op {
                JitterOp::Brightness => {
                    if let Some(b) = Self::factor(self.config.brightness, rng) {
                        Self::blend(image, b, |_| 0.0);
                    }
                }
                JitterOp::Contrast => {
                    if let Some(c) = Self::factor(self.config.contrast, rng) {
                        let pixels = (image.width() * image.height()).max(1) as f32;
                        let mean = image.pixels().map(|p| luminance(*p)).sum::<f32>() / pixels;
                        Self::blend(image, c, |_| mean);
                    }
                }
                JitterOp::Saturation => {
                    if let Some(s) = Self::factor(self.config.saturation, rng) {
                        Self::blend(image, s, luminance);
                    }
                }
                JitterOp::Hue => {
                    if self.config.hue > 0.0 {
                        let shift = rng.random_range(-self.config.hue..=self.config.hue);
                        let degrees = (shift * 360.0).round() as i32;
                        if degrees != 0 {
                            // huerotate clamps to the 8-bit range whatever the subpixel type
                            *image = imageops::huerotate(&*image, degrees);
                            for channel in image.iter_mut() {
                                *channel = channel.clamp(0.0, 1.0);
                            }
                        }
                    }
                }
            }
        }
    }

    /// `factor * pixel + (1 - factor) * other(pixel)`, clamped to `[0, 1]`.
    fn blend(image: &mut Rgb32FImage, factor: f32, other: impl Fn(Rgb<f32>) -> f32) {
        for pixel in image.pixels_mut() {
            let base = other(*pixel);
            for channel in &mut pixel.0 {
                *channel = factor
                    .mul_add(*channel, (1.0 - factor) * base)
                    .clamp(0.0, 1.0);
            }
        }
    }
}

/// Executes the configured stochastic augmentations on 8-bit images.
#[derive(Debug, Clone)]
pub struct ImageAugmentor {
    config: AugmentConfig,
}

impl ImageAugmentor {
    /// Apply every enabled method in order.
    pub fn augment(&self, mut image: RgbImage, rng: &mut StdRng) -> RgbImage {
        for method in &self.config.enabled_methods {
            image = match method {
                AugmentationMethod::Enhance => self.apply_enhancement(image, rng),
                AugmentationMethod::Pepper => self.apply_pepper_noise(image, rng),
                AugmentationMethod::Grayscale => self.apply_grayscale(image, rng),
            };
        }
        image
    }

    /// Sharpen (factor above 1) or blur (factor below 1).
    fn apply_enhancement(&self, image: RgbImage, rng: &mut StdRng) -> RgbImage {
        if !rng.random_bool(self.config.enhance_probability) || self.config.max_sharpness <= 0.0
        {
            return image;
        }

        let sharpness: f32 = rng.random_range(0.0..=self.config.max_sharpness);
        if sharpness > 1.0 {
            imageops::unsharpen(&image, sharpness - 1.0, 1)
        } else if sharpness < 1.0 {
            imageops::blur(&image, (1.0 - sharpness) * 2.0)
        } else {
            image
        }
    }

    /// Salt-and-pepper noise: each pixel turns black or white with `pepper_rate`.
    fn apply_pepper_noise(&self, mut image: RgbImage, rng: &mut StdRng) -> RgbImage {
        if self.config.pepper_rate <= 0.0 {
            return image;
        }

        for pixel in image.pixels_mut() {
            if rng.random_bool(self.config.pepper_rate) {
                *pixel = if rng.random_bool(0.5) {
                    Rgb([0, 0, 0])
                } else {
                    Rgb([255, 255, 255])
                };
            }
        }
        image
    }

    fn apply_grayscale(&self, mut image: RgbImage, rng: &mut StdRng) -> RgbImage {
        if !rng.random_bool(self.config.grayscale_probability) {
            return image;
        }

        for pixel in image.pixels_mut() {
            let Rgb([r, g, b]) = *pixel;
            let y = luminance(Rgb([f32::from(r), f32::from(g), f32::from(b)]))
                .round()
                .clamp(0.0, 255.0) as u8;
            *pixel = Rgb([y, y, y]);
        }
        image
    }
}
