//! Masked focal loss for one-hot segmentation targets.
//!
//! For predicted probabilities `o` and targets `t`:
//!
//! ```text
//! pt   = clamp(o * t + (1 - o) * (1 - t), eps, 1 - eps)
//! at   = alpha * t + (1 - alpha) * (1 - t)
//! loss = -at * (1 - pt)^gamma * ln(pt)
//! ```
//!
//! Invalid pixels (`inv_mask = 1`) are zeroed and the sum is normalized by the
//! number of valid pixels, so the reduced loss is a mean over valid pixels
//! summed over channels.

use burn::{
    config::Config,
    module::{Content, DisplaySettings, Ignored, Module, ModuleDisplay},
    tensor::{
        backend::Backend,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
        Tensor,
    },
};

/// Resampling used when targets must be resized to the prediction size.
#[derive(Config, Debug, Copy, PartialEq, Eq, Hash)]
pub enum ResampleMode {
    /// Smooth resampling; resized targets become soft.
    Bilinear,
    /// Keeps targets binary.
    Nearest,
}

impl Default for ResampleMode {
    fn default() -> Self {
        Self::Bilinear
    }
}

impl From<ResampleMode> for InterpolateMode {
    fn from(mode: ResampleMode) -> Self {
        match mode {
            ResampleMode::Bilinear => Self::Bilinear,
            ResampleMode::Nearest => Self::Nearest,
        }
    }
}

/// Configuration for creating a [focal loss](FocalLoss).
#[derive(Config, Debug)]
pub struct FocalLossConfig {
    /// Weight of the positive class. Default: 0.25
    #[config(default = 0.25)]
    pub alpha: f64,
    /// Focusing exponent. Default: 2.0
    #[config(default = 2.0)]
    pub gamma: f64,
    /// Probability clamp. Default: 1e-6
    #[config(default = 1e-6)]
    pub eps: f64,
    /// Resampling of targets and masks when their size differs from the output.
    #[config(default = "ResampleMode::Bilinear")]
    pub resample: ResampleMode,
}

impl FocalLossConfig {
    /// Initialize [focal loss](FocalLoss).
    pub fn init(&self) -> FocalLoss {
        self.assertions();
        FocalLoss {
            alpha: self.alpha,
            gamma: self.gamma,
            eps: self.eps,
            resample: Ignored(self.resample),
        }
    }

    fn assertions(&self) {
        assert!(
            (0.0..=1.0).contains(&self.alpha),
            "Alpha for FocalLoss must be in [0, 1], got {}",
            self.alpha
        );
        assert!(
            self.gamma >= 0.0,
            "Gamma for FocalLoss must be non-negative, got {}",
            self.gamma
        );
        assert!(
            self.eps > 0.0 && self.eps < 0.5,
            "Epsilon for FocalLoss must be in (0, 0.5), got {}",
            self.eps
        );
    }
}

/// Focal loss over one-hot targets with a per-pixel validity mask.
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct FocalLoss {
    /// Weight of the positive class.
    pub alpha: f64,
    /// Focusing exponent.
    pub gamma: f64,
    /// Probability clamp.
    pub eps: f64,
    /// Target resampling mode.
    pub resample: Ignored<ResampleMode>,
}

impl Default for FocalLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleDisplay for FocalLoss {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content
            .add("alpha", &self.alpha)
            .add("gamma", &self.gamma)
            .add("eps", &self.eps)
            .optional()
    }
}

impl FocalLoss {
    /// Create a new focal loss with default configuration.
    pub fn new() -> Self {
        FocalLossConfig::new().init()
    }

    /// Compute the loss, summed over all elements.
    ///
    /// When every pixel is invalid the normalizer is zero and the result is not
    /// finite.
    ///
    /// # Shapes
    ///
    /// - output: `[B, C, H, W]`, probabilities
    /// - target: `[B, C, H', W']`
    /// - inv_mask: `[B, 1, H', W']`, `1` marks pixels to ignore
    /// - result: `[1]`
    pub fn forward<B: Backend>(
        &self,
        output: Tensor<B, 4>,
        target: Tensor<B, 4>,
        inv_mask: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let (loss, valid) = self.masked(output, target, inv_mask);
        loss.sum().div(valid.sum())
    }

    /// Compute the normalized per-element loss; its sum equals [`forward`](Self::forward).
    ///
    /// # Shapes
    ///
    /// - output: `[B, C, H, W]`
    /// - target: `[B, C, H', W']`
    /// - inv_mask: `[B, 1, H', W']`
    /// - result: `[B, C, H, W]`
    pub fn forward_no_reduction<B: Backend>(
        &self,
        output: Tensor<B, 4>,
        target: Tensor<B, 4>,
        inv_mask: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let (loss, valid) = self.masked(output, target, inv_mask);
        let dims = loss.dims();
        let normalizer = valid.sum().reshape([1, 1, 1, 1]).expand(dims);
        loss.div(normalizer)
    }

    /// Masked element-wise loss `[B, C, H, W]` and the validity mask `[B, 1, H, W]`.
    fn masked<B: Backend>(
        &self,
        output: Tensor<B, 4>,
        target: Tensor<B, 4>,
        inv_mask: Tensor<B, 4>,
    ) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let [_, _, height, width] = output.dims();
        let (target, inv_mask) = if target.dims()[2..] == [height, width] {
            (target, inv_mask)
        } else {
            let options = || InterpolateOptions::new(self.resample.0.into());
            (
                interpolate(target, [height, width], options()),
                interpolate(inv_mask, [height, width], options()),
            )
        };
        self.assertions(&output, &target, &inv_mask);

        let dims = output.dims();
        let not_target = target.clone().neg().add_scalar(1.0);
        let pt = (output.clone() * target.clone() + output.neg().add_scalar(1.0) * not_target.clone())
            .clamp(self.eps, 1.0 - self.eps);
        let at = target.mul_scalar(self.alpha) + not_target.mul_scalar(1.0 - self.alpha);
        let focal = pt.clone().neg().add_scalar(1.0).powf_scalar(self.gamma);
        let loss = at.neg() * focal * pt.log();

        let valid = inv_mask.neg().add_scalar(1.0);
        (loss * valid.clone().expand(dims), valid)
    }

    fn assertions<B: Backend>(
        &self,
        output: &Tensor<B, 4>,
        target: &Tensor<B, 4>,
        inv_mask: &Tensor<B, 4>,
    ) {
        let output_dims = output.dims();
        let target_dims = target.dims();
        let mask_dims = inv_mask.dims();
        assert_eq!(
            output_dims, target_dims,
            "Shape of output ({output_dims:?}) must match target ({target_dims:?})"
        );
        assert_eq!(
            [mask_dims[0], mask_dims[2], mask_dims[3]],
            [output_dims[0], output_dims[2], output_dims[3]],
            "Invalid mask ({mask_dims:?}) must match output batch and spatial size ({output_dims:?})"
        );
        assert_eq!(
            mask_dims[1], 1,
            "Invalid mask must have a single channel, got {mask_dims:?}"
        );
    }
}
