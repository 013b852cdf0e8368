//! Loss functions for semantic segmentation with Burn.
//!
//! - **[`FocalLoss`]**: focal loss over one-hot targets, masked by a per-pixel
//!   validity mask and normalized by the number of valid pixels.
//!
//! ## Usage Example
//!
//! ```rust
//! use burn::{backend::NdArray, tensor::Tensor};
//! use segforge_loss::{FocalLossConfig, ResampleMode};
//!
//! let device = Default::default();
//! let loss = FocalLossConfig::new()
//!     .with_gamma(2.0)
//!     .with_resample(ResampleMode::Nearest)
//!     .init();
//!
//! let output = Tensor::<NdArray, 4>::full([2, 3, 8, 8], 0.5, &device);
//! let target = Tensor::<NdArray, 4>::zeros([2, 3, 16, 16], &device);
//! let inv_mask = Tensor::<NdArray, 4>::zeros([2, 1, 16, 16], &device);
//! let value = loss.forward(output, target, inv_mask);
//! assert_eq!(value.dims(), [1]);
//! ```

mod focal;

pub use focal::{FocalLoss, FocalLossConfig, ResampleMode};
