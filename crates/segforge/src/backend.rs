//! Compile-time backend selection.
//!
//! `cuda` takes precedence over `wgpu`; without either, the CPU `ndarray`
//! backend is used.

use burn::tensor::backend::Backend;
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        /// Backend the CLI runs tensors on.
        pub type SelectedBackend = burn::backend::Cuda;
        /// Human-readable backend name.
        pub const BACKEND_NAME: &str = "CUDA (NVIDIA GPU)";
    } else if #[cfg(feature = "wgpu")] {
        /// Backend the CLI runs tensors on.
        pub type SelectedBackend = burn::backend::Wgpu;
        /// Human-readable backend name.
        pub const BACKEND_NAME: &str = "WGPU (GPU)";
    } else {
        /// Backend the CLI runs tensors on.
        pub type SelectedBackend = burn::backend::NdArray;
        /// Human-readable backend name.
        pub const BACKEND_NAME: &str = "NdArray (CPU)";
    }
}

/// Device type of [`SelectedBackend`].
pub type SelectedDevice = <SelectedBackend as Backend>::Device;

/// Default device of the selected backend.
pub fn default_device() -> SelectedDevice {
    SelectedDevice::default()
}
