//! `segforge`: segmentation training data and loss for Burn.
//!
//! Re-exports the dataset pipeline ([`data`]) and the focal loss ([`loss`]),
//! plus backend selection and dataset inspection used by the `segforge` binary.

pub mod backend;
pub mod inspect;

#[doc(inline)]
pub use segforge_data as data;
#[doc(inline)]
pub use segforge_loss as loss;
