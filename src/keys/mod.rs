//! Signing keys
//!
//! [`KeyRegistry`] maps key serials to slots and serializes access to each
//! physical key. Token drivers plug in through [`HardwareKey`];
//! [`SoftwareKey`] is a file-backed implementation for development.

pub mod registry;
pub mod software;
pub mod token;

pub use registry::{KeyGuard, KeyRegistry, KeySlot};
pub use software::SoftwareKey;
pub use token::{HardwareKey, HardwareSigner, KeySigner};
