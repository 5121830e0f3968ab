//! Common utilities and types shared across Flintlock crates.
//!
//! This crate holds the error taxonomy every layer reports through and the
//! zeroizing byte wrapper used for secret caller input.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::SensitiveBytes;
