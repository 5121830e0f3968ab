//! Locked stream format for Flintlock.
//!
//! A [`Locker`] turns a plaintext stream into a self-describing locked
//! stream and back. The fixed header records the algorithm, key source,
//! salt and nonce, so unlocking needs only the key and the caller's
//! associated data.
//!
//! # Security Guarantees
//! - Unlock releases plaintext only after the tag verifies
//! - The header is authenticated along with the caller's associated data
//! - KDF cost requested by a header is bounded before any derivation

pub mod config;
pub mod header;
pub mod locker;
pub mod staging;

pub use config::LockerConfig;
pub use header::{Header, KeySource, HEADER_LEN};
pub use locker::{AssociatedData, Locker};
pub use staging::{StagingBuffer, StagingPolicy};

pub use flintlock_common::{Error, Result};
