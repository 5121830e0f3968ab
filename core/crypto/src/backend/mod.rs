//! Provider backends.
//!
//! Two families implement [`AeadProvider`]:
//!
//! - [`streaming`]: incremental constructions assembled from block/stream
//!   ciphers and universal hashes. Output flows from every `update` and the
//!   tag is computed at the end.
//! - [`detached`]: the one-shot RustCrypto AEAD types. They need the whole
//!   message, and when decrypting the tag, before producing output, so they
//!   buffer up to a caller-chosen limit.
//!
//! Both produce the standard wire format of each algorithm, so a stream
//! sealed by one opens with the other.

pub mod detached;
pub mod streaming;

pub use detached::DEFAULT_DETACHED_LIMIT;

use std::fmt;

use serde::{Deserialize, Serialize};

use flintlock_common::{Error, Result};

use crate::algorithm::AlgorithmSpec;
use crate::keys::{Nonce, SessionKey};
use crate::provider::{AeadProvider, Direction};

/// Which backend family serves a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Streaming when the algorithm supports it, detached otherwise.
    #[default]
    Auto,
    /// Incremental constructions only.
    Streaming,
    /// One-shot AEAD constructions only.
    Detached,
}

impl BackendKind {
    /// Resolve `Auto` to a concrete backend for `spec`.
    ///
    /// # Errors
    /// - [`Error::UnsupportedAlgorithm`] if the requested backend cannot
    ///   serve the algorithm
    pub fn resolve(self, spec: &AlgorithmSpec) -> Result<Self> {
        let resolved = match self {
            Self::Auto if spec.incremental => Self::Streaming,
            Self::Auto => Self::Detached,
            other => other,
        };
        let available = match resolved {
            Self::Streaming => spec.incremental,
            Self::Detached => spec.detached,
            Self::Auto => false,
        };
        if !available {
            return Err(Error::UnsupportedAlgorithm(format!(
                "{} is not available from the {} backend",
                spec.name, resolved
            )));
        }
        Ok(resolved)
    }

    /// Start a provider for `spec`.
    ///
    /// `detached_limit` caps the bytes a one-shot provider may buffer; the
    /// streaming backend ignores it.
    ///
    /// # Preconditions
    /// - `key` and `nonce` lengths must match `spec`
    ///
    /// # Errors
    /// - [`Error::UnsupportedAlgorithm`] if the backend cannot serve `spec`
    /// - [`Error::InvalidInput`] on key or nonce length mismatch
    pub fn begin(
        self,
        spec: &AlgorithmSpec,
        key: &SessionKey,
        nonce: &Nonce,
        direction: Direction,
        detached_limit: usize,
    ) -> Result<Box<dyn AeadProvider>> {
        key.check_len(spec)?;
        if nonce.len() != spec.nonce_len {
            return Err(Error::InvalidInput(format!(
                "Invalid nonce length for {}: expected {}, got {}",
                spec.name,
                spec.nonce_len,
                nonce.len()
            )));
        }

        match self.resolve(spec)? {
            Self::Streaming => streaming::begin(spec, key.as_bytes(), nonce.as_bytes(), direction),
            _ => detached::begin(
                spec,
                key.as_bytes(),
                nonce.as_bytes(),
                direction,
                detached_limit,
            ),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Streaming => "streaming",
            Self::Detached => "detached",
        })
    }
}
