//! Locker configuration.

use serde::{Deserialize, Serialize};

use flintlock_common::{Error, Result};
use flintlock_crypto::stream::check_chunk_size;
use flintlock_crypto::{
    Algorithm, AlgorithmSpec, BackendKind, KdfLimits, KdfParams, DEFAULT_DETACHED_LIMIT,
};

use crate::staging::StagingPolicy;

/// Settings for a [`Locker`](crate::Locker).
///
/// Only `lock` reads `algorithm` and `kdf`; `unlock` takes both from the
/// stream header, so changing these defaults never breaks existing streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockerConfig {
    /// Algorithm used to lock new streams.
    pub algorithm: Algorithm,
    /// Provider backend used for both directions.
    pub backend: BackendKind,
    /// Most bytes a one-shot provider may buffer for one stream.
    pub detached_limit: usize,
    /// Read block size; the algorithm's tuned default if unset.
    pub chunk_size: Option<usize>,
    /// Cost parameters for passphrase-derived keys.
    pub kdf: KdfParams,
    /// Upper bounds on KDF cost, applied to headers before unlocking.
    pub kdf_limits: KdfLimits,
    /// Plaintext staging during unlock.
    pub staging: StagingPolicy,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::DEFAULT,
            backend: BackendKind::Auto,
            detached_limit: DEFAULT_DETACHED_LIMIT,
            chunk_size: None,
            kdf: KdfParams::default(),
            kdf_limits: KdfLimits::default(),
            staging: StagingPolicy::default(),
        }
    }
}

impl LockerConfig {
    /// Default configuration locking with `algorithm`.
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_detached_limit(mut self, limit: usize) -> Self {
        self.detached_limit = limit;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    pub fn with_kdf_limits(mut self, limits: KdfLimits) -> Self {
        self.kdf_limits = limits;
        self
    }

    pub fn with_staging(mut self, staging: StagingPolicy) -> Self {
        self.staging = staging;
        self
    }

    /// Block size for streams of `spec`.
    pub fn chunk_size_for(&self, spec: &AlgorithmSpec) -> usize {
        self.chunk_size.unwrap_or(spec.default_chunk_size)
    }

    /// Check that the configuration can lock streams.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] for a chunk size of zero or above
    ///   [`MAX_CHUNK_SIZE`](flintlock_crypto::MAX_CHUNK_SIZE), or a zero
    ///   detached limit
    /// - [`Error::UnsupportedAlgorithm`] if the backend cannot serve the
    ///   algorithm
    /// - [`Error::KeyDerivation`] if `kdf` exceeds `kdf_limits`
    pub fn validate(&self) -> Result<()> {
        if let Some(chunk_size) = self.chunk_size {
            check_chunk_size(chunk_size)?;
        }
        if self.detached_limit == 0 {
            return Err(Error::InvalidInput(
                "detached limit must be positive".to_string(),
            ));
        }
        self.backend.resolve(self.algorithm.spec())?;
        self.kdf_limits.check(&self.kdf)?;
        Ok(())
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LockerConfig::default();
        assert_eq!(config.algorithm, Algorithm::XChaCha20Poly1305);
        assert_eq!(config.backend, BackendKind::Auto);
        assert_eq!(
            config.chunk_size_for(config.algorithm.spec()),
            64 * 1024
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_json_roundtrip() {
        let config = LockerConfig::new(Algorithm::Aes256Siv)
            .with_backend(BackendKind::Detached)
            .with_chunk_size(4096)
            .with_kdf(KdfParams::scrypt_interactive());

        let json = config.to_json().unwrap();
        assert!(json.contains("\"aes-256-siv\""));
        assert!(json.contains("\"detached\""));
        assert_eq!(LockerConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = LockerConfig::from_json(r#"{"algorithm": "aes-128-gcm"}"#).unwrap();
        assert_eq!(config.algorithm, Algorithm::Aes128Gcm);
        assert_eq!(config.kdf, KdfParams::default());
        assert_eq!(config.staging, StagingPolicy::default());
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            LockerConfig::from_json("{not json"),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(
            LockerConfig::from_json(r#"{"algorithm": "rot13"}"#),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            LockerConfig::default().with_chunk_size(0).validate(),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            LockerConfig::default().with_chunk_size(usize::MAX / 2).validate(),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            LockerConfig::default()
                .with_chunk_size(flintlock_crypto::MAX_CHUNK_SIZE + 1)
                .validate(),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            LockerConfig::default().with_detached_limit(0).validate(),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            LockerConfig::new(Algorithm::Aes256CtrHmacSha256)
                .with_backend(BackendKind::Detached)
                .validate(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            LockerConfig::default().with_kdf(KdfParams::sensitive()).with_kdf_limits(KdfLimits {
                max_argon2_memory_kib: 1024,
                ..KdfLimits::default()
            }).validate(),
            Err(Error::KeyDerivation(_))
        ));
    }
}
