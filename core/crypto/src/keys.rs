//! Key types with secure memory handling.
//!
//! All key types automatically zeroize their memory on drop to prevent
//! sensitive data from persisting in memory.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use flintlock_common::{Error, Result, SensitiveBytes};

use crate::algorithm::AlgorithmSpec;

/// Length of KDF salts in bytes.
pub const SALT_LENGTH: usize = 32;

/// Largest nonce any supported algorithm uses.
pub const MAX_NONCE_LENGTH: usize = 24;

/// Raw symmetric key for one cipher session.
///
/// The length is dictated by the algorithm it is used with. Owned by exactly
/// one session and wiped when that session closes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: Vec<u8>,
}

impl SessionKey {
    /// Create a session key from raw bytes.
    pub fn from_bytes(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    /// Generate a random key sized for `spec`.
    pub fn generate(spec: &AlgorithmSpec) -> Self {
        let mut key = vec![0u8; spec.key_len];
        rand::thread_rng().fill_bytes(&mut key);
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.key.len()
    }

    /// Whether the key is empty.
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }

    /// Check the key length against an algorithm.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] if the length does not match `spec.key_len`
    pub fn check_len(&self, spec: &AlgorithmSpec) -> Result<()> {
        if self.key.len() != spec.key_len {
            return Err(Error::InvalidInput(format!(
                "Invalid key length for {}: expected {}, got {}",
                spec.name,
                spec.key_len,
                self.key.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey([REDACTED; {} bytes])", self.key.len())
    }
}

/// Passphrase supplied by a caller, fed to the KDF.
#[derive(Clone)]
pub struct Passphrase(SensitiveBytes);

impl Passphrase {
    /// Wrap passphrase bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(SensitiveBytes::new(bytes))
    }

    /// Get the passphrase bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for Passphrase {
    fn from(value: &str) -> Self {
        Self(SensitiveBytes::from(value))
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Passphrase([REDACTED])")
    }
}

/// Key material supplied out-of-band to lock or unlock a stream.
#[derive(Debug, Clone)]
pub enum KeyMaterial {
    /// Raw key, used directly.
    Raw(SessionKey),
    /// Passphrase, stretched through the configured KDF.
    Passphrase(Passphrase),
}

impl KeyMaterial {
    /// Raw key material from bytes.
    pub fn raw(key: impl Into<Vec<u8>>) -> Self {
        Self::Raw(SessionKey::from_bytes(key))
    }

    /// Passphrase key material.
    pub fn passphrase(passphrase: impl Into<Vec<u8>>) -> Self {
        Self::Passphrase(Passphrase::new(passphrase))
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt(pub [u8; SALT_LENGTH]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// All-zero salt, recorded when a raw key is used.
    pub fn zero() -> Self {
        Self([0u8; SALT_LENGTH])
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; SALT_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; SALT_LENGTH] {
        &self.0
    }

    /// Whether every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

/// Per-session nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    /// Generate a random nonce sized for `spec`.
    pub fn generate(spec: &AlgorithmSpec) -> Self {
        let mut nonce = vec![0u8; spec.nonce_len];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self(nonce)
    }

    /// Create from bytes.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] if longer than [`MAX_NONCE_LENGTH`]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_NONCE_LENGTH {
            return Err(Error::InvalidInput(format!(
                "Nonce too long: {} bytes",
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Get the nonce bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Nonce length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the nonce is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Algorithm;

    #[test]
    fn test_session_key_generate() {
        let spec = Algorithm::Aes256Siv.spec();
        let key1 = SessionKey::generate(spec);
        let key2 = SessionKey::generate(spec);

        assert_eq!(key1.len(), 64);
        // Random keys should be different
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_session_key_length_check() {
        let spec = Algorithm::Aes128Gcm.spec();
        assert!(SessionKey::from_bytes(vec![0u8; 16]).check_len(spec).is_ok());
        assert!(matches!(
            SessionKey::from_bytes(vec![0u8; 32]).check_len(spec),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_key_debug_redacted() {
        let key = SessionKey::from_bytes(vec![0x41u8; 32]);
        let shown = format!("{:?}", KeyMaterial::Raw(key));
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("65"));

        let pass = format!("{:?}", KeyMaterial::passphrase("open sesame"));
        assert!(!pass.contains("sesame"));
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();

        // Random salts should be different
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
        assert!(Salt::zero().is_zero());
    }

    #[test]
    fn test_nonce_sizes() {
        for algorithm in Algorithm::all() {
            let spec = algorithm.spec();
            assert_eq!(Nonce::generate(spec).len(), spec.nonce_len);
            assert!(spec.nonce_len <= MAX_NONCE_LENGTH);
        }
        assert!(Nonce::from_bytes(&[0u8; 25]).is_err());
    }
}
