//! Primitive provider interface.
//!
//! A provider is one live AEAD computation handed out by a backend's `begin`.
//! Backends differ in calling convention: some emit output from every
//! `update` and compute the tag lazily, others need the whole message (and,
//! when decrypting, the tag) before they can produce anything. Both are
//! expressed through this trait; the session layer never assumes output
//! arrives before finalization.

use flintlock_common::{Error, Result};

/// Whether a provider encrypts or decrypts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

impl Direction {
    /// Lowercase name for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Encrypt => "encrypt",
            Self::Decrypt => "decrypt",
        }
    }
}

/// Result of finalizing an encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Ciphertext not yet returned by `update`.
    pub output: Vec<u8>,
    /// Authentication tag.
    pub tag: Vec<u8>,
}

/// Result of finalizing a decryption.
#[derive(Debug, PartialEq, Eq)]
pub enum Verified {
    /// Tag matched; carries plaintext not yet returned by `update`.
    Authentic(Vec<u8>),
    /// Tag mismatch. Any plaintext already produced must be discarded.
    Rejected,
}

/// One AEAD computation.
///
/// # Call sequence
/// `update_aad*` → `update*` → exactly one of `finalize_encrypt` /
/// `finalize_decrypt`. Implementations reject `update_aad` after `update`,
/// and every call after finalization, with [`Error::ProtocolViolation`].
pub trait AeadProvider: Send {
    /// Authenticate associated data.
    fn update_aad(&mut self, aad: &[u8]) -> Result<()>;

    /// Transform a chunk of data.
    ///
    /// Returns ciphertext (encrypt) or provisional plaintext (decrypt); may be
    /// empty if the provider defers output to finalization.
    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>>;

    /// Finish an encryption and produce the tag.
    fn finalize_encrypt(&mut self) -> Result<Sealed>;

    /// Finish a decryption, comparing against `expected_tag` in constant time.
    fn finalize_decrypt(&mut self, expected_tag: &[u8]) -> Result<Verified>;
}

/// Call-order bookkeeping shared by provider implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    Aad,
    Data,
    Finished,
}

impl Progress {
    pub(crate) fn before_aad(self) -> Result<()> {
        match self {
            Self::Aad => Ok(()),
            Self::Data => Err(Error::protocol(
                "associated data cannot be added after data has been processed",
            )),
            Self::Finished => Err(Error::protocol("provider already finalized")),
        }
    }

    pub(crate) fn before_data(self) -> Result<()> {
        match self {
            Self::Finished => Err(Error::protocol("provider already finalized")),
            _ => Ok(()),
        }
    }

    pub(crate) fn before_finalize(self, expected: Direction, actual: Direction) -> Result<()> {
        if self == Self::Finished {
            return Err(Error::protocol("provider already finalized"));
        }
        if expected != actual {
            return Err(Error::protocol(format!(
                "cannot finalize a {} provider as {}",
                actual.as_str(),
                expected.as_str()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_rules() {
        assert!(Progress::Aad.before_aad().is_ok());
        assert!(Progress::Data.before_aad().is_err());
        assert!(Progress::Data.before_data().is_ok());
        assert!(Progress::Finished.before_data().is_err());
        assert!(Progress::Aad
            .before_finalize(Direction::Encrypt, Direction::Encrypt)
            .is_ok());
        assert!(matches!(
            Progress::Data.before_finalize(Direction::Decrypt, Direction::Encrypt),
            Err(Error::ProtocolViolation(_))
        ));
    }
}
