//! Common error types for Flintlock.

use thiserror::Error;

/// Top-level error type for Flintlock operations.
///
/// Variants never carry key bytes, passphrases, tags or plaintext.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation was invoked out of the legal session sequence.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Tag mismatch or truncated ciphertext. A wrong key and tampered data
    /// produce the same error.
    #[error("Authentication failed: wrong key or tampered data")]
    Authentication,

    /// A signature did not verify against the message and public key.
    #[error("Signature verification failed")]
    Signature,

    /// The algorithm (or algorithm/backend pairing) is not available.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Key derivation parameters were rejected.
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// The stream header could not be parsed.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// Cryptographic primitive could not be constructed or driven.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Shorthand for a [`Error::ProtocolViolation`].
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    /// Whether this error came from the underlying byte stream.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_message_is_undifferentiated() {
        let msg = Error::Authentication.to_string();
        assert_eq!(msg, "Authentication failed: wrong key or tampered data");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        let err: Error = io.into();
        assert!(err.is_io());
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn test_protocol_shorthand() {
        let err = Error::protocol("update after finalize");
        assert!(matches!(err, Error::ProtocolViolation(ref m) if m == "update after finalize"));
    }
}
