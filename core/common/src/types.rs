//! Secret byte buffers handed in by callers.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Caller-owned secret bytes, wiped when dropped.
///
/// Used for input that must outlive a single call but never reach logs,
/// such as passphrases.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SensitiveBytes(Vec<u8>);

impl SensitiveBytes {
    /// Take ownership of `data` without copying it.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(data.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SensitiveBytes {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for SensitiveBytes {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes([REDACTED; {} bytes])", self.0.len())
    }
}
