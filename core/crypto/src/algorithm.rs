//! AEAD algorithm catalogue.
//!
//! Every algorithm a stream can be locked with is described by a constant
//! [`AlgorithmSpec`]. The table is the only process-wide default state; which
//! algorithm a caller uses is always passed explicitly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use flintlock_common::{Error, Result};

/// 16 KiB, a good block for AES-based modes.
const CHUNK_16K: usize = 16 * 1024;

/// 64 KiB, ChaCha-based modes amortize better over larger blocks.
const CHUNK_64K: usize = 64 * 1024;

/// Supported AEAD families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "aes-128-gcm")]
    Aes128Gcm,
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
    /// AES-256 in CTR mode authenticated with a truncated HMAC-SHA256.
    #[serde(rename = "aes-256-ctr-hmac-sha256")]
    Aes256CtrHmacSha256,
    #[serde(rename = "aes-256-ccm")]
    Aes256Ccm,
    #[serde(rename = "aes-256-eax")]
    Aes256Eax,
    #[serde(rename = "aes-256-ocb")]
    Aes256Ocb,
    /// AES-SIV with a 512-bit key (two AES-256 keys).
    #[serde(rename = "aes-256-siv")]
    Aes256Siv,
    /// AES-256 in full-block CFB mode authenticated with a truncated
    /// HMAC-SHA256.
    #[serde(rename = "aes-256-cfb-hmac-sha256")]
    Aes256CfbHmacSha256,
    /// AES-256 in OFB mode authenticated with a truncated HMAC-SHA256.
    #[serde(rename = "aes-256-ofb-hmac-sha256")]
    Aes256OfbHmacSha256,
}

/// Static description of an AEAD family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmSpec {
    /// Algorithm this entry describes.
    pub algorithm: Algorithm,
    /// Identifier persisted in stream headers.
    pub id: u8,
    /// Canonical lowercase name.
    pub name: &'static str,
    /// Key length in bytes.
    pub key_len: usize,
    /// Nonce length in bytes.
    pub nonce_len: usize,
    /// Authentication tag length in bytes.
    pub tag_len: usize,
    /// Whether associated data is authenticated. Sessions refuse non-empty
    /// associated data when false.
    pub supports_aad: bool,
    /// Whether the keystream can be positioned at an arbitrary byte offset.
    ///
    /// Informational only: streams are always processed front to back.
    pub seekable: bool,
    /// Whether the incremental backend can serve this algorithm.
    pub incremental: bool,
    /// Whether the tag-upfront backend can serve this algorithm.
    pub detached: bool,
    /// Default read block size for the chunked driver.
    pub default_chunk_size: usize,
}

/// The algorithm table, ordered by wire id.
pub const ALGORITHMS: &[AlgorithmSpec] = &[
    AlgorithmSpec {
        algorithm: Algorithm::Aes128Gcm,
        id: 1,
        name: "aes-128-gcm",
        key_len: 16,
        nonce_len: 12,
        tag_len: 16,
        supports_aad: true,
        seekable: true,
        incremental: true,
        detached: true,
        default_chunk_size: CHUNK_16K,
    },
    AlgorithmSpec {
        algorithm: Algorithm::Aes256Gcm,
        id: 2,
        name: "aes-256-gcm",
        key_len: 32,
        nonce_len: 12,
        tag_len: 16,
        supports_aad: true,
        seekable: true,
        incremental: true,
        detached: true,
        default_chunk_size: CHUNK_16K,
    },
    AlgorithmSpec {
        algorithm: Algorithm::ChaCha20Poly1305,
        id: 3,
        name: "chacha20-poly1305",
        key_len: 32,
        nonce_len: 12,
        tag_len: 16,
        supports_aad: true,
        seekable: true,
        incremental: true,
        detached: true,
        default_chunk_size: CHUNK_64K,
    },
    AlgorithmSpec {
        algorithm: Algorithm::XChaCha20Poly1305,
        id: 4,
        name: "xchacha20-poly1305",
        key_len: 32,
        nonce_len: 24,
        tag_len: 16,
        supports_aad: true,
        seekable: true,
        incremental: true,
        detached: true,
        default_chunk_size: CHUNK_64K,
    },
    AlgorithmSpec {
        algorithm: Algorithm::Aes256CtrHmacSha256,
        id: 5,
        name: "aes-256-ctr-hmac-sha256",
        key_len: 32,
        nonce_len: 16,
        tag_len: 16,
        supports_aad: true,
        seekable: true,
        incremental: true,
        detached: false,
        default_chunk_size: CHUNK_16K,
    },
    AlgorithmSpec {
        algorithm: Algorithm::Aes256Ccm,
        id: 6,
        name: "aes-256-ccm",
        key_len: 32,
        nonce_len: 11,
        tag_len: 16,
        supports_aad: true,
        seekable: false,
        incremental: false,
        detached: true,
        default_chunk_size: CHUNK_16K,
    },
    AlgorithmSpec {
        algorithm: Algorithm::Aes256Eax,
        id: 7,
        name: "aes-256-eax",
        key_len: 32,
        nonce_len: 16,
        tag_len: 16,
        supports_aad: true,
        seekable: false,
        incremental: true,
        detached: true,
        default_chunk_size: CHUNK_16K,
    },
    AlgorithmSpec {
        algorithm: Algorithm::Aes256Ocb,
        id: 8,
        name: "aes-256-ocb",
        key_len: 32,
        nonce_len: 12,
        tag_len: 16,
        supports_aad: true,
        seekable: false,
        incremental: true,
        detached: true,
        default_chunk_size: CHUNK_16K,
    },
    AlgorithmSpec {
        algorithm: Algorithm::Aes256Siv,
        id: 9,
        name: "aes-256-siv",
        key_len: 64,
        nonce_len: 16,
        tag_len: 16,
        supports_aad: true,
        seekable: false,
        incremental: false,
        detached: true,
        default_chunk_size: CHUNK_16K,
    },
    AlgorithmSpec {
        algorithm: Algorithm::Aes256CfbHmacSha256,
        id: 10,
        name: "aes-256-cfb-hmac-sha256",
        key_len: 32,
        nonce_len: 16,
        tag_len: 16,
        supports_aad: true,
        seekable: false,
        incremental: true,
        detached: false,
        default_chunk_size: CHUNK_16K,
    },
    AlgorithmSpec {
        algorithm: Algorithm::Aes256OfbHmacSha256,
        id: 11,
        name: "aes-256-ofb-hmac-sha256",
        key_len: 32,
        nonce_len: 16,
        tag_len: 16,
        supports_aad: true,
        seekable: false,
        incremental: true,
        detached: false,
        default_chunk_size: CHUNK_16K,
    },
];

impl Algorithm {
    /// Algorithm used when a configuration does not name one.
    pub const DEFAULT: Self = Self::XChaCha20Poly1305;

    /// Every supported algorithm, in wire-id order.
    pub fn all() -> impl Iterator<Item = Algorithm> {
        ALGORITHMS.iter().map(|spec| spec.algorithm)
    }

    /// Look up the static description of this algorithm.
    pub fn spec(self) -> &'static AlgorithmSpec {
        // Table order follows declaration order.
        &ALGORITHMS[self as usize]
    }

    /// Resolve a persisted algorithm id.
    ///
    /// # Errors
    /// - [`Error::UnsupportedAlgorithm`] for unknown ids; there is no fallback.
    pub fn from_id(id: u8) -> Result<Self> {
        ALGORITHMS
            .iter()
            .find(|spec| spec.id == id)
            .map(|spec| spec.algorithm)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("unknown algorithm id {}", id)))
    }

    /// Wire id of this algorithm.
    pub fn id(self) -> u8 {
        self.spec().id
    }

    /// Canonical name of this algorithm.
    pub fn name(self) -> &'static str {
        self.spec().name
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        ALGORITHMS
            .iter()
            .find(|spec| spec.name == wanted)
            .map(|spec| spec.algorithm)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("unknown algorithm '{}'", s)))
    }
}
