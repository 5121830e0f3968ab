//! Locked stream header.
//!
//! Every locked stream starts with a fixed 80-byte header carrying
//! everything needed to unlock it except the key. All integers are
//! little-endian:
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 4 | magic `FLCK` |
//! | 4 | 1 | format version |
//! | 5 | 1 | algorithm id |
//! | 6 | 1 | key source (0 raw, otherwise KDF id) |
//! | 7 | 1 | reserved, zero |
//! | 8 | 12 | KDF cost parameters, zero for raw keys |
//! | 20 | 32 | salt, zero for raw keys |
//! | 52 | 24 | nonce, zero padded |
//! | 76 | 4 | caller associated data length |
//!
//! The encoded header is authenticated as the last associated data segment.

use std::io::{self, Read};

use flintlock_common::{Error, Result};
use flintlock_crypto::kdf::ENCODED_PARAMS_LEN;
use flintlock_crypto::keys::{MAX_NONCE_LENGTH, SALT_LENGTH};
use flintlock_crypto::{Algorithm, AlgorithmSpec, KdfParams, Nonce, Salt};

/// Stream magic bytes.
pub const MAGIC: [u8; 4] = *b"FLCK";

/// Current header format version.
pub const FORMAT_VERSION: u8 = 1;

/// Encoded header length.
pub const HEADER_LEN: usize = 80;

const KEY_SOURCE_RAW: u8 = 0;

const OFF_VERSION: usize = 4;
const OFF_ALGORITHM: usize = 5;
const OFF_KEY_SOURCE: usize = 6;
const OFF_RESERVED: usize = 7;
const OFF_KDF: usize = 8;
const OFF_SALT: usize = OFF_KDF + ENCODED_PARAMS_LEN;
const OFF_NONCE: usize = OFF_SALT + SALT_LENGTH;
const OFF_AAD_LEN: usize = OFF_NONCE + MAX_NONCE_LENGTH;

/// How the session key of a stream was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Caller supplied the key directly.
    Raw,
    /// Key was derived from a passphrase with these parameters.
    Derived(KdfParams),
}

impl KeySource {
    fn id(&self) -> u8 {
        match self {
            Self::Raw => KEY_SOURCE_RAW,
            Self::Derived(params) => params.id(),
        }
    }
}

/// Decoded stream header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub algorithm: Algorithm,
    pub key_source: KeySource,
    pub salt: Salt,
    pub nonce: Nonce,
    /// Length of the caller's associated data.
    pub aad_len: u32,
}

impl Header {
    pub fn spec(&self) -> &'static AlgorithmSpec {
        self.algorithm.spec()
    }

    /// Encode into the fixed layout.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..OFF_VERSION].copy_from_slice(&MAGIC);
        out[OFF_VERSION] = FORMAT_VERSION;
        out[OFF_ALGORITHM] = self.algorithm.id();
        out[OFF_KEY_SOURCE] = self.key_source.id();
        if let KeySource::Derived(params) = &self.key_source {
            out[OFF_KDF..OFF_SALT].copy_from_slice(&params.encode());
        }
        out[OFF_SALT..OFF_NONCE].copy_from_slice(self.salt.as_bytes());
        let nonce = self.nonce.as_bytes();
        out[OFF_NONCE..OFF_NONCE + nonce.len()].copy_from_slice(nonce);
        out[OFF_AAD_LEN..].copy_from_slice(&self.aad_len.to_le_bytes());
        out
    }

    /// Decode the fixed layout.
    ///
    /// # Errors
    /// - [`Error::MalformedHeader`] on bad magic, version, reserved byte, key
    ///   source, or non-zero padding
    /// - [`Error::UnsupportedAlgorithm`] for an unknown algorithm id
    /// - [`Error::KeyDerivation`] for unrepresentable KDF parameters, an
    ///   all-zero salt on a passphrase stream, or a salt on a raw-key stream
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self> {
        if bytes[..OFF_VERSION] != MAGIC {
            return Err(Error::MalformedHeader("bad magic".to_string()));
        }
        if bytes[OFF_VERSION] != FORMAT_VERSION {
            return Err(Error::MalformedHeader(format!(
                "unsupported format version {}",
                bytes[OFF_VERSION]
            )));
        }
        if bytes[OFF_RESERVED] != 0 {
            return Err(Error::MalformedHeader("reserved byte is not zero".to_string()));
        }

        let algorithm = Algorithm::from_id(bytes[OFF_ALGORITHM])?;
        let spec = algorithm.spec();

        let mut kdf = [0u8; ENCODED_PARAMS_LEN];
        kdf.copy_from_slice(&bytes[OFF_KDF..OFF_SALT]);
        let key_source = match bytes[OFF_KEY_SOURCE] {
            KEY_SOURCE_RAW => {
                if kdf.iter().any(|b| *b != 0) {
                    return Err(Error::MalformedHeader(
                        "raw key stream carries KDF parameters".to_string(),
                    ));
                }
                KeySource::Raw
            }
            id => KeySource::Derived(KdfParams::decode(id, &kdf)?),
        };

        let mut salt = [0u8; SALT_LENGTH];
        salt.copy_from_slice(&bytes[OFF_SALT..OFF_NONCE]);
        let salt = Salt::from_bytes(salt);
        match key_source {
            KeySource::Raw if !salt.is_zero() => {
                return Err(Error::KeyDerivation(
                    "raw key stream carries a salt".to_string(),
                ))
            }
            KeySource::Derived(_) if salt.is_zero() => {
                return Err(Error::KeyDerivation(
                    "passphrase stream has an all-zero salt".to_string(),
                ))
            }
            _ => {}
        }

        let nonce_field = &bytes[OFF_NONCE..OFF_AAD_LEN];
        if nonce_field[spec.nonce_len..].iter().any(|b| *b != 0) {
            return Err(Error::MalformedHeader("nonce padding is not zero".to_string()));
        }
        let nonce = Nonce::from_bytes(&nonce_field[..spec.nonce_len])?;

        let mut aad_len = [0u8; 4];
        aad_len.copy_from_slice(&bytes[OFF_AAD_LEN..]);

        Ok(Self {
            algorithm,
            key_source,
            salt,
            nonce,
            aad_len: u32::from_le_bytes(aad_len),
        })
    }

    /// Read and decode a header, returning the raw bytes as well.
    ///
    /// # Errors
    /// - [`Error::MalformedHeader`] if the stream ends early
    /// - [`Error::Io`] for any other read failure
    pub fn read_from<R: Read>(reader: &mut R) -> Result<(Self, [u8; HEADER_LEN])> {
        let mut bytes = [0u8; HEADER_LEN];
        reader.read_exact(&mut bytes).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::MalformedHeader("truncated header".to_string()),
            _ => Error::Io(e),
        })?;
        let header = Self::decode(&bytes)?;
        Ok((header, bytes))
    }
}
