//! Message digests behind one interface.
//!
//! [`Hasher`] wraps the SHA-2, SHA-3, SHAKE and BLAKE2 implementations. A
//! hasher is finalized by the first call to [`Hasher::digest`]; later calls
//! return the same digest, and feeding or copying a finalized hasher is a
//! protocol violation.
//!
//! SHAKE and BLAKE2 produce digests of a caller-chosen length
//! ([`Hasher::with_digest_size`]). The others have one fixed length.

use std::fmt;
use std::str::FromStr;

use digest::{DynDigest, ExtendableOutput, Update, VariableOutput};
use serde::{Deserialize, Serialize};

use flintlock_common::{Error, Result};

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha512_224,
    Sha512_256,
    Sha3_224,
    Sha3_256,
    Sha3_384,
    Sha3_512,
    Blake2b512,
    Blake2s256,
    Shake128,
    Shake256,
}

struct HashInfo {
    name: &'static str,
    /// Default digest length.
    digest_size: usize,
    /// Accepted digest lengths, when the output length is selectable.
    variable: Option<(usize, usize)>,
    block_size: usize,
    oid: &'static str,
}

/// Longest SHAKE output accepted by [`Hasher::with_digest_size`].
pub const MAX_XOF_SIZE: usize = 1 << 16;

const HASHES: &[(HashAlgorithm, HashInfo)] = &[
    (
        HashAlgorithm::Sha224,
        HashInfo {
            name: "sha224",
            digest_size: 28,
            variable: None,
            block_size: 64,
            oid: "2.16.840.1.101.3.4.2.4",
        },
    ),
    (
        HashAlgorithm::Sha256,
        HashInfo {
            name: "sha256",
            digest_size: 32,
            variable: None,
            block_size: 64,
            oid: "2.16.840.1.101.3.4.2.1",
        },
    ),
    (
        HashAlgorithm::Sha384,
        HashInfo {
            name: "sha384",
            digest_size: 48,
            variable: None,
            block_size: 128,
            oid: "2.16.840.1.101.3.4.2.2",
        },
    ),
    (
        HashAlgorithm::Sha512,
        HashInfo {
            name: "sha512",
            digest_size: 64,
            variable: None,
            block_size: 128,
            oid: "2.16.840.1.101.3.4.2.3",
        },
    ),
    (
        HashAlgorithm::Sha512_224,
        HashInfo {
            name: "sha512_224",
            digest_size: 28,
            variable: None,
            block_size: 128,
            oid: "2.16.840.1.101.3.4.2.5",
        },
    ),
    (
        HashAlgorithm::Sha512_256,
        HashInfo {
            name: "sha512_256",
            digest_size: 32,
            variable: None,
            block_size: 128,
            oid: "2.16.840.1.101.3.4.2.6",
        },
    ),
    (
        HashAlgorithm::Sha3_224,
        HashInfo {
            name: "sha3_224",
            digest_size: 28,
            variable: None,
            block_size: 144,
            oid: "2.16.840.1.101.3.4.2.7",
        },
    ),
    (
        HashAlgorithm::Sha3_256,
        HashInfo {
            name: "sha3_256",
            digest_size: 32,
            variable: None,
            block_size: 136,
            oid: "2.16.840.1.101.3.4.2.8",
        },
    ),
    (
        HashAlgorithm::Sha3_384,
        HashInfo {
            name: "sha3_384",
            digest_size: 48,
            variable: None,
            block_size: 104,
            oid: "2.16.840.1.101.3.4.2.9",
        },
    ),
    (
        HashAlgorithm::Sha3_512,
        HashInfo {
            name: "sha3_512",
            digest_size: 64,
            variable: None,
            block_size: 72,
            oid: "2.16.840.1.101.3.4.2.10",
        },
    ),
    (
        HashAlgorithm::Blake2b512,
        HashInfo {
            name: "blake2b512",
            digest_size: 64,
            variable: Some((1, 64)),
            block_size: 128,
            oid: "1.3.6.1.4.1.1722.12.2.1.16",
        },
    ),
    (
        HashAlgorithm::Blake2s256,
        HashInfo {
            name: "blake2s256",
            digest_size: 32,
            variable: Some((1, 32)),
            block_size: 64,
            oid: "1.3.6.1.4.1.1722.12.2.2.8",
        },
    ),
    (
        HashAlgorithm::Shake128,
        HashInfo {
            name: "shake128",
            digest_size: 32,
            variable: Some((1, MAX_XOF_SIZE)),
            block_size: 168,
            oid: "2.16.840.1.101.3.4.2.11",
        },
    ),
    (
        HashAlgorithm::Shake256,
        HashInfo {
            name: "shake256",
            digest_size: 64,
            variable: Some((1, MAX_XOF_SIZE)),
            block_size: 136,
            oid: "2.16.840.1.101.3.4.2.12",
        },
    ),
];

impl HashAlgorithm {
    /// Every supported digest.
    pub fn all() -> impl Iterator<Item = HashAlgorithm> {
        HASHES.iter().map(|(algorithm, _)| *algorithm)
    }

    fn info(self) -> &'static HashInfo {
        // Table order follows declaration order.
        &HASHES[self as usize].1
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Default digest length in bytes.
    pub fn digest_size(self) -> usize {
        self.info().digest_size
    }

    /// Whether [`Hasher::with_digest_size`] accepts lengths other than the
    /// default.
    pub fn is_variable(self) -> bool {
        self.info().variable.is_some()
    }

    /// Internal block length in bytes.
    pub fn block_size(self) -> usize {
        self.info().block_size
    }

    /// ASN.1 object identifier in dotted form, for the default digest size.
    pub fn oid(self) -> &'static str {
        self.info().oid
    }

    fn default_state(self) -> Box<dyn HashState> {
        match self {
            Self::Sha224 => Box::new(Fixed(sha2::Sha224::default())),
            Self::Sha256 => Box::new(Fixed(sha2::Sha256::default())),
            Self::Sha384 => Box::new(Fixed(sha2::Sha384::default())),
            Self::Sha512 => Box::new(Fixed(sha2::Sha512::default())),
            Self::Sha512_224 => Box::new(Fixed(sha2::Sha512_224::default())),
            Self::Sha512_256 => Box::new(Fixed(sha2::Sha512_256::default())),
            Self::Sha3_224 => Box::new(Fixed(sha3::Sha3_224::default())),
            Self::Sha3_256 => Box::new(Fixed(sha3::Sha3_256::default())),
            Self::Sha3_384 => Box::new(Fixed(sha3::Sha3_384::default())),
            Self::Sha3_512 => Box::new(Fixed(sha3::Sha3_512::default())),
            Self::Blake2b512 => Box::new(Fixed(blake2::Blake2b512::default())),
            Self::Blake2s256 => Box::new(Fixed(blake2::Blake2s256::default())),
            Self::Shake128 => Box::new(Xof::new(sha3::Shake128::default(), 32)),
            Self::Shake256 => Box::new(Xof::new(sha3::Shake256::default(), 64)),
        }
    }

    fn sized_state(self, digest_size: usize) -> Result<Box<dyn HashState>> {
        if digest_size == self.digest_size() {
            return Ok(self.default_state());
        }
        let (min, max) = self.info().variable.ok_or_else(|| {
            Error::InvalidInput(format!(
                "{} has a fixed digest size of {}",
                self.name(),
                self.digest_size()
            ))
        })?;
        if digest_size < min || digest_size > max {
            return Err(Error::InvalidInput(format!(
                "{} digest size {} outside [{}, {}]",
                self.name(),
                digest_size,
                min,
                max
            )));
        }

        let invalid = |_| Error::InvalidInput(format!("invalid digest size {}", digest_size));
        Ok(match self {
            Self::Blake2b512 => Box::new(Variable(
                blake2::Blake2bVar::new(digest_size).map_err(invalid)?,
            )),
            Self::Blake2s256 => Box::new(Variable(
                blake2::Blake2sVar::new(digest_size).map_err(invalid)?,
            )),
            Self::Shake128 => Box::new(Xof::new(sha3::Shake128::default(), digest_size)),
            Self::Shake256 => Box::new(Xof::new(sha3::Shake256::default(), digest_size)),
            _ => self.default_state(),
        })
    }

    /// Fixed-output digest object, as consumed by RSA padding schemes.
    ///
    /// # Errors
    /// - [`Error::UnsupportedAlgorithm`] for the SHAKE functions
    pub(crate) fn dyn_digest(self) -> Result<Box<dyn DynDigest + Send + Sync>> {
        Ok(match self {
            Self::Sha224 => Box::new(sha2::Sha224::default()),
            Self::Sha256 => Box::new(sha2::Sha256::default()),
            Self::Sha384 => Box::new(sha2::Sha384::default()),
            Self::Sha512 => Box::new(sha2::Sha512::default()),
            Self::Sha512_224 => Box::new(sha2::Sha512_224::default()),
            Self::Sha512_256 => Box::new(sha2::Sha512_256::default()),
            Self::Sha3_224 => Box::new(sha3::Sha3_224::default()),
            Self::Sha3_256 => Box::new(sha3::Sha3_256::default()),
            Self::Sha3_384 => Box::new(sha3::Sha3_384::default()),
            Self::Sha3_512 => Box::new(sha3::Sha3_512::default()),
            Self::Blake2b512 => Box::new(blake2::Blake2b512::default()),
            Self::Blake2s256 => Box::new(blake2::Blake2s256::default()),
            Self::Shake128 | Self::Shake256 => {
                return Err(Error::UnsupportedAlgorithm(format!(
                    "{} has no fixed output for padding",
                    self.name()
                )))
            }
        })
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    /// Accepts `sha256`, `SHA-256`, `sha3-256`, `sha512/256`, `blake2b` and
    /// similar.
    fn from_str(s: &str) -> Result<Self> {
        let wanted = compact(s.trim());
        match wanted.as_str() {
            "blake2b" => return Ok(Self::Blake2b512),
            "blake2s" => return Ok(Self::Blake2s256),
            _ => {}
        }
        HASHES
            .iter()
            .find(|(_, info)| compact(info.name) == wanted)
            .map(|(algorithm, _)| *algorithm)
            .ok_or_else(|| Error::UnsupportedAlgorithm(format!("unknown hash '{}'", s)))
    }
}

/// Lowercase with separators removed. Distinct for every supported name.
fn compact(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_' | '/'))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Object-safe digest state that can be cloned while staying `Send`.
trait HashState: Send {
    fn absorb(&mut self, data: &[u8]);
    fn finish(self: Box<Self>) -> Vec<u8>;
    fn clone_state(&self) -> Box<dyn HashState>;
}

/// Fixed-length digest.
#[derive(Clone)]
struct Fixed<D>(D);

impl<D> HashState for Fixed<D>
where
    D: DynDigest + Clone + Send + 'static,
{
    fn absorb(&mut self, data: &[u8]) {
        DynDigest::update(&mut self.0, data);
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        DynDigest::finalize(Box::new(self.0)).into_vec()
    }

    fn clone_state(&self) -> Box<dyn HashState> {
        Box::new(self.clone())
    }
}

/// BLAKE2 with a selected output length.
#[derive(Clone)]
struct Variable<V>(V);

impl<V> HashState for Variable<V>
where
    V: VariableOutput + Update + Clone + Send + 'static,
{
    fn absorb(&mut self, data: &[u8]) {
        Update::update(&mut self.0, data);
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        self.0.finalize_boxed().into_vec()
    }

    fn clone_state(&self) -> Box<dyn HashState> {
        Box::new(self.clone())
    }
}

/// Extendable-output function read to a fixed length.
#[derive(Clone)]
struct Xof<X> {
    state: X,
    len: usize,
}

impl<X> Xof<X> {
    fn new(state: X, len: usize) -> Self {
        Self { state, len }
    }
}

impl<X> HashState for Xof<X>
where
    X: ExtendableOutput + Update + Clone + Send + 'static,
{
    fn absorb(&mut self, data: &[u8]) {
        Update::update(&mut self.state, data);
    }

    fn finish(self: Box<Self>) -> Vec<u8> {
        let Xof { state, len } = *self;
        state.finalize_boxed(len).into_vec()
    }

    fn clone_state(&self) -> Box<dyn HashState> {
        Box::new(self.clone())
    }
}

/// An in-progress or finalized digest computation.
pub struct Hasher {
    algorithm: HashAlgorithm,
    digest_size: usize,
    state: Option<Box<dyn HashState>>,
    digest: Option<Vec<u8>>,
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            digest_size: algorithm.digest_size(),
            state: Some(algorithm.default_state()),
            digest: None,
        }
    }

    /// Start a hasher producing `digest_size` bytes.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] if `algorithm` cannot produce that length
    pub fn with_digest_size(algorithm: HashAlgorithm, digest_size: usize) -> Result<Self> {
        Ok(Self {
            algorithm,
            digest_size,
            state: Some(algorithm.sized_state(digest_size)?),
            digest: None,
        })
    }

    /// Start a hasher by algorithm name.
    ///
    /// # Errors
    /// - [`Error::UnsupportedAlgorithm`] for unknown names
    pub fn by_name(name: &str) -> Result<Self> {
        Ok(Self::new(name.parse()?))
    }

    /// Feed more data.
    ///
    /// # Errors
    /// - [`Error::ProtocolViolation`] once the digest has been taken
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        match self.state.as_mut() {
            Some(state) => {
                state.absorb(data);
                Ok(())
            }
            None => Err(Error::protocol("hasher already finalized")),
        }
    }

    /// Finalize and return the digest. Repeated calls return the same bytes.
    pub fn digest(&mut self) -> Vec<u8> {
        if let Some(state) = self.state.take() {
            self.digest = Some(state.finish());
        }
        self.digest.clone().unwrap_or_default()
    }

    /// Finalize and return the digest as lowercase hex.
    pub fn hexdigest(&mut self) -> String {
        hex::encode(self.digest())
    }

    /// Independent copy of the current state.
    ///
    /// # Errors
    /// - [`Error::ProtocolViolation`] once the digest has been taken
    pub fn copy(&self) -> Result<Self> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| Error::protocol("cannot copy a finalized hasher"))?;
        Ok(Self {
            algorithm: self.algorithm,
            digest_size: self.digest_size,
            state: Some(state.clone_state()),
            digest: None,
        })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn name(&self) -> &'static str {
        self.algorithm.name()
    }

    /// Length of the digest this hasher produces.
    pub fn digest_size(&self) -> usize {
        self.digest_size
    }

    pub fn block_size(&self) -> usize {
        self.algorithm.block_size()
    }

    /// Object identifier, when one is assigned for this digest size.
    ///
    /// BLAKE2 identifiers name one output length each, so a resized BLAKE2
    /// hasher has none. SHAKE identifiers cover every length.
    pub fn oid(&self) -> Option<&'static str> {
        match self.algorithm {
            HashAlgorithm::Blake2b512 | HashAlgorithm::Blake2s256
                if self.digest_size != self.algorithm.digest_size() =>
            {
                None
            }
            algorithm => Some(algorithm.oid()),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.state.is_none()
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hasher")
            .field("algorithm", &self.algorithm)
            .field("digest_size", &self.digest_size)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}

/// One-shot digest of `data`.
pub fn hash(algorithm: HashAlgorithm, data: &[u8]) -> Vec<u8> {
    let mut state = algorithm.default_state();
    state.absorb(data);
    state.finish()
}

/// One-shot digest of `data` with a selected output length.
///
/// # Errors
/// - [`Error::InvalidInput`] if `algorithm` cannot produce `digest_size`
///   bytes
pub fn hash_sized(algorithm: HashAlgorithm, data: &[u8], digest_size: usize) -> Result<Vec<u8>> {
    let mut state = algorithm.sized_state(digest_size)?;
    state.absorb(data);
    Ok(state.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_answers() {
        assert_eq!(
            hex::encode(hash(HashAlgorithm::Sha256, b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            hex::encode(hash(HashAlgorithm::Sha256, b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hex::encode(hash(HashAlgorithm::Sha3_256, b"abc")),
            "3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532"
        );
        assert_eq!(
            hex::encode(hash(HashAlgorithm::Blake2b512, b"abc")),
            "ba80a53f981c4d0d6a2797b69f12f6e94c212f14685ac4b74b12bb6fdbffa2d1\
             7d87c5392aab792dc252d5de4533cc9518d38aa8dbf1925ab92386edd4009923"
        );
    }

    #[test]
    fn test_digest_sizes_match_table() {
        for algorithm in HashAlgorithm::all() {
            let digest = hash(algorithm, b"size check");
            assert_eq!(digest.len(), algorithm.digest_size(), "{}", algorithm);
        }
    }

    #[test]
    fn test_incremental_equals_one_shot() {
        let mut hasher = Hasher::new(HashAlgorithm::Sha512);
        hasher.update(b"hello ").unwrap();
        hasher.update(b"world").unwrap();
        assert_eq!(hasher.digest(), hash(HashAlgorithm::Sha512, b"hello world"));
    }

    #[test]
    fn test_digest_is_idempotent_and_final() {
        let mut hasher = Hasher::new(HashAlgorithm::Sha3_512);
        hasher.update(b"data").unwrap();
        let first = hasher.hexdigest();
        assert_eq!(hasher.hexdigest(), first);
        assert!(hasher.is_finalized());

        assert!(matches!(
            hasher.update(b"more"),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(hasher.copy(), Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn test_copy_is_independent() {
        let mut original = Hasher::new(HashAlgorithm::Blake2s256);
        original.update(b"shared prefix ").unwrap();

        let mut copy = original.copy().unwrap();
        copy.update(b"branch").unwrap();
        original.update(b"branch").unwrap();
        assert_eq!(copy.digest(), original.digest());

        let mut diverged = Hasher::new(HashAlgorithm::Blake2s256);
        diverged.update(b"shared prefix ").unwrap();
        let mut other = diverged.copy().unwrap();
        other.update(b"x").unwrap();
        assert_ne!(other.digest(), diverged.digest());
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(Hasher::by_name("SHA-256").unwrap().name(), "sha256");
        assert_eq!(
            "sha512/256".parse::<HashAlgorithm>().unwrap(),
            HashAlgorithm::Sha512_256
        );
        assert_eq!(
            "sha3-384".parse::<HashAlgorithm>().unwrap(),
            HashAlgorithm::Sha3_384
        );
        assert_eq!(
            "BLAKE2b".parse::<HashAlgorithm>().unwrap(),
            HashAlgorithm::Blake2b512
        );
        assert_eq!(
            "shake-256".parse::<HashAlgorithm>().unwrap(),
            HashAlgorithm::Shake256
        );
        assert!(matches!(
            Hasher::by_name("md5"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_metadata() {
        let hasher = Hasher::new(HashAlgorithm::Sha256);
        assert_eq!(hasher.digest_size(), 32);
        assert_eq!(hasher.block_size(), 64);
        assert_eq!(hasher.oid(), Some("2.16.840.1.101.3.4.2.1"));
        assert_eq!(
            Hasher::new(HashAlgorithm::Shake256).oid(),
            Some("2.16.840.1.101.3.4.2.12")
        );
        for (index, (algorithm, _)) in HASHES.iter().enumerate() {
            assert_eq!(*algorithm as usize, index);
        }
    }

    #[test]
    fn test_shake_known_answers() {
        assert_eq!(
            hex::encode(hash(HashAlgorithm::Shake128, b"")),
            "7f9c2ba4e88f827d616045507605853ed73b8093f6efbc88eb1a6eacfa66ef26"
        );
        assert_eq!(
            hex::encode(hash(HashAlgorithm::Shake256, b"")),
            "46b9dd2b0ba88d13233b3feb743eeb243fcd52ea62b81b82b50c27646ed5762f\
             d75dc4ddd8c0f200cb05019d67b592f6fc821c49479ab48640292eacb3b7c4be"
        );
    }

    #[test]
    fn test_shake_output_extends() {
        let short = hash_sized(HashAlgorithm::Shake128, b"xof", 16).unwrap();
        let long = hash_sized(HashAlgorithm::Shake128, b"xof", 200).unwrap();
        assert_eq!(long.len(), 200);
        assert_eq!(&long[..16], &short[..]);

        let mut hasher = Hasher::with_digest_size(HashAlgorithm::Shake256, 100).unwrap();
        hasher.update(b"x").unwrap();
        let mut copy = hasher.copy().unwrap();
        assert_eq!(copy.digest_size(), 100);
        assert_eq!(hasher.digest(), copy.digest());
    }

    #[test]
    fn test_blake2_variable_size() {
        let full = hash_sized(HashAlgorithm::Blake2b512, b"abc", 64).unwrap();
        assert_eq!(full, hash(HashAlgorithm::Blake2b512, b"abc"));

        // The output length is a BLAKE2 parameter, not a truncation.
        let short = hash_sized(HashAlgorithm::Blake2b512, b"abc", 32).unwrap();
        assert_eq!(short.len(), 32);
        assert_ne!(&short[..], &full[..32]);

        let mut hasher = Hasher::with_digest_size(HashAlgorithm::Blake2s256, 16).unwrap();
        hasher.update(b"abc").unwrap();
        assert_eq!(hasher.digest().len(), 16);
        assert_eq!(hasher.oid(), None);
        assert_eq!(
            Hasher::new(HashAlgorithm::Blake2s256).oid(),
            Some("1.3.6.1.4.1.1722.12.2.2.8")
        );
    }

    #[test]
    fn test_digest_size_bounds() {
        assert!(matches!(
            Hasher::with_digest_size(HashAlgorithm::Sha256, 16),
            Err(Error::InvalidInput(_))
        ));
        assert!(Hasher::with_digest_size(HashAlgorithm::Sha256, 32).is_ok());
        assert!(matches!(
            Hasher::with_digest_size(HashAlgorithm::Blake2b512, 65),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Hasher::with_digest_size(HashAlgorithm::Shake128, 0),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            hash_sized(HashAlgorithm::Shake256, b"", MAX_XOF_SIZE + 1),
            Err(Error::InvalidInput(_))
        ));
        assert!(!HashAlgorithm::Sha3_256.is_variable());
        assert!(HashAlgorithm::Shake128.is_variable());
    }
}
