//! Lock and unlock byte streams.
//!
//! A locked stream is `header || ciphertext || tag`. The cipher authenticates
//! the caller's associated data followed by the encoded header, so neither can
//! be altered without failing the tag check.
//!
//! Unlocking never releases unauthenticated plaintext: everything is staged
//! and copied to the destination only once the tag has verified.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, info};

use flintlock_common::{Error, Result};
use flintlock_crypto::{
    derive_key, AlgorithmSpec, ChunkedDriver, CipherSession, Direction, KeyMaterial, Nonce, Salt,
    SessionKey,
};

use crate::config::LockerConfig;
use crate::header::{Header, KeySource};
use crate::staging::StagingBuffer;

/// Caller associated data, bound to the stream but not stored in it.
#[derive(Default)]
pub enum AssociatedData<'a> {
    /// No associated data.
    #[default]
    None,
    /// Data held in memory.
    Bytes(&'a [u8]),
    /// Data read to completion before the body is processed.
    Stream(&'a mut dyn Read),
}

impl<'a> From<&'a [u8]> for AssociatedData<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for AssociatedData<'a> {
    fn from(bytes: &'a [u8; N]) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a Vec<u8>> for AssociatedData<'a> {
    fn from(bytes: &'a Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl<'a> From<&'a str> for AssociatedData<'a> {
    fn from(text: &'a str) -> Self {
        Self::Bytes(text.as_bytes())
    }
}

impl std::fmt::Debug for AssociatedData<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Locks and unlocks streams with one configuration.
#[derive(Debug, Clone, Default)]
pub struct Locker {
    config: LockerConfig,
}

impl Locker {
    /// Create a locker.
    ///
    /// # Errors
    /// - Any error from [`LockerConfig::validate`]
    pub fn new(config: LockerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LockerConfig {
        &self.config
    }

    /// Encrypt `source` into `destination`.
    ///
    /// # Postconditions
    /// - `destination` holds header, ciphertext and tag, and is flushed
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] for a wrong raw key length, an empty
    ///   passphrase or associated data over 4 GiB
    /// - [`Error::KeyDerivation`] if the configured KDF is rejected
    /// - [`Error::Io`] on read or write failure; `destination` may then hold
    ///   a partial stream that must be discarded
    ///
    /// Returns the number of plaintext bytes locked.
    pub fn lock<R: Read, W: Write>(
        &self,
        source: R,
        mut destination: W,
        key: &KeyMaterial,
        associated_data: AssociatedData<'_>,
    ) -> Result<u64> {
        let spec = self.config.algorithm.spec();
        let driver = ChunkedDriver::new(self.config.chunk_size_for(spec))?;
        let (session_key, key_source, salt) = self.lock_key(spec, key)?;
        let nonce = Nonce::generate(spec);

        let mut session = CipherSession::begin_bounded(
            spec,
            self.config.backend,
            session_key,
            &nonce,
            Direction::Encrypt,
            self.config.detached_limit,
        )?;
        let aad_len = feed_associated_data(&driver, &mut session, associated_data)?;

        let header = Header {
            algorithm: self.config.algorithm,
            key_source,
            salt,
            nonce,
            aad_len,
        };
        let header_bytes = header.encode();
        session.authenticate(&header_bytes)?;
        if let Err(e) = destination.write_all(&header_bytes) {
            session.abort();
            return Err(e.into());
        }

        let locked = driver.encrypt(&mut session, source, destination)?;
        info!(
            algorithm = spec.name,
            backend = %session.backend(),
            bytes = locked,
            "Stream locked"
        );
        Ok(locked)
    }

    /// Decrypt `source` into `destination`.
    ///
    /// `destination` receives nothing unless the whole stream authenticates.
    ///
    /// # Errors
    /// - [`Error::Authentication`] for a wrong key, wrong associated data,
    ///   or any tampering or truncation
    /// - [`Error::MalformedHeader`] / [`Error::UnsupportedAlgorithm`] for an
    ///   unreadable header
    /// - [`Error::KeyDerivation`] if the header's KDF cost exceeds the
    ///   configured limits
    /// - [`Error::InvalidInput`] when a passphrase is given for a raw-key
    ///   stream
    /// - [`Error::Io`] on read or write failure
    ///
    /// Returns the number of plaintext bytes released.
    pub fn unlock<R: Read, W: Write>(
        &self,
        source: R,
        destination: W,
        key: &KeyMaterial,
        associated_data: AssociatedData<'_>,
    ) -> Result<u64> {
        self.unlock_with(source, key, associated_data, move || Ok(destination))
    }

    /// Lock an in-memory buffer.
    pub fn lock_bytes(
        &self,
        plaintext: &[u8],
        key: &KeyMaterial,
        associated_data: AssociatedData<'_>,
    ) -> Result<Vec<u8>> {
        let mut locked = Vec::new();
        self.lock(plaintext, &mut locked, key, associated_data)?;
        Ok(locked)
    }

    /// Unlock an in-memory buffer.
    pub fn unlock_bytes(
        &self,
        locked: &[u8],
        key: &KeyMaterial,
        associated_data: AssociatedData<'_>,
    ) -> Result<Vec<u8>> {
        let mut plaintext = Vec::new();
        self.unlock(locked, &mut plaintext, key, associated_data)?;
        Ok(plaintext)
    }

    /// Lock the file at `input` into a new file at `output`.
    ///
    /// A partially written `output` is removed on failure.
    pub fn lock_file(
        &self,
        input: &Path,
        output: &Path,
        key: &KeyMaterial,
        associated_data: AssociatedData<'_>,
    ) -> Result<u64> {
        let source = BufReader::new(File::open(input)?);
        let destination = BufWriter::new(File::create(output)?);

        debug!(input = %input.display(), output = %output.display(), "Locking file");
        let result = self.lock(source, destination, key, associated_data);
        if result.is_err() {
            let _ = fs::remove_file(output);
        }
        result
    }

    /// Unlock the file at `input` into `output`.
    ///
    /// `output` is created only after the stream has authenticated.
    pub fn unlock_file(
        &self,
        input: &Path,
        output: &Path,
        key: &KeyMaterial,
        associated_data: AssociatedData<'_>,
    ) -> Result<u64> {
        let source = BufReader::new(File::open(input)?);

        debug!(input = %input.display(), output = %output.display(), "Unlocking file");
        self.unlock_with(source, key, associated_data, || {
            Ok(BufWriter::new(File::create(output)?))
        })
    }

    /// Unlock into a destination opened only after authentication.
    fn unlock_with<R, W, F>(
        &self,
        mut source: R,
        key: &KeyMaterial,
        associated_data: AssociatedData<'_>,
        open_destination: F,
    ) -> Result<u64>
    where
        R: Read,
        W: Write,
        F: FnOnce() -> Result<W>,
    {
        let (header, header_bytes) = Header::read_from(&mut source)?;
        let spec = header.spec();
        let driver = ChunkedDriver::new(self.config.chunk_size_for(spec))?;
        let session_key = self.unlock_key(spec, &header, key)?;

        let mut session = CipherSession::begin_bounded(
            spec,
            self.config.backend,
            session_key,
            &header.nonce,
            Direction::Decrypt,
            self.config.detached_limit,
        )?;
        feed_associated_data(&driver, &mut session, associated_data)?;
        session.authenticate(&header_bytes)?;

        let mut staging = StagingBuffer::new(&self.config.staging);
        let unlocked = driver.decrypt(&mut session, source, &mut staging)?;

        let released = staging.commit(open_destination()?)?;
        info!(
            algorithm = spec.name,
            backend = %session.backend(),
            bytes = released,
            "Stream unlocked"
        );
        debug_assert_eq!(unlocked, released);
        Ok(released)
    }

    fn lock_key(
        &self,
        spec: &AlgorithmSpec,
        key: &KeyMaterial,
    ) -> Result<(SessionKey, KeySource, Salt)> {
        match key {
            KeyMaterial::Raw(raw) => {
                raw.check_len(spec)?;
                Ok((raw.clone(), KeySource::Raw, Salt::zero()))
            }
            KeyMaterial::Passphrase(passphrase) => {
                let params = self.config.kdf;
                self.config.kdf_limits.check(&params)?;
                let salt = Salt::generate();
                debug!(kdf = params.name(), "Deriving key");
                let derived = derive_key(passphrase, &salt, &params, spec.key_len)?;
                Ok((derived, KeySource::Derived(params), salt))
            }
        }
    }

    fn unlock_key(
        &self,
        spec: &AlgorithmSpec,
        header: &Header,
        key: &KeyMaterial,
    ) -> Result<SessionKey> {
        match (key, &header.key_source) {
            (KeyMaterial::Raw(raw), _) => {
                raw.check_len(spec)?;
                Ok(raw.clone())
            }
            (KeyMaterial::Passphrase(_), KeySource::Raw) => Err(Error::InvalidInput(
                "stream was locked with a raw key; a passphrase cannot unlock it".to_string(),
            )),
            (KeyMaterial::Passphrase(passphrase), KeySource::Derived(params)) => {
                self.config.kdf_limits.check(params)?;
                debug!(kdf = params.name(), "Deriving key");
                derive_key(passphrase, &header.salt, params, spec.key_len)
            }
        }
    }
}

/// Feed caller associated data into `session`, returning its length.
fn feed_associated_data(
    driver: &ChunkedDriver,
    session: &mut CipherSession,
    associated_data: AssociatedData<'_>,
) -> Result<u32> {
    let len = match associated_data {
        AssociatedData::None => 0,
        AssociatedData::Bytes(bytes) => {
            if bytes.len() > u32::MAX as usize {
                session.abort();
                return Err(oversized_aad());
            }
            if !bytes.is_empty() {
                session.authenticate(bytes)?;
            }
            bytes.len() as u64
        }
        AssociatedData::Stream(reader) => driver.authenticate(session, reader)?,
    };
    u32::try_from(len).map_err(|_| {
        session.abort();
        oversized_aad()
    })
}

fn oversized_aad() -> Error {
    Error::InvalidInput("associated data longer than 4 GiB".to_string())
}
