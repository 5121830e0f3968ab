//! Chunked encryption and decryption of byte streams.
//!
//! The driver pulls fixed-size blocks from a reader and pushes them through a
//! [`CipherSession`]. A block shorter than `chunk_size` (including an empty
//! one) marks the end of input. Short reads are coalesced first, so a slow
//! source never ends a stream early.
//!
//! When decrypting, the last `tag_len` bytes of input are the tag. The driver
//! holds back exactly that many bytes and only releases bytes to the session
//! once they can no longer be part of the tag.
//!
//! Any I/O error, `Interrupted` included, aborts the session. There are no
//! retries.

use std::io::{self, Read, Write};

use tracing::{debug, warn};
use zeroize::Zeroizing;

use flintlock_common::{Error, Result};

use crate::algorithm::AlgorithmSpec;
use crate::session::CipherSession;

/// Largest accepted read block size (64 MiB).
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

/// Drives a [`CipherSession`] over a reader and a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedDriver {
    chunk_size: usize,
}

impl ChunkedDriver {
    /// Create a driver reading `chunk_size` bytes at a time.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] if `chunk_size` is zero or above
    ///   [`MAX_CHUNK_SIZE`]
    pub fn new(chunk_size: usize) -> Result<Self> {
        check_chunk_size(chunk_size)?;
        Ok(Self { chunk_size })
    }

    /// Driver using the algorithm's tuned block size.
    pub fn for_spec(spec: &AlgorithmSpec) -> Self {
        Self {
            chunk_size: spec.default_chunk_size,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Drain `aad` to completion into the session's associated data.
    ///
    /// Returns the number of associated data bytes fed.
    pub fn authenticate<R: Read>(&self, session: &mut CipherSession, mut aad: R) -> Result<u64> {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut total = 0u64;

        let result = (|| -> Result<u64> {
            loop {
                let n = read_block(&mut aad, &mut buffer)?;
                if n > 0 {
                    session.authenticate(&buffer[..n])?;
                    total += n as u64;
                }
                if n < buffer.len() {
                    return Ok(total);
                }
            }
        })();
        abort_on_error(session, result)
    }

    /// Encrypt `source` into `destination`, writing the tag last.
    ///
    /// # Postconditions
    /// - The session is closed
    /// - `destination` holds the ciphertext followed by the tag, and is flushed
    ///
    /// Returns the number of plaintext bytes consumed.
    pub fn encrypt<R: Read, W: Write>(
        &self,
        session: &mut CipherSession,
        mut source: R,
        mut destination: W,
    ) -> Result<u64> {
        let mut buffer = Zeroizing::new(vec![0u8; self.chunk_size]);
        let mut total = 0u64;

        let result = (|| -> Result<u64> {
            loop {
                let n = read_block(&mut source, &mut buffer)?;
                if n > 0 {
                    let ciphertext = session.update(&buffer[..n])?;
                    destination.write_all(&ciphertext)?;
                    total += n as u64;
                }
                if n < buffer.len() {
                    break;
                }
            }

            let sealed = session.finalize_encrypt()?;
            destination.write_all(&sealed.output)?;
            destination.write_all(&sealed.tag)?;
            destination.flush()?;
            Ok(total)
        })();
        let total = abort_on_error(session, result)?;

        debug!(
            algorithm = session.spec().name,
            chunk_size = self.chunk_size,
            bytes = total,
            "Stream encrypted"
        );
        Ok(total)
    }

    /// Decrypt `source` (ciphertext followed by tag) into `destination`.
    ///
    /// Plaintext is written to `destination` as soon as it is produced, before
    /// the tag has been checked. Callers that must not release
    /// unauthenticated data pass a staging writer and commit it only after
    /// this returns `Ok`.
    ///
    /// # Errors
    /// - [`Error::Authentication`] if the tag does not verify, or the input
    ///   is shorter than a tag
    /// - [`Error::Io`] on read or write failure
    ///
    /// Returns the number of plaintext bytes produced.
    pub fn decrypt<R: Read, W: Write>(
        &self,
        session: &mut CipherSession,
        mut source: R,
        mut destination: W,
    ) -> Result<u64> {
        let tag_len = session.spec().tag_len;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut lookback: Vec<u8> = Vec::with_capacity(tag_len);
        let mut total = 0u64;

        let result = (|| -> Result<u64> {
            loop {
                let n = read_block(&mut source, &mut buffer)?;

                let mut pending = std::mem::take(&mut lookback);
                pending.extend_from_slice(&buffer[..n]);
                if pending.len() > tag_len {
                    lookback = pending.split_off(pending.len() - tag_len);
                    let plaintext = Zeroizing::new(session.update(&pending)?);
                    destination.write_all(&plaintext)?;
                    total += plaintext.len() as u64;
                } else {
                    lookback = pending;
                }

                if n < buffer.len() {
                    break;
                }
            }

            if lookback.len() < tag_len {
                warn!(
                    algorithm = session.spec().name,
                    "Input shorter than an authentication tag"
                );
                session.abort();
                return Err(Error::Authentication);
            }

            let rest = Zeroizing::new(session.finalize_decrypt(&lookback)?);
            destination.write_all(&rest)?;
            destination.flush()?;
            Ok(total + rest.len() as u64)
        })();
        let total = abort_on_error(session, result)?;

        debug!(
            algorithm = session.spec().name,
            chunk_size = self.chunk_size,
            bytes = total,
            "Stream decrypted"
        );
        Ok(total)
    }
}

/// Check a configured block size before anything is allocated for it.
///
/// # Errors
/// - [`Error::InvalidInput`] if `chunk_size` is zero or above
///   [`MAX_CHUNK_SIZE`]
pub fn check_chunk_size(chunk_size: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(Error::InvalidInput("chunk size must be positive".to_string()));
    }
    if chunk_size > MAX_CHUNK_SIZE {
        return Err(Error::InvalidInput(format!(
            "chunk size {} exceeds maximum of {}",
            chunk_size, MAX_CHUNK_SIZE
        )));
    }
    Ok(())
}

/// Fill `buffer` from `reader`, stopping early only at end of input.
fn read_block<R: Read>(reader: &mut R, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn abort_on_error<T>(session: &mut CipherSession, result: Result<T>) -> Result<T> {
    if result.is_err() {
        session.abort();
    }
    result
}
