//! One-shot AEAD constructions.
//!
//! Wraps the RustCrypto `AeadInPlace` implementations. Associated data and
//! message bytes are buffered until finalization, when the whole message is
//! sealed or opened in place. `update` therefore always returns nothing and
//! all output arrives from `finalize_*`.
//!
//! The buffer is capped: once associated data and message together would
//! exceed the provider's limit, further input fails with
//! [`Error::InvalidInput`].

use aes::Aes256;
use aes_gcm::aead::generic_array::typenum::{Unsigned, U11, U16};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use aes_siv::Aes256SivAead;
use ccm::Ccm;
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use eax::Eax;
use ocb3::Ocb3;
use zeroize::Zeroizing;

use flintlock_common::{Error, Result};

use crate::algorithm::{Algorithm, AlgorithmSpec};
use crate::provider::{AeadProvider, Direction, Progress, Sealed, Verified};

type Aes256Ccm = Ccm<Aes256, U16, U11>;
type Aes256Eax = Eax<Aes256>;
type Aes256Ocb = Ocb3<Aes256>;

/// Default cap on bytes buffered by one provider (64 MiB).
pub const DEFAULT_DETACHED_LIMIT: usize = 64 * 1024 * 1024;

/// Start a one-shot provider for `spec` buffering at most `limit` bytes.
///
/// # Errors
/// - [`Error::UnsupportedAlgorithm`] for algorithms with no one-shot form
pub fn begin(
    spec: &AlgorithmSpec,
    key: &[u8],
    nonce: &[u8],
    direction: Direction,
    limit: usize,
) -> Result<Box<dyn AeadProvider>> {
    let start = Start {
        key,
        nonce,
        direction,
        limit,
    };
    match spec.algorithm {
        Algorithm::Aes128Gcm => Detached::<Aes128Gcm>::boxed(start),
        Algorithm::Aes256Gcm => Detached::<Aes256Gcm>::boxed(start),
        Algorithm::ChaCha20Poly1305 => Detached::<ChaCha20Poly1305>::boxed(start),
        Algorithm::XChaCha20Poly1305 => Detached::<XChaCha20Poly1305>::boxed(start),
        Algorithm::Aes256Ccm => Detached::<Aes256Ccm>::boxed(start),
        Algorithm::Aes256Eax => Detached::<Aes256Eax>::boxed(start),
        Algorithm::Aes256Ocb => Detached::<Aes256Ocb>::boxed(start),
        Algorithm::Aes256Siv => Detached::<Aes256SivAead>::boxed(start),
        Algorithm::Aes256CtrHmacSha256
        | Algorithm::Aes256CfbHmacSha256
        | Algorithm::Aes256OfbHmacSha256 => Err(Error::UnsupportedAlgorithm(format!(
            "{} has no one-shot construction",
            spec.name
        ))),
    }
}

struct Start<'a> {
    key: &'a [u8],
    nonce: &'a [u8],
    direction: Direction,
    limit: usize,
}

/// Buffers a whole message for an `AeadInPlace` cipher.
struct Detached<A> {
    cipher: A,
    nonce: Vec<u8>,
    aad: Vec<u8>,
    buffer: Zeroizing<Vec<u8>>,
    limit: usize,
    direction: Direction,
    progress: Progress,
}

impl<A> Detached<A>
where
    A: AeadInPlace + KeyInit + Send + 'static,
{
    fn boxed(start: Start<'_>) -> Result<Box<dyn AeadProvider>> {
        let Start {
            key,
            nonce,
            direction,
            limit,
        } = start;
        if nonce.len() != A::NonceSize::USIZE {
            return Err(Error::Crypto(format!(
                "invalid nonce length: expected {}, got {}",
                A::NonceSize::USIZE,
                nonce.len()
            )));
        }
        let cipher = A::new_from_slice(key)
            .map_err(|_| Error::Crypto("invalid key length".to_string()))?;

        Ok(Box::new(Self {
            cipher,
            nonce: nonce.to_vec(),
            aad: Vec::new(),
            buffer: Zeroizing::new(Vec::new()),
            limit,
            direction,
            progress: Progress::Aad,
        }))
    }

    /// Reject `incoming` more bytes if the buffers would outgrow the limit.
    fn reserve(&self, incoming: usize) -> Result<()> {
        let held = self.aad.len() + self.buffer.len();
        if incoming > self.limit.saturating_sub(held) {
            return Err(Error::InvalidInput(format!(
                "one-shot provider buffer limit of {} bytes exceeded",
                self.limit
            )));
        }
        Ok(())
    }

    fn take_buffer(&mut self) -> Zeroizing<Vec<u8>> {
        std::mem::replace(&mut self.buffer, Zeroizing::new(Vec::new()))
    }
}

impl<A> AeadProvider for Detached<A>
where
    A: AeadInPlace + KeyInit + Send + 'static,
{
    fn update_aad(&mut self, aad: &[u8]) -> Result<()> {
        self.progress.before_aad()?;
        self.reserve(aad.len())?;
        self.aad.extend_from_slice(aad);
        Ok(())
    }

    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.progress.before_data()?;
        self.progress = Progress::Data;
        self.reserve(data.len())?;
        self.buffer.extend_from_slice(data);
        Ok(Vec::new())
    }

    fn finalize_encrypt(&mut self) -> Result<Sealed> {
        self.progress
            .before_finalize(Direction::Encrypt, self.direction)?;
        self.progress = Progress::Finished;

        let mut buffer = self.take_buffer();
        let tag = self
            .cipher
            .encrypt_in_place_detached(
                GenericArray::from_slice(&self.nonce),
                &self.aad,
                buffer.as_mut_slice(),
            )
            .map_err(|e| Error::Crypto(format!("Encryption failed: {}", e)))?;

        Ok(Sealed {
            output: std::mem::take(&mut *buffer),
            tag: tag.to_vec(),
        })
    }

    fn finalize_decrypt(&mut self, expected_tag: &[u8]) -> Result<Verified> {
        self.progress
            .before_finalize(Direction::Decrypt, self.direction)?;
        self.progress = Progress::Finished;

        let mut buffer = self.take_buffer();
        if expected_tag.len() != <A as AeadCore>::TagSize::USIZE {
            return Ok(Verified::Rejected);
        }

        match self.cipher.decrypt_in_place_detached(
            GenericArray::from_slice(&self.nonce),
            &self.aad,
            buffer.as_mut_slice(),
            GenericArray::from_slice(expected_tag),
        ) {
            Ok(()) => Ok(Verified::Authentic(std::mem::take(&mut *buffer))),
            Err(_) => Ok(Verified::Rejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> impl Iterator<Item = Algorithm> {
        Algorithm::all().filter(|a| a.spec().detached)
    }

    fn seal(algorithm: Algorithm, aad: &[u8], plaintext: &[u8]) -> (Vec<u8>, Sealed) {
        let spec = algorithm.spec();
        let key = vec![0x42u8; spec.key_len];
        let nonce = vec![0x24u8; spec.nonce_len];
        let mut provider =
            begin(spec, &key, &nonce, Direction::Encrypt, DEFAULT_DETACHED_LIMIT).unwrap();
        provider.update_aad(aad).unwrap();
        let early = provider.update(plaintext).unwrap();
        (early, provider.finalize_encrypt().unwrap())
    }

    fn open(algorithm: Algorithm, aad: &[u8], ciphertext: &[u8], tag: &[u8]) -> Verified {
        let spec = algorithm.spec();
        let key = vec![0x42u8; spec.key_len];
        let nonce = vec![0x24u8; spec.nonce_len];
        let mut provider =
            begin(spec, &key, &nonce, Direction::Decrypt, DEFAULT_DETACHED_LIMIT).unwrap();
        provider.update_aad(aad).unwrap();
        assert!(provider.update(ciphertext).unwrap().is_empty());
        provider.finalize_decrypt(tag).unwrap()
    }

    #[test]
    fn test_output_deferred_to_finalize() {
        for algorithm in detached() {
            let (early, sealed) = seal(algorithm, b"aad", b"deferred until the end");
            assert!(early.is_empty(), "{}", algorithm);
            assert_eq!(sealed.output.len(), 22);
            assert_eq!(sealed.tag.len(), algorithm.spec().tag_len);
        }
    }

    #[test]
    fn test_roundtrip() {
        for algorithm in detached() {
            let (_, sealed) = seal(algorithm, b"context", b"the quick brown fox");
            assert_eq!(
                open(algorithm, b"context", &sealed.output, &sealed.tag),
                Verified::Authentic(b"the quick brown fox".to_vec()),
                "{}",
                algorithm
            );
        }
    }

    #[test]
    fn test_tampering_rejected() {
        for algorithm in detached() {
            let (_, sealed) = seal(algorithm, b"context", b"the quick brown fox");

            let mut ciphertext = sealed.output.clone();
            ciphertext[0] ^= 1;
            assert_eq!(
                open(algorithm, b"context", &ciphertext, &sealed.tag),
                Verified::Rejected
            );

            assert_eq!(
                open(algorithm, b"other", &sealed.output, &sealed.tag),
                Verified::Rejected
            );

            assert_eq!(
                open(algorithm, b"context", &sealed.output, &sealed.tag[..15]),
                Verified::Rejected
            );
        }
    }

    #[test]
    fn test_empty_message() {
        for algorithm in detached() {
            let (_, sealed) = seal(algorithm, b"", b"");
            assert!(sealed.output.is_empty());
            assert_eq!(
                open(algorithm, b"", &[], &sealed.tag),
                Verified::Authentic(Vec::new())
            );
        }
    }

    #[test]
    fn test_protocol_is_enforced() {
        let spec = Algorithm::Aes256Eax.spec();
        let mut provider =
            begin(spec, &[0u8; 32], &[0u8; 16], Direction::Decrypt, 1024).unwrap();
        provider.update(b"abc").unwrap();
        assert!(matches!(
            provider.update_aad(b"late"),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            provider.finalize_encrypt(),
            Err(Error::ProtocolViolation(_))
        ));
        provider.finalize_decrypt(&[0u8; 16]).unwrap();
        assert!(matches!(
            provider.update(b"abc"),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_mac_then_encrypt_modes_unsupported() {
        for algorithm in [
            Algorithm::Aes256CtrHmacSha256,
            Algorithm::Aes256CfbHmacSha256,
            Algorithm::Aes256OfbHmacSha256,
        ] {
            assert!(matches!(
                begin(algorithm.spec(), &[0u8; 32], &[0u8; 16], Direction::Encrypt, 1024),
                Err(Error::UnsupportedAlgorithm(_))
            ));
        }
    }

    #[test]
    fn test_buffer_limit() {
        let spec = Algorithm::Aes256Siv.spec();
        let mut provider = begin(spec, &[1u8; 64], &[2u8; 16], Direction::Encrypt, 100).unwrap();
        provider.update_aad(&[0u8; 40]).unwrap();
        provider.update(&[0u8; 60]).unwrap();
        assert!(matches!(
            provider.update(&[0u8; 1]),
            Err(Error::InvalidInput(_))
        ));

        let spec = Algorithm::Aes256Ccm.spec();
        let mut provider = begin(spec, &[1u8; 32], &[2u8; 11], Direction::Decrypt, 16).unwrap();
        assert!(matches!(
            provider.update_aad(&[0u8; 17]),
            Err(Error::InvalidInput(_))
        ));
    }
}
