//! RSA keys with OAEP encryption and PSS signatures.

use std::fmt;

use ::rsa::pkcs1::{
    DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey, EncodeRsaPublicKey,
};
use ::rsa::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use ::rsa::traits::PublicKeyParts;
use ::rsa::{BigUint, Oaep, Pss, RsaPrivateKey, RsaPublicKey};
use rand::rngs::OsRng;
use tracing::debug;
use zeroize::Zeroizing;

use flintlock_common::{Error, Result};

use super::{
    encoding_failed, malformed, pem_bytes, unarmor, unarmor_private, Encoding, PrivateFormat,
    PublicFormat, Unarmored,
};
use crate::hash::{self, HashAlgorithm};

/// Public exponent used by [`PrivateKey::generate`].
pub const DEFAULT_EXPONENT: u64 = 65537;

/// Smallest modulus accepted for new keys.
pub const MIN_MODULUS_BITS: usize = 1024;

/// Largest modulus accepted for new keys.
pub const MAX_MODULUS_BITS: usize = 4096;

/// OAEP parameters. Defaults to SHA-256 for both the label hash and MGF1,
/// with no label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OaepPadding {
    pub hash: HashAlgorithm,
    pub mgf_hash: HashAlgorithm,
    pub label: Option<String>,
}

impl Default for OaepPadding {
    fn default() -> Self {
        Self {
            hash: HashAlgorithm::Sha256,
            mgf_hash: HashAlgorithm::Sha256,
            label: None,
        }
    }
}

impl OaepPadding {
    fn scheme(&self) -> Result<Oaep> {
        Ok(Oaep {
            digest: self.hash.dyn_digest()?,
            mgf_digest: self.mgf_hash.dyn_digest()?,
            label: self.label.clone(),
        })
    }
}

/// PSS salt length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltLength {
    /// As long as the digest.
    Digest,
    /// As long as the modulus allows.
    Max,
    Exact(usize),
}

/// PSS parameters. MGF1 uses the same hash as the message digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PssPadding {
    pub hash: HashAlgorithm,
    pub salt: SaltLength,
}

impl Default for PssPadding {
    fn default() -> Self {
        Self {
            hash: HashAlgorithm::Sha256,
            salt: SaltLength::Max,
        }
    }
}

impl PssPadding {
    fn scheme(&self, modulus_bits: usize, digest: &[u8]) -> Result<Pss> {
        let digest_len = self.hash.digest_size();
        if digest.len() != digest_len {
            return Err(Error::InvalidInput(format!(
                "expected a {} byte {} digest, got {} bytes",
                digest_len,
                self.hash,
                digest.len()
            )));
        }

        // emLen = ceil((modBits - 1) / 8)
        let encoded_len = (modulus_bits + 6) / 8;
        let max_salt = encoded_len.checked_sub(digest_len + 2).ok_or_else(|| {
            Error::InvalidInput(format!("modulus too small for {}", self.hash))
        })?;
        let salt_len = match self.salt {
            SaltLength::Digest => digest_len,
            SaltLength::Max => max_salt,
            SaltLength::Exact(len) => len,
        };
        if salt_len > max_salt {
            return Err(Error::InvalidInput(format!(
                "salt length {} exceeds {} for this key",
                salt_len, max_salt
            )));
        }

        Ok(Pss {
            blinded: true,
            digest: self.hash.dyn_digest()?,
            salt_len,
        })
    }
}

/// An RSA private key. Wiped on drop.
#[derive(Clone)]
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

impl PrivateKey {
    /// Generate a key with the public exponent 65537.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] if `bits` is outside
    ///   [`MIN_MODULUS_BITS`]..=[`MAX_MODULUS_BITS`]
    pub fn generate(bits: usize) -> Result<Self> {
        Self::generate_with_exponent(bits, DEFAULT_EXPONENT)
    }

    /// # Errors
    /// - [`Error::InvalidInput`] for an out-of-range size or an exponent that
    ///   is even or below 3
    pub fn generate_with_exponent(bits: usize, exponent: u64) -> Result<Self> {
        if !(MIN_MODULUS_BITS..=MAX_MODULUS_BITS).contains(&bits) {
            return Err(Error::InvalidInput(format!(
                "RSA modulus of {} bits outside [{}, {}]",
                bits, MIN_MODULUS_BITS, MAX_MODULUS_BITS
            )));
        }
        if exponent < 3 || exponent % 2 == 0 {
            return Err(Error::InvalidInput(format!(
                "invalid RSA public exponent {}",
                exponent
            )));
        }

        let inner = RsaPrivateKey::new_with_exp(&mut OsRng, bits, &BigUint::from(exponent))
            .map_err(|e| Error::Crypto(format!("RSA key generation failed: {}", e)))?;
        debug!(bits, "Generated RSA key");
        Ok(Self { inner })
    }

    /// Load a PEM or DER private key in PKCS#8 or PKCS#1 layout.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] for an encrypted key without `passphrase`
    /// - [`Error::Authentication`] if `passphrase` does not open the key
    /// - [`Error::Serialization`] for anything that is not an RSA key
    pub fn load(data: &[u8], passphrase: Option<&[u8]>) -> Result<Self> {
        let (format, der) = unarmor_private(data, passphrase, "RSA PRIVATE KEY")?;
        let inner = match format {
            Some(PrivateFormat::Pkcs8) => {
                RsaPrivateKey::from_pkcs8_der(&der).map_err(malformed("PKCS#8 RSA key"))?
            }
            Some(PrivateFormat::Traditional) => {
                RsaPrivateKey::from_pkcs1_der(&der).map_err(malformed("PKCS#1 RSA key"))?
            }
            None => RsaPrivateKey::from_pkcs8_der(&der)
                .or_else(|_| RsaPrivateKey::from_pkcs1_der(&der))
                .map_err(malformed("RSA private key"))?,
        };
        let key = Self { inner };
        debug!(bits = key.bits(), "Loaded RSA private key");
        Ok(key)
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.inner.n().bits()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.to_public_key(),
        }
    }

    /// Undo [`PublicKey::encrypt`].
    ///
    /// # Errors
    /// - [`Error::Authentication`] for a wrong key, label or padding, or a
    ///   damaged ciphertext
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        padding: &OaepPadding,
    ) -> Result<Zeroizing<Vec<u8>>> {
        self.inner
            .decrypt_blinded(&mut OsRng, padding.scheme()?, ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| Error::Authentication)
    }

    /// Sign a digest already computed with `padding.hash`.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] if `digest` has the wrong length or the salt
    ///   does not fit the modulus
    pub fn sign(&self, digest: &[u8], padding: &PssPadding) -> Result<Vec<u8>> {
        let scheme = padding.scheme(self.bits(), digest)?;
        self.inner
            .sign_with_rng(&mut OsRng, scheme, digest)
            .map_err(|e| Error::Crypto(format!("RSA signing failed: {}", e)))
    }

    /// Hash `message` with `padding.hash` and sign the digest.
    pub fn sign_message(&self, message: &[u8], padding: &PssPadding) -> Result<Vec<u8>> {
        self.sign(&hash::hash(padding.hash, message), padding)
    }

    /// # Errors
    /// - [`Error::InvalidInput`] for [`Encoding::Raw`], or a passphrase with
    ///   [`PrivateFormat::Traditional`]
    pub fn serialize(
        &self,
        encoding: Encoding,
        format: PrivateFormat,
        passphrase: Option<&[u8]>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let what = "RSA private key";
        match (format, encoding, passphrase) {
            (_, Encoding::Raw, _) => Err(Error::InvalidInput(
                "RSA private keys have no raw encoding".to_string(),
            )),
            (PrivateFormat::Traditional, _, Some(_)) => Err(Error::InvalidInput(
                "passphrase protection requires PKCS#8".to_string(),
            )),
            (PrivateFormat::Pkcs8, Encoding::Pem, None) => self
                .inner
                .to_pkcs8_pem(LineEnding::LF)
                .map(pem_bytes)
                .map_err(encoding_failed(what)),
            (PrivateFormat::Pkcs8, Encoding::Pem, Some(passphrase)) => self
                .inner
                .to_pkcs8_encrypted_pem(OsRng, passphrase, LineEnding::LF)
                .map(pem_bytes)
                .map_err(encoding_failed(what)),
            (PrivateFormat::Pkcs8, Encoding::Der, None) => self
                .inner
                .to_pkcs8_der()
                .map(|doc| Zeroizing::new(doc.as_bytes().to_vec()))
                .map_err(encoding_failed(what)),
            (PrivateFormat::Pkcs8, Encoding::Der, Some(passphrase)) => self
                .inner
                .to_pkcs8_encrypted_der(OsRng, passphrase)
                .map(|doc| Zeroizing::new(doc.as_bytes().to_vec()))
                .map_err(encoding_failed(what)),
            (PrivateFormat::Traditional, Encoding::Pem, None) => self
                .inner
                .to_pkcs1_pem(LineEnding::LF)
                .map(pem_bytes)
                .map_err(encoding_failed(what)),
            (PrivateFormat::Traditional, Encoding::Der, None) => self
                .inner
                .to_pkcs1_der()
                .map(|doc| Zeroizing::new(doc.as_bytes().to_vec()))
                .map_err(encoding_failed(what)),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("bits", &self.bits())
            .finish_non_exhaustive()
    }
}

/// An RSA public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: RsaPublicKey,
}

impl PublicKey {
    /// Load a PEM or DER public key in SubjectPublicKeyInfo or PKCS#1
    /// layout.
    pub fn load(data: &[u8]) -> Result<Self> {
        let Unarmored { label, der } = unarmor(data)?;
        let inner = match label.as_deref() {
            Some("PUBLIC KEY") => {
                RsaPublicKey::from_public_key_der(&der).map_err(malformed("RSA public key"))?
            }
            Some("RSA PUBLIC KEY") => {
                RsaPublicKey::from_pkcs1_der(&der).map_err(malformed("PKCS#1 RSA public key"))?
            }
            None => RsaPublicKey::from_public_key_der(&der)
                .or_else(|_| RsaPublicKey::from_pkcs1_der(&der))
                .map_err(malformed("RSA public key"))?,
            Some(other) => {
                return Err(Error::Serialization(format!(
                    "unexpected PEM label '{}'",
                    other
                )))
            }
        };
        Ok(Self { inner })
    }

    pub fn bits(&self) -> usize {
        self.inner.n().bits()
    }

    /// Largest plaintext [`PublicKey::encrypt`] accepts under `padding`.
    pub fn max_plaintext_len(&self, padding: &OaepPadding) -> usize {
        self.inner
            .size()
            .saturating_sub(2 * padding.hash.digest_size() + 2)
    }

    /// # Errors
    /// - [`Error::InvalidInput`] if `plaintext` exceeds
    ///   [`PublicKey::max_plaintext_len`]
    pub fn encrypt(&self, plaintext: &[u8], padding: &OaepPadding) -> Result<Vec<u8>> {
        let limit = self.max_plaintext_len(padding);
        if plaintext.len() > limit {
            return Err(Error::InvalidInput(format!(
                "plaintext of {} bytes exceeds the OAEP limit of {}",
                plaintext.len(),
                limit
            )));
        }
        self.inner
            .encrypt(&mut OsRng, padding.scheme()?, plaintext)
            .map_err(|e| Error::Crypto(format!("RSA encryption failed: {}", e)))
    }

    /// # Errors
    /// - [`Error::Signature`] if `signature` does not match `digest`
    pub fn verify(&self, digest: &[u8], signature: &[u8], padding: &PssPadding) -> Result<()> {
        let scheme = padding.scheme(self.bits(), digest)?;
        self.inner
            .verify(scheme, digest, signature)
            .map_err(|_| Error::Signature)
    }

    pub fn verify_message(
        &self,
        message: &[u8],
        signature: &[u8],
        padding: &PssPadding,
    ) -> Result<()> {
        self.verify(&hash::hash(padding.hash, message), signature, padding)
    }

    /// # Errors
    /// - [`Error::InvalidInput`] for [`Encoding::Raw`] or a point format
    pub fn serialize(&self, encoding: Encoding, format: PublicFormat) -> Result<Vec<u8>> {
        let what = "RSA public key";
        match (format, encoding) {
            (_, Encoding::Raw)
            | (PublicFormat::CompressedPoint, _)
            | (PublicFormat::UncompressedPoint, _) => Err(Error::InvalidInput(format!(
                "{:?} with {:?} does not apply to RSA keys",
                format, encoding
            ))),
            (PublicFormat::SubjectPublicKeyInfo, Encoding::Pem) => self
                .inner
                .to_public_key_pem(LineEnding::LF)
                .map(String::into_bytes)
                .map_err(encoding_failed(what)),
            (PublicFormat::SubjectPublicKeyInfo, Encoding::Der) => self
                .inner
                .to_public_key_der()
                .map(|doc| doc.as_bytes().to_vec())
                .map_err(encoding_failed(what)),
            (PublicFormat::Pkcs1, Encoding::Pem) => self
                .inner
                .to_pkcs1_pem(LineEnding::LF)
                .map(String::into_bytes)
                .map_err(encoding_failed(what)),
            (PublicFormat::Pkcs1, Encoding::Der) => self
                .inner
                .to_pkcs1_der()
                .map(|doc| doc.as_bytes().to_vec())
                .map_err(encoding_failed(what)),
        }
    }
}
