//! Elliptic-curve keys on NIST P-256 and P-384.
//!
//! Signatures are ECDSA over a caller-supplied digest. Key agreement is
//! ECDH; the shared secret is the raw x-coordinate and should go through a
//! KDF before use as a key.

use std::fmt;
use std::str::FromStr;

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{
    DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use flintlock_common::{Error, Result};

use super::{
    encoding_failed, malformed, pem_bytes, unarmor, unarmor_private, Encoding, PrivateFormat,
    PublicFormat, Unarmored,
};
use crate::hash::{self, HashAlgorithm};

/// Runs `$body` with `$key` bound to the curve-specific value and, in the
/// second form, `$curve` naming that curve's crate.
macro_rules! on_curve {
    ($value:expr, $kind:ident, |$key:ident| $body:expr) => {
        match $value {
            $kind::P256($key) => $body,
            $kind::P384($key) => $body,
        }
    };
    ($value:expr, $kind:ident, |$key:ident, $curve:ident| $body:expr) => {
        match $value {
            $kind::P256($key) => {
                use p256 as $curve;
                $body
            }
            $kind::P384($key) => {
                use p384 as $curve;
                $body
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Curve {
    P256,
    P384,
}

impl Curve {
    pub fn name(self) -> &'static str {
        match self {
            Self::P256 => "P-256",
            Self::P384 => "P-384",
        }
    }

    /// Order size in bits.
    pub fn key_size(self) -> usize {
        match self {
            Self::P256 => 256,
            Self::P384 => 384,
        }
    }

    /// Length of a field element, and of an ECDH shared secret.
    pub fn field_len(self) -> usize {
        self.key_size() / 8
    }

    /// Named-curve object identifier in dotted form.
    pub fn oid(self) -> &'static str {
        match self {
            Self::P256 => "1.2.840.10045.3.1.7",
            Self::P384 => "1.3.132.0.34",
        }
    }

    fn from_point_len(len: usize) -> Option<Self> {
        match len {
            33 | 65 => Some(Self::P256),
            49 | 97 => Some(Self::P384),
            _ => None,
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Curve {
    type Err = Error;

    /// Accepts `P-256`, `secp256r1`, `prime256v1`, `NIST P-384` and similar.
    fn from_str(s: &str) -> Result<Self> {
        let wanted: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match wanted.as_str() {
            "p256" | "secp256r1" | "prime256v1" | "nistp256" => Ok(Self::P256),
            "p384" | "secp384r1" | "nistp384" => Ok(Self::P384),
            _ => Err(Error::UnsupportedAlgorithm(format!("curve '{}'", s))),
        }
    }
}

/// Wire layout of an ECDSA signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureFormat {
    /// ASN.1 `SEQUENCE { r, s }`.
    #[default]
    Der,
    /// `r || s`, each padded to the field length.
    Fixed,
}

#[derive(Clone)]
enum Secret {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Point {
    P256(p256::PublicKey),
    P384(p384::PublicKey),
}

/// An EC private key. Wiped on drop.
#[derive(Clone)]
pub struct PrivateKey {
    secret: Secret,
}

impl PrivateKey {
    pub fn generate(curve: Curve) -> Self {
        let secret = match curve {
            Curve::P256 => Secret::P256(p256::SecretKey::random(&mut OsRng)),
            Curve::P384 => Secret::P384(p384::SecretKey::random(&mut OsRng)),
        };
        debug!(curve = curve.name(), "Generated EC key");
        Self { secret }
    }

    /// Load a PEM or DER private key in PKCS#8 or SEC1 layout.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] for an encrypted key without `passphrase`
    /// - [`Error::Authentication`] if `passphrase` does not open the key
    /// - [`Error::Serialization`] for anything that is not a P-256 or P-384
    ///   key
    pub fn load(data: &[u8], passphrase: Option<&[u8]>) -> Result<Self> {
        let (format, der) = unarmor_private(data, passphrase, "EC PRIVATE KEY")?;
        let pkcs8 = || {
            p256::SecretKey::from_pkcs8_der(&der)
                .map(Secret::P256)
                .or_else(|_| p384::SecretKey::from_pkcs8_der(&der).map(Secret::P384))
                .ok()
        };
        let sec1 = || {
            p256::SecretKey::from_sec1_der(&der)
                .map(Secret::P256)
                .or_else(|_| p384::SecretKey::from_sec1_der(&der).map(Secret::P384))
                .ok()
        };
        let secret = match format {
            Some(PrivateFormat::Pkcs8) => pkcs8(),
            Some(PrivateFormat::Traditional) => sec1(),
            None => pkcs8().or_else(sec1),
        }
        .ok_or_else(|| Error::Serialization("not a P-256 or P-384 private key".to_string()))?;

        let key = Self { secret };
        debug!(curve = key.curve().name(), "Loaded EC private key");
        Ok(key)
    }

    pub fn curve(&self) -> Curve {
        match self.secret {
            Secret::P256(_) => Curve::P256,
            Secret::P384(_) => Curve::P384,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        let point = match &self.secret {
            Secret::P256(key) => Point::P256(key.public_key()),
            Secret::P384(key) => Point::P384(key.public_key()),
        };
        PublicKey { point }
    }

    /// ECDSA over a precomputed digest.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] if `digest` is shorter than half the field
    pub fn sign(&self, digest: &[u8], format: SignatureFormat) -> Result<Vec<u8>> {
        let minimum = self.curve().field_len() / 2;
        if digest.len() < minimum {
            return Err(Error::InvalidInput(format!(
                "digest of {} bytes is too short for {}",
                digest.len(),
                self.curve()
            )));
        }

        on_curve!(&self.secret, Secret, |key, curve| {
            let signer = curve::ecdsa::SigningKey::from(key);
            let signature: curve::ecdsa::Signature = signer
                .sign_prehash(digest)
                .map_err(|e| Error::Crypto(format!("ECDSA signing failed: {}", e)))?;
            Ok(match format {
                SignatureFormat::Der => signature.to_der().as_bytes().to_vec(),
                SignatureFormat::Fixed => signature.to_bytes().to_vec(),
            })
        })
    }

    /// Hash `message` with `algorithm` and sign the digest.
    pub fn sign_message(
        &self,
        message: &[u8],
        algorithm: HashAlgorithm,
        format: SignatureFormat,
    ) -> Result<Vec<u8>> {
        self.sign(&hash::hash(algorithm, message), format)
    }

    /// ECDH with a peer on the same curve.
    ///
    /// # Errors
    /// - [`Error::InvalidInput`] if `peer` is on a different curve
    pub fn exchange(&self, peer: &PublicKey) -> Result<Zeroizing<Vec<u8>>> {
        let shared = match (&self.secret, &peer.point) {
            (Secret::P256(secret), Point::P256(point)) => {
                let shared =
                    p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), point.as_affine());
                shared.raw_secret_bytes().to_vec()
            }
            (Secret::P384(secret), Point::P384(point)) => {
                let shared =
                    p384::ecdh::diffie_hellman(secret.to_nonzero_scalar(), point.as_affine());
                shared.raw_secret_bytes().to_vec()
            }
            _ => {
                return Err(Error::InvalidInput(format!(
                    "peer key is on {} but this key is on {}",
                    peer.curve(),
                    self.curve()
                )))
            }
        };
        Ok(Zeroizing::new(shared))
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
        let what = "EC private key";
        on_curve!(&self.secret, Secret, |key| {
            match (format, encoding, passphrase) {
                (_, Encoding::Raw, _) => Err(Error::InvalidInput(
                    "EC private keys have no raw encoding".to_string(),
                )),
                (PrivateFormat::Traditional, _, Some(_)) => Err(Error::InvalidInput(
                    "passphrase protection requires PKCS#8".to_string(),
                )),
                (PrivateFormat::Pkcs8, Encoding::Pem, None) => key
                    .to_pkcs8_pem(LineEnding::LF)
                    .map(pem_bytes)
                    .map_err(encoding_failed(what)),
                (PrivateFormat::Pkcs8, Encoding::Pem, Some(passphrase)) => key
                    .to_pkcs8_encrypted_pem(OsRng, passphrase, LineEnding::LF)
                    .map(pem_bytes)
                    .map_err(encoding_failed(what)),
                (PrivateFormat::Pkcs8, Encoding::Der, None) => key
                    .to_pkcs8_der()
                    .map(|doc| Zeroizing::new(doc.as_bytes().to_vec()))
                    .map_err(encoding_failed(what)),
                (PrivateFormat::Pkcs8, Encoding::Der, Some(passphrase)) => key
                    .to_pkcs8_encrypted_der(OsRng, passphrase)
                    .map(|doc| Zeroizing::new(doc.as_bytes().to_vec()))
                    .map_err(encoding_failed(what)),
                (PrivateFormat::Traditional, Encoding::Pem, None) => key
                    .to_sec1_pem(LineEnding::LF)
                    .map(pem_bytes)
                    .map_err(encoding_failed(what)),
                (PrivateFormat::Traditional, Encoding::Der, None) => {
                    key.to_sec1_der().map_err(encoding_failed(what))
                }
            }
        })
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("curve", &self.curve())
            .finish_non_exhaustive()
    }
}

/// An EC public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    point: Point,
}

impl PublicKey {
    /// Load a SubjectPublicKeyInfo (PEM or DER) or a bare SEC1 point.
    pub fn load(data: &[u8]) -> Result<Self> {
        if matches!(data.first(), Some(0x02..=0x04)) {
            return Self::from_point(data);
        }

        let Unarmored { label, der } = unarmor(data)?;
        if let Some(other) = label.as_deref().filter(|label| *label != "PUBLIC KEY") {
            return Err(Error::Serialization(format!(
                "unexpected PEM label '{}'",
                other
            )));
        }
        let point = p256::PublicKey::from_public_key_der(&der)
            .map(Point::P256)
            .or_else(|_| p384::PublicKey::from_public_key_der(&der).map(Point::P384))
            .map_err(malformed("EC public key"))?;
        Ok(Self { point })
    }

    /// Decode a compressed or uncompressed SEC1 point. The curve follows
    /// from the length.
    pub fn from_point(bytes: &[u8]) -> Result<Self> {
        let curve = Curve::from_point_len(bytes.len()).ok_or_else(|| {
            Error::InvalidInput(format!("no curve has {} byte points", bytes.len()))
        })?;
        let point = match curve {
            Curve::P256 => p256::PublicKey::from_sec1_bytes(bytes).map(Point::P256),
            Curve::P384 => p384::PublicKey::from_sec1_bytes(bytes).map(Point::P384),
        }
        .map_err(|_| Error::InvalidInput(format!("point is not on {}", curve)))?;
        Ok(Self { point })
    }

    pub fn curve(&self) -> Curve {
        match self.point {
            Point::P256(_) => Curve::P256,
            Point::P384(_) => Curve::P384,
        }
    }

    /// # Errors
    /// - [`Error::Signature`] if `signature` is malformed or does not match
    pub fn verify(
        &self,
        digest: &[u8],
        signature: &[u8],
        format: SignatureFormat,
    ) -> Result<()> {
        on_curve!(&self.point, Point, |key, curve| {
            let signature = match format {
                SignatureFormat::Der => curve::ecdsa::Signature::from_der(signature),
                SignatureFormat::Fixed => curve::ecdsa::Signature::from_slice(signature),
            }
            .map_err(|_| Error::Signature)?;
            curve::ecdsa::VerifyingKey::from(key)
                .verify_prehash(digest, &signature)
                .map_err(|_| Error::Signature)
        })
    }

    pub fn verify_message(
        &self,
        message: &[u8],
        signature: &[u8],
        algorithm: HashAlgorithm,
        format: SignatureFormat,
    ) -> Result<()> {
        self.verify(&hash::hash(algorithm, message), signature, format)
    }

    /// # Errors
    /// - [`Error::InvalidInput`] for PKCS#1, a point format without
    ///   [`Encoding::Raw`], or SubjectPublicKeyInfo with it
    pub fn serialize(&self, encoding: Encoding, format: PublicFormat) -> Result<Vec<u8>> {
        let what = "EC public key";
        on_curve!(&self.point, Point, |key| {
            match (format, encoding) {
                (PublicFormat::CompressedPoint, Encoding::Raw) => {
                    Ok(key.to_encoded_point(true).as_bytes().to_vec())
                }
                (PublicFormat::UncompressedPoint, Encoding::Raw) => {
                    Ok(key.to_encoded_point(false).as_bytes().to_vec())
                }
                (PublicFormat::SubjectPublicKeyInfo, Encoding::Pem) => key
                    .to_public_key_pem(LineEnding::LF)
                    .map(String::into_bytes)
                    .map_err(encoding_failed(what)),
                (PublicFormat::SubjectPublicKeyInfo, Encoding::Der) => key
                    .to_public_key_der()
                    .map(|doc| doc.as_bytes().to_vec())
                    .map_err(encoding_failed(what)),
                _ => Err(Error::InvalidInput(format!(
                    "{:?} with {:?} does not apply to EC keys",
                    format, encoding
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURVES: [Curve; 2] = [Curve::P256, Curve::P384];

    #[test]
    fn test_curve_aliases() {
        for name in ["p256", "P-256", "secp256r1", "prime256v1", "NIST P-256"] {
            assert_eq!(name.parse::<Curve>().unwrap(), Curve::P256, "{}", name);
        }
        for name in ["P-384", "secp384r1", "nist_p384"] {
            assert_eq!(name.parse::<Curve>().unwrap(), Curve::P384, "{}", name);
        }
        assert!(matches!(
            "secp256k1".parse::<Curve>(),
            Err(Error::UnsupportedAlgorithm(_))
        ));
        assert_eq!(Curve::P384.to_string(), "P-384");
        assert_eq!(Curve::P256.field_len(), 32);
    }

    #[test]
    fn test_sign_verify() {
        for curve in CURVES {
            let key = PrivateKey::generate(curve);
            let public = key.public_key();
            for format in [SignatureFormat::Der, SignatureFormat::Fixed] {
                let signature = key
                    .sign_message(b"firmware image", HashAlgorithm::Sha384, format)
                    .unwrap();
                if format == SignatureFormat::Fixed {
                    assert_eq!(signature.len(), 2 * curve.field_len());
                }
                public
                    .verify_message(b"firmware image", &signature, HashAlgorithm::Sha384, format)
                    .unwrap();
                let tampered = public.verify_message(
                    b"firmware imagf",
                    &signature,
                    HashAlgorithm::Sha384,
                    format,
                );
                assert!(matches!(tampered, Err(Error::Signature)));
            }

            let other = PrivateKey::generate(curve).public_key();
            let digest = hash::hash(HashAlgorithm::Sha256, b"payload");
            let signature = key.sign(&digest, SignatureFormat::Der).unwrap();
            assert!(matches!(
                other.verify(&digest, &signature, SignatureFormat::Der),
                Err(Error::Signature)
            ));
            assert!(matches!(
                public.verify(&digest, b"\x30\x00", SignatureFormat::Der),
                Err(Error::Signature)
            ));
        }
    }

    #[test]
    fn test_short_digest_rejected() {
        let key = PrivateKey::generate(Curve::P384);
        assert!(matches!(
            key.sign(&[0u8; 16], SignatureFormat::Der),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_exchange_agrees() {
        for curve in CURVES {
            let alice = PrivateKey::generate(curve);
            let bob = PrivateKey::generate(curve);
            let ours = alice.exchange(&bob.public_key()).unwrap();
            let theirs = bob.exchange(&alice.public_key()).unwrap();
            assert_eq!(ours, theirs);
            assert_eq!(ours.len(), curve.field_len());

            let eve = PrivateKey::generate(curve);
            assert_ne!(eve.exchange(&bob.public_key()).unwrap(), ours);
        }

        let p256 = PrivateKey::generate(Curve::P256);
        let p384 = PrivateKey::generate(Curve::P384);
        assert!(matches!(
            p256.exchange(&p384.public_key()),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_private_serialization_roundtrip() {
        for curve in CURVES {
            let key = PrivateKey::generate(curve);
            for (encoding, format, marker) in [
                (Encoding::Pem, PrivateFormat::Pkcs8, Some("BEGIN PRIVATE KEY")),
                (Encoding::Pem, PrivateFormat::Traditional, Some("BEGIN EC PRIVATE KEY")),
                (Encoding::Der, PrivateFormat::Pkcs8, None),
                (Encoding::Der, PrivateFormat::Traditional, None),
            ] {
                let bytes = key.serialize(encoding, format, None).unwrap();
                if let Some(marker) = marker {
                    assert!(String::from_utf8_lossy(&bytes).contains(marker));
                }
                let loaded = PrivateKey::load(&bytes, None).unwrap();
                assert_eq!(loaded.curve(), curve);
                assert_eq!(loaded.public_key(), key.public_key());
            }
        }
    }

    #[test]
    fn test_encrypted_private_key() {
        let key = PrivateKey::generate(Curve::P256);
        let der = key
            .serialize(Encoding::Der, PrivateFormat::Pkcs8, Some(b"correct horse"))
            .unwrap();
        let loaded = PrivateKey::load(&der, Some(b"correct horse")).unwrap();
        assert_eq!(loaded.public_key(), key.public_key());
        assert!(matches!(
            PrivateKey::load(&der, Some(b"battery staple")),
            Err(Error::Authentication)
        ));
    }

    #[test]
    fn test_public_serialization_roundtrip() {
        for curve in CURVES {
            let public = PrivateKey::generate(curve).public_key();

            let compressed = public
                .serialize(Encoding::Raw, PublicFormat::CompressedPoint)
                .unwrap();
            assert_eq!(compressed.len(), 1 + curve.field_len());
            let uncompressed = public
                .serialize(Encoding::Raw, PublicFormat::UncompressedPoint)
                .unwrap();
            assert_eq!(uncompressed.len(), 1 + 2 * curve.field_len());
            assert_eq!(uncompressed[0], 0x04);

            for encoded in [
                compressed,
                uncompressed,
                public
                    .serialize(Encoding::Pem, PublicFormat::SubjectPublicKeyInfo)
                    .unwrap(),
                public
                    .serialize(Encoding::Der, PublicFormat::SubjectPublicKeyInfo)
                    .unwrap(),
            ] {
                assert_eq!(PublicKey::load(&encoded).unwrap(), public);
            }

            assert!(matches!(
                public.serialize(Encoding::Pem, PublicFormat::Pkcs1),
                Err(Error::InvalidInput(_))
            ));
            assert!(matches!(
                public.serialize(Encoding::Der, PublicFormat::CompressedPoint),
                Err(Error::InvalidInput(_))
            ));
        }

        assert!(matches!(
            PublicKey::from_point(&[0x04; 40]),
            Err(Error::InvalidInput(_))
        ));
    }
}
