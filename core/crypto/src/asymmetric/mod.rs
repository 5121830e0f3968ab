//! Public-key primitives: RSA and the NIST P-256/P-384 curves.
//!
//! Private keys serialize as PKCS#8, optionally passphrase-protected, or in
//! the traditional per-algorithm layout (PKCS#1 for RSA, SEC1 for EC).
//! Public keys serialize as SubjectPublicKeyInfo, PKCS#1 (RSA) or a bare
//! SEC1 point (EC). Loading detects PEM armour from the leading bytes and
//! otherwise expects DER.

pub mod ecc;
pub mod rsa;

use std::fmt;

use pkcs8::{EncryptedPrivateKeyInfo, SecretDocument};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use flintlock_common::{Error, Result};

/// Outer encoding of serialized key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// Base64 text between `-----BEGIN ...-----` lines.
    Pem,
    /// Binary ASN.1.
    Der,
    /// Unwrapped bytes. Only meaningful for EC points.
    Raw,
}

/// Layout of a serialized private key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivateFormat {
    /// PKCS#8 `PrivateKeyInfo`, or `EncryptedPrivateKeyInfo` with a
    /// passphrase.
    Pkcs8,
    /// PKCS#1 for RSA, SEC1 for EC. Cannot carry a passphrase.
    Traditional,
}

/// Layout of a serialized public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicFormat {
    SubjectPublicKeyInfo,
    /// RSA only.
    Pkcs1,
    /// EC only, with [`Encoding::Raw`].
    CompressedPoint,
    /// EC only, with [`Encoding::Raw`].
    UncompressedPoint,
}

/// Key bytes with any PEM armour removed.
struct Unarmored {
    label: Option<String>,
    der: Zeroizing<Vec<u8>>,
}

fn unarmor(data: &[u8]) -> Result<Unarmored> {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let data = &data[start..];

    if data.starts_with(b"-----BEGIN ") {
        let text = std::str::from_utf8(data).map_err(malformed("PEM text"))?;
        let (label, document) =
            SecretDocument::from_pem(text.trim_end()).map_err(malformed("PEM document"))?;
        Ok(Unarmored {
            label: Some(label.to_owned()),
            der: Zeroizing::new(document.as_bytes().to_vec()),
        })
    } else if data.first() == Some(&0x30) {
        Ok(Unarmored {
            label: None,
            der: Zeroizing::new(data.to_vec()),
        })
    } else {
        Err(Error::InvalidInput(
            "key data is neither PEM nor DER".to_string(),
        ))
    }
}

/// Strip armour and passphrase protection from a private key.
///
/// Returns the DER together with its layout when the PEM label names one.
/// Unlabelled DER is assumed to be encrypted PKCS#8 whenever a passphrase is
/// supplied.
fn unarmor_private(
    data: &[u8],
    passphrase: Option<&[u8]>,
    traditional_label: &str,
) -> Result<(Option<PrivateFormat>, Zeroizing<Vec<u8>>)> {
    let Unarmored { label, der } = unarmor(data)?;
    match (label.as_deref(), passphrase) {
        (Some("ENCRYPTED PRIVATE KEY"), Some(passphrase)) | (None, Some(passphrase)) => {
            Ok((Some(PrivateFormat::Pkcs8), decrypt_pkcs8(&der, passphrase)?))
        }
        (Some("ENCRYPTED PRIVATE KEY"), None) => Err(Error::InvalidInput(
            "private key is encrypted and needs a passphrase".to_string(),
        )),
        (Some("PRIVATE KEY"), _) => Ok((Some(PrivateFormat::Pkcs8), der)),
        (Some(label), _) if label == traditional_label => {
            Ok((Some(PrivateFormat::Traditional), der))
        }
        (None, None) => Ok((None, der)),
        (Some(other), _) => Err(Error::Serialization(format!(
            "unexpected PEM label '{}'",
            other
        ))),
    }
}

/// Wrong passphrases and corrupted ciphertext are not distinguished.
fn decrypt_pkcs8(der: &[u8], passphrase: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let info =
        EncryptedPrivateKeyInfo::try_from(der).map_err(malformed("encrypted private key"))?;
    let document = info
        .decrypt(passphrase)
        .map_err(|_| Error::Authentication)?;
    Ok(Zeroizing::new(document.as_bytes().to_vec()))
}

fn malformed<E: fmt::Display>(what: &'static str) -> impl Fn(E) -> Error {
    move |e| Error::Serialization(format!("invalid {}: {}", what, e))
}

fn encoding_failed<E: fmt::Display>(what: &'static str) -> impl Fn(E) -> Error {
    move |e| Error::Serialization(format!("cannot encode {}: {}", what, e))
}

fn pem_bytes(text: Zeroizing<String>) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(text.as_bytes().to_vec())
}
