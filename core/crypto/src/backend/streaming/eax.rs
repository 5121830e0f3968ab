//! AES-256-EAX.
//!
//! EAX wraps CTR between three OMAC (CMAC) passes, each over a distinct
//! domain block: the nonce (0), the associated data (1) and the ciphertext
//! (2). The nonce pass also seeds the counter, so ciphertext is available as
//! soon as data arrives.

use aes::cipher::KeyInit as BlockKeyInit;
use aes::Aes256;
use cmac::{Cmac, Mac};
use zeroize::Zeroizing;

use flintlock_common::{Error, Result};

use super::{invalid_length, tags_match, BlockKeystream, CounterWidth, TAG_LEN};
use crate::provider::{AeadProvider, Direction, Progress, Sealed, Verified};

type Omac = Cmac<Aes256>;

/// OMAC keyed with `key`, already fed the domain block for `domain`.
fn omac(key: &[u8], domain: u8) -> Result<Omac> {
    let mut mac = <Omac as Mac>::new_from_slice(key).map_err(|_| invalid_length("AES key"))?;
    let mut block = [0u8; 16];
    block[15] = domain;
    mac.update(&block);
    Ok(mac)
}

fn finish(mac: Omac) -> Zeroizing<[u8; 16]> {
    let mut out = Zeroizing::new([0u8; 16]);
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

pub(super) struct Eax {
    keystream: BlockKeystream<Aes256>,
    nonce_tag: Zeroizing<[u8; 16]>,
    header: Option<Omac>,
    header_tag: Zeroizing<[u8; 16]>,
    body: Option<Omac>,
    direction: Direction,
    progress: Progress,
}

impl Eax {
    pub(super) fn new(key: &[u8], nonce: &[u8], direction: Direction) -> Result<Self> {
        let mut nonce_mac = omac(key, 0)?;
        nonce_mac.update(nonce);
        let nonce_tag = finish(nonce_mac);

        let cipher = Aes256::new_from_slice(key).map_err(|_| invalid_length("AES key"))?;
        Ok(Self {
            keystream: BlockKeystream::new(cipher, *nonce_tag, CounterWidth::Full128),
            nonce_tag,
            header: Some(omac(key, 1)?),
            header_tag: Zeroizing::new([0u8; 16]),
            body: Some(omac(key, 2)?),
            direction,
            progress: Progress::Aad,
        })
    }

    /// Close the associated data pass. Idempotent.
    fn seal_header(&mut self) {
        if let Some(header) = self.header.take() {
            self.header_tag = finish(header);
        }
    }

    fn header(&mut self) -> Result<&mut Omac> {
        self.header
            .as_mut()
            .ok_or_else(|| Error::protocol("associated data is closed"))
    }

    fn body(&mut self) -> Result<&mut Omac> {
        self.body
            .as_mut()
            .ok_or_else(|| Error::protocol("provider already finalized"))
    }

    fn compute_tag(&mut self) -> Result<Vec<u8>> {
        self.seal_header();
        let body = self
            .body
            .take()
            .ok_or_else(|| Error::protocol("provider already finalized"))?;
        let body_tag = finish(body);

        let tag = self
            .nonce_tag
            .iter()
            .zip(self.header_tag.iter())
            .zip(body_tag.iter())
            .map(|((n, h), c)| n ^ h ^ c)
            .take(TAG_LEN)
            .collect();
        Ok(tag)
    }
}

impl AeadProvider for Eax {
    fn update_aad(&mut self, aad: &[u8]) -> Result<()> {
        self.progress.before_aad()?;
        self.header()?.update(aad);
        Ok(())
    }

    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.progress.before_data()?;
        if self.progress == Progress::Aad {
            self.seal_header();
            self.progress = Progress::Data;
        }

        let mut out = data.to_vec();
        match self.direction {
            Direction::Encrypt => {
                self.keystream.apply(&mut out);
                self.body()?.update(&out);
            }
            Direction::Decrypt => {
                self.body()?.update(data);
                self.keystream.apply(&mut out);
            }
        }
        Ok(out)
    }

    fn finalize_encrypt(&mut self) -> Result<Sealed> {
        self.progress
            .before_finalize(Direction::Encrypt, self.direction)?;
        self.progress = Progress::Finished;
        Ok(Sealed {
            output: Vec::new(),
            tag: self.compute_tag()?,
        })
    }

    fn finalize_decrypt(&mut self, expected_tag: &[u8]) -> Result<Verified> {
        self.progress
            .before_finalize(Direction::Decrypt, self.direction)?;
        self.progress = Progress::Finished;
        let tag = self.compute_tag()?;
        if tags_match(&tag, expected_tag) {
            Ok(Verified::Authentic(Vec::new()))
        } else {
            Ok(Verified::Rejected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes_gcm::aead::generic_array::GenericArray;
    use aes_gcm::aead::{AeadInPlace, KeyInit};

    fn oneshot(key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Vec<u8> {
        let cipher = ::eax::Eax::<Aes256>::new_from_slice(key).unwrap();
        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, &mut buffer)
            .unwrap();
        buffer.extend_from_slice(&tag);
        buffer
    }

    fn streamed(key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8], split: usize) -> Vec<u8> {
        let mut eax = Eax::new(key, nonce, Direction::Encrypt).unwrap();
        for piece in aad.chunks(split) {
            eax.update_aad(piece).unwrap();
        }
        let mut out = Vec::new();
        for piece in plaintext.chunks(split) {
            let ciphertext = eax.update(piece).unwrap();
            assert_eq!(ciphertext.len(), piece.len());
            out.extend(ciphertext);
        }
        let sealed = eax.finalize_encrypt().unwrap();
        out.extend(sealed.output);
        out.extend(sealed.tag);
        out
    }

    #[test]
    fn test_matches_oneshot_eax() {
        let key: Vec<u8> = (0..32u8).collect();
        let nonce = [0x5Cu8; 16];
        for (aad_len, len) in [(0, 0), (0, 1), (16, 16), (17, 31), (40, 100), (3, 257)] {
            let aad: Vec<u8> = (0..aad_len).map(|i| i as u8 ^ 0xA5).collect();
            let plaintext: Vec<u8> = (0..len).map(|i| (i * 3) as u8).collect();
            let expected = oneshot(&key, &nonce, &aad, &plaintext);
            for split in [1, 7, 16, 64] {
                assert_eq!(
                    streamed(&key, &nonce, &aad, &plaintext, split),
                    expected,
                    "aad {} len {} split {}",
                    aad_len,
                    len,
                    split
                );
            }
        }
    }

    #[test]
    fn test_opens_oneshot_output() {
        let key = [0x11u8; 32];
        let nonce = [0x22u8; 16];
        let sealed = oneshot(&key, &nonce, b"context", b"incremental eax");
        let (body, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut eax = Eax::new(&key, &nonce, Direction::Decrypt).unwrap();
        eax.update_aad(b"context").unwrap();
        let plaintext = eax.update(body).unwrap();
        assert_eq!(plaintext, b"incremental eax");
        assert_eq!(
            eax.finalize_decrypt(tag).unwrap(),
            Verified::Authentic(Vec::new())
        );
    }
}
