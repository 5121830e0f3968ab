//! Incremental AEAD constructions.
//!
//! Each provider here keeps a running authenticator alongside a keystream,
//! so every `update` returns its transformed bytes immediately and the tag is
//! computed once the caller signals the end of data:
//!
//! - AES-GCM: AES-CTR (32-bit counter) + GHASH
//! - ChaCha20-Poly1305 / XChaCha20-Poly1305: RFC 8439 layout
//! - AES-256 in CTR, CFB or OFB mode + HMAC-SHA256: HKDF splits the key
//!   into cipher and MAC keys (salted with the nonce); the MAC covers nonce,
//!   AAD, ciphertext and both lengths, truncated to 16 bytes
//! - AES-256-EAX: CTR between OMAC passes over nonce, AAD and ciphertext
//! - AES-256-OCB3: whole blocks as they complete; up to 15 bytes are held
//!   back and released at finalization

use aes::cipher::consts::U16;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, BlockSizeUser, KeyInit as BlockKeyInit};
use aes::{Aes128, Aes256};
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, XChaCha20};
use ghash::GHash;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use poly1305::universal_hash::{KeyInit as MacKeyInit, UniversalHash};
use poly1305::Poly1305;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use flintlock_common::{Error, Result};

use crate::algorithm::{Algorithm, AlgorithmSpec};
use crate::provider::{AeadProvider, Direction, Progress, Sealed, Verified};

mod eax;
mod ocb;

use self::eax::Eax;
use self::ocb::Ocb;

type HmacSha256 = Hmac<Sha256>;

/// Tag length produced by every construction in this module.
const TAG_LEN: usize = 16;

/// GCM plaintext limit: 2^32 - 2 counter blocks.
const GCM_MAX_DATA_LEN: u64 = ((1u64 << 32) - 2) * 16;

/// Start an incremental provider for `spec`.
///
/// # Errors
/// - [`Error::UnsupportedAlgorithm`] for algorithms with no incremental form
pub fn begin(
    spec: &AlgorithmSpec,
    key: &[u8],
    nonce: &[u8],
    direction: Direction,
) -> Result<Box<dyn AeadProvider>> {
    let provider: Box<dyn AeadProvider> = match spec.algorithm {
        Algorithm::Aes128Gcm => Box::new(Gcm::<Aes128>::new(key, nonce, direction)?),
        Algorithm::Aes256Gcm => Box::new(Gcm::<Aes256>::new(key, nonce, direction)?),
        Algorithm::ChaCha20Poly1305 => {
            Box::new(ChaChaPoly::<ChaCha20>::new(key, nonce, direction)?)
        }
        Algorithm::XChaCha20Poly1305 => {
            Box::new(ChaChaPoly::<XChaCha20>::new(key, nonce, direction)?)
        }
        Algorithm::Aes256CtrHmacSha256 => {
            Box::new(CipherHmac::new(HmacMode::Ctr, key, nonce, direction)?)
        }
        Algorithm::Aes256CfbHmacSha256 => {
            Box::new(CipherHmac::new(HmacMode::Cfb, key, nonce, direction)?)
        }
        Algorithm::Aes256OfbHmacSha256 => {
            Box::new(CipherHmac::new(HmacMode::Ofb, key, nonce, direction)?)
        }
        Algorithm::Aes256Eax => Box::new(Eax::new(key, nonce, direction)?),
        Algorithm::Aes256Ocb => Box::new(Ocb::<Aes256>::new(key, nonce, direction)?),
        other => {
            return Err(Error::UnsupportedAlgorithm(format!(
                "{} has no incremental construction",
                other
            )))
        }
    };
    Ok(provider)
}

fn tags_match(computed: &[u8], expected: &[u8]) -> bool {
    computed.len() == expected.len() && bool::from(computed.ct_eq(expected))
}

fn invalid_length(what: &str) -> Error {
    Error::Crypto(format!("invalid {} length", what))
}

/// Feeds a universal hash with arbitrarily split input.
///
/// Whole 16-byte blocks go straight through; a trailing partial block waits
/// for more input or is zero-padded by [`PaddedMac::pad`].
struct PaddedMac<U: UniversalHash> {
    mac: U,
    pending: [u8; 16],
    filled: usize,
}

impl<U: UniversalHash> PaddedMac<U> {
    fn new(mac: U) -> Self {
        Self {
            mac,
            pending: [0u8; 16],
            filled: 0,
        }
    }

    fn absorb(&mut self, mut data: &[u8]) {
        if self.filled > 0 {
            let take = (16 - self.filled).min(data.len());
            self.pending[self.filled..self.filled + take].copy_from_slice(&data[..take]);
            self.filled += take;
            data = &data[take..];
            if self.filled < 16 {
                return;
            }
            self.mac.update_padded(&self.pending);
            self.filled = 0;
        }

        let whole = data.len() - data.len() % 16;
        if whole > 0 {
            self.mac.update_padded(&data[..whole]);
        }
        let rest = &data[whole..];
        self.pending[..rest.len()].copy_from_slice(rest);
        self.filled = rest.len();
    }

    /// Zero-pad the current partial block, if any.
    fn pad(&mut self) {
        if self.filled > 0 {
            self.mac.update_padded(&self.pending[..self.filled]);
            self.filled = 0;
        }
    }

    fn finish(mut self, lengths: &[u8; 16]) -> Vec<u8> {
        self.pad();
        self.mac.update_padded(lengths);
        self.mac.finalize().to_vec()
    }
}

/// Counter increment rule for [`BlockKeystream`].
#[derive(Clone, Copy)]
enum CounterWidth {
    /// Rightmost 32 bits, wrapping (GCM).
    Low32,
    /// Whole block as a 128-bit big-endian integer.
    Full128,
}

/// CTR keystream over a 128-bit block cipher.
struct BlockKeystream<C> {
    cipher: C,
    counter: [u8; 16],
    block: Zeroizing<[u8; 16]>,
    used: usize,
    width: CounterWidth,
}

impl<C> BlockKeystream<C>
where
    C: BlockEncrypt + BlockSizeUser<BlockSize = U16>,
{
    fn new(cipher: C, counter: [u8; 16], width: CounterWidth) -> Self {
        Self {
            cipher,
            counter,
            block: Zeroizing::new([0u8; 16]),
            used: 16,
            width,
        }
    }

    fn apply(&mut self, data: &mut [u8]) {
        let mut offset = 0;
        while offset < data.len() {
            if self.used == 16 {
                self.refill();
            }
            let n = (16 - self.used).min(data.len() - offset);
            for (byte, key) in data[offset..offset + n]
                .iter_mut()
                .zip(&self.block[self.used..self.used + n])
            {
                *byte ^= key;
            }
            self.used += n;
            offset += n;
        }
    }

    fn refill(&mut self) {
        let mut block = GenericArray::clone_from_slice(&self.counter);
        self.cipher.encrypt_block(&mut block);
        self.block.copy_from_slice(&block);
        self.used = 0;

        match self.width {
            CounterWidth::Low32 => {
                let mut low = [0u8; 4];
                low.copy_from_slice(&self.counter[12..]);
                let next = u32::from_be_bytes(low).wrapping_add(1);
                self.counter[12..].copy_from_slice(&next.to_be_bytes());
            }
            CounterWidth::Full128 => {
                let next = u128::from_be_bytes(self.counter).wrapping_add(1);
                self.counter = next.to_be_bytes();
            }
        }
    }
}

/// AES-GCM with a 96-bit nonce.
struct Gcm<C> {
    keystream: BlockKeystream<C>,
    ghash: Option<PaddedMac<GHash>>,
    tag_mask: Zeroizing<[u8; 16]>,
    aad_len: u64,
    data_len: u64,
    direction: Direction,
    progress: Progress,
}

impl<C> Gcm<C>
where
    C: BlockEncrypt + BlockKeyInit + BlockSizeUser<BlockSize = U16>,
{
    fn new(key: &[u8], nonce: &[u8], direction: Direction) -> Result<Self> {
        if nonce.len() != 12 {
            return Err(invalid_length("GCM nonce"));
        }
        let cipher = C::new_from_slice(key).map_err(|_| invalid_length("AES key"))?;

        let mut hash_key = ghash::Key::default();
        cipher.encrypt_block(&mut hash_key);
        let ghash = GHash::new(&hash_key);

        // J0 = nonce || 0^31 || 1; its encryption masks the tag and the body
        // keystream starts at inc32(J0).
        let mut j0 = [0u8; 16];
        j0[..12].copy_from_slice(nonce);
        j0[15] = 1;
        let mut mask = GenericArray::clone_from_slice(&j0);
        cipher.encrypt_block(&mut mask);
        let mut tag_mask = Zeroizing::new([0u8; 16]);
        tag_mask.copy_from_slice(&mask);

        let mut counter = j0;
        counter[15] = 2;

        Ok(Self {
            keystream: BlockKeystream::new(cipher, counter, CounterWidth::Low32),
            ghash: Some(PaddedMac::new(ghash)),
            tag_mask,
            aad_len: 0,
            data_len: 0,
            direction,
            progress: Progress::Aad,
        })
    }

    fn ghash(&mut self) -> Result<&mut PaddedMac<GHash>> {
        self.ghash
            .as_mut()
            .ok_or_else(|| Error::protocol("provider already finalized"))
    }

    fn compute_tag(&mut self) -> Result<Vec<u8>> {
        let ghash = self
            .ghash
            .take()
            .ok_or_else(|| Error::protocol("provider already finalized"))?;
        let mut lengths = [0u8; 16];
        lengths[..8].copy_from_slice(&(self.aad_len * 8).to_be_bytes());
        lengths[8..].copy_from_slice(&(self.data_len * 8).to_be_bytes());

        let mut tag = ghash.finish(&lengths);
        for (byte, mask) in tag.iter_mut().zip(self.tag_mask.iter()) {
            *byte ^= mask;
        }
        Ok(tag)
    }
}

impl<C> AeadProvider for Gcm<C>
where
    C: BlockEncrypt + BlockKeyInit + BlockSizeUser<BlockSize = U16> + Send,
{
    fn update_aad(&mut self, aad: &[u8]) -> Result<()> {
        self.progress.before_aad()?;
        self.ghash()?.absorb(aad);
        self.aad_len += aad.len() as u64;
        Ok(())
    }

    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.progress.before_data()?;
        if self.progress == Progress::Aad {
            self.ghash()?.pad();
            self.progress = Progress::Data;
        }
        if self.data_len + data.len() as u64 > GCM_MAX_DATA_LEN {
            return Err(Error::InvalidInput(
                "message exceeds the AES-GCM length limit".to_string(),
            ));
        }
        self.data_len += data.len() as u64;

        let mut out = data.to_vec();
        match self.direction {
            Direction::Encrypt => {
                self.keystream.apply(&mut out);
                self.ghash()?.absorb(&out);
            }
            Direction::Decrypt => {
                self.ghash()?.absorb(data);
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

/// ChaCha20-Poly1305 in the RFC 8439 layout, over either nonce size.
struct ChaChaPoly<S> {
    cipher: S,
    poly: Option<PaddedMac<Poly1305>>,
    aad_len: u64,
    data_len: u64,
    direction: Direction,
    progress: Progress,
}

impl<S> ChaChaPoly<S>
where
    S: StreamCipher + KeyIvInit,
{
    fn new(key: &[u8], nonce: &[u8], direction: Direction) -> Result<Self> {
        let mut cipher =
            S::new_from_slices(key, nonce).map_err(|_| invalid_length("ChaCha20 key or nonce"))?;

        // Block 0 keys Poly1305; applying it leaves the stream at block 1.
        let mut block0 = Zeroizing::new([0u8; 64]);
        cipher.apply_keystream(&mut block0[..]);
        let poly = Poly1305::new(poly1305::Key::from_slice(&block0[..32]));

        Ok(Self {
            cipher,
            poly: Some(PaddedMac::new(poly)),
            aad_len: 0,
            data_len: 0,
            direction,
            progress: Progress::Aad,
        })
    }

    fn poly(&mut self) -> Result<&mut PaddedMac<Poly1305>> {
        self.poly
            .as_mut()
            .ok_or_else(|| Error::protocol("provider already finalized"))
    }

    fn compute_tag(&mut self) -> Result<Vec<u8>> {
        let poly = self
            .poly
            .take()
            .ok_or_else(|| Error::protocol("provider already finalized"))?;
        let mut lengths = [0u8; 16];
        lengths[..8].copy_from_slice(&self.aad_len.to_le_bytes());
        lengths[8..].copy_from_slice(&self.data_len.to_le_bytes());
        Ok(poly.finish(&lengths))
    }
}

impl<S> AeadProvider for ChaChaPoly<S>
where
    S: StreamCipher + KeyIvInit + Send,
{
    fn update_aad(&mut self, aad: &[u8]) -> Result<()> {
        self.progress.before_aad()?;
        self.poly()?.absorb(aad);
        self.aad_len += aad.len() as u64;
        Ok(())
    }

    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.progress.before_data()?;
        if self.progress == Progress::Aad {
            self.poly()?.pad();
            self.progress = Progress::Data;
        }

        let mut out = data.to_vec();
        if self.direction == Direction::Decrypt {
            self.poly()?.absorb(data);
        }
        self.cipher
            .try_apply_keystream(&mut out)
            .map_err(|_| Error::InvalidInput("message exceeds the ChaCha20 keystream".to_string()))?;
        if self.direction == Direction::Encrypt {
            self.poly()?.absorb(&out);
        }
        self.data_len += data.len() as u64;
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

/// Confidentiality layer under [`CipherHmac`].
#[derive(Clone, Copy, PartialEq, Eq)]
enum HmacMode {
    /// 128-bit big-endian counter starting at the nonce.
    Ctr,
    /// Full-block (128-bit segment) cipher feedback.
    Cfb,
    /// Output feedback.
    Ofb,
}

enum ModeCipher {
    Ctr(BlockKeystream<Aes256>),
    CfbEncrypt(cfb_mode::BufEncryptor<Aes256>),
    CfbDecrypt(cfb_mode::BufDecryptor<Aes256>),
    Ofb(ofb::Ofb<Aes256>),
}

impl ModeCipher {
    fn apply(&mut self, data: &mut [u8]) -> Result<()> {
        match self {
            Self::Ctr(keystream) => keystream.apply(data),
            Self::CfbEncrypt(cfb) => cfb.encrypt(data),
            Self::CfbDecrypt(cfb) => cfb.decrypt(data),
            Self::Ofb(ofb) => ofb
                .try_apply_keystream(data)
                .map_err(|_| Error::InvalidInput("message exceeds the OFB keystream".to_string()))?,
        }
        Ok(())
    }
}

/// AES-256 in CTR, CFB or OFB mode authenticated by HMAC-SHA256.
struct CipherHmac {
    cipher: ModeCipher,
    mac: HmacSha256,
    aad_len: u64,
    data_len: u64,
    direction: Direction,
    progress: Progress,
}

impl CipherHmac {
    fn new(mode: HmacMode, key: &[u8], nonce: &[u8], direction: Direction) -> Result<Self> {
        let iv: [u8; 16] = nonce.try_into().map_err(|_| invalid_length("AES mode nonce"))?;

        let hkdf = Hkdf::<Sha256>::new(Some(nonce), key);
        let mut cipher_key = Zeroizing::new([0u8; 32]);
        let mut mac_key = Zeroizing::new([0u8; 32]);
        hkdf.expand(b"enc-key", &mut cipher_key[..])
            .map_err(|_| invalid_length("HKDF output"))?;
        hkdf.expand(b"auth-key", &mut mac_key[..])
            .map_err(|_| invalid_length("HKDF output"))?;

        let cipher = match (mode, direction) {
            (HmacMode::Ctr, _) => {
                let aes = Aes256::new_from_slice(&cipher_key[..])
                    .map_err(|_| invalid_length("AES key"))?;
                ModeCipher::Ctr(BlockKeystream::new(aes, iv, CounterWidth::Full128))
            }
            (HmacMode::Cfb, Direction::Encrypt) => ModeCipher::CfbEncrypt(
                cfb_mode::BufEncryptor::new_from_slices(&cipher_key[..], &iv)
                    .map_err(|_| invalid_length("AES key"))?,
            ),
            (HmacMode::Cfb, Direction::Decrypt) => ModeCipher::CfbDecrypt(
                cfb_mode::BufDecryptor::new_from_slices(&cipher_key[..], &iv)
                    .map_err(|_| invalid_length("AES key"))?,
            ),
            (HmacMode::Ofb, _) => ModeCipher::Ofb(
                ofb::Ofb::new_from_slices(&cipher_key[..], &iv)
                    .map_err(|_| invalid_length("AES key"))?,
            ),
        };
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&mac_key[..])
            .map_err(|_| invalid_length("HMAC key"))?;
        mac.update(nonce);

        Ok(Self {
            cipher,
            mac,
            aad_len: 0,
            data_len: 0,
            direction,
            progress: Progress::Aad,
        })
    }

    /// Callers must have moved `progress` to `Finished` first.
    fn compute_tag(&mut self) -> Vec<u8> {
        self.mac.update(&self.aad_len.to_le_bytes());
        self.mac.update(&self.data_len.to_le_bytes());
        let full = Zeroizing::new(self.mac.finalize_reset().into_bytes());
        full[..TAG_LEN].to_vec()
    }

    /// Overwrite the keyed HMAC state with zeros.
    fn wipe_mac(&mut self) {
        // SAFETY: `Hmac<Sha256>` holds only integers and byte arrays, with no
        // pointers and no drop glue, so all-zero bytes are a valid value.
        unsafe { zeroize::zeroize_flat_type(&mut self.mac) }
    }
}

impl Drop for CipherHmac {
    fn drop(&mut self) {
        self.wipe_mac();
    }
}

impl AeadProvider for CipherHmac {
    fn update_aad(&mut self, aad: &[u8]) -> Result<()> {
        self.progress.before_aad()?;
        self.mac.update(aad);
        self.aad_len += aad.len() as u64;
        Ok(())
    }

    fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.progress.before_data()?;
        self.progress = Progress::Data;

        let mut out = data.to_vec();
        match self.direction {
            Direction::Encrypt => {
                self.cipher.apply(&mut out)?;
                self.mac.update(&out);
            }
            Direction::Decrypt => {
                self.mac.update(data);
                self.cipher.apply(&mut out)?;
            }
        }
        self.data_len += data.len() as u64;
        Ok(out)
    }

    fn finalize_encrypt(&mut self) -> Result<Sealed> {
        self.progress
            .before_finalize(Direction::Encrypt, self.direction)?;
        self.progress = Progress::Finished;
        Ok(Sealed {
            output: Vec::new(),
            tag: self.compute_tag(),
        })
    }

    fn finalize_decrypt(&mut self, expected_tag: &[u8]) -> Result<Verified> {
        self.progress
            .before_finalize(Direction::Decrypt, self.direction)?;
        self.progress = Progress::Finished;
        let tag = self.compute_tag();
        if tags_match(&tag, expected_tag) {
            Ok(Verified::Authentic(Vec::new()))
        } else {
            Ok(Verified::Rejected)
        }
    }
}
