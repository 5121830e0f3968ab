//! OCB3 (RFC 7253) with 96-bit nonces and 128-bit tags.
//!
//! Whole blocks are transformed as soon as they are complete. Up to 15
//! trailing bytes wait for more input; at finalization they are processed as
//! the final partial block and returned with the tag.

use aes::cipher::consts::U16;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, BlockSizeUser, KeyInit};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use flintlock_common::Result;

use super::{invalid_length, tags_match};
use crate::provider::{AeadProvider, Direction, Progress, Sealed, Verified};

const NONCE_LEN: usize = 12;

type Block = [u8; 16];

fn xor_in(target: &mut Block, other: &Block) {
    for (t, o) in target.iter_mut().zip(other) {
        *t ^= o;
    }
}

/// Multiplication by x in GF(2^128).
fn double(block: &Block) -> Block {
    let value = u128::from_be_bytes(*block);
    ((value << 1) ^ ((value >> 127) * 0x87)).to_be_bytes()
}

fn to_block(bytes: &[u8]) -> Block {
    let mut block = [0u8; 16];
    block.copy_from_slice(bytes);
    block
}

/// Key-dependent masks `L_*`, `L_$` and `L_i`.
#[derive(Zeroize, ZeroizeOnDrop)]
struct Masks {
    star: Block,
    dollar: Block,
    l: Vec<Block>,
}

impl Masks {
    /// `L_{ntz(index)}`, extending the table on demand.
    fn for_index(&mut self, index: u64) -> Block {
        let ntz = index.trailing_zeros() as usize;
        while self.l.len() <= ntz {
            let next = match self.l.last() {
                Some(last) => double(last),
                None => double(&self.dollar),
            };
            self.l.push(next);
        }
        self.l[ntz]
    }
}

/// Running state over one input: associated data or message.
#[derive(Zeroize, ZeroizeOnDrop)]
struct Lane {
    offset: Block,
    /// `Sum` for associated data, `Checksum` for the message.
    sum: Block,
    index: u64,
    pending: Block,
    filled: usize,
}

impl Lane {
    fn new(offset: Block) -> Self {
        Self {
            offset,
            sum: [0u8; 16],
            index: 0,
            pending: [0u8; 16],
            filled: 0,
        }
    }

    /// Move bytes from `data` into the pending block, returning how many
    /// were taken.
    fn top_up(&mut self, data: &[u8]) -> usize {
        let take = (16 - self.filled).min(data.len());
        self.pending[self.filled..self.filled + take].copy_from_slice(&data[..take]);
        self.filled += take;
        take
    }

    /// Hold a tail shorter than a block. The pending block must be empty.
    fn stash(&mut self, rest: &[u8]) {
        self.pending[..rest.len()].copy_from_slice(rest);
        self.filled = rest.len();
    }
}

pub(super) struct Ocb<C> {
    cipher: C,
    masks: Masks,
    aad: Lane,
    data: Lane,
    direction: Direction,
    progress: Progress,
}

impl<C> Ocb<C>
where
    C: BlockEncrypt + BlockDecrypt + KeyInit + BlockSizeUser<BlockSize = U16>,
{
    pub(super) fn new(key: &[u8], nonce: &[u8], direction: Direction) -> Result<Self> {
        if nonce.len() != NONCE_LEN {
            return Err(invalid_length("OCB nonce"));
        }
        let cipher = C::new_from_slice(key).map_err(|_| invalid_length("AES key"))?;

        let star = encipher(&cipher, &[0u8; 16]);
        let dollar = double(&star);
        let mut masks = Masks {
            star,
            dollar,
            l: Vec::new(),
        };
        masks.for_index(1);

        let offset = initial_offset(&cipher, nonce);
        Ok(Self {
            cipher,
            masks,
            aad: Lane::new([0u8; 16]),
            data: Lane::new(offset),
            direction,
            progress: Progress::Aad,
        })
    }

    fn hash_block(&mut self, block: &Block) {
        self.aad.index += 1;
        let l = self.masks.for_index(self.aad.index);
        xor_in(&mut self.aad.offset, &l);
        let mut input = *block;
        xor_in(&mut input, &self.aad.offset);
        let out = encipher(&self.cipher, &input);
        xor_in(&mut self.aad.sum, &out);
    }

    fn crypt_block(&mut self, block: &Block) -> Block {
        self.data.index += 1;
        let l = self.masks.for_index(self.data.index);
        xor_in(&mut self.data.offset, &l);

        let mut input = *block;
        xor_in(&mut input, &self.data.offset);
        let mut out = match self.direction {
            Direction::Encrypt => encipher(&self.cipher, &input),
            Direction::Decrypt => decipher(&self.cipher, &input),
        };
        xor_in(&mut out, &self.data.offset);

        let plain = match self.direction {
            Direction::Encrypt => *block,
            Direction::Decrypt => out,
        };
        xor_in(&mut self.data.sum, &plain);
        out
    }

    /// `HASH(K, A)`, closing the associated data lane.
    fn aad_hash(&mut self) -> Block {
        if self.aad.filled > 0 {
            let n = self.aad.filled;
            xor_in(&mut self.aad.offset, &self.masks.star);
            let mut input = [0u8; 16];
            input[..n].copy_from_slice(&self.aad.pending[..n]);
            input[n] = 0x80;
            xor_in(&mut input, &self.aad.offset);
            let out = encipher(&self.cipher, &input);
            xor_in(&mut self.aad.sum, &out);
            self.aad.filled = 0;
        }
        self.aad.sum
    }

    /// Process the held tail and compute the tag.
    fn finish(&mut self) -> (Zeroizing<Vec<u8>>, Vec<u8>) {
        let mut tail = Zeroizing::new(Vec::new());
        if self.data.filled > 0 {
            let n = self.data.filled;
            xor_in(&mut self.data.offset, &self.masks.star);
            let pad = encipher(&self.cipher, &self.data.offset);
            tail.extend(
                self.data.pending[..n]
                    .iter()
                    .zip(&pad)
                    .map(|(byte, key)| byte ^ key),
            );

            let mut padded = [0u8; 16];
            match self.direction {
                Direction::Encrypt => padded[..n].copy_from_slice(&self.data.pending[..n]),
                Direction::Decrypt => padded[..n].copy_from_slice(&tail),
            }
            padded[n] = 0x80;
            xor_in(&mut self.data.sum, &padded);
            self.data.filled = 0;
        }

        let mut input = self.data.sum;
        xor_in(&mut input, &self.data.offset);
        xor_in(&mut input, &self.masks.dollar);
        let mut tag = encipher(&self.cipher, &input);
        let hash = self.aad_hash();
        xor_in(&mut tag, &hash);
        (tail, tag.to_vec())
    }
}

fn encipher<C: BlockEncrypt + BlockSizeUser<BlockSize = U16>>(cipher: &C, block: &Block) -> Block {
    let mut buffer = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buffer);
    to_block(&buffer)
}

fn decipher<C: BlockDecrypt + BlockSizeUser<BlockSize = U16>>(cipher: &C, block: &Block) -> Block {
    let mut buffer = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut buffer);
    to_block(&buffer)
}

/// `Offset_0` for a 96-bit nonce and a 128-bit tag.
fn initial_offset<C: BlockEncrypt + BlockSizeUser<BlockSize = U16>>(
    cipher: &C,
    nonce: &[u8],
) -> Block {
    // 0^7 (tag length mod 128) || 0* || 1 || N
    let mut block = [0u8; 16];
    block[16 - nonce.len()..].copy_from_slice(nonce);
    block[15 - nonce.len()] |= 0x01;

    let bottom = usize::from(block[15] & 0x3F);
    block[15] &= 0xC0;
    let ktop = encipher(cipher, &block);

    let mut stretch = [0u8; 24];
    stretch[..16].copy_from_slice(&ktop);
    for i in 0..8 {
        stretch[16 + i] = ktop[i] ^ ktop[i + 1];
    }

    // Bits [bottom, bottom + 128) of the stretch.
    let (bytes, bits) = (bottom / 8, bottom % 8);
    let mut offset = [0u8; 16];
    for (i, out) in offset.iter_mut().enumerate() {
        let high = stretch[i + bytes] << bits;
        let low = if bits == 0 {
            0
        } else {
            stretch[i + bytes + 1] >> (8 - bits)
        };
        *out = high | low;
    }
    offset
}

impl<C> AeadProvider for Ocb<C>
where
    C: BlockEncrypt + BlockDecrypt + KeyInit + BlockSizeUser<BlockSize = U16> + Send,
{
    fn update_aad(&mut self, mut aad: &[u8]) -> Result<()> {
        self.progress.before_aad()?;
        if self.aad.filled > 0 {
            let taken = self.aad.top_up(aad);
            aad = &aad[taken..];
            if self.aad.filled < 16 {
                return Ok(());
            }
            let block = self.aad.pending;
            self.aad.filled = 0;
            self.hash_block(&block);
        }

        let mut blocks = aad.chunks_exact(16);
        for chunk in &mut blocks {
            self.hash_block(&to_block(chunk));
        }
        self.aad.stash(blocks.remainder());
        Ok(())
    }

    fn update(&mut self, mut data: &[u8]) -> Result<Vec<u8>> {
        self.progress.before_data()?;
        self.progress = Progress::Data;

        let mut out = Vec::with_capacity(self.data.filled + data.len());
        if self.data.filled > 0 {
            let taken = self.data.top_up(data);
            data = &data[taken..];
            if self.data.filled < 16 {
                return Ok(out);
            }
            let block = self.data.pending;
            self.data.filled = 0;
            out.extend_from_slice(&self.crypt_block(&block));
        }

        let mut blocks = data.chunks_exact(16);
        for chunk in &mut blocks {
            out.extend_from_slice(&self.crypt_block(&to_block(chunk)));
        }
        self.data.stash(blocks.remainder());
        Ok(out)
    }

    fn finalize_encrypt(&mut self) -> Result<Sealed> {
        self.progress
            .before_finalize(Direction::Encrypt, self.direction)?;
        self.progress = Progress::Finished;
        let (mut tail, tag) = self.finish();
        Ok(Sealed {
            output: std::mem::take(&mut *tail),
            tag,
        })
    }

    fn finalize_decrypt(&mut self, expected_tag: &[u8]) -> Result<Verified> {
        self.progress
            .before_finalize(Direction::Decrypt, self.direction)?;
        self.progress = Progress::Finished;
        let (mut tail, tag) = self.finish();
        if tags_match(&tag, expected_tag) {
            Ok(Verified::Authentic(std::mem::take(&mut *tail)))
        } else {
            Ok(Verified::Rejected)
        }
    }
}
