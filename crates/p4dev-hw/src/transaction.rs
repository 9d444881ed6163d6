//! Bit serialization of rule fields into 32-bit hardware transactions.
//!
//! Every engine builds its keys, masks and action records by packing
//! variable-width fields back to back into a growing array of 32-bit words.
//! Bit 0 is the least significant bit of word 0; each field is packed
//! little-endian, byte 0 of the value landing in the lowest bits.

use crate::error::{P4DevError, P4DevResult};
use byteorder::{ByteOrder, LittleEndian};

/// Width of one hardware transaction in bits.
pub const WORD_BITS: u32 = 32;

/// Returns the number of 32-bit words needed to hold `bits` bits.
pub const fn word_count(bits: u32) -> usize {
    bits.div_ceil(WORD_BITS) as usize
}

/// Packs the low `width` bits of `data` into `out` at bit offset `*cursor`.
///
/// `out` grows to `ceil((*cursor + width) / 32)` words; bits already present
/// in the first touched word are OR-merged. Bits of `data` above `width`
/// are dropped. On success the cursor advances by `width`.
///
/// # Errors
///
/// Returns [`P4DevError::ByteArrayTooShort`] if `data` holds fewer than
/// `width` bits. Nothing is written in that case.
pub fn serialize(data: &[u8], width: u32, cursor: &mut u32, out: &mut Vec<u32>) -> P4DevResult<()> {
    if (data.len() as u64) * 8 < u64::from(width) {
        return Err(P4DevError::ByteArrayTooShort {
            bytes: data.len(),
            width,
        });
    }

    let needed = word_count(*cursor + width);
    if out.len() < needed {
        out.resize(needed, 0);
    }

    let relevant = width.div_ceil(8) as usize;
    for (index, byte) in data[..relevant].iter().enumerate() {
        let consumed = index as u32 * 8;
        let bits = (width - consumed).min(8);
        let value = u32::from(*byte) & (0xff >> (8 - bits));

        let pos = *cursor + consumed;
        let word = (pos / WORD_BITS) as usize;
        let shift = pos % WORD_BITS;
        out[word] |= value << shift;
        if shift + bits > WORD_BITS {
            out[word + 1] |= value >> (WORD_BITS - shift);
        }
    }

    *cursor += width;
    Ok(())
}

/// Extracts `width` bits starting at bit `offset` of `words`.
///
/// The result is little-endian and `ceil(width / 8)` bytes long. Bits past
/// the end of `words` read as zero.
pub fn deserialize(words: &[u32], offset: u32, width: u32) -> Vec<u8> {
    let mut bytes = vec![0u8; width.div_ceil(8) as usize];
    for bit in 0..width {
        let pos = offset + bit;
        let set = words
            .get((pos / WORD_BITS) as usize)
            .is_some_and(|word| word >> (pos % WORD_BITS) & 1 == 1);
        if set {
            bytes[(bit / 8) as usize] |= 1 << (bit % 8);
        }
    }
    bytes
}

/// Reinterprets words as little-endian bytes.
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    let mut bytes = vec![0u8; words.len() * 4];
    LittleEndian::write_u32_into(words, &mut bytes);
    bytes
}

/// Reinterprets little-endian bytes as words, zero-padding the last word.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    let mut padded = bytes.to_vec();
    padded.resize(bytes.len().div_ceil(4) * 4, 0);
    let mut words = vec![0u32; padded.len() / 4];
    LittleEndian::read_u32_into(&padded, &mut words);
    words
}

/// A serialized bit stream with its exact length.
///
/// Wraps the word array and cursor that [`serialize`] threads between
/// calls, so a key or record can be built field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    words: Vec<u32>,
    bits: u32,
}

impl Transaction {
    /// Creates an empty transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the low `width` bits of `data`.
    pub fn push(&mut self, data: &[u8], width: u32) -> P4DevResult<()> {
        serialize(data, width, &mut self.bits, &mut self.words)
    }

    /// Returns the serialized words, least significant first.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Returns the number of serialized bits.
    pub fn bit_len(&self) -> u32 {
        self.bits
    }

    /// Returns true if nothing has been serialized.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Returns the words zero-extended to `len` words.
    pub fn padded(&self, len: usize) -> Vec<u32> {
        let mut words = self.words.clone();
        if words.len() < len {
            words.resize(len, 0);
        }
        words
    }

    /// Consumes the transaction and returns its words.
    pub fn into_words(self) -> Vec<u32> {
        self.words
    }
}
