//! Translation byte buffer and operand encoding
//!
//! Operands are zigzag-mapped to unsigned (so small negative numbers stay
//! short and `i32::MIN` has an encoding) and then written as little-endian
//! 7-bit groups. The low bit of each byte is the continuation flag; the
//! payload sits in the upper seven bits. Every `i32` takes one to five bytes.

use crate::error::TranslationError;

/// Longest encoding of a 32-bit operand, in bytes.
pub const MAX_ENCODED_LENGTH: usize = 5;

/// Maps a signed operand onto an unsigned one, interleaving signs.
pub fn zigzag_encode(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Inverse of [`zigzag_encode`].
pub fn zigzag_decode(bits: u32) -> i32 {
    ((bits >> 1) as i32) ^ -((bits & 1) as i32)
}

/// Appends the encoding of `value` to `out`.
pub fn encode_operand(value: i32, out: &mut Vec<u8>) {
    let mut bits = zigzag_encode(value);
    loop {
        let group = (bits & 0x7F) as u8;
        bits >>= 7;
        if bits == 0 {
            out.push(group << 1);
            return;
        }
        out.push((group << 1) | 1);
    }
}

/// Decodes one operand starting at `*position`, advancing it.
pub fn decode_operand(bytes: &[u8], position: &mut usize) -> Result<i32, TranslationError> {
    let start = *position;
    let mut bits: u32 = 0;
    for group in 0..MAX_ENCODED_LENGTH {
        let byte = *bytes
            .get(*position)
            .ok_or(TranslationError::UnexpectedEnd { position: *position })?;
        *position += 1;
        let payload = u32::from(byte >> 1);
        // The fifth group may only carry the top four bits.
        if group == MAX_ENCODED_LENGTH - 1 && payload > 0x0F {
            return Err(TranslationError::Overlong { position: start });
        }
        bits |= payload << (7 * group);
        if byte & 1 == 0 {
            return Ok(zigzag_decode(bits));
        }
    }
    Err(TranslationError::Overlong { position: start })
}

/// Append-only buffer shared by every translation of one code object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationBuffer {
    contents: Vec<u8>,
}

impl TranslationBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset the next translation will start at.
    pub fn current_index(&self) -> usize {
        self.contents.len()
    }

    /// Appends one operand.
    pub fn add(&mut self, value: i32) {
        encode_operand(value, &mut self.contents);
    }

    /// Encoded bytes so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.contents
    }

    /// Finishes the buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.contents
    }
}
