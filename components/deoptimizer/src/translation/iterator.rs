//! Forward-only operand reader over a translation buffer.

use super::buffer::decode_operand;
use crate::error::TranslationError;

/// Sequential reader returning one decoded operand per call.
///
/// There is no random access; a translation is consumed front to back.
#[derive(Debug, Clone)]
pub struct TranslationIterator<'a> {
    buffer: &'a [u8],
    index: usize,
}

impl<'a> TranslationIterator<'a> {
    /// Creates an iterator positioned at `index`.
    pub fn new(buffer: &'a [u8], index: usize) -> Result<Self, TranslationError> {
        if index > buffer.len() {
            return Err(TranslationError::IndexOutOfRange {
                index,
                len: buffer.len(),
            });
        }
        Ok(Self { buffer, index })
    }

    /// Decodes the next operand.
    pub fn next(&mut self) -> Result<i32, TranslationError> {
        decode_operand(self.buffer, &mut self.index)
    }

    /// Whether unread bytes remain.
    pub fn has_next(&self) -> bool {
        self.index < self.buffer.len()
    }

    /// Discards exactly `n` operands.
    pub fn skip(&mut self, n: usize) -> Result<(), TranslationError> {
        for _ in 0..n {
            self.next()?;
        }
        Ok(())
    }

    /// Byte offset of the next read.
    pub fn position(&self) -> usize {
        self.index
    }
}
