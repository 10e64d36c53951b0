//! Tagged value representation shared by the heap and the deoptimizer.
//!
//! Optimized code keeps values in raw 64-bit machine words. The deoptimizer
//! copies those words into reconstructed frames and must be able to tell a
//! small integer from a heap reference from an oddball, so this module defines
//! both the structured [`Value`] enum and its word encoding.
//!
//! # Word Tagging
//!
//! The low two bits of a word select its kind:
//! - `00`: Small integer (Smi), payload in the upper 32 bits
//! - `01`: Heap reference, object id in bits 2..
//! - `10`: Oddball (undefined, null, true, false, the hole, arguments marker)
//! - `11`: Never produced; decoding fails

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine word as stored in registers and frame slots.
pub type Word = u64;

/// Native code address.
pub type Address = usize;

const TAG_MASK: Word = 0b11;
const SMI_TAG: Word = 0b00;
const HEAP_TAG: Word = 0b01;
const ODDBALL_TAG: Word = 0b10;
const TAG_BITS: u32 = 2;

const ODDBALL_UNDEFINED: Word = 0;
const ODDBALL_NULL: Word = 1;
const ODDBALL_TRUE: Word = 2;
const ODDBALL_FALSE: Word = 3;
const ODDBALL_THE_HOLE: Word = 4;
const ODDBALL_ARGUMENTS_MARKER: Word = 5;

/// Reference to an object in the managed heap.
///
/// Heap objects never move, so a reference stays valid for as long as the
/// object is reachable from a root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapRef(pub u32);

impl HeapRef {
    /// Index of the object in the heap's object table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for HeapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Represents any value a frame slot may hold once deoptimization is done.
///
/// Doubles and integers outside the small-integer range never appear inline;
/// they are boxed as heap numbers and referenced through [`Value::HeapObject`].
///
/// # Examples
///
/// ```
/// use core_types::Value;
///
/// let five = Value::Smi(5);
/// assert_eq!(Value::from_word(five.to_word()), Some(five));
/// assert!(Value::Undefined.is_oddball());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// The undefined value
    Undefined,
    /// The null value
    Null,
    /// Boolean true or false
    Boolean(bool),
    /// Small integer stored inline in the word
    Smi(i32),
    /// Reference to a heap object (heap number, captured object, function, ...)
    HeapObject(HeapRef),
    /// Marker for uninitialized slots
    TheHole,
    /// Placeholder for a slot whose object is materialized later
    ArgumentsMarker,
}

impl Value {
    /// Encodes this value as a tagged machine word.
    pub fn to_word(self) -> Word {
        match self {
            Value::Smi(n) => ((n as i64 as u64) << 32) | SMI_TAG,
            Value::HeapObject(r) => ((r.0 as Word) << TAG_BITS) | HEAP_TAG,
            Value::Undefined => oddball_word(ODDBALL_UNDEFINED),
            Value::Null => oddball_word(ODDBALL_NULL),
            Value::Boolean(true) => oddball_word(ODDBALL_TRUE),
            Value::Boolean(false) => oddball_word(ODDBALL_FALSE),
            Value::TheHole => oddball_word(ODDBALL_THE_HOLE),
            Value::ArgumentsMarker => oddball_word(ODDBALL_ARGUMENTS_MARKER),
        }
    }

    /// Decodes a tagged machine word.
    ///
    /// Returns `None` for words that no tagged value encodes to, such as raw
    /// return addresses or a Smi word with garbage in its low half.
    pub fn from_word(word: Word) -> Option<Value> {
        match word & TAG_MASK {
            SMI_TAG => {
                if word & 0xFFFF_FFFF != 0 {
                    return None;
                }
                Some(Value::Smi(((word as i64) >> 32) as i32))
            }
            HEAP_TAG => {
                let id = word >> TAG_BITS;
                u32::try_from(id).ok().map(|id| Value::HeapObject(HeapRef(id)))
            }
            ODDBALL_TAG => match word >> TAG_BITS {
                ODDBALL_UNDEFINED => Some(Value::Undefined),
                ODDBALL_NULL => Some(Value::Null),
                ODDBALL_TRUE => Some(Value::Boolean(true)),
                ODDBALL_FALSE => Some(Value::Boolean(false)),
                ODDBALL_THE_HOLE => Some(Value::TheHole),
                ODDBALL_ARGUMENTS_MARKER => Some(Value::ArgumentsMarker),
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns the heap reference if this value points into the heap.
    pub fn as_heap_ref(self) -> Option<HeapRef> {
        match self {
            Value::HeapObject(r) => Some(r),
            _ => None,
        }
    }

    /// Returns the small integer payload, if any.
    pub fn as_smi(self) -> Option<i32> {
        match self {
            Value::Smi(n) => Some(n),
            _ => None,
        }
    }

    /// Returns whether this value is one of the immortal oddballs.
    pub fn is_oddball(self) -> bool {
        matches!(
            self,
            Value::Undefined
                | Value::Null
                | Value::Boolean(_)
                | Value::TheHole
                | Value::ArgumentsMarker
        )
    }

    /// Tags `n` as a small integer if it fits `range`.
    pub fn smi_in_range(n: i64, range: SmiRange) -> Option<Value> {
        if range.contains(n) {
            Some(Value::Smi(n as i32))
        } else {
            None
        }
    }
}

fn oddball_word(kind: Word) -> Word {
    (kind << TAG_BITS) | ODDBALL_TAG
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Smi(n) => write!(f, "{}", n),
            Value::HeapObject(r) => write!(f, "<heap {}>", r),
            Value::TheHole => write!(f, "<the hole>"),
            Value::ArgumentsMarker => write!(f, "<arguments marker>"),
        }
    }
}

/// Range of integers representable as inline small integers.
///
/// The width is a property of the host build (31-bit payloads on
/// pointer-compressed layouts, full 32-bit payloads otherwise), so it is
/// configured rather than hardcoded. Native integers outside the range are
/// boxed as heap numbers during deoptimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmiRange {
    bits: u8,
}

impl SmiRange {
    /// 31-bit payloads: `[-2^30, 2^30 - 1]`.
    pub const BITS_31: SmiRange = SmiRange { bits: 31 };
    /// 32-bit payloads: the full `i32` range.
    pub const BITS_32: SmiRange = SmiRange { bits: 32 };

    /// Creates a range with the given payload width (2..=32 bits).
    pub fn new(bits: u8) -> Option<Self> {
        if (2..=32).contains(&bits) {
            Some(SmiRange { bits })
        } else {
            None
        }
    }

    /// Payload width in bits.
    pub fn bits(self) -> u8 {
        self.bits
    }

    /// Smallest representable small integer.
    pub fn min_value(self) -> i64 {
        -(1i64 << (self.bits - 1))
    }

    /// Largest representable small integer.
    pub fn max_value(self) -> i64 {
        (1i64 << (self.bits - 1)) - 1
    }

    /// Returns whether `n` can be tagged inline.
    pub fn contains(self, n: i64) -> bool {
        n >= self.min_value() && n <= self.max_value()
    }
}

impl Default for SmiRange {
    fn default() -> Self {
        SmiRange::BITS_31
    }
}
