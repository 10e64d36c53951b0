//! Translation encoding
//!
//! A translation is the per-deoptimization-point recipe for rebuilding the
//! unoptimized frames of an optimized activation. All translations of one
//! code object share a single append-only byte buffer; each deoptimization
//! point records the index where its translation starts.
//!
//! # Stream layout
//!
//! ```text
//! BEGIN frame_count js_frame_count
//!   <frame opcode> <operands...>      one group per frame, outermost first
//!     <value command> <operand...>    exactly `height` per frame group
//!   ...
//! ```
//!
//! Operands are variable-length signed integers (see [`buffer`]).

pub mod buffer;
pub mod builder;
pub mod disassembler;
pub mod iterator;
pub mod reader;

pub use buffer::TranslationBuffer;
pub use builder::Translation;
pub use disassembler::{disassemble, validate, TranslationSummary};
pub use iterator::TranslationIterator;
pub use reader::{FrameKind, ObjectKind, TranslationHeader, TranslationReader, ValueCommand};

use crate::error::TranslationError;
use std::fmt;

/// Literal id standing for the optimized function itself.
///
/// Only the bottommost JS frame may use it; inlined frames always name their
/// closure through the literal pool.
pub const SELF_LITERAL_ID: i32 = -239;

/// Translation opcodes, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Header: frame count, JS frame count
    Begin = 0,
    /// Node id, function literal id, height
    JsFrame,
    /// Constructor literal id, height
    ConstructStubFrame,
    /// Getter literal id
    GetterStubFrame,
    /// Setter literal id
    SetterStubFrame,
    /// Function literal id, height
    ArgumentsAdaptorFrame,
    /// Height
    CompiledStubFrame,
    /// Index of a previously started object
    DuplicatedObject,
    /// Field count
    ArgumentsObject,
    /// Field count
    CapturedObject,
    /// Register code
    Register,
    /// Register code
    Int32Register,
    /// Register code
    Uint32Register,
    /// Double register code
    DoubleRegister,
    /// Stack slot index
    StackSlot,
    /// Stack slot index
    Int32StackSlot,
    /// Stack slot index
    Uint32StackSlot,
    /// Stack slot index
    DoubleStackSlot,
    /// Literal pool index
    Literal,
}

impl Opcode {
    /// Every opcode, in wire order.
    pub const ALL: [Opcode; 19] = [
        Opcode::Begin,
        Opcode::JsFrame,
        Opcode::ConstructStubFrame,
        Opcode::GetterStubFrame,
        Opcode::SetterStubFrame,
        Opcode::ArgumentsAdaptorFrame,
        Opcode::CompiledStubFrame,
        Opcode::DuplicatedObject,
        Opcode::ArgumentsObject,
        Opcode::CapturedObject,
        Opcode::Register,
        Opcode::Int32Register,
        Opcode::Uint32Register,
        Opcode::DoubleRegister,
        Opcode::StackSlot,
        Opcode::Int32StackSlot,
        Opcode::Uint32StackSlot,
        Opcode::DoubleStackSlot,
        Opcode::Literal,
    ];

    /// Decodes an opcode value read from a stream.
    pub fn from_i32(value: i32) -> Result<Opcode, TranslationError> {
        usize::try_from(value)
            .ok()
            .and_then(|index| Opcode::ALL.get(index).copied())
            .ok_or(TranslationError::UnknownOpcode { value })
    }

    /// Number of operands following the opcode.
    pub fn number_of_operands(self) -> usize {
        match self {
            Opcode::JsFrame => 3,
            Opcode::Begin | Opcode::ConstructStubFrame | Opcode::ArgumentsAdaptorFrame => 2,
            Opcode::GetterStubFrame
            | Opcode::SetterStubFrame
            | Opcode::CompiledStubFrame
            | Opcode::DuplicatedObject
            | Opcode::ArgumentsObject
            | Opcode::CapturedObject
            | Opcode::Register
            | Opcode::Int32Register
            | Opcode::Uint32Register
            | Opcode::DoubleRegister
            | Opcode::StackSlot
            | Opcode::Int32StackSlot
            | Opcode::Uint32StackSlot
            | Opcode::DoubleStackSlot
            | Opcode::Literal => 1,
        }
    }

    /// Whether this opcode starts a frame group.
    pub fn is_frame(self) -> bool {
        matches!(
            self,
            Opcode::JsFrame
                | Opcode::ConstructStubFrame
                | Opcode::GetterStubFrame
                | Opcode::SetterStubFrame
                | Opcode::ArgumentsAdaptorFrame
                | Opcode::CompiledStubFrame
        )
    }

    /// Whether this opcode is a value command.
    pub fn is_value(self) -> bool {
        self != Opcode::Begin && !self.is_frame()
    }

    /// Upper-case mnemonic used in traces.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Begin => "BEGIN",
            Opcode::JsFrame => "JS_FRAME",
            Opcode::ConstructStubFrame => "CONSTRUCT_STUB_FRAME",
            Opcode::GetterStubFrame => "GETTER_STUB_FRAME",
            Opcode::SetterStubFrame => "SETTER_STUB_FRAME",
            Opcode::ArgumentsAdaptorFrame => "ARGUMENTS_ADAPTOR_FRAME",
            Opcode::CompiledStubFrame => "COMPILED_STUB_FRAME",
            Opcode::DuplicatedObject => "DUPLICATED_OBJECT",
            Opcode::ArgumentsObject => "ARGUMENTS_OBJECT",
            Opcode::CapturedObject => "CAPTURED_OBJECT",
            Opcode::Register => "REGISTER",
            Opcode::Int32Register => "INT32_REGISTER",
            Opcode::Uint32Register => "UINT32_REGISTER",
            Opcode::DoubleRegister => "DOUBLE_REGISTER",
            Opcode::StackSlot => "STACK_SLOT",
            Opcode::Int32StackSlot => "INT32_STACK_SLOT",
            Opcode::Uint32StackSlot => "UINT32_STACK_SLOT",
            Opcode::DoubleStackSlot => "DOUBLE_STACK_SLOT",
            Opcode::Literal => "LITERAL",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
