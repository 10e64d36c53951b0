//! Typed decoding of translation commands.

use super::{Opcode, TranslationIterator};
use crate::arch::{DoubleRegister, Register};
use crate::error::TranslationError;
use crate::frame_description::FrameType;
use core_types::BailoutId;

/// Decoded `BEGIN` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationHeader {
    /// Frames to build, synthetic frames included
    pub frame_count: usize,
    /// JS frames among them
    pub js_frame_count: usize,
}

/// A decoded frame-group opcode with its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Unoptimized JS frame resuming at `node_id`
    JsFrame {
        /// Node id to resume at
        node_id: BailoutId,
        /// Function literal
        literal_id: i32,
        /// Translated values: receiver, parameters, locals
        height: u32,
    },
    /// Frame of the generic construct stub
    ConstructStub {
        /// Constructor literal
        literal_id: i32,
        /// Receiver plus arguments
        height: u32,
    },
    /// Frame of a getter IC stub
    GetterStub {
        /// Getter literal
        literal_id: i32,
    },
    /// Frame of a setter IC stub
    SetterStub {
        /// Setter literal
        literal_id: i32,
    },
    /// Arguments adaptor frame for a call with mismatched arity
    ArgumentsAdaptor {
        /// Callee literal
        literal_id: i32,
        /// Receiver plus actual arguments
        height: u32,
    },
    /// Stub failure frame of a compiled code stub
    CompiledStub {
        /// Stub parameters
        height: u32,
    },
}

impl FrameKind {
    /// Value commands that follow this frame opcode.
    pub fn height(&self) -> u32 {
        match *self {
            FrameKind::JsFrame { height, .. }
            | FrameKind::ConstructStub { height, .. }
            | FrameKind::ArgumentsAdaptor { height, .. }
            | FrameKind::CompiledStub { height } => height,
            FrameKind::GetterStub { .. } => 1,
            FrameKind::SetterStub { .. } => 2,
        }
    }

    /// Function literal, if the kind names one.
    pub fn literal_id(&self) -> Option<i32> {
        match *self {
            FrameKind::JsFrame { literal_id, .. }
            | FrameKind::ConstructStub { literal_id, .. }
            | FrameKind::GetterStub { literal_id }
            | FrameKind::SetterStub { literal_id }
            | FrameKind::ArgumentsAdaptor { literal_id, .. } => Some(literal_id),
            FrameKind::CompiledStub { .. } => None,
        }
    }

    /// Whether this is a JS frame.
    pub fn is_js_frame(&self) -> bool {
        matches!(self, FrameKind::JsFrame { .. })
    }

    /// Stack frame type of the output frame.
    pub fn frame_type(&self) -> FrameType {
        match self {
            FrameKind::JsFrame { .. } => FrameType::JavaScript,
            FrameKind::ConstructStub { .. } => FrameType::Construct,
            FrameKind::GetterStub { .. } | FrameKind::SetterStub { .. } => FrameType::Internal,
            FrameKind::ArgumentsAdaptor { .. } => FrameType::ArgumentsAdaptor,
            FrameKind::CompiledStub { .. } => FrameType::StubFailureTrampoline,
        }
    }

    /// Opcode this kind was decoded from.
    pub fn opcode(&self) -> Opcode {
        match self {
            FrameKind::JsFrame { .. } => Opcode::JsFrame,
            FrameKind::ConstructStub { .. } => Opcode::ConstructStubFrame,
            FrameKind::GetterStub { .. } => Opcode::GetterStubFrame,
            FrameKind::SetterStub { .. } => Opcode::SetterStubFrame,
            FrameKind::ArgumentsAdaptor { .. } => Opcode::ArgumentsAdaptorFrame,
            FrameKind::CompiledStub { .. } => Opcode::CompiledStubFrame,
        }
    }
}

/// Representation of a nested object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Object whose allocation was eliminated; fields in declaration order
    Captured,
    /// Arguments object of the owning JS frame
    Arguments,
}

/// A decoded value command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueCommand {
    /// Tagged register
    Register(Register),
    /// Signed 32-bit register
    Int32Register(Register),
    /// Unsigned 32-bit register
    Uint32Register(Register),
    /// Double register
    DoubleRegister(DoubleRegister),
    /// Tagged stack slot
    StackSlot(i32),
    /// Signed 32-bit stack slot
    Int32StackSlot(i32),
    /// Unsigned 32-bit stack slot
    Uint32StackSlot(i32),
    /// Double stack slot
    DoubleStackSlot(i32),
    /// Literal pool entry
    Literal(i32),
    /// Back-reference to a previously started object
    DuplicatedObject(u32),
    /// Start of a nested object with `field_count` field commands
    Object {
        /// Representation
        kind: ObjectKind,
        /// Field commands that follow
        field_count: u32,
    },
}

impl ValueCommand {
    /// Opcode this command was decoded from.
    pub fn opcode(&self) -> Opcode {
        match self {
            ValueCommand::Register(_) => Opcode::Register,
            ValueCommand::Int32Register(_) => Opcode::Int32Register,
            ValueCommand::Uint32Register(_) => Opcode::Uint32Register,
            ValueCommand::DoubleRegister(_) => Opcode::DoubleRegister,
            ValueCommand::StackSlot(_) => Opcode::StackSlot,
            ValueCommand::Int32StackSlot(_) => Opcode::Int32StackSlot,
            ValueCommand::Uint32StackSlot(_) => Opcode::Uint32StackSlot,
            ValueCommand::DoubleStackSlot(_) => Opcode::DoubleStackSlot,
            ValueCommand::Literal(_) => Opcode::Literal,
            ValueCommand::DuplicatedObject(_) => Opcode::DuplicatedObject,
            ValueCommand::Object {
                kind: ObjectKind::Captured,
                ..
            } => Opcode::CapturedObject,
            ValueCommand::Object {
                kind: ObjectKind::Arguments,
                ..
            } => Opcode::ArgumentsObject,
        }
    }
}

/// Reads one translation as typed commands.
#[derive(Debug, Clone)]
pub struct TranslationReader<'a> {
    iterator: TranslationIterator<'a>,
}

impl<'a> TranslationReader<'a> {
    /// Positions a reader at the translation starting at `index`.
    pub fn new(bytes: &'a [u8], index: usize) -> Result<Self, TranslationError> {
        Ok(Self {
            iterator: TranslationIterator::new(bytes, index)?,
        })
    }

    /// Byte offset of the next read.
    pub fn position(&self) -> usize {
        self.iterator.position()
    }

    fn opcode(&mut self) -> Result<Opcode, TranslationError> {
        Opcode::from_i32(self.iterator.next()?)
    }

    fn non_negative(&mut self, opcode: Opcode) -> Result<u32, TranslationError> {
        let value = self.iterator.next()?;
        u32::try_from(value).map_err(|_| TranslationError::InvalidOperand { opcode, value })
    }

    fn register(&mut self, opcode: Opcode) -> Result<Register, TranslationError> {
        let value = self.iterator.next()?;
        Register::from_code(value).ok_or(TranslationError::InvalidOperand { opcode, value })
    }

    fn double_register(&mut self, opcode: Opcode) -> Result<DoubleRegister, TranslationError> {
        let value = self.iterator.next()?;
        DoubleRegister::from_code(value).ok_or(TranslationError::InvalidOperand { opcode, value })
    }

    /// Reads the `BEGIN` header.
    pub fn read_header(&mut self) -> Result<TranslationHeader, TranslationError> {
        let opcode = self.opcode()?;
        if opcode != Opcode::Begin {
            return Err(TranslationError::UnexpectedOpcode {
                expected: "BEGIN",
                found: opcode,
            });
        }
        let frame_count = self.iterator.next()?;
        let js_frame_count = self.iterator.next()?;
        if frame_count < 1 || js_frame_count < 0 || js_frame_count > frame_count {
            return Err(TranslationError::FrameCountMismatch {
                frame_count,
                js_frame_count,
            });
        }
        Ok(TranslationHeader {
            frame_count: frame_count as usize,
            js_frame_count: js_frame_count as usize,
        })
    }

    /// Reads the opcode and operands starting a frame group.
    pub fn read_frame(&mut self) -> Result<FrameKind, TranslationError> {
        let opcode = self.opcode()?;
        let kind = match opcode {
            Opcode::JsFrame => {
                let node_id = BailoutId(self.iterator.next()?);
                let literal_id = self.iterator.next()?;
                let height = self.non_negative(opcode)?;
                FrameKind::JsFrame {
                    node_id,
                    literal_id,
                    height,
                }
            }
            Opcode::ConstructStubFrame => FrameKind::ConstructStub {
                literal_id: self.iterator.next()?,
                height: self.non_negative(opcode)?,
            },
            Opcode::GetterStubFrame => FrameKind::GetterStub {
                literal_id: self.iterator.next()?,
            },
            Opcode::SetterStubFrame => FrameKind::SetterStub {
                literal_id: self.iterator.next()?,
            },
            Opcode::ArgumentsAdaptorFrame => FrameKind::ArgumentsAdaptor {
                literal_id: self.iterator.next()?,
                height: self.non_negative(opcode)?,
            },
            Opcode::CompiledStubFrame => FrameKind::CompiledStub {
                height: self.non_negative(opcode)?,
            },
            found => {
                return Err(TranslationError::UnexpectedOpcode {
                    expected: "a frame opcode",
                    found,
                })
            }
        };
        Ok(kind)
    }

    /// Reads one value command.
    pub fn read_value(&mut self) -> Result<ValueCommand, TranslationError> {
        let opcode = self.opcode()?;
        let command = match opcode {
            Opcode::Register => ValueCommand::Register(self.register(opcode)?),
            Opcode::Int32Register => ValueCommand::Int32Register(self.register(opcode)?),
            Opcode::Uint32Register => ValueCommand::Uint32Register(self.register(opcode)?),
            Opcode::DoubleRegister => ValueCommand::DoubleRegister(self.double_register(opcode)?),
            Opcode::StackSlot => ValueCommand::StackSlot(self.iterator.next()?),
            Opcode::Int32StackSlot => ValueCommand::Int32StackSlot(self.iterator.next()?),
            Opcode::Uint32StackSlot => ValueCommand::Uint32StackSlot(self.iterator.next()?),
            Opcode::DoubleStackSlot => ValueCommand::DoubleStackSlot(self.iterator.next()?),
            Opcode::Literal => ValueCommand::Literal(self.iterator.next()?),
            Opcode::DuplicatedObject => ValueCommand::DuplicatedObject(self.non_negative(opcode)?),
            Opcode::ArgumentsObject => ValueCommand::Object {
                kind: ObjectKind::Arguments,
                field_count: self.non_negative(opcode)?,
            },
            Opcode::CapturedObject => ValueCommand::Object {
                kind: ObjectKind::Captured,
                field_count: self.non_negative(opcode)?,
            },
            found => {
                return Err(TranslationError::UnexpectedOpcode {
                    expected: "a value command",
                    found,
                })
            }
        };
        Ok(command)
    }

    /// Checks that the translation ends here: either the buffer is exhausted
    /// or the next translation's `BEGIN` follows.
    pub fn expect_end(&self, frame_index: usize) -> Result<(), TranslationError> {
        let mut lookahead = self.iterator.clone();
        if !lookahead.has_next() {
            return Ok(());
        }
        match Opcode::from_i32(lookahead.next()?)? {
            Opcode::Begin => Ok(()),
            _ => Err(TranslationError::TrailingValues { frame_index }),
        }
    }
}
