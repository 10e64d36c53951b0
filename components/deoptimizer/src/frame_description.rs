//! Frame descriptions: staging buffers for reconstructed frames
//!
//! A [`FrameDescription`] models one stack frame as a block of machine words
//! addressed by byte offset from the frame top (its lowest address), together
//! with the register files and the scalar metadata the execution engine needs
//! to resume it. The deoptimizer builds one per unoptimized frame; the input
//! (optimized) frame is captured into one as well.
//!
//! Every slot carries a tagged bit. Only tagged slots are reported as GC
//! roots, so raw return addresses and frame pointers are never mistaken for
//! heap references.

use crate::arch::{
    Register, NUMBER_OF_DOUBLE_REGISTERS, NUMBER_OF_REGISTERS, POINTER_SIZE,
    STANDARD_FIXED_FRAME_WORDS,
};
use core_types::{Address, ResumeState, Value, Word};
use memory_manager::{RootSet, RootVisitor};
use serde::{Deserialize, Serialize};

/// Stack frame type tags, as understood by the stack walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    /// Optimized frame (input frames only)
    Optimized,
    /// Unoptimized JS frame
    JavaScript,
    /// Arguments adaptor frame
    ArgumentsAdaptor,
    /// Construct stub frame
    Construct,
    /// Internal frame of an accessor IC stub
    Internal,
    /// Stub failure trampoline frame
    StubFailureTrampoline,
}

impl FrameType {
    /// Small-integer marker stored in a frame's context or marker slot.
    pub fn marker(self) -> Value {
        Value::Smi(match self {
            FrameType::Optimized => 1,
            FrameType::JavaScript => 2,
            FrameType::ArgumentsAdaptor => 3,
            FrameType::Construct => 4,
            FrameType::Internal => 5,
            FrameType::StubFailureTrampoline => 6,
        })
    }
}

/// One reconstructed (or captured) frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDescription {
    slots: Box<[Word]>,
    tagged: Box<[bool]>,
    registers: [Word; NUMBER_OF_REGISTERS],
    double_registers: [f64; NUMBER_OF_DOUBLE_REGISTERS],
    top: Address,
    pc: Address,
    fp: Address,
    context: Value,
    state: ResumeState,
    continuation: Address,
    frame_type: FrameType,
    function: Value,
    parameter_count: usize,
}

impl FrameDescription {
    /// Creates a zero-filled frame of `frame_size` bytes.
    ///
    /// `parameter_count` includes the receiver; it fixes where parameters end
    /// and the fixed part begins.
    pub fn new(frame_size: usize, function: Value, parameter_count: usize) -> Self {
        debug_assert_eq!(frame_size % POINTER_SIZE, 0);
        let words = frame_size / POINTER_SIZE;
        Self {
            slots: vec![0; words].into_boxed_slice(),
            tagged: vec![false; words].into_boxed_slice(),
            registers: [0; NUMBER_OF_REGISTERS],
            double_registers: [0.0; NUMBER_OF_DOUBLE_REGISTERS],
            top: 0,
            pc: 0,
            fp: 0,
            context: Value::Undefined,
            state: ResumeState::NoRegisters,
            continuation: 0,
            frame_type: FrameType::JavaScript,
            function,
            parameter_count,
        }
    }

    /// Frame size in bytes.
    pub fn frame_size(&self) -> usize {
        self.slots.len() * POINTER_SIZE
    }

    /// Number of word slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn slot_index(&self, offset: usize) -> Option<usize> {
        if offset % POINTER_SIZE != 0 {
            return None;
        }
        let index = offset / POINTER_SIZE;
        (index < self.slots.len()).then_some(index)
    }

    /// Raw word at `offset`.
    pub fn get_frame_slot(&self, offset: usize) -> Option<Word> {
        self.slot_index(offset).map(|index| self.slots[index])
    }

    /// Decoded value at `offset`, if the slot is tagged.
    pub fn get_value(&self, offset: usize) -> Option<Value> {
        let index = self.slot_index(offset)?;
        if !self.tagged[index] {
            return None;
        }
        Value::from_word(self.slots[index])
    }

    /// Whether the slot at `offset` holds a tagged value.
    pub fn is_tagged_slot(&self, offset: usize) -> bool {
        self.slot_index(offset)
            .map(|index| self.tagged[index])
            .unwrap_or(false)
    }

    /// Stores a raw word. Offsets come from the frame layout and are in range.
    pub fn set_frame_slot(&mut self, offset: usize, word: Word, tagged: bool) {
        let index = offset / POINTER_SIZE;
        self.slots[index] = word;
        self.tagged[index] = tagged;
    }

    /// Stores a tagged value.
    pub fn set_value(&mut self, offset: usize, value: Value) {
        self.set_frame_slot(offset, value.to_word(), true);
    }

    /// Stores an untagged machine word (return address, frame pointer, code address).
    pub fn set_raw(&mut self, offset: usize, word: Word) {
        self.set_frame_slot(offset, word, false);
    }

    /// Absolute address of the slot at `offset`.
    pub fn slot_address(&self, offset: usize) -> Address {
        self.top + offset
    }

    /// Offset of a stack-slot index from a translation.
    ///
    /// Indices `>= 0` name spill slots below the fixed part; negative indices
    /// name incoming parameters, `-1` being the last one.
    pub fn offset_from_slot_index(&self, index: i32) -> Option<usize> {
        let size = self.frame_size() as i64;
        let word = POINTER_SIZE as i64;
        let base = if index >= 0 {
            size - self.fixed_size() as i64
        } else {
            size - (self.parameter_count as i64) * word
        };
        let offset = base - (i64::from(index) + 1) * word;
        if offset < 0 || offset >= size {
            return None;
        }
        Some(offset as usize)
    }

    /// Bytes taken by parameters and the standard fixed frame part.
    pub fn fixed_size(&self) -> usize {
        (self.parameter_count + STANDARD_FIXED_FRAME_WORDS) * POINTER_SIZE
    }

    /// Offset of the caller's return address (directly below the parameters).
    pub fn caller_pc_offset(&self) -> usize {
        self.frame_size() - self.parameter_count * POINTER_SIZE - POINTER_SIZE
    }

    /// Offset of the saved caller frame pointer.
    pub fn caller_fp_offset(&self) -> usize {
        self.caller_pc_offset() - POINTER_SIZE
    }

    /// Offset of the context (or frame marker) slot.
    pub fn context_offset(&self) -> usize {
        self.caller_fp_offset() - POINTER_SIZE
    }

    /// Offset of the function (or second marker) slot.
    pub fn function_offset(&self) -> usize {
        self.context_offset() - POINTER_SIZE
    }

    /// Parameters including the receiver.
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// Parameter `index`; index 0 is the receiver.
    pub fn parameter(&self, index: usize) -> Option<Value> {
        if index >= self.parameter_count {
            return None;
        }
        self.get_value(self.frame_size() - (index + 1) * POINTER_SIZE)
    }

    /// Number of expression-stack (local) slots of a JS frame.
    pub fn expression_count(&self) -> usize {
        self.slot_count()
            .saturating_sub(self.parameter_count + STANDARD_FIXED_FRAME_WORDS)
    }

    /// Expression-stack slot `index`; index 0 is the first local.
    pub fn expression(&self, index: usize) -> Option<Value> {
        if index >= self.expression_count() {
            return None;
        }
        self.get_value(self.function_offset() - (index + 1) * POINTER_SIZE)
    }

    /// The `index`-th translated value of a JS frame: parameters first
    /// (receiver at 0), then locals.
    pub fn translated_value(&self, index: usize) -> Option<Value> {
        if index < self.parameter_count {
            self.parameter(index)
        } else {
            self.expression(index - self.parameter_count)
        }
    }

    /// General-purpose register.
    pub fn register(&self, reg: Register) -> Word {
        self.registers[reg.index()]
    }

    /// Sets a general-purpose register.
    pub fn set_register(&mut self, reg: Register, word: Word) {
        self.registers[reg.index()] = word;
    }

    /// Sets a general-purpose register by index.
    pub fn set_register_by_index(&mut self, index: usize, word: Word) {
        self.registers[index] = word;
    }

    /// Double register by index.
    pub fn double_register(&self, index: usize) -> f64 {
        self.double_registers[index]
    }

    /// Sets a double register by index.
    pub fn set_double_register(&mut self, index: usize, value: f64) {
        self.double_registers[index] = value;
    }

    /// Lowest address of the frame.
    pub fn top(&self) -> Address {
        self.top
    }

    /// Sets the lowest address of the frame.
    pub fn set_top(&mut self, top: Address) {
        self.top = top;
    }

    /// Address execution resumes at in this frame.
    pub fn pc(&self) -> Address {
        self.pc
    }

    /// Sets the resume address.
    pub fn set_pc(&mut self, pc: Address) {
        self.pc = pc;
    }

    /// Frame pointer value of this frame.
    pub fn fp(&self) -> Address {
        self.fp
    }

    /// Sets the frame pointer value.
    pub fn set_fp(&mut self, fp: Address) {
        self.fp = fp;
    }

    /// Context of this frame.
    pub fn context(&self) -> Value {
        self.context
    }

    /// Sets the context.
    pub fn set_context(&mut self, context: Value) {
        self.context = context;
    }

    /// Register state the unoptimized code expects on resumption.
    pub fn state(&self) -> ResumeState {
        self.state
    }

    /// Sets the resumption register state.
    pub fn set_state(&mut self, state: ResumeState) {
        self.state = state;
    }

    /// Builtin to run before resuming; zero when none.
    pub fn continuation(&self) -> Address {
        self.continuation
    }

    /// Sets the continuation builtin address.
    pub fn set_continuation(&mut self, continuation: Address) {
        self.continuation = continuation;
    }

    /// Frame type tag.
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    /// Sets the frame type tag.
    pub fn set_frame_type(&mut self, frame_type: FrameType) {
        self.frame_type = frame_type;
    }

    /// Function owning this frame.
    pub fn function(&self) -> Value {
        self.function
    }
}

impl RootSet for FrameDescription {
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor) {
        for (word, tagged) in self.slots.iter().zip(self.tagged.iter()) {
            if *tagged {
                if let Some(value) = Value::from_word(*word) {
                    visitor.visit_value(value);
                }
            }
        }
        visitor.visit_value(self.context);
        visitor.visit_value(self.function);
    }
}

/// Reports the roots of every frame in `frames`.
pub fn iterate_frame_roots(frames: &[FrameDescription], visitor: &mut dyn RootVisitor) {
    for frame in frames {
        frame.iterate_roots(visitor);
    }
}
