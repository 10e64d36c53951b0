//! Translation builder used by the optimizing compiler.

use super::{Opcode, TranslationBuffer};
use crate::arch::{DoubleRegister, Register};
use core_types::BailoutId;

/// Writes one translation into a shared [`TranslationBuffer`].
///
/// Each `begin_*_frame` call must be followed by exactly the frame's height
/// in value commands; `begin_*_object` calls consume one slot of the
/// enclosing height and are followed by their own field commands.
///
/// # Examples
///
/// ```
/// use deoptimizer::arch::Register;
/// use deoptimizer::translation::{Translation, TranslationBuffer};
/// use core_types::BailoutId;
///
/// let mut buffer = TranslationBuffer::new();
/// let mut translation = Translation::new(&mut buffer, 1, 1);
/// translation.begin_js_frame(BailoutId(4), 0, 2);
/// translation.store_register(Register::RAX);
/// translation.store_stack_slot(3);
/// assert_eq!(translation.index(), 0);
/// ```
#[derive(Debug)]
pub struct Translation<'a> {
    buffer: &'a mut TranslationBuffer,
    index: usize,
}

impl<'a> Translation<'a> {
    /// Starts a translation with its `BEGIN` header.
    pub fn new(buffer: &'a mut TranslationBuffer, frame_count: i32, js_frame_count: i32) -> Self {
        let index = buffer.current_index();
        buffer.add(Opcode::Begin as i32);
        buffer.add(frame_count);
        buffer.add(js_frame_count);
        Self { buffer, index }
    }

    /// Start index of this translation in the shared buffer.
    pub fn index(&self) -> usize {
        self.index
    }

    fn emit(&mut self, opcode: Opcode, operands: &[i32]) {
        debug_assert_eq!(operands.len(), opcode.number_of_operands());
        self.buffer.add(opcode as i32);
        for operand in operands {
            self.buffer.add(*operand);
        }
    }

    /// JS frame; `height` counts the receiver, parameters and locals.
    pub fn begin_js_frame(&mut self, node_id: BailoutId, literal_id: i32, height: u32) {
        self.emit(
            Opcode::JsFrame,
            &[node_id.to_int(), literal_id, height as i32],
        );
    }

    /// Construct stub frame; `height` counts the receiver and arguments.
    pub fn begin_construct_stub_frame(&mut self, literal_id: i32, height: u32) {
        self.emit(Opcode::ConstructStubFrame, &[literal_id, height as i32]);
    }

    /// Getter stub frame; followed by the receiver.
    pub fn begin_getter_stub_frame(&mut self, literal_id: i32) {
        self.emit(Opcode::GetterStubFrame, &[literal_id]);
    }

    /// Setter stub frame; followed by the receiver and the assigned value.
    pub fn begin_setter_stub_frame(&mut self, literal_id: i32) {
        self.emit(Opcode::SetterStubFrame, &[literal_id]);
    }

    /// Arguments adaptor frame; `height` counts the receiver and actual arguments.
    pub fn begin_arguments_adaptor_frame(&mut self, literal_id: i32, height: u32) {
        self.emit(Opcode::ArgumentsAdaptorFrame, &[literal_id, height as i32]);
    }

    /// Compiled stub frame with `height` parameters.
    pub fn begin_compiled_stub_frame(&mut self, height: u32) {
        self.emit(Opcode::CompiledStubFrame, &[height as i32]);
    }

    /// Arguments object with `length` elements.
    pub fn begin_arguments_object(&mut self, length: u32) {
        self.emit(Opcode::ArgumentsObject, &[length as i32]);
    }

    /// Captured object with `length` fields.
    pub fn begin_captured_object(&mut self, length: u32) {
        self.emit(Opcode::CapturedObject, &[length as i32]);
    }

    /// Reference to the object started as object number `object_index`.
    pub fn duplicate_object(&mut self, object_index: u32) {
        self.emit(Opcode::DuplicatedObject, &[object_index as i32]);
    }

    /// Tagged value in a register.
    pub fn store_register(&mut self, reg: Register) {
        self.emit(Opcode::Register, &[i32::from(reg.code())]);
    }

    /// Untagged signed 32-bit integer in a register.
    pub fn store_int32_register(&mut self, reg: Register) {
        self.emit(Opcode::Int32Register, &[i32::from(reg.code())]);
    }

    /// Untagged unsigned 32-bit integer in a register.
    pub fn store_uint32_register(&mut self, reg: Register) {
        self.emit(Opcode::Uint32Register, &[i32::from(reg.code())]);
    }

    /// Double in a double register.
    pub fn store_double_register(&mut self, reg: DoubleRegister) {
        self.emit(Opcode::DoubleRegister, &[i32::from(reg.code())]);
    }

    /// Tagged value in a stack slot.
    pub fn store_stack_slot(&mut self, index: i32) {
        self.emit(Opcode::StackSlot, &[index]);
    }

    /// Untagged signed 32-bit integer in a stack slot.
    pub fn store_int32_stack_slot(&mut self, index: i32) {
        self.emit(Opcode::Int32StackSlot, &[index]);
    }

    /// Untagged unsigned 32-bit integer in a stack slot.
    pub fn store_uint32_stack_slot(&mut self, index: i32) {
        self.emit(Opcode::Uint32StackSlot, &[index]);
    }

    /// Double in a stack slot.
    pub fn store_double_stack_slot(&mut self, index: i32) {
        self.emit(Opcode::DoubleStackSlot, &[index]);
    }

    /// Literal pool entry.
    pub fn store_literal(&mut self, literal_id: i32) {
        self.emit(Opcode::Literal, &[literal_id]);
    }
}
