//! The execution-stack seam
//!
//! The deoptimizer never walks a real machine stack. The embedding execution
//! engine implements [`ExecutionStack`]: it lists optimized activations,
//! copies one out as a [`CapturedFrame`], and later replaces it with the
//! reconstructed frames.

use crate::arch::{NUMBER_OF_DOUBLE_REGISTERS, NUMBER_OF_REGISTERS, POINTER_SIZE};
use crate::code::OptimizedCode;
use crate::error::DeoptError;
use crate::frame_description::{FrameDescription, FrameType};
use core_types::{Address, Value, Word};
use memory_manager::{RootSet, RootVisitor};
use std::sync::Arc;

/// An optimized frame on the execution stack.
#[derive(Debug, Clone)]
pub struct Activation {
    /// Frame pointer
    pub fp: Address,
    /// Return address into the code (for suspended frames) or current pc
    pub pc: Address,
    /// Code the frame runs
    pub code: Arc<OptimizedCode>,
    /// Closure of the frame
    pub function: Value,
}

/// Raw copy of an optimized frame and the register state at the bailout.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    /// Lowest address of the frame
    pub top: Address,
    /// Frame words from the top up
    pub slots: Vec<Word>,
    /// General-purpose registers
    pub registers: [Word; NUMBER_OF_REGISTERS],
    /// Double registers
    pub double_registers: [f64; NUMBER_OF_DOUBLE_REGISTERS],
    /// pc at the bailout
    pub pc: Address,
}

/// What the deoptimizer needs from the execution engine.
pub trait ExecutionStack {
    /// Optimized activations, innermost first.
    fn optimized_activations(&self) -> Vec<Activation>;

    /// Copies the optimized frame at `fp`.
    fn capture(&self, fp: Address) -> Option<CapturedFrame>;

    /// Replaces the optimized frame at `fp` with `frames`, outermost first.
    fn splice(&mut self, fp: Address, frames: Vec<FrameDescription>);

    /// Reports every heap reference held by the stack.
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor);
}

/// Adapts an [`ExecutionStack`] to the collector's root interface.
pub struct StackRoots<'a>(pub &'a dyn ExecutionStack);

impl RootSet for StackRoots<'_> {
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor) {
        self.0.iterate_roots(visitor);
    }
}

/// Builds the input frame description of an optimized activation of `code`.
///
/// Slots are copied untagged: the input frame is read through the
/// translation only, and the stack reports its own roots.
pub fn capture_input_frame(
    code: &OptimizedCode,
    captured: &CapturedFrame,
) -> Result<FrameDescription, DeoptError> {
    let expected = code.input_frame_words();
    if captured.slots.len() != expected {
        return Err(DeoptError::InputFrameSize {
            expected,
            actual: captured.slots.len(),
        });
    }
    let mut frame = FrameDescription::new(
        expected * POINTER_SIZE,
        code.function(),
        code.parameter_count() as usize,
    );
    for (index, word) in captured.slots.iter().enumerate() {
        frame.set_raw(index * POINTER_SIZE, *word);
    }
    frame.set_frame_type(FrameType::Optimized);
    frame.set_top(captured.top);
    frame.set_fp(captured.top + frame.caller_fp_offset());
    frame.set_pc(captured.pc);
    for (index, word) in captured.registers.iter().enumerate() {
        frame.set_register_by_index(index, *word);
    }
    for (index, value) in captured.double_registers.iter().enumerate() {
        frame.set_double_register(index, *value);
    }
    let context = frame
        .get_frame_slot(frame.context_offset())
        .and_then(Value::from_word)
        .unwrap_or(Value::Undefined);
    frame.set_context(context);
    Ok(frame)
}
