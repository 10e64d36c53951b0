//! The deoptimization engine
//!
//! A [`Deoptimizer`] turns one captured optimized frame into the sequence of
//! unoptimized frames it stands for. It runs in phases:
//!
//! 1. **Captured** - the input frame has been copied off the stack.
//! 2. **Translating** - [`compute_output_frames`](Deoptimizer::compute_output_frames)
//!    decodes the translation and fills output frames. No allocation happens
//!    here; values that need boxing go to the deferred list.
//! 3. **Materializing** - deferred heap numbers and objects are allocated and
//!    written into their slots.
//! 4. **Spliced** - the execution engine has replaced the optimized frame.
//!
//! Debugger inspections stop after materializing.
//!
//! # Output frame layouts
//!
//! Offsets grow from the frame top; each frame is written from its highest
//! slot down:
//!
//! ```text
//! JS frame:          params (receiver highest), caller pc, caller fp,
//!                    context, function, locals
//! Arguments adaptor: params, caller pc, caller fp, adaptor marker,
//!                    function, argc
//! Construct stub:    params, caller pc, caller fp, context, marker,
//!                    code, argc, constructor, allocated receiver
//! Getter/setter:     caller pc, caller fp, context, marker, code,
//!                    receiver, (value)
//! Compiled stub:     caller pc, caller fp, context, marker, params
//! ```

use crate::arch::{Register, POINTER_SIZE, STANDARD_FIXED_FRAME_WORDS};
use crate::builtins::{BuiltinCode, Builtins};
use crate::code::{CodeId, OptimizedCode};
use crate::config::DeoptimizerConfig;
use crate::deferred::{DeferredObjects, SlotAddress};
use crate::error::{DeoptError, TranslationError};
use crate::frame_description::{FrameDescription, FrameType};
use crate::literals::LiteralPool;
use crate::translation::{FrameKind, TranslationReader, ValueCommand, SELF_LITERAL_ID};
use core_types::{Address, BailoutId, ResumeState, SmiRange, Value, Word};
use memory_manager::{FunctionObject, Heap, HeapObject};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Why optimized code is being left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BailoutType {
    /// A speculation check failed in the running code
    Eager = 0,
    /// The code was invalidated while a frame was suspended in a call
    Lazy = 1,
    /// Speculation hit a case it never saw; reoptimization is allowed
    Soft = 2,
    /// A debugger asked to inspect the frame; nothing is resumed
    Debugger = 3,
}

impl BailoutType {
    /// Types that own an entry table, in table order.
    pub const WITH_ENTRY_TABLES: [BailoutType; 3] =
        [BailoutType::Eager, BailoutType::Lazy, BailoutType::Soft];

    /// Index of this type's entry table.
    pub fn table_index(self) -> Option<usize> {
        match self {
            BailoutType::Eager => Some(0),
            BailoutType::Lazy => Some(1),
            BailoutType::Soft => Some(2),
            BailoutType::Debugger => None,
        }
    }

    /// Lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            BailoutType::Eager => "eager",
            BailoutType::Lazy => "lazy",
            BailoutType::Soft => "soft",
            BailoutType::Debugger => "debugger",
        }
    }
}

impl fmt::Display for BailoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pipeline phase of a deoptimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeoptPhase {
    /// Input frame captured
    Captured,
    /// Output frames being computed
    Translating,
    /// Deferred objects being allocated
    Materializing,
    /// Output frames installed on the stack
    Spliced,
}

/// What to deoptimize.
#[derive(Debug, Clone)]
pub struct DeoptRequest {
    /// Code of the activation
    pub code: Arc<OptimizedCode>,
    /// Bailout type
    pub bailout_type: BailoutType,
    /// Deoptimization point within the code
    pub deopt_id: u32,
    /// Frame pointer of the activation
    pub fp: Address,
}

/// Frame reconstruction for one optimized activation.
#[derive(Debug)]
pub struct Deoptimizer {
    pub(crate) code: Arc<OptimizedCode>,
    pub(crate) function: Value,
    pub(crate) bailout_type: BailoutType,
    pub(crate) deopt_id: u32,
    pub(crate) node_id: BailoutId,
    pub(crate) input: FrameDescription,
    pub(crate) output: Vec<FrameDescription>,
    pub(crate) frame_kinds: Vec<FrameKind>,
    pub(crate) deferred: DeferredObjects,
    pub(crate) materialized: Vec<Option<Value>>,
    pub(crate) gc_retries: usize,
    pub(crate) phase: DeoptPhase,
    pub(crate) history: Vec<DeoptPhase>,
}

impl Deoptimizer {
    /// Creates a deoptimizer for `input`, an optimized frame of `code`
    /// stopped at deoptimization point `deopt_id`.
    pub fn new(
        code: Arc<OptimizedCode>,
        bailout_type: BailoutType,
        deopt_id: u32,
        input: FrameDescription,
    ) -> Result<Self, DeoptError> {
        let entry = code.input_data().entry(deopt_id).copied().ok_or_else(|| {
            DeoptError::UnknownDeoptimizationId {
                code: code.name().to_string(),
                deopt_id,
            }
        })?;
        if input.slot_count() != code.input_frame_words() {
            return Err(DeoptError::InputFrameSize {
                expected: code.input_frame_words(),
                actual: input.slot_count(),
            });
        }
        debug!(
            target: "corten::deopt",
            code = %code.id(),
            function = code.name(),
            bailout_type = %bailout_type,
            deopt_id,
            node_id = %entry.node_id,
            fp = input.fp(),
            "deoptimizer created"
        );
        Ok(Self {
            function: code.function(),
            code,
            bailout_type,
            deopt_id,
            node_id: entry.node_id,
            input,
            output: Vec::new(),
            frame_kinds: Vec::new(),
            deferred: DeferredObjects::new(),
            materialized: Vec::new(),
            gc_retries: 0,
            phase: DeoptPhase::Captured,
            history: vec![DeoptPhase::Captured],
        })
    }

    /// Code being deoptimized.
    pub fn code(&self) -> &Arc<OptimizedCode> {
        &self.code
    }

    /// Identity of the code being deoptimized.
    pub fn code_id(&self) -> CodeId {
        self.code.id()
    }

    /// Optimized closure.
    pub fn function(&self) -> Value {
        self.function
    }

    /// Bailout type.
    pub fn bailout_type(&self) -> BailoutType {
        self.bailout_type
    }

    /// Deoptimization point.
    pub fn deopt_id(&self) -> u32 {
        self.deopt_id
    }

    /// Node id of the deoptimization point.
    pub fn node_id(&self) -> BailoutId {
        self.node_id
    }

    /// Captured optimized frame.
    pub fn input(&self) -> &FrameDescription {
        &self.input
    }

    /// Output frames, outermost first.
    pub fn output(&self) -> &[FrameDescription] {
        &self.output
    }

    /// Number of output frames.
    pub fn output_count(&self) -> usize {
        self.output.len()
    }

    /// Decoded frame opcodes, parallel to [`output`](Self::output).
    pub fn frame_kinds(&self) -> &[FrameKind] {
        &self.frame_kinds
    }

    /// Number of JS frames in the output.
    pub fn js_frame_count(&self) -> usize {
        self.frame_kinds.iter().filter(|kind| kind.is_js_frame()).count()
    }

    /// Output index of the `js_index`-th JS frame.
    pub fn js_frame_index(&self, js_index: usize) -> Option<usize> {
        self.frame_kinds
            .iter()
            .enumerate()
            .filter(|(_, kind)| kind.is_js_frame())
            .nth(js_index)
            .map(|(index, _)| index)
    }

    /// Values deferred to materialization.
    pub fn deferred(&self) -> &DeferredObjects {
        &self.deferred
    }

    /// Materialized objects by object index; `None` for skipped ones.
    pub fn materialized_objects(&self) -> &[Option<Value>] {
        &self.materialized
    }

    /// Allocations that needed a collection during materialization.
    pub fn gc_retries(&self) -> usize {
        self.gc_retries
    }

    /// Current phase.
    pub fn phase(&self) -> DeoptPhase {
        self.phase
    }

    /// Phases entered so far, in order.
    pub fn history(&self) -> &[DeoptPhase] {
        &self.history
    }

    pub(crate) fn expect_phase(&self, expected: DeoptPhase) -> Result<(), DeoptError> {
        if self.phase != expected {
            return Err(DeoptError::InvalidPhase {
                expected,
                actual: self.phase,
            });
        }
        Ok(())
    }

    pub(crate) fn enter_phase(&mut self, phase: DeoptPhase) {
        trace!(
            target: "corten::deopt",
            code = %self.code.id(),
            from = ?self.phase,
            to = ?phase,
            "phase transition"
        );
        self.phase = phase;
        self.history.push(phase);
    }

    /// Records that the execution engine installed the output frames.
    pub fn mark_spliced(&mut self) -> Result<(), DeoptError> {
        self.expect_phase(DeoptPhase::Materializing)?;
        self.enter_phase(DeoptPhase::Spliced);
        Ok(())
    }

    /// Decodes the translation of this deoptimization point into output
    /// frames.
    ///
    /// `heap` is only read: closures named by the translation are inspected
    /// for their shared info and context.
    pub fn compute_output_frames(
        &mut self,
        heap: &Heap,
        builtins: &Builtins,
        config: &DeoptimizerConfig,
    ) -> Result<(), DeoptError> {
        self.expect_phase(DeoptPhase::Captured)?;
        self.enter_phase(DeoptPhase::Translating);

        let code = Arc::clone(&self.code);
        let input_data = code.input_data();
        let translation_index = input_data
            .entry(self.deopt_id)
            .map(|entry| entry.translation_index)
            .unwrap_or_default();
        let mut reader = TranslationReader::new(input_data.translations(), translation_index)?;
        let header = reader.read_header()?;

        let mut builder = OutputBuilder {
            reader,
            input: &self.input,
            literals: input_data.literals(),
            heap,
            builtins,
            smi_range: config.smi_range,
            bailout_type: self.bailout_type,
            function: self.function,
            frame_count: header.frame_count,
            output: Vec::with_capacity(header.frame_count),
            deferred: &mut self.deferred,
        };

        let mut kinds = Vec::with_capacity(header.frame_count);
        for frame_index in 0..header.frame_count {
            let kind = builder.reader.read_frame()?;
            let frame = builder.build_frame(frame_index, kind)?;
            if config.trace_deopt {
                debug!(
                    target: "corten::deopt::translation",
                    frame_index,
                    kind = %kind.opcode(),
                    top = frame.top(),
                    fp = frame.fp(),
                    pc = frame.pc(),
                    size = frame.frame_size(),
                    "translated frame"
                );
            }
            builder.output.push(frame);
            kinds.push(kind);
        }

        let js_frames = kinds.iter().filter(|kind| kind.is_js_frame()).count();
        if js_frames != header.js_frame_count {
            return Err(TranslationError::JsFrameCountMismatch {
                declared: header.js_frame_count,
                found: js_frames,
            }
            .into());
        }
        builder.reader.expect_end(header.frame_count - 1)?;

        self.output = builder.output;
        self.frame_kinds = kinds;
        debug!(
            target: "corten::deopt",
            code = %self.code.id(),
            frames = self.output.len(),
            js_frames,
            deferred_objects = self.deferred.object_count(),
            deferred_numbers = self.deferred.numbers().len(),
            "output frames computed"
        );
        Ok(())
    }
}

/// A translated scalar: either a final tagged word or a number to box.
enum Scalar {
    Tagged(Word),
    Number(f64),
}

/// Translation state borrowed from the deoptimizer for one pass.
struct OutputBuilder<'a> {
    reader: TranslationReader<'a>,
    input: &'a FrameDescription,
    literals: &'a LiteralPool,
    heap: &'a Heap,
    builtins: &'a Builtins,
    smi_range: SmiRange,
    bailout_type: BailoutType,
    function: Value,
    frame_count: usize,
    output: Vec<FrameDescription>,
    deferred: &'a mut DeferredObjects,
}

impl<'a> OutputBuilder<'a> {
    fn build_frame(
        &mut self,
        frame_index: usize,
        kind: FrameKind,
    ) -> Result<FrameDescription, DeoptError> {
        match kind {
            FrameKind::JsFrame {
                node_id,
                literal_id,
                height,
            } => self.js_frame(frame_index, node_id, literal_id, height),
            FrameKind::ArgumentsAdaptor { literal_id, height } => {
                self.arguments_adaptor_frame(frame_index, literal_id, height)
            }
            FrameKind::ConstructStub { literal_id, height } => {
                self.construct_stub_frame(frame_index, literal_id, height)
            }
            FrameKind::GetterStub { literal_id } => {
                self.accessor_stub_frame(frame_index, literal_id, false)
            }
            FrameKind::SetterStub { literal_id } => {
                self.accessor_stub_frame(frame_index, literal_id, true)
            }
            FrameKind::CompiledStub { height } => self.compiled_stub_frame(frame_index, height),
        }
    }

    fn is_topmost(&self, frame_index: usize) -> bool {
        frame_index + 1 == self.frame_count
    }

    fn literal(&self, frame_index: usize, literal_id: i32) -> Result<Value, DeoptError> {
        if literal_id == SELF_LITERAL_ID {
            if frame_index != 0 {
                return Err(TranslationError::SelfLiteralMisuse { frame_index }.into());
            }
            return Ok(self.function);
        }
        self.literals.get(literal_id).ok_or_else(|| {
            TranslationError::LiteralOutOfRange {
                index: literal_id,
                len: self.literals.len(),
            }
            .into()
        })
    }

    fn function_object(&self, function: Value) -> Result<&'a FunctionObject, DeoptError> {
        let heap: &'a Heap = self.heap;
        match function.as_heap_ref().and_then(|r| heap.get(r)) {
            Some(HeapObject::Function(closure)) => Ok(closure),
            _ => Err(DeoptError::NotAFunction(function.to_string())),
        }
    }

    fn position_error(&self, kind: &'static str, frame_index: usize) -> DeoptError {
        TranslationError::InvalidFramePosition {
            kind,
            frame_index,
            frame_count: self.frame_count,
        }
        .into()
    }

    /// Places `frame` on the stack and links it to its caller: sets its top
    /// and fp and writes the caller pc and fp slots.
    fn link_frame(&self, frame: &mut FrameDescription, frame_index: usize) {
        let caller_pc_offset = frame.caller_pc_offset();
        let caller_fp_offset = frame.caller_fp_offset();
        let (top, caller_pc, caller_fp) = if frame_index == 0 {
            let input = self.input;
            (
                input.fp().wrapping_sub(caller_fp_offset),
                input.get_frame_slot(input.caller_pc_offset()).unwrap_or_default(),
                input.get_frame_slot(input.caller_fp_offset()).unwrap_or_default(),
            )
        } else {
            let previous = &self.output[frame_index - 1];
            (
                previous.top().wrapping_sub(frame.frame_size()),
                previous.pc() as Word,
                previous.fp() as Word,
            )
        };
        frame.set_top(top);
        frame.set_raw(caller_pc_offset, caller_pc);
        frame.set_raw(caller_fp_offset, caller_fp);
        frame.set_fp(top + caller_fp_offset);
    }

    fn previous_context(&self, frame_index: usize) -> Value {
        self.output[frame_index - 1].context()
    }

    fn finish_topmost(&self, frame: &mut FrameDescription, frame_index: usize) {
        if !self.is_topmost(frame_index) {
            return;
        }
        frame.set_register(Register::FP, frame.fp() as Word);
        frame.set_register(Register::CONTEXT, frame.context().to_word());
    }

    fn js_frame(
        &mut self,
        frame_index: usize,
        node_id: BailoutId,
        literal_id: i32,
        height: u32,
    ) -> Result<FrameDescription, DeoptError> {
        let function = self.literal(frame_index, literal_id)?;
        let closure = self.function_object(function)?;
        let shared = Arc::clone(&closure.shared);
        let parameter_count = shared.parameter_count();
        if height < parameter_count {
            return Err(TranslationError::HeightBelowParameterCount {
                height,
                parameter_count,
            }
            .into());
        }
        let parameter_count = parameter_count as usize;
        let height = height as usize;
        let frame_size = (height + STANDARD_FIXED_FRAME_WORDS) * POINTER_SIZE;
        let mut frame = FrameDescription::new(frame_size, function, parameter_count);
        frame.set_frame_type(FrameType::JavaScript);
        self.link_frame(&mut frame, frame_index);

        let mut offset = frame_size;
        for _ in 0..parameter_count {
            offset -= POINTER_SIZE;
            self.translate_value(&mut frame, frame_index, offset)?;
        }

        let context = if frame_index == 0 {
            let word = self
                .input
                .get_frame_slot(self.input.context_offset())
                .unwrap_or_default();
            Value::from_word(word).ok_or(DeoptError::UntaggedField(word))?
        } else {
            closure.context
        };
        frame.set_context(context);
        frame.set_value(frame.context_offset(), context);
        frame.set_value(frame.function_offset(), function);

        let mut offset = frame.function_offset();
        for _ in parameter_count..height {
            offset -= POINTER_SIZE;
            self.translate_value(&mut frame, frame_index, offset)?;
        }

        let entry = shared
            .code
            .output_for(node_id)
            .ok_or_else(|| DeoptError::MissingOutputEntry {
                function: shared.name.clone(),
                node_id: node_id.to_int(),
            })?;
        frame.set_pc(shared.code.instruction_start + entry.pc_offset as usize);
        frame.set_state(entry.state);

        if self.is_topmost(frame_index) {
            self.finish_topmost(&mut frame, frame_index);
            frame.set_continuation(
                self.builtins
                    .continuation_for(self.bailout_type)
                    .unwrap_or_default(),
            );
        }
        Ok(frame)
    }

    fn arguments_adaptor_frame(
        &mut self,
        frame_index: usize,
        literal_id: i32,
        height: u32,
    ) -> Result<FrameDescription, DeoptError> {
        if frame_index == 0 || self.is_topmost(frame_index) {
            return Err(self.position_error("ARGUMENTS_ADAPTOR_FRAME", frame_index));
        }
        if height == 0 {
            return Err(TranslationError::HeightBelowParameterCount {
                height,
                parameter_count: 1,
            }
            .into());
        }
        let function = self.literal(frame_index, literal_id)?;
        let height = height as usize;
        let frame_size = (height + 5) * POINTER_SIZE;
        let mut frame = FrameDescription::new(frame_size, function, height);
        frame.set_frame_type(FrameType::ArgumentsAdaptor);
        self.link_frame(&mut frame, frame_index);

        let mut offset = frame_size;
        for _ in 0..height {
            offset -= POINTER_SIZE;
            self.translate_value(&mut frame, frame_index, offset)?;
        }

        let marker = FrameType::ArgumentsAdaptor.marker();
        frame.set_context(marker);
        frame.set_value(frame.context_offset(), marker);
        frame.set_value(frame.function_offset(), function);
        frame.set_value(0, Value::Smi(height as i32 - 1));

        frame.set_pc(self.builtins.arguments_adaptor_trampoline.deopt_pc());
        Ok(frame)
    }

    fn construct_stub_frame(
        &mut self,
        frame_index: usize,
        literal_id: i32,
        height: u32,
    ) -> Result<FrameDescription, DeoptError> {
        if frame_index == 0 || self.is_topmost(frame_index) {
            return Err(self.position_error("CONSTRUCT_STUB_FRAME", frame_index));
        }
        let constructor = self.literal(frame_index, literal_id)?;
        let height = height as usize;
        let frame_size = (height + 8) * POINTER_SIZE;
        let mut frame = FrameDescription::new(frame_size, constructor, height);
        frame.set_frame_type(FrameType::Construct);
        self.link_frame(&mut frame, frame_index);

        let mut offset = frame_size;
        for _ in 0..height {
            offset -= POINTER_SIZE;
            self.translate_value(&mut frame, frame_index, offset)?;
        }

        let context = self.previous_context(frame_index);
        frame.set_context(context);
        let mut offset = frame.context_offset();
        frame.set_value(offset, context);
        offset -= POINTER_SIZE;
        frame.set_value(offset, FrameType::Construct.marker());
        offset -= POINTER_SIZE;
        frame.set_raw(offset, self.builtins.construct_stub.start as Word);
        offset -= POINTER_SIZE;
        frame.set_value(offset, Value::Smi(height as i32 - 1));
        offset -= POINTER_SIZE;
        frame.set_value(offset, constructor);
        offset -= POINTER_SIZE;
        debug_assert_eq!(offset, 0);

        // The allocated receiver is the receiver argument.
        let receiver_offset = frame_size - POINTER_SIZE;
        if height > 0 {
            let receiver = frame.get_frame_slot(receiver_offset).unwrap_or_default();
            let tagged = frame.is_tagged_slot(receiver_offset);
            frame.set_frame_slot(offset, receiver, tagged);
            self.deferred.alias(
                SlotAddress {
                    frame_index,
                    offset: receiver_offset,
                },
                SlotAddress {
                    frame_index,
                    offset,
                },
            );
        } else {
            frame.set_value(offset, Value::Undefined);
        }

        frame.set_pc(self.builtins.construct_stub.deopt_pc());
        Ok(frame)
    }

    fn accessor_stub_frame(
        &mut self,
        frame_index: usize,
        literal_id: i32,
        is_setter: bool,
    ) -> Result<FrameDescription, DeoptError> {
        let kind = if is_setter {
            "SETTER_STUB_FRAME"
        } else {
            "GETTER_STUB_FRAME"
        };
        if frame_index == 0 {
            return Err(self.position_error(kind, frame_index));
        }
        let accessor = self.literal(frame_index, literal_id)?;
        let stub: BuiltinCode = if is_setter {
            self.builtins.setter_stub
        } else {
            self.builtins.getter_stub
        };
        let height = if is_setter { 2 } else { 1 };
        let frame_size = (STANDARD_FIXED_FRAME_WORDS + 1 + height) * POINTER_SIZE;
        let mut frame = FrameDescription::new(frame_size, accessor, 0);
        frame.set_frame_type(FrameType::Internal);
        self.link_frame(&mut frame, frame_index);

        let context = self.previous_context(frame_index);
        frame.set_context(context);
        let mut offset = frame.context_offset();
        frame.set_value(offset, context);
        offset -= POINTER_SIZE;
        frame.set_value(offset, FrameType::Internal.marker());
        offset -= POINTER_SIZE;
        frame.set_raw(offset, stub.start as Word);
        for _ in 0..height {
            offset -= POINTER_SIZE;
            self.translate_value(&mut frame, frame_index, offset)?;
        }
        debug_assert_eq!(offset, 0);

        frame.set_pc(stub.deopt_pc());
        self.finish_topmost(&mut frame, frame_index);
        Ok(frame)
    }

    fn compiled_stub_frame(
        &mut self,
        frame_index: usize,
        height: u32,
    ) -> Result<FrameDescription, DeoptError> {
        let height = height as usize;
        let frame_size = (STANDARD_FIXED_FRAME_WORDS + height) * POINTER_SIZE;
        let mut frame = FrameDescription::new(frame_size, self.function, 0);
        frame.set_frame_type(FrameType::StubFailureTrampoline);
        self.link_frame(&mut frame, frame_index);

        let context = if frame_index == 0 {
            let word = self
                .input
                .get_frame_slot(self.input.context_offset())
                .unwrap_or_default();
            Value::from_word(word).ok_or(DeoptError::UntaggedField(word))?
        } else {
            self.previous_context(frame_index)
        };
        frame.set_context(context);
        let mut offset = frame.context_offset();
        frame.set_value(offset, context);
        offset -= POINTER_SIZE;
        frame.set_value(offset, FrameType::StubFailureTrampoline.marker());
        for _ in 0..height {
            offset -= POINTER_SIZE;
            self.translate_value(&mut frame, frame_index, offset)?;
        }

        frame.set_pc(self.builtins.stub_failure_trampoline);
        frame.set_state(ResumeState::NoRegisters);
        if self.is_topmost(frame_index) {
            self.finish_topmost(&mut frame, frame_index);
            if self.bailout_type != BailoutType::Debugger {
                frame.set_continuation(self.builtins.notify_stub_failure);
            }
        }
        Ok(frame)
    }

    /// Reads one value command and stores its result at `offset`.
    fn translate_value(
        &mut self,
        frame: &mut FrameDescription,
        frame_index: usize,
        offset: usize,
    ) -> Result<(), DeoptError> {
        let slot = SlotAddress {
            frame_index,
            offset,
        };
        match self.reader.read_value()? {
            ValueCommand::Object { kind, field_count } => {
                self.deferred
                    .begin_object(Some(slot), kind, field_count, frame_index);
                frame.set_value(offset, Value::ArgumentsMarker);
                self.translate_fields(field_count, frame_index)?;
            }
            ValueCommand::DuplicatedObject(target) => {
                self.deferred.add_duplicate(Some(slot), target)?;
                frame.set_value(offset, Value::ArgumentsMarker);
            }
            command => match self.scalar(command)? {
                Scalar::Tagged(word) => frame.set_frame_slot(offset, word, true),
                Scalar::Number(value) => {
                    self.deferred.add_frame_number(slot, value);
                    frame.set_value(offset, Value::ArgumentsMarker);
                }
            },
        }
        Ok(())
    }

    /// Translates the fields of an object just started, nested objects
    /// included, onto the deferred list.
    fn translate_fields(&mut self, field_count: u32, frame_index: usize) -> Result<(), DeoptError> {
        let mut pending = vec![field_count];
        while let Some(remaining) = pending.last_mut() {
            if *remaining == 0 {
                pending.pop();
                continue;
            }
            *remaining -= 1;
            match self.reader.read_value()? {
                ValueCommand::Object { kind, field_count } => {
                    self.deferred
                        .begin_object(None, kind, field_count, frame_index);
                    pending.push(field_count);
                }
                ValueCommand::DuplicatedObject(target) => {
                    self.deferred.add_duplicate(None, target)?;
                }
                command => match self.scalar(command)? {
                    Scalar::Tagged(word) => self.deferred.add_tagged(word),
                    Scalar::Number(value) => self.deferred.add_number(value),
                },
            }
        }
        Ok(())
    }

    fn integer(&self, n: i64) -> Scalar {
        match Value::smi_in_range(n, self.smi_range) {
            Some(smi) => Scalar::Tagged(smi.to_word()),
            None => Scalar::Number(n as f64),
        }
    }

    fn stack_slot(&self, index: i32) -> Result<Word, DeoptError> {
        self.input
            .offset_from_slot_index(index)
            .and_then(|offset| self.input.get_frame_slot(offset))
            .ok_or_else(|| TranslationError::StackSlotOutOfRange { index }.into())
    }

    fn scalar(&self, command: ValueCommand) -> Result<Scalar, DeoptError> {
        let input = self.input;
        let scalar = match command {
            ValueCommand::Register(reg) => Scalar::Tagged(input.register(reg)),
            ValueCommand::Int32Register(reg) => self.integer(i64::from(input.register(reg) as i32)),
            ValueCommand::Uint32Register(reg) => self.integer(i64::from(input.register(reg) as u32)),
            ValueCommand::DoubleRegister(reg) => Scalar::Number(input.double_register(reg.index())),
            ValueCommand::StackSlot(index) => Scalar::Tagged(self.stack_slot(index)?),
            ValueCommand::Int32StackSlot(index) => {
                self.integer(i64::from(self.stack_slot(index)? as i32))
            }
            ValueCommand::Uint32StackSlot(index) => {
                self.integer(i64::from(self.stack_slot(index)? as u32))
            }
            ValueCommand::DoubleStackSlot(index) => {
                Scalar::Number(f64::from_bits(self.stack_slot(index)?))
            }
            ValueCommand::Literal(index) => {
                let literal =
                    self.literals
                        .get(index)
                        .ok_or(TranslationError::LiteralOutOfRange {
                            index,
                            len: self.literals.len(),
                        })?;
                Scalar::Tagged(literal.to_word())
            }
            ValueCommand::Object { .. } | ValueCommand::DuplicatedObject(_) => {
                return Err(TranslationError::UnexpectedOpcode {
                    expected: "a scalar value command",
                    found: command.opcode(),
                }
                .into())
            }
        };
        Ok(scalar)
    }
}
