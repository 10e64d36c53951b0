//! Eager deoptimization of single-frame activations
//!
//! Drives the full pipeline through `ExecutionContext::deoptimize` against a
//! simulated stack and checks the rebuilt frame word by word.

use core_types::{BailoutId, ResumeState, Severity, Value, Word};
use deoptimizer::arch::{DoubleRegister, Register};
use deoptimizer::translation::{Translation, TranslationBuffer};
use deoptimizer::{
    BailoutType, Builtins, DeoptError, DeoptPhase, DeoptRequest, DeoptimizerConfig,
    ExecutionContext, FrameType, GetEntryMode, LiteralPool, OptimizedCode, OptimizedCodeBuilder,
    TranslationError, SELF_LITERAL_ID,
};
use integration_tests::{init_tracing, make_function, FrameImage, SimulatedStack, UNOPTIMIZED_CODE_START};
use memory_manager::HeapObject;
use std::sync::Arc;

const CODE_START: usize = 0x9000_0000;

fn context() -> ExecutionContext {
    init_tracing();
    ExecutionContext::new(DeoptimizerConfig::default()).unwrap()
}

/// `f()` with one local: the receiver comes from the stack, the local from
/// an untagged int32 in rbx.
fn receiver_and_local(context: &mut ExecutionContext) -> (Value, Arc<OptimizedCode>) {
    let f = make_function(context.heap_mut(), "f", 0, Value::Null, &[(BailoutId(4), 0x10)]);
    let mut buffer = TranslationBuffer::new();
    let index = {
        let mut t = Translation::new(&mut buffer, 1, 1);
        t.begin_js_frame(BailoutId(4), SELF_LITERAL_ID, 2);
        t.store_stack_slot(-1);
        t.store_int32_register(Register::RBX);
        t.index()
    };
    let code = OptimizedCodeBuilder::new("f", f)
        .instructions(CODE_START, vec![0x90; 32])
        .frame(1, 0)
        .translations(buffer)
        .deopt_point(BailoutId(4), index, None)
        .build()
        .unwrap();
    context.register_code(Arc::clone(&code)).unwrap();
    (f, code)
}

fn eager(code: &Arc<OptimizedCode>, fp: usize) -> DeoptRequest {
    DeoptRequest {
        code: Arc::clone(code),
        bailout_type: BailoutType::Eager,
        deopt_id: 0,
        fp,
    }
}

#[test]
fn test_single_js_frame() {
    let mut context = context();
    let (f, code) = receiver_and_local(&mut context);
    let image = FrameImage::new(&code, 0x7000)
        .parameter(0, Value::Smi(5))
        .caller(0x5555, 0x8000)
        .context(Value::Null)
        .function(f)
        .register(Register::RBX, 7);
    let mut stack = SimulatedStack::new();
    let fp = stack.push_optimized(Arc::clone(&code), image);

    let record = context.deoptimize(eager(&code, fp), &mut stack).unwrap();

    let frames = stack.deoptimized_frames(fp).unwrap();
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame.frame_type(), FrameType::JavaScript);
    assert_eq!(frame.translated_value(0), Some(Value::Smi(5)));
    assert_eq!(frame.translated_value(1), Some(Value::Smi(7)));
    assert_eq!(frame.frame_size(), 6 * 8);

    // The rebuilt frame keeps the optimized frame's fp and caller linkage.
    assert_eq!(frame.fp(), fp);
    assert_eq!(frame.top(), fp - frame.caller_fp_offset());
    assert_eq!(frame.get_frame_slot(frame.caller_pc_offset()), Some(0x5555));
    assert_eq!(frame.get_frame_slot(frame.caller_fp_offset()), Some(0x8000));
    assert!(!frame.is_tagged_slot(frame.caller_pc_offset()));

    assert_eq!(frame.context(), Value::Null);
    assert_eq!(frame.function(), f);
    assert_eq!(frame.pc(), UNOPTIMIZED_CODE_START + 0x10);
    assert_eq!(frame.state(), ResumeState::NoRegisters);
    assert_eq!(frame.continuation(), Builtins::default().notify_deoptimized);
    assert_eq!(frame.register(Register::FP), fp as Word);
    assert_eq!(frame.register(Register::CONTEXT), Value::Null.to_word());

    assert_eq!(record.function, "f");
    assert_eq!(record.node_id, BailoutId(4));
    assert_eq!(record.frame_count, 1);
    assert_eq!(record.js_frame_count, 1);
    assert_eq!(
        record.phases,
        vec![
            DeoptPhase::Captured,
            DeoptPhase::Translating,
            DeoptPhase::Materializing,
            DeoptPhase::Spliced
        ]
    );
    assert!(context.data().is_idle());
    assert_eq!(context.stats().eager, 1);
    assert_eq!(context.stats().frames_built, 1);
}

#[test]
fn test_captured_object_is_materialized() {
    let mut context = context();
    let f = make_function(context.heap_mut(), "f", 0, Value::Null, &[(BailoutId(4), 0x10)]);
    let mut literals = LiteralPool::new();
    let undefined = literals.define(Value::Undefined);
    let mut buffer = TranslationBuffer::new();
    let index = {
        let mut t = Translation::new(&mut buffer, 1, 1);
        t.begin_js_frame(BailoutId(4), SELF_LITERAL_ID, 2);
        t.store_stack_slot(-1);
        t.begin_captured_object(2);
        t.store_int32_register(Register::RCX);
        t.store_literal(undefined);
        t.index()
    };
    let code = OptimizedCodeBuilder::new("f", f)
        .instructions(CODE_START, vec![0x90; 32])
        .frame(1, 0)
        .translations(buffer)
        .literals(literals)
        .deopt_point(BailoutId(4), index, None)
        .build()
        .unwrap();
    context.register_code(Arc::clone(&code)).unwrap();

    let image = FrameImage::new(&code, 0x7000)
        .parameter(0, Value::Undefined)
        .context(Value::Null)
        .function(f)
        .register(Register::RCX, 42);
    let mut stack = SimulatedStack::new();
    let fp = stack.push_optimized(Arc::clone(&code), image);

    let record = context.deoptimize(eager(&code, fp), &mut stack).unwrap();
    assert_eq!(record.materialized_objects, 1);

    let frame = &stack.deoptimized_frames(fp).unwrap()[0];
    let object = frame.translated_value(1).and_then(Value::as_heap_ref).unwrap();
    assert_eq!(
        context.heap().get(object),
        Some(&HeapObject::FixedArray(vec![Value::Smi(42), Value::Undefined]))
    );
}

#[test]
fn test_out_of_range_integers_are_boxed() {
    let mut context = context();
    let f = make_function(context.heap_mut(), "f", 0, Value::Null, &[(BailoutId(4), 0x10)]);
    let mut buffer = TranslationBuffer::new();
    let index = {
        let mut t = Translation::new(&mut buffer, 1, 1);
        t.begin_js_frame(BailoutId(4), SELF_LITERAL_ID, 4);
        t.store_stack_slot(-1);
        t.store_int32_register(Register::RAX);
        t.store_uint32_register(Register::RBX);
        t.store_double_stack_slot(0);
        t.index()
    };
    let code = OptimizedCodeBuilder::new("f", f)
        .instructions(CODE_START, vec![0x90; 32])
        .frame(1, 1)
        .translations(buffer)
        .deopt_point(BailoutId(4), index, None)
        .build()
        .unwrap();
    context.register_code(Arc::clone(&code)).unwrap();

    let image = FrameImage::new(&code, 0x7000)
        .parameter(0, Value::Undefined)
        .context(Value::Null)
        .function(f)
        .register(Register::RAX, (1u64 << 30) as Word)
        .register(Register::RBX, 0xFFFF_FFFF)
        .spill_slot(0, 0.5f64.to_bits());
    let mut stack = SimulatedStack::new();
    let fp = stack.push_optimized(Arc::clone(&code), image);

    let record = context.deoptimize(eager(&code, fp), &mut stack).unwrap();
    assert_eq!(record.boxed_numbers, 3);

    let frame = &stack.deoptimized_frames(fp).unwrap()[0];
    let number = |index| {
        frame
            .translated_value(index)
            .and_then(|value| context.heap().number_value(value))
    };
    assert_eq!(number(1), Some(1073741824.0));
    assert_eq!(number(2), Some(4294967295.0));
    assert_eq!(number(3), Some(0.5));
}

#[test]
fn test_compiled_stub_frame() {
    let mut context = context();
    let f = make_function(context.heap_mut(), "stub", 0, Value::Null, &[]);
    let mut buffer = TranslationBuffer::new();
    let index = {
        let mut t = Translation::new(&mut buffer, 1, 0);
        t.begin_compiled_stub_frame(2);
        t.store_register(Register::RAX);
        t.store_double_register(DoubleRegister::from_code(0).unwrap());
        t.index()
    };
    let code = OptimizedCodeBuilder::new("stub", f)
        .instructions(CODE_START, vec![0x90; 32])
        .frame(1, 0)
        .translations(buffer)
        .deopt_point(BailoutId::NONE, index, None)
        .build()
        .unwrap();
    context.register_code(Arc::clone(&code)).unwrap();

    let image = FrameImage::new(&code, 0x7000)
        .context(Value::Null)
        .function(f)
        .register(Register::RAX, Value::Smi(3).to_word())
        .double_register(DoubleRegister::from_code(0).unwrap(), 1.5);
    let mut stack = SimulatedStack::new();
    let fp = stack.push_optimized(Arc::clone(&code), image);

    context.deoptimize(eager(&code, fp), &mut stack).unwrap();

    let builtins = Builtins::default();
    let frame = &stack.deoptimized_frames(fp).unwrap()[0];
    assert_eq!(frame.frame_type(), FrameType::StubFailureTrampoline);
    assert_eq!(frame.frame_size(), 6 * 8);
    assert_eq!(frame.context(), Value::Null);
    assert_eq!(
        frame.get_value(16),
        Some(FrameType::StubFailureTrampoline.marker())
    );
    assert_eq!(frame.get_value(8), Some(Value::Smi(3)));
    let boxed = frame.get_value(0).unwrap();
    assert_eq!(context.heap().number_value(boxed), Some(1.5));
    assert_eq!(frame.pc(), builtins.stub_failure_trampoline);
    assert_eq!(frame.state(), ResumeState::NoRegisters);
    assert_eq!(frame.continuation(), builtins.notify_stub_failure);
}

#[test]
fn test_deoptimize_at_entry_address() {
    let mut context = context();
    let (f, code) = receiver_and_local(&mut context);
    let image = FrameImage::new(&code, 0x7000)
        .parameter(0, Value::Smi(1))
        .context(Value::Null)
        .function(f);
    let mut stack = SimulatedStack::new();
    let fp = stack.push_optimized(Arc::clone(&code), image);

    let entry = context
        .get_deoptimization_entry(0, BailoutType::Soft, GetEntryMode::EnsureEntryCode)
        .unwrap()
        .unwrap();

    // A stray address is reported without harming the context.
    assert!(matches!(
        context.deoptimize_at_entry(Arc::clone(&code), entry + 3, BailoutType::Soft, fp, &mut stack),
        Err(DeoptError::NotAnEntry { .. })
    ));
    assert!(!context.is_aborted());

    let record = context
        .deoptimize_at_entry(Arc::clone(&code), entry, BailoutType::Soft, fp, &mut stack)
        .unwrap();
    assert_eq!(record.bailout_type, BailoutType::Soft);
    assert_eq!(record.deopt_id, 0);
    let frame = &stack.deoptimized_frames(fp).unwrap()[0];
    assert_eq!(frame.continuation(), Builtins::default().notify_soft_deoptimized);
    assert_eq!(context.stats().soft, 1);
}

#[test]
fn test_overlapping_deoptimization_aborts_context() {
    let mut context = context();
    let (f, code) = receiver_and_local(&mut context);
    let mut stack = SimulatedStack::new();
    let first = stack.push_optimized(
        Arc::clone(&code),
        FrameImage::new(&code, 0x7000).context(Value::Null).function(f),
    );
    let second = stack.push_optimized(
        Arc::clone(&code),
        FrameImage::new(&code, 0x7100).context(Value::Null).function(f),
    );

    context.new_deoptimizer(&eager(&code, first), &stack).unwrap();
    let err = context
        .new_deoptimizer(&eager(&code, second), &stack)
        .unwrap_err();
    assert_eq!(err, DeoptError::DeoptimizationInProgress);
    assert!(err.is_fatal());
    assert!(context.is_aborted());

    // The first deoptimizer is left where it was.
    let pending = context.data().pending().unwrap();
    assert_eq!(pending.input().fp(), first);
    assert_eq!(pending.phase(), DeoptPhase::Captured);

    assert!(matches!(
        context.deoptimize(eager(&code, second), &mut stack),
        Err(DeoptError::ContextAborted { .. })
    ));
    assert_eq!(stack.splice_count(), 0);
}

#[test]
fn test_grab_and_release_by_hand() {
    let mut context = context();
    let (f, code) = receiver_and_local(&mut context);
    let mut stack = SimulatedStack::new();
    let fp = stack.push_optimized(
        Arc::clone(&code),
        FrameImage::new(&code, 0x7000)
            .parameter(0, Value::Smi(9))
            .context(Value::Null)
            .function(f),
    );

    context.new_deoptimizer(&eager(&code, fp), &stack).unwrap();
    assert!(context.data().has_pending());
    let deoptimizer = context.grab_deoptimizer().unwrap();
    assert!(!context.data().is_idle());
    assert_eq!(deoptimizer.deopt_id(), 0);
    assert_eq!(deoptimizer.input().fp(), fp);
    context.release_deoptimizer(deoptimizer);
    assert!(context.data().is_idle());
    assert!(matches!(
        context.grab_deoptimizer(),
        Err(DeoptError::NoPendingDeoptimizer)
    ));
    assert!(!context.is_aborted());
}

#[test]
fn test_unknown_deopt_id_is_fatal() {
    let mut context = context();
    let (f, code) = receiver_and_local(&mut context);
    let mut stack = SimulatedStack::new();
    let fp = stack.push_optimized(
        Arc::clone(&code),
        FrameImage::new(&code, 0x7000).context(Value::Null).function(f),
    );
    let request = DeoptRequest {
        deopt_id: 7,
        ..eager(&code, fp)
    };
    assert!(matches!(
        context.deoptimize(request, &mut stack),
        Err(DeoptError::UnknownDeoptimizationId { deopt_id: 7, .. })
    ));
    assert!(context.is_aborted());
    assert_eq!(stack.optimized_count(), 1);
}

#[test]
fn test_missing_frame_is_fatal() {
    let mut context = context();
    let (_, code) = receiver_and_local(&mut context);
    let mut stack = SimulatedStack::new();
    assert_eq!(
        context.deoptimize(eager(&code, 0x1234), &mut stack),
        Err(DeoptError::FrameNotFound { fp: 0x1234 })
    );
    assert!(context.is_aborted());
}

#[test]
fn test_missing_output_entry_resets_slot() {
    let mut context = context();
    // No resume point for node 4.
    let f = make_function(context.heap_mut(), "f", 0, Value::Null, &[(BailoutId(8), 0x10)]);
    let mut buffer = TranslationBuffer::new();
    let index = {
        let mut t = Translation::new(&mut buffer, 1, 1);
        t.begin_js_frame(BailoutId(4), SELF_LITERAL_ID, 1);
        t.store_stack_slot(-1);
        t.index()
    };
    let code = OptimizedCodeBuilder::new("f", f)
        .frame(1, 0)
        .translations(buffer)
        .deopt_point(BailoutId(4), index, None)
        .build()
        .unwrap();
    let mut stack = SimulatedStack::new();
    let fp = stack.push_optimized(
        Arc::clone(&code),
        FrameImage::new(&code, 0x7000).context(Value::Null).function(f),
    );

    let err = context.deoptimize(eager(&code, fp), &mut stack).unwrap_err();
    assert!(matches!(err, DeoptError::MissingOutputEntry { node_id: 4, .. }));
    assert!(context.is_aborted());
    assert!(context.data().is_idle());
    assert_eq!(stack.splice_count(), 0);
}

#[test]
fn test_untagged_context_slot_is_rejected() {
    let mut context = context();
    let (f, code) = receiver_and_local(&mut context);
    let mut stack = SimulatedStack::new();
    // 0b11 is not a valid tagged word.
    let fp = stack.push_optimized(
        Arc::clone(&code),
        FrameImage::new(&code, 0x7000).context_word(0b11).function(f),
    );
    assert_eq!(
        context.deoptimize(eager(&code, fp), &mut stack),
        Err(DeoptError::UntaggedField(0b11))
    );
    assert!(context.is_aborted());
}

#[test]
fn test_stack_slot_outside_frame_is_rejected() {
    let mut context = context();
    let f = make_function(context.heap_mut(), "f", 0, Value::Null, &[(BailoutId(4), 0x10)]);
    let mut buffer = TranslationBuffer::new();
    let index = {
        let mut t = Translation::new(&mut buffer, 1, 1);
        t.begin_js_frame(BailoutId(4), SELF_LITERAL_ID, 1);
        t.store_stack_slot(12);
        t.index()
    };
    let code = OptimizedCodeBuilder::new("f", f)
        .frame(1, 0)
        .translations(buffer)
        .deopt_point(BailoutId(4), index, None)
        .build()
        .unwrap();
    let mut stack = SimulatedStack::new();
    let fp = stack.push_optimized(
        Arc::clone(&code),
        FrameImage::new(&code, 0x7000).context(Value::Null).function(f),
    );
    assert_eq!(
        context.deoptimize(eager(&code, fp), &mut stack),
        Err(DeoptError::Translation(TranslationError::StackSlotOutOfRange {
            index: 12
        }))
    );
}

#[test]
fn test_duplicated_object_resolves_to_same_reference() {
    let mut context = context();
    let f = make_function(context.heap_mut(), "f", 0, Value::Null, &[(BailoutId(4), 0x10)]);
    let mut buffer = TranslationBuffer::new();
    let index = {
        let mut t = Translation::new(&mut buffer, 1, 1);
        t.begin_js_frame(BailoutId(4), SELF_LITERAL_ID, 4);
        t.store_stack_slot(-1);
        t.begin_captured_object(1);
        t.store_double_register(DoubleRegister::from_code(2).unwrap());
        t.duplicate_object(0);
        // An equal value that is not the same object.
        t.store_double_register(DoubleRegister::from_code(2).unwrap());
        t.index()
    };
    let code = OptimizedCodeBuilder::new("f", f)
        .instructions(CODE_START, vec![0x90; 32])
        .frame(1, 0)
        .translations(buffer)
        .deopt_point(BailoutId(4), index, None)
        .build()
        .unwrap();
    context.register_code(Arc::clone(&code)).unwrap();

    let image = FrameImage::new(&code, 0x7000)
        .parameter(0, Value::Undefined)
        .context(Value::Null)
        .function(f)
        .double_register(DoubleRegister::from_code(2).unwrap(), 6.5);
    let mut stack = SimulatedStack::new();
    let fp = stack.push_optimized(Arc::clone(&code), image);
    let live_before = context.heap().live_objects();

    context.deoptimize(eager(&code, fp), &mut stack).unwrap();

    let frame = &stack.deoptimized_frames(fp).unwrap()[0];
    let object = frame.translated_value(1).unwrap();
    assert_eq!(frame.translated_value(2), Some(object));
    // One object, its boxed field and the separately boxed local.
    assert_eq!(context.heap().live_objects(), live_before + 3);

    let heap = context.heap();
    let field = match object.as_heap_ref().and_then(|r| heap.get(r)) {
        Some(HeapObject::FixedArray(fields)) => fields[0],
        other => panic!("expected a captured object, found {other:?}"),
    };
    let local = frame.translated_value(3).unwrap();
    assert_ne!(field, local);
    assert_eq!(heap.number_value(field), heap.number_value(local));
}

#[test]
fn test_untagged_stack_slots() {
    let mut context = context();
    let f = make_function(context.heap_mut(), "f", 0, Value::Null, &[(BailoutId(4), 0x10)]);
    let mut buffer = TranslationBuffer::new();
    let index = {
        let mut t = Translation::new(&mut buffer, 1, 1);
        t.begin_js_frame(BailoutId(4), SELF_LITERAL_ID, 4);
        t.store_stack_slot(-1);
        t.store_int32_stack_slot(0);
        t.store_uint32_stack_slot(1);
        t.store_uint32_stack_slot(2);
        t.index()
    };
    let code = OptimizedCodeBuilder::new("f", f)
        .instructions(CODE_START, vec![0x90; 32])
        .frame(1, 3)
        .translations(buffer)
        .deopt_point(BailoutId(4), index, None)
        .build()
        .unwrap();
    context.register_code(Arc::clone(&code)).unwrap();

    // Only the low 32 bits of a spilled integer are meaningful.
    let image = FrameImage::new(&code, 0x7000)
        .parameter(0, Value::Undefined)
        .context(Value::Null)
        .function(f)
        .spill_slot(0, 0xDEAD_0000_FFFF_FFFB)
        .spill_slot(1, 0xFFFF_FFFF)
        .spill_slot(2, 7);
    let mut stack = SimulatedStack::new();
    let fp = stack.push_optimized(Arc::clone(&code), image);

    let record = context.deoptimize(eager(&code, fp), &mut stack).unwrap();

    let frame = &stack.deoptimized_frames(fp).unwrap()[0];
    assert_eq!(frame.translated_value(1), Some(Value::Smi(-5)));
    assert_eq!(frame.translated_value(3), Some(Value::Smi(7)));
    let boxed = frame.translated_value(2).unwrap();
    assert_eq!(context.heap().number_value(boxed), Some(4_294_967_295.0));
    assert!(boxed.as_heap_ref().is_some());
    assert_eq!(record.boxed_numbers, 1);
}
