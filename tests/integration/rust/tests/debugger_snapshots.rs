//! Debugger inspection of optimized frames
//!
//! A snapshot reconstructs the unoptimized view of an activation without
//! touching the stack; only one may be outstanding per context.

use core_types::{BailoutId, Value};
use deoptimizer::arch::{DoubleRegister, Register};
use deoptimizer::translation::{Translation, TranslationBuffer};
use deoptimizer::{
    DeoptError, DeoptimizerConfig, ExecutionContext, ExecutionStack, LiteralPool, OptimizedCode,
    OptimizedCodeBuilder, SnapshotValue, SELF_LITERAL_ID,
};
use integration_tests::{init_tracing, make_function, FrameImage, SimulatedStack};
use std::sync::Arc;

struct Fixture {
    context: ExecutionContext,
    code: Arc<OptimizedCode>,
    stack: SimulatedStack,
    fp: usize,
}

/// `f(x)` with an inlined, adapted call `g(1, 2)` and a double local in `f`.
fn fixture() -> Fixture {
    init_tracing();
    let mut context = ExecutionContext::new(DeoptimizerConfig::default()).unwrap();
    let heap = context.heap_mut();
    let f = make_function(heap, "f", 1, Value::Null, &[(BailoutId(4), 0x10)]);
    let g = make_function(heap, "g", 0, Value::Null, &[(BailoutId(6), 0x20)]);

    let mut literals = LiteralPool::with_inlined_closures(&[g]);
    let undefined = literals.define(Value::Undefined);
    let mut buffer = TranslationBuffer::new();
    {
        let mut t = Translation::new(&mut buffer, 3, 2);
        t.begin_js_frame(BailoutId(4), SELF_LITERAL_ID, 4);
        t.store_stack_slot(-2);
        t.store_stack_slot(-1);
        t.store_double_register(DoubleRegister::from_code(1).unwrap());
        t.store_int32_register(Register::RAX);
        t.begin_arguments_adaptor_frame(0, 3);
        t.store_literal(undefined);
        t.store_int32_register(Register::RCX);
        t.store_int32_register(Register::RDX);
        t.begin_js_frame(BailoutId(6), 0, 1);
        t.store_literal(undefined);
    }
    let code = OptimizedCodeBuilder::new("f", f)
        .instructions(0x9000_0000, vec![0x90; 32])
        .frame(2, 0)
        .translations(buffer)
        .literals(literals)
        .deopt_point(BailoutId(4), 0, None)
        .build()
        .unwrap();
    context.register_code(Arc::clone(&code)).unwrap();

    let mut stack = SimulatedStack::new();
    let fp = stack.push_optimized(
        Arc::clone(&code),
        FrameImage::new(&code, 0x7000)
            .parameter(0, Value::Undefined)
            .parameter(1, Value::Smi(10))
            .context(Value::Null)
            .function(f)
            .double_register(DoubleRegister::from_code(1).unwrap(), 2.5)
            .register(Register::RAX, 7)
            .register(Register::RCX, 1)
            .register(Register::RDX, 2),
    );
    Fixture {
        context,
        code,
        stack,
        fp,
    }
}

fn inspect(fixture: &mut Fixture, js_index: usize) -> Result<deoptimizer::DeoptimizedFrameInfo, DeoptError> {
    fixture.context.debugger_inspect(
        Arc::clone(&fixture.code),
        0,
        fixture.fp,
        js_index,
        &fixture.stack,
    )
}

#[test]
fn test_outer_frame_snapshot() {
    let mut fixture = fixture();
    let info = inspect(&mut fixture, 0).unwrap();
    assert_eq!(info.function_name, "f");
    assert_eq!(info.node_id, BailoutId(4));
    assert_eq!(info.parameters, vec![SnapshotValue::Smi(10)]);
    assert_eq!(
        info.expression_stack,
        vec![SnapshotValue::Number(2.5), SnapshotValue::Smi(7)]
    );
    assert!(!info.has_construct_stub);
}

#[test]
fn test_inlined_frame_reads_adapted_arguments() {
    let mut fixture = fixture();
    let info = inspect(&mut fixture, 1).unwrap();
    assert_eq!(info.function_name, "g");
    assert_eq!(info.node_id, BailoutId(6));
    assert_eq!(
        info.parameters,
        vec![SnapshotValue::Smi(1), SnapshotValue::Smi(2)]
    );
    assert!(info.expression_stack.is_empty());
}

#[test]
fn test_inspection_leaves_stack_untouched() {
    let mut fixture = fixture();
    let before = fixture.stack.capture(fixture.fp).unwrap();

    let first = inspect(&mut fixture, 0).unwrap();
    assert!(fixture.context.release_debugger_snapshot());
    let second = inspect(&mut fixture, 0).unwrap();

    assert_eq!(first, second);
    assert_eq!(fixture.stack.capture(fixture.fp), Some(before));
    assert_eq!(fixture.stack.splice_count(), 0);
    assert_eq!(fixture.stack.optimized_count(), 1);
    assert!(fixture.context.data().is_idle());
    assert_eq!(fixture.context.stats().debugger_inspections, 2);
}

#[test]
fn test_one_snapshot_at_a_time() {
    let mut fixture = fixture();
    inspect(&mut fixture, 0).unwrap();
    assert_eq!(inspect(&mut fixture, 0), Err(DeoptError::SnapshotOutstanding));
    assert!(!fixture.context.is_aborted());

    assert!(fixture.context.release_debugger_snapshot());
    assert!(!fixture.context.release_debugger_snapshot());
    assert!(inspect(&mut fixture, 1).is_ok());
}

#[test]
fn test_missing_js_frame() {
    let mut fixture = fixture();
    assert_eq!(
        inspect(&mut fixture, 2),
        Err(DeoptError::NoSuchJsFrame { index: 2 })
    );
    assert!(!fixture.context.is_aborted());
    assert!(!fixture.context.data().has_debugger_snapshot());
}

#[test]
fn test_snapshot_survives_collection() {
    let mut fixture = fixture();
    inspect(&mut fixture, 0).unwrap();
    fixture.context.collect_garbage(&fixture.stack);

    let snapshot = fixture.context.data().debugger_snapshot().unwrap();
    let boxed = snapshot.output()[0].expression(0).unwrap();
    assert_eq!(fixture.context.heap().number_value(boxed), Some(2.5));
}

#[test]
fn test_snapshot_json() {
    let mut fixture = fixture();
    let info = inspect(&mut fixture, 0).unwrap();
    let json: serde_json::Value = serde_json::from_str(&info.to_json().unwrap()).unwrap();
    assert_eq!(json["function_name"], "f");
    assert_eq!(json["node_id"], 4);
    assert_eq!(json["expression_stack"][0]["type"], "Number");
    assert_eq!(json["expression_stack"][0]["value"], 2.5);
}
