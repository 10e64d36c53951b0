//! Property tests for encodings and address arithmetic

use core_types::{BailoutId, SmiRange, Value};
use deoptimizer::arch::{DoubleRegister, Register, NUMBER_OF_DOUBLE_REGISTERS, NUMBER_OF_REGISTERS};
use deoptimizer::translation::buffer::{encode_operand, MAX_ENCODED_LENGTH};
use deoptimizer::translation::{
    validate, FrameKind, ObjectKind, Translation, TranslationBuffer, TranslationHeader,
    TranslationIterator, TranslationReader, ValueCommand,
};
use deoptimizer::{
    BailoutType, DeoptRequest, DeoptimizerConfig, ExecutionContext, GetEntryMode,
    OptimizedCodeBuilder, SELF_LITERAL_ID,
};
use integration_tests::{make_function, FrameImage, SimulatedStack};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn bailout_type() -> impl Strategy<Value = BailoutType> {
    prop::sample::select(BailoutType::WITH_ENTRY_TABLES.to_vec())
}

/// Arbitrary operand, weighted towards the encoding's edge cases.
fn operand() -> impl Strategy<Value = i32> {
    prop_oneof![Just(0), Just(-1), Just(i32::MIN), Just(i32::MAX), any::<i32>()]
}

/// Heights, lengths and object indices.
fn count() -> impl Strategy<Value = u32> {
    prop_oneof![Just(0u32), Just(i32::MAX as u32), 0u32..=i32::MAX as u32]
}

fn register() -> impl Strategy<Value = Register> {
    (0..NUMBER_OF_REGISTERS as i32).prop_filter_map("register code", Register::from_code)
}

fn double_register() -> impl Strategy<Value = DoubleRegister> {
    (0..NUMBER_OF_DOUBLE_REGISTERS as i32)
        .prop_filter_map("double register code", DoubleRegister::from_code)
}

fn value_command() -> impl Strategy<Value = ValueCommand> {
    prop_oneof![
        prop_oneof![
            register().prop_map(ValueCommand::Register),
            register().prop_map(ValueCommand::Int32Register),
            register().prop_map(ValueCommand::Uint32Register),
            double_register().prop_map(ValueCommand::DoubleRegister),
        ],
        prop_oneof![
            operand().prop_map(ValueCommand::StackSlot),
            operand().prop_map(ValueCommand::Int32StackSlot),
            operand().prop_map(ValueCommand::Uint32StackSlot),
            operand().prop_map(ValueCommand::DoubleStackSlot),
            operand().prop_map(ValueCommand::Literal),
        ],
        prop_oneof![
            count().prop_map(ValueCommand::DuplicatedObject),
            count().prop_map(|field_count| ValueCommand::Object {
                kind: ObjectKind::Arguments,
                field_count,
            }),
            count().prop_map(|field_count| ValueCommand::Object {
                kind: ObjectKind::Captured,
                field_count,
            }),
        ],
    ]
}

/// One frame of every kind.
fn every_frame_kind() -> impl Strategy<Value = Vec<FrameKind>> {
    (
        (operand(), operand(), count()),
        (operand(), count()),
        (operand(), operand()),
        (operand(), count()),
        count(),
    )
        .prop_map(
            |((node, js_literal, js_height), (construct, construct_height), (getter, setter), (adaptor, adaptor_height), stub_height)| {
                vec![
                    FrameKind::JsFrame {
                        node_id: BailoutId(node),
                        literal_id: js_literal,
                        height: js_height,
                    },
                    FrameKind::ConstructStub {
                        literal_id: construct,
                        height: construct_height,
                    },
                    FrameKind::GetterStub { literal_id: getter },
                    FrameKind::SetterStub { literal_id: setter },
                    FrameKind::ArgumentsAdaptor {
                        literal_id: adaptor,
                        height: adaptor_height,
                    },
                    FrameKind::CompiledStub { height: stub_height },
                ]
            },
        )
}

/// One command of every kind followed by arbitrary extra commands.
fn every_value_command() -> impl Strategy<Value = Vec<ValueCommand>> {
    (
        (register(), register(), register(), double_register()),
        (operand(), operand(), operand(), operand(), operand()),
        (count(), count(), count()),
        prop::collection::vec(value_command(), 0..16),
    )
        .prop_map(|((r, r32, ru32, d), (s, s32, su32, sd, literal), (dup, args, captured), extra)| {
            let mut commands = vec![
                ValueCommand::Register(r),
                ValueCommand::Int32Register(r32),
                ValueCommand::Uint32Register(ru32),
                ValueCommand::DoubleRegister(d),
                ValueCommand::StackSlot(s),
                ValueCommand::Int32StackSlot(s32),
                ValueCommand::Uint32StackSlot(su32),
                ValueCommand::DoubleStackSlot(sd),
                ValueCommand::Literal(literal),
                ValueCommand::DuplicatedObject(dup),
                ValueCommand::Object {
                    kind: ObjectKind::Arguments,
                    field_count: args,
                },
                ValueCommand::Object {
                    kind: ObjectKind::Captured,
                    field_count: captured,
                },
            ];
            commands.extend(extra);
            commands
        })
}

/// The value commands that follow frame `frame`, dealt round-robin.
fn dealt(values: &[ValueCommand], frame: usize, frames: usize) -> impl Iterator<Item = &ValueCommand> {
    values.iter().skip(frame).step_by(frames)
}

fn emit_frame(t: &mut Translation<'_>, frame: FrameKind) {
    match frame {
        FrameKind::JsFrame {
            node_id,
            literal_id,
            height,
        } => t.begin_js_frame(node_id, literal_id, height),
        FrameKind::ConstructStub { literal_id, height } => {
            t.begin_construct_stub_frame(literal_id, height)
        }
        FrameKind::GetterStub { literal_id } => t.begin_getter_stub_frame(literal_id),
        FrameKind::SetterStub { literal_id } => t.begin_setter_stub_frame(literal_id),
        FrameKind::ArgumentsAdaptor { literal_id, height } => {
            t.begin_arguments_adaptor_frame(literal_id, height)
        }
        FrameKind::CompiledStub { height } => t.begin_compiled_stub_frame(height),
    }
}

fn emit_value(t: &mut Translation<'_>, command: ValueCommand) {
    match command {
        ValueCommand::Register(reg) => t.store_register(reg),
        ValueCommand::Int32Register(reg) => t.store_int32_register(reg),
        ValueCommand::Uint32Register(reg) => t.store_uint32_register(reg),
        ValueCommand::DoubleRegister(reg) => t.store_double_register(reg),
        ValueCommand::StackSlot(index) => t.store_stack_slot(index),
        ValueCommand::Int32StackSlot(index) => t.store_int32_stack_slot(index),
        ValueCommand::Uint32StackSlot(index) => t.store_uint32_stack_slot(index),
        ValueCommand::DoubleStackSlot(index) => t.store_double_stack_slot(index),
        ValueCommand::Literal(id) => t.store_literal(id),
        ValueCommand::DuplicatedObject(index) => t.duplicate_object(index),
        ValueCommand::Object {
            kind: ObjectKind::Arguments,
            field_count,
        } => t.begin_arguments_object(field_count),
        ValueCommand::Object {
            kind: ObjectKind::Captured,
            field_count,
        } => t.begin_captured_object(field_count),
    }
}

proptest! {
    #[test]
    fn prop_operands_decode_in_order(values in prop::collection::vec(any::<i32>(), 0..64)) {
        let mut buffer = TranslationBuffer::new();
        for value in &values {
            buffer.add(*value);
        }
        let mut iterator = TranslationIterator::new(buffer.as_bytes(), 0).unwrap();
        for value in &values {
            prop_assert_eq!(iterator.next().unwrap(), *value);
        }
        prop_assert!(!iterator.has_next());
    }

    #[test]
    fn prop_small_operands_stay_short(value in any::<i32>()) {
        let mut bytes = Vec::new();
        encode_operand(value, &mut bytes);
        prop_assert!(bytes.len() <= MAX_ENCODED_LENGTH);
        if (-64..64).contains(&value) {
            prop_assert_eq!(bytes.len(), 1);
        }
        // Only the last byte clears the continuation bit.
        let (last, rest) = bytes.split_last().unwrap();
        prop_assert_eq!(last & 1, 0);
        prop_assert!(rest.iter().all(|byte| byte & 1 == 1));
    }

    #[test]
    fn prop_translation_shape_is_recorded(
        heights in prop::collection::vec(1u32..8, 1..5),
    ) {
        let mut buffer = TranslationBuffer::new();
        buffer.add(-7);
        let index = buffer.current_index();
        {
            let count = heights.len() as i32;
            let mut t = Translation::new(&mut buffer, count, count);
            for (frame, height) in heights.iter().enumerate() {
                let literal = if frame == 0 { SELF_LITERAL_ID } else { frame as i32 };
                t.begin_js_frame(BailoutId(frame as i32), literal, *height);
                for slot in 0..*height {
                    t.store_stack_slot(slot as i32);
                }
            }
        }
        let summary = validate(buffer.as_bytes(), index).unwrap();
        prop_assert_eq!(summary.frame_count, heights.len());
        prop_assert_eq!(summary.js_frame_count, heights.len());
        prop_assert_eq!(summary.value_count, heights.iter().sum::<u32>() as usize);
        prop_assert_eq!(summary.length, buffer.as_bytes().len() - index);
    }

    /// Every opcode written through the builder reads back as the same
    /// typed command.
    #[test]
    fn prop_every_opcode_reads_back(
        frames in every_frame_kind(),
        values in every_value_command(),
    ) {
        let mut buffer = TranslationBuffer::new();
        buffer.add(i32::MIN);
        let index = {
            let mut t = Translation::new(&mut buffer, frames.len() as i32, 1);
            for (frame, kind) in frames.iter().enumerate() {
                emit_frame(&mut t, *kind);
                for command in dealt(&values, frame, frames.len()) {
                    emit_value(&mut t, *command);
                }
            }
            t.index()
        };

        let mut reader = TranslationReader::new(buffer.as_bytes(), index).unwrap();
        prop_assert_eq!(
            reader.read_header().unwrap(),
            TranslationHeader { frame_count: frames.len(), js_frame_count: 1 }
        );
        let mut opcodes = HashSet::new();
        for (frame, kind) in frames.iter().enumerate() {
            let decoded = reader.read_frame().unwrap();
            prop_assert_eq!(decoded, *kind);
            opcodes.insert(decoded.opcode());
            for command in dealt(&values, frame, frames.len()) {
                let decoded = reader.read_value().unwrap();
                prop_assert_eq!(decoded, *command);
                opcodes.insert(decoded.opcode());
            }
        }
        prop_assert!(reader.expect_end(frames.len() - 1).is_ok());
        prop_assert_eq!(reader.position(), buffer.as_bytes().len());
        // Frame and value opcodes plus BEGIN.
        prop_assert_eq!(opcodes.len() + 1, 19);
    }

    #[test]
    fn prop_entry_addresses_map_back(id in 0u32..2048, bailout_type in bailout_type()) {
        let mut context = ExecutionContext::new(DeoptimizerConfig::default()).unwrap();
        let address = context
            .get_deoptimization_entry(id, bailout_type, GetEntryMode::EnsureEntryCode)
            .unwrap()
            .unwrap();
        prop_assert_eq!(context.get_deoptimization_id(address, bailout_type), Some(id));
        let entry_size = context.data().generator().table_entry_size();
        if entry_size > 1 {
            prop_assert_eq!(context.get_deoptimization_id(address + 1, bailout_type), None);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Untagged integers become small integers when they fit the configured
    /// range and heap numbers otherwise.
    #[test]
    fn prop_int32_registers_are_tagged_or_boxed(n in any::<i32>(), wide in any::<bool>()) {
        let range = if wide { SmiRange::BITS_32 } else { SmiRange::BITS_31 };
        let config = DeoptimizerConfig::default().with_smi_range(range);
        let mut context = ExecutionContext::new(config).unwrap();
        let f = make_function(context.heap_mut(), "f", 0, Value::Null, &[(BailoutId(4), 0)]);
        let mut buffer = TranslationBuffer::new();
        {
            let mut t = Translation::new(&mut buffer, 1, 1);
            t.begin_js_frame(BailoutId(4), SELF_LITERAL_ID, 2);
            t.store_stack_slot(-1);
            t.store_int32_register(Register::RBX);
        }
        let code = OptimizedCodeBuilder::new("f", f)
            .instructions(0x9000_0000, vec![0x90; 16])
            .frame(1, 0)
            .translations(buffer)
            .deopt_point(BailoutId(4), 0, None)
            .build()
            .unwrap();
        context.register_code(Arc::clone(&code)).unwrap();

        let mut stack = SimulatedStack::new();
        let fp = stack.push_optimized(
            Arc::clone(&code),
            FrameImage::new(&code, 0x7000)
                .parameter(0, Value::Undefined)
                .context(Value::Null)
                .function(f)
                .register(Register::RBX, n as u32 as u64),
        );
        let request = DeoptRequest {
            code: Arc::clone(&code),
            bailout_type: BailoutType::Eager,
            deopt_id: 0,
            fp,
        };
        let record = context.deoptimize(request, &mut stack).unwrap();

        let value = stack.deoptimized_frames(fp).unwrap()[0].translated_value(1).unwrap();
        let fits = range.contains(i64::from(n));
        prop_assert_eq!(record.boxed_numbers, usize::from(!fits));
        if fits {
            prop_assert_eq!(value, Value::Smi(n));
        } else {
            prop_assert_eq!(context.heap().number_value(value), Some(f64::from(n)));
        }
    }
}
