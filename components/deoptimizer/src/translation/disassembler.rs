//! Structural validation and human-readable listings of translations.

use super::{FrameKind, TranslationReader, ValueCommand};
use crate::error::TranslationError;
use std::fmt::Write;

/// Shape of a well-formed translation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TranslationSummary {
    /// Frame groups
    pub frame_count: usize,
    /// JS frame groups
    pub js_frame_count: usize,
    /// Value commands, nested fields included
    pub value_count: usize,
    /// Nested objects started (duplicates included)
    pub object_count: usize,
    /// Bytes consumed
    pub length: usize,
}

enum Event<'e> {
    Frame(usize, &'e FrameKind),
    Value(usize, &'e ValueCommand),
}

fn walk(
    bytes: &[u8],
    index: usize,
    mut on_event: impl FnMut(Event<'_>),
) -> Result<TranslationSummary, TranslationError> {
    let mut reader = TranslationReader::new(bytes, index)?;
    let header = reader.read_header()?;
    let mut summary = TranslationSummary {
        frame_count: header.frame_count,
        ..TranslationSummary::default()
    };

    for frame_index in 0..header.frame_count {
        let frame = reader.read_frame()?;
        if frame.is_js_frame() {
            summary.js_frame_count += 1;
        }
        on_event(Event::Frame(frame_index, &frame));

        // Commands still owed at each nesting level.
        let mut pending = vec![frame.height()];
        while let Some(remaining) = pending.last_mut() {
            if *remaining == 0 {
                pending.pop();
                continue;
            }
            *remaining -= 1;
            let depth = pending.len();
            let command = reader.read_value()?;
            summary.value_count += 1;
            on_event(Event::Value(depth, &command));
            match command {
                ValueCommand::Object { field_count, .. } => {
                    summary.object_count += 1;
                    pending.push(field_count);
                }
                ValueCommand::DuplicatedObject(target) => {
                    if target as usize >= summary.object_count {
                        return Err(TranslationError::UnknownDuplicate {
                            target,
                            defined: summary.object_count,
                        });
                    }
                    summary.object_count += 1;
                }
                _ => {}
            }
        }
    }

    if summary.js_frame_count != header.js_frame_count {
        return Err(TranslationError::JsFrameCountMismatch {
            declared: header.js_frame_count,
            found: summary.js_frame_count,
        });
    }
    reader.expect_end(header.frame_count - 1)?;
    summary.length = reader.position() - index;
    Ok(summary)
}

/// Checks that the translation at `index` is well formed.
///
/// Every frame group must carry exactly its declared height in value
/// commands (nested object fields counted at their own level), duplicate
/// references must point backwards, and the declared JS frame count must
/// match.
pub fn validate(bytes: &[u8], index: usize) -> Result<TranslationSummary, TranslationError> {
    walk(bytes, index, |_| {})
}

/// Renders the translation at `index` one command per line.
pub fn disassemble(bytes: &[u8], index: usize) -> Result<String, TranslationError> {
    let mut out = String::new();
    let summary = walk(bytes, index, |event| {
        // Writing to a String cannot fail.
        let _ = match event {
            Event::Frame(frame_index, kind) => {
                writeln!(out, "  frame {frame_index}: {}", describe_frame(kind))
            }
            Event::Value(depth, command) => {
                writeln!(
                    out,
                    "{:indent$}{}",
                    "",
                    describe_value(command),
                    indent = 2 + 2 * depth
                )
            }
        };
    })?;
    Ok(format!(
        "translation @{index}: {} frames ({} JS), {} values, {} objects\n{out}",
        summary.frame_count, summary.js_frame_count, summary.value_count, summary.object_count
    ))
}

fn describe_frame(kind: &FrameKind) -> String {
    match kind {
        FrameKind::JsFrame {
            node_id,
            literal_id,
            height,
        } => format!("{} node={node_id} function={literal_id} height={height}", kind.opcode()),
        FrameKind::ConstructStub { literal_id, height }
        | FrameKind::ArgumentsAdaptor { literal_id, height } => {
            format!("{} function={literal_id} height={height}", kind.opcode())
        }
        FrameKind::GetterStub { literal_id } | FrameKind::SetterStub { literal_id } => {
            format!("{} function={literal_id}", kind.opcode())
        }
        FrameKind::CompiledStub { height } => format!("{} height={height}", kind.opcode()),
    }
}

fn describe_value(command: &ValueCommand) -> String {
    let opcode = command.opcode();
    match command {
        ValueCommand::Register(reg)
        | ValueCommand::Int32Register(reg)
        | ValueCommand::Uint32Register(reg) => format!("{opcode} {reg}"),
        ValueCommand::DoubleRegister(reg) => format!("{opcode} {reg}"),
        ValueCommand::StackSlot(index)
        | ValueCommand::Int32StackSlot(index)
        | ValueCommand::Uint32StackSlot(index)
        | ValueCommand::DoubleStackSlot(index) => format!("{opcode} [{index}]"),
        ValueCommand::Literal(index) => format!("{opcode} #{index}"),
        ValueCommand::DuplicatedObject(target) => format!("{opcode} ->{target}"),
        ValueCommand::Object { field_count, .. } => format!("{opcode} fields={field_count}"),
    }
}
