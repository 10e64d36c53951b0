//! Debugger view of optimized frames
//!
//! A debugger inspecting an optimized activation sees the JS frames it
//! would have had without optimization. The snapshot is produced by a
//! [`BailoutType::Debugger`](crate::BailoutType::Debugger) deoptimization
//! that stops after materialization and leaves the stack untouched.

use crate::deoptimizer::Deoptimizer;
use crate::error::DeoptError;
use crate::frame_description::FrameType;
use crate::translation::FrameKind;
use core_types::{BailoutId, Value};
use memory_manager::{Heap, HeapObject};
use serde::{Deserialize, Serialize};

/// A frame value resolved through the heap, comparable across snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum SnapshotValue {
    /// undefined
    Undefined,
    /// null
    Null,
    /// A boolean
    Boolean(bool),
    /// A small integer
    Smi(i32),
    /// A boxed number
    Number(f64),
    /// A heap object other than a number or function
    Object {
        /// Object type name
        type_name: String,
    },
    /// A closure
    Function {
        /// Function name
        name: String,
    },
    /// The hole
    TheHole,
    /// A slot never filled in
    ArgumentsMarker,
}

impl SnapshotValue {
    /// Resolves `value` against `heap`.
    pub fn resolve(value: Value, heap: &Heap) -> Self {
        match value {
            Value::Undefined => SnapshotValue::Undefined,
            Value::Null => SnapshotValue::Null,
            Value::Boolean(b) => SnapshotValue::Boolean(b),
            Value::Smi(n) => SnapshotValue::Smi(n),
            Value::TheHole => SnapshotValue::TheHole,
            Value::ArgumentsMarker => SnapshotValue::ArgumentsMarker,
            Value::HeapObject(r) => match heap.get(r) {
                Some(HeapObject::HeapNumber(n)) => SnapshotValue::Number(*n),
                Some(HeapObject::Function(function)) => SnapshotValue::Function {
                    name: function.shared.name.clone(),
                },
                Some(object) => SnapshotValue::Object {
                    type_name: object.type_name().to_string(),
                },
                None => SnapshotValue::Object {
                    type_name: "<freed>".to_string(),
                },
            },
        }
    }
}

/// The unoptimized view of one JS frame of an optimized activation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeoptimizedFrameInfo {
    /// Function name
    pub function_name: String,
    /// Node id the frame would resume at
    pub node_id: BailoutId,
    /// Actual arguments, receiver excluded
    pub parameters: Vec<SnapshotValue>,
    /// Locals and temporaries, bottom first
    pub expression_stack: Vec<SnapshotValue>,
    /// Whether the frame was called as a constructor
    pub has_construct_stub: bool,
}

impl DeoptimizedFrameInfo {
    /// Builds the snapshot of the `js_index`-th JS frame (0 = outermost)
    /// of a materialized deoptimizer.
    pub fn new(deoptimizer: &Deoptimizer, js_index: usize, heap: &Heap) -> Result<Self, DeoptError> {
        let frame_index = deoptimizer
            .js_frame_index(js_index)
            .ok_or(DeoptError::NoSuchJsFrame { index: js_index })?;
        let output = deoptimizer.output();
        let frame = &output[frame_index];
        let resolve =
            |value: Option<Value>| SnapshotValue::resolve(value.unwrap_or(Value::Undefined), heap);

        let has_construct_stub =
            frame_index > 0 && output[frame_index - 1].frame_type() == FrameType::Construct;
        // Adapted calls keep the actual arguments in the adaptor frame.
        let parameters = match frame_index
            .checked_sub(1)
            .map(|index| &output[index])
            .filter(|previous| previous.frame_type() == FrameType::ArgumentsAdaptor)
        {
            Some(adaptor) => (1..adaptor.parameter_count())
                .map(|i| resolve(adaptor.parameter(i)))
                .collect(),
            None => (1..frame.parameter_count())
                .map(|i| resolve(frame.parameter(i)))
                .collect(),
        };
        let expression_stack = (0..frame.expression_count())
            .map(|i| resolve(frame.expression(i)))
            .collect();

        let function_name = match frame.function().as_heap_ref().and_then(|r| heap.get(r)) {
            Some(HeapObject::Function(function)) => function.shared.name.clone(),
            _ => String::new(),
        };
        let node_id = match deoptimizer.frame_kinds()[frame_index] {
            FrameKind::JsFrame { node_id, .. } => node_id,
            _ => BailoutId::NONE,
        };

        Ok(Self {
            function_name,
            node_id,
            parameters,
            expression_stack,
            has_construct_stub,
        })
    }

    /// Serializes the snapshot as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
