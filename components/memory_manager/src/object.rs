//! Heap object representation
//!
//! The deoptimizer materializes only a handful of object kinds: boxed numbers,
//! captured objects (a plain field array), and arguments objects. Functions
//! and ordinary objects exist so that literal pools and global-object
//! dependencies can reference them.

use core_types::{HeapRef, SharedFunctionInfo, Value};
use std::sync::Arc;

/// Size of the per-object header, in bytes.
pub const OBJECT_HEADER_SIZE: usize = 16;

const WORD_SIZE: usize = 8;

/// A closure: shared function info plus the context it closes over.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionObject {
    /// Shared metadata and unoptimized code
    pub shared: Arc<SharedFunctionInfo>,
    /// Context the closure was created in
    pub context: Value,
}

impl FunctionObject {
    /// Creates a closure over `context`.
    pub fn new(shared: Arc<SharedFunctionInfo>, context: Value) -> Self {
        Self { shared, context }
    }
}

/// An arguments object rebuilt for a deoptimized frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentsObject {
    /// The function whose arguments these are
    pub callee: Value,
    /// Backing store, in argument order
    pub elements: Vec<Value>,
}

/// JavaScript object with named properties
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JSObject {
    /// Property name/value pairs in insertion order
    pub properties: Vec<(String, Value)>,
}

impl JSObject {
    /// Create an empty object
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a property value by name
    pub fn get_property(&self, name: &str) -> Option<Value> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    /// Set a property value by name
    pub fn set_property(&mut self, name: String, value: Value) {
        match self.properties.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.properties.push((name, value)),
        }
    }
}

/// Any object that can live in the heap.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    /// Boxed IEEE 754 double
    HeapNumber(f64),
    /// Fixed-length field array; the shape of a captured object
    FixedArray(Vec<Value>),
    /// Arguments object
    Arguments(ArgumentsObject),
    /// Closure
    Function(FunctionObject),
    /// Ordinary object
    Object(JSObject),
}

impl HeapObject {
    /// Bytes this object occupies, header included.
    pub fn size_in_bytes(&self) -> usize {
        let payload = match self {
            HeapObject::HeapNumber(_) => WORD_SIZE,
            HeapObject::FixedArray(fields) => WORD_SIZE * (fields.len() + 1),
            HeapObject::Arguments(args) => WORD_SIZE * (args.elements.len() + 2),
            HeapObject::Function(_) => 4 * WORD_SIZE,
            HeapObject::Object(obj) => WORD_SIZE * (2 * obj.properties.len() + 1),
        };
        OBJECT_HEADER_SIZE + payload
    }

    /// Calls `f` for every heap reference held by this object.
    pub fn for_each_reference(&self, mut f: impl FnMut(HeapRef)) {
        let mut visit = |v: &Value| {
            if let Some(r) = v.as_heap_ref() {
                f(r);
            }
        };
        match self {
            HeapObject::HeapNumber(_) => {}
            HeapObject::FixedArray(fields) => fields.iter().for_each(&mut visit),
            HeapObject::Arguments(args) => {
                visit(&args.callee);
                args.elements.iter().for_each(&mut visit);
            }
            HeapObject::Function(function) => visit(&function.context),
            HeapObject::Object(obj) => obj.properties.iter().for_each(|(_, v)| visit(v)),
        }
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            HeapObject::HeapNumber(_) => "HeapNumber",
            HeapObject::FixedArray(_) => "FixedArray",
            HeapObject::Arguments(_) => "Arguments",
            HeapObject::Function(_) => "Function",
            HeapObject::Object(_) => "Object",
        }
    }
}
