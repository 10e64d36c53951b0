//! Memory Manager - Garbage collector and heap management
//!
//! This component provides:
//! - A non-moving object heap addressed by [`core_types::HeapRef`]
//! - Mark-and-sweep collection driven by caller-supplied root sets
//! - Allocation with bounded collect-and-retry on exhaustion
//! - Persistent handles for long-lived objects

pub mod error;
pub mod heap;
pub mod object;
pub mod roots;

// Re-export main types
pub use error::AllocationError;
pub use heap::{GcStats, Heap, HeapConfig};
pub use object::{ArgumentsObject, FunctionObject, HeapObject, JSObject, OBJECT_HEADER_SIZE};
pub use roots::{ChainedRoots, NoRoots, RootSet, RootVisitor};
