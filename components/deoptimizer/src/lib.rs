//! Deoptimizer for optimized JavaScript code
//!
//! When speculative optimized code hits a failed assumption, the deoptimizer
//! rebuilds the equivalent unoptimized activations and hands control back to
//! the unoptimized tier. This crate provides:
//! - Translation encoding: the compact byte stream the optimizing compiler
//!   emits per deoptimization point
//! - Frame descriptions for captured and reconstructed frames
//! - The engine: translating one optimized frame into a sequence of JS,
//!   adaptor, construct, accessor and stub frames
//! - Materialization of escaped objects and boxed numbers
//! - Entry tables, lazy patching and the per-context in-flight slot
//!
//! # Example
//!
//! ```
//! use deoptimizer::{BailoutType, ExecutionContext, DeoptimizerConfig, GetEntryMode};
//!
//! let mut context = ExecutionContext::new(DeoptimizerConfig::default()).unwrap();
//! let entry = context
//!     .get_deoptimization_entry(3, BailoutType::Eager, GetEntryMode::EnsureEntryCode)
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(context.get_deoptimization_id(entry, BailoutType::Eager), Some(3));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arch;
pub mod builtins;
pub mod code;
pub mod config;
pub mod context;
pub mod data;
pub mod debugger;
pub mod deferred;
pub mod deoptimizer;
pub mod entry_table;
pub mod error;
pub mod frame_description;
pub mod literals;
mod materialize;
pub mod registry;
pub mod stack;
pub mod translation;

// Re-export main types at crate root
pub use builtins::{BuiltinCode, Builtins};
pub use code::{
    CodeId, DeoptimizationEntry, DeoptimizationInputData, OptimizedCode, OptimizedCodeBuilder,
};
pub use config::{DeoptimizerConfig, MAX_NUMBER_OF_ENTRIES, MIN_NUMBER_OF_ENTRIES};
pub use context::{DeoptRecord, DeoptStats, ExecutionContext};
pub use data::DeoptimizerData;
pub use debugger::{DeoptimizedFrameInfo, SnapshotValue};
pub use deferred::{DeferredObjects, SlotAddress};
pub use deoptimizer::{BailoutType, DeoptPhase, DeoptRequest, Deoptimizer};
pub use entry_table::{
    EntryCodeGenerator, EntryTable, GetEntryMode, JumpTable, JumpTableEntry, X64EntryGenerator,
    ENTRY_REGION_BASE,
};
pub use error::{DeoptError, TranslationError};
pub use frame_description::{FrameDescription, FrameType};
pub use literals::LiteralPool;
pub use registry::{CodeRegistry, OptimizedFunctionVisitor};
pub use stack::{capture_input_frame, Activation, CapturedFrame, ExecutionStack, StackRoots};
pub use translation::{Opcode, Translation, TranslationBuffer, TranslationIterator, SELF_LITERAL_ID};
