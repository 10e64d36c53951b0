//! Core value types shared by the heap and the deoptimizer.
//!
//! This crate provides the foundational types of the runtime: the tagged
//! value model and its machine-word encoding, function metadata published by
//! the unoptimized tier, and error classification.
//!
//! # Overview
//!
//! - [`Value`] - Tagged representation of values held in frame slots
//! - [`SmiRange`] - Configurable small-integer range
//! - [`SharedFunctionInfo`] - Function metadata and unoptimized code
//! - [`BailoutId`] - Speculation point identifier
//! - [`ErrorSeverity`] - Fatal vs. recoverable errors
//!
//! # Examples
//!
//! ```
//! use core_types::{SmiRange, Value};
//!
//! let range = SmiRange::BITS_31;
//! assert_eq!(Value::smi_in_range(42, range), Some(Value::Smi(42)));
//! assert_eq!(Value::smi_in_range(1 << 30, range), None);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

mod error;
mod function;
mod value;

pub use error::{ErrorSeverity, Severity};
pub use function::{BailoutId, OutputEntry, ResumeState, SharedFunctionInfo, UnoptimizedCode};
pub use value::{Address, HeapRef, SmiRange, Value, Word};
