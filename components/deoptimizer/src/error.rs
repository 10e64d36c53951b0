//! Error types for the deoptimizer
//!
//! Almost everything here is fatal: a malformed translation or an entry-table
//! overflow means the compiler, code generator and deoptimizer disagree about
//! a contract, and the owning execution context is aborted.

use crate::deoptimizer::{BailoutType, DeoptPhase};
use crate::translation::Opcode;
use core_types::{Address, ErrorSeverity, Severity, Word};
use memory_manager::AllocationError;
use thiserror::Error;

/// Errors raised while decoding a translation stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslationError {
    /// Read past the end of the buffer.
    #[error("translation stream ends unexpectedly at byte {position}")]
    UnexpectedEnd {
        /// Byte offset of the failed read
        position: usize,
    },
    /// A variable-length integer was longer than five bytes.
    #[error("variable-length operand at byte {position} does not fit in 32 bits")]
    Overlong {
        /// Byte offset where the operand starts
        position: usize,
    },
    /// Start index outside the buffer.
    #[error("translation index {index} outside buffer of {len} bytes")]
    IndexOutOfRange {
        /// Requested start index
        index: usize,
        /// Buffer length
        len: usize,
    },
    /// Opcode value not in the opcode set.
    #[error("unknown translation opcode {value}")]
    UnknownOpcode {
        /// Decoded value
        value: i32,
    },
    /// Valid opcode in the wrong position.
    #[error("expected {expected}, found {found}")]
    UnexpectedOpcode {
        /// What the reader expected
        expected: &'static str,
        /// What it found
        found: Opcode,
    },
    /// Operand outside the legal range for its opcode.
    #[error("invalid operand {value} for {opcode}")]
    InvalidOperand {
        /// Opcode carrying the operand
        opcode: Opcode,
        /// Offending operand
        value: i32,
    },
    /// `BEGIN` declares more JS frames than frames.
    #[error("translation declares {js_frame_count} JS frames but only {frame_count} frames")]
    FrameCountMismatch {
        /// Declared frame count
        frame_count: i32,
        /// Declared JS frame count
        js_frame_count: i32,
    },
    /// The number of JS frames decoded differs from the declared count.
    #[error("translation declares {declared} JS frames but contains {found}")]
    JsFrameCountMismatch {
        /// Declared
        declared: usize,
        /// Decoded
        found: usize,
    },
    /// A frame declared fewer values than the stream carries.
    #[error("frame group {frame_index} ends with undeclared value commands")]
    TrailingValues {
        /// Index of the last frame group
        frame_index: usize,
    },
    /// JS frame height smaller than its parameter count.
    #[error("JS frame height {height} is smaller than its {parameter_count} parameters")]
    HeightBelowParameterCount {
        /// Declared height
        height: u32,
        /// Parameters including the receiver
        parameter_count: u32,
    },
    /// Literal index not in the literal pool.
    #[error("literal index {index} outside pool of {len} literals")]
    LiteralOutOfRange {
        /// Requested index
        index: i32,
        /// Pool size
        len: usize,
    },
    /// The self-literal marker outside the bottommost JS frame.
    #[error("self literal used outside the bottommost frame (frame {frame_index})")]
    SelfLiteralMisuse {
        /// Frame group using it
        frame_index: usize,
    },
    /// `DUPLICATED_OBJECT` referring forward or out of range.
    #[error("duplicated object refers to object {target} but only {defined} objects are defined")]
    UnknownDuplicate {
        /// Referenced object index
        target: u32,
        /// Objects defined so far
        defined: usize,
    },
    /// Stack slot index outside the captured input frame.
    #[error("stack slot {index} lies outside the input frame")]
    StackSlotOutOfRange {
        /// Slot index from the translation
        index: i32,
    },
    /// A frame kind placed where the output frame sequence cannot host it.
    #[error("{kind} cannot be frame {frame_index} of {frame_count}")]
    InvalidFramePosition {
        /// Frame kind name
        kind: &'static str,
        /// Position in the output
        frame_index: usize,
        /// Total frames
        frame_count: usize,
    },
}

impl Severity for TranslationError {
    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Fatal
    }
}

/// Errors raised by the deoptimization engine and its owners.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeoptError {
    /// Translation stream rejected.
    #[error("corrupt translation: {0}")]
    Translation(#[from] TranslationError),
    /// Materialization could not allocate.
    #[error("materialization failed: {0}")]
    Allocation(#[from] AllocationError),
    /// Another deoptimization is in flight on this context.
    #[error("a deoptimization is already in flight on this context")]
    DeoptimizationInProgress,
    /// `grab` without a pending deoptimizer.
    #[error("no pending deoptimizer to grab")]
    NoPendingDeoptimizer,
    /// Entry id beyond the configured cap.
    #[error("deoptimization entry {id} for {bailout_type} exceeds the maximum of {max} entries")]
    EntryTableExhausted {
        /// Requested id
        id: u32,
        /// Bailout type
        bailout_type: BailoutType,
        /// Configured cap
        max: usize,
    },
    /// Bailout type without entry code.
    #[error("{0} bailouts have no entry table")]
    NoEntryTable(BailoutType),
    /// Address is not an entry of the given table.
    #[error("address {address:#x} is not a {bailout_type} deoptimization entry")]
    NotAnEntry {
        /// Queried address
        address: Address,
        /// Table searched
        bailout_type: BailoutType,
    },
    /// Deoptimization id not recorded in the code's input data.
    #[error("code {code} has no deoptimization point {deopt_id}")]
    UnknownDeoptimizationId {
        /// Code object name
        code: String,
        /// Requested id
        deopt_id: u32,
    },
    /// Return address that matches no lazy call site.
    #[error("no lazy deoptimization site returns to pc {pc:#x}")]
    NoLazySite {
        /// Return address
        pc: Address,
    },
    /// Node id missing from the unoptimized code's output table.
    #[error("function {function} has no output entry for node {node_id}")]
    MissingOutputEntry {
        /// Function name
        function: String,
        /// Node id
        node_id: i32,
    },
    /// A value expected to be a function is not one.
    #[error("expected a function, found {0}")]
    NotAFunction(String),
    /// The execution stack has no optimized frame at `fp`.
    #[error("no optimized frame at fp {fp:#x}")]
    FrameNotFound {
        /// Requested frame pointer
        fp: Address,
    },
    /// Captured frame has the wrong shape for its code.
    #[error("captured frame has {actual} words, expected {expected}")]
    InputFrameSize {
        /// Words expected from the code's layout
        expected: usize,
        /// Words captured
        actual: usize,
    },
    /// A duplicated object resolved to one that was never materialized.
    #[error("duplicated object {index} has not been materialized")]
    UnresolvedDuplicate {
        /// Object index
        index: usize,
    },
    /// A deferred field word is not a valid tagged value.
    #[error("deferred field holds untagged word {0:#x}")]
    UntaggedField(Word),
    /// Operation invoked in the wrong pipeline phase.
    #[error("operation requires phase {expected:?}, deoptimizer is in {actual:?}")]
    InvalidPhase {
        /// Required phase
        expected: DeoptPhase,
        /// Current phase
        actual: DeoptPhase,
    },
    /// Lazy call sites too close together to patch.
    #[error("lazy call site at pc offset {pc_offset} overlaps the site at {previous}")]
    PatchSitesOverlap {
        /// Offending site
        pc_offset: u32,
        /// Previous site
        previous: u32,
    },
    /// Lazy call site too close to the end of the code.
    #[error("lazy call site at pc offset {pc_offset} does not fit in {code_size} bytes of code")]
    PatchSiteOutOfBounds {
        /// Offending site
        pc_offset: u32,
        /// Code size
        code_size: usize,
    },
    /// A debugger snapshot is still outstanding.
    #[error("a debugger snapshot is still outstanding")]
    SnapshotOutstanding,
    /// No JS frame with that index.
    #[error("no JS frame {index} in deoptimized output")]
    NoSuchJsFrame {
        /// Requested inlined frame index
        index: usize,
    },
    /// Invalid configuration value.
    #[error("invalid deoptimizer configuration: {0}")]
    InvalidConfig(String),
    /// The context was aborted by an earlier fatal error.
    #[error("execution context aborted: {reason}")]
    ContextAborted {
        /// The error that aborted it
        reason: String,
    },
}

impl Severity for DeoptError {
    fn severity(&self) -> ErrorSeverity {
        match self {
            DeoptError::Translation(err) => err.severity(),
            DeoptError::Allocation(err) => err.severity(),
            DeoptError::NoPendingDeoptimizer
            | DeoptError::NotAnEntry { .. }
            | DeoptError::SnapshotOutstanding
            | DeoptError::NoSuchJsFrame { .. }
            | DeoptError::InvalidConfig(_)
            | DeoptError::ContextAborted { .. } => ErrorSeverity::Recoverable,
            _ => ErrorSeverity::Fatal,
        }
    }
}
