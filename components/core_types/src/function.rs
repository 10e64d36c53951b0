//! Function metadata consumed when rebuilding unoptimized frames.
//!
//! The unoptimized tier publishes, per function, where execution can resume
//! for every bailout point (node id) it knows about. The deoptimizer uses this
//! table to compute the pc and the top-of-stack state of each reconstructed
//! JavaScript frame.

use crate::value::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Identifies a speculation point (AST node) inside a compiled function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BailoutId(pub i32);

impl BailoutId {
    /// No bailout point.
    pub const NONE: BailoutId = BailoutId(-1);
    /// Function entry.
    pub const FUNCTION_ENTRY: BailoutId = BailoutId(2);

    /// Returns whether this is [`BailoutId::NONE`].
    pub fn is_none(self) -> bool {
        self == BailoutId::NONE
    }

    /// Raw integer value.
    pub fn to_int(self) -> i32 {
        self.0
    }
}

impl fmt::Display for BailoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the unoptimized code expects in the accumulator register on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ResumeState {
    /// No value is expected in a register
    NoRegisters = 0,
    /// The top-of-stack value is expected in the accumulator
    TosRegister = 1,
}

/// One row of the unoptimized code's bailout output table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputEntry {
    /// Bailout point this row describes
    pub node_id: BailoutId,
    /// Resume pc, relative to the code's instruction start
    pub pc_offset: u32,
    /// Expected register state at the resume pc
    pub state: ResumeState,
}

/// Unoptimized code for one function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnoptimizedCode {
    /// Address of the first instruction
    pub instruction_start: Address,
    entries: Vec<OutputEntry>,
}

impl UnoptimizedCode {
    /// Creates code with an empty output table.
    pub fn new(instruction_start: Address) -> Self {
        Self {
            instruction_start,
            entries: Vec::new(),
        }
    }

    /// Records the resume location for `node_id`.
    pub fn add_output(&mut self, node_id: BailoutId, pc_offset: u32, state: ResumeState) {
        self.entries.push(OutputEntry {
            node_id,
            pc_offset,
            state,
        });
    }

    /// Builder form of [`UnoptimizedCode::add_output`].
    pub fn with_output(mut self, node_id: BailoutId, pc_offset: u32, state: ResumeState) -> Self {
        self.add_output(node_id, pc_offset, state);
        self
    }

    /// Looks up the resume location for `node_id`.
    pub fn output_for(&self, node_id: BailoutId) -> Option<&OutputEntry> {
        self.entries.iter().find(|e| e.node_id == node_id)
    }

    /// All output rows.
    pub fn outputs(&self) -> &[OutputEntry] {
        &self.entries
    }
}

/// Per-function information shared by every closure of the function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedFunctionInfo {
    /// Function name, for diagnostics
    pub name: String,
    /// Declared parameter count, excluding the receiver
    pub formal_parameter_count: u32,
    /// Unoptimized code the deoptimizer resumes into
    pub code: Arc<UnoptimizedCode>,
}

impl SharedFunctionInfo {
    /// Creates shared function info.
    pub fn new(name: impl Into<String>, formal_parameter_count: u32, code: UnoptimizedCode) -> Self {
        Self {
            name: name.into(),
            formal_parameter_count,
            code: Arc::new(code),
        }
    }

    /// Parameter slots in a frame: formals plus the receiver.
    pub fn parameter_count(&self) -> u32 {
        self.formal_parameter_count + 1
    }
}
