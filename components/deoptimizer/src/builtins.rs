//! Addresses of the builtins deoptimized frames return through.
//!
//! The code generator owns these; the deoptimizer only writes them into
//! frames, so they are plain addresses supplied by the embedder.

use crate::deoptimizer::BailoutType;
use core_types::Address;
use serde::{Deserialize, Serialize};

/// A builtin with a recorded deoptimization resume point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinCode {
    /// First instruction
    pub start: Address,
    /// Offset of the instruction a deoptimized frame resumes at
    pub deopt_pc_offset: u32,
}

impl BuiltinCode {
    /// Absolute resume address.
    pub fn deopt_pc(&self) -> Address {
        self.start + self.deopt_pc_offset as Address
    }
}

/// Builtin addresses referenced from synthesized frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Builtins {
    /// Continuation after an eager deoptimization
    pub notify_deoptimized: Address,
    /// Continuation after a lazy deoptimization
    pub notify_lazy_deoptimized: Address,
    /// Continuation after a soft deoptimization
    pub notify_soft_deoptimized: Address,
    /// Continuation after a compiled stub failure
    pub notify_stub_failure: Address,
    /// Resume point of rebuilt arguments adaptor frames
    pub arguments_adaptor_trampoline: BuiltinCode,
    /// Resume point of rebuilt construct stub frames
    pub construct_stub: BuiltinCode,
    /// Resume point of rebuilt getter stub frames
    pub getter_stub: BuiltinCode,
    /// Resume point of rebuilt setter stub frames
    pub setter_stub: BuiltinCode,
    /// Resume point of rebuilt compiled stub frames
    pub stub_failure_trampoline: Address,
    /// Shared deoptimizer entry the entry tables jump to
    pub deoptimizer_entry: Address,
}

impl Default for Builtins {
    fn default() -> Self {
        const BASE: Address = 0x2000_0000;
        Self {
            notify_deoptimized: BASE + 0x100,
            notify_lazy_deoptimized: BASE + 0x200,
            notify_soft_deoptimized: BASE + 0x300,
            notify_stub_failure: BASE + 0x400,
            arguments_adaptor_trampoline: BuiltinCode {
                start: BASE + 0x1000,
                deopt_pc_offset: 0x2c,
            },
            construct_stub: BuiltinCode {
                start: BASE + 0x2000,
                deopt_pc_offset: 0x5e,
            },
            getter_stub: BuiltinCode {
                start: BASE + 0x3000,
                deopt_pc_offset: 0x18,
            },
            setter_stub: BuiltinCode {
                start: BASE + 0x3800,
                deopt_pc_offset: 0x1c,
            },
            stub_failure_trampoline: BASE + 0x4000,
            deoptimizer_entry: BASE + 0x5000,
        }
    }
}

impl Builtins {
    /// Continuation for the topmost JS frame, if the bailout type resumes.
    pub fn continuation_for(&self, bailout_type: BailoutType) -> Option<Address> {
        match bailout_type {
            BailoutType::Eager => Some(self.notify_deoptimized),
            BailoutType::Lazy => Some(self.notify_lazy_deoptimized),
            BailoutType::Soft => Some(self.notify_soft_deoptimized),
            BailoutType::Debugger => None,
        }
    }
}
