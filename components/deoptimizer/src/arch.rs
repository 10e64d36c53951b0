//! Target architecture constants (x64)
//!
//! Register numbering follows the hardware encoding, so a register code in a
//! translation is the same number the code generator uses in ModRM bytes.

use std::fmt;

/// Size of a machine word / tagged pointer in bytes.
pub const POINTER_SIZE: usize = 8;

/// Number of general-purpose registers captured in a frame description.
pub const NUMBER_OF_REGISTERS: usize = 16;

/// Number of double registers captured in a frame description.
pub const NUMBER_OF_DOUBLE_REGISTERS: usize = 16;

/// Words in the standard fixed frame part: return address, saved frame
/// pointer, context and function (or frame marker).
pub const STANDARD_FIXED_FRAME_WORDS: usize = 4;

const REGISTER_NAMES: [&str; NUMBER_OF_REGISTERS] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
    "r13", "r14", "r15",
];

/// A general-purpose register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(u8);

impl Register {
    /// rax
    pub const RAX: Register = Register(0);
    /// rcx
    pub const RCX: Register = Register(1);
    /// rdx
    pub const RDX: Register = Register(2);
    /// rbx
    pub const RBX: Register = Register(3);
    /// Stack pointer
    pub const RSP: Register = Register(4);
    /// Frame pointer
    pub const RBP: Register = Register(5);
    /// Context register
    pub const RSI: Register = Register(6);
    /// Function register
    pub const RDI: Register = Register(7);
    /// Scratch register used by lazy-deoptimization call sequences
    pub const R10: Register = Register(10);

    /// Register holding the frame pointer.
    pub const FP: Register = Register::RBP;
    /// Register holding the current context.
    pub const CONTEXT: Register = Register::RSI;
    /// Register holding the current function.
    pub const FUNCTION: Register = Register::RDI;

    /// Creates a register from its hardware code.
    pub fn from_code(code: i32) -> Option<Register> {
        if (0..NUMBER_OF_REGISTERS as i32).contains(&code) {
            Some(Register(code as u8))
        } else {
            None
        }
    }

    /// Hardware code.
    pub fn code(self) -> u8 {
        self.0
    }

    /// Index into a register file.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Assembler name.
    pub fn name(self) -> &'static str {
        REGISTER_NAMES[self.index()]
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An SSE double register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DoubleRegister(u8);

impl DoubleRegister {
    /// Creates a double register from its hardware code.
    pub fn from_code(code: i32) -> Option<DoubleRegister> {
        if (0..NUMBER_OF_DOUBLE_REGISTERS as i32).contains(&code) {
            Some(DoubleRegister(code as u8))
        } else {
            None
        }
    }

    /// Hardware code.
    pub fn code(self) -> u8 {
        self.0
    }

    /// Index into a double register file.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DoubleRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "xmm{}", self.0)
    }
}
