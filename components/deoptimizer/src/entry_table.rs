//! Deoptimization entry tables and the code-generator contract
//!
//! Each bailout type with entry code owns a table of fixed-size stubs, one per
//! deoptimization id. A stub records its id and jumps to a shared tail that
//! enters the deoptimizer with the bailout type. Tables live at fixed,
//! per-type reserved regions and grow by doubling, so an entry address never
//! changes once handed out.

use crate::deoptimizer::BailoutType;
use crate::error::DeoptError;
use core_types::Address;
use std::fmt;
use tracing::debug;

/// Start of the region reserved for entry tables.
pub const ENTRY_REGION_BASE: Address = 0x1000_0000;

const PAGE_SIZE: usize = 4096;

/// Whether an entry lookup may generate code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetEntryMode {
    /// Only compute the address of an already generated entry
    CalculateEntryAddress,
    /// Generate entries up to the requested id if needed
    EnsureEntryCode,
}

/// What the architecture's code generator provides to the deoptimizer.
pub trait EntryCodeGenerator: fmt::Debug + Send + Sync {
    /// Size of one table entry in bytes.
    fn table_entry_size(&self) -> usize;

    /// Size of the shared tail following the entries.
    fn tail_size(&self) -> usize;

    /// Emits `count` entries followed by the shared tail that enters the
    /// deoptimizer at `deoptimizer_entry`. The code is position independent.
    fn generate_table(
        &self,
        bailout_type: BailoutType,
        count: usize,
        deoptimizer_entry: Address,
    ) -> Vec<u8>;

    /// Length of the call sequence patched over lazy deoptimization sites.
    fn patch_size(&self) -> usize;

    /// Encodes a call to `target`, exactly [`patch_size`](Self::patch_size) bytes long.
    fn lazy_call_sequence(&self, target: Address) -> Vec<u8>;
}

/// x64 entry generator.
///
/// Each entry is `push imm32 <id>; jmp rel32 <tail>` (10 bytes). The tail is
/// `push imm8 <type>; mov r10, imm64 <entry>; jmp r10`. Lazy sites are
/// patched with `mov r10, imm64; call r10` (13 bytes).
#[derive(Debug, Clone, Copy, Default)]
pub struct X64EntryGenerator;

impl X64EntryGenerator {
    const PUSH_IMM32: u8 = 0x68;
    const PUSH_IMM8: u8 = 0x6A;
    const JMP_REL32: u8 = 0xE9;
    const MOV_R10_IMM64: [u8; 2] = [0x49, 0xBA];
    const JMP_R10: [u8; 3] = [0x41, 0xFF, 0xE2];
    const CALL_R10: [u8; 3] = [0x41, 0xFF, 0xD2];
}

impl EntryCodeGenerator for X64EntryGenerator {
    fn table_entry_size(&self) -> usize {
        10
    }

    fn tail_size(&self) -> usize {
        2 + 10 + 3
    }

    fn generate_table(
        &self,
        bailout_type: BailoutType,
        count: usize,
        deoptimizer_entry: Address,
    ) -> Vec<u8> {
        let entry_size = self.table_entry_size();
        let mut code = Vec::with_capacity(count * entry_size + self.tail_size());
        let tail = count * entry_size;
        for id in 0..count {
            code.push(Self::PUSH_IMM32);
            code.extend_from_slice(&(id as u32).to_le_bytes());
            code.push(Self::JMP_REL32);
            let next = (id + 1) * entry_size;
            let rel = (tail as i64 - next as i64) as i32;
            code.extend_from_slice(&rel.to_le_bytes());
        }
        debug_assert_eq!(code.len(), tail);
        code.push(Self::PUSH_IMM8);
        code.push(bailout_type as u8);
        code.extend_from_slice(&Self::MOV_R10_IMM64);
        code.extend_from_slice(&(deoptimizer_entry as u64).to_le_bytes());
        code.extend_from_slice(&Self::JMP_R10);
        code
    }

    fn patch_size(&self) -> usize {
        13
    }

    fn lazy_call_sequence(&self, target: Address) -> Vec<u8> {
        let mut code = Vec::with_capacity(self.patch_size());
        code.extend_from_slice(&Self::MOV_R10_IMM64);
        code.extend_from_slice(&(target as u64).to_le_bytes());
        code.extend_from_slice(&Self::CALL_R10);
        code
    }
}

/// Generated entries of one bailout type.
#[derive(Debug, Clone)]
pub struct EntryTable {
    bailout_type: BailoutType,
    base: Address,
    entry_size: usize,
    entry_count: usize,
    code: Vec<u8>,
}

impl EntryTable {
    /// Creates an empty table at `base`.
    pub fn new(bailout_type: BailoutType, base: Address, entry_size: usize) -> Self {
        Self {
            bailout_type,
            base,
            entry_size,
            entry_count: 0,
            code: Vec::new(),
        }
    }

    /// Bytes reserved per table for `max_entries` entries.
    pub fn reserved_size(generator: &dyn EntryCodeGenerator, max_entries: usize) -> usize {
        let bytes = max_entries * generator.table_entry_size() + generator.tail_size();
        bytes.div_ceil(PAGE_SIZE) * PAGE_SIZE
    }

    /// Bailout type served.
    pub fn bailout_type(&self) -> BailoutType {
        self.bailout_type
    }

    /// Address of entry 0.
    pub fn base(&self) -> Address {
        self.base
    }

    /// Entries generated so far.
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Generated code.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Address of entry `id`, if generated.
    pub fn entry_address(&self, id: u32) -> Option<Address> {
        let id = id as usize;
        (id < self.entry_count).then(|| self.base + id * self.entry_size)
    }

    /// Id of the entry starting at `address`.
    pub fn id_of(&self, address: Address) -> Option<u32> {
        let delta = address.checked_sub(self.base)?;
        if delta % self.entry_size != 0 {
            return None;
        }
        let id = delta / self.entry_size;
        (id < self.entry_count).then_some(id as u32)
    }

    /// Makes sure entry `id` exists, growing the table by doubling from
    /// `min_entries`.
    pub fn ensure(
        &mut self,
        id: u32,
        min_entries: usize,
        max_entries: usize,
        generator: &dyn EntryCodeGenerator,
        deoptimizer_entry: Address,
    ) -> Result<(), DeoptError> {
        let id = id as usize;
        if id >= max_entries {
            return Err(DeoptError::EntryTableExhausted {
                id: id as u32,
                bailout_type: self.bailout_type,
                max: max_entries,
            });
        }
        if id < self.entry_count {
            return Ok(());
        }
        let mut count = self.entry_count.max(min_entries);
        while id >= count {
            count *= 2;
        }
        let count = count.min(max_entries);
        self.code = generator.generate_table(self.bailout_type, count, deoptimizer_entry);
        debug!(
            target: "corten::deopt",
            bailout_type = %self.bailout_type,
            from = self.entry_count,
            to = count,
            "grew deoptimization entry table"
        );
        self.entry_count = count;
        Ok(())
    }
}

/// A compiler jump-table slot leading to a deoptimization entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpTableEntry {
    /// Entry address jumped to
    pub address: Address,
    /// Bailout type of the entry
    pub bailout_type: BailoutType,
    /// Whether a frame must be built before jumping
    pub needs_frame: bool,
}

/// Out-of-line jumps of one code object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JumpTable {
    entries: Vec<JumpTableEntry>,
    reuse_entries: bool,
}

impl JumpTable {
    /// Creates a table; with `reuse_entries`, a site identical to the
    /// previous one shares its slot.
    pub fn new(reuse_entries: bool) -> Self {
        Self {
            entries: Vec::new(),
            reuse_entries,
        }
    }

    /// Adds a site and returns its slot index.
    pub fn add(&mut self, entry: JumpTableEntry) -> usize {
        if self.reuse_entries && self.entries.last() == Some(&entry) {
            return self.entries.len() - 1;
        }
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Slots in emission order.
    pub fn entries(&self) -> &[JumpTableEntry] {
        &self.entries
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
