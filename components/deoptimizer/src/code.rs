//! Optimized code objects and their deoptimization input data
//!
//! The optimizing compiler hands over one [`OptimizedCode`] per compiled
//! function. Besides the instruction bytes it carries everything the
//! deoptimizer reads: the translation stream, the literal pool, and one
//! [`DeoptimizationEntry`] per deoptimization point.

use crate::arch::{POINTER_SIZE, STANDARD_FIXED_FRAME_WORDS};
use crate::entry_table::{EntryCodeGenerator, JumpTable};
use crate::error::DeoptError;
use crate::literals::LiteralPool;
use crate::translation::{validate, TranslationBuffer};
use core_types::{Address, BailoutId, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

static NEXT_CODE_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique identity of an optimized code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CodeId(pub u32);

impl CodeId {
    fn next() -> Self {
        CodeId(NEXT_CODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for CodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code#{}", self.0)
    }
}

/// One deoptimization point of an optimized code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeoptimizationEntry {
    /// Node id the outermost frame resumes at
    pub node_id: BailoutId,
    /// Byte offset of the translation in the code's buffer
    pub translation_index: usize,
    /// Stack height of pushed arguments at this point
    pub arguments_stack_height: u32,
    /// Return-address offset of the call site, for points reachable lazily
    pub pc_offset: Option<u32>,
}

/// Per-code tables consumed by the deoptimizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeoptimizationInputData {
    translations: Vec<u8>,
    literals: LiteralPool,
    entries: Vec<DeoptimizationEntry>,
}

impl DeoptimizationInputData {
    /// Translation bytes of every point.
    pub fn translations(&self) -> &[u8] {
        &self.translations
    }

    /// Literals referenced by translations.
    pub fn literals(&self) -> &LiteralPool {
        &self.literals
    }

    /// Entry for deoptimization id `deopt_id`.
    pub fn entry(&self, deopt_id: u32) -> Option<&DeoptimizationEntry> {
        self.entries.get(deopt_id as usize)
    }

    /// All entries, indexed by deoptimization id.
    pub fn entries(&self) -> &[DeoptimizationEntry] {
        &self.entries
    }

    /// Number of deoptimization points.
    pub fn deopt_count(&self) -> usize {
        self.entries.len()
    }
}

/// Optimized machine code for one function.
///
/// Shared between the code registry and the activations running it, hence
/// the interior mutability: lazy deoptimization patches the instruction bytes
/// in place and flips the state bits while activations still hold the code.
#[derive(Debug)]
pub struct OptimizedCode {
    id: CodeId,
    name: String,
    function: Value,
    native_context: Value,
    instruction_start: Address,
    instructions: RwLock<Vec<u8>>,
    stack_slots: u32,
    parameter_count: u32,
    input_data: DeoptimizationInputData,
    embedded_objects: Vec<Value>,
    jump_table: JumpTable,
    marked_for_deoptimization: AtomicBool,
    deoptimized: AtomicBool,
}

impl OptimizedCode {
    /// Identity of this code object.
    pub fn id(&self) -> CodeId {
        self.id
    }

    /// Diagnostic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Closure this code was compiled for.
    pub fn function(&self) -> Value {
        self.function
    }

    /// Native context the code was compiled in.
    pub fn native_context(&self) -> Value {
        self.native_context
    }

    /// Address of the first instruction.
    pub fn instruction_start(&self) -> Address {
        self.instruction_start
    }

    /// Instruction size in bytes.
    pub fn instruction_size(&self) -> usize {
        self.instructions.read().len()
    }

    /// Copy of the current instruction bytes.
    pub fn instructions(&self) -> Vec<u8> {
        self.instructions.read().clone()
    }

    /// Spill slots of the optimized frame.
    pub fn stack_slots(&self) -> u32 {
        self.stack_slots
    }

    /// Parameters of the optimized frame, receiver included.
    pub fn parameter_count(&self) -> u32 {
        self.parameter_count
    }

    /// Words of an optimized frame of this code: parameters, fixed part and
    /// spill slots.
    pub fn input_frame_words(&self) -> usize {
        self.parameter_count as usize + STANDARD_FIXED_FRAME_WORDS + self.stack_slots as usize
    }

    /// Size of an optimized frame of this code in bytes.
    pub fn input_frame_size(&self) -> usize {
        self.input_frame_words() * POINTER_SIZE
    }

    /// Deoptimization tables.
    pub fn input_data(&self) -> &DeoptimizationInputData {
        &self.input_data
    }

    /// Heap objects embedded in the instruction stream.
    pub fn embedded_objects(&self) -> &[Value] {
        &self.embedded_objects
    }

    /// Out-of-line jumps to deoptimization entries.
    pub fn jump_table(&self) -> &JumpTable {
        &self.jump_table
    }

    /// Whether the code depends on `object`, through its function, an
    /// embedded object or a deoptimization literal.
    pub fn references(&self, object: Value) -> bool {
        self.function == object
            || self.embedded_objects.contains(&object)
            || self.input_data.literals.as_slice().contains(&object)
    }

    /// Marks the code for the next bulk deoptimization.
    pub fn mark_for_deoptimization(&self) {
        self.marked_for_deoptimization.store(true, Ordering::Release);
    }

    /// Whether the code is marked for deoptimization.
    pub fn is_marked_for_deoptimization(&self) -> bool {
        self.marked_for_deoptimization.load(Ordering::Acquire)
    }

    /// Whether lazy deoptimization patched this code.
    pub fn is_deoptimized(&self) -> bool {
        self.deoptimized.load(Ordering::Acquire)
    }

    /// Deoptimization id of the lazy site whose patched call returns to `pc`.
    pub fn lazy_deopt_id_for_return_address(&self, pc: Address, patch_size: usize) -> Option<u32> {
        self.input_data
            .entries
            .iter()
            .position(|entry| {
                entry
                    .pc_offset
                    .map(|offset| self.instruction_start + offset as usize + patch_size == pc)
                    .unwrap_or(false)
            })
            .map(|id| id as u32)
    }

    /// Lazy sites as `(deopt_id, pc_offset)`, sorted by offset.
    pub fn lazy_sites(&self) -> Vec<(u32, u32)> {
        let mut sites: Vec<(u32, u32)> = self
            .input_data
            .entries
            .iter()
            .enumerate()
            .filter_map(|(id, entry)| entry.pc_offset.map(|offset| (id as u32, offset)))
            .collect();
        sites.sort_by_key(|&(_, offset)| offset);
        sites
    }

    /// Checks that every lazy site can be patched with a call of
    /// `patch_size` bytes without touching its neighbours.
    pub fn validate_lazy_sites(&self, patch_size: usize) -> Result<(), DeoptError> {
        let code_size = self.instruction_size();
        let mut previous: Option<u32> = None;
        for (_, pc_offset) in self.lazy_sites() {
            if pc_offset as usize + patch_size > code_size {
                return Err(DeoptError::PatchSiteOutOfBounds {
                    pc_offset,
                    code_size,
                });
            }
            if let Some(previous) = previous {
                if ((pc_offset - previous) as usize) < patch_size {
                    return Err(DeoptError::PatchSitesOverlap {
                        pc_offset,
                        previous,
                    });
                }
            }
            previous = Some(pc_offset);
        }
        Ok(())
    }

    /// Overwrites every lazy site with a call to its lazy entry and marks
    /// the code deoptimized.
    ///
    /// `entry_for` maps a deoptimization id to its lazy entry address.
    pub fn patch_for_deoptimization(
        &self,
        generator: &dyn EntryCodeGenerator,
        mut entry_for: impl FnMut(u32) -> Result<Address, DeoptError>,
    ) -> Result<usize, DeoptError> {
        let patch_size = generator.patch_size();
        self.validate_lazy_sites(patch_size)?;
        let sites = self.lazy_sites();
        let mut patches = Vec::with_capacity(sites.len());
        for (deopt_id, pc_offset) in &sites {
            let target = entry_for(*deopt_id)?;
            patches.push((*pc_offset as usize, generator.lazy_call_sequence(target)));
        }

        let mut instructions = self.instructions.write();
        for (offset, call) in patches {
            instructions[offset..offset + call.len()].copy_from_slice(&call);
        }
        drop(instructions);
        self.deoptimized.store(true, Ordering::Release);
        Ok(sites.len())
    }
}

/// Assembles an [`OptimizedCode`] the way the code generator would.
#[derive(Debug)]
pub struct OptimizedCodeBuilder {
    name: String,
    function: Value,
    native_context: Value,
    instruction_start: Address,
    instructions: Vec<u8>,
    stack_slots: u32,
    parameter_count: u32,
    translations: Vec<u8>,
    literals: LiteralPool,
    entries: Vec<DeoptimizationEntry>,
    embedded_objects: Vec<Value>,
    jump_table: JumpTable,
}

impl OptimizedCodeBuilder {
    /// Starts a code object for `function`.
    pub fn new(name: impl Into<String>, function: Value) -> Self {
        Self {
            name: name.into(),
            function,
            native_context: Value::Undefined,
            instruction_start: 0,
            instructions: Vec::new(),
            stack_slots: 0,
            parameter_count: 1,
            translations: Vec::new(),
            literals: LiteralPool::new(),
            entries: Vec::new(),
            embedded_objects: Vec::new(),
            jump_table: JumpTable::default(),
        }
    }

    /// Sets the native context.
    pub fn native_context(mut self, context: Value) -> Self {
        self.native_context = context;
        self
    }

    /// Sets the instruction bytes and their address.
    pub fn instructions(mut self, start: Address, bytes: Vec<u8>) -> Self {
        self.instruction_start = start;
        self.instructions = bytes;
        self
    }

    /// Sets the optimized frame shape.
    pub fn frame(mut self, parameter_count: u32, stack_slots: u32) -> Self {
        self.parameter_count = parameter_count;
        self.stack_slots = stack_slots;
        self
    }

    /// Sets the translation stream.
    pub fn translations(mut self, buffer: TranslationBuffer) -> Self {
        self.translations = buffer.into_bytes();
        self
    }

    /// Sets the literal pool.
    pub fn literals(mut self, literals: LiteralPool) -> Self {
        self.literals = literals;
        self
    }

    /// Adds a deoptimization point and returns its id.
    pub fn add_deopt_point(
        &mut self,
        node_id: BailoutId,
        translation_index: usize,
        pc_offset: Option<u32>,
    ) -> u32 {
        self.entries.push(DeoptimizationEntry {
            node_id,
            translation_index,
            arguments_stack_height: 0,
            pc_offset,
        });
        (self.entries.len() - 1) as u32
    }

    /// Builder form of [`add_deopt_point`](Self::add_deopt_point).
    pub fn deopt_point(
        mut self,
        node_id: BailoutId,
        translation_index: usize,
        pc_offset: Option<u32>,
    ) -> Self {
        self.add_deopt_point(node_id, translation_index, pc_offset);
        self
    }

    /// Records an object embedded in the instructions.
    pub fn embed_object(mut self, object: Value) -> Self {
        self.embedded_objects.push(object);
        self
    }

    /// Sets the jump table.
    pub fn jump_table(mut self, table: JumpTable) -> Self {
        self.jump_table = table;
        self
    }

    /// Validates every translation and freezes the code object.
    pub fn build(self) -> Result<Arc<OptimizedCode>, DeoptError> {
        for entry in &self.entries {
            validate(&self.translations, entry.translation_index)?;
        }
        Ok(Arc::new(OptimizedCode {
            id: CodeId::next(),
            name: self.name,
            function: self.function,
            native_context: self.native_context,
            instruction_start: self.instruction_start,
            instructions: RwLock::new(self.instructions),
            stack_slots: self.stack_slots,
            parameter_count: self.parameter_count,
            input_data: DeoptimizationInputData {
                translations: self.translations,
                literals: self.literals,
                entries: self.entries,
            },
            embedded_objects: self.embedded_objects,
            jump_table: self.jump_table,
            marked_for_deoptimization: AtomicBool::new(false),
            deoptimized: AtomicBool::new(false),
        }))
    }
}
