//! Per-context deoptimizer state
//!
//! Owns the entry tables and the slots through which a deoptimizer travels
//! from the entry trampoline to the code that drives it. At most one
//! deoptimization may be in flight per context; debugger inspections use a
//! separate slot so they never collide with a real bailout.

use crate::code::{CodeId, OptimizedCode};
use crate::config::DeoptimizerConfig;
use crate::deoptimizer::{BailoutType, Deoptimizer};
use crate::entry_table::{
    EntryCodeGenerator, EntryTable, GetEntryMode, JumpTable, X64EntryGenerator, ENTRY_REGION_BASE,
};
use crate::error::DeoptError;
use crate::frame_description::iterate_frame_roots;
use core_types::Address;
use memory_manager::{RootSet, RootVisitor};
use std::fmt::Write;
use tracing::debug;

/// The in-flight deoptimizer slot.
#[derive(Debug, Default)]
enum CurrentDeoptimizer {
    #[default]
    Idle,
    /// Created by the entry trampoline, not yet picked up
    Pending(Box<Deoptimizer>),
    /// Grabbed by the driving code
    Active {
        code: CodeId,
        bailout_type: BailoutType,
    },
}

/// Entry tables and in-flight deoptimizer of one execution context.
#[derive(Debug)]
pub struct DeoptimizerData {
    generator: Box<dyn EntryCodeGenerator>,
    tables: Vec<EntryTable>,
    min_entries: usize,
    max_entries: usize,
    current: CurrentDeoptimizer,
    debugger: Option<Box<Deoptimizer>>,
}

impl DeoptimizerData {
    /// Creates the state with the x64 entry generator.
    pub fn new(config: &DeoptimizerConfig) -> Self {
        Self::with_generator(config, Box::new(X64EntryGenerator))
    }

    /// Creates the state with a custom entry generator.
    pub fn with_generator(config: &DeoptimizerConfig, generator: Box<dyn EntryCodeGenerator>) -> Self {
        let region = EntryTable::reserved_size(generator.as_ref(), config.max_entries);
        let tables = BailoutType::WITH_ENTRY_TABLES
            .iter()
            .enumerate()
            .map(|(index, bailout_type)| {
                EntryTable::new(
                    *bailout_type,
                    ENTRY_REGION_BASE + index * region,
                    generator.table_entry_size(),
                )
            })
            .collect();
        Self {
            generator,
            tables,
            min_entries: config.min_entries,
            max_entries: config.max_entries,
            current: CurrentDeoptimizer::Idle,
            debugger: None,
        }
    }

    /// The architecture's entry generator.
    pub fn generator(&self) -> &dyn EntryCodeGenerator {
        self.generator.as_ref()
    }

    /// Entry table for `bailout_type`.
    pub fn entry_table(&self, bailout_type: BailoutType) -> Option<&EntryTable> {
        bailout_type.table_index().map(|index| &self.tables[index])
    }

    /// Address of entry `id` for `bailout_type`.
    ///
    /// With [`GetEntryMode::CalculateEntryAddress`] nothing is generated and
    /// `Ok(None)` means the entry does not exist yet. With
    /// [`GetEntryMode::EnsureEntryCode`] the table grows as needed.
    pub fn get_deoptimization_entry(
        &mut self,
        id: u32,
        bailout_type: BailoutType,
        mode: GetEntryMode,
        deoptimizer_entry: Address,
    ) -> Result<Option<Address>, DeoptError> {
        let index = bailout_type
            .table_index()
            .ok_or(DeoptError::NoEntryTable(bailout_type))?;
        let table = &mut self.tables[index];
        if mode == GetEntryMode::EnsureEntryCode {
            table.ensure(
                id,
                self.min_entries,
                self.max_entries,
                self.generator.as_ref(),
                deoptimizer_entry,
            )?;
        }
        Ok(table.entry_address(id))
    }

    /// Inverse of [`get_deoptimization_entry`](Self::get_deoptimization_entry).
    pub fn get_deoptimization_id(&self, address: Address, bailout_type: BailoutType) -> Option<u32> {
        self.entry_table(bailout_type)?.id_of(address)
    }

    /// Like [`get_deoptimization_id`](Self::get_deoptimization_id) but
    /// reports why the lookup failed.
    pub fn lookup_deoptimization_id(
        &self,
        address: Address,
        bailout_type: BailoutType,
    ) -> Result<u32, DeoptError> {
        let table = self
            .entry_table(bailout_type)
            .ok_or(DeoptError::NoEntryTable(bailout_type))?;
        table.id_of(address).ok_or(DeoptError::NotAnEntry {
            address,
            bailout_type,
        })
    }

    /// Renders the jump table of a code object with resolved entry ids.
    pub fn describe_jump_table(&self, table: &JumpTable) -> String {
        let mut out = String::new();
        for (index, entry) in table.entries().iter().enumerate() {
            let id = self
                .get_deoptimization_id(entry.address, entry.bailout_type)
                .map(|id| id.to_string())
                .unwrap_or_else(|| "?".to_string());
            let _ = writeln!(
                out,
                "jump table entry {}: {} deoptimization entry {} at {:#x}{}",
                index,
                entry.bailout_type,
                id,
                entry.address,
                if entry.needs_frame { " (needs frame)" } else { "" }
            );
        }
        out
    }

    /// Patches every lazy site of `code` with a call to its lazy entry,
    /// generating entries as needed.
    pub fn patch_code_for_lazy_deoptimization(
        &mut self,
        code: &OptimizedCode,
        deoptimizer_entry: Address,
    ) -> Result<usize, DeoptError> {
        let sites = code.lazy_sites();
        let mut addresses = Vec::with_capacity(sites.len());
        for (deopt_id, _) in &sites {
            let address = self
                .get_deoptimization_entry(
                    *deopt_id,
                    BailoutType::Lazy,
                    GetEntryMode::EnsureEntryCode,
                    deoptimizer_entry,
                )?
                .ok_or(DeoptError::EntryTableExhausted {
                    id: *deopt_id,
                    bailout_type: BailoutType::Lazy,
                    max: self.max_entries,
                })?;
            addresses.push((*deopt_id, address));
        }
        code.patch_for_deoptimization(self.generator.as_ref(), |deopt_id| {
            addresses
                .iter()
                .find(|(id, _)| *id == deopt_id)
                .map(|(_, address)| *address)
                .ok_or(DeoptError::UnknownDeoptimizationId {
                    code: code.name().to_string(),
                    deopt_id,
                })
        })
    }

    /// Whether no deoptimization is in flight.
    pub fn is_idle(&self) -> bool {
        matches!(self.current, CurrentDeoptimizer::Idle)
    }

    /// Whether a deoptimizer waits to be grabbed.
    pub fn has_pending(&self) -> bool {
        matches!(self.current, CurrentDeoptimizer::Pending(_))
    }

    /// The pending deoptimizer, if any.
    pub fn pending(&self) -> Option<&Deoptimizer> {
        match &self.current {
            CurrentDeoptimizer::Pending(deoptimizer) => Some(deoptimizer),
            _ => None,
        }
    }

    /// Installs a freshly created deoptimizer.
    ///
    /// Fails with [`DeoptError::DeoptimizationInProgress`] unless the slot
    /// is idle; the deoptimizer already in flight is left untouched.
    pub fn install(&mut self, deoptimizer: Box<Deoptimizer>) -> Result<(), DeoptError> {
        if !self.is_idle() {
            return Err(DeoptError::DeoptimizationInProgress);
        }
        self.current = CurrentDeoptimizer::Pending(deoptimizer);
        Ok(())
    }

    /// Takes ownership of the pending deoptimizer.
    pub fn grab(&mut self) -> Result<Box<Deoptimizer>, DeoptError> {
        match std::mem::take(&mut self.current) {
            CurrentDeoptimizer::Pending(deoptimizer) => {
                self.current = CurrentDeoptimizer::Active {
                    code: deoptimizer.code_id(),
                    bailout_type: deoptimizer.bailout_type(),
                };
                Ok(deoptimizer)
            }
            other => {
                self.current = other;
                Err(DeoptError::NoPendingDeoptimizer)
            }
        }
    }

    /// Ends the in-flight deoptimization and returns the slot to idle.
    pub fn release(&mut self, deoptimizer: Box<Deoptimizer>) {
        if let CurrentDeoptimizer::Active { code, bailout_type } = &self.current {
            debug!(
                target: "corten::deopt",
                code = %code,
                bailout_type = %bailout_type,
                phases = ?deoptimizer.history(),
                "deoptimizer released"
            );
        }
        self.current = CurrentDeoptimizer::Idle;
    }

    /// Clears the slot without a deoptimizer in hand, after a failure.
    pub(crate) fn reset(&mut self) {
        self.current = CurrentDeoptimizer::Idle;
    }

    /// Whether a debugger snapshot is outstanding.
    pub fn has_debugger_snapshot(&self) -> bool {
        self.debugger.is_some()
    }

    /// Keeps the deoptimizer backing a debugger snapshot alive.
    pub fn set_debugger_snapshot(&mut self, deoptimizer: Box<Deoptimizer>) -> Result<(), DeoptError> {
        if self.debugger.is_some() {
            return Err(DeoptError::SnapshotOutstanding);
        }
        self.debugger = Some(deoptimizer);
        Ok(())
    }

    /// The deoptimizer backing the outstanding debugger snapshot.
    pub fn debugger_snapshot(&self) -> Option<&Deoptimizer> {
        self.debugger.as_deref()
    }

    /// Releases the debugger snapshot's deoptimizer.
    pub fn take_debugger_snapshot(&mut self) -> Option<Box<Deoptimizer>> {
        self.debugger.take()
    }
}

impl RootSet for DeoptimizerData {
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor) {
        if let CurrentDeoptimizer::Pending(deoptimizer) = &self.current {
            iterate_frame_roots(deoptimizer.output(), visitor);
            visitor.visit_value(deoptimizer.function());
        }
        if let Some(deoptimizer) = &self.debugger {
            iterate_frame_roots(deoptimizer.output(), visitor);
            for object in deoptimizer.materialized_objects().iter().flatten() {
                visitor.visit_value(*object);
            }
            visitor.visit_value(deoptimizer.function());
        }
    }
}
