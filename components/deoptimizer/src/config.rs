//! Deoptimizer configuration

use crate::error::DeoptError;
use core_types::SmiRange;
use serde::{Deserialize, Serialize};

/// Smallest number of entries an entry table is generated with.
pub const MIN_NUMBER_OF_ENTRIES: usize = 64;

/// Hard cap on entries per bailout type.
pub const MAX_NUMBER_OF_ENTRIES: usize = 16384;

/// Per-context deoptimizer settings.
///
/// # Examples
///
/// ```
/// use deoptimizer::DeoptimizerConfig;
/// use core_types::SmiRange;
///
/// let config = DeoptimizerConfig::default()
///     .with_smi_range(SmiRange::BITS_32)
///     .with_trace_deopt(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeoptimizerConfig {
    /// Range of native integers that are re-tagged inline instead of boxed
    pub smi_range: SmiRange,
    /// Initial entry-table size; tables grow by doubling from here
    pub min_entries: usize,
    /// Entry-table cap per bailout type
    pub max_entries: usize,
    /// Emit per-frame translation traces
    pub trace_deopt: bool,
    /// Share a jump-table entry between consecutive sites with identical targets
    pub reuse_jump_table_entries: bool,
}

impl Default for DeoptimizerConfig {
    fn default() -> Self {
        Self {
            smi_range: SmiRange::default(),
            min_entries: MIN_NUMBER_OF_ENTRIES,
            max_entries: MAX_NUMBER_OF_ENTRIES,
            trace_deopt: false,
            reuse_jump_table_entries: false,
        }
    }
}

impl DeoptimizerConfig {
    /// Sets the small-integer range.
    pub fn with_smi_range(mut self, range: SmiRange) -> Self {
        self.smi_range = range;
        self
    }

    /// Sets the entry-table bounds.
    pub fn with_entry_limits(mut self, min_entries: usize, max_entries: usize) -> Self {
        self.min_entries = min_entries;
        self.max_entries = max_entries;
        self
    }

    /// Enables or disables translation tracing.
    pub fn with_trace_deopt(mut self, enabled: bool) -> Self {
        self.trace_deopt = enabled;
        self
    }

    /// Enables or disables jump-table entry sharing.
    pub fn with_reuse_jump_table_entries(mut self, enabled: bool) -> Self {
        self.reuse_jump_table_entries = enabled;
        self
    }

    /// Checks the entry-table bounds.
    pub fn validate(&self) -> Result<(), DeoptError> {
        if self.min_entries == 0 || !self.min_entries.is_power_of_two() {
            return Err(DeoptError::InvalidConfig(format!(
                "min_entries must be a non-zero power of two, got {}",
                self.min_entries
            )));
        }
        if self.max_entries < self.min_entries || !self.max_entries.is_power_of_two() {
            return Err(DeoptError::InvalidConfig(format!(
                "max_entries must be a power of two no smaller than {}, got {}",
                self.min_entries, self.max_entries
            )));
        }
        Ok(())
    }
}
