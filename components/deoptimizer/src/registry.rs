//! Optimized code bookkeeping for bulk deoptimization

use crate::code::{CodeId, OptimizedCode};
use crate::data::DeoptimizerData;
use crate::error::DeoptError;
use core_types::{Address, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Receives optimized functions grouped by native context.
pub trait OptimizedFunctionVisitor {
    /// Called before the functions of `context`.
    fn enter_context(&mut self, context: Value);

    /// Called once per optimized code object of the current context.
    fn visit_function(&mut self, function: Value, code: &OptimizedCode);

    /// Called after the functions of `context`.
    fn leave_context(&mut self, context: Value);
}

/// Optimized code known to an execution context.
///
/// Deoptimized code stays listed until no activation can return into it;
/// the registry keeps it for the whole context lifetime.
#[derive(Debug, Default)]
pub struct CodeRegistry {
    optimized: Vec<Arc<OptimizedCode>>,
    deoptimized: Vec<Arc<OptimizedCode>>,
}

impl CodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers live optimized code.
    pub fn add(&mut self, code: Arc<OptimizedCode>) -> CodeId {
        let id = code.id();
        self.optimized.push(code);
        id
    }

    /// Finds code by id, optimized or deoptimized.
    pub fn find(&self, id: CodeId) -> Option<&Arc<OptimizedCode>> {
        self.optimized
            .iter()
            .chain(self.deoptimized.iter())
            .find(|code| code.id() == id)
    }

    /// Code still running optimized.
    pub fn optimized_code(&self) -> &[Arc<OptimizedCode>] {
        &self.optimized
    }

    /// Code patched for lazy deoptimization.
    pub fn deoptimized_code(&self) -> &[Arc<OptimizedCode>] {
        &self.deoptimized
    }

    /// Number of code objects deoptimized so far.
    pub fn deoptimized_code_count(&self) -> usize {
        self.deoptimized.len()
    }

    /// Marks every optimized code object matching `filter`.
    pub fn mark_where(&self, filter: impl Fn(&OptimizedCode) -> bool) -> usize {
        let mut marked = 0;
        for code in &self.optimized {
            if filter(code) {
                code.mark_for_deoptimization();
                marked += 1;
            }
        }
        marked
    }

    /// Patches every marked code object for lazy deoptimization and moves
    /// it to the deoptimized list.
    pub fn deoptimize_marked_code(
        &mut self,
        data: &mut DeoptimizerData,
        deoptimizer_entry: Address,
    ) -> Result<usize, DeoptError> {
        let mut count = 0;
        let mut index = 0;
        while index < self.optimized.len() {
            if !self.optimized[index].is_marked_for_deoptimization() {
                index += 1;
                continue;
            }
            let code = Arc::clone(&self.optimized[index]);
            let sites = data.patch_code_for_lazy_deoptimization(&code, deoptimizer_entry)?;
            debug!(
                target: "corten::deopt",
                code = %code.id(),
                function = code.name(),
                lazy_sites = sites,
                "code patched for lazy deoptimization"
            );
            self.optimized.remove(index);
            self.deoptimized.push(code);
            count += 1;
        }
        if count > 0 {
            info!(target: "corten::deopt", count, "deoptimized marked code");
        }
        Ok(count)
    }

    /// Visits optimized functions, grouped by native context in first-seen
    /// order.
    pub fn visit_all_optimized_functions(&self, visitor: &mut dyn OptimizedFunctionVisitor) {
        let mut contexts: Vec<Value> = Vec::new();
        for code in &self.optimized {
            if !contexts.contains(&code.native_context()) {
                contexts.push(code.native_context());
            }
        }
        for context in contexts {
            visitor.enter_context(context);
            for code in self
                .optimized
                .iter()
                .filter(|code| code.native_context() == context)
            {
                visitor.visit_function(code.function(), code);
            }
            visitor.leave_context(context);
        }
    }
}
