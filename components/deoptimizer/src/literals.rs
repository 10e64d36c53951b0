//! Deoptimization literal pool

use memory_manager::{RootSet, RootVisitor};
use core_types::Value;

/// Ordered, identity-deduplicated literals referenced by translations.
///
/// Inlined closures are defined first so that the first
/// [`inlined_function_count`](LiteralPool::inlined_function_count) entries
/// enumerate them without decoding any translation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiteralPool {
    literals: Vec<Value>,
    inlined_function_count: usize,
}

impl LiteralPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool seeded with the inlined closures of a code object.
    pub fn with_inlined_closures(closures: &[Value]) -> Self {
        let mut pool = Self::new();
        for closure in closures {
            pool.define(*closure);
        }
        pool.inlined_function_count = pool.literals.len();
        pool
    }

    /// Returns the index of `literal`, adding it if absent.
    ///
    /// Heap values are compared by reference, so two distinct objects with
    /// equal contents get distinct entries.
    pub fn define(&mut self, literal: Value) -> i32 {
        if let Some(index) = self.literals.iter().position(|l| *l == literal) {
            return index as i32;
        }
        self.literals.push(literal);
        (self.literals.len() - 1) as i32
    }

    /// Literal at `index`.
    pub fn get(&self, index: i32) -> Option<Value> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.literals.get(i).copied())
    }

    /// Number of literals.
    pub fn len(&self) -> usize {
        self.literals.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    /// Number of leading entries that are inlined closures.
    pub fn inlined_function_count(&self) -> usize {
        self.inlined_function_count
    }

    /// The inlined closures.
    pub fn inlined_functions(&self) -> &[Value] {
        &self.literals[..self.inlined_function_count]
    }

    /// All literals in index order.
    pub fn as_slice(&self) -> &[Value] {
        &self.literals
    }
}

impl RootSet for LiteralPool {
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor) {
        for literal in &self.literals {
            visitor.visit_value(*literal);
        }
    }
}
