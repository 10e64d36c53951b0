//! Root-set interface between the collector and its clients
//!
//! Any component holding heap references outside the heap (frames under
//! construction, deferred materialization lists, the execution stack) exposes
//! them through [`RootSet`] for the duration of every allocation it performs.

use core_types::{HeapRef, Value};

/// Receives roots during a collection.
pub trait RootVisitor {
    /// Marks `root` as live.
    fn visit_root(&mut self, root: HeapRef);

    /// Marks the referent of `value`, if it is a heap reference.
    fn visit_value(&mut self, value: Value) {
        if let Some(r) = value.as_heap_ref() {
            self.visit_root(r);
        }
    }
}

impl<F: FnMut(HeapRef)> RootVisitor for F {
    fn visit_root(&mut self, root: HeapRef) {
        self(root)
    }
}

/// Something that can enumerate heap references it keeps alive.
pub trait RootSet {
    /// Reports every root to `visitor`.
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor);
}

/// The empty root set.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRoots;

impl RootSet for NoRoots {
    fn iterate_roots(&self, _visitor: &mut dyn RootVisitor) {}
}

impl RootSet for [Value] {
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor) {
        for value in self {
            visitor.visit_value(*value);
        }
    }
}

impl RootSet for Vec<Value> {
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor) {
        self.as_slice().iterate_roots(visitor)
    }
}

impl<T: RootSet + ?Sized> RootSet for &T {
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor) {
        (**self).iterate_roots(visitor)
    }
}

/// Two root sets reported as one.
pub struct ChainedRoots<'a> {
    first: &'a dyn RootSet,
    second: &'a dyn RootSet,
}

impl<'a> ChainedRoots<'a> {
    /// Chains `first` and `second`.
    pub fn new(first: &'a dyn RootSet, second: &'a dyn RootSet) -> Self {
        Self { first, second }
    }
}

impl RootSet for ChainedRoots<'_> {
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor) {
        self.first.iterate_roots(visitor);
        self.second.iterate_roots(visitor);
    }
}
