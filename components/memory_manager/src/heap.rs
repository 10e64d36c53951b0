//! Heap management with a non-moving mark-and-sweep collector.
//!
//! Objects live in an object table indexed by [`HeapRef`]. References never
//! move, which lets the deoptimizer hand out raw tagged words while frames
//! are under construction, as long as every such word is reported through a
//! [`RootSet`] whenever the heap may collect.
//!
//! # Allocation
//!
//! [`Heap::allocate`] takes the caller's roots. When the heap is full it
//! collects and retries, up to [`HeapConfig::max_gc_retries`] times, before
//! giving up with [`AllocationError::OutOfMemory`].

use crate::error::AllocationError;
use crate::object::HeapObject;
use crate::roots::{RootSet, RootVisitor};
use core_types::{HeapRef, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Default heap capacity (4MB)
const DEFAULT_CAPACITY: usize = 4 * 1024 * 1024;
/// Default number of collections attempted before an allocation fails
const DEFAULT_MAX_GC_RETRIES: u32 = 2;

/// Heap sizing and collection policy.
///
/// Loadable from JSON; fields left out take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Total bytes the heap may hold
    pub capacity: usize,
    /// Collections attempted before an allocation reports out-of-memory
    pub max_gc_retries: u32,
    /// Collect before every allocation (testing aid for root coverage)
    pub gc_on_every_allocation: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_gc_retries: DEFAULT_MAX_GC_RETRIES,
            gc_on_every_allocation: false,
        }
    }
}

impl HeapConfig {
    /// Sets the capacity in bytes.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the retry limit.
    pub fn with_max_gc_retries(mut self, retries: u32) -> Self {
        self.max_gc_retries = retries;
        self
    }

    /// Enables collection before every allocation.
    pub fn with_gc_on_every_allocation(mut self, enabled: bool) -> Self {
        self.gc_on_every_allocation = enabled;
        self
    }
}

/// Garbage collection statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Number of collections performed
    pub collections: usize,
    /// Total objects reclaimed
    pub objects_freed: usize,
    /// Total bytes reclaimed
    pub bytes_freed: usize,
    /// Allocations that needed at least one collection to succeed
    pub retried_allocations: usize,
    /// Allocations that failed after every retry
    pub failed_allocations: usize,
}

#[derive(Debug)]
struct Cell {
    object: HeapObject,
    size: usize,
    marked: bool,
}

/// The managed heap.
#[derive(Debug)]
pub struct Heap {
    cells: Vec<Option<Cell>>,
    free_list: Vec<u32>,
    used: usize,
    persistent: HashMap<HeapRef, usize>,
    config: HeapConfig,
    stats: GcStats,
}

impl Heap {
    /// Creates a heap with the default configuration.
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Creates a heap with `config`.
    pub fn with_config(config: HeapConfig) -> Self {
        Heap {
            cells: Vec::new(),
            free_list: Vec::new(),
            used: 0,
            persistent: HashMap::new(),
            config,
            stats: GcStats::default(),
        }
    }

    /// Allocates `object`, collecting with `roots` if the heap is full.
    ///
    /// Any heap reference the caller holds outside the heap and still needs
    /// must be reachable from `roots` or a persistent handle; otherwise it may
    /// be reclaimed by the collection this call triggers.
    pub fn allocate(
        &mut self,
        object: HeapObject,
        roots: &dyn RootSet,
    ) -> Result<HeapRef, AllocationError> {
        let size = object.size_in_bytes();
        if self.config.gc_on_every_allocation {
            self.collect_garbage(roots);
        }

        let mut attempts = 0;
        while self.used + size > self.config.capacity {
            if attempts == self.config.max_gc_retries {
                self.stats.failed_allocations += 1;
                debug!(
                    target: "corten::gc",
                    requested = size,
                    used = self.used,
                    capacity = self.config.capacity,
                    "allocation failed"
                );
                return Err(AllocationError::OutOfMemory {
                    requested: size,
                    used: self.used,
                    capacity: self.config.capacity,
                    retries: attempts,
                });
            }
            attempts += 1;
            self.collect_garbage(roots);
        }
        if attempts > 0 {
            self.stats.retried_allocations += 1;
        }

        let cell = Cell {
            object,
            size,
            marked: false,
        };
        self.used += size;
        let r = match self.free_list.pop() {
            Some(index) => {
                self.cells[index as usize] = Some(cell);
                HeapRef(index)
            }
            None => {
                self.cells.push(Some(cell));
                HeapRef((self.cells.len() - 1) as u32)
            }
        };
        trace!(target: "corten::gc", object = %r, size, "allocated");
        Ok(r)
    }

    /// Allocates `object` and pins it with a persistent handle.
    ///
    /// Used for long-lived objects created outside of any frame, such as
    /// closures referenced from literal pools. `roots` plays the same part
    /// as in [`Heap::allocate`].
    pub fn allocate_persistent(
        &mut self,
        object: HeapObject,
        roots: &dyn RootSet,
    ) -> Result<HeapRef, AllocationError> {
        let r = self.allocate(object, roots)?;
        self.persist(r);
        Ok(r)
    }

    /// Adds a persistent handle to `r`. Handles are counted.
    pub fn persist(&mut self, r: HeapRef) {
        *self.persistent.entry(r).or_insert(0) += 1;
    }

    /// Drops one persistent handle to `r`.
    pub fn release(&mut self, r: HeapRef) {
        if let Some(count) = self.persistent.get_mut(&r) {
            *count -= 1;
            if *count == 0 {
                self.persistent.remove(&r);
            }
        }
    }

    /// Looks up a live object.
    pub fn get(&self, r: HeapRef) -> Option<&HeapObject> {
        self.cells.get(r.index())?.as_ref().map(|cell| &cell.object)
    }

    /// Looks up a live object mutably.
    pub fn get_mut(&mut self, r: HeapRef) -> Option<&mut HeapObject> {
        self.cells
            .get_mut(r.index())?
            .as_mut()
            .map(|cell| &mut cell.object)
    }

    /// Returns the value of a heap number.
    pub fn heap_number(&self, r: HeapRef) -> Option<f64> {
        match self.get(r)? {
            HeapObject::HeapNumber(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the numeric value of `value`: a Smi or a boxed heap number.
    pub fn number_value(&self, value: Value) -> Option<f64> {
        match value {
            Value::Smi(n) => Some(n as f64),
            Value::HeapObject(r) => self.heap_number(r),
            _ => None,
        }
    }

    /// Returns whether `r` names a live object.
    pub fn contains(&self, r: HeapRef) -> bool {
        self.get(r).is_some()
    }

    /// Performs a full mark-and-sweep collection.
    ///
    /// Live objects are those reachable from `roots` or from a persistent
    /// handle.
    pub fn collect_garbage(&mut self, roots: &dyn RootSet) {
        let mut stack: Vec<HeapRef> = self.persistent.keys().copied().collect();
        roots.iterate_roots(&mut |r: HeapRef| stack.push(r));

        while let Some(r) = stack.pop() {
            let Some(Some(cell)) = self.cells.get_mut(r.index()) else {
                continue;
            };
            if cell.marked {
                continue;
            }
            cell.marked = true;
            cell.object.for_each_reference(|child| stack.push(child));
        }

        let mut freed = 0;
        let mut freed_bytes = 0;
        for (index, slot) in self.cells.iter_mut().enumerate() {
            match slot {
                Some(cell) if cell.marked => cell.marked = false,
                Some(cell) => {
                    freed += 1;
                    freed_bytes += cell.size;
                    *slot = None;
                    self.free_list.push(index as u32);
                }
                None => {}
            }
        }

        self.used -= freed_bytes;
        self.stats.collections += 1;
        self.stats.objects_freed += freed;
        self.stats.bytes_freed += freed_bytes;
        debug!(
            target: "corten::gc",
            freed,
            freed_bytes,
            live = self.live_objects(),
            used = self.used,
            "collection finished"
        );
    }

    /// Number of live objects.
    pub fn live_objects(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }

    /// Bytes in use.
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    /// Configured capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Returns the configuration.
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Returns collection statistics.
    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    /// Returns the number of garbage collections performed.
    pub fn collection_count(&self) -> usize {
        self.stats.collections
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RootSet for [HeapRef; N] {
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor) {
        for r in self {
            visitor.visit_root(*r);
        }
    }
}
