//! Values whose final representation needs a heap allocation.
//!
//! Translation cannot allocate: the output frames are not yet visible to the
//! collector. Anything that needs boxing (out-of-range integers, doubles) or
//! materializing (captured and arguments objects) is recorded here and the
//! frame slot gets the arguments-marker placeholder until
//! materialization fills it in.
//!
//! Nested objects live in one ordered list. An [`DeferredValue::ObjectStart`]
//! is followed by exactly `field_count` field entries, each of which may
//! itself be an object start. Object starts and duplicates both consume an
//! object index, in encounter order, which is what `DUPLICATED_OBJECT`
//! operands refer to.

use crate::error::TranslationError;
use crate::translation::ObjectKind;
use core_types::{Value, Word};
use memory_manager::{RootSet, RootVisitor};

/// A slot in one of the output frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotAddress {
    /// Output frame index
    pub frame_index: usize,
    /// Byte offset from the frame top
    pub offset: usize,
}

/// One entry of the deferred object list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeferredValue {
    /// Tagged field value, stored as is
    Tagged(Word),
    /// Field value to box as a heap number
    Number(f64),
    /// Start of an object; its fields follow
    ObjectStart {
        /// Object index
        object_index: usize,
        /// Representation
        kind: ObjectKind,
        /// Field entries that follow
        field_count: u32,
        /// Output frame the object belongs to
        frame_index: usize,
    },
    /// Second reference to an earlier object
    Duplicate {
        /// Object index of this reference
        object_index: usize,
        /// Object index it refers to
        target: usize,
    },
}

/// A heap number that goes straight into frame slots.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredNumber {
    /// Unboxed value
    pub value: f64,
    /// Slots receiving the boxed number
    pub targets: Vec<SlotAddress>,
}

/// A top-level object and the frame slots that receive it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSlot {
    /// Position of the object's entry in the deferred list
    pub entry: usize,
    /// Slots receiving the materialized object
    pub targets: Vec<SlotAddress>,
}

/// Everything translation deferred to materialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeferredObjects {
    values: Vec<DeferredValue>,
    object_slots: Vec<ObjectSlot>,
    numbers: Vec<DeferredNumber>,
    object_count: usize,
}

impl DeferredObjects {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defers boxing `value` into `slot`.
    pub fn add_frame_number(&mut self, slot: SlotAddress, value: f64) {
        self.numbers.push(DeferredNumber {
            value,
            targets: vec![slot],
        });
    }

    /// Starts an object; `slot` is `None` for objects nested in another.
    pub fn begin_object(
        &mut self,
        slot: Option<SlotAddress>,
        kind: ObjectKind,
        field_count: u32,
        frame_index: usize,
    ) -> usize {
        let object_index = self.object_count;
        self.object_count += 1;
        self.push_object_entry(
            slot,
            DeferredValue::ObjectStart {
                object_index,
                kind,
                field_count,
                frame_index,
            },
        );
        object_index
    }

    /// Records a second reference to object `target`.
    pub fn add_duplicate(
        &mut self,
        slot: Option<SlotAddress>,
        target: u32,
    ) -> Result<usize, TranslationError> {
        let target_index = target as usize;
        if target_index >= self.object_count {
            return Err(TranslationError::UnknownDuplicate {
                target,
                defined: self.object_count,
            });
        }
        let object_index = self.object_count;
        self.object_count += 1;
        self.push_object_entry(
            slot,
            DeferredValue::Duplicate {
                object_index,
                target: target_index,
            },
        );
        Ok(object_index)
    }

    fn push_object_entry(&mut self, slot: Option<SlotAddress>, value: DeferredValue) {
        if let Some(slot) = slot {
            self.object_slots.push(ObjectSlot {
                entry: self.values.len(),
                targets: vec![slot],
            });
        }
        self.values.push(value);
    }

    /// Appends a tagged field value.
    pub fn add_tagged(&mut self, word: Word) {
        self.values.push(DeferredValue::Tagged(word));
    }

    /// Appends a field value to be boxed.
    pub fn add_number(&mut self, value: f64) {
        self.values.push(DeferredValue::Number(value));
    }

    /// Makes `to` receive whatever is deferred into `from`.
    ///
    /// Returns `false` if nothing is deferred into `from`.
    pub fn alias(&mut self, from: SlotAddress, to: SlotAddress) -> bool {
        if let Some(slot) = self
            .object_slots
            .iter_mut()
            .find(|slot| slot.targets.contains(&from))
        {
            slot.targets.push(to);
            return true;
        }
        if let Some(number) = self
            .numbers
            .iter_mut()
            .find(|number| number.targets.contains(&from))
        {
            number.targets.push(to);
            return true;
        }
        false
    }

    /// Entries in encounter order.
    pub fn values(&self) -> &[DeferredValue] {
        &self.values
    }

    /// Top-level objects in encounter order.
    pub fn object_slots(&self) -> &[ObjectSlot] {
        &self.object_slots
    }

    /// Heap numbers destined for frame slots.
    pub fn numbers(&self) -> &[DeferredNumber] {
        &self.numbers
    }

    /// Object indices handed out so far.
    pub fn object_count(&self) -> usize {
        self.object_count
    }

    /// Whether nothing was deferred.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.numbers.is_empty()
    }
}

impl RootSet for DeferredObjects {
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor) {
        for value in &self.values {
            if let DeferredValue::Tagged(word) = value {
                if let Some(value) = Value::from_word(*word) {
                    visitor.visit_value(value);
                }
            }
        }
    }
}
