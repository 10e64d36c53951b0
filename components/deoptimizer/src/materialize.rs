//! Materialization of deferred heap values
//!
//! Runs after translation, once every output frame exists. Each allocation
//! may trigger a collection, so every allocation reports the full set of
//! references the deoptimizer holds: output frames, the deferred list, the
//! objects materialized so far, the literal pool and the caller's own roots.

use crate::deferred::{DeferredObjects, DeferredValue};
use crate::deoptimizer::{DeoptPhase, Deoptimizer};
use crate::error::DeoptError;
use crate::frame_description::{iterate_frame_roots, FrameDescription, FrameType};
use crate::literals::LiteralPool;
use crate::translation::ObjectKind;
use core_types::{HeapRef, Value};
use memory_manager::{AllocationError, ArgumentsObject, Heap, HeapObject, RootSet, RootVisitor};
use tracing::debug;

/// Everything a materializing deoptimizer keeps alive.
struct MaterializationRoots<'a> {
    output: &'a [FrameDescription],
    deferred: &'a DeferredObjects,
    materialized: &'a [Option<Value>],
    literals: &'a LiteralPool,
    function: Value,
    extra: &'a dyn RootSet,
}

impl RootSet for MaterializationRoots<'_> {
    fn iterate_roots(&self, visitor: &mut dyn RootVisitor) {
        iterate_frame_roots(self.output, visitor);
        self.deferred.iterate_roots(visitor);
        for value in self.materialized.iter().flatten() {
            visitor.visit_value(*value);
        }
        self.literals.iterate_roots(visitor);
        visitor.visit_value(self.function);
        self.extra.iterate_roots(visitor);
    }
}

/// An object whose fields are still being filled.
struct Fill {
    object: HeapRef,
    field_count: u32,
    next: u32,
}

impl Deoptimizer {
    fn allocate(
        &self,
        heap: &mut Heap,
        object: HeapObject,
        materialized: &[Option<Value>],
        extra_roots: &dyn RootSet,
    ) -> Result<HeapRef, DeoptError> {
        let roots = MaterializationRoots {
            output: &self.output,
            deferred: &self.deferred,
            materialized,
            literals: self.code.input_data().literals(),
            function: self.function,
            extra: extra_roots,
        };
        Ok(heap.allocate(object, &roots)?)
    }

    /// Output index of the arguments adaptor frame holding the actual
    /// arguments of the JS frame at `frame_index`, if the call was adapted.
    pub fn adaptor_frame_for(&self, frame_index: usize) -> Option<usize> {
        let frame_type = |index: usize| self.output.get(index).map(|f| f.frame_type());
        if frame_index >= 1 && frame_type(frame_index - 1) == Some(FrameType::ArgumentsAdaptor) {
            return Some(frame_index - 1);
        }
        if frame_index >= 2
            && frame_type(frame_index - 1) == Some(FrameType::Construct)
            && frame_type(frame_index - 2) == Some(FrameType::ArgumentsAdaptor)
        {
            return Some(frame_index - 2);
        }
        None
    }

    /// Allocates every deferred heap number and object and writes them into
    /// their frame slots.
    ///
    /// `extra_roots` covers references held outside the deoptimizer, usually
    /// the rest of the execution stack.
    pub fn materialize_heap_objects(
        &mut self,
        heap: &mut Heap,
        extra_roots: &dyn RootSet,
    ) -> Result<(), DeoptError> {
        self.expect_phase(DeoptPhase::Translating)?;
        self.enter_phase(DeoptPhase::Materializing);
        let retries_before = heap.stats().retried_allocations;
        let mut materialized: Vec<Option<Value>> = vec![None; self.deferred.object_count()];

        for index in 0..self.deferred.numbers().len() {
            let value = self.deferred.numbers()[index].value;
            let number = self.allocate(
                heap,
                HeapObject::HeapNumber(value),
                &materialized,
                extra_roots,
            )?;
            for target in &self.deferred.numbers()[index].targets {
                self.output[target.frame_index].set_value(target.offset, Value::HeapObject(number));
            }
        }

        let mut cursor = 0;
        for slot_index in 0..self.deferred.object_slots().len() {
            let entry = self.deferred.object_slots()[slot_index].entry;
            debug_assert!(entry >= cursor);
            cursor = entry;
            let object = self.materialize_value(heap, &mut cursor, &mut materialized, extra_roots)?;
            for target in &self.deferred.object_slots()[slot_index].targets {
                self.output[target.frame_index].set_value(target.offset, object);
            }
        }

        self.gc_retries = heap.stats().retried_allocations - retries_before;
        debug!(
            target: "corten::deopt",
            code = %self.code.id(),
            numbers = self.deferred.numbers().len(),
            objects = materialized.iter().filter(|o| o.is_some()).count(),
            gc_retries = self.gc_retries,
            "heap objects materialized"
        );
        self.materialized = materialized;
        Ok(())
    }

    /// Materializes the deferred entry at `cursor`, nested objects included,
    /// and advances `cursor` past it.
    fn materialize_value(
        &self,
        heap: &mut Heap,
        cursor: &mut usize,
        materialized: &mut [Option<Value>],
        extra_roots: &dyn RootSet,
    ) -> Result<Value, DeoptError> {
        let values = self.deferred.values();
        let mut stack: Vec<Fill> = Vec::new();
        loop {
            let entry = values[*cursor];
            *cursor += 1;
            let mut produced = match entry {
                DeferredValue::Tagged(word) => {
                    Some(Value::from_word(word).ok_or(DeoptError::UntaggedField(word))?)
                }
                DeferredValue::Number(value) => {
                    let number = self.allocate(
                        heap,
                        HeapObject::HeapNumber(value),
                        materialized,
                        extra_roots,
                    )?;
                    Some(Value::HeapObject(number))
                }
                DeferredValue::Duplicate {
                    object_index,
                    target,
                } => {
                    let object = materialized[target]
                        .ok_or(DeoptError::UnresolvedDuplicate { index: target })?;
                    materialized[object_index] = Some(object);
                    Some(object)
                }
                DeferredValue::ObjectStart {
                    object_index,
                    kind,
                    field_count,
                    frame_index,
                } => {
                    let adaptor = match kind {
                        ObjectKind::Arguments => self.adaptor_frame_for(frame_index),
                        ObjectKind::Captured => None,
                    };
                    let (object, fill) = match (kind, adaptor) {
                        (ObjectKind::Arguments, Some(adaptor)) => {
                            let adaptor = &self.output[adaptor];
                            let elements = (1..adaptor.parameter_count())
                                .map(|i| adaptor.parameter(i).unwrap_or(Value::Undefined))
                                .collect();
                            let arguments = HeapObject::Arguments(ArgumentsObject {
                                callee: self.output[frame_index].function(),
                                elements,
                            });
                            let object =
                                self.allocate(heap, arguments, materialized, extra_roots)?;
                            self.skip_fields(cursor, field_count, materialized);
                            (object, false)
                        }
                        (ObjectKind::Arguments, None) => {
                            let arguments = HeapObject::Arguments(ArgumentsObject {
                                callee: self.output[frame_index].function(),
                                elements: vec![Value::Undefined; field_count as usize],
                            });
                            let object =
                                self.allocate(heap, arguments, materialized, extra_roots)?;
                            (object, true)
                        }
                        (ObjectKind::Captured, _) => {
                            let fields =
                                HeapObject::FixedArray(vec![Value::Undefined; field_count as usize]);
                            let object = self.allocate(heap, fields, materialized, extra_roots)?;
                            (object, true)
                        }
                    };
                    materialized[object_index] = Some(Value::HeapObject(object));
                    if fill && field_count > 0 {
                        stack.push(Fill {
                            object,
                            field_count,
                            next: 0,
                        });
                        None
                    } else {
                        Some(Value::HeapObject(object))
                    }
                }
            };

            // Hand the value to the innermost open object; completed objects
            // become values for their parent in turn.
            while let Some(value) = produced.take() {
                let Some(fill) = stack.last_mut() else {
                    return Ok(value);
                };
                store_field(heap, fill.object, fill.next as usize, value)?;
                fill.next += 1;
                if fill.next == fill.field_count {
                    let object = fill.object;
                    stack.pop();
                    produced = Some(Value::HeapObject(object));
                }
            }
        }
    }

    /// Skips `count` field entries whose object is not built from them.
    fn skip_fields(&self, cursor: &mut usize, count: u32, materialized: &mut [Option<Value>]) {
        let values = self.deferred.values();
        let mut pending = vec![count];
        while let Some(remaining) = pending.last_mut() {
            if *remaining == 0 {
                pending.pop();
                continue;
            }
            *remaining -= 1;
            match values[*cursor] {
                DeferredValue::ObjectStart {
                    object_index,
                    field_count,
                    ..
                } => {
                    materialized[object_index] = None;
                    pending.push(field_count);
                }
                DeferredValue::Duplicate {
                    object_index,
                    target,
                } => materialized[object_index] = materialized[target],
                DeferredValue::Tagged(_) | DeferredValue::Number(_) => {}
            }
            *cursor += 1;
        }
    }
}

fn store_field(heap: &mut Heap, object: HeapRef, index: usize, value: Value) -> Result<(), DeoptError> {
    match heap.get_mut(object) {
        Some(HeapObject::FixedArray(fields)) => fields[index] = value,
        Some(HeapObject::Arguments(arguments)) => arguments.elements[index] = value,
        _ => return Err(AllocationError::Dangling(object).into()),
    }
    Ok(())
}
