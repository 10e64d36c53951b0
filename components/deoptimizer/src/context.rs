//! Execution context: the owner of one isolated deoptimizer instance
//!
//! Everything the deoptimizer needs to run is owned here: the heap, the
//! entry tables and in-flight slot, builtin addresses and registered code.
//! Fatal errors abort the context; every later operation then fails with
//! [`DeoptError::ContextAborted`].

use crate::builtins::Builtins;
use crate::code::{CodeId, OptimizedCode};
use crate::config::DeoptimizerConfig;
use crate::data::DeoptimizerData;
use crate::debugger::DeoptimizedFrameInfo;
use crate::deoptimizer::{BailoutType, DeoptPhase, DeoptRequest, Deoptimizer};
use crate::entry_table::{GetEntryMode, JumpTable};
use crate::error::DeoptError;
use crate::registry::{CodeRegistry, OptimizedFunctionVisitor};
use crate::stack::{capture_input_frame, ExecutionStack, StackRoots};
use core_types::{Address, BailoutId, Severity, Value};
use memory_manager::{ChainedRoots, Heap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Outcome of one completed deoptimization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeoptRecord {
    /// Deoptimized code
    pub code: CodeId,
    /// Name of the optimized function
    pub function: String,
    /// Bailout type
    pub bailout_type: BailoutType,
    /// Deoptimization point
    pub deopt_id: u32,
    /// Node id of the point
    pub node_id: BailoutId,
    /// Output frames built
    pub frame_count: usize,
    /// JS frames among them
    pub js_frame_count: usize,
    /// Phases the deoptimizer went through
    pub phases: Vec<DeoptPhase>,
    /// Objects materialized
    pub materialized_objects: usize,
    /// Heap numbers boxed for frame slots
    pub boxed_numbers: usize,
    /// Allocations that needed a collection
    pub gc_retries: usize,
}

/// Running totals for a context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeoptStats {
    /// Eager deoptimizations completed
    pub eager: usize,
    /// Lazy deoptimizations completed
    pub lazy: usize,
    /// Soft deoptimizations completed
    pub soft: usize,
    /// Debugger snapshots produced
    pub debugger_inspections: usize,
    /// Output frames built
    pub frames_built: usize,
    /// Objects materialized
    pub objects_materialized: usize,
    /// Heap numbers boxed
    pub numbers_boxed: usize,
    /// Allocations that needed a collection
    pub gc_retries: usize,
    /// Code objects patched for lazy deoptimization
    pub code_objects_deoptimized: usize,
}

impl DeoptStats {
    fn record(&mut self, record: &DeoptRecord) {
        match record.bailout_type {
            BailoutType::Eager => self.eager += 1,
            BailoutType::Lazy => self.lazy += 1,
            BailoutType::Soft => self.soft += 1,
            BailoutType::Debugger => self.debugger_inspections += 1,
        }
        self.frames_built += record.frame_count;
        self.objects_materialized += record.materialized_objects;
        self.numbers_boxed += record.boxed_numbers;
        self.gc_retries += record.gc_retries;
    }
}

/// One isolated runtime instance, as seen by the deoptimizer.
#[derive(Debug)]
pub struct ExecutionContext {
    config: DeoptimizerConfig,
    heap: Heap,
    data: DeoptimizerData,
    builtins: Builtins,
    registry: CodeRegistry,
    stats: DeoptStats,
    aborted: Option<String>,
}

impl ExecutionContext {
    /// Creates a context with a default heap.
    pub fn new(config: DeoptimizerConfig) -> Result<Self, DeoptError> {
        Self::with_heap(config, Heap::new())
    }

    /// Creates a context around an existing heap.
    pub fn with_heap(config: DeoptimizerConfig, heap: Heap) -> Result<Self, DeoptError> {
        config.validate()?;
        Ok(Self {
            data: DeoptimizerData::new(&config),
            config,
            heap,
            builtins: Builtins::default(),
            registry: CodeRegistry::new(),
            stats: DeoptStats::default(),
            aborted: None,
        })
    }

    /// Replaces the builtin addresses.
    pub fn with_builtins(mut self, builtins: Builtins) -> Self {
        self.builtins = builtins;
        self
    }

    /// Configuration.
    pub fn config(&self) -> &DeoptimizerConfig {
        &self.config
    }

    /// The heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// The heap, mutably.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Builtin addresses.
    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// Entry tables and in-flight state.
    pub fn data(&self) -> &DeoptimizerData {
        &self.data
    }

    /// Registered code.
    pub fn registry(&self) -> &CodeRegistry {
        &self.registry
    }

    /// Running totals.
    pub fn stats(&self) -> &DeoptStats {
        &self.stats
    }

    /// Whether a fatal error aborted this context.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// The error that aborted this context.
    pub fn abort_reason(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    fn ensure_alive(&self) -> Result<(), DeoptError> {
        match &self.aborted {
            Some(reason) => Err(DeoptError::ContextAborted {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Aborts the context if `err` is fatal, then hands it back.
    fn fail(&mut self, err: DeoptError) -> DeoptError {
        if err.is_fatal() && self.aborted.is_none() {
            error!(target: "corten::deopt", error = %err, "fatal deoptimizer error, aborting context");
            self.aborted = Some(err.to_string());
        }
        err
    }

    fn check<T>(&mut self, result: Result<T, DeoptError>) -> Result<T, DeoptError> {
        result.map_err(|err| self.fail(err))
    }

    /// Registers optimized code.
    ///
    /// Lazy call sites are checked for patchability, and every heap object
    /// the code references is pinned for the code's lifetime.
    pub fn register_code(&mut self, code: Arc<OptimizedCode>) -> Result<CodeId, DeoptError> {
        self.ensure_alive()?;
        let patch_size = self.data.generator().patch_size();
        let validated = code.validate_lazy_sites(patch_size);
        self.check(validated)?;
        let pinned = std::iter::once(code.function())
            .chain(code.embedded_objects().iter().copied())
            .chain(code.input_data().literals().as_slice().iter().copied())
            .filter_map(Value::as_heap_ref);
        for object in pinned {
            self.heap.persist(object);
        }
        Ok(self.registry.add(code))
    }

    /// See [`DeoptimizerData::get_deoptimization_entry`].
    pub fn get_deoptimization_entry(
        &mut self,
        id: u32,
        bailout_type: BailoutType,
        mode: GetEntryMode,
    ) -> Result<Option<Address>, DeoptError> {
        self.ensure_alive()?;
        let entry = self.builtins.deoptimizer_entry;
        let result = self
            .data
            .get_deoptimization_entry(id, bailout_type, mode, entry);
        self.check(result)
    }

    /// See [`DeoptimizerData::get_deoptimization_id`].
    pub fn get_deoptimization_id(&self, address: Address, bailout_type: BailoutType) -> Option<u32> {
        self.data.get_deoptimization_id(address, bailout_type)
    }

    /// An empty jump table for code about to be compiled, sharing entries
    /// between consecutive sites only if the configuration allows it.
    pub fn new_jump_table(&self) -> JumpTable {
        JumpTable::new(self.config.reuse_jump_table_entries)
    }

    /// Captures the activation named by `request` and installs a pending
    /// deoptimizer for it, as the entry trampoline does.
    pub fn new_deoptimizer(
        &mut self,
        request: &DeoptRequest,
        stack: &dyn ExecutionStack,
    ) -> Result<(), DeoptError> {
        self.ensure_alive()?;
        let result = self.create_deoptimizer(request, stack).and_then(|deoptimizer| {
            self.data.install(Box::new(deoptimizer))
        });
        self.check(result)
    }

    fn create_deoptimizer(
        &self,
        request: &DeoptRequest,
        stack: &dyn ExecutionStack,
    ) -> Result<Deoptimizer, DeoptError> {
        if !self.data.is_idle() {
            return Err(DeoptError::DeoptimizationInProgress);
        }
        let captured = stack
            .capture(request.fp)
            .ok_or(DeoptError::FrameNotFound { fp: request.fp })?;
        let input = capture_input_frame(&request.code, &captured)?;
        Deoptimizer::new(
            Arc::clone(&request.code),
            request.bailout_type,
            request.deopt_id,
            input,
        )
    }

    /// Takes the pending deoptimizer.
    pub fn grab_deoptimizer(&mut self) -> Result<Box<Deoptimizer>, DeoptError> {
        self.ensure_alive()?;
        self.data.grab()
    }

    /// Returns the in-flight slot to idle.
    pub fn release_deoptimizer(&mut self, deoptimizer: Box<Deoptimizer>) {
        self.data.release(deoptimizer);
    }

    /// Runs a complete deoptimization: capture, translate, materialize and
    /// splice the output frames into `stack`.
    pub fn deoptimize(
        &mut self,
        request: DeoptRequest,
        stack: &mut dyn ExecutionStack,
    ) -> Result<DeoptRecord, DeoptError> {
        self.ensure_alive()?;
        if request.bailout_type == BailoutType::Debugger {
            return Err(self.fail(DeoptError::NoEntryTable(BailoutType::Debugger)));
        }
        self.new_deoptimizer(&request, &*stack)?;
        let mut deoptimizer = self.grab_deoptimizer()?;

        let result = self.run_to_splice(&mut deoptimizer, request.fp, stack);
        match result {
            Ok(()) => {
                let record = Self::record_for(&deoptimizer);
                self.data.release(deoptimizer);
                self.stats.record(&record);
                info!(
                    target: "corten::deopt",
                    code = %record.code,
                    function = %record.function,
                    bailout_type = %record.bailout_type,
                    deopt_id = record.deopt_id,
                    frames = record.frame_count,
                    "deoptimization completed"
                );
                Ok(record)
            }
            Err(err) => {
                self.data.reset();
                Err(self.fail(err))
            }
        }
    }

    fn run_to_splice(
        &mut self,
        deoptimizer: &mut Deoptimizer,
        fp: Address,
        stack: &mut dyn ExecutionStack,
    ) -> Result<(), DeoptError> {
        deoptimizer.compute_output_frames(&self.heap, &self.builtins, &self.config)?;
        {
            let stack_roots = StackRoots(&*stack);
            let roots = ChainedRoots::new(&stack_roots, &self.data);
            deoptimizer.materialize_heap_objects(&mut self.heap, &roots)?;
        }
        stack.splice(fp, deoptimizer.output().to_vec());
        deoptimizer.mark_spliced()
    }

    fn record_for(deoptimizer: &Deoptimizer) -> DeoptRecord {
        DeoptRecord {
            code: deoptimizer.code_id(),
            function: deoptimizer.code().name().to_string(),
            bailout_type: deoptimizer.bailout_type(),
            deopt_id: deoptimizer.deopt_id(),
            node_id: deoptimizer.node_id(),
            frame_count: deoptimizer.output_count(),
            js_frame_count: deoptimizer.js_frame_count(),
            phases: deoptimizer.history().to_vec(),
            materialized_objects: deoptimizer
                .materialized_objects()
                .iter()
                .filter(|object| object.is_some())
                .count(),
            boxed_numbers: deoptimizer.deferred().numbers().len(),
            gc_retries: deoptimizer.gc_retries(),
        }
    }

    /// Deoptimizes the activation that jumped to `entry`, an entry of the
    /// `bailout_type` table.
    pub fn deoptimize_at_entry(
        &mut self,
        code: Arc<OptimizedCode>,
        entry: Address,
        bailout_type: BailoutType,
        fp: Address,
        stack: &mut dyn ExecutionStack,
    ) -> Result<DeoptRecord, DeoptError> {
        self.ensure_alive()?;
        let lookup = self.data.lookup_deoptimization_id(entry, bailout_type);
        let deopt_id = self.check(lookup)?;
        self.deoptimize(
            DeoptRequest {
                code,
                bailout_type,
                deopt_id,
                fp,
            },
            stack,
        )
    }

    /// Builds the unoptimized view of JS frame `js_index` of the optimized
    /// activation at `fp` without touching the stack.
    ///
    /// The snapshot stays outstanding until
    /// [`release_debugger_snapshot`](Self::release_debugger_snapshot).
    pub fn debugger_inspect(
        &mut self,
        code: Arc<OptimizedCode>,
        deopt_id: u32,
        fp: Address,
        js_index: usize,
        stack: &dyn ExecutionStack,
    ) -> Result<DeoptimizedFrameInfo, DeoptError> {
        self.ensure_alive()?;
        if self.data.has_debugger_snapshot() {
            return Err(DeoptError::SnapshotOutstanding);
        }
        let result = self.inspect(code, deopt_id, fp, js_index, stack);
        match result {
            Ok((deoptimizer, info)) => {
                self.data.set_debugger_snapshot(deoptimizer)?;
                self.stats.debugger_inspections += 1;
                Ok(info)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn inspect(
        &mut self,
        code: Arc<OptimizedCode>,
        deopt_id: u32,
        fp: Address,
        js_index: usize,
        stack: &dyn ExecutionStack,
    ) -> Result<(Box<Deoptimizer>, DeoptimizedFrameInfo), DeoptError> {
        let captured = stack.capture(fp).ok_or(DeoptError::FrameNotFound { fp })?;
        let input = capture_input_frame(&code, &captured)?;
        let mut deoptimizer = Deoptimizer::new(code, BailoutType::Debugger, deopt_id, input)?;
        deoptimizer.compute_output_frames(&self.heap, &self.builtins, &self.config)?;
        let stack_roots = StackRoots(stack);
        let roots = ChainedRoots::new(&stack_roots, &self.data);
        deoptimizer.materialize_heap_objects(&mut self.heap, &roots)?;
        let info = DeoptimizedFrameInfo::new(&deoptimizer, js_index, &self.heap)?;
        Ok((Box::new(deoptimizer), info))
    }

    /// Drops the outstanding debugger snapshot. Returns whether one existed.
    pub fn release_debugger_snapshot(&mut self) -> bool {
        self.data.take_debugger_snapshot().is_some()
    }

    fn deoptimize_marked(&mut self) -> Result<usize, DeoptError> {
        let entry = self.builtins.deoptimizer_entry;
        let result = self.registry.deoptimize_marked_code(&mut self.data, entry);
        let count = self.check(result)?;
        self.stats.code_objects_deoptimized += count;
        Ok(count)
    }

    /// Invalidates all optimized code of `function`.
    pub fn deoptimize_function(&mut self, function: Value) -> Result<usize, DeoptError> {
        self.ensure_alive()?;
        self.registry.mark_where(|code| code.function() == function);
        self.deoptimize_marked()
    }

    /// Invalidates all optimized code.
    pub fn deoptimize_all(&mut self) -> Result<usize, DeoptError> {
        self.ensure_alive()?;
        self.registry.mark_where(|_| true);
        self.deoptimize_marked()
    }

    /// Invalidates all optimized code depending on `object`.
    pub fn deoptimize_global_object(&mut self, object: Value) -> Result<usize, DeoptError> {
        self.ensure_alive()?;
        self.registry.mark_where(|code| code.references(object));
        self.deoptimize_marked()
    }

    /// Runs a lazy deoptimization for every activation of deoptimized code.
    pub fn process_lazy_deoptimizations(
        &mut self,
        stack: &mut dyn ExecutionStack,
    ) -> Result<Vec<DeoptRecord>, DeoptError> {
        self.ensure_alive()?;
        let patch_size = self.data.generator().patch_size();
        let mut records = Vec::new();
        for activation in stack.optimized_activations() {
            if !activation.code.is_deoptimized() {
                continue;
            }
            let Some(deopt_id) = activation
                .code
                .lazy_deopt_id_for_return_address(activation.pc, patch_size)
            else {
                warn!(
                    target: "corten::deopt",
                    code = %activation.code.id(),
                    pc = activation.pc,
                    "activation of deoptimized code is not at a lazy site"
                );
                return Err(self.fail(DeoptError::NoLazySite { pc: activation.pc }));
            };
            records.push(self.deoptimize(
                DeoptRequest {
                    code: activation.code,
                    bailout_type: BailoutType::Lazy,
                    deopt_id,
                    fp: activation.fp,
                },
                stack,
            )?);
        }
        Ok(records)
    }

    /// See [`CodeRegistry::visit_all_optimized_functions`].
    pub fn visit_all_optimized_functions(&self, visitor: &mut dyn OptimizedFunctionVisitor) {
        self.registry.visit_all_optimized_functions(visitor);
    }

    /// Number of code objects deoptimized in this context.
    pub fn deoptimized_code_count(&self) -> usize {
        self.registry.deoptimized_code_count()
    }

    /// Collects garbage with the stack and in-flight deoptimizers as roots.
    pub fn collect_garbage(&mut self, stack: &dyn ExecutionStack) {
        let stack_roots = StackRoots(stack);
        let roots = ChainedRoots::new(&stack_roots, &self.data);
        self.heap.collect_garbage(&roots);
    }
}
