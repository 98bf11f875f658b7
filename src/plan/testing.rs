//! Scripted plans and sources shared by the execution-core tests.

use crate::buffer::{Batch, BufferManager, MemoryBufferManager, ReservationId, TupleBuffer};
use crate::context::ProcessorContext;
use crate::datamgr::{ProcessorDataManager, SourceCommand, TupleSource};
use crate::error::{EngineResult, Warning};
use crate::plan::{BatchPoll, BatchProducer, ExecutionPlan, Poll};
use crate::types::{DataType, ElementInfo, Value};
use crate::{internal_err, processing_err};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared, ordered record of lifecycle events across scripted plans.
pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

pub(crate) fn new_event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// A plan that replays a scripted sequence of row groups, optionally
/// interleaving not-ready signals, warnings, and failures.
pub(crate) struct ScriptedPlan {
    label: String,
    script: Vec<Vec<Vec<Value>>>,
    not_ready_before: Vec<usize>,
    open_not_ready: usize,
    warning_msgs: Vec<String>,
    fail_on_batch: Option<usize>,
    emit_variable: Option<String>,
    requires_txn: bool,
    events: Option<EventLog>,
    output: Vec<ElementInfo>,
    final_buffer: Option<TupleBuffer>,
    final_buffer_not_ready: usize,

    context: Option<ProcessorContext>,
    warnings: Vec<Warning>,
    batch_index: usize,
    next_row: u64,
    pending_not_ready: usize,
    pending_open_not_ready: usize,
    opened: bool,
    closed: bool,
}

impl ScriptedPlan {
    /// `script` holds the row groups to emit, in order; the last group is
    /// emitted as the terminal batch.
    pub(crate) fn new(script: Vec<Vec<Vec<Value>>>) -> Self {
        Self {
            label: "plan".to_string(),
            not_ready_before: vec![0; script.len()],
            pending_not_ready: 0,
            script,
            open_not_ready: 0,
            warning_msgs: Vec::new(),
            fail_on_batch: None,
            emit_variable: None,
            requires_txn: false,
            events: None,
            output: vec![ElementInfo::new("count", DataType::Integer)],
            final_buffer: None,
            final_buffer_not_ready: 0,
            context: None,
            warnings: Vec::new(),
            batch_index: 0,
            next_row: 1,
            pending_open_not_ready: 0,
            opened: false,
            closed: false,
        }
    }

    pub(crate) fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Number of `NotReady` signals to emit before each scripted batch.
    pub(crate) fn with_not_ready_before_batches(mut self, counts: &[usize]) -> Self {
        self.not_ready_before = counts.to_vec();
        self.not_ready_before.resize(self.script.len().max(counts.len()), 0);
        self
    }

    pub(crate) fn with_not_ready_on_open(mut self, count: usize) -> Self {
        self.open_not_ready = count;
        self
    }

    pub(crate) fn with_warning(mut self, message: impl Into<String>) -> Self {
        self.warning_msgs.push(message.into());
        self
    }

    /// Fail with a processing error instead of producing the batch at
    /// the given index.
    pub(crate) fn with_failure_on_batch(mut self, index: usize) -> Self {
        self.fail_on_batch = Some(index);
        self
    }

    /// Instead of the script, emit one terminal batch holding the value
    /// currently bound to the named variable.
    pub(crate) fn emitting_variable(mut self, name: impl Into<String>) -> Self {
        self.emit_variable = Some(name.into());
        self
    }

    pub(crate) fn with_requires_transaction(mut self, requires: bool) -> Self {
        self.requires_txn = requires;
        self
    }

    pub(crate) fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    /// Expose a prematerialized result, with optional `NotReady` signals
    /// before it becomes available.
    pub(crate) fn with_final_buffer(mut self, buffer: TupleBuffer, not_ready: usize) -> Self {
        self.final_buffer = Some(buffer);
        self.final_buffer_not_ready = not_ready;
        self
    }

    fn record(&self, event: &str) {
        if let Some(events) = &self.events {
            events.lock().push(format!("{} {}", event, self.label));
        }
    }

    fn arm_not_ready(&mut self) {
        self.pending_not_ready = self
            .not_ready_before
            .get(self.batch_index)
            .copied()
            .unwrap_or(0);
        self.pending_open_not_ready = self.open_not_ready;
    }
}

impl ExecutionPlan for ScriptedPlan {
    fn initialize(
        &mut self,
        context: ProcessorContext,
        _data_manager: Arc<dyn ProcessorDataManager>,
        _buffer_manager: Arc<dyn BufferManager>,
    ) -> EngineResult<()> {
        self.context = Some(context);
        self.arm_not_ready();
        Ok(())
    }

    fn open(&mut self) -> EngineResult<Poll<()>> {
        if self.opened {
            return Ok(Poll::Ready(()));
        }
        if self.pending_open_not_ready > 0 {
            self.pending_open_not_ready -= 1;
            return Ok(Poll::NotReady);
        }
        self.opened = true;
        self.closed = false;
        self.warnings = self.warning_msgs.iter().map(Warning::new).collect();
        self.record("open");
        Ok(Poll::Ready(()))
    }

    fn next_batch(&mut self) -> EngineResult<BatchPoll> {
        if !self.opened {
            return Err(internal_err!("plan '{}' not open", self.label));
        }
        if self.fail_on_batch == Some(self.batch_index) {
            return Err(processing_err!("scripted failure in plan '{}'", self.label));
        }
        if self.pending_not_ready > 0 {
            self.pending_not_ready -= 1;
            return Ok(Poll::NotReady);
        }

        if let Some(name) = &self.emit_variable {
            let value = self
                .context
                .as_ref()
                .and_then(|c| c.variables().get(name))
                .unwrap_or(Value::Null);
            let batch = Batch::terminal(self.next_row, vec![vec![value]]);
            self.next_row = batch.end_row() + 1;
            self.record("terminal");
            return Ok(Poll::Ready(batch));
        }

        if self.batch_index >= self.script.len() {
            self.record("terminal");
            return Ok(Poll::Ready(Batch::terminal(self.next_row, Vec::new())));
        }

        let rows = self.script[self.batch_index].clone();
        let terminal = self.batch_index + 1 == self.script.len();
        let batch = if terminal {
            Batch::terminal(self.next_row, rows)
        } else {
            Batch::new(self.next_row, rows)
        };
        self.next_row = batch.end_row() + 1;
        self.batch_index += 1;
        if terminal {
            self.record("terminal");
        } else {
            self.arm_not_ready();
        }
        Ok(Poll::Ready(batch))
    }

    fn close(&mut self) -> EngineResult<()> {
        if self.opened && !self.closed {
            self.closed = true;
            self.record("close");
        }
        Ok(())
    }

    fn reset(&mut self) -> EngineResult<()> {
        self.opened = false;
        self.closed = false;
        self.batch_index = 0;
        self.next_row = 1;
        self.warnings.clear();
        self.arm_not_ready();
        self.record("reset");
        Ok(())
    }

    fn output_elements(&self) -> &[ElementInfo] {
        &self.output
    }

    fn duplicate(&self) -> Box<dyn ExecutionPlan> {
        let mut dup = ScriptedPlan::new(self.script.clone());
        dup.label = self.label.clone();
        dup.not_ready_before = self.not_ready_before.clone();
        dup.open_not_ready = self.open_not_ready;
        dup.warning_msgs = self.warning_msgs.clone();
        dup.fail_on_batch = self.fail_on_batch;
        dup.emit_variable = self.emit_variable.clone();
        dup.requires_txn = self.requires_txn;
        dup.events = self.events.clone();
        dup.output = self.output.clone();
        dup.arm_not_ready();
        Box::new(dup)
    }

    fn requires_transaction(&self) -> bool {
        self.requires_txn
    }

    fn drain_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    fn has_final_buffer(&self) -> bool {
        self.final_buffer.is_some()
    }

    fn final_buffer(&mut self) -> EngineResult<Poll<TupleBuffer>> {
        if self.final_buffer_not_ready > 0 {
            self.final_buffer_not_ready -= 1;
            return Ok(Poll::NotReady);
        }
        match &self.final_buffer {
            Some(buffer) => Ok(Poll::Ready(buffer.clone())),
            None => Err(internal_err!("plan '{}' has no final buffer", self.label)),
        }
    }
}

/// A bare producer for collector and cursor tests; entries are emitted in
/// order, with `None` standing for a `NotReady` signal.
pub(crate) struct ScriptedProducer {
    entries: std::collections::VecDeque<Option<Batch>>,
}

impl ScriptedProducer {
    /// Build from row groups; the last group becomes the terminal batch.
    pub(crate) fn new(script: Vec<Vec<Vec<Value>>>) -> Self {
        let mut entries = std::collections::VecDeque::new();
        let mut next_row = 1u64;
        let count = script.len();
        for (i, rows) in script.into_iter().enumerate() {
            let batch = if i + 1 == count {
                Batch::terminal(next_row, rows)
            } else {
                Batch::new(next_row, rows)
            };
            next_row = batch.end_row() + 1;
            entries.push_back(Some(batch));
        }
        Self { entries }
    }

    /// Insert a `NotReady` signal before the entry at `index`.
    pub(crate) fn with_not_ready_at(mut self, index: usize) -> Self {
        self.entries.insert(index, None);
        self
    }
}

impl BatchProducer for ScriptedProducer {
    fn poll_batch(&mut self) -> EngineResult<BatchPoll> {
        match self.entries.pop_front() {
            Some(Some(batch)) => Ok(Poll::Ready(batch)),
            Some(None) => Ok(Poll::NotReady),
            None => Err(internal_err!("producer polled past terminal batch")),
        }
    }
}

/// Data manager for tests that never reach a source.
struct NoopDataManager;

impl ProcessorDataManager for NoopDataManager {
    fn register_request(
        &self,
        _context: &ProcessorContext,
        command: &SourceCommand,
        _source_name: &str,
        _binding_id: u32,
        _node_id: u32,
    ) -> EngineResult<Box<dyn TupleSource>> {
        Err(internal_err!(
            "no source available for '{}' in this test",
            command.target
        ))
    }

    fn lookup_code_value(
        &self,
        _context: &ProcessorContext,
        _table: &str,
        _return_column: &str,
        _key_column: &str,
        _key: &Value,
    ) -> EngineResult<Poll<Option<Value>>> {
        Ok(Poll::Ready(None))
    }
}

pub(crate) fn empty_data_manager() -> Arc<dyn ProcessorDataManager> {
    Arc::new(NoopDataManager)
}

/// Buffer manager wrapper that counts reserve and release calls.
pub(crate) struct TrackingBufferManager {
    inner: MemoryBufferManager,
    reserves: AtomicUsize,
    releases: AtomicUsize,
}

impl TrackingBufferManager {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryBufferManager::new(1 << 24),
            reserves: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    pub(crate) fn reserve_calls(&self) -> usize {
        self.reserves.load(Ordering::SeqCst)
    }

    pub(crate) fn release_calls(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl BufferManager for TrackingBufferManager {
    fn reserve(&self, bytes: u64) -> EngineResult<ReservationId> {
        self.reserves.fetch_add(1, Ordering::SeqCst);
        self.inner.reserve(bytes)
    }

    fn release(&self, reservation: ReservationId) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release(reservation);
    }

    fn schema_size(&self, schema: &[ElementInfo]) -> u64 {
        self.inner.schema_size(schema)
    }

    fn create_buffer(&self, schema: Vec<ElementInfo>, forward_only: bool) -> TupleBuffer {
        self.inner.create_buffer(schema, forward_only)
    }
}
