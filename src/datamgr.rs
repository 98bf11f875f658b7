//! Data manager boundary: source access for the execution core.
//!
//! The connector/translator layer that turns sub-plans into
//! source-specific commands lives outside this crate; plans reach it
//! through `ProcessorDataManager`. A `TempTableDataManager` can be
//! layered in front to serve requests against session-local temporary
//! relations without consulting the outer manager.

use crate::buffer::{Batch, DEFAULT_BATCH_SIZE};
use crate::context::ProcessorContext;
use crate::error::EngineResult;
use crate::plan::{BatchPoll, Poll};
use crate::processing_err;
use crate::types::{ElementInfo, Value};
use dashmap::DashMap;
use log::debug;
use std::sync::Arc;

/// A command issued against one data source.
#[derive(Debug, Clone)]
pub struct SourceCommand {
    /// The relation (or source object) the command targets.
    pub target: String,
    /// Source-dialect command text, produced by the translator layer.
    pub text: String,
    /// Row limit pushed down to the source, if any.
    pub limit: Option<u64>,
}

impl SourceCommand {
    pub fn new(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            text: text.into(),
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A row-producing handle registered against a source.
pub trait TupleSource: Send {
    /// Poll for the next batch; `NotReady` while the source has no data
    /// available yet.
    fn poll_batch(&mut self) -> EngineResult<BatchPoll>;

    /// Release the source-side resources behind this handle.
    fn close(&mut self);
}

/// Source access consumed by plans.
pub trait ProcessorDataManager: Send + Sync {
    /// Register a command against a source, returning a row-producing
    /// handle.
    fn register_request(
        &self,
        context: &ProcessorContext,
        command: &SourceCommand,
        source_name: &str,
        binding_id: u32,
        node_id: u32,
    ) -> EngineResult<Box<dyn TupleSource>>;

    /// Look up a single value in a code table. May signal `NotReady`
    /// while the lookup table loads.
    fn lookup_code_value(
        &self,
        context: &ProcessorContext,
        table: &str,
        return_column: &str,
        key_column: &str,
        key: &Value,
    ) -> EngineResult<Poll<Option<Value>>>;
}

struct TempTable {
    schema: Vec<ElementInfo>,
    rows: Vec<Vec<Value>>,
}

/// Serves requests against session-local temporary relations, delegating
/// everything else to the wrapped manager.
pub struct TempTableDataManager {
    inner: Arc<dyn ProcessorDataManager>,
    tables: DashMap<String, TempTable>,
}

impl TempTableDataManager {
    pub fn new(inner: Arc<dyn ProcessorDataManager>) -> Self {
        Self {
            inner,
            tables: DashMap::new(),
        }
    }

    /// Define a temporary relation for this session.
    pub fn define(&self, name: impl Into<String>, schema: Vec<ElementInfo>) {
        self.tables.insert(
            name.into(),
            TempTable {
                schema,
                rows: Vec::new(),
            },
        );
    }

    pub fn insert_rows(&self, name: &str, rows: Vec<Vec<Value>>) -> EngineResult<()> {
        let mut table = self
            .tables
            .get_mut(name)
            .ok_or_else(|| processing_err!("temporary table '{}' does not exist", name))?;
        for row in &rows {
            if row.len() != table.schema.len() {
                return Err(processing_err!(
                    "row has {} values but temporary table '{}' has {} columns",
                    row.len(),
                    name,
                    table.schema.len()
                ));
            }
            for (value, column) in row.iter().zip(&table.schema) {
                if !value.is_compatible_with(column.data_type) {
                    return Err(processing_err!(
                        "value {:?} is not valid for column '{}' of temporary table '{}'",
                        value,
                        column.name,
                        name
                    ));
                }
            }
        }
        table.rows.extend(rows);
        Ok(())
    }

    pub fn drop_table(&self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }
}

impl ProcessorDataManager for TempTableDataManager {
    fn register_request(
        &self,
        context: &ProcessorContext,
        command: &SourceCommand,
        source_name: &str,
        binding_id: u32,
        node_id: u32,
    ) -> EngineResult<Box<dyn TupleSource>> {
        if let Some(table) = self.tables.get(&command.target) {
            debug!(
                "request {} node {} served from temporary table '{}'",
                context.request_id(),
                node_id,
                command.target
            );
            let mut rows = table.rows.clone();
            if let Some(limit) = command.limit {
                rows.truncate(limit as usize);
            }
            return Ok(Box::new(TempTableScan::new(rows)));
        }
        self.inner
            .register_request(context, command, source_name, binding_id, node_id)
    }

    fn lookup_code_value(
        &self,
        context: &ProcessorContext,
        table: &str,
        return_column: &str,
        key_column: &str,
        key: &Value,
    ) -> EngineResult<Poll<Option<Value>>> {
        self.inner
            .lookup_code_value(context, table, return_column, key_column, key)
    }
}

/// In-memory scan over a temporary table snapshot.
struct TempTableScan {
    rows: Vec<Vec<Value>>,
    next_row: u64,
    done: bool,
}

impl TempTableScan {
    fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            rows,
            next_row: 1,
            done: false,
        }
    }
}

impl TupleSource for TempTableScan {
    fn poll_batch(&mut self) -> EngineResult<BatchPoll> {
        if self.done {
            return Ok(Poll::Ready(Batch::terminal(self.next_row, Vec::new())));
        }
        let begin = self.next_row;
        let start = (begin - 1) as usize;
        let end = (start + DEFAULT_BATCH_SIZE as usize).min(self.rows.len());
        let slice: Vec<Vec<Value>> = self.rows[start..end].to_vec();
        self.next_row = begin + slice.len() as u64;
        if end == self.rows.len() {
            self.done = true;
            Ok(Poll::Ready(Batch::terminal(begin, slice)))
        } else {
            Ok(Poll::Ready(Batch::new(begin, slice)))
        }
    }

    fn close(&mut self) {
        self.rows.clear();
        self.done = true;
    }
}
