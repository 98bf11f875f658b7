//! Ordered execution of independent update statements in one batch.
//!
//! Later statements in a batch may read data written by earlier ones, so
//! children are opened lazily, one at a time, strictly after the previous
//! child has produced its terminal batch and been closed. In bulk mode a
//! single compiled plan shape serves arbitrarily many bound-parameter
//! sets: before each invocation the local variable scope is repopulated
//! and the one child is reset and reopened.

use crate::buffer::{Batch, BufferManager, TupleBuffer};
use crate::context::ProcessorContext;
use crate::datamgr::ProcessorDataManager;
use crate::error::{EngineResult, Warning};
use crate::internal_err;
use crate::plan::{BatchPoll, ExecutionPlan, Poll};
use crate::types::{DataType, ElementInfo, Value};
use log::debug;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandState {
    NotOpened,
    Opened,
    Closed,
}

/// Composite plan sequencing N independent update statements.
pub struct BatchedUpdatePlan {
    /// Non-bulk: one plan per statement. Bulk: exactly one shared template.
    children: Vec<Box<dyn ExecutionPlan>>,
    /// Bound parameter sets; present only in bulk mode.
    parameter_sets: Option<Vec<Vec<(String, Value)>>>,
    output: Vec<ElementInfo>,

    context: Option<ProcessorContext>,
    states: Vec<CommandState>,
    /// Update-count rows in global statement order.
    update_counts: Vec<Vec<Value>>,
    current: usize,
    /// Whether bindings have been applied for the current command.
    bound: bool,
    warnings: Vec<Warning>,
}

impl BatchedUpdatePlan {
    pub fn new(children: Vec<Box<dyn ExecutionPlan>>) -> Self {
        let command_count = children.len();
        Self {
            children,
            parameter_sets: None,
            output: vec![ElementInfo::new("count", DataType::Integer)],
            context: None,
            states: vec![CommandState::NotOpened; command_count],
            update_counts: Vec::new(),
            current: 0,
            bound: false,
            warnings: Vec::new(),
        }
    }

    /// Bulk mode: one template executed once per bound-parameter set.
    /// Each set is a list of `(variable, value)` bindings.
    pub fn bulk(
        template: Box<dyn ExecutionPlan>,
        parameter_sets: Vec<Vec<(String, Value)>>,
    ) -> Self {
        let command_count = parameter_sets.len();
        Self {
            children: vec![template],
            parameter_sets: Some(parameter_sets),
            output: vec![ElementInfo::new("count", DataType::Integer)],
            context: None,
            states: vec![CommandState::NotOpened; command_count],
            update_counts: Vec::new(),
            current: 0,
            bound: false,
            warnings: Vec::new(),
        }
    }

    fn is_bulk(&self) -> bool {
        self.parameter_sets.is_some()
    }

    /// Number of logical commands (statements or bound invocations).
    pub fn command_count(&self) -> usize {
        self.states.len()
    }

    fn child_index(&self, command: usize) -> usize {
        if self.is_bulk() {
            0
        } else {
            command
        }
    }

    /// Bind parameters (bulk mode) and open the current command's plan.
    /// Binding happens once per command even when `open` retries.
    fn open_current(&mut self) -> EngineResult<Poll<()>> {
        let command = self.current;
        if !self.bound {
            if let Some(sets) = &self.parameter_sets {
                let context = self
                    .context
                    .as_ref()
                    .ok_or_else(|| internal_err!("batched update plan not initialized"))?;
                let vars = context.variables();
                vars.clear_local();
                for (name, value) in &sets[command] {
                    vars.set(name.clone(), value.clone());
                }
                self.children[0].reset()?;
            }
            self.bound = true;
        }
        let child_index = self.child_index(command);
        let child = &mut self.children[child_index];
        match child.open()? {
            Poll::Ready(()) => {
                self.states[command] = CommandState::Opened;
                debug!("batched update: opened command {}", command);
                Ok(Poll::Ready(()))
            }
            Poll::NotReady => Ok(Poll::NotReady),
        }
    }
}

impl ExecutionPlan for BatchedUpdatePlan {
    fn initialize(
        &mut self,
        context: ProcessorContext,
        data_manager: Arc<dyn ProcessorDataManager>,
        buffer_manager: Arc<dyn BufferManager>,
    ) -> EngineResult<()> {
        for child in &mut self.children {
            child.initialize(context.clone(), data_manager.clone(), buffer_manager.clone())?;
        }
        self.context = Some(context);
        Ok(())
    }

    /// Opens only the first command; later commands open lazily from
    /// `next_batch` once their predecessor has fully drained.
    fn open(&mut self) -> EngineResult<Poll<()>> {
        if self.command_count() == 0 {
            return Ok(Poll::Ready(()));
        }
        if self.states[0] != CommandState::NotOpened {
            return Ok(Poll::Ready(()));
        }
        self.open_current()
    }

    fn next_batch(&mut self) -> EngineResult<BatchPoll> {
        while self.current < self.command_count() {
            if self.states[self.current] == CommandState::NotOpened {
                match self.open_current()? {
                    Poll::Ready(()) => {}
                    Poll::NotReady => return Ok(Poll::NotReady),
                }
            }
            let child_index = self.child_index(self.current);
            match self.children[child_index].next_batch()? {
                Poll::NotReady => return Ok(Poll::NotReady),
                Poll::Ready(batch) => {
                    let terminal = batch.is_terminal();
                    self.update_counts.extend(batch.into_rows());
                    if terminal {
                        let child = &mut self.children[child_index];
                        child.close()?;
                        self.warnings.extend(child.drain_warnings());
                        self.states[self.current] = CommandState::Closed;
                        self.current += 1;
                        self.bound = false;
                    }
                }
            }
        }
        // Exactly one terminal batch carrying the whole accumulated
        // update-count list; no non-terminal batches are ever produced.
        Ok(Poll::Ready(Batch::terminal(1, self.update_counts.clone())))
    }

    /// Closes only the currently open command; earlier commands already
    /// closed themselves as part of the sequencing.
    fn close(&mut self) -> EngineResult<()> {
        if self.current < self.command_count()
            && self.states[self.current] == CommandState::Opened
        {
            let child_index = self.child_index(self.current);
            self.children[child_index].close()?;
            self.states[self.current] = CommandState::Closed;
        }
        Ok(())
    }

    fn reset(&mut self) -> EngineResult<()> {
        for child in &mut self.children {
            child.reset()?;
        }
        let command_count = self.command_count();
        self.states = vec![CommandState::NotOpened; command_count];
        self.update_counts.clear();
        self.current = 0;
        self.bound = false;
        self.warnings.clear();
        Ok(())
    }

    fn output_elements(&self) -> &[ElementInfo] {
        &self.output
    }

    fn duplicate(&self) -> Box<dyn ExecutionPlan> {
        if let Some(sets) = &self.parameter_sets {
            // All logical commands share one duplicated template.
            Box::new(BatchedUpdatePlan::bulk(
                self.children[0].duplicate(),
                sets.clone(),
            ))
        } else {
            Box::new(BatchedUpdatePlan::new(
                self.children.iter().map(|c| c.duplicate()).collect(),
            ))
        }
    }

    /// More than one distinct child forces atomicity across statements;
    /// a single child defers to its own requirement.
    fn requires_transaction(&self) -> bool {
        if self.children.len() > 1 {
            return true;
        }
        match self.children.first() {
            Some(child) => child.requires_transaction(),
            None => false,
        }
    }

    fn drain_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    fn final_buffer(&mut self) -> EngineResult<Poll<TupleBuffer>> {
        Err(internal_err!("batched update plan has no final buffer"))
    }
}
