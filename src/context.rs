//! Per-execution context: time budgets, cancellation, variable bindings.
//!
//! Everything a plan needs about the surrounding request is passed
//! explicitly through `ProcessorContext`; there is no ambient or
//! thread-local request state. Clones of a context share the cancellation
//! flag and the variable scope, so a binding set through one clone is
//! visible through all of them.

use crate::types::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Nested variable-binding scope.
///
/// Used to pass per-iteration parameter values into cloned child plans;
/// lookups search from the innermost scope outward.
#[derive(Clone)]
pub struct VariableContext {
    inner: Arc<Mutex<Vec<HashMap<String, Value>>>>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(vec![HashMap::new()])),
        }
    }

    pub fn push_scope(&self) {
        self.inner.lock().push(HashMap::new());
    }

    pub fn pop_scope(&self) {
        let mut scopes = self.inner.lock();
        if scopes.len() > 1 {
            scopes.pop();
        }
    }

    /// Bind a variable in the innermost scope.
    pub fn set(&self, name: impl Into<String>, value: Value) {
        let mut scopes = self.inner.lock();
        scopes
            .last_mut()
            .expect("variable context always has a root scope")
            .insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let scopes = self.inner.lock();
        scopes.iter().rev().find_map(|s| s.get(name).cloned())
    }

    /// Remove every binding from the innermost scope.
    pub fn clear_local(&self) {
        let mut scopes = self.inner.lock();
        scopes
            .last_mut()
            .expect("variable context always has a root scope")
            .clear();
    }
}

impl Default for VariableContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for canceling a running request from another logical caller.
#[derive(Clone)]
pub struct CancelHandle {
    canceled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

/// Execution context for one logical request.
#[derive(Clone)]
pub struct ProcessorContext {
    request_id: u64,
    time_slice_end: Option<Instant>,
    deadline: Option<Instant>,
    canceled: Arc<AtomicBool>,
    non_blocking: bool,
    variables: VariableContext,
}

impl ProcessorContext {
    pub fn new(request_id: u64) -> Self {
        Self {
            request_id,
            time_slice_end: None,
            deadline: None,
            canceled: Arc::new(AtomicBool::new(false)),
            non_blocking: false,
            variables: VariableContext::new(),
        }
    }

    /// Allow the driver to sleep-and-retry in place instead of
    /// propagating not-ready signals to the caller.
    pub fn with_non_blocking(mut self, non_blocking: bool) -> Self {
        self.non_blocking = non_blocking;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn is_non_blocking(&self) -> bool {
        self.non_blocking
    }

    pub fn variables(&self) -> &VariableContext {
        &self.variables
    }

    /// Set the fairness budget for the current scheduling turn.
    pub fn set_time_slice_end(&mut self, end: Option<Instant>) {
        self.time_slice_end = end;
    }

    pub fn time_slice_expired(&self) -> bool {
        matches!(self.time_slice_end, Some(end) if Instant::now() >= end)
    }

    pub fn deadline_exceeded(&self) -> bool {
        matches!(self.deadline, Some(end) if Instant::now() >= end)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn request_cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            canceled: self.canceled.clone(),
        }
    }
}
