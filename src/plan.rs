//! The plan contract: resumable units of query execution.
//!
//! A plan is driven through an explicit lifecycle
//! (`initialize → open → next_batch* → close`) and is cooperatively
//! re-entrant: instead of blocking a thread on a slow source it returns
//! [`Poll::NotReady`] and must be safe to re-invoke with no side effects.
//! "Not ready" is a control signal carried on a separate channel from
//! genuine failures, which travel as [`crate::error::EngineError`].

use crate::buffer::{Batch, BufferManager, TupleBuffer};
use crate::context::ProcessorContext;
use crate::datamgr::ProcessorDataManager;
use crate::error::{EngineResult, Warning};
use crate::internal_err;
use crate::types::ElementInfo;
use std::sync::Arc;

pub mod batched_update;
#[cfg(test)]
pub(crate) mod testing;

pub use batched_update::BatchedUpdatePlan;

/// Outcome of a cooperative operation: a result, or a request to retry
/// once the underlying resource has made progress.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll<T> {
    Ready(T),
    NotReady,
}

impl<T> Poll<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Poll::Ready(_))
    }

    /// Unwrap a ready value; panics on `NotReady`. Test convenience.
    pub fn expect_ready(self, msg: &str) -> T {
        match self {
            Poll::Ready(value) => value,
            Poll::NotReady => panic!("{}", msg),
        }
    }
}

/// Poll result for batch-producing operations.
pub type BatchPoll = Poll<Batch>;

/// A resumable unit of query execution.
///
/// Contract notes:
/// - `next_batch` never skips or re-emits rows; immediately re-invoking
///   after `NotReady` has no side effects beyond what the underlying
///   source has already done.
/// - A plan never swallows a child's `NotReady`; it re-signals it.
/// - `close` is idempotent and safe after a partial `open`.
/// - `duplicate` produces a fresh template and is only valid while the
///   plan is not between `open` and `close`.
pub trait ExecutionPlan: Send {
    /// Bind the plan to one concrete execution. Stores references only;
    /// no I/O side effects.
    fn initialize(
        &mut self,
        context: ProcessorContext,
        data_manager: Arc<dyn ProcessorDataManager>,
        buffer_manager: Arc<dyn BufferManager>,
    ) -> EngineResult<()>;

    /// One-time setup; may itself depend on sub-requests and signal
    /// `NotReady` rather than block.
    fn open(&mut self) -> EngineResult<Poll<()>>;

    /// Produce the next batch, or signal `NotReady`.
    fn next_batch(&mut self) -> EngineResult<BatchPoll>;

    /// Release per-execution resources. Never fails on repeated calls.
    fn close(&mut self) -> EngineResult<()>;

    /// Return a previously used plan to its pre-open state for the same
    /// execution context, clearing accumulated warnings.
    fn reset(&mut self) -> EngineResult<()>;

    /// Static description of the result schema; available before `open`.
    fn output_elements(&self) -> &[ElementInfo];

    /// Instantiate a fresh template of this plan.
    fn duplicate(&self) -> Box<dyn ExecutionPlan>;

    /// Whether this plan must run inside a transaction.
    fn requires_transaction(&self) -> bool {
        false
    }

    /// Drain accumulated non-fatal warnings.
    fn drain_warnings(&mut self) -> Vec<Warning> {
        Vec::new()
    }

    /// Whether the plan can expose its complete materialized result as a
    /// buffer directly, skipping per-batch pull.
    fn has_final_buffer(&self) -> bool {
        false
    }

    /// The complete materialized result, for plans reporting
    /// `has_final_buffer`.
    fn final_buffer(&mut self) -> EngineResult<Poll<TupleBuffer>> {
        Err(internal_err!("plan does not expose a final buffer"))
    }
}

/// Anything that can be polled for successive batches. Implemented by
/// every plan; the collector and cursor are written against this seam so
/// they also accept raw sources.
pub trait BatchProducer: Send {
    fn poll_batch(&mut self) -> EngineResult<BatchPoll>;
}

impl<P: ExecutionPlan + ?Sized> BatchProducer for P {
    fn poll_batch(&mut self) -> EngineResult<BatchPoll> {
        self.next_batch()
    }
}
