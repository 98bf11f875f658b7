//! The execution driver: time-slicing, retry, cancellation, reservation.
//!
//! A driver turns one plan into a sequence of batches for an external
//! caller while enforcing the request's budgets. It owns the plan's
//! execution memory reservation, which is released exactly once: either
//! when the stream terminates, on the first genuine failure, or when the
//! driver is explicitly closed.

use crate::buffer::{Batch, BufferManager, ReservationId, TupleBuffer};
use crate::context::{CancelHandle, ProcessorContext};
use crate::datamgr::ProcessorDataManager;
use crate::error::{EngineError, EngineResult, Warning};
use crate::plan::{ExecutionPlan, Poll};
use crate::process::collector::BatchCollector;
use crate::{internal_err, processing_err};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// Tuning for the driver's cooperative retry loop.
///
/// Polling trades latency for CPU, so both knobs are part of the public
/// configuration surface rather than hidden constants.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Sleep between retries when a source is not ready and the context
    /// permits in-place waiting.
    pub poll_interval: Duration,
    /// Upper bound on consecutive not-ready retries within one call;
    /// `None` leaves the retry loop bounded only by the time budgets.
    pub max_polls: Option<u64>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            max_polls: None,
        }
    }
}

/// Outcome of one driver invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverPoll {
    /// The next batch of the stream.
    Batch(Batch),
    /// No progress possible yet; the caller retries later. Only returned
    /// when the context forbids in-place waiting.
    NotReady,
    /// The fairness budget for this scheduling turn ran out before a
    /// batch was produced. A scheduling signal, never a failure.
    TimeSliceExpired,
}

enum RetryDecision {
    /// Retry the plan now, on this thread.
    Retry,
    /// Hand the not-ready signal to the caller.
    Propagate,
    /// The time slice ran out; yield the worker without failing.
    YieldSlice,
}

/// Drives a plan to completion under the request's budgets.
pub struct QueryDriver {
    plan: Box<dyn ExecutionPlan>,
    context: ProcessorContext,
    data_manager: Arc<dyn ProcessorDataManager>,
    buffer_manager: Arc<dyn BufferManager>,
    config: DriverConfig,
    reservation: Option<ReservationId>,
    collector: Option<BatchCollector>,
    initialized: bool,
    opened: bool,
    closed: bool,
    /// Terminal batch delivered or processing explicitly closed.
    finished: bool,
}

impl QueryDriver {
    pub fn new(
        plan: Box<dyn ExecutionPlan>,
        context: ProcessorContext,
        data_manager: Arc<dyn ProcessorDataManager>,
        buffer_manager: Arc<dyn BufferManager>,
    ) -> Self {
        Self::with_config(plan, context, data_manager, buffer_manager, DriverConfig::default())
    }

    pub fn with_config(
        plan: Box<dyn ExecutionPlan>,
        context: ProcessorContext,
        data_manager: Arc<dyn ProcessorDataManager>,
        buffer_manager: Arc<dyn BufferManager>,
        config: DriverConfig,
    ) -> Self {
        Self {
            plan,
            context,
            data_manager,
            buffer_manager,
            config,
            reservation: None,
            collector: None,
            initialized: false,
            opened: false,
            closed: false,
            finished: false,
        }
    }

    pub fn context(&self) -> &ProcessorContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ProcessorContext {
        &mut self.context
    }

    /// Handle for canceling this execution from another logical caller.
    /// Observed at the top of the next loop iteration, never mid-batch.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.context.cancel_handle()
    }

    pub fn request_canceled(&self) {
        self.context.request_cancel();
    }

    pub fn drain_warnings(&mut self) -> Vec<Warning> {
        self.plan.drain_warnings()
    }

    /// Pull the next batch, absorbing not-ready signals per the context's
    /// blocking policy and enforcing the time budgets.
    pub fn next_batch(&mut self) -> EngineResult<DriverPoll> {
        match self.next_batch_inner() {
            Ok(poll) => Ok(poll),
            Err(err) => {
                self.teardown();
                Err(err)
            }
        }
    }

    fn next_batch_inner(&mut self) -> EngineResult<DriverPoll> {
        if self.finished {
            return Err(internal_err!("result stream already terminated"));
        }
        let mut polls: u64 = 0;
        loop {
            self.check_budgets()?;
            let poll = match self.ensure_open()? {
                Poll::NotReady => Poll::NotReady,
                Poll::Ready(()) => self.plan.next_batch()?,
            };
            match poll {
                Poll::Ready(batch) => {
                    if batch.is_terminal() {
                        debug!(
                            "request {}: stream terminated at row {}",
                            self.context.request_id(),
                            batch.end_row()
                        );
                        self.teardown();
                    }
                    return Ok(DriverPoll::Batch(batch));
                }
                Poll::NotReady => match self.absorb_not_ready(&mut polls)? {
                    RetryDecision::Retry => continue,
                    RetryDecision::Propagate => return Ok(DriverPoll::NotReady),
                    RetryDecision::YieldSlice => return Ok(DriverPoll::TimeSliceExpired),
                },
            }
        }
    }

    /// The complete materialized result as a buffer, skipping per-batch
    /// pull. Plans without a final buffer are collected internally under
    /// the same retry/timeout/cancellation discipline.
    pub fn final_buffer(&mut self) -> EngineResult<Poll<TupleBuffer>> {
        match self.final_buffer_inner() {
            Ok(poll) => Ok(poll),
            Err(err) => {
                self.teardown();
                Err(err)
            }
        }
    }

    fn final_buffer_inner(&mut self) -> EngineResult<Poll<TupleBuffer>> {
        if self.finished {
            return Err(internal_err!("result stream already terminated"));
        }
        let mut polls: u64 = 0;
        loop {
            self.check_budgets()?;
            if let Poll::NotReady = self.ensure_open()? {
                match self.absorb_not_ready(&mut polls)? {
                    RetryDecision::Retry => continue,
                    // The buffer surface has no slice-expiry outcome;
                    // yielding looks like not-ready to this caller.
                    RetryDecision::Propagate | RetryDecision::YieldSlice => {
                        return Ok(Poll::NotReady)
                    }
                }
            }
            let poll = if self.plan.has_final_buffer() {
                self.plan.final_buffer()?
            } else {
                if self.collector.is_none() {
                    let buffer = self
                        .buffer_manager
                        .create_buffer(self.plan.output_elements().to_vec(), false);
                    self.collector = Some(BatchCollector::new(buffer));
                }
                let collector = self.collector.as_mut().expect("collector just created");
                collector.collect(self.plan.as_mut())?
            };
            match poll {
                Poll::Ready(buffer) => {
                    self.teardown();
                    return Ok(Poll::Ready(buffer));
                }
                Poll::NotReady => match self.absorb_not_ready(&mut polls)? {
                    RetryDecision::Retry => continue,
                    RetryDecision::Propagate | RetryDecision::YieldSlice => {
                        return Ok(Poll::NotReady)
                    }
                },
            }
        }
    }

    /// Release the reservation and close the plan. Idempotent; safe to
    /// call whether or not the stream completed.
    pub fn close_processing(&mut self) {
        self.teardown();
        self.finished = true;
    }

    fn check_budgets(&mut self) -> EngineResult<()> {
        if self.context.is_canceled() {
            debug!("request {}: canceled", self.context.request_id());
            return Err(EngineError::Canceled {
                request_id: self.context.request_id(),
            });
        }
        if self.context.deadline_exceeded() {
            debug!("request {}: deadline exceeded", self.context.request_id());
            return Err(EngineError::TimedOut {
                request_id: self.context.request_id(),
            });
        }
        Ok(())
    }

    /// Decide what to do with a not-ready signal from the plan.
    fn absorb_not_ready(&mut self, polls: &mut u64) -> EngineResult<RetryDecision> {
        if !self.context.is_non_blocking() {
            return Ok(RetryDecision::Propagate);
        }
        *polls += 1;
        if let Some(max) = self.config.max_polls {
            if *polls >= max {
                return Err(processing_err!("source not ready after {} polls", *polls));
            }
        }
        if self.context.time_slice_expired() {
            // Yield the worker; the scheduler resumes this driver later.
            return Ok(RetryDecision::YieldSlice);
        }
        std::thread::sleep(self.config.poll_interval);
        Ok(RetryDecision::Retry)
    }

    fn ensure_open(&mut self) -> EngineResult<Poll<()>> {
        if !self.initialized {
            let hint = self.buffer_manager.schema_size(self.plan.output_elements());
            let reservation = self.buffer_manager.reserve(hint)?;
            debug!(
                "request {}: reserved {} bytes for execution",
                self.context.request_id(),
                hint
            );
            self.reservation = Some(reservation);
            self.plan.initialize(
                self.context.clone(),
                self.data_manager.clone(),
                self.buffer_manager.clone(),
            )?;
            self.initialized = true;
        }
        if !self.opened {
            match self.plan.open()? {
                Poll::Ready(()) => self.opened = true,
                Poll::NotReady => return Ok(Poll::NotReady),
            }
        }
        Ok(Poll::Ready(()))
    }

    fn teardown(&mut self) {
        if let Some(reservation) = self.reservation.take() {
            self.buffer_manager.release(reservation);
        }
        if !self.closed {
            self.closed = true;
            self.finished = true;
            if let Err(err) = self.plan.close() {
                warn!(
                    "request {}: error closing plan: {}",
                    self.context.request_id(),
                    err
                );
            }
        }
    }
}
