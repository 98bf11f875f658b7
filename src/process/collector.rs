//! Spooling a batch producer into a tuple buffer.

use crate::buffer::{Batch, TupleBuffer};
use crate::error::EngineResult;
use crate::plan::{BatchProducer, Poll};

/// Callback invoked for each collected batch before it is appended.
///
/// Returning `false` vetoes the append while still letting the observer
/// act on the rows, so a caller can mirror rows to a side channel (for
/// example streaming them to a client) independently of caching them.
pub trait BatchObserver: Send {
    fn batch(&mut self, batch: &Batch) -> EngineResult<bool>;
}

impl<F> BatchObserver for F
where
    F: FnMut(&Batch) -> EngineResult<bool> + Send,
{
    fn batch(&mut self, batch: &Batch) -> EngineResult<bool> {
        self(batch)
    }
}

/// Exhausts a producer into a buffer.
///
/// The collector never retries a `NotReady` itself; it propagates the
/// signal and expects to be re-driven, resuming where it left off.
pub struct BatchCollector {
    buffer: TupleBuffer,
    observer: Option<Box<dyn BatchObserver>>,
    done: bool,
}

impl BatchCollector {
    pub fn new(buffer: TupleBuffer) -> Self {
        Self {
            buffer,
            observer: None,
            done: false,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn BatchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Rows spooled so far, readable mid-collection.
    pub fn row_count(&self) -> u64 {
        self.buffer.row_count()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Drive the producer until its terminal batch has been spooled.
    ///
    /// Empty non-terminal batches are neither observed nor appended. The
    /// buffer is closed exactly when the terminal batch is observed.
    pub fn collect<P: BatchProducer + ?Sized>(
        &mut self,
        producer: &mut P,
    ) -> EngineResult<Poll<TupleBuffer>> {
        if self.done {
            return Ok(Poll::Ready(self.buffer.clone()));
        }
        loop {
            match producer.poll_batch()? {
                Poll::NotReady => return Ok(Poll::NotReady),
                Poll::Ready(batch) => {
                    let terminal = batch.is_terminal();
                    if batch.row_count() > 0 || terminal {
                        let keep = match &mut self.observer {
                            Some(observer) => observer.batch(&batch)?,
                            None => true,
                        };
                        if keep && batch.row_count() > 0 {
                            // Vetoed batches leave a gap in the stream's
                            // numbering, so rows are renumbered onto the
                            // buffer's own contiguous space.
                            self.buffer.append_rows(batch.rows().to_vec())?;
                        }
                    }
                    if terminal {
                        self.buffer.close();
                        self.done = true;
                        return Ok(Poll::Ready(self.buffer.clone()));
                    }
                }
            }
        }
    }
}
