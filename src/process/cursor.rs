//! Pull cursor over a batch producer, with lookahead and replay.
//!
//! The cursor serves rows one at a time out of the most recently fetched
//! batch. With a buffer attached it can replay: either every pulled batch
//! is persisted (`save_on_mark = false`), or persistence is deferred
//! until the consumer first calls [`BatchCursor::mark`], so the cost of
//! buffering is only paid when a rewind is actually needed.

use crate::buffer::{Batch, TupleBuffer};
use crate::error::EngineResult;
use crate::internal_err;
use crate::plan::{BatchProducer, Poll};
use crate::types::Value;

pub struct BatchCursor {
    producer: Box<dyn BatchProducer>,
    buffer: Option<TupleBuffer>,
    save_on_mark: bool,
    /// Whether pulled rows are currently persisted to the buffer.
    saving: bool,
    /// Stream row corresponding to buffer row 1, minus one. Buffer row
    /// `b` holds stream row `b + buffer_base`.
    buffer_base: u64,
    mark_row: u64,
    /// Next row (1-indexed, stream numbering) to serve.
    current_row: u64,
    current_batch: Option<Batch>,
    /// Final row of the stream, known once the terminal batch is seen.
    last_row: Option<u64>,
}

impl BatchCursor {
    pub fn new(producer: Box<dyn BatchProducer>) -> Self {
        Self {
            producer,
            buffer: None,
            save_on_mark: false,
            saving: false,
            buffer_base: 0,
            mark_row: 1,
            current_row: 1,
            current_batch: None,
            last_row: None,
        }
    }

    /// Attach a buffer for replay.
    ///
    /// With `save_on_mark = false` every batch pulled from here on is
    /// also appended to the buffer. With `true`, nothing is persisted
    /// until `mark()` is first called.
    pub fn attach_buffer(&mut self, buffer: TupleBuffer, save_on_mark: bool) -> EngineResult<()> {
        self.buffer = Some(buffer);
        self.save_on_mark = save_on_mark;
        self.saving = false;
        if !save_on_mark {
            self.enable_saving();
            self.capture_from_cache()?;
        }
        Ok(())
    }

    pub fn current_row(&self) -> u64 {
        self.current_row
    }

    /// Serve the next row, or `Ready(None)` at end-of-stream.
    pub fn next_row(&mut self) -> EngineResult<Poll<Option<Vec<Value>>>> {
        match self.ensure_batch()? {
            Poll::NotReady => Ok(Poll::NotReady),
            Poll::Ready(false) => Ok(Poll::Ready(None)),
            Poll::Ready(true) => {
                let batch = self
                    .current_batch
                    .as_ref()
                    .expect("ensure_batch positioned a batch");
                let row = batch.row(self.current_row).to_vec();
                self.current_row += 1;
                Ok(Poll::Ready(Some(row)))
            }
        }
    }

    /// Lookahead: whether another row exists at the current position.
    pub fn has_next(&mut self) -> EngineResult<Poll<bool>> {
        self.ensure_batch()
    }

    /// Establish the replay point at the current row.
    ///
    /// Under save-on-mark the first mark enables persistence,
    /// retroactively capturing the current row (and the rest of the
    /// cached batch) before future rows are captured prospectively.
    /// Rows already saved are never discarded by a later mark: the
    /// producer cannot re-emit them, so they keep serving replays from
    /// the buffer.
    pub fn mark(&mut self) -> EngineResult<()> {
        if self.buffer.is_some() && self.save_on_mark {
            self.enable_saving();
            self.capture_from_cache()?;
        }
        self.mark_row = self.current_row;
        Ok(())
    }

    /// Rewind to the last mark.
    pub fn reset(&mut self) -> EngineResult<()> {
        self.set_position(self.mark_row)
    }

    /// Move the read position.
    ///
    /// Forward positioning always succeeds (intervening rows are pulled
    /// and discarded on demand). Backward positioning needs the target to
    /// be inside the cached batch or covered by the attached buffer.
    pub fn set_position(&mut self, row: u64) -> EngineResult<()> {
        if row == 0 {
            return Err(internal_err!("rows are 1-indexed"));
        }
        if row >= self.current_row {
            self.current_row = row;
            return Ok(());
        }
        if let Some(batch) = &self.current_batch {
            if batch.contains_row(row) {
                self.current_row = row;
                return Ok(());
            }
        }
        if let Some(buffer) = &self.buffer {
            let covered = self.buffer_base + buffer.row_count();
            if row > self.buffer_base && row <= covered {
                self.current_row = row;
                self.current_batch = None;
                return Ok(());
            }
        }
        Err(internal_err!(
            "cannot position back to row {}: not buffered",
            row
        ))
    }

    /// Opportunistically start persisting pulled rows without forcing a
    /// mark.
    pub fn ensure_save(&mut self) -> EngineResult<()> {
        if self.buffer.is_none() || self.saving {
            return Ok(());
        }
        self.enable_saving();
        self.capture_from_cache()
    }

    /// Turn on persistence. The stream-to-buffer offset is fixed the
    /// first time rows are saved; resuming later keeps the established
    /// mapping so stored rows stay addressable.
    fn enable_saving(&mut self) {
        if self.saving {
            return;
        }
        if let Some(buffer) = &self.buffer {
            if buffer.row_count() == 0 {
                self.buffer_base = self.current_row - 1;
            }
            self.saving = true;
        }
    }

    /// Stop persisting pulled rows. Also drops the cached batch once its
    /// rows are durably buffered, so the memory can be reused.
    pub fn disable_save(&mut self) {
        self.saving = false;
        if let (Some(batch), Some(buffer)) = (&self.current_batch, &self.buffer) {
            let covered = self.buffer_base + buffer.row_count();
            if batch.end_row() <= covered {
                self.current_batch = None;
            }
        }
    }

    /// Prefetch into the attached buffer until it manages at least
    /// `target_rows` rows, without advancing the read position. A strict
    /// no-op once the stream is known to have terminated.
    pub fn read_ahead(&mut self, target_rows: u64) -> EngineResult<Poll<()>> {
        let buffer = match self.buffer.clone() {
            Some(buffer) => buffer,
            None => return Err(internal_err!("read ahead requires an attached buffer")),
        };
        if self.last_row.is_some() {
            return Ok(Poll::Ready(()));
        }
        self.ensure_save()?;
        while buffer.managed_row_count() < target_rows && self.last_row.is_none() {
            match self.pull()? {
                Poll::NotReady => return Ok(Poll::NotReady),
                Poll::Ready(()) => {}
            }
        }
        Ok(Poll::Ready(()))
    }

    /// Position `current_batch` over `current_row`, from the cache, the
    /// buffer, or a fresh pull. `Ready(false)` means end-of-stream.
    fn ensure_batch(&mut self) -> EngineResult<Poll<bool>> {
        loop {
            if let Some(batch) = &self.current_batch {
                if batch.contains_row(self.current_row) {
                    return Ok(Poll::Ready(true));
                }
            }
            if let Some(last) = self.last_row {
                if self.current_row > last {
                    return Ok(Poll::Ready(false));
                }
            }
            if let Some(buffer) = self.buffer.clone() {
                let covered = self.buffer_base + buffer.row_count();
                if self.current_row > self.buffer_base && self.current_row <= covered {
                    let stored = buffer.get_batch(self.current_row - self.buffer_base)?;
                    // Stored batches are numbered in buffer space.
                    let rebased =
                        Batch::new(stored.begin_row() + self.buffer_base, stored.rows().to_vec());
                    self.current_batch = Some(rebased);
                    continue;
                }
            }
            if self.last_row.is_some() {
                // The terminal batch was seen but the requested row was
                // neither cached nor saved.
                return Err(internal_err!(
                    "row {} is no longer available",
                    self.current_row
                ));
            }
            match self.pull()? {
                Poll::NotReady => return Ok(Poll::NotReady),
                Poll::Ready(()) => {}
            }
        }
    }

    /// Pull the next batch from the producer into the cache, persisting
    /// it when saving is active.
    fn pull(&mut self) -> EngineResult<Poll<()>> {
        match self.producer.poll_batch()? {
            Poll::NotReady => Ok(Poll::NotReady),
            Poll::Ready(batch) => {
                if batch.is_terminal() {
                    self.last_row = Some(batch.end_row());
                }
                self.current_batch = Some(batch);
                self.capture_from_cache()?;
                Ok(Poll::Ready(()))
            }
        }
    }

    /// Append the cached batch's not-yet-persisted rows to the buffer.
    fn capture_from_cache(&mut self) -> EngineResult<()> {
        if !self.saving {
            return Ok(());
        }
        let buffer = match self.buffer.clone() {
            Some(buffer) => buffer,
            None => return Ok(()),
        };
        let batch = match &self.current_batch {
            Some(batch) => batch,
            None => return Ok(()),
        };
        let covered = self.buffer_base + buffer.row_count();
        if batch.end_row() <= covered {
            return Ok(());
        }
        let from = covered + 1;
        if batch.begin_row() > from {
            return Err(internal_err!(
                "gap in saved rows: buffer covers through row {}, batch begins at {}",
                covered,
                batch.begin_row()
            ));
        }
        let rows: Vec<Vec<Value>> = (from..=batch.end_row())
            .map(|r| batch.row(r).to_vec())
            .collect();
        buffer.append_rows(rows)
    }
}
