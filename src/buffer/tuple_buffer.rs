//! Append-only tuple buffers backing result streams.

use crate::buffer::batch::Batch;
use crate::error::EngineResult;
use crate::internal_err;
use crate::types::{row_size, ElementInfo, Value};
use parking_lot::Mutex;
use std::sync::Arc;

/// Memory accounting hook implemented by the owning buffer manager.
pub(crate) trait StorageAccounting: Send + Sync {
    fn add(&self, bytes: u64);
    fn sub(&self, bytes: u64);
}

/// An append-only, growable, 1-indexed accumulation of result rows.
///
/// A buffer is either *bufferable* (full replay from row 1 onward) or
/// *forward-only* (batches are discarded once read past). Clones share
/// the same underlying storage; exactly one logical owner calls
/// [`TupleBuffer::remove`].
#[derive(Clone)]
pub struct TupleBuffer {
    inner: Arc<TupleBufferInner>,
}

struct TupleBufferInner {
    id: u64,
    schema: Vec<ElementInfo>,
    forward_only: bool,
    accounting: Option<Arc<dyn StorageAccounting>>,
    state: Mutex<BufferState>,
}

#[derive(Default)]
struct BufferState {
    batches: Vec<Batch>,
    /// Rows visibly appended over the buffer's lifetime.
    row_count: u64,
    /// Rows currently retained in storage.
    managed_rows: u64,
    /// Bytes currently retained, mirrored into the accounting hook.
    retained_bytes: u64,
    closed: bool,
    removed: bool,
}

impl TupleBuffer {
    pub(crate) fn new(
        id: u64,
        schema: Vec<ElementInfo>,
        forward_only: bool,
        accounting: Option<Arc<dyn StorageAccounting>>,
    ) -> Self {
        Self {
            inner: Arc::new(TupleBufferInner {
                id,
                schema,
                forward_only,
                accounting,
                state: Mutex::new(BufferState::default()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn schema(&self) -> &[ElementInfo] {
        &self.inner.schema
    }

    pub fn is_forward_only(&self) -> bool {
        self.inner.forward_only
    }

    pub fn row_count(&self) -> u64 {
        self.inner.state.lock().row_count
    }

    pub fn managed_row_count(&self) -> u64 {
        self.inner.state.lock().managed_rows
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Append the rows of a batch.
    ///
    /// The batch must continue the buffer's row numbering exactly; gaps
    /// and overlaps indicate a defect in the producer.
    pub fn append(&self, batch: &Batch) -> EngineResult<()> {
        let mut state = self.inner.state.lock();
        state.check_usable(self.inner.id)?;
        if state.closed {
            return Err(internal_err!(
                "cannot append to closed buffer {}",
                self.inner.id
            ));
        }
        if batch.begin_row() != state.row_count + 1 {
            return Err(internal_err!(
                "batch begins at row {} but buffer {} holds {} rows",
                batch.begin_row(),
                self.inner.id,
                state.row_count
            ));
        }
        if batch.row_count() == 0 {
            return Ok(());
        }
        let bytes: u64 = batch.rows().iter().map(|r| row_size(r)).sum();
        state.batches.push(Batch::new(
            batch.begin_row(),
            batch.rows().to_vec(),
        ));
        state.row_count += batch.row_count() as u64;
        state.managed_rows += batch.row_count() as u64;
        state.retained_bytes += bytes;
        if let Some(acct) = &self.inner.accounting {
            acct.add(bytes);
        }
        Ok(())
    }

    /// Append loose rows, numbering them after the current contents.
    pub fn append_rows(&self, rows: Vec<Vec<Value>>) -> EngineResult<()> {
        let begin = self.row_count() + 1;
        self.append(&Batch::new(begin, rows))
    }

    /// Get the stored batch covering the given row.
    ///
    /// In forward-only mode this also discards every batch that ends
    /// before the requested row; re-reading discarded rows is an error.
    pub fn get_batch(&self, row: u64) -> EngineResult<Batch> {
        let mut state = self.inner.state.lock();
        state.check_usable(self.inner.id)?;
        if row == 0 || row > state.row_count {
            return Err(internal_err!(
                "row {} not in buffer {} (rows 1..={})",
                row,
                self.inner.id,
                state.row_count
            ));
        }
        if self.inner.forward_only {
            // Drop batches the reader has moved past.
            let mut freed_rows = 0u64;
            let mut freed_bytes = 0u64;
            state.batches.retain(|b| {
                if b.end_row() < row {
                    freed_rows += b.row_count() as u64;
                    freed_bytes += b.rows().iter().map(|r| row_size(r)).sum::<u64>();
                    false
                } else {
                    true
                }
            });
            state.managed_rows -= freed_rows;
            state.retained_bytes -= freed_bytes;
            if freed_bytes > 0 {
                if let Some(acct) = &self.inner.accounting {
                    acct.sub(freed_bytes);
                }
            }
        }
        state
            .batches
            .iter()
            .find(|b| b.contains_row(row))
            .cloned()
            .ok_or_else(|| {
                internal_err!(
                    "row {} already discarded from forward-only buffer {}",
                    row,
                    self.inner.id
                )
            })
    }

    /// Seal the buffer; no further rows may be appended.
    pub fn close(&self) {
        self.inner.state.lock().closed = true;
    }

    /// Release storage back to the manager. The buffer is unusable
    /// afterwards; repeated calls are no-ops.
    pub fn remove(&self) {
        let mut state = self.inner.state.lock();
        if state.removed {
            return;
        }
        state.removed = true;
        state.batches.clear();
        state.managed_rows = 0;
        let bytes = std::mem::take(&mut state.retained_bytes);
        if bytes > 0 {
            if let Some(acct) = &self.inner.accounting {
                acct.sub(bytes);
            }
        }
    }
}

impl BufferState {
    fn check_usable(&self, id: u64) -> EngineResult<()> {
        if self.removed {
            return Err(internal_err!("buffer {} already removed", id));
        }
        Ok(())
    }
}
