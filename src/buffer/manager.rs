//! Buffer manager: execution memory reservations and buffer creation.

use crate::buffer::tuple_buffer::{StorageAccounting, TupleBuffer};
use crate::error::EngineResult;
use crate::processing_err;
use crate::types::{schema_row_size, ElementInfo};
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Handle for a memory reservation taken from the manager's budget.
pub type ReservationId = u64;

/// Rows per working batch; sizes the per-execution reservation hint.
pub const DEFAULT_BATCH_SIZE: u64 = 256;

/// Reservation, release, and buffer-creation contract consumed by the
/// driver and cursor. Storage internals (spill, paging) stay behind this
/// trait.
pub trait BufferManager: Send + Sync {
    /// Reserve execution memory. Fails with a processing error when the
    /// budget is exhausted.
    fn reserve(&self, bytes: u64) -> EngineResult<ReservationId>;

    /// Release a reservation. Releasing an unknown or already-released id
    /// is a logged no-op.
    fn release(&self, reservation: ReservationId);

    /// Per-execution budget hint for a plan with the given output schema.
    fn schema_size(&self, schema: &[ElementInfo]) -> u64;

    /// Create a buffer whose retained rows count against this manager's
    /// budget.
    fn create_buffer(&self, schema: Vec<ElementInfo>, forward_only: bool) -> TupleBuffer;
}

/// In-memory buffer manager with a fixed total budget.
#[derive(Clone)]
pub struct MemoryBufferManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    total_budget: u64,
    /// Bytes held by outstanding reservations.
    reserved: AtomicU64,
    /// Bytes retained by live buffers.
    buffer_bytes: AtomicU64,
    reservations: DashMap<ReservationId, u64>,
    next_id: AtomicU64,
}

impl MemoryBufferManager {
    pub fn new(total_budget: u64) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                total_budget,
                reserved: AtomicU64::new(0),
                buffer_bytes: AtomicU64::new(0),
                reservations: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Bytes currently committed (reservations plus live buffer content).
    pub fn used_bytes(&self) -> u64 {
        self.inner.reserved.load(Ordering::SeqCst) + self.inner.buffer_bytes.load(Ordering::SeqCst)
    }
}

impl BufferManager for MemoryBufferManager {
    fn reserve(&self, bytes: u64) -> EngineResult<ReservationId> {
        let prior = self.inner.reserved.fetch_add(bytes, Ordering::SeqCst);
        let buffered = self.inner.buffer_bytes.load(Ordering::SeqCst);
        if prior + bytes + buffered > self.inner.total_budget {
            self.inner.reserved.fetch_sub(bytes, Ordering::SeqCst);
            warn!(
                "buffer memory exhausted: requested {} bytes, {} of {} in use",
                bytes,
                prior + buffered,
                self.inner.total_budget
            );
            return Err(processing_err!(
                "not enough buffer memory: requested {} bytes",
                bytes
            ));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.reservations.insert(id, bytes);
        debug!("reserved {} bytes as reservation {}", bytes, id);
        Ok(id)
    }

    fn release(&self, reservation: ReservationId) {
        match self.inner.reservations.remove(&reservation) {
            Some((_, bytes)) => {
                self.inner.reserved.fetch_sub(bytes, Ordering::SeqCst);
                debug!("released reservation {} ({} bytes)", reservation, bytes);
            }
            None => {
                debug!("reservation {} already released", reservation);
            }
        }
    }

    fn schema_size(&self, schema: &[ElementInfo]) -> u64 {
        schema_row_size(schema) * DEFAULT_BATCH_SIZE
    }

    fn create_buffer(&self, schema: Vec<ElementInfo>, forward_only: bool) -> TupleBuffer {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        TupleBuffer::new(
            id,
            schema,
            forward_only,
            Some(self.inner.clone() as Arc<dyn StorageAccounting>),
        )
    }
}

impl StorageAccounting for ManagerInner {
    fn add(&self, bytes: u64) {
        self.buffer_bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn sub(&self, bytes: u64) {
        self.buffer_bytes.fetch_sub(bytes, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, Value};

    #[test]
    fn test_reserve_and_release() -> EngineResult<()> {
        let manager = MemoryBufferManager::new(1000);
        let id = manager.reserve(400)?;
        assert_eq!(manager.used_bytes(), 400);

        manager.release(id);
        assert_eq!(manager.used_bytes(), 0);
        Ok(())
    }

    #[test]
    fn test_budget_exhaustion_is_processing_error() -> EngineResult<()> {
        let manager = MemoryBufferManager::new(500);
        let _held = manager.reserve(400)?;

        let err = manager.reserve(200).unwrap_err();
        assert!(err.is_processing());
        // The failed attempt must not leak into the accounting.
        assert_eq!(manager.used_bytes(), 400);
        Ok(())
    }

    #[test]
    fn test_double_release_is_noop() -> EngineResult<()> {
        let manager = MemoryBufferManager::new(1000);
        let id = manager.reserve(300)?;
        manager.release(id);
        manager.release(id);
        assert_eq!(manager.used_bytes(), 0);
        Ok(())
    }

    #[test]
    fn test_buffer_content_counts_against_budget() -> EngineResult<()> {
        let manager = MemoryBufferManager::new(10_000);
        let schema = vec![ElementInfo::new("id", DataType::Integer)];
        let buffer = manager.create_buffer(schema, false);

        buffer.append_rows(vec![vec![Value::Integer(1)], vec![Value::Integer(2)]])?;
        assert!(manager.used_bytes() > 0);

        buffer.remove();
        assert_eq!(manager.used_bytes(), 0);
        Ok(())
    }

    #[test]
    fn test_schema_size_scales_with_width() {
        let manager = MemoryBufferManager::new(1000);
        let narrow = vec![ElementInfo::new("id", DataType::Integer)];
        let wide = vec![
            ElementInfo::new("id", DataType::Integer),
            ElementInfo::new("name", DataType::Varchar),
        ];
        assert!(manager.schema_size(&wide) > manager.schema_size(&narrow));
    }
}
