//! Batch and buffer primitives backing result streams.
//!
//! This module provides the storage-facing surface of the execution core:
//!
//! - **Batch**: an immutable, row-numbered, contiguous slice of result
//!   rows, possibly carrying the stream-termination flag
//! - **TupleBuffer**: an append-only accumulation of batches, readable
//!   repeatedly (bufferable mode) or once (forward-only mode)
//! - **BufferManager**: reservation/release of execution memory and
//!   buffer creation, with centralized accounting
//!
//! The storage engine behind the manager (disk spill, paging) is outside
//! this crate; only the reservation and batch storage contract is
//! consumed here.

pub mod batch;
pub mod manager;
pub mod tuple_buffer;

pub use batch::Batch;
pub use manager::{BufferManager, MemoryBufferManager, ReservationId, DEFAULT_BATCH_SIZE};
pub use tuple_buffer::TupleBuffer;
