//! Driving query plans to completion.
//!
//! - **Driver**: owns one plan's whole execution, absorbing not-ready
//!   signals, enforcing time slices, deadlines, and cancellation, and
//!   accounting the run's memory budget.
//! - **Collector**: accumulates a producer's batches into a tuple
//!   buffer, resumably.
//! - **Cursor**: serves rows one at a time with lookahead, mark/reset
//!   replay, and optional prefetch.

pub mod collector;
pub mod cursor;
pub mod driver;

pub use collector::{BatchCollector, BatchObserver};
pub use cursor::BatchCursor;
pub use driver::{DriverConfig, DriverPoll, QueryDriver};
