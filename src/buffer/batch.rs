//! Batch: a contiguous, row-numbered slice of a result stream.

use crate::types::Value;

/// An immutable, 1-indexed, contiguous slice of result rows.
///
/// Successive batches from the same stream cover gap-free, strictly
/// increasing row ranges starting at row 1. A stream produces at most one
/// batch with the terminal flag set, and that batch is the last one ever
/// returned; a terminal batch may carry zero rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    begin_row: u64,
    rows: Vec<Vec<Value>>,
    terminal: bool,
}

impl Batch {
    pub fn new(begin_row: u64, rows: Vec<Vec<Value>>) -> Self {
        assert!(begin_row >= 1, "rows are 1-indexed");
        Self {
            begin_row,
            rows,
            terminal: false,
        }
    }

    /// Create the final batch of a stream.
    pub fn terminal(begin_row: u64, rows: Vec<Vec<Value>>) -> Self {
        let mut batch = Self::new(begin_row, rows);
        batch.terminal = true;
        batch
    }

    pub fn begin_row(&self) -> u64 {
        self.begin_row
    }

    /// Last row covered by this batch; `begin_row - 1` when empty.
    pub fn end_row(&self) -> u64 {
        self.begin_row + self.rows.len() as u64 - 1
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn contains_row(&self, row: u64) -> bool {
        row >= self.begin_row && row <= self.end_row()
    }

    /// Get the row at the given absolute (1-indexed) position.
    ///
    /// Callers check `contains_row` first; an out-of-range access is a
    /// programming error.
    pub fn row(&self, row: u64) -> &[Value] {
        assert!(self.contains_row(row), "row {} out of batch range", row);
        &self.rows[(row - self.begin_row) as usize]
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }
}
