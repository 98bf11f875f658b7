//! Error taxonomy for the execution core.
//!
//! Failures split into two kinds: *engine-internal* (a defect or
//! environment problem below the level the user can act on, always fatal
//! to the current execution) and *processing* (a business-rule or input
//! problem attributable to the request, surfaced with actionable detail).
//! Cancellation and timeout are specializations of processing failures
//! raised by the driver itself.
//!
//! "Not ready" is deliberately absent here: it is a control signal, not
//! an error, and lives in [`crate::plan::Poll`].

use thiserror::Error;

/// Errors raised by the execution core.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Engine defect or environment failure. Reported generically to the
    /// user; the cause chain is for logs only.
    #[error("internal engine error: {0}")]
    Internal(#[from] anyhow::Error),

    /// Request-attributable failure (bad input, constraint violation,
    /// resource exhaustion the user can act on).
    #[error("{0}")]
    Processing(String),

    /// The request was canceled while executing.
    #[error("request {request_id} canceled")]
    Canceled { request_id: u64 },

    /// The request exceeded its absolute deadline.
    #[error("request {request_id} timed out")]
    TimedOut { request_id: u64 },
}

impl EngineError {
    /// True for failures attributable to the request rather than the engine.
    pub fn is_processing(&self) -> bool {
        !matches!(self, EngineError::Internal(_))
    }
}

/// Result type for execution core operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Construct an [`EngineError::Internal`] from a format string.
#[macro_export]
macro_rules! internal_err {
    ($($arg:tt)*) => {
        $crate::error::EngineError::Internal(anyhow::anyhow!($($arg)*))
    };
}

/// Construct an [`EngineError::Processing`] from a format string.
#[macro_export]
macro_rules! processing_err {
    ($($arg:tt)*) => {
        $crate::error::EngineError::Processing(format!($($arg)*))
    };
}

/// A non-fatal advisory condition accumulated during execution.
///
/// Warnings are collected on plans, drained on demand by the caller, and
/// never abort execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
}

impl Warning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_classification() {
        assert!(processing_err!("bad value {}", 7).is_processing());
        assert!(EngineError::Canceled { request_id: 1 }.is_processing());
        assert!(EngineError::TimedOut { request_id: 1 }.is_processing());
        assert!(!internal_err!("corrupt state").is_processing());
    }

    #[test]
    fn test_display_messages() {
        let err = processing_err!("value 'x' cannot be cast to integer");
        assert_eq!(err.to_string(), "value 'x' cannot be cast to integer");

        let err = EngineError::Canceled { request_id: 42 };
        assert_eq!(err.to_string(), "request 42 canceled");

        // Internal failures report generically, cause detail stays behind
        // the prefix.
        let err = internal_err!("page table corrupt");
        assert!(err.to_string().starts_with("internal engine error"));
    }

    #[test]
    fn test_warning_accumulation() {
        let mut warnings = Vec::new();
        warnings.push(Warning::new("implicit cast from BigInt to Integer"));
        warnings.push(Warning::new("source reported truncated result"));
        assert_eq!(warnings.len(), 2);
        assert_eq!(
            std::mem::take(&mut warnings).len(),
            2,
            "drain leaves the list empty"
        );
        assert!(warnings.is_empty());
    }
}
