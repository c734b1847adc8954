//! Error types for the Falcon graph runtime

use thiserror::Error;

/// Result type alias used throughout Falcon
pub type Result<T> = std::result::Result<T, FalconError>;

/// Main error type for the Falcon library
#[derive(Error, Debug)]
pub enum FalconError {
    /// I/O errors from network or file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ring buffer has no free slots for the requested claim
    #[error("ring buffer is full")]
    RingBufferFull,

    /// Invalid or missing configuration option
    #[error("configuration error in {processor}: {message}")]
    Configuration {
        /// Name of the processor (or "graph" for graph-level errors)
        processor: String,
        /// Description of the problem
        message: String,
    },

    /// Graph build failed: bad connection, type mismatch, cycle, duplicate name
    #[error("graph build error: {0}")]
    Build(String),

    /// Fatal error during prepare (socket bind, file create, buffer allocation)
    #[error("prepare error in {processor}: {message}")]
    Prepare {
        /// Name of the processor that failed to prepare
        processor: String,
        /// Description of the problem
        message: String,
    },

    /// Fatal runtime invariant violation (fan-in desync, etc.)
    #[error("fatal processing error in {processor}: {message}")]
    Processing {
        /// Name of the processor that raised the error
        processor: String,
        /// Description of the problem
        message: String,
    },

    /// Control-protocol error: unknown command or bad state for command
    #[error("control error: {0}")]
    Control(String),

    /// Shared-state read/write error (bad conversion, insufficient permission)
    #[error("shared state error on {processor}.{state}: {message}")]
    SharedState {
        /// Owning processor name
        processor: String,
        /// State variable name
        state: String,
        /// Description of the problem
        message: String,
    },

    /// Operation timed out
    #[error("operation timed out")]
    Timeout,

    /// Generic error for conditions that should not occur in correct operation
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl FalconError {
    /// Build a configuration error
    pub fn config(processor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration { processor: processor.into(), message: message.into() }
    }

    /// Build a graph build-time error
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build(message.into())
    }

    /// Build a prepare-time error
    pub fn prepare(processor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Prepare { processor: processor.into(), message: message.into() }
    }

    /// Build a fatal runtime processing error
    pub fn processing(processor: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Processing { processor: processor.into(), message: message.into() }
    }

    /// Build a control-protocol error
    pub fn control(message: impl Into<String>) -> Self {
        Self::Control(message.into())
    }

    /// Build a shared-state error
    pub fn shared_state(
        processor: impl Into<String>,
        state: impl Into<String>,
        message: impl Into<String>
    ) -> Self {
        Self::SharedState { processor: processor.into(), state: state.into(), message: message.into() }
    }

    /// Build an "unexpected" error, for situations that a correctly functioning
    /// system should never reach (logic errors, broken invariants).
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Whether retrying the operation that produced this error is reasonable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RingBufferFull | Self::Timeout | Self::Io(_))
    }

    /// Whether this error is fatal to the processing graph (should trigger ERROR state)
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Prepare { .. } | Self::Processing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(FalconError::RingBufferFull.is_recoverable());
        assert!(!FalconError::RingBufferFull.is_fatal());

        let err = FalconError::processing("reader", "fan-in desync");
        assert!(err.is_fatal());
        assert!(!err.is_recoverable());

        let err = FalconError::config("reader", "missing host");
        assert!(!err.is_fatal());
    }
}
