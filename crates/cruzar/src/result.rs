//! Result and error types for Cruzar.

use crate::client::DriverFault;
use crate::engine::FailureRecord;
use thiserror::Error;

/// Result type for Cruzar operations
pub type CruzarResult<T> = Result<T, CruzarError>;

/// Errors that can occur while orchestrating a test run
#[derive(Debug, Error)]
pub enum CruzarError {
    /// Configuration error (aborts the run before any capability starts)
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// A second run was requested while one is active
    #[error("Test runner is already working")]
    AlreadyRunning,

    /// Operation called in the wrong state
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message
        message: String,
    },

    /// Local file server error
    #[error("File server error: {message}")]
    Server {
        /// Error message
        message: String,
    },

    /// Webdriver session could not be created
    #[error("Failed to start session: {message}")]
    SessionStart {
        /// Error message
        message: String,
    },

    /// Navigation failed
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// In-page script execution failed
    #[error("Script execution failed: {message}")]
    Script {
        /// Error message
        message: String,
    },

    /// A bounded wait ran out of time
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Assertion failed inside a spec body
    #[error("Assertion failed: {message}")]
    AssertionFailed {
        /// Error message
        message: String,
    },

    /// Webdriver session could not be closed gracefully
    #[error("Failed to end session: {message}")]
    SessionEnd {
        /// Error message
        message: String,
        /// Structured driver fault payload, when the driver reported one
        fault: Option<DriverFault>,
    },

    /// Reporter-domain outcome: the run finished and collected failed
    /// expectations. Re-raised unchanged by the coordinator because the
    /// reporter already printed it.
    #[error("{} failed expectation(s)", .failures.len())]
    FailedExpectations {
        /// The aggregated failure records
        failures: Vec<FailureRecord>,
    },

    /// Anything else escaping the taxonomy above; logged with full
    /// detail before being surfaced
    #[error("Fatal run error: {message}")]
    Fatal {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CruzarError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a fatal run error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    /// Create an assertion failure
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::AssertionFailed {
            message: message.into(),
        }
    }
}
