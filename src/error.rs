//! Error types and handling for the surge library

use thiserror::Error;

/// Result type alias for surge operations
pub type Result<T> = std::result::Result<T, SurgeError>;

/// Main error type for the surge library
#[derive(Error, Debug)]
pub enum SurgeError {
    /// An argument to a claim or construction operation was out of range
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message describing the rejected argument
        message: String,
    },

    /// `try_next` could not reserve the requested sequences right now
    #[error("insufficient capacity to claim sequences")]
    InsufficientCapacity,

    /// `run()` was called on an event processor that is already running
    #[error("event processor is already running")]
    AlreadyRunning,

    /// The sequence barrier was alerted while waiting (cooperative
    /// cancellation, usually from `halt()`)
    #[error("sequence barrier alerted")]
    Alert,

    /// A wait strategy deadline elapsed before the target sequence was
    /// reached
    #[error("wait strategy timed out")]
    Timeout,
}

impl SurgeError {
    /// Create a new invalid-argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable by retrying the operation
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InsufficientCapacity | Self::Timeout)
    }

    /// Check if this error interrupted a wait rather than failing an
    /// operation outright
    pub fn is_wait_interruption(&self) -> bool {
        matches!(self, Self::Alert | Self::Timeout)
    }
}

/// Convenience macro for creating invalid-argument errors
#[macro_export]
macro_rules! argument_error {
    ($($arg:tt)*) => {
        $crate::error::SurgeError::invalid_argument(format!($($arg)*))
    };
}
