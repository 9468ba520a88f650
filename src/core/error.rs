//! Error types for stages, sources and the pipeline driver.

use std::sync::Arc;

/// The main error type for the stage system.
///
/// Errors are cheap to clone so that a single failure can settle several
/// observers (the downstream handle, a completion watcher and a pending offer).
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An external resource failed to open, read or close
    #[error("Resource error: {0}")]
    Resource(#[source] Arc<dyn std::error::Error + Send + Sync>),

    /// A bounded buffer overflowed under the `Fail` strategy
    #[error("Buffer overflow (max capacity was: {capacity})!")]
    BufferOverflow { capacity: usize },

    /// An offer arrived while a backpressured offer was still pending
    #[error("You have to wait for the previous offer to be resolved to send another request")]
    IllegalConcurrentOffer,

    /// The addressed stage has already terminated
    #[error("Stream is terminated. Stage detached")]
    StreamDetached,

    /// A stage was configured with an option it cannot honor
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Downstream canceled before a lazy source was materialized
    #[error("Downstream canceled without triggering lazy source materialization")]
    CanceledBeforeMaterialization,

    /// A lazy source stopped without materializing its inner source
    #[error("Lazy source stopped without completing the materialized value")]
    StoppedBeforeMaterialization,

    /// The outlet protocol was violated (push without demand, push after close)
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The pipeline was shut down unexpectedly
    #[error("Pipeline was shut down")]
    Shutdown,

    /// A channel was closed unexpectedly
    #[error("Channel was closed unexpectedly")]
    ChannelClosed,

    /// An operation timed out
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A custom error with a message
    #[error("{0}")]
    Custom(String),
}

// Convenience constructors
impl Error {
    /// Create a resource error from any error type
    pub fn resource<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Error::Resource(Arc::new(error))
    }

    /// Create a timeout error
    pub fn timeout(duration_ms: u64) -> Self {
        Error::Timeout { duration_ms }
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }

    pub(crate) fn protocol<S: Into<String>>(message: S) -> Self {
        Error::ProtocolViolation(message.into())
    }
}

// Common conversions
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::StreamDetached
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        Error::Custom(format!("Timeout: {}", e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::resource(e)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Helper trait for converting foreign errors into our Error type
pub trait IntoError<T> {
    /// Wrap the error as [`Error::Resource`]
    fn into_resource_error(self) -> Result<T>;
}

impl<T, E> IntoError<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_resource_error(self) -> Result<T> {
        self.map_err(Error::resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_message_carries_capacity() {
        let err = Error::BufferOverflow { capacity: 16 };
        assert_eq!(err.to_string(), "Buffer overflow (max capacity was: 16)!");
    }

    #[test]
    fn test_resource_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Resource(_)));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "Resource error: disk gone");
    }

    #[test]
    fn test_into_resource_error() {
        let res: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(matches!(res.into_resource_error(), Err(Error::Resource(_))));
    }
}
