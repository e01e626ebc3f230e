//! Error types module
//!
//! Two error enums cover the worker core. `BrokerError` is raised by the
//! connection, consumer and publisher plumbing; `WorkerError` is what the
//! dispatcher and the handler contract return. Every variant maps onto one
//! [`ErrorKind`], which decides whether the error may end the run loop and at
//! which level it is reported.

use std::time::Duration;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected outcomes like a handler declining a task
    Debug,
    /// Warning level - for recoverable issues like a dropped connection
    Warn,
    /// Error level - for failures that lose work or end the loop
    Error,
}

/// Failure domain an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Dial, channel-open, declare, subscribe or publish failure. Retried
    /// through a backoff sequence.
    ConnectFailure,
    /// The broker or the network severed the connection.
    ConnectionClosed,
    /// A retry sequence ran out of its elapsed-time budget.
    BackoffExhausted,
    /// The message body is not a well-formed task.
    ParseFailure,
    /// Business logic returned an error.
    HandlerFailure,
    /// The ack/reject call itself failed or was attempted twice.
    AckDispositionFailure,
    /// Anything else (misuse of the API, a crashed background task).
    Internal,
}

/// Self-description of an error, used by the worker loop to decide what to do
/// with it.
pub trait ErrorMetadata {
    /// Failure domain of this error
    fn kind(&self) -> ErrorKind;

    /// Machine-readable error code (e.g., "CONNECT_FAILED")
    fn error_code(&self) -> &'static str;

    /// Whether this error terminates the worker run loop
    fn is_fatal(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Failed to connect to broker: {0}")]
    Connect(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Broker connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Failed to declare queue `{queue}`: {reason}")]
    Declare { queue: String, reason: String },

    #[error("Failed to subscribe to queue `{queue}`: {reason}")]
    Subscribe { queue: String, reason: String },

    #[error("Failed to publish to queue `{queue}`: {reason}")]
    Publish { queue: String, reason: String },

    #[error("Failed to settle delivery {delivery_tag}: {reason}")]
    Disposition { delivery_tag: u64, reason: String },

    #[error("Delivery {0} was already acknowledged or rejected")]
    AlreadySettled(u64),

    #[error("Failed to close broker connection: {0}")]
    Close(String),

    #[error("Gave up {operation} after {attempts} attempts in {elapsed:?}")]
    BackoffExhausted {
        operation: &'static str,
        attempts: u32,
        elapsed: Duration,
    },
}

/// Static metadata for each variant: (kind, error_code, fatal, log_level).
fn broker_error_static_metadata(err: &BrokerError) -> (ErrorKind, &'static str, bool, LogLevel) {
    match err {
        BrokerError::Connect(_) => (
            ErrorKind::ConnectFailure,
            "CONNECT_FAILED",
            false,
            LogLevel::Warn,
        ),
        BrokerError::NotConnected => (
            ErrorKind::ConnectFailure,
            "NOT_CONNECTED",
            false,
            LogLevel::Warn,
        ),
        BrokerError::ConnectionClosed(_) => (
            ErrorKind::ConnectionClosed,
            "CONNECTION_CLOSED",
            false,
            LogLevel::Warn,
        ),
        BrokerError::Declare { .. } => (
            ErrorKind::ConnectFailure,
            "DECLARE_FAILED",
            false,
            LogLevel::Warn,
        ),
        BrokerError::Subscribe { .. } => (
            ErrorKind::ConnectFailure,
            "SUBSCRIBE_FAILED",
            false,
            LogLevel::Warn,
        ),
        BrokerError::Publish { .. } => (
            ErrorKind::ConnectFailure,
            "PUBLISH_FAILED",
            false,
            LogLevel::Warn,
        ),
        BrokerError::Disposition { .. } => (
            ErrorKind::AckDispositionFailure,
            "DISPOSITION_FAILED",
            false,
            LogLevel::Error,
        ),
        BrokerError::AlreadySettled(_) => (
            ErrorKind::AckDispositionFailure,
            "ALREADY_SETTLED",
            false,
            LogLevel::Error,
        ),
        BrokerError::Close(_) => (
            ErrorKind::Internal,
            "CLOSE_FAILED",
            false,
            LogLevel::Warn,
        ),
        BrokerError::BackoffExhausted { .. } => (
            ErrorKind::BackoffExhausted,
            "BACKOFF_EXHAUSTED",
            true,
            LogLevel::Error,
        ),
    }
}

impl ErrorMetadata for BrokerError {
    fn kind(&self) -> ErrorKind {
        broker_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        broker_error_static_metadata(self).1
    }

    fn is_fatal(&self) -> bool {
        broker_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        broker_error_static_metadata(self).3
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Failed to parse message body: {0}")]
    Parse(String),

    #[error("Handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    #[error("Task has no payload to forward")]
    MissingPayload,

    #[error("Worker is already running")]
    AlreadyRunning,

    #[error("Consumer receive task failed: {0}")]
    ReceiveTask(String),
}

impl WorkerError {
    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        // The handler's outermost context is already part of `Display`.
        let causes: Box<dyn Iterator<Item = &(dyn Error + 'static)>> = match self {
            WorkerError::Handler(e) => Box::new(e.chain().skip(1)),
            _ => Box::new(std::iter::successors(self.source(), |&err| err.source())),
        };
        for (depth, err) in causes.enumerate() {
            if depth >= 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
        }

        details
    }
}

impl ErrorMetadata for WorkerError {
    fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::Broker(e) => e.kind(),
            WorkerError::Parse(_) => ErrorKind::ParseFailure,
            WorkerError::Handler(_) => ErrorKind::HandlerFailure,
            WorkerError::MissingPayload => ErrorKind::Internal,
            WorkerError::AlreadyRunning => ErrorKind::Internal,
            WorkerError::ReceiveTask(_) => ErrorKind::Internal,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            WorkerError::Broker(e) => e.error_code(),
            WorkerError::Parse(_) => "PARSE_FAILED",
            WorkerError::Handler(_) => "HANDLER_FAILED",
            WorkerError::MissingPayload => "MISSING_PAYLOAD",
            WorkerError::AlreadyRunning => "ALREADY_RUNNING",
            WorkerError::ReceiveTask(_) => "RECEIVE_TASK_FAILED",
        }
    }

    fn is_fatal(&self) -> bool {
        match self {
            WorkerError::Broker(e) => e.is_fatal(),
            // A crashed receive task leaves nothing feeding the loop.
            WorkerError::ReceiveTask(_) => true,
            _ => false,
        }
    }

    fn log_level(&self) -> LogLevel {
        match self {
            WorkerError::Broker(e) => e.log_level(),
            WorkerError::Parse(_) => LogLevel::Warn,
            WorkerError::Handler(_) => LogLevel::Debug,
            WorkerError::MissingPayload => LogLevel::Warn,
            WorkerError::AlreadyRunning => LogLevel::Error,
            WorkerError::ReceiveTask(_) => LogLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_backoff_exhaustion_is_fatal() {
        let exhausted = BrokerError::BackoffExhausted {
            operation: "reconnecting",
            attempts: 11,
            elapsed: Duration::from_secs(181),
        };
        assert!(exhausted.is_fatal());
        assert_eq!(exhausted.kind(), ErrorKind::BackoffExhausted);
        assert_eq!(exhausted.log_level(), LogLevel::Error);

        let recoverable = [
            BrokerError::Connect("refused".to_string()),
            BrokerError::NotConnected,
            BrokerError::ConnectionClosed("reset by peer".to_string()),
            BrokerError::Publish {
                queue: "grouper".to_string(),
                reason: "channel closed".to_string(),
            },
            BrokerError::Disposition {
                delivery_tag: 7,
                reason: "channel closed".to_string(),
            },
            BrokerError::AlreadySettled(7),
        ];
        for err in recoverable {
            assert!(!err.is_fatal(), "{err} must not be fatal");
        }
    }

    #[test]
    fn test_worker_error_delegates_to_broker_error() {
        let err = WorkerError::from(BrokerError::Connect("refused".to_string()));
        assert_eq!(err.kind(), ErrorKind::ConnectFailure);
        assert_eq!(err.error_code(), "CONNECT_FAILED");
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Failed to connect to broker: refused");
    }

    #[test]
    fn test_error_kinds_for_message_failures() {
        assert_eq!(
            WorkerError::Parse("invalid utf-8".to_string()).kind(),
            ErrorKind::ParseFailure
        );
        let handler = WorkerError::Handler(anyhow::anyhow!("no projectId"));
        assert_eq!(handler.kind(), ErrorKind::HandlerFailure);
        assert!(!handler.is_fatal());
        assert_eq!(
            BrokerError::AlreadySettled(3).kind(),
            ErrorKind::AckDispositionFailure
        );
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let inner = anyhow::anyhow!("missing field").context("decoding event");
        let err = WorkerError::Handler(inner);
        let details = err.detailed_message();
        assert_eq!(
            details,
            "Handler failed: decoding event\n  Caused by: missing field"
        );
    }

    #[test]
    fn test_detailed_message_without_source_is_display() {
        let err = WorkerError::ReceiveTask("panicked".to_string());
        assert_eq!(err.detailed_message(), err.to_string());
    }
}
