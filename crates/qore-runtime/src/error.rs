//! Error types for the runtime core
//!
//! Errors are classified the way script code sees them: every variant has a
//! stable exception code and an [`ErrorCategory`] that tells callers whether
//! retrying makes sense.

use thiserror::Error;

use crate::value::Value;

/// Main error type for runtime operations
#[derive(Error, Debug)]
pub enum QoreError {
    /// Type mismatch error
    #[error("Type error: expected {expected}, got {got}")]
    TypeError {
        /// Expected type
        expected: String,
        /// Actual type received
        got: String,
    },

    /// Value error
    #[error("Value error: {0}")]
    ValueError(String),

    /// A global variable was redeclared with an incompatible type
    #[error("variable '{name}' was already declared with type '{declared}', cannot redeclare as '{attempted}'")]
    TypeConflict {
        /// Variable name
        name: String,
        /// Type fixed by the first declaration
        declared: String,
        /// Type of the rejected declaration
        attempted: String,
    },

    /// Write access to a read-only imported variable
    #[error("cannot modify read-only imported variable '{name}'")]
    ReadOnlyVariable {
        /// Variable name
        name: String,
    },

    /// A variable was not found in a registry
    #[error("variable '{name}' has not been declared")]
    UndefinedVariable {
        /// Variable name
        name: String,
    },

    /// A variable cannot be imported because it was not exported
    #[error("variable '{name}' is not public and cannot be imported")]
    NotPublic {
        /// Variable name
        name: String,
    },

    /// An lvalue chain tried to lock the same gate twice
    #[error("circular reference detected while resolving '{name}'")]
    CircularReference {
        /// Name of the gate that closes the cycle
        name: String,
    },

    /// A transaction lock could not be acquired in time
    #[error("timed out after {timeout_ms}ms waiting for the transaction lock on {datasource} (held by thread {holder})")]
    LockTimeout {
        /// Datasource description
        datasource: String,
        /// Configured timeout
        timeout_ms: u64,
        /// Best-effort identification of the holding thread
        holder: String,
    },

    /// Statement operation attempted in the wrong lifecycle state
    #[error("SQLStatement::{action}(): expected status '{expected}', statement is '{actual}': {message}")]
    StatementStatus {
        /// Operation name
        action: String,
        /// Status the operation needed
        expected: String,
        /// Status the statement was in
        actual: String,
        /// Extra detail
        message: String,
    },

    /// A prepared statement would run on a different connection
    #[error("statement '{sql}' was prepared on connection {prepared_on} and cannot be executed on connection {requested}")]
    CrossConnection {
        /// Statement SQL text
        sql: String,
        /// Connection that owns the prepared handle
        prepared_on: u64,
        /// Connection the current action was routed to
        requested: u64,
    },

    /// The server dropped the connection during an action
    #[error("connection {connection} to {datasource} was aborted: {message}")]
    ConnectionAborted {
        /// Datasource description
        datasource: String,
        /// Connection id
        connection: u64,
        /// Driver message
        message: String,
    },

    /// A thread ended while still holding a transaction
    #[error("thread {thread} terminated with an open transaction on {datasource}; the transaction was rolled back")]
    TransactionLeaked {
        /// Datasource description
        datasource: String,
        /// Thread that ended
        thread: String,
    },

    /// Memory could not be reserved while growing a container
    #[error("cannot allocate storage for {requested} elements")]
    ResourceExhausted {
        /// Requested element count
        requested: usize,
    },

    /// Driver-level failure
    #[error("{driver} driver error: {message}")]
    Driver {
        /// Driver name
        driver: String,
        /// Driver message
        message: String,
    },

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Evaluation was interrupted through the context flag
    #[error("evaluation interrupted")]
    Interrupted,

    /// Failure surfaced by an external collaborator
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, QoreError>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Transaction lock timeouts (recoverable)
    LockTimeout,
    /// Access violations on variables
    Access,
    /// Statement lifecycle errors
    StatementStatus,
    /// Connection dropped by the server (recoverable)
    ConnectionAborted,
    /// Out of memory while growing containers
    ResourceExhausted,
    /// Statement used across connections
    CrossConnection,
    /// Type and value errors
    Type,
    /// Driver errors
    Driver,
    /// Everything else
    Runtime,
}

impl ErrorCategory {
    /// Whether the failed action can be retried as-is
    #[inline]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::LockTimeout | Self::ConnectionAborted)
    }
}

impl QoreError {
    /// Create a type error from an expected type name and the offending value
    pub fn type_error(expected: impl Into<String>, got: &Value) -> Self {
        QoreError::TypeError {
            expected: expected.into(),
            got: got.type_name().to_string(),
        }
    }

    /// Create a driver error
    pub fn driver(driver: impl Into<String>, message: impl Into<String>) -> Self {
        QoreError::Driver {
            driver: driver.into(),
            message: message.into(),
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            QoreError::LockTimeout { .. } => ErrorCategory::LockTimeout,
            QoreError::ReadOnlyVariable { .. } | QoreError::NotPublic { .. } => {
                ErrorCategory::Access
            }
            QoreError::StatementStatus { .. } => ErrorCategory::StatementStatus,
            QoreError::ConnectionAborted { .. } => ErrorCategory::ConnectionAborted,
            QoreError::ResourceExhausted { .. } => ErrorCategory::ResourceExhausted,
            QoreError::CrossConnection { .. } => ErrorCategory::CrossConnection,
            QoreError::TypeError { .. }
            | QoreError::ValueError(_)
            | QoreError::TypeConflict { .. } => ErrorCategory::Type,
            QoreError::Driver { .. } | QoreError::Other(_) => ErrorCategory::Driver,
            QoreError::UndefinedVariable { .. }
            | QoreError::CircularReference { .. }
            | QoreError::TransactionLeaked { .. }
            | QoreError::Configuration(_)
            | QoreError::Interrupted => ErrorCategory::Runtime,
        }
    }

    /// Script-visible exception code
    pub fn code(&self) -> &'static str {
        match self {
            QoreError::TypeError { .. } => "RUNTIME-TYPE-ERROR",
            QoreError::ValueError(_) => "RUNTIME-VALUE-ERROR",
            QoreError::TypeConflict { .. } => "PARSE-TYPE-ERROR",
            QoreError::ReadOnlyVariable { .. } => "ACCESS-ERROR",
            QoreError::UndefinedVariable { .. } => "UNDEFINED-VARIABLE",
            QoreError::NotPublic { .. } => "IMPORT-ERROR",
            QoreError::CircularReference { .. } => "CIRCULAR-REFERENCE-ERROR",
            QoreError::LockTimeout { .. } => "TRANSACTION-LOCK-TIMEOUT",
            QoreError::StatementStatus { .. } => "SQLSTATEMENT-ERROR",
            QoreError::CrossConnection { .. } => "SQLSTATEMENT-CONNECTION-ERROR",
            QoreError::ConnectionAborted { .. } => "DATASOURCE-CONNECTION-ABORTED",
            QoreError::TransactionLeaked { .. } => "DATASOURCE-TRANSACTION-EXCEPTION",
            QoreError::ResourceExhausted { .. } => "RESOURCE-EXHAUSTED",
            QoreError::Driver { .. } => "DBI-DRIVER-ERROR",
            QoreError::Configuration(_) => "DATASOURCE-PARSE-ERROR",
            QoreError::Interrupted => "INTERRUPTED",
            QoreError::Other(_) => "DBI-DRIVER-ERROR",
        }
    }

    /// Whether the failed action can be retried as-is
    pub fn is_recoverable(&self) -> bool {
        self.category().is_recoverable()
    }
}

/// Accumulates errors raised on paths that must not unwind.
///
/// Teardown code (statement drop, thread-exit cleanup, registry clearing)
/// records into a sink and keeps releasing resources; the caller inspects
/// the sink afterwards.
#[derive(Debug, Default)]
pub struct ExceptionSink {
    errors: Vec<QoreError>,
}

impl ExceptionSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error
    pub fn raise(&mut self, err: QoreError) {
        self.errors.push(err);
    }

    /// Record the error of a failed result, returning the success value if any
    pub fn check<T>(&mut self, res: Result<T>) -> Option<T> {
        match res {
            Ok(v) => Some(v),
            Err(e) => {
                self.raise(e);
                None
            }
        }
    }

    /// True if at least one error was recorded
    pub fn is_exception(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Number of recorded errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate over recorded errors, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &QoreError> {
        self.errors.iter()
    }

    /// Move all errors from another sink into this one
    pub fn merge(&mut self, other: ExceptionSink) {
        self.errors.extend(other.errors);
    }

    /// Remove and return all recorded errors
    pub fn take_all(&mut self) -> Vec<QoreError> {
        std::mem::take(&mut self.errors)
    }

    /// Convert into a result carrying the first recorded error
    pub fn into_result(self) -> Result<()> {
        match self.errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_timeout_is_recoverable() {
        let err = QoreError::LockTimeout {
            datasource: "mock:db".to_string(),
            timeout_ms: 100,
            holder: "ThreadId(2)".to_string(),
        };
        assert!(err.is_recoverable());
        assert_eq!(err.code(), "TRANSACTION-LOCK-TIMEOUT");
        assert!(err.to_string().contains("100ms"));
    }

    #[test]
    fn test_access_error_category() {
        let err = QoreError::ReadOnlyVariable {
            name: "x".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Access);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_anyhow_wraps_transparently() {
        let err: QoreError = anyhow::anyhow!("socket closed").into();
        assert_eq!(err.to_string(), "socket closed");
        assert_eq!(err.category(), ErrorCategory::Driver);
    }

    #[test]
    fn test_sink_accumulates() {
        let mut sink = ExceptionSink::new();
        assert!(!sink.is_exception());
        assert_eq!(sink.check(Ok::<_, QoreError>(5)), Some(5));
        assert_eq!(
            sink.check::<()>(Err(QoreError::ValueError("a".into()))),
            None
        );
        sink.raise(QoreError::Interrupted);
        assert_eq!(sink.len(), 2);
        let first = sink.into_result().unwrap_err();
        assert!(matches!(first, QoreError::ValueError(_)));
    }
}
