//! Error types for datri.
//!
//! Every failure that leaves the database core is a [`DbError`]. Callers branch
//! on [`DbError::kind`], a closed enumeration shared by all backends; the
//! native driver error is kept as the `source` for diagnostics only.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Closed set of error categories shared by all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unknown,
    NotFound,
    ConnectionFailed,
    Timeout,
    QueryFailed,
    InvalidInput,
    PermissionDenied,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::NotFound => "not_found",
            Self::ConnectionFailed => "connection_failed",
            Self::Timeout => "timeout",
            Self::QueryFailed => "query_failed",
            Self::InvalidInput => "invalid_input",
            Self::PermissionDenied => "permission_denied",
        }
    }

    /// Suggested HTTP status for transport layers sitting above the core.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::InvalidInput => 400,
            Self::PermissionDenied => 403,
            Self::ConnectionFailed => 503,
            Self::Timeout => 504,
            Self::QueryFailed | Self::Unknown => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Cause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// The unified error returned by every operation of the crate.
#[derive(Error, Debug, Clone)]
#[error("[{kind}] {message}{}", format_cause(.cause))]
pub struct DbError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Cause>,
}

fn format_cause(cause: &Option<Cause>) -> String {
    match cause {
        Some(cause) => format!(": {cause}"),
        None => String::new(),
    }
}

impl DbError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Create an error that keeps `cause` for diagnostics.
    pub fn wrap<E>(kind: ErrorKind, message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionFailed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::QueryFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The underlying native error, if one was retained.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Prefix the message with `context`, keeping kind and cause.
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{context}: {}", self.message);
        self
    }

    /// Same error with a different kind.
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    /// Check if this error is retryable.
    ///
    /// The core never retries on its own; this is advice for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConnectionFailed | ErrorKind::Timeout
        )
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
