//! Error types shared across the harness.
//!
//! Library errors are `thiserror` enums. Anything a script run can end in is
//! folded into an [`ErrorKind`] before it reaches a caller, so that
//! [`crate::result::ExecutionResult`] stays a flat success/failure record.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── ErrorKind ─────────────────────────────────────────────────────────────────

/// Category of a failed script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The script identifier did not resolve to readable source text.
    NotFound,
    /// Uncaught failure while evaluating the script.
    ScriptError,
    /// A response body was parsed as JSON and was not valid JSON.
    ParseError,
    /// The run exceeded its deadline.
    Timeout,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::ScriptError => "ScriptError",
            ErrorKind::ParseError => "ParseError",
            ErrorKind::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── LoadError ─────────────────────────────────────────────────────────────────

/// Failure to resolve a script identifier.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("script '{name}' not found")]
    NotFound { name: String },
    #[error("script '{name}' is not readable: {reason}")]
    Unreadable { name: String, reason: String },
}

impl LoadError {
    /// Every loader failure is reported to callers as `NotFound`.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::NotFound
    }
}

// ── ClientError ───────────────────────────────────────────────────────────────

/// Failure raised by the HTTP client facade or by response parsing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The request could not be completed (transport failure, unknown route).
    #[error("request to '{path}' failed: {message}")]
    Request { path: String, message: String },
    /// The body is not valid JSON.
    #[error("invalid JSON body: {0}")]
    Parse(String),
}

impl ClientError {
    pub fn request(path: impl Into<String>, message: impl Into<String>) -> Self {
        ClientError::Request {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Request { .. } => ErrorKind::ScriptError,
            ClientError::Parse(_) => ErrorKind::ParseError,
        }
    }
}
