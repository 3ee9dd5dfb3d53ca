//! Error types for replwire.
//!
//! Console-level failures are reported as a [`ClassifiedError`] tagged with an
//! [`ErrorKind`]. Callers match on the kind: `RemoteException` is an expected
//! outcome of the code under test, every other kind is an infrastructure
//! failure.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of characters kept in a [`ClassifiedError::raw_excerpt`].
pub const MAX_EXCERPT_CHARS: usize = 2_000;

/// Classification of a console failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The multiplexer session does not exist
    SessionMissing,
    /// The console could not be returned to its input prompt
    NotReady,
    /// The exchange finished without usable sentinels
    MarkerNotFound,
    /// The evaluated code raised inside the remote process
    RemoteException,
    /// The reply matched no recognized encoding
    ParseFailure,
    /// The end sentinel did not appear within the caller's budget
    Timeout,
}

impl ErrorKind {
    /// Short snake_case name, stable for logs and tool payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SessionMissing => "session_missing",
            ErrorKind::NotReady => "not_ready",
            ErrorKind::MarkerNotFound => "marker_not_found",
            ErrorKind::RemoteException => "remote_exception",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A console failure with enough raw text attached to diagnose it.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    /// Failure classification
    pub kind: ErrorKind,
    /// Human readable message
    pub message: String,
    /// Bounded excerpt of the pane text that led to the failure
    pub raw_excerpt: String,
    /// Remote exception class name, when the console reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_class: Option<String>,
}

impl ClassifiedError {
    /// Create a classified error, bounding the excerpt.
    pub fn new(kind: ErrorKind, message: impl Into<String>, raw_excerpt: impl AsRef<str>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_excerpt: bounded_excerpt(raw_excerpt.as_ref(), MAX_EXCERPT_CHARS),
            remote_class: None,
        }
    }

    /// Attach the remote exception class name.
    pub fn with_remote_class(mut self, class: impl Into<String>) -> Self {
        self.remote_class = Some(class.into());
        self
    }

    /// Session does not exist.
    pub fn session_missing(name: &str) -> Self {
        Self::new(
            ErrorKind::SessionMissing,
            format!("multiplexer session '{name}' does not exist"),
            "",
        )
    }

    /// Console could not be made ready.
    pub fn not_ready(message: impl Into<String>, pane_tail: &str) -> Self {
        Self::new(ErrorKind::NotReady, message, pane_tail)
    }

    /// Sentinels missing from a completed exchange.
    pub fn marker_not_found(message: impl Into<String>, pane_tail: &str) -> Self {
        Self::new(ErrorKind::MarkerNotFound, message, pane_tail)
    }

    /// End sentinel never appeared.
    pub fn timeout(waited_ms: u64, pane_tail: &str) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("end sentinel not seen after {waited_ms}ms"),
            pane_tail,
        )
    }

    /// Code raised in the remote process.
    pub fn remote_exception(message: impl Into<String>, raw: &str) -> Self {
        Self::new(ErrorKind::RemoteException, message, raw)
    }

    /// Reply matched no known encoding.
    pub fn parse_failure(excerpt: &str) -> Self {
        Self::new(
            ErrorKind::ParseFailure,
            "reply matched no recognized encoding",
            excerpt,
        )
    }
}

/// Main error type for replwire operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Classified console failure
    #[error(transparent)]
    Console(#[from] ClassifiedError),

    /// Multiplexer control invocation failed to run
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Classification, when this is a console failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Console(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Whether the remote code raised (an expected, domain-level outcome).
    pub fn is_remote_exception(&self) -> bool {
        self.kind() == Some(ErrorKind::RemoteException)
    }

    /// Borrow the classified error, if any.
    pub fn as_classified(&self) -> Option<&ClassifiedError> {
        match self {
            Error::Console(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Keep at most `max_chars` characters, marking truncation.
pub fn bounded_excerpt(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str(&format!("... ({} more chars)", count - max_chars));
    out
}

/// Last `lines` non-empty lines of a capture, used in timeout diagnostics.
pub fn tail_lines(text: &str, lines: usize) -> String {
    let kept: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join("\n")
}
