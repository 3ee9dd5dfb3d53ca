//! Pane targets and request markers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tag every sentinel line starts with.
pub const SENTINEL_TAG: &str = "@@RW";

/// Closing suffix of every sentinel.
pub const SENTINEL_CLOSE: &str = "@@";

/// A pane of a named multiplexer session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct PaneTarget {
    /// Multiplexer session name
    pub session_name: String,
    /// Window index within the session
    pub window_index: u32,
    /// Pane index within the window
    pub pane_index: u32,
}

impl PaneTarget {
    /// Create a new pane target.
    pub fn new(session_name: impl Into<String>, window_index: u32, pane_index: u32) -> Self {
        Self {
            session_name: session_name.into(),
            window_index,
            pane_index,
        }
    }
}

impl std::fmt::Display for PaneTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}.{}",
            self.session_name, self.window_index, self.pane_index
        )
    }
}

/// Unique token qualifying the sentinels of one request.
///
/// Built from the current time in milliseconds plus random hex, so markers
/// never repeat across the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkerId(String);

impl MarkerId {
    /// Generate a fresh marker.
    pub fn new() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("{:x}{}", millis, &random[..8]))
    }

    /// Wrap an existing token (lowercase alphanumerics only).
    pub fn from_token(token: &str) -> Option<Self> {
        if !token.is_empty() && token.chars().all(|c| c.is_ascii_alphanumeric()) {
            Some(Self(token.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Line printed before the request's output.
    pub fn start_sentinel(&self) -> String {
        self.sentinel("START")
    }

    /// Line printed after the request's output, always.
    pub fn end_sentinel(&self) -> String {
        self.sentinel("END")
    }

    /// Prefix of the line printed when the request raised.
    pub fn error_sentinel(&self) -> String {
        self.sentinel("ERROR")
    }

    fn sentinel(&self, label: &str) -> String {
        format!("{SENTINEL_TAG}:{label}:{}{SENTINEL_CLOSE}", self.0)
    }
}

impl Default for MarkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MarkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
