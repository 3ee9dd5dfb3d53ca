//! Raw request/reply exchange text.

use serde::{Deserialize, Serialize};

use crate::session::MarkerId;

/// Text captured between one request's sentinels.
///
/// Produced by the command protocol and consumed immediately by the output
/// parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawExchange {
    /// Marker qualifying this exchange's sentinels
    pub marker_id: MarkerId,
    /// Lines strictly between the start and end sentinels
    pub full_capture: String,
    /// Start sentinel was seen
    pub start_found: bool,
    /// End sentinel was seen
    pub end_found: bool,
    /// Error sentinel was seen before the end sentinel
    pub error_marker_found: bool,
    /// Slice was recovered without the start sentinel
    pub degraded: bool,
}

impl RawExchange {
    /// Exchange delimited by both sentinels.
    pub fn complete(marker_id: MarkerId, full_capture: impl Into<String>) -> Self {
        let full_capture = full_capture.into();
        let error_sentinel = marker_id.error_sentinel();
        let error_marker_found = full_capture
            .lines()
            .any(|line| line.trim_start().starts_with(&error_sentinel));
        Self {
            marker_id,
            full_capture,
            start_found: true,
            end_found: true,
            error_marker_found,
            degraded: false,
        }
    }
}
