//! Requests and the shapes callers build them from.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use replwire_core::MarkerId;

/// One framed round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Fresh marker for this request
    pub marker_id: MarkerId,
    /// Code evaluated inside the console
    pub source_code: String,
    /// Overall deadline, readiness wait included
    pub timeout: Duration,
    /// Skip echoing the evaluated value
    pub suppress_echo: bool,
}

impl CommandRequest {
    /// New request with a fresh marker.
    pub fn new(source_code: impl Into<String>, timeout: Duration) -> Self {
        Self {
            marker_id: MarkerId::new(),
            source_code: source_code.into(),
            timeout,
            suppress_echo: false,
        }
    }

    /// Do not echo the value; only output and errors come back.
    pub fn without_echo(mut self) -> Self {
        self.suppress_echo = true;
        self
    }
}

/// What the caller wants back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RequestShape {
    /// Evaluate an expression and return its value
    RawExpression {
        /// Expression source
        code: String,
    },
    /// Fetch one record as a JSON object (or nil)
    SingleRecord {
        /// Expression yielding a record or nil
        code: String,
    },
    /// Fetch one page of a collection as JSON objects
    CollectionPaginated {
        /// Expression yielding a relation
        relation: String,
        /// Rows to skip
        offset: u64,
        /// Page size
        limit: u64,
    },
    /// Run for side effects only
    Statement {
        /// Statement source
        code: String,
    },
    /// Decode what the code prints (`puts rows.to_json`) instead of its value
    PrintedOutput {
        /// Source that prints its result
        code: String,
    },
}

impl RequestShape {
    /// Raw expression shorthand.
    pub fn expression(code: impl Into<String>) -> Self {
        RequestShape::RawExpression { code: code.into() }
    }

    /// Statement shorthand.
    pub fn statement(code: impl Into<String>) -> Self {
        RequestShape::Statement { code: code.into() }
    }

    /// Printed-output shorthand.
    pub fn printed(code: impl Into<String>) -> Self {
        RequestShape::PrintedOutput { code: code.into() }
    }

    /// Source evaluated inside the console.
    ///
    /// Caller code is wrapped on its own lines so a trailing comment cannot
    /// swallow the wrapper.
    pub fn source(&self) -> String {
        match self {
            RequestShape::RawExpression { code }
            | RequestShape::Statement { code }
            | RequestShape::PrintedOutput { code } => code.clone(),
            RequestShape::SingleRecord { code } => format!("(\n{code}\n)&.as_json"),
            RequestShape::CollectionPaginated {
                relation,
                offset,
                limit,
            } => format!("(\n{relation}\n).offset({offset}).limit({limit}).map(&:as_json)"),
        }
    }

    /// Whether the value echo is left out of the frame.
    pub fn suppresses_echo(&self) -> bool {
        matches!(
            self,
            RequestShape::Statement { .. } | RequestShape::PrintedOutput { .. }
        )
    }

    /// Whether the reply text is decoded into a value.
    pub fn decodes_reply(&self) -> bool {
        !matches!(self, RequestShape::Statement { .. })
    }

    /// Build a request with a fresh marker.
    pub fn to_request(&self, timeout: Duration) -> CommandRequest {
        let request = CommandRequest::new(self.source(), timeout);
        if self.suppresses_echo() {
            request.without_echo()
        } else {
            request
        }
    }
}
