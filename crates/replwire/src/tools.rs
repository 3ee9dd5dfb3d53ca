//! MCP Tool Types
//!
//! Parameter and response types for the console tools, plus the conversions
//! between them and the session crate's request and result types.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use replwire_core::{Error, ParsedValue};
use replwire_session::{RequestShape, ThrottleStats};

// =============================================================================
// Evaluation
// =============================================================================

/// How `code` is wrapped before evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvalShape {
    /// Evaluate and return the value
    #[default]
    Expression,
    /// Return one record as a JSON object, or null
    Record,
    /// Return one page of a relation as JSON objects
    Collection,
    /// Run for side effects; returns null
    Statement,
    /// Decode what the code prints (e.g. `puts rows.to_json`)
    Output,
}

/// Parameters for console_eval
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleEvalParams {
    /// Code to evaluate (for `collection`, an expression yielding a relation)
    pub code: String,

    /// Request shape (default: expression)
    #[serde(default)]
    pub shape: EvalShape,

    /// Rows to skip (collection only, default 0)
    #[serde(default)]
    pub offset: Option<u64>,

    /// Page size (collection only, default 50)
    #[serde(default)]
    pub limit: Option<u64>,

    /// Timeout in milliseconds (default: the session's default timeout)
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Page size used when a collection request gives none
pub const DEFAULT_PAGE_SIZE: u64 = 50;

impl ConsoleEvalParams {
    /// Build the request shape.
    pub fn to_shape(&self) -> Result<RequestShape, String> {
        if self.code.trim().is_empty() {
            return Err("code cannot be empty".to_string());
        }
        let code = self.code.clone();
        Ok(match self.shape {
            EvalShape::Expression => RequestShape::RawExpression { code },
            EvalShape::Record => RequestShape::SingleRecord { code },
            EvalShape::Statement => RequestShape::Statement { code },
            EvalShape::Output => RequestShape::PrintedOutput { code },
            EvalShape::Collection => {
                let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE);
                if limit == 0 {
                    return Err("limit must be > 0".to_string());
                }
                RequestShape::CollectionPaginated {
                    relation: code,
                    offset: self.offset.unwrap_or(0),
                    limit,
                }
            }
        })
    }

    /// Requested timeout, or `default`.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }
}

/// Classified failure reported back to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleFailure {
    /// Error kind (session_missing, not_ready, marker_not_found,
    /// remote_exception, parse_failure, timeout)
    pub kind: String,

    /// Human-readable message
    pub message: String,

    /// Exception class raised remotely, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_class: Option<String>,

    /// Bounded excerpt of the console text
    #[serde(skip_serializing_if = "String::is_empty")]
    pub excerpt: String,
}

/// Response for console_eval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleEvalResponse {
    /// Whether a value came back
    pub ok: bool,

    /// Decoded value (JSON)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,

    /// Failure details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ConsoleFailure>,

    /// Wall time spent, throttle wait included
    pub elapsed_ms: u64,
}

impl ConsoleEvalResponse {
    /// Convert an evaluation outcome. Errors outside the console taxonomy
    /// are handed back unchanged.
    pub fn from_outcome(
        outcome: replwire_core::Result<ParsedValue>,
        elapsed: Duration,
    ) -> Result<Self, Error> {
        let elapsed_ms = elapsed.as_millis() as u64;
        match outcome {
            Ok(value) => Ok(Self {
                ok: true,
                value: serde_json::to_value(&value).ok(),
                error: None,
                elapsed_ms,
            }),
            Err(Error::Console(classified)) => Ok(Self {
                ok: false,
                value: None,
                error: Some(ConsoleFailure {
                    kind: classified.kind.to_string(),
                    message: classified.message,
                    remote_class: classified.remote_class,
                    excerpt: classified.raw_excerpt,
                }),
                elapsed_ms,
            }),
            Err(other) => Err(other),
        }
    }
}

// =============================================================================
// Introspection
// =============================================================================

/// Parameters for console_state
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleStateParams {}

/// Response for console_state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConsoleStateResponse {
    /// Pane address (`session:window.pane`)
    pub target: String,

    /// ready, awaiting_continuation, in_multiline_string or unknown
    pub state: String,
}

/// Parameters for console_throttle_stats
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ThrottleStatsParams {}

/// Response for console_throttle_stats
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ThrottleStatsResponse {
    /// Current rate in calls per second
    pub rate: f64,

    /// Calls completed
    pub calls: u64,

    /// Calls that failed
    pub errors: u64,

    /// Mean latency over the current window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_latency_ms: Option<f64>,
}

impl From<ThrottleStats> for ThrottleStatsResponse {
    fn from(stats: ThrottleStats) -> Self {
        Self {
            rate: stats.rate,
            calls: stats.calls,
            errors: stats.errors,
            average_latency_ms: stats.average_latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replwire_core::ClassifiedError;

    fn params(shape: EvalShape) -> ConsoleEvalParams {
        ConsoleEvalParams {
            code: "User.where(admin: true)".to_string(),
            shape,
            offset: None,
            limit: None,
            timeout_ms: None,
        }
    }

    #[test]
    fn test_params_defaults_from_json() {
        let params: ConsoleEvalParams = serde_json::from_str(r#"{"code":"1 + 1"}"#).unwrap();
        assert_eq!(params.shape, EvalShape::Expression);
        assert_eq!(
            params.timeout_or(Duration::from_secs(30)),
            Duration::from_secs(30)
        );
        assert_eq!(
            params.to_shape().unwrap(),
            RequestShape::RawExpression {
                code: "1 + 1".to_string()
            }
        );
    }

    #[test]
    fn test_collection_shape() {
        let shape = params(EvalShape::Collection).to_shape().unwrap();
        assert_eq!(
            shape,
            RequestShape::CollectionPaginated {
                relation: "User.where(admin: true)".to_string(),
                offset: 0,
                limit: DEFAULT_PAGE_SIZE,
            }
        );

        let mut zero = params(EvalShape::Collection);
        zero.limit = Some(0);
        assert!(zero.to_shape().is_err());
    }

    #[test]
    fn test_output_shape() {
        let params: ConsoleEvalParams =
            serde_json::from_str(r#"{"code":"puts User.all.to_json","shape":"output"}"#).unwrap();
        assert_eq!(
            params.to_shape().unwrap(),
            RequestShape::PrintedOutput {
                code: "puts User.all.to_json".to_string()
            }
        );
    }

    #[test]
    fn test_empty_code_rejected() {
        let mut p = params(EvalShape::Statement);
        p.code = "  ".to_string();
        assert!(p.to_shape().is_err());
    }

    #[test]
    fn test_response_from_value() {
        let response =
            ConsoleEvalResponse::from_outcome(Ok(ParsedValue::Int(2)), Duration::from_millis(12))
                .unwrap();
        assert!(response.ok);
        assert_eq!(response.value, Some(serde_json::json!(2)));
        assert_eq!(response.elapsed_ms, 12);
    }

    #[test]
    fn test_response_from_remote_exception() {
        let err = ClassifiedError::remote_exception("RuntimeError: boom", "raw")
            .with_remote_class("RuntimeError");
        let response =
            ConsoleEvalResponse::from_outcome(Err(err.into()), Duration::ZERO).unwrap();
        assert!(!response.ok);
        let failure = response.error.unwrap();
        assert_eq!(failure.kind, "remote_exception");
        assert_eq!(failure.remote_class.as_deref(), Some("RuntimeError"));
    }

    #[test]
    fn test_response_passes_through_transport_errors() {
        let outcome = Err(Error::Transport("ssh exited 255".to_string()));
        assert!(ConsoleEvalResponse::from_outcome(outcome, Duration::ZERO).is_err());
    }
}
