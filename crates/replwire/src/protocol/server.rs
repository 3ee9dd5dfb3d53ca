//! Replwire MCP Server Implementation
//!
//! This module implements the MCP server using rmcp 0.9's #[tool_router] pattern.
//! Tool calls are routed to a shared `ConsoleClient`; every console round-trip
//! is blocking and runs on `spawn_blocking`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpError,
};

use tracing::{debug, error, info, instrument, warn};

use replwire_session::ConsoleClient;

use crate::tools::*;

/// Extra time the async guard allows on top of a request's own timeout
const GUARD_SLACK: Duration = Duration::from_secs(15);

fn internal_error(message: String) -> McpError {
    McpError::new(ErrorCode(-32603), message, None)
}

fn invalid_params(message: String) -> McpError {
    McpError::new(ErrorCode(-32602), message, None)
}

fn json_content<T: serde::Serialize>(value: &T, fallback: &str) -> Content {
    Content::text(serde_json::to_string_pretty(value).unwrap_or_else(|_| fallback.to_string()))
}

/// Replwire MCP Server
///
/// Exposes one console session via MCP tools.
#[derive(Clone)]
pub struct ReplwireServer {
    /// Console client shared by all tool calls
    client: Arc<ConsoleClient>,
    /// Tool router for handling MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ReplwireServer {
    /// Create a server around a connected client
    pub fn new(client: Arc<ConsoleClient>) -> Self {
        Self {
            client,
            tool_router: Self::tool_router(),
        }
    }

    /// The console client
    pub fn client(&self) -> &Arc<ConsoleClient> {
        &self.client
    }

    /// Evaluate code in the console
    #[tool(
        description = "Evaluate code in the remote console and return the decoded value. \
                       Shapes: expression (default), record (one record as JSON or null), \
                       collection (a page of a relation; uses offset/limit), statement (side effects only), \
                       output (decode what the code prints, e.g. puts rows.to_json)"
    )]
    #[instrument(skip_all)]
    pub async fn console_eval(
        &self,
        Parameters(params): Parameters<ConsoleEvalParams>,
    ) -> Result<CallToolResult, McpError> {
        let shape = params.to_shape().map_err(invalid_params)?;
        let timeout = params.timeout_or(self.client.default_timeout());
        if timeout.is_zero() {
            return Err(invalid_params("timeout_ms must be > 0".to_string()));
        }

        info!("console_eval: shape={:?}, timeout={}ms", params.shape, timeout.as_millis());
        debug!("console_eval code: {}", params.code);

        let client = self.client.clone();
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            timeout + GUARD_SLACK,
            tokio::task::spawn_blocking(move || client.evaluate_with_timeout(&shape, timeout)),
        )
        .await;

        let outcome = match outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!("Evaluation task panicked: {}", e);
                return Err(internal_error(format!("Evaluation task failed: {e}")));
            }
            Err(_) => {
                error!("Evaluation still blocked after {:?}", timeout + GUARD_SLACK);
                return Err(internal_error(format!(
                    "Evaluation did not return within {} seconds",
                    (timeout + GUARD_SLACK).as_secs()
                )));
            }
        };

        let response = ConsoleEvalResponse::from_outcome(outcome, started.elapsed()).map_err(|e| {
            error!("Console transport failed: {}", e);
            internal_error(format!("Console unavailable: {e}"))
        })?;

        let content = vec![json_content(&response, "evaluation finished")];
        if response.ok {
            Ok(CallToolResult::success(content))
        } else {
            if let Some(failure) = &response.error {
                warn!("console_eval failed: {} ({})", failure.kind, failure.message);
            }
            Ok(CallToolResult::error(content))
        }
    }

    /// Report the console's readiness
    #[tool(description = "Classify the console prompt: ready, awaiting_continuation, in_multiline_string or unknown")]
    #[instrument(skip_all)]
    pub async fn console_state(
        &self,
        Parameters(_params): Parameters<ConsoleStateParams>,
    ) -> Result<CallToolResult, McpError> {
        let client = self.client.clone();
        let state = tokio::task::spawn_blocking(move || client.state())
            .await
            .map_err(|e| internal_error(format!("State task failed: {e}")))?
            .map_err(|e| {
                error!("Failed to read console state: {}", e);
                internal_error(format!("Failed to read console state: {e}"))
            })?;

        let response = ConsoleStateResponse {
            target: self.client.target().to_string(),
            state: serde_json::to_value(state)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("{state:?}")),
        };
        debug!("console_state: {} is {}", response.target, response.state);

        Ok(CallToolResult::success(vec![json_content(
            &response,
            &response.state,
        )]))
    }

    /// Report throttle counters
    #[tool(description = "Show the adaptive throttle's current rate, call and error counts and average latency")]
    pub async fn console_throttle_stats(
        &self,
        Parameters(_params): Parameters<ThrottleStatsParams>,
    ) -> Result<CallToolResult, McpError> {
        let response = ThrottleStatsResponse::from(self.client.throttle_stats());
        Ok(CallToolResult::success(vec![json_content(
            &response,
            "throttle stats unavailable",
        )]))
    }
}

// Implement the ServerHandler trait to define server capabilities
#[tool_handler]
impl rmcp::ServerHandler for ReplwireServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                format!(
                    "Replwire - evaluate code in the long-lived console at {}. \
                     Use console_eval to run code and get decoded values back, \
                     console_state to check whether the console is at its prompt, \
                     and console_throttle_stats to inspect request pacing.",
                    self.client.target()
                ),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
