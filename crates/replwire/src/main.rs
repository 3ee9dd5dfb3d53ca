//! # Replwire MCP Server
//!
//! Model Context Protocol server that evaluates code in a long-lived
//! interactive console (irb, rails console, pry) running in a tmux pane,
//! locally or on a remote host over ssh.
//!
//! ## Overview
//!
//! This server provides MCP tools for:
//! - Evaluation (expressions, single records, paginated collections, statements)
//! - Console state inspection
//! - Throttle statistics
//!
//! ## Architecture
//!
//! This is Layer 4 - the binary that ties together:
//! - replwire-core: Core types and configuration
//! - replwire-transport: tmux control, local or over ssh
//! - replwire-detector: Prompt classification and reply decoding
//! - replwire-session: Sessions, readiness and the request protocol

use std::sync::Arc;

use anyhow::Context;
use rmcp::{transport::stdio, ServiceExt};

use replwire::{CliOptions, ReplwireServer};
use replwire_session::ConsoleClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = CliOptions::parse(
        std::env::args().skip(1),
        std::env::var(replwire::cli::CONFIG_ENV).ok(),
    )?;

    if options.version {
        println!("replwire {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Initialize logging (stdout carries the MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Replwire v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = options.load_config()?;
    tracing::info!(
        "Connecting to console '{}' via {:?} transport",
        config.session.name,
        config.transport.kind
    );

    let client = tokio::task::spawn_blocking(move || ConsoleClient::connect(&config))
        .await
        .context("connect task failed")?
        .context("failed to open console session")?;

    let server = ReplwireServer::new(Arc::new(client));

    tracing::info!("Server initialized, starting stdio transport...");

    // Serve the MCP server over stdio
    let service = server.serve(stdio()).await.map_err(|e| {
        tracing::error!("Error starting server: {}", e);
        e
    })?;

    tracing::info!("Replwire running on stdio");

    // Wait for the service to complete
    service.waiting().await?;

    tracing::info!("Replwire shutting down");

    Ok(())
}
