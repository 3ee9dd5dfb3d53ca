//! # replwire-transport
//!
//! Multiplexer control for replwire.
//!
//! This crate provides:
//! - The `Transport` seam that runs one multiplexer control command
//! - Local and ssh transports
//! - Argument escaping for shell-bound transports
//! - `TmuxControl`, the only three primitives the protocol uses:
//!   session existence, send text/keys, capture bounded scroll-back
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on replwire-core
//! and is the only crate that spawns processes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod tmux;
pub mod transport;

// Re-export commonly used types
pub use tmux::{CaptureDepth, TmuxControl};
pub use transport::{
    escape_control_text, quote_control_arg, transport_from_settings, ControlOutput,
    LocalTransport, SshTransport, Transport,
};
