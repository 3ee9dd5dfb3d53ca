//! # replwire-session
//!
//! Console sessions and the request/response protocol for replwire.
//!
//! This crate provides:
//! - `ConsoleSession`, one pane of a named multiplexer session
//! - Readiness recovery (interrupt and stabilize a wedged console)
//! - `CommandProtocol`: sentinel framing, injection, polling and extraction
//! - `RequestShape`, the structured request builder
//! - `AdaptiveThrottle` for callers issuing many round-trips
//! - `ConsoleClient`, the context object tying it all together
//! - `testing::ScriptedConsole`, an in-memory console for tests
//!
//! ## Architecture
//!
//! This is Layer 3 in the architecture - it depends on replwire-core,
//! replwire-transport and replwire-detector.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod protocol;
pub mod readiness;
pub mod request;
pub mod session;
pub mod testing;
pub mod throttle;

// Re-export commonly used types
pub use client::ConsoleClient;
pub use protocol::CommandProtocol;
pub use readiness::ReadinessOptions;
pub use request::{CommandRequest, RequestShape};
pub use session::ConsoleSession;
pub use throttle::{AdaptiveThrottle, ThrottleStats};
