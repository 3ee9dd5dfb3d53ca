//! # replwire-core
//!
//! Core types for replwire.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other replwire crates. It provides:
//!
//! - Error taxonomy (`ErrorKind`, `ClassifiedError`, `Error`)
//! - The `ParsedValue` tagged union returned by every evaluation
//! - `RawExchange`, the text between one request's sentinels
//! - Pane targets and per-request marker identifiers
//! - The backoff policy shared by readiness checks and reply polling
//! - YAML configuration
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other replwire crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod config;
pub mod error;
pub mod exchange;
pub mod session;
pub mod value;

// Re-export commonly used types
pub use backoff::{Backoff, BackoffPolicy};
pub use config::{
    DetectionSettings, ParserSettings, PollingSettings, ProtocolSettings, ReadinessSettings,
    ReplwireConfig, SessionSettings, ThrottleSettings, TransportKind, TransportSettings,
};
pub use error::{bounded_excerpt, tail_lines, ClassifiedError, Error, ErrorKind, Result};
pub use exchange::RawExchange;
pub use session::{MarkerId, PaneTarget, SENTINEL_CLOSE, SENTINEL_TAG};
pub use value::ParsedValue;
