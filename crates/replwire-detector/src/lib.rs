//! # replwire-detector
//!
//! Text inference for replwire.
//!
//! This crate provides:
//! - Console state classification from captured pane text
//! - Reply decoding from sentinel-delimited text into `ParsedValue`
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends only on replwire-core
//! and never talks to the multiplexer; everything here is a pure function of
//! captured text.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod output;
pub mod state;

// Re-export commonly used types
pub use output::OutputParser;
pub use state::{ConsoleState, ConsoleStateDetector, StateClassifier};
