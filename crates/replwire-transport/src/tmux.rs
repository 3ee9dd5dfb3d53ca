//! tmux control primitives.
//!
//! The protocol needs exactly three things from the multiplexer: check that a
//! session exists, type into a pane, and read a bounded slice of its
//! scroll-back. Nothing here creates, resizes or destroys sessions.

use std::sync::Arc;

use tracing::{debug, warn};

use replwire_core::{ClassifiedError, Error, PaneTarget, Result};

use crate::transport::{ControlOutput, Transport};

/// How much scroll-back a capture reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDepth {
    /// The visible screen plus the last `n` lines of history
    Lines(usize),
    /// Everything the pane still holds
    Full,
}

impl CaptureDepth {
    fn start_arg(&self) -> String {
        match self {
            CaptureDepth::Lines(n) => format!("-{n}"),
            CaptureDepth::Full => "-".to_string(),
        }
    }
}

/// Control handle over one transport.
#[derive(Debug, Clone)]
pub struct TmuxControl {
    transport: Arc<dyn Transport>,
}

impl TmuxControl {
    /// Wrap a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn run(&self, args: Vec<String>) -> Result<ControlOutput> {
        debug!(
            "tmux {} via {}",
            args.first().map(String::as_str).unwrap_or(""),
            self.transport.describe()
        );
        self.transport.run_control(&args)
    }

    /// Whether the named session exists.
    pub fn has_session(&self, session_name: &str) -> Result<bool> {
        let output = self.run(vec![
            "has-session".to_string(),
            "-t".to_string(),
            session_name.to_string(),
        ])?;
        if !output.success() {
            debug!(
                "has-session '{}' exited {}: {}",
                session_name,
                output.exit_code,
                output.stderr.trim()
            );
        }
        Ok(output.success())
    }

    /// Type `text` literally into the pane and press Enter, in one invocation.
    pub fn send_line(&self, target: &PaneTarget, text: &str) -> Result<()> {
        let target_arg = target.to_string();
        let mut literal = text.to_string();
        // tmux reads a trailing ';' on an argument as a command separator
        if literal.ends_with(';') {
            literal.push(' ');
        }
        let output = self.run(vec![
            "send-keys".to_string(),
            "-t".to_string(),
            target_arg.clone(),
            "-l".to_string(),
            literal,
            ";".to_string(),
            "send-keys".to_string(),
            "-t".to_string(),
            target_arg,
            "Enter".to_string(),
        ])?;
        check(target, "send-keys", output)
    }

    /// Press a named key (`C-c`, `C-l`, `Enter`, ...).
    pub fn send_key(&self, target: &PaneTarget, key: &str) -> Result<()> {
        let output = self.run(vec![
            "send-keys".to_string(),
            "-t".to_string(),
            target.to_string(),
            key.to_string(),
        ])?;
        check(target, "send-keys", output)
    }

    /// Capture pane text, wrapped lines joined.
    pub fn capture(&self, target: &PaneTarget, depth: CaptureDepth) -> Result<String> {
        let output = self.run(vec![
            "capture-pane".to_string(),
            "-p".to_string(),
            "-J".to_string(),
            "-t".to_string(),
            target.to_string(),
            "-S".to_string(),
            depth.start_arg(),
        ])?;
        let stdout = output.stdout.clone();
        check(target, "capture-pane", output)?;
        Ok(stdout)
    }
}

fn check(target: &PaneTarget, command: &str, output: ControlOutput) -> Result<()> {
    if output.success() {
        return Ok(());
    }
    let stderr = output.stderr.trim();
    if is_missing_target(stderr) {
        warn!("tmux {} on {}: session gone ({})", command, target, stderr);
        return Err(ClassifiedError::session_missing(&target.session_name).into());
    }
    Err(Error::Transport(format!(
        "tmux {command} on {target} failed with status {}: {stderr}",
        output.exit_code
    )))
}

/// Whether tmux stderr says the target no longer exists.
pub fn is_missing_target(stderr: &str) -> bool {
    stderr.contains("can't find session")
        || stderr.contains("can't find window")
        || stderr.contains("can't find pane")
        || stderr.contains("no server running")
        || stderr.contains("session not found")
}
