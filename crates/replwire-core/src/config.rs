//! Configuration types for replwire.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};

/// Top-level configuration loaded from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReplwireConfig {
    /// Which pane hosts the console
    pub session: SessionSettings,
    /// How multiplexer control commands reach the host
    pub transport: TransportSettings,
    /// Shared polling schedule
    pub polling: PollingSettings,
    /// Readiness recovery
    pub readiness: ReadinessSettings,
    /// Request framing and reply extraction
    pub protocol: ProtocolSettings,
    /// Reply decoding
    pub parser: ParserSettings,
    /// Prompt detection
    pub detection: DetectionSettings,
    /// Adaptive pacing for bulk callers
    pub throttle: ThrottleSettings,
}

impl ReplwireConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ReplwireConfig =
            serde_yaml::from_str(yaml).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.session.name.trim().is_empty() {
            return Err(Error::Config("session.name cannot be empty".to_string()));
        }
        if self.session.default_timeout_ms == 0 {
            return Err(Error::Config(
                "session.default_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.transport.kind == TransportKind::Ssh && self.transport.ssh_host.is_none() {
            return Err(Error::Config(
                "transport.ssh_host is required when transport.kind is ssh".to_string(),
            ));
        }

        self.polling.validate()?;

        if self.protocol.scrollback_lines == 0 {
            return Err(Error::Config(
                "protocol.scrollback_lines must be > 0".to_string(),
            ));
        }

        if self.parser.echo_prefixes.iter().all(|p| p.trim().is_empty()) {
            return Err(Error::Config(
                "parser.echo_prefixes needs at least one non-blank prefix".to_string(),
            ));
        }

        for pattern in &self.detection.extra_prompt_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                Error::Config(format!("Invalid prompt pattern '{pattern}': {e}"))
            })?;
        }

        self.throttle.validate()
    }
}

/// Console pane settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Multiplexer session name
    pub name: String,
    /// Window index
    pub window: u32,
    /// Pane index
    pub pane: u32,
    /// Default per-request timeout in milliseconds
    pub default_timeout_ms: u64,
    /// Commands sent once after attaching, failures are only logged
    pub init_commands: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            name: "console".to_string(),
            window: 0,
            pane: 0,
            default_timeout_ms: 30_000,
            init_commands: vec![
                "require 'json'".to_string(),
                "IRB.conf[:USE_COLORIZE] = false".to_string(),
                "IRB.conf[:USE_AUTOCOMPLETE] = false".to_string(),
                "IRB.conf[:SAVE_HISTORY] = nil".to_string(),
            ],
        }
    }
}

impl SessionSettings {
    /// Default per-request timeout.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// How control commands are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Run the multiplexer binary on this machine
    #[default]
    Local,
    /// Run it on a remote host over ssh
    Ssh,
}

/// Transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Local or ssh
    pub kind: TransportKind,
    /// Multiplexer binary name or path
    pub tmux_binary: String,
    /// Remote host (ssh only)
    pub ssh_host: Option<String>,
    /// Remote user (ssh only)
    pub ssh_user: Option<String>,
    /// Remote port (ssh only)
    pub ssh_port: Option<u16>,
    /// Private key path (ssh only)
    pub identity_file: Option<String>,
    /// Extra `-o` options passed to ssh
    pub ssh_options: Vec<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Local,
            tmux_binary: "tmux".to_string(),
            ssh_host: None,
            ssh_user: None,
            ssh_port: None,
            identity_file: None,
            ssh_options: vec!["BatchMode=yes".to_string()],
        }
    }
}

/// Polling schedule shared by readiness checks and reply polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// First interval in milliseconds
    pub initial_ms: u64,
    /// Growth factor
    pub multiplier: f64,
    /// Interval cap in milliseconds
    pub cap_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            initial_ms: 50,
            multiplier: 2.0,
            cap_ms: 500,
        }
    }
}

impl PollingSettings {
    /// Build the backoff policy.
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.initial_ms),
            self.multiplier,
            Duration::from_millis(self.cap_ms),
        )
    }

    fn validate(&self) -> Result<()> {
        if self.initial_ms == 0 {
            return Err(Error::Config("polling.initial_ms must be > 0".to_string()));
        }
        if self.multiplier < 1.0 {
            return Err(Error::Config("polling.multiplier must be >= 1.0".to_string()));
        }
        if self.cap_ms < self.initial_ms {
            return Err(Error::Config(
                "polling.cap_ms must be >= polling.initial_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Readiness recovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessSettings {
    /// Budget for returning the console to its prompt, in milliseconds
    pub timeout_ms: u64,
    /// Interrupts sent before the stabilize sequence
    pub max_interrupts: u32,
    /// Consecutive wedged polls tolerated before interrupting
    pub wedged_polls_before_interrupt: u32,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_interrupts: 2,
            wedged_polls_before_interrupt: 1,
        }
    }
}

impl ReadinessSettings {
    /// Readiness budget.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Request framing and extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolSettings {
    /// Scroll-back lines captured per poll
    pub scrollback_lines: usize,
    /// Lines of pane text attached to timeout diagnostics
    pub diagnostic_tail_lines: usize,
    /// Accept a best-effort slice when the start sentinel scrolled away
    pub degraded_extraction: bool,
    /// Consecutive prompt-without-sentinel polls that mean the frame was rejected
    pub ready_without_marker_polls: u32,
    /// Grace period before prompt-without-sentinel polls are counted, in milliseconds
    pub marker_grace_ms: u64,
    /// Characters of a remote exception message kept by the frame
    pub error_message_chars: usize,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            scrollback_lines: 400,
            diagnostic_tail_lines: 20,
            degraded_extraction: false,
            ready_without_marker_polls: 5,
            marker_grace_ms: 1_000,
            error_message_chars: 500,
        }
    }
}

/// Reply decoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserSettings {
    /// Prefixes of the console's value-echo lines
    pub echo_prefixes: Vec<String>,
    /// Characters of unparsed text kept in a parse failure
    pub excerpt_chars: usize,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            echo_prefixes: vec!["=> ".to_string()],
            excerpt_chars: 240,
        }
    }
}

/// Prompt detection settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DetectionSettings {
    /// Additional regexes matched against the last line to recognize a ready prompt
    pub extra_prompt_patterns: Vec<String>,
}

/// Adaptive throttle settings. Rates are calls per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    /// Starting rate
    pub initial_rate: f64,
    /// Lower bound
    pub min_rate: f64,
    /// Upper bound
    pub max_rate: f64,
    /// Latency samples averaged before adjusting
    pub window: usize,
    /// Average latency below which the rate rises, in milliseconds
    pub low_latency_ms: u64,
    /// Average latency above which the rate falls, in milliseconds
    pub high_latency_ms: u64,
    /// Multiplier applied when speeding up
    pub increase_factor: f64,
    /// Multiplier applied when slowing down for latency
    pub decrease_factor: f64,
    /// Multiplier applied after a failed call
    pub error_factor: f64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            initial_rate: 5.0,
            min_rate: 0.5,
            max_rate: 20.0,
            window: 10,
            low_latency_ms: 250,
            high_latency_ms: 2_000,
            increase_factor: 1.1,
            decrease_factor: 0.8,
            error_factor: 0.5,
        }
    }
}

impl ThrottleSettings {
    fn validate(&self) -> Result<()> {
        if self.min_rate <= 0.0 || self.min_rate > self.max_rate {
            return Err(Error::Config(
                "throttle requires 0 < min_rate <= max_rate".to_string(),
            ));
        }
        if self.initial_rate < self.min_rate || self.initial_rate > self.max_rate {
            return Err(Error::Config(
                "throttle.initial_rate must lie within [min_rate, max_rate]".to_string(),
            ));
        }
        if self.window == 0 {
            return Err(Error::Config("throttle.window must be > 0".to_string()));
        }
        if self.low_latency_ms > self.high_latency_ms {
            return Err(Error::Config(
                "throttle.low_latency_ms must be <= high_latency_ms".to_string(),
            ));
        }
        if self.increase_factor < 1.0
            || !(0.0..=1.0).contains(&self.decrease_factor)
            || !(0.0..=1.0).contains(&self.error_factor)
        {
            return Err(Error::Config(
                "throttle factors: increase >= 1, decrease and error within (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}
