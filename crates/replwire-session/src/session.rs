//! A console living in one pane of a named multiplexer session.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use replwire_core::{ClassifiedError, PaneTarget, Result, SessionSettings};
use replwire_transport::{CaptureDepth, TmuxControl, Transport};

/// Keys sent to recover a wedged console.
pub const INTERRUPT_KEY: &str = "C-c";
/// Clears the visible screen.
pub const CLEAR_KEY: &str = "C-l";
/// Submits the current line.
pub const ENTER_KEY: &str = "Enter";

/// Handle to a long-lived interactive console.
///
/// The session is expected to exist already; opening never creates one.
#[derive(Debug)]
pub struct ConsoleSession {
    target: PaneTarget,
    default_timeout: Duration,
    control: TmuxControl,
}

impl ConsoleSession {
    /// Open the console at `name:window.pane` with default settings.
    pub fn open(
        transport: Arc<dyn Transport>,
        name: impl Into<String>,
        window: u32,
        pane: u32,
    ) -> Result<Self> {
        let settings = SessionSettings {
            name: name.into(),
            window,
            pane,
            ..Default::default()
        };
        Self::open_with(transport, &settings)
    }

    /// Open the console described by `settings`.
    ///
    /// Fails with `SessionMissing` when the session does not exist. Init
    /// commands are sent best-effort: a failure is logged and ignored.
    pub fn open_with(transport: Arc<dyn Transport>, settings: &SessionSettings) -> Result<Self> {
        let control = TmuxControl::new(transport);
        if !control.has_session(&settings.name)? {
            warn!("Console session '{}' does not exist", settings.name);
            return Err(ClassifiedError::session_missing(&settings.name).into());
        }

        let session = Self {
            target: PaneTarget::new(&settings.name, settings.window, settings.pane),
            default_timeout: settings.default_timeout(),
            control,
        };
        info!(
            "Opened console {} via {}",
            session.target,
            session.control.transport().describe()
        );

        session.initialize(&settings.init_commands);
        Ok(session)
    }

    fn initialize(&self, commands: &[String]) {
        for command in commands {
            match self.send_line(command) {
                Ok(()) => debug!("Init command sent to {}: {}", self.target, command),
                Err(e) => warn!("Init command failed on {} ({}): {}", self.target, command, e),
            }
        }
    }

    /// Pane address.
    pub fn target(&self) -> &PaneTarget {
        &self.target
    }

    /// Session name.
    pub fn name(&self) -> &str {
        &self.target.session_name
    }

    /// Timeout used when a request does not carry one.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Whether the session still exists.
    pub fn is_alive(&self) -> Result<bool> {
        self.control.has_session(&self.target.session_name)
    }

    /// Capture the visible screen plus `lines` of history.
    pub fn capture(&self, lines: usize) -> Result<String> {
        self.control.capture(&self.target, CaptureDepth::Lines(lines))
    }

    /// Capture everything the pane still holds.
    pub fn capture_full(&self) -> Result<String> {
        self.control.capture(&self.target, CaptureDepth::Full)
    }

    /// Type one line and submit it.
    pub fn send_line(&self, text: &str) -> Result<()> {
        self.control.send_line(&self.target, text)
    }

    /// Press a named key.
    pub fn send_key(&self, key: &str) -> Result<()> {
        self.control.send_key(&self.target, key)
    }

    /// Send an interrupt.
    pub fn interrupt(&self) -> Result<()> {
        self.send_key(INTERRUPT_KEY)
    }

    /// Newline, clear screen, interrupt.
    pub fn stabilize(&self) -> Result<()> {
        self.send_key(ENTER_KEY)?;
        self.send_key(CLEAR_KEY)?;
        self.send_key(INTERRUPT_KEY)
    }
}
