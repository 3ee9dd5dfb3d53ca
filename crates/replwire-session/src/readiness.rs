//! Bringing a console to its top-level prompt.
//!
//! A console left mid-expression or inside an open string literal swallows
//! whatever is typed next. Before every request the pane is polled until it
//! shows a ready prompt; a console stuck in partial input gets interrupted,
//! and as a last resort the screen is stabilized.

use std::time::Duration;

use tracing::{debug, info, warn};

use replwire_core::{tail_lines, BackoffPolicy, ClassifiedError, ReadinessSettings, Result};
use replwire_detector::{ConsoleState, StateClassifier};

use crate::session::ConsoleSession;

/// Tuning for [`ConsoleSession::ensure_ready`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadinessOptions {
    /// Give up after this long
    pub timeout: Duration,
    /// Interrupts sent before stabilizing
    pub max_interrupts: u32,
    /// Consecutive wedged polls tolerated before acting
    pub wedged_polls_before_interrupt: u32,
    /// Polling schedule
    pub policy: BackoffPolicy,
    /// History lines read per poll
    pub capture_lines: usize,
    /// Lines of pane text kept in a `NotReady` error
    pub tail_lines: usize,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self::from_settings(&ReadinessSettings::default(), BackoffPolicy::default())
    }
}

impl ReadinessOptions {
    /// Build from configuration.
    pub fn from_settings(settings: &ReadinessSettings, policy: BackoffPolicy) -> Self {
        Self {
            timeout: settings.timeout(),
            max_interrupts: settings.max_interrupts,
            wedged_polls_before_interrupt: settings.wedged_polls_before_interrupt,
            policy,
            capture_lines: 50,
            tail_lines: 20,
        }
    }

    /// Same options with the timeout capped at `limit`.
    pub fn bounded_by(mut self, limit: Duration) -> Self {
        self.timeout = self.timeout.min(limit);
        self
    }
}

impl ConsoleSession {
    /// Classify the console once.
    pub fn state(&self, classifier: &dyn StateClassifier, capture_lines: usize) -> Result<ConsoleState> {
        let text = self.capture(capture_lines)?;
        Ok(classifier.classify(&text))
    }

    /// Wait until the console shows a ready prompt.
    ///
    /// Polls on the backoff schedule. A console that stays wedged in partial
    /// input for more than `wedged_polls_before_interrupt` polls is sent
    /// `C-c`, up to `max_interrupts` times, then stabilized once. Fails with
    /// `NotReady` carrying the pane tail.
    pub fn ensure_ready(
        &self,
        classifier: &dyn StateClassifier,
        options: &ReadinessOptions,
    ) -> Result<()> {
        let mut backoff = options.policy.start(options.timeout);
        let mut wedged_polls = 0u32;
        let mut interrupts = 0u32;
        let mut stabilized = false;

        loop {
            let text = self.capture(options.capture_lines)?;
            let state = classifier.classify(&text);

            if state == ConsoleState::Ready {
                if interrupts > 0 || stabilized {
                    info!(
                        "Console {} recovered after {} interrupt(s){}",
                        self.target(),
                        interrupts,
                        if stabilized { " and stabilize" } else { "" }
                    );
                }
                return Ok(());
            }

            if state.is_wedged() {
                wedged_polls += 1;
                if wedged_polls > options.wedged_polls_before_interrupt {
                    wedged_polls = 0;
                    if interrupts < options.max_interrupts {
                        interrupts += 1;
                        warn!(
                            "Console {} wedged ({:?}), sending interrupt {}/{}",
                            self.target(),
                            state,
                            interrupts,
                            options.max_interrupts
                        );
                        self.interrupt()?;
                    } else if !stabilized {
                        stabilized = true;
                        warn!("Console {} still wedged, stabilizing", self.target());
                        self.stabilize()?;
                    } else {
                        return Err(not_ready(
                            format!("console stuck in {state:?} after recovery"),
                            &text,
                            options,
                        ));
                    }
                }
            } else {
                wedged_polls = 0;
                debug!("Console {} busy, waiting", self.target());
            }

            if !backoff.sleep() {
                if state.is_wedged() && !stabilized {
                    warn!("Console {} wedged at deadline, stabilizing", self.target());
                    self.stabilize()?;
                    std::thread::sleep(options.policy.initial);
                    let text = self.capture(options.capture_lines)?;
                    if classifier.classify(&text) == ConsoleState::Ready {
                        return Ok(());
                    }
                    return Err(not_ready("console not ready before deadline", &text, options));
                }
                return Err(not_ready(
                    format!("console not ready after {}ms", backoff.elapsed().as_millis()),
                    &text,
                    options,
                ));
            }
        }
    }
}

fn not_ready(message: impl Into<String>, text: &str, options: &ReadinessOptions) -> replwire_core::Error {
    ClassifiedError::not_ready(message, &tail_lines(text, options.tail_lines)).into()
}
