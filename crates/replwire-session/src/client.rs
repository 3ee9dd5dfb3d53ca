//! The context object callers hold: one session, one protocol, one parser.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use replwire_core::{Error, PaneTarget, ParsedValue, ReplwireConfig, Result};
use replwire_detector::{ConsoleState, OutputParser};
use replwire_transport::{transport_from_settings, Transport};

use crate::protocol::CommandProtocol;
use crate::request::{CommandRequest, RequestShape};
use crate::session::ConsoleSession;
use crate::throttle::{AdaptiveThrottle, ThrottleStats};

/// Evaluates requests against one console.
///
/// Requests are serialized through the session lock, so a client can be
/// shared between threads.
#[derive(Debug)]
pub struct ConsoleClient {
    session: Mutex<ConsoleSession>,
    protocol: CommandProtocol,
    parser: OutputParser,
    throttle: Arc<AdaptiveThrottle>,
    target: PaneTarget,
    default_timeout: Duration,
    capture_lines: usize,
}

impl ConsoleClient {
    /// Connect using the transport selected by `config`.
    pub fn connect(config: &ReplwireConfig) -> Result<Self> {
        config.validate()?;
        let transport = transport_from_settings(&config.transport)?;
        Self::with_transport(config, transport)
    }

    /// Connect over an explicit transport.
    pub fn with_transport(config: &ReplwireConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let session = ConsoleSession::open_with(transport, &config.session)?;
        let client = Self {
            target: session.target().clone(),
            default_timeout: session.default_timeout(),
            session: Mutex::new(session),
            protocol: CommandProtocol::from_config(config)?,
            parser: OutputParser::from_settings(&config.parser),
            throttle: Arc::new(AdaptiveThrottle::new(config.throttle.clone())),
            capture_lines: config.protocol.scrollback_lines,
        };
        info!("Console client ready on {}", client.target);
        Ok(client)
    }

    /// Swap in a protocol, e.g. with different timing.
    pub fn with_protocol(mut self, protocol: CommandProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Share a throttle with other clients.
    pub fn with_throttle(mut self, throttle: Arc<AdaptiveThrottle>) -> Self {
        self.throttle = throttle;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ConsoleSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pane the client talks to.
    pub fn target(&self) -> &PaneTarget {
        &self.target
    }

    /// Timeout used by [`evaluate`](Self::evaluate).
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// The throttle wrapping every round-trip.
    pub fn throttle(&self) -> &Arc<AdaptiveThrottle> {
        &self.throttle
    }

    /// Throttle counters.
    pub fn throttle_stats(&self) -> ThrottleStats {
        self.throttle.stats()
    }

    /// Evaluate with the session's default timeout.
    pub fn evaluate(&self, shape: &RequestShape) -> Result<ParsedValue> {
        self.evaluate_with_timeout(shape, self.default_timeout)
    }

    /// Evaluate and decode the reply.
    ///
    /// A statement yields `Nil` on success; every other shape goes through
    /// the full parser, printed output included.
    pub fn evaluate_with_timeout(&self, shape: &RequestShape, timeout: Duration) -> Result<ParsedValue> {
        if timeout.is_zero() {
            return Err(Error::InvalidInput("timeout must be positive".to_string()));
        }
        let request = shape.to_request(timeout);
        debug!("Evaluating {:?} as {}", shape, request.marker_id.as_str());
        let decode = shape.decodes_reply();
        self.round_trip(&request, |raw| {
            if decode {
                self.parser.parse(raw)
            } else {
                self.parser.parse_unit(raw).map(|()| ParsedValue::Nil)
            }
        })
    }

    /// Run code for side effects only.
    pub fn run_statement(&self, code: &str, timeout: Duration) -> Result<()> {
        self.evaluate_with_timeout(&RequestShape::statement(code), timeout)
            .map(|_| ())
    }

    fn round_trip<F>(&self, request: &CommandRequest, decode: F) -> Result<ParsedValue>
    where
        F: FnOnce(&replwire_core::RawExchange) -> Result<ParsedValue>,
    {
        self.throttle.with_throttle_by(
            || {
                let mut session = self.lock();
                let raw = self.protocol.execute(&mut session, request)?;
                decode(&raw)
            },
            // the remote side raising is an answer, not a sign of overload
            |result| matches!(result, Err(e) if !e.is_remote_exception()),
        )
    }

    /// Classify the console as it is right now.
    pub fn state(&self) -> Result<ConsoleState> {
        let session = self.lock();
        session.state(self.protocol.classifier(), self.capture_lines)
    }
}
