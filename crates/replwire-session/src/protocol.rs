//! Sentinel-framed request/response over a console pane.
//!
//! Each request is wrapped in one line of Ruby that prints a start sentinel,
//! evaluates the caller's source, echoes the value, reports any exception on
//! an error sentinel line and always prints an end sentinel. The pane is then
//! polled until the end sentinel for the request's marker shows up as a
//! whole line.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use replwire_core::{
    tail_lines, BackoffPolicy, ClassifiedError, MarkerId, ProtocolSettings, RawExchange,
    ReplwireConfig, Result, SENTINEL_CLOSE, SENTINEL_TAG,
};
use replwire_detector::{ConsoleState, ConsoleStateDetector, StateClassifier};

use crate::readiness::ReadinessOptions;
use crate::request::CommandRequest;
use crate::session::ConsoleSession;

/// Executes framed requests against a console session.
pub struct CommandProtocol {
    classifier: Arc<dyn StateClassifier>,
    policy: BackoffPolicy,
    readiness: ReadinessOptions,
    settings: ProtocolSettings,
}

impl std::fmt::Debug for CommandProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProtocol")
            .field("policy", &self.policy)
            .field("readiness", &self.readiness)
            .field("settings", &self.settings)
            .finish()
    }
}

impl Default for CommandProtocol {
    fn default() -> Self {
        Self::new(Arc::new(ConsoleStateDetector::new()))
    }
}

impl CommandProtocol {
    /// Protocol with default timing around the given classifier.
    pub fn new(classifier: Arc<dyn StateClassifier>) -> Self {
        Self {
            classifier,
            policy: BackoffPolicy::default(),
            readiness: ReadinessOptions::default(),
            settings: ProtocolSettings::default(),
        }
    }

    /// Protocol configured from `config`.
    pub fn from_config(config: &ReplwireConfig) -> Result<Self> {
        let detector = ConsoleStateDetector::with_patterns(&config.detection.extra_prompt_patterns)?;
        let policy = config.polling.policy();
        let mut readiness = ReadinessOptions::from_settings(&config.readiness, policy);
        readiness.tail_lines = config.protocol.diagnostic_tail_lines;
        Ok(Self {
            classifier: Arc::new(detector),
            policy,
            readiness,
            settings: config.protocol.clone(),
        })
    }

    /// Replace the polling schedule (readiness included).
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self.readiness.policy = policy;
        self
    }

    /// Replace the readiness options.
    pub fn with_readiness(mut self, readiness: ReadinessOptions) -> Self {
        self.readiness = readiness;
        self
    }

    /// Replace the protocol settings.
    pub fn with_settings(mut self, settings: ProtocolSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The state classifier in use.
    pub fn classifier(&self) -> &dyn StateClassifier {
        self.classifier.as_ref()
    }

    /// Run one request and return the text between its sentinels.
    ///
    /// The request's timeout covers the readiness wait and the reply. Never
    /// retries; the only extra capture is a full-history read when the start
    /// sentinel has scrolled out of the polled window.
    pub fn execute(
        &self,
        session: &mut ConsoleSession,
        request: &CommandRequest,
    ) -> Result<RawExchange> {
        let marker = &request.marker_id;
        let readiness = self.readiness.bounded_by(request.timeout);
        let started = std::time::Instant::now();
        session.ensure_ready(self.classifier.as_ref(), &readiness)?;

        let frame = frame_request(request, self.settings.error_message_chars);
        session.send_line(&frame)?;
        info!(
            "Request {} sent to {} ({} chars of source)",
            marker.as_str(),
            session.target(),
            request.source_code.len()
        );

        let mut backoff = self
            .policy
            .start(request.timeout.saturating_sub(started.elapsed()));
        let grace = Duration::from_millis(self.settings.marker_grace_ms);
        let mut ready_polls = 0u32;

        loop {
            let text = session.capture(self.settings.scrollback_lines)?;
            match locate(&text, marker) {
                Located::Complete(raw) => {
                    debug!(
                        "Request {} complete after {} polls",
                        marker.as_str(),
                        backoff.attempts() + 1
                    );
                    return Ok(raw);
                }
                Located::EndOnly => return self.recover_scrolled(session, marker),
                Located::Pending { start_found } => {
                    // a bare prompt only counts once the console has read the frame
                    let idle = !start_found
                        && backoff.elapsed() >= grace
                        && prompt_after_frame(&text, marker)
                        && self.classifier.classify(&text) == ConsoleState::Ready;
                    if idle {
                        ready_polls += 1;
                        if ready_polls >= self.settings.ready_without_marker_polls.max(1) {
                            warn!(
                                "Console {} back at its prompt without markers for {}",
                                session.target(),
                                marker.as_str()
                            );
                            return Err(ClassifiedError::marker_not_found(
                                "console returned to its prompt without running the request",
                                &self.tail(&text),
                            )
                            .into());
                        }
                    } else {
                        ready_polls = 0;
                    }
                }
            }

            if !backoff.sleep() {
                let waited = started.elapsed().as_millis() as u64;
                warn!(
                    "Request {} timed out after {}ms on {}",
                    marker.as_str(),
                    waited,
                    session.target()
                );
                return Err(ClassifiedError::timeout(waited, &self.tail(&text)).into());
            }
        }
    }

    fn recover_scrolled(&self, session: &ConsoleSession, marker: &MarkerId) -> Result<RawExchange> {
        debug!("Start sentinel for {} scrolled out, reading full history", marker.as_str());
        let text = session.capture_full()?;
        match locate(&text, marker) {
            Located::Complete(raw) => Ok(raw),
            _ if self.settings.degraded_extraction => {
                warn!("Start sentinel for {} lost, using degraded slice", marker.as_str());
                degraded_slice(&text, marker).ok_or_else(|| {
                    ClassifiedError::marker_not_found("end sentinel vanished", &self.tail(&text))
                        .into()
                })
            }
            _ => Err(ClassifiedError::marker_not_found(
                "start sentinel scrolled out of history",
                &self.tail(&text),
            )
            .into()),
        }
    }

    fn tail(&self, text: &str) -> String {
        tail_lines(text, self.settings.diagnostic_tail_lines)
    }
}

/// Where a request's sentinels stand in a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Located {
    /// Both sentinels found
    Complete(RawExchange),
    /// End sentinel without its start
    EndOnly,
    /// No end sentinel yet
    Pending {
        /// Start sentinel already printed
        start_found: bool,
    },
}

/// Find the request's sentinel lines in `text`.
pub fn locate(text: &str, marker: &MarkerId) -> Located {
    let start = marker.start_sentinel();
    let end = marker.end_sentinel();
    let lines: Vec<&str> = text.lines().collect();

    let start_idx = lines.iter().position(|l| l.trim() == start);
    let search_from = start_idx.map_or(0, |i| i + 1);
    let end_idx = lines[search_from..]
        .iter()
        .position(|l| l.trim() == end)
        .map(|i| i + search_from);

    match (start_idx, end_idx) {
        (Some(s), Some(e)) => Located::Complete(RawExchange::complete(
            marker.clone(),
            join_slice(&lines[s + 1..e]),
        )),
        (None, Some(_)) => Located::EndOnly,
        (start_idx, None) => Located::Pending {
            start_found: start_idx.is_some(),
        },
    }
}

/// Fragment of the submitted frame that shows up where the console echoes it.
fn frame_fragment(marker: &MarkerId) -> String {
    format!("':START:{}{SENTINEL_CLOSE}'", marker.as_str())
}

/// Whether the frame for `marker` was echoed and more output followed it.
pub fn prompt_after_frame(text: &str, marker: &MarkerId) -> bool {
    let fragment = frame_fragment(marker);
    let lines: Vec<&str> = text.lines().collect();
    match lines.iter().rposition(|l| l.contains(&fragment)) {
        Some(i) => lines[i + 1..].iter().any(|l| !l.trim().is_empty()),
        None => false,
    }
}

/// Text before the end sentinel, back to the echoed frame or the last prompt.
pub fn degraded_slice(text: &str, marker: &MarkerId) -> Option<RawExchange> {
    let end = marker.end_sentinel();
    let echo_fragment = frame_fragment(marker);
    let detector = ConsoleStateDetector::new();
    let lines: Vec<&str> = text.lines().collect();

    let end_idx = lines.iter().position(|l| l.trim() == end)?;
    let begin = lines[..end_idx]
        .iter()
        .rposition(|l| {
            l.contains(&echo_fragment) || detector.classify(l) == ConsoleState::Ready
        })
        .map_or(0, |i| i + 1);

    let mut raw = RawExchange::complete(marker.clone(), join_slice(&lines[begin..end_idx]));
    raw.start_found = false;
    raw.degraded = true;
    Some(raw)
}

fn join_slice(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// The single line of Ruby submitted for `request`.
pub fn frame_request(request: &CommandRequest, error_chars: usize) -> String {
    let marker = request.marker_id.as_str();
    let sentinel = |label: &str| format!("puts '{SENTINEL_TAG}' + ':{label}:{marker}{SENTINEL_CLOSE}'");

    let eval = format!("eval({})", ruby_string_literal(&request.source_code));
    let body = if request.suppress_echo {
        eval
    } else {
        format!(
            "__rw_r = {eval}; puts '=> ' + (case __rw_r \
             when nil, true, false, Integer, Float, String then __rw_r.inspect \
             when Symbol then __rw_r.to_s.inspect \
             else (__rw_r.respond_to?(:to_json) ? __rw_r.to_json : __rw_r.inspect) end)"
        )
    };
    let report = format!(
        "puts '{SENTINEL_TAG}' + ':ERROR:{marker}{SENTINEL_CLOSE} ' + __rw_e.class.name.to_s + ': ' + \
         __rw_e.message.to_s.gsub(/\\s+/, ' ')[0, {error_chars}]"
    );

    format!(
        "begin; {}; {body}; rescue Exception => __rw_e; {report}; ensure; {}; end; nil",
        sentinel("START"),
        sentinel("END")
    )
}

/// Double-quoted Ruby literal for `source`, safe to submit as one line.
pub fn ruby_string_literal(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + 2);
    out.push('"');
    for ch in source.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '#' => out.push_str("\\#"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{decode_frame, decode_ruby_literal, Reply, ScriptedConsole};
    use replwire_core::ErrorKind;

    fn marker(token: &str) -> MarkerId {
        MarkerId::from_token(token).unwrap()
    }

    fn fast_protocol() -> CommandProtocol {
        CommandProtocol::default()
            .with_policy(BackoffPolicy::new(
                Duration::from_millis(1),
                2.0,
                Duration::from_millis(5),
            ))
            .with_settings(ProtocolSettings {
                marker_grace_ms: 20,
                ..Default::default()
            })
    }

    fn open(console: &Arc<ScriptedConsole>) -> ConsoleSession {
        ConsoleSession::open(console.clone(), "console", 0, 0).unwrap()
    }

    #[test]
    fn test_frame_never_contains_sentinels() {
        let request = CommandRequest::new("puts 1", Duration::from_secs(1));
        let frame = frame_request(&request, 500);
        let m = &request.marker_id;
        assert!(!frame.contains(&m.start_sentinel()));
        assert!(!frame.contains(&m.end_sentinel()));
        assert!(!frame.contains(&m.error_sentinel()));
        assert!(!frame.contains('\n'));
        assert!(frame.ends_with("; nil"));
        assert!(frame.contains("[0, 500]"));
    }

    #[test]
    fn test_frame_suppressed_echo() {
        let request = CommandRequest::new("x = 1", Duration::from_secs(1)).without_echo();
        let frame = frame_request(&request, 500);
        assert!(!frame.contains("puts '=> '"));
        assert!(frame.contains("eval(\"x = 1\")"));
    }

    #[test]
    fn test_ruby_literal_escaping() {
        assert_eq!(ruby_string_literal("a"), "\"a\"");
        assert_eq!(
            ruby_string_literal("puts \"#{x}\"\n\tc:\\d"),
            "\"puts \\\"\\#{x}\\\"\\n\\tc:\\\\d\""
        );
        assert_eq!(ruby_string_literal("\u{1b}"), "\"\\u{1b}\"");
    }

    #[test]
    fn test_frame_decodes_back_to_source() {
        let source = "users = User.where(name: \"O'Brien\")\n# count: #{users.size}\nusers.count";
        let request = CommandRequest::new(source, Duration::from_secs(1));
        let (m, decoded, echo) = decode_frame(&frame_request(&request, 500)).unwrap();
        assert_eq!(m, request.marker_id);
        assert_eq!(decoded, source);
        assert!(echo);
        assert_eq!(decode_ruby_literal("\"").unwrap(), "");
    }

    #[test]
    fn test_locate() {
        let m = marker("abc");
        let text = "irb> begin; puts '@@RW' + ':START:abc@@'; ...\n@@RW:START:abc@@\n=> 2  \n@@RW:END:abc@@\n=> nil\nirb>";
        match locate(text, &m) {
            Located::Complete(raw) => {
                assert_eq!(raw.full_capture, "=> 2");
                assert!(!raw.error_marker_found);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            locate("@@RW:START:abc@@\nworking", &m),
            Located::Pending { start_found: true }
        );
        assert_eq!(locate("out\n@@RW:END:abc@@", &m), Located::EndOnly);
    }

    #[test]
    fn test_locate_ignores_other_markers() {
        let m = marker("ab");
        let text = "@@RW:START:abc@@\n=> 1\n@@RW:END:abc@@\n@@RW:START:ab@@\n=> 2\n@@RW:END:ab@@";
        match locate(text, &m) {
            Located::Complete(raw) => assert_eq!(raw.full_capture, "=> 2"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_degraded_slice() {
        let m = marker("abc");
        let text = "irb(main):004:0>\nline 1\nline 2\n@@RW:END:abc@@";
        let raw = degraded_slice(text, &m).unwrap();
        assert!(raw.degraded && !raw.start_found && raw.end_found);
        assert_eq!(raw.full_capture, "line 1\nline 2");
    }

    #[test]
    fn test_execute_value() {
        let console = ScriptedConsole::irb("console");
        let mut session = open(&console);
        let request = CommandRequest::new("1 + 1", Duration::from_secs(2));
        let raw = fast_protocol().execute(&mut session, &request).unwrap();
        assert_eq!(raw.full_capture, "=> 2");
        assert_eq!(console.requests(), vec!["1 + 1"]);
    }

    #[test]
    fn test_execute_error_flag() {
        let console = ScriptedConsole::irb("console");
        let mut session = open(&console);
        let request = CommandRequest::new("raise \"boom\"", Duration::from_secs(2));
        let raw = fast_protocol().execute(&mut session, &request).unwrap();
        assert!(raw.error_marker_found);
        assert!(raw.full_capture.contains("RuntimeError: boom"));
    }

    #[test]
    fn test_execute_timeout_is_bounded() {
        let console = ScriptedConsole::irb("console");
        let mut session = open(&console);
        let request = CommandRequest::new("sleep 60", Duration::from_millis(150));
        let started = std::time::Instant::now();
        let err = fast_protocol().execute(&mut session, &request).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Timeout));
        assert!(started.elapsed() < Duration::from_secs(2));
        let classified = err.as_classified().unwrap();
        assert!(classified.raw_excerpt.contains(&request.marker_id.start_sentinel()));
    }

    #[test]
    fn test_execute_scrolled_start_recovered_from_full_history() {
        let console = ScriptedConsole::new("console", |_| {
            Reply::Printed((0..200).map(|i| format!("row {i}")).collect())
        });
        let mut session = open(&console);
        let protocol = fast_protocol().with_settings(ProtocolSettings {
            scrollback_lines: 10,
            ..Default::default()
        });
        let request = CommandRequest::new("dump", Duration::from_secs(2)).without_echo();
        let raw = protocol.execute(&mut session, &request).unwrap();
        assert!(!raw.degraded);
        assert!(raw.full_capture.starts_with("row 0\n"));
        assert!(raw.full_capture.ends_with("row 199"));
    }

    #[test]
    fn test_execute_lost_start_marker_not_found() {
        let console = ScriptedConsole::new("console", |_| {
            Reply::Printed((0..200).map(|i| format!("row {i}")).collect())
        });
        let mut session = open(&console);
        console.set_history_limit(100);
        let settings = ProtocolSettings {
            scrollback_lines: 10,
            ..Default::default()
        };
        let request = CommandRequest::new("dump", Duration::from_secs(2)).without_echo();

        let err = fast_protocol()
            .with_settings(settings.clone())
            .execute(&mut session, &request)
            .unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::MarkerNotFound));

        let request = CommandRequest::new("dump", Duration::from_secs(2)).without_echo();
        let raw = fast_protocol()
            .with_settings(ProtocolSettings {
                degraded_extraction: true,
                ..settings
            })
            .execute(&mut session, &request)
            .unwrap();
        assert!(raw.degraded);
        assert!(raw.full_capture.ends_with("row 199"));
    }

    #[test]
    fn test_execute_rejected_frame() {
        let console = ScriptedConsole::new("console", |_| {
            Reply::Rejected("SyntaxError: unexpected end-of-input".to_string())
        });
        let mut session = open(&console);
        let request = CommandRequest::new("def", Duration::from_secs(5));
        let started = std::time::Instant::now();
        let err = fast_protocol().execute(&mut session, &request).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::MarkerNotFound));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_prompt_after_frame() {
        let m = marker("abc");
        let echoed = "irb(main):002:0> begin; puts '@@RW' + ':START:abc@@'; x; end; nil";
        assert!(!prompt_after_frame("irb(main):002:0>", &m));
        assert!(!prompt_after_frame(echoed, &m));
        assert!(prompt_after_frame(
            &format!("{echoed}\nSyntaxError: oops\nirb(main):003:0>"),
            &m
        ));
        assert!(!prompt_after_frame(
            &format!("{echoed}\nirb(main):003:0>"),
            &marker("zzz")
        ));
    }

    #[test]
    fn test_execute_waits_for_slow_echo() {
        let console = ScriptedConsole::irb("console");
        let mut session = open(&console);
        console.delay_input(60);
        let request = CommandRequest::new("1 + 1", Duration::from_secs(5));
        let raw = fast_protocol().execute(&mut session, &request).unwrap();
        assert_eq!(raw.full_capture, "=> 2");
        assert_eq!(console.requests(), vec!["1 + 1"]);
    }

    #[test]
    fn test_execute_unread_frame_times_out() {
        let console = ScriptedConsole::irb("console");
        let mut session = open(&console);
        console.delay_input(usize::MAX);
        let request = CommandRequest::new("1 + 1", Duration::from_millis(200));
        let err = fast_protocol().execute(&mut session, &request).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Timeout));
        assert!(console.requests().is_empty());
    }

    #[test]
    fn test_execute_session_gone() {
        let console = ScriptedConsole::irb("console");
        let mut session = open(&console);
        console.kill();
        let request = CommandRequest::new("1", Duration::from_secs(1));
        let err = fast_protocol().execute(&mut session, &request).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::SessionMissing));
    }
}
