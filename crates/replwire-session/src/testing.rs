//! In-memory console for tests.
//!
//! [`ScriptedConsole`] implements [`Transport`] by simulating a tmux pane
//! running an irb-like console: typed lines are echoed after a prompt,
//! framed requests are decoded and answered by an evaluator closure, and
//! `C-c`, `C-l` and `Enter` move the console between states.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lazy_static::lazy_static;
use regex::Regex;

use replwire_core::{MarkerId, Result};
use replwire_transport::{ControlOutput, Transport};

lazy_static! {
    static ref FRAME_MARKER: Regex = Regex::new(r"':START:([0-9a-z]+)@@'").unwrap();
}

/// Rows the simulated screen shows on top of the requested history.
const SCREEN_ROWS: usize = 24;

/// How the simulated console answers one evaluated snippet.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Evaluates to a value; the string is its echo literal (`42`, `"a"`, `[1]`)
    Value(String),
    /// Prints these lines and returns nil
    Printed(Vec<String>),
    /// Raises an exception
    Raise {
        /// Exception class name
        class: String,
        /// Exception message
        message: String,
    },
    /// Never returns
    Hang,
    /// Rejected by the console before the frame runs; prints this line
    Rejected(String),
}

impl Reply {
    /// Shorthand for [`Reply::Raise`].
    pub fn raise(class: &str, message: &str) -> Self {
        Reply::Raise {
            class: class.to_string(),
            message: message.to_string(),
        }
    }
}

type Evaluator = Box<dyn FnMut(&str) -> Reply + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Ready,
    InString,
    Busy,
}

struct FakePane {
    alive: bool,
    lines: Vec<String>,
    line_no: u32,
    mode: Mode,
    interrupts_needed: u32,
    interrupts_seen: u32,
    stabilize_clears: bool,
    history_limit: Option<usize>,
    input_delay: usize,
    held_input: Option<(String, usize)>,
    pending_marker: Option<MarkerId>,
    evaluator: Evaluator,
    typed: Vec<String>,
    keys: Vec<String>,
    requests: Vec<String>,
    control_calls: usize,
}

impl FakePane {
    fn prompt(&self) -> String {
        match self.mode {
            Mode::InString => format!("irb(main):{:03}:0\"", self.line_no),
            _ => format!("irb(main):{:03}:0>", self.line_no),
        }
    }

    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
        if let Some(limit) = self.history_limit {
            if self.lines.len() > limit {
                let excess = self.lines.len() - limit;
                self.lines.drain(..excess);
            }
        }
    }

    fn push_prompt(&mut self) {
        let prompt = self.prompt();
        self.push(prompt);
    }

    /// Append typed text to the cursor line.
    fn echo_typed(&mut self, text: &str) {
        match self.lines.last_mut() {
            Some(last) => {
                last.push(' ');
                last.push_str(text);
            }
            None => self.lines.push(text.to_string()),
        }
    }

    fn submit(&mut self, text: &str) {
        self.typed.push(text.to_string());
        self.echo_typed(text);
        match self.mode {
            Mode::Busy => {}
            Mode::InString => self.push_prompt(),
            Mode::Ready => {
                self.line_no += 1;
                match decode_frame(text) {
                    Some((marker, source, echo)) => self.run_frame(marker, &source, echo),
                    None => {
                        self.push("=> nil");
                        self.push_prompt();
                    }
                }
            }
        }
    }

    fn run_frame(&mut self, marker: MarkerId, source: &str, echo: bool) {
        self.requests.push(source.to_string());
        let reply = (self.evaluator)(source);
        if let Reply::Rejected(line) = reply {
            self.push(line);
            self.push_prompt();
            return;
        }

        self.push(marker.start_sentinel());
        match reply {
            Reply::Value(literal) => {
                if echo {
                    self.push(format!("=> {literal}"));
                }
            }
            Reply::Printed(lines) => {
                for line in lines {
                    self.push(line);
                }
                if echo {
                    self.push("=> nil");
                }
            }
            Reply::Raise { class, message } => {
                self.push(format!("{} {class}: {message}", marker.error_sentinel()));
            }
            Reply::Hang => {
                self.mode = Mode::Busy;
                self.pending_marker = Some(marker);
                return;
            }
            Reply::Rejected(_) => {}
        }
        self.push(marker.end_sentinel());
        self.push("=> nil");
        self.push_prompt();
    }

    fn press(&mut self, key: &str) {
        self.keys.push(key.to_string());
        match key {
            "C-c" => {
                match self.mode {
                    Mode::InString => {
                        self.interrupts_seen += 1;
                        if self.interrupts_seen >= self.interrupts_needed {
                            self.mode = Mode::Ready;
                        }
                    }
                    Mode::Busy => {
                        if let Some(marker) = self.pending_marker.take() {
                            self.push(format!("{} Interrupt: ", marker.error_sentinel()));
                            self.push(marker.end_sentinel());
                            self.push("=> nil");
                        }
                        self.mode = Mode::Ready;
                    }
                    Mode::Ready => {}
                }
                self.push("^C");
                self.push_prompt();
            }
            "C-l" => {
                if self.mode == Mode::InString && self.stabilize_clears {
                    self.mode = Mode::Ready;
                }
                self.lines.clear();
                self.push_prompt();
            }
            "Enter" => match self.mode {
                Mode::Busy => self.push(""),
                _ => self.push_prompt(),
            },
            _ => {}
        }
    }

    /// Hold typed text back until enough captures have gone by.
    fn type_text(&mut self, text: &str) {
        if self.input_delay > 0 {
            self.held_input = Some((text.to_string(), self.input_delay));
            self.input_delay = 0;
        } else {
            self.submit(text);
        }
    }

    fn release_held_input(&mut self) {
        match self.held_input.take() {
            Some((text, 0 | 1)) => self.submit(&text),
            Some((text, remaining)) => self.held_input = Some((text, remaining - 1)),
            None => {}
        }
    }

    fn capture(&self, start: &str) -> String {
        let keep = match start.strip_prefix('-') {
            Some("") | None => self.lines.len(),
            Some(n) => n.parse::<usize>().unwrap_or(0) + SCREEN_ROWS,
        };
        let from = self.lines.len().saturating_sub(keep);
        let mut text = self.lines[from..].join("\n");
        text.push('\n');
        text
    }
}

/// Simulated console pane.
pub struct ScriptedConsole {
    session_name: String,
    pane: Mutex<FakePane>,
}

impl std::fmt::Debug for ScriptedConsole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedConsole")
            .field("session_name", &self.session_name)
            .finish()
    }
}

impl ScriptedConsole {
    /// Console whose framed requests are answered by `evaluator`.
    pub fn new<F>(session_name: &str, evaluator: F) -> Arc<Self>
    where
        F: FnMut(&str) -> Reply + Send + 'static,
    {
        let pane = FakePane {
            alive: true,
            lines: vec!["Loading development environment (Rails 7.1.3)".to_string()],
            line_no: 1,
            mode: Mode::Ready,
            interrupts_needed: 1,
            interrupts_seen: 0,
            stabilize_clears: false,
            history_limit: None,
            input_delay: 0,
            held_input: None,
            pending_marker: None,
            evaluator: Box::new(evaluator),
            typed: Vec::new(),
            keys: Vec::new(),
            requests: Vec::new(),
            control_calls: 0,
        };
        let console = Arc::new(Self {
            session_name: session_name.to_string(),
            pane: Mutex::new(pane),
        });
        console.lock().push_prompt();
        console
    }

    /// Console that understands a handful of simple snippets (see [`irb_reply`]).
    pub fn irb(session_name: &str) -> Arc<Self> {
        Self::new(session_name, irb_reply)
    }

    fn lock(&self) -> MutexGuard<'_, FakePane> {
        self.pane.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leave the console inside an unterminated string literal that clears
    /// after `interrupts_needed` interrupts.
    pub fn wedge_in_string(&self, interrupts_needed: u32) {
        let mut pane = self.lock();
        pane.echo_typed("puts \"unterminated");
        pane.mode = Mode::InString;
        pane.interrupts_needed = interrupts_needed;
        pane.interrupts_seen = 0;
        pane.push_prompt();
    }

    /// Whether clearing the screen also clears a wedged string.
    pub fn set_stabilize_clears(&self, clears: bool) {
        self.lock().stabilize_clears = clears;
    }

    /// Delay the next typed line: it is neither echoed nor run until
    /// `captures` more pane captures have been taken.
    pub fn delay_input(&self, captures: usize) {
        self.lock().input_delay = captures;
    }

    /// Drop scroll-back beyond `lines`.
    pub fn set_history_limit(&self, lines: usize) {
        self.lock().history_limit = Some(lines);
    }

    /// Make every later control command fail as if the session was killed.
    pub fn kill(&self) {
        self.lock().alive = false;
    }

    /// Lines typed into the pane, in order.
    pub fn typed_lines(&self) -> Vec<String> {
        self.lock().typed.clone()
    }

    /// Named keys pressed, in order.
    pub fn keys_pressed(&self) -> Vec<String> {
        self.lock().keys.clone()
    }

    /// Decoded source of every framed request the console received.
    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    /// Number of control commands executed.
    pub fn control_calls(&self) -> usize {
        self.lock().control_calls
    }

    /// Everything currently in the pane.
    pub fn pane_text(&self) -> String {
        self.lock().lines.join("\n")
    }

    fn targets_me(&self, target: &str) -> bool {
        let name = target.split(':').next().unwrap_or(target);
        name == self.session_name
    }
}

impl Transport for ScriptedConsole {
    fn run_control(&self, args: &[String]) -> Result<ControlOutput> {
        let mut pane = self.lock();
        pane.control_calls += 1;

        let target = option_value(args, "-t").unwrap_or_default();
        if !pane.alive || !self.targets_me(&target) {
            return Ok(ControlOutput::failed(
                1,
                format!("can't find session: {target}"),
            ));
        }

        match args.first().map(String::as_str) {
            Some("has-session") => Ok(ControlOutput::ok("")),
            Some("capture-pane") => {
                let start = option_value(args, "-S").unwrap_or_else(|| "-0".to_string());
                let text = pane.capture(&start);
                pane.release_held_input();
                Ok(ControlOutput::ok(text))
            }
            Some("send-keys") => {
                match option_value(args, "-l") {
                    Some(text) => pane.type_text(&text),
                    None => {
                        if let Some(key) = args.last() {
                            pane.press(key);
                        }
                    }
                }
                Ok(ControlOutput::ok(""))
            }
            _ => Ok(ControlOutput::failed(1, "unknown command")),
        }
    }

    fn describe(&self) -> String {
        format!("scripted:{}", self.session_name)
    }
}

fn option_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

/// Decode a framed request line: marker, source, and whether the value is echoed.
pub fn decode_frame(line: &str) -> Option<(MarkerId, String, bool)> {
    let marker = FRAME_MARKER
        .captures(line)
        .and_then(|c| MarkerId::from_token(&c[1]))?;
    let literal_start = line.find("eval(\"")? + "eval(\"".len();
    let source = decode_ruby_literal(&line[literal_start..])?;
    let echo = line.contains("puts '=> '");
    Some((marker, source, echo))
}

/// Decode a double-quoted Ruby literal body up to its closing quote.
pub fn decode_ruby_literal(body: &str) -> Option<String> {
    let mut out = String::new();
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => return Some(out),
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                'u' => {
                    if chars.next()? != '{' {
                        return None;
                    }
                    let hex: String = chars.by_ref().take_while(|c| *c != '}').collect();
                    out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
                }
                other => out.push(other),
            },
            other => out.push(other),
        }
    }
    None
}

/// Answers for a few snippet shapes: literals, integer addition, symbols,
/// JSON-looking text, `puts`, `raise` and `sleep`. Anything else raises
/// `NameError`.
pub fn irb_reply(source: &str) -> Reply {
    let code = source.trim();
    if let Some(message) = code.strip_prefix("raise ") {
        return Reply::raise("RuntimeError", unquote(message));
    }
    if code.starts_with("sleep") {
        return Reply::Hang;
    }
    if let Some(arg) = code.strip_prefix("puts ") {
        return Reply::Printed(vec![unquote(arg).to_string()]);
    }
    if let Some(symbol) = code.strip_prefix(':') {
        return Reply::Value(format!("\"{symbol}\""));
    }
    if matches!(code, "nil" | "true" | "false")
        || code.parse::<i64>().is_ok()
        || code.parse::<f64>().is_ok()
        || code.starts_with('[')
        || code.starts_with('{')
        || (code.len() >= 2 && code.starts_with('"') && code.ends_with('"'))
    {
        return Reply::Value(code.to_string());
    }
    if let Some((a, b)) = code.split_once('+') {
        if let (Ok(a), Ok(b)) = (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
            return Reply::Value((a + b).to_string());
        }
    }
    Reply::raise(
        "NameError",
        &format!("undefined local variable or method `{code}' for main:Object"),
    )
}

fn unquote(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .or_else(|| text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
        .unwrap_or(text)
}
