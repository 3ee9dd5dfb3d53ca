//! Console state classification from pane text.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use replwire_core::{Error, Result};

lazy_static! {
    /// `irb(main):001:0>`, `app(prod)>`, `[3] pry(main)>`, `>>`, `>`
    static ref READY_PROMPT: Regex =
        Regex::new(r"^(\[\d+\] )?[A-Za-z0-9_.:()\[\]-]{0,48}>{1,2}$").unwrap();

    /// `irb(main):002:1*`, `*`
    static ref CONTINUATION_PROMPT: Regex =
        Regex::new(r"^(\[\d+\] )?[A-Za-z0-9_.:()\[\]-]{0,48}\*$").unwrap();

    /// `irb(main):003:0"`, `irb(main):003'`
    static ref STRING_PROMPT: Regex =
        Regex::new(r#"^(\[\d+\] )?[A-Za-z0-9_.:()\[\]-]{1,48}["'`]$"#).unwrap();
}

/// Readiness of the console, derived from the last captured line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleState {
    /// At the top-level prompt, waiting for input
    Ready,
    /// Waiting for the rest of an unfinished expression
    AwaitingContinuation,
    /// Inside an unterminated string literal
    InMultilineString,
    /// Busy, or showing something unrecognized
    Unknown,
}

impl ConsoleState {
    /// Whether the console is wedged in partial input.
    pub fn is_wedged(&self) -> bool {
        matches!(
            self,
            ConsoleState::AwaitingContinuation | ConsoleState::InMultilineString
        )
    }
}

/// Classifies captured pane text.
pub trait StateClassifier: Send + Sync {
    /// Classify the pane text.
    fn classify(&self, pane_text: &str) -> ConsoleState;
}

/// Line-based prompt heuristics.
#[derive(Debug, Clone, Default)]
pub struct ConsoleStateDetector {
    extra_ready: Vec<Regex>,
}

impl ConsoleStateDetector {
    /// Create a detector with the built-in prompt shapes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add extra ready-prompt regexes.
    pub fn with_patterns(patterns: &[String]) -> Result<Self> {
        let extra_ready = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| Error::Config(format!("Invalid prompt pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { extra_ready })
    }

    /// Last non-blank line, trimmed.
    pub fn last_line(pane_text: &str) -> Option<&str> {
        pane_text
            .lines()
            .map(str::trim)
            .rev()
            .find(|line| !line.is_empty())
    }

    fn is_ready_prompt(&self, line: &str) -> bool {
        READY_PROMPT.is_match(line) || self.extra_ready.iter().any(|re| re.is_match(line))
    }
}

impl StateClassifier for ConsoleStateDetector {
    fn classify(&self, pane_text: &str) -> ConsoleState {
        let Some(line) = Self::last_line(pane_text) else {
            return ConsoleState::Unknown;
        };

        let state = if self.is_ready_prompt(line) {
            ConsoleState::Ready
        } else if CONTINUATION_PROMPT.is_match(line) {
            ConsoleState::AwaitingContinuation
        } else if STRING_PROMPT.is_match(line) || has_unmatched_quote(line) {
            ConsoleState::InMultilineString
        } else {
            ConsoleState::Unknown
        };

        debug!("Classified last line {:?} as {:?}", truncate(line, 60), state);
        state
    }
}

/// Whether a line leaves a `"` or `'` literal open.
///
/// Backslash-escaped quotes are skipped, and an apostrophe between two
/// alphanumerics (`don't`) is not a quote.
pub fn has_unmatched_quote(line: &str) -> bool {
    let chars: Vec<char> = line.chars().collect();
    let mut open: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '\\' {
            i += 2;
            continue;
        }
        match open {
            Some(quote) if ch == quote => open = None,
            Some(_) => {}
            None if ch == '"' => open = Some('"'),
            None if ch == '\'' => {
                let prev = i.checked_sub(1).map(|p| chars[p]);
                let next = chars.get(i + 1).copied();
                let contraction = prev.is_some_and(char::is_alphanumeric)
                    && next.is_some_and(char::is_alphanumeric);
                if !contraction {
                    open = Some('\'');
                }
            }
            None => {}
        }
        i += 1;
    }
    open.is_some()
}

fn truncate(line: &str, max: usize) -> String {
    line.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> ConsoleState {
        ConsoleStateDetector::new().classify(text)
    }

    #[test]
    fn test_ready_prompts() {
        assert_eq!(classify("irb(main):001:0> "), ConsoleState::Ready);
        assert_eq!(classify("irb(main):001>"), ConsoleState::Ready);
        assert_eq!(classify("myapp(production)>"), ConsoleState::Ready);
        assert_eq!(classify("[3] pry(main)>"), ConsoleState::Ready);
        assert_eq!(classify(">>"), ConsoleState::Ready);
        assert_eq!(classify(">"), ConsoleState::Ready);
    }

    #[test]
    fn test_ignores_blank_lines_and_whitespace() {
        let text = "=> 2\n   irb(main):002:0>   \n\n\n  \n";
        assert_eq!(classify(text), ConsoleState::Ready);
    }

    #[test]
    fn test_continuation() {
        assert_eq!(classify("irb(main):002:1*"), ConsoleState::AwaitingContinuation);
        assert_eq!(classify("*"), ConsoleState::AwaitingContinuation);
    }

    #[test]
    fn test_multiline_string() {
        assert_eq!(classify("irb(main):003:0\""), ConsoleState::InMultilineString);
        assert_eq!(
            classify("irb(main):001:0> puts \"unterminated"),
            ConsoleState::InMultilineString
        );
    }

    #[test]
    fn test_unknown() {
        assert_eq!(classify(""), ConsoleState::Unknown);
        assert_eq!(classify("   \n  \n"), ConsoleState::Unknown);
        assert_eq!(classify("Loading development environment"), ConsoleState::Unknown);
        assert_eq!(classify("=> #<User id: 1>"), ConsoleState::Unknown);
        assert_eq!(
            classify("irb(main):001:0> begin; puts 'x'; end"),
            ConsoleState::Unknown
        );
    }

    #[test]
    fn test_output_with_apostrophe_is_not_wedged() {
        assert_eq!(classify("it's done, don't panic"), ConsoleState::Unknown);
    }

    #[test]
    fn test_unmatched_quote() {
        assert!(has_unmatched_quote("puts \"abc"));
        assert!(has_unmatched_quote("x = 'abc"));
        assert!(!has_unmatched_quote("puts \"a\\\"b\""));
        assert!(!has_unmatched_quote("puts \"it's\""));
        assert!(!has_unmatched_quote("can't won't"));
    }

    #[test]
    fn test_extra_patterns() {
        let detector =
            ConsoleStateDetector::with_patterns(&["^legacy\\$ $".to_string(), "^ok#$".to_string()])
                .unwrap();
        assert_eq!(detector.classify("ok#"), ConsoleState::Ready);
        assert!(ConsoleStateDetector::with_patterns(&["(".to_string()]).is_err());
    }

    #[test]
    fn test_last_line() {
        assert_eq!(ConsoleStateDetector::last_line("a\n b \n\n"), Some("b"));
        assert_eq!(ConsoleStateDetector::last_line("\n\n"), None);
    }

    #[test]
    fn test_is_wedged() {
        assert!(ConsoleState::AwaitingContinuation.is_wedged());
        assert!(ConsoleState::InMultilineString.is_wedged());
        assert!(!ConsoleState::Ready.is_wedged());
        assert!(!ConsoleState::Unknown.is_wedged());
    }
}
