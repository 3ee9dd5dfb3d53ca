//! Property-based tests for prompt classification and reply decoding.
//!
//! Uses proptest to generate random pane text and replies and verify the
//! detector and parser invariants.

use proptest::prelude::*;

use replwire_core::{ErrorKind, MarkerId, ParsedValue, RawExchange};
use replwire_detector::{ConsoleState, ConsoleStateDetector, OutputParser, StateClassifier};

/// Generate an irb prompt with a random line number and nesting level.
fn irb_prompt() -> impl Strategy<Value = String> {
    (1u32..1000, 0u32..4).prop_map(|(line, level)| format!("irb(main):{line:03}:{level}>"))
}

/// Generate arbitrary lines of console output (no prompts).
fn output_lines() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z0-9 =:,.()\\[\\]{}\"]{0,60}", 0..20)
}

fn exchange(text: &str) -> RawExchange {
    RawExchange::complete(MarkerId::from_token("prop").unwrap(), text)
}

proptest! {
    /// Classification never panics on arbitrary text.
    #[test]
    fn classify_never_panics(text in "\\PC{0,400}") {
        let _ = ConsoleStateDetector::new().classify(&text);
    }

    /// Output followed by a prompt and trailing blank lines is ready.
    #[test]
    fn prompt_after_output_is_ready(lines in output_lines(), prompt in irb_prompt(), blanks in 0usize..5) {
        let mut text = lines.join("\n");
        text.push('\n');
        text.push_str(&prompt);
        text.push_str(&"\n   ".repeat(blanks));
        prop_assert_eq!(ConsoleStateDetector::new().classify(&text), ConsoleState::Ready);
    }

    /// Parsing never panics; anything it cannot decode is a parse failure.
    #[test]
    fn parser_never_panics(text in "\\PC{0,300}") {
        let parser = OutputParser::new();
        match parser.parse(&exchange(&text)) {
            Ok(_) => {}
            Err(e) => prop_assert_eq!(e.kind(), Some(ErrorKind::ParseFailure)),
        }
    }

    /// Integer echoes decode to the same integer whatever precedes them.
    #[test]
    fn integer_echo_decodes(lines in output_lines(), n in any::<i64>()) {
        let mut text = lines.join("\n");
        text.push_str(&format!("\n=> {n}"));
        let value = OutputParser::new().parse(&exchange(&text)).unwrap();
        prop_assert_eq!(value, ParsedValue::Int(n));
    }

    /// Output without the error sentinel is never a remote exception, even
    /// when it is full of error-like words.
    #[test]
    fn error_words_are_not_exceptions(words in prop::collection::vec(
        prop_oneof![Just("error"), Just("Error:"), Just("raise"), Just("Exception"), Just("@@RW:ERROR:other@@")],
        1..10,
    )) {
        let text = format!("{}\n=> true", words.join(" "));
        let value = OutputParser::new().parse(&exchange(&text)).unwrap();
        prop_assert_eq!(value, ParsedValue::Bool(true));
    }
}
