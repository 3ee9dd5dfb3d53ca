//! End-to-end request/reply behavior against a scripted console.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use replwire_core::{ErrorKind, ParsedValue, ReplwireConfig};
use replwire_detector::ConsoleState;
use replwire_session::testing::{Reply, ScriptedConsole};
use replwire_session::{ConsoleClient, RequestShape};

const FAST_CONFIG: &str = r#"
session:
  name: console
polling:
  initial_ms: 1
  multiplier: 2.0
  cap_ms: 5
readiness:
  timeout_ms: 2000
protocol:
  marker_grace_ms: 20
throttle:
  initial_rate: 500.0
  max_rate: 1000.0
"#;

fn connect(console: Arc<ScriptedConsole>) -> ConsoleClient {
    let config = ReplwireConfig::from_yaml(FAST_CONFIG).unwrap();
    config.validate().unwrap();
    ConsoleClient::with_transport(&config, console).unwrap()
}

fn eval(client: &ConsoleClient, code: &str) -> replwire_core::Result<ParsedValue> {
    client.evaluate_with_timeout(&RequestShape::expression(code), Duration::from_secs(3))
}

#[test]
fn integer_arithmetic() {
    let client = connect(ScriptedConsole::irb("console"));
    assert_eq!(eval(&client, "1+1").unwrap(), ParsedValue::Int(2));
}

#[test]
fn raised_exception_is_classified() {
    let client = connect(ScriptedConsole::irb("console"));
    let err = eval(&client, "raise \"boom\"").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::RemoteException));
    let classified = err.as_classified().unwrap();
    assert!(classified.message.contains("boom"));
    assert_eq!(classified.remote_class.as_deref(), Some("RuntimeError"));
}

#[test]
fn structured_text_becomes_array_of_objects() {
    let client = connect(ScriptedConsole::irb("console"));
    let code = r#"puts '[{"id":1,"name":"x"}]'"#;

    let mut row = BTreeMap::new();
    row.insert("id".to_string(), ParsedValue::Int(1));
    row.insert("name".to_string(), ParsedValue::Str("x".to_string()));
    let expected = ParsedValue::Array(vec![ParsedValue::Object(row)]);

    let printed = client
        .evaluate_with_timeout(&RequestShape::printed(code), Duration::from_secs(3))
        .unwrap();
    assert_eq!(printed, expected);

    // `puts` returns nil; the printed document still wins over the nil echo
    assert_eq!(eval(&client, code).unwrap(), expected);
}

#[test]
fn printed_nil_is_nil() {
    let console = ScriptedConsole::new("console", |_| Reply::Printed(vec!["nil".to_string()]));
    let client = connect(console.clone());
    let value = client
        .evaluate_with_timeout(&RequestShape::printed("puts nil.inspect"), Duration::from_secs(3))
        .unwrap();
    assert!(value.is_nil());
    assert!(console.typed_lines().iter().all(|line| !line.contains("puts '=> '")));
}

#[test]
fn printed_scalar_is_decoded() {
    let console = ScriptedConsole::new("console", |_| Reply::Printed(vec!["41".to_string()]));
    let client = connect(console);
    let value = client
        .evaluate_with_timeout(&RequestShape::printed("puts 41"), Duration::from_secs(3))
        .unwrap();
    assert_eq!(value, ParsedValue::Int(41));
}

#[test]
fn recovers_from_unterminated_string() {
    let console = ScriptedConsole::irb("console");
    let client = connect(console.clone());
    console.wedge_in_string(1);
    assert_eq!(client.state().unwrap(), ConsoleState::InMultilineString);

    let value = eval(&client, "\"ok\"").unwrap();
    assert_eq!(value, ParsedValue::Str("ok".to_string()));
    assert!(console.keys_pressed().contains(&"C-c".to_string()));
}

#[test]
fn error_word_in_output_is_not_an_exception() {
    let console = ScriptedConsole::new("console", |_| {
        Reply::Printed(vec!["error: 0 failures".to_string(), "[1, 2]".to_string()])
    });
    let client = connect(console);
    let expected = ParsedValue::Array(vec![ParsedValue::Int(1), ParsedValue::Int(2)]);

    let printed = client
        .evaluate_with_timeout(&RequestShape::printed("report"), Duration::from_secs(3))
        .unwrap();
    assert_eq!(printed, expected);
    assert_eq!(eval(&client, "report").unwrap(), expected);

    let statement = client
        .evaluate_with_timeout(&RequestShape::statement("report"), Duration::from_secs(3))
        .unwrap();
    assert!(statement.is_nil());
}

#[test]
fn repeated_requests_are_idempotent() {
    let console = ScriptedConsole::irb("console");
    let client = connect(console.clone());
    let first = eval(&client, "[3, 4]").unwrap();
    let second = eval(&client, "[3, 4]").unwrap();
    assert_eq!(first, second);
    assert_eq!(console.requests().len(), 2);
}

#[test]
fn stuck_console_fails_not_ready() {
    let console = ScriptedConsole::irb("console");
    let client = connect(console.clone());
    console.wedge_in_string(u32::MAX);
    let err = eval(&client, "1").unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::NotReady));
    assert!(console.requests().is_empty());
}

#[test]
fn hung_request_times_out_on_deadline() {
    let client = connect(ScriptedConsole::irb("console"));
    let started = Instant::now();
    let err = client
        .evaluate_with_timeout(&RequestShape::expression("sleep 30"), Duration::from_millis(200))
        .unwrap_err();
    assert_eq!(err.kind(), Some(ErrorKind::Timeout));
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn shapes_reach_the_console_wrapped() {
    let console = ScriptedConsole::new("console", |source| {
        if source.contains(".offset(") {
            Reply::Value(r#"[{"id":11},{"id":12}]"#.to_string())
        } else {
            Reply::Value("nil".to_string())
        }
    });
    let client = connect(console.clone());

    let page = client
        .evaluate(&RequestShape::CollectionPaginated {
            relation: "User.order(:id)".to_string(),
            offset: 10,
            limit: 2,
        })
        .unwrap();
    assert_eq!(page.as_array().map(|rows| rows.len()), Some(2));

    let missing = client
        .evaluate(&RequestShape::SingleRecord {
            code: "User.find_by(id: -1)".to_string(),
        })
        .unwrap();
    assert!(missing.is_nil());

    let sent = console.requests();
    assert!(sent[0].ends_with(".offset(10).limit(2).map(&:as_json)"));
    assert!(sent[1].ends_with(")&.as_json"));
}

#[test]
fn multiline_source_survives_one_line_submission() {
    let source = "total = 0\n[1, 2].each { |n| total += n }\n\"sum: #{total}\"";
    let console = ScriptedConsole::new("console", |code| {
        Reply::Value(format!("{:?}", code.lines().count()))
    });
    let client = connect(console.clone());
    assert_eq!(eval(&client, source).unwrap(), ParsedValue::Int(3));
    assert_eq!(console.requests(), vec![source.to_string()]);
    assert!(console.typed_lines().iter().all(|line| !line.contains('\n')));
}
