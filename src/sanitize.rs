//! Terminal-safe rendering of untrusted text
//!
//! Anything that originates outside this process (API payloads, HTTP status
//! text, JWT claims, the stored client id) goes through here before it is
//! written to a terminal.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static ESCAPE_SEQUENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        // CSI, 7-bit and 8-bit introducers
        r"\x1b\[[0-?]*[ -/]*[@-~]",
        r"|\x{9b}[0-?]*[ -/]*[@-~]",
        // OSC, terminated by BEL or ST (or unterminated)
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)?",
        r"|\x{9d}[^\x07\x1b\x{9c}]*(?:\x07|\x1b\\|\x{9c})?",
        // Remaining two-byte escapes
        r"|\x1b[@-_]",
    ))
    .expect("escape sequence pattern is valid")
});

static CONTROL_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\x00-\x1f\x7f-\x{9f}]").expect("control character pattern is valid")
});

/// Strip ANSI escape sequences and C0/DEL/C1 control characters
pub fn strip_terminal_escapes(text: &str) -> String {
    let without_sequences = ESCAPE_SEQUENCES.replace_all(text, "");
    CONTROL_CHARS.replace_all(&without_sequences, "").into_owned()
}

/// Apply [`strip_terminal_escapes`] to every string value in a JSON tree
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(strip_terminal_escapes(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, sanitize_value(v)))
                .collect(),
        ),
        other => other,
    }
}
