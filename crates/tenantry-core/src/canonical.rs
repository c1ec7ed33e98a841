//! Canonical JSON serialisation.
//!
//! Two JSON values are structurally equal exactly when their canonical forms
//! are byte-identical. The canonical form:
//!
//! 1. Sorts object keys lexicographically (byte order)
//! 2. Emits no whitespace between tokens
//! 3. Escapes only `"`, `\` and control characters U+0000..=U+001F
//!
//! The composer uses it for deduplication and as a sort key; the index
//! normaliser uses it to compare attribute values.
//!
//! ```
//! use serde_json::json;
//! use tenantry_core::canonical::canonical_string;
//!
//! let value = json!({"z": 1, "a": [true, null]});
//! assert_eq!(canonical_string(&value), r#"{"a":[true,null],"z":1}"#);
//! ```

use std::fmt::Write as _;

use serde_json::{Map, Value};

/// Produces the canonical form of `value`.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    let mut output = String::new();
    emit_value(value, &mut output);
    output
}

/// Text used when a scalar attribute participates in a sort key.
///
/// Strings sort by their content, absent or null values sort as the empty
/// string, and anything else by its canonical form.
#[must_use]
pub fn sort_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => canonical_string(other),
    }
}

fn emit_value(value: &Value, output: &mut String) {
    match value {
        Value::Null => output.push_str("null"),
        Value::Bool(b) => output.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(output, "{n}");
        },
        Value::String(s) => emit_string(s, output),
        Value::Array(arr) => emit_array(arr, output),
        Value::Object(obj) => emit_object(obj, output),
    }
}

fn emit_string(s: &str, output: &mut String) {
    output.push('"');
    for c in s.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\u{0008}' => output.push_str("\\b"),
            '\u{000C}' => output.push_str("\\f"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if ('\u{0000}'..='\u{001F}').contains(&c) => {
                let _ = write!(output, "\\u{:04x}", c as u32);
            },
            c => output.push(c),
        }
    }
    output.push('"');
}

fn emit_array(arr: &[Value], output: &mut String) {
    output.push('[');
    for (i, item) in arr.iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_value(item, output);
    }
    output.push(']');
}

// Key order of `obj` is insertion order (serde_json `preserve_order`), so the
// keys are sorted here rather than relying on the map.
fn emit_object(obj: &Map<String, Value>, output: &mut String) {
    let mut sorted: Vec<(&String, &Value)> = obj.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    output.push('{');
    for (i, (key, value)) in sorted.into_iter().enumerate() {
        if i > 0 {
            output.push(',');
        }
        emit_string(key, output);
        output.push(':');
        emit_value(value, output);
    }
    output.push('}');
}
