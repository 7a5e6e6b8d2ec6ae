//! JSON coercion and JSONPath extraction over step carries.
//!
//! Downstream servers return their payloads as text, often with JSON buried
//! under log prefixes or one-to-three layers of string escaping. Coercion
//! digs the JSON out; extraction applies a Goessner-style path and unwraps
//! singleton results.

use crate::template::Carry;
use serde_json::Value;
use serde_json_path::JsonPath;

/// Maximum escape layers [`deep_unescape`] will peel.
const MAX_UNESCAPE_DEPTH: u8 = 10;

/// Coerce a carry string into a JSON value.
///
/// Tries a straight parse; then a parse from the first `{` (dropping any log
/// prefix); then the same suffix after deep-unescaping. `None` means the
/// text has no recoverable JSON and the caller keeps it as-is.
pub fn coerce_to_json(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(text) {
        return Some(v);
    }
    let suffix = &text[text.find('{')?..];
    if let Ok(v) = serde_json::from_str(suffix) {
        return Some(v);
    }
    serde_json::from_str(&deep_unescape(suffix, 0)).ok()
}

/// Peel escape layers off a string that failed to parse as JSON.
///
/// First attempts to read the input as the body of a JSON string (internal
/// quotes escaped), which processes one layer of `\n`/`\\`-style escapes.
/// Failing that, strips one literal `\X` -> `X` layer and recurses, up to
/// [`MAX_UNESCAPE_DEPTH`], returning the input unchanged on exhaustion.
fn deep_unescape(s: &str, depth: u8) -> String {
    if depth >= MAX_UNESCAPE_DEPTH {
        return s.to_string();
    }
    let wrapped = format!("\"{}\"", s.replace('"', "\\\""));
    if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(&wrapped) {
        return inner;
    }
    if s.contains('\\') {
        return deep_unescape(&strip_one_escape_layer(s), depth + 1);
    }
    s.to_string()
}

/// Remove one layer of backslash escapes: every `\X` becomes `X`.
fn strip_one_escape_layer(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Apply a JSONPath and unwrap a one-element result to its element; any
/// other cardinality stays a JSON array.
fn query_unwrapped(path: &JsonPath, value: &Value) -> Value {
    let nodes = path.query(value).all();
    if nodes.len() == 1 {
        nodes[0].clone()
    } else {
        Value::Array(nodes.into_iter().cloned().collect())
    }
}

/// Input-side extraction: filter the carry before substitution.
///
/// If the carry has no recoverable JSON, extraction is skipped and the carry
/// passes through untouched. Scalars stay typed so they substitute unquoted;
/// containers re-encode to text.
pub fn extract_input(carry: &str, path: &JsonPath) -> Carry {
    let Some(parsed) = coerce_to_json(carry) else {
        return Carry::Text(carry.to_string());
    };
    match query_unwrapped(path, &parsed) {
        Value::String(s) => Carry::Text(s),
        v @ (Value::Array(_) | Value::Object(_)) => Carry::Text(v.to_string()),
        v => Carry::Value(v),
    }
}

/// Output-side extraction: filter a step's text before it becomes the carry.
///
/// The result is always JSON-encoded — scalars included — so the next step's
/// input extraction starts from a uniform representation.
pub fn extract_output(text: &str, path: &JsonPath) -> String {
    match coerce_to_json(text) {
        Some(parsed) => query_unwrapped(path, &parsed).to_string(),
        None => text.to_string(),
    }
}
