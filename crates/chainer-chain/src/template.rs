//! Sentinel substitution for step argument templates.
//!
//! A template positions the `CHAIN_RESULT` token where the previous step's
//! carry should land. How the carry is spliced depends on its shape: JSON
//! scalars go in unquoted, JSON-looking text goes in verbatim, and anything
//! else is inserted as a JSON string so the template still parses.

/// The exact sentinel token.
pub const SENTINEL: &str = "CHAIN_RESULT";

/// The sentinel surrounded by double quotes, replaced as a unit.
const QUOTED_SENTINEL: &str = "\"CHAIN_RESULT\"";

/// Placeholder used when checking that a template is valid-JSON-with-a-hole.
const PLACEHOLDER: &str = "\"__CR__\"";

/// The carry staged for substitution.
#[derive(Debug, Clone, PartialEq)]
pub enum Carry {
    /// Step 0: no carry, the template is used verbatim.
    None,
    /// A textual carry (tool output, or a re-encoded container).
    Text(String),
    /// A non-string scalar produced by input extraction.
    Value(serde_json::Value),
}

/// Check that a template parses as JSON once the sentinel is swapped for a
/// placeholder literal (the quoted form first, so `["CHAIN_RESULT"]` probes
/// as `["__CR__"]` and not as a double-quoted mess).
pub fn validate_template(template: &str) -> Result<(), serde_json::Error> {
    let probe = template
        .replace(QUOTED_SENTINEL, PLACEHOLDER)
        .replace(SENTINEL, PLACEHOLDER);
    serde_json::from_str::<serde_json::Value>(&probe).map(|_| ())
}

/// Splice the carry into the template. The result still has to parse as
/// JSON; the caller reports failures as substitution errors.
pub fn substitute(template: &str, carry: &Carry) -> String {
    match carry {
        Carry::None => template.to_string(),
        Carry::Value(v) => template.replace(SENTINEL, &v.to_string()),
        Carry::Text(s) => {
            if template.contains(QUOTED_SENTINEL) {
                // The carry is inserted raw between the quotes; a carry with
                // unescaped quotes breaks the template and surfaces as a
                // substitution error.
                template.replace(QUOTED_SENTINEL, &format!("\"{s}\""))
            } else if serde_json::from_str::<serde_json::Value>(s).is_ok() {
                // The carry already denotes a JSON value; splice it in as-is.
                template.replace(SENTINEL, s)
            } else {
                template.replace(SENTINEL, &serde_json::Value::String(s.clone()).to_string())
            }
        }
    }
}
