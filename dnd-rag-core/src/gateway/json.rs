//! Defensive extraction of JSON payloads from model output.
//!
//! Models asked for structured output still wrap it in prose or markdown
//! fences often enough that the raw text cannot be handed to `serde_json`
//! directly. [`extract_json`] isolates the payload:
//!
//! 1. Code fence markers (` ``` ` and ` ```json `, any case) are stripped.
//!    A missing closing fence is harmless.
//! 2. Every `{` is a candidate start. From each one, a string-aware
//!    bracket scanner finds the matching close, so nested objects and
//!    brackets inside string literals are handled.
//! 3. The first object span that parses as JSON wins. Prose with stray
//!    brackets such as "I have [3] ideas" never shadows the payload.
//! 4. Only when no object parses are `[` starts tried, so a bare array
//!    reply still comes through.
//! 5. Without any parseable span, the first balanced span (or the cleaned
//!    text) is returned so the caller's parse error shows what was seen.

use super::GatewayError;
use serde::de::DeserializeOwned;

const FENCE: &str = "```";

/// Extract the most likely JSON payload from raw model output.
pub fn extract_json(raw: &str) -> String {
    let cleaned = strip_fences(raw);
    let cleaned = cleaned.trim();

    let mut first_balanced: Option<&str> = None;
    for open in ['{', '['] {
        if let Some(span) = first_parseable(cleaned, open, &mut first_balanced) {
            return span.to_string();
        }
    }

    first_balanced.unwrap_or(cleaned).to_string()
}

/// First balanced span starting at `open` that parses as JSON. Balanced
/// spans that fail to parse are remembered in `first_balanced`.
fn first_parseable<'a>(
    text: &'a str,
    open: char,
    first_balanced: &mut Option<&'a str>,
) -> Option<&'a str> {
    for (start, c) in text.char_indices() {
        if c != open {
            continue;
        }
        let Some(span) = balanced_span(&text[start..]) else {
            continue;
        };
        if serde_json::from_str::<serde_json::Value>(span).is_ok() {
            return Some(span);
        }
        first_balanced.get_or_insert(span);
    }
    None
}

/// Extract and deserialize a payload, mapping failures to [`GatewayError::SchemaParse`].
pub fn parse_payload<T: DeserializeOwned>(raw: &str) -> Result<T, GatewayError> {
    let payload = extract_json(raw);
    serde_json::from_str(&payload).map_err(|e| {
        tracing::debug!(raw, payload = %payload, "unparseable structured output");
        GatewayError::SchemaParse(e.to_string())
    })
}

fn strip_fences(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw.trim();

    while let Some(pos) = rest.find(FENCE) {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + FENCE.len()..];

        // Language tag directly after an opening fence.
        if rest.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json")) {
            rest = &rest[4..];
        }
        rest = rest.trim_start();
    }
    out.push_str(rest);
    out
}

/// Return the balanced bracket span starting at the first byte of `text`.
fn balanced_span(text: &str) -> Option<&str> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_payload_in_prose() {
        let raw = "Here are your options:\n```json {\"choice\": [\"a\",\"b\",\"c\"]} ```\nGood luck!";
        let payload = extract_json(raw);
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value, json!({"choice": ["a", "b", "c"]}));
    }

    #[test]
    fn test_missing_closing_fence() {
        let raw = "```JSON\n{\"name\": \"Aria\"}";
        assert_eq!(extract_json(raw), "{\"name\": \"Aria\"}");
    }

    #[test]
    fn test_nested_objects() {
        let raw = r#"Sure! {"name": "Bram", "stats": {"str": 14, "dex": {"base": 12}}, "items": []} Enjoy."#;
        let value: serde_json::Value = serde_json::from_str(&extract_json(raw)).unwrap();
        assert_eq!(value["stats"]["dex"]["base"], 12);
        assert_eq!(value["items"], json!([]));
    }

    #[test]
    fn test_braces_inside_strings() {
        let raw = r#"{"backstory": "She drew a } on the wall and a \"{\" too", "items": ["rope"]}"#;
        let value: serde_json::Value = serde_json::from_str(&extract_json(raw)).unwrap();
        assert_eq!(value["items"][0], "rope");
    }

    #[test]
    fn test_multiple_spans_first_valid_wins() {
        let raw = r#"Note [sic] the format: {"choice": ["x"]} and later {"choice": ["y"]}"#;
        assert_eq!(extract_json(raw), r#"{"choice": ["x"]}"#);
    }

    #[test]
    fn test_bracketed_prose_before_object() {
        let raw = "I have [3] ideas for you: ```json {\"choice\": [\"a\",\"b\",\"c\"]} ```";
        assert_eq!(extract_json(raw), "{\"choice\": [\"a\",\"b\",\"c\"]}");

        let raw = "No object this time, just [\"Run\", \"Hide\"]";
        assert_eq!(extract_json(raw), "[\"Run\", \"Hide\"]");
    }

    #[test]
    fn test_bare_array() {
        let raw = "Options: [\"Run\", \"Hide\", \"Fight\"]";
        assert_eq!(extract_json(raw), "[\"Run\", \"Hide\", \"Fight\"]");
    }

    #[test]
    fn test_no_json_returns_cleaned_text() {
        assert_eq!(extract_json("  ```\nno structure here\n```  "), "no structure here");
    }

    #[test]
    fn test_unbalanced_is_parse_error() {
        let result: Result<serde_json::Value, _> = parse_payload(r#"{"choice": ["a", "b""#);
        assert!(matches!(result, Err(GatewayError::SchemaParse(_))));
    }
}
