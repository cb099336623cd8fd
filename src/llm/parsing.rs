//! Model Output Parsing
//!
//! Models wrap JSON in prose, markdown fences or reasoning blocks. Parsing is
//! deliberately forgiving about the wrapper and strict about the payload:
//! the first well-formed array or object literal in the text is taken, and
//! anything that is not recognisably a list of anomalies is an error.

use serde_json::{Map, Value};

use crate::acquisition::TimestampResolver;
use crate::config::defaults::{AI_MISSING_EXPLANATION, AI_UNKNOWN_KIND};
use crate::types::{Anomaly, AnomalySource, Severity};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("no JSON literal found in model output")]
    NoJson,
    #[error("model output is JSON but not an anomaly list")]
    UnexpectedShape,
}

/// Extract raw anomaly objects from model text.
pub fn parse_model_output(text: &str) -> Result<Vec<Map<String, Value>>, ParseError> {
    let cleaned = strip_code_fences(&strip_think_tags(text));
    let value = extract_first_json(&cleaned).ok_or(ParseError::NoJson)?;

    match value {
        Value::Array(items) => Ok(objects_only(items)),
        Value::Object(mut obj) => {
            if let Some(Value::Array(items)) = obj.remove("anomalies") {
                return Ok(objects_only(items));
            }
            if ["type", "kind", "severity"].iter().any(|k| obj.contains_key(*k)) {
                return Ok(vec![obj]);
            }
            Err(ParseError::UnexpectedShape)
        }
        _ => Err(ParseError::UnexpectedShape),
    }
}

fn objects_only(items: Vec<Value>) -> Vec<Map<String, Value>> {
    items
        .into_iter()
        .filter_map(|v| match v {
            Value::Object(obj) => Some(obj),
            _ => None,
        })
        .collect()
}

/// Map raw model objects onto anomalies. Each gets a fresh id; missing
/// timestamps fall back to `invocation_ms`.
pub fn normalize_anomalies(
    raw: Vec<Map<String, Value>>,
    resolver: &TimestampResolver,
    invocation_ms: i64,
) -> Vec<Anomaly> {
    raw.into_iter()
        .map(|obj| {
            let kind = text_field(&obj, &["type", "kind"]).unwrap_or_else(|| AI_UNKNOWN_KIND.to_string());
            let severity = obj
                .get("severity")
                .and_then(Value::as_str)
                .map_or(Severity::Info, Severity::from_loose);
            let explanation =
                text_field(&obj, &["explanation"]).unwrap_or_else(|| AI_MISSING_EXPLANATION.to_string());
            let timestamp_ms = match obj.get("timestamp") {
                Some(ts) if !is_blank(ts) => resolver.resolve_value(ts),
                _ => invocation_ms,
            };
            Anomaly::new(kind, severity, explanation, timestamp_ms, AnomalySource::Ai)
        })
        .collect()
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// First non-empty field among `names`, rendered as text.
fn text_field(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match obj.get(*name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

const THINK_CLOSE: &[u8] = b"</think>";

/// Drop `<think>...</think>` reasoning blocks emitted by reasoning models.
///
/// The tag is matched ASCII case-insensitively on raw bytes so the offset
/// always indexes `text` itself and lands on a char boundary.
fn strip_think_tags(text: &str) -> String {
    let close = text
        .as_bytes()
        .windows(THINK_CLOSE.len())
        .rposition(|w| w.eq_ignore_ascii_case(THINK_CLOSE));
    match close {
        Some(start) => text[start + THINK_CLOSE.len()..].to_string(),
        None => text.to_string(),
    }
}

/// Remove markdown fence markers (with or without a language tag).
fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Find the first balanced `[...]` or `{...}` that parses as JSON.
fn extract_first_json(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, c)| *c == '[' || *c == '{')
        .find_map(|(start, _)| {
            let end = matching_close(&text[start..])?;
            serde_json::from_str(&text[start..start + end]).ok()
        })
}

/// Byte length of the balanced literal at the start of `s`, honouring
/// string literals and escapes.
fn matching_close(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
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
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
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
    use crate::clock::ManualClock;
    use std::sync::Arc;

    const NOW: i64 = 1_750_000_000_000;

    fn resolver() -> TimestampResolver {
        TimestampResolver::new(Arc::new(ManualClock::new(NOW)))
    }

    fn parse_and_normalize(text: &str) -> Result<Vec<Anomaly>, ParseError> {
        Ok(normalize_anomalies(parse_model_output(text)?, &resolver(), NOW - 5))
    }

    #[test]
    fn test_fenced_array_with_uppercase_severity() {
        let text = "```json\n[{\"type\":\"Spike\",\"severity\":\"CRITICAL\"}]\n```";
        let out = parse_and_normalize(text).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, "Spike");
        assert_eq!(out[0].severity, Severity::Critical);
        assert_eq!(out[0].explanation, "No explanation provided");
        assert_eq!(out[0].timestamp_ms, NOW - 5);
        assert_eq!(out[0].source, AnomalySource::Ai);
        assert!(out[0].id.starts_with("ai-"));
    }

    #[test]
    fn test_prose_around_array() {
        let text = "Here are the anomalies I found: [{\"type\": \"Sag [minor]\", \"severity\": \"warning\", \"explanation\": \"dip to 190 V\", \"timestamp\": \"2025-03-14T09:26:53Z\"}] Hope this helps!";
        let out = parse_and_normalize(text).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, "Sag [minor]");
        assert_eq!(out[0].severity, Severity::Warning);
        assert_eq!(out[0].timestamp_ms, 1_741_944_413_000);
    }

    #[test]
    fn test_empty_array_is_no_anomalies() {
        assert!(parse_and_normalize("[]").unwrap().is_empty());
        assert!(parse_and_normalize("```\n[]\n```").unwrap().is_empty());
    }

    #[test]
    fn test_object_wrappers() {
        let wrapped = r#"{"anomalies": [{"kind": "Drift"}]}"#;
        let out = parse_and_normalize(wrapped).unwrap();
        assert_eq!(out[0].kind, "Drift");
        assert_eq!(out[0].severity, Severity::Info);

        let single = r#"{"type": "Flicker", "severity": "warning"}"#;
        assert_eq!(parse_and_normalize(single).unwrap().len(), 1);

        assert_eq!(
            parse_and_normalize(r#"{"status": "ok"}"#).unwrap_err(),
            ParseError::UnexpectedShape
        );
    }

    #[test]
    fn test_missing_kind_defaults() {
        let out = parse_and_normalize(r#"[{"severity": "weird"}, 7]"#).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, "AI: Unknown");
        assert_eq!(out[0].severity, Severity::Info);
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert_eq!(parse_and_normalize("no json here").unwrap_err(), ParseError::NoJson);
        assert_eq!(parse_and_normalize("[1, 2").unwrap_err(), ParseError::NoJson);
        assert_eq!(parse_and_normalize("42").unwrap_err(), ParseError::NoJson);
    }

    #[test]
    fn test_think_block_is_ignored() {
        let text = "<think>maybe [1,2]? no</think>\n[{\"type\": \"Real\"}]";
        let out = parse_and_normalize(text).unwrap();
        assert_eq!(out[0].kind, "Real");
    }

    #[test]
    fn test_think_close_after_case_changing_chars() {
        // Lowercasing changes the byte length of both characters
        assert_eq!(
            parse_model_output("\u{130}\u{130}</think>").unwrap_err(),
            ParseError::NoJson
        );
        let text = "<THINK>\u{212A}\u{130} ok</Think>[{\"type\": \"After\"}]";
        let out = parse_and_normalize(text).unwrap();
        assert_eq!(out[0].kind, "After");
    }

    #[test]
    fn test_skips_unbalanced_prefix() {
        let text = "values like [230, 231 were seen. Result: [{\"type\": \"X\"}]";
        // The first '[' never closes cleanly as JSON; the later literal wins
        let out = parse_and_normalize(text).unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_ids_are_fresh_per_anomaly() {
        let out = parse_and_normalize(r#"[{"type":"A"},{"type":"A"}]"#).unwrap();
        assert_ne!(out[0].id, out[1].id);
    }
}
