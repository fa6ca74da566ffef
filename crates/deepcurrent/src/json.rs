//! Recovery of JSON values from free-form model output.
//!
//! Stages that ask a model for JSON get back fenced blocks, prose-wrapped
//! objects, trailing commas and the occasional missing comma. The parser
//! here works through a fixed ladder of strategies and only gives up after
//! all of them fail:
//!
//! 1. strip ```json / ``` fences
//! 2. cut to the widest `{ … }` span
//! 3. strict parse
//! 4. conservative repairs (trailing commas, missing inter-field commas)
//! 5. salvage the largest valid object substring
//!
//! Expected-key validation happens after recovery so callers get one
//! structured error carrying a 500-character diagnostic slice.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// How much of the original response an error keeps for diagnostics.
const DIAGNOSTIC_PREFIX: usize = 500;

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r#",(\s*[}\]])"#).unwrap()
});

static MISSING_COMMA: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r#"("\s*)\n(\s*"[^"]+"\s*:)"#).unwrap()
});

/// Failure to recover JSON from a model response.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum JsonRecoveryError {
    /// The response was empty or whitespace.
    #[error("empty response for {context}")]
    Empty {
        /// What was being parsed.
        context: String,
    },
    /// No strategy produced a JSON value.
    #[error("could not recover JSON for {context}: {detail}; response starts: {prefix:?}")]
    Unparseable {
        /// What was being parsed.
        context: String,
        /// The last parse failure.
        detail: String,
        /// First [`DIAGNOSTIC_PREFIX`] characters of the original text.
        prefix: String,
    },
    /// Recovery succeeded but required keys are absent.
    #[error("missing expected keys {missing:?} for {context}; got {present:?}")]
    MissingKeys {
        /// What was being parsed.
        context: String,
        /// Keys that were required but absent.
        missing: Vec<String>,
        /// Keys actually present.
        present: Vec<String>,
    },
}

fn diagnostic_prefix(text: &str) -> String {
    text.chars().take(DIAGNOSTIC_PREFIX).collect()
}

/// Strip markdown fences and cut to the widest top-level object span.
fn isolate_object(text: &str) -> String {
    let mut t = text.trim();

    if let Some(idx) = t.find("```json") {
        t = &t[idx + "```json".len()..];
        if let Some(end) = t.find("```") {
            t = &t[..end];
        }
    } else if let Some(idx) = t.find("```") {
        t = &t[idx + 3..];
        if let Some(end) = t.find("```") {
            t = &t[..end];
        }
    }
    let t = t.trim();

    match (t.find('{'), t.rfind('}')) {
        (Some(start), Some(end)) if start < end => t[start..=end].to_string(),
        _ => t.to_string(),
    }
}

/// Scan for balanced `{ … }` substrings and return the largest that parses.
fn salvage_largest_object(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut candidates: Vec<(usize, usize)> = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if *b == b'\\' {
                escaped = true;
            } else if *b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push(i),
            b'}' => {
                if let Some(start) = stack.pop() {
                    candidates.push((start, i));
                }
            }
            _ => {}
        }
    }

    candidates.sort_by_key(|(start, end)| std::cmp::Reverse(end - start));
    for (start, end) in candidates {
        if let Ok(v) = serde_json::from_str::<Value>(&text[start..=end]) {
            return Some(v);
        }
    }
    None
}

/// Recover a JSON object from a model response.
///
/// `context` names the caller for logs and error messages.
pub fn recover_json(response_text: &str, context: &str) -> Result<Value, JsonRecoveryError> {
    if response_text.trim().is_empty() {
        return Err(JsonRecoveryError::Empty {
            context: context.to_string(),
        });
    }

    let isolated = isolate_object(response_text);

    match serde_json::from_str::<Value>(&isolated) {
        Ok(v) => {
            debug!(context, "JSON parsed directly");
            return Ok(v);
        }
        Err(e) => debug!(context, error = %e, "direct JSON parse failed"),
    }

    let repaired = TRAILING_COMMA.replace_all(&isolated, "$1");
    let repaired = MISSING_COMMA.replace_all(&repaired, "$1,\n$2");
    let last_error = match serde_json::from_str::<Value>(&repaired) {
        Ok(v) => {
            debug!(context, "JSON parsed after comma repair");
            return Ok(v);
        }
        Err(e) => e.to_string(),
    };

    if let Some(v) = salvage_largest_object(&isolated) {
        warn!(context, "salvaged partial JSON object from response");
        return Ok(v);
    }

    Err(JsonRecoveryError::Unparseable {
        context: context.to_string(),
        detail: last_error,
        prefix: diagnostic_prefix(response_text),
    })
}

/// Recover a JSON object and require the given top-level keys.
pub fn extract_json(
    response_text: &str,
    context: &str,
    expected_keys: &[&str],
) -> Result<Value, JsonRecoveryError> {
    let value = recover_json(response_text, context)?;

    let missing: Vec<String> = expected_keys
        .iter()
        .filter(|k| value.get(**k).is_none())
        .map(ToString::to_string)
        .collect();

    if missing.is_empty() {
        Ok(value)
    } else {
        let present = match value.as_object() {
            Some(map) => map.keys().cloned().collect(),
            None => Vec::new(),
        };
        Err(JsonRecoveryError::MissingKeys {
            context: context.to_string(),
            missing,
            present,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str = r#"{"dimensions": ["History", "Applications"]}"#;

    #[test]
    fn parses_canonical_input() {
        let v = recover_json(CANONICAL, "test").unwrap();
        assert_eq!(v["dimensions"][0], "History");
    }

    #[test]
    fn strips_json_fences() {
        let wrapped = format!("Here you go:\n```json\n{CANONICAL}\n```\nHope that helps!");
        assert_eq!(
            recover_json(&wrapped, "test").unwrap(),
            recover_json(CANONICAL, "test").unwrap()
        );
    }

    #[test]
    fn strips_bare_fences() {
        let wrapped = format!("```\n{CANONICAL}\n```");
        assert_eq!(
            recover_json(&wrapped, "test").unwrap(),
            recover_json(CANONICAL, "test").unwrap()
        );
    }

    #[test]
    fn tolerates_surrounding_prose() {
        let wrapped = format!("Sure! The answer is {CANONICAL} as requested.");
        assert_eq!(
            recover_json(&wrapped, "test").unwrap(),
            recover_json(CANONICAL, "test").unwrap()
        );
    }

    #[test]
    fn repairs_trailing_commas() {
        let broken = r#"{"dimensions": ["History", "Applications",],}"#;
        let v = recover_json(broken, "test").unwrap();
        assert_eq!(v["dimensions"][1], "Applications");
    }

    #[test]
    fn repairs_missing_inter_field_comma() {
        let broken = "{\"a\": \"x\"\n\"b\": \"y\"}";
        let v = recover_json(broken, "test").unwrap();
        assert_eq!(v["b"], "y");
    }

    #[test]
    fn salvages_embedded_object() {
        let broken = r#"thinking... {"name": "ok", "n": 1} and then {garbage"#;
        let v = recover_json(broken, "test").unwrap();
        assert_eq!(v["name"], "ok");
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(
            recover_json("   \n", "test"),
            Err(JsonRecoveryError::Empty { .. })
        ));
    }

    #[test]
    fn unparseable_error_keeps_prefix() {
        let garbage = "not json at all, never will be";
        match recover_json(garbage, "test") {
            Err(JsonRecoveryError::Unparseable { prefix, .. }) => {
                assert!(prefix.starts_with("not json"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn expected_keys_validated() {
        match extract_json(CANONICAL, "test", &["dimensions", "aspects"]) {
            Err(JsonRecoveryError::MissingKeys { missing, .. }) => {
                assert_eq!(missing, vec!["aspects".to_string()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Any wrapping of a canonical object (fences, prose) recovers the
            // same value as parsing the canonical input.
            #[test]
            fn wrapped_equals_canonical(prefix in "[a-zA-Z .!]{0,40}", suffix in "[a-zA-Z .!]{0,40}") {
                // Suffix must not introduce braces; the alphabet above has none.
                let wrapped = format!("{prefix}\n```json\n{CANONICAL}\n```\n{suffix}");
                let canonical = recover_json(CANONICAL, "prop").unwrap();
                prop_assert_eq!(recover_json(&wrapped, "prop").unwrap(), canonical);
            }
        }
    }
}
