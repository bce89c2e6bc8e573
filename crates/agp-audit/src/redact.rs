// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recursive secret-key redaction over `serde_json::Value`.

use regex::Regex;
use std::sync::LazyLock;

/// Matches metadata keys that plausibly carry secret material.
static SECRET_KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)access[_-]?token|refresh[_-]?token|password|secret|api[_-]?key|private[_-]?key|credential")
        .expect("static redaction pattern is valid")
});

const REDACTED: &str = "[redacted]";

/// Recursively walk `value`, replacing the value of any object key matching
/// [`SECRET_KEY_PATTERN`] with `"[redacted]"`. Arrays are preserved and their
/// elements recursed into; `serde_json::Value` cannot represent a circular
/// reference, so that case the distilled spec accounts for cannot occur here.
#[must_use]
pub fn redact_metadata(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if SECRET_KEY_PATTERN.is_match(&key) {
                    out.insert(key, serde_json::Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key, redact_metadata(val));
                }
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(redact_metadata).collect())
        }
        other => other,
    }
}

/// Truncate `text` to `max_len` characters and redact any secret-like
/// substring key=value pairs, for sanitized failure logging.
#[must_use]
pub fn sanitize_failure_text(text: &str, max_len: usize) -> String {
    let truncated: String = text.chars().take(max_len).collect();
    static KV_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"(?i)("?(?:access[_-]?token|refresh[_-]?token|password|secret|api[_-]?key|private[_-]?key|client_secret)"?\s*[:=]\s*)("?[^\s,"&}]+"?)"#)
            .expect("static sanitize pattern is valid")
    });
    KV_PATTERN
        .replace_all(&truncated, |caps: &regex::Captures<'_>| {
            format!("{}{REDACTED}", &caps[1])
        })
        .into_owned()
}
