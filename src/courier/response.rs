//! Classification of provider HTTP responses.
//!
//! Misconfigured endpoints or credentials tend to come back as an HTML page
//! rather than JSON; those are reported as `MalformedResponse` so they are not
//! confused with a business rejection.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::CourierError;

const SNIPPET_LEN: usize = 120;

pub fn looks_like_markup(body: &str) -> bool {
    body.trim_start().starts_with('<')
}

pub fn snippet(body: &str) -> String {
    let flat: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(SNIPPET_LEN) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

/// Parses a successful body as `T`. A body that is not valid JSON for `T` is
/// a malformed response.
pub fn parse_success<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, CourierError> {
    serde_json::from_str(body).map_err(|_| CourierError::MalformedResponse { status: status.as_u16(), snippet: snippet(body) })
}

/// Turns a non-success response into the matching error.
pub fn classify_failure(status: StatusCode, body: &str) -> CourierError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            return CourierError::Authentication(error_message(&value).unwrap_or_else(|| format!("HTTP {status}")));
        }
    }
    if looks_like_markup(body) {
        return CourierError::MalformedResponse { status: status.as_u16(), snippet: snippet(body) };
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value) => CourierError::ProviderRejected(error_message(&value).unwrap_or_else(|| format!("HTTP {status}"))),
        Err(_) => CourierError::MalformedResponse { status: status.as_u16(), snippet: snippet(body) },
    }
}

/// Extracts a readable message from the error shapes couriers use:
/// `{"message": ..}`, `{"error": ..}` and `{"errors": {"field": ["msg"]}}`.
pub fn error_message(value: &Value) -> Option<String> {
    let mut parts = vec![];
    if let Some(m) = value.get("message").and_then(Value::as_str) { parts.push(m.to_string()); }
    else if let Some(m) = value.get("error").and_then(Value::as_str) { parts.push(m.to_string()); }
    if let Some(errors) = value.get("errors").and_then(Value::as_object) {
        for (field, detail) in errors {
            let text = match detail {
                Value::Array(items) => items.iter().filter_map(Value::as_str).collect::<Vec<_>>().join(", "),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            parts.push(format!("{field}: {text}"));
        }
    }
    if parts.is_empty() { None } else { Some(parts.join("; ")) }
}
