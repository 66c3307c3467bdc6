//! Tolerant extraction of a structured payload from model output
//!
//! Vendors are asked for JSON but frequently wrap it in prose or markdown
//! fences. Responses are treated as untrusted text that should contain one
//! JSON object somewhere inside.

use crate::providers::error::{BackendError, BackendResult};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Locate the outermost JSON object in `text`
///
/// Tries the balanced object that starts at the first `{` (string-aware),
/// then the span from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;

    if let Some(end) = balanced_end(&text[start..]) {
        let candidate = &text[start..start + end];
        if serde_json::from_str::<Value>(candidate).is_ok() {
            return Some(candidate);
        }
    }

    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let candidate = &text[start..=end];
    serde_json::from_str::<Value>(candidate).ok().map(|_| candidate)
}

/// Byte length of the balanced `{...}` block at the start of `text`
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract and deserialize the structured payload from model output
pub fn parse_payload<T: DeserializeOwned>(text: &str) -> BackendResult<T> {
    let json = extract_json_object(text)
        .ok_or_else(|| BackendError::parse("No JSON object found in response", text))?;
    serde_json::from_str(json).map_err(|e| {
        BackendError::parse(format!("Payload does not match expected shape: {}", e), text)
    })
}
