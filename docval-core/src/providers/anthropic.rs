//! Anthropic vendor implementation
//!
//! Implements the messages API. System prompts travel in a top-level
//! `system` field rather than as a message.

use crate::providers::error::{BackendError, BackendResult};
use crate::providers::vendor::{Completion, CompletionRequest, Vendor};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

/// Anthropic vendor implementation
pub struct AnthropicVendor {
    base_url: String,
}

impl AnthropicVendor {
    /// Create a new Anthropic vendor
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

impl Default for AnthropicVendor {
    fn default() -> Self {
        Self::new(None)
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
}

impl Vendor for AnthropicVendor {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> &str {
        "/messages"
    }

    fn headers(&self, api_key: Option<&str>) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(api_key) = api_key {
            headers.insert("x-api-key".to_string(), api_key.to_string());
        }
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("anthropic-version".to_string(), API_VERSION.to_string());
        headers
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": request.model,
            "system": request.system,
            "messages": [
                { "role": "user", "content": request.prompt },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }

    fn decode(&self, body: Value) -> BackendResult<Completion> {
        let raw = body.to_string();
        let response: MessagesResponse = serde_json::from_value(body).map_err(|e| {
            BackendError::parse(format!("Unexpected Anthropic response: {}", e), raw.clone())
        })?;

        let text: String = response
            .content
            .into_iter()
            .filter(|block| block.block_type == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(BackendError::parse("Anthropic response has no text blocks", raw));
        }

        Ok(Completion {
            text,
            input_tokens: response.usage.as_ref().and_then(|u| u.input_tokens),
            output_tokens: response.usage.as_ref().and_then(|u| u.output_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_is_top_level() {
        let vendor = AnthropicVendor::default();
        let body = vendor.build_body(&CompletionRequest::new("claude", "rules", "question"));

        assert_eq!(body["system"], "rules");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_decode_joins_text_blocks() {
        let vendor = AnthropicVendor::default();
        let body = json!({
            "content": [
                { "type": "text", "text": "part one " },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "part two" }
            ],
            "usage": { "input_tokens": 40, "output_tokens": 9 }
        });
        let completion = vendor.decode(body).unwrap();
        assert_eq!(completion.text, "part one part two");
        assert_eq!(completion.input_tokens, Some(40));
    }

    #[test]
    fn test_headers_include_version() {
        let headers = AnthropicVendor::default().headers(Some("key"));
        assert_eq!(headers.get("x-api-key").unwrap(), "key");
        assert_eq!(headers.get("anthropic-version").unwrap(), API_VERSION);
    }
}
