//! OpenAI vendor implementation
//!
//! Speaks the chat-completions protocol, which also covers the many
//! OpenAI-compatible gateways.

use crate::providers::error::{BackendError, BackendResult};
use crate::providers::vendor::{Completion, CompletionRequest, Vendor};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI vendor implementation
pub struct OpenAIVendor {
    base_url: String,
}

impl OpenAIVendor {
    /// Create a new OpenAI vendor
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

impl Default for OpenAIVendor {
    fn default() -> Self {
        Self::new(None)
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

impl Vendor for OpenAIVendor {
    fn name(&self) -> &str {
        "openai"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> &str {
        "/chat/completions"
    }

    fn headers(&self, api_key: Option<&str>) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(api_key) = api_key {
            headers.insert("Authorization".to_string(), format!("Bearer {}", api_key));
        }
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers
    }

    fn build_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": request.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.prompt },
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }

    fn decode(&self, body: Value) -> BackendResult<Completion> {
        let raw = body.to_string();
        let completion: ChatCompletion = serde_json::from_value(body)
            .map_err(|e| {
                BackendError::parse(format!("Unexpected OpenAI response: {}", e), raw.clone())
            })?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BackendError::parse("OpenAI response has no message content", raw))?;

        Ok(Completion {
            text,
            input_tokens: completion.usage.as_ref().and_then(|u| u.prompt_tokens),
            output_tokens: completion.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_carries_system_and_user_messages() {
        let vendor = OpenAIVendor::default();
        let request = CompletionRequest::new("gpt-4o-mini", "be terse", "hi").with_max_tokens(16);
        let body = vendor.build_body(&request);

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 16);
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn test_decode_reads_content_and_usage() {
        let vendor = OpenAIVendor::default();
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "hello" } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
        });
        let completion = vendor.decode(body).unwrap();
        assert_eq!(completion.text, "hello");
        assert_eq!(completion.input_tokens, Some(12));
        assert_eq!(completion.output_tokens, Some(3));
    }

    #[test]
    fn test_decode_without_choices_is_parse_error() {
        let vendor = OpenAIVendor::default();
        let err = vendor.decode(json!({ "choices": [] })).unwrap_err();
        assert!(matches!(err, BackendError::Parse { .. }));
    }

    #[test]
    fn test_headers_use_bearer_token() {
        let headers = OpenAIVendor::default().headers(Some("sk-test"));
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer sk-test");
    }
}
