//! Ollama vendor implementation
//!
//! Local inference server. Needs no credentials and keeps all data on the
//! host, which makes it the backend of choice for offline-required work.

use crate::providers::error::{BackendError, BackendResult};
use crate::providers::vendor::{Completion, CompletionRequest, Vendor};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Ollama vendor implementation
pub struct OllamaVendor {
    base_url: String,
}

impl OllamaVendor {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

impl Default for OllamaVendor {
    fn default() -> Self {
        Self::new(None)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl Vendor for OllamaVendor {
    fn name(&self) -> &str {
        "ollama"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> &str {
        "/api/chat"
    }

    fn requires_api_key(&self) -> bool {
        false
    }

    fn is_local(&self) -> bool {
        true
    }

    fn headers(&self, _api_key: Option<&str>) -> HashMap<String, String> {
        let mut headers = HashMap::new();
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
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        })
    }

    fn decode(&self, body: Value) -> BackendResult<Completion> {
        let raw = body.to_string();
        let response: ChatResponse = serde_json::from_value(body)
            .map_err(|e| {
                BackendError::parse(format!("Unexpected Ollama response: {}", e), raw.clone())
            })?;

        let text = response
            .message
            .map(|m| m.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| BackendError::parse("Ollama response has no message", raw))?;

        Ok(Completion {
            text,
            input_tokens: response.prompt_eval_count,
            output_tokens: response.eval_count,
        })
    }
}
