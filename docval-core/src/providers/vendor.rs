//! Vendor wire-protocol adapter trait
//!
//! A vendor knows how to address one LLM API: where to send a completion,
//! which headers it wants and how its request/response bodies look. The
//! task-level logic lives in [`crate::providers::LlmBackend`], which is
//! shared by every vendor.

use crate::providers::error::BackendResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Canonical single-turn completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(
        model: impl Into<String>,
        system: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: 1024,
            // Zero temperature keeps answers cacheable
            temperature: 0.0,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Canonical completion response
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Completion {
    pub text: String,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Wire-protocol adapter for one LLM vendor
pub trait Vendor: Send + Sync {
    /// Vendor name used in logs and errors
    fn name(&self) -> &str;

    /// Base URL for this vendor
    fn base_url(&self) -> &str;

    /// Endpoint path for completions
    fn endpoint(&self) -> &str;

    /// Whether calls need an API key
    fn requires_api_key(&self) -> bool {
        true
    }

    /// Whether the vendor runs on the local machine (no data leaves the host)
    fn is_local(&self) -> bool {
        false
    }

    /// Headers required for this vendor
    fn headers(&self, api_key: Option<&str>) -> HashMap<String, String>;

    /// Build the vendor-specific request body
    fn build_body(&self, request: &CompletionRequest) -> Value;

    /// Decode the vendor-specific response body
    fn decode(&self, body: Value) -> BackendResult<Completion>;
}

/// Supported vendor types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VendorKind {
    OpenAI,
    Anthropic,
    Ollama,
}

impl VendorKind {
    /// Create a vendor adapter, optionally overriding its base URL
    pub fn create_vendor(&self, base_url: Option<String>) -> Box<dyn Vendor> {
        match self {
            VendorKind::OpenAI => Box::new(crate::providers::OpenAIVendor::new(base_url)),
            VendorKind::Anthropic => Box::new(crate::providers::AnthropicVendor::new(base_url)),
            VendorKind::Ollama => Box::new(crate::providers::OllamaVendor::new(base_url)),
        }
    }

    /// Whether this vendor needs credentials
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, VendorKind::Ollama)
    }
}
