//! AI backends
//!
//! The [`Backend`] contract, its descriptor types, and the one concrete
//! implementation: [`LlmBackend`], which drives a chat-completion [`Vendor`]
//! over HTTP. Retry and rate-limit bookkeeping live here too.

pub mod adapter;
pub mod anthropic;
pub mod error;
pub mod extract;
pub mod llm;
pub mod ollama;
pub mod openai;
pub mod prompts;
pub mod rate_limit;
pub mod retry;
pub mod vendor;

pub use adapter::{
    Backend, BackendDescriptor, CostEstimate, CostModel, LatencyProfile, TaskOutput, TaskRequest,
    HEALTH_CHECK_TIMEOUT,
};
pub use error::{BackendError, BackendResult};
pub use llm::LlmBackend;
pub use rate_limit::{RateLimitInfo, RateLimitTracker};
pub use retry::{RetryExecutor, RetryPolicy, RetryResult};
pub use vendor::{Vendor, VendorKind};

// Re-export concrete vendors
pub use anthropic::AnthropicVendor;
pub use ollama::OllamaVendor;
pub use openai::OpenAIVendor;
