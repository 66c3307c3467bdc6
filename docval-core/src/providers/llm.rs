//! LLM-backed implementation of the backend contract
//!
//! One engine serves every vendor: it renders the task prompt, sends it
//! through the vendor's wire adapter, decodes the structured payload and
//! records usage in its own tracker.

use crate::config::{BackendConfig, SecretString};
use crate::http::{HttpClient, RequestOptions};
use crate::protocol::{
    CompressedContext, ErrorInterpretation, ParsedInstruction, TaskType, TutorialContext,
    ValidationResult,
};
use crate::providers::adapter::{
    expected_output_tokens, Backend, BackendDescriptor, TaskOutput, TaskRequest,
    HEALTH_CHECK_TIMEOUT,
};
use crate::providers::error::{BackendError, BackendResult};
use crate::providers::prompts;
use crate::providers::rate_limit::RateLimitTracker;
use crate::providers::vendor::{CompletionRequest, Vendor};
use crate::usage::{PerformanceMetrics, UsageStats, UsageTracker};
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, warn};

/// A backend driven by a remote or local LLM
pub struct LlmBackend {
    vendor: Box<dyn Vendor>,
    http: HttpClient,
    api_key: Option<SecretString>,
    model: String,
    /// Cheaper model used for context compression
    fast_model: Option<String>,
    descriptor: BackendDescriptor,
    usage: UsageTracker,
    rate_limits: RateLimitTracker,
}

impl std::fmt::Debug for LlmBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmBackend")
            .field("name", &self.descriptor.name)
            .field("vendor", &self.vendor.name())
            .field("model", &self.model)
            .field("fast_model", &self.fast_model)
            .finish_non_exhaustive()
    }
}

impl LlmBackend {
    /// Create a backend; cloud vendors require an API key up front
    pub fn new(
        vendor: Box<dyn Vendor>,
        http: HttpClient,
        api_key: Option<SecretString>,
        model: impl Into<String>,
        mut descriptor: BackendDescriptor,
    ) -> BackendResult<Self> {
        let api_key = api_key.filter(|key| !key.is_empty());
        if vendor.requires_api_key() && api_key.is_none() {
            return Err(BackendError::MissingCredentials(descriptor.name.clone()));
        }
        if vendor.is_local() {
            descriptor.offline = true;
        }

        Ok(Self {
            vendor,
            http,
            api_key,
            model: model.into(),
            fast_model: None,
            descriptor,
            usage: UsageTracker::new(),
            rate_limits: RateLimitTracker::new(),
        })
    }

    /// Build from a configured backend entry
    pub fn from_config(config: &BackendConfig, http: HttpClient) -> BackendResult<Self> {
        let vendor = config.kind.create_vendor(config.base_url.clone());
        let backend = Self::new(
            vendor,
            http,
            config.api_key.clone(),
            config.model.clone(),
            config.descriptor(),
        )?;
        Ok(match &config.fast_model {
            Some(fast_model) => backend.with_fast_model(fast_model.clone()),
            None => backend,
        })
    }

    pub fn with_fast_model(mut self, model: impl Into<String>) -> Self {
        self.fast_model = Some(model.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn rate_limits(&self) -> &RateLimitTracker {
        &self.rate_limits
    }

    fn model_for(&self, task: TaskType) -> &str {
        match (task, &self.fast_model) {
            (TaskType::CompressContext, Some(fast_model)) => fast_model,
            _ => &self.model,
        }
    }

    async fn run(
        &self,
        options: &RequestOptions,
        request: &TaskRequest<'_>,
    ) -> BackendResult<TaskOutput> {
        let name = self.descriptor.name.as_str();
        self.rate_limits.check()?;

        let task = request.task_type();
        let (system, prompt) = prompts::build(request);
        let completion_request = CompletionRequest::new(self.model_for(task), system, prompt)
            .with_max_tokens(expected_output_tokens(task) as u32);

        let started = Instant::now();
        let response = self
            .http
            .execute_completion(
                self.vendor.as_ref(),
                self.api_key.as_ref(),
                &completion_request,
                options,
            )
            .await;
        let latency = started.elapsed();

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                self.usage.record_failure(name, latency);
                return Err(e);
            }
        };
        self.rate_limits.update_from_headers(&response.headers);

        match prompts::decode(request, &response.completion.text) {
            Ok(output) => {
                let estimate = self.cost_estimate(request);
                let completion = &response.completion;
                let input_tokens = completion.input_tokens.unwrap_or(estimate.input_tokens);
                let output_tokens = completion.output_tokens.unwrap_or(estimate.output_tokens);
                let cost = self.descriptor.cost.cost(input_tokens, output_tokens);
                let tokens = input_tokens + output_tokens;
                self.usage.record_success(name, tokens, cost, latency);
                crate::usage::report_metered(tokens, cost);
                debug!(
                    backend = name,
                    task = %task,
                    request_id = %options.request_id,
                    input_tokens,
                    output_tokens,
                    latency_ms = latency.as_millis() as u64,
                    "Backend call succeeded"
                );
                Ok(output)
            }
            Err(e) => {
                if let BackendError::Parse { message, raw } = &e {
                    warn!(
                        backend = name,
                        task = %task,
                        request_id = %options.request_id,
                        raw = %raw,
                        "Unparseable response: {}",
                        message
                    );
                }
                self.usage.record_failure(name, latency);
                Err(e)
            }
        }
    }
}

fn unexpected_output(expected: TaskType, got: &TaskOutput) -> BackendError {
    BackendError::Other(format!(
        "Expected {} output, got {}",
        expected,
        got.task_type()
    ))
}

#[async_trait]
impl Backend for LlmBackend {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    async fn parse_instruction(
        &self,
        options: &RequestOptions,
        context: &TutorialContext,
        instruction: &str,
    ) -> BackendResult<ParsedInstruction> {
        let request = TaskRequest::ParseInstruction {
            context,
            instruction,
        };
        match self.run(options, &request).await? {
            TaskOutput::ParsedInstruction(parsed) => Ok(parsed),
            other => Err(unexpected_output(TaskType::ParseInstruction, &other)),
        }
    }

    async fn validate_expectation(
        &self,
        options: &RequestOptions,
        context: &TutorialContext,
        expected: &str,
        actual: &str,
    ) -> BackendResult<ValidationResult> {
        let request = TaskRequest::ValidateExpectation {
            context,
            expected,
            actual,
        };
        match self.run(options, &request).await? {
            TaskOutput::Validation(result) => Ok(result),
            other => Err(unexpected_output(TaskType::ValidateExpectation, &other)),
        }
    }

    async fn compress_context(
        &self,
        options: &RequestOptions,
        context: &TutorialContext,
    ) -> BackendResult<CompressedContext> {
        let request = TaskRequest::CompressContext { context };
        match self.run(options, &request).await? {
            TaskOutput::CompressedContext(compressed) => Ok(compressed),
            other => Err(unexpected_output(TaskType::CompressContext, &other)),
        }
    }

    async fn interpret_error(
        &self,
        options: &RequestOptions,
        context: &TutorialContext,
        error_message: &str,
    ) -> BackendResult<ErrorInterpretation> {
        let request = TaskRequest::InterpretError {
            context,
            error_message,
        };
        match self.run(options, &request).await? {
            TaskOutput::ErrorInterpretation(interpretation) => Ok(interpretation),
            other => Err(unexpected_output(TaskType::InterpretError, &other)),
        }
    }

    fn capabilities(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn performance_metrics(&self) -> PerformanceMetrics {
        self.usage.metrics(&self.descriptor.name)
    }

    async fn health_check(&self) -> BackendResult<()> {
        let request = CompletionRequest::new(&self.model, "Reply with OK.", "ping")
            .with_max_tokens(1);
        let options = RequestOptions::default().with_timeout(HEALTH_CHECK_TIMEOUT);

        let call = self.http.execute_completion(
            self.vendor.as_ref(),
            self.api_key.as_ref(),
            &request,
            &options,
        );
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, call).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BackendError::Timeout),
        }
    }

    fn usage_stats(&self) -> UsageStats {
        self.usage.stats(&self.descriptor.name)
    }
}
