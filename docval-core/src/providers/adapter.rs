//! Backend contract and descriptors
//!
//! Defines the capability contract every AI backend implements, the static
//! descriptor a backend advertises, and the task request/output envelopes
//! the orchestration layer passes around.

use crate::certification::CertificationLevel;
use crate::http::RequestOptions;
use crate::protocol::types::{duration_millis, TaskType};
use crate::protocol::{
    CompressedContext, ErrorInterpretation, ParsedInstruction, TutorialContext, ValidationResult,
};
use crate::providers::error::BackendResult;
use crate::usage::{PerformanceMetrics, UsageStats};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bound on one health check, independent of any caller deadline
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Capability contract all AI backends must implement
///
/// A backend that cannot perform an operation returns
/// [`BackendError::Unsupported`](crate::providers::BackendError::Unsupported)
/// instead of failing the caller.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Unique backend name
    fn name(&self) -> &str;

    /// Understand a tutorial instruction
    async fn parse_instruction(
        &self,
        options: &RequestOptions,
        context: &TutorialContext,
        instruction: &str,
    ) -> BackendResult<ParsedInstruction>;

    /// Compare expected and actual output semantically
    async fn validate_expectation(
        &self,
        options: &RequestOptions,
        context: &TutorialContext,
        expected: &str,
        actual: &str,
    ) -> BackendResult<ValidationResult>;

    /// Summarize the execution state
    async fn compress_context(
        &self,
        options: &RequestOptions,
        context: &TutorialContext,
    ) -> BackendResult<CompressedContext>;

    /// Diagnose an error message
    async fn interpret_error(
        &self,
        options: &RequestOptions,
        context: &TutorialContext,
        error_message: &str,
    ) -> BackendResult<ErrorInterpretation>;

    /// Static descriptor; never touches the network
    fn capabilities(&self) -> &BackendDescriptor;

    /// Estimated tokens and cost of a request; a pure function of its size
    fn cost_estimate(&self, request: &TaskRequest<'_>) -> CostEstimate {
        CostEstimate::for_request(request, &self.capabilities().cost)
    }

    /// Rolling performance figures from the backend's own usage tracker
    fn performance_metrics(&self) -> PerformanceMetrics;

    /// One minimal network round-trip
    async fn health_check(&self) -> BackendResult<()>;

    /// Request, token and spend counters
    fn usage_stats(&self) -> UsageStats;

    /// Deterministic local answer for trivially structured requests
    fn fast_path(&self, request: &TaskRequest<'_>) -> Option<TaskOutput> {
        crate::rules::fast_path(request)
    }
}

/// Pricing of a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Price per input token
    pub input_per_token: f64,
    /// Price per output token
    pub output_per_token: f64,
    pub currency: String,
}

impl CostModel {
    pub fn new(input_per_token: f64, output_per_token: f64) -> Self {
        Self {
            input_per_token,
            output_per_token,
            currency: "USD".to_string(),
        }
    }

    /// Build from per-1K-token prices
    pub fn per_1k(input: f64, output: f64) -> Self {
        Self::new(input / 1000.0, output / 1000.0)
    }

    /// A backend that costs nothing to call
    pub fn free() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn is_free(&self) -> bool {
        self.input_per_token <= 0.0 && self.output_per_token <= 0.0
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 * self.input_per_token + output_tokens as f64 * self.output_per_token
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::free()
    }
}

/// Latency percentiles of a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyProfile {
    #[serde(with = "duration_millis")]
    pub p50: Duration,
    #[serde(with = "duration_millis")]
    pub p95: Duration,
    #[serde(with = "duration_millis")]
    pub p99: Duration,
}

impl LatencyProfile {
    pub fn new(p50: Duration, p95: Duration, p99: Duration) -> Self {
        Self { p50, p95, p99 }
    }
}

impl Default for LatencyProfile {
    fn default() -> Self {
        Self {
            p50: Duration::from_secs(2),
            p95: Duration::from_secs(5),
            p99: Duration::from_secs(10),
        }
    }
}

/// What a backend is and what it can do
///
/// `quality_score` and `certification` are filled in by the registry when
/// the backend is certified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub name: String,
    pub version: String,
    pub max_context_tokens: usize,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
    pub cost: CostModel,
    pub latency: LatencyProfile,
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub certification: Option<CertificationLevel>,
    /// Runs without sending data off the host
    #[serde(default)]
    pub offline: bool,
    /// Enterprise-grade deployment (data agreements, SLAs)
    #[serde(default)]
    pub enterprise: bool,
    #[serde(default)]
    pub region: Option<String>,
}

impl BackendDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            max_context_tokens: 8192,
            languages: vec!["en".to_string()],
            features: Vec::new(),
            cost: CostModel::default(),
            latency: LatencyProfile::default(),
            quality_score: 0.0,
            certification: None,
            offline: false,
            enterprise: false,
            region: None,
        }
    }

    pub fn with_cost(mut self, cost: CostModel) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_latency(mut self, latency: LatencyProfile) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_max_context(mut self, tokens: usize) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.push(feature.into());
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn enterprise(mut self, enterprise: bool) -> Self {
        self.enterprise = enterprise;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// Estimated size and price of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub currency: String,
}

impl CostEstimate {
    /// Estimate a request against a cost model
    pub fn for_request(request: &TaskRequest<'_>, model: &CostModel) -> Self {
        let input_tokens = estimate_input_tokens(request);
        let output_tokens = expected_output_tokens(request.task_type());
        Self {
            input_tokens,
            output_tokens,
            cost: model.cost(input_tokens, output_tokens),
            currency: model.currency.clone(),
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Fixed prompt overhead (instructions + schema) per task
fn prompt_overhead_tokens(task: TaskType) -> u64 {
    match task {
        TaskType::ParseInstruction => 350,
        TaskType::ValidateExpectation => 250,
        TaskType::CompressContext => 150,
        TaskType::InterpretError => 300,
    }
}

/// Output budget requested per task
pub fn expected_output_tokens(task: TaskType) -> u64 {
    match task {
        TaskType::ParseInstruction => 800,
        TaskType::ValidateExpectation => 400,
        TaskType::CompressContext => 300,
        TaskType::InterpretError => 700,
    }
}

/// Roughly four characters per token
pub fn estimate_input_tokens(request: &TaskRequest<'_>) -> u64 {
    let chars = request.input_chars() as u64;
    chars.div_ceil(4) + prompt_overhead_tokens(request.task_type())
}

/// One AI task with its inputs
#[derive(Debug, Clone, Copy)]
pub enum TaskRequest<'a> {
    ParseInstruction {
        context: &'a TutorialContext,
        instruction: &'a str,
    },
    ValidateExpectation {
        context: &'a TutorialContext,
        expected: &'a str,
        actual: &'a str,
    },
    CompressContext {
        context: &'a TutorialContext,
    },
    InterpretError {
        context: &'a TutorialContext,
        error_message: &'a str,
    },
}

impl<'a> TaskRequest<'a> {
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::ParseInstruction { .. } => TaskType::ParseInstruction,
            Self::ValidateExpectation { .. } => TaskType::ValidateExpectation,
            Self::CompressContext { .. } => TaskType::CompressContext,
            Self::InterpretError { .. } => TaskType::InterpretError,
        }
    }

    pub fn context(&self) -> &'a TutorialContext {
        match self {
            Self::ParseInstruction { context, .. }
            | Self::ValidateExpectation { context, .. }
            | Self::CompressContext { context }
            | Self::InterpretError { context, .. } => context,
        }
    }

    /// Text content that identifies the request (excluding context)
    pub fn content(&self) -> Vec<&'a str> {
        match self {
            Self::ParseInstruction { instruction, .. } => vec![instruction],
            Self::ValidateExpectation { expected, actual, .. } => vec![expected, actual],
            Self::CompressContext { .. } => Vec::new(),
            Self::InterpretError { error_message, .. } => vec![error_message],
        }
    }

    /// Characters a prompt for this request will carry
    pub fn input_chars(&self) -> usize {
        let context = self.context();
        let context_chars = context.working_directory.len()
            + context.created_files.iter().map(String::len).sum::<usize>()
            + context.executed_commands.iter().map(String::len).sum::<usize>();
        let content_chars: usize = self.content().iter().map(|s| s.len()).sum();
        match self {
            // Compression reads the whole history
            Self::CompressContext { .. } => {
                context_chars + context.previous_outputs.iter().map(String::len).sum::<usize>()
            }
            _ => context_chars + content_chars,
        }
    }
}

/// Output of one AI task, as stored in the response cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "result", rename_all = "snake_case")]
pub enum TaskOutput {
    ParsedInstruction(ParsedInstruction),
    Validation(ValidationResult),
    CompressedContext(CompressedContext),
    ErrorInterpretation(ErrorInterpretation),
}

impl TaskOutput {
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::ParsedInstruction(_) => TaskType::ParseInstruction,
            Self::Validation(_) => TaskType::ValidateExpectation,
            Self::CompressedContext(_) => TaskType::CompressContext,
            Self::ErrorInterpretation(_) => TaskType::InterpretError,
        }
    }

    /// Confidence reported by the result, where one exists
    pub fn confidence(&self) -> Option<f64> {
        match self {
            Self::ParsedInstruction(p) => Some(p.confidence),
            Self::Validation(v) => Some(v.confidence),
            Self::CompressedContext(_) => None,
            Self::ErrorInterpretation(e) => Some(e.confidence),
        }
    }
}

/// Run one task request against a backend
pub async fn dispatch(
    backend: &dyn Backend,
    request: &TaskRequest<'_>,
    options: &RequestOptions,
) -> BackendResult<TaskOutput> {
    match *request {
        TaskRequest::ParseInstruction {
            context,
            instruction,
        } => backend
            .parse_instruction(options, context, instruction)
            .await
            .map(TaskOutput::ParsedInstruction),
        TaskRequest::ValidateExpectation {
            context,
            expected,
            actual,
        } => backend
            .validate_expectation(options, context, expected, actual)
            .await
            .map(TaskOutput::Validation),
        TaskRequest::CompressContext { context } => backend
            .compress_context(options, context)
            .await
            .map(TaskOutput::CompressedContext),
        TaskRequest::InterpretError {
            context,
            error_message,
        } => backend
            .interpret_error(options, context, error_message)
            .await
            .map(TaskOutput::ErrorInterpretation),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_estimate_is_pure() {
        let context = TutorialContext::new("/tmp");
        let request = TaskRequest::ParseInstruction {
            context: &context,
            instruction: "create a file named notes.txt",
        };
        let model = CostModel::per_1k(0.5, 1.5);

        let a = CostEstimate::for_request(&request, &model);
        let b = CostEstimate::for_request(&request, &model);
        assert_eq!(a, b);
        assert_eq!(a.output_tokens, 800);
        assert!(a.cost > 0.0);
    }

    #[test]
    fn test_free_model_costs_nothing() {
        let context = TutorialContext::default();
        let request = TaskRequest::CompressContext { context: &context };
        let estimate = CostEstimate::for_request(&request, &CostModel::free());
        assert_eq!(estimate.cost, 0.0);
        assert!(estimate.total_tokens() > 0);
    }

    #[test]
    fn test_input_tokens_grow_with_content() {
        let context = TutorialContext::new("/tmp");
        let short = TaskRequest::InterpretError {
            context: &context,
            error_message: "oops",
        };
        let long_message = "x".repeat(4000);
        let long = TaskRequest::InterpretError {
            context: &context,
            error_message: &long_message,
        };
        assert!(estimate_input_tokens(&long) >= estimate_input_tokens(&short) + 999);
    }

    #[test]
    fn test_task_output_round_trips_with_tag() {
        let output = TaskOutput::Validation(ValidationResult::new(true, 0.8));
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["task"], "validation");
        let back: TaskOutput = serde_json::from_value(value).unwrap();
        assert_eq!(back.task_type(), TaskType::ValidateExpectation);
    }
}
