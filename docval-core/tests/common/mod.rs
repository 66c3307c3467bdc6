//! Shared test backends and builders
#![allow(dead_code)]

use async_trait::async_trait;
use docval_core::certification::{CategoryScores, StaticCertifier};
use docval_core::http::RequestOptions;
use docval_core::protocol::{
    Action, CompressedContext, ErrorCategory, ErrorInterpretation, ParsedInstruction, Solution,
    TutorialContext, ValidationResult,
};
use docval_core::providers::{
    Backend, BackendDescriptor, BackendError, BackendResult, CostModel, LatencyProfile,
};
use docval_core::usage::{PerformanceMetrics, UsageStats};
use docval_core::client::ClientSettings;
use docval_core::{BackendRegistry, ResilientClient, ResponseCache, Router};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Backend whose answers and failures are set by the test
pub struct ScriptedBackend {
    descriptor: BackendDescriptor,
    failure: Mutex<Option<BackendError>>,
    /// Failures left before answering; `u32::MAX` means always
    failures_left: AtomicU32,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl ScriptedBackend {
    /// A healthy paid cloud backend
    pub fn new(name: &str) -> Self {
        Self {
            descriptor: BackendDescriptor::new(name, "1")
                .with_cost(CostModel::per_1k(0.01, 0.03))
                .with_latency(LatencyProfile::new(
                    Duration::from_millis(500),
                    Duration::from_millis(1500),
                    Duration::from_millis(3000),
                )),
            failure: Mutex::new(None),
            failures_left: AtomicU32::new(0),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Free and local
    pub fn offline(name: &str) -> Self {
        let mut backend = Self::new(name);
        backend.descriptor = backend.descriptor.with_cost(CostModel::free()).offline(true);
        backend
    }

    pub fn always_failing(self, error: BackendError) -> Self {
        self.failing_times(u32::MAX, error)
    }

    pub fn failing_times(self, times: u32, error: BackendError) -> Self {
        *self.failure.lock().unwrap() = Some(error);
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_cost(mut self, cost: CostModel) -> Self {
        self.descriptor = self.descriptor.with_cost(cost);
        self
    }

    pub fn with_latency(mut self, latency: LatencyProfile) -> Self {
        self.descriptor = self.descriptor.with_latency(latency);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn answer(&self) -> BackendResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            if left != u32::MAX {
                self.failures_left.store(left - 1, Ordering::SeqCst);
            }
            if let Some(error) = self.failure.lock().unwrap().clone() {
                return Err(error);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    async fn parse_instruction(
        &self,
        _options: &RequestOptions,
        _context: &TutorialContext,
        instruction: &str,
    ) -> BackendResult<ParsedInstruction> {
        self.answer().await?;
        Ok(ParsedInstruction::new(instruction, format!("answered by {}", self.name()))
            .with_action(Action::command("echo ok"))
            .with_confidence(0.9))
    }

    async fn validate_expectation(
        &self,
        _options: &RequestOptions,
        _context: &TutorialContext,
        expected: &str,
        actual: &str,
    ) -> BackendResult<ValidationResult> {
        self.answer().await?;
        Ok(ValidationResult::new(expected == actual, 0.9)
            .with_reasoning(format!("answered by {}", self.name())))
    }

    async fn compress_context(
        &self,
        _options: &RequestOptions,
        context: &TutorialContext,
    ) -> BackendResult<CompressedContext> {
        self.answer().await?;
        Ok(CompressedContext {
            summary: format!("answered by {}", self.name()),
            key_files: Vec::new(),
            current_state: String::new(),
        }
        .retain_critical(context))
    }

    async fn interpret_error(
        &self,
        _options: &RequestOptions,
        _context: &TutorialContext,
        _error_message: &str,
    ) -> BackendResult<ErrorInterpretation> {
        self.answer().await?;
        Ok(ErrorInterpretation::new(
            ErrorCategory::MissingDependency,
            format!("answered by {}", self.name()),
            0.9,
        )
        .with_solution(Solution::new("install it", vec!["apt install foo".into()], 0.8)))
    }

    fn capabilities(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn performance_metrics(&self) -> PerformanceMetrics {
        PerformanceMetrics::default()
    }

    async fn health_check(&self) -> BackendResult<()> {
        Ok(())
    }

    fn usage_stats(&self) -> UsageStats {
        UsageStats::default()
    }
}

/// Certifies every backend at gold
pub fn gold_certifier() -> Arc<StaticCertifier> {
    Arc::new(StaticCertifier::uniform(
        CategoryScores::uniform(0.95),
        Duration::from_millis(500),
    ))
}

/// Route client logs to the test harness; `RUST_LOG=docval_core=debug` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn registry_with(backends: &[Arc<ScriptedBackend>]) -> Arc<BackendRegistry> {
    init_tracing();
    let registry = Arc::new(BackendRegistry::new(gold_certifier(), Router::new()));
    for backend in backends {
        registry.register(backend.clone()).await.unwrap();
    }
    registry
}

pub async fn client_with(
    backends: &[Arc<ScriptedBackend>],
    settings: ClientSettings,
) -> ResilientClient {
    let registry = registry_with(backends).await;
    ResilientClient::new(registry, Arc::new(ResponseCache::new()), settings)
}

pub fn context() -> TutorialContext {
    TutorialContext::new("/home/user/project")
        .with_step(2, 5)
        .with_file("notes.txt")
}
