//! Resilient client
//!
//! The single entry point callers use for AI tasks. Each call runs the same
//! pipeline: response cache, budget guard, backend ranking, then the ranked
//! chain with per-backend retries. When every backend fails the caller gets
//! either a low-confidence rule-based result or an error, depending on
//! settings.

use crate::background::BackgroundTask;
use crate::cache::{CacheKey, CachePolicy, CacheStats, DiskTier, ResponseCache};
use crate::certification::{BenchmarkSuite, Certifier};
use crate::config::{ConfigError, DocvalConfig, SafeLogging};
use crate::http::{HttpClient, RequestOptions};
use crate::protocol::{
    CompressedContext, ErrorInterpretation, ParsedInstruction, TaskType, TutorialContext,
    ValidationResult,
};
use crate::providers::adapter::{dispatch, estimate_input_tokens, expected_output_tokens};
use crate::providers::{
    Backend, BackendDescriptor, BackendError, LlmBackend, RetryExecutor, RetryPolicy, TaskOutput,
    TaskRequest,
};
use crate::registry::{BackendRegistry, RegisteredBackend, RegistryError};
use crate::routing::{Router, RoutingError, SelectionConstraints};
use crate::rules;
use crate::usage::{metered, BudgetGuard, BudgetRefusal, UsageStats, UsageTracker};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors surfaced to callers of [`ResilientClient`]
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    NoSuitableBackend(#[from] RoutingError),

    #[error("Budget exceeded: {0}")]
    BudgetExceeded(BudgetRefusal),

    #[error("All backends failed for {task} (tried {}): {last_error}", attempted.join(", "))]
    AllBackendsFailed {
        task: TaskType,
        attempted: Vec<String>,
        last_error: BackendError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Deadline for one backend call
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Backends tried after the first choice fails
    pub max_fallbacks: usize,
    /// Answer with rule-based output when every backend fails
    pub allow_degraded: bool,
    /// Route to a free offline backend when the budget is spent
    pub downgrade_to_offline: bool,
    pub constraints: SelectionConstraints,
    pub cache_policy: CachePolicy,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            max_fallbacks: 1,
            allow_degraded: true,
            downgrade_to_offline: true,
            constraints: SelectionConstraints::default(),
            cache_policy: CachePolicy::default(),
        }
    }
}

impl ClientSettings {
    pub fn from_config(config: &DocvalConfig) -> Self {
        Self {
            timeout: config.client.timeout(),
            retry: config.client.retry_policy(),
            max_fallbacks: config.client.max_fallbacks,
            allow_degraded: config.client.allow_degraded,
            downgrade_to_offline: config.budget.downgrade_to_offline,
            constraints: config.routing.defaults.constraints(),
            cache_policy: config.cache.policy(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_fallbacks(mut self, max_fallbacks: usize) -> Self {
        self.max_fallbacks = max_fallbacks;
        self
    }

    pub fn allow_degraded(mut self, allow: bool) -> Self {
        self.allow_degraded = allow;
        self
    }

    pub fn downgrade_to_offline(mut self, downgrade: bool) -> Self {
        self.downgrade_to_offline = downgrade;
        self
    }

    pub fn with_constraints(mut self, constraints: SelectionConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }
}

/// Per-call overrides of [`ClientSettings`]
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub deadline: Option<Duration>,
    pub constraints: Option<SelectionConstraints>,
    pub allow_degraded: Option<bool>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_constraints(mut self, constraints: SelectionConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn allow_degraded(mut self, allow: bool) -> Self {
        self.allow_degraded = Some(allow);
        self
    }
}

/// Cache-first, budget-aware, failover-capable access to the registered backends
pub struct ResilientClient {
    registry: Arc<BackendRegistry>,
    cache: Arc<ResponseCache>,
    usage: UsageTracker,
    budget: BudgetGuard,
    settings: ClientSettings,
    /// One lock per cache key with a call in flight
    inflight: Mutex<HashMap<CacheKey, Weak<AsyncMutex<()>>>>,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("backends", &self.registry.names())
            .field("settings", &self.settings)
            .field("budget", &self.budget)
            .finish()
    }
}

impl ResilientClient {
    pub fn new(
        registry: Arc<BackendRegistry>,
        cache: Arc<ResponseCache>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            registry,
            cache,
            usage: UsageTracker::new(),
            budget: BudgetGuard::unlimited(),
            settings,
            inflight: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn with_budget(mut self, budget: BudgetGuard) -> Self {
        self.budget = budget;
        self
    }

    /// Build a client from configuration, certifying backends with the probe battery
    pub async fn from_config(config: &DocvalConfig) -> ClientResult<Self> {
        Self::from_config_with_certifier(config, Arc::new(BenchmarkSuite::default())).await
    }

    /// Build a client from configuration
    ///
    /// Backends missing credentials abort construction. Backends that fail
    /// certification are left out with a warning.
    pub async fn from_config_with_certifier(
        config: &DocvalConfig,
        certifier: Arc<dyn Certifier>,
    ) -> ClientResult<Self> {
        let http = HttpClient::with_config(
            Duration::from_millis(config.client.connect_timeout_ms),
            config.client.timeout(),
            10,
        )?;

        let router = Router::new()
            .with_weights(config.client.score_weights())
            .with_overrides(config.routing.overrides.clone());
        let registry = Arc::new(BackendRegistry::new(certifier, router));

        for backend_config in config.enabled_backends() {
            info!(backend = %backend_config.safe_for_logging(), "Registering backend");
            let backend = LlmBackend::from_config(backend_config, http.clone())?;
            match registry.register(Arc::new(backend)).await {
                Ok(report) => debug!(
                    backend = %backend_config.name,
                    level = ?report.level,
                    "Backend registered"
                ),
                Err(e @ RegistryError::CertificationFailed { .. }) => {
                    warn!(backend = %backend_config.name, error = %e, "Skipping backend");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let cache = if config.cache.enabled {
            let mut cache = ResponseCache::new();
            if let Some(dir) = &config.cache.disk_dir {
                match DiskTier::open(dir).await {
                    Ok(disk) => cache = cache.with_disk(disk),
                    Err(e) => warn!(
                        dir = %dir.display(),
                        error = %e,
                        "Disk cache unavailable, using memory only"
                    ),
                }
            }
            cache
        } else {
            ResponseCache::disabled()
        };

        let client = Self::new(registry, Arc::new(cache), ClientSettings::from_config(config))
            .with_budget(config.budget.guard());
        if config.cache.enabled {
            client.start_janitor(config.cache.sweep_interval());
        }
        Ok(client)
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn budget(&self) -> &BudgetGuard {
        &self.budget
    }

    pub async fn parse_instruction(
        &self,
        context: &TutorialContext,
        instruction: &str,
    ) -> ClientResult<ParsedInstruction> {
        self.parse_instruction_with(context, instruction, &CallOptions::default())
            .await
    }

    pub async fn parse_instruction_with(
        &self,
        context: &TutorialContext,
        instruction: &str,
        options: &CallOptions,
    ) -> ClientResult<ParsedInstruction> {
        let request = TaskRequest::ParseInstruction {
            context,
            instruction,
        };
        match self.execute(&request, options).await? {
            TaskOutput::ParsedInstruction(parsed) => Ok(parsed),
            other => Err(mismatch(TaskType::ParseInstruction, &other)),
        }
    }

    pub async fn validate_expectation(
        &self,
        context: &TutorialContext,
        expected: &str,
        actual: &str,
    ) -> ClientResult<ValidationResult> {
        self.validate_expectation_with(context, expected, actual, &CallOptions::default())
            .await
    }

    pub async fn validate_expectation_with(
        &self,
        context: &TutorialContext,
        expected: &str,
        actual: &str,
        options: &CallOptions,
    ) -> ClientResult<ValidationResult> {
        let request = TaskRequest::ValidateExpectation {
            context,
            expected,
            actual,
        };
        match self.execute(&request, options).await? {
            TaskOutput::Validation(result) => Ok(result),
            other => Err(mismatch(TaskType::ValidateExpectation, &other)),
        }
    }

    pub async fn compress_context(
        &self,
        context: &TutorialContext,
    ) -> ClientResult<CompressedContext> {
        self.compress_context_with(context, &CallOptions::default())
            .await
    }

    pub async fn compress_context_with(
        &self,
        context: &TutorialContext,
        options: &CallOptions,
    ) -> ClientResult<CompressedContext> {
        let request = TaskRequest::CompressContext { context };
        match self.execute(&request, options).await? {
            TaskOutput::CompressedContext(compressed) => Ok(compressed),
            other => Err(mismatch(TaskType::CompressContext, &other)),
        }
    }

    pub async fn interpret_error(
        &self,
        context: &TutorialContext,
        error_message: &str,
    ) -> ClientResult<ErrorInterpretation> {
        self.interpret_error_with(context, error_message, &CallOptions::default())
            .await
    }

    pub async fn interpret_error_with(
        &self,
        context: &TutorialContext,
        error_message: &str,
        options: &CallOptions,
    ) -> ClientResult<ErrorInterpretation> {
        let request = TaskRequest::InterpretError {
            context,
            error_message,
        };
        match self.execute(&request, options).await? {
            TaskOutput::ErrorInterpretation(interpretation) => Ok(interpretation),
            other => Err(mismatch(TaskType::InterpretError, &other)),
        }
    }

    /// Descriptors of every registered backend
    pub fn capabilities(&self) -> Vec<BackendDescriptor> {
        self.registry.descriptors()
    }

    /// The backend a request of this type would go to first
    pub fn current_selection(&self, task: TaskType) -> ClientResult<BackendDescriptor> {
        let backend = self
            .registry
            .recommend_for_task(task, &self.settings.constraints)?;
        let entry = self
            .registry
            .entry(backend.name())
            .ok_or_else(|| RegistryError::NotFound(backend.name().to_string()))?;
        Ok(entry.descriptor().clone())
    }

    /// Probe one backend and record the outcome
    pub async fn health_check(&self, name: &str) -> ClientResult<()> {
        self.registry.check_one(name).await??;
        Ok(())
    }

    /// Usage across every backend this client has called
    pub fn usage_stats(&self) -> UsageStats {
        self.usage.aggregate()
    }

    pub fn backend_usage(&self, name: &str) -> UsageStats {
        self.usage.stats(name)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Start sweeping expired cache entries
    pub fn start_janitor(&self, interval: Duration) {
        let task = self.cache.spawn_janitor(interval);
        self.tasks.lock().expect("task list lock poisoned").push(task);
    }

    /// Start probing backend health
    pub fn start_health_monitor(&self, interval: Duration) {
        let task = self.registry.spawn_health_monitor(interval);
        self.tasks.lock().expect("task list lock poisoned").push(task);
    }

    /// Stop every background task this client started
    pub async fn shutdown(&self) {
        let tasks: Vec<BackgroundTask> = self
            .tasks
            .lock()
            .expect("task list lock poisoned")
            .drain(..)
            .collect();
        for task in tasks {
            debug!(task = task.name(), "Stopping background task");
            task.shutdown().await;
        }
    }

    /// Run one request through the full pipeline
    pub async fn execute(
        &self,
        request: &TaskRequest<'_>,
        options: &CallOptions,
    ) -> ClientResult<TaskOutput> {
        let task = request.task_type();
        let ttl = self
            .settings
            .cache_policy
            .ttl_for(task)
            .filter(|_| self.cache.is_enabled());
        let key = ttl.map(|_| CacheKey::for_request(request));

        if let Some(key) = &key {
            if let Some(hit) = self.cache.get_output(key, task).await {
                debug!(task = %task, "Cache hit");
                return Ok(hit);
            }
        }

        // Concurrent identical requests wait for the first one, then read its result
        let _inflight = match &key {
            Some(key) => {
                let guard = self.inflight_lock(key).lock_owned().await;
                if let Some(hit) = self.cache.get_output(key, task).await {
                    debug!(task = %task, "Cache hit after waiting on identical request");
                    return Ok(hit);
                }
                Some(guard)
            }
            None => None,
        };

        let constraints = self.admit(request, options)?;
        let ranked = self.registry.rank(request, &constraints)?;
        let chain: Vec<Arc<RegisteredBackend>> = ranked
            .into_iter()
            .take(1 + self.settings.max_fallbacks)
            .map(|(entry, _)| entry)
            .collect();

        let deadline = options.deadline.unwrap_or(self.settings.timeout);
        let mut attempted = Vec::with_capacity(chain.len());
        let mut last_error = None;

        for entry in &chain {
            attempted.push(entry.name().to_string());
            match self.call_backend(entry, request, deadline).await {
                Ok(output) => {
                    if let (Some(key), Some(ttl)) = (&key, ttl) {
                        self.cache.set_output(key, &output, ttl).await;
                    }
                    return Ok(output);
                }
                Err(e) => {
                    warn!(
                        backend = entry.name(),
                        task = %task,
                        error = %e,
                        "Backend failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        let last_error = last_error
            .unwrap_or_else(|| BackendError::Other("no backend was attempted".to_string()));
        if options.allow_degraded.unwrap_or(self.settings.allow_degraded) {
            warn!(
                task = %task,
                attempted = ?attempted,
                "All backends failed, answering from rules"
            );
            return Ok(rules::degraded(request));
        }
        Err(ClientError::AllBackendsFailed {
            task,
            attempted,
            last_error,
        })
    }

    /// Apply the budget guard; the returned constraints may be narrowed to offline backends
    fn admit(
        &self,
        request: &TaskRequest<'_>,
        options: &CallOptions,
    ) -> ClientResult<SelectionConstraints> {
        let mut constraints = options
            .constraints
            .clone()
            .unwrap_or_else(|| self.settings.constraints.clone());

        let estimated =
            estimate_input_tokens(request) + expected_output_tokens(request.task_type());
        if let Err(refusal) = self.budget.check(&self.usage.aggregate(), estimated) {
            if self.settings.downgrade_to_offline && self.has_free_offline_backend() {
                warn!(reason = %refusal, "Budget spent, routing to offline backends");
                constraints.offline_required = true;
                constraints.max_cost_per_request = Some(0.0);
            } else {
                warn!(reason = %refusal, "Budget spent, refusing call");
                return Err(ClientError::BudgetExceeded(refusal));
            }
        }
        Ok(constraints)
    }

    fn has_free_offline_backend(&self) -> bool {
        self.registry
            .entries()
            .iter()
            .any(|entry| entry.descriptor().offline && entry.descriptor().cost.is_free())
    }

    /// One backend: rule fast path, else dispatch with retries under a per-attempt deadline
    async fn call_backend(
        &self,
        entry: &RegisteredBackend,
        request: &TaskRequest<'_>,
        deadline: Duration,
    ) -> Result<TaskOutput, BackendError> {
        let backend: &dyn Backend = entry.backend().as_ref();
        let task = request.task_type();

        if let Some(output) = backend.fast_path(request) {
            debug!(backend = entry.name(), task = %task, "Answered by fast path");
            self.usage.record_success(entry.name(), 0, 0.0, Duration::ZERO);
            return Ok(output);
        }

        let request_id = Uuid::new_v4();
        let executor = RetryExecutor::new(self.settings.retry.clone());
        let started = Instant::now();

        let (outcome, reported) = metered(executor.execute(entry.name(), || async move {
            let options = RequestOptions {
                request_id,
                timeout: deadline,
                task: Some(task),
            };
            match tokio::time::timeout(deadline, dispatch(backend, request, &options)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout),
            }
        }))
        .await;

        let elapsed = started.elapsed();
        match outcome.result {
            Ok(output) => {
                // Backends that do not meter their calls are charged the estimate
                let (tokens, cost) = match reported {
                    Some(reported) => (reported.tokens, reported.cost),
                    None => {
                        let estimate = backend.cost_estimate(request);
                        (estimate.total_tokens(), estimate.cost)
                    }
                };
                self.usage
                    .record_success(entry.name(), tokens, cost, elapsed);
                info!(
                    backend = entry.name(),
                    task = %task,
                    %request_id,
                    calls = outcome.calls,
                    latency_ms = elapsed.as_millis() as u64,
                    "Backend call succeeded"
                );
                Ok(output)
            }
            Err(e) => {
                self.usage.record_failure(entry.name(), elapsed);
                Err(e)
            }
        }
    }

    fn inflight_lock(&self, key: &CacheKey) -> Arc<AsyncMutex<()>> {
        let mut inflight = self.inflight.lock().expect("in-flight lock poisoned");
        inflight.retain(|_, lock| lock.strong_count() > 0);
        if let Some(lock) = inflight.get(key).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(AsyncMutex::new(()));
        inflight.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }
}

fn mismatch(expected: TaskType, output: &TaskOutput) -> ClientError {
    ClientError::Backend(BackendError::Other(format!(
        "expected {} output, got {}",
        expected,
        output.task_type()
    )))
}
