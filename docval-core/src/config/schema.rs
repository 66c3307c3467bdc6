//! Configuration schema structures with serde support

use super::error::{ValidationError, ValidationErrorKind};
use super::secrets::{SafeLogging, SecretString};
use crate::cache::{CachePolicy, MAX_TTL};
use crate::protocol::TaskType;
use crate::providers::adapter::{BackendDescriptor, CostModel, LatencyProfile};
use crate::providers::retry::RetryPolicy;
use crate::providers::VendorKind;
use crate::routing::{ScoreWeights, SelectionConstraints};
use crate::usage::BudgetGuard;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DocvalConfig {
    /// Schema version (required - no default)
    pub version: String,

    /// AI backends available for selection
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Resilient client settings
    #[serde(default)]
    pub client: ClientConfig,

    /// Routing overrides and default constraints
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Daily budget caps
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Custom metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One AI backend
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    /// Unique backend name
    pub name: String,

    /// Vendor protocol
    #[serde(rename = "type")]
    pub kind: VendorKind,

    /// API key (supports environment variable interpolation); optional for local vendors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<SecretString>,

    /// Override of the vendor's default base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model used for every task
    pub model: String,

    /// Cheaper model used for context compression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Enterprise deployment (data agreements, SLAs)
    #[serde(default)]
    pub enterprise: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub cost: CostConfig,

    #[serde(default)]
    pub latency: LatencyConfig,

    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Free-form feature tags advertised in the descriptor
    #[serde(default)]
    pub features: Vec<String>,
}

/// Prices per 1K tokens
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CostConfig {
    #[serde(default)]
    pub input_per_1k: f64,
    #[serde(default)]
    pub output_per_1k: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            input_per_1k: 0.0,
            output_per_1k: 0.0,
            currency: default_currency(),
        }
    }
}

/// Expected latency percentiles in milliseconds
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LatencyConfig {
    #[serde(default = "default_p50")]
    pub p50_ms: u64,
    #[serde(default = "default_p95")]
    pub p95_ms: u64,
    #[serde(default = "default_p99")]
    pub p99_ms: u64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            p50_ms: default_p50(),
            p95_ms: default_p95(),
            p99_ms: default_p99(),
        }
    }
}

/// Resilient client settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Deadline for one backend call in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Retries per backend for transient errors
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_backoff_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_backoff_ms: u64,

    /// Backends tried after the first choice fails
    #[serde(default = "default_max_fallbacks")]
    pub max_fallbacks: usize,

    /// Return a low-confidence rule-based result when every backend fails
    #[serde(default = "default_true")]
    pub allow_degraded: bool,

    /// Weight cost more heavily when ranking backends
    #[serde(default)]
    pub cost_optimization: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_delay(),
            max_backoff_ms: default_max_delay(),
            max_fallbacks: default_max_fallbacks(),
            allow_degraded: true,
            cost_optimization: false,
        }
    }
}

/// Routing configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    /// Task type -> backend name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub overrides: HashMap<TaskType, String>,

    /// Constraints applied when the caller supplies none
    #[serde(default)]
    pub defaults: ConstraintsConfig,
}

/// Default selection constraints
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConstraintsConfig {
    #[serde(default)]
    pub min_quality: Option<f64>,
    #[serde(default)]
    pub max_latency_ms: Option<u64>,
    #[serde(default)]
    pub max_cost_per_request: Option<f64>,
    #[serde(default)]
    pub offline_required: bool,
    #[serde(default)]
    pub enterprise_required: bool,
    #[serde(default)]
    pub preferred_region: Option<String>,
}

/// Response cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_long_ttl")]
    pub parse_ttl_secs: u64,

    #[serde(default = "default_short_ttl")]
    pub validate_ttl_secs: u64,

    #[serde(default = "default_long_ttl")]
    pub interpret_ttl_secs: u64,

    /// Interval of the background expiry sweep
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Directory of the persistent tier; memory only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            parse_ttl_secs: default_long_ttl(),
            validate_ttl_secs: default_short_ttl(),
            interpret_ttl_secs: default_long_ttl(),
            sweep_interval_secs: default_sweep_interval(),
            disk_dir: None,
        }
    }
}

/// Daily budget configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    /// Spend cap in the backends' currency
    #[serde(default)]
    pub daily_cost_cap: Option<f64>,

    #[serde(default)]
    pub daily_token_cap: Option<u64>,

    /// Route to a free offline backend instead of refusing
    #[serde(default = "default_true")]
    pub downgrade_to_offline: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_cost_cap: None,
            daily_token_cap: None,
            downgrade_to_offline: true,
        }
    }
}

/// Config format version this crate reads
pub const SUPPORTED_VERSION: &str = "0.1";

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_max_context_tokens() -> usize {
    8192
}

fn default_p50() -> u64 {
    2_000
}

fn default_p95() -> u64 {
    5_000
}

fn default_p99() -> u64 {
    10_000
}

fn default_timeout() -> u64 {
    30_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_delay() -> u64 {
    200
}

fn default_max_delay() -> u64 {
    5_000
}

fn default_max_fallbacks() -> usize {
    1
}

fn default_long_ttl() -> u64 {
    24 * 60 * 60
}

fn default_short_ttl() -> u64 {
    60 * 60
}

fn default_sweep_interval() -> u64 {
    5 * 60
}

impl DocvalConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.version.is_empty() {
            return Err(ValidationError::missing("version"));
        }

        if self.version != SUPPORTED_VERSION {
            return Err(ValidationError::new(
                "version",
                ValidationErrorKind::UnsupportedVersion {
                    found: self.version.clone(),
                    supported: SUPPORTED_VERSION.to_string(),
                },
            ));
        }

        if self.backends.is_empty() {
            let hint = "declare at least one backend";
            return Err(ValidationError::missing("backends").with_hint(hint));
        }

        let mut seen_names = HashSet::new();
        for (i, backend) in self.backends.iter().enumerate() {
            if !seen_names.insert(&backend.name) {
                return Err(ValidationError::new(
                    format!("backends[{}].name", i),
                    ValidationErrorKind::DuplicateBackend {
                        name: backend.name.clone(),
                    },
                ));
            }
            backend.validate(&format!("backends[{}]", i))?;
        }

        self.client.validate("client")?;
        self.routing.defaults.validate("routing.defaults")?;
        self.cache.validate("cache")?;
        self.budget.validate("budget")?;

        Ok(())
    }

    /// Backends with `enabled: true`, in declaration order
    pub fn enabled_backends(&self) -> impl Iterator<Item = &BackendConfig> {
        self.backends.iter().filter(|b| b.enabled)
    }
}

impl BackendConfig {
    /// Validate backend configuration
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::missing(format!("{}.name", path)));
        }

        if self.model.trim().is_empty() {
            return Err(ValidationError::missing(format!("{}.model", path)));
        }

        if let Some(base_url) = &self.base_url {
            validate_url(&format!("{}.base_url", path), base_url)?;
        }

        if self.max_context_tokens == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.max_context_tokens", path),
                "Must be greater than 0",
            ));
        }

        if !(self.cost.input_per_1k >= 0.0 && self.cost.input_per_1k.is_finite()) {
            return Err(ValidationError::out_of_range(
                format!("{}.cost.input_per_1k", path),
                "Must be non-negative",
            ));
        }
        if !(self.cost.output_per_1k >= 0.0 && self.cost.output_per_1k.is_finite()) {
            return Err(ValidationError::out_of_range(
                format!("{}.cost.output_per_1k", path),
                "Must be non-negative",
            ));
        }

        let latency = &self.latency;
        if !(latency.p50_ms <= latency.p95_ms && latency.p95_ms <= latency.p99_ms) {
            return Err(ValidationError::inconsistent(
                format!("{}.latency", path),
                "percentiles must satisfy p50 <= p95 <= p99",
            ));
        }

        Ok(())
    }

    /// Static descriptor for the backend built from this entry
    pub fn descriptor(&self) -> BackendDescriptor {
        let mut descriptor = BackendDescriptor::new(&self.name, &self.model)
            .with_cost(CostModel {
                currency: self.cost.currency.clone(),
                ..CostModel::per_1k(self.cost.input_per_1k, self.cost.output_per_1k)
            })
            .with_latency(LatencyProfile::new(
                Duration::from_millis(self.latency.p50_ms),
                Duration::from_millis(self.latency.p95_ms),
                Duration::from_millis(self.latency.p99_ms),
            ))
            .with_max_context(self.max_context_tokens)
            .offline(self.kind == VendorKind::Ollama)
            .enterprise(self.enterprise);
        descriptor.features = self.features.clone();
        if let Some(region) = &self.region {
            descriptor = descriptor.with_region(region.clone());
        }
        descriptor
    }
}

impl SafeLogging for BackendConfig {
    fn safe_for_logging(&self) -> String {
        let key = self
            .api_key
            .as_ref()
            .map(|key| format!("{} #{}", key.masked(), key.fingerprint()))
            .unwrap_or_else(|| "[NONE]".to_string());
        format!(
            "{} ({:?}, model={}, api_key={})",
            self.name, self.kind, self.model, key
        )
    }
}

fn validate_url(path: &str, value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(()),
        Ok(url) => Err(ValidationError::new(
            path,
            ValidationErrorKind::InvalidUrl {
                message: format!("URL scheme must be http or https, got: {}", url.scheme()),
            },
        )),
        Err(e) => Err(ValidationError::new(
            path,
            ValidationErrorKind::InvalidUrl {
                message: e.to_string(),
            },
        )),
    }
}

impl ClientConfig {
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.timeout_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.timeout_ms", path),
                "Must be greater than 0",
            ));
        }

        if self.initial_backoff_ms == 0 {
            return Err(ValidationError::out_of_range(
                format!("{}.initial_backoff_ms", path),
                "Must be greater than 0",
            ));
        }

        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ValidationError::inconsistent(
                format!("{}.max_backoff_ms", path),
                "must not be below initial_backoff_ms",
            ));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay_ms: self.initial_backoff_ms,
            max_delay_ms: self.max_backoff_ms,
            ..RetryPolicy::default()
        }
    }

    pub fn score_weights(&self) -> ScoreWeights {
        if self.cost_optimization {
            ScoreWeights::cost_optimized()
        } else {
            ScoreWeights::default()
        }
    }
}

impl ConstraintsConfig {
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if let Some(min_quality) = self.min_quality {
            if !(0.0..=1.0).contains(&min_quality) {
                return Err(ValidationError::out_of_range(
                    format!("{}.min_quality", path),
                    "Must be between 0.0 and 1.0",
                ));
            }
        }
        if let Some(max_cost) = self.max_cost_per_request {
            if max_cost < 0.0 {
                return Err(ValidationError::out_of_range(
                    format!("{}.max_cost_per_request", path),
                    "Must be non-negative",
                ));
            }
        }
        Ok(())
    }

    pub fn constraints(&self) -> SelectionConstraints {
        SelectionConstraints {
            max_latency: self.max_latency_ms.map(Duration::from_millis),
            max_cost_per_request: self.max_cost_per_request,
            offline_required: self.offline_required,
            enterprise_required: self.enterprise_required,
            min_quality: self.min_quality,
            preferred_region: self.preferred_region.clone(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        for (field, value) in [
            ("parse_ttl_secs", self.parse_ttl_secs),
            ("validate_ttl_secs", self.validate_ttl_secs),
            ("interpret_ttl_secs", self.interpret_ttl_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(ValidationError::out_of_range(
                    format!("{}.{}", path, field),
                    "Must be greater than 0",
                ));
            }
            if value > MAX_TTL.as_secs() {
                return Err(ValidationError::out_of_range(
                    format!("{}.{}", path, field),
                    format!("Must be at most {} seconds", MAX_TTL.as_secs()),
                ));
            }
        }
        Ok(())
    }

    pub fn policy(&self) -> CachePolicy {
        CachePolicy {
            parse_ttl: Duration::from_secs(self.parse_ttl_secs),
            validate_ttl: Duration::from_secs(self.validate_ttl_secs),
            interpret_ttl: Duration::from_secs(self.interpret_ttl_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl BudgetConfig {
    pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if let Some(cap) = self.daily_cost_cap {
            if !(cap > 0.0 && cap.is_finite()) {
                return Err(ValidationError::out_of_range(
                    format!("{}.daily_cost_cap", path),
                    "Must be positive",
                ));
            }
        }
        if self.daily_token_cap == Some(0) {
            return Err(ValidationError::out_of_range(
                format!("{}.daily_token_cap", path),
                "Must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn guard(&self) -> BudgetGuard {
        BudgetGuard {
            daily_cost_cap: self.daily_cost_cap,
            daily_token_cap: self.daily_token_cap,
        }
    }
}
