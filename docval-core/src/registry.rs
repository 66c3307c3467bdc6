//! Backend registry
//!
//! Owns every registered backend together with its certified descriptor and
//! health flag. Registration certifies first and refuses backends below the
//! minimum score. Selection is delegated to the [`Router`].

use crate::background::BackgroundTask;
use crate::certification::{Category, CertificationReport, Certifier};
use crate::protocol::{TaskType, TutorialContext};
use crate::providers::{
    Backend, BackendDescriptor, BackendError, BackendResult, TaskRequest, HEALTH_CHECK_TIMEOUT,
};
use crate::routing::{Candidate, Ranked, Router, RoutingError, SelectionConstraints};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("Backend '{backend}' is invalid: {reason}")]
    InvalidBackend { backend: String, reason: String },

    #[error("Backend '{0}' is already registered")]
    Duplicate(String),

    #[error("Backend '{backend}' failed certification with score {score:.2} (failing: {})", .failing.iter().map(Category::as_str).collect::<Vec<_>>().join(", "))]
    CertificationFailed {
        backend: String,
        score: f64,
        failing: Vec<Category>,
    },

    #[error("Backend '{0}' is not registered")]
    NotFound(String),
}

/// A backend as stored by the registry
pub struct RegisteredBackend {
    backend: Arc<dyn Backend>,
    descriptor: BackendDescriptor,
    report: CertificationReport,
    healthy: AtomicBool,
}

impl std::fmt::Debug for RegisteredBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredBackend")
            .field("name", &self.descriptor.name)
            .field("level", &self.report.level)
            .field("healthy", &self.is_healthy())
            .finish()
    }
}

impl RegisteredBackend {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Descriptor with the certified quality score and level filled in
    pub fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    pub fn report(&self) -> &CertificationReport {
        &self.report
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn set_healthy(&self, healthy: bool) {
        let was = self.healthy.swap(healthy, Ordering::Relaxed);
        if was != healthy {
            info!(backend = %self.descriptor.name, healthy, "Backend health changed");
        }
    }
}

/// Result of probing one backend
#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatus {
    pub backend: String,
    pub healthy: bool,
    pub error: Option<String>,
}

/// Process-wide set of certified backends
///
/// Read-mostly: lookups and ranking take the shared lock, registration
/// takes the exclusive lock only to insert. Certification runs outside
/// the lock.
pub struct BackendRegistry {
    backends: RwLock<Vec<Arc<RegisteredBackend>>>,
    certifier: Arc<dyn Certifier>,
    router: Router,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .field("router", &self.router)
            .finish()
    }
}

impl BackendRegistry {
    pub fn new(certifier: Arc<dyn Certifier>, router: Router) -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
            certifier,
            router,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Certify and store a backend
    pub async fn register(
        &self,
        backend: Arc<dyn Backend>,
    ) -> Result<CertificationReport, RegistryError> {
        let name = backend.name().to_string();
        validate_contract(backend.as_ref())?;
        if self.contains(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        let report = self.certifier.certify(backend.as_ref()).await;
        let entry = certified_entry(backend, report.clone())?;

        {
            let mut backends = self.backends.write().expect("registry lock poisoned");
            // Another caller may have registered the same name meanwhile
            if backends.iter().any(|b| b.name() == name) {
                return Err(RegistryError::Duplicate(name));
            }
            backends.push(Arc::new(entry));
        }

        info!(
            backend = %name,
            level = ?report.level,
            overall = report.overall,
            "Backend registered"
        );
        Ok(report)
    }

    /// Re-run certification, replacing the stored report
    ///
    /// A backend that no longer certifies is removed.
    pub async fn recertify(&self, name: &str) -> Result<CertificationReport, RegistryError> {
        let current = self.entry(name).ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let report = self.certifier.certify(current.backend.as_ref()).await;

        let mut backends = self.backends.write().expect("registry lock poisoned");
        let Some(pos) = backends.iter().position(|b| b.name() == name) else {
            return Err(RegistryError::NotFound(name.to_string()));
        };
        match certified_entry(current.backend.clone(), report.clone()) {
            Ok(entry) => {
                entry.healthy.store(current.is_healthy(), Ordering::Relaxed);
                if let Some(previous) = current.report.level {
                    if report.level != Some(previous) {
                        info!(
                            backend = %name,
                            from = %previous,
                            to = ?report.level,
                            "Certification level changed"
                        );
                    }
                }
                backends[pos] = Arc::new(entry);
                Ok(report)
            }
            Err(e) => {
                warn!(backend = %name, error = %e, "Backend no longer certifies, removing");
                backends.remove(pos);
                Err(e)
            }
        }
    }

    pub fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let mut backends = self.backends.write().expect("registry lock poisoned");
        let before = backends.len();
        backends.retain(|b| b.name() != name);
        if backends.len() == before {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        info!(backend = %name, "Backend unregistered");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Backend>, RegistryError> {
        self.entry(name)
            .map(|entry| entry.backend.clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn entry(&self, name: &str) -> Option<Arc<RegisteredBackend>> {
        let backends = self.backends.read().expect("registry lock poisoned");
        backends.iter().find(|b| b.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Every backend in registration order
    pub fn all(&self) -> Vec<Arc<dyn Backend>> {
        self.entries().into_iter().map(|entry| entry.backend.clone()).collect()
    }

    pub fn entries(&self) -> Vec<Arc<RegisteredBackend>> {
        self.backends.read().expect("registry lock poisoned").clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries().iter().map(|entry| entry.name().to_string()).collect()
    }

    /// Certified descriptors in registration order
    pub fn descriptors(&self) -> Vec<BackendDescriptor> {
        self.entries().iter().map(|entry| entry.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_health(&self, name: &str, healthy: bool) -> Result<(), RegistryError> {
        let entry = self.entry(name).ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        entry.set_healthy(healthy);
        Ok(())
    }

    /// Probe one backend and record the outcome
    pub async fn check_one(&self, name: &str) -> Result<BackendResult<()>, RegistryError> {
        let entry = self.entry(name).ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let result = probe(entry.backend.as_ref()).await;
        entry.set_healthy(result.is_ok());
        Ok(result)
    }

    /// Probe every backend concurrently
    pub async fn check_health(&self) -> Vec<HealthStatus> {
        let mut probes = JoinSet::new();
        for (order, entry) in self.entries().into_iter().enumerate() {
            probes.spawn(async move {
                let result = probe(entry.backend.as_ref()).await;
                entry.set_healthy(result.is_ok());
                (
                    order,
                    HealthStatus {
                        backend: entry.name().to_string(),
                        healthy: result.is_ok(),
                        error: result.err().map(|e| e.to_string()),
                    },
                )
            });
        }

        let mut statuses = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(status) => statuses.push(status),
                Err(e) => warn!(error = %e, "Health probe task failed"),
            }
        }
        statuses.sort_by_key(|(order, _)| *order);
        statuses.into_iter().map(|(_, status)| status).collect()
    }

    /// Repeat [`check_health`](Self::check_health) on an interval
    pub fn spawn_health_monitor(self: &Arc<Self>, interval: Duration) -> BackgroundTask {
        BackgroundTask::spawn("health monitor", self, interval, |registry| async move {
            let statuses = registry.check_health().await;
            let unhealthy = statuses.iter().filter(|s| !s.healthy).count();
            debug!(checked = statuses.len(), unhealthy, "Health sweep complete");
        })
    }

    /// Every eligible backend for a request, best first
    pub fn rank(
        &self,
        request: &TaskRequest<'_>,
        constraints: &SelectionConstraints,
    ) -> Result<Vec<(Arc<RegisteredBackend>, Ranked)>, RoutingError> {
        let entries = self.entries();
        let candidates: Vec<Candidate<'_>> = entries
            .iter()
            .map(|entry| Candidate {
                descriptor: &entry.descriptor,
                cost: entry.backend.cost_estimate(request).cost,
                healthy: entry.is_healthy(),
            })
            .collect();

        let ranked = self.router.rank(request.task_type(), &candidates, constraints)?;
        Ok(ranked
            .into_iter()
            .map(|r| (entries[r.index].clone(), r))
            .collect())
    }

    /// Best backend for a request
    pub fn recommend_for(
        &self,
        request: &TaskRequest<'_>,
        constraints: &SelectionConstraints,
    ) -> Result<Arc<dyn Backend>, RoutingError> {
        let mut ranked = self.rank(request, constraints)?;
        let (entry, _) = ranked.remove(0);
        Ok(entry.backend.clone())
    }

    /// Best backend for a task type, sized on an empty request
    pub fn recommend_for_task(
        &self,
        task: TaskType,
        constraints: &SelectionConstraints,
    ) -> Result<Arc<dyn Backend>, RoutingError> {
        let context = TutorialContext::default();
        let request = match task {
            TaskType::ParseInstruction => TaskRequest::ParseInstruction {
                context: &context,
                instruction: "",
            },
            TaskType::ValidateExpectation => TaskRequest::ValidateExpectation {
                context: &context,
                expected: "",
                actual: "",
            },
            TaskType::CompressContext => TaskRequest::CompressContext { context: &context },
            TaskType::InterpretError => TaskRequest::InterpretError {
                context: &context,
                error_message: "",
            },
        };
        self.recommend_for(&request, constraints)
    }
}

/// Descriptor sanity checks the type system cannot enforce
fn validate_contract(backend: &dyn Backend) -> Result<(), RegistryError> {
    let name = backend.name();
    let descriptor = backend.capabilities();
    let invalid = |reason: &str| RegistryError::InvalidBackend {
        backend: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("empty name"));
    }
    if descriptor.name != name {
        return Err(invalid("descriptor name does not match backend name"));
    }
    if descriptor.cost.input_per_token < 0.0 || descriptor.cost.output_per_token < 0.0 {
        return Err(invalid("negative cost"));
    }
    let latency = &descriptor.latency;
    if latency.p50 > latency.p95 || latency.p95 > latency.p99 {
        return Err(invalid("latency percentiles out of order"));
    }
    if descriptor.max_context_tokens == 0 {
        return Err(invalid("zero context window"));
    }
    Ok(())
}

fn certified_entry(
    backend: Arc<dyn Backend>,
    report: CertificationReport,
) -> Result<RegisteredBackend, RegistryError> {
    if !report.is_certified() {
        return Err(RegistryError::CertificationFailed {
            backend: report.backend.clone(),
            score: report.overall,
            failing: report.failing.clone(),
        });
    }

    let mut descriptor = backend.capabilities().clone();
    descriptor.quality_score = report.overall;
    descriptor.certification = report.level;
    Ok(RegisteredBackend {
        backend,
        descriptor,
        report,
        healthy: AtomicBool::new(true),
    })
}

async fn probe(backend: &dyn Backend) -> BackendResult<()> {
    match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, backend.health_check()).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout),
    }
}
