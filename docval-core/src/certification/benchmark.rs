//! Probe-driven certification

use super::probes::{
    context_probes, cost_efficiency, grade_context, ERROR_PROBES, PARSE_PROBES, VALIDATION_PROBES,
};
use super::{evaluate, CategoryScores, CertificationReport, Certifier};
use crate::http::RequestOptions;
use crate::protocol::{TaskType, TutorialContext};
use crate::providers::{Backend, BackendResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Runs the probe battery against a backend
///
/// Scores are averaged over `runs` passes so a backend with some sampling
/// noise still certifies at a stable level. A failed probe call scores
/// zero and still counts toward the average latency.
#[derive(Debug, Clone)]
pub struct BenchmarkSuite {
    runs: usize,
    probe_timeout: Duration,
}

impl Default for BenchmarkSuite {
    fn default() -> Self {
        Self {
            runs: 1,
            probe_timeout: Duration::from_secs(30),
        }
    }
}

impl BenchmarkSuite {
    pub fn new(runs: usize) -> Self {
        Self {
            runs: runs.max(1),
            ..Default::default()
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn options(&self, task: TaskType) -> RequestOptions {
        RequestOptions::new(task).with_timeout(self.probe_timeout)
    }

    async fn run_once(&self, backend: &dyn Backend, latency: &mut LatencyLog) -> CategoryScores {
        let empty = TutorialContext::default();

        let mut parsing = 0.0;
        for probe in PARSE_PROBES {
            let options = self.options(TaskType::ParseInstruction);
            let result = latency
                .time(backend.parse_instruction(&options, &empty, probe.instruction))
                .await;
            parsing += result.map(|parsed| probe.grade(&parsed)).unwrap_or(0.0);
        }

        let mut validation = 0.0;
        for probe in VALIDATION_PROBES {
            let options = self.options(TaskType::ValidateExpectation);
            let result = latency
                .time(backend.validate_expectation(&options, &empty, probe.expected, probe.actual))
                .await;
            validation += result.map(|r| probe.grade(&r)).unwrap_or(0.0);
        }

        let contexts = context_probes();
        let mut context_score = 0.0;
        for context in &contexts {
            let options = self.options(TaskType::CompressContext);
            let result = latency.time(backend.compress_context(&options, context)).await;
            context_score += result
                .map(|compressed| grade_context(context, &compressed))
                .unwrap_or(0.0);
        }

        let mut error_recovery = 0.0;
        for probe in ERROR_PROBES {
            let options = self.options(TaskType::InterpretError);
            let result = latency
                .time(backend.interpret_error(&options, &empty, probe.message))
                .await;
            error_recovery += result.map(|i| probe.grade(&i)).unwrap_or(0.0);
        }

        CategoryScores {
            parsing: parsing / PARSE_PROBES.len() as f64,
            validation: validation / VALIDATION_PROBES.len() as f64,
            context: context_score / contexts.len() as f64,
            error_recovery: error_recovery / ERROR_PROBES.len() as f64,
            cost_efficiency: cost_efficiency(backend),
        }
    }
}

#[async_trait]
impl Certifier for BenchmarkSuite {
    async fn certify(&self, backend: &dyn Backend) -> CertificationReport {
        let mut latency = LatencyLog::default();
        let mut total = CategoryScores::default();

        for run in 0..self.runs {
            let scores = self.run_once(backend, &mut latency).await;
            debug!(backend = backend.name(), run, ?scores, "Benchmark pass complete");
            total.parsing += scores.parsing;
            total.validation += scores.validation;
            total.context += scores.context;
            total.error_recovery += scores.error_recovery;
            total.cost_efficiency += scores.cost_efficiency;
        }

        let n = self.runs as f64;
        let scores = CategoryScores {
            parsing: total.parsing / n,
            validation: total.validation / n,
            context: total.context / n,
            error_recovery: total.error_recovery / n,
            cost_efficiency: total.cost_efficiency / n,
        };

        let report = evaluate(
            backend.name(),
            scores,
            latency.average(),
            backend.capabilities().enterprise,
            self.runs,
        );
        info!(
            backend = %report.backend,
            overall = report.overall,
            level = ?report.level,
            "Backend benchmarked"
        );
        report
    }
}

#[derive(Debug, Default)]
struct LatencyLog {
    total: Duration,
    calls: u32,
}

impl LatencyLog {
    async fn time<T, F>(&mut self, call: F) -> BackendResult<T>
    where
        F: Future<Output = BackendResult<T>>,
    {
        let started = Instant::now();
        let result = call.await;
        self.total += started.elapsed();
        self.calls += 1;
        result
    }

    fn average(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total / self.calls
        }
    }
}
