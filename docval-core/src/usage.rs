//! Usage and cost tracking
//!
//! Per-backend counters for requests, tokens and spend, plus rolling
//! latency/success figures. "Today" counters roll over at UTC midnight.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::warn;

/// Samples kept for rolling averages
const LATENCY_WINDOW: usize = 100;

/// Request, token and spend counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub requests_today: u64,
    pub requests_total: u64,
    pub tokens_today: u64,
    pub tokens_total: u64,
    pub cost_today: f64,
    pub cost_total: f64,
}

impl UsageStats {
    fn add(&mut self, other: &UsageStats) {
        self.requests_today += other.requests_today;
        self.requests_total += other.requests_total;
        self.tokens_today += other.tokens_today;
        self.tokens_total += other.tokens_total;
        self.cost_today += other.cost_today;
        self.cost_total += other.cost_total;
    }
}

/// Tokens and spend a backend reported for one logical call
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MeteredUsage {
    pub tokens: u64,
    pub cost: f64,
}

tokio::task_local! {
    static METERED: Cell<Option<MeteredUsage>>;
}

/// Run `call`, collecting what backends report through [`report_metered`]
///
/// `None` means no backend inside `call` reported its usage. Reports from
/// every retry attempt are summed.
pub async fn metered<F: Future>(call: F) -> (F::Output, Option<MeteredUsage>) {
    METERED
        .scope(Cell::new(None), async move {
            let output = call.await;
            (output, METERED.with(Cell::get))
        })
        .await
}

/// Report vendor-billed usage to the enclosing [`metered`] call, if any
pub fn report_metered(tokens: u64, cost: f64) {
    let _ = METERED.try_with(|cell| {
        let mut usage = cell.get().unwrap_or_default();
        usage.tokens = usage.tokens.saturating_add(tokens);
        usage.cost += cost;
        cell.set(Some(usage));
    });
}

/// Rolling performance figures for one backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Mean latency over the recent window
    #[serde(with = "crate::protocol::types::duration_millis")]
    pub average_latency: Duration,
    /// Share of recent calls that succeeded
    pub success_rate: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
}

#[derive(Debug)]
struct BackendUsage {
    day: NaiveDate,
    stats: UsageStats,
    failed_total: u64,
    /// (latency, succeeded)
    recent: VecDeque<(Duration, bool)>,
}

impl BackendUsage {
    fn new(day: NaiveDate) -> Self {
        Self {
            day,
            stats: UsageStats::default(),
            failed_total: 0,
            recent: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    fn roll(&mut self, today: NaiveDate) {
        if self.day != today {
            self.day = today;
            self.stats.requests_today = 0;
            self.stats.tokens_today = 0;
            self.stats.cost_today = 0.0;
        }
    }

    fn push_sample(&mut self, latency: Duration, succeeded: bool) {
        if self.recent.len() == LATENCY_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back((latency, succeeded));
    }

    fn metrics(&self) -> PerformanceMetrics {
        let samples = self.recent.len() as u32;
        if samples == 0 {
            return PerformanceMetrics {
                total_requests: self.stats.requests_total,
                failed_requests: self.failed_total,
                ..Default::default()
            };
        }
        let total: Duration = self.recent.iter().map(|(latency, _)| *latency).sum();
        let succeeded = self.recent.iter().filter(|(_, ok)| *ok).count();
        PerformanceMetrics {
            average_latency: total / samples,
            success_rate: succeeded as f64 / samples as f64,
            total_requests: self.stats.requests_total,
            failed_requests: self.failed_total,
        }
    }
}

/// Thread-safe usage tracker keyed by backend name
///
/// Cloning shares the underlying counters.
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    backends: Arc<RwLock<HashMap<String, BackendUsage>>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Record a successful call with its token usage and spend
    pub fn record_success(&self, backend: &str, tokens: u64, cost: f64, latency: Duration) {
        self.record_success_on(Self::today(), backend, tokens, cost, latency);
    }

    fn record_success_on(
        &self,
        today: NaiveDate,
        backend: &str,
        tokens: u64,
        cost: f64,
        latency: Duration,
    ) {
        let cost = if cost.is_finite() && cost >= 0.0 {
            cost
        } else {
            warn!(backend, cost, "Ignoring invalid cost value");
            0.0
        };

        let mut backends = self.backends.write().expect("usage lock poisoned");
        let usage = backends
            .entry(backend.to_string())
            .or_insert_with(|| BackendUsage::new(today));
        usage.roll(today);
        usage.stats.requests_today += 1;
        usage.stats.requests_total += 1;
        usage.stats.tokens_today += tokens;
        usage.stats.tokens_total += tokens;
        usage.stats.cost_today += cost;
        usage.stats.cost_total += cost;
        usage.push_sample(latency, true);
    }

    /// Record a failed call; failures count toward latency and success rate only
    pub fn record_failure(&self, backend: &str, latency: Duration) {
        let today = Self::today();
        let mut backends = self.backends.write().expect("usage lock poisoned");
        let usage = backends
            .entry(backend.to_string())
            .or_insert_with(|| BackendUsage::new(today));
        usage.roll(today);
        usage.failed_total += 1;
        usage.push_sample(latency, false);
    }

    /// Counters for one backend
    pub fn stats(&self, backend: &str) -> UsageStats {
        self.stats_on(Self::today(), backend)
    }

    fn stats_on(&self, today: NaiveDate, backend: &str) -> UsageStats {
        let backends = self.backends.read().expect("usage lock poisoned");
        backends
            .get(backend)
            .map(|usage| visible_stats(usage, today))
            .unwrap_or_default()
    }

    /// Counters summed over every backend
    pub fn aggregate(&self) -> UsageStats {
        self.aggregate_on(Self::today())
    }

    fn aggregate_on(&self, today: NaiveDate) -> UsageStats {
        let backends = self.backends.read().expect("usage lock poisoned");
        let mut total = UsageStats::default();
        for usage in backends.values() {
            total.add(&visible_stats(usage, today));
        }
        total
    }

    /// Rolling performance figures for one backend
    pub fn metrics(&self, backend: &str) -> PerformanceMetrics {
        let backends = self.backends.read().expect("usage lock poisoned");
        backends
            .get(backend)
            .map(BackendUsage::metrics)
            .unwrap_or_default()
    }
}

/// Stats as of `today`, without mutating under a read lock
fn visible_stats(usage: &BackendUsage, today: NaiveDate) -> UsageStats {
    let mut stats = usage.stats.clone();
    if usage.day != today {
        stats.requests_today = 0;
        stats.tokens_today = 0;
        stats.cost_today = 0.0;
    }
    stats
}

/// Why the budget guard refused a call
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetRefusal {
    Tokens { used: u64, estimated: u64, cap: u64 },
    Spend { spent: f64, cap: f64 },
}

impl std::fmt::Display for BudgetRefusal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tokens { used, estimated, cap } => write!(
                f,
                "daily token cap {} reached ({} used, {} more estimated)",
                cap, used, estimated
            ),
            Self::Spend { spent, cap } => {
                write!(f, "daily spend cap {:.4} reached ({:.4} spent)", cap, spent)
            }
        }
    }
}

/// Daily spend and token caps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetGuard {
    pub daily_cost_cap: Option<f64>,
    pub daily_token_cap: Option<u64>,
}

impl BudgetGuard {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_daily_cost_cap(mut self, cap: f64) -> Self {
        self.daily_cost_cap = Some(cap);
        self
    }

    pub fn with_daily_token_cap(mut self, cap: u64) -> Self {
        self.daily_token_cap = Some(cap);
        self
    }

    /// Check whether a call estimated at `estimated_tokens` may proceed
    pub fn check(&self, usage: &UsageStats, estimated_tokens: u64) -> Result<(), BudgetRefusal> {
        if let Some(cap) = self.daily_token_cap {
            if usage.tokens_today.saturating_add(estimated_tokens) > cap {
                return Err(BudgetRefusal::Tokens {
                    used: usage.tokens_today,
                    estimated: estimated_tokens,
                    cap,
                });
            }
        }
        if let Some(cap) = self.daily_cost_cap {
            if usage.cost_today >= cap {
                return Err(BudgetRefusal::Spend {
                    spent: usage.cost_today,
                    cap,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metered_sums_reports() {
        let ((), usage) = metered(async {
            report_metered(100, 0.01);
            report_metered(40, 0.002);
        })
        .await;
        let usage = usage.unwrap();
        assert_eq!(usage.tokens, 140);
        assert!((usage.cost - 0.012).abs() < 1e-9);

        let ((), usage) = metered(async {}).await;
        assert_eq!(usage, None);

        // Outside a metered call reports are dropped
        report_metered(5, 0.0);
    }

    #[test]
    fn test_records_are_per_backend_and_aggregated() {
        let tracker = UsageTracker::new();
        tracker.record_success("a", 100, 0.01, Duration::from_millis(200));
        tracker.record_success("a", 50, 0.005, Duration::from_millis(400));
        tracker.record_success("b", 10, 0.0, Duration::from_millis(100));

        let a = tracker.stats("a");
        assert_eq!(a.requests_today, 2);
        assert_eq!(a.tokens_total, 150);
        assert!((a.cost_today - 0.015).abs() < 1e-9);

        let all = tracker.aggregate();
        assert_eq!(all.requests_total, 3);
        assert_eq!(all.tokens_today, 160);
        assert_eq!(tracker.stats("missing"), UsageStats::default());
    }

    #[test]
    fn test_metrics_track_latency_and_failures() {
        let tracker = UsageTracker::new();
        tracker.record_success("a", 1, 0.0, Duration::from_millis(100));
        tracker.record_failure("a", Duration::from_millis(300));

        let metrics = tracker.metrics("a");
        assert_eq!(metrics.average_latency, Duration::from_millis(200));
        assert_eq!(metrics.success_rate, 0.5);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.total_requests, 1);
    }

    #[test]
    fn test_today_counters_roll_over() {
        let tracker = UsageTracker::new();
        let day1 = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let day2 = day1.succ_opt().unwrap();

        tracker.record_success_on(day1, "a", 100, 1.0, Duration::ZERO);
        assert_eq!(tracker.stats_on(day1, "a").tokens_today, 100);

        let next_day = tracker.stats_on(day2, "a");
        assert_eq!(next_day.tokens_today, 0);
        assert_eq!(next_day.tokens_total, 100);
        assert_eq!(tracker.aggregate_on(day2).cost_today, 0.0);

        tracker.record_success_on(day2, "a", 5, 0.1, Duration::ZERO);
        let stats = tracker.stats_on(day2, "a");
        assert_eq!(stats.tokens_today, 5);
        assert_eq!(stats.requests_total, 2);
    }

    #[test]
    fn test_budget_token_cap() {
        let guard = BudgetGuard::unlimited().with_daily_token_cap(1000);
        let usage = UsageStats {
            tokens_today: 999,
            ..Default::default()
        };
        assert!(matches!(
            guard.check(&usage, 10),
            Err(BudgetRefusal::Tokens { cap: 1000, .. })
        ));
        assert!(guard.check(&usage, 1).is_ok());
    }

    #[test]
    fn test_budget_spend_cap() {
        let guard = BudgetGuard::unlimited().with_daily_cost_cap(5.0);
        let mut usage = UsageStats {
            cost_today: 4.99,
            ..Default::default()
        };
        assert!(guard.check(&usage, 1_000_000).is_ok());
        usage.cost_today = 5.0;
        assert!(matches!(guard.check(&usage, 1), Err(BudgetRefusal::Spend { .. })));
    }
}
