//! Backend quality certification
//!
//! A backend is scored on five categories, the weighted sum is penalized
//! for slow responses, and the result is mapped onto a certification level.
//! Backends below [`MIN_OVERALL_SCORE`] are not certified at all and the
//! registry refuses them.

pub mod benchmark;
pub mod probes;

pub use benchmark::BenchmarkSuite;

use crate::protocol::types::duration_millis;
use crate::providers::Backend;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Lowest overall score that still certifies a backend
pub const MIN_OVERALL_SCORE: f64 = 0.70;

/// Average probe latency above which the overall score is penalized
pub const LATENCY_CEILING: Duration = Duration::from_secs(10);

/// Multiplier applied to the overall score past the latency ceiling
pub const LATENCY_PENALTY: f64 = 0.8;

/// Slack for float error when comparing scores against thresholds
const SCORE_EPSILON: f64 = 1e-9;

fn meets(score: f64, threshold: f64) -> bool {
    score + SCORE_EPSILON >= threshold
}

/// Quality tier of a certified backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CertificationLevel {
    Gold,
    Silver,
    Bronze,
    Community,
    Enterprise,
}

impl CertificationLevel {
    /// Routing bonus in [0, 1]
    pub fn bonus(&self) -> f64 {
        match self {
            Self::Gold => 1.0,
            Self::Enterprise => 0.9,
            Self::Silver => 0.8,
            Self::Bronze => 0.6,
            Self::Community => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gold => "gold",
            Self::Silver => "silver",
            Self::Bronze => "bronze",
            Self::Community => "community",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for CertificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scored benchmark category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Parsing,
    Validation,
    Context,
    ErrorRecovery,
    CostEfficiency,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Parsing,
        Category::Validation,
        Category::Context,
        Category::ErrorRecovery,
        Category::CostEfficiency,
    ];

    /// Weight in the overall score; the weights sum to 1
    pub fn weight(&self) -> f64 {
        match self {
            Self::Parsing => 0.25,
            Self::Validation => 0.25,
            Self::Context => 0.20,
            Self::ErrorRecovery => 0.15,
            Self::CostEfficiency => 0.15,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::Validation => "validation",
            Self::Context => "context",
            Self::ErrorRecovery => "error_recovery",
            Self::CostEfficiency => "cost_efficiency",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub parsing: f64,
    pub validation: f64,
    pub context: f64,
    pub error_recovery: f64,
    pub cost_efficiency: f64,
}

impl CategoryScores {
    /// Every category at the same score
    pub fn uniform(score: f64) -> Self {
        Self {
            parsing: score,
            validation: score,
            context: score,
            error_recovery: score,
            cost_efficiency: score,
        }
    }

    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Parsing => self.parsing,
            Category::Validation => self.validation,
            Category::Context => self.context,
            Category::ErrorRecovery => self.error_recovery,
            Category::CostEfficiency => self.cost_efficiency,
        }
    }

    /// Weighted sum before any latency penalty
    pub fn weighted(&self) -> f64 {
        Category::ALL
            .iter()
            .map(|category| category.weight() * self.get(*category))
            .sum()
    }
}

/// Thresholds for one certification level
struct Tier {
    level: CertificationLevel,
    min_overall: f64,
    floors: [(Category, f64); 4],
    max_latency: Duration,
}

/// Highest tier first
const TIERS: [Tier; 3] = [
    Tier {
        level: CertificationLevel::Gold,
        min_overall: 0.90,
        floors: [
            (Category::Parsing, 0.95),
            (Category::Validation, 0.90),
            (Category::Context, 0.85),
            (Category::CostEfficiency, 0.70),
        ],
        max_latency: Duration::from_secs(5),
    },
    Tier {
        level: CertificationLevel::Silver,
        min_overall: 0.80,
        floors: [
            (Category::Parsing, 0.85),
            (Category::Validation, 0.80),
            (Category::Context, 0.75),
            (Category::CostEfficiency, 0.60),
        ],
        max_latency: Duration::from_secs(10),
    },
    Tier {
        level: CertificationLevel::Bronze,
        min_overall: MIN_OVERALL_SCORE,
        floors: [
            (Category::Parsing, 0.75),
            (Category::Validation, 0.70),
            (Category::Context, 0.65),
            (Category::CostEfficiency, 0.50),
        ],
        max_latency: Duration::from_secs(15),
    },
];

impl Tier {
    fn admits(&self, overall: f64, scores: &CategoryScores, latency: Duration) -> bool {
        meets(overall, self.min_overall)
            && latency <= self.max_latency
            && self
                .floors
                .iter()
                .all(|(category, floor)| meets(scores.get(*category), *floor))
    }
}

/// Outcome of certifying one backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificationReport {
    pub backend: String,
    pub scores: CategoryScores,
    #[serde(with = "duration_millis")]
    pub average_latency: Duration,
    /// Weighted score after the latency penalty
    pub overall: f64,
    /// `None` when the backend is rejected
    pub level: Option<CertificationLevel>,
    /// Categories under the bronze floor
    pub failing: Vec<Category>,
    pub latency_penalized: bool,
    /// Benchmark passes averaged into the scores
    pub runs: usize,
}

impl CertificationReport {
    pub fn is_certified(&self) -> bool {
        self.level.is_some()
    }

    /// Same level and overall scores within `tolerance`
    pub fn is_consistent_with(&self, other: &CertificationReport, tolerance: f64) -> bool {
        self.level == other.level && (self.overall - other.overall).abs() <= tolerance
    }
}

/// Score a backend and assign its level
///
/// `enterprise` marks a backend that declares an enterprise deployment; it
/// is certified enterprise in place of silver or bronze.
pub fn evaluate(
    backend: impl Into<String>,
    scores: CategoryScores,
    average_latency: Duration,
    enterprise: bool,
    runs: usize,
) -> CertificationReport {
    let latency_penalized = average_latency > LATENCY_CEILING;
    let mut overall = scores.weighted();
    if latency_penalized {
        overall *= LATENCY_PENALTY;
    }

    let level = if !meets(overall, MIN_OVERALL_SCORE) {
        None
    } else {
        let level = TIERS
            .iter()
            .find(|tier| tier.admits(overall, &scores, average_latency))
            .map(|tier| tier.level)
            .unwrap_or(CertificationLevel::Community);
        match level {
            CertificationLevel::Silver | CertificationLevel::Bronze if enterprise => {
                Some(CertificationLevel::Enterprise)
            }
            level => Some(level),
        }
    };

    CertificationReport {
        backend: backend.into(),
        scores,
        average_latency,
        overall,
        level,
        failing: failing_categories(&scores),
        latency_penalized,
        runs,
    }
}

/// Categories under the bronze floor; error recovery has no floor and is
/// held to the minimum overall score instead
fn failing_categories(scores: &CategoryScores) -> Vec<Category> {
    let bronze = &TIERS[2];
    Category::ALL
        .into_iter()
        .filter(|category| {
            let floor = bronze
                .floors
                .iter()
                .find(|(c, _)| c == category)
                .map(|(_, floor)| *floor)
                .unwrap_or(MIN_OVERALL_SCORE);
            !meets(scores.get(*category), floor)
        })
        .collect()
}

/// Produces a certification report for a backend at registration
#[async_trait]
pub trait Certifier: Send + Sync {
    async fn certify(&self, backend: &dyn Backend) -> CertificationReport;
}

/// Certifier that replays stored scores instead of running probes
///
/// Used for backends certified out of band and in tests. A backend with no
/// stored scores falls back to the default, or is scored zero.
#[derive(Debug, Clone, Default)]
pub struct StaticCertifier {
    scores: HashMap<String, (CategoryScores, Duration)>,
    default: Option<(CategoryScores, Duration)>,
}

impl StaticCertifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every backend receives these scores
    pub fn uniform(scores: CategoryScores, latency: Duration) -> Self {
        Self {
            scores: HashMap::new(),
            default: Some((scores, latency)),
        }
    }

    pub fn with_scores(
        mut self,
        backend: impl Into<String>,
        scores: CategoryScores,
        latency: Duration,
    ) -> Self {
        self.scores.insert(backend.into(), (scores, latency));
        self
    }
}

#[async_trait]
impl Certifier for StaticCertifier {
    async fn certify(&self, backend: &dyn Backend) -> CertificationReport {
        let (scores, latency) = self
            .scores
            .get(backend.name())
            .copied()
            .or(self.default)
            .unwrap_or_default();
        evaluate(
            backend.name(),
            scores,
            latency,
            backend.capabilities().enterprise,
            1,
        )
    }
}
