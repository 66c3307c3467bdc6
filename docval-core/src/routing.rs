//! Backend selection
//!
//! Hard constraints filter the pool first; a healthy task override wins
//! outright; everything else is ordered by a weighted score with stable,
//! deterministic tie-breaking.

use crate::protocol::TaskType;
use crate::providers::BackendDescriptor;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Score resolution; finer differences are ties
const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RoutingError {
    #[error("No suitable backend for {task}: none of {considered} registered backends satisfies the constraints")]
    NoSuitableBackend { task: TaskType, considered: usize },
}

/// Weights of the selection score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub quality: f64,
    pub certification: f64,
    pub cost: f64,
    pub latency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            quality: 0.4,
            certification: 0.2,
            cost: 0.2,
            latency: 0.2,
        }
    }
}

impl ScoreWeights {
    /// Shifts weight from quality and certification onto cost
    pub fn cost_optimized() -> Self {
        Self {
            quality: 0.3,
            certification: 0.1,
            cost: 0.4,
            latency: 0.2,
        }
    }
}

/// Caller constraints on which backend may serve a request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionConstraints {
    /// Ceiling on the backend's p95 latency
    pub max_latency: Option<Duration>,
    /// Ceiling on the estimated cost of this request
    pub max_cost_per_request: Option<f64>,
    pub offline_required: bool,
    pub enterprise_required: bool,
    pub min_quality: Option<f64>,
    /// Preferred among otherwise equal candidates
    pub preferred_region: Option<String>,
}

impl SelectionConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offline(mut self) -> Self {
        self.offline_required = true;
        self
    }

    pub fn enterprise(mut self) -> Self {
        self.enterprise_required = true;
        self
    }

    pub fn with_max_latency(mut self, latency: Duration) -> Self {
        self.max_latency = Some(latency);
        self
    }

    pub fn with_max_cost(mut self, cost: f64) -> Self {
        self.max_cost_per_request = Some(cost);
        self
    }

    pub fn with_min_quality(mut self, quality: f64) -> Self {
        self.min_quality = Some(quality);
        self
    }

    pub fn with_preferred_region(mut self, region: impl Into<String>) -> Self {
        self.preferred_region = Some(region.into());
        self
    }

    /// Why a candidate fails a hard constraint, if it does
    fn rejection(&self, candidate: &Candidate<'_>) -> Option<&'static str> {
        let descriptor = candidate.descriptor;
        if self.offline_required && !descriptor.offline {
            return Some("not offline-capable");
        }
        if self.enterprise_required && !descriptor.enterprise {
            return Some("not enterprise");
        }
        if let Some(min) = self.min_quality {
            if descriptor.quality_score < min {
                return Some("below minimum quality");
            }
        }
        if let Some(max) = self.max_latency {
            if descriptor.latency.p95 > max {
                return Some("too slow");
            }
        }
        if let Some(max) = self.max_cost_per_request {
            if candidate.cost > max {
                return Some("too expensive");
            }
        }
        None
    }
}

/// One backend as seen by the router
///
/// Position in the candidate slice is the registration order.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub descriptor: &'a BackendDescriptor,
    /// Estimated cost of the request at hand
    pub cost: f64,
    pub healthy: bool,
}

/// A candidate that survived filtering, with its score
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    /// Index into the candidate slice
    pub index: usize,
    pub name: String,
    pub score: f64,
    /// Selected through a task override
    pub overridden: bool,
}

/// Selects backends for a task
#[derive(Debug, Clone, Default)]
pub struct Router {
    overrides: HashMap<TaskType, String>,
    weights: ScoreWeights,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Route a task to a named backend whenever it is eligible and healthy
    pub fn with_override(mut self, task: TaskType, backend: impl Into<String>) -> Self {
        self.overrides.insert(task, backend.into());
        self
    }

    pub fn with_overrides(mut self, overrides: HashMap<TaskType, String>) -> Self {
        self.overrides.extend(overrides);
        self
    }

    pub fn overrides(&self) -> &HashMap<TaskType, String> {
        &self.overrides
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    /// Order every eligible candidate, best first
    pub fn rank(
        &self,
        task: TaskType,
        candidates: &[Candidate<'_>],
        constraints: &SelectionConstraints,
    ) -> Result<Vec<Ranked>, RoutingError> {
        let eligible: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter_map(|(index, candidate)| match constraints.rejection(candidate) {
                Some(reason) => {
                    debug!(
                        task = %task,
                        backend = %candidate.descriptor.name,
                        reason,
                        "Backend filtered out"
                    );
                    None
                }
                None => Some(index),
            })
            .collect();

        if eligible.is_empty() {
            return Err(RoutingError::NoSuitableBackend {
                task,
                considered: candidates.len(),
            });
        }

        let max_cost = eligible
            .iter()
            .map(|&i| candidates[i].cost)
            .fold(0.0, f64::max);
        let max_latency = eligible
            .iter()
            .map(|&i| candidates[i].descriptor.latency.p50.as_secs_f64())
            .fold(0.0, f64::max);

        let mut ranked: Vec<Ranked> = eligible
            .into_iter()
            .map(|index| {
                let candidate = &candidates[index];
                Ranked {
                    index,
                    name: candidate.descriptor.name.clone(),
                    score: self.score(candidate, max_cost, max_latency),
                    overridden: false,
                }
            })
            .collect();

        ranked.sort_by(|a, b| {
            compare(&candidates[a.index], a, &candidates[b.index], b, constraints)
        });

        if let Some(name) = self.overrides.get(&task) {
            if let Some(pos) = ranked
                .iter()
                .position(|r| &r.name == name && candidates[r.index].healthy)
            {
                let mut chosen = ranked.remove(pos);
                chosen.overridden = true;
                ranked.insert(0, chosen);
            } else {
                debug!(task = %task, backend = %name, "Override not eligible, scoring instead");
            }
        }

        Ok(ranked)
    }

    /// Best candidate for a task
    pub fn select(
        &self,
        task: TaskType,
        candidates: &[Candidate<'_>],
        constraints: &SelectionConstraints,
    ) -> Result<Ranked, RoutingError> {
        let mut ranked = self.rank(task, candidates, constraints)?;
        Ok(ranked.remove(0))
    }

    fn score(&self, candidate: &Candidate<'_>, max_cost: f64, max_latency: f64) -> f64 {
        let descriptor = candidate.descriptor;
        let bonus = descriptor.certification.map(|level| level.bonus()).unwrap_or(0.0);
        let cost = normalized(candidate.cost, max_cost);
        let latency = normalized(descriptor.latency.p50.as_secs_f64(), max_latency);
        self.weights.quality * descriptor.quality_score
            + self.weights.certification * bonus
            + self.weights.cost * cost
            + self.weights.latency * latency
    }
}

/// 1 for the cheapest/fastest, 0 for the pool maximum
fn normalized(value: f64, max: f64) -> f64 {
    if max <= 0.0 {
        1.0
    } else {
        (1.0 - value / max).clamp(0.0, 1.0)
    }
}

fn quantized(score: f64) -> i64 {
    (score / SCORE_EPSILON).round() as i64
}

/// Healthy first, then score, region match, certification and
/// registration order
fn compare(
    a_candidate: &Candidate<'_>,
    a: &Ranked,
    b_candidate: &Candidate<'_>,
    b: &Ranked,
    constraints: &SelectionConstraints,
) -> Ordering {
    let region_match = |candidate: &Candidate<'_>| match &constraints.preferred_region {
        Some(region) => candidate.descriptor.region.as_deref() == Some(region.as_str()),
        None => false,
    };
    let bonus = |candidate: &Candidate<'_>| {
        candidate
            .descriptor
            .certification
            .map(|level| level.bonus())
            .unwrap_or(0.0)
    };

    b_candidate
        .healthy
        .cmp(&a_candidate.healthy)
        .then_with(|| quantized(b.score).cmp(&quantized(a.score)))
        .then_with(|| region_match(b_candidate).cmp(&region_match(a_candidate)))
        .then_with(|| bonus(b_candidate).total_cmp(&bonus(a_candidate)))
        .then_with(|| a.index.cmp(&b.index))
}
