//! Certification gating, routing constraints and overrides through the registry

mod common;

use common::{gold_certifier, registry_with, ScriptedBackend};
use docval_core::certification::{CategoryScores, CertificationLevel, StaticCertifier};
use docval_core::protocol::{TaskType, TutorialContext};
use docval_core::providers::TaskRequest;
use docval_core::{BackendRegistry, RegistryError, Router, RoutingError, SelectionConstraints};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_low_scoring_backend_is_rejected() {
    let certifier = StaticCertifier::new()
        .with_scores("weak", CategoryScores::uniform(0.65), Duration::from_secs(1))
        .with_scores(
            "strong",
            CategoryScores {
                parsing: 0.96,
                validation: 0.92,
                context: 0.90,
                error_recovery: 0.88,
                cost_efficiency: 0.90,
            },
            Duration::from_secs(1),
        );
    let registry = BackendRegistry::new(Arc::new(certifier), Router::new());

    let err = registry
        .register(Arc::new(ScriptedBackend::new("weak")))
        .await
        .unwrap_err();
    match err {
        RegistryError::CertificationFailed { backend, score, .. } => {
            assert_eq!(backend, "weak");
            assert!(score < 0.70);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!registry.contains("weak"));

    let report = registry
        .register(Arc::new(ScriptedBackend::new("strong")))
        .await
        .unwrap();
    assert_eq!(report.level, Some(CertificationLevel::Gold));
    assert_eq!(
        registry.entry("strong").unwrap().descriptor().certification,
        Some(CertificationLevel::Gold)
    );
}

#[tokio::test]
async fn test_duplicate_name_is_rejected() {
    let registry = registry_with(&[Arc::new(ScriptedBackend::new("a"))]).await;
    let err = registry
        .register(Arc::new(ScriptedBackend::new("a")))
        .await
        .unwrap_err();
    assert_eq!(err, RegistryError::Duplicate("a".to_string()));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_offline_constraint_picks_local_backend() {
    let registry = registry_with(&[
        Arc::new(ScriptedBackend::new("cloud")),
        Arc::new(ScriptedBackend::offline("local")),
    ])
    .await;

    let selected = registry
        .recommend_for_task(TaskType::ParseInstruction, &SelectionConstraints::new().offline())
        .unwrap();
    assert_eq!(selected.name(), "local");
}

#[tokio::test]
async fn test_unsatisfiable_constraints_report_no_backend() {
    let registry = registry_with(&[Arc::new(ScriptedBackend::new("cloud"))]).await;

    let err = registry
        .recommend_for_task(TaskType::ValidateExpectation, &SelectionConstraints::new().offline())
        .err().unwrap();
    assert_eq!(
        err,
        RoutingError::NoSuitableBackend {
            task: TaskType::ValidateExpectation,
            considered: 1,
        }
    );
}

#[tokio::test]
async fn test_task_override_wins_over_score() {
    let registry = BackendRegistry::new(
        gold_certifier(),
        Router::new().with_override(TaskType::CompressContext, "local"),
    );
    registry.register(Arc::new(ScriptedBackend::new("cloud"))).await.unwrap();
    registry
        .register(Arc::new(ScriptedBackend::offline("local").with_latency(
            docval_core::providers::LatencyProfile::new(
                Duration::from_secs(5),
                Duration::from_secs(9),
                Duration::from_secs(20),
            ),
        )))
        .await
        .unwrap();

    let context = TutorialContext::new("/work");
    let compress = TaskRequest::CompressContext { context: &context };
    let ranked = registry.rank(&compress, &SelectionConstraints::new()).unwrap();
    assert_eq!(ranked[0].0.name(), "local");
    assert!(ranked[0].1.overridden);
}

#[tokio::test]
async fn test_unhealthy_backend_is_ranked_last() {
    let registry = registry_with(&[
        Arc::new(ScriptedBackend::new("a")),
        Arc::new(ScriptedBackend::new("b")),
    ])
    .await;
    registry.set_health("a", false).unwrap();

    let selected = registry
        .recommend_for_task(TaskType::InterpretError, &SelectionConstraints::new())
        .unwrap();
    assert_eq!(selected.name(), "b");
}

#[tokio::test]
async fn test_health_sweep_restores_backend() {
    let registry = registry_with(&[Arc::new(ScriptedBackend::new("a"))]).await;
    registry.set_health("a", false).unwrap();

    let statuses = registry.check_health().await;
    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].healthy);
    assert!(registry.entry("a").unwrap().is_healthy());
}
