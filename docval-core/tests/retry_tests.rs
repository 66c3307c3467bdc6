//! Tests for retry policy and HTTP error mapping

use docval_core::http::error::map_http_error;
use docval_core::providers::{BackendError, RetryExecutor, RetryPolicy};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;
use test_case::test_case;
use uuid::Uuid;

fn fixed(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay_ms: 10,
        max_delay_ms: 100,
        exponential_base: 2.0,
        jitter_factor: 0.0,
        respect_retry_after: false,
        timeout_ms: None,
    }
}

#[test]
fn test_retry_policy_configurations() {
    let default_policy = RetryPolicy::default();
    assert_eq!(default_policy.max_retries, 2);
    assert_eq!(default_policy.initial_delay_ms, 200);
    assert!(default_policy.respect_retry_after);

    let conservative = RetryPolicy::conservative();
    assert_eq!(conservative.max_retries, 1);
    assert_eq!(conservative.exponential_base, 3.0);

    assert_eq!(RetryPolicy::no_retry().max_retries, 0);
}

#[test]
fn test_backoff_is_capped() {
    let policy = RetryPolicy {
        max_retries: 10,
        initial_delay_ms: 100,
        max_delay_ms: 1000,
        ..fixed(10)
    };

    assert_eq!(policy.calculate_delay(0, &BackendError::Timeout).as_millis(), 100);
    assert_eq!(policy.calculate_delay(3, &BackendError::Timeout).as_millis(), 800);
    for attempt in 4..10 {
        assert_eq!(policy.calculate_delay(attempt, &BackendError::Timeout).as_millis(), 1000);
    }
}

#[test]
fn test_jitter_stays_in_band() {
    let policy = RetryPolicy {
        initial_delay_ms: 1000,
        max_delay_ms: 10_000,
        jitter_factor: 0.5,
        ..fixed(3)
    };
    let error = BackendError::ServerError {
        status_code: 503,
        message: "Service unavailable".to_string(),
    };

    for _ in 0..20 {
        let delay = policy.calculate_delay(0, &error).as_millis();
        assert!((500..=1500).contains(&delay), "delay {} out of band", delay);
    }
}

#[test]
fn test_retry_hint_is_capped_by_max_delay() {
    let policy = RetryPolicy {
        respect_retry_after: true,
        ..fixed(2)
    };
    let error = BackendError::RateLimit {
        retry_after: Some(Duration::from_secs(10)),
    };
    assert_eq!(policy.calculate_delay(0, &error), Duration::from_millis(100));
}

#[test_case(BackendError::Timeout, true ; "timeout")]
#[test_case(BackendError::RateLimit { retry_after: None }, true ; "rate limit")]
#[test_case(BackendError::Network("reset".into()), true ; "network")]
#[test_case(BackendError::ServerError { status_code: 502, message: String::new() }, true ; "bad gateway")]
#[test_case(BackendError::Authentication("bad key".into()), false ; "authentication")]
#[test_case(BackendError::InvalidRequest("bad".into()), false ; "invalid request")]
#[test_case(BackendError::unsupported("x", "interpret_error"), false ; "unsupported")]
fn test_should_retry_follows_error_class(error: BackendError, retryable: bool) {
    let policy = RetryPolicy::new(2);
    assert_eq!(policy.should_retry(&error, 0), retryable);
    assert!(!policy.should_retry(&error, 2));
}

#[tokio::test]
async fn test_executor_succeeds_on_third_call() {
    let executor = RetryExecutor::new(fixed(3));

    let mut attempt_count = 0;
    let outcome = executor
        .execute("flaky", || {
            attempt_count += 1;
            let current = attempt_count;
            async move {
                if current <= 2 {
                    Err(BackendError::Timeout)
                } else {
                    Ok("done")
                }
            }
        })
        .await;

    assert_eq!(outcome.calls, 3);
    assert_eq!(outcome.error_history.len(), 2);
    assert_eq!(outcome.into_result().unwrap(), "done");
}

#[tokio::test]
async fn test_executor_exhausts_retries() {
    let executor = RetryExecutor::new(fixed(2));

    let outcome = executor
        .execute("down", || async {
            Err::<(), _>(BackendError::ServerError {
                status_code: 500,
                message: "Internal error".to_string(),
            })
        })
        .await;

    assert_eq!(outcome.calls, 3);
    assert_eq!(outcome.error_history.len(), 3);
    assert!(matches!(outcome.result, Err(BackendError::ServerError { status_code: 500, .. })));
}

#[tokio::test]
async fn test_executor_stops_on_permanent_error() {
    let executor = RetryExecutor::new(RetryPolicy::default());

    let outcome = executor
        .execute("auth", || async {
            Err::<(), _>(BackendError::Authentication("invalid key".into()))
        })
        .await;

    assert_eq!(outcome.calls, 1);
    assert_eq!(outcome.total_delay, Duration::ZERO);
    assert!(matches!(outcome.result, Err(BackendError::Authentication(_))));
}

#[test_case(StatusCode::UNAUTHORIZED ; "401")]
#[test_case(StatusCode::FORBIDDEN ; "403")]
fn test_auth_statuses_are_permanent(status: StatusCode) {
    let error = map_http_error(status, None, None, Uuid::new_v4());
    assert!(matches!(error, BackendError::Authentication(_)));
    assert!(!error.is_retryable());
}

#[test]
fn test_status_mapping() {
    let id = Uuid::new_v4();
    assert!(matches!(
        map_http_error(StatusCode::BAD_REQUEST, None, Some("bad json".into()), id),
        BackendError::InvalidRequest(_)
    ));
    assert!(matches!(
        map_http_error(StatusCode::GATEWAY_TIMEOUT, None, None, id),
        BackendError::Timeout
    ));
    assert!(matches!(
        map_http_error(StatusCode::SERVICE_UNAVAILABLE, None, None, id),
        BackendError::ServerError { status_code: 503, .. }
    ));
}

#[test]
fn test_rate_limit_reads_retry_after_header() {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));

    let error = map_http_error(StatusCode::TOO_MANY_REQUESTS, Some(&headers), None, Uuid::new_v4());
    assert_eq!(error.retry_delay(), Some(Duration::from_secs(7)));
}

#[test]
fn test_error_body_message_is_kept() {
    let body = r#"{"error": {"message": "model overloaded", "type": "server_error"}}"#;
    let error = map_http_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        None,
        Some(body.to_string()),
        Uuid::new_v4(),
    );
    assert!(error.to_string().contains("model overloaded"));
}
