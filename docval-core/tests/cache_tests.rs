//! Response cache expiry and request fingerprinting

use docval_core::cache::{CacheKey, ResponseCache};
use docval_core::protocol::{TutorialContext, ValidationResult};
use docval_core::providers::{TaskOutput, TaskRequest};
use docval_core::TaskType;
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;

fn validate_request<'a>(
    context: &'a TutorialContext,
    expected: &'a str,
    actual: &'a str,
) -> TaskRequest<'a> {
    TaskRequest::ValidateExpectation {
        context,
        expected,
        actual,
    }
}

#[tokio::test(start_paused = true)]
async fn test_entry_expires_after_ttl() {
    let cache = ResponseCache::new();
    let key = CacheKey::from("validate_expectation:abc");

    cache.set(&key, json!({"success": true}), Duration::from_secs(3600)).await;
    tokio::time::advance(Duration::from_secs(3599)).await;
    assert!(cache.get(&key).await.is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(cache.get(&key).await.is_none());
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_janitor_purges_expired_entries() {
    let cache = std::sync::Arc::new(ResponseCache::new());
    cache.set(&CacheKey::from("a"), json!(1), Duration::from_secs(10)).await;
    cache.set(&CacheKey::from("b"), json!(2), Duration::from_secs(1000)).await;

    let janitor = cache.spawn_janitor(Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(cache.stats().total_entries, 1);

    janitor.shutdown().await;
}

#[tokio::test]
async fn test_typed_output_survives_disk_restart() {
    let dir = tempfile::tempdir().unwrap();
    let context = TutorialContext::new("/srv/app");
    let request = validate_request(&context, "Server running", "Server running on port 3000");
    let key = CacheKey::for_request(&request);
    let result = ValidationResult::new(true, 0.92).with_reasoning("prefix match");
    let output = TaskOutput::Validation(result);

    {
        let disk = docval_core::cache::DiskTier::open(dir.path()).await.unwrap();
        let cache = ResponseCache::new().with_disk(disk);
        cache.set_output(&key, &output, Duration::from_secs(3600)).await;
    }

    let disk = docval_core::cache::DiskTier::open(dir.path()).await.unwrap();
    let reopened = ResponseCache::new().with_disk(disk);
    assert_eq!(
        reopened.get_output(&key, TaskType::ValidateExpectation).await,
        Some(output)
    );
}

#[test]
fn test_key_depends_on_semantic_context() {
    let base = TutorialContext::new("/work").with_step(1, 3);
    let moved = TutorialContext::new("/elsewhere").with_step(1, 3);
    let later = TutorialContext::new("/work").with_step(2, 3);
    let with_env = base.clone().with_env("PATH", "/usr/bin").with_output("hello");

    let key = |context: &TutorialContext| {
        CacheKey::for_request(&validate_request(context, "ok", "ok"))
    };
    assert_ne!(key(&base), key(&moved));
    assert_ne!(key(&base), key(&later));
    assert_eq!(key(&base), key(&with_env));
}

#[test]
fn test_key_separates_task_types() {
    let context = TutorialContext::new("/work");
    let parse = CacheKey::for_request(&TaskRequest::ParseInstruction {
        context: &context,
        instruction: "ok",
    });
    let interpret = CacheKey::for_request(&TaskRequest::InterpretError {
        context: &context,
        error_message: "ok",
    });
    assert_ne!(parse, interpret);
    assert_eq!(parse.task(), Some(TaskType::ParseInstruction));
}

proptest! {
    #[test]
    fn prop_key_ignores_whitespace_layout(
        words in prop::collection::vec("[a-zA-Z0-9./-]{1,12}", 1..8),
        pad in 1usize..4,
    ) {
        let context = TutorialContext::new("/work");
        let compact = words.join(" ");
        let padded = format!("{}{}{}", " ".repeat(pad), words.join(&" ".repeat(pad)), "\n");

        let a = TaskRequest::ParseInstruction { context: &context, instruction: &compact };
        let b = TaskRequest::ParseInstruction { context: &context, instruction: &padded };
        prop_assert_eq!(CacheKey::for_request(&a), CacheKey::for_request(&b));
    }

    #[test]
    fn prop_key_is_deterministic(instruction in ".{0,64}", dir in "/[a-z]{1,10}") {
        let context = TutorialContext::new(dir);
        let request =
            TaskRequest::ParseInstruction { context: &context, instruction: &instruction };
        prop_assert_eq!(CacheKey::for_request(&request), CacheKey::for_request(&request));
    }

    #[test]
    fn prop_key_separates_distinct_text(a in "[a-z]{1,16}", b in "[a-z]{1,16}") {
        prop_assume!(a != b);
        let context = TutorialContext::new("/work");
        let ra = TaskRequest::InterpretError { context: &context, error_message: &a };
        let rb = TaskRequest::InterpretError { context: &context, error_message: &b };
        prop_assert_ne!(CacheKey::for_request(&ra), CacheKey::for_request(&rb));
    }
}
