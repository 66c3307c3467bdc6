//! Outbound HTTP to hosted and local model servers
//!
//! [`HttpClient`] owns the pooled connection; [`error::map_http_error`] turns
//! non-2xx responses into [`BackendError`](crate::providers::BackendError)s
//! carrying retry hints.

pub mod client;
pub mod error;

pub use client::HttpClient;

use crate::protocol::TaskType;
use std::time::Duration;
use uuid::Uuid;

/// Header carrying [`RequestOptions::request_id`] to the vendor
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-call settings threaded from the client down to the wire
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Shared by every retry of one logical call
    pub request_id: Uuid,
    pub timeout: Duration,
    /// Unset for health probes
    pub task: Option<TaskType>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            timeout: DEFAULT_TIMEOUT,
            task: None,
        }
    }
}

impl RequestOptions {
    pub fn new(task: TaskType) -> Self {
        Self {
            task: Some(task),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Label for log lines: the task name, or `probe`
    pub fn label(&self) -> &'static str {
        self.task.as_ref().map(TaskType::as_str).unwrap_or("probe")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        let options = RequestOptions::new(TaskType::InterpretError)
            .with_timeout(Duration::from_secs(2));
        assert_eq!(options.label(), "interpret_error");
        assert_eq!(options.timeout, Duration::from_secs(2));
        assert_eq!(RequestOptions::default().label(), "probe");
    }

    #[test]
    fn test_each_call_gets_fresh_id() {
        assert_ne!(RequestOptions::default().request_id, RequestOptions::default().request_id);
    }
}
