//! Docval Core Library
//!
//! AI backend orchestration for tutorial validation. Callers ask for one of
//! four tasks (parse an instruction, validate an expectation, compress a
//! context, interpret an error) and the [`ResilientClient`] picks a
//! certified backend, caches the answer, enforces the daily budget and falls
//! back to other backends or to deterministic rules when a backend fails.

pub mod background;
pub mod cache;
pub mod certification;
pub mod client;
pub mod config;
pub mod http;
pub mod protocol;
pub mod providers;
pub mod registry;
pub mod routing;
pub mod rules;
pub mod usage;

pub use cache::{CacheKey, CachePolicy, ResponseCache};
pub use certification::{BenchmarkSuite, CertificationLevel, CertificationReport, Certifier};
pub use client::{CallOptions, ClientError, ClientResult, ClientSettings, ResilientClient};
pub use config::DocvalConfig;
pub use protocol::{
    CompressedContext, ErrorInterpretation, ParsedInstruction, TaskType, TutorialContext,
    ValidationResult,
};
pub use providers::{Backend, BackendDescriptor, BackendError, BackendResult, LlmBackend};
pub use registry::{BackendRegistry, RegistryError};
pub use routing::{Router, RoutingError, ScoreWeights, SelectionConstraints};
pub use usage::{BudgetGuard, UsageStats};

/// Returns the version of the Docval Core library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
