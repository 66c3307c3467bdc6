//! Protocol module for AI task request/response structures
//!
//! This module defines the canonical data models exchanged with AI backends.
//! These structures are designed to be:
//! - Backend-agnostic
//! - Cacheable (every type round-trips through serde)
//! - Extensible through metadata fields

pub mod types;

pub use types::{
    clamp_unit, Action, ActionKind, CompressedContext, ErrorCategory, ErrorInterpretation,
    ExpectedValue, ParsedInstruction, RuleKind, Solution, TaskType, TutorialContext,
    ValidationResult, ValidationRule,
};
