//! Core protocol types for AI-assisted tutorial validation
//!
//! This module contains the data structures exchanged between the
//! validation pipeline and the AI backends. The design prioritizes:
//! - Type safety through enums for every closed tag set
//! - Tolerant deserialization (backends are not always precise)
//! - Forward compatibility through metadata fields

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Execution state of a tutorial, passed into every AI task
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TutorialContext {
    /// Working directory the tutorial is currently executing in
    #[serde(default)]
    pub working_directory: String,

    /// Environment variables visible to executed commands
    #[serde(default)]
    pub environment: HashMap<String, String>,

    /// Files created so far, in creation order
    #[serde(default)]
    pub created_files: Vec<String>,

    /// Commands executed so far, in execution order
    #[serde(default)]
    pub executed_commands: Vec<String>,

    /// Outputs of previous steps, in execution order
    #[serde(default)]
    pub previous_outputs: Vec<String>,

    /// Index of the step being executed (1-based)
    #[serde(default)]
    pub current_step: u32,

    /// Total number of steps in the tutorial
    #[serde(default)]
    pub total_steps: u32,

    /// Free-form metadata supplied by the caller
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl TutorialContext {
    /// Create a context rooted at a working directory
    pub fn new(working_directory: impl Into<String>) -> Self {
        Self {
            working_directory: working_directory.into(),
            ..Default::default()
        }
    }

    /// Set the step counters
    pub fn with_step(mut self, current: u32, total: u32) -> Self {
        self.current_step = current;
        self.total_steps = total;
        self
    }

    /// Record a created file
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.created_files.push(path.into());
        self
    }

    /// Record an executed command
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.executed_commands.push(command.into());
        self
    }

    /// Record the output of a previous step
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.previous_outputs.push(output.into());
        self
    }

    /// Set an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Kind of an executable action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Command,
    Validate,
    Wait,
    Download,
    Extract,
    Navigate,
    Check,
    Conditional,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Validate => "validate",
            Self::Wait => "wait",
            Self::Download => "download",
            Self::Extract => "extract",
            Self::Navigate => "navigate",
            Self::Check => "check",
            Self::Conditional => "conditional",
        }
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "command" | "shell" | "run" => Ok(Self::Command),
            "validate" | "validation" => Ok(Self::Validate),
            "wait" => Ok(Self::Wait),
            "download" => Ok(Self::Download),
            "extract" => Ok(Self::Extract),
            "navigate" | "cd" => Ok(Self::Navigate),
            "check" => Ok(Self::Check),
            "conditional" | "if" => Ok(Self::Conditional),
            other => Err(format!("unknown action kind '{}'", other)),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a validation rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    ExitCode,
    FileExists,
    Output,
    Contains,
    Regex,
    Custom,
}

impl FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exit_code" | "exitcode" => Ok(Self::ExitCode),
            "file_exists" | "fileexists" => Ok(Self::FileExists),
            "output" => Ok(Self::Output),
            "contains" => Ok(Self::Contains),
            "regex" => Ok(Self::Regex),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown rule kind '{}'", other)),
        }
    }
}

/// Expected value of a validation rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Default for ExpectedValue {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl ExpectedValue {
    fn is_empty(&self) -> bool {
        matches!(self, Self::Text(text) if text.trim().is_empty())
    }
}

/// A rule describing how to check the outcome of an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub kind: RuleKind,

    #[serde(default)]
    pub condition: String,

    #[serde(default)]
    pub expected: ExpectedValue,

    /// Comparison operator (e.g. "==", ">=", "contains")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ValidationRule {
    pub fn new(kind: RuleKind, condition: impl Into<String>, expected: ExpectedValue) -> Self {
        Self {
            kind,
            condition: condition.into(),
            expected,
            operator: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    /// A rule is empty when it carries neither a condition nor an expectation
    pub fn is_empty(&self) -> bool {
        self.condition.trim().is_empty() && self.expected.is_empty()
    }
}

/// One executable step of a parsed instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationRule>,

    #[serde(default = "default_action_timeout", with = "duration_secs")]
    pub timeout: Duration,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

fn default_action_timeout() -> Duration {
    Duration::from_secs(300)
}

impl Action {
    /// Create an action of the given kind with defaults
    pub fn new(kind: ActionKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            command: None,
            description: description.into(),
            validation: None,
            timeout: default_action_timeout(),
            metadata: HashMap::new(),
        }
    }

    /// Create a shell command action
    pub fn command(command: impl Into<String>) -> Self {
        let command = command.into();
        let mut action = Self::new(ActionKind::Command, format!("Run `{}`", command));
        action.command = Some(command);
        action
    }

    /// Create a check action backed by a validation rule
    pub fn check(description: impl Into<String>, rule: ValidationRule) -> Self {
        let mut action = Self::new(ActionKind::Check, description);
        action.validation = Some(rule);
        action
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validation = Some(rule);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check the per-kind invariants
    ///
    /// Command actions need a non-empty command; validate and check actions
    /// need a non-empty validation rule.
    pub fn validate(&self) -> Result<(), String> {
        match self.kind {
            ActionKind::Command => {
                let has_command = self
                    .command
                    .as_deref()
                    .is_some_and(|command| !command.trim().is_empty());
                if !has_command {
                    return Err("command action has an empty command".to_string());
                }
            }
            ActionKind::Validate | ActionKind::Check => {
                let has_rule = self.validation.as_ref().is_some_and(|rule| !rule.is_empty());
                if !has_rule {
                    return Err(format!("{} action has no validation rule", self.kind));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Result of instruction understanding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedInstruction {
    pub original_text: String,
    pub intent: String,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub expected_outcomes: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ParsedInstruction {
    pub fn new(original_text: impl Into<String>, intent: impl Into<String>) -> Self {
        Self {
            original_text: original_text.into(),
            intent: intent.into(),
            actions: Vec::new(),
            prerequisites: Vec::new(),
            expected_outcomes: Vec::new(),
            confidence: 0.0,
            reasoning: String::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// Validate every action, reporting the first offending index
    pub fn validate(&self) -> Result<(), String> {
        for (i, action) in self.actions.iter().enumerate() {
            action
                .validate()
                .map_err(|e| format!("actions[{}]: {}", i, e))?;
        }
        Ok(())
    }
}

/// Outcome of a semantic expectation check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub differences: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ValidationResult {
    pub fn new(success: bool, confidence: f64) -> Self {
        Self {
            success,
            confidence: clamp_unit(confidence),
            reasoning: String::new(),
            differences: Vec::new(),
            suggestions: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

/// Lossy summary of a [`TutorialContext`]
///
/// Always keeps the working directory and the created files so it can stand
/// in for the full context in later prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedContext {
    pub summary: String,
    #[serde(default)]
    pub key_files: Vec<String>,
    #[serde(default)]
    pub current_state: String,
}

impl CompressedContext {
    /// Re-insert step-critical facts a backend may have dropped
    pub fn retain_critical(mut self, context: &TutorialContext) -> Self {
        for file in &context.created_files {
            if !self.key_files.contains(file) {
                self.key_files.push(file.clone());
            }
        }
        let wd = &context.working_directory;
        if !wd.is_empty()
            && !self.summary.contains(wd.as_str())
            && !self.current_state.contains(wd.as_str())
        {
            if self.current_state.is_empty() {
                self.current_state = format!("Working directory: {}", wd);
            } else {
                self.current_state = format!("{} (working directory: {})", self.current_state, wd);
            }
        }
        self
    }
}

/// Category of a failed step's error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    MissingDependency,
    Permission,
    MissingFile,
    Network,
    PortConflict,
    Syntax,
    Configuration,
    #[serde(other)]
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingDependency => "missing_dependency",
            Self::Permission => "permission",
            Self::MissingFile => "missing_file",
            Self::Network => "network",
            Self::PortConflict => "port_conflict",
            Self::Syntax => "syntax",
            Self::Configuration => "configuration",
            Self::Unknown => "unknown",
        }
    }
}

/// A candidate fix for an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub description: String,
    #[serde(default)]
    pub commands: Vec<String>,
    pub probability: f64,
}

impl Solution {
    pub fn new(description: impl Into<String>, commands: Vec<String>, probability: f64) -> Self {
        Self {
            description: description.into(),
            commands,
            probability: clamp_unit(probability),
        }
    }
}

/// Diagnosis of an error message with ranked solutions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInterpretation {
    pub category: ErrorCategory,
    pub explanation: String,
    /// Sorted by descending probability
    pub solutions: Vec<Solution>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ErrorInterpretation {
    pub fn new(category: ErrorCategory, explanation: impl Into<String>, confidence: f64) -> Self {
        Self {
            category,
            explanation: explanation.into(),
            solutions: Vec::new(),
            confidence: clamp_unit(confidence),
            metadata: HashMap::new(),
        }
    }

    pub fn with_solution(mut self, solution: Solution) -> Self {
        self.solutions.push(solution);
        self.sort_solutions();
        self
    }

    /// Restore descending-probability order (stable for equal probabilities)
    pub fn sort_solutions(&mut self) {
        self.solutions
            .sort_by(|a, b| b.probability.total_cmp(&a.probability));
    }
}

/// The four natural-language tasks delegated to backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    ParseInstruction,
    ValidateExpectation,
    CompressContext,
    InterpretError,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::ParseInstruction,
        TaskType::ValidateExpectation,
        TaskType::CompressContext,
        TaskType::InterpretError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseInstruction => "parse_instruction",
            Self::ValidateExpectation => "validate_expectation",
            Self::CompressContext => "compress_context",
            Self::InterpretError => "interpret_error",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a score into [0, 1], mapping NaN to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Serialize a `Duration` as whole seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Serialize a `Duration` as whole milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_action_requires_command() {
        let mut action = Action::new(ActionKind::Command, "run something");
        assert!(action.validate().is_err());

        action.command = Some("   ".to_string());
        assert!(action.validate().is_err());

        action.command = Some("ls".to_string());
        assert!(action.validate().is_ok());
    }

    #[test]
    fn test_check_action_requires_rule() {
        let action = Action::new(ActionKind::Check, "file is there");
        assert!(action.validate().is_err());

        let empty = ValidationRule::new(RuleKind::Custom, "", ExpectedValue::default());
        assert!(action.clone().with_validation(empty).validate().is_err());

        let rule =
            ValidationRule::new(RuleKind::FileExists, "notes.txt", ExpectedValue::Bool(true));
        assert!(action.with_validation(rule).validate().is_ok());
    }

    #[test]
    fn test_wait_action_has_no_invariant() {
        assert!(Action::new(ActionKind::Wait, "pause").validate().is_ok());
    }

    #[test]
    fn test_action_kind_parsing() {
        assert_eq!("Command".parse::<ActionKind>().unwrap(), ActionKind::Command);
        assert_eq!("cd".parse::<ActionKind>().unwrap(), ActionKind::Navigate);
        assert!("teleport".parse::<ActionKind>().is_err());
    }

    #[test]
    fn test_solutions_sorted_descending() {
        let interpretation = ErrorInterpretation::new(ErrorCategory::Network, "offline", 0.5)
            .with_solution(Solution::new("a", vec![], 0.2))
            .with_solution(Solution::new("b", vec![], 0.9))
            .with_solution(Solution::new("c", vec![], 0.5));

        let order: Vec<_> = interpretation
            .solutions
            .iter()
            .map(|s| s.description.as_str())
            .collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_unknown_error_category_deserializes() {
        let category: ErrorCategory = serde_json::from_str("\"cosmic_rays\"").unwrap();
        assert_eq!(category, ErrorCategory::Unknown);
    }

    #[test]
    fn test_compressed_context_retains_critical_facts() {
        let context = TutorialContext::new("/work/app")
            .with_file("a.txt")
            .with_file("b.txt");
        let compressed = CompressedContext {
            summary: "Set up the project.".to_string(),
            key_files: vec!["a.txt".to_string()],
            current_state: String::new(),
        }
        .retain_critical(&context);

        assert_eq!(compressed.key_files, vec!["a.txt", "b.txt"]);
        assert!(compressed.current_state.contains("/work/app"));
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.7), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
    }
}
