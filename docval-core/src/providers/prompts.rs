//! Prompt construction and response decoding per task
//!
//! Prompts ask for a single JSON object. Decoding is tolerant: it accepts
//! `type` or `kind` tags, missing optional fields and out-of-range scores,
//! but rejects actions that break the per-kind invariants.

use crate::protocol::{
    clamp_unit, Action, ActionKind, CompressedContext, ErrorCategory, ErrorInterpretation,
    ExpectedValue, ParsedInstruction, RuleKind, Solution, TutorialContext, ValidationResult,
    ValidationRule,
};
use crate::providers::adapter::{TaskOutput, TaskRequest};
use crate::providers::error::{BackendError, BackendResult};
use crate::providers::extract::parse_payload;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write;
use std::time::Duration;

/// Recent history entries rendered into prompts
const HISTORY_LIMIT: usize = 10;

/// Longest single output rendered into prompts
const OUTPUT_CHARS: usize = 2_000;

const PARSE_SYSTEM: &str = "You convert one step of a software tutorial into executable actions.\n\
Respond with a single JSON object and nothing else:\n\
{\"intent\": string, \"actions\": [{\"type\": \"command|validate|wait|download|extract|navigate|check|conditional\", \
\"command\": string?, \"description\": string, \"validation\": {\"type\": \"exit_code|file_exists|output|contains|regex|custom\", \
\"condition\": string, \"expected\": string|bool|number, \"operator\": string?}?, \"timeout\": seconds?}], \
\"prerequisites\": [string], \"expected_outcomes\": [string], \"confidence\": 0..1, \"reasoning\": string}\n\
Command actions must carry a command. Validate and check actions must carry a validation rule.";

const VALIDATE_SYSTEM: &str = "You decide whether the actual output of a tutorial step satisfies the expected output.\n\
Compare meaning, not formatting: ignore whitespace, ordering of unrelated lines, timestamps, versions and paths that \
legitimately differ between machines.\n\
Respond with a single JSON object and nothing else:\n\
{\"success\": bool, \"confidence\": 0..1, \"reasoning\": string, \"differences\": [string], \"suggestions\": [string]}";

const COMPRESS_SYSTEM: &str = "You summarize the state of a tutorial run so it can replace the full history in later prompts.\n\
Keep the working directory and every created file. Use at most three sentences.\n\
Respond with a single JSON object and nothing else:\n\
{\"summary\": string, \"key_files\": [string], \"current_state\": string}";

const INTERPRET_SYSTEM: &str = "You diagnose an error raised while following a software tutorial.\n\
Respond with a single JSON object and nothing else:\n\
{\"category\": \"missing_dependency|permission|missing_file|network|port_conflict|syntax|configuration|unknown\", \
\"explanation\": string, \"solutions\": [{\"description\": string, \"commands\": [string], \"probability\": 0..1}], \
\"confidence\": 0..1}\n\
Order solutions from most to least likely.";

/// System and user prompts for a request
pub fn build(request: &TaskRequest<'_>) -> (&'static str, String) {
    match *request {
        TaskRequest::ParseInstruction {
            context,
            instruction,
        } => {
            let mut prompt = render_context(context, false);
            let _ = write!(prompt, "\nInstruction:\n{}\n", instruction.trim());
            (PARSE_SYSTEM, prompt)
        }
        TaskRequest::ValidateExpectation {
            context,
            expected,
            actual,
        } => {
            let mut prompt = render_context(context, false);
            let _ = write!(
                prompt,
                "\nExpected:\n{}\n\nActual:\n{}\n",
                expected.trim(),
                truncate(actual, OUTPUT_CHARS)
            );
            (VALIDATE_SYSTEM, prompt)
        }
        TaskRequest::CompressContext { context } => {
            (COMPRESS_SYSTEM, render_context(context, true))
        }
        TaskRequest::InterpretError {
            context,
            error_message,
        } => {
            let mut prompt = render_context(context, false);
            let _ = write!(prompt, "\nError:\n{}\n", truncate(error_message, OUTPUT_CHARS));
            (INTERPRET_SYSTEM, prompt)
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn render_context(context: &TutorialContext, with_outputs: bool) -> String {
    let mut out = String::from("Tutorial state:\n");
    if !context.working_directory.is_empty() {
        let _ = writeln!(out, "- working directory: {}", context.working_directory);
    }
    if context.total_steps > 0 {
        let _ = writeln!(out, "- step {} of {}", context.current_step, context.total_steps);
    }
    if !context.created_files.is_empty() {
        let _ = writeln!(out, "- created files: {}", context.created_files.join(", "));
    }
    let skip = context.executed_commands.len().saturating_sub(HISTORY_LIMIT);
    for command in context.executed_commands.iter().skip(skip) {
        let _ = writeln!(out, "- ran: {}", command);
    }
    if with_outputs {
        let skip = context.previous_outputs.len().saturating_sub(HISTORY_LIMIT);
        for output in context.previous_outputs.iter().skip(skip) {
            let _ = writeln!(out, "- output: {}", truncate(output.trim(), OUTPUT_CHARS));
        }
    }
    out
}

/// Decode a completion into the output type the request expects
pub fn decode(request: &TaskRequest<'_>, text: &str) -> BackendResult<TaskOutput> {
    match *request {
        TaskRequest::ParseInstruction { instruction, .. } => {
            decode_parsed(instruction, text).map(TaskOutput::ParsedInstruction)
        }
        TaskRequest::ValidateExpectation { .. } => {
            decode_validation(text).map(TaskOutput::Validation)
        }
        TaskRequest::CompressContext { context } => {
            decode_compressed(context, text).map(TaskOutput::CompressedContext)
        }
        TaskRequest::InterpretError { .. } => {
            decode_interpretation(text).map(TaskOutput::ErrorInterpretation)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawParsed {
    #[serde(default)]
    intent: String,
    #[serde(default)]
    actions: Vec<RawAction>,
    #[serde(default)]
    prerequisites: Vec<String>,
    #[serde(default, alias = "expected_outcome", alias = "outcomes")]
    expected_outcomes: Vec<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(rename = "type", alias = "kind")]
    kind: String,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    validation: Option<RawRule>,
    /// Seconds
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(rename = "type", alias = "kind")]
    kind: String,
    #[serde(default)]
    condition: String,
    #[serde(default)]
    expected: ExpectedValue,
    #[serde(default)]
    operator: Option<String>,
}

/// Confidence assumed when a backend omits one
const DEFAULT_CONFIDENCE: f64 = 0.5;

fn decode_parsed(instruction: &str, text: &str) -> BackendResult<ParsedInstruction> {
    let raw: RawParsed = parse_payload(text)?;

    let mut actions = Vec::with_capacity(raw.actions.len());
    for (i, raw_action) in raw.actions.into_iter().enumerate() {
        let action = convert_action(raw_action)
            .map_err(|e| BackendError::parse(format!("actions[{}]: {}", i, e), text))?;
        actions.push(action);
    }

    let parsed = ParsedInstruction {
        original_text: instruction.to_string(),
        intent: raw.intent,
        actions,
        prerequisites: raw.prerequisites,
        expected_outcomes: raw.expected_outcomes,
        confidence: clamp_unit(raw.confidence.unwrap_or(DEFAULT_CONFIDENCE)),
        reasoning: raw.reasoning,
        metadata: HashMap::new(),
    };
    parsed
        .validate()
        .map_err(|e| BackendError::parse(format!("Invalid action: {}", e), text))?;
    Ok(parsed)
}

fn convert_action(raw: RawAction) -> Result<Action, String> {
    let kind: ActionKind = raw.kind.parse()?;
    let validation = raw
        .validation
        .map(|rule| -> Result<ValidationRule, String> {
            let kind: RuleKind = rule.kind.parse()?;
            let mut converted = ValidationRule::new(kind, rule.condition, rule.expected);
            converted.operator = rule.operator;
            Ok(converted)
        })
        .transpose()?;

    let command = raw.command.filter(|c| !c.trim().is_empty());
    let description = match (raw.description, &command) {
        (Some(description), _) if !description.trim().is_empty() => description,
        (_, Some(command)) => format!("Run `{}`", command),
        _ => kind.to_string(),
    };

    let mut action = Action::new(kind, description);
    action.command = command;
    action.validation = validation;
    action.metadata = raw.metadata;
    if let Some(secs) = raw.timeout.filter(|secs| *secs > 0) {
        action.timeout = Duration::from_secs(secs);
    }
    Ok(action)
}

#[derive(Debug, Deserialize)]
struct RawValidation {
    #[serde(alias = "matches", alias = "valid", alias = "passed")]
    success: bool,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    differences: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
}

fn decode_validation(text: &str) -> BackendResult<ValidationResult> {
    let raw: RawValidation = parse_payload(text)?;
    let confidence = raw.confidence.unwrap_or(DEFAULT_CONFIDENCE);
    let mut result =
        ValidationResult::new(raw.success, confidence).with_reasoning(raw.reasoning);
    result.differences = raw.differences;
    result.suggestions = raw.suggestions;
    Ok(result)
}

#[derive(Debug, Deserialize)]
struct RawCompressed {
    summary: String,
    #[serde(default)]
    key_files: Vec<String>,
    #[serde(default)]
    current_state: String,
}

fn decode_compressed(context: &TutorialContext, text: &str) -> BackendResult<CompressedContext> {
    let raw: RawCompressed = parse_payload(text)?;
    if raw.summary.trim().is_empty() {
        return Err(BackendError::parse("Empty context summary", text));
    }
    Ok(CompressedContext {
        summary: raw.summary,
        key_files: raw.key_files,
        current_state: raw.current_state,
    }
    .retain_critical(context))
}

#[derive(Debug, Deserialize)]
struct RawInterpretation {
    #[serde(default)]
    category: String,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    solutions: Vec<RawSolution>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawSolution {
    description: String,
    #[serde(default)]
    commands: Vec<String>,
    #[serde(default, alias = "likelihood")]
    probability: Option<f64>,
}

/// Map a free-form category label onto the closed set
pub fn parse_category(label: &str) -> ErrorCategory {
    let normalized = label.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    match normalized.as_str() {
        "dependency" | "missing_package" | "command_not_found" => ErrorCategory::MissingDependency,
        "permission_denied" | "permissions" => ErrorCategory::Permission,
        "file_not_found" | "not_found" => ErrorCategory::MissingFile,
        "port_in_use" | "address_in_use" => ErrorCategory::PortConflict,
        "syntax_error" => ErrorCategory::Syntax,
        "config" => ErrorCategory::Configuration,
        _ => serde_json::from_value(Value::String(normalized)).unwrap_or(ErrorCategory::Unknown),
    }
}

fn decode_interpretation(text: &str) -> BackendResult<ErrorInterpretation> {
    let raw: RawInterpretation = parse_payload(text)?;
    let mut interpretation = ErrorInterpretation::new(
        parse_category(&raw.category),
        raw.explanation,
        raw.confidence.unwrap_or(DEFAULT_CONFIDENCE),
    );
    interpretation.solutions = raw
        .solutions
        .into_iter()
        .map(|s| {
            let probability = s.probability.unwrap_or(DEFAULT_CONFIDENCE);
            Solution::new(s.description, s.commands, probability)
        })
        .collect();
    interpretation.sort_solutions();
    Ok(interpretation)
}
