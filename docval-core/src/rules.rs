//! Rule-based answers
//!
//! Two entry points: a fast path that answers trivially structured
//! instructions without any backend, and a degraded path that produces a
//! low-confidence best effort for every task once all backends have failed.

use crate::protocol::{
    Action, ActionKind, CompressedContext, ErrorCategory, ErrorInterpretation, ParsedInstruction,
    Solution, TutorialContext, ValidationResult,
};
use crate::providers::{TaskOutput, TaskRequest};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

/// Confidence of a fast-path answer
pub const FAST_PATH_CONFIDENCE: f64 = 0.95;

/// Upper bound on any degraded answer's confidence
pub const DEGRADED_CONFIDENCE: f64 = 0.3;

/// Share of expected tokens that must appear in the actual output
const TOKEN_OVERLAP_THRESHOLD: f64 = 0.6;

const STATE_PREVIEW_CHARS: usize = 200;

static INLINE_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:run|execute)(?:\s+the\s+command)?\s*:?\s*`([^`]+)`\s*\.?\s*$")
        .expect("valid inline run pattern")
});
static DOLLAR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\$\s+(\S.*?)\s*$").expect("valid prompt line pattern"));
static CODE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid code span pattern"));
static CREATE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bcreate\s+(?:a\s+|an\s+|the\s+)?(?:new\s+|empty\s+)?file\s+(?:named|called)\s+([\w./-]+?)[.,;]?(?:\s|$)")
        .expect("valid create file pattern")
});
static CHANGE_DIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:cd|change\s+(?:in)?to(?:\s+the)?|navigate\s+to(?:\s+the)?)\s+([\w./~-]+?)(?:\s+(?:directory|folder))?[.,;]?(?:\s|$)")
        .expect("valid change dir pattern")
});
static WAIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bwait\s+(?:for\s+)?(\d+)\s*(s|sec|secs|seconds?|m|min|mins|minutes?)\b")
        .expect("valid wait pattern")
});
static DOWNLOAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bdownload\s+(?:the\s+\w+\s+(?:from\s+)?)?(https?://\S+?)[.,;]?(?:\s|$)")
        .expect("valid download pattern")
});
static INSTALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(npm|pip3?|yarn|cargo|apt-get|brew)\s+install\b[^.,;\n]*")
        .expect("valid install pattern")
});
static INSTALL_WITH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\binstall\b.*\b(?:with|using)\s+(npm|pip3?|yarn|cargo)\b")
        .expect("valid install-with pattern")
});

struct ErrorRule {
    pattern: LazyLock<Regex>,
    category: ErrorCategory,
    explanation: &'static str,
    solution: &'static str,
}

/// First match wins
static ERROR_RULES: [ErrorRule; 7] = [
    ErrorRule {
        pattern: LazyLock::new(|| {
            Regex::new(r"(?i)command not found|is not recognized as|no module named|cannot find module|not installed")
                .expect("valid dependency pattern")
        }),
        category: ErrorCategory::MissingDependency,
        explanation: "A required program or package is not installed",
        solution: "Install the missing dependency and retry",
    },
    ErrorRule {
        pattern: LazyLock::new(|| {
            Regex::new(r"(?i)permission denied|EACCES|EPERM|operation not permitted")
                .expect("valid permission pattern")
        }),
        category: ErrorCategory::Permission,
        explanation: "The process lacks permission for the operation",
        solution: "Check ownership and permissions of the target path",
    },
    ErrorRule {
        pattern: LazyLock::new(|| {
            Regex::new(r"(?i)EADDRINUSE|address already in use|port \d+ is (?:already )?in use")
                .expect("valid port pattern")
        }),
        category: ErrorCategory::PortConflict,
        explanation: "Another process is already listening on the port",
        solution: "Stop the process holding the port or choose another port",
    },
    ErrorRule {
        pattern: LazyLock::new(|| {
            Regex::new(r"(?i)no such file or directory|ENOENT|file not found|does not exist")
                .expect("valid missing file pattern")
        }),
        category: ErrorCategory::MissingFile,
        explanation: "A referenced file or directory does not exist",
        solution: "Create the missing file or fix the path",
    },
    ErrorRule {
        pattern: LazyLock::new(|| {
            Regex::new(r"(?i)ECONNREFUSED|ETIMEDOUT|ENOTFOUND|could not resolve|connection (?:refused|reset|timed out)|network is unreachable")
                .expect("valid network pattern")
        }),
        category: ErrorCategory::Network,
        explanation: "A network connection failed",
        solution: "Check connectivity and that the remote service is running",
    },
    ErrorRule {
        pattern: LazyLock::new(|| {
            Regex::new(r"(?i)syntax ?error|unexpected token|parse error")
                .expect("valid syntax pattern")
        }),
        category: ErrorCategory::Syntax,
        explanation: "The input could not be parsed",
        solution: "Fix the syntax error at the reported location",
    },
    ErrorRule {
        pattern: LazyLock::new(|| {
            Regex::new(r"(?i)invalid config|configuration error|missing (?:required )?(?:setting|option|environment variable)")
                .expect("valid configuration pattern")
        }),
        category: ErrorCategory::Configuration,
        explanation: "The configuration is invalid or incomplete",
        solution: "Review the configuration values the tool reports",
    },
];

/// Deterministic answer for a trivially structured instruction
///
/// Matches a whole instruction of the form ``Run `cmd` `` or a single
/// `$ cmd` line. Everything else declines with `None`.
pub fn fast_path(request: &TaskRequest<'_>) -> Option<TaskOutput> {
    let TaskRequest::ParseInstruction { instruction, .. } = *request else {
        return None;
    };

    let command = INLINE_RUN
        .captures(instruction)
        .or_else(|| {
            // Multi-line text is never a single prompt line
            if instruction.trim().contains('\n') {
                None
            } else {
                DOLLAR_LINE.captures(instruction)
            }
        })
        .map(|caps| caps[1].trim().to_string())
        .filter(|command| !command.is_empty())?;

    let parsed = ParsedInstruction::new(instruction, "run command")
        .with_action(Action::command(command))
        .with_confidence(FAST_PATH_CONFIDENCE)
        .with_reasoning("Instruction is a literal command");
    Some(TaskOutput::ParsedInstruction(tag(parsed, "fast_path")))
}

/// Low-confidence best effort for any task
pub fn degraded(request: &TaskRequest<'_>) -> TaskOutput {
    match *request {
        TaskRequest::ParseInstruction { instruction, .. } => {
            TaskOutput::ParsedInstruction(degraded_parse(instruction))
        }
        TaskRequest::ValidateExpectation {
            expected, actual, ..
        } => TaskOutput::Validation(degraded_validation(expected, actual)),
        TaskRequest::CompressContext { context } => {
            TaskOutput::CompressedContext(degraded_compression(context))
        }
        TaskRequest::InterpretError { error_message, .. } => {
            TaskOutput::ErrorInterpretation(degraded_interpretation(error_message))
        }
    }
}

fn tag(mut parsed: ParsedInstruction, source: &str) -> ParsedInstruction {
    parsed
        .metadata
        .insert("source".to_string(), Value::String(source.to_string()));
    parsed
}

fn degraded_parse(instruction: &str) -> ParsedInstruction {
    let mut actions = Vec::new();

    for caps in CODE_SPAN.captures_iter(instruction) {
        let command = caps[1].trim();
        if !command.is_empty() {
            actions.push(Action::command(command));
        }
    }
    if let Some(caps) = CREATE_FILE.captures(instruction) {
        actions.push(Action::command(format!("touch {}", &caps[1])));
    }
    if let Some(caps) = CHANGE_DIR.captures(instruction) {
        let dir = &caps[1];
        actions.push(
            Action::new(ActionKind::Navigate, format!("Change into {}", dir))
                .with_command(format!("cd {}", dir)),
        );
    }
    if let Some(caps) = WAIT.captures(instruction) {
        // Digits that overflow u64 saturate
        let amount: u64 = caps[1].parse().unwrap_or(u64::MAX);
        let secs = if caps[2].to_ascii_lowercase().starts_with('m') {
            amount.saturating_mul(60)
        } else {
            amount
        };
        actions.push(
            Action::new(ActionKind::Wait, format!("Wait {} seconds", secs))
                .with_timeout(Duration::from_secs(secs)),
        );
    }
    if let Some(caps) = DOWNLOAD.captures(instruction) {
        let url = &caps[1];
        actions.push(
            Action::new(ActionKind::Download, format!("Download {}", url))
                .with_command(format!("curl -fLO {}", url)),
        );
    }
    if let Some(m) = INSTALL.find(instruction) {
        actions.push(Action::command(m.as_str().trim()));
    } else if let Some(caps) = INSTALL_WITH.captures(instruction) {
        actions.push(Action::command(format!("{} install", caps[1].to_ascii_lowercase())));
    }

    let (intent, confidence) = if actions.is_empty() {
        ("unknown", 0.1)
    } else {
        ("best-effort rule match", DEGRADED_CONFIDENCE)
    };
    let mut parsed = ParsedInstruction::new(instruction, intent)
        .with_confidence(confidence)
        .with_reasoning("No backend available; parsed by pattern rules");
    parsed.actions = actions;
    tag(parsed, "degraded")
}

/// Lowercase, strip punctuation, collapse whitespace
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn degraded_validation(expected: &str, actual: &str) -> ValidationResult {
    let expected_norm = normalize(expected);
    let actual_norm = normalize(actual);

    let contained = !expected_norm.is_empty()
        && !actual_norm.is_empty()
        && (actual_norm.contains(&expected_norm) || expected_norm.contains(&actual_norm));

    let expected_tokens: HashSet<&str> =
        expected_norm.split(' ').filter(|t| !t.is_empty()).collect();
    let actual_tokens: HashSet<&str> = actual_norm.split(' ').filter(|t| !t.is_empty()).collect();
    let overlap = if expected_tokens.is_empty() {
        if actual_tokens.is_empty() {
            1.0
        } else {
            0.0
        }
    } else {
        expected_tokens.intersection(&actual_tokens).count() as f64 / expected_tokens.len() as f64
    };

    let success = contained || overlap >= TOKEN_OVERLAP_THRESHOLD;
    let mut result = ValidationResult::new(success, if success { DEGRADED_CONFIDENCE } else { 0.2 })
        .with_reasoning(format!(
            "No backend available; compared text directly ({:.0}% token overlap)",
            overlap * 100.0
        ));
    if !success {
        result.differences = expected_tokens
            .difference(&actual_tokens)
            .map(|t| format!("missing '{}'", t))
            .collect();
        result.differences.sort();
    }
    result
        .metadata
        .insert("source".to_string(), Value::String("degraded".to_string()));
    result
}

fn degraded_compression(context: &TutorialContext) -> CompressedContext {
    let mut summary = if context.total_steps > 0 {
        format!("Step {} of {}", context.current_step, context.total_steps)
    } else {
        format!("Step {}", context.current_step)
    };
    if !context.working_directory.is_empty() {
        summary.push_str(&format!(" in {}", context.working_directory));
    }
    summary.push_str(&format!(
        "; {} commands run, {} files created",
        context.executed_commands.len(),
        context.created_files.len()
    ));
    if let Some(last) = context.executed_commands.last() {
        summary.push_str(&format!("; last command: {}", last));
    }

    let current_state = context
        .previous_outputs
        .last()
        .map(|output| output.chars().take(STATE_PREVIEW_CHARS).collect())
        .unwrap_or_default();

    CompressedContext {
        summary,
        key_files: context.created_files.clone(),
        current_state,
    }
    .retain_critical(context)
}

fn degraded_interpretation(message: &str) -> ErrorInterpretation {
    let Some(rule) = ERROR_RULES.iter().find(|rule| rule.pattern.is_match(message)) else {
        return ErrorInterpretation::new(
            ErrorCategory::Unknown,
            "No backend available and the error matches no known pattern",
            0.1,
        );
    };

    let commands = suggested_commands(rule.category, message);
    let mut interpretation =
        ErrorInterpretation::new(rule.category, rule.explanation, DEGRADED_CONFIDENCE)
            .with_solution(Solution::new(rule.solution, commands, 0.5));
    interpretation
        .metadata
        .insert("source".to_string(), Value::String("degraded".to_string()));
    interpretation
}

static PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\d{2,5})\b").expect("valid port pattern"));

fn suggested_commands(category: ErrorCategory, message: &str) -> Vec<String> {
    match category {
        ErrorCategory::PortConflict => PORT
            .captures(message)
            .map(|caps| vec![format!("lsof -i :{}", &caps[1])])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn parse(instruction: &str) -> TaskRequest<'_> {
        static EMPTY: LazyLock<TutorialContext> = LazyLock::new(TutorialContext::default);
        TaskRequest::ParseInstruction {
            context: &EMPTY,
            instruction,
        }
    }

    fn parsed(output: TaskOutput) -> ParsedInstruction {
        match output {
            TaskOutput::ParsedInstruction(p) => p,
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test_case("Run `npm install`", "npm install" ; "run backticks")]
    #[test_case("execute the command: `cargo build --release`.", "cargo build --release" ; "execute")]
    #[test_case("$ ls -la", "ls -la" ; "prompt line")]
    fn test_fast_path_matches(instruction: &str, command: &str) {
        let p = parsed(fast_path(&parse(instruction)).unwrap());
        assert_eq!(p.actions.len(), 1);
        assert_eq!(p.actions[0].command.as_deref(), Some(command));
        assert_eq!(p.confidence, FAST_PATH_CONFIDENCE);
    }

    #[test_case("create a file named notes.txt" ; "prose")]
    #[test_case("Run `a` and then `b`" ; "two spans")]
    #[test_case("$ ls\n$ pwd" ; "multiple lines")]
    fn test_fast_path_declines(instruction: &str) {
        assert!(fast_path(&parse(instruction)).is_none());
    }

    #[test]
    fn test_fast_path_only_parses() {
        let context = TutorialContext::default();
        let request = TaskRequest::InterpretError {
            context: &context,
            error_message: "$ ls",
        };
        assert!(fast_path(&request).is_none());
    }

    #[test]
    fn test_degraded_parse_create_file() {
        let p = parsed(degraded(&parse("create a file named notes.txt")));
        assert_eq!(p.actions[0].command.as_deref(), Some("touch notes.txt"));
        assert!(p.confidence <= DEGRADED_CONFIDENCE);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_degraded_parse_navigation_and_wait() {
        let p = parsed(degraded(&parse("Change into the src directory and wait 2 minutes")));
        assert!(p
            .actions
            .iter()
            .any(|a| a.kind == ActionKind::Navigate && a.command.as_deref() == Some("cd src")));
        assert!(p
            .actions
            .iter()
            .any(|a| a.kind == ActionKind::Wait && a.timeout == Duration::from_secs(120)));
    }

    #[test_case("wait 999999999999999999 minutes" ; "minutes overflow")]
    #[test_case("wait 99999999999999999999999 seconds" ; "digits overflow")]
    fn test_degraded_parse_huge_wait_saturates(instruction: &str) {
        let p = parsed(degraded(&parse(instruction)));
        let wait = p.actions.iter().find(|a| a.kind == ActionKind::Wait).unwrap();
        assert_eq!(wait.timeout, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_degraded_parse_install_with() {
        let p = parsed(degraded(&parse("Install the project dependencies with npm")));
        assert_eq!(p.actions[0].command.as_deref(), Some("npm install"));
    }

    #[test]
    fn test_degraded_parse_unknown() {
        let p = parsed(degraded(&parse("Admire the view")));
        assert!(p.actions.is_empty());
        assert!(p.confidence < DEGRADED_CONFIDENCE);
    }

    #[test_case("Server listening on port 3000", "server listening on port 3000!", true ; "formatting")]
    #[test_case("3 files created", "Created 3 files.", true ; "reordered")]
    #[test_case("Hello, World!", "Goodbye", false ; "different")]
    fn test_degraded_validation(expected: &str, actual: &str, success: bool) {
        let result = degraded_validation(expected, actual);
        assert_eq!(result.success, success);
        assert!(result.confidence <= DEGRADED_CONFIDENCE);
    }

    #[test]
    fn test_degraded_compression_keeps_critical_facts() {
        let context = TutorialContext::new("/app")
            .with_step(3, 5)
            .with_file("a.txt")
            .with_command("touch a.txt")
            .with_output("ok");
        let compressed = degraded_compression(&context);
        assert!(compressed.summary.contains("/app"));
        assert_eq!(compressed.key_files, vec!["a.txt".to_string()]);
        assert_eq!(compressed.current_state, "ok");
    }

    #[test_case("bash: npm: command not found", ErrorCategory::MissingDependency ; "dependency")]
    #[test_case("EACCES: permission denied, mkdir '/usr/lib/x'", ErrorCategory::Permission ; "permission")]
    #[test_case("Error: listen EADDRINUSE: address already in use :::3000", ErrorCategory::PortConflict ; "port")]
    #[test_case("cat: config.json: No such file or directory", ErrorCategory::MissingFile ; "missing file")]
    #[test_case("curl: (7) Failed to connect: Connection refused", ErrorCategory::Network ; "network")]
    #[test_case("SyntaxError: Unexpected token }", ErrorCategory::Syntax ; "syntax")]
    #[test_case("segfault", ErrorCategory::Unknown ; "unknown")]
    fn test_degraded_interpretation(message: &str, category: ErrorCategory) {
        let interpretation = degraded_interpretation(message);
        assert_eq!(interpretation.category, category);
        assert!(interpretation.confidence <= DEGRADED_CONFIDENCE);
    }

    #[test]
    fn test_port_conflict_suggests_lsof() {
        let interpretation =
            degraded_interpretation("listen EADDRINUSE: address already in use :::3000");
        assert_eq!(interpretation.solutions[0].commands, vec!["lsof -i :3000".to_string()]);
    }
}
