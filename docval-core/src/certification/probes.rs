//! Fixed probe battery used by the benchmark suite
//!
//! Each probe carries its own grading so a run is deterministic for a
//! deterministic backend.

use crate::protocol::{
    ActionKind, CompressedContext, ErrorCategory, ErrorInterpretation, ParsedInstruction,
    TutorialContext, ValidationResult,
};
use crate::providers::{Backend, TaskRequest};

/// Spend per reference request that scores zero cost efficiency
pub const COST_EFFICIENCY_CEILING: f64 = 0.02;

/// Size of the reference request used for cost efficiency
pub const REFERENCE_REQUEST_CHARS: usize = 2000;

pub struct ParseProbe {
    pub instruction: &'static str,
    /// Any of these kinds passes
    pub kinds: &'static [ActionKind],
    /// Must appear in the action's command, description or rule condition
    pub needle: &'static str,
}

impl ParseProbe {
    pub fn grade(&self, parsed: &ParsedInstruction) -> f64 {
        let hit = parsed.actions.iter().any(|action| {
            if !self.kinds.contains(&action.kind) {
                return false;
            }
            if self.needle.is_empty() {
                return true;
            }
            let condition = action.validation.as_ref().map(|rule| rule.condition.as_str());
            [action.command.as_deref(), Some(action.description.as_str()), condition]
                .into_iter()
                .flatten()
                .any(|text| text.contains(self.needle))
        });
        if hit {
            1.0
        } else {
            0.0
        }
    }
}

pub const PARSE_PROBES: &[ParseProbe] = &[
    ParseProbe {
        instruction: "create a file named notes.txt",
        kinds: &[ActionKind::Command],
        needle: "notes.txt",
    },
    ParseProbe {
        instruction: "Install the project dependencies with npm",
        kinds: &[ActionKind::Command],
        needle: "npm install",
    },
    ParseProbe {
        instruction: "Change into the src directory",
        kinds: &[ActionKind::Navigate, ActionKind::Command],
        needle: "src",
    },
    ParseProbe {
        instruction: "Make sure config.yaml exists before continuing",
        kinds: &[ActionKind::Check, ActionKind::Validate],
        needle: "config.yaml",
    },
    ParseProbe {
        instruction: "Download https://example.com/archive.tar.gz",
        kinds: &[ActionKind::Download, ActionKind::Command],
        needle: "archive.tar.gz",
    },
    ParseProbe {
        instruction: "Wait 5 seconds for the server to start",
        kinds: &[ActionKind::Wait, ActionKind::Command],
        needle: "",
    },
];

pub struct ValidationProbe {
    pub expected: &'static str,
    pub actual: &'static str,
    pub success: bool,
}

impl ValidationProbe {
    pub fn grade(&self, result: &ValidationResult) -> f64 {
        if result.success == self.success {
            1.0
        } else {
            0.0
        }
    }
}

pub const VALIDATION_PROBES: &[ValidationProbe] = &[
    ValidationProbe {
        expected: "Server listening on port 3000",
        actual: "server is listening on port 3000",
        success: true,
    },
    ValidationProbe {
        expected: "3 files created",
        actual: "Created 3 files.",
        success: true,
    },
    ValidationProbe {
        expected: r#"{"status":"ok"}"#,
        actual: "{\n  \"status\": \"ok\"\n}",
        success: true,
    },
    ValidationProbe {
        expected: "version 1.2.0",
        actual: "v1.2.0",
        success: true,
    },
    ValidationProbe {
        expected: "Hello, World!",
        actual: "Goodbye",
        success: false,
    },
    ValidationProbe {
        expected: "All tests passed",
        actual: "2 tests failed",
        success: false,
    },
];

pub fn context_probes() -> Vec<TutorialContext> {
    vec![
        TutorialContext::new("/home/user/app")
            .with_step(4, 10)
            .with_file("package.json")
            .with_file("src/index.js")
            .with_command("npm init -y")
            .with_command("npm install express")
            .with_output("added 57 packages in 2s"),
        TutorialContext::new("/srv/site")
            .with_step(2, 3)
            .with_file("Cargo.toml")
            .with_command("cargo new site")
            .with_output("Created binary (application) `site` package"),
    ]
}

/// Share of critical facts the compressed form keeps, with a non-empty
/// summary required for any credit
pub fn grade_context(context: &TutorialContext, compressed: &CompressedContext) -> f64 {
    if compressed.summary.trim().is_empty() {
        return 0.0;
    }
    let wd = context.working_directory.as_str();
    let facts = context.created_files.len() + 1;
    let kept_files = context
        .created_files
        .iter()
        .filter(|file| compressed.key_files.contains(file))
        .count();
    let kept_wd = compressed.summary.contains(wd) || compressed.current_state.contains(wd);
    (kept_files + usize::from(kept_wd)) as f64 / facts as f64
}

pub struct ErrorProbe {
    pub message: &'static str,
    pub category: ErrorCategory,
}

impl ErrorProbe {
    /// Category match is worth 0.7, at least one solution 0.3
    pub fn grade(&self, interpretation: &ErrorInterpretation) -> f64 {
        let category = if interpretation.category == self.category {
            0.7
        } else {
            0.0
        };
        let solutions = if interpretation.solutions.is_empty() {
            0.0
        } else {
            0.3
        };
        category + solutions
    }
}

pub const ERROR_PROBES: &[ErrorProbe] = &[
    ErrorProbe {
        message: "bash: npm: command not found",
        category: ErrorCategory::MissingDependency,
    },
    ErrorProbe {
        message: "EACCES: permission denied, open '/usr/local/lib/node_modules'",
        category: ErrorCategory::Permission,
    },
    ErrorProbe {
        message: "Error: listen EADDRINUSE: address already in use :::3000",
        category: ErrorCategory::PortConflict,
    },
    ErrorProbe {
        message: "ENOENT: no such file or directory, open 'config.json'",
        category: ErrorCategory::MissingFile,
    },
];

/// 1 for a free backend, 0 at or above the ceiling
pub fn cost_efficiency(backend: &dyn Backend) -> f64 {
    let context = TutorialContext::default();
    let instruction = "x".repeat(REFERENCE_REQUEST_CHARS);
    let estimate = backend.cost_estimate(&TaskRequest::ParseInstruction {
        context: &context,
        instruction: &instruction,
    });
    (1.0 - estimate.cost / COST_EFFICIENCY_CEILING).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Action, ExpectedValue, RuleKind, Solution, ValidationRule};

    #[test]
    fn test_parse_probe_grading() {
        let probe = &PARSE_PROBES[0];
        let good = ParsedInstruction::new(probe.instruction, "create file")
            .with_action(Action::command("touch notes.txt"));
        let bad = ParsedInstruction::new(probe.instruction, "create file")
            .with_action(Action::command("ls"));
        assert_eq!(probe.grade(&good), 1.0);
        assert_eq!(probe.grade(&bad), 0.0);
    }

    #[test]
    fn test_parse_probe_checks_rule_condition() {
        let probe = &PARSE_PROBES[3];
        let rule =
            ValidationRule::new(RuleKind::FileExists, "config.yaml", ExpectedValue::Bool(true));
        let parsed = ParsedInstruction::new(probe.instruction, "check")
            .with_action(Action::check("verify file", rule));
        assert_eq!(probe.grade(&parsed), 1.0);
    }

    #[test]
    fn test_context_grading() {
        let context = &context_probes()[0];
        let full = CompressedContext {
            summary: "Express app in /home/user/app".to_string(),
            key_files: vec!["package.json".to_string(), "src/index.js".to_string()],
            current_state: String::new(),
        };
        assert_eq!(grade_context(context, &full), 1.0);

        let partial = CompressedContext {
            summary: "Express app".to_string(),
            key_files: vec!["package.json".to_string()],
            current_state: String::new(),
        };
        assert!((grade_context(context, &partial) - 1.0 / 3.0).abs() < 1e-9);

        let empty = CompressedContext {
            summary: " ".to_string(),
            ..full
        };
        assert_eq!(grade_context(context, &empty), 0.0);
    }

    #[test]
    fn test_error_grading() {
        let probe = &ERROR_PROBES[0];
        let right = ErrorInterpretation::new(ErrorCategory::MissingDependency, "npm missing", 0.9)
            .with_solution(Solution::new("Install Node.js", vec![], 0.9));
        let wrong = ErrorInterpretation::new(ErrorCategory::Network, "?", 0.2);
        assert!((probe.grade(&right) - 1.0).abs() < 1e-9);
        assert_eq!(probe.grade(&wrong), 0.0);
    }
}
