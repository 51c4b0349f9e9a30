//! Structural validation of LLM output.
//!
//! The gateway never analyzes model output semantically; it only checks
//! that the response has the *shape* the task requires and that generated
//! content carries no obvious exploit patterns. A failed check sets
//! `validation_passed=false` on the gateway response; a should-block
//! finding additionally withholds the content from the caller.

use crate::qaforge::gateway::TaskKind;
use crate::qaforge::intent;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Patterns that have no business inside a generated browser test.
    static ref EXPLOIT_PATTERNS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)<\s*script").unwrap(), "script_tag"),
        (Regex::new(r"(?i)\brm\s+-rf\b").unwrap(), "shell_rm"),
        (Regex::new(r"(?i)child_process|Runtime\.getRuntime|ProcessBuilder").unwrap(), "process_spawn"),
        (Regex::new(r"(?i)\beval\s*\(").unwrap(), "eval_call"),
        (Regex::new(r"javascript:\s*").unwrap(), "javascript_url"),
    ];
}

/// Minimum length of a usable analysis response, after trimming.
const MIN_PROSE_LEN: usize = 20;

/// Result of validating one response.
#[derive(Debug, Clone)]
pub struct Validation {
    /// Whether the response satisfies the task's structural requirements.
    pub passed: bool,
    /// Whether the response must be withheld from the caller entirely.
    pub should_block: bool,
    /// Human-readable notes for logging and usage records.
    pub notes: Vec<String>,
}

impl Validation {
    fn ok() -> Self {
        Self {
            passed: true,
            should_block: false,
            notes: Vec::new(),
        }
    }

    fn failed(note: impl Into<String>) -> Self {
        Self {
            passed: false,
            should_block: false,
            notes: vec![note.into()],
        }
    }

    fn blocked(note: impl Into<String>) -> Self {
        Self {
            passed: false,
            should_block: true,
            notes: vec![note.into()],
        }
    }
}

/// Validates provider responses per task kind.
pub struct OutputValidator;

impl OutputValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate `text` as the response to a `task` call.
    pub fn validate(&self, task: TaskKind, text: &str) -> Validation {
        for (regex, label) in EXPLOIT_PATTERNS.iter() {
            if regex.is_match(text) {
                log::warn!("validator blocked response containing '{}'", label);
                return Validation::blocked(format!("exploit pattern: {}", label));
            }
        }

        match task {
            TaskKind::TestGeneration => match intent::parse_lenient(text) {
                Ok((parsed, warnings)) => {
                    let mut validation = Validation::ok();
                    validation.notes = warnings;
                    validation
                        .notes
                        .push(format!("intent with {} steps", parsed.steps.len()));
                    validation
                }
                Err(err) => Validation::failed(format!("not a parseable intent: {}", err)),
            },
            TaskKind::FailureAnalysis | TaskKind::FixSuggestion => {
                if text.trim().len() < MIN_PROSE_LEN {
                    Validation::failed("analysis response is empty or too short")
                } else {
                    Validation::ok()
                }
            }
            TaskKind::Planning => {
                if text.trim().is_empty() {
                    Validation::failed("planner response is empty")
                } else {
                    Validation::ok()
                }
            }
        }
    }
}

impl Default for OutputValidator {
    fn default() -> Self {
        Self::new()
    }
}
