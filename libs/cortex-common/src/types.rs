use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Python,
    TypeScript,
    Go,
    Rust,
}

impl Language {
    pub fn all_variants() -> Vec<Language> {
        vec![
            Language::Java,
            Language::Python,
            Language::TypeScript,
            Language::Go,
            Language::Rust,
        ]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Language::Java => "java",
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Rust => "rust",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for Language {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "java" => Ok(Language::Java),
            "python" => Ok(Language::Python),
            "typescript" => Ok(Language::TypeScript),
            "go" => Ok(Language::Go),
            "rust" => Ok(Language::Rust),
            _ => Err(EngineError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// Raw submission as it arrives from a caller, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSubmission {
    pub exercise_id: i64,
    pub language: String,
    /// Base64-encoded source
    pub code: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub expected_output: Option<String>,
}

/// Validated execution request. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRequest {
    pub exercise_id: i64,
    pub language: Language,
    /// Base64-encoded source
    pub code: String,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub expected_output: Option<String>,
}

/// Unit of work carried through the queue from the API to a worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionTask {
    pub task_id: Uuid,
    pub request: ExecutionRequest,
    /// Exercise template path relative to the exercises root
    pub exercise_path: String,
    pub submission_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestCaseResult {
    pub passed: bool,
    /// Test identifier (test name, package or class)
    pub input: String,
    pub expected_output: Option<String>,
    pub actual_output: Option<String>,
    pub message: String,
}

impl TestCaseResult {
    pub fn passed(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            passed: true,
            input: input.into(),
            expected_output: None,
            actual_output: None,
            message: message.into(),
        }
    }

    pub fn failed(input: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            input: input.into(),
            expected_output: None,
            actual_output: None,
            message: message.into(),
        }
    }

    pub fn with_outputs(mut self, expected: Option<String>, actual: Option<String>) -> Self {
        self.expected_output = expected;
        self.actual_output = actual;
        self
    }
}

/// Best-effort resource usage sampled from the container.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerStats {
    pub memory_usage_bytes: u64,
    pub cpu_usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub task_id: Uuid,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub memory_used_kb: u64,
    pub cpu_usage_percent: f64,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    pub language: Language,
    pub exercise_id: i64,
    pub test_case_results: Vec<TestCaseResult>,
}

impl ExecutionResult {
    /// Terminal result for a task that could not be run to completion.
    pub fn internal_error(task: &ExecutionTask, message: impl fmt::Display) -> Self {
        Self {
            task_id: task.task_id,
            success: false,
            stdout: String::new(),
            stderr: format!("Internal error: {}", message),
            execution_time_ms: 0,
            memory_used_kb: 0,
            cpu_usage_percent: 0.0,
            exit_code: None,
            timed_out: false,
            language: task.request.language,
            exercise_id: task.request.exercise_id,
            test_case_results: Vec::new(),
        }
    }

    pub fn passed_count(&self) -> usize {
        self.test_case_results.iter().filter(|t| t.passed).count()
    }
}

/// A run only counts as successful when the process exited cleanly and
/// every parsed test case passed.
pub fn is_successful(exit_code: i64, timed_out: bool, cases: &[TestCaseResult]) -> bool {
    exit_code == 0 && !timed_out && !cases.is_empty() && cases.iter().all(|c| c.passed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_round_trips_through_display() {
        for lang in Language::all_variants() {
            let parsed: Language = lang.to_string().parse().unwrap();
            assert_eq!(parsed, lang);
        }
    }

    #[test]
    fn test_language_parse_is_case_insensitive() {
        assert_eq!("TypeScript".parse::<Language>().unwrap(), Language::TypeScript);
        assert_eq!(" GO ".parse::<Language>().unwrap(), Language::Go);
    }

    #[test]
    fn test_unknown_language_is_unsupported() {
        let err = "cobol".parse::<Language>().unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedLanguage(ref l) if l == "cobol"));
    }

    #[test]
    fn test_language_serializes_lowercase() {
        let json = serde_json::to_string(&Language::TypeScript).unwrap();
        assert_eq!(json, "\"typescript\"");
    }

    #[test]
    fn test_success_requires_every_case_passing() {
        let ok = vec![TestCaseResult::passed("a", "ok")];
        let mixed = vec![
            TestCaseResult::passed("a", "ok"),
            TestCaseResult::failed("b", "boom"),
        ];

        assert!(is_successful(0, false, &ok));
        assert!(!is_successful(0, false, &mixed));
        assert!(!is_successful(1, false, &ok));
        assert!(!is_successful(0, true, &ok));
        assert!(!is_successful(0, false, &[]));
    }
}
