//! Result Interpreter - turns raw test-runner output into `TestCaseResult`s
//!
//! **Contract shared by every parser:**
//! - Never panics and never returns an error; unexpected output becomes a
//!   single explanatory failing case
//! - Blank output yields exactly one failing case: "No test output provided"
//! - Build/compile failures yield one failing case prefixed with
//!   "Compilation failed: "
//! - Cases are returned in the order the runner reported them
//!
//! Input is stdout and stderr concatenated; ANSI colour codes are stripped
//! before the language parser sees it.

mod go;
mod java;
mod python;
mod rust;
mod typescript;

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{Language, TestCaseResult};

pub use go::GoParser;
pub use java::JavaParser;
pub use python::PythonParser;
pub use rust::RustParser;
pub use typescript::TypeScriptParser;

pub const MAX_ERROR_LENGTH: usize = 1000;
pub const MAX_ERROR_LINES: usize = 10;

pub const NO_OUTPUT_MESSAGE: &str = "No test output provided";
const EXECUTION_INPUT: &str = "Test execution";

lazy_static! {
    static ref ANSI_ESCAPE: Regex = Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").unwrap();
}

pub trait TestResultParser: Send + Sync {
    fn parse(&self, output: &str) -> Vec<TestCaseResult>;
}

pub fn parser_for(language: Language) -> Box<dyn TestResultParser> {
    match language {
        Language::Java => Box::new(JavaParser),
        Language::Python => Box::new(PythonParser),
        Language::TypeScript => Box::new(TypeScriptParser),
        Language::Go => Box::new(GoParser),
        Language::Rust => Box::new(RustParser),
    }
}

/// Parse combined runner output for a language.
pub fn parse_output(language: Language, output: &str) -> Vec<TestCaseResult> {
    if output.trim().is_empty() {
        return vec![no_output()];
    }
    let cleaned = strip_ansi(output);
    let results = parser_for(language).parse(&cleaned);
    if results.is_empty() {
        vec![unparseable(&cleaned)]
    } else {
        results
    }
}

pub fn strip_ansi(output: &str) -> String {
    ANSI_ESCAPE.replace_all(output, "").replace("\r\n", "\n")
}

pub(crate) fn no_output() -> TestCaseResult {
    error_case(NO_OUTPUT_MESSAGE)
}

pub(crate) fn unparseable(output: &str) -> TestCaseResult {
    error_case(format!(
        "Unable to parse test output: {}",
        truncate(output.trim(), MAX_ERROR_LENGTH)
    ))
}

pub(crate) fn compilation_failed(details: &str) -> TestCaseResult {
    error_case(format!(
        "Compilation failed: {}",
        truncate(details.trim(), MAX_ERROR_LENGTH)
    ))
}

/// Whole-run failure that is not attributable to a single test.
pub(crate) fn error_case(message: impl Into<String>) -> TestCaseResult {
    TestCaseResult {
        passed: false,
        input: EXECUTION_INPUT.to_string(),
        expected_output: Some("Tests should execute successfully".to_string()),
        actual_output: Some("Test execution failed".to_string()),
        message: message.into(),
    }
}

/// Cut `text` to at most `max_chars` characters, marking the cut with "...".
pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Keep the first `max_lines` lines of an error block.
pub(crate) fn limit_lines(lines: &[&str], max_lines: usize) -> String {
    let mut block: Vec<&str> = lines.iter().take(max_lines).copied().collect();
    if lines.len() > max_lines {
        block.push("...");
    }
    block.join("\n")
}
