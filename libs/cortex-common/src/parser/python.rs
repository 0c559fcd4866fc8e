// `python -m unittest -v` output
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use super::{
    error_case, limit_lines, no_output, truncate, unparseable, TestResultParser,
    MAX_ERROR_LENGTH, MAX_ERROR_LINES,
};
use crate::types::TestCaseResult;

lazy_static! {
    static ref TEST_LINE: Regex = Regex::new(
        r"(?m)^(\w+) \(([\w.]+)\)(?:\n[^\n]*?)? \.\.\. (ok|FAIL|ERROR|skipped|expected failure|unexpected success)"
    )
    .unwrap();
    static ref SUMMARY: Regex =
        Regex::new(r"Ran (\d+) tests? in ([\d.]+)s\s+(OK|FAILED|NO TESTS RAN)(?: \(([^)]*)\))?")
            .unwrap();
    static ref BLOCK_HEADER: Regex = Regex::new(r"^(FAIL|ERROR): (\w+) \(([\w.]+)\)").unwrap();
    static ref NOT_EQUAL: Regex = Regex::new(r"(?m)^AssertionError: (.+) != (.+)$").unwrap();
}

const RULE_DOUBLE: &str =
    "======================================================================";
const RULE_SINGLE: &str =
    "----------------------------------------------------------------------";

const STARTUP_ERRORS: [&str; 5] = [
    "SyntaxError",
    "IndentationError",
    "ModuleNotFoundError",
    "ImportError",
    "NameError",
];

pub struct PythonParser;

impl TestResultParser for PythonParser {
    fn parse(&self, output: &str) -> Vec<TestCaseResult> {
        if output.trim().is_empty() {
            return vec![no_output()];
        }

        let details = failure_blocks(output);
        let results: Vec<TestCaseResult> = TEST_LINE
            .captures_iter(output)
            .map(|caps| {
                let id = test_id(&caps[1], &caps[2]);
                test_case(&id, &caps[3], details.get(&id))
            })
            .collect();
        if !results.is_empty() {
            return results;
        }

        if let Some(traceback) = startup_traceback(output) {
            return vec![error_case(format!(
                "Test execution failed: {}",
                truncate(&traceback, MAX_ERROR_LENGTH)
            ))];
        }

        if let Some(summary) = summary(output) {
            return vec![summary];
        }

        vec![unparseable(output)]
    }
}

/// `module.Class.test` regardless of which Python version printed it.
fn test_id(name: &str, class: &str) -> String {
    if class.ends_with(&format!(".{}", name)) {
        class.to_string()
    } else {
        format!("{}.{}", class, name)
    }
}

fn test_case(id: &str, status: &str, detail: Option<&String>) -> TestCaseResult {
    match status {
        "ok" | "expected failure" => TestCaseResult::passed(id, format!("Test {} passed", id)),
        "skipped" => TestCaseResult::passed(id, format!("Test {} skipped", id)),
        _ => {
            let (expected, actual) = detail
                .and_then(|d| NOT_EQUAL.captures(d))
                .map(|c| (Some(c[2].trim().to_string()), Some(c[1].trim().to_string())))
                .unwrap_or((None, None));
            let verdict = if status == "ERROR" { "raised an error" } else { "failed" };
            let message = match detail.and_then(|d| d.lines().rev().find(|l| !l.trim().is_empty())) {
                Some(last) => format!("Test {} {}: {}", id, verdict, last.trim()),
                None => format!("Test {} {}", id, verdict),
            };
            TestCaseResult::failed(id, message).with_outputs(expected, actual)
        }
    }
}

/// Traceback bodies keyed by test id, from the FAIL:/ERROR: sections.
fn failure_blocks(output: &str) -> HashMap<String, String> {
    let mut blocks = HashMap::new();

    for section in output.split(RULE_DOUBLE).skip(1) {
        let section = section.trim_start_matches('\n');
        let Some(caps) = BLOCK_HEADER.captures(section) else {
            continue;
        };
        let id = test_id(&caps[2], &caps[3]);
        let body = section
            .split_once(RULE_SINGLE)
            .map(|(_, rest)| rest)
            .unwrap_or("");
        let body = body.split(RULE_SINGLE).next().unwrap_or("").trim();
        blocks.insert(id, body.to_string());
    }
    blocks
}

/// Traceback raised before any test ran (syntax or import errors).
fn startup_traceback(output: &str) -> Option<String> {
    if !STARTUP_ERRORS.iter().any(|e| output.contains(e)) {
        return None;
    }
    let start = output.rfind("Traceback (most recent call last):").unwrap_or(0);
    let lines: Vec<&str> = output[start..].lines().collect();
    let tail_start = lines.len().saturating_sub(MAX_ERROR_LINES);
    Some(limit_lines(&lines[tail_start..], MAX_ERROR_LINES))
}

fn summary(output: &str) -> Option<TestCaseResult> {
    let caps = SUMMARY.captures(output)?;
    let ran: u64 = caps[1].parse().unwrap_or(0);
    let extra = caps
        .get(4)
        .map(|m| format!(" ({})", m.as_str()))
        .unwrap_or_default();
    let message = format!("Ran {} tests in {}s: {}{}", ran, &caps[2], &caps[3], extra);

    if ran > 0 && &caps[3] == "OK" {
        Some(TestCaseResult::passed("Test summary", message))
    } else {
        Some(TestCaseResult::failed("Test summary", message))
    }
}
