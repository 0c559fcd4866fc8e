// vitest output (verbose reporter)
use lazy_static::lazy_static;
use regex::Regex;

use super::{compilation_failed, no_output, unparseable, TestResultParser};
use crate::types::TestCaseResult;

lazy_static! {
    static ref TEST_LINE: Regex =
        Regex::new(r"(?m)^[ \t]*(✓|√|×|✗|↓)[ \t]+(.+?)(?:[ \t]+\d+(?:\.\d+)?[ \t]*ms)?[ \t]*$")
            .unwrap();
    static ref FILE_SUMMARY: Regex =
        Regex::new(r"\.(?:test|spec)\.[cm]?[jt]sx?\s+\(\d+(?: tests?)?(?: \| \d+ \w+)*\)$").unwrap();
    static ref EXPECTATION: Regex =
        Regex::new(r"expected (.+?) to (?:be|equal|deeply equal|strictly equal) (.+?)(?:\s+//.*)?$")
            .unwrap();
    static ref TESTS_TALLY: Regex = Regex::new(r"(?m)^\s*Tests\s+(.+?)\s+\((\d+)\)\s*$").unwrap();
    static ref FILES_TALLY: Regex =
        Regex::new(r"(?m)^\s*Test Files\s+(.+?)\s+\((\d+)\)\s*$").unwrap();
    static ref COUNT_FAILED: Regex = Regex::new(r"(\d+) failed").unwrap();
    static ref COUNT_PASSED: Regex = Regex::new(r"(\d+) passed").unwrap();
    static ref TS_ERROR: Regex = Regex::new(r"(?m)^.*error TS\d+:.*$").unwrap();
}

const BUILD_FAILURE_MARKERS: [&str; 4] = [
    "Transform failed",
    "SyntaxError",
    "Failed to load url",
    "Failed to parse source",
];

const AGGREGATE_INPUT: &str = "TypeScript Tests";

pub struct TypeScriptParser;

impl TestResultParser for TypeScriptParser {
    fn parse(&self, output: &str) -> Vec<TestCaseResult> {
        if output.trim().is_empty() {
            return vec![no_output()];
        }

        let results = individual_tests(output);
        if !results.is_empty() {
            return results;
        }

        let ts_errors: Vec<&str> = TS_ERROR.find_iter(output).map(|m| m.as_str().trim()).collect();
        if !ts_errors.is_empty() {
            return vec![compilation_failed(&ts_errors.join("\n"))];
        }
        if BUILD_FAILURE_MARKERS.iter().any(|m| output.contains(m)) {
            return vec![compilation_failed(output)];
        }

        if let Some(aggregate) = tally(&TESTS_TALLY, output) {
            return vec![aggregate];
        }
        if let Some(aggregate) = tally(&FILES_TALLY, output) {
            return vec![aggregate];
        }

        vec![unparseable(output)]
    }
}

fn individual_tests(output: &str) -> Vec<TestCaseResult> {
    let lines: Vec<&str> = output.lines().collect();
    let mut results = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(caps) = TEST_LINE.captures(line) else {
            continue;
        };
        let name = caps[2].trim();
        if FILE_SUMMARY.is_match(name) {
            continue;
        }

        let result = match &caps[1] {
            "✓" | "√" => TestCaseResult::passed(name, format!("Test '{}' passed", name)),
            "↓" => TestCaseResult::passed(name, format!("Test '{}' skipped", name)),
            _ => {
                let reason = lines
                    .get(idx + 1)
                    .map(|l| l.trim())
                    .and_then(|l| l.strip_prefix("→"))
                    .map(|l| l.trim().to_string());
                let (expected, actual) = reason
                    .as_deref()
                    .and_then(|r| EXPECTATION.captures(r))
                    .map(|c| (Some(c[2].to_string()), Some(c[1].to_string())))
                    .unwrap_or((None, None));
                let message = match reason {
                    Some(r) => format!("Test '{}' failed: {}", name, r),
                    None => format!("Test '{}' failed", name),
                };
                TestCaseResult::failed(name, message).with_outputs(expected, actual)
            }
        };
        results.push(result);
    }
    results
}

/// Aggregate case from a `Tests` / `Test Files` tally line.
fn tally(pattern: &Regex, output: &str) -> Option<TestCaseResult> {
    let caps = pattern.captures(output)?;
    let counts = &caps[1];
    let total = &caps[2];
    let failed: u64 = COUNT_FAILED
        .captures(counts)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    let passed: u64 = COUNT_PASSED
        .captures(counts)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);

    let message = format!("{} passed, {} failed ({} total)", passed, failed, total);
    if failed == 0 && passed > 0 {
        Some(TestCaseResult::passed(AGGREGATE_INPUT, message))
    } else {
        Some(TestCaseResult::failed(AGGREGATE_INPUT, message))
    }
}
