// Maven surefire output
use lazy_static::lazy_static;
use regex::Regex;

use super::{
    compilation_failed, no_output, truncate, unparseable, TestResultParser, MAX_ERROR_LENGTH,
};
use crate::types::TestCaseResult;

lazy_static! {
    static ref LEVEL_PREFIX: Regex = Regex::new(r"^\[(?:INFO|ERROR|WARNING|WARN)\]\s?").unwrap();
    static ref RUNNING: Regex = Regex::new(r"^Running (\S+)").unwrap();
    static ref CLASS_TALLY: Regex = Regex::new(
        r"Tests run: (\d+), Failures: (\d+), Errors: (\d+), Skipped: (\d+), Time elapsed: ([\d.,]+) ?s(?:.*? in (\S+))?"
    )
    .unwrap();
    static ref OVERALL_TALLY: Regex =
        Regex::new(r"^Tests run: (\d+), Failures: (\d+), Errors: (\d+), Skipped: (\d+)\s*$").unwrap();
    static ref METHOD_FAILURE: Regex = Regex::new(
        r"^(?:([\w.$]+)\.(\w+)|(\w+)\(([\w.$]+)\))\s+(?:--\s+)?Time elapsed:.*<<< (FAILURE|ERROR)!"
    )
    .unwrap();
    static ref EXPECTED_ACTUAL: Regex =
        Regex::new(r"expected:\s*<(.*?)>\s*but was:\s*<(.*?)>").unwrap();
}

pub struct JavaParser;

impl TestResultParser for JavaParser {
    fn parse(&self, output: &str) -> Vec<TestCaseResult> {
        if output.trim().is_empty() {
            return vec![no_output()];
        }

        let lines: Vec<&str> = output.lines().map(strip_level).collect();
        let results = class_results(&lines);
        if !results.is_empty() {
            return results;
        }

        if output.contains("COMPILATION ERROR") || output.contains("Compilation failure") {
            let errors: Vec<&str> = lines
                .iter()
                .copied()
                .filter(|l| l.contains(".java:["))
                .collect();
            let details = if errors.is_empty() {
                output.to_string()
            } else {
                errors.join("\n")
            };
            return vec![compilation_failed(&details)];
        }

        if let Some(summary) = overall_summary(&lines) {
            return vec![summary];
        }

        vec![unparseable(output)]
    }
}

fn strip_level(line: &str) -> &str {
    match LEVEL_PREFIX.find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    }
}

/// One summary case per test class, each followed by its failed methods.
fn class_results(lines: &[&str]) -> Vec<TestCaseResult> {
    let mut results = Vec::new();
    let mut current_class: Option<String> = None;

    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = RUNNING.captures(line) {
            current_class = Some(caps[1].to_string());
            continue;
        }

        if let Some(caps) = CLASS_TALLY.captures(line) {
            let class = caps
                .get(6)
                .map(|m| m.as_str().to_string())
                .or_else(|| current_class.clone())
                .unwrap_or_else(|| "Test class".to_string());
            let failures: u64 = caps[2].parse().unwrap_or(0);
            let errors: u64 = caps[3].parse().unwrap_or(0);
            let message = format!(
                "Tests run: {}, Failures: {}, Errors: {}, Skipped: {} ({}s)",
                &caps[1], failures, errors, &caps[4], &caps[5]
            );
            if failures + errors == 0 {
                results.push(TestCaseResult::passed(class, message));
            } else {
                results.push(TestCaseResult::failed(class, message));
            }
            continue;
        }

        if let Some(caps) = METHOD_FAILURE.captures(line) {
            let (class, method) = match (caps.get(1), caps.get(2)) {
                (Some(class), Some(method)) => (class.as_str(), method.as_str()),
                _ => (
                    caps.get(4).map(|m| m.as_str()).unwrap_or(""),
                    caps.get(3).map(|m| m.as_str()).unwrap_or(""),
                ),
            };
            results.push(method_failure(class, method, &caps[5], lines.get(idx + 1).copied()));
        }
    }
    results
}

fn method_failure(class: &str, method: &str, kind: &str, detail: Option<&str>) -> TestCaseResult {
    let short_class = class.rsplit('.').next().unwrap_or(class);
    let input = format!("{}.{}", short_class, method);
    let detail = detail.map(str::trim).filter(|d| !d.is_empty() && !d.starts_with("at "));

    let (expected, actual) = detail
        .and_then(|d| EXPECTED_ACTUAL.captures(d))
        .map(|c| (Some(c[1].to_string()), Some(c[2].to_string())))
        .unwrap_or((None, None));
    let verdict = if kind == "ERROR" { "raised an error" } else { "failed" };
    let message = match detail {
        Some(d) => format!("{} {}: {}", input, verdict, truncate(d, MAX_ERROR_LENGTH)),
        None => format!("{} {}", input, verdict),
    };
    TestCaseResult::failed(input, message).with_outputs(expected, actual)
}

/// Overall `Tests run:` line from the Results section.
fn overall_summary(lines: &[&str]) -> Option<TestCaseResult> {
    let caps = lines.iter().rev().find_map(|l| OVERALL_TALLY.captures(l.trim()))?;
    let run: u64 = caps[1].parse().unwrap_or(0);
    let failures: u64 = caps[2].parse().unwrap_or(0);
    let errors: u64 = caps[3].parse().unwrap_or(0);
    let message = format!(
        "Tests run: {}, Failures: {}, Errors: {}, Skipped: {}",
        run, failures, errors, &caps[4]
    );
    if run > 0 && failures + errors == 0 {
        Some(TestCaseResult::passed("Test summary", message))
    } else {
        Some(TestCaseResult::failed("Test summary", message))
    }
}
