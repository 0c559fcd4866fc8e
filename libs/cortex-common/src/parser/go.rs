// `go test -v` output
use lazy_static::lazy_static;
use regex::Regex;

use super::{compilation_failed, no_output, unparseable, TestResultParser};
use crate::types::TestCaseResult;

lazy_static! {
    static ref TEST_LINE: Regex =
        Regex::new(r"(?m)^\s*--- (PASS|FAIL|SKIP):\s+(\S+)\s+\((\d+(?:\.\d+)?)s\)").unwrap();
    static ref PACKAGE_OK: Regex =
        Regex::new(r"(?m)^ok\s+(\S+)\s+(\d+(?:\.\d+)?)s").unwrap();
    static ref PACKAGE_FAIL: Regex =
        Regex::new(r"(?m)^FAIL[ \t]+(\S+)(?:[ \t]+(\d+(?:\.\d+)?)s)?(?:[ \t]+\[([^\]]+)\])?").unwrap();
    static ref BARE_PASS: Regex = Regex::new(r"(?m)^PASS\s*$").unwrap();
    static ref FAILURE_DETAIL: Regex =
        Regex::new(r"(?m)^\s+(\S+\.go:\d+: .*)$").unwrap();
}

const BUILD_FAILURE_MARKERS: [&str; 3] = ["[build failed]", "[setup failed]", "does not compile"];

pub struct GoParser;

impl TestResultParser for GoParser {
    fn parse(&self, output: &str) -> Vec<TestCaseResult> {
        if output.trim().is_empty() {
            return vec![no_output()];
        }

        if BUILD_FAILURE_MARKERS.iter().any(|m| output.contains(m)) {
            return vec![compilation_failed(&build_errors(output))];
        }

        let results: Vec<TestCaseResult> = TEST_LINE
            .captures_iter(output)
            .map(|caps| {
                let name = &caps[2];
                let took = &caps[3];
                match &caps[1] {
                    "PASS" => {
                        TestCaseResult::passed(name, format!("Test {} passed (took {}s)", name, took))
                    }
                    "SKIP" => {
                        TestCaseResult::passed(name, format!("Test {} skipped", name))
                    }
                    _ => failed_test(output, name, took),
                }
            })
            .collect();
        if !results.is_empty() {
            return results;
        }

        let packages = package_results(output);
        if !packages.is_empty() {
            return packages;
        }

        if BARE_PASS.is_match(output) {
            return vec![TestCaseResult::passed("Test execution", "All tests passed")];
        }

        vec![unparseable(output)]
    }
}

fn failed_test(output: &str, name: &str, took: &str) -> TestCaseResult {
    let details = failure_lines(output, name);
    let message = if details.is_empty() {
        format!("Test {} failed (took {}s)", name, took)
    } else {
        format!("Test {} failed (took {}s): {}", name, took, details.join("; "))
    };
    TestCaseResult::failed(name, message)
}

/// `file_test.go:12: message` lines logged between `=== RUN name` and its result.
fn failure_lines(output: &str, name: &str) -> Vec<String> {
    let run_marker = format!("=== RUN   {}", name);
    let result_marker = format!("--- FAIL: {} ", name);
    let (Some(start), Some(end)) = (output.find(&run_marker), output.find(&result_marker)) else {
        return Vec::new();
    };
    if end <= start {
        return Vec::new();
    }
    FAILURE_DETAIL
        .captures_iter(&output[start..end])
        .map(|c| c[1].trim().to_string())
        .collect()
}

/// One case per package tally line, in output order.
fn package_results(output: &str) -> Vec<TestCaseResult> {
    let mut found: Vec<(usize, TestCaseResult)> = Vec::new();

    for caps in PACKAGE_OK.captures_iter(output) {
        let Some(whole) = caps.get(0) else { continue };
        let pkg = &caps[1];
        found.push((
            whole.start(),
            TestCaseResult::passed(pkg, format!("Tests passed in {} ({}s)", pkg, &caps[2])),
        ));
    }
    for caps in PACKAGE_FAIL.captures_iter(output) {
        let Some(whole) = caps.get(0) else { continue };
        let pkg = &caps[1];
        let message = match caps.get(2) {
            Some(t) => format!("Tests failed in {} ({}s)", pkg, t.as_str()),
            None => format!("Tests failed in {}", pkg),
        };
        found.push((whole.start(), TestCaseResult::failed(pkg, message)));
    }

    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, r)| r).collect()
}

/// Compiler diagnostics: the `# pkg` header and the `file.go:line:col:` lines.
fn build_errors(output: &str) -> String {
    let lines: Vec<&str> = output
        .lines()
        .filter(|l| {
            let t = l.trim();
            t.starts_with("# ") || t.contains(".go:") || t.starts_with("go: ")
        })
        .collect();
    if lines.is_empty() {
        output.to_string()
    } else {
        lines.join("\n")
    }
}
