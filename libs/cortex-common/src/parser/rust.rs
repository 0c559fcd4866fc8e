// `cargo test` output
use lazy_static::lazy_static;
use regex::Regex;

use super::{
    compilation_failed, limit_lines, no_output, truncate, unparseable, TestResultParser,
    MAX_ERROR_LENGTH, MAX_ERROR_LINES,
};
use crate::types::TestCaseResult;

lazy_static! {
    static ref TEST_LINE: Regex =
        Regex::new(r"(?m)^test (.+?) \.\.\. (ok|FAILED|ignored)").unwrap();
    static ref TALLY: Regex =
        Regex::new(r"test result: (ok|FAILED)\. (\d+) passed; (\d+) failed;").unwrap();
    static ref ERROR_START: Regex = Regex::new(r"^error(\[E\d+\])?:").unwrap();
    static ref LEFT: Regex = Regex::new(r"(?m)^\s*left: (.*)$").unwrap();
    static ref RIGHT: Regex = Regex::new(r"(?m)^\s*right: (.*)$").unwrap();
}

pub struct RustParser;

impl TestResultParser for RustParser {
    fn parse(&self, output: &str) -> Vec<TestCaseResult> {
        if output.trim().is_empty() {
            return vec![no_output()];
        }

        let has_tally = TALLY.is_match(output);
        let mut results: Vec<TestCaseResult> = TEST_LINE
            .captures_iter(output)
            .map(|caps| test_case(output, &caps[1], &caps[2]))
            .collect();

        if !has_tally && results.is_empty() {
            let errors = compiler_errors(output);
            if !errors.is_empty() {
                return vec![compilation_failed(&errors.join("\n\n"))];
            }
            return vec![unparseable(output)];
        }

        if has_tally {
            results.push(summary(output));
        }
        results
    }
}

fn test_case(output: &str, name: &str, status: &str) -> TestCaseResult {
    match status {
        "ok" => TestCaseResult::passed(name, format!("Test '{}' passed", name)),
        "ignored" => TestCaseResult::passed(name, format!("Test '{}' was ignored", name)),
        _ => {
            let details = failure_details(output, name);
            let (expected, actual) = match details.as_deref() {
                Some(block) => (
                    RIGHT.captures(block).map(|c| c[1].trim().to_string()),
                    LEFT.captures(block).map(|c| c[1].trim().to_string()),
                ),
                None => (None, None),
            };
            let message = match details {
                Some(block) => format!(
                    "Test '{}' failed: {}",
                    name,
                    truncate(block.trim(), MAX_ERROR_LENGTH)
                ),
                None => format!("Test '{}' failed", name),
            };
            TestCaseResult::failed(name, message).with_outputs(expected, actual)
        }
    }
}

/// Captured stdout block cargo prints for a failed test.
fn failure_details(output: &str, name: &str) -> Option<String> {
    let header = format!("---- {} stdout ----", name);
    let start = output.find(&header)? + header.len();
    let block: Vec<&str> = output[start..]
        .lines()
        .skip_while(|l| l.trim().is_empty())
        .take_while(|l| !l.trim().is_empty() && !l.starts_with("----"))
        .collect();
    if block.is_empty() {
        None
    } else {
        Some(block.join("\n"))
    }
}

fn summary(output: &str) -> TestCaseResult {
    let mut passed = 0u64;
    let mut failed = 0u64;
    let mut all_ok = true;

    for caps in TALLY.captures_iter(output) {
        all_ok &= &caps[1] == "ok";
        passed += caps[2].parse::<u64>().unwrap_or(0);
        failed += caps[3].parse::<u64>().unwrap_or(0);
    }

    let message = format!("{} passed; {} failed", passed, failed);
    if all_ok && failed == 0 {
        TestCaseResult::passed("Test summary", message)
    } else {
        TestCaseResult::failed("Test summary", message)
    }
}

/// Error blocks from rustc: the `error:` line plus its indented context.
fn compiler_errors(output: &str) -> Vec<String> {
    let mut errors = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in output.lines() {
        let trimmed = line.trim_start();
        if ERROR_START.is_match(trimmed) && !trimmed.starts_with("error: test failed") {
            if !current.is_empty() {
                errors.push(limit_lines(&current, MAX_ERROR_LINES));
            }
            current = vec![trimmed];
        } else if !current.is_empty() && is_continuation(line) {
            current.push(line);
        } else if !current.is_empty() {
            errors.push(limit_lines(&current, MAX_ERROR_LINES));
            current.clear();
        }
    }
    if !current.is_empty() {
        errors.push(limit_lines(&current, MAX_ERROR_LINES));
    }
    errors
}

fn is_continuation(line: &str) -> bool {
    if line.trim().is_empty() {
        return false;
    }
    line.starts_with(' ')
        || line.starts_with('\t')
        || line.starts_with(|c: char| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_passing_test_with_summary() {
        let output = "test it_works ... ok\ntest result: ok. 1 passed; 0 failed;";
        let results = RustParser.parse(output);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].input, "it_works");
        assert!(results[0].passed);
        assert_eq!(results[1].input, "Test summary");
        assert!(results[1].passed);
    }

    #[test]
    fn test_failing_test_carries_assertion_values() {
        let output = r#"
running 2 tests
test tests::adds ... ok
test tests::subtracts ... FAILED

failures:

---- tests::subtracts stdout ----
thread 'tests::subtracts' panicked at src/lib.rs:14:9:
assertion `left == right` failed
  left: 3
 right: 1

failures:
    tests::subtracts

test result: FAILED. 1 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out; finished in 0.00s

error: test failed, to rerun pass `--lib`
"#;
        let results = RustParser.parse(output);

        assert_eq!(results.len(), 3);
        assert!(results[0].passed);
        let failed = &results[1];
        assert!(!failed.passed);
        assert_eq!(failed.input, "tests::subtracts");
        assert_eq!(failed.actual_output.as_deref(), Some("3"));
        assert_eq!(failed.expected_output.as_deref(), Some("1"));
        assert!(failed.message.contains("panicked"));
        assert!(!results[2].passed);
        assert_eq!(results[2].message, "1 passed; 1 failed");
    }

    #[test]
    fn test_tallies_from_several_binaries_are_summed() {
        let output = "\
test a ... ok
test result: ok. 1 passed; 0 failed; 0 ignored;
test b ... ignored
test result: ok. 0 passed; 0 failed; 1 ignored;
";
        let results = RustParser.parse(output);
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.passed));
        assert_eq!(results[2].message, "1 passed; 0 failed");
    }

    #[test]
    fn test_tally_without_test_lines_yields_summary_only() {
        let results = RustParser.parse("test result: ok. 4 passed; 0 failed; 0 ignored;");
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
    }

    #[test]
    fn test_compile_error() {
        let output = r#"   Compiling hello v0.1.0 (/code)
error[E0425]: cannot find value `x` in this scope
 --> src/lib.rs:2:5
  |
2 |     x
  |     ^ not found in this scope

error: could not compile `hello` (lib test) due to 1 previous error
"#;
        let results = RustParser.parse(output);
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
        assert!(results[0].message.starts_with("Compilation failed: "));
        assert!(results[0].message.contains("E0425"));
        assert!(results[0].message.contains("src/lib.rs:2:5"));
    }

    #[test]
    fn test_error_word_in_test_name_is_not_a_compile_error() {
        let output = "test handles_error ... ok\ntest result: ok. 1 passed; 0 failed;";
        let results = RustParser.parse(output);
        assert!(results.iter().all(|r| r.passed));
    }

    #[test]
    fn test_warnings_alone_are_unparseable_not_compile_errors() {
        let output = "warning: unused variable: `y`\n --> src/lib.rs:3:9\n";
        let results = RustParser.parse(output);
        assert_eq!(results.len(), 1);
        assert!(results[0].message.starts_with("Unable to parse test output"));
    }
}
