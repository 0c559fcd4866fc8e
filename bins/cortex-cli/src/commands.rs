// CLI commands for inspecting Cortex
use anyhow::{bail, Context, Result};
use cortex_common::exercise::ExerciseCatalog;
use cortex_common::ledger::{SubmissionLedger, SubmissionRecord};
use cortex_common::parser::parse_output;
use cortex_common::profile::ProfileRegistry;
use cortex_common::redis::{self as cortex_redis, RedisLedger, RedisResultStore};
use cortex_common::store::ResultStore;
use cortex_common::types::{ExecutionResult, Language, TestCaseResult};
use serde::Serialize;
use std::fs;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug)]
pub struct ConfigReport {
    pub languages: Vec<String>,
    pub exercises: usize,
}

/// Load both config files and make sure every exercise can be executed.
pub fn validate_config(languages_path: &Path, exercises_path: &Path) -> Result<ConfigReport> {
    let profiles = ProfileRegistry::load(languages_path)
        .with_context(|| format!("Invalid language config: {}", languages_path.display()))?;
    let catalog = ExerciseCatalog::load(exercises_path)
        .with_context(|| format!("Invalid exercise catalog: {}", exercises_path.display()))?;

    let orphans: Vec<String> = catalog
        .all()
        .into_iter()
        .filter(|e| !profiles.supports(e.language))
        .map(|e| format!("#{} {} ({})", e.id, e.title, e.language))
        .collect();
    if !orphans.is_empty() {
        bail!("Exercises without a language profile: {}", orphans.join(", "));
    }

    Ok(ConfigReport {
        languages: profiles.languages().iter().map(|l| l.to_string()).collect(),
        exercises: catalog.all().len(),
    })
}

#[derive(Debug, Serialize)]
pub struct ParseSummary {
    pub language: Language,
    pub passed: usize,
    pub total: usize,
    pub test_case_results: Vec<TestCaseResult>,
}

/// Run a captured runner log through the result interpreter.
pub fn parse_file(language: &str, file: &Path) -> Result<ParseSummary> {
    let language: Language = language.parse()?;
    let output = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let cases = parse_output(language, &output);
    Ok(ParseSummary {
        language,
        passed: cases.iter().filter(|c| c.passed).count(),
        total: cases.len(),
        test_case_results: cases,
    })
}

pub async fn fetch_result(redis_url: &str, task_id: &str) -> Result<ExecutionResult> {
    let task_id = Uuid::parse_str(task_id).context("Invalid task ID format")?;
    let conn = cortex_redis::connect(redis_url).await?;
    let store = RedisResultStore::new(conn);

    match store.get(task_id).await? {
        Some(result) => Ok(result),
        None => bail!("No result for task {} (still running, expired or unknown)", task_id),
    }
}

pub async fn fetch_submission(redis_url: &str, submission_id: i64) -> Result<SubmissionRecord> {
    let conn = cortex_redis::connect(redis_url).await?;
    Ok(RedisLedger::new(conn).get_submission(submission_id).await?)
}
