//! Submission ledger: a record of every attempt and how it ended.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{EngineError, EngineResult};
use crate::source::decode_source;
use crate::types::{ExecutionRequest, ExecutionResult, Language};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionRecord {
    pub id: i64,
    pub user_id: i64,
    pub exercise_id: i64,
    pub language: Language,
    /// Decoded source as submitted
    pub code: String,
    pub stdin: Option<String>,
    pub expected_output: Option<String>,
    pub status: SubmissionStatus,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub passed_tests: usize,
    pub total_tests: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn new(id: i64, request: &ExecutionRequest, user_id: i64) -> EngineResult<Self> {
        let code = String::from_utf8_lossy(&decode_source(&request.code)?).into_owned();
        let now = Utc::now();
        Ok(Self {
            id,
            user_id,
            exercise_id: request.exercise_id,
            language: request.language,
            code,
            stdin: request.stdin.clone(),
            expected_output: request.expected_output.clone(),
            status: SubmissionStatus::Pending,
            stdout: None,
            stderr: None,
            passed_tests: 0,
            total_tests: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Move the record to its terminal state. A failed run is a valid outcome.
    pub fn apply_result(&mut self, result: &ExecutionResult) {
        self.status = if result.success {
            SubmissionStatus::Completed
        } else {
            SubmissionStatus::Failed
        };
        self.stdout = Some(result.stdout.clone());
        self.stderr = Some(result.stderr.clone());
        self.passed_tests = result.passed_count();
        self.total_tests = result.test_case_results.len();
        self.updated_at = Utc::now();
    }
}

#[async_trait]
pub trait SubmissionLedger: Send + Sync {
    /// Open a pending entry before the task is enqueued.
    async fn create_submission(&self, request: &ExecutionRequest, user_id: i64)
        -> EngineResult<i64>;

    async fn update_submission_with_result(
        &self,
        submission_id: i64,
        result: &ExecutionResult,
    ) -> EngineResult<()>;

    async fn get_submission(&self, submission_id: i64) -> EngineResult<SubmissionRecord>;
}

#[derive(Default)]
pub struct MemoryLedger {
    next_id: AtomicI64,
    records: Mutex<HashMap<i64, SubmissionRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<i64, SubmissionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SubmissionLedger for MemoryLedger {
    async fn create_submission(
        &self,
        request: &ExecutionRequest,
        user_id: i64,
    ) -> EngineResult<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = SubmissionRecord::new(id, request, user_id)?;
        self.records().insert(id, record);
        Ok(id)
    }

    async fn update_submission_with_result(
        &self,
        submission_id: i64,
        result: &ExecutionResult,
    ) -> EngineResult<()> {
        let mut records = self.records();
        let record = records
            .get_mut(&submission_id)
            .ok_or(EngineError::SubmissionNotFound(submission_id))?;
        record.apply_result(result);
        Ok(())
    }

    async fn get_submission(&self, submission_id: i64) -> EngineResult<SubmissionRecord> {
        self.records()
            .get(&submission_id)
            .cloned()
            .ok_or(EngineError::SubmissionNotFound(submission_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::encode_source;
    use crate::types::{ExecutionTask, TestCaseResult};
    use uuid::Uuid;

    fn request() -> ExecutionRequest {
        ExecutionRequest {
            exercise_id: 12,
            language: Language::Python,
            code: encode_source("print('hi')"),
            stdin: None,
            expected_output: Some("hi".to_string()),
        }
    }

    fn result(success: bool) -> ExecutionResult {
        let task = ExecutionTask {
            task_id: Uuid::new_v4(),
            request: request(),
            exercise_path: "python/hello".to_string(),
            submission_id: 1,
            user_id: 5,
        };
        let mut result = ExecutionResult::internal_error(&task, "x");
        result.success = success;
        result.test_case_results = vec![
            TestCaseResult::passed("a", "ok"),
            TestCaseResult {
                passed: success,
                ..TestCaseResult::failed("b", "assertion")
            },
        ];
        result
    }

    #[tokio::test]
    async fn test_create_starts_pending_with_decoded_code() {
        let ledger = MemoryLedger::new();
        let id = ledger.create_submission(&request(), 5).await.unwrap();
        let record = ledger.get_submission(id).await.unwrap();

        assert_eq!(record.status, SubmissionStatus::Pending);
        assert_eq!(record.code, "print('hi')");
        assert_eq!(record.user_id, 5);
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let ledger = MemoryLedger::new();
        let a = ledger.create_submission(&request(), 5).await.unwrap();
        let b = ledger.create_submission(&request(), 5).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_failing_result_marks_failed() {
        let ledger = MemoryLedger::new();
        let id = ledger.create_submission(&request(), 5).await.unwrap();
        ledger
            .update_submission_with_result(id, &result(false))
            .await
            .unwrap();

        let record = ledger.get_submission(id).await.unwrap();
        assert_eq!(record.status, SubmissionStatus::Failed);
        assert_eq!(record.passed_tests, 1);
        assert_eq!(record.total_tests, 2);
    }

    #[tokio::test]
    async fn test_passing_result_marks_completed() {
        let ledger = MemoryLedger::new();
        let id = ledger.create_submission(&request(), 5).await.unwrap();
        ledger
            .update_submission_with_result(id, &result(true))
            .await
            .unwrap();
        assert_eq!(
            ledger.get_submission(id).await.unwrap().status,
            SubmissionStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_unknown_submission() {
        let ledger = MemoryLedger::new();
        assert!(matches!(
            ledger.get_submission(99).await,
            Err(EngineError::SubmissionNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_updates_land_after_poisoned_lock() {
        let ledger = std::sync::Arc::new(MemoryLedger::new());
        let id = ledger.create_submission(&request(), 5).await.unwrap();
        let poisoner = ledger.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.records.lock().unwrap();
            panic!("holder panicked");
        })
        .join();

        ledger
            .update_submission_with_result(id, &result(true))
            .await
            .unwrap();
        assert_eq!(
            ledger.get_submission(id).await.unwrap().status,
            SubmissionStatus::Completed
        );
    }
}
