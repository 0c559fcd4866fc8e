//! Execution Orchestrator, submitting side.
//!
//! `submit` validates a submission, opens a ledger entry and enqueues an
//! `ExecutionTask`; it returns as soon as the task is queued. `get_result`
//! is a non-blocking lookup. The worker side of the pipeline lives in the
//! worker binary.

use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::exercise::{Exercise, ExerciseRepository};
use crate::ledger::SubmissionLedger;
use crate::profile::ProfileRegistry;
use crate::queue::TaskQueue;
use crate::source::decode_source;
use crate::store::ResultStore;
use crate::types::{CodeSubmission, ExecutionRequest, ExecutionResult, ExecutionTask, Language};

#[derive(Clone)]
pub struct Orchestrator {
    profiles: Arc<ProfileRegistry>,
    exercises: Arc<dyn ExerciseRepository>,
    ledger: Arc<dyn SubmissionLedger>,
    queue: Arc<dyn TaskQueue>,
    results: Arc<dyn ResultStore>,
}

impl Orchestrator {
    pub fn new(
        profiles: Arc<ProfileRegistry>,
        exercises: Arc<dyn ExerciseRepository>,
        ledger: Arc<dyn SubmissionLedger>,
        queue: Arc<dyn TaskQueue>,
        results: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            profiles,
            exercises,
            ledger,
            queue,
            results,
        }
    }

    /// Validate, record and enqueue a submission. Returns the task id.
    ///
    /// Nothing is persisted or queued when validation fails. If the push
    /// fails the ledger entry is settled as failed before the error returns.
    #[instrument(skip(self, submission), fields(exercise_id = submission.exercise_id, language = %submission.language))]
    pub async fn submit(&self, submission: CodeSubmission, user_id: i64) -> EngineResult<Uuid> {
        let (request, exercise) = self.validate(submission).await?;
        let submission_id = self.ledger.create_submission(&request, user_id).await?;
        let task = ExecutionTask {
            task_id: Uuid::new_v4(),
            request,
            exercise_path: exercise.path,
            submission_id,
            user_id,
        };
        if let Err(e) = self.queue.push(&task).await {
            let failure =
                ExecutionResult::internal_error(&task, format!("Failed to enqueue task: {}", e));
            if let Err(ledger_err) = self
                .ledger
                .update_submission_with_result(submission_id, &failure)
                .await
            {
                warn!(submission_id, error = %ledger_err, "Failed to settle unqueued submission");
            }
            return Err(e);
        }

        info!(
            task_id = %task.task_id,
            submission_id,
            user_id,
            "Task queued"
        );
        Ok(task.task_id)
    }

    /// Current result for a task, or `ResultNotAvailable` if it is still
    /// running, unknown or expired.
    pub async fn get_result(&self, task_id: Uuid) -> EngineResult<ExecutionResult> {
        self.results
            .get(task_id)
            .await?
            .ok_or(EngineError::ResultNotAvailable(task_id))
    }

    async fn validate(
        &self,
        submission: CodeSubmission,
    ) -> EngineResult<(ExecutionRequest, Exercise)> {
        let language: Language = submission.language.parse()?;
        if !self.profiles.supports(language) {
            warn!(language = %language, "No profile registered for language");
            return Err(EngineError::UnsupportedLanguage(submission.language));
        }

        let exercise = self
            .exercises
            .find(submission.exercise_id)
            .await?
            .ok_or(EngineError::ExerciseNotFound(submission.exercise_id))?;
        if exercise.language != language {
            return Err(EngineError::LanguageMismatch {
                exercise_id: exercise.id,
                expected: exercise.language.to_string(),
                actual: language.to_string(),
            });
        }

        decode_source(&submission.code)?;

        let request = ExecutionRequest {
            exercise_id: submission.exercise_id,
            language,
            code: submission.code,
            stdin: submission.stdin,
            expected_output: submission.expected_output,
        };
        Ok((request, exercise))
    }
}
