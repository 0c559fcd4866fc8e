//! Task Processor - the worker half of the execution pipeline
//!
//! **Responsibility:**
//! Turn one dequeued task into one stored result.
//!
//! **Pipeline:**
//! 1. Provision a workspace (workspace.rs)
//! 2. Run it in a container (engine.rs)
//! 3. Interpret the output (cortex_common::parser)
//! 4. Store the result, settle the ledger entry, announce completion
//!
//! Every task ends with a stored result, including tasks that fail before a
//! container ever starts.

use crate::engine::{container_name, ContainerRunner};
use crate::workspace::Provisioner;
use anyhow::{Context, Result};
use chrono::Utc;
use cortex_common::ledger::SubmissionLedger;
use cortex_common::parser::parse_output;
use cortex_common::profile::ProfileRegistry;
use cortex_common::progress::{ExerciseCompleted, ProgressSink};
use cortex_common::source::decode_source;
use cortex_common::store::ResultStore;
use cortex_common::types::{is_successful, ExecutionResult, ExecutionTask};
use cortex_common::EngineResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

#[derive(Clone)]
pub struct Processor {
    profiles: Arc<ProfileRegistry>,
    provisioner: Arc<Provisioner>,
    runner: Arc<dyn ContainerRunner>,
    results: Arc<dyn ResultStore>,
    ledger: Arc<dyn SubmissionLedger>,
    progress: Arc<dyn ProgressSink>,
    result_ttl: Duration,
}

impl Processor {
    pub fn new(
        profiles: Arc<ProfileRegistry>,
        provisioner: Arc<Provisioner>,
        runner: Arc<dyn ContainerRunner>,
        results: Arc<dyn ResultStore>,
        ledger: Arc<dyn SubmissionLedger>,
        progress: Arc<dyn ProgressSink>,
        result_ttl: Duration,
    ) -> Self {
        Self {
            profiles,
            provisioner,
            runner,
            results,
            ledger,
            progress,
            result_ttl,
        }
    }

    /// Execute one task and persist its result.
    ///
    /// Only a failed result write is returned as an error; ledger and
    /// progress failures are logged and swallowed.
    #[instrument(skip(self, task), fields(task_id = %task.task_id, language = %task.request.language))]
    pub async fn process(&self, task: &ExecutionTask) -> EngineResult<ExecutionResult> {
        let result = match self.execute(task).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Task failed before producing output");
                ExecutionResult::internal_error(task, format!("{:#}", e))
            }
        };

        info!(
            success = result.success,
            exit_code = ?result.exit_code,
            timed_out = result.timed_out,
            passed = result.passed_count(),
            total = result.test_case_results.len(),
            execution_ms = result.execution_time_ms,
            "Execution completed"
        );

        self.record(task, &result).await?;
        Ok(result)
    }

    /// Run `process` on its own tokio task so a panic stays contained.
    ///
    /// A panicked task still ends with a stored internal-error result and a
    /// settled ledger entry; the calling worker keeps running.
    pub async fn process_isolated(&self, task: ExecutionTask) -> EngineResult<ExecutionResult> {
        let processor = self.clone();
        let spawned = task.clone();
        match tokio::spawn(async move { processor.process(&spawned).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(task_id = %task.task_id, error = %e, "Task processing aborted");
                let result =
                    ExecutionResult::internal_error(&task, format!("task processing aborted: {}", e));
                self.record(&task, &result).await?;
                Ok(result)
            }
        }
    }

    /// Store the result, settle the ledger entry and announce a pass.
    ///
    /// Only a failed result write is returned as an error.
    async fn record(&self, task: &ExecutionTask, result: &ExecutionResult) -> EngineResult<()> {
        self.results.put(result, self.result_ttl).await?;
        debug!("Result persisted");

        if let Err(e) = self
            .ledger
            .update_submission_with_result(task.submission_id, result)
            .await
        {
            warn!(submission_id = task.submission_id, error = %e, "Failed to update submission");
        }

        if result.success {
            self.progress
                .exercise_completed(ExerciseCompleted {
                    user_id: task.user_id,
                    exercise_id: task.request.exercise_id,
                    submission_id: task.submission_id,
                    task_id: task.task_id,
                    completed_at: Utc::now(),
                })
                .await;
        }

        Ok(())
    }

    async fn execute(&self, task: &ExecutionTask) -> Result<ExecutionResult> {
        let profile = self.profiles.get(task.request.language)?.clone();
        let source = decode_source(&task.request.code)?;

        let provisioner = Arc::clone(&self.provisioner);
        let task_id = task.task_id;
        let exercise_path = task.exercise_path.clone();
        let staged_profile = profile.clone();
        let workspace = tokio::task::spawn_blocking(move || {
            provisioner.provision(task_id, &exercise_path, &staged_profile, &source)
        })
        .await
        .context("Workspace provisioning panicked")??;

        let run = self
            .runner
            .run(workspace.setup(), &profile, &container_name(&task.task_id))
            .await;
        drop(workspace);

        let combined = format!("{}\n{}", run.stdout, run.stderr);
        let cases = parse_output(task.request.language, &combined);
        for case in cases.iter().filter(|c| !c.passed) {
            debug!(input = %case.input, message = %case.message, "Test case failed");
        }

        Ok(ExecutionResult {
            task_id: task.task_id,
            success: is_successful(run.exit_code, run.timed_out, &cases),
            stdout: run.stdout,
            stderr: run.stderr,
            execution_time_ms: run.execution_time_ms,
            memory_used_kb: run.stats.memory_usage_bytes / 1024,
            cpu_usage_percent: run.stats.cpu_usage_percent,
            exit_code: Some(run.exit_code),
            timed_out: run.timed_out,
            language: task.request.language,
            exercise_id: task.request.exercise_id,
            test_case_results: cases,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ContainerRun;
    use crate::workspace::WorkspaceSetup;
    use async_trait::async_trait;
    use cortex_common::ledger::{MemoryLedger, SubmissionStatus};
    use cortex_common::profile::LanguageProfile;
    use cortex_common::progress::RecordingSink;
    use cortex_common::source::encode_source;
    use cortex_common::store::MemoryResultStore;
    use cortex_common::types::{ContainerStats, ExecutionRequest, Language};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Returns a canned run and records what it was asked to execute.
    struct FakeRunner {
        run: ContainerRun,
        seen_source: Mutex<Option<String>>,
        seen_names: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new(run: ContainerRun) -> Self {
            Self {
                run,
                seen_source: Mutex::new(None),
                seen_names: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ContainerRunner for FakeRunner {
        async fn run(
            &self,
            setup: &WorkspaceSetup,
            _profile: &LanguageProfile,
            container_name: &str,
        ) -> ContainerRun {
            *self.seen_source.lock().unwrap() = fs::read_to_string(&setup.main_file).ok();
            self.seen_names.lock().unwrap().push(container_name.to_string());
            self.run.clone()
        }
    }

    struct Harness {
        exercises: TempDir,
        workspaces: TempDir,
        runner: Arc<FakeRunner>,
        results: Arc<MemoryResultStore>,
        ledger: Arc<MemoryLedger>,
        progress: Arc<RecordingSink>,
        processor: Processor,
    }

    fn harness(run: ContainerRun) -> Harness {
        let exercises = TempDir::new().unwrap();
        let project = exercises.path().join("python/exercises/practice/hello-world");
        fs::create_dir_all(&project).unwrap();
        fs::write(project.join("hello_world.py"), "def hello():\n    pass\n").unwrap();
        fs::write(project.join("hello_world_test.py"), "import unittest\n").unwrap();

        let workspaces = TempDir::new().unwrap();
        let runner = Arc::new(FakeRunner::new(run));
        let results = Arc::new(MemoryResultStore::new());
        let ledger = Arc::new(MemoryLedger::new());
        let progress = Arc::new(RecordingSink::new());
        let processor = Processor::new(
            Arc::new(ProfileRegistry::builtin()),
            Arc::new(Provisioner::new(exercises.path(), workspaces.path())),
            runner.clone(),
            results.clone(),
            ledger.clone(),
            progress.clone(),
            Duration::from_secs(60),
        );

        Harness {
            exercises,
            workspaces,
            runner,
            results,
            ledger,
            progress,
            processor,
        }
    }

    async fn task(h: &Harness, exercise_path: &str, code: &str) -> ExecutionTask {
        let request = ExecutionRequest {
            exercise_id: 1,
            language: Language::Python,
            code: encode_source(code),
            stdin: None,
            expected_output: None,
        };
        let submission_id = h.ledger.create_submission(&request, 42).await.unwrap();
        ExecutionTask {
            task_id: Uuid::new_v4(),
            request,
            exercise_path: exercise_path.to_string(),
            submission_id,
            user_id: 42,
        }
    }

    fn passing_run() -> ContainerRun {
        ContainerRun {
            exit_code: 0,
            stdout: "Hello, World!\n".to_string(),
            stderr: "test_hello (hello_world_test.HelloWorldTest) ... ok\n\n\
                     ----------------------------------------------------------------------\n\
                     Ran 1 test in 0.001s\n\nOK\n"
                .to_string(),
            execution_time_ms: 850,
            stats: ContainerStats {
                memory_usage_bytes: 8 * 1024 * 1024,
                cpu_usage_percent: 12.5,
            },
            timed_out: false,
        }
    }

    #[tokio::test]
    async fn test_passing_run_is_stored_and_announced() {
        let h = harness(passing_run());
        let task = task(&h, "python/exercises/practice/hello-world", "print('Hello, World!')").await;

        let result = h.processor.process(&task).await.unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.memory_used_kb, 8 * 1024);
        assert_eq!(result.test_case_results.len(), 1);
        assert_eq!(result.test_case_results[0].input, "hello_world_test.HelloWorldTest.test_hello");

        assert_eq!(
            h.runner.seen_source.lock().unwrap().as_deref(),
            Some("print('Hello, World!')")
        );
        let names = h.runner.seen_names.lock().unwrap().clone();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with(&format!("cortex-{}-", task.task_id)));

        let stored = h.results.get(task.task_id).await.unwrap().unwrap();
        assert_eq!(stored, result);

        let record = h.ledger.get_submission(task.submission_id).await.unwrap();
        assert_eq!(record.status, SubmissionStatus::Completed);
        assert_eq!(record.passed_tests, 1);

        let events = h.progress.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, 42);
        assert_eq!(events[0].task_id, task.task_id);
    }

    #[tokio::test]
    async fn test_failing_tests_mark_submission_failed() {
        let run = ContainerRun {
            exit_code: 1,
            stderr: "test_hello (hello_world_test.HelloWorldTest) ... FAIL\n\nRan 1 test in 0.001s\n\nFAILED (failures=1)\n"
                .to_string(),
            ..passing_run()
        };
        let h = harness(run);
        let task = task(&h, "python/exercises/practice/hello-world", "print('nope')").await;

        let result = h.processor.process(&task).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));

        let record = h.ledger.get_submission(task.submission_id).await.unwrap();
        assert_eq!(record.status, SubmissionStatus::Failed);
        assert!(h.progress.events().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_never_success() {
        let run = ContainerRun {
            exit_code: -1,
            timed_out: true,
            ..passing_run()
        };
        let h = harness(run);
        let task = task(&h, "python/exercises/practice/hello-world", "while True: pass").await;

        let result = h.processor.process(&task).await.unwrap();
        assert!(result.timed_out);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_missing_template_becomes_internal_error() {
        let h = harness(passing_run());
        let task = task(&h, "python/exercises/practice/missing", "print(1)").await;

        let result = h.processor.process(&task).await.unwrap();
        assert!(!result.success);
        assert!(result.stderr.starts_with("Internal error: "));
        assert!(result.stderr.contains("Exercise template not found"));
        assert!(result.test_case_results.is_empty());
        assert!(h.runner.seen_names.lock().unwrap().is_empty());

        assert!(h.results.get(task.task_id).await.unwrap().is_some());
        let record = h.ledger.get_submission(task.submission_id).await.unwrap();
        assert_eq!(record.status, SubmissionStatus::Failed);
    }

    #[tokio::test]
    async fn test_workspace_removed_after_run() {
        let h = harness(passing_run());
        let task = task(&h, "python/exercises/practice/hello-world", "print(1)").await;

        h.processor.process(&task).await.unwrap();
        assert_eq!(fs::read_dir(h.workspaces.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_submission_does_not_lose_result() {
        let h = harness(passing_run());
        let mut task = task(&h, "python/exercises/practice/hello-world", "print(1)").await;
        task.submission_id = 9_999;

        let result = h.processor.process(&task).await.unwrap();
        assert!(result.success);
        assert!(h.results.get(task.task_id).await.unwrap().is_some());
    }

    struct PanickingRunner;

    #[async_trait]
    impl ContainerRunner for PanickingRunner {
        async fn run(
            &self,
            _setup: &WorkspaceSetup,
            _profile: &LanguageProfile,
            _container_name: &str,
        ) -> ContainerRun {
            panic!("runner blew up");
        }
    }

    #[tokio::test]
    async fn test_panicking_task_still_stores_result() {
        let h = harness(passing_run());
        let processor = Processor::new(
            Arc::new(ProfileRegistry::builtin()),
            Arc::new(Provisioner::new(h.exercises.path(), h.workspaces.path())),
            Arc::new(PanickingRunner),
            h.results.clone(),
            h.ledger.clone(),
            h.progress.clone(),
            Duration::from_secs(60),
        );
        let first = task(&h, "python/exercises/practice/hello-world", "print(1)").await;

        let result = processor.process_isolated(first.clone()).await.unwrap();
        assert!(!result.success);
        assert!(result.stderr.starts_with("Internal error: "));

        let stored = h.results.get(first.task_id).await.unwrap().unwrap();
        assert_eq!(stored, result);
        let record = h.ledger.get_submission(first.submission_id).await.unwrap();
        assert_eq!(record.status, SubmissionStatus::Failed);
        assert!(h.progress.events().is_empty());

        // The processor stays usable after a contained panic
        let second = task(&h, "python/exercises/practice/hello-world", "print(2)").await;
        assert!(processor.process_isolated(second).await.is_ok());
    }
}
