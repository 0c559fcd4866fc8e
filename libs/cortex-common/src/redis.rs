use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::ledger::{SubmissionLedger, SubmissionRecord};
use crate::progress::{ExerciseCompleted, ProgressSink};
use crate::queue::TaskQueue;
use crate::store::ResultStore;
use crate::types::{ExecutionRequest, ExecutionResult, ExecutionTask};

/// Redis key layout. API and worker both go through these helpers so the
/// keys never drift.
pub const QUEUE_KEY: &str = "cortex:queue:execution";
pub const RESULT_PREFIX: &str = "cortex:result";
pub const SUBMISSION_PREFIX: &str = "cortex:submission";
pub const SUBMISSION_SEQ_KEY: &str = "cortex:submission:seq";
pub const COMPLETED_CHANNEL: &str = "cortex:events:exercise-completed";

/// Result key for a task
pub fn result_key(task_id: &Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, task_id)
}

/// Ledger record key for a submission
pub fn submission_key(submission_id: i64) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, submission_id)
}

pub async fn connect(redis_url: &str) -> EngineResult<ConnectionManager> {
    let client = redis::Client::open(redis_url)?;
    Ok(ConnectionManager::new(client).await?)
}

/// Shared execution queue. RPUSH on submit, BLPOP on the worker side.
///
/// BLPOP blocks the connection it runs on, so each worker should own its
/// own `RedisTaskQueue`.
#[derive(Clone)]
pub struct RedisTaskQueue {
    conn: ConnectionManager,
}

impl RedisTaskQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn depth(&self) -> EngineResult<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.llen(QUEUE_KEY).await?)
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn push(&self, task: &ExecutionTask) -> EngineResult<()> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.conn.clone();
        let _: () = conn.rpush(QUEUE_KEY, payload).await?;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> EngineResult<Option<ExecutionTask>> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> =
            conn.blpop(QUEUE_KEY, timeout.as_secs_f64()).await?;

        match popped {
            Some((_key, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }
}

#[derive(Clone)]
pub struct RedisResultStore {
    conn: ConnectionManager,
}

impl RedisResultStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn put(&self, result: &ExecutionResult, ttl: Duration) -> EngineResult<()> {
        let key = result_key(&result.task_id);
        let payload = serde_json::to_string(result)?;
        let mut conn = self.conn.clone();

        redis::cmd("SET")
            .arg(&key)
            .arg(payload)
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;
        debug!(task_id = %result.task_id, ttl_secs = ttl.as_secs(), "Result stored");
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> EngineResult<Option<ExecutionResult>> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(result_key(&task_id)).await?;
        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }
}

/// Ledger stored as JSON records with ids from an INCR sequence.
#[derive(Clone)]
pub struct RedisLedger {
    conn: ConnectionManager,
}

impl RedisLedger {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn save(&self, record: &SubmissionRecord) -> EngineResult<()> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set(submission_key(record.id), payload).await?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionLedger for RedisLedger {
    async fn create_submission(
        &self,
        request: &ExecutionRequest,
        user_id: i64,
    ) -> EngineResult<i64> {
        let mut conn = self.conn.clone();
        let id: i64 = conn.incr(SUBMISSION_SEQ_KEY, 1).await?;
        let record = SubmissionRecord::new(id, request, user_id)?;
        self.save(&record).await?;
        Ok(id)
    }

    async fn update_submission_with_result(
        &self,
        submission_id: i64,
        result: &ExecutionResult,
    ) -> EngineResult<()> {
        let mut record = self.get_submission(submission_id).await?;
        record.apply_result(result);
        self.save(&record).await
    }

    async fn get_submission(&self, submission_id: i64) -> EngineResult<SubmissionRecord> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(submission_key(submission_id)).await?;
        match payload {
            Some(data) => Ok(serde_json::from_str(&data)?),
            None => Err(EngineError::SubmissionNotFound(submission_id)),
        }
    }
}

/// Publishes progress events on a pub/sub channel.
#[derive(Clone)]
pub struct RedisProgressSink {
    conn: ConnectionManager,
}

impl RedisProgressSink {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ProgressSink for RedisProgressSink {
    async fn exercise_completed(&self, event: ExerciseCompleted) {
        let payload = match serde_json::to_string(&event) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "Failed to serialize progress event");
                return;
            }
        };

        let mut conn = self.conn.clone();
        let published: redis::RedisResult<i64> = conn.publish(COMPLETED_CHANNEL, payload).await;
        match published {
            Ok(receivers) => debug!(
                submission_id = event.submission_id,
                receivers, "Published exercise completion"
            ),
            Err(e) => warn!(
                submission_id = event.submission_id,
                error = %e,
                "Failed to publish exercise completion"
            ),
        }
    }
}
