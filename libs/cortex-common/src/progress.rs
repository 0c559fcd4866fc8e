use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

/// Emitted once a submission passes every test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExerciseCompleted {
    pub user_id: i64,
    pub exercise_id: i64,
    pub submission_id: i64,
    pub task_id: Uuid,
    pub completed_at: DateTime<Utc>,
}

/// Fire-and-forget sink for progress events. Implementations log their own
/// failures; callers never wait on downstream consumers.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn exercise_completed(&self, event: ExerciseCompleted);
}

/// Keeps events in memory.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ExerciseCompleted>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExerciseCompleted> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn exercise_completed(&self, event: ExerciseCompleted) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
