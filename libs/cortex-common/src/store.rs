use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::types::ExecutionResult;

/// Expiring key-value store for finished results, keyed by task id.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn put(&self, result: &ExecutionResult, ttl: Duration) -> EngineResult<()>;

    /// `None` when the task has not finished or the entry expired.
    async fn get(&self, task_id: Uuid) -> EngineResult<Option<ExecutionResult>>;
}

#[derive(Default)]
pub struct MemoryResultStore {
    entries: Mutex<Entries>,
}

type Entries = HashMap<Uuid, (ExecutionResult, Instant)>;

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(&self, result: &ExecutionResult, ttl: Duration) -> EngineResult<()> {
        self.entries()
            .insert(result.task_id, (result.clone(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, task_id: Uuid) -> EngineResult<Option<ExecutionResult>> {
        let mut entries = self.entries();
        match entries.get(&task_id) {
            Some((_, expires_at)) if Instant::now() >= *expires_at => {
                entries.remove(&task_id);
                Ok(None)
            }
            Some((result, _)) => Ok(Some(result.clone())),
            None => Ok(None),
        }
    }
}
