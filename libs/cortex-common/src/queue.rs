use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::EngineResult;
use crate::types::ExecutionTask;

/// FIFO hand-off between the submitting side and the worker pool.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn push(&self, task: &ExecutionTask) -> EngineResult<()>;

    /// Wait up to `timeout` for a task. `None` means nothing arrived.
    async fn pop(&self, timeout: Duration) -> EngineResult<Option<ExecutionTask>>;
}

/// In-process queue used by tests and single-process setups.
#[derive(Default)]
pub struct MemoryQueue {
    tasks: Mutex<VecDeque<ExecutionTask>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn tasks(&self) -> MutexGuard<'_, VecDeque<ExecutionTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_pop(&self) -> Option<ExecutionTask> {
        self.tasks().pop_front()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn push(&self, task: &ExecutionTask) -> EngineResult<()> {
        self.tasks().push_back(task.clone());
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> EngineResult<Option<ExecutionTask>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(task) = self.try_pop() {
                return Ok(Some(task));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(self.try_pop());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionRequest, Language};
    use std::sync::Arc;
    use uuid::Uuid;

    fn task(exercise_id: i64) -> ExecutionTask {
        ExecutionTask {
            task_id: Uuid::new_v4(),
            request: ExecutionRequest {
                exercise_id,
                language: Language::Go,
                code: String::new(),
                stdin: None,
                expected_output: None,
            },
            exercise_path: "go/hello".to_string(),
            submission_id: 1,
            user_id: 1,
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new();
        queue.push(&task(1)).await.unwrap();
        queue.push(&task(2)).await.unwrap();

        let first = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        let second = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.request.exercise_id, 1);
        assert_eq!(second.request.exercise_id, 2);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pop_times_out_when_empty() {
        let queue = MemoryQueue::new();
        let popped = queue.pop(Duration::from_millis(20)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(MemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(&task(7)).await.unwrap();

        let popped = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(popped.request.exercise_id, 7);
    }

    #[tokio::test]
    async fn test_push_survives_poisoned_lock() {
        let queue = Arc::new(MemoryQueue::new());
        let poisoner = queue.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.tasks.lock().unwrap();
            panic!("holder panicked");
        })
        .join();
        assert!(queue.tasks.is_poisoned());

        queue.push(&task(3)).await.unwrap();
        assert_eq!(queue.len(), 1);
        let popped = queue.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(popped.request.exercise_id, 3);
    }
}
