use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{to_chrono, QueueError, Task, TaskKind, TaskQueue};

#[derive(Debug, Clone)]
struct QueuedTask {
    task: Task,
    leased_until: Option<DateTime<Utc>>,
    seq: u64,
}

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub task: Task,
    pub reason: String,
}

#[derive(Debug, Default)]
pub(crate) struct QueueState {
    tasks: HashMap<Uuid, QueuedTask>,
    dead: Vec<DeadLetter>,
    next_seq: u64,
    enqueued_total: u64,
}

impl QueueState {
    pub(crate) fn contains(&self, task_id: &Uuid) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub(crate) fn push(&mut self, task: Task) {
        self.next_seq += 1;
        self.enqueued_total += 1;
        self.tasks.insert(
            task.id,
            QueuedTask {
                task,
                leased_until: None,
                seq: self.next_seq,
            },
        );
    }

    pub(crate) fn remove(&mut self, task_id: &Uuid) -> bool {
        self.tasks.remove(task_id).is_some()
    }
}

/// In-memory queue for development and testing.
///
/// The store's commit pushes tasks through [`InMemoryTaskQueue::state`] so that
/// transactional enqueues become visible exactly when the rest of the commit does.
#[derive(Debug)]
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
    lease_duration: Duration,
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::with_lease(Duration::from_secs(30))
    }

    pub fn with_lease(lease_duration: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            lease_duration,
        }
    }

    pub(crate) async fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().await
    }

    /// All queued tasks in enqueue order
    pub async fn snapshot(&self) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut queued: Vec<&QueuedTask> = state.tasks.values().collect();
        queued.sort_by_key(|q| q.seq);
        queued.into_iter().map(|q| q.task.clone()).collect()
    }

    pub async fn tasks_of_kind(&self, kind: TaskKind) -> Vec<Task> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|t| t.kind == kind)
            .collect()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead.clone()
    }

    /// Number of tasks ever enqueued, including acked ones
    pub async fn enqueued_total(&self) -> u64 {
        self.state.lock().await.enqueued_total
    }

    /// Makes every task ready now, as if delays and leases had run out.
    pub async fn fast_forward(&self) {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        for queued in state.tasks.values_mut() {
            queued.leased_until = None;
            if queued.task.not_before > now {
                queued.task.not_before = now;
            }
        }
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    #[instrument(skip(self, task), fields(task_id = %task.id, kind = %task.kind))]
    async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        debug!("Enqueueing task in memory");
        self.state.lock().await.push(task);
        Ok(())
    }

    async fn lease(&self) -> Result<Option<Task>, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let next = state
            .tasks
            .values()
            .filter(|q| q.task.is_ready(now))
            .filter(|q| q.leased_until.map_or(true, |until| until <= now))
            .min_by_key(|q| (q.task.not_before, q.seq))
            .map(|q| q.task.id);

        let Some(task_id) = next else {
            return Ok(None);
        };

        let lease_until = now + to_chrono(self.lease_duration);
        let queued = state
            .tasks
            .get_mut(&task_id)
            .ok_or(QueueError::NotFound(task_id))?;
        if queued.leased_until.is_some() {
            debug!(task_id = %task_id, "Lease expired, redelivering task");
        }
        queued.leased_until = Some(lease_until);
        Ok(Some(queued.task.clone()))
    }

    async fn ack(&self, task_id: Uuid) -> Result<(), QueueError> {
        if !self.state.lock().await.remove(&task_id) {
            debug!(task_id = %task_id, "Acked task was already consumed");
        }
        Ok(())
    }

    async fn retry(&self, task: &Task, delay: Duration) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        match state.tasks.get_mut(&task.id) {
            Some(queued) => {
                queued.task.attempt += 1;
                queued.task.not_before = Utc::now() + to_chrono(delay);
                queued.leased_until = None;
            }
            None => debug!(task_id = %task.id, "Retried task was already consumed"),
        }
        Ok(())
    }

    async fn dead_letter(&self, task: &Task, reason: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.remove(&task.id) {
            warn!(task_id = %task.id, kind = %task.kind, reason, "Task dead-lettered");
            state.dead.push(DeadLetter {
                task: task.clone(),
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    async fn requeue_dead_letters(&self) -> Result<usize, QueueError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let dead = std::mem::take(&mut state.dead);
        let count = dead.len();
        for DeadLetter { mut task, reason } in dead {
            debug!(task_id = %task.id, kind = %task.kind, reason = %reason, "Requeueing dead letter");
            task.attempt = 0;
            task.not_before = now;
            state.push(task);
        }
        Ok(count)
    }

    async fn pending(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.tasks.len())
    }
}
