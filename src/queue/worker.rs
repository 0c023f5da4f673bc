use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{QueueError, Task, TaskKind, TaskQueue};
use crate::store::StoreError;

/// How a failed task should be treated by the worker
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Handler timed out")]
    Timeout,

    #[error("Retryable error: {0}")]
    Retryable(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    /// A concurrent delivery of the same task already committed its work
    #[error("Task was already completed by another delivery")]
    Duplicate,
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Retryable(_) | TaskError::Timeout)
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        TaskError::Retryable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        TaskError::Fatal(msg.into())
    }
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TaskConsumed(_) => TaskError::Duplicate,
            err if err.is_transient() => TaskError::Retryable(err.to_string()),
            err => TaskError::Fatal(err.to_string()),
        }
    }
}

impl From<QueueError> for TaskError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Unavailable(_) | QueueError::NotFound(_) => {
                TaskError::Retryable(err.to_string())
            }
            QueueError::Payload(_) | QueueError::UnknownKind(_) => TaskError::Fatal(err.to_string()),
        }
    }
}

/// Work registered for one [`TaskKind`]
///
/// Deliveries are at-least-once, so handling the same task twice must be safe.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<(), TaskError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Attempts before a retryable failure is dead-lettered
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub handler_timeout: Duration,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// How long a leased task stays invisible to other workers
    pub lease_duration: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(100),
            handler_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            lease_duration: Duration::from_secs(30),
        }
    }
}

/// Leases tasks and dispatches them to the handler registered for their kind
pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(queue: Arc<dyn TaskQueue>, config: WorkerConfig) -> Self {
        Self {
            queue,
            handlers: HashMap::new(),
            config,
        }
    }

    pub fn register(&mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) {
        info!(kind = %kind, handler_name = handler.name(), "Registering task handler");
        self.handlers.insert(kind, handler);
    }

    pub fn with_handler(mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    /// Processes tasks forever.
    pub async fn run(&self) {
        info!(
            handler_count = self.handlers.len(),
            max_attempts = self.config.max_attempts,
            "Starting task worker"
        );

        loop {
            match self.process_next().await {
                Ok(true) => continue,
                Ok(false) => tokio::time::sleep(self.config.poll_interval).await,
                Err(e) => {
                    warn!(error = %e, "Failed to lease task");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }
    }

    /// Processes ready tasks until none is left. Returns how many were handled.
    pub async fn run_until_idle(&self) -> Result<usize, QueueError> {
        let mut processed = 0;
        while self.process_next().await? {
            processed += 1;
        }
        debug!(processed, "Task queue idle");
        Ok(processed)
    }

    /// Leases and handles one task. Returns false if no task was ready.
    pub async fn process_next(&self) -> Result<bool, QueueError> {
        let Some(task) = self.queue.lease().await? else {
            return Ok(false);
        };
        self.dispatch(task).await?;
        Ok(true)
    }

    async fn dispatch(&self, task: Task) -> Result<(), QueueError> {
        let Some(handler) = self.handlers.get(&task.kind) else {
            error!(task_id = %task.id, kind = %task.kind, "No handler registered for task kind");
            return self.queue.dead_letter(&task, "no handler registered").await;
        };

        let outcome = match timeout(self.config.handler_timeout, handler.handle(&task)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TaskError::Timeout),
        };

        match outcome {
            Ok(()) => {
                if task.attempt > 0 {
                    info!(
                        handler = handler.name(),
                        task_id = %task.id,
                        attempt = task.attempt + 1,
                        "Task succeeded after retry"
                    );
                }
                self.queue.ack(task.id).await
            }
            Err(TaskError::Duplicate) => {
                debug!(task_id = %task.id, kind = %task.kind, "Task already completed elsewhere");
                self.queue.ack(task.id).await
            }
            Err(e) if e.is_retryable() && task.attempt + 1 < self.config.max_attempts => {
                let delay = self
                    .config
                    .base_backoff
                    .saturating_mul(2_u32.saturating_pow(task.attempt));
                warn!(
                    handler = handler.name(),
                    task_id = %task.id,
                    attempt = task.attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Task failed, will retry"
                );
                self.queue.retry(&task, delay).await
            }
            Err(e) => {
                error!(
                    handler = handler.name(),
                    task_id = %task.id,
                    kind = %task.kind,
                    attempt = task.attempt + 1,
                    error = %e,
                    "Task failed permanently"
                );
                self.queue.dead_letter(&task, &e.to_string()).await
            }
        }
    }
}
