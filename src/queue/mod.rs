// Asynchronous task queue: at-least-once delivery, leases that expire into
// redelivery, and a worker that dispatches tasks to handlers by kind.

pub use errors::QueueError;
pub use memory::{DeadLetter, InMemoryTaskQueue};
pub use task::{Task, TaskKind};
pub use worker::{TaskError, TaskHandler, Worker, WorkerConfig};

mod errors;
mod memory;
mod task;
mod worker;

pub(crate) use task::to_chrono;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues outside of any transaction. Chains must enqueue through
    /// `Transaction::enqueue` instead.
    async fn enqueue(&self, task: Task) -> Result<(), QueueError>;

    /// Leases the next ready task. The lease expires after the queue's lease
    /// duration, after which the task is handed out again.
    async fn lease(&self) -> Result<Option<Task>, QueueError>;

    /// Removes a finished task. Acking a task that is already gone is not an error.
    async fn ack(&self, task_id: Uuid) -> Result<(), QueueError>;

    /// Releases the lease and makes the task ready again after `delay`.
    async fn retry(&self, task: &Task, delay: Duration) -> Result<(), QueueError>;

    /// Parks a task that will never succeed for operator inspection.
    async fn dead_letter(&self, task: &Task, reason: &str) -> Result<(), QueueError>;

    /// Makes every dead-lettered task ready again with a fresh attempt count.
    /// Returns how many were requeued.
    async fn requeue_dead_letters(&self) -> Result<usize, QueueError>;

    /// Tasks not yet acked or dead-lettered, leased or not.
    async fn pending(&self) -> Result<usize, QueueError>;
}
