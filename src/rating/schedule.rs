use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, instrument};

use crate::queue::{QueueError, Task, TaskKind, TaskQueue};

/// Enqueues one scan for unrated game results.
pub async fn enqueue_rating_scan(queue: &dyn TaskQueue) -> Result<Task, QueueError> {
    let task = Task::new(TaskKind::UpdateRatings, &())?;
    queue.enqueue(task.clone()).await?;
    Ok(task)
}

/// Periodically enqueues a rating scan, so results whose own scan was lost
/// still get rated.
#[instrument(skip(queue))]
pub async fn start_rating_schedule(queue: Arc<dyn TaskQueue>, scan_interval: Duration) {
    info!(
        scan_interval_secs = scan_interval.as_secs(),
        "Starting rating schedule"
    );

    let mut ticker = interval(scan_interval);
    loop {
        ticker.tick().await;

        match enqueue_rating_scan(queue.as_ref()).await {
            Ok(task) => debug!(task_id = %task.id, "Scheduled rating scan"),
            Err(e) => error!(error = %e, "Failed to schedule rating scan"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryTaskQueue;

    #[tokio::test(start_paused = true)]
    async fn enqueues_a_scan_every_interval() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let schedule = tokio::spawn(start_rating_schedule(
            queue.clone(),
            Duration::from_secs(60),
        ));

        tokio::time::sleep(Duration::from_secs(150)).await;
        schedule.abort();

        // Immediately, then after 60s and 120s
        assert_eq!(queue.tasks_of_kind(TaskKind::UpdateRatings).await.len(), 3);
    }
}
