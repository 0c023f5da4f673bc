// Queue-driven processing of an ordered item list, one item per task. Each
// invocation commits its item's work and the continuation carrying the rest in
// the same transaction, and consumes its own task in that transaction too.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::{
    queue::{QueueError, Task, TaskError, TaskHandler, TaskKind},
    store::{Datastore, StoreError, Transaction},
};

/// What a chain does after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    Continue,
    /// Drop the remaining items
    Stop,
}

/// The work for one item of a chain.
///
/// Everything the step wants persisted or enqueued goes into `tx`; it commits
/// together with the continuation. `handled` travels with the continuation and
/// lets a step skip sub-items an earlier step of the same lineage already did.
#[async_trait]
pub trait ChainStep: Send + Sync + 'static {
    /// Data shared by every step of one chain
    type Context: Serialize + DeserializeOwned + Clone + Send + Sync;
    type Item: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync;

    const KIND: TaskKind;

    fn name(&self) -> &'static str;

    async fn step(
        &self,
        context: &Self::Context,
        item: &Self::Item,
        tx: &mut Transaction,
        handled: &mut BTreeSet<String>,
    ) -> Result<StepControl, TaskError>;
}

/// Task payload of a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "C: Serialize, I: Serialize",
    deserialize = "C: DeserializeOwned, I: DeserializeOwned"
))]
pub struct Continuation<C, I> {
    pub context: C,
    pub remaining: Vec<I>,
    #[serde(default)]
    pub handled: BTreeSet<String>,
}

pub struct TaskChain<S: ChainStep> {
    step: S,
    store: Arc<dyn Datastore>,
}

impl<S: ChainStep> TaskChain<S> {
    pub fn new(step: S, store: Arc<dyn Datastore>) -> Self {
        Self { step, store }
    }

    pub fn inner(&self) -> &S {
        &self.step
    }

    /// Builds the task for `items`, or nothing when there are none.
    pub fn task(
        context: S::Context,
        items: Vec<S::Item>,
        handled: BTreeSet<String>,
    ) -> Result<Option<Task>, QueueError> {
        if items.is_empty() {
            return Ok(None);
        }
        let continuation = Continuation {
            context,
            remaining: items,
            handled,
        };
        Task::new(S::KIND, &continuation).map(Some)
    }

    /// Adds the first task of a new chain to an open transaction. Returns
    /// whether anything was enqueued.
    pub fn start(
        tx: &mut Transaction,
        context: S::Context,
        items: Vec<S::Item>,
    ) -> Result<bool, QueueError> {
        match Self::task(context, items, BTreeSet::new())? {
            Some(task) => {
                tx.enqueue(task);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Starts a chain in a transaction of its own, first step after `delay`.
    pub async fn schedule(
        &self,
        context: S::Context,
        items: Vec<S::Item>,
        delay: Duration,
    ) -> Result<bool, TaskError> {
        let Some(task) = Self::task(context, items, BTreeSet::new())? else {
            return Ok(false);
        };
        let mut tx = Transaction::new();
        tx.enqueue(task.delayed(delay));
        self.store.commit(tx).await?;
        Ok(true)
    }

    /// Runs the head item and hands the rest on.
    #[instrument(skip(self, task), fields(chain = self.step.name(), task_id = %task.id))]
    pub async fn invoke(&self, task: &Task) -> Result<(), TaskError> {
        let continuation: Continuation<S::Context, S::Item> = task.payload()?;
        let Continuation {
            context,
            mut remaining,
            mut handled,
        } = continuation;

        if remaining.is_empty() {
            debug!("Chain finished");
            return Ok(());
        }
        let head = remaining.remove(0);

        let mut tx = Transaction::consuming(task.id);
        let control = self.step.step(&context, &head, &mut tx, &mut handled).await?;

        let left = remaining.len();
        if control == StepControl::Continue {
            if let Some(next) = Self::task(context, remaining, handled)? {
                tx.enqueue(next);
            }
        } else if left > 0 {
            info!(dropped = left, "Chain stopped early");
        }

        match self.store.commit(tx).await {
            Ok(()) => {
                debug!(item = ?head, left, "Chain step committed");
                Ok(())
            }
            Err(StoreError::TaskConsumed(_)) => {
                debug!(item = ?head, "Step already committed by another delivery");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<S: ChainStep> TaskHandler for TaskChain<S> {
    async fn handle(&self, task: &Task) -> Result<(), TaskError> {
        self.invoke(task).await
    }

    fn name(&self) -> &'static str {
        self.step.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        notification::UserConfig,
        queue::{InMemoryTaskQueue, TaskQueue, Worker, WorkerConfig},
        store::{EntityKey, InMemoryDatastore},
    };
    use tokio::sync::Mutex;

    /// Writes one config per item and records every call
    #[derive(Default)]
    struct RecordingStep {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChainStep for RecordingStep {
        type Context = String;
        type Item = String;

        const KIND: TaskKind = TaskKind::UpdateUserStats;

        fn name(&self) -> &'static str {
            "RecordingStep"
        }

        async fn step(
            &self,
            context: &String,
            item: &String,
            tx: &mut Transaction,
            handled: &mut BTreeSet<String>,
        ) -> Result<StepControl, TaskError> {
            self.calls.lock().await.push(item.clone());
            if !handled.insert(item.clone()) {
                return Ok(StepControl::Continue);
            }
            if item == "stop" {
                return Ok(StepControl::Stop);
            }
            tx.put_user_config(UserConfig::new(format!("{context}-{item}")));
            Ok(StepControl::Continue)
        }
    }

    struct Fixture {
        queue: Arc<InMemoryTaskQueue>,
        store: Arc<InMemoryDatastore>,
        chain: Arc<TaskChain<RecordingStep>>,
    }

    impl Fixture {
        fn new(lease: Duration) -> Self {
            let queue = Arc::new(InMemoryTaskQueue::with_lease(lease));
            let store = Arc::new(InMemoryDatastore::new(queue.clone()));
            let chain = Arc::new(TaskChain::new(RecordingStep::default(), store.clone()));
            Self {
                queue,
                store,
                chain,
            }
        }

        fn worker(&self) -> Worker {
            let config = WorkerConfig {
                base_backoff: Duration::ZERO,
                ..WorkerConfig::default()
            };
            Worker::new(self.queue.clone(), config)
                .with_handler(TaskKind::UpdateUserStats, self.chain.clone())
        }

        async fn start(&self, items: &[&str]) {
            let mut tx = Transaction::new();
            TaskChain::<RecordingStep>::start(
                &mut tx,
                "ctx".to_string(),
                items.iter().map(|s| s.to_string()).collect(),
            )
            .unwrap();
            self.store.commit(tx).await.unwrap();
        }

        async fn versions(&self, items: &[&str]) -> Vec<u64> {
            let mut versions = Vec::new();
            for item in items {
                let key = EntityKey::UserConfig(format!("ctx-{item}"));
                versions.push(self.store.version_of(&key).await);
            }
            versions
        }

        async fn calls(&self) -> Vec<String> {
            self.chain.inner().calls.lock().await.clone()
        }
    }

    #[tokio::test]
    async fn processes_every_item_in_order() {
        let fixture = Fixture::new(Duration::from_secs(30));
        fixture.start(&["a", "b", "c", "d"]).await;

        let processed = fixture.worker().run_until_idle().await.unwrap();

        assert_eq!(processed, 4);
        assert_eq!(fixture.calls().await, vec!["a", "b", "c", "d"]);
        assert_eq!(fixture.store.commit_count(), 5);
        assert_eq!(fixture.queue.pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn completes_despite_failing_commits() {
        let fixture = Fixture::new(Duration::from_secs(30));
        fixture.start(&["a", "b", "c"]).await;
        fixture.store.fail_next_commits(2);

        fixture.worker().run_until_idle().await.unwrap();

        // The first step ran three times before its commit went through
        assert_eq!(fixture.calls().await, vec!["a", "a", "a", "b", "c"]);
        assert_eq!(fixture.versions(&["a", "b", "c"]).await, vec![1, 1, 1]);
        assert!(fixture.queue.dead_letters().await.is_empty());
    }

    #[tokio::test]
    async fn redelivered_head_after_commit_changes_nothing() {
        let fixture = Fixture::new(Duration::from_millis(5));
        fixture.start(&["a", "b"]).await;

        // Commit the head, then "crash" before acking
        let head = fixture.queue.lease().await.unwrap().unwrap();
        fixture.chain.invoke(&head).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A late redelivery of the head is absorbed
        fixture.chain.invoke(&head).await.unwrap();
        fixture.worker().run_until_idle().await.unwrap();

        assert_eq!(fixture.calls().await, vec!["a", "a", "b"]);
        assert_eq!(fixture.queue.enqueued_total().await, 2);
        assert_eq!(fixture.versions(&["a", "b"]).await, vec![1, 1]);
    }

    #[tokio::test]
    async fn stop_drops_the_remaining_items() {
        let fixture = Fixture::new(Duration::from_secs(30));
        fixture.start(&["a", "stop", "c"]).await;

        fixture.worker().run_until_idle().await.unwrap();

        assert_eq!(fixture.calls().await, vec!["a", "stop"]);
        assert!(fixture.store.get_user_config("ctx-c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn handled_set_travels_with_the_continuation() {
        let fixture = Fixture::new(Duration::from_secs(30));
        fixture.start(&["a", "b", "a"]).await;

        fixture.worker().run_until_idle().await.unwrap();

        assert_eq!(fixture.queue.enqueued_total().await, 3);
        assert_eq!(fixture.store.commit_count(), 4);
        assert_eq!(fixture.versions(&["a", "b"]).await, vec![1, 1]);
    }

    #[tokio::test]
    async fn empty_chain_enqueues_nothing() {
        let fixture = Fixture::new(Duration::from_secs(30));
        let mut tx = Transaction::new();
        let started = TaskChain::<RecordingStep>::start(&mut tx, "ctx".into(), vec![]).unwrap();

        assert!(!started);
        assert!(tx.is_empty());
        assert!(!fixture
            .chain
            .schedule("ctx".into(), vec![], Duration::ZERO)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn scheduled_chains_wait_for_their_delay() {
        let fixture = Fixture::new(Duration::from_secs(30));
        fixture
            .chain
            .schedule("ctx".into(), vec!["a".into()], Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(fixture.worker().run_until_idle().await.unwrap(), 0);
        fixture.queue.fast_forward().await;
        assert_eq!(fixture.worker().run_until_idle().await.unwrap(), 1);
    }
}
