use std::sync::Arc;
use std::time::Duration;

use settlement::{
    config::{ConfigLoader, DeliveryPolicy, SettlementConfig},
    game::{Game, Member},
    notification::UserConfig,
    queue::InMemoryTaskQueue,
    stats::Ban,
    store::{Datastore, InMemoryDatastore, Transaction},
    Pipeline,
};

use super::mocks::RecordingTransport;

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub struct TestSetup {
    pub pipeline: Pipeline,
    pub store: Arc<InMemoryDatastore>,
    pub queue: Arc<InMemoryTaskQueue>,
    pub transport: RecordingTransport,
}

impl TestSetup {
    /// Runs the worker until no task is left, delayed ones included.
    /// Returns how many tasks were processed.
    pub async fn drain(&self) -> usize {
        let mut total = 0;
        loop {
            self.queue.fast_forward().await;
            let processed = self
                .pipeline
                .worker
                .run_until_idle()
                .await
                .expect("queue should stay available");
            if processed == 0 {
                return total;
            }
            total += processed;
        }
    }

    pub async fn commit(&self, tx: Transaction) {
        self.store.commit(tx).await.expect("seed commit should succeed");
    }
}

pub struct TestSetupBuilder {
    games: Vec<Game>,
    configs: Vec<UserConfig>,
    bans: Vec<Ban>,
    config: SettlementConfig,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        let mut config = SettlementConfig::default();
        config.worker.base_backoff = Duration::from_millis(1);
        config.worker.max_attempts = 3;
        Self {
            games: vec![],
            configs: vec![],
            bans: vec![],
            config,
        }
    }

    pub fn with_game(mut self, game: Game) -> Self {
        self.games.push(game);
        self
    }

    /// A started classical game between `nations`, user ids taken in order
    pub fn with_members(self, game_id: &str, members: &[(&str, &str)]) -> Self {
        let members = members
            .iter()
            .map(|(user, nation)| Member::new(*user, *nation))
            .collect();
        self.with_game(Game::new(game_id, format!("Game {game_id}"), members))
    }

    pub fn with_user_config(mut self, config: UserConfig) -> Self {
        self.configs.push(config);
        self
    }

    pub fn with_ban(mut self, owner: &str, banned: &str) -> Self {
        self.bans.push(Ban::new(owner, banned));
        self
    }

    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.config.notifications.policy = policy;
        self
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.config.notifications.body_limit = limit;
        self
    }

    pub async fn build(self) -> TestSetup {
        let queue = Arc::new(InMemoryTaskQueue::with_lease(Duration::from_secs(30)));
        let store = Arc::new(InMemoryDatastore::new(Arc::clone(&queue)));
        let transport = RecordingTransport::new();

        let loader = Arc::new(ConfigLoader::fixed(self.config.clone()));
        let pipeline = Pipeline::new(
            store.clone(),
            queue.clone(),
            &self.config,
            loader,
            Arc::new(transport.clone()),
        );

        let mut tx = Transaction::new();
        for game in self.games {
            tx.put_game(game);
        }
        for config in self.configs {
            tx.put_user_config(config);
        }
        for ban in self.bans {
            tx.put_ban(ban);
        }
        store.commit(tx).await.expect("seed commit should succeed");

        TestSetup {
            pipeline,
            store,
            queue,
            transport,
        }
    }
}
