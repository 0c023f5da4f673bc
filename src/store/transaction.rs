use std::fmt;
use uuid::Uuid;

use crate::{
    game::Game,
    notification::UserConfig,
    queue::Task,
    rating::RatingSnapshot,
    settlement::GameResult,
    stats::{Ban, PhaseResult, UserStats},
};

/// Identity of one stored entity. Transactions are scoped to the keys they touch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKey {
    Game(String),
    GameResult(String),
    RatingSnapshot { user_id: String, game_id: String },
    Ban(String),
    PhaseResult(String),
    UserStats(String),
    UserConfig(String),
}

impl EntityKey {
    pub fn kind(&self) -> &'static str {
        match self {
            EntityKey::Game(_) => "game",
            EntityKey::GameResult(_) => "game_result",
            EntityKey::RatingSnapshot { .. } => "rating_snapshot",
            EntityKey::Ban(_) => "ban",
            EntityKey::PhaseResult(_) => "phase_result",
            EntityKey::UserStats(_) => "user_stats",
            EntityKey::UserConfig(_) => "user_config",
        }
    }

    pub fn id(&self) -> String {
        match self {
            EntityKey::Game(id)
            | EntityKey::GameResult(id)
            | EntityKey::Ban(id)
            | EntityKey::PhaseResult(id)
            | EntityKey::UserStats(id)
            | EntityKey::UserConfig(id) => id.clone(),
            EntityKey::RatingSnapshot { user_id, game_id } => format!("{user_id}/{game_id}"),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

/// A value together with the version it was read at. Version 0 means "absent".
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Game(Game),
    GameResult(GameResult),
    RatingSnapshot(RatingSnapshot),
    Ban(Ban),
    PhaseResult(PhaseResult),
    UserStats(UserStats),
    UserConfig(UserConfig),
}

impl Write {
    pub fn key(&self) -> EntityKey {
        match self {
            Write::Game(game) => EntityKey::Game(game.id.clone()),
            Write::GameResult(result) => EntityKey::GameResult(result.game_id.clone()),
            Write::RatingSnapshot(snapshot) => EntityKey::RatingSnapshot {
                user_id: snapshot.user_id.clone(),
                game_id: snapshot.game_id.clone(),
            },
            Write::Ban(ban) => EntityKey::Ban(ban.key()),
            Write::PhaseResult(phase) => EntityKey::PhaseResult(phase.key()),
            Write::UserStats(stats) => EntityKey::UserStats(stats.user_id.clone()),
            Write::UserConfig(config) => EntityKey::UserConfig(config.user_id.clone()),
        }
    }
}

/// Buffered unit of work committed atomically by [`super::Datastore::commit`].
///
/// Besides entity writes it carries task enqueues, which become visible to the
/// queue only if the commit succeeds, and optionally the id of the task being
/// processed, which the commit removes from the queue.
#[derive(Debug, Default)]
pub struct Transaction {
    expectations: Vec<(EntityKey, u64)>,
    writes: Vec<Write>,
    tasks: Vec<Task>,
    consumes: Option<Uuid>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transaction that also acknowledges `task_id` when it commits
    pub fn consuming(task_id: Uuid) -> Self {
        Self {
            consumes: Some(task_id),
            ..Self::default()
        }
    }

    pub fn maybe_consuming(task_id: Option<Uuid>) -> Self {
        Self {
            consumes: task_id,
            ..Self::default()
        }
    }

    /// The commit fails with a conflict unless `key` is still at `version`.
    pub fn expect_version(&mut self, key: EntityKey, version: u64) {
        self.expectations.push((key, version));
    }

    pub fn put(&mut self, write: Write) {
        self.writes.push(write);
    }

    pub fn put_game(&mut self, game: Game) {
        self.put(Write::Game(game));
    }

    pub fn put_game_result(&mut self, result: GameResult) {
        self.put(Write::GameResult(result));
    }

    pub fn put_rating_snapshot(&mut self, snapshot: RatingSnapshot) {
        self.put(Write::RatingSnapshot(snapshot));
    }

    pub fn put_ban(&mut self, ban: Ban) {
        self.put(Write::Ban(ban));
    }

    pub fn put_phase_result(&mut self, phase: PhaseResult) {
        self.put(Write::PhaseResult(phase));
    }

    pub fn put_user_stats(&mut self, stats: UserStats) {
        self.put(Write::UserStats(stats));
    }

    pub fn put_user_config(&mut self, config: UserConfig) {
        self.put(Write::UserConfig(config));
    }

    pub fn enqueue(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn expectations(&self) -> &[(EntityKey, u64)] {
        &self.expectations
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn consumed_task(&self) -> Option<Uuid> {
        self.consumes
    }

    pub fn is_empty(&self) -> bool {
        self.expectations.is_empty()
            && self.writes.is_empty()
            && self.tasks.is_empty()
            && self.consumes.is_none()
    }

    pub(crate) fn into_parts(self) -> (Vec<(EntityKey, u64)>, Vec<Write>, Vec<Task>, Option<Uuid>) {
        (self.expectations, self.writes, self.tasks, self.consumes)
    }
}
