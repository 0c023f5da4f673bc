use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{Datastore, EntityKey, StoreError, Transaction, Versioned, Write};
use crate::{
    game::Game,
    notification::UserConfig,
    queue::{to_chrono, QueueError, Task, TaskKind, TaskQueue},
    rating::RatingSnapshot,
    settlement::{GameResult, ResultCursor},
    stats::{Ban, PhaseResult, UserStats},
};

/// PostgreSQL store. Entities live as JSONB rows in `entities`, tasks in the
/// `tasks` outbox of the same database, so a commit is one SQL transaction.
#[derive(Debug, Clone)]
pub struct PostgresDatastore {
    pool: PgPool,
    lease_duration: Duration,
}

impl PostgresDatastore {
    pub fn new(pool: PgPool, lease_duration: Duration) -> Self {
        Self {
            pool,
            lease_duration,
        }
    }

    pub async fn connect(database_url: &str, lease_duration: Duration) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool, lease_duration))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))
    }

    async fn get_versioned<T: DeserializeOwned>(
        &self,
        key: &EntityKey,
    ) -> Result<Option<Versioned<T>>, StoreError> {
        let row = sqlx::query("SELECT version, body FROM entities WHERE kind = $1 AND id = $2")
            .bind(key.kind())
            .bind(key.id())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, %key, "Failed to fetch entity");
                StoreError::from(e)
            })?;

        row.map(|row| {
            let version: i64 = row.try_get("version")?;
            Ok(Versioned {
                value: decode_body(&row)?,
                version: version as u64,
            })
        })
        .transpose()
    }

    async fn query_bodies<T: DeserializeOwned>(
        &self,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<T>, StoreError> {
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(decode_body).collect()
    }
}

fn decode_body<T: DeserializeOwned>(row: &PgRow) -> Result<T, StoreError> {
    let body: serde_json::Value = row.try_get("body")?;
    Ok(serde_json::from_value(body)?)
}

fn encode_write(write: &Write) -> Result<(serde_json::Value, DateTime<Utc>), StoreError> {
    fn body<T: Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::to_value(value)?)
    }

    Ok(match write {
        Write::Game(game) => (body(game)?, game.created_at),
        Write::GameResult(result) => (body(result)?, result.created_at),
        Write::RatingSnapshot(snapshot) => (body(snapshot)?, snapshot.created_at),
        Write::Ban(ban) => (body(ban)?, Utc::now()),
        Write::PhaseResult(phase) => (body(phase)?, Utc::now()),
        Write::UserStats(stats) => (body(stats)?, stats.updated_at),
        Write::UserConfig(config) => (body(config)?, Utc::now()),
    })
}

fn decode_task(row: &PgRow) -> Result<Task, QueueError> {
    let kind: String = row.try_get("kind").map_err(unavailable)?;
    let attempt: i32 = row.try_get("attempt").map_err(unavailable)?;
    Ok(Task {
        id: row.try_get("id").map_err(unavailable)?,
        kind: TaskKind::from_str(&kind).map_err(|_| QueueError::UnknownKind(kind.clone()))?,
        payload: row.try_get("payload").map_err(unavailable)?,
        not_before: row.try_get("not_before").map_err(unavailable)?,
        attempt: attempt.max(0) as u32,
    })
}

fn unavailable(err: sqlx::Error) -> QueueError {
    QueueError::Unavailable(err.to_string())
}

#[async_trait]
impl Datastore for PostgresDatastore {
    #[instrument(skip(self))]
    async fn get_game(&self, game_id: &str) -> Result<Option<Versioned<Game>>, StoreError> {
        self.get_versioned(&EntityKey::Game(game_id.to_string()))
            .await
    }

    #[instrument(skip(self))]
    async fn games_for_user(&self, user_id: &str) -> Result<Vec<Game>, StoreError> {
        self.query_bodies(
            sqlx::query(
                "SELECT body FROM entities WHERE kind = 'game' \
                 AND body->'members' @> jsonb_build_array(jsonb_build_object('user_id', $1::text))",
            )
            .bind(user_id),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_game_result(
        &self,
        game_id: &str,
    ) -> Result<Option<Versioned<GameResult>>, StoreError> {
        self.get_versioned(&EntityKey::GameResult(game_id.to_string()))
            .await
    }

    #[instrument(skip(self))]
    async fn results_for_user(&self, user_id: &str) -> Result<Vec<GameResult>, StoreError> {
        self.query_bodies(
            sqlx::query(
                "SELECT body FROM entities WHERE kind = 'game_result' \
                 AND body->'all_users' @> jsonb_build_array($1::text)",
            )
            .bind(user_id),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn unrated_game_results(&self, limit: usize) -> Result<Vec<GameResult>, StoreError> {
        self.query_bodies(
            sqlx::query(
                "SELECT body FROM entities WHERE kind = 'game_result' \
                 AND body @> '{\"rated\": false, \"private\": false}' \
                 AND NOT body ? 'unratable' \
                 ORDER BY created_at, id LIMIT $1",
            )
            .bind(limit as i64),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn game_results_after(
        &self,
        cursor: Option<&ResultCursor>,
        limit: usize,
    ) -> Result<Vec<GameResult>, StoreError> {
        let query = match cursor {
            Some(cursor) => sqlx::query(
                "SELECT body FROM entities WHERE kind = 'game_result' \
                 AND body @> '{\"private\": false}' AND (created_at, id) > ($1, $2) \
                 ORDER BY created_at, id LIMIT $3",
            )
            .bind(cursor.created_at)
            .bind(&cursor.game_id)
            .bind(limit as i64),
            None => sqlx::query(
                "SELECT body FROM entities WHERE kind = 'game_result' \
                 AND body @> '{\"private\": false}' \
                 ORDER BY created_at, id LIMIT $1",
            )
            .bind(limit as i64),
        };
        self.query_bodies(query).await
    }

    #[instrument(skip(self))]
    async fn latest_rating(&self, user_id: &str) -> Result<Option<RatingSnapshot>, StoreError> {
        let mut snapshots: Vec<RatingSnapshot> = self
            .query_bodies(
                sqlx::query(
                    "SELECT body FROM entities WHERE kind = 'rating_snapshot' \
                     AND body->>'user_id' = $1 ORDER BY created_at DESC LIMIT 1",
                )
                .bind(user_id),
            )
            .await?;
        Ok(snapshots.pop())
    }

    #[instrument(skip(self))]
    async fn delete_all_rating_snapshots(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM entities WHERE kind = 'rating_snapshot'")
            .execute(&self.pool)
            .await?;
        debug!(deleted = result.rows_affected(), "Deleted every rating snapshot");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn phase_results_for_user(&self, user_id: &str) -> Result<Vec<PhaseResult>, StoreError> {
        self.query_bodies(
            sqlx::query(
                "SELECT body FROM entities WHERE kind = 'phase_result' \
                 AND (body->'nmr_users' @> jsonb_build_array($1::text) \
                      OR body->'active_users' @> jsonb_build_array($1::text) \
                      OR body->'ready_users' @> jsonb_build_array($1::text))",
            )
            .bind(user_id),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn bans_for_user(&self, user_id: &str) -> Result<Vec<Ban>, StoreError> {
        self.query_bodies(
            sqlx::query(
                "SELECT body FROM entities WHERE kind = 'ban' \
                 AND (body->'user_ids' @> jsonb_build_array($1::text) \
                      OR body->'owner_ids' @> jsonb_build_array($1::text))",
            )
            .bind(user_id),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn get_user_config(&self, user_id: &str) -> Result<Option<UserConfig>, StoreError> {
        Ok(self
            .get_versioned(&EntityKey::UserConfig(user_id.to_string()))
            .await?
            .map(|v| v.value))
    }

    #[instrument(skip(self))]
    async fn get_user_stats(&self, user_id: &str) -> Result<Option<UserStats>, StoreError> {
        Ok(self
            .get_versioned(&EntityKey::UserStats(user_id.to_string()))
            .await?
            .map(|v| v.value))
    }

    #[instrument(skip(self, tx), fields(writes = tx.writes().len(), tasks = tx.tasks().len()))]
    async fn commit(&self, tx: Transaction) -> Result<(), StoreError> {
        let (expectations, writes, tasks, consumes) = tx.into_parts();
        let mut db = self.pool.begin().await?;

        for (key, expected) in &expectations {
            let actual: Option<i64> = sqlx::query_scalar(
                "SELECT version FROM entities WHERE kind = $1 AND id = $2 FOR UPDATE",
            )
            .bind(key.kind())
            .bind(key.id())
            .fetch_optional(&mut *db)
            .await?;
            let actual = actual.unwrap_or(0) as u64;
            if actual != *expected {
                debug!(%key, expected, actual, "Version expectation failed");
                return Err(StoreError::Conflict(key.to_string()));
            }
        }

        if let Some(task_id) = consumes {
            let consumed = sqlx::query("DELETE FROM tasks WHERE id = $1 AND NOT dead")
                .bind(task_id)
                .execute(&mut *db)
                .await?;
            if consumed.rows_affected() == 0 {
                return Err(StoreError::TaskConsumed(task_id));
            }
        }

        // A row expected absent may be inserted concurrently; only a plain insert
        // notices that.
        let expected_absent: HashSet<&EntityKey> = expectations
            .iter()
            .filter(|(_, version)| *version == 0)
            .map(|(key, _)| key)
            .collect();

        for write in &writes {
            let key = write.key();
            let (body, created_at) = encode_write(write)?;
            if expected_absent.contains(&key) {
                let inserted = sqlx::query(
                    "INSERT INTO entities (kind, id, version, body, created_at) \
                     VALUES ($1, $2, 1, $3, $4) ON CONFLICT (kind, id) DO NOTHING",
                )
                .bind(key.kind())
                .bind(key.id())
                .bind(&body)
                .bind(created_at)
                .execute(&mut *db)
                .await?;
                if inserted.rows_affected() == 0 {
                    return Err(StoreError::Conflict(key.to_string()));
                }
            } else {
                sqlx::query(
                    "INSERT INTO entities (kind, id, version, body, created_at) \
                     VALUES ($1, $2, 1, $3, $4) \
                     ON CONFLICT (kind, id) DO UPDATE \
                     SET version = entities.version + 1, body = EXCLUDED.body, \
                         created_at = EXCLUDED.created_at",
                )
                .bind(key.kind())
                .bind(key.id())
                .bind(&body)
                .bind(created_at)
                .execute(&mut *db)
                .await?;
            }
        }

        for task in &tasks {
            insert_task(&mut *db, task).await?;
        }

        db.commit().await?;
        debug!("Transaction committed");
        Ok(())
    }
}

async fn insert_task<'e, E>(executor: E, task: &Task) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        "INSERT INTO tasks (id, kind, payload, not_before, attempt) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(task.id)
    .bind(task.kind.as_ref())
    .bind(&task.payload)
    .bind(task.not_before)
    .bind(task.attempt as i32)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl TaskQueue for PostgresDatastore {
    #[instrument(skip(self, task), fields(task_id = %task.id, kind = %task.kind))]
    async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        insert_task(&self.pool, &task).await.map_err(unavailable)
    }

    async fn lease(&self) -> Result<Option<Task>, QueueError> {
        let now = Utc::now();
        let row = sqlx::query(
            "UPDATE tasks SET leased_until = $2 WHERE id = ( \
                SELECT id FROM tasks WHERE NOT dead AND not_before <= $1 \
                AND (leased_until IS NULL OR leased_until <= $1) \
                ORDER BY not_before, seq LIMIT 1 FOR UPDATE SKIP LOCKED) \
             RETURNING id, kind, payload, not_before, attempt",
        )
        .bind(now)
        .bind(now + to_chrono(self.lease_duration))
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.as_ref().map(decode_task).transpose()
    }

    async fn ack(&self, task_id: Uuid) -> Result<(), QueueError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND NOT dead")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        if result.rows_affected() == 0 {
            debug!(task_id = %task_id, "Acked task was already consumed");
        }
        Ok(())
    }

    async fn retry(&self, task: &Task, delay: Duration) -> Result<(), QueueError> {
        sqlx::query(
            "UPDATE tasks SET attempt = attempt + 1, not_before = $2, leased_until = NULL \
             WHERE id = $1 AND NOT dead",
        )
        .bind(task.id)
        .bind(Utc::now() + to_chrono(delay))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn dead_letter(&self, task: &Task, reason: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE tasks SET dead = TRUE, dead_reason = $2, leased_until = NULL \
             WHERE id = $1 AND NOT dead",
        )
        .bind(task.id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        if result.rows_affected() > 0 {
            warn!(task_id = %task.id, kind = %task.kind, reason, "Task dead-lettered");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn requeue_dead_letters(&self) -> Result<usize, QueueError> {
        let result = sqlx::query(
            "UPDATE tasks SET dead = FALSE, dead_reason = NULL, attempt = 0, \
             not_before = $1, leased_until = NULL WHERE dead",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        info!(requeued = result.rows_affected(), "Requeued dead-lettered tasks");
        Ok(result.rows_affected() as usize)
    }

    async fn pending(&self) -> Result<usize, QueueError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE NOT dead")
            .fetch_one(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(count.max(0) as usize)
    }
}
