//! PostgreSQL-backed store.
//!
//! History, rounds, theme and protagonist are stored as JSON text columns.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use tokio_postgres::{NoTls, Row};
use tracing::instrument;

use super::GameStore;
use crate::config::DatabaseConfig;
use crate::errors::{StoryError, StoryResult};
use crate::types::{ConversationHistory, GameId, GameSeed, GameState, RoundRecord};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS story_games (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL,
    theme TEXT NOT NULL,
    protagonist TEXT NOT NULL,
    prompt_history TEXT NOT NULL,
    content TEXT NOT NULL,
    opening_len INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)";

const COLUMNS: &str =
    "id, user_id, theme, protagonist, prompt_history, content, opening_len, created_at, updated_at";

/// Game store over a deadpool connection pool.
pub struct PostgresGameStore {
    pool: Pool,
}

impl PostgresGameStore {
    /// Creates the pool. Connections are opened lazily.
    pub fn new(config: &DatabaseConfig) -> StoryResult<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.expose_secret().clone());
        cfg.dbname = Some(config.database.clone());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.max_connections));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoryError::persistence(format!("Cannot create pool: {}", e)))?;

        Ok(Self { pool })
    }

    /// Creates the games table if it does not exist.
    pub async fn migrate(&self) -> StoryResult<()> {
        let client = self.pool.get().await?;
        client.execute(CREATE_TABLE, &[]).await?;
        tracing::info!("story_games table ready");
        Ok(())
    }

    /// Returns `(size, available)` for the pool.
    pub fn pool_stats(&self) -> (usize, usize) {
        let status = self.pool.status();
        (status.size, status.available)
    }
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> StoryResult<String> {
    serde_json::to_string(value)
        .map_err(|e| StoryError::persistence(format!("Cannot encode column: {}", e)))
}

fn decode<T: DeserializeOwned>(row: &Row, column: &str) -> StoryResult<T> {
    let text: String = row.try_get(column)?;
    serde_json::from_str(&text)
        .map_err(|e| StoryError::persistence(format!("Corrupt {} column: {}", column, e)))
}

fn game_from_row(row: &Row) -> StoryResult<GameState> {
    let opening_len: i32 = row.try_get("opening_len")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(GameState {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        theme: decode(row, "theme")?,
        protagonist: decode(row, "protagonist")?,
        history: decode(row, "prompt_history")?,
        rounds: decode(row, "content")?,
        opening_len: usize::try_from(opening_len)
            .map_err(|_| StoryError::persistence("Negative opening_len"))?,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl GameStore for PostgresGameStore {
    #[instrument(skip_all, fields(user_id = seed.user_id))]
    async fn create(
        &self,
        seed: &GameSeed,
        history: &ConversationHistory,
        first_round: RoundRecord,
    ) -> StoryResult<GameState> {
        let opening_len = i32::try_from(history.len())
            .map_err(|_| StoryError::persistence("Opening history too long"))?;
        let rounds = vec![first_round];

        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO story_games \
                     (user_id, theme, protagonist, prompt_history, content, opening_len) \
                     VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
                    COLUMNS
                ),
                &[
                    &seed.user_id,
                    &encode(&seed.theme)?,
                    &encode(&seed.protagonist)?,
                    &encode(history)?,
                    &encode(&rounds)?,
                    &opening_len,
                ],
            )
            .await?;

        game_from_row(&row)
    }

    #[instrument(skip(self))]
    async fn load(&self, id: GameId) -> StoryResult<GameState> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {} FROM story_games WHERE id = $1", COLUMNS),
                &[&id],
            )
            .await?
            .ok_or(StoryError::NotFound { game_id: id })?;

        game_from_row(&row)
    }

    #[instrument(skip(self, history, rounds), fields(rounds = rounds.len()))]
    async fn save(
        &self,
        id: GameId,
        history: &ConversationHistory,
        rounds: &[RoundRecord],
        opening_len: usize,
    ) -> StoryResult<GameState> {
        let opening_len = i32::try_from(opening_len)
            .map_err(|_| StoryError::persistence("Opening history too long"))?;

        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                &format!(
                    "UPDATE story_games SET prompt_history = $2, content = $3, opening_len = $4, \
                     updated_at = NOW() WHERE id = $1 RETURNING {}",
                    COLUMNS
                ),
                &[&id, &encode(history)?, &encode(rounds)?, &opening_len],
            )
            .await?
            .ok_or(StoryError::NotFound { game_id: id })?;

        let game = game_from_row(&row)?;
        tx.commit().await?;
        Ok(game)
    }

    #[instrument(skip(self))]
    async fn reset(&self, id: GameId) -> StoryResult<GameState> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(
                &format!("SELECT {} FROM story_games WHERE id = $1 FOR UPDATE", COLUMNS),
                &[&id],
            )
            .await?
            .ok_or(StoryError::NotFound { game_id: id })?;

        let mut game = game_from_row(&row)?;
        game.rewind_to_opening();

        let row = tx
            .query_one(
                &format!(
                    "UPDATE story_games SET prompt_history = $2, content = $3, updated_at = NOW() \
                     WHERE id = $1 RETURNING {}",
                    COLUMNS
                ),
                &[&id, &encode(&game.history)?, &encode(&game.rounds)?],
            )
            .await?;

        let game = game_from_row(&row)?;
        tx.commit().await?;
        Ok(game)
    }
}

impl std::fmt::Debug for PostgresGameStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (size, available) = self.pool_stats();
        f.debug_struct("PostgresGameStore")
            .field("size", &size)
            .field("available", &available)
            .finish()
    }
}
