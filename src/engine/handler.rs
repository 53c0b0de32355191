//! What happens to a parsed reply.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::errors::{StoryError, StoryResult};
use crate::store::GameStore;
use crate::types::{ConversationHistory, GameSeed, GameState, RoundRecord};

/// Persists the outcome of a structured cycle.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    /// Stores `object` with `history`, which already ends with the reply.
    async fn on_complete(&self, object: &Value, history: &ConversationHistory)
        -> StoryResult<GameState>;

    /// Operation name for logs and metrics.
    fn operation(&self) -> &'static str;
}

fn round_number(index: usize) -> StoryResult<u8> {
    u8::try_from(index).map_err(|_| StoryError::validation_param("round out of range", "round"))
}

/// The opening cycle: creates the game with round 0.
pub struct CreateGame {
    store: Arc<dyn GameStore>,
    seed: GameSeed,
}

impl CreateGame {
    /// Creates the handler.
    pub fn new(store: Arc<dyn GameStore>, seed: GameSeed) -> Self {
        Self { store, seed }
    }
}

#[async_trait]
impl CompletionHandler for CreateGame {
    async fn on_complete(
        &self,
        object: &Value,
        history: &ConversationHistory,
    ) -> StoryResult<GameState> {
        let first = RoundRecord::from_object(0, object)?;
        let game = self.store.create(&self.seed, history, first).await?;
        tracing::info!(game_id = game.id, user_id = game.user_id, "Game created");
        Ok(game)
    }

    fn operation(&self) -> &'static str {
        "start_game"
    }
}

/// A choice cycle: appends the next round.
pub struct AppendRound {
    store: Arc<dyn GameStore>,
    game: GameState,
}

impl AppendRound {
    /// Creates the handler for a loaded game.
    pub fn new(store: Arc<dyn GameStore>, game: GameState) -> Self {
        Self { store, game }
    }
}

#[async_trait]
impl CompletionHandler for AppendRound {
    async fn on_complete(
        &self,
        object: &Value,
        history: &ConversationHistory,
    ) -> StoryResult<GameState> {
        let record = RoundRecord::from_object(round_number(self.game.next_round())?, object)?;
        let round = record.round;

        let mut rounds = self.game.rounds.clone();
        rounds.push(record);

        let game = self
            .store
            .save(self.game.id, history, &rounds, self.game.opening_len)
            .await?;
        tracing::info!(game_id = game.id, round, "Round appended");
        Ok(game)
    }

    fn operation(&self) -> &'static str {
        "submit_choice"
    }
}

/// A reroll cycle: replaces the current round, keeping its number.
pub struct ReplaceRound {
    store: Arc<dyn GameStore>,
    game: GameState,
}

impl ReplaceRound {
    /// Creates the handler for a loaded game with at least one round.
    pub fn new(store: Arc<dyn GameStore>, game: GameState) -> Self {
        Self { store, game }
    }
}

#[async_trait]
impl CompletionHandler for ReplaceRound {
    async fn on_complete(
        &self,
        object: &Value,
        history: &ConversationHistory,
    ) -> StoryResult<GameState> {
        let index = self
            .game
            .rounds
            .len()
            .checked_sub(1)
            .ok_or_else(|| StoryError::GameOver {
                game_id: self.game.id,
                message: "no round to regenerate".to_string(),
            })?;

        let record = RoundRecord::from_object(round_number(index)?, object)?;
        let round = record.round;

        let mut rounds = self.game.rounds.clone();
        rounds[index] = record;

        // A regenerated opening moves the point reset rewinds to.
        let opening_len = if index == 0 {
            history.len()
        } else {
            self.game.opening_len
        };

        let game = self
            .store
            .save(self.game.id, history, &rounds, opening_len)
            .await?;
        tracing::info!(game_id = game.id, round, "Round regenerated");
        Ok(game)
    }

    fn operation(&self) -> &'static str {
        "reroll_round"
    }
}
