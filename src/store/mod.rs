//! Game persistence.
//!
//! A [`GameStore`] owns [`GameState`] records. Every write is atomic: either
//! the history and rounds are both replaced or neither is.

mod memory;
mod postgres;

pub use memory::MemoryGameStore;
pub use postgres::PostgresGameStore;

use async_trait::async_trait;

use crate::errors::StoryResult;
use crate::types::{ConversationHistory, GameId, GameSeed, GameState, RoundRecord};

/// Storage for game records.
#[async_trait]
pub trait GameStore: Send + Sync {
    /// Creates a game from its opening cycle and assigns an id.
    ///
    /// `history` ends with the opening reply; its length becomes the
    /// game's `opening_len`.
    async fn create(
        &self,
        seed: &GameSeed,
        history: &ConversationHistory,
        first_round: RoundRecord,
    ) -> StoryResult<GameState>;

    /// Loads a game.
    async fn load(&self, id: GameId) -> StoryResult<GameState>;

    /// Replaces a game's history, rounds and opening point in one write.
    ///
    /// `opening_len` changes only when the opening round is regenerated.
    async fn save(
        &self,
        id: GameId,
        history: &ConversationHistory,
        rounds: &[RoundRecord],
        opening_len: usize,
    ) -> StoryResult<GameState>;

    /// Rewinds a game to its opening round.
    async fn reset(&self, id: GameId) -> StoryResult<GameState>;
}
