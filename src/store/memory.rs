//! In-process store used when no database is configured.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

use super::GameStore;
use crate::errors::{StoryError, StoryResult};
use crate::types::{ConversationHistory, GameId, GameSeed, GameState, RoundRecord};

/// Keeps games in a map; ids start at 1.
#[derive(Debug)]
pub struct MemoryGameStore {
    games: RwLock<HashMap<GameId, GameState>>,
    next_id: AtomicI64,
}

impl Default for MemoryGameStore {
    fn default() -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl MemoryGameStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored games.
    pub async fn len(&self) -> usize {
        self.games.read().await.len()
    }

    /// Returns true if no game has been stored.
    pub async fn is_empty(&self) -> bool {
        self.games.read().await.is_empty()
    }
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn create(
        &self,
        seed: &GameSeed,
        history: &ConversationHistory,
        first_round: RoundRecord,
    ) -> StoryResult<GameState> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let game = GameState {
            id,
            user_id: seed.user_id,
            theme: seed.theme.clone(),
            protagonist: seed.protagonist.clone(),
            history: history.clone(),
            rounds: vec![first_round],
            opening_len: history.len(),
            created_at: now,
            updated_at: now,
        };

        self.games.write().await.insert(id, game.clone());
        Ok(game)
    }

    async fn load(&self, id: GameId) -> StoryResult<GameState> {
        self.games
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoryError::NotFound { game_id: id })
    }

    async fn save(
        &self,
        id: GameId,
        history: &ConversationHistory,
        rounds: &[RoundRecord],
        opening_len: usize,
    ) -> StoryResult<GameState> {
        let mut games = self.games.write().await;
        let game = games.get_mut(&id).ok_or(StoryError::NotFound { game_id: id })?;

        game.history = history.clone();
        game.rounds = rounds.to_vec();
        game.opening_len = opening_len;
        game.updated_at = Utc::now();
        Ok(game.clone())
    }

    async fn reset(&self, id: GameId) -> StoryResult<GameState> {
        let mut games = self.games.write().await;
        let game = games.get_mut(&id).ok_or(StoryError::NotFound { game_id: id })?;

        game.rewind_to_opening();
        game.updated_at = Utc::now();
        Ok(game.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chapter, Message, Protagonist, Theme};

    fn seed() -> GameSeed {
        GameSeed {
            user_id: 3,
            theme: Theme {
                id: 1,
                theme: "森林".to_string(),
                description: "魔法森林探险".to_string(),
            },
            protagonist: Protagonist {
                id: 2,
                name: "小兔".to_string(),
                description: "一只勇敢的兔子".to_string(),
            },
        }
    }

    fn record(round: u8) -> RoundRecord {
        RoundRecord {
            round,
            chapter: Chapter::from_round(round).unwrap(),
            content: format!("第{}回合", round),
            choices: vec!["a".into(), "b".into(), "c".into()],
        }
    }

    fn opening() -> ConversationHistory {
        ConversationHistory::from(vec![Message::user("开始"), Message::assistant("{}")])
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let store = MemoryGameStore::new();
        let first = store.create(&seed(), &opening(), record(0)).await.unwrap();
        let second = store.create(&seed(), &opening(), record(0)).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.opening_len, 2);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_load_missing() {
        let store = MemoryGameStore::new();
        let err = store.load(99).await.unwrap_err();
        assert!(matches!(err, StoryError::NotFound { game_id: 99 }));
    }

    #[tokio::test]
    async fn test_save_then_reset() {
        let store = MemoryGameStore::new();
        let game = store.create(&seed(), &opening(), record(0)).await.unwrap();

        let history = game
            .history
            .extended_with(Message::user("a"))
            .extended_with(Message::assistant("{}"));
        let saved = store
            .save(game.id, &history, &[record(0), record(1)], game.opening_len)
            .await
            .unwrap();
        assert_eq!(saved.history.len(), 4);
        assert_eq!(saved.rounds.len(), 2);

        let reset = store.reset(game.id).await.unwrap();
        assert_eq!(reset.history.len(), 2);
        assert_eq!(reset.rounds, vec![record(0)]);
        assert_eq!(store.load(game.id).await.unwrap().history.len(), 2);
    }

    #[tokio::test]
    async fn test_save_missing_game() {
        let store = MemoryGameStore::new();
        assert!(store.save(5, &opening(), &[], 2).await.is_err());
        assert!(store.is_empty().await);
    }
}
