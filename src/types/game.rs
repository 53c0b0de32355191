//! Game records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::history::ConversationHistory;
use super::round::{RoundRecord, MAX_ROUNDS};

/// Opaque game identifier assigned by the store.
pub type GameId = i64;

/// Story theme chosen by the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    /// Catalog id.
    #[serde(default)]
    pub id: i64,
    /// Short theme name.
    #[serde(default)]
    pub theme: String,
    /// Theme description sent to the model.
    pub description: String,
}

/// Story protagonist chosen by the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protagonist {
    /// Catalog id.
    #[serde(default)]
    pub id: i64,
    /// Protagonist name.
    pub name: String,
    /// Protagonist description sent to the model.
    pub description: String,
}

/// Everything needed to open a new game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSeed {
    /// Owning user.
    pub user_id: i64,
    /// Chosen theme.
    pub theme: Theme,
    /// Chosen protagonist.
    pub protagonist: Protagonist,
}

/// Persisted state of one game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Game id.
    pub id: GameId,
    /// Owning user.
    pub user_id: i64,
    /// Chosen theme.
    pub theme: Theme,
    /// Chosen protagonist.
    pub protagonist: Protagonist,
    /// Prompt history including the rules preamble.
    pub history: ConversationHistory,
    /// Rounds played so far.
    pub rounds: Vec<RoundRecord>,
    /// History length right after the opening round; reset rewinds to it.
    pub opening_len: usize,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl GameState {
    /// Round number the next append cycle will produce.
    pub fn next_round(&self) -> usize {
        self.rounds.len()
    }

    /// Returns true once the final chapter has been played.
    pub fn is_finished(&self) -> bool {
        self.rounds.len() >= MAX_ROUNDS
    }

    /// The most recent round, if any.
    pub fn current_round(&self) -> Option<&RoundRecord> {
        self.rounds.last()
    }

    /// Rewinds history and rounds to the opening point.
    pub fn rewind_to_opening(&mut self) {
        self.history.truncate_to(self.opening_len);
        self.rounds.truncate(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chapter, Message};

    fn record(round: u8) -> RoundRecord {
        RoundRecord {
            round,
            chapter: Chapter::from_round(round).unwrap(),
            content: format!("round {}", round),
            choices: vec!["a.x".into(), "b.y".into(), "c.z".into()],
        }
    }

    fn game_with_rounds(n: u8) -> GameState {
        let mut history = ConversationHistory::new();
        history.push(Message::user("rules"));
        history.push(Message::assistant("round 0"));
        for i in 1..n {
            history.push(Message::user("a"));
            history.push(Message::assistant(format!("round {}", i)));
        }
        GameState {
            id: 1,
            user_id: 9,
            theme: Theme {
                id: 1,
                theme: "forest".into(),
                description: "a deep forest".into(),
            },
            protagonist: Protagonist {
                id: 2,
                name: "Mimi".into(),
                description: "a curious cat".into(),
            },
            history,
            rounds: (0..n).map(record).collect(),
            opening_len: 2,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_rewind_to_opening() {
        let mut game = game_with_rounds(4);
        assert_eq!(game.history.len(), 8);

        game.rewind_to_opening();

        assert_eq!(game.history.len(), 2);
        assert_eq!(game.rounds.len(), 1);
        assert_eq!(game.next_round(), 1);
    }

    #[test]
    fn test_is_finished() {
        assert!(!game_with_rounds(7).is_finished());
        assert!(game_with_rounds(8).is_finished());
    }
}
