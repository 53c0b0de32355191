//! Type definitions shared by the engine, the store and the HTTP boundary.

pub mod game;
pub mod history;
pub mod round;

pub use game::{GameId, GameSeed, GameState, Protagonist, Theme};
pub use history::{ConversationHistory, Message, Role};
pub use round::{Chapter, RoundRecord, MAX_ROUNDS};
