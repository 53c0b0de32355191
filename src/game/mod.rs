//! Game operations.
//!
//! Each operation prepares a history and a handler and runs one engine
//! cycle. Cycles on the same game are serialized: the game's lock is taken
//! before the state is loaded and released when the output stream is
//! dropped.

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::instrument;

use crate::engine::{
    AppendRound, CompletionHandler, CreateGame, ExtractionMode, GenerationEngine, OutputStream,
    ReplaceRound,
};
use crate::errors::{StoryError, StoryResult};
use crate::prompts;
use crate::store::GameStore;
use crate::types::{GameId, GameSeed, GameState, Message, MAX_ROUNDS};

/// One async lock per game id.
#[derive(Debug, Default)]
struct GameLocks {
    locks: Mutex<HashMap<GameId, Arc<Mutex<()>>>>,
}

impl GameLocks {
    async fn acquire(&self, id: GameId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|other, lock| *other == id || Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id).or_default())
        };
        lock.lock_owned().await
    }
}

/// Keeps `guard` alive until `inner` is exhausted or dropped.
fn holding(guard: OwnedMutexGuard<()>, mut inner: OutputStream) -> OutputStream {
    Box::pin(async_stream::stream! {
        let _guard = guard;
        while let Some(event) = inner.next().await {
            yield event;
        }
    })
}

fn require_text(value: &str, param: &str) -> StoryResult<()> {
    if value.trim().is_empty() {
        return Err(StoryError::validation_param(
            format!("{} cannot be empty", param),
            param,
        ));
    }
    Ok(())
}

/// Story game operations over an engine and a store.
pub struct GameService {
    engine: GenerationEngine,
    store: Arc<dyn GameStore>,
    locks: GameLocks,
}

impl GameService {
    /// Creates the service.
    pub fn new(engine: GenerationEngine, store: Arc<dyn GameStore>) -> Self {
        Self {
            engine,
            store,
            locks: GameLocks::default(),
        }
    }

    /// Returns the store.
    pub fn store(&self) -> &Arc<dyn GameStore> {
        &self.store
    }

    /// Starts a game: rules preamble plus opening message; the game is
    /// created when the first round parses.
    #[instrument(skip(self, seed), fields(user_id = seed.user_id, theme_id = seed.theme.id))]
    pub fn start_game(&self, seed: GameSeed) -> StoryResult<OutputStream> {
        require_text(&seed.theme.description, "theme")?;
        require_text(&seed.protagonist.name, "protagonist")?;

        let opening = prompts::opening_message(&seed.theme, &seed.protagonist);
        let handler: Arc<dyn CompletionHandler> =
            Arc::new(CreateGame::new(Arc::clone(&self.store), seed));

        Ok(self.engine.run_cycle(
            prompts::rules_preamble(),
            Some(opening),
            ExtractionMode::Structured,
            Some(handler),
        ))
    }

    /// Continues a game with one of the offered choices.
    #[instrument(skip(self, choice))]
    pub async fn submit_choice(&self, game_id: GameId, choice: &str) -> StoryResult<OutputStream> {
        require_text(choice, "choice")?;
        self.advance(game_id, prompts::choice_message(choice)).await
    }

    /// Continues a game with a choice the player wrote.
    #[instrument(skip(self, text))]
    pub async fn submit_custom_choice(
        &self,
        game_id: GameId,
        text: &str,
    ) -> StoryResult<OutputStream> {
        require_text(text, "choice")?;
        self.advance(game_id, prompts::custom_choice_message(text)).await
    }

    async fn advance(&self, game_id: GameId, message: Message) -> StoryResult<OutputStream> {
        let guard = self.locks.acquire(game_id).await;
        let game = self.store.load(game_id).await?;

        if game.is_finished() {
            return Err(StoryError::GameOver {
                game_id,
                message: format!("all {} rounds have been played", MAX_ROUNDS),
            });
        }

        tracing::debug!(game_id, next_round = game.next_round(), "Advancing game");
        let history = game.history.clone();
        let handler: Arc<dyn CompletionHandler> =
            Arc::new(AppendRound::new(Arc::clone(&self.store), game));

        let stream = self.engine.run_cycle(
            history,
            Some(message),
            ExtractionMode::Structured,
            Some(handler),
        );
        Ok(holding(guard, stream))
    }

    /// Regenerates the current round.
    #[instrument(skip(self))]
    pub async fn reroll_round(&self, game_id: GameId) -> StoryResult<OutputStream> {
        let guard = self.locks.acquire(game_id).await;
        let game = self.store.load(game_id).await?;

        if game.rounds.is_empty() {
            return Err(StoryError::GameOver {
                game_id,
                message: "no round to regenerate".to_string(),
            });
        }

        let history = game.history.clone();
        let handler: Arc<dyn CompletionHandler> =
            Arc::new(ReplaceRound::new(Arc::clone(&self.store), game));

        let stream = self.engine.run_cycle(
            history,
            Some(prompts::reroll_message()),
            ExtractionMode::Structured,
            Some(handler),
        );
        Ok(holding(guard, stream))
    }

    /// Streams a grading of a pupil's essay. Nothing is stored.
    #[instrument(skip(self, article), fields(chars = article.chars().count()))]
    pub fn evaluate_article(&self, article: &str) -> StoryResult<OutputStream> {
        require_text(article, "article")?;
        Ok(self
            .engine
            .run_cycle(prompts::article_prompt(article), None, ExtractionMode::RawText, None))
    }

    /// Loads a game.
    #[instrument(skip(self))]
    pub async fn load_game(&self, game_id: GameId) -> StoryResult<GameState> {
        self.store.load(game_id).await
    }

    /// Rewinds a game to its opening round.
    #[instrument(skip(self))]
    pub async fn reset_game(&self, game_id: GameId) -> StoryResult<GameState> {
        let _guard = self.locks.acquire(game_id).await;
        let game = self.store.reset(game_id).await?;
        tracing::info!(game_id, "Game reset");
        Ok(game)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::engine::OutputEvent;
    use crate::mocks::ScriptedModel;
    use crate::store::MemoryGameStore;
    use crate::types::{Protagonist, Theme};
    use std::time::Duration;

    const REPLY: &str = r#"{"round":"1","chapter":"故事的开端","content":"小熊出发了","choice":["a.左","b.右","c.停"]}"#;

    fn seed() -> GameSeed {
        GameSeed {
            user_id: 9,
            theme: Theme {
                id: 1,
                theme: "冒险".to_string(),
                description: "雪山探险".to_string(),
            },
            protagonist: Protagonist {
                id: 2,
                name: "小熊".to_string(),
                description: "爱吃蜂蜜".to_string(),
            },
        }
    }

    fn service(model: Arc<ScriptedModel>) -> GameService {
        let engine = GenerationEngine::new(model, GenerationConfig::default());
        GameService::new(engine, Arc::new(MemoryGameStore::new()))
    }

    async fn final_game(stream: OutputStream) -> GameState {
        let events: Vec<_> = stream.collect().await;
        match events.into_iter().last() {
            Some(OutputEvent::Complete(completion)) => completion.game.unwrap(),
            other => panic!("unexpected final event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_and_advance() {
        let model = Arc::new(ScriptedModel::new());
        model.push_reply_in_chunks(REPLY, 4);
        model.push_reply_in_chunks(REPLY, 4);
        let service = service(Arc::clone(&model));

        let game = final_game(service.start_game(seed()).unwrap()).await;
        assert_eq!(game.opening_len, 16);
        assert_eq!(game.rounds.len(), 1);

        let game = final_game(service.submit_custom_choice(game.id, "飞走").await.unwrap()).await;
        assert_eq!(game.rounds[1].round, 1);
        assert_eq!(game.history.len(), 18);

        let prompts = model.prompts();
        assert_eq!(prompts[1].messages()[16].content, "自定义：飞走");
    }

    #[tokio::test]
    async fn test_empty_choice_rejected() {
        let service = service(Arc::new(ScriptedModel::new()));
        let err = service.submit_choice(1, "  ").await.err().unwrap();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_unknown_game() {
        let service = service(Arc::new(ScriptedModel::new()));
        let err = service.reroll_round(42).await.err().unwrap();
        assert!(matches!(err, StoryError::NotFound { game_id: 42 }));
    }

    #[tokio::test]
    async fn test_same_game_cycles_are_serialized() {
        let model = Arc::new(ScriptedModel::new());
        model.push_reply(REPLY);
        model.push_reply(REPLY);
        model.push_reply(REPLY);
        let service = service(Arc::clone(&model));

        let game = final_game(service.start_game(seed()).unwrap()).await;

        let first = service.submit_choice(game.id, "a.左").await.unwrap();
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), service.submit_choice(game.id, "b.右"))
                .await;
        assert!(blocked.is_err());

        let after_first = final_game(first).await;
        assert_eq!(after_first.rounds.len(), 2);

        let second = service.submit_choice(game.id, "b.右").await.unwrap();
        let after_second = final_game(second).await;
        assert_eq!(after_second.rounds.len(), 3);
        assert_eq!(after_second.rounds[2].round, 2);
    }
}
