//! Streaming generation backend for an LLM-driven illustrated story game.
//!
//! A player picks a theme and a protagonist; the backend then plays an
//! eight-round story with a ChatGLM model. Each round is one generation
//! cycle: the stored conversation is sent to the model, the in-progress
//! `content` field is forwarded to the client while tokens arrive, and the
//! finished reply is cut down to its JSON object, parsed, appended to the
//! history and persisted.
//!
//! # Features
//!
//! - **Streaming extraction**: partial story text before generation ends
//! - **Zhipu ChatGLM client**: SSE decoding on a producer task, signed tokens
//! - **Persistence**: in-memory or PostgreSQL stores with atomic writes
//! - **HTTP**: axum routes emitting newline-delimited JSON frames
//! - **Observability**: tracing, credential redaction, cycle metrics
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use story_stream::{
//!     GameService, GameSeed, GenerationConfig, GenerationEngine, MemoryGameStore,
//!     Protagonist, Theme, ZhipuClient, ZhipuConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ZhipuConfig::builder().api_key("id.secret").build()?;
//!     let model = Arc::new(ZhipuClient::from_config(&config)?);
//!     let engine = GenerationEngine::new(model, GenerationConfig::default());
//!     let service = GameService::new(engine, Arc::new(MemoryGameStore::new()));
//!
//!     let seed = GameSeed {
//!         user_id: 1,
//!         theme: Theme { id: 1, theme: "森林".into(), description: "魔法森林探险".into() },
//!         protagonist: Protagonist { id: 1, name: "小兔".into(), description: "勇敢的兔子".into() },
//!     };
//!
//!     let mut events = service.start_game(seed)?;
//!     while let Some(event) = events.next().await {
//!         if let Some(line) = event.to_ndjson()? {
//!             print!("{}", String::from_utf8_lossy(&line));
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod engine;
pub mod errors;
pub mod extraction;
pub mod game;
pub mod mocks;
pub mod model;
pub mod observability;
pub mod prompts;
pub mod server;
pub mod store;
pub mod transport;
pub mod types;

pub use config::{AppConfig, DatabaseConfig, GenerationConfig, ZhipuConfig};
pub use engine::{
    CompletionHandler, Completion, ExtractionMode, GenerationEngine, OutputEvent, OutputStream,
};
pub use errors::{StoryError, StoryResult};
pub use extraction::{extract_object, ExtractionState, ObjectMatch};
pub use game::GameService;
pub use model::{ModelInvoker, SamplingParams, StreamEvent, ZhipuClient};
pub use server::{build_router, AppState};
pub use store::{GameStore, MemoryGameStore, PostgresGameStore};
pub use types::{
    Chapter, ConversationHistory, GameId, GameSeed, GameState, Message, Protagonist, Role,
    RoundRecord, Theme,
};
