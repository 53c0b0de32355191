//! Model invocation.
//!
//! The engine only sees [`ModelInvoker`]: give it a prompt, get back an
//! ordered stream of [`StreamEvent`]s that ends with exactly one of
//! `Finished`, `Error` or `Interrupted`.

mod zhipu;

pub use zhipu::{ZhipuClient, SSE_INVOKE_PATH};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::errors::StoryResult;
use crate::types::ConversationHistory;

/// Default sampling temperature for story generation.
pub const DEFAULT_TEMPERATURE: f32 = 0.9;

/// Default nucleus sampling threshold.
pub const DEFAULT_TOP_P: f32 = 0.7;

/// One event from the model stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental text.
    Token(String),
    /// Generation finished; `meta` carries usage data when the model sent it.
    Finished {
        /// Raw metadata from the model service.
        meta: Option<serde_json::Value>,
    },
    /// The model reported an error.
    Error(String),
    /// The model interrupted generation.
    Interrupted(String),
    /// An event tag this client does not know.
    Unknown(String),
}

impl StreamEvent {
    /// Returns true for events after which nothing else is read.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Finished { .. } | StreamEvent::Error(_) | StreamEvent::Interrupted(_)
        )
    }
}

/// Boxed stream of model events.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Sampling parameters passed with every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling threshold.
    pub top_p: f32,
    /// Ask for incremental tokens instead of the full text so far.
    pub incremental: bool,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            incremental: true,
        }
    }
}

impl SamplingParams {
    /// Checks parameter ranges.
    pub fn validate(&self) -> StoryResult<()> {
        if !(0.0..=1.0).contains(&self.temperature) || self.temperature == 0.0 {
            return Err(crate::errors::StoryError::validation_param(
                "temperature must be in (0, 1]",
                "temperature",
            ));
        }
        if !(0.0..=1.0).contains(&self.top_p) || self.top_p == 0.0 {
            return Err(crate::errors::StoryError::validation_param(
                "top_p must be in (0, 1]",
                "top_p",
            ));
        }
        Ok(())
    }
}

/// Streams completions for a prompt.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Starts a generation and returns its event stream.
    ///
    /// Errors returned here happen before any event is produced (bad
    /// credentials, connection refused, non-200 status).
    async fn invoke(
        &self,
        prompt: &ConversationHistory,
        params: &SamplingParams,
    ) -> StoryResult<EventStream>;
}
