//! Mock implementations for testing.
//!
//! Provides a scripted model, a canned HTTP transport, a fixed-token auth
//! provider and a store whose writes can be made to fail, so cycles can be
//! exercised without a model service or database.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::auth::AuthProvider;
use crate::errors::{StoryError, StoryResult};
use crate::model::{EventStream, ModelInvoker, SamplingParams, StreamEvent};
use crate::store::{GameStore, MemoryGameStore};
use crate::transport::{HttpRequest, HttpTransport, StreamingResponse, TransportError};
use crate::types::{ConversationHistory, GameId, GameSeed, GameState, RoundRecord};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Script {
    Events(Vec<StreamEvent>),
    Failure(String),
}

/// Model that replays queued event scripts, one per invocation.
#[derive(Default)]
pub struct ScriptedModel {
    scripts: Mutex<VecDeque<Script>>,
    prompts: Mutex<Vec<ConversationHistory>>,
}

impl ScriptedModel {
    /// Creates a model with no scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an exact event sequence.
    pub fn push_events(&self, events: Vec<StreamEvent>) {
        lock(&self.scripts).push_back(Script::Events(events));
    }

    /// Queues `text` as one token per character followed by `Finished`.
    pub fn push_reply(&self, text: &str) {
        self.push_reply_in_chunks(text, 1);
    }

    /// Queues `text` split into tokens of `chunk_chars` characters, then
    /// `Finished`.
    pub fn push_reply_in_chunks(&self, text: &str, chunk_chars: usize) {
        let chars: Vec<char> = text.chars().collect();
        let mut events: Vec<StreamEvent> = chars
            .chunks(chunk_chars.max(1))
            .map(|chunk| StreamEvent::Token(chunk.iter().collect()))
            .collect();
        events.push(StreamEvent::Finished { meta: None });
        self.push_events(events);
    }

    /// Queues an invocation failure.
    pub fn push_failure(&self, message: &str) {
        lock(&self.scripts).push_back(Script::Failure(message.to_string()));
    }

    /// Prompts received so far, in order.
    pub fn prompts(&self) -> Vec<ConversationHistory> {
        lock(&self.prompts).clone()
    }

    /// Number of invocations.
    pub fn invocations(&self) -> usize {
        lock(&self.prompts).len()
    }
}

#[async_trait]
impl ModelInvoker for ScriptedModel {
    async fn invoke(
        &self,
        prompt: &ConversationHistory,
        _params: &SamplingParams,
    ) -> StoryResult<EventStream> {
        lock(&self.prompts).push(prompt.clone());

        match lock(&self.scripts).pop_front() {
            Some(Script::Events(events)) => Ok(Box::pin(futures::stream::iter(events))),
            Some(Script::Failure(message)) => Err(StoryError::Network {
                message,
                status_code: None,
            }),
            None => Err(StoryError::model_stream("no scripted reply left")),
        }
    }
}

/// A canned streaming response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Body, delivered chunk by chunk.
    pub chunks: Vec<Bytes>,
}

/// Mock HTTP transport for testing.
#[derive(Clone, Default)]
pub struct MockTransport {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockTransport {
    /// Creates a transport with no responses queued.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an SSE response; each string is delivered as one chunk.
    pub fn with_sse(self, chunks: &[&str]) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/event-stream".to_string());
        self.queue(MockResponse {
            status: 200,
            headers,
            chunks: chunks
                .iter()
                .map(|chunk| Bytes::copy_from_slice(chunk.as_bytes()))
                .collect(),
        });
        self
    }

    /// Queues a single-chunk response.
    pub fn with_response(self, status: u16, content_type: &str, body: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        self.queue(MockResponse {
            status,
            headers,
            chunks: vec![Bytes::copy_from_slice(body.as_bytes())],
        });
        self
    }

    /// Queues a response.
    pub fn queue(&self, response: MockResponse) {
        lock(&self.responses).push_back(response);
    }

    /// Gets all recorded requests.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        lock(&self.requests).push(request);

        let response = lock(&self.responses)
            .pop_front()
            .ok_or_else(|| TransportError::Connection {
                message: "no mock response queued".to_string(),
            })?;

        let chunks: Vec<Result<Bytes, TransportError>> =
            response.chunks.into_iter().map(Ok).collect();

        Ok(StreamingResponse {
            status: response.status,
            headers: response.headers,
            stream: Box::pin(futures::stream::iter(chunks)),
        })
    }
}

/// Auth provider that sets a fixed `Authorization` value.
#[derive(Debug, Clone)]
pub struct MockAuth {
    token: String,
}

impl MockAuth {
    /// Creates the provider.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl AuthProvider for MockAuth {
    fn apply_auth(&self, headers: &mut HashMap<String, String>) -> StoryResult<()> {
        headers.insert("Authorization".to_string(), self.token.clone());
        Ok(())
    }

    fn validate(&self) -> StoryResult<()> {
        Ok(())
    }
}

/// In-memory store whose writes can be switched to fail.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryGameStore,
    fail_writes: AtomicBool,
    write_attempts: AtomicUsize,
}

impl FailingStore {
    /// Creates a store that accepts writes until told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of create/save/reset calls, failed or not.
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn check_write(&self) -> StoryResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoryError::persistence("simulated write failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GameStore for FailingStore {
    async fn create(
        &self,
        seed: &GameSeed,
        history: &ConversationHistory,
        first_round: RoundRecord,
    ) -> StoryResult<GameState> {
        self.check_write()?;
        self.inner.create(seed, history, first_round).await
    }

    async fn load(&self, id: GameId) -> StoryResult<GameState> {
        self.inner.load(id).await
    }

    async fn save(
        &self,
        id: GameId,
        history: &ConversationHistory,
        rounds: &[RoundRecord],
        opening_len: usize,
    ) -> StoryResult<GameState> {
        self.check_write()?;
        self.inner.save(id, history, rounds, opening_len).await
    }

    async fn reset(&self, id: GameId) -> StoryResult<GameState> {
        self.check_write()?;
        self.inner.reset(id).await
    }
}
