//! Streaming generation engine.
//!
//! A cycle sends the history to the model, forwards the in-progress `content`
//! field while tokens arrive, and on `finish` extracts the reply object and
//! hands it to a [`CompletionHandler`]. Every cycle ends with exactly one
//! `Complete` (possibly followed by a persistence error) or one `Error`.

mod handler;
mod output;

pub use handler::{AppendRound, CompletionHandler, CreateGame, ReplaceRound};
pub use output::{Completion, OutputEvent, WireFrame, NDJSON_CONTENT_TYPE};

use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::GenerationConfig;
use crate::errors::StoryError;
use crate::extraction::{extract_object, ExtractionState};
use crate::model::{ModelInvoker, StreamEvent};
use crate::observability::{
    truncate_for_log, CycleOutcome, CycleTimer, MetricsCollector, NoopMetricsCollector,
};
use crate::types::{ConversationHistory, Message};

/// Boxed stream of cycle output.
pub type OutputStream = Pin<Box<dyn Stream<Item = OutputEvent> + Send>>;

/// How the reply is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Forward the `content` field and parse a JSON object at the end.
    Structured,
    /// Forward the whole reply so far; no parsing, no persistence.
    RawText,
}

impl ExtractionMode {
    /// Short tag for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionMode::Structured => "structured",
            ExtractionMode::RawText => "raw_text",
        }
    }
}

/// Records the cycle outcome once, or `Abandoned` if the stream is dropped
/// before a terminal event.
struct CycleRecorder {
    metrics: Arc<dyn MetricsCollector>,
    timer: CycleTimer,
    recorded: bool,
}

impl CycleRecorder {
    fn new(metrics: Arc<dyn MetricsCollector>, operation: &'static str) -> Self {
        Self {
            metrics,
            timer: CycleTimer::start(operation),
            recorded: false,
        }
    }

    fn finish(&mut self, outcome: CycleOutcome) {
        if !self.recorded {
            self.recorded = true;
            self.metrics
                .record_cycle(self.timer.operation(), outcome, self.timer.elapsed());
        }
    }
}

impl Drop for CycleRecorder {
    fn drop(&mut self) {
        if !self.recorded {
            tracing::debug!(operation = self.timer.operation(), "Cycle abandoned by consumer");
            self.finish(CycleOutcome::Abandoned);
        }
    }
}

/// Runs generation cycles against a model.
#[derive(Clone)]
pub struct GenerationEngine {
    model: Arc<dyn ModelInvoker>,
    config: GenerationConfig,
    metrics: Arc<dyn MetricsCollector>,
}

impl GenerationEngine {
    /// Creates an engine without metrics.
    pub fn new(model: Arc<dyn ModelInvoker>, config: GenerationConfig) -> Self {
        Self {
            model,
            config,
            metrics: Arc::new(NoopMetricsCollector),
        }
    }

    /// Sets the metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the generation settings.
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Runs one cycle.
    ///
    /// `history` is not modified; the completed history is carried in the
    /// `Complete` event. In structured mode without a handler the cycle
    /// completes with no game.
    pub fn run_cycle(
        &self,
        history: ConversationHistory,
        new_message: Option<Message>,
        mode: ExtractionMode,
        handler: Option<Arc<dyn CompletionHandler>>,
    ) -> OutputStream {
        let model = Arc::clone(&self.model);
        let metrics = Arc::clone(&self.metrics);
        let config = self.config;
        let operation = match (&handler, mode) {
            (Some(handler), _) => handler.operation(),
            (None, ExtractionMode::RawText) => "evaluate_article",
            (None, ExtractionMode::Structured) => "structured",
        };

        Box::pin(async_stream::stream! {
            let mut recorder = CycleRecorder::new(Arc::clone(&metrics), operation);

            let mut working = history;
            if let Some(message) = new_message {
                working.push(message);
            }
            tracing::debug!(operation, mode = mode.as_str(), messages = working.len(), "Cycle started");

            let mut events = match model.invoke(&working, &config.sampling).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(operation, error = %e, "Model invocation failed");
                    let error = StoryError::model_stream(e.to_string());
                    recorder.finish(CycleOutcome::Failed(error.kind()));
                    yield OutputEvent::Error(error);
                    return;
                }
            };

            let mut state = ExtractionState::new();
            let mut tokens = 0usize;

            while let Some(event) = events.next().await {
                match event {
                    StreamEvent::Token(token) => {
                        tokens += 1;
                        let partial = match mode {
                            ExtractionMode::Structured => state.push_token(&token).map(str::to_string),
                            ExtractionMode::RawText => Some(state.push_raw(&token).to_string()),
                        };
                        if let Some(partial) = partial {
                            metrics.record_partial();
                            yield OutputEvent::Partial(partial);
                        }
                    }
                    StreamEvent::Finished { meta } => {
                        tracing::debug!(operation, tokens, meta = ?meta, "Model finished");
                        let (outputs, outcome) =
                            finish(state.into_text(), working, mode, handler.as_deref(), &config).await;
                        recorder.finish(outcome);
                        for output in outputs {
                            yield output;
                        }
                        return;
                    }
                    StreamEvent::Error(message) => {
                        tracing::warn!(operation, tokens, %message, "Model reported an error");
                        let error = StoryError::model_stream(message);
                        recorder.finish(CycleOutcome::Failed(error.kind()));
                        yield OutputEvent::Error(error);
                        return;
                    }
                    StreamEvent::Interrupted(message) => {
                        tracing::warn!(operation, tokens, %message, "Model interrupted generation");
                        let error = StoryError::ModelStream { message, interrupted: true };
                        recorder.finish(CycleOutcome::Failed(error.kind()));
                        yield OutputEvent::Error(error);
                        return;
                    }
                    StreamEvent::Unknown(tag) => {
                        tracing::debug!(operation, %tag, "Unknown model event");
                        metrics.record_unknown_event(&tag);
                        yield OutputEvent::Unknown(tag);
                    }
                }
            }

            let error = StoryError::model_stream("model stream ended without a finish event");
            recorder.finish(CycleOutcome::Failed(error.kind()));
            yield OutputEvent::Error(error);
        })
    }
}

/// Turns the finished reply into the cycle's final events.
async fn finish(
    text: String,
    mut history: ConversationHistory,
    mode: ExtractionMode,
    handler: Option<&dyn CompletionHandler>,
    config: &GenerationConfig,
) -> (Vec<OutputEvent>, CycleOutcome) {
    if mode == ExtractionMode::RawText {
        history.push(Message::assistant(text.clone()));
        let completion = Completion {
            mode,
            object: Value::Null,
            text,
            history,
            game: None,
        };
        return (
            vec![OutputEvent::Complete(Box::new(completion))],
            CycleOutcome::Completed,
        );
    }

    let extracted = match extract_object(&text, config.object_match) {
        Ok(extracted) => extracted,
        Err(e) => {
            tracing::warn!(
                kind = e.kind(),
                reply = %truncate_for_log(&text, 200),
                "Reply object could not be extracted"
            );
            let outcome = CycleOutcome::Failed(e.kind());
            return (vec![OutputEvent::Error(e)], outcome);
        }
    };

    history.push(Message::assistant(extracted.text.clone()));

    let mut completion = Completion {
        mode,
        object: extracted.value,
        text: extracted.text,
        history,
        game: None,
    };

    let Some(handler) = handler else {
        return (
            vec![OutputEvent::Complete(Box::new(completion))],
            CycleOutcome::Completed,
        );
    };

    match handler.on_complete(&completion.object, &completion.history).await {
        Ok(game) => {
            completion.game = Some(game);
            (
                vec![OutputEvent::Complete(Box::new(completion))],
                CycleOutcome::Completed,
            )
        }
        Err(e) => {
            tracing::error!(operation = handler.operation(), error = %e, "Failed to persist round");
            let error = match e {
                StoryError::Persistence { .. } => e,
                other => StoryError::persistence(other.to_string()),
            };
            let outcome = CycleOutcome::Failed(error.kind());
            (
                vec![
                    OutputEvent::Complete(Box::new(completion)),
                    OutputEvent::Error(error),
                ],
                outcome,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ObjectMatch;
    use crate::mocks::ScriptedModel;
    use crate::observability::DefaultMetricsCollector;

    fn engine(model: ScriptedModel) -> (GenerationEngine, Arc<DefaultMetricsCollector>) {
        let metrics = Arc::new(DefaultMetricsCollector::new());
        let engine = GenerationEngine::new(Arc::new(model), GenerationConfig::default())
            .with_metrics(metrics.clone());
        (engine, metrics)
    }

    async fn collect(stream: OutputStream) -> Vec<OutputEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_partial_after_marker() {
        let model = ScriptedModel::new();
        model.push_events(vec![
            StreamEvent::Token("Hello ".to_string()),
            StreamEvent::Token("\"content\": \"It was".to_string()),
            StreamEvent::Token(" a dark night".to_string()),
            StreamEvent::Error("cut off".to_string()),
        ]);
        let (engine, _) = engine(model);

        let events = collect(engine.run_cycle(
            ConversationHistory::new(),
            Some(Message::user("go")),
            ExtractionMode::Structured,
            None,
        ))
        .await;

        let partials: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                OutputEvent::Partial(p) => Some(p.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(partials, vec!["It was", "It was a dark night"]);
        assert!(events.last().unwrap().is_error());
    }

    #[tokio::test]
    async fn test_raw_text_forwards_accumulator() {
        let model = ScriptedModel::new();
        model.push_reply_in_chunks("评分：A。", 2);
        let (engine, metrics) = engine(model);

        let events = collect(engine.run_cycle(
            ConversationHistory::new(),
            Some(Message::user("文章")),
            ExtractionMode::RawText,
            None,
        ))
        .await;

        match events.last().unwrap() {
            OutputEvent::Complete(completion) => {
                assert_eq!(completion.text, "评分：A。");
                assert_eq!(completion.history.len(), 2);
                assert!(completion.object.is_null());
            }
            other => panic!("unexpected event {:?}", other),
        }
        match &events[events.len() - 2] {
            OutputEvent::Partial(text) => assert_eq!(text, "评分：A。"),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(metrics.snapshot().completed_cycles, 1);
    }

    #[tokio::test]
    async fn test_invocation_failure_is_one_error() {
        let model = ScriptedModel::new();
        model.push_failure("connection refused");
        let (engine, metrics) = engine(model);

        let events = collect(engine.run_cycle(
            ConversationHistory::new(),
            None,
            ExtractionMode::Structured,
            None,
        ))
        .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], OutputEvent::Error(StoryError::ModelStream { .. })));
        assert_eq!(metrics.snapshot().errors.get("model_stream"), Some(&1));
    }

    #[tokio::test]
    async fn test_dropped_stream_counts_as_abandoned() {
        let model = ScriptedModel::new();
        model.push_events(vec![
            StreamEvent::Token("{\"content\": \"a".to_string()),
            StreamEvent::Token("b".to_string()),
        ]);
        let (engine, metrics) = engine(model);

        let mut stream = engine.run_cycle(
            ConversationHistory::new(),
            None,
            ExtractionMode::Structured,
            None,
        );
        assert!(matches!(stream.next().await, Some(OutputEvent::Partial(_))));
        drop(stream);

        assert_eq!(metrics.snapshot().abandoned_cycles, 1);
    }

    #[tokio::test]
    async fn test_balanced_mode_keeps_nested_braces() {
        let model = ScriptedModel::new();
        model.push_reply_in_chunks(
            r#"{"content": "a {b} c", "choice": ["x", "y", "z"]}"#,
            5,
        );
        let config = GenerationConfig {
            object_match: ObjectMatch::Balanced,
            ..GenerationConfig::default()
        };
        let engine = GenerationEngine::new(Arc::new(model), config);

        let events = collect(engine.run_cycle(
            ConversationHistory::new(),
            None,
            ExtractionMode::Structured,
            None,
        ))
        .await;

        match events.last().unwrap() {
            OutputEvent::Complete(completion) => {
                assert_eq!(completion.object["content"], "a {b} c");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
