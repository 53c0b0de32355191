//! Events produced by a generation cycle and their wire encoding.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use super::ExtractionMode;
use crate::errors::{StoryError, StoryResult};
use crate::types::{ConversationHistory, GameState};

/// Content type of the streamed response body.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// The result of a finished cycle.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Mode the cycle ran in.
    pub mode: ExtractionMode,
    /// Parsed object; `Null` in raw-text mode.
    pub object: Value,
    /// Matched object text, or the whole reply in raw-text mode.
    pub text: String,
    /// History including the new assistant message.
    pub history: ConversationHistory,
    /// Persisted game, when a handler stored one.
    pub game: Option<GameState>,
}

/// One event in a cycle's output sequence.
#[derive(Debug)]
pub enum OutputEvent {
    /// In-progress text.
    Partial(String),
    /// The cycle finished.
    Complete(Box<Completion>),
    /// The cycle failed; nothing follows.
    Error(StoryError),
    /// The model sent an event tag this service ignores.
    Unknown(String),
}

impl OutputEvent {
    /// Returns true if this event ends the sequence.
    pub fn is_error(&self) -> bool {
        matches!(self, OutputEvent::Error(_))
    }

    /// Builds the wire frame for this event, if it has one.
    ///
    /// A structured completion that was not persisted has no frame; the
    /// error event that follows it reports the failure.
    pub fn frame(&self) -> Option<WireFrame<'_>> {
        match self {
            OutputEvent::Partial(content) => Some(WireFrame::Generate { content }),
            OutputEvent::Complete(completion) => match (&completion.game, completion.mode) {
                (Some(game), _) => Some(WireFrame::Finish {
                    game: Some(game),
                    content: None,
                }),
                (None, ExtractionMode::RawText) => Some(WireFrame::Finish {
                    game: None,
                    content: Some(&completion.text),
                }),
                (None, ExtractionMode::Structured) => None,
            },
            OutputEvent::Error(error) => Some(WireFrame::Error {
                kind: error.kind(),
                message: error.to_string(),
            }),
            OutputEvent::Unknown(event) => Some(WireFrame::Unknown { event }),
        }
    }

    /// Encodes this event as one newline-terminated JSON line.
    pub fn to_ndjson(&self) -> StoryResult<Option<Bytes>> {
        let Some(frame) = self.frame() else {
            return Ok(None);
        };
        let mut line = serde_json::to_vec(&frame)?;
        line.push(b'\n');
        Ok(Some(Bytes::from(line)))
    }
}

/// JSON frame sent to the client, tagged by `status`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WireFrame<'a> {
    /// In-progress content.
    Generate {
        /// Text so far.
        content: &'a str,
    },
    /// Cycle finished.
    Finish {
        /// The updated game.
        #[serde(skip_serializing_if = "Option::is_none")]
        game: Option<&'a GameState>,
        /// The full reply in raw-text mode.
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<&'a str>,
    },
    /// Cycle failed.
    Error {
        /// Error kind tag.
        kind: &'static str,
        /// Human-readable message.
        message: String,
    },
    /// Unhandled model event.
    Unknown {
        /// The model's event tag.
        event: &'a str,
    },
}
