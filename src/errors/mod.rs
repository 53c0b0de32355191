//! Error types for the story backend.
//!
//! One taxonomy covers configuration, the model transport, the four
//! generation-cycle failures (model stream, extraction, parse, persistence)
//! and the game-level rejections surfaced by the HTTP boundary.

use thiserror::Error;

/// Result type alias for story operations.
pub type StoryResult<T> = Result<T, StoryError>;

/// Error type for all story backend operations.
#[derive(Debug, Error)]
pub enum StoryError {
    /// Configuration error (missing API key, bad base URL, etc.)
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue.
        message: String,
    },

    /// Authentication error (malformed API key, rejected token).
    #[error("Authentication failed: {message}")]
    Authentication {
        /// Error message.
        message: String,
        /// Hint about the API key (last 4 chars).
        api_key_hint: Option<String>,
    },

    /// Network/connection error while talking to the model service.
    #[error("Network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// HTTP status code, when the server answered.
        status_code: Option<u16>,
    },

    /// The model stream reported an error or was interrupted.
    #[error("Model stream error: {message}")]
    ModelStream {
        /// Error message.
        message: String,
        /// Whether the model reported an interruption rather than an error.
        interrupted: bool,
    },

    /// No brace-delimited object was found in the completed text.
    #[error("Extraction error: {message}")]
    Extraction {
        /// Error message.
        message: String,
        /// Length of the text that was searched.
        text_len: usize,
    },

    /// The extracted text is not valid JSON.
    #[error("Parse error: {message}")]
    Parse {
        /// Error message.
        message: String,
        /// The text that failed to parse.
        fragment: String,
    },

    /// The store failed to persist or load game state.
    #[error("Persistence error: {message}")]
    Persistence {
        /// Error message.
        message: String,
    },

    /// The requested game does not exist.
    #[error("Game {game_id} not found")]
    NotFound {
        /// The missing game id.
        game_id: i64,
    },

    /// The game has no further round to play (or none to regenerate).
    #[error("Game {game_id} cannot advance: {message}")]
    GameOver {
        /// The game id.
        game_id: i64,
        /// Why the game cannot advance.
        message: String,
    },

    /// Request validation error.
    #[error("Validation error: {message}")]
    Validation {
        /// Error message.
        message: String,
        /// The parameter that caused the error.
        param: Option<String>,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },
}

impl StoryError {
    /// Stable snake_case tag for this error, used in wire frames and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StoryError::Configuration { .. } => "configuration",
            StoryError::Authentication { .. } => "authentication",
            StoryError::Network { .. } => "network",
            StoryError::ModelStream { .. } => "model_stream",
            StoryError::Extraction { .. } => "extraction",
            StoryError::Parse { .. } => "parse",
            StoryError::Persistence { .. } => "persistence",
            StoryError::NotFound { .. } => "not_found",
            StoryError::GameOver { .. } => "game_over",
            StoryError::Validation { .. } => "validation",
            StoryError::Serialization { .. } => "serialization",
        }
    }

    /// Returns true for the failures that end a generation cycle.
    pub fn is_cycle_failure(&self) -> bool {
        matches!(
            self,
            StoryError::ModelStream { .. }
                | StoryError::Network { .. }
                | StoryError::Authentication { .. }
                | StoryError::Extraction { .. }
                | StoryError::Parse { .. }
                | StoryError::Persistence { .. }
        )
    }

    /// Creates a model stream error.
    pub fn model_stream(message: impl Into<String>) -> Self {
        StoryError::ModelStream {
            message: message.into(),
            interrupted: false,
        }
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        StoryError::Persistence {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        StoryError::Validation {
            message: message.into(),
            param: None,
        }
    }

    /// Creates a validation error with parameter.
    pub fn validation_param(message: impl Into<String>, param: impl Into<String>) -> Self {
        StoryError::Validation {
            message: message.into(),
            param: Some(param.into()),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        StoryError::Configuration {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for StoryError {
    fn from(err: reqwest::Error) -> Self {
        StoryError::Network {
            status_code: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoryError {
    fn from(err: serde_json::Error) -> Self {
        StoryError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for StoryError {
    fn from(err: url::ParseError) -> Self {
        StoryError::Configuration {
            message: format!("Invalid URL: {}", err),
        }
    }
}

impl From<tokio_postgres::Error> for StoryError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoryError::Persistence {
            message: err.to_string(),
        }
    }
}

impl From<deadpool_postgres::PoolError> for StoryError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        StoryError::Persistence {
            message: format!("Pool error: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_failures() {
        assert!(StoryError::model_stream("boom").is_cycle_failure());
        assert!(StoryError::persistence("disk full").is_cycle_failure());
        assert!(StoryError::Extraction {
            message: "no object".to_string(),
            text_len: 0,
        }
        .is_cycle_failure());

        assert!(!StoryError::NotFound { game_id: 7 }.is_cycle_failure());
        assert!(!StoryError::validation("bad").is_cycle_failure());
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(StoryError::model_stream("x").kind(), "model_stream");
        assert_eq!(
            StoryError::Parse {
                message: "x".to_string(),
                fragment: "{".to_string(),
            }
            .kind(),
            "parse"
        );
        assert_eq!(StoryError::NotFound { game_id: 1 }.kind(), "not_found");
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let converted: StoryError = err.into();
        assert_eq!(converted.kind(), "serialization");
    }

    #[test]
    fn test_display_includes_game_id() {
        let error = StoryError::GameOver {
            game_id: 42,
            message: "all 8 rounds played".to_string(),
        };
        assert!(error.to_string().contains("42"));
    }
}
