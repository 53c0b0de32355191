//! HTTP transport layer for the model client.
//!
//! Provides the transport abstraction used to open streaming requests and the
//! server-sent-event parsing that turns a byte stream into events.

mod http;
mod streaming;

pub use http::{HttpRequest, HttpTransport, HttpTransportImpl};
pub use streaming::{SseEvent, SseEventStream, SseParser, StreamingResponse};

use std::time::Duration;

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection error.
    #[error("Connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
    },

    /// Timeout error.
    #[error("Timeout after {timeout:?}")]
    Timeout {
        /// Timeout duration.
        timeout: Duration,
    },

    /// Invalid response.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Error message.
        message: String,
    },
}
