//! Incremental field detection and final object extraction.
//!
//! [`ExtractionState`] carries everything the engine needs between tokens:
//! the accumulated text, where the `content` field opened, and whether it has
//! closed. [`extract_object`] pulls the first brace-delimited object out of the
//! finished text.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

use crate::errors::{StoryError, StoryResult};

/// Opening of the JSON `content` field in the model's reply.
pub const CONTENT_MARKER: &str = "\"content\": \"";

/// How the final object is located in the completed text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectMatch {
    /// Leftmost `{` up to the first `}` after it, across newlines.
    ///
    /// No depth counting: a `}` inside a string value or a nested object ends
    /// the match early.
    #[default]
    FirstNonGreedy,
    /// First complete top-level object, counting depth and skipping braces
    /// inside string literals.
    Balanced,
}

impl ObjectMatch {
    /// Parses the configuration spelling.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "first_non_greedy" | "non_greedy" | "lenient" => Some(Self::FirstNonGreedy),
            "balanced" | "strict" => Some(Self::Balanced),
            _ => None,
        }
    }
}

/// Accumulation state for one generation cycle.
#[derive(Debug, Clone, Default)]
pub struct ExtractionState {
    accumulator: String,
    /// Byte offset just past the first marker.
    marker_at: Option<usize>,
    /// Byte offset up to which the open field has been scanned for a quote.
    scanned_to: usize,
    field_closed: bool,
}

impl ExtractionState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a token and returns the in-progress `content` text, if the
    /// field is open and still unterminated.
    pub fn push_token(&mut self, token: &str) -> Option<&str> {
        self.accumulator.push_str(token);

        if self.field_closed {
            return None;
        }

        let start = match self.marker_at {
            Some(start) => start,
            None => {
                let found = self.accumulator.find(CONTENT_MARKER)?;
                let start = found + CONTENT_MARKER.len();
                self.marker_at = Some(start);
                self.scanned_to = start;
                start
            }
        };

        // Backslash runs are counted backwards from each quote, so resuming
        // mid-field still sees escapes that straddle tokens.
        let resume = self.scanned_to.max(start);
        if let Some(close) = find_unescaped_quote(&self.accumulator, start, resume) {
            tracing::trace!(close, "content field closed");
            self.field_closed = true;
            return None;
        }
        self.scanned_to = self.accumulator.len();

        Some(&self.accumulator[start..])
    }

    /// Appends a token without looking for the field.
    pub fn push_raw(&mut self, token: &str) -> &str {
        self.accumulator.push_str(token);
        &self.accumulator
    }

    /// Text accumulated so far.
    pub fn accumulator(&self) -> &str {
        &self.accumulator
    }

    /// Whether the `content` marker has been seen.
    pub fn marker_found(&self) -> bool {
        self.marker_at.is_some()
    }

    /// Whether the `content` field has closed.
    pub fn field_closed(&self) -> bool {
        self.field_closed
    }

    /// Consumes the state, returning the accumulated text.
    pub fn into_text(self) -> String {
        self.accumulator
    }
}

/// Finds the first `"` at or after `from` (and after `field_start`) that is not
/// escaped by an odd run of backslashes.
fn find_unescaped_quote(text: &str, field_start: usize, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            let mut backslashes = 0;
            let mut j = i;
            while j > field_start && bytes[j - 1] == b'\\' {
                backslashes += 1;
                j -= 1;
            }
            if backslashes % 2 == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

#[allow(clippy::unwrap_used)]
fn non_greedy_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{.*?\}").unwrap())
}

/// Locates the first object in `text` according to `mode`.
pub fn find_object(text: &str, mode: ObjectMatch) -> Option<&str> {
    match mode {
        ObjectMatch::FirstNonGreedy => non_greedy_pattern().find(text).map(|m| m.as_str()),
        ObjectMatch::Balanced => find_balanced(text),
    }
}

fn find_balanced(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    // A `{` that never balances is skipped and the scan restarts after it.
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start..=i]);
                    }
                }
                _ => {}
            }
        }
        search_from = start + 1;
    }
    None
}

/// An object extracted from completed model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedObject {
    /// The matched text, exactly as the model produced it.
    pub text: String,
    /// The parsed value.
    pub value: Value,
}

/// Extracts and parses the first object in `text`.
///
/// Pure function of its input: the same text always yields the same result.
pub fn extract_object(text: &str, mode: ObjectMatch) -> StoryResult<ExtractedObject> {
    let matched = find_object(text, mode).ok_or_else(|| StoryError::Extraction {
        message: "no brace-delimited object in model output".to_string(),
        text_len: text.len(),
    })?;

    let value = serde_json::from_str(matched).map_err(|e| StoryError::Parse {
        message: e.to_string(),
        fragment: matched.to_string(),
    })?;

    Ok(ExtractedObject {
        text: matched.to_string(),
        value,
    })
}
