//! Logging configuration and subscriber setup.

use regex::Regex;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive, e.g. `info` or `story_stream=debug,tower=warn`.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Include the event target (module path).
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    /// Creates a new log configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `STORY_LOG_LEVEL` (or `RUST_LOG`) and `STORY_LOG_JSON`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var("STORY_LOG_LEVEL").or_else(|_| std::env::var("RUST_LOG")) {
            config.filter = filter;
        }
        if let Ok(json) = std::env::var("STORY_LOG_JSON") {
            config.json = matches!(json.trim(), "1" | "true" | "yes");
        }
        config
    }

    /// Sets the filter directive.
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Enables JSON output.
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// Installs the global tracing subscriber.
///
/// Returns an error if the filter does not parse or a subscriber is already
/// installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_new(&config.filter)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_writer(std::io::stderr);

    if config.json {
        builder.json().try_init().map_err(Into::into)
    } else {
        builder.try_init().map_err(Into::into)
    }
}

fn redaction_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"Bearer [A-Za-z0-9_.\-]+", "Bearer ***"),
            (r"eyJ[A-Za-z0-9_\-]*\.[A-Za-z0-9_\-]*\.[A-Za-z0-9_\-]*", "***"),
            (r"(?i)api[_-]?key[=:]\s*[^\s,}]+", "api_key=***"),
            (r"(?i)authorization[=:]\s*[^\s,}]+", "authorization=***"),
            (r"postgres(ql)?://[^:/@\s]+:[^@\s]+@", "postgres://***@"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Redacts credentials from text before it is logged.
pub fn redact(text: &str) -> String {
    let mut result = text.to_string();
    for (re, replacement) in redaction_patterns() {
        result = re.replace_all(&result, *replacement).into_owned();
    }
    result
}

/// Shortens text for log fields, on a character boundary.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_bearer_and_tokens() {
        let redacted = redact("Authorization: Bearer abc.def-123");
        assert!(!redacted.contains("abc.def-123"));

        let redacted = redact("token eyJhbGci.eyJhcGlf.c2lnbmF0dXJl sent");
        assert!(!redacted.contains("c2lnbmF0dXJl"));
        assert!(redacted.ends_with("sent"));
    }

    #[test]
    fn test_redacts_database_password() {
        let redacted = redact("connecting to postgres://story:hunter2@db:5432/story");
        assert!(!redacted.contains("hunter2"));
        assert!(redacted.contains("db:5432"));
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(redact("小猫走进了森林"), "小猫走进了森林");
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("故事的开端", 2), "故事…");
        assert_eq!(truncate_for_log("short", 10), "short");
    }

    #[test]
    fn test_from_builder() {
        let config = LogConfig::new().filter("debug").json();
        assert_eq!(config.filter, "debug");
        assert!(config.json);
    }
}
