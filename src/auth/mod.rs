//! Authentication for the model service.
//!
//! Zhipu API keys have the form `{id}.{secret}`. Each request carries a
//! short-lived HS256 token signed with the secret. The token header carries a
//! non-standard `sign_type` field, so it is assembled by hand.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::{StoryError, StoryResult};

type HmacSha256 = Hmac<Sha256>;

/// Default lifetime of a signed token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);

/// Authentication provider trait.
pub trait AuthProvider: Send + Sync {
    /// Apply authentication to request headers.
    fn apply_auth(&self, headers: &mut HashMap<String, String>) -> StoryResult<()>;

    /// Validate the credentials.
    fn validate(&self) -> StoryResult<()>;
}

/// Signs per-request tokens from an `id.secret` API key.
pub struct ZhipuTokenAuth {
    api_key: SecretString,
    ttl: Duration,
}

impl ZhipuTokenAuth {
    /// Creates a new provider.
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            ttl: DEFAULT_TOKEN_TTL,
        }
    }

    /// Sets the token lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Gets a hint of the API key for debugging (last 4 characters).
    pub fn key_hint(&self) -> String {
        let key = self.api_key.expose_secret();
        let count = key.chars().count();
        if count > 4 {
            format!("...{}", key.chars().skip(count - 4).collect::<String>())
        } else {
            "****".to_string()
        }
    }

    fn split_key(&self) -> StoryResult<(&str, &str)> {
        self.api_key
            .expose_secret()
            .split_once('.')
            .filter(|(id, secret)| !id.is_empty() && !secret.is_empty())
            .ok_or_else(|| StoryError::Authentication {
                message: "API key must have the form {id}.{secret}".to_string(),
                api_key_hint: Some(self.key_hint()),
            })
    }

    /// Signs a token valid from `now_ms` for the configured TTL.
    pub fn sign_token(&self, now_ms: i64) -> StoryResult<String> {
        let (id, secret) = self.split_key()?;

        let header = serde_json::json!({"alg": "HS256", "sign_type": "SIGN"});
        let payload = serde_json::json!({
            "api_key": id,
            "exp": now_ms + self.ttl.as_millis() as i64,
            "timestamp": now_ms,
        });

        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?)
        );

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| {
            StoryError::Authentication {
                message: format!("Cannot key HMAC: {}", e),
                api_key_hint: Some(self.key_hint()),
            }
        })?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{}.{}", signing_input, signature))
    }
}

impl AuthProvider for ZhipuTokenAuth {
    fn apply_auth(&self, headers: &mut HashMap<String, String>) -> StoryResult<()> {
        let token = self.sign_token(chrono::Utc::now().timestamp_millis())?;
        headers.insert("Authorization".to_string(), token);
        Ok(())
    }

    fn validate(&self) -> StoryResult<()> {
        self.split_key().map(|_| ())
    }
}

impl std::fmt::Debug for ZhipuTokenAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZhipuTokenAuth")
            .field("api_key", &"[REDACTED]")
            .field("ttl", &self.ttl)
            .finish()
    }
}
