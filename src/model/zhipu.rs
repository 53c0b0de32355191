//! Zhipu ChatGLM streaming client.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::instrument;

use super::{EventStream, ModelInvoker, SamplingParams, StreamEvent};
use crate::auth::{AuthProvider, ZhipuTokenAuth};
use crate::config::ZhipuConfig;
use crate::errors::{StoryError, StoryResult};
use crate::observability::redact;
use crate::transport::{
    HttpRequest, HttpTransport, HttpTransportImpl, SseEvent, SseEventStream, StreamingResponse,
};
use crate::types::{ConversationHistory, Message};

/// Final path segment of the streaming endpoint, under `model-api/{model}/`.
pub const SSE_INVOKE_PATH: &str = "sse-invoke";

#[derive(Serialize)]
struct InvokeBody<'a> {
    prompt: &'a [Message],
    temperature: f32,
    top_p: f32,
    incremental: bool,
}

/// Client for the ChatGLM `sse-invoke` endpoint.
///
/// Each invocation spawns a reader task that decodes the SSE body and
/// publishes [`StreamEvent`]s on a channel. The task stops after the first
/// terminal event or as soon as the receiving side is dropped.
pub struct ZhipuClient {
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn AuthProvider>,
    model: String,
}

impl ZhipuClient {
    /// Creates a client over an explicit transport and auth provider.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        auth: Arc<dyn AuthProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            auth,
            model: model.into(),
        }
    }

    /// Creates a client backed by reqwest from the given configuration.
    pub fn from_config(config: &ZhipuConfig) -> StoryResult<Self> {
        let transport = HttpTransportImpl::new(config.base_url.clone(), config.timeout)
            .map_err(|e| StoryError::configuration(e.to_string()))?;
        let auth = ZhipuTokenAuth::new(config.api_key());
        auth.validate()?;

        Ok(Self::new(Arc::new(transport), Arc::new(auth), config.model.clone()))
    }

    /// Returns the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn invoke_path(&self) -> String {
        format!("model-api/{}/{}", self.model, SSE_INVOKE_PATH)
    }

    fn build_request(
        &self,
        prompt: &ConversationHistory,
        params: &SamplingParams,
    ) -> StoryResult<HttpRequest> {
        let body = serde_json::to_vec(&InvokeBody {
            prompt: prompt.messages(),
            temperature: params.temperature,
            top_p: params.top_p,
            incremental: params.incremental,
        })?;

        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Accept".to_string(), "text/event-stream".to_string());
        self.auth.apply_auth(&mut headers)?;

        let mut request = HttpRequest::post(self.invoke_path(), body);
        request.headers = headers;
        Ok(request)
    }

    /// Maps a rejected response to an error, reading the body for a message.
    async fn rejection(response: StreamingResponse) -> StoryError {
        let status = response.status;
        let mut body = Vec::new();
        let mut stream = response.stream;
        while let Some(Ok(chunk)) = stream.next().await {
            body.extend_from_slice(&chunk);
        }
        let message = rejection_message(&body).unwrap_or_else(|| format!("HTTP {}", status));

        match status {
            401 | 403 => StoryError::Authentication {
                message,
                api_key_hint: None,
            },
            200 => StoryError::model_stream(message),
            _ => StoryError::Network {
                message,
                status_code: Some(status),
            },
        }
    }
}

/// Pulls `msg` (or `message`) out of a JSON error body.
fn rejection_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let msg = value
        .get("msg")
        .or_else(|| value.get("message"))
        .and_then(|m| m.as_str())?;
    match value.get("code") {
        Some(code) => Some(format!("{} (code {})", msg, code)),
        None => Some(msg.to_string()),
    }
}

/// Maps one decoded SSE event onto the model event vocabulary.
pub(crate) fn to_stream_event(event: SseEvent) -> StreamEvent {
    match event.event.as_deref() {
        Some("add") => StreamEvent::Token(event.data),
        Some("finish") => StreamEvent::Finished {
            meta: event
                .meta
                .as_deref()
                .and_then(|meta| serde_json::from_str(meta).ok()),
        },
        Some("error") => StreamEvent::Error(event.data),
        Some("interrupted") => StreamEvent::Interrupted(event.data),
        Some(other) => StreamEvent::Unknown(other.to_string()),
        None => StreamEvent::Unknown("message".to_string()),
    }
}

async fn pump(mut events: SseEventStream, tx: mpsc::UnboundedSender<StreamEvent>) {
    let mut tokens = 0usize;

    while let Some(item) = events.next().await {
        let event = match item {
            Ok(sse) => to_stream_event(sse),
            Err(e) => StreamEvent::Error(e.to_string()),
        };

        if matches!(event, StreamEvent::Token(_)) {
            tokens += 1;
        }
        let terminal = event.is_terminal();

        if tx.send(event).is_err() {
            tracing::debug!(tokens, "Consumer dropped, abandoning model stream");
            return;
        }
        if terminal {
            tracing::debug!(tokens, "Model stream finished");
            return;
        }
    }

    tracing::warn!(tokens, "Model stream ended without a terminal event");
    let _ = tx.send(StreamEvent::Error(
        "model stream ended without a finish event".to_string(),
    ));
}

#[async_trait]
impl ModelInvoker for ZhipuClient {
    #[instrument(skip(self, prompt, params), fields(model = %self.model, messages = prompt.len()))]
    async fn invoke(
        &self,
        prompt: &ConversationHistory,
        params: &SamplingParams,
    ) -> StoryResult<EventStream> {
        let request = self.build_request(prompt, params)?;

        let response = self
            .transport
            .send_streaming(request)
            .await
            .map_err(|e| StoryError::Network {
                message: redact(&e.to_string()),
                status_code: None,
            })?;

        let is_json = response
            .headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case("content-type") && v.contains("application/json"));

        if response.status != 200 || is_json {
            let error = Self::rejection(response).await;
            tracing::warn!(kind = error.kind(), error = %error, "Model invocation rejected");
            return Err(error);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(SseEventStream::new(response), tx));

        Ok(Box::pin(async_stream::stream! {
            while let Some(event) = rx.recv().await {
                yield event;
            }
        }))
    }
}

impl std::fmt::Debug for ZhipuClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZhipuClient")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockAuth, MockTransport};
    use pretty_assertions::assert_eq;

    fn make_client(transport: MockTransport) -> (ZhipuClient, MockTransport) {
        let client = ZhipuClient::new(
            Arc::new(transport.clone()),
            Arc::new(MockAuth::new("test-token")),
            "chatglm_pro",
        );
        (client, transport)
    }

    fn history() -> ConversationHistory {
        ConversationHistory::from(vec![Message::user("你好")])
    }

    #[tokio::test]
    async fn test_request_shape() {
        let (client, transport) = make_client(MockTransport::new().with_sse(&["event: finish\ndata: \n\n"]));

        let stream = client
            .invoke(&history(), &SamplingParams::default())
            .await
            .unwrap();
        let _: Vec<_> = stream.collect().await;

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "model-api/chatglm_pro/sse-invoke");
        assert_eq!(requests[0].headers.get("Authorization").unwrap(), "test-token");

        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["prompt"][0]["role"], "user");
        assert_eq!(body["prompt"][0]["content"], "你好");
        assert_eq!(body["incremental"], true);
        assert!((body["temperature"].as_f64().unwrap() - 0.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let (client, _) = make_client(MockTransport::new().with_sse(&[
            "event: add\ndata: 从前\n\n",
            "event: ping\ndata: \n\nevent: add\ndata: 有座山\n\n",
            "event: finish\ndata: \nmeta: {\"usage\":{\"total_tokens\":12}}\n\n",
            "event: add\ndata: ignored\n\n",
        ]));

        let events: Vec<_> = client
            .invoke(&history(), &SamplingParams::default())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Token("从前".to_string()),
                StreamEvent::Unknown("ping".to_string()),
                StreamEvent::Token("有座山".to_string()),
                StreamEvent::Finished {
                    meta: Some(serde_json::json!({"usage": {"total_tokens": 12}}))
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_terminal_becomes_error() {
        let (client, _) = make_client(MockTransport::new().with_sse(&["event: add\ndata: 半句\n\n"]));

        let events: Vec<_> = client
            .invoke(&history(), &SamplingParams::default())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], StreamEvent::Error(_)));
    }

    #[tokio::test]
    async fn test_interrupted_is_terminal() {
        let (client, _) = make_client(MockTransport::new().with_sse(&[
            "event: interrupted\ndata: sensitive content\n\nevent: add\ndata: x\n\n",
        ]));

        let events: Vec<_> = client
            .invoke(&history(), &SamplingParams::default())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            events,
            vec![StreamEvent::Interrupted("sensitive content".to_string())]
        );
    }

    #[tokio::test]
    async fn test_status_rejections() {
        let (client, _) = make_client(MockTransport::new().with_response(
            401,
            "application/json",
            r#"{"code":1002,"msg":"token expired"}"#,
        ));
        let err = client
            .invoke(&history(), &SamplingParams::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "authentication");
        assert!(err.to_string().contains("token expired"));

        let (client, _) = make_client(MockTransport::new().with_response(500, "text/plain", "oops"));
        let err = client
            .invoke(&history(), &SamplingParams::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StoryError::Network {
                status_code: Some(500),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_json_body_with_ok_status_is_rejected() {
        let (client, _) = make_client(MockTransport::new().with_response(
            200,
            "application/json; charset=UTF-8",
            r#"{"code":1261,"msg":"prompt too long","success":false}"#,
        ));

        let err = client
            .invoke(&history(), &SamplingParams::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "model_stream");
    }

    #[test]
    fn test_unnamed_event_is_unknown() {
        let event = SseEvent {
            data: "x".to_string(),
            ..SseEvent::default()
        };
        assert_eq!(to_stream_event(event), StreamEvent::Unknown("message".to_string()));
    }
}
