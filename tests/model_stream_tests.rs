//! End-to-end tests for the ChatGLM client against a mock HTTP server.

use futures::StreamExt;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use story_stream::{
    ConversationHistory, GameSeed, GameService, GenerationConfig, GenerationEngine,
    MemoryGameStore, Message, ModelInvoker, OutputEvent, Protagonist, SamplingParams, StoryError,
    StreamEvent, Theme, ZhipuClient, ZhipuConfig,
};

const INVOKE_PATH: &str = "/model-api/chatglm_pro/sse-invoke";

fn client(server: &MockServer) -> ZhipuClient {
    let config = ZhipuConfig::builder()
        .api_key("test-id.test-secret")
        .base_url(server.uri())
        .build()
        .unwrap();
    ZhipuClient::from_config(&config).unwrap()
}

fn sse(events: &[(&str, &str)]) -> String {
    events
        .iter()
        .map(|(event, data)| format!("event: {event}\ndata: {data}\n\n"))
        .collect()
}

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/event-stream")
}

#[tokio::test]
async fn test_sse_invoke_streams_events() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(INVOKE_PATH))
        .and(header_exists("authorization"))
        .and(header("accept", "text/event-stream"))
        .respond_with(sse_response(sse(&[
            ("add", "从前"),
            ("add", "有座山"),
            ("finish", ""),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let prompt = ConversationHistory::from(vec![Message::user("讲个故事")]);
    let events: Vec<_> = client(&mock_server)
        .invoke(&prompt, &SamplingParams::default())
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Token("从前".to_string()),
            StreamEvent::Token("有座山".to_string()),
            StreamEvent::Finished { meta: None },
        ]
    );
}

#[tokio::test]
async fn test_request_body_carries_prompt_and_sampling() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(INVOKE_PATH))
        .respond_with(sse_response(sse(&[("finish", "")])))
        .mount(&mock_server)
        .await;

    let prompt = ConversationHistory::from(vec![
        Message::user("规则"),
        Message::assistant("好的"),
        Message::user("开始"),
    ]);
    let params = SamplingParams {
        temperature: 0.5,
        ..SamplingParams::default()
    };
    let _: Vec<_> = client(&mock_server)
        .invoke(&prompt, &params)
        .await
        .unwrap()
        .collect()
        .await;

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["prompt"].as_array().unwrap().len(), 3);
    assert_eq!(body["prompt"][1]["role"], "assistant");
    assert_eq!(body["prompt"][2]["content"], "开始");
    assert!((body["temperature"].as_f64().unwrap() - 0.5).abs() < 1e-6);

    let token = requests[0].headers.get("authorization").unwrap();
    assert_eq!(token.to_str().unwrap().split('.').count(), 3);
}

#[tokio::test]
async fn test_expired_token_is_authentication_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(INVOKE_PATH))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(serde_json::json!({"code": 1001, "msg": "token expired"})),
        )
        .mount(&mock_server)
        .await;

    let prompt = ConversationHistory::from(vec![Message::user("你好")]);
    let err = client(&mock_server)
        .invoke(&prompt, &SamplingParams::default())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, StoryError::Authentication { .. }));
    assert!(err.to_string().contains("token expired"));
}

#[tokio::test]
async fn test_server_error_keeps_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(INVOKE_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&mock_server)
        .await;

    let prompt = ConversationHistory::from(vec![Message::user("你好")]);
    let err = client(&mock_server)
        .invoke(&prompt, &SamplingParams::default())
        .await
        .err()
        .unwrap();

    assert!(matches!(
        err,
        StoryError::Network {
            status_code: Some(503),
            ..
        }
    ));
}

#[tokio::test]
async fn test_full_round_over_http() {
    let mock_server = MockServer::start().await;
    let reply = r#"{"round": "1", "chapter": "故事的开端", "content": "小兔走进森林", "choice": ["a.向左", "b.向右", "c.回家"]}"#;

    // Split the reply mid-marker so the decoder sees the field arrive in pieces.
    let (head, tail) = reply.split_at(reply.find("content").unwrap() + 4);
    Mock::given(method("POST"))
        .and(path(INVOKE_PATH))
        .respond_with(sse_response(sse(&[
            ("add", head),
            ("add", tail),
            ("finish", ""),
        ])))
        .mount(&mock_server)
        .await;

    let engine = GenerationEngine::new(Arc::new(client(&mock_server)), GenerationConfig::default());
    let service = GameService::new(engine, Arc::new(MemoryGameStore::new()));
    let seed = GameSeed {
        user_id: 1,
        theme: Theme {
            id: 1,
            theme: "森林".to_string(),
            description: "魔法森林探险".to_string(),
        },
        protagonist: Protagonist {
            id: 1,
            name: "小兔".to_string(),
            description: "勇敢的兔子".to_string(),
        },
    };

    let events: Vec<_> = service.start_game(seed).unwrap().collect().await;

    assert!(events
        .iter()
        .any(|event| matches!(event, OutputEvent::Partial(text) if text.starts_with("小兔"))));
    match events.last() {
        Some(OutputEvent::Complete(completion)) => {
            let game = completion.game.as_ref().unwrap();
            assert_eq!(game.rounds[0].content, "小兔走进森林");
            assert_eq!(game.history.last().unwrap().content, reply);
        }
        other => panic!("unexpected final event {other:?}"),
    }
}
