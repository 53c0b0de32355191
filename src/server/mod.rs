//! HTTP boundary.
//!
//! Streaming routes answer with newline-delimited JSON frames, one per
//! engine event. Failures detected before a cycle starts (unknown game,
//! finished game, empty input) are plain JSON errors with a status code.

use axum::body::Body;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::{Deserialize, Deserializer};
use std::convert::Infallible;
use std::sync::Arc;

use crate::engine::{OutputStream, NDJSON_CONTENT_TYPE};
use crate::errors::StoryError;
use crate::game::GameService;
use crate::observability::{CycleMetrics, MetricsCollector};
use crate::types::{GameId, GameSeed, GameState, Protagonist, Theme};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    service: Arc<GameService>,
    metrics: Arc<dyn MetricsCollector>,
}

impl AppState {
    /// Creates the state.
    pub fn new(service: Arc<GameService>, metrics: Arc<dyn MetricsCollector>) -> Self {
        Self { service, metrics }
    }
}

/// Error returned by non-streaming paths.
#[derive(Debug)]
pub struct ApiError(StoryError);

impl From<StoryError> for ApiError {
    fn from(err: StoryError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(StoryError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(StoryError::validation(rejection.body_text()))
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            StoryError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoryError::GameOver { .. } => StatusCode::CONFLICT,
            StoryError::Validation { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = self.0.kind(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(kind = self.0.kind(), error = %self.0, "Request rejected");
        }
        (
            status,
            Json(serde_json::json!({ "error": self.0.to_string(), "kind": self.0.kind() })),
        )
            .into_response()
    }
}

/// Accepts an id sent either as a number or as a numeric string.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<GameId, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(GameId),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(id) => Ok(id),
        Raw::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct GeneratePlotRequest {
    #[serde(deserialize_with = "lenient_id")]
    user_id: i64,
    theme: Theme,
    protagonist: Protagonist,
}

#[derive(Debug, Deserialize)]
struct SubmitAnswerRequest {
    #[serde(deserialize_with = "lenient_id")]
    id: GameId,
    choice: String,
}

#[derive(Debug, Deserialize)]
struct CreateChoiceRequest {
    #[serde(deserialize_with = "lenient_id")]
    game_id: GameId,
    choice: String,
}

#[derive(Debug, Deserialize)]
struct RefreshPlotRequest {
    #[serde(deserialize_with = "lenient_id")]
    game_id: GameId,
}

#[derive(Debug, Deserialize)]
struct ArticleRequest {
    article: String,
}

#[derive(Debug, Deserialize)]
struct GameDataQuery {
    id: GameId,
}

#[derive(Debug, Deserialize)]
struct ResetQuery {
    game_id: GameId,
}

/// Wraps engine output as an NDJSON response body.
fn ndjson(stream: OutputStream) -> Response {
    let body = stream.filter_map(|event| async move {
        match event.to_ndjson() {
            Ok(line) => line.map(Ok::<_, Infallible>),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping frame that failed to encode");
                None
            }
        }
    });

    (
        [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(body),
    )
        .into_response()
}

async fn generate_plot(
    State(state): State<AppState>,
    request: Result<Json<GeneratePlotRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = request?;
    let seed = GameSeed {
        user_id: request.user_id,
        theme: request.theme,
        protagonist: request.protagonist,
    };
    Ok(ndjson(state.service.start_game(seed)?))
}

async fn submit_answer(
    State(state): State<AppState>,
    request: Result<Json<SubmitAnswerRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = request?;
    let stream = state
        .service
        .submit_choice(request.id, &request.choice)
        .await?;
    Ok(ndjson(stream))
}

async fn create_choice(
    State(state): State<AppState>,
    request: Result<Json<CreateChoiceRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = request?;
    let stream = state
        .service
        .submit_custom_choice(request.game_id, &request.choice)
        .await?;
    Ok(ndjson(stream))
}

async fn refresh_plot(
    State(state): State<AppState>,
    request: Result<Json<RefreshPlotRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = request?;
    Ok(ndjson(state.service.reroll_round(request.game_id).await?))
}

async fn evaluate_article(
    State(state): State<AppState>,
    request: Result<Json<ArticleRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = request?;
    Ok(ndjson(state.service.evaluate_article(&request.article)?))
}

async fn game_data(
    State(state): State<AppState>,
    query: Result<Query<GameDataQuery>, QueryRejection>,
) -> Result<Json<GameState>, ApiError> {
    let Query(query) = query?;
    Ok(Json(state.service.load_game(query.id).await?))
}

async fn reset_story(
    State(state): State<AppState>,
    query: Result<Query<ResetQuery>, QueryRejection>,
) -> Result<Json<GameState>, ApiError> {
    let Query(query) = query?;
    Ok(Json(state.service.reset_game(query.game_id).await?))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics(State(state): State<AppState>) -> Json<CycleMetrics> {
    Json(state.metrics.snapshot())
}

/// Builds the router with every route.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/generatePlot", post(generate_plot))
        .route("/submitAnswerStream", post(submit_answer))
        .route("/createChoiceStream", post(create_choice))
        .route("/refreshPlotStream", post(refresh_plot))
        .route("/testArticleEvaluate", post(evaluate_article))
        .route("/getGameData", get(game_data))
        .route("/resetStory", get(reset_story))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}
