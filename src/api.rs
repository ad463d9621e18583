//! REST endpoints for managing subscriptions and inspecting the service.
//!
//! The chat platform's own command front end is out of scope; follow,
//! unfollow and list are exposed here instead. Handlers mutate the
//! subscription index directly and may run concurrently with an in-progress
//! update cycle — each mutation is one short critical section, never a wait
//! on cycle completion.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::app::App;
use crate::cycle::try_run_cycle;
use crate::model::{ChannelId, Source, StreamKind};
use crate::source::SourceClient;

#[derive(Clone)]
pub struct ApiState {
    pub app: Arc<App>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionRequest {
    channel_id: u64,
    kind: String,
    target: String,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(serde_json::json!({ "error": message.into() })),
    )
}

fn internal(message: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": message.to_string() })),
    )
}

/// Turn a request into a `Source`, resolving artist permalinks to numeric
/// ids through the source client.
async fn source_from_request(
    client: &dyn SourceClient,
    kind: &str,
    target: &str,
) -> Result<Source, ApiError> {
    match kind {
        "artist" => {
            if let Ok(id) = target.parse::<u64>() {
                return Ok(Source::Artist(id));
            }
            let artist = client
                .resolve_artist(target)
                .await
                .map_err(|e| bad_request(e.to_string()))?;
            Ok(Source::Artist(artist.id))
        }
        "tag" => {
            if target.is_empty() {
                return Err(bad_request("tag must not be empty"));
            }
            Ok(Source::Tag(target.to_string()))
        }
        "stream" => StreamKind::parse(target)
            .map(Source::Stream)
            .ok_or_else(|| bad_request(format!("unknown stream kind: {target}"))),
        other => Err(bad_request(format!("unknown source kind: {other}"))),
    }
}

/// POST /api/subscriptions
async fn follow(
    State(state): State<ApiState>,
    Json(req): Json<SubscriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let source = source_from_request(state.app.source.as_ref(), &req.kind, &req.target).await?;
    let channel = ChannelId(req.channel_id);
    match state.app.messenger.channel_exists(channel).await {
        Ok(true) => {}
        Ok(false) => {
            return Err((
                StatusCode::NOT_FOUND,
                Json(serde_json::json!({ "error": format!("channel {channel} not found") })),
            ));
        }
        Err(e) => return Err(internal(e)),
    }
    state
        .app
        .index
        .follow(channel, source.clone())
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({
        "channel_id": req.channel_id,
        "kind": source.kind_str(),
        "target": source.key_string(),
    })))
}

/// DELETE /api/subscriptions
async fn unfollow(
    State(state): State<ApiState>,
    Json(req): Json<SubscriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let source = source_from_request(state.app.source.as_ref(), &req.kind, &req.target).await?;
    state
        .app
        .index
        .unfollow(ChannelId(req.channel_id), source)
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/channels/{id} — the platform reported this channel removed;
/// cascade its subscriptions away.
async fn remove_channel(
    State(state): State<ApiState>,
    Path(channel_id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .app
        .index
        .remove_channel(ChannelId(channel_id))
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/channels/{id}/subscriptions
async fn list_subscriptions(
    State(state): State<ApiState>,
    Path(channel_id): Path<u64>,
) -> impl IntoResponse {
    let mut sources = state.app.index.sources_for(ChannelId(channel_id)).await;
    sources.sort();
    let body: Vec<serde_json::Value> = sources
        .iter()
        .map(|s| serde_json::json!({ "kind": s.kind_str(), "target": s.key_string() }))
        .collect();
    Json(body)
}

/// POST /api/cycle — run an update cycle now. 409 when one is in flight.
async fn run_cycle_now(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    match try_run_cycle(&state.app).await {
        None => Err((
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "a cycle is already running" })),
        )),
        Some(Ok(stats)) => Ok(Json(serde_json::json!({ "status": "ok", "cycle": stats }))),
        Some(Err(e)) => Err(internal(e)),
    }
}

/// GET /api/health
async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let last_cycle = *state
        .app
        .last_cycle
        .lock()
        .expect("cycle stats mutex poisoned");
    Json(serde_json::json!({
        "status": "ok",
        "cycle_running": state.app.cycle_running.load(Ordering::SeqCst),
        "last_cycle": last_cycle,
    }))
}

/// Build the admin API router.
pub fn router(app: Arc<App>) -> Router {
    let state = ApiState { app };
    Router::new()
        .route("/api/subscriptions", post(follow).delete(unfollow))
        .route("/api/channels/{id}", axum::routing::delete(remove_channel))
        .route("/api/channels/{id}/subscriptions", get(list_subscriptions))
        .route("/api/cycle", post(run_cycle_now))
        .route("/api/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
