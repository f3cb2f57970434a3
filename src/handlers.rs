//! HTTP surface of the gateway (spec §6), plus a `/health` liveness endpoint.
//!
//! Request/response shapes mirror the Go-style JSON bodies from spec.md §6. The
//! session key is carried as an authenticated header, per spec.md §6.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::instrument;

use crate::backend::callback::Callback;
use crate::backend::{Backend, PublicKeyInfo};
use crate::errors::GatewayError;
use crate::events::Event;
use crate::request_manager::RequestManager;

const SESSION_KEY_HEADER: &str = "x-session-key";

fn session_key(headers: &HeaderMap) -> Result<String, GatewayError> {
    headers
        .get(SESSION_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::InputError("Provided invalid key.".to_string()))
}

fn parse_hex_data(data: &str) -> Result<Vec<u8>, GatewayError> {
    let stripped = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(stripped).map_err(|e| GatewayError::InputError(format!("non-hex data: {e}")))
}

pub fn routes<B, C>() -> Router<Arc<RequestManager<B, C>>>
where
    B: Backend + Send + Sync + 'static,
    C: Callback + Send + Sync + 'static,
{
    Router::new()
        .route("/health", axum::routing::get(get_health::<B, C>))
        .route("/v0/api/service/deploy", post(post_service_deploy::<B, C>))
        .route(
            "/v0/api/service/execute",
            post(post_service_execute::<B, C>),
        )
        .route("/v0/api/service/poll", post(post_service_poll::<B, C>))
        .route(
            "/v0/api/service/getPublicKey",
            post(post_get_public_key::<B, C>),
        )
        .route("/v0/api/event/subscribe", post(post_event_subscribe::<B, C>))
        .route(
            "/v0/api/event/unsubscribe",
            post(post_event_unsubscribe::<B, C>),
        )
        .route("/v0/api/event/poll", post(post_event_poll::<B, C>))
}

/// `GET /health`: liveness, independent of the deploy/execute/poll/subscribe surface.
#[instrument(skip_all)]
pub async fn get_health<B, C>(
    State(manager): State<Arc<RequestManager<B, C>>>,
) -> impl IntoResponse
where
    B: Backend,
    C: Callback,
{
    Json(json!({
        "status": "ok",
        "wallets": manager.wallet_count(),
        "subscriptions": manager.subscription_count(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    data: String,
    address: String,
}

#[derive(Debug, Serialize)]
pub struct IdResponse {
    id: u64,
}

/// `POST /v0/api/service/deploy`: dispatches a contract deployment and returns its id.
#[instrument(skip_all)]
pub async fn post_service_deploy<B, C>(
    State(manager): State<Arc<RequestManager<B, C>>>,
    headers: HeaderMap,
    Json(body): Json<DeployRequest>,
) -> Result<impl IntoResponse, GatewayError>
where
    B: Backend,
    C: Callback,
{
    let session_key = session_key(&headers)?;
    let data = parse_hex_data(&body.data)?;
    let id = manager.deploy_service_async(&session_key, data).await?;
    Ok((StatusCode::ACCEPTED, Json(IdResponse { id })))
}

/// `POST /v0/api/service/execute`: dispatches a contract execution and returns its id.
#[instrument(skip_all)]
pub async fn post_service_execute<B, C>(
    State(manager): State<Arc<RequestManager<B, C>>>,
    headers: HeaderMap,
    Json(body): Json<ExecuteRequest>,
) -> Result<impl IntoResponse, GatewayError>
where
    B: Backend,
    C: Callback,
{
    let session_key = session_key(&headers)?;
    let data = parse_hex_data(&body.data)?;
    let id = manager
        .execute_service_async(&session_key, &body.address, data)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(IdResponse { id })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRequest {
    offset: u64,
    count: usize,
    #[serde(default)]
    discard_previous: bool,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    events: Vec<Event>,
    offset: u64,
}

/// `POST /v0/api/service/poll`: retrieves pending deploy/execute outcomes.
#[instrument(skip_all)]
pub async fn post_service_poll<B, C>(
    State(manager): State<Arc<RequestManager<B, C>>>,
    headers: HeaderMap,
    Json(body): Json<PollRequest>,
) -> Result<impl IntoResponse, GatewayError>
where
    B: Backend,
    C: Callback,
{
    let session_key = session_key(&headers)?;
    let (offset, events) = manager
        .poll_service(&session_key, body.offset, body.count, body.discard_previous)
        .await?;
    Ok(Json(EventsResponse { events, offset }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPublicKeyRequest {
    address: String,
}

/// `POST /v0/api/service/getPublicKey`.
#[instrument(skip_all)]
pub async fn post_get_public_key<B, C>(
    State(manager): State<Arc<RequestManager<B, C>>>,
    Json(body): Json<GetPublicKeyRequest>,
) -> Result<impl IntoResponse, GatewayError>
where
    B: Backend,
    C: Callback,
{
    let info: PublicKeyInfo = manager.get_public_key(&body.address).await?;
    Ok(Json(info))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Part of the wire contract (spec §6); filtering is by `topics` alone.
    #[serde(default)]
    #[allow(dead_code)]
    event: String,
    address: String,
    #[serde(default)]
    topics: Vec<String>,
}

/// `POST /v0/api/event/subscribe`.
#[instrument(skip_all)]
pub async fn post_event_subscribe<B, C>(
    State(manager): State<Arc<RequestManager<B, C>>>,
    headers: HeaderMap,
    Json(body): Json<SubscribeRequest>,
) -> Result<impl IntoResponse, GatewayError>
where
    B: Backend,
    C: Callback,
{
    let session_key = session_key(&headers)?;
    let id = manager
        .subscribe(&session_key, &body.address, body.topics)
        .await?;
    Ok(Json(IdResponse { id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeRequest {
    id: u64,
}

/// `POST /v0/api/event/unsubscribe`.
#[instrument(skip_all)]
pub async fn post_event_unsubscribe<B, C>(
    State(manager): State<Arc<RequestManager<B, C>>>,
    headers: HeaderMap,
    Json(body): Json<UnsubscribeRequest>,
) -> Result<impl IntoResponse, GatewayError>
where
    B: Backend,
    C: Callback,
{
    let session_key = session_key(&headers)?;
    manager.unsubscribe(&session_key, body.id).await?;
    Ok(Json(json!({})))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollEventRequest {
    id: u64,
    offset: u64,
    count: usize,
    #[serde(default)]
    discard_previous: bool,
}

/// `POST /v0/api/event/poll`.
#[instrument(skip_all)]
pub async fn post_event_poll<B, C>(
    State(manager): State<Arc<RequestManager<B, C>>>,
    headers: HeaderMap,
    Json(body): Json<PollEventRequest>,
) -> Result<impl IntoResponse, GatewayError>
where
    B: Backend,
    C: Callback,
{
    let session_key = session_key(&headers)?;
    let (offset, events) = manager
        .poll_event(
            &session_key,
            body.id,
            body.offset,
            body.count,
            body.discard_previous,
        )
        .await?;
    Ok(Json(EventsResponse { events, offset }))
}
