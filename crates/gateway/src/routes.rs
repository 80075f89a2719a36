//! HTTP handlers: validate the body, make one registry call, wrap the
//! outcome in an envelope.

use {
    axum::{
        body::Bytes,
        extract::{Path, State},
        response::Response,
    },
    serde_json::{Map, Value, json},
};

use switchboard_channels::{ChannelPatch, Error, NewChannel, OutboundMessage};

use crate::{
    envelope::{ApiError, ok},
    server::AppState,
    validation::{CREATE_CHANNEL, MODIFY_CHANNEL, SEND_MESSAGE},
};

type ApiResult = Result<Response, ApiError>;

/// Body fields stored on the channel record next to `config`.
const METADATA_FIELDS: &[&str] = &[
    "mo_url",
    "status_url",
    "rate_limit_count",
    "rate_limit_window",
    "character_limit",
];

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn take_metadata(fields: &mut Map<String, Value>) -> Map<String, Value> {
    METADATA_FIELDS
        .iter()
        .filter_map(|key| fields.remove(*key).map(|value| (key.to_string(), value)))
        .collect()
}

pub async fn health() -> Response {
    ok("health ok", json!({}))
}

pub async fn list_channels(State(state): State<AppState>) -> ApiResult {
    let ids = state.gateway.registry.list_ids().await?;
    Ok(ok("channels listed", ids))
}

pub async fn create_channel(State(state): State<AppState>, body: Bytes) -> ApiResult {
    let mut fields = CREATE_CHANNEL
        .validate_bytes(&body)
        .map_err(ApiError::invalid_body)?;

    let new = NewChannel {
        id: take_string(&mut fields, "id"),
        channel_type: take_string(&mut fields, "type").unwrap_or_default(),
        config: fields.remove("config").unwrap_or_else(|| json!({})),
        metadata: take_metadata(&mut fields),
    };
    let record = state.gateway.registry.create(new).await?;
    Ok(ok("channel created", record))
}

pub async fn get_channel(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let record = state.gateway.registry.get(&id).await?;
    Ok(ok("channel found", record))
}

pub async fn modify_channel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let mut fields = MODIFY_CHANNEL
        .validate_bytes(&body)
        .map_err(ApiError::invalid_body)?;

    let patch = ChannelPatch {
        channel_type: take_string(&mut fields, "type"),
        config: fields.remove("config"),
        metadata: take_metadata(&mut fields),
    };
    let record = state.gateway.registry.modify(&id, patch).await?;
    Ok(ok("channel updated", record))
}

pub async fn delete_channel(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.gateway.registry.destroy(&id).await?;
    Ok(ok("channel deleted", json!({})))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult {
    let fields = SEND_MESSAGE
        .validate_bytes(&body)
        .map_err(ApiError::invalid_body)?;
    let message: OutboundMessage =
        serde_json::from_value(Value::Object(fields)).map_err(Error::from)?;

    let sent = state.gateway.registry.send_message(&id, &message).await?;
    Ok(ok("message sent", sent))
}

pub async fn message_status(
    State(state): State<AppState>,
    Path((id, message_id)): Path<(String, String)>,
) -> ApiResult {
    let status = state
        .gateway
        .registry
        .message_status(&id, &message_id)
        .await?;
    Ok(ok("message status", status))
}

pub async fn route_not_found() -> ApiError {
    ApiError::route_not_found()
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}
