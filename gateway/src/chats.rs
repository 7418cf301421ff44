//! Session browsing surface (§6): `GET/PUT/DELETE /v1/chats*`. External to
//! the core's own responsibilities — listed "for boundary completeness" —
//! so these handlers are thin wrappers over [`agentd_core::Store`] reads
//! and the two session-metadata writes (rename, delete) that don't touch
//! the state machine.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use agentd_core::{Session, SessionMessage};

use crate::app::GatewayState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ListChatsParams {
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_chats(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<ListChatsParams>,
) -> Result<Json<Vec<Session>>, ApiError> {
    Ok(Json(state.store.list_sessions(params.limit).await?))
}

pub async fn get_chat(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    let (session, _) = state.store.load_session(&id).await?;
    Ok(Json(session))
}

pub async fn get_chat_messages(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SessionMessage>>, ApiError> {
    let (_, messages) = state.store.load_session(&id).await?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
pub struct RenameChatRequest {
    pub title: String,
}

pub async fn rename_chat(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Json(body): Json<RenameChatRequest>,
) -> Result<Json<Value>, ApiError> {
    state.store.rename_session(&id, &body.title).await?;
    Ok(Json(json!({ "id": id, "title": body.title })))
}

pub async fn delete_chat(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.store.delete_session(&id).await?;
    Ok(Json(json!({ "id": id, "deleted": true })))
}
