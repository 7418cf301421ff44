//! Axum app: shared state and router (§4.9, §6).

use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;

use agentd_core::{Embedder, InstancePool, Store};

use crate::{chat, chats, health, models};

/// Shared state every handler reaches through. One per process; the CLI's
/// `serve` command constructs it once, alongside the [`InstancePool`]'s
/// worker tasks, and hands it to [`router`].
pub struct GatewayState {
    pub store: Arc<dyn Store>,
    pub pool: Arc<InstancePool>,
    /// `None` disables retrieval-strategy query embedding; selection then
    /// falls back to the static candidate set truncated to
    /// `max_tools_in_prompt` (§4.4 step 4b has no embedding to rank with).
    pub embedder: Option<Arc<dyn Embedder>>,
    /// When this process came up; backs `/health`'s `uptime_seconds`.
    pub started_at: Instant,
}

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", axum::routing::post(chat::chat_completions))
        .route("/v1/models", get(models::list_models))
        .route("/v1/chats", get(chats::list_chats))
        .route(
            "/v1/chats/:id",
            get(chats::get_chat).put(chats::rename_chat).delete(chats::delete_chat),
        )
        .route("/v1/chats/:id/messages", get(chats::get_chat_messages))
        .route("/health", get(health::health))
        .with_state(state)
}
