//! HTTP Gateway Adapter (§4.9, `C9`): OpenAI-compatible `/v1/chat/completions`
//! over the agent runtime, plus `/v1/models`, the `/v1/chats*` session
//! browsing surface, and `/health`.
//!
//! Built on the same `app.rs`/`run_serve*` axum bootstrap shape this crate
//! started from, reworked from a single WebSocket upgrade route into a REST
//! router and from WebSocket framing to HTTP SSE framing (`agentd_protocol::sse`).
//!
//! **Public API**: [`GatewayState`], [`router`], [`serve`], [`serve_on_listener`].

mod app;
mod chat;
mod chats;
mod error;
mod health;
mod models;

pub use app::{router, GatewayState};
pub use error::ApiError;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

/// Runs the gateway on an already-bound listener (used by tests: bind to
/// `127.0.0.1:0`, read back the assigned port, then pass the listener here).
pub async fn serve_on_listener(
    listener: TcpListener,
    state: Arc<GatewayState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("gateway listening on http://{addr}");
    let app = router(state);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs the gateway on `addr` (e.g. `"127.0.0.1:8080"`).
pub async fn serve(
    addr: &str,
    state: Arc<GatewayState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    serve_on_listener(listener, state).await
}
