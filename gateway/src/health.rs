//! `GET /health` (§6): liveness, process uptime, and a count of currently
//! BUSY instances — enough for an operator's load balancer/dashboard
//! without touching the excluded admin CRUD surface.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use agentd_core::InstanceStatus;

use crate::app::GatewayState;
use crate::error::ApiError;

pub async fn health(State(state): State<Arc<GatewayState>>) -> Result<Json<Value>, ApiError> {
    let instances = state.store.list_enabled_instances().await?;
    let busy = instances
        .iter()
        .filter(|i| i.status == InstanceStatus::Busy)
        .count();

    Ok(Json(json!({
        "status": "ok",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "busy_instances": busy,
    })))
}
