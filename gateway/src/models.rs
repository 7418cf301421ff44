//! `GET /v1/models` (§4.9, §6): active template versions, listed under the
//! template's name since that is the value callers pass back as `model`.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use agentd_protocol::{ModelList, ModelListEntry};

use crate::app::GatewayState;
use crate::error::ApiError;

pub async fn list_models(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<ModelList>, ApiError> {
    let versions = state.store.list_active_template_versions().await?;
    let mut data = Vec::with_capacity(versions.len());
    for version in versions {
        let template = state.store.get_template(&version.template_id).await?;
        data.push(ModelListEntry {
            id: template.name,
            object: ModelListEntry::OBJECT,
            owned_by: "agentd".to_string(),
            version_id: version.id,
        });
    }
    Ok(Json(ModelList { data }))
}
