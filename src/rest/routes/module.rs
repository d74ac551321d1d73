// rest/routes/module.rs — SDK bootstrap module rendering.

use axum::{http::StatusCode, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::assembler::{assemble, ClientConfig, SetupSelection, MODULE_FILENAME};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderModuleRequest {
    #[serde(default)]
    pub features: HashMap<String, bool>,
    #[serde(default)]
    pub settings: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub client_config: ClientConfig,
}

/// POST /api/v1/module — assemble `nimbus.js` from a setup selection.
///
/// Unknown feature keys are ignored rather than rejected so older wizard
/// builds keep working against newer daemons; a missing client config is the
/// one hard error, since the module is useless without it.
pub async fn render_module(
    Json(body): Json<RenderModuleRequest>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let selection = SetupSelection::new(body.features, body.settings);
    let module = assemble(&selection, &body.client_config).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "message": e.to_string() })),
        )
    })?;

    Ok(Json(json!({
        "success": true,
        "filename": MODULE_FILENAME,
        "content": module.render(),
    })))
}
