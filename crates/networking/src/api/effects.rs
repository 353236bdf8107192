//! Effect preview operations

use crate::StoatClient;
use serde_json::Value;
use stoat_core::{Error, Result};

/// Render the filter string for `effect_type` with `parameters`
///
/// Parameters must be a JSON object; anything else is rejected before
/// reaching the server.
pub async fn preview_effect(
    client: &StoatClient,
    effect_type: &str,
    parameters: &Value,
) -> Result<String> {
    let effect_type = effect_type.trim();
    if effect_type.is_empty() {
        return Err(Error::InvalidData("Effect type must not be empty".to_string()));
    }
    if !parameters.is_object() {
        return Err(Error::InvalidData(
            "Effect parameters must be a JSON object".to_string(),
        ));
    }

    client.preview_effect(effect_type, parameters).await
}
