//! `GET/PUT /settings` (spec §4.6, §6): masked read, validating write.

use axum::Json;
use serde_json::Value;

use crate::config;
use crate::error::{AppError, AppResult};

pub async fn get_settings() -> AppResult<Json<Value>> {
    let settings = config::read_settings_masked()?;
    Ok(Json(settings))
}

const VALID_PROVIDERS: &[&str] = &["hosted-chat", "local-http", "cli-subprocess"];

fn validate_patch(patch: &Value) -> AppResult<()> {
    let Value::Object(map) = patch else {
        return Err(AppError::Validation("settings patch must be a JSON object".to_string()));
    };
    if let Some(provider) = map.get("provider").and_then(|v| v.as_str()) {
        if !VALID_PROVIDERS.contains(&provider) {
            return Err(AppError::Validation(format!("unknown provider '{provider}'")));
        }
    }
    if let Some(port) = map.get("port") {
        let Some(n) = port.as_u64() else {
            return Err(AppError::Validation("port must be a number".to_string()));
        };
        if n == 0 || n > 65535 {
            return Err(AppError::Validation("port out of range".to_string()));
        }
    }
    if let Some(n) = map.get("contextObservationCount").and_then(|v| v.as_i64()) {
        if !(0..=1000).contains(&n) {
            return Err(AppError::Validation("contextObservationCount out of range".to_string()));
        }
    }
    Ok(())
}

pub async fn put_settings(Json(patch): Json<Value>) -> AppResult<Json<Value>> {
    validate_patch(&patch)?;
    config::write_settings(patch)?;
    let settings = config::read_settings_masked()?;
    Ok(Json(settings))
}
