//! `GET /projects`, `/projects/diagnostics`, `/health`, `/stats`,
//! `/ollama/models` (spec §4.6, §6).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::http::state::SharedState;
use crate::{config, db, ingest, queue};

pub async fn list_projects(State(state): State<Arc<SharedState>>) -> AppResult<Json<Value>> {
    let conn = state.db.lock().await;
    let projects = db::ingested_projects(&conn)?;
    Ok(Json(json!({ "projects": projects })))
}

pub async fn projects_diagnostics(State(state): State<Arc<SharedState>>) -> AppResult<Json<Value>> {
    let root = config::transcript_root();
    let discovered = ingest::discover_codex_session_projects(&root).unwrap_or_default();
    let scanned_files = walkdir::WalkDir::new(&root).into_iter().filter_map(|e| e.ok()).filter(|e| e.file_type().is_file()).count();

    let ingested: std::collections::BTreeSet<String> = {
        let conn = state.db.lock().await;
        db::ingested_projects(&conn)?.into_iter().collect()
    };
    let missing: Vec<&String> = discovered.difference(&ingested).collect();

    Ok(Json(json!({
        "ingestedProjects": ingested,
        "discoveredSessionProjects": discovered,
        "missingProjects": missing,
        "missingCount": missing.len(),
        "scannedFiles": scanned_files,
        "lastScanEpochMs": chrono::Utc::now().timestamp_millis(),
    })))
}

pub async fn health() -> AppResult<Json<Value>> {
    Ok(Json(json!({ "status": "ok", "pid": std::process::id() })))
}

pub async fn stats(State(state): State<Arc<SharedState>>) -> AppResult<Json<Value>> {
    let conn = state.db.lock().await;
    let depth = queue::total_active_count(&conn)?;
    let now_ms = chrono::Utc::now().timestamp_millis();
    let oldest_pending_age_ms = queue::oldest_active_message_age_ms(&conn, now_ms)?;
    drop(conn);
    let active_providers = state.scheduler.active_session_count().await;
    Ok(Json(json!({
        "queueDepth": depth,
        "oldestPendingAgeMs": oldest_pending_age_ms,
        "activeProviders": active_providers,
    })))
}

#[derive(Debug, Deserialize)]
pub struct OllamaModelsQuery {
    #[serde(rename = "baseUrl")]
    pub base_url: Option<String>,
}

/// Tries the local daemon's tag API first, falls back to parsing the CLI
/// `list` output (first whitespace token per non-header line).
pub async fn ollama_models(State(state): State<Arc<SharedState>>, Query(q): Query<OllamaModelsQuery>) -> AppResult<Json<Value>> {
    let base_url = q.base_url.unwrap_or_else(|| "http://localhost:11434".to_string());

    if let Ok(resp) = state.http_client.get(format!("{base_url}/api/tags")).send().await {
        if resp.status().is_success() {
            if let Ok(body) = resp.json::<Value>().await {
                let models: Vec<String> = body["models"]
                    .as_array()
                    .map(|arr| arr.iter().filter_map(|m| m["name"].as_str().map(String::from)).collect())
                    .unwrap_or_default();
                if !models.is_empty() {
                    return Ok(Json(json!({ "models": models, "source": "api" })));
                }
            }
        }
    }

    if let Ok(output) = tokio::process::Command::new("ollama").arg("list").output().await {
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let models: Vec<String> = stdout
                .lines()
                .skip(1)
                .filter_map(|line| line.split_whitespace().next().map(String::from))
                .collect();
            if !models.is_empty() {
                return Ok(Json(json!({ "models": models, "source": "cli" })));
            }
        }
    }

    Ok(Json(json!({ "models": Vec::<String>::new(), "source": "none" })))
}
