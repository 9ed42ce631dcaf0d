//! `POST /sessions/init`, `/sessions/observations`, `/sessions/summarize`,
//! `DELETE /sessions/:id` (spec §4.6, §6). Each handler resolves/creates
//! the session row, applies the private-prompt and observer-bootstrap
//! filters, enqueues a typed `PendingPayload`, kicks the scheduler, and
//! broadcasts the matching SSE event.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::{self, Platform};
use crate::error::{AppError, AppResult};
use crate::http::state::{SharedState, SseEvent};
use crate::queue;
use crate::tags;

#[derive(Debug, Deserialize)]
pub struct InitSessionRequest {
    #[serde(rename = "contentSessionId")]
    pub content_session_id: String,
    pub project: Option<String>,
    pub prompt: Option<String>,
    pub cwd: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

/// `{contentSessionId, project, prompt, platform?} -> {skipped, reason?}`.
/// Broadcasts `new_prompt` unless skipped or `platform == "claude-code"`
/// (preserving the legacy dual-entry broadcast from `/sessions/:id/init`).
pub async fn init_session(State(state): State<Arc<SharedState>>, Json(req): Json<InitSessionRequest>) -> AppResult<Json<Value>> {
    if req.content_session_id.trim().is_empty() {
        return Err(AppError::Validation("contentSessionId must not be empty".to_string()));
    }

    if let Some(raw_prompt) = &req.prompt {
        let fully_private = tags::extract_fully_private(raw_prompt).is_some();
        let empty_after_strip = tags::strip_private(&tags::strip_context_block(raw_prompt)).trim().is_empty();
        if fully_private || empty_after_strip {
            return Ok(Json(json!({ "skipped": true, "reason": "private" })));
        }
    }

    let project = req
        .project
        .clone()
        .or_else(|| req.cwd.as_deref().map(db::project_from_cwd))
        .unwrap_or_else(|| "unknown".to_string());
    let platform = req.platform.as_deref().map(Platform::parse).unwrap_or(Platform::HostedAgent);
    let stripped_prompt = req.prompt.as_deref().map(|p| tags::strip_private(&tags::strip_context_block(p)));

    let session_db_id = {
        let conn = state.db.lock().await;
        let id = db::create_or_get_session(&conn, &req.content_session_id, &project, stripped_prompt.as_deref(), platform)?;
        if let Some(prompt) = &stripped_prompt {
            db::append_user_prompt(&conn, &req.content_session_id, prompt)?;
        }
        id
    };

    if req.platform.as_deref() != Some("claude-code") {
        state.broadcast(SseEvent::NewPrompt { session_db_id });
    }
    Ok(Json(json!({ "skipped": false, "sessionDbId": session_db_id, "project": project })))
}

#[derive(Debug, Deserialize)]
pub struct ObserveRequest {
    #[serde(rename = "contentSessionId")]
    pub content_session_id: String,
    pub tool_name: String,
    pub tool_input: Option<Value>,
    pub tool_response: Option<Value>,
    pub cwd: Option<String>,
}

/// `{contentSessionId, tool_name, tool_input, tool_response, cwd} ->
/// {status: "queued"|"skipped", reason?}`.
pub async fn observe(State(state): State<Arc<SharedState>>, Json(req): Json<ObserveRequest>) -> AppResult<Json<Value>> {
    let response_text = req.tool_response.as_ref().and_then(|v| v.as_str()).unwrap_or_default();
    if tags::is_observer_bootstrap(response_text) {
        return Ok(Json(json!({ "status": "skipped", "reason": "observer_bootstrap" })));
    }

    let conn = state.db.lock().await;
    let session = db::get_session_by_content_id(&conn, &req.content_session_id)?
        .ok_or_else(|| AppError::NotFound(format!("no session for {}", req.content_session_id)))?;

    let payload = db::PendingPayload::Observation {
        tool_name: req.tool_name,
        tool_input: req.tool_input.map(|v| v.to_string()),
        tool_response: req.tool_response.map(|v| v.to_string()),
        cwd: req.cwd,
    };
    let queued = queue::enqueue(&conn, session.session_db_id, &req.content_session_id, &payload, queue::DEFAULT_SESSION_CAP)?;
    drop(conn);

    match queued {
        Ok(_) => {
            state.broadcast(SseEvent::ObservationQueued { session_db_id: session.session_db_id });
            state.scheduler.ensure_running(state.clone(), session.session_db_id).await;
            Ok(Json(json!({ "status": "queued" })))
        }
        Err(over_cap) => Err(AppError::Validation(over_cap.to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    #[serde(rename = "contentSessionId")]
    pub content_session_id: String,
    #[serde(default)]
    pub last_assistant_message: String,
}

pub async fn summarize(State(state): State<Arc<SharedState>>, Json(req): Json<SummarizeRequest>) -> AppResult<Json<Value>> {
    let conn = state.db.lock().await;
    let session = db::get_session_by_content_id(&conn, &req.content_session_id)?
        .ok_or_else(|| AppError::NotFound(format!("no session for {}", req.content_session_id)))?;

    let payload = db::PendingPayload::Summarize { last_assistant_message: req.last_assistant_message };
    let queued = queue::enqueue(&conn, session.session_db_id, &req.content_session_id, &payload, queue::DEFAULT_SESSION_CAP)?;
    drop(conn);

    match queued {
        Ok(_) => {
            state.broadcast(SseEvent::SummarizeQueued { session_db_id: session.session_db_id });
            state.scheduler.ensure_running(state.clone(), session.session_db_id).await;
            Ok(Json(json!({ "status": "queued" })))
        }
        Err(over_cap) => Err(AppError::Validation(over_cap.to_string())),
    }
}

/// Cooperative cancellation only: the active turn is not rolled back, it
/// is simply never committed past its next suspension point (spec §5).
pub async fn delete_session(State(state): State<Arc<SharedState>>, Path(session_db_id): Path<i64>) -> AppResult<Json<Value>> {
    state.scheduler.cancel_session(session_db_id).await;
    Ok(Json(json!({ "cancelled": true })))
}
