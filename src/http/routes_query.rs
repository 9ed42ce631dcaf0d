//! `GET /observations`, `/summaries`, `/prompts`, `POST /observations/batch`,
//! `GET /search`, `/search/prompts`, `/timeline` (spec §4.5, §4.6, §6).
//! Search/timeline responses render as a compact markdown table wrapped in
//! the MCP-style `{content:[{type:"text", text}]}` envelope (spec §6).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::http::state::SharedState;
use crate::query::{self, SearchFilter, SearchResult};

fn text_envelope(text: String) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
}

fn render_search_table(result: &SearchResult) -> String {
    if result.hits.is_empty() {
        return "No results.".to_string();
    }
    let mut out = String::from("| id | kind | title | created_at | score |\n|---|---|---|---|---|\n");
    for hit in &result.hits {
        out.push_str(&format!("| {} | {} | {} | {} | {:.3} |\n", hit.id, hit.kind, hit.title, hit.created_at, hit.score));
    }
    if result.has_more {
        out.push_str("\n_more results available; increase limit or use offset_\n");
    }
    out
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    pub project: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub obs_type: Option<String>,
    #[serde(rename = "dateStart")]
    pub date_start: Option<i64>,
    #[serde(rename = "dateEnd")]
    pub date_end: Option<i64>,
}

pub async fn search(State(state): State<Arc<SharedState>>, Query(q): Query<SearchQuery>) -> AppResult<Json<Value>> {
    let limit = query::clamp_limit(q.limit, 20, 200);
    let offset = q.offset.unwrap_or(0).max(0);
    let filter = SearchFilter {
        project: q.project.clone(),
        obs_type: q.obs_type.clone(),
        date_start: q.date_start,
        date_end: q.date_end,
    };

    let conn = state.db.lock().await;
    let result = match q.kind.as_deref() {
        Some("summary") => query::search_summaries(&conn, &q.query, q.project.as_deref(), limit, offset)?,
        _ => query::search_observations(&conn, &q.query, &filter, limit, offset)?,
    };
    Ok(Json(text_envelope(render_search_table(&result))))
}

#[derive(Debug, Deserialize)]
pub struct SearchPromptsQuery {
    pub query: String,
    #[serde(default)]
    pub project: Option<String>,
    pub limit: Option<i64>,
}

pub async fn search_prompts(State(state): State<Arc<SharedState>>, Query(q): Query<SearchPromptsQuery>) -> AppResult<Json<Value>> {
    let limit = query::clamp_limit(q.limit, 5, 100);
    let conn = state.db.lock().await;
    let result = query::search_prompts(&conn, state.vector.as_ref(), None, &q.query, limit)?;
    let header = if result.prompts.is_empty() {
        format!("Found 0 user prompt(s) matching \"{}\"", q.query)
    } else {
        format!("Found {} user prompt(s) matching \"{}\"", result.prompts.len(), q.query)
    };
    let mut text = format!("{header}\n\n");
    for p in &result.prompts {
        text.push_str(&format!("- [{}#{}] {}\n", p.content_session_id, p.prompt_number, p.prompt_text));
    }
    Ok(Json(json!({ "content": [{ "type": "text", "text": text }], "source": result.source })))
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    pub anchor: Option<i64>,
    pub query: Option<String>,
    pub depth_before: Option<i64>,
    pub depth_after: Option<i64>,
    pub project: Option<String>,
}

pub async fn timeline(State(state): State<Arc<SharedState>>, Query(q): Query<TimelineQuery>) -> AppResult<Json<Value>> {
    let depth_before = query::clamp_limit(q.depth_before, 5, 100);
    let depth_after = query::clamp_limit(q.depth_after, 5, 100);

    let conn = state.db.lock().await;
    let anchor_epoch = if let Some(anchor) = q.anchor {
        anchor
    } else if let Some(text_query) = &q.query {
        let filter = SearchFilter { project: q.project.clone(), ..Default::default() };
        let hit = query::search_observations(&conn, text_query, &filter, 1, 0)?
            .hits
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("no anchor match for timeline query".to_string()))?;
        chrono::DateTime::parse_from_rfc3339(&hit.created_at).map(|d| d.timestamp()).unwrap_or_else(|_| chrono::Utc::now().timestamp())
    } else {
        chrono::Utc::now().timestamp()
    };

    let entries = query::timeline(&conn, anchor_epoch, q.project.as_deref(), depth_before, depth_after)?;
    let mut text = String::from("| when | kind | title |\n|---|---|---|\n");
    for entry in &entries {
        match entry {
            query::TimelineEntry::Observation(o) => {
                text.push_str(&format!("| {} | observation | {} |\n", o.created_at, o.title.as_deref().unwrap_or("")));
            }
            query::TimelineEntry::Summary(s) => {
                text.push_str(&format!("| {} | summary | {} |\n", s.created_at, s.request.as_deref().unwrap_or("")));
            }
        }
    }
    Ok(Json(text_envelope(text)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub project: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_observations(State(state): State<Arc<SharedState>>, Query(q): Query<ListQuery>) -> AppResult<Json<Value>> {
    let limit = query::clamp_limit(q.limit, 50, 500);
    let conn = state.db.lock().await;
    let observations = query::list_observations(&conn, q.project.as_deref(), limit)?;
    Ok(Json(json!({ "observations": observations })))
}

pub async fn list_summaries(State(state): State<Arc<SharedState>>, Query(q): Query<ListQuery>) -> AppResult<Json<Value>> {
    let limit = query::clamp_limit(q.limit, 20, 200);
    let conn = state.db.lock().await;
    let summaries = query::list_summaries(&conn, q.project.as_deref(), limit)?;
    Ok(Json(json!({ "summaries": summaries })))
}

pub async fn list_prompts(State(state): State<Arc<SharedState>>, Query(q): Query<ListQuery>) -> AppResult<Json<Value>> {
    let limit = query::clamp_limit(q.limit, 20, 200);
    let conn = state.db.lock().await;
    let prompts = query::list_prompts(&conn, limit)?;
    Ok(Json(json!({ "prompts": prompts })))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub ids: Vec<i64>,
    pub project: Option<String>,
}

pub async fn batch_observations(State(state): State<Arc<SharedState>>, Json(req): Json<BatchRequest>) -> AppResult<Json<Value>> {
    if req.ids.is_empty() {
        return Err(AppError::Validation("ids must not be empty".to_string()));
    }
    let conn = state.db.lock().await;
    let limit = req.ids.len() as i64;
    let observations = query::get_observations(&conn, &req.ids, req.project.as_deref(), limit)?;
    Ok(Json(json!({ "observations": observations })))
}
