//! IngestionEngine (C6): incremental, checkpointed, per-file transcript
//! reader (spec §4.4). New component — grounded partly in
//! `examples/other_examples/983ca6ad_SpillwaveSolutions-agent-memory__crates-memory-service-src-ingest.rs.rs`
//! for the retry/backoff shape and partly in spec §4.4's own description.

pub mod checkpoint;
pub mod records;
pub mod retry;

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::json;

use records::{parse_history_file_contents, select_records_for_ingestion, IngestibleRecord, TranscriptLineKind};
use retry::{post_json_with_retry, RetryPolicy};

const SYSTEM_LINE_PREFIXES: &[&str] = &["⚠", "[experimental]"];

pub fn is_system_line(text: &str) -> bool {
    let trimmed = text.trim_start();
    SYSTEM_LINE_PREFIXES.iter().any(|p| trimmed.starts_with(p)) || trimmed.contains("MCP error") && trimmed.contains("timed out")
}

pub struct IngestOptions {
    pub base_url: String,
    pub since_ts: Option<i64>,
    pub limit: Option<usize>,
    pub include_system: bool,
    pub skip_summaries: bool,
    pub workspace_fallback: Option<String>,
}

pub struct IngestReport {
    pub files_processed: usize,
    pub observations_posted: usize,
    pub sessions_initialized: usize,
}

/// Ingest every transcript file in `root`, in mtime-ascending order,
/// stopping at the first record failure in a given file and leaving that
/// file's checkpoint unchanged (spec §4.4).
pub async fn ingest_root(client: &reqwest::Client, root: &Path, opts: &IngestOptions) -> Result<IngestReport> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|ext| ext == "jsonl" || ext == "json").unwrap_or(false))
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort_by_key(|p| std::fs::metadata(p).and_then(|m| m.modified()).ok());

    let mut checkpoints = checkpoint::load()?;
    let mut report = IngestReport { files_processed: 0, observations_posted: 0, sessions_initialized: 0 };

    for file in files {
        let path_str = file.to_string_lossy().to_string();
        let last_processed = checkpoints.file_checkpoints.get(&path_str).copied().unwrap_or(0);
        match ingest_one_file(client, &file, last_processed, opts).await {
            Ok((new_checkpoint, observations, initialized)) => {
                if new_checkpoint > last_processed {
                    checkpoints.file_checkpoints.insert(path_str, new_checkpoint);
                    checkpoint::save(&checkpoints)?;
                }
                report.files_processed += 1;
                report.observations_posted += observations;
                report.sessions_initialized += initialized;
            }
            Err(e) => {
                tracing::warn!(file = %path_str, error = %e, "ingestion stopped at first record failure, checkpoint left unchanged");
            }
        }
    }
    Ok(report)
}

async fn ingest_one_file(client: &reqwest::Client, path: &Path, last_processed: i64, opts: &IngestOptions) -> Result<(i64, usize, usize)> {
    let raw = std::fs::read_to_string(path)?;
    let lines = parse_history_file_contents(&raw);
    let selected: Vec<IngestibleRecord> = select_records_for_ingestion(&lines, last_processed, opts.since_ts, opts.include_system, opts.limit);

    let mut max_line = last_processed;
    let mut observations_posted = 0;
    let mut sessions_initialized = 0;
    let policy = RetryPolicy::default();

    let mut last_session_id: Option<String> = None;
    let mut last_assistant_message: Option<String> = None;
    let mut last_assistant_kind: Option<TranscriptLineKind> = None;

    for record in &selected {
        let content_session_id = format!("codex-{}", record.session_id);
        let project = record
            .cwd
            .as_deref()
            .map(crate::db::project_from_cwd)
            .or_else(|| opts.workspace_fallback.clone())
            .unwrap_or_else(|| "unknown".to_string());

        if last_session_id.as_deref() != Some(&content_session_id) {
            if let Some(prev_session) = last_session_id.take() {
                if !opts.skip_summaries {
                    post_summarize(client, &opts.base_url, &prev_session, last_assistant_message.take(), &policy).await?;
                }
                last_assistant_kind = None;
            }
            let body = json!({
                "contentSessionId": content_session_id,
                "project": project,
                "prompt": record.text,
                "platform": "transcript",
            });
            post_json_with_retry(client, &format!("{}/sessions/init", opts.base_url), &body, &policy).await?;
            sessions_initialized += 1;
            last_session_id = Some(content_session_id.clone());
        }

        let body = json!({
            "contentSessionId": content_session_id,
            "tool_name": "CodexHistoryEntry",
            "tool_input": null,
            "tool_response": record.text,
            "cwd": record.cwd,
            "sourcePath": path.to_string_lossy(),
            "lineNumber": record.line_number,
            "recordTimestamp": record.ts,
        });
        post_json_with_retry(client, &format!("{}/sessions/observations", opts.base_url), &body, &policy).await?;
        observations_posted += 1;

        // 3-tier priority: a final_answer response_item always wins; a
        // commentary agent_message beats an unset or user_message slot, but
        // never overrides an already-claimed agent_message/response_item;
        // a user_message only fills an empty slot.
        let outranks_current = record.is_final_answer
            || (record.kind == TranscriptLineKind::AgentMessage
                && !matches!(last_assistant_kind, Some(TranscriptLineKind::AgentMessage | TranscriptLineKind::ResponseItem)))
            || last_assistant_message.is_none();
        if outranks_current {
            last_assistant_message = Some(record.text.clone());
            last_assistant_kind = Some(record.kind);
        }
        max_line = max_line.max(record.line_number);
    }

    if let Some(session) = last_session_id {
        if !opts.skip_summaries {
            post_summarize(client, &opts.base_url, &session, last_assistant_message, &policy).await?;
        }
    }

    Ok((max_line, observations_posted, sessions_initialized))
}

async fn post_summarize(client: &reqwest::Client, base_url: &str, content_session_id: &str, last_assistant_message: Option<String>, policy: &RetryPolicy) -> Result<()> {
    let body = json!({
        "contentSessionId": content_session_id,
        "last_assistant_message": last_assistant_message.unwrap_or_default(),
    });
    post_json_with_retry(client, &format!("{base_url}/sessions/summarize"), &body, policy).await?;
    Ok(())
}

/// Scans the transcript root and returns project names with at least one
/// `user_message` in any session (spec §4.4 diagnostics).
pub fn discover_codex_session_projects(root: &Path) -> Result<std::collections::BTreeSet<String>> {
    let mut projects = std::collections::BTreeSet::new();
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(entry.path()) else { continue };
        for line in raw.lines() {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else { continue };
            if value["type"] == "event_msg" && value["payload"]["type"] == "user_message" {
                if let Some(cwd) = value["cwd"].as_str().or_else(|| value["payload"]["cwd"].as_str()) {
                    projects.insert(crate::db::project_from_cwd(cwd));
                }
            }
        }
    }
    Ok(projects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_lines_are_recognized() {
        assert!(is_system_line("⚠ careful"));
        assert!(is_system_line("[experimental] preview feature"));
        assert!(!is_system_line("normal text"));
    }
}
