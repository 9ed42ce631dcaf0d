//! Transcript record model: two on-disk formats (spec §4.4). REDESIGN
//! FLAGS: `TranscriptLine(SessionMeta | EventMsg(UserMessage|AgentMessage)
//! | ResponseItem)` as a tagged enum rather than ad-hoc JSON.

use serde::Deserialize;
use serde_json::Value;

/// Which of the three transcript line shapes a record came from (spec
/// §4.4's 3-tier `lastAssistantMessage` priority: `ResponseItem` with
/// `is_final_answer` beats commentary `AgentMessage`, which beats a
/// `UserMessage` fallback).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptLineKind {
    UserMessage,
    AgentMessage,
    ResponseItem,
}

#[derive(Debug, Clone)]
pub struct IngestibleRecord {
    pub session_id: String,
    pub cwd: Option<String>,
    pub text: String,
    pub ts: Option<i64>,
    pub line_number: i64,
    pub is_final_answer: bool,
    pub kind: TranscriptLineKind,
}

/// One parsed line, still attached to its originating session context and
/// line number, before ingestibility filtering.
pub(crate) struct RawLine {
    line_number: i64,
    session_id: Option<String>,
    cwd: Option<String>,
    text: Option<String>,
    ts: Option<i64>,
    is_final_answer: bool,
    kind: TranscriptLineKind,
}

#[derive(Debug, Deserialize)]
struct LegacyFlatRecord {
    session_id: String,
    ts: Option<i64>,
    text: String,
}

/// Parse every line of a history file, tolerating malformed lines (spec
/// §4.4 "skip malformed lines") and both on-disk formats.
pub(crate) fn parse_history_file_contents(raw: &str) -> Vec<RawLine> {
    let mut current_session: Option<String> = None;
    let mut current_cwd: Option<String> = None;
    let mut lines = Vec::new();

    for (idx, line) in raw.lines().enumerate() {
        let line_number = (idx + 1) as i64;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };

        if let Ok(legacy) = serde_json::from_value::<LegacyFlatRecord>(value.clone()) {
            if value.get("type").is_none() {
                lines.push(RawLine {
                    line_number,
                    session_id: Some(legacy.session_id),
                    cwd: None,
                    text: Some(legacy.text),
                    ts: legacy.ts,
                    is_final_answer: false,
                    kind: TranscriptLineKind::UserMessage,
                });
                continue;
            }
        }

        match value["type"].as_str() {
            Some("session_meta") => {
                current_session = value["session_id"].as_str().or_else(|| value["payload"]["id"].as_str()).map(String::from);
                current_cwd = value["cwd"].as_str().or_else(|| value["payload"]["cwd"].as_str()).map(String::from);
            }
            Some("event_msg") => {
                let subtype = value["payload"]["type"].as_str().unwrap_or_default();
                let kind = match subtype {
                    "user_message" => Some(TranscriptLineKind::UserMessage),
                    "agent_message" => Some(TranscriptLineKind::AgentMessage),
                    _ => None,
                };
                if let Some(kind) = kind {
                    let text = value["payload"]["message"].as_str().or_else(|| value["payload"]["text"].as_str()).map(String::from);
                    lines.push(RawLine {
                        line_number,
                        session_id: current_session.clone(),
                        cwd: current_cwd.clone(),
                        text,
                        ts: value["ts"].as_i64(),
                        is_final_answer: false,
                        kind,
                    });
                }
            }
            Some("response_item") => {
                let is_final = value["phase"].as_str() == Some("final_answer");
                let text = value["content"]
                    .as_array()
                    .and_then(|parts| parts.iter().find_map(|p| p["text"].as_str()))
                    .map(String::from);
                lines.push(RawLine {
                    line_number,
                    session_id: current_session.clone(),
                    cwd: current_cwd.clone(),
                    text,
                    ts: value["ts"].as_i64(),
                    is_final_answer: is_final,
                    kind: TranscriptLineKind::ResponseItem,
                });
            }
            _ => {}
        }
    }

    lines
}

fn is_ingestible_text(text: &str, include_system: bool) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return false;
    }
    include_system || !crate::ingest::is_system_line(trimmed)
}

/// Filter by ingestibility, `since_ts`, the per-file checkpoint (strictly
/// greater than last processed line number), sort by line number, then
/// cap by optional global `limit` (spec §4.4).
pub fn select_records_for_ingestion(
    lines: &[RawLine],
    last_processed_line: i64,
    since_ts: Option<i64>,
    include_system: bool,
    limit: Option<usize>,
) -> Vec<IngestibleRecord> {
    let mut selected: Vec<IngestibleRecord> = lines
        .iter()
        .filter(|l| l.line_number > last_processed_line)
        .filter_map(|l| {
            let text = l.text.as_deref()?;
            if !is_ingestible_text(text, include_system) {
                return None;
            }
            if let (Some(since), Some(ts)) = (since_ts, l.ts) {
                if ts < since {
                    return None;
                }
            }
            let Some(session_id) = l.session_id.clone() else {
                return None;
            };
            Some(IngestibleRecord {
                session_id,
                cwd: l.cwd.clone(),
                text: text.to_string(),
                ts: l.ts,
                line_number: l.line_number,
                is_final_answer: l.is_final_answer,
                kind: l.kind,
            })
        })
        .collect();

    selected.sort_by_key(|r| r.line_number);
    if let Some(limit) = limit {
        selected.truncate(limit);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_flat_records() {
        let raw = r#"{"session_id":"s1","ts":100,"text":"hello"}"#;
        let lines = parse_history_file_contents(raw);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text.as_deref(), Some("hello"));
    }

    #[test]
    fn parses_structured_session_transcript() {
        let raw = "{\"type\":\"session_meta\",\"session_id\":\"s1\",\"cwd\":\"/u/dev/project-alpha\"}\n\
                    {\"type\":\"event_msg\",\"payload\":{\"type\":\"user_message\",\"message\":\"hi\"},\"ts\":5}\n\
                    {\"type\":\"response_item\",\"phase\":\"final_answer\",\"content\":[{\"text\":\"done\"}]}";
        let lines = parse_history_file_contents(raw);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].cwd.as_deref(), Some("/u/dev/project-alpha"));
        assert!(lines[1].is_final_answer);
    }

    #[test]
    fn skips_malformed_lines() {
        let raw = "not json\n{\"session_id\":\"s1\",\"ts\":1,\"text\":\"ok\"}";
        let lines = parse_history_file_contents(raw);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn select_respects_checkpoint_and_limit_prefix_relationship() {
        let raw = "{\"session_id\":\"s1\",\"ts\":1,\"text\":\"a\"}\n\
                    {\"session_id\":\"s1\",\"ts\":2,\"text\":\"b\"}\n\
                    {\"session_id\":\"s1\",\"ts\":3,\"text\":\"c\"}";
        let lines = parse_history_file_contents(raw);
        let all = select_records_for_ingestion(&lines, 0, None, false, None);
        let limited = select_records_for_ingestion(&lines, 0, None, false, Some(2));
        assert_eq!(all.len(), 3);
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].text, all[0].text);
        assert_eq!(limited[1].text, all[1].text);
    }

    #[test]
    fn select_excludes_already_checkpointed_lines() {
        let raw = "{\"session_id\":\"s1\",\"ts\":1,\"text\":\"a\"}\n\
                    {\"session_id\":\"s1\",\"ts\":2,\"text\":\"b\"}";
        let lines = parse_history_file_contents(raw);
        let selected = select_records_for_ingestion(&lines, 1, None, false, None);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].text, "b");
    }
}
