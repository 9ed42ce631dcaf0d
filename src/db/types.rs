use serde::{Deserialize, Serialize};

/// `platform` tag on a Session (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    HostedAgent,
    Transcript,
    Cursor,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::HostedAgent => "hosted-agent",
            Platform::Transcript => "transcript",
            Platform::Cursor => "cursor",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "transcript" => Platform::Transcript,
            "cursor" => Platform::Cursor,
            _ => Platform::HostedAgent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_db_id: i64,
    pub content_session_id: String,
    pub platform: String,
    pub project: String,
    pub initial_prompt: Option<String>,
    pub memory_session_id: Option<String>,
    pub started_at: String,
    pub started_at_epoch: i64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPrompt {
    pub content_session_id: String,
    pub prompt_number: i64,
    pub prompt_text: String,
    pub created_at_epoch: i64,
}

/// REDESIGN FLAGS: tagged variant instead of a dynamic object with an
/// optional payload shape switched on a string field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum PendingPayload {
    Observation {
        tool_name: String,
        tool_input: Option<String>,
        tool_response: Option<String>,
        cwd: Option<String>,
    },
    Summarize {
        last_assistant_message: String,
    },
}

impl PendingPayload {
    pub fn message_type(&self) -> &'static str {
        match self {
            PendingPayload::Observation { .. } => "observation",
            PendingPayload::Summarize { .. } => "summarize",
        }
    }

    /// Priority used by claim-and-delete: summarize(0) before observation(1).
    pub fn priority(&self) -> i64 {
        match self {
            PendingPayload::Summarize { .. } => 0,
            PendingPayload::Observation { .. } => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: i64,
    pub session_db_id: i64,
    pub content_session_id: String,
    pub payload: PendingPayload,
    pub created_at_epoch: i64,
}

pub const OBSERVATION_TYPES: &[&str] = &[
    "discovery", "bugfix", "feature", "refactor", "decision", "change",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub session_db_id: Option<i64>,
    pub memory_session_id: String,
    pub project: Option<String>,
    pub r#type: String,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub narrative: Option<String>,
    pub facts: Option<String>,
    pub concepts: Option<String>,
    pub files_read: Option<String>,
    pub files_modified: Option<String>,
    pub tokens_used: i64,
    pub created_at: String,
    pub created_at_epoch: i64,
    pub cwd: Option<String>,
    pub status: String,
    pub last_accessed_epoch: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub id: i64,
    pub memory_session_id: String,
    pub project: Option<String>,
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
    pub created_at_epoch: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorKind {
    Observation,
    Summary,
    Prompt,
}

impl VectorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VectorKind::Observation => "observation",
            VectorKind::Summary => "summary",
            VectorKind::Prompt => "prompt",
        }
    }
}

/// A batch write request for `store_observations` — all-or-nothing (spec §4.1).
pub struct NewObservation {
    pub obs_type: String,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub narrative: Option<String>,
    pub facts: Vec<String>,
    pub concepts: Vec<String>,
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,
    pub cwd: Option<String>,
    pub tokens_used: i64,
}

pub struct NewSummary {
    pub request: Option<String>,
    pub investigated: Option<String>,
    pub learned: Option<String>,
    pub completed: Option<String>,
    pub next_steps: Option<String>,
    pub notes: Option<String>,
}

pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub fn project_from_cwd(cwd: &str) -> String {
    std::path::Path::new(cwd)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| cwd.to_string())
}
