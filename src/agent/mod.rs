//! Agent (C5): provider-polymorphic per-session processing loop. Generalizes
//! the teacher's `ai.rs` (provider dispatch), `observe.rs` (parse +
//! persistence pipeline), and `memory_format.rs` (the more robust parser)
//! into the uniform `startSession(session, worker)` contract from spec
//! §4.3, with explicit fallback composition per REDESIGN FLAGS.

pub mod fallback;
pub mod parser;
pub mod prompts;
pub mod providers;
pub mod rate_limit;
pub mod usage;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::db::{self, NewObservation, NewSummary};
use crate::http::state::{SharedState, SseEvent};
use rate_limit::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// A small configuration bundle naming the allowed observation types,
/// concept tags, and prompt templates for a deployment (spec GLOSSARY
/// "Mode"). One default mode ships; operators may not yet customise it —
/// no config surface reads a different one today.
#[derive(Debug, Clone)]
pub struct Mode {
    pub name: String,
    pub allowed_observation_types: Vec<String>,
}

impl Default for Mode {
    fn default() -> Self {
        Mode {
            name: "default".to_string(),
            allowed_observation_types: db::OBSERVATION_TYPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Per-session conversation history, owned by the Session object so a
/// fallback agent can pick it up mid-turn without the handing-over agent
/// retaining ownership (REDESIGN FLAGS: "conversation history shared
/// across fallback").
pub struct Session {
    pub session_db_id: i64,
    pub memory_session_id: String,
    pub project: String,
    pub initial_prompt: String,
    pub history: Mutex<Vec<(Role, String)>>,
    pub cancel: CancellationToken,
}

impl Session {
    pub async fn append(&self, role: Role, text: String) {
        self.history.lock().await.push((role, text));
    }

    /// True if the last turn is an unanswered user message — the replay
    /// case when a fallback agent picks up after a failed provider call.
    async fn dangling_user_turn(&self) -> Option<String> {
        let history = self.history.lock().await;
        match history.last() {
            Some((Role::User, text)) => Some(text.clone()),
            _ => None,
        }
    }

    async fn snapshot(&self) -> Vec<(Role, String)> {
        self.history.lock().await.clone()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

/// Failure taxonomy for a single provider call (spec §4.3/§7).
#[derive(Debug, Clone)]
pub enum CallError {
    Network(String),
    Upstream5xx(u16),
    RateLimited,
    ModelNotFound,
    BadRequest(String),
    EmptyResponse,
    Timeout,
    Cancelled,
}

impl CallError {
    /// transient + rate-limited + empty-response are fallback-eligible;
    /// permanent (4xx other than rate-limited) is not.
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            CallError::Network(_)
                | CallError::Upstream5xx(_)
                | CallError::RateLimited
                | CallError::Timeout
                | CallError::EmptyResponse
        )
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Network(msg) => write!(f, "network error: {msg}"),
            CallError::Upstream5xx(code) => write!(f, "upstream {code}"),
            CallError::RateLimited => write!(f, "rate limited"),
            CallError::ModelNotFound => write!(f, "model not found"),
            CallError::BadRequest(msg) => write!(f, "bad request: {msg}"),
            CallError::EmptyResponse => write!(f, "empty response"),
            CallError::Timeout => write!(f, "timeout"),
            CallError::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug)]
pub enum AgentError {
    Cancelled,
    Fatal(anyhow::Error),
}

impl From<anyhow::Error> for AgentError {
    fn from(e: anyhow::Error) -> Self {
        AgentError::Fatal(e)
    }
}

/// A single LLM backend. Hosted-chat, local-HTTP, and CLI-subprocess are
/// three implementations of this one trait (spec §4.3 "uniform contract").
#[async_trait]
pub trait Provider: Send + Sync {
    async fn call(&self, history: &[(Role, String)]) -> Result<ProviderResponse, CallError>;
    fn model(&self) -> &str;
    fn rate_limiter(&self) -> Option<&RateLimiter> {
        None
    }
}

/// The `Agent` capability set from REDESIGN FLAGS: `startSession` plus
/// (implicitly, via construction) an optional fallback. Fallback is
/// explicit composition, never a subclass override.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn start_session(&self, session: Arc<Session>, state: Arc<SharedState>) -> Result<(), AgentError>;
}

/// Wraps one `Provider` with an optional fallback `Agent` and a `Mode`.
/// This is the concrete `Agent` implementation shared by all three
/// provider variants — they differ only in their `Provider::call`.
pub struct ProviderAgent {
    pub provider: Box<dyn Provider>,
    pub fallback: Option<Box<dyn Agent>>,
    pub mode: Mode,
}

#[async_trait]
impl Agent for ProviderAgent {
    async fn start_session(&self, session: Arc<Session>, state: Arc<SharedState>) -> Result<(), AgentError> {
        loop {
            if session.cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let dangling = session.dangling_user_turn().await;
            let created_at_epoch = if dangling.is_some() {
                None
            } else {
                let claimed = {
                    let conn = state.db.lock().await;
                    state.scheduler.claim_or_deregister(&conn, session.session_db_id)?
                };
                match claimed {
                    Some(msg) => {
                        let (prompt, is_summary) = build_prompt(&session, &msg.payload);
                        session.append(Role::User, prompt).await;
                        state.broadcast(SseEvent::ObservationQueued { session_db_id: session.session_db_id });
                        let _ = is_summary;
                        Some(msg.created_at_epoch)
                    }
                    None => break,
                }
            };

            if let Some(limiter) = self.provider.rate_limiter() {
                limiter.wait_turn(self.provider.model()).await;
            }

            let history = session.snapshot().await;
            match call_with_retry(self.provider.as_ref(), &history, &session.cancel).await {
                Ok(response) => {
                    session.append(Role::Assistant, response.text.clone()).await;
                    let epoch = created_at_epoch.unwrap_or_else(|| chrono::Utc::now().timestamp());
                    if let Err(e) = persist_turn(&session, &state, &self.mode, &response, epoch).await {
                        tracing::warn!(error = %e, session_db_id = session.session_db_id, "failed to persist agent turn");
                    }
                }
                Err(err) if err.is_fallback_eligible() => {
                    if let Some(fallback) = &self.fallback {
                        tracing::warn!(error = %err, "provider call failed, handing off to fallback agent");
                        return fallback.start_session(session, state).await;
                    }
                    // No fallback configured: preserve memory per the
                    // parse-empty rule rather than lose the event entirely.
                    session
                        .append(Role::Assistant, format!("<observation><type>discovery</type><narrative>provider call failed: {err}</narrative></observation>"))
                        .await;
                }
                Err(err) => {
                    tracing::error!(error = %err, "non-retryable provider error, dropping turn");
                    session.append(Role::Assistant, String::new()).await;
                }
            }
        }

        state.broadcast(SseEvent::SessionCompleted { session_db_id: session.session_db_id });
        Ok(())
    }
}

/// Retries a transient provider failure (spec §4.3/§7: "retry per provider
/// rules, then fall back") before the caller ever consults
/// `is_fallback_eligible()` for a handoff decision. Reuses
/// `ingest::retry::RetryPolicy`'s backoff shape, the only retry machinery
/// in the tree, rather than inventing a second one.
async fn call_with_retry(
    provider: &dyn Provider,
    history: &[(Role, String)],
    cancel: &CancellationToken,
) -> Result<ProviderResponse, CallError> {
    let policy = crate::ingest::retry::RetryPolicy::default();
    let mut attempt = 0;
    loop {
        attempt += 1;
        match provider.call(history).await {
            Ok(response) => return Ok(response),
            Err(err) if err.is_fallback_eligible() && attempt < policy.max_attempts => {
                let delay = policy.base_delay_ms * 2u64.pow(attempt - 1);
                tracing::warn!(error = %err, attempt, delay_ms = delay, "transient provider error, retrying before fallback");
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_millis(delay)) => {}
                    _ = cancel.cancelled() => return Err(CallError::Cancelled),
                }
            }
            Err(err) => return Err(err),
        }
    }
}

fn build_prompt(session: &Session, payload: &db::PendingPayload) -> (String, bool) {
    match payload {
        db::PendingPayload::Observation { tool_name, tool_input, tool_response, cwd } => {
            let prompt = format!(
                "<tool_event>\n<tool_name>{}</tool_name>\n<tool_input>{}</tool_input>\n<tool_response>{}</tool_response>\n<cwd>{}</cwd>\n</tool_event>",
                parser::xml_escape_text(tool_name),
                tool_input.as_deref().map(parser::xml_escape_text).unwrap_or_default(),
                tool_response.as_deref().map(parser::xml_escape_text).unwrap_or_default(),
                cwd.as_deref().unwrap_or_default(),
            );
            (prompt, false)
        }
        db::PendingPayload::Summarize { last_assistant_message } => {
            let prompt = format!(
                "<summarize_request>\n<initial_prompt>{}</initial_prompt>\n<last_assistant_message>{}</last_assistant_message>\n</summarize_request>",
                parser::xml_escape_text(&session.initial_prompt),
                parser::xml_escape_text(last_assistant_message),
            );
            (prompt, true)
        }
    }
}

async fn persist_turn(
    session: &Session,
    state: &SharedState,
    mode: &Mode,
    response: &ProviderResponse,
    created_at_epoch: i64,
) -> anyhow::Result<()> {
    let usage = usage::Usage::from_provider(
        response.input_tokens,
        response.output_tokens,
        response.total_tokens,
        "",
        &response.text,
    );

    let parsed_obs = parser::parse_observations(&response.text);
    let new_observations: Vec<NewObservation> = parsed_obs
        .into_iter()
        .filter(|o| mode.allowed_observation_types.contains(&o.obs_type))
        .map(|o| NewObservation {
            obs_type: o.obs_type,
            title: o.title,
            subtitle: o.subtitle,
            narrative: o.narrative,
            facts: o.facts,
            concepts: o.concepts,
            files_read: o.files_read,
            files_modified: o.files_modified,
            cwd: None,
            tokens_used: usage.total(),
        })
        .collect();

    let has_summary_tag = response.text.contains("<summary");
    let new_summary = if has_summary_tag {
        let parsed = parser::parse_summary(&response.text, &session.initial_prompt);
        Some(NewSummary {
            request: parsed.request,
            investigated: parsed.investigated,
            learned: parsed.learned,
            completed: parsed.completed,
            next_steps: parsed.next_steps,
            notes: parsed.notes,
        })
    } else {
        None
    };

    if new_observations.is_empty() && new_summary.is_none() {
        return Ok(());
    }

    let mut conn = state.db.lock().await;
    let (obs_ids, summary_id) = db::store_observations(
        &mut conn,
        &session.memory_session_id,
        Some(session.session_db_id),
        &session.project,
        created_at_epoch,
        &new_observations,
        new_summary.as_ref(),
    )?;
    drop(conn);

    // No embedding provider is wired in yet; VectorIndex::upsert is only
    // ever invoked once embeddings are actually computed elsewhere, so
    // observation ids are not pushed through it here (NullVectorIndex
    // would make this a no-op regardless — see vector.rs).
    let _ = obs_ids;
    if summary_id.is_some() {
        state.broadcast(SseEvent::SessionCompleted { session_db_id: session.session_db_id });
    }
    Ok(())
}

/// Entry point called by the Scheduler for one session's task. Builds (or
/// resumes) the `Session`, selects the configured `Agent` chain, and runs
/// it to completion.
pub async fn run_session_loop(state: Arc<SharedState>, session_db_id: i64, cancel: CancellationToken) {
    let session = match build_session(&state, session_db_id, cancel).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %e, session_db_id, "failed to build session for agent task");
            return;
        }
    };

    let agent = fallback::build_agent(&state);
    if let Err(e) = agent.start_session(session, state.clone()).await {
        match e {
            AgentError::Cancelled => tracing::info!(session_db_id, "agent task cancelled"),
            AgentError::Fatal(err) => tracing::error!(error = %err, session_db_id, "agent task failed"),
        }
    }
}

async fn build_session(state: &Arc<SharedState>, session_db_id: i64, cancel: CancellationToken) -> anyhow::Result<Session> {
    let (memory_session_id, project, initial_prompt) = {
        let conn = state.db.lock().await;
        let memory_session_id = db::ensure_memory_session_id(&conn, session_db_id)?;
        let session_row = db::get_session(&conn, session_db_id)?;
        (memory_session_id, session_row.project, session_row.initial_prompt.unwrap_or_default())
    };
    Ok(Session {
        session_db_id,
        memory_session_id,
        project,
        initial_prompt,
        history: Mutex::new(Vec::new()),
        cancel,
    })
}
