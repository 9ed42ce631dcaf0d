//! Shared application state handed to every axum handler. Grounded in
//! `examples/other_examples/09ab0f10_webdesserts-obsidian-memory__crates-memory-src-main.rs.rs`'s
//! `Arc<AppState>` pattern.

use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::agent::Mode;
use crate::scheduler::Scheduler;
use crate::vector::VectorIndex;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SseEvent {
    NewPrompt { session_db_id: i64 },
    SessionStarted { session_db_id: i64 },
    ObservationQueued { session_db_id: i64 },
    SummarizeQueued { session_db_id: i64 },
    SessionCompleted { session_db_id: i64 },
    ProcessingStatus {
        oldest_pending_age_ms: Option<i64>,
        active_providers: usize,
        depth: i64,
    },
}

pub struct SharedState {
    pub db: Mutex<Connection>,
    pub vector: Arc<dyn VectorIndex>,
    pub scheduler: Arc<Scheduler>,
    pub events: broadcast::Sender<SseEvent>,
    pub mode: Mode,
    pub http_client: reqwest::Client,
}

impl SharedState {
    pub fn new(db: Connection, vector: Arc<dyn VectorIndex>, scheduler: Arc<Scheduler>) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            db: Mutex::new(db),
            vector,
            scheduler,
            events,
            mode: Mode::default(),
            http_client: reqwest::Client::new(),
        })
    }

    pub fn broadcast(&self, event: SseEvent) {
        let _ = self.events.send(event);
    }
}
