//! Scheduler (C4): at-most-one active agent task per session, global
//! concurrency cap, FIFO wait, cooperative cancellation. Grounded on the
//! `CancellationToken` + per-task bookkeeping + `tokio::select!` shape in
//! `examples/other_examples/876209db_agentiagency-agenticlaw__crates-agenticlaw-agent-src-queue.rs.rs`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use rusqlite::Connection;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::db::PendingMessage;
use crate::http::state::SharedState;
use crate::queue;

struct TaskHandle {
    cancel: CancellationToken,
}

pub struct Scheduler {
    active: Mutex<HashMap<i64, TaskHandle>>,
    global_cap: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(global_concurrency_cap: usize) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            global_cap: Arc::new(Semaphore::new(global_concurrency_cap)),
        }
    }

    /// Ensure an agent task is running for `session_db_id`. If one is
    /// already active, this is a no-op — the running task will re-check
    /// the queue before exiting (spec §4.2).
    pub async fn ensure_running(self: &Arc<Self>, state: Arc<SharedState>, session_db_id: i64) {
        let mut active = self.active.lock().unwrap();
        if active.contains_key(&session_db_id) {
            return;
        }
        let cancel = CancellationToken::new();
        active.insert(session_db_id, TaskHandle { cancel: cancel.clone() });
        drop(active);

        let scheduler = self.clone();
        let global_cap = self.global_cap.clone();
        tokio::spawn(async move {
            // FIFO wait on the global cap: excess sessions queue here.
            let Ok(permit) = global_cap.acquire_owned().await else {
                scheduler.active.lock().unwrap().remove(&session_db_id);
                return;
            };
            crate::agent::run_session_loop(state, session_db_id, cancel).await;
            drop(permit);
            scheduler.active.lock().unwrap().remove(&session_db_id);
        });
    }

    /// Attempt one more claim for `session_db_id` and, if the queue is
    /// empty, deregister it from `active` as a single atomic step (spec
    /// §4.2: "before exiting it re-checks the queue atomically"). Called
    /// from the agent loop in place of a bare `queue::claim_and_delete`: a
    /// claimed message keeps the session registered so the loop continues;
    /// an empty queue removes the entry under the same lock the claim was
    /// made under, so a concurrent `ensure_running` can never observe a
    /// stale "still active" entry for a task that has already decided to
    /// stop.
    pub fn claim_or_deregister(&self, conn: &Connection, session_db_id: i64) -> Result<Option<PendingMessage>> {
        let mut active = self.active.lock().unwrap();
        match queue::claim_and_delete(conn, session_db_id)? {
            Some(msg) => Ok(Some(msg)),
            None => {
                active.remove(&session_db_id);
                Ok(None)
            }
        }
    }

    /// `DELETE /sessions/:id` and worker shutdown both route through here:
    /// deliver cancellation, the agent stops at its next suspension point
    /// without committing the in-flight turn (spec §5).
    pub async fn cancel_session(&self, session_db_id: i64) {
        if let Some(handle) = self.active.lock().unwrap().get(&session_db_id) {
            handle.cancel.cancel();
        }
    }

    pub async fn cancel_all(&self) {
        let active = self.active.lock().unwrap();
        for handle in active.values() {
            handle.cancel.cancel();
        }
    }

    pub async fn active_session_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }
}
