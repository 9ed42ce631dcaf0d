//! PendingQueue (C3). Generalizes the teacher's `enqueue_pending` /
//! `dequeue_pending` / `delete_pending` / `count_pending` into the typed
//! operations of spec §4.2, replacing the lease-based claim referenced
//! (but never defined) in the teacher's `observe.rs` with the simpler,
//! spec-mandated atomic claim-and-delete (no in-progress state).

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::db::{PendingMessage, PendingPayload};

/// Per-session cap on in-flight pending messages (spec §4.2: "small,
/// e.g. 3"). Over-cap enqueues are rejected to the caller, never dropped.
pub const DEFAULT_SESSION_CAP: i64 = 3;

#[derive(Debug)]
pub struct OverCapacity {
    pub current: i64,
    pub cap: i64,
}

impl std::fmt::Display for OverCapacity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session queue at capacity ({}/{})", self.current, self.cap)
    }
}
impl std::error::Error for OverCapacity {}

pub fn count_active(conn: &Connection, session_db_id: i64) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pending_messages WHERE session_db_id = ?1",
        params![session_db_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// `enqueue(session_db_id, message)` — rejects over the per-session cap.
pub fn enqueue(
    conn: &Connection,
    session_db_id: i64,
    content_session_id: &str,
    payload: &PendingPayload,
    cap: i64,
) -> Result<Result<i64, OverCapacity>> {
    let current = count_active(conn, session_db_id)?;
    if current >= cap {
        return Ok(Err(OverCapacity { current, cap }));
    }
    let epoch = chrono::Utc::now().timestamp();
    let payload_json = serde_json::to_string(payload)?;
    conn.execute(
        "INSERT INTO pending_messages
           (session_db_id, content_session_id, message_type, priority, payload, created_at_epoch)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            session_db_id,
            content_session_id,
            payload.message_type(),
            payload.priority(),
            payload_json,
            epoch,
        ],
    )?;
    Ok(Ok(conn.last_insert_rowid()))
}

/// `claimAndDelete(session_db_id) -> message?` — strict order:
/// priority ascending (summarize before observation), then id ascending.
/// Claim and delete are one atomic statement: there is no in-progress
/// state to lose track of on crash (spec §4.2, §9).
pub fn claim_and_delete(conn: &Connection, session_db_id: i64) -> Result<Option<PendingMessage>> {
    let mut stmt = conn.prepare(
        "DELETE FROM pending_messages
         WHERE id = (
           SELECT id FROM pending_messages
           WHERE session_db_id = ?1
           ORDER BY priority ASC, id ASC
           LIMIT 1
         )
         RETURNING id, session_db_id, content_session_id, payload, created_at_epoch",
    )?;
    let row = stmt
        .query_row(params![session_db_id], |row| {
            let payload_json: String = row.get(3)?;
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                payload_json,
                row.get::<_, i64>(4)?,
            ))
        })
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    let Some((id, session_db_id, content_session_id, payload_json, created_at_epoch)) = row else {
        return Ok(None);
    };
    let payload: PendingPayload = serde_json::from_str(&payload_json)?;
    Ok(Some(PendingMessage {
        id,
        session_db_id,
        content_session_id,
        payload,
        created_at_epoch,
    }))
}

/// Across all sessions, the age in milliseconds of the oldest active
/// message (UI back-pressure hint for `processing_status` SSE events).
pub fn oldest_active_message_age_ms(conn: &Connection, now_epoch_ms: i64) -> Result<Option<i64>> {
    let oldest: Option<i64> = conn
        .query_row(
            "SELECT MIN(created_at_epoch) FROM pending_messages",
            [],
            |row| row.get(0),
        )
        .unwrap_or(None);
    Ok(oldest.map(|epoch_secs| now_epoch_ms - epoch_secs * 1000))
}

pub fn total_active_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM pending_messages", [], |row| row.get(0))?;
    Ok(count)
}

pub fn get_queue_messages(conn: &Connection, session_db_id: Option<i64>) -> Result<Vec<PendingMessage>> {
    let (sql, has_filter) = if session_db_id.is_some() {
        (
            "SELECT id, session_db_id, content_session_id, payload, created_at_epoch
             FROM pending_messages WHERE session_db_id = ?1 ORDER BY priority ASC, id ASC",
            true,
        )
    } else {
        (
            "SELECT id, session_db_id, content_session_id, payload, created_at_epoch
             FROM pending_messages ORDER BY session_db_id, priority ASC, id ASC",
            false,
        )
    };
    let mut stmt = conn.prepare(sql)?;
    let map_row = |row: &rusqlite::Row| -> rusqlite::Result<(i64, i64, String, String, i64)> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
        ))
    };
    let rows: Vec<_> = if has_filter {
        stmt.query_map(params![session_db_id.unwrap()], map_row)?
            .collect::<rusqlite::Result<_>>()?
    } else {
        stmt.query_map([], map_row)?.collect::<rusqlite::Result<_>>()?
    };

    let mut result = Vec::with_capacity(rows.len());
    for (id, session_db_id, content_session_id, payload_json, created_at_epoch) in rows {
        result.push(PendingMessage {
            id,
            session_db_id,
            content_session_id,
            payload: serde_json::from_str(&payload_json)?,
            created_at_epoch,
        });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::schema::ensure_schema(&conn).unwrap();
        conn
    }

    fn obs(tool: &str) -> PendingPayload {
        PendingPayload::Observation {
            tool_name: tool.to_string(),
            tool_input: None,
            tool_response: None,
            cwd: None,
        }
    }

    fn sum() -> PendingPayload {
        PendingPayload::Summarize {
            last_assistant_message: "done".to_string(),
        }
    }

    /// Scenario 1 (spec §8): enqueue [obs1, sum1, obs2, sum2] on one
    /// session; claims yield exactly [sum1, sum2, obs1, obs2].
    #[test]
    fn priority_scenario_from_spec() -> Result<()> {
        let conn = setup();
        enqueue(&conn, 1, "s1", &obs("Write"), 10)?.unwrap();
        enqueue(&conn, 1, "s1", &sum(), 10)?.unwrap();
        enqueue(&conn, 1, "s1", &obs("Edit"), 10)?.unwrap();
        enqueue(&conn, 1, "s1", &sum(), 10)?.unwrap();

        let mut kinds = Vec::new();
        while let Some(msg) = claim_and_delete(&conn, 1)? {
            kinds.push(msg.payload.message_type().to_string());
        }
        assert_eq!(kinds, vec!["summarize", "summarize", "observation", "observation"]);
        Ok(())
    }

    #[test]
    fn over_cap_enqueue_is_rejected_not_dropped() -> Result<()> {
        let conn = setup();
        for _ in 0..3 {
            enqueue(&conn, 1, "s1", &obs("Write"), 3)?.unwrap();
        }
        let result = enqueue(&conn, 1, "s1", &obs("Write"), 3)?;
        assert!(result.is_err());
        assert_eq!(count_active(&conn, 1)?, 3);
        Ok(())
    }

    #[test]
    fn claim_and_delete_is_atomic_no_partial_state() -> Result<()> {
        let conn = setup();
        enqueue(&conn, 1, "s1", &obs("Write"), 10)?.unwrap();
        let claimed = claim_and_delete(&conn, 1)?;
        assert!(claimed.is_some());
        assert_eq!(count_active(&conn, 1)?, 0);
        assert_eq!(claim_and_delete(&conn, 1)?.map(|_| ()), None);
        Ok(())
    }
}
