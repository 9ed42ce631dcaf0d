pub mod schema;
pub mod types;

pub use types::*;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

pub fn db_path() -> std::path::PathBuf {
    crate::config::data_dir().join("memkeep.db")
}

pub fn open_db() -> Result<Connection> {
    let path = db_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(&path)
        .with_context(|| format!("failed to open database: {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    schema::ensure_schema(&conn)?;
    Ok(conn)
}

pub fn open_db_readonly() -> Result<Connection> {
    let path = db_path();
    Connection::open_with_flags(
        &path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open database (readonly): {}", path.display()))
}

pub fn open_db_at(path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    schema::ensure_schema(&conn)?;
    Ok(conn)
}

/// `createOrGetSession` — idempotent on `content_session_id` (spec §4.1).
pub fn create_or_get_session(
    conn: &Connection,
    content_session_id: &str,
    project: &str,
    initial_prompt: Option<&str>,
    platform: Platform,
) -> Result<i64> {
    let now = chrono::Utc::now();
    conn.execute(
        "INSERT INTO sessions (content_session_id, platform, project, initial_prompt, started_at, started_at_epoch, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active')
         ON CONFLICT(content_session_id) DO NOTHING",
        params![
            content_session_id,
            platform.as_str(),
            project,
            initial_prompt,
            now.to_rfc3339(),
            now.timestamp(),
        ],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM sessions WHERE content_session_id = ?1",
        params![content_session_id],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn get_session(conn: &Connection, session_db_id: i64) -> Result<Session> {
    conn.query_row(
        "SELECT id, content_session_id, platform, project, initial_prompt, memory_session_id,
                started_at, started_at_epoch, status
         FROM sessions WHERE id = ?1",
        params![session_db_id],
        map_session_row,
    )
    .context("session not found")
}

pub fn get_session_by_content_id(conn: &Connection, content_session_id: &str) -> Result<Option<Session>> {
    conn.query_row(
        "SELECT id, content_session_id, platform, project, initial_prompt, memory_session_id,
                started_at, started_at_epoch, status
         FROM sessions WHERE content_session_id = ?1",
        params![content_session_id],
        map_session_row,
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other.into()),
    })
}

fn map_session_row(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    Ok(Session {
        session_db_id: row.get(0)?,
        content_session_id: row.get(1)?,
        platform: row.get(2)?,
        project: row.get(3)?,
        initial_prompt: row.get(4)?,
        memory_session_id: row.get(5)?,
        started_at: row.get(6)?,
        started_at_epoch: row.get(7)?,
        status: row.get(8)?,
    })
}

/// Assign a `memory_session_id` once (spec invariant: never overwritten).
pub fn ensure_memory_session_id(conn: &Connection, session_db_id: i64) -> Result<String> {
    let existing: Option<String> = conn.query_row(
        "SELECT memory_session_id FROM sessions WHERE id = ?1",
        params![session_db_id],
        |row| row.get(0),
    )?;
    if let Some(mid) = existing {
        return Ok(mid);
    }
    let content_session_id: String = conn.query_row(
        "SELECT content_session_id FROM sessions WHERE id = ?1",
        params![session_db_id],
        |row| row.get(0),
    )?;
    let mid = format!("mem-{}", truncate_str(&content_session_id, 12));
    conn.execute(
        "UPDATE sessions SET memory_session_id = ?1 WHERE id = ?2 AND memory_session_id IS NULL",
        params![mid, session_db_id],
    )?;
    // Re-read in case of a concurrent racer that won first.
    let mid: String = conn.query_row(
        "SELECT memory_session_id FROM sessions WHERE id = ?1",
        params![session_db_id],
        |row| row.get(0),
    )?;
    Ok(mid)
}

/// `appendUserPrompt` — monotonic `prompt_number` per session (spec §4.1).
pub fn append_user_prompt(conn: &Connection, content_session_id: &str, prompt_text: &str) -> Result<i64> {
    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(prompt_number), 0) + 1 FROM user_prompts WHERE content_session_id = ?1",
        params![content_session_id],
        |row| row.get(0),
    )?;
    let epoch = chrono::Utc::now().timestamp();
    conn.execute(
        "INSERT INTO user_prompts (content_session_id, prompt_number, prompt_text, created_at_epoch)
         VALUES (?1, ?2, ?3, ?4)",
        params![content_session_id, next, prompt_text, epoch],
    )?;
    Ok(next)
}

/// `storeObservations` — atomic at record-set granularity (spec §4.1).
/// `created_at_epoch` is the caller-supplied backlog-preserving timestamp,
/// not "now" (spec invariant: equals the enqueue time of the oldest
/// contributing message).
pub fn store_observations(
    conn: &mut Connection,
    memory_session_id: &str,
    session_db_id: Option<i64>,
    project: &str,
    created_at_epoch: i64,
    observations: &[NewObservation],
    summary: Option<&NewSummary>,
) -> Result<(Vec<i64>, Option<i64>)> {
    let tx = conn.transaction()?;
    let created_at = chrono::DateTime::from_timestamp(created_at_epoch, 0)
        .unwrap_or_else(chrono::Utc::now)
        .to_rfc3339();

    let mut ids = Vec::with_capacity(observations.len());
    for obs in observations {
        let facts = json_or_none(&obs.facts)?;
        let concepts = json_or_none(&obs.concepts)?;
        let files_read = json_or_none(&obs.files_read)?;
        let files_modified = json_or_none(&obs.files_modified)?;

        tx.execute(
            "INSERT INTO observations
               (session_db_id, memory_session_id, project, type, title, subtitle, narrative,
                facts, concepts, files_read, files_modified, cwd, tokens_used,
                created_at, created_at_epoch)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            params![
                session_db_id, memory_session_id, project, obs.obs_type, obs.title, obs.subtitle,
                obs.narrative, facts, concepts, files_read, files_modified, obs.cwd, obs.tokens_used,
                created_at, created_at_epoch,
            ],
        )?;
        let obs_id = tx.last_insert_rowid();
        ids.push(obs_id);

        if !obs.files_modified.is_empty() {
            mark_stale_by_files(&tx, obs_id, project, &obs.files_modified)?;
        }
    }

    let summary_id = if let Some(s) = summary {
        tx.execute(
            "INSERT INTO summaries
               (memory_session_id, project, request, investigated, learned, completed, next_steps, notes,
                created_at, created_at_epoch)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                memory_session_id, project, s.request, s.investigated, s.learned, s.completed,
                s.next_steps, s.notes, created_at, created_at_epoch,
            ],
        )?;
        Some(tx.last_insert_rowid())
    } else {
        None
    };

    tx.commit()?;
    Ok((ids, summary_id))
}

fn json_or_none(items: &[String]) -> Result<Option<String>> {
    if items.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(items)?))
    }
}

pub fn mark_stale_by_files(
    conn: &Connection,
    new_obs_id: i64,
    project: &str,
    files_modified: &[String],
) -> Result<usize> {
    if files_modified.is_empty() {
        return Ok(0);
    }
    let files_json = serde_json::to_string(files_modified)?;
    let count = conn.execute(
        "UPDATE observations SET status = 'stale'
         WHERE id != ?1 AND project = ?2 AND status = 'active'
           AND id IN (
             SELECT DISTINCT o.id FROM observations o, json_each(o.files_modified) AS old_f
             WHERE o.id != ?1 AND o.project = ?2 AND o.status = 'active'
               AND o.files_modified IS NOT NULL AND length(o.files_modified) > 2
               AND old_f.value IN (SELECT value FROM json_each(?3))
           )",
        params![new_obs_id, project, files_json],
    )?;
    Ok(count)
}

/// Distinct project names that have at least one session or observation
/// (spec §4.6 `/projects`, `/projects/diagnostics`).
pub fn ingested_projects(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT project FROM sessions WHERE project IS NOT NULL
         UNION
         SELECT DISTINCT project FROM observations WHERE project IS NOT NULL
         ORDER BY 1",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn update_last_accessed(conn: &Connection, ids: &[i64]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let now = chrono::Utc::now().timestamp();
    let placeholders: Vec<String> = (2..=ids.len() + 1).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "UPDATE observations SET last_accessed_epoch = ?1 WHERE id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(now)];
    for id in ids {
        param_values.push(Box::new(*id));
    }
    let refs: Vec<&dyn rusqlite::types::ToSql> = param_values.iter().map(|b| b.as_ref()).collect();
    stmt.execute(refs.as_slice())?;
    Ok(())
}
