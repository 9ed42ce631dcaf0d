//! QueryEngine (C7): search, timeline, get_observations, prompt search
//! with vector-then-relational fallback (spec §4.5). Generalizes the
//! teacher's `search.rs` + `db_query.rs`; the FTS ranking formula (bm25
//! weighted by recency decay plus a stale-status penalty) is kept as the
//! base relevance function. The `clamp()`-style input-sanitizing helper is
//! adopted from
//! `examples/other_examples/e96e7ad2_viablesys-nmem__src-s1_serve.rs.rs`.

use anyhow::Result;
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Connection};
use serde::Serialize;

use crate::db::{Observation, Summary, UserPrompt};
use crate::vector::VectorIndex;

pub fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, max)
}

#[derive(Debug, Default, Clone)]
pub struct SearchFilter {
    pub project: Option<String>,
    pub obs_type: Option<String>,
    pub date_start: Option<i64>,
    pub date_end: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub kind: &'static str,
    pub title: String,
    pub created_at: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
    pub has_more: bool,
}

const RECENCY_HALF_LIFE_SECS: f64 = 7.0 * 24.0 * 3600.0;
const STALE_PENALTY: f64 = 0.5;

fn recency_weight(now_epoch: i64, created_at_epoch: i64) -> f64 {
    let age = (now_epoch - created_at_epoch).max(0) as f64;
    0.5f64.powf(age / RECENCY_HALF_LIFE_SECS)
}

/// Full-text search over observations, bounded by `filter` and ranked by
/// `bm25 * recency_decay * stale_penalty` (teacher's formula, generalized
/// with the additional filters spec §4.5 names).
pub fn search_observations(conn: &Connection, query: &str, filter: &SearchFilter, limit: i64, offset: i64) -> Result<SearchResult> {
    let now = chrono::Utc::now().timestamp();
    let mut sql = String::from(
        "SELECT o.id, o.title, o.created_at, o.created_at_epoch, o.status,
                bm25(observations_fts) AS rank
         FROM observations_fts
         JOIN observations o ON o.id = observations_fts.rowid
         WHERE observations_fts MATCH ?1",
    );
    let mut sql_params: Vec<SqlValue> = vec![SqlValue::from(query.to_string())];
    let mut idx = 2;
    if let Some(project) = &filter.project {
        sql.push_str(&format!(" AND o.project = ?{idx}"));
        sql_params.push(SqlValue::from(project.clone()));
        idx += 1;
    }
    if let Some(obs_type) = &filter.obs_type {
        sql.push_str(&format!(" AND o.type = ?{idx}"));
        sql_params.push(SqlValue::from(obs_type.clone()));
        idx += 1;
    }
    if let Some(start) = filter.date_start {
        sql.push_str(&format!(" AND o.created_at_epoch >= ?{idx}"));
        sql_params.push(SqlValue::from(start));
        idx += 1;
    }
    if let Some(end) = filter.date_end {
        sql.push_str(&format!(" AND o.created_at_epoch <= ?{idx}"));
        sql_params.push(SqlValue::from(end));
        idx += 1;
    }
    sql.push_str(" ORDER BY rank LIMIT ?");
    sql_params.push(SqlValue::from(limit + offset + 1));
    let _ = idx;

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(sql_params.iter()), |row| {
        let rank: f64 = row.get(5)?;
        let created_at_epoch: i64 = row.get(3)?;
        let status: String = row.get(4)?;
        let stale_factor = if status == "stale" { STALE_PENALTY } else { 1.0 };
        let score = (-rank) * recency_weight(now, created_at_epoch) * stale_factor;
        Ok(SearchHit {
            id: row.get(0)?,
            kind: "observation",
            title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            created_at: row.get(2)?,
            score,
        })
    })?;

    let mut all: Vec<SearchHit> = rows.collect::<rusqlite::Result<_>>()?;
    all.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let has_more = all.len() as i64 > offset + limit;
    let hits = all.into_iter().skip(offset as usize).take(limit as usize).collect();
    Ok(SearchResult { hits, has_more })
}

pub fn search_summaries(conn: &Connection, query: &str, project: Option<&str>, limit: i64, offset: i64) -> Result<SearchResult> {
    let mut sql = String::from(
        "SELECT s.id, s.request, s.created_at, bm25(summaries_fts) AS rank
         FROM summaries_fts JOIN summaries s ON s.id = summaries_fts.rowid
         WHERE summaries_fts MATCH ?1",
    );
    let mut sql_params: Vec<SqlValue> = vec![SqlValue::from(query.to_string())];
    if let Some(project) = project {
        sql.push_str(" AND s.project = ?2");
        sql_params.push(SqlValue::from(project.to_string()));
    }
    sql.push_str(" ORDER BY rank LIMIT ?");
    sql_params.push(SqlValue::from(limit + offset + 1));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(sql_params.iter()), |row| {
        let rank: f64 = row.get(3)?;
        Ok(SearchHit {
            id: row.get(0)?,
            kind: "summary",
            title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            created_at: row.get(2)?,
            score: -rank,
        })
    })?;
    let all: Vec<SearchHit> = rows.collect::<rusqlite::Result<_>>()?;
    let has_more = all.len() as i64 > offset + limit;
    let hits = all.into_iter().skip(offset as usize).take(limit as usize).collect();
    Ok(SearchResult { hits, has_more })
}

/// `searchUserPrompts` against the relational backend (the fallback leg
/// of C7's vector-then-relational prompt search).
pub fn search_user_prompts_fts(conn: &Connection, query: &str, project_like: Option<&str>, limit: i64) -> Result<Vec<UserPrompt>> {
    let _ = project_like; // user_prompts carries no project column directly; filtering happens by content_session_id join when needed.
    let mut stmt = conn.prepare(
        "SELECT up.content_session_id, up.prompt_number, up.prompt_text, up.created_at_epoch
         FROM user_prompts_fts
         JOIN user_prompts up ON up.rowid = user_prompts_fts.rowid
         WHERE user_prompts_fts MATCH ?1
         ORDER BY bm25(user_prompts_fts)
         LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![query, limit], |row| {
        Ok(UserPrompt {
            content_session_id: row.get(0)?,
            prompt_number: row.get(1)?,
            prompt_text: row.get(2)?,
            created_at_epoch: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub struct PromptSearchResult {
    pub prompts: Vec<UserPrompt>,
    pub source: &'static str,
}

/// Resolve vector hits (`ref_id` = `user_prompts.rowid`, since the table's
/// composite primary key isn't declared `WITHOUT ROWID`) back into rows,
/// preserving the vector index's ranking order.
fn get_prompts_by_rowid(conn: &Connection, rowids: &[i64]) -> Result<Vec<UserPrompt>> {
    let mut found = std::collections::HashMap::new();
    let mut stmt = conn.prepare(
        "SELECT rowid, content_session_id, prompt_number, prompt_text, created_at_epoch
         FROM user_prompts WHERE rowid = ?1",
    )?;
    for &rowid in rowids {
        if let Some(row) = stmt
            .query_map(params![rowid], |row| {
                Ok(UserPrompt {
                    content_session_id: row.get(1)?,
                    prompt_number: row.get(2)?,
                    prompt_text: row.get(3)?,
                    created_at_epoch: row.get(4)?,
                })
            })?
            .next()
        {
            found.insert(rowid, row?);
        }
    }
    Ok(rowids.iter().filter_map(|id| found.remove(id)).collect())
}

/// Query VectorIndex first for `kind=prompt`; on empty result, fall back
/// to Store full-text and mark `source=sqlite` (spec §4.5 mandatory
/// relational fallback).
pub fn search_prompts(
    conn: &Connection,
    vector: &dyn VectorIndex,
    query_embedding: Option<&[f32]>,
    text_query: &str,
    limit: i64,
) -> Result<PromptSearchResult> {
    if let Some(embedding) = query_embedding {
        let hits = vector.query(conn, crate::db::VectorKind::Prompt, embedding, limit as usize)?;
        if !hits.is_empty() {
            let rowids: Vec<i64> = hits.into_iter().map(|(ref_id, _score)| ref_id).collect();
            let prompts = get_prompts_by_rowid(conn, &rowids)?;
            return Ok(PromptSearchResult { prompts, source: "vector" });
        }
    }
    let prompts = search_user_prompts_fts(conn, text_query, None, limit)?;
    Ok(PromptSearchResult { prompts, source: "sqlite" })
}

/// Interleaved chronological window around an anchor (spec §4.5 timeline).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum TimelineEntry {
    Observation(Observation),
    Summary(Summary),
}

fn entry_epoch(entry: &TimelineEntry) -> i64 {
    match entry {
        TimelineEntry::Observation(o) => o.created_at_epoch,
        TimelineEntry::Summary(s) => s.created_at_epoch,
    }
}

/// Interleaves observations and summaries chronologically around an
/// anchor epoch, `depth_before` entries at or before it (descending, then
/// reversed) and `depth_after` strictly after it (ascending).
pub fn timeline(conn: &Connection, anchor_epoch: i64, project: Option<&str>, depth_before: i64, depth_after: i64) -> Result<Vec<TimelineEntry>> {
    let project_clause_o = if project.is_some() { "AND project = ?2" } else { "" };
    let project_clause_s = if project.is_some() { "AND project = ?2" } else { "" };

    let fetch_side = |cmp: &str, order: &str, limit: i64| -> Result<Vec<TimelineEntry>> {
        let obs_sql = format!(
            "SELECT id, session_db_id, memory_session_id, project, type, title, subtitle, narrative,
                    facts, concepts, files_read, files_modified, tokens_used, created_at, created_at_epoch,
                    cwd, status, last_accessed_epoch
             FROM observations WHERE created_at_epoch {cmp} ?1 {project_clause_o}
             ORDER BY created_at_epoch {order} LIMIT ?3"
        );
        let mut stmt = conn.prepare(&obs_sql)?;
        let obs_rows: Vec<Observation> = if let Some(p) = project {
            stmt.query_map(params![anchor_epoch, p, limit], map_observation_row)?.collect::<rusqlite::Result<_>>()?
        } else {
            stmt.query_map(params![anchor_epoch, limit], map_observation_row)?.collect::<rusqlite::Result<_>>()?
        };

        let sum_sql = format!(
            "SELECT id, memory_session_id, project, request, investigated, learned, completed, next_steps, notes, created_at, created_at_epoch
             FROM summaries WHERE created_at_epoch {cmp} ?1 {project_clause_s}
             ORDER BY created_at_epoch {order} LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sum_sql)?;
        let sum_rows: Vec<Summary> = if let Some(p) = project {
            stmt.query_map(params![anchor_epoch, p, limit], map_summary_row)?.collect::<rusqlite::Result<_>>()?
        } else {
            stmt.query_map(params![anchor_epoch, limit], map_summary_row)?.collect::<rusqlite::Result<_>>()?
        };

        let mut merged: Vec<TimelineEntry> = obs_rows
            .into_iter()
            .map(TimelineEntry::Observation)
            .chain(sum_rows.into_iter().map(TimelineEntry::Summary))
            .collect();
        merged.sort_by_key(entry_epoch);
        if order == "DESC" {
            merged.reverse();
            merged.truncate(limit as usize);
            merged.reverse();
        } else {
            merged.truncate(limit as usize);
        }
        Ok(merged)
    };

    let mut before = fetch_side("<=", "DESC", depth_before)?;
    let after = fetch_side(">", "ASC", depth_after)?;
    before.extend(after);
    Ok(before)
}

fn map_observation_row(row: &rusqlite::Row) -> rusqlite::Result<Observation> {
    Ok(Observation {
        id: row.get(0)?,
        session_db_id: row.get(1)?,
        memory_session_id: row.get(2)?,
        project: row.get(3)?,
        r#type: row.get(4)?,
        title: row.get(5)?,
        subtitle: row.get(6)?,
        narrative: row.get(7)?,
        facts: row.get(8)?,
        concepts: row.get(9)?,
        files_read: row.get(10)?,
        files_modified: row.get(11)?,
        tokens_used: row.get(12)?,
        created_at: row.get(13)?,
        created_at_epoch: row.get(14)?,
        cwd: row.get(15)?,
        status: row.get(16)?,
        last_accessed_epoch: row.get(17)?,
    })
}

/// Plain chronological listing (no FTS `MATCH`, used by the listing
/// endpoints rather than the search endpoint).
pub fn list_observations(conn: &Connection, project: Option<&str>, limit: i64) -> Result<Vec<Observation>> {
    let sql = if project.is_some() {
        "SELECT id, session_db_id, memory_session_id, project, type, title, subtitle, narrative,
                facts, concepts, files_read, files_modified, tokens_used, created_at, created_at_epoch,
                cwd, status, last_accessed_epoch
         FROM observations WHERE project = ?1 ORDER BY created_at_epoch DESC LIMIT ?2"
    } else {
        "SELECT id, session_db_id, memory_session_id, project, type, title, subtitle, narrative,
                facts, concepts, files_read, files_modified, tokens_used, created_at, created_at_epoch,
                cwd, status, last_accessed_epoch
         FROM observations ORDER BY created_at_epoch DESC LIMIT ?1"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = if let Some(p) = project {
        stmt.query_map(params![p, limit], map_observation_row)?.collect::<rusqlite::Result<_>>()?
    } else {
        stmt.query_map(params![limit], map_observation_row)?.collect::<rusqlite::Result<_>>()?
    };
    Ok(rows)
}

fn map_summary_row(row: &rusqlite::Row) -> rusqlite::Result<Summary> {
    Ok(Summary {
        id: row.get(0)?,
        memory_session_id: row.get(1)?,
        project: row.get(2)?,
        request: row.get(3)?,
        investigated: row.get(4)?,
        learned: row.get(5)?,
        completed: row.get(6)?,
        next_steps: row.get(7)?,
        notes: row.get(8)?,
        created_at: row.get(9)?,
        created_at_epoch: row.get(10)?,
    })
}

pub fn list_summaries(conn: &Connection, project: Option<&str>, limit: i64) -> Result<Vec<Summary>> {
    let sql = if project.is_some() {
        "SELECT id, memory_session_id, project, request, investigated, learned, completed, next_steps, notes, created_at, created_at_epoch
         FROM summaries WHERE project = ?1 ORDER BY created_at_epoch DESC LIMIT ?2"
    } else {
        "SELECT id, memory_session_id, project, request, investigated, learned, completed, next_steps, notes, created_at, created_at_epoch
         FROM summaries ORDER BY created_at_epoch DESC LIMIT ?1"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = if let Some(p) = project {
        stmt.query_map(params![p, limit], map_summary_row)?.collect::<rusqlite::Result<_>>()?
    } else {
        stmt.query_map(params![limit], map_summary_row)?.collect::<rusqlite::Result<_>>()?
    };
    Ok(rows)
}

pub fn list_prompts(conn: &Connection, limit: i64) -> Result<Vec<UserPrompt>> {
    let mut stmt = conn.prepare(
        "SELECT content_session_id, prompt_number, prompt_text, created_at_epoch
         FROM user_prompts ORDER BY created_at_epoch DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(UserPrompt {
            content_session_id: row.get(0)?,
            prompt_number: row.get(1)?,
            prompt_text: row.get(2)?,
            created_at_epoch: row.get(3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Batched full-record fetch by id; always called after a filtered index
/// query per spec's documented contract.
pub fn get_observations(conn: &Connection, ids: &[i64], project: Option<&str>, limit: i64) -> Result<Vec<Observation>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
    let mut sql = format!(
        "SELECT id, session_db_id, memory_session_id, project, type, title, subtitle, narrative,
                facts, concepts, files_read, files_modified, tokens_used, created_at, created_at_epoch,
                cwd, status, last_accessed_epoch
         FROM observations WHERE id IN ({})",
        placeholders.join(", ")
    );
    let mut values: Vec<SqlValue> = ids.iter().map(|id| SqlValue::from(*id)).collect();
    if let Some(p) = project {
        sql.push_str(&format!(" AND project = ?{}", ids.len() + 1));
        values.push(SqlValue::from(p.to_string()));
    }
    sql.push_str(&format!(" ORDER BY created_at_epoch DESC LIMIT ?{}", values.len() + 1));
    values.push(SqlValue::from(limit));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), map_observation_row)?;
    let results: Vec<Observation> = rows.collect::<rusqlite::Result<_>>()?;
    let fetched: Vec<i64> = results.iter().map(|o| o.id).collect();
    drop(stmt);
    crate::db::update_last_accessed(conn, &fetched)?;
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn clamp_limit_bounds_within_range() {
        assert_eq!(clamp_limit(Some(500), 20, 100), 100);
        assert_eq!(clamp_limit(Some(0), 20, 100), 1);
        assert_eq!(clamp_limit(None, 20, 100), 20);
    }

    #[test]
    fn search_observations_finds_inserted_row() -> Result<()> {
        let mut conn = Connection::open_in_memory()?;
        db::schema::ensure_schema(&conn)?;
        db::store_observations(
            &mut conn,
            "mem-1",
            None,
            "proj",
            chrono::Utc::now().timestamp(),
            &[db::NewObservation {
                obs_type: "bugfix".to_string(),
                title: Some("fixed the race condition".to_string()),
                subtitle: None,
                narrative: Some("found and fixed".to_string()),
                facts: vec![],
                concepts: vec![],
                files_read: vec![],
                files_modified: vec![],
                cwd: None,
                tokens_used: 10,
            }],
            None,
        )?;
        let filter = SearchFilter::default();
        let result = search_observations(&conn, "race", &filter, 10, 0)?;
        assert_eq!(result.hits.len(), 1);
        Ok(())
    }
}
