//! VectorIndex (C2): an optional accelerator, never authoritative (spec
//! §4.1, §9). Any query path using it must succeed, possibly with lower
//! recall, when the index is empty or unreachable — in particular, prompt
//! search falls back to Store full-text whenever this returns no hits.
//!
//! No teacher equivalent existed for embeddings; this follows the
//! thin-wrapper-over-a-connection shape used throughout
//! `examples/other_examples/e96e7ad2_viablesys-nmem__src-s1_serve.rs.rs`.

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::db::VectorKind;

pub trait VectorIndex: Send + Sync {
    fn upsert(&self, conn: &Connection, kind: VectorKind, ref_id: i64, embedding: &[f32]) -> Result<()>;
    fn query(&self, conn: &Connection, kind: VectorKind, embedding: &[f32], limit: usize) -> Result<Vec<(i64, f32)>>;
}

/// Default when no embedding provider is configured: always empty, so the
/// mandatory relational fallback is exercised by default, not only on error.
pub struct NullVectorIndex;

impl VectorIndex for NullVectorIndex {
    fn upsert(&self, _conn: &Connection, _kind: VectorKind, _ref_id: i64, _embedding: &[f32]) -> Result<()> {
        Ok(())
    }

    fn query(&self, _conn: &Connection, _kind: VectorKind, _embedding: &[f32], _limit: usize) -> Result<Vec<(i64, f32)>> {
        Ok(Vec::new())
    }
}

/// Brute-force cosine-similarity scan over BLOB-stored embeddings. Correct
/// at the scale a single developer's local session history reaches;
/// deliberately not backed by a native vector-search extension since
/// nothing in the example pack pulls one in.
pub struct SqliteVectorIndex;

impl VectorIndex for SqliteVectorIndex {
    fn upsert(&self, conn: &Connection, kind: VectorKind, ref_id: i64, embedding: &[f32]) -> Result<()> {
        let blob = encode(embedding);
        conn.execute(
            "INSERT INTO vector_records (kind, ref_id, embedding, metadata) VALUES (?1, ?2, ?3, NULL)
             ON CONFLICT(kind, ref_id) DO UPDATE SET embedding = excluded.embedding",
            params![kind.as_str(), ref_id, blob],
        )?;
        Ok(())
    }

    fn query(&self, conn: &Connection, kind: VectorKind, embedding: &[f32], limit: usize) -> Result<Vec<(i64, f32)>> {
        let mut stmt = conn.prepare("SELECT ref_id, embedding FROM vector_records WHERE kind = ?1")?;
        let rows = stmt.query_map(params![kind.as_str()], |row| {
            let ref_id: i64 = row.get(0)?;
            let blob: Vec<u8> = row.get(1)?;
            Ok((ref_id, blob))
        })?;

        let mut scored: Vec<(i64, f32)> = Vec::new();
        for row in rows {
            let (ref_id, blob) = row?;
            let candidate = decode(&blob);
            scored.push((ref_id, cosine_similarity(embedding, &candidate)));
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

fn encode(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn null_index_always_empty() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        db::schema::ensure_schema(&conn)?;
        let idx = NullVectorIndex;
        assert!(idx.query(&conn, VectorKind::Prompt, &[1.0, 0.0], 5)?.is_empty());
        Ok(())
    }

    #[test]
    fn sqlite_index_ranks_closest_first() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        db::schema::ensure_schema(&conn)?;
        let idx = SqliteVectorIndex;
        idx.upsert(&conn, VectorKind::Observation, 1, &[1.0, 0.0])?;
        idx.upsert(&conn, VectorKind::Observation, 2, &[0.0, 1.0])?;
        let results = idx.query(&conn, VectorKind::Observation, &[1.0, 0.1], 5)?;
        assert_eq!(results[0].0, 1);
        Ok(())
    }
}
