//! Relational schema. Generalizes the teacher's `db::ensure_core_schema` /
//! `ensure_pending_table` (FTS5 virtual table + sync triggers kept
//! verbatim in spirit) onto the entity names in spec §3.

use anyhow::Result;
use rusqlite::Connection;

pub fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            content_session_id TEXT UNIQUE NOT NULL,
            platform TEXT NOT NULL DEFAULT 'hosted-agent',
            project TEXT NOT NULL,
            initial_prompt TEXT,
            memory_session_id TEXT,
            started_at TEXT NOT NULL,
            started_at_epoch INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'active'
        );

        CREATE TABLE IF NOT EXISTS user_prompts (
            content_session_id TEXT NOT NULL,
            prompt_number INTEGER NOT NULL,
            prompt_text TEXT NOT NULL,
            created_at_epoch INTEGER NOT NULL,
            PRIMARY KEY (content_session_id, prompt_number)
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS user_prompts_fts USING fts5(
            prompt_text,
            content='user_prompts',
            content_rowid='rowid'
        );
        CREATE TRIGGER IF NOT EXISTS user_prompts_ai AFTER INSERT ON user_prompts BEGIN
            INSERT INTO user_prompts_fts(rowid, prompt_text) VALUES (new.rowid, new.prompt_text);
        END;

        CREATE TABLE IF NOT EXISTS pending_messages (
            id INTEGER PRIMARY KEY,
            session_db_id INTEGER NOT NULL,
            content_session_id TEXT NOT NULL,
            message_type TEXT NOT NULL,
            priority INTEGER NOT NULL,
            payload TEXT NOT NULL,
            created_at_epoch INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pending_session ON pending_messages(session_db_id);

        CREATE TABLE IF NOT EXISTS observations (
            id INTEGER PRIMARY KEY,
            session_db_id INTEGER,
            memory_session_id TEXT NOT NULL,
            project TEXT,
            type TEXT NOT NULL,
            title TEXT,
            subtitle TEXT,
            narrative TEXT,
            facts TEXT,
            concepts TEXT,
            files_read TEXT,
            files_modified TEXT,
            cwd TEXT,
            tokens_used INTEGER DEFAULT 0,
            created_at TEXT NOT NULL,
            created_at_epoch INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            last_accessed_epoch INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_observations_project_status
            ON observations(project, status, created_at_epoch DESC);

        CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
            title, subtitle, narrative, facts, concepts,
            content='observations',
            content_rowid='id'
        );

        CREATE TRIGGER IF NOT EXISTS observations_ai AFTER INSERT ON observations BEGIN
            INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts, concepts)
            VALUES (new.id, new.title, new.subtitle, new.narrative, new.facts, new.concepts);
        END;
        CREATE TRIGGER IF NOT EXISTS observations_ad AFTER DELETE ON observations BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative, facts, concepts)
            VALUES ('delete', old.id, old.title, old.subtitle, old.narrative, old.facts, old.concepts);
        END;
        CREATE TRIGGER IF NOT EXISTS observations_au AFTER UPDATE ON observations BEGIN
            INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative, facts, concepts)
            VALUES ('delete', old.id, old.title, old.subtitle, old.narrative, old.facts, old.concepts);
            INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts, concepts)
            VALUES (new.id, new.title, new.subtitle, new.narrative, new.facts, new.concepts);
        END;

        CREATE TABLE IF NOT EXISTS summaries (
            id INTEGER PRIMARY KEY,
            memory_session_id TEXT NOT NULL,
            project TEXT,
            request TEXT,
            investigated TEXT,
            learned TEXT,
            completed TEXT,
            next_steps TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            created_at_epoch INTEGER NOT NULL
        );

        CREATE VIRTUAL TABLE IF NOT EXISTS summaries_fts USING fts5(
            request, investigated, learned, completed, next_steps, notes,
            content='summaries',
            content_rowid='id'
        );
        CREATE TRIGGER IF NOT EXISTS summaries_ai AFTER INSERT ON summaries BEGIN
            INSERT INTO summaries_fts(rowid, request, investigated, learned, completed, next_steps, notes)
            VALUES (new.id, new.request, new.investigated, new.learned, new.completed, new.next_steps, new.notes);
        END;
        CREATE TRIGGER IF NOT EXISTS summaries_ad AFTER DELETE ON summaries BEGIN
            INSERT INTO summaries_fts(summaries_fts, rowid, request, investigated, learned, completed, next_steps, notes)
            VALUES ('delete', old.id, old.request, old.investigated, old.learned, old.completed, old.next_steps, old.notes);
        END;

        CREATE TABLE IF NOT EXISTS vector_records (
            kind TEXT NOT NULL,
            ref_id INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            metadata TEXT,
            PRIMARY KEY (kind, ref_id)
        );

        CREATE TABLE IF NOT EXISTS ingestion_checkpoints (
            history_path TEXT PRIMARY KEY,
            last_processed_line INTEGER NOT NULL,
            updated_at_epoch INTEGER NOT NULL
        );
        "
    )?;
    Ok(())
}
