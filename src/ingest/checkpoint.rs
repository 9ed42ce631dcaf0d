//! Checkpoint persistence: a JSON file with a `fileCheckpoints` map plus
//! a legacy single-file mirror (spec §4.4/§6). Open Question (see
//! DESIGN.md): the legacy file is never deleted after migration.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn checkpoint_path() -> PathBuf {
    crate::config::data_dir().join("codex-history-ingest-state.json")
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Checkpoints {
    #[serde(default, rename = "fileCheckpoints")]
    pub file_checkpoints: HashMap<String, i64>,
    #[serde(default, rename = "historyPath")]
    pub legacy_history_path: Option<String>,
    #[serde(default, rename = "lastProcessedLineNumber")]
    pub legacy_last_line: Option<i64>,
}

/// Load the checkpoint file, migrating a legacy single-file state into
/// the map in-memory (scenario 8: the legacy state folds into
/// `fileCheckpoints[historyPath]`).
pub fn load() -> Result<Checkpoints> {
    let path = checkpoint_path();
    let Ok(raw) = std::fs::read_to_string(&path) else {
        return Ok(Checkpoints::default());
    };
    let mut checkpoints: Checkpoints = serde_json::from_str(&raw).unwrap_or_default();
    if let (Some(history_path), Some(last_line)) = (checkpoints.legacy_history_path.clone(), checkpoints.legacy_last_line) {
        checkpoints.file_checkpoints.entry(history_path).or_insert(last_line);
    }
    Ok(checkpoints)
}

pub fn save(checkpoints: &Checkpoints) -> Result<()> {
    let path = checkpoint_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let serialized = serde_json::to_string_pretty(checkpoints)?;
    std::fs::write(&path, serialized).with_context(|| format!("failed to write checkpoint file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_state_folds_into_file_checkpoints_map() {
        let raw = r#"{"historyPath": "/a/history.jsonl", "lastProcessedLineNumber": 42}"#;
        let mut checkpoints: Checkpoints = serde_json::from_str(raw).unwrap();
        if let (Some(p), Some(n)) = (checkpoints.legacy_history_path.clone(), checkpoints.legacy_last_line) {
            checkpoints.file_checkpoints.entry(p).or_insert(n);
        }
        assert_eq!(checkpoints.file_checkpoints.get("/a/history.jsonl"), Some(&42));
    }
}
