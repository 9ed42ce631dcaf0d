//! One-shot data-dir migration CLI (spec §6): if the canonical data
//! directory is absent and a legacy one exists, copy file-by-file, write a
//! lock file plus a JSON report, and never overwrite unless forced.
//! Subsequent runs see the lock and skip. Copy-only per the spec's Open
//! Question (no destructive move), grounded in `config.rs`'s `dirs`-based
//! data-dir resolution.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Legacy data directory this worker's predecessor used, before the
/// `MEMKEEP_DATA_DIR`/`~/.memkeep` layout (see `config::DATA_DIR`'s
/// `REMEM_DATA_DIR` legacy env alias).
fn legacy_data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".remem")
}

fn migration_lock_path(canonical: &Path) -> PathBuf {
    canonical.join(".migration.lock")
}

#[derive(Debug, Serialize)]
pub struct MigrationReport {
    pub from: PathBuf,
    pub to: PathBuf,
    pub copied: Vec<PathBuf>,
    pub skipped_existing: Vec<PathBuf>,
    pub dry_run: bool,
}

/// Runs the migration (or just plans it, under `dry_run`). Returns `None`
/// if there was nothing to do: canonical dir already exists, no legacy dir
/// found, or a prior migration's lock file is present.
pub fn run(dry_run: bool, force: bool) -> Result<Option<MigrationReport>> {
    let canonical = crate::config::data_dir();
    let legacy = legacy_data_dir();

    if !legacy.exists() || !legacy.is_dir() {
        tracing::info!(legacy = %legacy.display(), "no legacy data directory found, nothing to migrate");
        return Ok(None);
    }
    if canonical.exists() && !force {
        tracing::info!(canonical = %canonical.display(), "canonical data directory already exists, skipping migration");
        return Ok(None);
    }
    let lock_path = migration_lock_path(&canonical);
    if lock_path.exists() && !force {
        tracing::info!(lock = %lock_path.display(), "migration lock present from a prior run, skipping");
        return Ok(None);
    }

    let mut copied = Vec::new();
    let mut skipped_existing = Vec::new();
    plan_or_copy(&legacy, &canonical, dry_run, &mut copied, &mut skipped_existing)?;

    if !dry_run {
        std::fs::create_dir_all(&canonical)?;
        std::fs::write(&lock_path, chrono::Utc::now().to_rfc3339())
            .with_context(|| format!("failed to write migration lock: {}", lock_path.display()))?;
    }

    let report = MigrationReport {
        from: legacy,
        to: canonical.clone(),
        copied,
        skipped_existing,
        dry_run,
    };
    if !dry_run {
        let report_path = canonical.join("migration-report.json");
        std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("failed to write migration report: {}", report_path.display()))?;
    }
    Ok(Some(report))
}

fn plan_or_copy(
    src_root: &Path,
    dst_root: &Path,
    dry_run: bool,
    copied: &mut Vec<PathBuf>,
    skipped_existing: &mut Vec<PathBuf>,
) -> Result<()> {
    for entry in walkdir::WalkDir::new(src_root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(src_root)?;
        let dst = dst_root.join(rel);

        if dst.exists() {
            skipped_existing.push(rel.to_path_buf());
            continue;
        }
        if dry_run {
            copied.push(rel.to_path_buf());
            continue;
        }
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(entry.path(), &dst)
            .with_context(|| format!("failed to copy {} -> {}", entry.path().display(), dst.display()))?;
        copied.push(rel.to_path_buf());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn copies_files_preserving_relative_layout() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("settings.json"), "{}").unwrap();
        std::fs::create_dir_all(src.path().join("nested")).unwrap();
        std::fs::write(src.path().join("nested").join("db.sqlite"), "data").unwrap();

        let dst = TempDir::new().unwrap();
        let dst_target = dst.path().join("new-home");

        let mut copied = Vec::new();
        let mut skipped = Vec::new();
        plan_or_copy(src.path(), &dst_target, false, &mut copied, &mut skipped).unwrap();

        assert_eq!(copied.len(), 2);
        assert!(dst_target.join("settings.json").exists());
        assert!(dst_target.join("nested").join("db.sqlite").exists());
    }

    #[test]
    fn dry_run_plans_without_writing() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("a.txt"), "x").unwrap();
        let dst = TempDir::new().unwrap();
        let dst_target = dst.path().join("new-home");

        let mut copied = Vec::new();
        let mut skipped = Vec::new();
        plan_or_copy(src.path(), &dst_target, true, &mut copied, &mut skipped).unwrap();

        assert_eq!(copied.len(), 1);
        assert!(!dst_target.exists());
    }

    #[test]
    fn existing_destination_file_is_skipped_not_overwritten() {
        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("a.txt"), "new").unwrap();
        let dst = TempDir::new().unwrap();
        std::fs::write(dst.path().join("a.txt"), "old").unwrap();

        let mut copied = Vec::new();
        let mut skipped = Vec::new();
        plan_or_copy(src.path(), dst.path(), false, &mut copied, &mut skipped).unwrap();

        assert!(copied.is_empty());
        assert_eq!(skipped.len(), 1);
        assert_eq!(std::fs::read_to_string(dst.path().join("a.txt")).unwrap(), "old");
    }
}
