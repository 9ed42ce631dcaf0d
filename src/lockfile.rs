//! Worker singleton: a PID+port lockfile in the data directory (spec §5,
//! §6 persisted-state layout). Generalizes the teacher's `dirs`-based
//! data-dir resolution idiom into a small JSON record the SearchBridge can
//! read directly to find the worker's port without a second config lookup
//! (SPEC_FULL.md §D).

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub port: u16,
    pub started_at_epoch: i64,
}

fn lock_path() -> PathBuf {
    crate::config::data_dir().join("worker.pid")
}

/// True if the lockfile names a pid that is still alive.
fn pid_is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // Signal 0 performs no-op liveness check per POSIX kill(2).
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

pub fn read() -> Option<LockInfo> {
    let raw = std::fs::read_to_string(lock_path()).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Returns `Some(info)` if a live worker already holds the lock.
pub fn active_holder() -> Option<LockInfo> {
    let info = read()?;
    if pid_is_alive(info.pid) {
        Some(info)
    } else {
        None
    }
}

pub fn acquire(port: u16) -> Result<()> {
    let path = lock_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let info = LockInfo {
        pid: std::process::id(),
        port,
        started_at_epoch: chrono::Utc::now().timestamp(),
    };
    let serialized = serde_json::to_string(&info)?;
    std::fs::write(&path, serialized)
        .with_context(|| format!("failed to write lockfile: {}", path.display()))?;
    Ok(())
}

pub fn release() {
    let _ = std::fs::remove_file(lock_path());
}
