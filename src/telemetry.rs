//! Logging setup and the `Timer` profiling helper.
//!
//! Generalizes the teacher's hand-rolled `log.rs` (file rotation policy,
//! `Timer::start`/`.done()`) onto `tracing`/`tracing-subscriber`, matching
//! the subscriber already wired up in the teacher's `mcp.rs`.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_MAX_BYTES: u64 = 10 * 1024 * 1024;
const LOG_ROTATION_KEEP: usize = 3;

fn log_path() -> PathBuf {
    crate::config::data_dir()
        .join("logs")
        .join(format!("memkeep-{}.log", chrono::Local::now().format("%Y-%m-%d")))
}

fn rotated_path(base: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.{}", base.display(), index))
}

fn rotate_if_needed(path: &Path, max_bytes: u64) {
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    if size < max_bytes {
        return;
    }
    for i in (1..=LOG_ROTATION_KEEP).rev() {
        let dst = rotated_path(path, i);
        if i == LOG_ROTATION_KEEP {
            let _ = std::fs::remove_file(&dst);
        }
        let src = if i == 1 {
            path.to_path_buf()
        } else {
            rotated_path(path, i - 1)
        };
        if src.exists() {
            let _ = std::fs::rename(&src, &dst);
        }
    }
}

/// A `MakeWriter` that appends to the rotating daily log file, rotating by
/// size exactly like the teacher's `log::rotate_if_needed`.
#[derive(Clone)]
struct RotatingFileWriter {
    max_bytes: u64,
}

struct RotatingFileHandle(std::fs::File);

impl std::io::Write for RotatingFileHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFileWriter {
    type Writer = RotatingFileHandle;

    fn make_writer(&'a self) -> Self::Writer {
        let path = log_path();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        rotate_if_needed(&path, self.max_bytes);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap_or_else(|_| std::fs::File::create("/dev/null").expect("null sink"));
        RotatingFileHandle(file)
    }
}

fn log_max_bytes() -> u64 {
    std::env::var("MEMKEEP_LOG_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(DEFAULT_LOG_MAX_BYTES)
}

/// Install the tracing subscriber for the worker process: stderr + rotating
/// file, both gated by `MEMKEEP_LOG`/`RUST_LOG` (default `info`).
pub fn init_worker() {
    init_common();
}

/// Install the tracing subscriber for the SearchBridge process. Stdout is
/// reserved strictly for JSON-RPC framing, so every layer here writes to
/// stderr or the log file — never stdout. Call this before anything else
/// that might log (REDESIGN FLAGS).
pub fn init_bridge() {
    init_common();
}

fn init_common() {
    let filter = EnvFilter::try_from_env("MEMKEEP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(RotatingFileWriter {
            max_bytes: log_max_bytes(),
        })
        .with_ansi(false)
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}

/// A named stopwatch logged at start and completion, matching the
/// teacher's `log::Timer` idiom but backed by `tracing::info!`.
pub struct Timer {
    component: &'static str,
    start: std::time::Instant,
}

impl Timer {
    pub fn start(component: &'static str, msg: &str) -> Self {
        tracing::info!(component, "start {}", msg);
        Self {
            component,
            start: std::time::Instant::now(),
        }
    }

    pub fn done(self, msg: &str) {
        let ms = self.start.elapsed().as_millis();
        tracing::info!(component = self.component, ms, "done {}", msg);
    }
}

/// Open the rotating log file in append mode, for use as a spawned child
/// process's stderr (teacher's `log::open_log_append`).
pub fn open_log_append() -> Option<std::fs::File> {
    let path = log_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok()?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .ok()
}
