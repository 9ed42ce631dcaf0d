//! Local-first coding-session memory worker: ingest tool-use events from
//! coding agents, distill them into structured observations and session
//! summaries, and serve search/timeline queries back to an editor or CLI.

pub mod agent;
pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod ingest;
pub mod lockfile;
pub mod migrate;
pub mod query;
pub mod queue;
pub mod scheduler;
pub mod tags;
pub mod telemetry;
pub mod vector;
