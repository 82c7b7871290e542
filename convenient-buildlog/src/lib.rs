//! Build history log.
//!
//! Persists one text block per build outcome in an append-only file and
//! offers the read side used by the `oreobuild log` commands: view, search,
//! compare two builds, prune old entries and list build ids.
//!
//! # Example
//!
//! ```no_run
//! use convenient_buildlog::BuildLog;
//!
//! let log = BuildLog::new("build.log");
//! for id in log.list_ids().unwrap() {
//!     println!("{id}");
//! }
//! ```
//!
//! # Features
//!
//! - `serde`: `Serialize`/`Deserialize` for records and parsed entries

mod log;
mod record;

pub use log::{BuildLog, FieldDiff, LogEntry, PruneStats, SearchHit};
pub use record::{BuildRecord, DATE_FORMAT, ID_FORMAT};

use std::path::PathBuf;
use thiserror::Error;

/// Result type for log operations
pub type LogResult<T> = Result<T, LogError>;

/// Build log errors
#[derive(Debug, Error)]
pub enum LogError {
    /// Log file could not be read or written
    #[error("Failed to access log file {path}: {1}", path = .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    /// Search term is not a valid regular expression
    #[error("Invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// No entry with this build id
    #[error("Build ID not found in log: {0}")]
    UnknownBuild(String),
}
