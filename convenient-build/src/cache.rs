//! Persistent build cache
//!
//! Maps each source to the modification time it had when it last compiled
//! successfully. Stored as plain text, one `<path> <mtime-nanos>` pair per
//! line. The file is read in full when the cache is opened and rewritten in
//! full on [`BuildCache::save`] and [`BuildCache::clear`].

use crate::fs_utils::atomic_write;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// In-memory view of the cache file
#[derive(Debug)]
pub struct BuildCache {
    path: PathBuf,
    entries: HashMap<PathBuf, i64>,
}

impl BuildCache {
    /// Open the cache stored at `path`.
    ///
    /// A missing file is an empty cache. An unreadable file is reported and
    /// also treated as empty: losing cache entries only costs recompiles.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No build cache at {}", path.display());
                HashMap::new()
            }
            Err(e) => {
                warn!("Failed to read build cache {}: {}", path.display(), e);
                HashMap::new()
            }
        };

        debug!("Loaded {} cache entries from {}", entries.len(), path.display());
        Self { path, entries }
    }

    /// Parse cache file text.
    ///
    /// Each line is split at its last space so paths may contain spaces. A
    /// repeated path keeps its last value; unparsable lines are skipped.
    pub fn parse(content: &str) -> HashMap<PathBuf, i64> {
        let mut entries = HashMap::new();

        for line in content.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let parsed = line
                .rsplit_once(' ')
                .filter(|(path, _)| !path.is_empty())
                .and_then(|(path, stamp)| stamp.parse::<i64>().ok().map(|s| (path, s)));

            match parsed {
                Some((path, stamp)) => {
                    entries.insert(PathBuf::from(path), stamp);
                }
                None => warn!("Skipping malformed cache line: {}", line),
            }
        }

        entries
    }

    /// Serialize entries, sorted by path so the file is stable across runs
    pub fn render(&self) -> String {
        let mut sorted: Vec<_> = self.entries.iter().collect();
        sorted.sort();

        sorted
            .into_iter()
            .map(|(path, stamp)| format!("{} {}\n", path.display(), stamp))
            .collect()
    }

    /// Write every entry back to the cache file
    pub fn save(&self) -> CacheResult<()> {
        atomic_write(&self.path, self.render().as_bytes())
            .map_err(|e| CacheError::Write(self.path.clone(), e))?;
        info!("Saved {} cache entries to {}", self.entries.len(), self.path.display());
        Ok(())
    }

    /// Last successful compile time recorded for `source`
    pub fn get(&self, source: &Path) -> Option<i64> {
        self.entries.get(source).copied()
    }

    /// Record a successful compile of `source` at source mtime `stamp`
    pub fn put(&mut self, source: impl Into<PathBuf>, stamp: i64) {
        self.entries.insert(source.into(), stamp);
    }

    /// Drop the entry for `source`
    pub fn remove(&mut self, source: &Path) -> Option<i64> {
        self.entries.remove(source)
    }

    /// Empty the cache and truncate the cache file.
    ///
    /// The in-memory map is emptied even when truncation fails.
    pub fn clear(&mut self) -> CacheResult<()> {
        self.entries.clear();
        match fs::write(&self.path, b"") {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::Write(self.path.clone(), e)),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Path of the cache file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries
    pub fn entries(&self) -> &HashMap<PathBuf, i64> {
        &self.entries
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors persisting the cache
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache file could not be written
    #[error("Failed to write build cache {path}: {1}", path = .0.display())]
    Write(PathBuf, #[source] io::Error),
}
