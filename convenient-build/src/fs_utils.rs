//! File timestamp helpers shared by the cache, the resolver and the orchestrator

use filetime::FileTime;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Modification time of `path` as nanoseconds since the Unix epoch.
///
/// Times before the epoch come back negative.
pub fn modified_nanos(path: &Path) -> io::Result<i64> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(system_time_nanos(modified))
}

/// Convert a [`SystemTime`] to signed nanoseconds since the Unix epoch.
pub fn system_time_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_nanos()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_nanos()).unwrap_or(i64::MAX),
    }
}

/// Whether `file` was modified strictly after `reference`.
///
/// A missing `reference` makes any `file` newer; a missing `file` is never
/// newer than anything.
pub fn is_newer(file: &Path, reference: &Path) -> bool {
    let Ok(reference_time) = modified_nanos(reference) else {
        return true;
    };
    match modified_nanos(file) {
        Ok(file_time) => file_time > reference_time,
        Err(_) => false,
    }
}

/// Set the modification time of `path` to now.
pub fn touch(path: &Path) -> io::Result<()> {
    filetime::set_file_mtime(path, FileTime::now())
}

/// Write `data` to `path` through a temp file and a rename.
///
/// Readers see either the old content or the new content, never a torn
/// write.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = Path::new(&temp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(temp_path, path) {
        let _ = fs::remove_file(temp_path);
        return Err(e);
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && let Ok(dir) = File::open(parent)
    {
        // Not every filesystem supports syncing a directory
        if let Err(e) = dir.sync_all() {
            warn!("Failed to sync directory {}: {}", parent.display(), e);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_newer_compares_mtimes() {
        let tmp = TempDir::new().unwrap();
        let old = tmp.path().join("old.h");
        let new = tmp.path().join("new.h");
        fs::write(&old, "old").unwrap();
        fs::write(&new, "new").unwrap();

        filetime::set_file_mtime(&old, FileTime::from_unix_time(1_000, 0)).unwrap();
        filetime::set_file_mtime(&new, FileTime::from_unix_time(2_000, 0)).unwrap();

        assert!(is_newer(&new, &old));
        assert!(!is_newer(&old, &new));
        assert!(!is_newer(&old, &old), "equal mtimes are not newer");
    }

    #[test]
    fn test_is_newer_with_missing_files() {
        let tmp = TempDir::new().unwrap();
        let present = tmp.path().join("present.o");
        fs::write(&present, "").unwrap();
        let missing = tmp.path().join("missing");

        assert!(is_newer(&present, &missing));
        assert!(!is_newer(&missing, &present));
    }

    #[test]
    fn test_touch_moves_mtime_forward() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("a.o");
        fs::write(&path, "").unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_000, 0)).unwrap();

        touch(&path).unwrap();

        assert!(modified_nanos(&path).unwrap() > 1_000 * 1_000_000_000);
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state").join("cache.txt");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!tmp.path().join("state").join("cache.txt.tmp").exists());
    }
}
