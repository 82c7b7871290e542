//! Reading and writing the log file

use crate::record::{BuildRecord, DATE_FORMAT};
use crate::{LogError, LogResult};
use chrono::{NaiveDateTime, TimeDelta};
use convenient_build::fs_utils::atomic_write;
use regex::RegexBuilder;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

const HEADER_PREFIX: &str = "--- Build Log Entry (ID: ";
const HEADER_SUFFIX: &str = ") ---";

/// A parsed log block
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogEntry {
    /// Build id from the header
    pub id: String,
    /// Parsed `Date:` field, if well formed
    pub date: Option<NaiveDateTime>,
    /// `key: value` lines in file order
    pub fields: Vec<(String, String)>,
    lines: Vec<String>,
}

impl LogEntry {
    /// Value of field `key`
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn text(&self) -> String {
        let mut lines = self.lines.as_slice();
        while let Some((last, rest)) = lines.split_last()
            && last.trim().is_empty()
        {
            lines = rest;
        }
        let mut text = String::from("\n");
        for line in lines {
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

/// Matching lines of one entry
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SearchHit {
    /// Entry id; `None` for text before the first entry
    pub id: Option<String>,
    /// Matching lines in file order
    pub lines: Vec<String>,
}

/// A field whose value differs between two builds
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldDiff {
    /// Field name
    pub key: String,
    /// Value in the first build
    pub first: String,
    /// Value in the second build
    pub second: String,
}

/// Outcome of [`BuildLog::prune`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneStats {
    /// Entries still in the log
    pub kept: usize,
    /// Entries dropped
    pub removed: usize,
}

/// Append-only build log file
#[derive(Debug, Clone)]
pub struct BuildLog {
    path: PathBuf,
}

impl BuildLog {
    /// Log stored at `path`; the file is created on first append
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `record` and return its build id
    pub fn append(&self, record: &BuildRecord) -> LogResult<String> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(record.render().as_bytes())
            .map_err(|e| self.io_error(e))?;

        info!("Appended build {} to {}", record.id, self.path.display());
        Ok(record.id.clone())
    }

    /// Raw log contents
    pub fn view(&self) -> LogResult<String> {
        fs::read_to_string(&self.path).map_err(|e| self.io_error(e))
    }

    /// Every entry in file order
    pub fn entries(&self) -> LogResult<Vec<LogEntry>> {
        Ok(parse_entries(&self.read_or_empty()?))
    }

    /// Build ids in file order
    pub fn list_ids(&self) -> LogResult<Vec<String>> {
        Ok(self.entries()?.into_iter().map(|e| e.id).collect())
    }

    /// Lines matching the regular expression `term`, grouped per entry
    pub fn search(&self, term: &str, case_insensitive: bool) -> LogResult<Vec<SearchHit>> {
        let pattern = RegexBuilder::new(term)
            .case_insensitive(case_insensitive)
            .build()?;
        let content = self.read_or_empty()?;

        let mut hits: Vec<SearchHit> = Vec::new();
        let mut current: Option<String> = None;
        for line in content.lines() {
            if let Some(id) = header_id(line) {
                current = Some(id.to_string());
            }
            if !pattern.is_match(line) {
                continue;
            }
            match hits.last_mut() {
                Some(hit) if hit.id == current => hit.lines.push(line.to_string()),
                _ => hits.push(SearchHit {
                    id: current.clone(),
                    lines: vec![line.to_string()],
                }),
            }
        }

        debug!("Search for {:?} matched {} entries", term, hits.len());
        Ok(hits)
    }

    /// Fields present in both builds with different values; `Date` is
    /// always different and is skipped
    pub fn compare(&self, first: &str, second: &str) -> LogResult<Vec<FieldDiff>> {
        let entries = self.entries()?;
        let find = |id: &str| {
            entries
                .iter()
                .find(|e| e.id == id)
                .ok_or_else(|| LogError::UnknownBuild(id.to_string()))
        };
        let left = find(first)?;
        let right = find(second)?;

        Ok(left
            .fields
            .iter()
            .filter(|(key, _)| key != "Date")
            .filter_map(|(key, value)| {
                let other = right.field(key)?;
                (other != value).then(|| FieldDiff {
                    key: key.clone(),
                    first: value.clone(),
                    second: other.to_string(),
                })
            })
            .collect())
    }

    /// Drop entries dated more than `days` days before `now`.
    ///
    /// Entries without a readable date are kept.
    pub fn prune(&self, days: u32, now: NaiveDateTime) -> LogResult<PruneStats> {
        let cutoff = now
            .checked_sub_signed(TimeDelta::days(i64::from(days)))
            .unwrap_or(NaiveDateTime::MIN);

        let (kept, removed): (Vec<LogEntry>, Vec<LogEntry>) = self
            .entries()?
            .into_iter()
            .partition(|entry| entry.date.is_none_or(|date| date >= cutoff));

        let stats = PruneStats {
            kept: kept.len(),
            removed: removed.len(),
        };
        if removed.is_empty() {
            return Ok(stats);
        }

        let text: String = kept.iter().map(LogEntry::text).collect();
        atomic_write(&self.path, text.as_bytes()).map_err(|e| self.io_error(e))?;
        info!(
            "Pruned {} entries older than {} days from {}",
            stats.removed,
            days,
            self.path.display()
        );
        Ok(stats)
    }

    fn read_or_empty(&self) -> LogResult<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, e: io::Error) -> LogError {
        LogError::Io(self.path.clone(), e)
    }
}

fn header_id(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix(HEADER_PREFIX)?
        .strip_suffix(HEADER_SUFFIX)
}

fn parse_entries(content: &str) -> Vec<LogEntry> {
    let mut entries: Vec<LogEntry> = Vec::new();

    for line in content.lines() {
        if let Some(id) = header_id(line) {
            entries.push(LogEntry {
                id: id.to_string(),
                date: None,
                fields: Vec::new(),
                lines: vec![line.to_string()],
            });
            continue;
        }
        // Text before the first header belongs to no entry
        let Some(entry) = entries.last_mut() else {
            continue;
        };
        entry.lines.push(line.to_string());

        if let Some((key, value)) = line.split_once(':') {
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() {
                continue;
            }
            if key == "Date" {
                entry.date = NaiveDateTime::parse_from_str(value, DATE_FORMAT).ok();
            }
            entry.fields.push((key.to_string(), value.to_string()));
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use convenient_build::{BuildOutcome, BuildType};
    use std::time::Duration;
    use tempfile::TempDir;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 8, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn record(when: NaiveDateTime, compiled: usize, build_type: BuildType) -> BuildRecord {
        let outcome = BuildOutcome {
            target: "all".to_string(),
            files_compiled: compiled,
            up_to_date: 3 - compiled,
            compilation_failed: false,
            linked: compiled > 0,
            link_failed: false,
            success: true,
            duration: Duration::from_millis(250),
            output: PathBuf::from("app"),
            build_type,
            failed_sources: Vec::new(),
        };
        BuildRecord::at(&outcome, when)
    }

    fn sample_log(tmp: &TempDir) -> BuildLog {
        let log = BuildLog::new(tmp.path().join("build.log"));
        log.append(&record(at(1, 9), 3, BuildType::Debug)).unwrap();
        log.append(&record(at(10, 12), 1, BuildType::Debug)).unwrap();
        log.append(&record(at(14, 18), 3, BuildType::Release)).unwrap();
        log
    }

    #[test]
    fn test_append_and_list_ids() {
        let tmp = TempDir::new().unwrap();
        let log = sample_log(&tmp);

        assert_eq!(
            log.list_ids().unwrap(),
            vec!["20240801_090000", "20240810_120000", "20240814_180000"]
        );
        assert!(log.view().unwrap().starts_with("\n--- Build Log Entry (ID: 20240801_090000) ---\n"));
    }

    #[test]
    fn test_entries_parse_fields() {
        let tmp = TempDir::new().unwrap();
        let log = sample_log(&tmp);

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].date, Some(at(10, 12)));
        assert_eq!(entries[1].field("Files compiled"), Some("1"));
        assert_eq!(entries[2].field("Build type"), Some("Release"));
        assert_eq!(entries[0].field("Total time"), Some("250000 µs (0.250 seconds)"));
    }

    #[test]
    fn test_missing_log() {
        let tmp = TempDir::new().unwrap();
        let log = BuildLog::new(tmp.path().join("none.log"));

        assert!(log.entries().unwrap().is_empty());
        assert!(log.list_ids().unwrap().is_empty());
        assert!(log.search("x", false).unwrap().is_empty());
        assert!(matches!(log.view(), Err(LogError::Io(..))));
    }

    #[test]
    fn test_search_groups_by_entry() {
        let tmp = TempDir::new().unwrap();
        let log = sample_log(&tmp);

        let hits = log.search("release", true).unwrap();
        assert_eq!(
            hits,
            vec![SearchHit {
                id: Some("20240814_180000".to_string()),
                lines: vec!["Build type: Release".to_string()],
            }]
        );

        assert!(log.search("release", false).unwrap().is_empty());

        let hits = log.search(r"^Files compiled: [13]$", false).unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_search_rejects_bad_pattern() {
        let tmp = TempDir::new().unwrap();
        let log = sample_log(&tmp);

        assert!(matches!(log.search("(unclosed", false), Err(LogError::InvalidPattern(_))));
    }

    #[test]
    fn test_compare_reports_differing_fields() {
        let tmp = TempDir::new().unwrap();
        let log = sample_log(&tmp);

        let diffs = log.compare("20240810_120000", "20240814_180000").unwrap();
        let keys: Vec<&str> = diffs.iter().map(|d| d.key.as_str()).collect();

        assert_eq!(
            keys,
            vec!["Build type", "Files compiled", "Up-to-date files", "Build summary"]
        );
        assert_eq!(diffs[0].first, "Debug");
        assert_eq!(diffs[0].second, "Release");
    }

    #[test]
    fn test_compare_unknown_build() {
        let tmp = TempDir::new().unwrap();
        let log = sample_log(&tmp);

        let err = log.compare("20240801_090000", "19990101_000000").unwrap_err();
        assert!(matches!(err, LogError::UnknownBuild(ref id) if id == "19990101_000000"));
    }

    #[test]
    fn test_prune_removes_old_entries() {
        let tmp = TempDir::new().unwrap();
        let log = sample_log(&tmp);

        let stats = log.prune(7, at(15, 0)).unwrap();

        assert_eq!(stats, PruneStats { kept: 2, removed: 1 });
        assert_eq!(
            log.list_ids().unwrap(),
            vec!["20240810_120000", "20240814_180000"]
        );
        // Surviving blocks keep their exact text
        let view = log.view().unwrap();
        assert!(view.starts_with("\n--- Build Log Entry (ID: 20240810_120000) ---\nDate: 2024-08-10 12:00:00\n"));
        assert!(view.ends_with("Build summary: Compiled 3 file(s).\n"));
    }

    #[test]
    fn test_prune_keeps_undated_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("build.log");
        fs::write(
            &path,
            "\n--- Build Log Entry (ID: 20200101_000000) ---\nDate: sometime\nBuild target: all\n",
        )
        .unwrap();
        let log = BuildLog::new(&path);

        let stats = log.prune(1, at(15, 0)).unwrap();

        assert_eq!(stats, PruneStats { kept: 1, removed: 0 });
    }
}
