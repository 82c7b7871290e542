//! One build, as written to the log

use chrono::{Local, NaiveDateTime};
use convenient_build::BuildOutcome;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Format of build ids (unique per second)
pub const ID_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Format of the `Date:` field
pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Facts about one finished build
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BuildRecord {
    /// Build id derived from `timestamp`
    pub id: String,
    /// Local time the build finished
    pub timestamp: NaiveDateTime,
    /// Requested target
    pub target: String,
    /// Output artifact
    pub output: String,
    /// `Debug` or `Release`
    pub build_type: String,
    /// Wall time in microseconds
    pub duration_micros: u64,
    /// Sources compiled
    pub files_compiled: usize,
    /// Sources skipped
    pub up_to_date: usize,
    /// Whether compile and link succeeded
    pub success: bool,
    /// One-line summary
    pub summary: String,
}

impl BuildRecord {
    /// Record `outcome` as finishing now
    pub fn from_outcome(outcome: &BuildOutcome) -> Self {
        Self::at(outcome, Local::now().naive_local())
    }

    /// Record `outcome` as finishing at `timestamp`
    pub fn at(outcome: &BuildOutcome, timestamp: NaiveDateTime) -> Self {
        Self {
            id: timestamp.format(ID_FORMAT).to_string(),
            timestamp,
            target: outcome.target.clone(),
            output: outcome.output.display().to_string(),
            build_type: outcome.build_type.to_string(),
            duration_micros: u64::try_from(outcome.duration_micros()).unwrap_or(u64::MAX),
            files_compiled: outcome.files_compiled,
            up_to_date: outcome.up_to_date,
            success: outcome.success,
            summary: outcome.summary(),
        }
    }

    /// The text block appended to the log, starting with a blank line
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BuildRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let seconds = self.duration_micros as f64 / 1_000_000.0;

        writeln!(f)?;
        writeln!(f, "--- Build Log Entry (ID: {}) ---", self.id)?;
        writeln!(f, "Date: {}", self.timestamp.format(DATE_FORMAT))?;
        writeln!(f, "Build target: {}", self.target)?;
        writeln!(f, "Output file: {}", self.output)?;
        writeln!(f, "Build type: {}", self.build_type)?;
        writeln!(f, "Total time: {} µs ({:.3} seconds)", self.duration_micros, seconds)?;
        writeln!(f, "Files compiled: {}", self.files_compiled)?;
        writeln!(f, "Up-to-date files: {}", self.up_to_date)?;
        writeln!(
            f,
            "Build status: {}",
            if self.success { "success" } else { "failed" }
        )?;
        writeln!(f, "Build summary: {}", self.summary)
    }
}

impl From<&BuildOutcome> for BuildRecord {
    fn from(outcome: &BuildOutcome) -> Self {
        Self::from_outcome(outcome)
    }
}
