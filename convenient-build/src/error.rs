//! Build-level error type
//!
//! Only conditions that make a build impossible to attempt are errors.
//! A compile or link that fails is reported through
//! [`BuildOutcome`](crate::BuildOutcome) instead.

use crate::compiler::CompilerError;
use crate::config::ConfigError;
use crate::scheduler::SchedulerError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for orchestrator operations
pub type BuildResult<T> = Result<T, BuildError>;

/// Errors that keep a build from starting
#[derive(Debug, Error)]
pub enum BuildError {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Worker pool could not be started or refused work
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// No backend for the configured compiler
    #[error(transparent)]
    Compiler(#[from] CompilerError),

    /// A configured source does not exist
    #[error("Source file not found: {}", .0.display())]
    MissingSource(PathBuf),

    /// Compiler, sources or output is empty
    #[error("Build configuration is not initialized")]
    ConfigNotInitialized,

    /// Two sources would write the same object file
    #[error(
        "Sources {} and {} both compile to {}",
        .first.display(),
        .second.display(),
        .object.display()
    )]
    DuplicateObject {
        /// Shared object path
        object: PathBuf,
        /// Source listed first
        first: PathBuf,
        /// Source listed later
        second: PathBuf,
    },
}
