//! Incremental native-code build core.
//!
//! `convenient-build` decides which translation units of a project must be
//! recompiled, compiles them concurrently through a pluggable compiler
//! backend and relinks the single output artifact only when needed.
//!
//! # Components
//!
//! - [`BuildConfig`]: typed project description (sources, include paths,
//!   flags, output, build type)
//! - [`DependencyResolver`]: transitive, cycle-safe scan of local includes
//! - [`BuildCache`]: persisted `source -> last compiled mtime` map
//! - [`TaskScheduler`]: fixed-size worker pool with a FIFO queue
//! - [`CompilerBackend`]: compile/link capability, [`GccBackend`] shells out
//! - [`BuildOrchestrator`]: ties everything together and returns a
//!   [`BuildOutcome`]
//!
//! # Example
//!
//! ```no_run
//! use convenient_build::{BuildOrchestrator, OrchestratorOptions};
//!
//! # fn example() -> Result<(), convenient_build::BuildError> {
//! let mut orchestrator = BuildOrchestrator::open("oreobuild.conf", OrchestratorOptions::default())?;
//!
//! let outcome = orchestrator.build("all")?;
//! println!("{}", outcome.summary());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod compiler;
pub mod config;
pub mod dependency;
pub mod error;
pub mod fs_utils;
pub mod orchestrator;
pub mod scheduler;

pub use cache::{BuildCache, CacheError, CacheResult};
pub use compiler::{CompilerBackend, CompilerError, CompilerResult, GccBackend, create_backend};
pub use config::{BuildConfig, BuildType, BuildTypeStore, ConfigError, ConfigResult};
pub use dependency::{DependencyResolver, IncludeDirective};
pub use error::{BuildError, BuildResult};
pub use orchestrator::{
    BuildOrchestrator, BuildOutcome, CleanStats, OrchestratorOptions, ProgressCallback,
    RebuildReason,
};
pub use scheduler::{SchedulerError, SchedulerResult, TaskScheduler};
