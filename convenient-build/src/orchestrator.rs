//! Build orchestration
//!
//! [`BuildOrchestrator::build`] runs one incremental build:
//!
//! 1. validate the config and check every source exists
//! 2. decide per source whether it is up to date ([`RebuildReason`])
//! 3. submit a compile task per stale source to the [`TaskScheduler`]
//! 4. wait for every submitted task, including after a failure
//! 5. link when nothing failed and some object is newer than the output
//!
//! Compile tasks share one mutex guarding the build cache, the counters and
//! the progress callback; a condition variable wakes the orchestrator when
//! the last task reports in.

use crate::cache::BuildCache;
use crate::compiler::{CompilerBackend, create_backend};
use crate::config::{BuildConfig, BuildType, BuildTypeStore};
use crate::dependency::DependencyResolver;
use crate::error::{BuildError, BuildResult};
use crate::fs_utils::{is_newer, modified_nanos, touch};
use crate::scheduler::TaskScheduler;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Cache file name inside the state directory
pub const CACHE_FILE: &str = "build_cache.txt";

/// Build type the cached objects were compiled with
pub const LAST_BUILD_TYPE_FILE: &str = "last_build_type.txt";

/// Build type selected with `debug` / `release`
pub const BUILD_TYPE_FILE: &str = "build_type.txt";

/// Called after each successful compile with
/// `(source, finished so far, total to compile)`
pub type ProgressCallback = Arc<dyn Fn(&Path, usize, usize) + Send + Sync>;

/// Construction options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Directory holding the cache and build type state files
    pub state_dir: PathBuf,
    /// Worker count; falls back to the config's `jobs`, then to the host's
    /// parallelism
    pub workers: Option<usize>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("."),
            workers: None,
        }
    }
}

/// Why a source has to be recompiled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    /// The build type differs from the one the objects were built with
    BuildTypeChanged,
    /// The object file does not exist
    ObjectMissing,
    /// No cache entry, or the source is newer than its cache entry
    SourceChanged,
    /// An included file is newer than the object
    DependencyNewer(PathBuf),
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildReason::BuildTypeChanged => write!(f, "build type changed"),
            RebuildReason::ObjectMissing => write!(f, "object file missing"),
            RebuildReason::SourceChanged => write!(f, "source modified"),
            RebuildReason::DependencyNewer(dep) => {
                write!(f, "dependency {} is newer", dep.display())
            }
        }
    }
}

/// Result of one [`BuildOrchestrator::build`] call
#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    /// Requested target name
    pub target: String,
    /// Sources compiled successfully
    pub files_compiled: usize,
    /// Sources skipped as up to date
    pub up_to_date: usize,
    /// At least one compile failed
    pub compilation_failed: bool,
    /// The link step ran and succeeded
    pub linked: bool,
    /// The link step ran and failed
    pub link_failed: bool,
    /// No compile or link failure
    pub success: bool,
    /// Wall time of the whole build
    pub duration: Duration,
    /// Output artifact
    pub output: PathBuf,
    /// Build type used
    pub build_type: BuildType,
    /// Sources whose compile failed, in completion order
    pub failed_sources: Vec<PathBuf>,
}

impl BuildOutcome {
    /// Elapsed time in microseconds
    pub fn duration_micros(&self) -> u128 {
        self.duration.as_micros()
    }

    /// One-line description of what was compiled
    pub fn summary(&self) -> String {
        if self.files_compiled == 0 && !self.compilation_failed {
            "All files up to date. No compilation needed.".to_string()
        } else {
            format!("Compiled {} file(s).", self.files_compiled)
        }
    }
}

/// What [`BuildOrchestrator::clean`] removed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanStats {
    /// Object files deleted
    pub objects_removed: usize,
    /// Whether the output artifact was deleted
    pub output_removed: bool,
    /// Files that could not be deleted or truncated
    pub errors: usize,
}

#[derive(Debug)]
struct Progress {
    cache: BuildCache,
    finished: usize,
    compiled: usize,
    failed_sources: Vec<PathBuf>,
}

#[derive(Debug)]
struct Shared {
    progress: Mutex<Progress>,
    all_done: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct CompileTask {
    source: PathBuf,
    object: PathBuf,
}

/// Drives incremental builds of one configured project
pub struct BuildOrchestrator {
    config: BuildConfig,
    backend: Arc<dyn CompilerBackend>,
    scheduler: TaskScheduler,
    resolver: DependencyResolver,
    shared: Arc<Shared>,
    marker: BuildTypeStore,
    last_build_type: Option<BuildType>,
    progress_callback: Option<ProgressCallback>,
    shut_down: bool,
}

impl BuildOrchestrator {
    /// Create an orchestrator, loading the build cache and the last build
    /// type from `options.state_dir`
    pub fn new(
        config: BuildConfig,
        backend: Box<dyn CompilerBackend>,
        options: OrchestratorOptions,
    ) -> BuildResult<Self> {
        let workers = options
            .workers
            .or(config.jobs())
            .unwrap_or_else(num_cpus::get);
        let scheduler = TaskScheduler::new(workers)?;

        let cache = BuildCache::load(options.state_dir.join(CACHE_FILE));
        let marker = BuildTypeStore::new(options.state_dir.join(LAST_BUILD_TYPE_FILE));
        let last_build_type = marker.load();
        let resolver = DependencyResolver::new(config.include_paths().to_vec());

        info!(
            "Build orchestrator ready: {} backend, {} workers, {} cached sources",
            backend.name(),
            scheduler.worker_count(),
            cache.len()
        );

        Ok(Self {
            config,
            backend: Arc::from(backend),
            scheduler,
            resolver,
            shared: Arc::new(Shared {
                progress: Mutex::new(Progress {
                    cache,
                    finished: 0,
                    compiled: 0,
                    failed_sources: Vec::new(),
                }),
                all_done: Condvar::new(),
            }),
            marker,
            last_build_type,
            progress_callback: None,
            shut_down: false,
        })
    }

    /// Load the project config at `config_path`, apply the build type saved
    /// in `options.state_dir` and select the backend for its compiler
    pub fn open(config_path: impl AsRef<Path>, options: OrchestratorOptions) -> BuildResult<Self> {
        let store = BuildTypeStore::new(options.state_dir.join(BUILD_TYPE_FILE));
        let config = BuildConfig::load(config_path)?.with_build_type_store(store);
        let backend = create_backend(config.compiler())?;
        Self::new(config, backend, options)
    }

    /// Active configuration
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Switch build type; the next build recompiles everything
    pub fn set_build_type(&mut self, build_type: BuildType) {
        self.config.set_build_type(build_type);
    }

    /// Build type of the previous build, if known
    pub fn last_build_type(&self) -> Option<BuildType> {
        self.last_build_type
    }

    /// Install a progress callback
    pub fn set_progress_callback<F>(&mut self, callback: F)
    where
        F: Fn(&Path, usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
    }

    /// Cached mtime of the last successful compile of `source`
    pub fn cached_mtime(&self, source: &Path) -> Option<i64> {
        self.shared.lock().cache.get(source)
    }

    /// Worker threads in the pool
    pub fn worker_count(&self) -> usize {
        self.scheduler.worker_count()
    }

    /// Decide whether `source` must be recompiled; `None` means up to date
    pub fn rebuild_reason(&mut self, source: &Path) -> Option<RebuildReason> {
        if self
            .last_build_type
            .is_some_and(|last| last != self.config.build_type())
        {
            return Some(RebuildReason::BuildTypeChanged);
        }

        let object = self.config.object_path(source);
        let Ok(object_mtime) = modified_nanos(&object) else {
            return Some(RebuildReason::ObjectMissing);
        };

        let cached = self.shared.lock().cache.get(source);
        let source_changed = match (cached, modified_nanos(source)) {
            (Some(cached), Ok(current)) => current > cached,
            _ => true,
        };
        if source_changed {
            return Some(RebuildReason::SourceChanged);
        }

        for dependency in self.resolver.resolve(source) {
            match modified_nanos(dependency) {
                Ok(mtime) if mtime > object_mtime => {
                    return Some(RebuildReason::DependencyNewer(dependency.clone()));
                }
                Ok(_) => {}
                Err(_) => warn!(
                    "Dependency {} of {} is missing",
                    dependency.display(),
                    source.display()
                ),
            }
        }

        None
    }

    /// Run one incremental build of `target`.
    ///
    /// Fails only when the build cannot be attempted at all; compile and
    /// link failures come back as an unsuccessful [`BuildOutcome`].
    pub fn build(&mut self, target: &str) -> BuildResult<BuildOutcome> {
        let start = Instant::now();
        info!("Building target: {}", target);

        self.config.validate()?;
        if let Some(missing) = self.config.source_files().iter().find(|s| !s.exists()) {
            error!("Source file not found: {}", missing.display());
            return Err(BuildError::MissingSource(missing.clone()));
        }

        let build_type = self.config.build_type();
        let sources = self.config.source_files().to_vec();

        if let Some(last) = self.last_build_type
            && last != build_type
        {
            info!("Build type changed from {} to {}, rebuilding all sources", last, build_type);
            let mut progress = self.shared.lock();
            for source in &sources {
                progress.cache.remove(source);
            }
        }

        let mut up_to_date = 0;
        let mut to_compile = Vec::new();
        for source in &sources {
            match self.rebuild_reason(source) {
                Some(reason) => {
                    debug!("{} needs rebuild: {}", source.display(), reason);
                    to_compile.push(CompileTask {
                        object: self.config.object_path(source),
                        source: source.clone(),
                    });
                }
                None => {
                    debug!("{} is up to date", source.display());
                    up_to_date += 1;
                }
            }
        }
        self.last_build_type = Some(build_type);

        let (files_compiled, failed_sources) = self.compile_all(to_compile);
        let compilation_failed = !failed_sources.is_empty();

        let mut linked = false;
        let mut link_failed = false;
        let output = self.config.output_file().to_path_buf();
        if compilation_failed {
            warn!(
                "Skipping link of {}: {} source(s) failed to compile",
                output.display(),
                failed_sources.len()
            );
        } else if self.needs_link() {
            if self.backend.link(&self.config.object_files(), &output, &self.config) {
                if let Err(e) = touch(&output) {
                    warn!("Failed to update timestamp of {}: {}", output.display(), e);
                }
                linked = true;
            } else {
                error!("Linking {} failed", output.display());
                link_failed = true;
            }
        } else {
            info!("{} is up to date, skipping link", output.display());
        }

        let outcome = BuildOutcome {
            target: target.to_string(),
            files_compiled,
            up_to_date,
            compilation_failed,
            linked,
            link_failed,
            success: !compilation_failed && !link_failed,
            duration: start.elapsed(),
            output,
            build_type,
            failed_sources,
        };
        info!(
            "Build of {} finished in {:?}: {}",
            target,
            outcome.duration,
            outcome.summary()
        );
        Ok(outcome)
    }

    /// Submit every task and block until all of them have reported
    fn compile_all(&mut self, tasks: Vec<CompileTask>) -> (usize, Vec<PathBuf>) {
        {
            let mut progress = self.shared.lock();
            progress.finished = 0;
            progress.compiled = 0;
            progress.failed_sources.clear();
        }

        let total = tasks.len();
        let config = Arc::new(self.config.clone());
        let mut submitted = 0;

        for task in tasks {
            let source = task.source.clone();
            let shared = Arc::clone(&self.shared);
            let backend = Arc::clone(&self.backend);
            let config = Arc::clone(&config);
            let callback = self.progress_callback.clone();

            let result = self.scheduler.submit(move || {
                run_compile(&task, backend.as_ref(), &config, &shared, callback.as_ref(), total);
            });
            match result {
                Ok(()) => submitted += 1,
                Err(e) => {
                    error!("Cannot schedule {}: {}", source.display(), e);
                    self.shared.lock().failed_sources.push(source);
                }
            }
        }

        let mut progress = self
            .shared
            .all_done
            .wait_while(self.shared.lock(), |p| p.finished < submitted)
            .unwrap_or_else(PoisonError::into_inner);

        (progress.compiled, std::mem::take(&mut progress.failed_sources))
    }

    /// Output missing, or some object newer than it
    fn needs_link(&self) -> bool {
        let output = self.config.output_file();
        if !output.exists() {
            debug!("{} does not exist, linking", output.display());
            return true;
        }
        self.config
            .object_files()
            .iter()
            .any(|object| is_newer(object, output))
    }

    /// Delete objects and the output, and forget all cached state
    pub fn clean(&mut self) -> CleanStats {
        let mut stats = CleanStats::default();

        for object in self.config.object_files() {
            match remove_if_present(&object) {
                Ok(true) => {
                    debug!("Removed {}", object.display());
                    stats.objects_removed += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to remove {}: {}", object.display(), e);
                    stats.errors += 1;
                }
            }
        }

        let output = self.config.output_file().to_path_buf();
        match remove_if_present(&output) {
            Ok(removed) => stats.output_removed = removed,
            Err(e) => {
                warn!("Failed to remove {}: {}", output.display(), e);
                stats.errors += 1;
            }
        }

        if let Err(e) = self.shared.lock().cache.clear() {
            warn!("{}", e);
            stats.errors += 1;
        }
        self.resolver.clear();
        if let Err(e) = self.marker.remove() {
            warn!("Failed to remove {}: {}", self.marker.path().display(), e);
            stats.errors += 1;
        }
        self.last_build_type = None;

        info!(
            "Clean removed {} object(s){}",
            stats.objects_removed,
            if stats.output_removed { " and the output" } else { "" }
        );
        stats
    }

    /// Persist the cache and last build type, then stop the workers.
    /// Later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.scheduler.shutdown();

        if let Err(e) = self.shared.lock().cache.save() {
            warn!("{}", e);
        }
        if let Some(build_type) = self.last_build_type
            && let Err(e) = self.marker.save(build_type)
        {
            warn!(
                "Failed to save last build type to {}: {}",
                self.marker.path().display(),
                e
            );
        }
    }
}

impl Drop for BuildOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for BuildOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("backend", &self.backend.name())
            .field("scheduler", &self.scheduler)
            .field("last_build_type", &self.last_build_type)
            .finish_non_exhaustive()
    }
}

/// Body of one compile task, run on a worker thread
fn run_compile(
    task: &CompileTask,
    backend: &dyn CompilerBackend,
    config: &BuildConfig,
    shared: &Shared,
    callback: Option<&ProgressCallback>,
    total: usize,
) {
    // Stamp taken before compiling, so an edit made mid-compile still
    // counts as newer next time.
    let stamp = modified_nanos(&task.source);

    let succeeded = panic::catch_unwind(AssertUnwindSafe(|| {
        backend.compile(&task.source, &task.object, config)
    }))
    .unwrap_or_else(|_| {
        error!("Compiler backend panicked on {}", task.source.display());
        false
    });

    if succeeded && let Err(e) = touch(&task.object) {
        warn!("Failed to update timestamp of {}: {}", task.object.display(), e);
    }

    {
        let mut progress = shared.lock();
        if succeeded {
            match &stamp {
                Ok(stamp) => progress.cache.put(task.source.clone(), *stamp),
                Err(e) => warn!("Not caching {}: {}", task.source.display(), e),
            }
            progress.compiled += 1;
        } else {
            error!("Failed to compile {}", task.source.display());
            progress.failed_sources.push(task.source.clone());
        }
        progress.finished += 1;

        if succeeded && let Some(callback) = callback {
            let finished = progress.finished;
            let reported = panic::catch_unwind(AssertUnwindSafe(|| {
                callback(&task.source, finished, total);
            }));
            if reported.is_err() {
                error!("Progress callback panicked");
            }
        }
    }
    shared.all_done.notify_all();
}

fn remove_if_present(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
