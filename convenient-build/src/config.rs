//! Build configuration
//!
//! The textual configuration file is a flat list of `key=value` lines:
//!
//! ```text
//! # comment
//! compiler=g++
//! sources=src/main.cpp,src/util.cpp
//! include_paths=include
//! output=app
//! debug=true
//! ```
//!
//! It is parsed once into a typed [`BuildConfig`]. The build type is the one
//! piece of state that also lives outside the config file: a
//! [`BuildTypeStore`] persists it in a one-line state file, and a saved value
//! takes precedence over the config file's `debug` key.

use crate::error::{BuildError, BuildResult};
use crate::fs_utils::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Default output artifact when the config does not name one
pub const DEFAULT_OUTPUT: &str = "a.out";

/// Build type: selects the debug or release flag set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BuildType {
    /// Unoptimized build with debug info
    #[default]
    Debug,
    /// Optimized build
    Release,
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildType::Debug => write!(f, "Debug"),
            BuildType::Release => write!(f, "Release"),
        }
    }
}

impl FromStr for BuildType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(BuildType::Debug),
            "release" => Ok(BuildType::Release),
            other => Err(ConfigError::InvalidValue {
                key: "build_type".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Persists the build type in a single-line state file
#[derive(Debug, Clone)]
pub struct BuildTypeStore {
    path: PathBuf,
}

impl BuildTypeStore {
    /// Create a store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved build type.
    ///
    /// A missing or unreadable file means "nothing saved"; unreadable and
    /// malformed files are reported as warnings.
    pub fn load(&self) -> Option<BuildType> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read build type file {}: {}", self.path.display(), e);
                return None;
            }
        };

        match content.lines().next().map(str::parse::<BuildType>) {
            Some(Ok(build_type)) => Some(build_type),
            _ => {
                warn!(
                    "Ignoring malformed build type file {}",
                    self.path.display()
                );
                None
            }
        }
    }

    /// Write `build_type` to the state file
    pub fn save(&self, build_type: BuildType) -> io::Result<()> {
        atomic_write(&self.path, format!("{build_type}\n").as_bytes())
    }

    /// Remove the state file if it exists
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Resolved project description consumed by the orchestrator
#[derive(Debug, Clone)]
pub struct BuildConfig {
    compiler: String,
    sources: Vec<PathBuf>,
    include_paths: Vec<PathBuf>,
    libraries: Vec<String>,
    output: PathBuf,
    object_dir: PathBuf,
    extra_flags: Vec<String>,
    debug_flags: Vec<String>,
    release_flags: Vec<String>,
    jobs: Option<usize>,
    build_type: BuildType,
    compiler_flags: Vec<String>,
    build_type_store: Option<BuildTypeStore>,
}

impl BuildConfig {
    /// Create a config with the required fields and defaults for the rest
    pub fn new(
        compiler: impl Into<String>,
        sources: Vec<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        let mut config = Self {
            compiler: compiler.into(),
            sources,
            include_paths: Vec::new(),
            libraries: Vec::new(),
            output: output.into(),
            object_dir: PathBuf::from("."),
            extra_flags: Vec::new(),
            debug_flags: vec!["-g".to_string(), "-O0".to_string()],
            release_flags: vec!["-O2".to_string()],
            jobs: None,
            build_type: BuildType::Debug,
            compiler_flags: Vec::new(),
            build_type_store: None,
        };
        config.derive_flags();
        config
    }

    /// Load and parse a config file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        info!("Loading config file: {}", path.display());

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&content, path)
    }

    /// Parse config text; `origin` is only used for messages
    pub fn parse(content: &str, origin: &Path) -> ConfigResult<Self> {
        let mut values: HashMap<String, String> = HashMap::new();

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(
                    "{}:{}: ignoring line without '=': {}",
                    origin.display(),
                    index + 1,
                    line
                );
                continue;
            };
            let key = key.trim().to_string();
            let value = value.trim().to_string();
            debug!("Config: {} = {}", key, value);
            values.insert(key, value);
        }

        let compiler = required(&values, "compiler")?;
        let sources: Vec<PathBuf> = list(&values, "sources").into_iter().map(PathBuf::from).collect();
        if sources.is_empty() {
            return Err(ConfigError::MissingKey("sources".to_string()));
        }
        let output = values
            .get("output")
            .filter(|v| !v.is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_OUTPUT), PathBuf::from);

        let mut config = Self::new(compiler, sources, output);
        config.include_paths = list(&values, "include_paths").into_iter().map(PathBuf::from).collect();
        config.libraries = list(&values, "libraries");
        config.extra_flags = list(&values, "flags");
        if values.contains_key("debug_flags") {
            config.debug_flags = list(&values, "debug_flags");
        }
        if values.contains_key("release_flags") {
            config.release_flags = list(&values, "release_flags");
        }
        if let Some(dir) = values.get("object_dir").filter(|v| !v.is_empty()) {
            config.object_dir = PathBuf::from(dir);
        }
        if let Some(jobs) = values.get("jobs") {
            let parsed = jobs.parse::<usize>().ok().filter(|n| *n > 0);
            config.jobs = Some(parsed.ok_or_else(|| ConfigError::InvalidValue {
                key: "jobs".to_string(),
                value: jobs.clone(),
            })?);
        }
        config.build_type = match values.get("debug").map(String::as_str) {
            None | Some("true") => BuildType::Debug,
            Some("false") => BuildType::Release,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "debug".to_string(),
                    value: other.to_string(),
                });
            }
        };

        for key in values.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                debug!("Ignoring unknown config key: {}", key);
            }
        }

        config.derive_flags();
        Ok(config)
    }

    /// Attach a build type state store.
    ///
    /// A type already saved in the store overrides the config file's `debug`
    /// key.
    pub fn with_build_type_store(mut self, store: BuildTypeStore) -> Self {
        if let Some(saved) = store.load()
            && saved != self.build_type
        {
            info!(
                "Saved build type {} overrides config file ({})",
                saved, self.build_type
            );
            self.build_type = saved;
            self.derive_flags();
        }
        self.build_type_store = Some(store);
        self
    }

    /// Set the include search path
    pub fn with_include_paths(mut self, include_paths: Vec<PathBuf>) -> Self {
        self.include_paths = include_paths;
        self
    }

    /// Set the directory objects are written to
    pub fn with_object_dir(mut self, object_dir: impl Into<PathBuf>) -> Self {
        self.object_dir = object_dir.into();
        self
    }

    /// Set the linker libraries
    pub fn with_libraries(mut self, libraries: Vec<String>) -> Self {
        self.libraries = libraries;
        self
    }

    /// Set the flags used for every compile and link
    pub fn with_extra_flags(mut self, flags: Vec<String>) -> Self {
        self.extra_flags = flags;
        self.derive_flags();
        self
    }

    /// Set the initial build type without persisting it
    pub fn with_build_type(mut self, build_type: BuildType) -> Self {
        self.build_type = build_type;
        self.derive_flags();
        self
    }

    /// Compiler identity (e.g. `g++`)
    pub fn compiler(&self) -> &str {
        &self.compiler
    }

    /// Translation units, in config order
    pub fn source_files(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Local include search path, in declared order
    pub fn include_paths(&self) -> &[PathBuf] {
        &self.include_paths
    }

    /// Libraries passed to the linker
    pub fn libraries(&self) -> &[String] {
        &self.libraries
    }

    /// The output artifact
    pub fn output_file(&self) -> &Path {
        &self.output
    }

    /// Directory for object files
    pub fn object_dir(&self) -> &Path {
        &self.object_dir
    }

    /// Worker count requested by the config, if any
    pub fn jobs(&self) -> Option<usize> {
        self.jobs
    }

    /// Flags for the current build type
    pub fn compiler_flags(&self) -> &[String] {
        &self.compiler_flags
    }

    /// Current build type
    pub fn build_type(&self) -> BuildType {
        self.build_type
    }

    /// Change the build type, re-derive flags and persist the choice.
    ///
    /// A state file that cannot be written only costs durability: the new
    /// type still applies to this process.
    pub fn set_build_type(&mut self, build_type: BuildType) {
        self.build_type = build_type;
        self.derive_flags();

        if let Some(store) = &self.build_type_store
            && let Err(e) = store.save(build_type)
        {
            warn!(
                "Failed to save build type to {}: {}",
                store.path().display(),
                e
            );
        }
    }

    /// Whether the required fields are present
    pub fn is_initialized(&self) -> bool {
        !self.compiler.is_empty() && !self.sources.is_empty() && !self.output.as_os_str().is_empty()
    }

    /// Object path for `source`: `<object_dir>/<stem>.o`
    pub fn object_path(&self, source: &Path) -> PathBuf {
        let stem = source.file_stem().unwrap_or(source.as_os_str());
        let mut name = stem.to_os_string();
        name.push(".o");
        self.object_dir.join(name)
    }

    /// Object paths for every source, in config order
    pub fn object_files(&self) -> Vec<PathBuf> {
        self.sources.iter().map(|s| self.object_path(s)).collect()
    }

    /// Check the config can drive a build: required fields present and no
    /// two sources sharing an object file
    pub fn validate(&self) -> BuildResult<()> {
        if !self.is_initialized() {
            return Err(BuildError::ConfigNotInitialized);
        }

        let mut owners: HashMap<PathBuf, &Path> = HashMap::new();
        for source in &self.sources {
            let object = self.object_path(source);
            if let Some(first) = owners.get(&object) {
                return Err(BuildError::DuplicateObject {
                    object,
                    first: first.to_path_buf(),
                    second: source.clone(),
                });
            }
            owners.insert(object, source);
        }
        Ok(())
    }

    fn derive_flags(&mut self) {
        let type_flags = match self.build_type {
            BuildType::Debug => &self.debug_flags,
            BuildType::Release => &self.release_flags,
        };
        self.compiler_flags = self
            .extra_flags
            .iter()
            .chain(type_flags.iter())
            .cloned()
            .collect();
    }
}

const KNOWN_KEYS: &[&str] = &[
    "compiler",
    "sources",
    "output",
    "include_paths",
    "libraries",
    "flags",
    "debug",
    "debug_flags",
    "release_flags",
    "object_dir",
    "jobs",
];

fn required(values: &HashMap<String, String>, key: &str) -> ConfigResult<String> {
    values
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
}

fn list(values: &HashMap<String, String>, key: &str) -> Vec<String> {
    values
        .get(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Unable to open config file {path}: {1}", path = .0.display())]
    Io(PathBuf, #[source] io::Error),

    /// A required key is absent or empty
    #[error("Configuration key not found: {0}")]
    MissingKey(String),

    /// A value could not be parsed
    #[error("Invalid value for {key}: {value}")]
    InvalidValue {
        /// Offending key
        key: String,
        /// Offending value
        value: String,
    },
}
