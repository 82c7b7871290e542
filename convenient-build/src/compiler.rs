//! Compiler backends
//!
//! A [`CompilerBackend`] turns one source into one object and a set of
//! objects into the output artifact. Both operations report plain success or
//! failure; diagnostics go to the log. [`GccBackend`] drives any GCC-style
//! command-line driver as a subprocess.

use crate::config::BuildConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, error, info};

/// Compile and link capability of a toolchain
pub trait CompilerBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Compile `source` into `object`; `true` on success
    fn compile(&self, source: &Path, object: &Path, config: &BuildConfig) -> bool;

    /// Link `objects` into `output`; `true` on success
    fn link(&self, objects: &[PathBuf], output: &Path, config: &BuildConfig) -> bool;
}

/// Compiler identities handled by [`GccBackend`]
pub const GCC_FAMILY: &[&str] = &["gcc", "g++", "cc", "c++", "clang", "clang++"];

/// Select a backend for the configured compiler identity
pub fn create_backend(compiler: &str) -> CompilerResult<Box<dyn CompilerBackend>> {
    let identity = Path::new(compiler)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(compiler);

    if GCC_FAMILY.contains(&identity) {
        Ok(Box::new(GccBackend::new(compiler)))
    } else {
        Err(CompilerError::Unsupported(compiler.to_string()))
    }
}

/// Backend for GCC-compatible drivers (gcc, g++, clang, ...)
#[derive(Debug, Clone)]
pub struct GccBackend {
    program: String,
}

impl GccBackend {
    /// Backend invoking `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Driver program
    pub fn program(&self) -> &str {
        &self.program
    }

    /// `<compiler> <flags> -I<path>... -c <source> -o <object>`
    pub fn compile_command(&self, source: &Path, object: &Path, config: &BuildConfig) -> Command {
        let mut command = Command::new(&self.program);
        command.args(config.compiler_flags());
        for path in config.include_paths() {
            let mut arg = std::ffi::OsString::from("-I");
            arg.push(path);
            command.arg(arg);
        }
        command.arg("-c").arg(source).arg("-o").arg(object);
        command
    }

    /// `<compiler> <flags> <objects> -o <output> -l<lib>...`
    pub fn link_command(&self, objects: &[PathBuf], output: &Path, config: &BuildConfig) -> Command {
        let mut command = Command::new(&self.program);
        command.args(config.compiler_flags());
        command.args(objects);
        command.arg("-o").arg(output);
        for library in config.libraries() {
            command.arg(format!("-l{library}"));
        }
        if self.is_c_driver() {
            command.arg("-lstdc++");
        }
        command
    }

    fn is_c_driver(&self) -> bool {
        matches!(
            Path::new(&self.program).file_name().and_then(|n| n.to_str()),
            Some("gcc" | "cc")
        )
    }

    fn run(&self, mut command: Command, what: &str) -> bool {
        debug!("Command: {:?}", command);
        match command.output() {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                report_failure(what, &output);
                false
            }
            Err(e) => {
                error!("{} failed: cannot run {}: {}", what, self.program, e);
                false
            }
        }
    }
}

impl CompilerBackend for GccBackend {
    fn name(&self) -> &str {
        "GCC"
    }

    fn compile(&self, source: &Path, object: &Path, config: &BuildConfig) -> bool {
        if let Some(parent) = object.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = fs::create_dir_all(parent)
        {
            error!("Cannot create object directory {}: {}", parent.display(), e);
            return false;
        }

        info!("Compiling: {} to {}", source.display(), object.display());
        let command = self.compile_command(source, object, config);
        self.run(command, &format!("Compilation of {}", source.display()))
    }

    fn link(&self, objects: &[PathBuf], output: &Path, config: &BuildConfig) -> bool {
        info!("Linking: {}", output.display());

        // Link next to the output and rename, so a failed link never
        // replaces the existing artifact.
        let mut staged = output.as_os_str().to_owned();
        staged.push(".partial");
        let staged = PathBuf::from(staged);

        let command = self.link_command(objects, &staged, config);
        if !self.run(command, &format!("Linking of {}", output.display())) {
            let _ = fs::remove_file(&staged);
            return false;
        }

        match fs::rename(&staged, output) {
            Ok(()) => true,
            Err(e) => {
                error!("Cannot move linked output to {}: {}", output.display(), e);
                let _ = fs::remove_file(&staged);
                false
            }
        }
    }
}

fn report_failure(what: &str, output: &Output) {
    match output.status.code() {
        Some(code) => error!("{} failed with exit code {}", what, code),
        None => error!("{} terminated by signal", what),
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines() {
        error!("  {}", line);
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    for line in stdout.lines() {
        debug!("  {}", line);
    }
}

/// Result type for backend selection
pub type CompilerResult<T> = Result<T, CompilerError>;

/// Backend selection errors
#[derive(Debug, thiserror::Error)]
pub enum CompilerError {
    /// No backend handles the requested compiler
    #[error("Unsupported compiler: {0}")]
    Unsupported(String),
}
