//! OreoBuild command-line interface
//!
//! - `build`: incremental compile and link
//! - `clean`: remove build products and cached state
//! - `debug` / `release` / `build-type`: build type state
//! - `log`: build history (does not need a project config)

use clap::{ArgAction, Parser, Subcommand};
use convenient_build::orchestrator::BUILD_TYPE_FILE;
use convenient_build::{BuildConfig, BuildType, BuildTypeStore, OrchestratorOptions};
use std::path::PathBuf;

pub mod build;
pub mod build_type;
pub mod clean;
pub mod log;

/// Result type of every command handler
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// OreoBuild - incremental C/C++ build tool
#[derive(Parser, Debug)]
#[command(name = "oreobuild")]
#[command(about = "Incremental C/C++ build tool", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Project configuration file
    #[arg(short, long, global = true, default_value = "oreobuild.conf")]
    pub config: PathBuf,

    /// Directory for the build cache and build type files
    #[arg(long, global = true, default_value = ".")]
    pub state_dir: PathBuf,

    /// Parallel compile jobs (default: config `jobs`, then CPU count)
    #[arg(short, long, global = true)]
    pub jobs: Option<usize>,

    /// More output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compile changed sources and relink
    Build {
        /// Target name recorded in the outcome
        #[arg(default_value = "all")]
        target: String,

        /// Append the outcome to this build log
        #[arg(long)]
        log: Option<PathBuf>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove objects, the output and the build cache
    Clean {
        /// Do not ask for confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Switch to the Debug build type
    Debug,

    /// Switch to the Release build type
    Release,

    /// Show the current build type
    BuildType,

    /// Inspect a build log
    Log {
        #[command(subcommand)]
        action: LogCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum LogCommand {
    /// Print the whole log
    View {
        /// Log file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print lines matching a regular expression
    Search {
        /// Log file
        #[arg(short, long)]
        file: PathBuf,

        /// Regular expression
        term: String,

        /// Ignore case
        #[arg(short, long)]
        ignore_case: bool,
    },

    /// Show fields that differ between two builds
    Compare {
        /// Log file
        #[arg(short, long)]
        file: PathBuf,

        /// First build id
        first: String,

        /// Second build id
        second: String,
    },

    /// Remove entries older than a number of days
    Prune {
        /// Log file
        #[arg(short, long)]
        file: PathBuf,

        /// Keep entries from the last N days
        days: u32,
    },

    /// List build ids
    Ids {
        /// Log file
        #[arg(short, long)]
        file: PathBuf,
    },
}

/// Global options shared by the project commands
#[derive(Debug, Clone)]
pub struct Context {
    pub config: PathBuf,
    pub state_dir: PathBuf,
    pub jobs: Option<usize>,
}

impl Context {
    /// Parse the project config and apply the saved build type
    pub fn load_config(&self) -> CommandResult<BuildConfig> {
        let store = BuildTypeStore::new(self.state_dir.join(BUILD_TYPE_FILE));
        Ok(BuildConfig::load(&self.config)?.with_build_type_store(store))
    }

    /// Orchestrator options from the global flags
    pub fn options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            state_dir: self.state_dir.clone(),
            workers: self.jobs,
        }
    }
}

/// Dispatch a parsed command line
pub fn run(cli: Cli) -> CommandResult {
    let context = Context {
        config: cli.config,
        state_dir: cli.state_dir,
        jobs: cli.jobs,
    };

    match cli.command {
        Commands::Build { target, log, json } => {
            build::build(&context, &target, log.as_deref(), json)
        }
        Commands::Clean { force } => clean::clean(&context, force),
        Commands::Debug => build_type::set(&context, BuildType::Debug),
        Commands::Release => build_type::set(&context, BuildType::Release),
        Commands::BuildType => build_type::show(&context),
        Commands::Log { action } => log::run(action),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_with_globals_after_subcommand() {
        let cli = Cli::try_parse_from([
            "oreobuild", "build", "app", "--log", "build.log", "-vv", "-j", "4",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.jobs, Some(4));
        assert_eq!(cli.config, PathBuf::from("oreobuild.conf"));
        match cli.command {
            Commands::Build { target, log, json } => {
                assert_eq!(target, "app");
                assert_eq!(log, Some(PathBuf::from("build.log")));
                assert!(!json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_build_target_defaults_to_all() {
        let cli = Cli::try_parse_from(["oreobuild", "-c", "proj.conf", "build"]).unwrap();

        assert_eq!(cli.config, PathBuf::from("proj.conf"));
        assert!(matches!(cli.command, Commands::Build { ref target, .. } if target == "all"));
    }

    #[test]
    fn test_parse_log_commands() {
        let cli = Cli::try_parse_from([
            "oreobuild", "log", "search", "--file", "b.log", "error", "-i",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Log { action: LogCommand::Search { ref term, ignore_case: true, .. } }
                if term == "error"
        ));

        let cli = Cli::try_parse_from(["oreobuild", "log", "prune", "-f", "b.log", "7"]).unwrap();
        assert!(matches!(cli.command, Commands::Log { action: LogCommand::Prune { days: 7, .. } }));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(Cli::try_parse_from(["oreobuild", "install"]).is_err());
        assert!(Cli::try_parse_from(["oreobuild", "log", "ids"]).is_err());
    }
}
