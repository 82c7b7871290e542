//! OreoBuild - incremental C/C++ builds without a build-graph language
//!
//! Usage:
//!   oreobuild build [target] [--log <file>]   Compile what changed and relink
//!   oreobuild clean [--force]                 Remove objects, output and cache
//!   oreobuild debug | release                 Switch build type
//!   oreobuild log ids --file <log>            Inspect the build history

mod commands;

use clap::Parser;
use commands::Cli;
use std::process;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = commands::run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise `-v` raises the level of the workspace crates
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("oreobuild={level},convenient_build={level},convenient_buildlog={level}")
                .into()
        }))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
