//! Incremental build command

use super::{CommandResult, Context};
use convenient_build::BuildOrchestrator;
use convenient_buildlog::{BuildLog, BuildRecord};
use std::path::Path;
use tracing::info;

/// Build `target`, optionally appending the outcome to a build log
pub fn build(context: &Context, target: &str, log: Option<&Path>, json: bool) -> CommandResult {
    let mut orchestrator = BuildOrchestrator::open(&context.config, context.options())?;
    info!(
        "Building {} ({})",
        orchestrator.config().output_file().display(),
        orchestrator.config().build_type()
    );
    if !json {
        orchestrator.set_progress_callback(|source, finished, total| {
            println!("[{finished}/{total}] Compiled {}", source.display());
        });
    }

    let outcome = orchestrator.build(target)?;
    orchestrator.shutdown();

    if let Some(log) = log {
        let id = BuildLog::new(log).append(&BuildRecord::from_outcome(&outcome))?;
        if !json {
            println!("Build log entry {id} appended to {}", log.display());
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else if outcome.success {
        println!(
            "Build completed successfully in {:.3} seconds. {}",
            outcome.duration.as_secs_f64(),
            outcome.summary()
        );
        println!("  Target:           {}", outcome.target);
        println!("  Build type:       {}", outcome.build_type);
        println!("  Files compiled:   {}", outcome.files_compiled);
        println!("  Up-to-date files: {}", outcome.up_to_date);
        if outcome.linked {
            println!("  Linked:           {}", outcome.output.display());
        }
    }

    if outcome.success {
        return Ok(());
    }

    for source in &outcome.failed_sources {
        eprintln!("Failed to compile: {}", source.display());
    }
    if outcome.link_failed {
        eprintln!("Failed to link: {}", outcome.output.display());
    }
    Err("Build failed".into())
}
