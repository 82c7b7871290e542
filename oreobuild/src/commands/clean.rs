//! Clean command

use super::{CommandResult, Context};
use convenient_build::BuildOrchestrator;
use std::io::{self, BufRead, Write};

/// Remove objects, the output and cached build state
pub fn clean(context: &Context, force: bool) -> CommandResult {
    if !force {
        let stdin = io::stdin();
        if !confirm(&mut stdin.lock(), &mut io::stdout())? {
            println!("Clean cancelled.");
            return Ok(());
        }
    }

    let mut orchestrator = BuildOrchestrator::open(&context.config, context.options())?;

    let stats = orchestrator.clean();
    orchestrator.shutdown();

    println!("Clean completed.");
    println!("  Object files removed: {}", stats.objects_removed);
    println!(
        "  Output removed:       {}",
        if stats.output_removed { "yes" } else { "no" }
    );
    if stats.errors > 0 {
        return Err(format!("{} file(s) could not be removed", stats.errors).into());
    }
    Ok(())
}

/// Ask before deleting; anything but `y`/`yes` declines
fn confirm(input: &mut impl BufRead, output: &mut impl Write) -> io::Result<bool> {
    write!(
        output,
        "This will delete all object files, the output and the build cache. Continue? [y/N] "
    )?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
