//! Build log commands

use super::{CommandResult, LogCommand};
use chrono::Local;
use convenient_buildlog::BuildLog;

/// Run one `log` subcommand
pub fn run(action: LogCommand) -> CommandResult {
    match action {
        LogCommand::View { file } => {
            let log = BuildLog::new(file);
            println!("Contents of {}:", log.path().display());
            print!("{}", log.view()?);
        }
        LogCommand::Search {
            file,
            term,
            ignore_case,
        } => {
            let log = BuildLog::new(file);
            println!("Searching for \"{term}\" in {}:", log.path().display());
            for hit in log.search(&term, ignore_case)? {
                println!();
                println!("Build ID: {}", hit.id.as_deref().unwrap_or("(none)"));
                for line in hit.lines {
                    println!("{line}");
                }
            }
        }
        LogCommand::Compare {
            file,
            first,
            second,
        } => {
            let diffs = BuildLog::new(file).compare(&first, &second)?;
            println!("Comparing builds {first} and {second}:");
            if diffs.is_empty() {
                println!("No differences.");
            }
            for diff in diffs {
                println!("{}:", diff.key);
                println!("  {first}: {}", diff.first);
                println!("  {second}: {}", diff.second);
            }
        }
        LogCommand::Prune { file, days } => {
            let stats = BuildLog::new(file).prune(days, Local::now().naive_local())?;
            println!(
                "Log file cleaned. Removed {} entries older than {days} days, kept {}.",
                stats.removed, stats.kept
            );
        }
        LogCommand::Ids { file } => {
            let log = BuildLog::new(file);
            let ids = log.list_ids()?;
            if ids.is_empty() {
                println!("No build IDs found in {}", log.path().display());
            }
            for id in ids {
                println!("{id}");
            }
        }
    }
    Ok(())
}
