//! Build type commands

use super::{CommandResult, Context};
use convenient_build::BuildType;

/// Persist `build_type` for later builds
pub fn set(context: &Context, build_type: BuildType) -> CommandResult {
    let mut config = context.load_config()?;
    config.set_build_type(build_type);

    println!("Build type set to {build_type}");
    println!("  Compiler flags: {}", config.compiler_flags().join(" "));
    Ok(())
}

/// Print the effective build type
pub fn show(context: &Context) -> CommandResult {
    let config = context.load_config()?;
    println!("Current build type: {}", config.build_type());
    Ok(())
}
