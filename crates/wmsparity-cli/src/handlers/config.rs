//! Config command handler

use super::resolve_config;
use crate::commands::ConfigArgs;
use crate::error::CliResult;

/// Print the resolved harness configuration as YAML
pub fn execute_config(args: &ConfigArgs) -> CliResult<()> {
    let config = resolve_config(&args.source)?;
    print!("{}", config.to_yaml()?);
    Ok(())
}
