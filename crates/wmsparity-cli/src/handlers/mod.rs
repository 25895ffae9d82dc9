//! Command handlers
//!
//! Each handler resolves what it needs from the command's arguments, does
//! its work through the library and reports whether the command succeeded.

pub mod compare;
pub mod config;
pub mod list;
pub mod run;

pub use compare::execute_compare;
pub use config::execute_config;
pub use list::execute_list;
pub use run::execute_run;

use crate::commands::ConfigSourceArgs;
use crate::error::{CliError, CliResult};
use std::path::{Path, PathBuf};
use wmsparity::{HarnessConfig, ProjectFile};

/// Configuration file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "wmsparity.yaml";

/// Resolve the harness configuration: files first, then command-line flags
pub fn resolve_config(args: &ConfigSourceArgs) -> CliResult<HarnessConfig> {
    let main = args
        .config
        .clone()
        .or_else(|| Some(PathBuf::from(DEFAULT_CONFIG_FILE)).filter(|p| p.is_file()));
    if let Some(path) = &main {
        if !path.is_file() {
            return Err(CliError::config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
    }

    let mut config = HarnessConfig::load(main.as_deref(), args.local.as_deref())?;
    if let Some(project) = &args.project {
        config = config.with_project(project);
    }
    if let Some(dir) = &args.results_dir {
        config = config.with_results_dir(dir);
    }
    tracing::debug!(
        config = ?main,
        project = %config.project.display(),
        results = %config.results_dir.display(),
        "configuration resolved"
    );
    Ok(config)
}

/// Load the map definition named by the configuration
pub fn load_project(config: &HarnessConfig) -> CliResult<ProjectFile> {
    let path: &Path = &config.project;
    if !path.is_file() {
        return Err(CliError::config(format!(
            "project file not found: {}",
            path.display()
        )));
    }
    Ok(ProjectFile::load(path)?)
}
