//! wmsparity CLI library
//!
//! Command-line front end over the `wmsparity` rendering-comparison engine.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

mod commands;
mod config;
mod error;
pub mod handlers;
mod logging;
mod output;

pub use commands::{
    Cli, ColorArg, Commands, CompareArgs, ConfigArgs, ConfigSourceArgs, ListArgs, OutputFormatArg,
    RunArgs,
};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use logging::{env_filter, init_tracing};
pub use output::{scores, ProgressReporter};
