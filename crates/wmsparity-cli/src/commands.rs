//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// wmsparity: check that two WMS servers render the same styled layers alike
#[derive(Parser, Debug)]
#[command(name = "wmsparity")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (failures and errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render every test layer on both servers and compare
    Run(RunArgs),

    /// List the test cases without contacting the servers
    List(ListArgs),

    /// Compare two local images
    Compare(CompareArgs),

    /// Show the resolved configuration
    Config(ConfigArgs),
}

/// Where the harness configuration comes from
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigSourceArgs {
    /// Main configuration file (default: ./wmsparity.yaml when present)
    #[arg(short, long, env = "WMSPARITY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Local override file (default: <config stem>.local.yaml when present)
    #[arg(long)]
    pub local: Option<PathBuf>,

    /// Map definition file
    #[arg(short, long)]
    pub project: Option<PathBuf>,

    /// Output directory for images and the report
    #[arg(short, long)]
    pub results_dir: Option<PathBuf>,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Configuration sources
    #[command(flatten)]
    pub source: ConfigSourceArgs,

    /// Only run test cases whose name contains this text
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Exit non-zero when any test case fails
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub fail_on_error: bool,
}

/// Arguments for the list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Configuration sources
    #[command(flatten)]
    pub source: ConfigSourceArgs,

    /// Only list test cases whose name contains this text
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Output format
    #[arg(long, default_value = "text")]
    pub format: OutputFormatArg,
}

/// Arguments for the compare command
#[derive(Parser, Debug)]
pub struct CompareArgs {
    /// First image (reference)
    pub first: PathBuf,

    /// Second image
    pub second: PathBuf,

    /// Write the difference image here
    #[arg(long)]
    pub diff: Option<PathBuf>,

    /// Minimum SSIM
    #[arg(long)]
    pub ssim: Option<f64>,

    /// Maximum MSE
    #[arg(long)]
    pub mse: Option<f64>,

    /// Minimum template match
    #[arg(long = "match")]
    pub template_match: Option<f64>,

    /// Print scores as JSON
    #[arg(long)]
    pub json: bool,
}

impl CompareArgs {
    /// Whether any threshold was given
    #[must_use]
    pub const fn has_thresholds(&self) -> bool {
        self.ssim.is_some() || self.mse.is_some() || self.template_match.is_some()
    }
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Configuration sources
    #[command(flatten)]
    pub source: ConfigSourceArgs,
}

/// Color argument for CLI
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

/// Output format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormatArg {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
}
