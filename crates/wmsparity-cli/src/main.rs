//! wmsparity: rendering parity checks for two WMS servers
//!
//! ## Usage
//!
//! ```bash
//! wmsparity run                          # Render and compare every test layer
//! wmsparity run --filter roads           # Only cases whose name contains "roads"
//! wmsparity list                         # Show the test cases
//! wmsparity compare a.png b.png --diff d.png --ssim 0.9
//! wmsparity config                       # Print the resolved configuration
//! ```

use clap::Parser;
use std::process::ExitCode;
use wmsparity_cli::{
    handlers, init_tracing, Cli, CliConfig, CliResult, ColorChoice, Commands, Verbosity,
};

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<bool> {
    let cli = Cli::parse();

    let config = build_config(&cli);
    init_tracing(&config);

    match cli.command {
        Commands::Run(args) => handlers::execute_run(&config, &args),
        Commands::List(args) => handlers::execute_list(&config, &args),
        Commands::Compare(args) => handlers::execute_compare(&config, &args),
        Commands::Config(args) => {
            handlers::execute_config(&args)?;
            Ok(true)
        }
    }
}

fn build_config(cli: &Cli) -> CliConfig {
    let verbosity = Verbosity::from_flags(cli.quiet, cli.verbose);
    let color: ColorChoice = cli.color.into();
    CliConfig::new().with_verbosity(verbosity).with_color(color)
}
