//! Liquiprobe CLI library
//!
//! Loads YAML scenarios and runner configuration, then runs them through the
//! engine in Chromium and prints the suite report.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod config;
mod error;
pub mod logging;
mod output;
pub mod runner;

pub use commands::{Cli, ColorArg, Commands, ConfigArgs, LogFormatArg, OutputFormatArg, RunArgs, ValidateArgs};
pub use config::{CliConfig, ColorChoice, Verbosity};
pub use error::{CliError, CliResult};
pub use output::{render_suite, OutputFormat, Reporter};

/// Dispatch a parsed command line
pub async fn execute(cli: Cli) -> CliResult<()> {
    let config = CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(cli.color.into());
    logging::init(config.verbosity, cli.log_format.into(), config.color.should_color());

    match cli.command {
        Commands::Run(args) => runner::run(&config, &args).await,
        Commands::Validate(args) => runner::validate(&config, &args),
        Commands::Config(args) => runner::config(&config, &args),
    }
}
