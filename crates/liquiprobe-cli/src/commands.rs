//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Liquiprobe: run YAML browser scenarios against a web application
#[derive(Parser, Debug)]
#[command(name = "liquiprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Log line format on stderr
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormatArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run scenarios in a browser
    Run(RunArgs),

    /// Parse and lint scenarios without a browser
    Validate(ValidateArgs),

    /// Show or create the runner configuration
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct RunArgs {
    /// Scenario files or directories (`*.yaml`, `*.yml`)
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Runner configuration file
    #[arg(short, long, env = "LIQUIPROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Base URL of the application under test
    #[arg(long)]
    pub base_url: Option<String>,

    /// Scenarios run concurrently, each in its own browser
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Only scenarios whose name contains this text
    #[arg(short, long)]
    pub filter: Option<String>,

    /// Only scenarios carrying this tag (repeatable)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    /// Stop starting scenarios after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Write the JSON suite report here
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Result output format on stdout
    #[arg(long, default_value = "text")]
    pub format: OutputFormatArg,
}

/// Arguments for the validate command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Scenario files or directories
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Runner configuration file (supplies fixture names)
    #[arg(short, long, env = "LIQUIPROBE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Configuration file to read
    #[arg(short, long, env = "LIQUIPROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write the default configuration to this path
    #[arg(long)]
    pub init: Option<PathBuf>,

    /// Overwrite an existing file with --init
    #[arg(long)]
    pub force: bool,
}

/// Color output argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
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

/// Log format argument
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormatArg {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Result output format
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormatArg {
    /// Human-readable summary
    #[default]
    Text,
    /// Suite report as JSON
    Json,
}

impl From<OutputFormatArg> for crate::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Text => Self::Text,
            OutputFormatArg::Json => Self::Json,
        }
    }
}
