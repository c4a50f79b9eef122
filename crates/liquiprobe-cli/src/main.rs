//! Liquiprobe CLI
//!
//! ## Usage
//!
//! ```bash
//! liquiprobe validate scenarios/                 # Parse and lint
//! liquiprobe run scenarios/ -j 4 --tag smoke     # Run in Chromium
//! liquiprobe run scenarios/ --report out.json    # Keep the JSON report
//! liquiprobe config --init liquiprobe.yaml       # Write default config
//! ```
//!
//! Exit status: 0 when every scenario passed or was skipped, 1 when any
//! failed, 2 when the run could not start.

use clap::Parser;
use liquiprobe_cli::{execute, Cli, CliError};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: cannot start async runtime: {e}");
            return ExitCode::from(2);
        }
    };
    match runtime.block_on(execute(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

fn report(err: &CliError) -> ExitCode {
    eprintln!("Error: {err}");
    ExitCode::from(err.exit_code())
}
