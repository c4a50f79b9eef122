//! Log subscriber setup. Logs go to stderr so stdout stays parseable.

use crate::config::Verbosity;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Text,
    /// JSON lines
    Json,
}

impl From<crate::commands::LogFormatArg> for LogFormat {
    fn from(arg: crate::commands::LogFormatArg) -> Self {
        match arg {
            crate::commands::LogFormatArg::Text => Self::Text,
            crate::commands::LogFormatArg::Json => Self::Json,
        }
    }
}

/// Filter from `RUST_LOG` when set, otherwise from the verbosity flags
#[must_use]
pub fn filter_for(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.filter_directive()))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(verbosity: Verbosity, format: LogFormat, ansi: bool) {
    let filter = filter_for(verbosity);
    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_ansi(ansi).with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr).with_current_span(true))
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("log subscriber already installed");
    }
}
