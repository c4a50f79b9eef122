//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Scenario files did not pass validation
    #[error("{count} scenario issue(s) found")]
    Invalid {
        /// Number of issues
        count: usize,
    },

    /// At least one scenario failed
    #[error("{failed} of {total} scenario(s) failed")]
    ScenariosFailed {
        /// Failed scenarios
        failed: usize,
        /// Scenarios run
        total: usize,
    },

    /// No scenario matched the paths and filters
    #[error("No scenarios selected")]
    NothingToRun,

    /// Browser support was compiled out
    #[error("This build has no browser support; rebuild with --features browser")]
    BrowserUnavailable,

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine error
    #[error(transparent)]
    Probe(#[from] liquiprobe::ProbeError),

    /// Invalid argument
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Error message
        message: String,
    },
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Process exit code: 1 for scenario failures, 2 for everything that
    /// stopped scenarios from running
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::ScenariosFailed { .. } => 1,
            _ => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(CliError::config("bad").to_string(), "Configuration error: bad");
        assert_eq!(
            CliError::ScenariosFailed { failed: 2, total: 7 }.to_string(),
            "2 of 7 scenario(s) failed"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::ScenariosFailed { failed: 1, total: 1 }.exit_code(), 1);
        assert_eq!(CliError::NothingToRun.exit_code(), 2);
        assert_eq!(CliError::Invalid { count: 3 }.exit_code(), 2);
    }

    #[test]
    fn test_from_library_error_is_transparent() {
        let err: CliError = liquiprobe::ProbeError::provider("chromium not found").into();
        assert_eq!(err.to_string(), "Provider error: chromium not found");
    }
}
