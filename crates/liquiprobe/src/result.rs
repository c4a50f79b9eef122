//! Result and error types for Liquiprobe.

use thiserror::Error;

/// Result type for Liquiprobe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Errors that can occur while driving a scenario.
///
/// Every variant is local to one scenario; the runner turns them into a
/// `Failed` result and never aborts sibling scenarios.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// A query that must resolve to exactly one element did not
    #[error("Expected exactly one element for {query}, found {count}")]
    AmbiguousOrMissingElement {
        /// Query description
        query: String,
        /// Number of matches
        count: usize,
    },

    /// Element found but cannot be interacted with
    #[error("Element {query} is not actionable: {reason}")]
    NotActionable {
        /// Query description
        query: String,
        /// Why the element was rejected
        reason: String,
    },

    /// Handle used after the document it came from was replaced
    #[error("Element handle for {query} is stale (document navigated)")]
    StaleElement {
        /// Query description
        query: String,
    },

    /// No table resolved for the table query
    #[error("No table matches {query}")]
    NoMatchingTable {
        /// Query description
        query: String,
    },

    /// More than one table resolved for the table query
    #[error("Table query {query} is ambiguous: {count} tables match")]
    AmbiguousTable {
        /// Query description
        query: String,
        /// Number of matching tables
        count: usize,
    },

    /// A data row does not span the header width
    #[error("Malformed table: row {row} spans {found} columns, header has {expected}")]
    MalformedTable {
        /// 1-based row index
        row: usize,
        /// Header width
        expected: usize,
        /// Columns spanned by the row
        found: usize,
    },

    /// Column index outside the table
    #[error("Column {column} is out of range for a table of width {width}")]
    ColumnOutOfRange {
        /// 1-based column requested
        column: usize,
        /// Header width
        width: usize,
    },

    /// A bounded wait exceeded its deadline
    #[error("Timed out after {elapsed_ms}ms waiting for {waited_for}{}", last_observation.as_ref().map(|o| format!(" (last observed: {o})")).unwrap_or_default())]
    Timeout {
        /// Description of the awaited condition
        waited_for: String,
        /// Elapsed time in milliseconds
        elapsed_ms: u64,
        /// Last evaluation error or observed state, if any
        last_observation: Option<String>,
    },

    /// Oracle predicate was false
    #[error("Assertion failed: expected {expected}, observed {observed}")]
    AssertionFailed {
        /// What was expected
        expected: String,
        /// What was observed
        observed: String,
    },

    /// A fixed precondition could not be established
    #[error("Setup failed: {message}")]
    SetupFailed {
        /// Error message
        message: String,
    },

    /// Structural path could not be parsed
    #[error("Invalid structural path {path:?}: {message}")]
    InvalidPath {
        /// The offending path
        path: String,
        /// Parse error
        message: String,
    },

    /// `${name}` referenced before it was captured or provisioned
    #[error("Unknown variable: {name}")]
    UnknownVariable {
        /// Variable name
        name: String,
    },

    /// Credential or value fixture missing from the provisioned set
    #[error("Unknown fixture: {name}")]
    UnknownFixture {
        /// Fixture name
        name: String,
    },

    /// Step referenced a context the coordinator does not hold
    #[error("No such page context: {context}")]
    NoSuchContext {
        /// Context reference
        context: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Browser-automation provider error
    #[error("Provider error: {message}")]
    Provider {
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Invalid scenario definition
    #[error("Scenario error: {message}")]
    Scenario {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),
}

impl ProbeError {
    /// Shorthand for a provider-side failure
    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Whether this error came from an elapsed deadline
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether re-evaluating against a later page state cannot clear this
    /// error: a malformed query, pattern or reference rather than a page that
    /// has not caught up yet
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::ColumnOutOfRange { .. }
                | Self::InvalidPath { .. }
                | Self::UnknownVariable { .. }
                | Self::UnknownFixture { .. }
                | Self::NoSuchContext { .. }
                | Self::Config { .. }
                | Self::Scenario { .. }
        )
    }

    /// Whether this error is a locator contract violation
    #[must_use]
    pub const fn is_locator_violation(&self) -> bool {
        matches!(
            self,
            Self::AmbiguousOrMissingElement { .. }
                | Self::NoMatchingTable { .. }
                | Self::AmbiguousTable { .. }
        )
    }
}
