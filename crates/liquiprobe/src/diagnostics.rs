//! Diagnostic trail for failure triage.
//!
//! Every scenario run gets a `run_id` and an ordered log of what the runner
//! did: phases, navigations, actions, waits, assertions. The last table that
//! was extracted and the structural-path debt are kept alongside, so a failed
//! report shows the data the failing oracle saw.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Instant;
use uuid::Uuid;

use crate::locator::StructuralDebt;
use crate::result::ProbeResult;
use crate::table::TableSnapshot;

/// Upper bound on stored entries
pub const DEFAULT_MAX_ENTRIES: usize = 2_000;

/// What kind of step an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailCategory {
    /// Scenario phase transition
    Phase,
    /// Page navigation
    Navigation,
    /// User-intent action
    Action,
    /// Condition wait
    Wait,
    /// Assertion or oracle
    Assertion,
    /// Variable capture
    Capture,
    /// Context acquired or released
    Context,
    /// Skip guard
    Skip,
    /// Cleanup step
    Cleanup,
}

impl TrailCategory {
    /// Lowercase name, as serialized
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Phase => "phase",
            Self::Navigation => "navigation",
            Self::Action => "action",
            Self::Wait => "wait",
            Self::Assertion => "assertion",
            Self::Capture => "capture",
            Self::Context => "context",
            Self::Skip => "skip",
            Self::Cleanup => "cleanup",
        }
    }
}

/// One recorded step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailEntry {
    /// Milliseconds since the run started
    pub at_ms: u64,
    /// Category
    pub category: TrailCategory,
    /// Context the step ran on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// What happened
    pub message: String,
    /// Step succeeded
    pub ok: bool,
}

impl fmt::Display for TrailEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.ok { ' ' } else { '!' };
        write!(f, "{mark}{:>6}ms {:<10}", self.at_ms, self.category.as_str())?;
        if let Some(context) = &self.context {
            write!(f, " [{context}]")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Ordered record of one scenario run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticTrail {
    /// Unique run id
    pub run_id: Uuid,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Recorded steps
    pub entries: Vec<TrailEntry>,
    /// Entries dropped after the limit was hit
    #[serde(default)]
    pub dropped: usize,
    /// Last table read by an oracle or capture
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_table: Option<TableSnapshot>,
    /// Structural paths used during the run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub structural_debt: Vec<StructuralDebt>,
    #[serde(skip, default = "Instant::now")]
    clock: Instant,
    #[serde(skip, default = "default_max_entries")]
    max_entries: usize,
}

const fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

impl Default for DiagnosticTrail {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticTrail {
    /// Start a trail with a fresh run id
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            entries: Vec::new(),
            dropped: 0,
            last_table: None,
            structural_debt: Vec::new(),
            clock: Instant::now(),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }

    /// Cap stored entries
    #[must_use]
    pub const fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Record a step
    pub fn record(&mut self, category: TrailCategory, context: Option<&str>, message: impl Into<String>, ok: bool) {
        if self.entries.len() >= self.max_entries {
            self.dropped += 1;
            return;
        }
        self.entries.push(TrailEntry {
            at_ms: self.clock.elapsed().as_millis() as u64,
            category,
            context: context.map(str::to_string),
            message: message.into(),
            ok,
        });
    }

    /// Remember the latest table read
    pub fn set_last_table(&mut self, table: TableSnapshot) {
        self.last_table = Some(table);
    }

    /// Entries of one category
    pub fn entries_of(&self, category: TrailCategory) -> impl Iterator<Item = &TrailEntry> {
        self.entries.iter().filter(move |e| e.category == category)
    }

    /// Last failed entry, if any
    #[must_use]
    pub fn last_failure(&self) -> Option<&TrailEntry> {
        self.entries.iter().rev().find(|e| !e.ok)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save_json(&self, path: &Path) -> ProbeResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}
