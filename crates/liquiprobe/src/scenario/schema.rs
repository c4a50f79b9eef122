//! Scenario YAML schema.
//!
//! ```yaml
//! name: sdo search with no match
//! tags: [sdo]
//! setup:
//!   - navigate: { url: /login }
//!   - authenticate: { credentials: admin }
//!   - navigate: { url: /sdo }
//! steps:
//!   - act: { query: { by: placeholder, text: Search }, action: fill, value: Apple }
//! assertions:
//!   - predicate:
//!       table_lacks_row: { column: 2, predicate: { equals: Apple } }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use std::path::Path;

use crate::action::ActionKind;
use crate::fixture::Credentials;
use crate::locator::ElementQuery;
use crate::result::{ProbeError, ProbeResult};
use crate::table;
use crate::wait::{UrlPattern, WaitSpec};

use super::predicate::StatePredicate;
use super::vars::references;

/// Default page limit when walking a paginated table
pub const DEFAULT_MAX_PAGES: usize = 100;

fn any_table() -> ElementQuery {
    table::any_table()
}

const fn default_max_pages() -> usize {
    DEFAULT_MAX_PAGES
}

const fn default_click() -> ActionKind {
    ActionKind::Click
}

// =============================================================================
// CONTEXT REFERENCES
// =============================================================================

/// Which page context a step runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContextRef {
    /// The context opened at scenario start
    #[default]
    Primary,
    /// The most recently acquired context
    Latest,
    /// The n-th secondary context, 1-based
    Secondary(usize),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawContextRef {
    Index(usize),
    Name(String),
}

impl Serialize for ContextRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Primary => RawContextRef::Name("primary".into()),
            Self::Latest => RawContextRef::Name("latest".into()),
            Self::Secondary(n) => RawContextRef::Index(*n),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContextRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawContextRef::deserialize(deserializer)? {
            RawContextRef::Index(0) => Err(serde::de::Error::custom("secondary contexts are numbered from 1")),
            RawContextRef::Index(n) => Ok(Self::Secondary(n)),
            RawContextRef::Name(name) => match name.as_str() {
                "primary" => Ok(Self::Primary),
                "latest" => Ok(Self::Latest),
                other => Err(serde::de::Error::custom(format!(
                    "unknown context {other:?}; expected primary, latest or an index"
                ))),
            },
        }
    }
}

impl fmt::Display for ContextRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => f.write_str("primary"),
            Self::Latest => f.write_str("latest"),
            Self::Secondary(n) => write!(f, "secondary-{n}"),
        }
    }
}

// =============================================================================
// STEPS
// =============================================================================

/// Credentials by fixture name or inline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CredentialRef {
    /// Fixture name
    Named(String),
    /// Literal identity
    Inline(Credentials),
}

/// A predicate with its wait and target context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expectation {
    /// What must hold
    pub predicate: StatePredicate,
    /// Override of the class default wait
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<WaitSpec>,
    /// Context to check
    #[serde(default)]
    pub context: ContextRef,
}

impl Expectation {
    /// Expectation on the primary context with the default wait
    #[must_use]
    pub fn new(predicate: StatePredicate) -> Self {
        Self {
            predicate,
            wait: None,
            context: ContextRef::Primary,
        }
    }

    /// Set the wait
    #[must_use]
    pub const fn with_wait(mut self, wait: WaitSpec) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Set the context
    #[must_use]
    pub const fn on(mut self, context: ContextRef) -> Self {
        self.context = context;
        self
    }
}

/// Where a captured value comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureSource {
    /// Text of one element (value for form controls)
    ElementText(ElementQuery),
    /// One cell of a data row
    TableCell {
        /// Table query
        #[serde(default = "any_table")]
        table: ElementQuery,
        /// 1-based data row
        row: usize,
        /// 1-based visual column
        column: usize,
    },
    /// Data-row count of the current page of a table
    RowCount {
        /// Table query
        #[serde(default = "any_table")]
        table: ElementQuery,
    },
    /// Data-row count summed over every page
    PagedRowCount {
        /// Table query
        #[serde(default = "any_table")]
        table: ElementQuery,
        /// The "next page" control
        next: ElementQuery,
        /// Page limit
        #[serde(default = "default_max_pages")]
        max_pages: usize,
    },
    /// Current URL
    Url,
}

/// One declared step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Navigate, then wait for the document to load
    Navigate {
        /// Absolute, or relative to `base_url`
        url: String,
        /// Target context
        #[serde(default)]
        context: ContextRef,
    },
    /// Log in through the configured login form
    Authenticate {
        /// Who
        credentials: CredentialRef,
    },
    /// One user-intent action
    Act {
        /// Target element
        query: ElementQuery,
        /// Action
        action: ActionKind,
        /// Value for fill, select and press
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        /// Bound on the provider call
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        /// Target context
        #[serde(default)]
        context: ContextRef,
    },
    /// Wait until a predicate holds
    AssertState(Expectation),
    /// End the scenario as skipped when `when` holds right now
    Skip {
        /// Recorded verbatim
        reason: String,
        /// Guard
        when: StatePredicate,
        /// Context to check
        #[serde(default)]
        context: ContextRef,
    },
    /// Act on an element that opens a new page, and acquire it
    OpenContext {
        /// Element that opens the page
        trigger: ElementQuery,
        /// Action on the trigger
        #[serde(default = "default_click")]
        action: ActionKind,
        /// Action value
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        /// The new page's URL must match
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<UrlPattern>,
        /// New-context deadline; navigation budget by default
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        /// Context the trigger lives on
        #[serde(default)]
        context: ContextRef,
    },
    /// Store a value for later `${name}` references
    Capture {
        /// Variable name
        name: String,
        /// Source
        source: CaptureSource,
        /// Context to read
        #[serde(default)]
        context: ContextRef,
    },
    /// Fixed pause. Prefer `assert_state`.
    Wait {
        /// Milliseconds
        ms: u64,
    },
    /// Replace `window.print` in every document of the session, open now or
    /// opened later, with a recorder checked by `print_requested`
    StubPrint,
}

impl fmt::Display for ScenarioStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Navigate { url, context } => write!(f, "navigate {context} to {url}"),
            Self::Authenticate { credentials } => match credentials {
                CredentialRef::Named(name) => write!(f, "authenticate as {name}"),
                CredentialRef::Inline(c) => write!(f, "authenticate as {}", c.email),
            },
            Self::Act {
                query, action, value, ..
            } => match value {
                Some(v) => write!(f, "{action} {query} with {v:?}"),
                None => write!(f, "{action} {query}"),
            },
            Self::AssertState(exp) => write!(f, "assert {} on {}", exp.predicate, exp.context),
            Self::Skip { reason, when, .. } => write!(f, "skip if {when} ({reason})"),
            Self::OpenContext { trigger, action, .. } => write!(f, "open new context by {action} {trigger}"),
            Self::Capture { name, .. } => write!(f, "capture ${{{name}}}"),
            Self::Wait { ms } => write!(f, "wait {ms}ms"),
            Self::StubPrint => write!(f, "stub window.print"),
        }
    }
}

// =============================================================================
// SCENARIO
// =============================================================================

/// One end-to-end test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name
    pub name: String,
    /// Free text
    #[serde(default)]
    pub description: String,
    /// Labels for filtering
    #[serde(default)]
    pub tags: Vec<String>,
    /// Fixed preconditions
    #[serde(default)]
    pub setup: Vec<ScenarioStep>,
    /// The scenario's own actions
    #[serde(default)]
    pub steps: Vec<ScenarioStep>,
    /// Final checks
    #[serde(default)]
    pub assertions: Vec<Expectation>,
    /// Best-effort steps after acting starts
    #[serde(default)]
    pub cleanup: Vec<ScenarioStep>,
}

/// A static problem found by [`Scenario::lint`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Scenario name
    pub scenario: String,
    /// Where, e.g. `steps[2]`
    pub location: String,
    /// What is wrong
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.scenario, self.location, self.message)
    }
}

impl Scenario {
    /// Empty scenario
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            setup: Vec::new(),
            steps: Vec::new(),
            assertions: Vec::new(),
            cleanup: Vec::new(),
        }
    }

    /// Add a setup step
    #[must_use]
    pub fn setup(mut self, step: ScenarioStep) -> Self {
        self.setup.push(step);
        self
    }

    /// Add an acting step
    #[must_use]
    pub fn step(mut self, step: ScenarioStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Add a final assertion
    #[must_use]
    pub fn assert(mut self, expectation: Expectation) -> Self {
        self.assertions.push(expectation);
        self
    }

    /// Add a cleanup step
    #[must_use]
    pub fn cleanup(mut self, step: ScenarioStep) -> Self {
        self.cleanup.push(step);
        self
    }

    /// Add a tag
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Parse one scenario
    pub fn from_yaml(yaml: &str) -> ProbeResult<Self> {
        let scenario: Self = crate::yaml::from_str(yaml)?;
        scenario.check_name()?;
        Ok(scenario)
    }

    /// Parse every `---`-separated scenario in `yaml`
    pub fn all_from_yaml(yaml: &str) -> ProbeResult<Vec<Self>> {
        let scenarios: Vec<Self> = crate::yaml::documents(yaml)?;
        for scenario in &scenarios {
            scenario.check_name()?;
        }
        Ok(scenarios)
    }

    /// Read every scenario in a file
    pub fn load_file(path: impl AsRef<Path>) -> ProbeResult<Vec<Self>> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ProbeError::Scenario {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::all_from_yaml(&text).map_err(|e| ProbeError::Scenario {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Has `tag`?
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn check_name(&self) -> ProbeResult<()> {
        if self.name.trim().is_empty() {
            return Err(ProbeError::Scenario {
                message: "scenario name must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Static checks: values present where needed, variables defined before
    /// use, regexes compile, skips only where they can end the run.
    /// `known` holds fixture value names.
    #[must_use]
    pub fn lint(&self, known: &BTreeSet<String>) -> Vec<ValidationIssue> {
        let mut lint = Lint {
            scenario: &self.name,
            defined: known.clone(),
            print_stubbed: false,
            issues: Vec::new(),
        };
        if self.name.trim().is_empty() {
            lint.issue("name", "scenario name must not be empty");
        }
        for (section, steps) in [("setup", &self.setup), ("steps", &self.steps)] {
            for (i, step) in steps.iter().enumerate() {
                lint.step(&format!("{section}[{i}]"), step);
            }
        }
        for (i, exp) in self.assertions.iter().enumerate() {
            lint.predicate(&format!("assertions[{i}]"), &exp.predicate);
        }
        for (i, step) in self.cleanup.iter().enumerate() {
            let at = format!("cleanup[{i}]");
            if matches!(step, ScenarioStep::Skip { .. }) {
                lint.issue(&at, "skip has no effect during cleanup");
            }
            lint.step(&at, step);
        }
        lint.issues
    }
}

struct Lint<'a> {
    scenario: &'a str,
    defined: BTreeSet<String>,
    print_stubbed: bool,
    issues: Vec<ValidationIssue>,
}

impl Lint<'_> {
    fn issue(&mut self, location: &str, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            scenario: self.scenario.to_string(),
            location: location.to_string(),
            message: message.into(),
        });
    }

    fn text(&mut self, at: &str, text: &str) {
        for name in references(text) {
            if !self.defined.contains(&name) {
                self.issue(at, format!("${{{name}}} is used before it is defined"));
            }
        }
    }

    fn query(&mut self, at: &str, query: &ElementQuery) {
        let mut seen = Vec::new();
        let _ = query.try_map_text(|s| {
            seen.push(s.to_string());
            Ok::<_, Infallible>(s.to_string())
        });
        for s in seen {
            self.text(at, &s);
        }
    }

    fn needs_value(&mut self, at: &str, action: ActionKind, value: Option<&String>) {
        match value {
            None if action.needs_value() => self.issue(at, format!("{action} needs a value")),
            Some(v) => self.text(at, v),
            None => {}
        }
    }

    fn predicate(&mut self, at: &str, predicate: &StatePredicate) {
        if let Err(err) = predicate.validate() {
            self.issue(at, err.to_string());
        }
        let mut seen = Vec::new();
        let _ = predicate.try_map_text(&mut |s: &str| {
            seen.push(s.to_string());
            Ok::<_, Infallible>(s.to_string())
        });
        for s in seen {
            self.text(at, &s);
        }
        self.var_refs(at, predicate);
    }

    fn var_refs(&mut self, at: &str, predicate: &StatePredicate) {
        match predicate {
            StatePredicate::TextEqualsVar { var, .. } if !self.defined.contains(var.trim()) => {
                let message = format!("variable {var:?} is used before it is defined");
                self.issue(at, message);
            }
            StatePredicate::PrintRequested if !self.print_stubbed => {
                self.issue(at, "print_requested needs an earlier stub_print step");
            }
            StatePredicate::Not(inner) => self.var_refs(at, inner),
            _ => {}
        }
    }

    fn step(&mut self, at: &str, step: &ScenarioStep) {
        match step {
            ScenarioStep::Navigate { url, .. } => self.text(at, url),
            ScenarioStep::Authenticate { credentials } => match credentials {
                CredentialRef::Named(name) => self.text(at, name),
                CredentialRef::Inline(c) => {
                    self.text(at, &c.email);
                    self.text(at, &c.password);
                }
            },
            ScenarioStep::Act {
                query, action, value, ..
            } => {
                self.query(at, query);
                self.needs_value(at, *action, value.as_ref());
            }
            ScenarioStep::AssertState(exp) => self.predicate(at, &exp.predicate),
            ScenarioStep::Skip { reason, when, .. } => {
                if reason.trim().is_empty() {
                    self.issue(at, "skip reason must not be empty");
                }
                self.predicate(at, when);
            }
            ScenarioStep::OpenContext {
                trigger,
                action,
                value,
                url,
                ..
            } => {
                self.query(at, trigger);
                self.needs_value(at, *action, value.as_ref());
                if let Some(Err(err)) = url.as_ref().map(UrlPattern::validate) {
                    self.issue(at, err.to_string());
                }
            }
            ScenarioStep::Capture { name, source, .. } => {
                match source {
                    CaptureSource::ElementText(q) => self.query(at, q),
                    CaptureSource::TableCell { row, column, table } => {
                        if *row == 0 || *column == 0 {
                            self.issue(at, "table rows and columns are 1-based");
                        }
                        self.query(at, table);
                    }
                    CaptureSource::RowCount { table } => self.query(at, table),
                    CaptureSource::PagedRowCount { table, next, max_pages } => {
                        if *max_pages == 0 {
                            self.issue(at, "max_pages must be at least 1");
                        }
                        self.query(at, table);
                        self.query(at, next);
                    }
                    CaptureSource::Url => {}
                }
                self.defined.insert(name.clone());
            }
            ScenarioStep::Wait { .. } => {}
            ScenarioStep::StubPrint => self.print_stubbed = true,
        }
    }
}
