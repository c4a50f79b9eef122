//! Declarative scenarios: setup, steps, assertions, cleanup.
//!
//! Scenarios are YAML documents (several per file, `---` separated) or built
//! in Rust with the same types.
//!
//! # Example
//!
//! ```yaml
//! name: login lands on dashboard
//! tags: [smoke]
//! setup:
//!   - navigate: { url: /login }
//! steps:
//!   - authenticate: { credentials: admin }
//! assertions:
//!   - predicate: { url_contains: /dashboard }
//!   - predicate:
//!       visible: { by: role, role: heading, name: Dashboard }
//! ```

pub mod predicate;
pub mod runner;
pub mod schema;
pub mod vars;

pub use predicate::{CountCheck, StatePredicate};
pub use runner::{FailureCause, Phase, ScenarioReport, ScenarioResult, ScenarioRunner};
pub use schema::{
    CaptureSource, ContextRef, CredentialRef, Expectation, Scenario, ScenarioStep, ValidationIssue,
    DEFAULT_MAX_PAGES,
};
pub use vars::{references, Variables};
