//! Liquiprobe: browser end-to-end scenario orchestration and table assertions.
//!
//! Scenarios describe what a user does and what must then be true. The engine
//! finds elements by role, label, placeholder or text, waits for conditions
//! instead of sleeping, follows pages that open in new tabs, and checks data
//! tables (sorting, filtering, placeholders, pagination) with typed
//! comparators.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │  SuiteRunner ──▶ ScenarioRunner ──▶ ContextCoordinator             │
//! │                        │                 │ primary · secondaries   │
//! │        ┌───────────────┼──────────────┐  ▼                         │
//! │        ▼               ▼              ▼  PageContext               │
//! │  ActionExecutor   StatePredicate   table::extract                  │
//! │        │          (via Poller)        │                            │
//! │        └────────────▶ Resolver ◀──────┘                            │
//! │                          │                                         │
//! │                     PageDriver  (mock · chromium)                  │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use liquiprobe::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo(session: Arc<dyn BrowserSession>) -> ProbeResult<()> {
//! let scenario = Scenario::from_yaml(r#"
//! name: login lands on dashboard
//! setup:
//!   - navigate: { url: /login }
//! steps:
//!   - authenticate: { credentials: admin }
//! assertions:
//!   - predicate: { url_contains: /dashboard }
//! "#)?;
//! let runner = ScenarioRunner::new(RunnerConfig::new().with_base_url("http://localhost:8000"));
//! let report = runner.run(&scenario, session).await;
//! assert!(report.result.is_passed());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_frames))]

pub mod action;
#[cfg(feature = "browser")]
pub mod chromium;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod dom;
pub mod driver;
pub mod fixture;
pub mod locator;
pub mod mock;
mod result;
pub mod scenario;
pub mod suite;
pub mod table;
pub mod wait;
pub mod yaml;

pub use action::{ActionExecutor, ActionKind};
pub use config::{BrowserOptions, LoginForm, RunnerConfig};
pub use context::{ContextCoordinator, ContextRole, PageContext};
pub use diagnostics::{DiagnosticTrail, TrailCategory, TrailEntry};
pub use dom::{Document, Node, ReadyState};
pub use driver::{BrowserSession, NavigationResponse, PageDriver, PageOpened, SessionFactory};
pub use fixture::{ConfigFixtures, Credentials, FixtureConfig, FixtureProvider, Fixtures};
pub use locator::{ElementHandle, ElementQuery, ResolvedElement, Resolver, StructuralDebt};
pub use result::{ProbeError, ProbeResult};
pub use scenario::{
    FailureCause, Scenario, ScenarioReport, ScenarioResult, ScenarioRunner, ScenarioStep, StatePredicate,
};
pub use suite::{ScenarioFilter, SuiteReport, SuiteRunner};
pub use table::{CellPredicate, Comparator, SortOrder, TableSnapshot};
pub use wait::{Condition, Poller, TimeoutPolicy, UrlPattern, WaitClass, WaitSpec};

#[cfg(feature = "browser")]
pub use chromium::{ChromiumSession, ChromiumSessionFactory};

/// Everything a scenario author usually needs
pub mod prelude {
    pub use super::action::{ActionExecutor, ActionKind};
    pub use super::config::{BrowserOptions, LoginForm, RunnerConfig};
    pub use super::context::{ContextCoordinator, PageContext};
    pub use super::driver::{BrowserSession, PageDriver, SessionFactory};
    pub use super::fixture::{Credentials, FixtureProvider, Fixtures};
    pub use super::locator::ElementQuery;
    pub use super::result::{ProbeError, ProbeResult};
    pub use super::scenario::{
        CaptureSource, ContextRef, CountCheck, CredentialRef, Expectation, FailureCause, Scenario,
        ScenarioReport, ScenarioResult, ScenarioRunner, ScenarioStep, StatePredicate,
    };
    pub use super::suite::{ScenarioFilter, SuiteReport, SuiteRunner};
    pub use super::table::{CellPredicate, Comparator, SortOrder, TableSnapshot};
    pub use super::wait::{TimeoutPolicy, UrlPattern, WaitSpec};

    #[cfg(feature = "browser")]
    pub use super::chromium::ChromiumSessionFactory;
}
