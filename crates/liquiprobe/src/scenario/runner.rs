//! Scenario execution.
//!
//! ```text
//!   Setup ──▶ Acting ──▶ Asserting ──▶ Passed
//!     │          │           │
//!     │          │           └──────▶ Failed(AssertionFailed)
//!     │          └──────────────────▶ Failed(ActionFailed)
//!     └─────────────────────────────▶ Failed(SetupFailed)
//!   Setup/Acting ── skip guard holds ─▶ Skipped(reason)
//! ```
//!
//! Cleanup runs best-effort once Acting has started, whatever the outcome.
//! Secondary contexts are released at the end of every run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::action::{ActionExecutor, ActionKind};
use crate::config::RunnerConfig;
use crate::context::{ContextCoordinator, PageContext};
use crate::diagnostics::{DiagnosticTrail, TrailCategory};
use crate::dom::Document;
use crate::driver::{BrowserSession, PRINT_STUB_SCRIPT};
use crate::fixture::{ConfigFixtures, Credentials, FixtureProvider};
use crate::locator::{ElementQuery, Resolver};
use crate::result::{ProbeError, ProbeResult};
use crate::table;
use crate::wait::{FnCondition, Poller, UrlPattern, WaitClass, WaitSpec};

use super::predicate::StatePredicate;
use super::schema::{CaptureSource, ContextRef, CredentialRef, Expectation, Scenario, ScenarioStep};
use super::vars::Variables;

// =============================================================================
// RESULTS
// =============================================================================

/// Runner state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Fixed preconditions
    Setup,
    /// The scenario's own steps
    Acting,
    /// Final checks
    Asserting,
    /// Best-effort teardown
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Setup => "setup",
            Self::Acting => "acting",
            Self::Asserting => "asserting",
            Self::Cleanup => "cleanup",
        })
    }
}

/// Why a scenario failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// A fixed precondition could not be established
    SetupFailed,
    /// A step of the scenario failed
    ActionFailed,
    /// A final check did not hold
    AssertionFailed,
}

impl FailureCause {
    const fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Setup => Self::SetupFailed,
            Phase::Acting | Phase::Cleanup => Self::ActionFailed,
            Phase::Asserting => Self::AssertionFailed,
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SetupFailed => "setup_failed",
            Self::ActionFailed => "action_failed",
            Self::AssertionFailed => "assertion_failed",
        })
    }
}

/// Terminal outcome of one scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScenarioResult {
    /// Every check held
    Passed,
    /// Something went wrong
    Failed {
        /// Classification
        cause: FailureCause,
        /// Error message
        message: String,
        /// What the failing check last saw
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_observed: Option<String>,
    },
    /// A precondition for a meaningful run was absent
    Skipped {
        /// Skip reason, verbatim
        reason: String,
    },
}

impl ScenarioResult {
    /// Passed?
    #[must_use]
    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }

    /// Failed?
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Skipped?
    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// Failure cause, if failed
    #[must_use]
    pub const fn cause(&self) -> Option<FailureCause> {
        match self {
            Self::Failed { cause, .. } => Some(*cause),
            _ => None,
        }
    }

    fn from_error(phase: Phase, err: &ProbeError) -> Self {
        let last_observed = match err {
            ProbeError::Timeout { last_observation, .. } => last_observation.clone(),
            ProbeError::AssertionFailed { observed, .. } => Some(observed.clone()),
            _ => None,
        };
        Self::Failed {
            cause: FailureCause::for_phase(phase),
            message: err.to_string(),
            last_observed,
        }
    }
}

impl fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed => f.write_str("passed"),
            Self::Failed { cause, message, .. } => write!(f, "failed ({cause}): {message}"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

/// Everything known about one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scenario name
    pub name: String,
    /// Scenario tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Unique run id
    pub run_id: Uuid,
    /// Outcome
    pub result: ScenarioResult,
    /// Wall time in milliseconds
    pub duration_ms: u64,
    /// Diagnostic trail
    pub trail: DiagnosticTrail,
}

// =============================================================================
// RUNNER
// =============================================================================

/// Runs scenarios against browser sessions
#[derive(Clone)]
pub struct ScenarioRunner {
    config: Arc<RunnerConfig>,
    fixtures: Arc<dyn FixtureProvider>,
}

impl fmt::Debug for ScenarioRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioRunner")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

enum Flow {
    Continue,
    Skip(String),
}

impl ScenarioRunner {
    /// Runner with fixtures from the configuration
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        let fixtures = Arc::new(ConfigFixtures::new(config.fixtures.clone()));
        Self {
            config: Arc::new(config),
            fixtures,
        }
    }

    /// Replace the fixture provider
    #[must_use]
    pub fn with_fixture_provider(mut self, provider: Arc<dyn FixtureProvider>) -> Self {
        self.fixtures = provider;
        self
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one scenario to a terminal result on `session`
    pub async fn run(&self, scenario: &Scenario, session: Arc<dyn BrowserSession>) -> ScenarioReport {
        let trail = DiagnosticTrail::new();
        let span = tracing::info_span!("scenario", name = %scenario.name, run_id = %trail.run_id);
        self.run_traced(scenario, session, trail).instrument(span).await
    }

    async fn run_traced(
        &self,
        scenario: &Scenario,
        session: Arc<dyn BrowserSession>,
        mut trail: DiagnosticTrail,
    ) -> ScenarioReport {
        let started = Instant::now();
        let resolver = Arc::new(Resolver::new());
        trail.record(TrailCategory::Phase, None, Phase::Setup.to_string(), true);
        tracing::info!(phase = %Phase::Setup, "scenario started");

        let result = match self.prepare(scenario, session, Arc::clone(&resolver)).await {
            Ok((coordinator, vars)) => {
                let mut run = Execution {
                    config: &self.config,
                    coordinator,
                    vars,
                    trail,
                };
                let result = run.drive(scenario).await;
                let released = run.coordinator.release_all().await;
                if released > 0 {
                    run.trail
                        .record(TrailCategory::Context, None, format!("released {released} secondary contexts"), true);
                }
                trail = run.trail;
                result
            }
            Err(err) => {
                let err = ProbeError::SetupFailed { message: err.to_string() };
                trail.record(TrailCategory::Phase, None, err.to_string(), false);
                ScenarioResult::from_error(Phase::Setup, &err)
            }
        };

        trail.structural_debt = resolver.structural_debt();
        match &result {
            ScenarioResult::Passed => tracing::info!("scenario passed"),
            ScenarioResult::Failed { cause, message, .. } => tracing::info!(?cause, %message, "scenario failed"),
            ScenarioResult::Skipped { reason } => tracing::warn!(%reason, "scenario skipped"),
        }
        ScenarioReport {
            name: scenario.name.clone(),
            tags: scenario.tags.clone(),
            run_id: trail.run_id,
            result,
            duration_ms: started.elapsed().as_millis() as u64,
            trail,
        }
    }

    async fn prepare(
        &self,
        scenario: &Scenario,
        session: Arc<dyn BrowserSession>,
        resolver: Arc<Resolver>,
    ) -> ProbeResult<(ContextCoordinator, Variables)> {
        let fixtures = self.fixtures.provision(&scenario.name)?;
        let coordinator = ContextCoordinator::open(session, resolver).await?;
        Ok((coordinator, Variables::new(fixtures)))
    }
}

/// State of one run in progress
struct Execution<'a> {
    config: &'a RunnerConfig,
    coordinator: ContextCoordinator,
    vars: Variables,
    trail: DiagnosticTrail,
}

impl Execution<'_> {
    async fn drive(&mut self, scenario: &Scenario) -> ScenarioResult {
        if let Some(result) = self.run_steps(&scenario.setup, Phase::Setup).await {
            return result;
        }

        self.enter(Phase::Acting);
        let result = match self.run_steps(&scenario.steps, Phase::Acting).await {
            Some(result) => result,
            None => {
                self.enter(Phase::Asserting);
                self.run_assertions(&scenario.assertions).await
            }
        };

        if !scenario.cleanup.is_empty() {
            self.enter(Phase::Cleanup);
            for step in &scenario.cleanup {
                match self.step(step).await {
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(step = %step, error = %err, "cleanup step failed");
                        self.trail
                            .record(TrailCategory::Cleanup, None, format!("{step}: {err}"), false);
                    }
                }
            }
        }
        result
    }

    fn enter(&mut self, phase: Phase) {
        tracing::info!(%phase, "entering phase");
        self.trail.record(TrailCategory::Phase, None, phase.to_string(), true);
    }

    async fn run_steps(&mut self, steps: &[ScenarioStep], phase: Phase) -> Option<ScenarioResult> {
        for step in steps {
            match self.step(step).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Skip(reason)) => return Some(ScenarioResult::Skipped { reason }),
                Err(err) => {
                    tracing::debug!(%phase, step = %step, error = %err, "step failed");
                    return Some(ScenarioResult::from_error(phase, &err));
                }
            }
        }
        None
    }

    async fn run_assertions(&mut self, assertions: &[Expectation]) -> ScenarioResult {
        for expectation in assertions {
            if let Err(err) = self.expect(expectation).await {
                return ScenarioResult::from_error(Phase::Asserting, &err);
            }
        }
        ScenarioResult::Passed
    }

    fn context(&self, context: ContextRef) -> ProbeResult<Arc<PageContext>> {
        match context {
            ContextRef::Primary => Ok(self.coordinator.primary()),
            ContextRef::Latest => Ok(self.coordinator.latest()),
            ContextRef::Secondary(n) => self.coordinator.secondary(n).ok_or_else(|| ProbeError::NoSuchContext {
                context: context.to_string(),
            }),
        }
    }

    fn spec(&self, class: WaitClass) -> WaitSpec {
        self.config.timeouts.spec_for(class)
    }

    fn query(&self, query: &ElementQuery) -> ProbeResult<ElementQuery> {
        query.try_map_text(|s| self.vars.interpolate(s))
    }

    fn value(&self, value: Option<&String>) -> ProbeResult<Option<String>> {
        value.map(|v| self.vars.interpolate(v)).transpose()
    }

    async fn step(&mut self, step: &ScenarioStep) -> ProbeResult<Flow> {
        match step {
            ScenarioStep::Navigate { url, context } => {
                let url = self.config.url(&self.vars.interpolate(url)?);
                let page = self.context(*context)?;
                self.navigate(&page, &url).await?;
            }
            ScenarioStep::Authenticate { credentials } => {
                let credentials = match credentials {
                    CredentialRef::Named(name) => self.vars.fixtures().credentials(&self.vars.interpolate(name)?)?.clone(),
                    CredentialRef::Inline(c) => {
                        Credentials::new(self.vars.interpolate(&c.email)?, self.vars.interpolate(&c.password)?)
                    }
                };
                self.authenticate(&credentials).await?;
            }
            ScenarioStep::Act {
                query,
                action,
                value,
                timeout_ms,
                context,
            } => {
                let query = self.query(query)?;
                let value = self.value(value.as_ref())?;
                let page = self.context(*context)?;
                self.act(&page, &query, *action, value.as_deref(), *timeout_ms).await?;
            }
            ScenarioStep::AssertState(expectation) => self.expect(expectation).await?,
            ScenarioStep::Skip { reason, when, context } => {
                let predicate = when.bind(&self.vars)?;
                let page = self.context(*context)?;
                let probe = Poller::check_now(&page, &predicate).await?;
                self.trail.record(
                    TrailCategory::Skip,
                    Some(page.id()),
                    format!("{predicate}: {}", probe.observed),
                    true,
                );
                if probe.satisfied {
                    return Ok(Flow::Skip(reason.clone()));
                }
            }
            ScenarioStep::OpenContext {
                trigger,
                action,
                value,
                url,
                timeout_ms,
                context,
            } => {
                let trigger = self.query(trigger)?;
                let value = self.value(value.as_ref())?;
                let url = url
                    .as_ref()
                    .map(|p| p.try_map_text(|s| self.vars.interpolate(s)))
                    .transpose()?;
                let page = self.context(*context)?;
                let timeout = Duration::from_millis(timeout_ms.unwrap_or(self.config.timeouts.navigation_ms));
                self.open_context(&page, &trigger, *action, value.as_deref(), url.as_ref(), timeout)
                    .await?;
            }
            ScenarioStep::Capture { name, source, context } => {
                let page = self.context(*context)?;
                let value = self.capture(&page, source).await?;
                tracing::debug!(variable = %name, %value, "captured");
                self.trail
                    .record(TrailCategory::Capture, Some(page.id()), format!("${{{name}}} = {value:?}"), true);
                self.vars.set(name.clone(), value);
            }
            ScenarioStep::Wait { ms } => {
                self.trail.record(TrailCategory::Wait, None, format!("fixed pause {ms}ms"), true);
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            ScenarioStep::StubPrint => {
                let installed = self.coordinator.add_init_script(PRINT_STUB_SCRIPT).await;
                let message = match &installed {
                    Ok(()) => "window.print stubbed for every context".to_string(),
                    Err(err) => format!("stubbing window.print: {err}"),
                };
                self.trail.record(TrailCategory::Context, None, message, installed.is_ok());
                installed?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn navigate(&mut self, page: &PageContext, url: &str) -> ProbeResult<()> {
        let response = page.navigate(url).await;
        let ok = response.is_ok();
        let message = match &response {
            Ok(r) => format!("{url} -> {}", r.status.map_or_else(|| "no status".to_string(), |s| s.to_string())),
            Err(err) => format!("{url}: {err}"),
        };
        self.trail.record(TrailCategory::Navigation, Some(page.id()), message, ok);
        response?;
        ContextCoordinator::wait_until_loaded(page, self.spec(WaitClass::Navigation)).await?;
        Ok(())
    }

    async fn authenticate(&mut self, credentials: &Credentials) -> ProbeResult<()> {
        let login = &self.config.login;
        let page = self.coordinator.primary();
        tracing::info!(email = %credentials.email, "authenticating");
        self.act(&page, &ElementQuery::label(&login.email_label), ActionKind::Fill, Some(&credentials.email), None)
            .await?;
        self.act(
            &page,
            &ElementQuery::label(&login.password_label),
            ActionKind::Fill,
            Some(&credentials.password),
            None,
        )
        .await?;
        let submit = login.submit.clone();
        self.act(&page, &submit, ActionKind::Click, None, None).await?;
        let landing = UrlPattern::Contains(self.config.login.landing_url_contains.clone());
        let outcome = ContextCoordinator::wait_for_url(&page, &landing, self.spec(WaitClass::Navigation)).await;
        self.trail.record(
            TrailCategory::Navigation,
            Some(page.id()),
            format!("logged in as {}: {landing}", credentials.email),
            outcome.is_ok(),
        );
        outcome.map(|_| ())
    }

    /// Wait briefly for the target to become actionable, then act. A target
    /// that never settles still goes to the executor, which reports the
    /// precise locator or actionability error.
    async fn act(
        &mut self,
        page: &PageContext,
        query: &ElementQuery,
        kind: ActionKind,
        value: Option<&str>,
        timeout_ms: Option<u64>,
    ) -> ProbeResult<()> {
        let resolver = page.resolver();
        let actionable = FnCondition::new(
            |doc: &Document| {
                resolver
                    .resolve(doc, query)
                    .is_ok_and(|found| matches!(found.as_slice(), [e] if e.visible && !e.disabled))
            },
            format!("{query} to be actionable"),
        );
        if let Err(err) = Poller::wait_for(page, &actionable, self.spec(WaitClass::Fast)).await {
            tracing::debug!(%query, error = %err, "target did not settle before acting");
        }

        let outcome = match timeout_ms {
            Some(ms) => ActionExecutor::perform_within(page, query, kind, value, Duration::from_millis(ms)).await,
            None => ActionExecutor::perform(page, query, kind, value).await,
        };
        let message = match (&outcome, value) {
            (Ok(()), Some(v)) if kind != ActionKind::Fill || !is_secret(query, self.config) => {
                format!("{kind} {query} {v:?}")
            }
            (Ok(()), _) => format!("{kind} {query}"),
            (Err(err), _) => format!("{kind} {query}: {err}"),
        };
        self.trail.record(TrailCategory::Action, Some(page.id()), message, outcome.is_ok());
        outcome
    }

    async fn expect(&mut self, expectation: &Expectation) -> ProbeResult<()> {
        let predicate: StatePredicate = expectation.predicate.bind(&self.vars)?;
        let page = self.context(expectation.context)?;
        let spec = expectation.wait.unwrap_or_else(|| self.spec(predicate.wait_class()));
        let outcome = Poller::wait_for(&page, &predicate, spec).await;

        if let Some(table_query) = predicate.table_query() {
            if let Ok(snapshot) = table::extract(&page, table_query).await {
                self.trail.set_last_table(snapshot);
            }
        }
        let message = match &outcome {
            Ok(ready) => format!("{predicate} (after {} attempts)", ready.attempts),
            Err(err) => err.to_string(),
        };
        self.trail.record(TrailCategory::Assertion, Some(page.id()), message, outcome.is_ok());
        outcome.map(|_| ())
    }

    async fn open_context(
        &mut self,
        page: &PageContext,
        trigger: &ElementQuery,
        kind: ActionKind,
        value: Option<&str>,
        url: Option<&UrlPattern>,
        timeout: Duration,
    ) -> ProbeResult<()> {
        let opened = self
            .coordinator
            .expect_new_context(|| ActionExecutor::perform(page, trigger, kind, value), timeout)
            .await;
        let new_page = match opened {
            Ok(new_page) => new_page,
            Err(err) => {
                self.trail
                    .record(TrailCategory::Context, Some(page.id()), format!("{kind} {trigger}: {err}"), false);
                return Err(err);
            }
        };
        self.trail.record(
            TrailCategory::Context,
            Some(new_page.id()),
            format!("acquired by {kind} {trigger} on {}", page.id()),
            true,
        );

        let spec = self.spec(WaitClass::Navigation);
        ContextCoordinator::wait_until_loaded(&new_page, spec).await?;
        if let Some(pattern) = url {
            ContextCoordinator::wait_for_url(&new_page, pattern, spec).await?;
        }
        Ok(())
    }

    async fn capture(&mut self, page: &PageContext, source: &CaptureSource) -> ProbeResult<String> {
        match source {
            CaptureSource::ElementText(query) => page.text_of(&self.query(query)?).await,
            CaptureSource::Url => page.current_url().await,
            CaptureSource::RowCount { table } => {
                let snapshot = table::extract(page, &self.query(table)?).await?;
                let count = snapshot.row_count();
                self.trail.set_last_table(snapshot);
                Ok(count.to_string())
            }
            CaptureSource::TableCell { table, row, column } => {
                let snapshot = table::extract(page, &self.query(table)?).await?;
                let values = snapshot.column_values(*column);
                self.trail.set_last_table(snapshot);
                let values = values?;
                row.checked_sub(1)
                    .and_then(|i| values.get(i).cloned())
                    .ok_or_else(|| ProbeError::AssertionFailed {
                        expected: format!("a data row {row}"),
                        observed: format!("{} data rows", values.len()),
                    })
            }
            CaptureSource::PagedRowCount { table, next, max_pages } => {
                let table = self.query(table)?;
                let next = self.query(next)?;
                let total =
                    table::count_rows_across_pages(page, &table, &next, *max_pages, self.spec(WaitClass::Fast)).await?;
                Ok(total.to_string())
            }
        }
    }
}

/// Password fields stay out of the trail
fn is_secret(query: &ElementQuery, config: &RunnerConfig) -> bool {
    match query {
        ElementQuery::Label { text, .. } => text == &config.login.password_label || text.to_lowercase().contains("password"),
        ElementQuery::Placeholder { text, .. } => text.to_lowercase().contains("password"),
        _ => false,
    }
}
