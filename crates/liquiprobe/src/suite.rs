//! Running many scenarios with bounded concurrency.
//!
//! Each scenario gets its own browser session from the factory, so runs never
//! share cookies, tabs or variables.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::diagnostics::{DiagnosticTrail, TrailCategory};
use crate::driver::SessionFactory;
use crate::result::{ProbeError, ProbeResult};
use crate::scenario::{FailureCause, Scenario, ScenarioReport, ScenarioResult, ScenarioRunner};

/// Which scenarios to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioFilter {
    /// Name substring
    pub name: Option<String>,
    /// Required tags (all of them)
    pub tags: Vec<String>,
}

impl ScenarioFilter {
    /// Match everything
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a name substring
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Require a tag
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Does `scenario` pass the filter
    #[must_use]
    pub fn matches(&self, scenario: &Scenario) -> bool {
        self.name.as_ref().map_or(true, |n| scenario.name.contains(n.as_str()))
            && self.tags.iter().all(|t| scenario.has_tag(t))
    }
}

/// Results of a suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall time in milliseconds
    pub duration_ms: u64,
    /// One report per scenario, in declaration order
    pub scenarios: Vec<ScenarioReport>,
}

impl SuiteReport {
    /// Passed count
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.scenarios.iter().filter(|r| r.result.is_passed()).count()
    }

    /// Failed count
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.scenarios.iter().filter(|r| r.result.is_failed()).count()
    }

    /// Skipped count
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.scenarios.iter().filter(|r| r.result.is_skipped()).count()
    }

    /// Total scenarios
    #[must_use]
    pub fn total(&self) -> usize {
        self.scenarios.len()
    }

    /// No scenario failed. Skips do not count against the suite.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0
    }

    /// Failed reports
    #[must_use]
    pub fn failures(&self) -> Vec<&ScenarioReport> {
        self.scenarios.iter().filter(|r| r.result.is_failed()).collect()
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

/// Runs scenarios, each on a fresh session
pub struct SuiteRunner {
    runner: ScenarioRunner,
    factory: Arc<dyn SessionFactory>,
    workers: usize,
    fail_fast: bool,
}

impl std::fmt::Debug for SuiteRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuiteRunner")
            .field("runner", &self.runner)
            .field("workers", &self.workers)
            .field("fail_fast", &self.fail_fast)
            .finish_non_exhaustive()
    }
}

impl SuiteRunner {
    /// Concurrency comes from the runner's configuration
    #[must_use]
    pub fn new(runner: ScenarioRunner, factory: Arc<dyn SessionFactory>) -> Self {
        let workers = runner.config().workers.max(1);
        Self {
            runner,
            factory,
            workers,
            fail_fast: false,
        }
    }

    /// Stop starting new scenarios after the first failure
    #[must_use]
    pub const fn with_fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }

    /// Run every scenario. Reports come back in declaration order.
    pub async fn run(&self, scenarios: &[Scenario]) -> SuiteReport {
        let started_at = Utc::now();
        let start = Instant::now();
        tracing::info!(scenarios = scenarios.len(), workers = self.workers, "suite started");

        let failed = std::sync::atomic::AtomicBool::new(false);
        let mut indexed: Vec<(usize, ScenarioReport)> = stream::iter(scenarios.iter().enumerate())
            .map(|(i, scenario)| {
                let failed = &failed;
                async move {
                    let report = if self.fail_fast && failed.load(std::sync::atomic::Ordering::SeqCst) {
                        not_started(scenario)
                    } else {
                        self.run_one(scenario).await
                    };
                    if report.result.is_failed() {
                        failed.store(true, std::sync::atomic::Ordering::SeqCst);
                    }
                    (i, report)
                }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;
        indexed.sort_by_key(|(i, _)| *i);

        let report = SuiteReport {
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            scenarios: indexed.into_iter().map(|(_, r)| r).collect(),
        };
        tracing::info!(
            passed = report.passed_count(),
            failed = report.failed_count(),
            skipped = report.skipped_count(),
            duration_ms = report.duration_ms,
            "suite finished"
        );
        report
    }

    async fn run_one(&self, scenario: &Scenario) -> ScenarioReport {
        let session = match self.factory.open().await {
            Ok(session) => session,
            Err(err) => return session_failure(scenario, &err),
        };
        let report = self.runner.run(scenario, Arc::clone(&session)).await;
        if let Err(err) = session.close().await {
            tracing::warn!(scenario = %scenario.name, error = %err, "closing browser session failed");
        }
        report
    }
}

fn session_failure(scenario: &Scenario, err: &ProbeError) -> ScenarioReport {
    let mut trail = DiagnosticTrail::new();
    trail.record(TrailCategory::Phase, None, format!("browser session: {err}"), false);
    ScenarioReport {
        name: scenario.name.clone(),
        tags: scenario.tags.clone(),
        run_id: trail.run_id,
        result: ScenarioResult::Failed {
            cause: FailureCause::SetupFailed,
            message: err.to_string(),
            last_observed: None,
        },
        duration_ms: 0,
        trail,
    }
}

fn not_started(scenario: &Scenario) -> ScenarioReport {
    let trail = DiagnosticTrail::new();
    ScenarioReport {
        name: scenario.name.clone(),
        tags: scenario.tags.clone(),
        run_id: trail.run_id,
        result: ScenarioResult::Skipped {
            reason: "not started after an earlier failure".to_string(),
        },
        duration_ms: 0,
        trail,
    }
}
