//! Condition polling.
//!
//! Every wait in the engine goes through [`Poller::wait_for`]: re-evaluate a
//! [`Condition`] against a fresh read of the page until it holds or the
//! deadline passes. Nothing is cached between ticks, so UI that appears and
//! disappears asynchronously (alerts, re-rendered tables) is observed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::context::PageContext;
use crate::dom::Document;
use crate::result::{ProbeError, ProbeResult};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Budget for fast UI feedback (validation, alerts)
pub const DEFAULT_FAST_TIMEOUT_MS: u64 = 5_000;

/// Budget for full navigation or a new context
pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 60_000;

/// Default polling interval
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

// =============================================================================
// URL PATTERNS
// =============================================================================

/// URL matcher used by navigation predicates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlPattern {
    /// Exact URL match
    Exact(String),
    /// Prefix match
    Prefix(String),
    /// Contains substring
    Contains(String),
    /// Regex match
    Regex(String),
    /// Glob pattern (e.g., "**/liquidation-report/*")
    Glob(String),
    /// Match any URL
    Any,
}

impl UrlPattern {
    /// Check if a URL matches this pattern. An invalid regex or glob never
    /// matches. Glob `*` also crosses `/`.
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Exact(pattern) => url == pattern,
            Self::Prefix(pattern) => url.starts_with(pattern.as_str()),
            Self::Contains(pattern) => url.contains(pattern.as_str()),
            Self::Regex(pattern) => regex::Regex::new(pattern).is_ok_and(|re| re.is_match(url)),
            Self::Glob(pattern) => glob::Pattern::new(pattern).is_ok_and(|g| g.matches(url)),
            Self::Any => true,
        }
    }

    /// Reject patterns that can never match because they do not compile
    pub fn validate(&self) -> ProbeResult<()> {
        match self {
            Self::Regex(pattern) => {
                regex::Regex::new(pattern).map_err(|e| ProbeError::Scenario {
                    message: format!("invalid URL regex {pattern:?}: {e}"),
                })?;
            }
            Self::Glob(pattern) => {
                glob::Pattern::new(pattern).map_err(|e| ProbeError::Scenario {
                    message: format!("invalid URL glob {pattern:?}: {e}"),
                })?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Apply `f` to the pattern text
    pub fn try_map_text<E>(&self, f: impl FnOnce(&str) -> Result<String, E>) -> Result<Self, E> {
        Ok(match self {
            Self::Exact(p) => Self::Exact(f(p)?),
            Self::Prefix(p) => Self::Prefix(f(p)?),
            Self::Contains(p) => Self::Contains(f(p)?),
            Self::Regex(p) => Self::Regex(f(p)?),
            Self::Glob(p) => Self::Glob(f(p)?),
            Self::Any => Self::Any,
        })
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(p) => write!(f, "url == {p:?}"),
            Self::Prefix(p) => write!(f, "url starts with {p:?}"),
            Self::Contains(p) => write!(f, "url contains {p:?}"),
            Self::Regex(p) => write!(f, "url matches /{p}/"),
            Self::Glob(p) => write!(f, "url matches glob {p:?}"),
            Self::Any => write!(f, "any url"),
        }
    }
}

// =============================================================================
// WAIT SPEC & POLICY
// =============================================================================

/// Interval and deadline of one bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitSpec {
    /// Polling interval in milliseconds
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// Deadline in milliseconds
    pub timeout_ms: u64,
}

const fn default_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for WaitSpec {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_ms: DEFAULT_FAST_TIMEOUT_MS,
        }
    }
}

impl WaitSpec {
    /// Wait with the default interval
    #[must_use]
    pub const fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
            timeout_ms,
        }
    }

    /// Set polling interval in milliseconds
    #[must_use]
    pub const fn with_interval(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Deadline as Duration
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Interval as Duration (never zero)
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Which budget a wait falls under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitClass {
    /// Validation messages, alerts, re-renders
    Fast,
    /// Full navigation or a new context
    Navigation,
}

/// Default budgets per wait class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    /// Fast feedback budget in milliseconds
    pub fast_ms: u64,
    /// Navigation budget in milliseconds
    pub navigation_ms: u64,
    /// Polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            fast_ms: DEFAULT_FAST_TIMEOUT_MS,
            navigation_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl TimeoutPolicy {
    /// Default spec for a wait class
    #[must_use]
    pub const fn spec_for(&self, class: WaitClass) -> WaitSpec {
        let timeout_ms = match class {
            WaitClass::Fast => self.fast_ms,
            WaitClass::Navigation => self.navigation_ms,
        };
        WaitSpec {
            interval_ms: self.poll_interval_ms,
            timeout_ms,
        }
    }

    /// Reject budgets that cannot work
    pub fn validate(&self) -> ProbeResult<()> {
        if self.fast_ms == 0 || self.navigation_ms == 0 {
            return Err(ProbeError::Config {
                message: "timeouts must be greater than zero".into(),
            });
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms >= self.fast_ms {
            return Err(ProbeError::Config {
                message: format!(
                    "poll interval {}ms must be non-zero and shorter than the fast timeout {}ms",
                    self.poll_interval_ms, self.fast_ms
                ),
            });
        }
        Ok(())
    }
}

// =============================================================================
// CONDITIONS
// =============================================================================

/// One evaluation of a condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// Condition holds
    pub satisfied: bool,
    /// What was seen, for timeout and failure messages
    pub observed: String,
}

impl Probe {
    /// Build a probe result
    #[must_use]
    pub fn new(satisfied: bool, observed: impl Into<String>) -> Self {
        Self {
            satisfied,
            observed: observed.into(),
        }
    }
}

/// Something that can be checked against a page
#[async_trait]
pub trait Condition: Send + Sync {
    /// Evaluate against a fresh read of `page`
    async fn check(&self, page: &PageContext) -> ProbeResult<Probe>;

    /// Human description for error messages
    fn description(&self) -> String;
}

/// A closure over a fresh document snapshot
pub struct FnCondition<F>
where
    F: Fn(&Document) -> bool + Send + Sync,
{
    func: F,
    description: String,
}

impl<F> fmt::Debug for FnCondition<F>
where
    F: Fn(&Document) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCondition")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl<F> FnCondition<F>
where
    F: Fn(&Document) -> bool + Send + Sync,
{
    /// Create a new function condition
    pub fn new(func: F, description: impl Into<String>) -> Self {
        Self {
            func,
            description: description.into(),
        }
    }
}

#[async_trait]
impl<F> Condition for FnCondition<F>
where
    F: Fn(&Document) -> bool + Send + Sync,
{
    async fn check(&self, page: &PageContext) -> ProbeResult<Probe> {
        let doc = page.snapshot().await?;
        let satisfied = (self.func)(&doc);
        Ok(Probe::new(satisfied, format!("url {}", doc.url)))
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// URL of the page matches a pattern
#[derive(Debug, Clone)]
pub struct UrlCondition(pub UrlPattern);

#[async_trait]
impl Condition for UrlCondition {
    async fn check(&self, page: &PageContext) -> ProbeResult<Probe> {
        let url = page.current_url().await?;
        Ok(Probe::new(self.0.matches(&url), format!("url was {url}")))
    }

    fn description(&self) -> String {
        self.0.to_string()
    }
}

// =============================================================================
// POLLER
// =============================================================================

/// Successful wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    /// Time until the condition held
    pub elapsed: Duration,
    /// Number of evaluations
    pub attempts: u32,
}

/// Retry-until-true engine
#[derive(Debug, Clone, Copy, Default)]
pub struct Poller;

impl Poller {
    /// Poll `condition` until it holds or `spec.timeout_ms` elapses.
    ///
    /// Evaluation errors count as "not yet" and are reported as the last
    /// observation if the deadline passes, except those no later page state
    /// can clear ([`ProbeError::is_permanent`]), which are returned at once. Each evaluation is itself bounded
    /// by the remaining time, so a hung provider call cannot outlive the wait.
    pub async fn wait_for(
        page: &PageContext,
        condition: &(dyn Condition + '_),
        spec: WaitSpec,
    ) -> ProbeResult<Ready> {
        let start = Instant::now();
        let deadline = start + spec.timeout();
        let mut attempts = 0_u32;
        let mut last_observation = None;

        loop {
            attempts += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, condition.check(page)).await {
                Ok(Ok(probe)) if probe.satisfied => {
                    let elapsed = start.elapsed();
                    tracing::debug!(
                        condition = %condition.description(),
                        attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "condition satisfied"
                    );
                    return Ok(Ready { elapsed, attempts });
                }
                Ok(Ok(probe)) => last_observation = Some(probe.observed),
                Ok(Err(err)) if err.is_permanent() => {
                    tracing::debug!(condition = %condition.description(), attempts, error = %err, "condition cannot hold");
                    return Err(err);
                }
                Ok(Err(err)) => last_observation = Some(err.to_string()),
                Err(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                tracing::debug!(condition = %condition.description(), attempts, elapsed_ms, "condition timed out");
                return Err(ProbeError::Timeout {
                    waited_for: condition.description(),
                    elapsed_ms,
                    last_observation,
                });
            }
            tokio::time::sleep(spec.interval().min(deadline - now)).await;
        }
    }

    /// Evaluate once, without waiting
    pub async fn check_now(page: &PageContext, condition: &(dyn Condition + '_)) -> ProbeResult<Probe> {
        condition.check(page).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    mod url_pattern_tests {
        use super::*;

        #[test]
        fn test_contains_and_prefix() {
            assert!(UrlPattern::Contains("/dashboard".into()).matches("http://app.test/dashboard"));
            assert!(UrlPattern::Prefix("http://app".into()).matches("http://app.test/"));
            assert!(!UrlPattern::Exact("http://app.test".into()).matches("http://app.test/"));
        }

        #[test]
        fn test_regex() {
            let p = UrlPattern::Regex("/liquidation-report/".into());
            assert!(p.matches("http://app.test/liquidation-report/42"));
            assert!(!p.matches("http://app.test/rcd/42"));
        }

        #[test]
        fn test_invalid_regex_never_matches_and_fails_validation() {
            let p = UrlPattern::Regex("(".into());
            assert!(!p.matches("("));
            assert!(p.validate().is_err());
        }

        #[test]
        fn test_glob() {
            let p = UrlPattern::Glob("http://*/cdr/*".into());
            assert!(p.matches("http://app.test/cdr/7"));
            assert!(!p.matches("https://app.test/cdr/7"));
            assert!(UrlPattern::Glob("*report".into()).matches("/liquidation-report"));
            assert!(UrlPattern::Glob("**/liquidation-report/*".into()).matches("http://app.test/liquidation-report/SDO-003"));
        }

        #[test]
        fn test_glob_literal_tail_is_anchored_at_end() {
            let p = UrlPattern::Glob("http://*/x".into());
            assert!(p.matches("http://app.test/x/1/x"));
            assert!(p.matches("http://app.test/x"));
            assert!(!p.matches("http://app.test/x/1"));
        }

        #[test]
        fn test_invalid_glob_never_matches_and_fails_validation() {
            let p = UrlPattern::Glob("/report/[".into());
            assert!(!p.matches("/report/["));
            assert!(p.validate().is_err());
            assert!(UrlPattern::Glob("/report/*".into()).validate().is_ok());
        }

        #[test]
        fn test_yaml_shape() {
            let p: UrlPattern = crate::yaml::from_str("regex: /rcd/").unwrap();
            assert_eq!(p, UrlPattern::Regex("/rcd/".into()));
            assert_eq!(p.to_string(), "url matches //rcd//");
        }
    }

    mod poller_tests {
        use super::*;
        use crate::context::ContextRole;
        use crate::driver::BrowserSession;
        use crate::locator::Resolver;
        use crate::mock::{MockBrowser, StaticSite};
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        /// Fails with `error` for the first `failures` checks, then holds
        struct Flaky {
            failures: u32,
            error: fn() -> ProbeError,
            checks: AtomicU32,
        }

        #[async_trait]
        impl Condition for Flaky {
            async fn check(&self, _page: &PageContext) -> ProbeResult<Probe> {
                let n = self.checks.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    return Err((self.error)());
                }
                Ok(Probe::new(true, "held"))
            }

            fn description(&self) -> String {
                "flaky".into()
            }
        }

        async fn page() -> PageContext {
            let site = StaticSite::new().document(Document::new("http://lg.test/", crate::dom::Node::element("body")));
            let browser = MockBrowser::new(site);
            let page =
                PageContext::new("primary", ContextRole::Primary, browser.new_page().await.unwrap(), Arc::new(Resolver::new()));
            page.navigate("http://lg.test/").await.unwrap();
            page
        }

        #[tokio::test]
        async fn test_transient_errors_are_retried() {
            let page = page().await;
            let flaky = Flaky {
                failures: 2,
                error: || ProbeError::provider("target detached"),
                checks: AtomicU32::new(0),
            };
            let spec = WaitSpec::with_timeout(2_000).with_interval(1);
            let ready = Poller::wait_for(&page, &flaky, spec).await.unwrap();
            assert_eq!(ready.attempts, 3);
        }

        #[tokio::test]
        async fn test_permanent_error_returns_without_waiting() {
            let page = page().await;
            let flaky = Flaky {
                failures: u32::MAX,
                error: || ProbeError::ColumnOutOfRange { column: 9, width: 5 },
                checks: AtomicU32::new(0),
            };
            let spec = WaitSpec::with_timeout(60_000);
            let started = std::time::Instant::now();
            let err = Poller::wait_for(&page, &flaky, spec).await.unwrap_err();
            assert!(matches!(err, ProbeError::ColumnOutOfRange { column: 9, .. }), "{err}");
            assert_eq!(flaky.checks.load(Ordering::SeqCst), 1);
            assert!(started.elapsed() < Duration::from_secs(5));
        }

        #[tokio::test]
        async fn test_invalid_title_regex_is_not_a_timeout() {
            let page = page().await;
            let predicate = crate::scenario::StatePredicate::TitleMatches("(".into());
            let err = Poller::wait_for(&page, &predicate, WaitSpec::with_timeout(60_000)).await.unwrap_err();
            assert!(!err.is_timeout());
            assert!(err.to_string().contains("invalid title regex"), "{err}");
        }
    }

    mod policy_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let policy = TimeoutPolicy::default();
            assert_eq!(policy.spec_for(WaitClass::Fast).timeout_ms, 5_000);
            assert_eq!(policy.spec_for(WaitClass::Navigation).timeout_ms, 60_000);
            assert_eq!(policy.spec_for(WaitClass::Fast).interval_ms, 100);
            assert!(policy.validate().is_ok());
        }

        #[test]
        fn test_rejects_zero_and_oversized_interval() {
            let zero = TimeoutPolicy {
                fast_ms: 0,
                ..TimeoutPolicy::default()
            };
            assert!(zero.validate().is_err());
            let slow = TimeoutPolicy {
                poll_interval_ms: 5_000,
                ..TimeoutPolicy::default()
            };
            assert!(slow.validate().is_err());
        }

        #[test]
        fn test_wait_spec_interval_never_zero() {
            let spec = WaitSpec::with_timeout(10).with_interval(0);
            assert_eq!(spec.interval(), Duration::from_millis(1));
        }

        #[test]
        fn test_wait_spec_yaml_defaults_interval() {
            let spec: WaitSpec = serde_yaml_ng::from_str("timeout_ms: 250").unwrap();
            assert_eq!(spec, WaitSpec::with_timeout(250));
        }
    }
}
