//! Page contexts and multi-context coordination.
//!
//! A scenario holds one *primary* [`PageContext`] and zero or more
//! *secondary* contexts opened by its own actions (report links that spawn a
//! tab). The [`ContextCoordinator`] owns all of them and releases the
//! secondaries when the scenario ends.
//!
//! ## Arm, then act
//!
//! A new tab can open before the click that caused it returns. The
//! subscription must therefore exist before the trigger runs:
//!
//! ```text
//! coordinator.arm()          // subscribe now
//!     .act(click).await?     // run the trigger; events are buffered
//!     .acquire(timeout).await?
//! ```
//!
//! [`TriggeredWatch`] can only be built from an [`ArmedWatch`], so there is no
//! way to express act-then-arm through this API.

use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;

use crate::dom::{Document, ReadyState};
use crate::driver::{BrowserSession, NavigationResponse, PageDriver, PageOpened};
use crate::locator::{ElementQuery, ResolvedElement, Resolver};
use crate::result::{ProbeError, ProbeResult};
use crate::wait::{FnCondition, Poller, Ready, UrlCondition, UrlPattern, WaitSpec};

/// Primary or spawned context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    /// Opened at scenario start
    Primary,
    /// Opened by an action during the scenario
    Secondary,
}

/// One observed URL in a context's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// URL
    pub url: String,
    /// HTTP status, for explicit navigations
    pub status: Option<u16>,
    /// Milliseconds since the context was created
    pub at_ms: u64,
}

/// One browser tab or window
#[derive(Debug)]
pub struct PageContext {
    id: String,
    role: ContextRole,
    driver: Arc<dyn PageDriver>,
    resolver: Arc<Resolver>,
    created: Instant,
    history: Mutex<Vec<HistoryEntry>>,
    last_response: Mutex<Option<NavigationResponse>>,
}

impl PageContext {
    /// Wrap a provider page
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        role: ContextRole,
        driver: Arc<dyn PageDriver>,
        resolver: Arc<Resolver>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            driver,
            resolver,
            created: Instant::now(),
            history: Mutex::new(Vec::new()),
            last_response: Mutex::new(None),
        }
    }

    /// Context id (`primary`, `secondary-1`, ...)
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Role of this context
    #[must_use]
    pub const fn role(&self) -> ContextRole {
        self.role
    }

    /// Underlying provider page
    #[must_use]
    pub fn driver(&self) -> &Arc<dyn PageDriver> {
        &self.driver
    }

    /// Resolver shared with the rest of the scenario
    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Fresh document snapshot; URL changes are appended to the history
    pub async fn snapshot(&self) -> ProbeResult<Document> {
        let doc = self.driver.snapshot().await?;
        self.observe_url(&doc.url, None);
        Ok(doc)
    }

    /// Navigate and record the main-frame response
    pub async fn navigate(&self, url: &str) -> ProbeResult<NavigationResponse> {
        tracing::info!(context = %self.id, url, "navigating");
        let response = self.driver.navigate(url).await?;
        self.observe_url(&response.url, response.status);
        *self.last_response.lock().unwrap_or_else(PoisonError::into_inner) = Some(response.clone());
        Ok(response)
    }

    /// Current URL
    pub async fn current_url(&self) -> ProbeResult<String> {
        let url = self.driver.current_url().await?;
        self.observe_url(&url, None);
        Ok(url)
    }

    /// Current loading state
    pub async fn ready_state(&self) -> ProbeResult<ReadyState> {
        self.driver.ready_state().await
    }

    /// Resolve against a fresh snapshot
    pub async fn resolve(&self, query: &ElementQuery) -> ProbeResult<Vec<ResolvedElement>> {
        let doc = self.snapshot().await?;
        self.resolver.resolve(&doc, query)
    }

    /// Resolve to exactly one element against `doc`
    pub fn resolve_one(&self, doc: &Document, query: &ElementQuery) -> ProbeResult<ResolvedElement> {
        let mut found = self.resolver.resolve(doc, query)?;
        if found.len() != 1 {
            return Err(ProbeError::AmbiguousOrMissingElement {
                query: query.to_string(),
                count: found.len(),
            });
        }
        Ok(found.remove(0))
    }

    /// Text of the single element matching `query` (value for form controls)
    pub async fn text_of(&self, query: &ElementQuery) -> ProbeResult<String> {
        let doc = self.snapshot().await?;
        let element = self.resolve_one(&doc, query)?;
        Ok(element_text(&doc, &element))
    }

    /// Live DOM property of the single element matching `query`
    pub async fn property_of(&self, query: &ElementQuery, name: &str) -> ProbeResult<Option<String>> {
        let doc = self.snapshot().await?;
        let element = self.resolve_one(&doc, query)?;
        self.driver.read_property(&element.handle, name).await
    }

    /// Evaluate a script expression in the current document
    pub async fn evaluate(&self, expression: &str) -> ProbeResult<serde_json::Value> {
        self.driver.evaluate(expression).await
    }

    /// URLs seen by this context, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Response of the last explicit navigation
    #[must_use]
    pub fn last_response(&self) -> Option<NavigationResponse> {
        self.last_response.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Close the page
    pub async fn close(&self) -> ProbeResult<()> {
        tracing::debug!(context = %self.id, "closing context");
        self.driver.close().await
    }

    fn observe_url(&self, url: &str, status: Option<u16>) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        // explicit navigations always append, even to the same URL
        if status.is_none() && history.last().is_some_and(|e| e.url == url) {
            return;
        }
        history.push(HistoryEntry {
            url: url.to_string(),
            status,
            at_ms: self.created.elapsed().as_millis() as u64,
        });
    }
}

/// Text shown by an element: value for form controls, text content otherwise
#[must_use]
pub fn element_text(doc: &Document, element: &ResolvedElement) -> String {
    let Some(node) = doc.node(&element.handle.path) else {
        return String::new();
    };
    if matches!(node.tag.as_str(), "input" | "textarea" | "select") {
        return node.current_value().unwrap_or_default();
    }
    crate::dom::normalize_ws(&node.text_content())
}

/// Owns the primary context and every context spawned from it
pub struct ContextCoordinator {
    session: Arc<dyn BrowserSession>,
    resolver: Arc<Resolver>,
    primary: Arc<PageContext>,
    secondaries: Mutex<Vec<Arc<PageContext>>>,
}

impl std::fmt::Debug for ContextCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextCoordinator")
            .field("primary", &self.primary.id())
            .field("secondaries", &self.secondaries().len())
            .finish_non_exhaustive()
    }
}

impl ContextCoordinator {
    /// Open the primary context on `session`
    pub async fn open(session: Arc<dyn BrowserSession>, resolver: Arc<Resolver>) -> ProbeResult<Self> {
        let page = session.new_page().await?;
        let primary = Arc::new(PageContext::new(
            "primary",
            ContextRole::Primary,
            page,
            Arc::clone(&resolver),
        ));
        Ok(Self {
            session,
            resolver,
            primary,
            secondaries: Mutex::new(Vec::new()),
        })
    }

    /// The primary context
    #[must_use]
    pub fn primary(&self) -> Arc<PageContext> {
        Arc::clone(&self.primary)
    }

    /// Secondary contexts in acquisition order
    #[must_use]
    pub fn secondaries(&self) -> Vec<Arc<PageContext>> {
        self.secondaries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Secondary context by 1-based acquisition index
    #[must_use]
    pub fn secondary(&self, index: usize) -> Option<Arc<PageContext>> {
        index
            .checked_sub(1)
            .and_then(|i| self.secondaries.lock().unwrap_or_else(PoisonError::into_inner).get(i).cloned())
    }

    /// Most recently acquired context (the primary if none was spawned)
    #[must_use]
    pub fn latest(&self) -> Arc<PageContext> {
        self.secondaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
            .unwrap_or_else(|| self.primary())
    }

    /// Run `script` at the start of every document in the session, including
    /// contexts acquired later
    pub async fn add_init_script(&self, script: &str) -> ProbeResult<()> {
        tracing::debug!(bytes = script.len(), "installing init script");
        self.session.add_init_script(script).await
    }

    /// Subscribe for the next new context. Must precede the trigger.
    #[must_use]
    pub fn arm(&self) -> ArmedWatch<'_> {
        tracing::debug!("armed new-context watch");
        ArmedWatch {
            coordinator: self,
            receiver: self.session.subscribe_pages(),
            armed_at: Instant::now(),
        }
    }

    /// Arm, then run `trigger` and the event wait concurrently.
    ///
    /// Returns once both the trigger has completed and a new context has
    /// opened, in either order. A failing trigger fails the call immediately.
    pub async fn expect_new_context<F, Fut>(&self, trigger: F, timeout: Duration) -> ProbeResult<Arc<PageContext>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProbeResult<()>>,
    {
        let mut watch = self.arm();
        let started = Instant::now();
        let both = async { tokio::try_join!(trigger(), watch.next_page()) };
        match tokio::time::timeout(timeout, both).await {
            Ok(Ok(((), opened))) => Ok(self.adopt(opened)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ProbeError::Timeout {
                waited_for: "a new page context".into(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                last_observation: None,
            }),
        }
    }

    /// Wait until the document is interactive or complete
    pub async fn wait_until_loaded(page: &PageContext, spec: WaitSpec) -> ProbeResult<Ready> {
        let loaded = FnCondition::new(|doc: &Document| doc.ready_state.is_loaded(), "document loaded");
        Poller::wait_for(page, &loaded, spec).await
    }

    /// Does the context's current URL match?
    pub async fn url_matches(page: &PageContext, pattern: &UrlPattern) -> ProbeResult<bool> {
        Ok(pattern.matches(&page.current_url().await?))
    }

    /// Poll until the context's URL matches
    pub async fn wait_for_url(page: &PageContext, pattern: &UrlPattern, spec: WaitSpec) -> ProbeResult<Ready> {
        Poller::wait_for(page, &UrlCondition(pattern.clone()), spec).await
    }

    /// Compare the text of one element on each context as plain strings
    pub async fn assert_same_text(
        left: (&PageContext, &ElementQuery),
        right: (&PageContext, &ElementQuery),
    ) -> ProbeResult<String> {
        let lhs = left.0.text_of(left.1).await?;
        let rhs = right.0.text_of(right.1).await?;
        if lhs != rhs {
            return Err(ProbeError::AssertionFailed {
                expected: format!("{lhs:?} ({} on {})", left.1, left.0.id()),
                observed: format!("{rhs:?} ({} on {})", right.1, right.0.id()),
            });
        }
        Ok(lhs)
    }

    /// Close every secondary context. Errors are logged, not returned.
    pub async fn release_all(&self) -> usize {
        let released: Vec<_> = self
            .secondaries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for page in &released {
            if let Err(err) = page.close().await {
                tracing::warn!(context = %page.id(), error = %err, "failed to close secondary context");
            }
        }
        released.len()
    }

    fn adopt(&self, opened: PageOpened) -> Arc<PageContext> {
        let mut secondaries = self.secondaries.lock().unwrap_or_else(PoisonError::into_inner);
        let id = format!("secondary-{}", secondaries.len() + 1);
        tracing::info!(context = %id, page = %opened.page.id(), opener = ?opened.opener, "acquired new context");
        let page = Arc::new(PageContext::new(
            id,
            ContextRole::Secondary,
            opened.page,
            Arc::clone(&self.resolver),
        ));
        secondaries.push(Arc::clone(&page));
        page
    }
}

/// A registered subscription for the next new context
#[derive(Debug)]
pub struct ArmedWatch<'a> {
    coordinator: &'a ContextCoordinator,
    receiver: broadcast::Receiver<PageOpened>,
    armed_at: Instant,
}

impl<'a> ArmedWatch<'a> {
    /// Run the trigger. Pages it opens are buffered until [`TriggeredWatch::acquire`].
    pub async fn act<F, Fut>(self, trigger: F) -> ProbeResult<TriggeredWatch<'a>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ProbeResult<()>>,
    {
        trigger().await?;
        Ok(TriggeredWatch { armed: self })
    }

    async fn next_page(&mut self) -> ProbeResult<PageOpened> {
        loop {
            match self.receiver.recv().await {
                Ok(opened) => return Ok(opened),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "new-context events lagged");
                }
                Err(RecvError::Closed) => {
                    return Err(ProbeError::provider("browser session closed while waiting for a new context"));
                }
            }
        }
    }
}

/// A watch whose trigger has run
#[derive(Debug)]
pub struct TriggeredWatch<'a> {
    armed: ArmedWatch<'a>,
}

impl TriggeredWatch<'_> {
    /// Wait for the new context, bounded by `timeout` from now
    pub async fn acquire(mut self, timeout: Duration) -> ProbeResult<Arc<PageContext>> {
        match tokio::time::timeout(timeout, self.armed.next_page()).await {
            Ok(Ok(opened)) => Ok(self.armed.coordinator.adopt(opened)),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ProbeError::Timeout {
                waited_for: "a new page context".into(),
                elapsed_ms: self.armed.armed_at.elapsed().as_millis() as u64,
                last_observation: None,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::action::{ActionExecutor, ActionKind};
    use crate::dom::Node;
    use crate::mock::{Interaction, MockBrowser, MockSite, Response};

    #[derive(Debug)]
    struct ReportSite {
        open_delay: Option<Duration>,
    }

    impl MockSite for ReportSite {
        fn render(&self, url: &str) -> Option<Document> {
            let path = url.trim_start_matches("http://app.test");
            let body = match path {
                "/cash-advances" => Node::element("body")
                    .child(Node::element("p").attr("id", "sdo").text("Juan Dela Cruz"))
                    .child(Node::element("a").attr("href", "#").text("Liquidation Report")),
                p if p.starts_with("/liquidation-report/") => Node::element("body")
                    .child(Node::element("p").attr("id", "sdo").text("Juan Dela Cruz")),
                _ => return None,
            };
            Some(Document::new(url, body))
        }

        fn interact(&self, _url: &str, interaction: &Interaction) -> Response {
            match interaction {
                Interaction::Click { text, .. } if text == "Liquidation Report" => {
                    let url = "http://app.test/liquidation-report/7".to_string();
                    match self.open_delay {
                        Some(delay) => Response::OpenTabAfter(url, delay),
                        None => Response::OpenTab(url),
                    }
                }
                _ => Response::Rerender,
            }
        }
    }

    async fn coordinator(open_delay: Option<Duration>) -> ContextCoordinator {
        let browser = MockBrowser::new(ReportSite { open_delay });
        let coordinator = ContextCoordinator::open(Arc::new(browser), Arc::new(Resolver::new()))
            .await
            .unwrap();
        coordinator
            .primary()
            .navigate("http://app.test/cash-advances")
            .await
            .unwrap();
        coordinator
    }

    fn report_link() -> ElementQuery {
        ElementQuery::role("link", "Liquidation Report")
    }

    mod expect_new_context_tests {
        use super::*;

        #[tokio::test]
        async fn test_tab_opened_inside_click_is_acquired() {
            let coordinator = coordinator(None).await;
            let primary = coordinator.primary();
            let link = report_link();
            let report = coordinator
                .expect_new_context(
                    || ActionExecutor::perform(&primary, &link, ActionKind::Click, None),
                    Duration::from_secs(60),
                )
                .await
                .unwrap();
            assert_eq!(report.role(), ContextRole::Secondary);
            assert_eq!(report.id(), "secondary-1");
            let pattern = UrlPattern::Regex("/liquidation-report/".into());
            assert!(ContextCoordinator::url_matches(&report, &pattern).await.unwrap());
        }

        #[tokio::test]
        async fn test_tab_opened_after_click_returns_is_acquired() {
            let coordinator = coordinator(Some(Duration::from_millis(30))).await;
            let primary = coordinator.primary();
            let link = report_link();
            let report = coordinator
                .expect_new_context(
                    || ActionExecutor::perform(&primary, &link, ActionKind::Click, None),
                    Duration::from_secs(5),
                )
                .await
                .unwrap();
            assert!(report.current_url().await.unwrap().ends_with("/liquidation-report/7"));
        }

        #[tokio::test]
        async fn test_failing_trigger_fails_fast() {
            let coordinator = coordinator(None).await;
            let primary = coordinator.primary();
            let missing = ElementQuery::text("Missing");
            let err = coordinator
                .expect_new_context(
                    || ActionExecutor::perform(&primary, &missing, ActionKind::Click, None),
                    Duration::from_secs(60),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ProbeError::AmbiguousOrMissingElement { count: 0, .. }));
            assert!(coordinator.secondaries().is_empty());
        }

        #[tokio::test]
        async fn test_no_tab_times_out() {
            let coordinator = coordinator(None).await;
            let primary = coordinator.primary();
            let sdo = ElementQuery::id("sdo");
            let err = coordinator
                .expect_new_context(
                    || ActionExecutor::perform(&primary, &sdo, ActionKind::Click, None),
                    Duration::from_millis(50),
                )
                .await
                .unwrap_err();
            assert!(err.is_timeout());
        }
    }

    mod ordering_tests {
        use super::*;

        #[tokio::test]
        async fn test_arm_then_act_buffers_the_event() {
            let coordinator = coordinator(None).await;
            let primary = coordinator.primary();
            let link = report_link();
            let report = coordinator
                .arm()
                .act(|| ActionExecutor::perform(&primary, &link, ActionKind::Click, None))
                .await
                .unwrap()
                .acquire(Duration::from_secs(1))
                .await
                .unwrap();
            assert_eq!(coordinator.latest().id(), report.id());
        }

        #[tokio::test]
        async fn test_act_then_arm_misses_the_event() {
            let coordinator = coordinator(None).await;
            let primary = coordinator.primary();
            ActionExecutor::perform(&primary, &report_link(), ActionKind::Click, None)
                .await
                .unwrap();
            let err = coordinator
                .arm()
                .act(|| async { Ok(()) })
                .await
                .unwrap()
                .acquire(Duration::from_millis(100))
                .await
                .unwrap_err();
            assert!(err.is_timeout());
            assert!(coordinator.secondaries().is_empty());
        }
    }

    mod cross_context_tests {
        use super::*;

        #[tokio::test]
        async fn test_same_text_across_contexts() {
            let coordinator = coordinator(None).await;
            let primary = coordinator.primary();
            let link = report_link();
            let report = coordinator
                .expect_new_context(
                    || ActionExecutor::perform(&primary, &link, ActionKind::Click, None),
                    Duration::from_secs(1),
                )
                .await
                .unwrap();
            let sdo = ElementQuery::id("sdo");
            let text = ContextCoordinator::assert_same_text((&primary, &sdo), (&report, &sdo))
                .await
                .unwrap();
            assert_eq!(text, "Juan Dela Cruz");
            let err = ContextCoordinator::assert_same_text((&primary, &sdo), (&report, &report_link()))
                .await
                .unwrap_err();
            assert!(matches!(err, ProbeError::AmbiguousOrMissingElement { .. }));
        }

        #[tokio::test]
        async fn test_release_all_closes_secondaries() {
            let coordinator = coordinator(None).await;
            let primary = coordinator.primary();
            let link = report_link();
            let report = coordinator
                .expect_new_context(
                    || ActionExecutor::perform(&primary, &link, ActionKind::Click, None),
                    Duration::from_secs(1),
                )
                .await
                .unwrap();
            assert_eq!(coordinator.release_all().await, 1);
            assert!(coordinator.secondaries().is_empty());
            assert!(report.snapshot().await.is_err());
            assert_eq!(coordinator.latest().id(), "primary");
        }
    }

    mod history_tests {
        use super::*;

        #[tokio::test]
        async fn test_history_is_monotonic_and_records_status() {
            let coordinator = coordinator(None).await;
            let primary = coordinator.primary();
            primary.navigate("http://app.test/cash-advances").await.unwrap();
            primary.snapshot().await.unwrap();
            let history = primary.history();
            assert_eq!(history.len(), 2);
            assert!(history.windows(2).all(|w| w[0].at_ms <= w[1].at_ms));
            assert_eq!(history[0].status, Some(200));
            assert!(primary.last_response().unwrap().is_ok());
        }

        #[tokio::test]
        async fn test_unknown_page_is_404() {
            let coordinator = coordinator(None).await;
            let response = coordinator.primary().navigate("http://app.test/nope").await.unwrap();
            assert_eq!(response.status, Some(404));
            assert!(!response.is_ok());
        }

        #[tokio::test]
        async fn test_wait_until_loaded() {
            let coordinator = coordinator(None).await;
            let ready = ContextCoordinator::wait_until_loaded(&coordinator.primary(), WaitSpec::with_timeout(1_000))
                .await
                .unwrap();
            assert_eq!(ready.attempts, 1);
        }
    }
}
