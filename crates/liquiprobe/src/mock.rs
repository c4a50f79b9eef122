//! In-memory browser provider.
//!
//! [`MockBrowser`] implements [`BrowserSession`] over a scripted [`MockSite`]:
//! the site renders a [`Document`] for a URL and decides what each interaction
//! does (re-render, navigate, open a tab). Pages are re-rendered on every
//! snapshot, so a site whose output depends on time or on its own state is
//! observed exactly the way a live page would be.
//!
//! There is no script engine. Init scripts are recorded, and the only one
//! with an effect is [`PRINT_STUB_SCRIPT`]: a site answering
//! [`Response::Print`] then sets the print flag instead of opening a dialog.
//! [`PageDriver::evaluate`] understands a handful of expressions.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::dom::{Document, Node, NodePath, ReadyState};
use crate::driver::{
    join_url, BrowserSession, NavigationResponse, PageDriver, PageOpened, SessionFactory, PAGE_EVENT_CAPACITY,
    PRINT_REQUESTED_EXPR, PRINT_STUB_SCRIPT,
};
use crate::locator::ElementHandle;
use crate::result::{ProbeError, ProbeResult};

/// What the user did to an element
#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    /// Click
    Click {
        /// Clicked element (as rendered)
        target: Node,
        /// Its normalised text
        text: String,
    },
    /// Fill a text control
    Fill {
        /// Filled element
        target: Node,
        /// New value
        value: String,
    },
    /// Pick an option of a `select`
    Select {
        /// The `select`
        target: Node,
        /// Chosen option value
        option: String,
    },
    /// Key press with the element focused
    Press {
        /// Focused element
        target: Node,
        /// Key name
        key: String,
    },
}

impl Interaction {
    /// The element acted on
    #[must_use]
    pub const fn target(&self) -> &Node {
        match self {
            Self::Click { target, .. }
            | Self::Fill { target, .. }
            | Self::Select { target, .. }
            | Self::Press { target, .. } => target,
        }
    }
}

/// Site reaction to an interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Same URL; the next snapshot shows whatever the site renders now
    Rerender,
    /// Main frame navigates
    Navigate(String),
    /// A new tab opens before the interaction returns
    OpenTab(String),
    /// A new tab opens after a delay, once the interaction has returned
    OpenTabAfter(String, Duration),
    /// Page script calls `window.print()`
    Print,
}

/// A scripted application
pub trait MockSite: Send + Sync + fmt::Debug + 'static {
    /// Render `url`; `None` serves a 404 page
    fn render(&self, url: &str) -> Option<Document>;

    /// React to an interaction on the page at `url`
    fn interact(&self, url: &str, interaction: &Interaction) -> Response {
        let _ = (url, interaction);
        Response::Rerender
    }
}

/// Fixed pages, no behaviour
#[derive(Debug, Default, Clone)]
pub struct StaticSite {
    pages: BTreeMap<String, Document>,
}

impl StaticSite {
    /// Create an empty site
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `root` at `url`
    #[must_use]
    pub fn page(mut self, url: impl Into<String>, root: Node) -> Self {
        let url = url.into();
        self.pages.insert(url.clone(), Document::new(url, root));
        self
    }

    /// Serve a prepared document at its own URL
    #[must_use]
    pub fn document(mut self, doc: Document) -> Self {
        self.pages.insert(doc.url.clone(), doc);
        self
    }
}

impl MockSite for StaticSite {
    fn render(&self, url: &str) -> Option<Document> {
        self.pages.get(url).cloned()
    }
}

struct SessionInner {
    site: Arc<dyn MockSite>,
    events: broadcast::Sender<PageOpened>,
    next_id: AtomicUsize,
    load_delay: Duration,
    pages: Mutex<Vec<Arc<MockPage>>>,
    init_scripts: Mutex<Vec<String>>,
}

impl fmt::Debug for SessionInner {
    // pages hold the session, so they are counted rather than printed
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionInner")
            .field("site", &self.site)
            .field("load_delay", &self.load_delay)
            .field("pages", &self.pages.lock().unwrap_or_else(PoisonError::into_inner).len())
            .finish_non_exhaustive()
    }
}

impl SessionInner {
    fn open_page(self: &Arc<Self>, url: &str, opener: Option<String>) -> Arc<MockPage> {
        let id = format!("page-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let scripts = self.init_scripts.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let page = Arc::new(MockPage {
            id,
            session: Arc::clone(self),
            state: Mutex::new(PageState::at(url, scripts.clone())),
            init_scripts: Mutex::new(scripts),
            calls: Mutex::new(Vec::new()),
        });
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&page));
        if let Some(opener) = opener {
            // no receivers is not an error: nobody was armed
            let _ = self.events.send(PageOpened {
                page: Arc::clone(&page) as Arc<dyn PageDriver>,
                opener: Some(opener),
            });
        }
        page
    }
}

/// An in-memory browser session
#[derive(Debug, Clone)]
pub struct MockBrowser {
    inner: Arc<SessionInner>,
}

impl MockBrowser {
    /// Session over `site`
    #[must_use]
    pub fn new(site: impl MockSite) -> Self {
        Self::with_site(Arc::new(site), Duration::ZERO)
    }

    /// Session over a shared site with a per-navigation load delay
    #[must_use]
    pub fn with_site(site: Arc<dyn MockSite>, load_delay: Duration) -> Self {
        let (events, _) = broadcast::channel(PAGE_EVENT_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                site,
                events,
                next_id: AtomicUsize::new(0),
                load_delay,
                pages: Mutex::new(Vec::new()),
                init_scripts: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Pages report `loading` for `delay` after each navigation
    #[must_use]
    pub fn with_load_delay(self, delay: Duration) -> Self {
        Self::with_site(Arc::clone(&self.inner.site), delay)
    }

    /// Every page opened so far, closed or not
    #[must_use]
    pub fn pages(&self) -> Vec<Arc<MockPage>> {
        self.inner
            .pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BrowserSession for MockBrowser {
    async fn new_page(&self) -> ProbeResult<Arc<dyn PageDriver>> {
        Ok(self.inner.open_page("about:blank", None) as Arc<dyn PageDriver>)
    }

    fn subscribe_pages(&self) -> broadcast::Receiver<PageOpened> {
        self.inner.events.subscribe()
    }

    async fn add_init_script(&self, script: &str) -> ProbeResult<()> {
        self.inner
            .init_scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(script.to_string());
        for page in self.pages() {
            page.add_init_script(script).await?;
            page.lock_state().scripts.push(script.to_string());
        }
        Ok(())
    }

    async fn close(&self) -> ProbeResult<()> {
        for page in self.pages() {
            page.close().await?;
        }
        Ok(())
    }
}

/// Builds an independent [`MockBrowser`] (and site) per worker
pub struct MockSessionFactory<F> {
    make_site: F,
    load_delay: Duration,
}

impl<F> fmt::Debug for MockSessionFactory<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockSessionFactory")
            .field("load_delay", &self.load_delay)
            .finish_non_exhaustive()
    }
}

impl<F, S> MockSessionFactory<F>
where
    F: Fn() -> S + Send + Sync,
    S: MockSite,
{
    /// Factory calling `make_site` once per session
    pub const fn new(make_site: F) -> Self {
        Self {
            make_site,
            load_delay: Duration::ZERO,
        }
    }

    /// Load delay for every session
    #[must_use]
    pub const fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }
}

#[async_trait]
impl<F, S> SessionFactory for MockSessionFactory<F>
where
    F: Fn() -> S + Send + Sync,
    S: MockSite,
{
    async fn open(&self) -> ProbeResult<Arc<dyn BrowserSession>> {
        let site: Arc<dyn MockSite> = Arc::new((self.make_site)());
        Ok(Arc::new(MockBrowser::with_site(site, self.load_delay)))
    }
}

#[derive(Debug)]
struct PageState {
    url: String,
    generation: u64,
    navigated_at: Instant,
    closed: bool,
    /// Values typed or selected since the last navigation
    overlay: BTreeMap<NodePath, String>,
    /// Init scripts that ran in the current document
    scripts: Vec<String>,
    /// The stubbed `window.print` ran in the current document
    printed: bool,
}

impl PageState {
    fn at(url: &str, scripts: Vec<String>) -> Self {
        Self {
            url: url.to_string(),
            generation: 0,
            navigated_at: Instant::now(),
            closed: false,
            overlay: BTreeMap::new(),
            scripts,
            printed: false,
        }
    }

    fn go(&mut self, url: String, scripts: Vec<String>) {
        self.url = url;
        self.generation += 1;
        self.navigated_at = Instant::now();
        self.overlay.clear();
        self.scripts = scripts;
        self.printed = false;
    }

    fn print_stubbed(&self) -> bool {
        self.scripts.iter().any(|s| s == PRINT_STUB_SCRIPT)
    }
}

/// One in-memory page
#[derive(Debug)]
pub struct MockPage {
    id: String,
    session: Arc<SessionInner>,
    state: Mutex<PageState>,
    /// Scripts every new document of this page starts with
    init_scripts: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
}

impl MockPage {
    /// Calls made on this page, oldest first
    #[must_use]
    pub fn call_history(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Any call starting with `prefix`?
    #[must_use]
    pub fn was_called(&self, prefix: &str) -> bool {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|c| c.starts_with(prefix))
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn installed_scripts(&self) -> Vec<String> {
        self.init_scripts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Navigate the main frame; the new document runs the init scripts
    fn go(&self, url: String) {
        let scripts = self.installed_scripts();
        self.lock_state().go(url, scripts);
    }

    fn status_for(&self, url: &str) -> Option<u16> {
        if url == "about:blank" {
            return None;
        }
        Some(if self.session.site.render(url).is_some() { 200 } else { 404 })
    }

    fn render_current(&self) -> ProbeResult<Document> {
        let state = self.lock_state();
        if state.closed {
            return Err(ProbeError::provider(format!("page {} is closed", self.id)));
        }
        let mut doc = if state.url == "about:blank" {
            Document::new("about:blank", Node::element("body"))
        } else {
            self.session.site.render(&state.url).unwrap_or_else(|| {
                Document::new(
                    state.url.clone(),
                    Node::element("body").child(Node::element("h1").text("404 Not Found")),
                )
                .with_title("Not Found")
            })
        };
        doc.url = state.url.clone();
        doc.generation = state.generation;
        doc.ready_state = if state.navigated_at.elapsed() < self.session.load_delay {
            ReadyState::Loading
        } else {
            ReadyState::Complete
        };
        for (path, value) in &state.overlay {
            apply_overlay(&mut doc, path, value);
        }
        Ok(doc)
    }

    /// Fresh render plus the node `element` points at
    fn target(&self, element: &ElementHandle) -> ProbeResult<(Document, Node)> {
        let doc = self.render_current()?;
        if element.generation != doc.generation {
            return Err(ProbeError::StaleElement {
                query: format!("{:?}", element.path),
            });
        }
        let node = doc
            .node(&element.path)
            .cloned()
            .ok_or_else(|| ProbeError::StaleElement {
                query: format!("{:?}", element.path),
            })?;
        Ok((doc, node))
    }

    fn apply(&self, current_url: &str, response: Response) {
        match response {
            Response::Rerender => {}
            Response::Navigate(url) => {
                let url = join_url(current_url, &url);
                tracing::debug!(page = %self.id, %url, "mock navigation");
                self.go(url);
            }
            Response::OpenTab(url) => {
                self.session.open_page(&join_url(current_url, &url), Some(self.id.clone()));
            }
            Response::OpenTabAfter(url, delay) => {
                let session = Arc::clone(&self.session);
                let opener = self.id.clone();
                let url = join_url(current_url, &url);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    session.open_page(&url, Some(opener));
                });
            }
            Response::Print => {
                let mut state = self.lock_state();
                if state.print_stubbed() {
                    state.printed = true;
                    drop(state);
                    self.record("print".into());
                } else {
                    drop(state);
                    self.record("print:dialog".into());
                }
            }
        }
    }

    fn interact(&self, interaction: &Interaction) {
        let url = self.lock_state().url.clone();
        let response = self.session.site.interact(&url, interaction);
        let response = match (response, interaction) {
            (Response::Rerender, Interaction::Click { target, .. }) => default_click(target),
            (response, _) => response,
        };
        self.apply(&url, response);
    }
}

/// Anchors follow their `href` when the site does not handle the click
fn default_click(target: &Node) -> Response {
    match (target.tag.as_str(), target.get_attr("href")) {
        ("a", Some(href)) if !href.starts_with('#') && !href.starts_with("javascript:") => {
            if target.get_attr("target") == Some("_blank") {
                Response::OpenTab(href.to_string())
            } else {
                Response::Navigate(href.to_string())
            }
        }
        _ => Response::Rerender,
    }
}

fn apply_overlay(doc: &mut Document, path: &[usize], value: &str) {
    let Some(node) = doc.node_mut(path) else {
        return;
    };
    if node.tag == "select" {
        select_in(node, value);
    } else {
        node.value = Some(value.to_string());
    }
}

fn select_in(node: &mut Node, value: &str) {
    for child in &mut node.children {
        if child.tag == "option" {
            if child.option_value() == value {
                child.attributes.insert("selected".into(), String::new());
            } else {
                child.attributes.remove("selected");
            }
        } else {
            select_in(child, value);
        }
    }
}

#[async_trait]
impl PageDriver for MockPage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn snapshot(&self) -> ProbeResult<Document> {
        self.render_current()
    }

    async fn navigate(&self, url: &str) -> ProbeResult<NavigationResponse> {
        self.record(format!("navigate:{url}"));
        let mut state = self.lock_state();
        if state.closed {
            return Err(ProbeError::Navigation {
                url: url.to_string(),
                message: "page is closed".into(),
            });
        }
        let target = join_url(&state.url, url);
        state.go(target.clone(), self.installed_scripts());
        drop(state);
        let status = self.status_for(&target);
        Ok(NavigationResponse::new(target, status))
    }

    async fn current_url(&self) -> ProbeResult<String> {
        let state = self.lock_state();
        if state.closed {
            return Err(ProbeError::provider(format!("page {} is closed", self.id)));
        }
        Ok(state.url.clone())
    }

    async fn ready_state(&self) -> ProbeResult<ReadyState> {
        Ok(self.render_current()?.ready_state)
    }

    async fn click(&self, element: &ElementHandle) -> ProbeResult<()> {
        let (_, node) = self.target(element)?;
        let text = crate::dom::normalize_ws(&node.text_content());
        self.record(format!("click:{text}"));
        self.interact(&Interaction::Click { target: node, text });
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> ProbeResult<()> {
        let (_, node) = self.target(element)?;
        self.record(format!("fill:{value}"));
        self.lock_state()
            .overlay
            .insert(element.path.clone(), value.to_string());
        self.interact(&Interaction::Fill {
            target: node,
            value: value.to_string(),
        });
        Ok(())
    }

    async fn select_option(&self, element: &ElementHandle, option: &str) -> ProbeResult<()> {
        let (_, node) = self.target(element)?;
        let value = node
            .descendant_options()
            .into_iter()
            .find(|o| o.option_value() == option || crate::dom::normalize_ws(&o.text_content()) == option)
            .map(Node::option_value)
            .ok_or_else(|| ProbeError::provider(format!("no option {option:?}")))?;
        self.record(format!("select:{value}"));
        self.lock_state().overlay.insert(element.path.clone(), value.clone());
        self.interact(&Interaction::Select { target: node, option: value });
        Ok(())
    }

    async fn press_key(&self, element: &ElementHandle, key: &str) -> ProbeResult<()> {
        let (_, node) = self.target(element)?;
        self.record(format!("press:{key}"));
        self.interact(&Interaction::Press {
            target: node,
            key: key.to_string(),
        });
        Ok(())
    }

    async fn read_property(&self, element: &ElementHandle, name: &str) -> ProbeResult<Option<String>> {
        let (_, node) = self.target(element)?;
        if name == "value" {
            return Ok(node.current_value());
        }
        Ok(node.properties.get(name).cloned())
    }

    async fn add_init_script(&self, script: &str) -> ProbeResult<()> {
        self.record("init_script".into());
        self.init_scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(script.to_string());
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> ProbeResult<serde_json::Value> {
        use serde_json::Value;
        if expression == PRINT_REQUESTED_EXPR {
            let state = self.lock_state();
            return Ok(if state.print_stubbed() {
                Value::Bool(state.printed)
            } else {
                Value::Null
            });
        }
        let doc = self.render_current()?;
        match expression {
            "location.href" => Ok(Value::String(doc.url)),
            "document.title" => Ok(Value::String(doc.title)),
            "document.readyState" => Ok(serde_json::to_value(doc.ready_state)?),
            other => Err(ProbeError::provider(format!("mock page cannot evaluate {other:?}"))),
        }
    }

    async fn close(&self) -> ProbeResult<()> {
        self.record("close".into());
        self.lock_state().closed = true;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::locator::{ElementQuery, Resolver};

    fn site() -> StaticSite {
        StaticSite::new()
            .page(
                "http://app.test/",
                Node::element("body")
                    .child(Node::element("a").attr("href", "/offices").text("Offices"))
                    .child(Node::element("a").attr("href", "/help").attr("target", "_blank").text("Help"))
                    .child(Node::element("input").attr("placeholder", "Search...")),
            )
            .page("http://app.test/offices", Node::element("body").child(Node::element("h1").text("Offices")))
            .page("http://app.test/help", Node::element("body").text("Help"))
    }

    async fn handle(page: &MockPage, query: &ElementQuery) -> ElementHandle {
        let doc = page.snapshot().await.unwrap();
        Resolver::new().resolve(&doc, query).unwrap().remove(0).handle
    }

    async fn first_page(browser: &MockBrowser) -> Arc<MockPage> {
        browser.new_page().await.unwrap();
        browser.pages().remove(0)
    }

    #[tokio::test]
    async fn test_navigate_reports_status() {
        let browser = MockBrowser::new(site());
        let page = first_page(&browser).await;
        assert_eq!(page.navigate("http://app.test/").await.unwrap().status, Some(200));
        assert_eq!(page.navigate("/missing").await.unwrap().status, Some(404));
        assert_eq!(page.current_url().await.unwrap(), "http://app.test/missing");
        assert!(page.was_called("navigate:/missing"));
    }

    #[tokio::test]
    async fn test_link_click_navigates_and_stales_handles() {
        let browser = MockBrowser::new(site());
        let page = first_page(&browser).await;
        page.navigate("http://app.test/").await.unwrap();
        let link = handle(&page, &ElementQuery::role("link", "Offices")).await;
        page.click(&link).await.unwrap();
        assert_eq!(page.current_url().await.unwrap(), "http://app.test/offices");
        let err = page.click(&link).await.unwrap_err();
        assert!(matches!(err, ProbeError::StaleElement { .. }));
    }

    #[tokio::test]
    async fn test_blank_target_opens_tab_for_subscribers() {
        let browser = MockBrowser::new(site());
        let page = first_page(&browser).await;
        page.navigate("http://app.test/").await.unwrap();
        let mut events = browser.subscribe_pages();
        let help = handle(&page, &ElementQuery::role("link", "Help")).await;
        page.click(&help).await.unwrap();
        let opened = events.try_recv().unwrap();
        assert_eq!(opened.opener.as_deref(), Some(page.id()));
        assert_eq!(opened.page.current_url().await.unwrap(), "http://app.test/help");
        assert_eq!(page.current_url().await.unwrap(), "http://app.test/");
    }

    #[tokio::test]
    async fn test_fill_survives_rerender_until_navigation() {
        let browser = MockBrowser::new(site());
        let page = first_page(&browser).await;
        page.navigate("http://app.test/").await.unwrap();
        let search = handle(&page, &ElementQuery::placeholder("Search")).await;
        page.fill(&search, "Apple").await.unwrap();
        assert_eq!(page.read_property(&search, "value").await.unwrap().as_deref(), Some("Apple"));
        page.navigate("http://app.test/").await.unwrap();
        let search = handle(&page, &ElementQuery::placeholder("Search")).await;
        assert_eq!(page.read_property(&search, "value").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_load_delay_reports_loading() {
        let browser = MockBrowser::new(site()).with_load_delay(Duration::from_secs(30));
        let page = first_page(&browser).await;
        page.navigate("http://app.test/").await.unwrap();
        assert_eq!(page.ready_state().await.unwrap(), ReadyState::Loading);
    }

    /// A report page whose Print button calls `window.print()`
    #[derive(Debug)]
    struct ReportSite;

    impl MockSite for ReportSite {
        fn render(&self, url: &str) -> Option<Document> {
            url.ends_with("/report")
                .then(|| Document::new(url, Node::element("body").child(Node::element("button").text("Print"))))
        }

        fn interact(&self, _url: &str, interaction: &Interaction) -> Response {
            match interaction {
                Interaction::Click { text, .. } if text == "Print" => Response::Print,
                _ => Response::Rerender,
            }
        }
    }

    async fn click_print(page: &MockPage) {
        let button = handle(page, &ElementQuery::role("button", "Print")).await;
        page.click(&button).await.unwrap();
    }

    #[tokio::test]
    async fn test_print_without_stub_opens_dialog() {
        let browser = MockBrowser::new(ReportSite);
        let page = first_page(&browser).await;
        page.navigate("http://app.test/report").await.unwrap();
        click_print(&page).await;
        assert!(page.was_called("print:dialog"));
        assert_eq!(page.evaluate(PRINT_REQUESTED_EXPR).await.unwrap(), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_session_print_stub_reaches_later_pages_and_resets_on_navigation() {
        let browser = MockBrowser::new(ReportSite);
        browser.add_init_script(PRINT_STUB_SCRIPT).await.unwrap();
        let page = first_page(&browser).await;
        page.navigate("http://app.test/report").await.unwrap();
        assert_eq!(page.evaluate(PRINT_REQUESTED_EXPR).await.unwrap(), serde_json::Value::Bool(false));
        click_print(&page).await;
        assert_eq!(page.evaluate(PRINT_REQUESTED_EXPR).await.unwrap(), serde_json::Value::Bool(true));
        page.navigate("http://app.test/report").await.unwrap();
        assert_eq!(page.evaluate(PRINT_REQUESTED_EXPR).await.unwrap(), serde_json::Value::Bool(false));
    }

    #[tokio::test]
    async fn test_page_init_script_waits_for_next_document() {
        let browser = MockBrowser::new(ReportSite);
        let page = first_page(&browser).await;
        page.navigate("http://app.test/report").await.unwrap();
        page.add_init_script(PRINT_STUB_SCRIPT).await.unwrap();
        assert_eq!(page.evaluate(PRINT_REQUESTED_EXPR).await.unwrap(), serde_json::Value::Null);
        page.navigate("http://app.test/report").await.unwrap();
        click_print(&page).await;
        assert_eq!(page.evaluate(PRINT_REQUESTED_EXPR).await.unwrap(), serde_json::Value::Bool(true));
    }

    #[tokio::test]
    async fn test_evaluate_known_expressions_only() {
        let browser = MockBrowser::new(site());
        let page = first_page(&browser).await;
        page.navigate("http://app.test/").await.unwrap();
        assert_eq!(page.evaluate("location.href").await.unwrap(), "http://app.test/");
        assert!(page.evaluate("1 + 1").await.is_err());
    }

    #[tokio::test]
    async fn test_closed_page_errors() {
        let browser = MockBrowser::new(site());
        let page = first_page(&browser).await;
        browser.close().await.unwrap();
        assert!(page.snapshot().await.is_err());
        assert!(page.was_called("close"));
    }
}
