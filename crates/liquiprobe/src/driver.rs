//! Browser-automation provider boundary.
//!
//! The engine never talks to a browser directly. It needs a small surface:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  SessionFactory ──open──▶ BrowserSession                     │
//! │                              │  new_page()                   │
//! │                              │  subscribe_pages() ──▶ PageOpened
//! │                              ▼                               │
//! │                          PageDriver                          │
//! │     snapshot · navigate · click · fill · select · press      │
//! │     add_init_script · evaluate                               │
//! ├──────────────────────────────────────────────────────────────┤
//! │  mock::MockBrowser (in-memory)   chromium::ChromiumSession   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Swapping providers never touches scenarios or oracles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::dom::{Document, ReadyState};
use crate::locator::ElementHandle;
use crate::result::ProbeResult;

/// Capacity of the new-page broadcast channel
pub const PAGE_EVENT_CAPACITY: usize = 16;

/// Init script replacing `window.print` with a recorder, so a print button
/// can be checked without a blocking print dialog
pub const PRINT_STUB_SCRIPT: &str =
    "window.__liquiprobePrintRequested = false; window.print = () => { window.__liquiprobePrintRequested = true; };";

/// `true` once the stubbed `window.print` ran in the current document,
/// `false` before, `undefined` when the stub is not installed
pub const PRINT_REQUESTED_EXPR: &str = "window.__liquiprobePrintRequested";

/// Main-frame response of a navigation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationResponse {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status, when the provider knows it
    pub status: Option<u16>,
}

impl NavigationResponse {
    /// Create a response record
    #[must_use]
    pub fn new(url: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            url: url.into(),
            status,
        }
    }

    /// Status is 2xx
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, Some(200..=299))
    }
}

/// One tab or window as seen by the provider
#[async_trait]
pub trait PageDriver: Send + Sync + fmt::Debug {
    /// Provider-assigned page id
    fn id(&self) -> &str;

    /// Fresh snapshot of the current document
    async fn snapshot(&self) -> ProbeResult<Document>;

    /// Navigate the main frame
    async fn navigate(&self, url: &str) -> ProbeResult<NavigationResponse>;

    /// Current URL
    async fn current_url(&self) -> ProbeResult<String>;

    /// Current loading state
    async fn ready_state(&self) -> ProbeResult<ReadyState>;

    /// Click the element
    async fn click(&self, element: &ElementHandle) -> ProbeResult<()>;

    /// Replace the element's value with `value`
    async fn fill(&self, element: &ElementHandle, value: &str) -> ProbeResult<()>;

    /// Select the option whose value or label is `option`
    async fn select_option(&self, element: &ElementHandle, option: &str) -> ProbeResult<()>;

    /// Press a named key (e.g. `Enter`) with the element focused
    async fn press_key(&self, element: &ElementHandle, key: &str) -> ProbeResult<()>;

    /// Read a live DOM property (e.g. `validationMessage`)
    async fn read_property(&self, element: &ElementHandle, name: &str) -> ProbeResult<Option<String>>;

    /// Run `script` at the start of every document this page loads from now
    /// on, before the page's own scripts
    async fn add_init_script(&self, script: &str) -> ProbeResult<()>;

    /// Evaluate a script expression in the current document. `undefined`
    /// comes back as `Null`.
    async fn evaluate(&self, expression: &str) -> ProbeResult<serde_json::Value>;

    /// Close the page
    async fn close(&self) -> ProbeResult<()>;
}

/// A page opened by another page (popup, `target=_blank`)
#[derive(Clone)]
pub struct PageOpened {
    /// The new page
    pub page: Arc<dyn PageDriver>,
    /// Id of the page that opened it
    pub opener: Option<String>,
}

impl fmt::Debug for PageOpened {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageOpened")
            .field("page", &self.page.id())
            .field("opener", &self.opener)
            .finish()
    }
}

/// One isolated browser session (its own cookies and pages)
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Open a fresh page
    async fn new_page(&self) -> ProbeResult<Arc<dyn PageDriver>>;

    /// Subscribe to pages opened from existing pages.
    ///
    /// Only events sent after this call are delivered.
    fn subscribe_pages(&self) -> broadcast::Receiver<PageOpened>;

    /// Install `script` on every page of the session, open now or opened
    /// later, before a [`PageOpened`] event for the page is sent
    async fn add_init_script(&self, script: &str) -> ProbeResult<()>;

    /// Close every page and the session
    async fn close(&self) -> ProbeResult<()>;
}

/// Produces one independent session per scenario worker
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a new session
    async fn open(&self) -> ProbeResult<Arc<dyn BrowserSession>>;
}

/// Resolve `href` against `base` (absolute, root-relative, or path-relative)
#[must_use]
pub fn join_url(base: &str, href: &str) -> String {
    if href.contains("://") || href.starts_with("about:") || href.starts_with("data:") {
        return href.to_string();
    }
    let Some((scheme, rest)) = base.split_once("://") else {
        return href.to_string();
    };
    if let Some(authority) = href.strip_prefix("//") {
        return format!("{scheme}://{authority}");
    }
    let host_end = rest.find('/').unwrap_or(rest.len());
    let origin = format!("{scheme}://{}", &rest[..host_end]);
    let path = &rest[host_end..];
    let path = path.split(['?', '#']).next().unwrap_or_default();
    if href.is_empty() {
        return base.to_string();
    }
    if href.starts_with('/') {
        return format!("{origin}{href}");
    }
    if href.starts_with('?') || href.starts_with('#') {
        return format!("{origin}{path}{href}");
    }
    let dir = path.rfind('/').map_or("/", |i| &path[..=i]);
    format!("{origin}{dir}{href}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://app.test", "/login"), "http://app.test/login");
        assert_eq!(join_url("http://app.test/a/b?x=1", "/c"), "http://app.test/c");
        assert_eq!(join_url("http://app.test/a/b", "c"), "http://app.test/a/c");
        assert_eq!(join_url("http://app.test/a/b", "?page=2"), "http://app.test/a/b?page=2");
        assert_eq!(join_url("http://app.test/a", "https://other.test/"), "https://other.test/");
        assert_eq!(join_url("http://app.test/a", "//cdn.test/x"), "http://cdn.test/x");
        assert_eq!(join_url("about:blank", "/x"), "/x");
    }

    #[test]
    fn test_print_stub_sets_the_flag_it_defines() {
        assert!(PRINT_STUB_SCRIPT.contains(PRINT_REQUESTED_EXPR));
        assert!(PRINT_STUB_SCRIPT.contains("window.print ="));
    }

    #[test]
    fn test_response_ok_range() {
        assert!(NavigationResponse::new("u", Some(200)).is_ok());
        assert!(NavigationResponse::new("u", Some(204)).is_ok());
        assert!(!NavigationResponse::new("u", Some(302)).is_ok());
        assert!(!NavigationResponse::new("u", Some(500)).is_ok());
        assert!(!NavigationResponse::new("u", None).is_ok());
    }
}
