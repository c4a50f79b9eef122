//! Chromium provider over the DevTools protocol.
//!
//! Snapshots are taken by serializing the live DOM in page script. Element
//! handles are child-index paths, so actions walk the same filtered child
//! lists the snapshot produced. Each document gets a random token on first
//! snapshot; a new token bumps the generation and invalidates old handles.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::target::{EventTargetCreated, TargetId};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::config::BrowserOptions;
use crate::dom::{Document, ReadyState};
use crate::driver::{BrowserSession, NavigationResponse, PageDriver, PageOpened, SessionFactory, PAGE_EVENT_CAPACITY};
use crate::locator::ElementHandle;
use crate::result::{ProbeError, ProbeResult};

/// Attempts to attach a freshly created target
const ATTACH_ATTEMPTS: usize = 20;
const ATTACH_INTERVAL: Duration = Duration::from_millis(50);

const KEEP_NODE: &str = "c => c.nodeType === 1 || c.nodeType === 3";

const SNAPSHOT_JS: &str = r#"(() => {
  if (!window.__liquiprobeDoc) window.__liquiprobeDoc = Math.random().toString(36).slice(2);
  const keep = KEEP;
  const ser = n => {
    if (n.nodeType === 3) return { tag: '#text', text: n.data };
    const attributes = {};
    for (const a of n.attributes) attributes[a.name] = a.value;
    const out = { tag: n.tagName.toLowerCase(), attributes, children: [], properties: {} };
    out.visible = typeof n.checkVisibility === 'function' ? n.checkVisibility() : n.getClientRects().length > 0;
    if (['INPUT', 'TEXTAREA', 'SELECT'].includes(n.tagName)) out.value = String(n.value);
    if (n.validationMessage) out.properties.validationMessage = n.validationMessage;
    for (const c of n.childNodes) if (keep(c)) out.children.push(ser(c));
    return out;
  };
  return {
    token: window.__liquiprobeDoc,
    document: { url: location.href, title: document.title, ready_state: document.readyState, root: ser(document.documentElement) }
  };
})()"#;

const NAVIGATION_STATUS_JS: &str =
    "(() => { const e = performance.getEntriesByType('navigation')[0]; return e && e.responseStatus ? e.responseStatus : null; })()";

// =============================================================================
// SESSION
// =============================================================================

/// One Chromium process with its pages
pub struct ChromiumSession {
    browser: Arc<Mutex<Browser>>,
    init_scripts: Arc<Mutex<Vec<String>>>,
    events: broadcast::Sender<PageOpened>,
    handler: JoinHandle<()>,
    listener: JoinHandle<()>,
}

impl fmt::Debug for ChromiumSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChromiumSession")
            .field("subscribers", &self.events.receiver_count())
            .finish_non_exhaustive()
    }
}

impl ChromiumSession {
    /// Launch Chromium
    pub async fn launch(options: &BrowserOptions) -> ProbeResult<Self> {
        let mut builder = BrowserConfig::builder();
        if !options.headless {
            builder = builder.with_head();
        }
        if !options.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(path) = &options.chromium_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(ProbeError::provider)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ProbeError::provider(format!("launching chromium: {e}")))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let created = browser
            .event_listener::<EventTargetCreated>()
            .await
            .map_err(|e| ProbeError::provider(e.to_string()))?;
        let browser = Arc::new(Mutex::new(browser));
        let init_scripts = Arc::new(Mutex::new(Vec::new()));
        let (events, _) = broadcast::channel(PAGE_EVENT_CAPACITY);
        let listener = tokio::spawn(forward_opened_pages(
            created,
            Arc::clone(&browser),
            Arc::clone(&init_scripts),
            events.clone(),
        ));
        tracing::info!(headless = options.headless, "chromium launched");

        Ok(Self {
            browser,
            init_scripts,
            events,
            handler,
            listener,
        })
    }
}

async fn forward_opened_pages(
    mut created: chromiumoxide::listeners::EventStream<EventTargetCreated>,
    browser: Arc<Mutex<Browser>>,
    init_scripts: Arc<Mutex<Vec<String>>>,
    events: broadcast::Sender<PageOpened>,
) {
    while let Some(event) = created.next().await {
        let info = &event.target_info;
        let Some(opener) = info.opener_id.as_ref() else {
            continue;
        };
        if info.r#type != "page" {
            continue;
        }
        match attach(&browser, info.target_id.clone()).await {
            Ok(page) => {
                let page = ChromiumPage::new(page);
                // The popup may have committed its document before it was
                // attached, so the scripts also run once in place.
                let scripts = init_scripts.lock().await.clone();
                for script in &scripts {
                    if let Err(err) = page.install(script, true).await {
                        tracing::warn!(page = %page.id, error = %err, "init script not installed");
                    }
                }
                let page: Arc<dyn PageDriver> = Arc::new(page);
                tracing::debug!(page = %page.id(), opener = %opener.inner(), "page opened");
                // No receiver means nobody is waiting for a new context.
                let _ = events.send(PageOpened {
                    page,
                    opener: Some(opener.inner().clone()),
                });
            }
            Err(err) => tracing::warn!(target = %info.target_id.inner(), error = %err, "could not attach new page"),
        }
    }
}

async fn attach(browser: &Mutex<Browser>, target: TargetId) -> ProbeResult<Page> {
    let mut last = None;
    for _ in 0..ATTACH_ATTEMPTS {
        match browser.lock().await.get_page(target.clone()).await {
            Ok(page) => return Ok(page),
            Err(err) => last = Some(err.to_string()),
        }
        tokio::time::sleep(ATTACH_INTERVAL).await;
    }
    Err(ProbeError::provider(last.unwrap_or_else(|| "target never attached".to_string())))
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_page(&self) -> ProbeResult<Arc<dyn PageDriver>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(|e| ProbeError::provider(e.to_string()))?;
        let page = ChromiumPage::new(page);
        for script in self.init_scripts.lock().await.iter() {
            page.install(script, false).await?;
        }
        Ok(Arc::new(page))
    }

    fn subscribe_pages(&self) -> broadcast::Receiver<PageOpened> {
        self.events.subscribe()
    }

    async fn add_init_script(&self, script: &str) -> ProbeResult<()> {
        self.init_scripts.lock().await.push(script.to_string());
        let pages = self
            .browser
            .lock()
            .await
            .pages()
            .await
            .map_err(|e| ProbeError::provider(e.to_string()))?;
        for page in pages {
            ChromiumPage::new(page).install(script, true).await?;
        }
        Ok(())
    }

    async fn close(&self) -> ProbeResult<()> {
        self.listener.abort();
        let closed = self.browser.lock().await.close().await;
        self.handler.abort();
        closed.map(|_| ()).map_err(|e| ProbeError::provider(e.to_string()))
    }
}

/// Launches one Chromium per session so sessions share nothing
#[derive(Debug, Clone, Default)]
pub struct ChromiumSessionFactory {
    options: BrowserOptions,
}

impl ChromiumSessionFactory {
    /// Factory with launch options
    #[must_use]
    pub const fn new(options: BrowserOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn open(&self) -> ProbeResult<Arc<dyn BrowserSession>> {
        Ok(Arc::new(ChromiumSession::launch(&self.options).await?))
    }
}

// =============================================================================
// PAGE
// =============================================================================

#[derive(Debug, Default)]
struct DocState {
    token: Option<String>,
    generation: u64,
}

#[derive(Deserialize)]
struct SnapshotReply {
    token: String,
    document: Document,
}

#[derive(Debug, Default, Deserialize)]
struct ElementReply {
    #[serde(default)]
    stale: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

/// One Chromium tab
pub struct ChromiumPage {
    id: String,
    page: Page,
    doc: Mutex<DocState>,
}

impl fmt::Debug for ChromiumPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChromiumPage").field("id", &self.id).finish_non_exhaustive()
    }
}

impl ChromiumPage {
    fn new(page: Page) -> Self {
        Self {
            id: page.target_id().inner().clone(),
            page,
            doc: Mutex::new(DocState::default()),
        }
    }

    async fn eval<T: DeserializeOwned>(&self, expression: String) -> ProbeResult<T> {
        let params = EvaluateParams::builder()
            .expression(expression)
            .await_promise(true)
            .return_by_value(true)
            .user_gesture(true)
            .build()
            .map_err(ProbeError::provider)?;
        let result = self
            .page
            .evaluate(params)
            .await
            .map_err(|e| ProbeError::provider(e.to_string()))?;
        result
            .into_value()
            .map_err(|e| ProbeError::provider(format!("decoding script result: {e}")))
    }

    /// Register `script` for new documents; with `now`, also run it in the
    /// current one
    async fn install(&self, script: &str, now: bool) -> ProbeResult<()> {
        self.page
            .evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(script))
            .await
            .map_err(|e| ProbeError::provider(format!("adding init script: {e}")))?;
        if now {
            self.eval::<serde_json::Value>(format!("(() => {{ {script} }})(), null")).await?;
        }
        Ok(())
    }

    /// Run `body` with `el` bound to the handle's element
    async fn on_element(&self, element: &ElementHandle, body: &str) -> ProbeResult<Option<String>> {
        let token = {
            let doc = self.doc.lock().await;
            if doc.generation != element.generation {
                return Err(stale(element));
            }
            doc.token.clone().unwrap_or_default()
        };
        let path = serde_json::to_string(&element.path)?;
        let token = serde_json::to_string(&token)?;
        let script = format!(
            "((path, token) => {{
  if (window.__liquiprobeDoc !== token) return {{ stale: true }};
  const keep = {KEEP_NODE};
  let el = document.documentElement;
  for (const i of path) {{
    el = Array.from(el.childNodes).filter(keep)[i];
    if (!el) return {{ stale: true }};
  }}
  {body}
}})({path}, {token})"
        );
        let reply: ElementReply = self.eval(script).await?;
        if reply.stale {
            return Err(stale(element));
        }
        if let Some(message) = reply.error {
            return Err(ProbeError::provider(message));
        }
        Ok(reply.value)
    }

    async fn dispatch_key(&self, key: &str) -> ProbeResult<()> {
        let (code, text, vk) = key_definition(key);
        for kind in [DispatchKeyEventType::KeyDown, DispatchKeyEventType::KeyUp] {
            let mut builder = DispatchKeyEventParams::builder()
                .r#type(kind.clone())
                .key(key)
                .code(code)
                .windows_virtual_key_code(vk);
            if matches!(kind, DispatchKeyEventType::KeyDown) {
                if let Some(text) = text {
                    builder = builder.text(text);
                }
            }
            let params = builder.build().map_err(ProbeError::provider)?;
            self.page
                .execute(params)
                .await
                .map_err(|e| ProbeError::provider(e.to_string()))?;
        }
        Ok(())
    }
}

fn stale(element: &ElementHandle) -> ProbeError {
    ProbeError::StaleElement {
        query: format!("{:?}", element.path),
    }
}

fn js_string(value: &str) -> ProbeResult<String> {
    Ok(serde_json::to_string(value)?)
}

/// `(code, text, windowsVirtualKeyCode)` for the keys scenarios press
fn key_definition(key: &str) -> (&str, Option<&'static str>, i64) {
    match key {
        "Enter" => ("Enter", Some("\r"), 13),
        "Tab" => ("Tab", None, 9),
        "Escape" => ("Escape", None, 27),
        "Backspace" => ("Backspace", None, 8),
        "ArrowDown" => ("ArrowDown", None, 40),
        "ArrowUp" => ("ArrowUp", None, 38),
        _ => (key, None, 0),
    }
}

#[async_trait]
impl PageDriver for ChromiumPage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn snapshot(&self) -> ProbeResult<Document> {
        let reply: SnapshotReply = self.eval(SNAPSHOT_JS.replace("KEEP", KEEP_NODE)).await?;
        let mut state = self.doc.lock().await;
        if state.token.as_deref() != Some(reply.token.as_str()) {
            state.generation += 1;
            state.token = Some(reply.token);
        }
        let mut document = reply.document;
        document.generation = state.generation;
        Ok(document)
    }

    async fn navigate(&self, url: &str) -> ProbeResult<NavigationResponse> {
        self.page.goto(url).await.map_err(|e| ProbeError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let status: Option<u16> = self.eval(NAVIGATION_STATUS_JS.to_string()).await?;
        let landed = self.current_url().await?;
        tracing::debug!(page = %self.id, url = %landed, ?status, "navigated");
        Ok(NavigationResponse::new(landed, status))
    }

    async fn current_url(&self) -> ProbeResult<String> {
        let url = self.page.url().await.map_err(|e| ProbeError::provider(e.to_string()))?;
        Ok(url.unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn ready_state(&self) -> ProbeResult<ReadyState> {
        self.eval("document.readyState".to_string()).await
    }

    async fn click(&self, element: &ElementHandle) -> ProbeResult<()> {
        self.on_element(element, "el.scrollIntoView({ block: 'center' }); el.click(); return {};")
            .await
            .map(|_| ())
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> ProbeResult<()> {
        let body = format!(
            "el.focus();
  const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
  const setter = Object.getOwnPropertyDescriptor(proto, 'value');
  if (setter && setter.set) setter.set.call(el, {v}); else el.value = {v};
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return {{}};",
            v = js_string(value)?
        );
        self.on_element(element, &body).await.map(|_| ())
    }

    async fn select_option(&self, element: &ElementHandle, option: &str) -> ProbeResult<()> {
        let body = format!(
            "const want = {o};
  const opt = Array.from(el.options || []).find(o => o.value === want || o.label.trim() === want || o.text.trim() === want);
  if (!opt) return {{ error: 'no option ' + want }};
  el.value = opt.value;
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return {{}};",
            o = js_string(option)?
        );
        self.on_element(element, &body).await.map(|_| ())
    }

    async fn press_key(&self, element: &ElementHandle, key: &str) -> ProbeResult<()> {
        self.on_element(element, "el.focus(); return {};").await?;
        self.dispatch_key(key).await
    }

    async fn read_property(&self, element: &ElementHandle, name: &str) -> ProbeResult<Option<String>> {
        let body = format!(
            "const v = el[{n}]; return {{ value: v === undefined || v === null ? null : String(v) }};",
            n = js_string(name)?
        );
        self.on_element(element, &body).await
    }

    async fn add_init_script(&self, script: &str) -> ProbeResult<()> {
        self.install(script, false).await
    }

    async fn evaluate(&self, expression: &str) -> ProbeResult<serde_json::Value> {
        // undefined has no by-value form
        let value: Option<serde_json::Value> =
            self.eval(format!("(() => {{ const v = ({expression}); return v === undefined ? null : v; }})()")).await?;
        Ok(value.unwrap_or_default())
    }

    async fn close(&self) -> ProbeResult<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| ProbeError::provider(e.to_string()))
    }
}
