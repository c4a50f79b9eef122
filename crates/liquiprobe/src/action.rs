//! Single user-intent actions.
//!
//! [`ActionExecutor::perform`] resolves a query to exactly one element, checks
//! that it can be interacted with, and performs one action. It never waits for
//! the consequence; that is the poller's job.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::context::PageContext;
use crate::dom::{normalize_ws, Document, Node};
use crate::locator::{ElementQuery, ResolvedElement};
use crate::result::{ProbeError, ProbeResult};

/// What to do to the element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Replace the value of a text control
    Fill,
    /// Click
    Click,
    /// Choose an option of a `select` by value or label
    SelectOption,
    /// Press a key with the element focused
    PressKey,
}

impl ActionKind {
    /// Does this action take a value?
    #[must_use]
    pub const fn needs_value(self) -> bool {
        !matches!(self, Self::Click)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fill => "fill",
            Self::Click => "click",
            Self::SelectOption => "select",
            Self::PressKey => "press",
        })
    }
}

/// Performs actions against a page context
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionExecutor;

impl ActionExecutor {
    /// Perform one action on the single element matching `query`
    pub async fn perform(
        page: &PageContext,
        query: &ElementQuery,
        kind: ActionKind,
        value: Option<&str>,
    ) -> ProbeResult<()> {
        let value = match (kind.needs_value(), value) {
            (true, None) => {
                return Err(ProbeError::Scenario {
                    message: format!("{kind} on {query} needs a value"),
                })
            }
            (_, value) => value.unwrap_or_default(),
        };

        let doc = page.snapshot().await?;
        let element = page.resolve_one(&doc, query)?;
        check_actionable(&doc, &element, query, kind, value)?;

        tracing::debug!(context = %page.id(), action = %kind, %query, target = %element.description, "performing action");
        let driver = page.driver();
        match kind {
            ActionKind::Click => driver.click(&element.handle).await,
            ActionKind::Fill => driver.fill(&element.handle, value).await,
            ActionKind::SelectOption => driver.select_option(&element.handle, value).await,
            ActionKind::PressKey => driver.press_key(&element.handle, value).await,
        }
    }

    /// [`Self::perform`] bounded by `timeout`
    pub async fn perform_within(
        page: &PageContext,
        query: &ElementQuery,
        kind: ActionKind,
        value: Option<&str>,
        timeout: Duration,
    ) -> ProbeResult<()> {
        tokio::time::timeout(timeout, Self::perform(page, query, kind, value))
            .await
            .map_err(|_| ProbeError::Timeout {
                waited_for: format!("{kind} on {query}"),
                elapsed_ms: timeout.as_millis() as u64,
                last_observation: None,
            })?
    }
}

fn check_actionable(
    doc: &Document,
    element: &ResolvedElement,
    query: &ElementQuery,
    kind: ActionKind,
    value: &str,
) -> ProbeResult<()> {
    let reject = |reason: String| ProbeError::NotActionable {
        query: query.to_string(),
        reason,
    };
    if !element.visible {
        return Err(reject(format!("{} is not visible", element.description)));
    }
    if element.disabled {
        return Err(reject(format!("{} is disabled", element.description)));
    }
    let Some(node) = doc.node(&element.handle.path) else {
        return Err(ProbeError::StaleElement {
            query: query.to_string(),
        });
    };
    match kind {
        ActionKind::Fill if !is_editable(node) => Err(reject(format!("{} is not editable", element.description))),
        ActionKind::SelectOption if node.tag != "select" => {
            Err(reject(format!("{} is not a select", element.description)))
        }
        ActionKind::SelectOption if !has_option(node, value) => {
            Err(reject(format!("{} has no option {value:?}", element.description)))
        }
        _ => Ok(()),
    }
}

fn is_editable(node: &Node) -> bool {
    if node.has_attr("readonly") {
        return false;
    }
    match node.tag.as_str() {
        "textarea" => true,
        "input" => !matches!(
            node.get_attr("type").unwrap_or("text"),
            "button" | "submit" | "reset" | "image" | "checkbox" | "radio" | "hidden" | "file"
        ),
        _ => node.get_attr("contenteditable").is_some_and(|v| v != "false"),
    }
}

fn has_option(select: &Node, wanted: &str) -> bool {
    select
        .descendant_options()
        .iter()
        .any(|o| o.option_value() == wanted || normalize_ws(&o.text_content()) == wanted)
}
