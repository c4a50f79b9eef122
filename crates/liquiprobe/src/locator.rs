//! Locator resolution for element selection.
//!
//! An [`ElementQuery`] says *how* to find an element; the [`Resolver`] turns it
//! into zero or more [`ResolvedElement`]s against one [`Document`] snapshot.
//!
//! # Design Philosophy
//!
//! - **Semantic first**: role, label and placeholder queries follow
//!   accessible-name rules so tests survive markup churn
//! - **No error on zero matches**: callers decide whether empty is acceptable
//! - **Structural paths are debt**: every use is counted and logged so the
//!   brittle ones are easy to find and replace

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::dom::{normalize_ws, Document, Node, NodePath};
use crate::result::{ProbeError, ProbeResult};

/// How to find an element. Exactly one strategy per query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum ElementQuery {
    /// ARIA role (explicit or implicit) plus optional accessible name
    Role {
        /// Role name, e.g. `button`
        role: String,
        /// Accessible name filter
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Whole-string match instead of substring
        #[serde(default)]
        exact: bool,
    },
    /// Form control associated with a label
    Label {
        /// Label text
        text: String,
        /// Whole-string match
        #[serde(default)]
        exact: bool,
    },
    /// Element with a matching `placeholder` attribute
    Placeholder {
        /// Placeholder text
        text: String,
        /// Whole-string match
        #[serde(default)]
        exact: bool,
    },
    /// Innermost element whose text matches
    Text {
        /// Text to match
        text: String,
        /// Whole-string match
        #[serde(default)]
        exact: bool,
    },
    /// Positional path (XPath subset). Last resort.
    #[serde(rename = "path")]
    StructuralPath {
        /// Path expression, e.g. `//*[@id="table-body"]/tr[1]/td[5]`
        path: String,
    },
    /// Element whose attribute equals a value
    Attribute {
        /// Attribute name
        name: String,
        /// Exact value
        value: String,
    },
}

impl ElementQuery {
    /// Role query with a substring name match
    #[must_use]
    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: Some(name.into()),
            exact: false,
        }
    }

    /// Role query with an exact name match
    #[must_use]
    pub fn role_exact(role: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: Some(name.into()),
            exact: true,
        }
    }

    /// Any element with the role
    #[must_use]
    pub fn any_role(role: impl Into<String>) -> Self {
        Self::Role {
            role: role.into(),
            name: None,
            exact: false,
        }
    }

    /// Label query
    #[must_use]
    pub fn label(text: impl Into<String>) -> Self {
        Self::Label {
            text: text.into(),
            exact: false,
        }
    }

    /// Placeholder query
    #[must_use]
    pub fn placeholder(text: impl Into<String>) -> Self {
        Self::Placeholder {
            text: text.into(),
            exact: false,
        }
    }

    /// Substring text query
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            exact: false,
        }
    }

    /// Exact text query
    #[must_use]
    pub fn text_exact(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            exact: true,
        }
    }

    /// Structural path query
    #[must_use]
    pub fn path(path: impl Into<String>) -> Self {
        Self::StructuralPath { path: path.into() }
    }

    /// Attribute equality query
    #[must_use]
    pub fn attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Attribute {
            name: name.into(),
            value: value.into(),
        }
    }

    /// `id` attribute query
    #[must_use]
    pub fn id(id: impl Into<String>) -> Self {
        Self::attribute("id", id)
    }

    /// Uses a structural path
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::StructuralPath { .. })
    }

    /// Apply `f` to every user-supplied string (used for `${var}` expansion)
    pub fn try_map_text<E>(&self, mut f: impl FnMut(&str) -> Result<String, E>) -> Result<Self, E> {
        Ok(match self {
            Self::Role { role, name, exact } => Self::Role {
                role: role.clone(),
                name: name.as_deref().map(&mut f).transpose()?,
                exact: *exact,
            },
            Self::Label { text, exact } => Self::Label {
                text: f(text)?,
                exact: *exact,
            },
            Self::Placeholder { text, exact } => Self::Placeholder {
                text: f(text)?,
                exact: *exact,
            },
            Self::Text { text, exact } => Self::Text {
                text: f(text)?,
                exact: *exact,
            },
            Self::StructuralPath { path } => Self::StructuralPath { path: f(path)? },
            Self::Attribute { name, value } => Self::Attribute {
                name: name.clone(),
                value: f(value)?,
            },
        })
    }
}

impl fmt::Display for ElementQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Role { role, name: Some(name), exact } => {
                write!(f, "role={role}[name={name:?}{}]", if *exact { " exact" } else { "" })
            }
            Self::Role { role, name: None, .. } => write!(f, "role={role}"),
            Self::Label { text, .. } => write!(f, "label={text:?}"),
            Self::Placeholder { text, .. } => write!(f, "placeholder={text:?}"),
            Self::Text { text, .. } => write!(f, "text={text:?}"),
            Self::StructuralPath { path } => write!(f, "path={path}"),
            Self::Attribute { name, value } => write!(f, "[{name}={value:?}]"),
        }
    }
}

/// Opaque pointer into one document generation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementHandle {
    /// Child-index path from the root
    pub path: NodePath,
    /// Generation of the document the path was resolved against
    pub generation: u64,
}

/// A matched element with a cached description of its state at resolve time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedElement {
    /// Handle for provider actions
    pub handle: ElementHandle,
    /// Lowercase tag
    pub tag: String,
    /// Short human description, e.g. `<button> "Log in"`
    pub description: String,
    /// Rendered at resolve time
    pub visible: bool,
    /// Disabled at resolve time
    pub disabled: bool,
}

impl ResolvedElement {
    fn from_node(doc: &Document, path: NodePath, node: &Node) -> Self {
        let text = normalize_ws(&node.text_content());
        let mut description = format!("<{}>", node.tag);
        if let Some(id) = node.get_attr("id") {
            description.push_str(&format!("#{id}"));
        }
        if !text.is_empty() {
            let short: String = text.chars().take(40).collect();
            description.push_str(&format!(" {short:?}"));
        }
        Self {
            visible: doc.is_visible(&path),
            disabled: doc.is_disabled(&path),
            handle: ElementHandle {
                path,
                generation: doc.generation,
            },
            tag: node.tag.clone(),
            description,
        }
    }
}

/// How often one structural path has been resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralDebt {
    /// The path expression
    pub path: String,
    /// Resolution count
    pub uses: usize,
}

/// Resolves queries against document snapshots
#[derive(Debug, Default)]
pub struct Resolver {
    structural: Mutex<BTreeMap<String, usize>>,
}

impl Resolver {
    /// Create a resolver with empty diagnostics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All matches for `query` in document order. Zero matches is `Ok(vec![])`.
    pub fn resolve(&self, doc: &Document, query: &ElementQuery) -> ProbeResult<Vec<ResolvedElement>> {
        self.resolve_in(doc, &[], query)
    }

    /// Matches restricted to the subtree below `scope`
    pub fn resolve_within(
        &self,
        doc: &Document,
        scope: &ResolvedElement,
        query: &ElementQuery,
    ) -> ProbeResult<Vec<ResolvedElement>> {
        if scope.handle.generation != doc.generation {
            return Err(ProbeError::StaleElement {
                query: scope.description.clone(),
            });
        }
        self.resolve_in(doc, &scope.handle.path, query)
    }

    /// Structural paths used so far, most used first
    #[must_use]
    pub fn structural_debt(&self) -> Vec<StructuralDebt> {
        let map = self.structural.lock().unwrap_or_else(PoisonError::into_inner);
        let mut debt: Vec<_> = map
            .iter()
            .map(|(path, uses)| StructuralDebt {
                path: path.clone(),
                uses: *uses,
            })
            .collect();
        debt.sort_by(|a, b| b.uses.cmp(&a.uses).then_with(|| a.path.cmp(&b.path)));
        debt
    }

    fn resolve_in(
        &self,
        doc: &Document,
        scope: &[usize],
        query: &ElementQuery,
    ) -> ProbeResult<Vec<ResolvedElement>> {
        if let ElementQuery::StructuralPath { path } = query {
            self.record_structural(path);
            let steps = parse_path(path)?;
            let start = if scope.is_empty() { None } else { Some(scope.to_vec()) };
            return Ok(eval_path(doc, &steps, start)
                .into_iter()
                .filter_map(|p| doc.node(&p).map(|n| ResolvedElement::from_node(doc, p.clone(), n)))
                .collect());
        }

        let candidates = if scope.is_empty() {
            doc.elements()
        } else {
            doc.descendants(scope)
        };
        let mut matched: Vec<(NodePath, &Node)> = candidates
            .into_iter()
            .filter(|(path, node)| matches_query(doc, path, node, query))
            .collect();

        if matches!(query, ElementQuery::Text { .. }) {
            // keep innermost: drop any match that has a matching descendant
            let paths: Vec<NodePath> = matched.iter().map(|(p, _)| p.clone()).collect();
            matched.retain(|(p, _)| !paths.iter().any(|q| q.len() > p.len() && q.starts_with(p)));
        }

        Ok(matched
            .into_iter()
            .map(|(p, n)| ResolvedElement::from_node(doc, p, n))
            .collect())
    }

    fn record_structural(&self, path: &str) {
        let mut map = self.structural.lock().unwrap_or_else(PoisonError::into_inner);
        let uses = map.entry(path.to_string()).or_insert(0);
        if *uses == 0 {
            tracing::warn!(path, "structural path locator in use; prefer a role, label or placeholder query");
        }
        *uses += 1;
    }
}

fn matches_query(doc: &Document, path: &[usize], node: &Node, query: &ElementQuery) -> bool {
    match query {
        ElementQuery::Role { role, name, exact } => {
            element_role(node).is_some_and(|r| r.eq_ignore_ascii_case(role))
                && name
                    .as_ref()
                    .map_or(true, |n| text_matches(&accessible_name(doc, path, node), n, *exact))
        }
        ElementQuery::Label { text, exact } => label_texts(doc, path, node)
            .iter()
            .any(|l| text_matches(l, text, *exact)),
        ElementQuery::Placeholder { text, exact } => node
            .get_attr("placeholder")
            .is_some_and(|p| text_matches(p, text, *exact)),
        ElementQuery::Text { text, exact } => {
            !NON_RENDERED.contains(&node.tag.as_str()) && text_matches(&own_text(node), text, *exact)
        }
        ElementQuery::Attribute { name, value } => node.get_attr(name) == Some(value.as_str()),
        ElementQuery::StructuralPath { .. } => false,
    }
}

const NON_RENDERED: &[&str] = &["head", "script", "style", "title", "template", "noscript"];

fn own_text(node: &Node) -> String {
    if node.tag == "input" && matches!(node.get_attr("type"), Some("button" | "submit" | "reset")) {
        return node.get_attr("value").unwrap_or_default().to_string();
    }
    normalize_ws(&node.text_content())
}

/// Whitespace-insensitive match; case-insensitive substring unless `exact`
#[must_use]
pub fn text_matches(candidate: &str, wanted: &str, exact: bool) -> bool {
    let candidate = normalize_ws(candidate);
    let wanted = normalize_ws(wanted);
    if exact {
        candidate == wanted
    } else {
        candidate.to_lowercase().contains(&wanted.to_lowercase())
    }
}

/// Explicit `role` attribute (first token) or the tag's implicit ARIA role
#[must_use]
pub fn element_role(node: &Node) -> Option<String> {
    if let Some(explicit) = node.get_attr("role").and_then(|r| r.split_whitespace().next()) {
        return Some(explicit.to_ascii_lowercase());
    }
    implicit_role(node).map(str::to_string)
}

fn implicit_role(node: &Node) -> Option<&'static str> {
    let role = match node.tag.as_str() {
        "button" => "button",
        "a" | "area" if node.has_attr("href") => "link",
        "input" => match node.get_attr("type").unwrap_or("text").to_ascii_lowercase().as_str() {
            "button" | "submit" | "reset" | "image" => "button",
            "checkbox" => "checkbox",
            "radio" => "radio",
            "search" => "searchbox",
            "number" => "spinbutton",
            "range" => "slider",
            "text" | "email" | "tel" | "url" | "" => "textbox",
            _ => return None,
        },
        "textarea" => "textbox",
        "select" if node.has_attr("multiple") => "listbox",
        "select" => "combobox",
        "option" => "option",
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
        "table" => "table",
        "tr" => "row",
        "td" => "cell",
        "th" => "columnheader",
        "thead" | "tbody" | "tfoot" => "rowgroup",
        "ul" | "ol" => "list",
        "li" => "listitem",
        "img" if node.get_attr("alt").is_some_and(|a| !a.is_empty()) => "img",
        "nav" => "navigation",
        "main" => "main",
        "form" => "form",
        "dialog" => "dialog",
        _ => return None,
    };
    Some(role)
}

fn is_labelable(node: &Node) -> bool {
    match node.tag.as_str() {
        "select" | "textarea" | "button" | "meter" | "output" | "progress" => true,
        "input" => node.get_attr("type") != Some("hidden"),
        _ => false,
    }
}

/// Texts that label `node`: aria-labelledby, aria-label, `<label for>` and wrapping `<label>`
fn label_texts(doc: &Document, path: &[usize], node: &Node) -> Vec<String> {
    let mut labels = Vec::new();
    if let Some(ids) = node.get_attr("aria-labelledby") {
        let joined = ids
            .split_whitespace()
            .filter_map(|id| doc.find_by_id(id).and_then(|p| doc.text_of(&p)))
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            labels.push(joined);
        }
    }
    if let Some(label) = node.get_attr("aria-label").filter(|l| !l.trim().is_empty()) {
        labels.push(normalize_ws(label));
    }
    if is_labelable(node) {
        if let Some(id) = node.get_attr("id") {
            labels.extend(
                doc.elements()
                    .into_iter()
                    .filter(|(_, n)| n.tag == "label" && n.get_attr("for") == Some(id))
                    .map(|(_, n)| normalize_ws(&n.text_content())),
            );
        }
        if let Some((_, wrapping)) = doc.ancestors(path).find(|(_, n)| n.tag == "label") {
            labels.push(normalize_ws(&wrapping.text_content()));
        }
    }
    labels.retain(|l| !l.is_empty());
    labels
}

/// Accessible name, following the usual precedence
#[must_use]
pub fn accessible_name(doc: &Document, path: &[usize], node: &Node) -> String {
    if let Some(first) = label_texts(doc, path, node).into_iter().next() {
        return first;
    }
    let role = element_role(node);
    let from_content = matches!(
        role.as_deref(),
        Some(
            "button" | "link" | "heading" | "cell" | "columnheader" | "row" | "listitem" | "option"
                | "tab" | "menuitem" | "checkbox" | "radio"
        )
    );
    if node.tag == "input" {
        if let Some(value) = node
            .get_attr("value")
            .filter(|_| role.as_deref() == Some("button"))
        {
            return normalize_ws(value);
        }
    }
    if from_content {
        let text = normalize_ws(&node.text_content());
        if !text.is_empty() {
            return text;
        }
    }
    ["title", "placeholder", "alt"]
        .iter()
        .find_map(|a| node.get_attr(a).filter(|v| !v.trim().is_empty()))
        .map(normalize_ws)
        .unwrap_or_default()
}

// =============================================================================
// Structural paths
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Position(usize),
    Attribute(String, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    /// Lowercase tag, or `*`
    test: String,
    predicates: Vec<Predicate>,
}

fn parse_path(path: &str) -> ProbeResult<Vec<Step>> {
    let invalid = |message: &str| ProbeError::InvalidPath {
        path: path.to_string(),
        message: message.to_string(),
    };
    let chars: Vec<char> = path.trim().chars().collect();
    if chars.first() != Some(&'/') {
        return Err(invalid("must start with '/' or '//'"));
    }

    let mut steps = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let axis = if chars.get(i + 1) == Some(&'/') {
            i += 2;
            Axis::Descendant
        } else {
            i += 1;
            Axis::Child
        };
        let start = i;
        while i < chars.len() && chars[i] != '/' && chars[i] != '[' {
            i += 1;
        }
        let test: String = chars[start..i].iter().collect::<String>().trim().to_ascii_lowercase();
        if test.is_empty() {
            return Err(invalid("empty step"));
        }
        if test != "*" && !test.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(invalid("unsupported node test"));
        }

        let mut predicates = Vec::new();
        while chars.get(i) == Some(&'[') {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ']')
                .map(|off| i + off)
                .ok_or_else(|| invalid("unterminated predicate"))?;
            let body: String = chars[i + 1..close].iter().collect();
            predicates.push(parse_predicate(body.trim()).ok_or_else(|| invalid("unsupported predicate"))?);
            i = close + 1;
        }
        if i < chars.len() && chars[i] != '/' {
            return Err(invalid("unexpected character after predicate"));
        }
        steps.push(Step { axis, test, predicates });
    }
    Ok(steps)
}

fn parse_predicate(body: &str) -> Option<Predicate> {
    if let Ok(n) = body.parse::<usize>() {
        return (n >= 1).then_some(Predicate::Position(n));
    }
    let rest = body.strip_prefix('@')?;
    let (name, value) = rest.split_once('=')?;
    let value = value.trim();
    let quote = value.chars().next()?;
    if !(quote == '"' || quote == '\'') || !value.ends_with(quote) || value.len() < 2 {
        return None;
    }
    Some(Predicate::Attribute(
        name.trim().to_string(),
        value[1..value.len() - 1].to_string(),
    ))
}

/// `None` stands for the document node above the root element
fn eval_path(doc: &Document, steps: &[Step], start: Option<NodePath>) -> Vec<NodePath> {
    let mut context: Vec<Option<NodePath>> = vec![start];
    for step in steps {
        let mut next: Vec<NodePath> = Vec::new();
        for ctx in &context {
            let parents: Vec<Option<NodePath>> = match step.axis {
                Axis::Child => vec![ctx.clone()],
                Axis::Descendant => {
                    let mut all = vec![ctx.clone()];
                    let below = match ctx {
                        None => doc.elements(),
                        Some(p) => doc.descendants(p),
                    };
                    all.extend(below.into_iter().map(|(p, _)| Some(p)));
                    all
                }
            };
            for parent in parents {
                next.extend(apply_step(doc, parent.as_deref(), step));
            }
        }
        next.sort();
        next.dedup();
        context = next.into_iter().map(Some).collect();
    }
    context.into_iter().flatten().collect()
}

fn apply_step(doc: &Document, parent: Option<&[usize]>, step: &Step) -> Vec<NodePath> {
    let mut candidates: Vec<NodePath> = match parent {
        None => vec![Vec::new()],
        Some(p) => doc
            .node(p)
            .map(|n| {
                n.element_children()
                    .map(|(i, _)| {
                        let mut path = p.to_vec();
                        path.push(i);
                        path
                    })
                    .collect()
            })
            .unwrap_or_default(),
    };
    candidates.retain(|p| {
        doc.node(p)
            .is_some_and(|n| step.test == "*" || n.tag == step.test)
    });
    for predicate in &step.predicates {
        candidates = match predicate {
            Predicate::Position(n) => candidates.get(n - 1).cloned().into_iter().collect(),
            Predicate::Attribute(name, value) => candidates
                .into_iter()
                .filter(|p| doc.node(p).and_then(|n| n.get_attr(name)) == Some(value.as_str()))
                .collect(),
        };
    }
    candidates
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn login_page() -> Document {
        Document::new(
            "http://app.test/login",
            Node::element("body").child(
                Node::element("form")
                    .child(Node::element("label").attr("for", "email").text("Email"))
                    .child(Node::element("input").attr("id", "email").attr("type", "email"))
                    .child(
                        Node::element("label")
                            .text("Password")
                            .child(Node::element("input").attr("type", "password")),
                    )
                    .child(Node::element("input").attr("placeholder", "Search..."))
                    .child(Node::element("button").attr("type", "submit").text(" Log in "))
                    .child(Node::element("a").attr("href", "/forgot").text("Forgot your password?"))
                    .child(Node::element("span").attr("aria-label", "Close alert").text("x")),
            ),
        )
    }

    fn table_page() -> Document {
        let row = |name: &str, amount: &str| {
            Node::element("tr")
                .child(Node::element("td").text("1"))
                .child(Node::element("td").text(name))
                .child(Node::element("td").text(amount))
        };
        Document::new(
            "http://app.test/sdo",
            Node::element("html").child(
                Node::element("body").child(
                    Node::element("table").child(
                        Node::element("tbody")
                            .attr("id", "table-body")
                            .child(row("Juan Dela Cruz", "₱1,000.00"))
                            .child(row("Maria Clara", "₱2,500.00")),
                    ),
                ),
            ),
        )
    }

    mod query_tests {
        use super::*;

        #[test]
        fn test_display_names_strategy() {
            assert_eq!(ElementQuery::role("button", "Log in").to_string(), "role=button[name=\"Log in\"]");
            assert_eq!(ElementQuery::id("x").to_string(), "[id=\"x\"]");
            assert_eq!(ElementQuery::path("//tr[1]").to_string(), "path=//tr[1]");
        }

        #[test]
        fn test_yaml_shape() {
            let q: ElementQuery = serde_yaml_ng::from_str("by: role\nrole: button\nname: Log in\n").unwrap();
            assert_eq!(q, ElementQuery::role("button", "Log in"));
            let q: ElementQuery = serde_yaml_ng::from_str("by: path\npath: //tr[1]\n").unwrap();
            assert!(q.is_structural());
        }

        #[test]
        fn test_try_map_text_rewrites_values_only() {
            let q = ElementQuery::attribute("data-name", "${who}");
            let mapped = q
                .try_map_text(|s| Ok::<_, ()>(s.replace("${who}", "Juan")))
                .unwrap();
            assert_eq!(mapped, ElementQuery::attribute("data-name", "Juan"));
        }
    }

    mod role_tests {
        use super::*;

        #[test]
        fn test_button_by_role_and_name() {
            let doc = login_page();
            let found = Resolver::new().resolve(&doc, &ElementQuery::role("button", "log in")).unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].tag, "button");
            assert!(found[0].description.contains("Log in"));
        }

        #[test]
        fn test_exact_name_rejects_substring() {
            let doc = login_page();
            let r = Resolver::new();
            assert!(r.resolve(&doc, &ElementQuery::role_exact("button", "Log")).unwrap().is_empty());
            assert_eq!(r.resolve(&doc, &ElementQuery::role_exact("button", "Log in")).unwrap().len(), 1);
        }

        #[test]
        fn test_link_requires_href() {
            let doc = login_page();
            let links = Resolver::new().resolve(&doc, &ElementQuery::any_role("link")).unwrap();
            assert_eq!(links.len(), 1);
        }

        #[test]
        fn test_textbox_role_excludes_password() {
            let doc = login_page();
            let boxes = Resolver::new().resolve(&doc, &ElementQuery::any_role("textbox")).unwrap();
            assert_eq!(boxes.len(), 2);
        }

        #[test]
        fn test_explicit_role_wins() {
            let node = Node::element("div").attr("role", "alert dialog");
            assert_eq!(element_role(&node).as_deref(), Some("alert"));
        }

        #[test]
        fn test_aria_label_names_element() {
            let doc = login_page();
            let n = doc.node(&[0, 6]).unwrap();
            assert_eq!(accessible_name(&doc, &[0, 6], n), "Close alert");
        }
    }

    mod label_tests {
        use super::*;

        #[test]
        fn test_label_for_and_wrapping_label() {
            let doc = login_page();
            let r = Resolver::new();
            let email = r.resolve(&doc, &ElementQuery::label("Email")).unwrap();
            assert_eq!(email.len(), 1);
            assert_eq!(email[0].tag, "input");
            let password = r.resolve(&doc, &ElementQuery::label("Password")).unwrap();
            assert_eq!(password.len(), 1);
            assert_eq!(password[0].handle.path, vec![0, 2, 1]);
        }

        #[test]
        fn test_placeholder() {
            let doc = login_page();
            let found = Resolver::new().resolve(&doc, &ElementQuery::placeholder("Search...")).unwrap();
            assert_eq!(found.len(), 1);
        }

        #[test]
        fn test_zero_matches_is_not_an_error() {
            let doc = login_page();
            let found = Resolver::new().resolve(&doc, &ElementQuery::label("Nope")).unwrap();
            assert!(found.is_empty());
        }
    }

    mod text_tests {
        use super::*;

        #[test]
        fn test_text_returns_innermost_match() {
            let doc = login_page();
            let found = Resolver::new().resolve(&doc, &ElementQuery::text("Forgot")).unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].tag, "a");
        }

        #[test]
        fn test_exact_text() {
            let doc = table_page();
            let r = Resolver::new();
            assert_eq!(r.resolve(&doc, &ElementQuery::text_exact("Maria Clara")).unwrap().len(), 1);
            assert!(r.resolve(&doc, &ElementQuery::text_exact("Maria")).unwrap().is_empty());
        }

        #[test]
        fn test_matches_are_in_document_order() {
            let doc = table_page();
            let cells = Resolver::new().resolve(&doc, &ElementQuery::any_role("cell")).unwrap();
            assert_eq!(cells.len(), 6);
            assert!(cells.windows(2).all(|w| w[0].handle.path < w[1].handle.path));
        }
    }

    mod path_tests {
        use super::*;

        #[test]
        fn test_id_anchored_path() {
            let doc = table_page();
            let r = Resolver::new();
            let found = r
                .resolve(&doc, &ElementQuery::path(r#"//*[@id="table-body"]/tr[2]/td[2]"#))
                .unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(doc.text_of(&found[0].handle.path).unwrap(), "Maria Clara");
        }

        #[test]
        fn test_absolute_path() {
            let doc = table_page();
            let found = Resolver::new()
                .resolve(&doc, &ElementQuery::path("/html/body/table/tbody/tr"))
                .unwrap();
            assert_eq!(found.len(), 2);
        }

        #[test]
        fn test_descendant_position_is_per_parent() {
            let doc = table_page();
            let found = Resolver::new().resolve(&doc, &ElementQuery::path("//td[1]")).unwrap();
            assert_eq!(found.len(), 2);
        }

        #[test]
        fn test_structural_use_is_recorded_as_debt() {
            let doc = table_page();
            let r = Resolver::new();
            r.resolve(&doc, &ElementQuery::path("//tr")).unwrap();
            r.resolve(&doc, &ElementQuery::path("//tr")).unwrap();
            r.resolve(&doc, &ElementQuery::any_role("row")).unwrap();
            let debt = r.structural_debt();
            assert_eq!(debt, vec![StructuralDebt { path: "//tr".into(), uses: 2 }]);
        }

        #[test]
        fn test_invalid_paths() {
            let doc = table_page();
            let r = Resolver::new();
            for bad in ["tr", "//tr[", "//tr[0]", "//tr[contains(.,'x')]", "//"] {
                let err = r.resolve(&doc, &ElementQuery::path(bad)).unwrap_err();
                assert!(matches!(err, ProbeError::InvalidPath { .. }), "{bad}");
            }
        }

        #[test]
        fn test_resolve_within_scope() {
            let doc = table_page();
            let r = Resolver::new();
            let rows = r.resolve(&doc, &ElementQuery::any_role("row")).unwrap();
            let cells = r.resolve_within(&doc, &rows[1], &ElementQuery::any_role("cell")).unwrap();
            assert_eq!(cells.len(), 3);
            let relative = r.resolve_within(&doc, &rows[1], &ElementQuery::path("/td[3]")).unwrap();
            assert_eq!(doc.text_of(&relative[0].handle.path).unwrap(), "₱2,500.00");
        }

        #[test]
        fn test_resolve_within_rejects_stale_scope() {
            let doc = table_page();
            let r = Resolver::new();
            let rows = r.resolve(&doc, &ElementQuery::any_role("row")).unwrap();
            let next = doc.clone().with_generation(1);
            let err = r.resolve_within(&next, &rows[0], &ElementQuery::any_role("cell")).unwrap_err();
            assert!(matches!(err, ProbeError::StaleElement { .. }));
        }
    }
}
