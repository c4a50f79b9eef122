//! Document snapshot model.
//!
//! Providers hand the engine a [`Document`]: an owned, point-in-time copy of
//! one page's element tree. Every probe takes a fresh snapshot, so nothing in
//! this module is ever mutated by the engine itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag used for text nodes
pub const TEXT_TAG: &str = "#text";

/// Path from the document root to a node, as child indices
pub type NodePath = Vec<usize>;

/// Document loading state as reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    /// Still parsing
    #[default]
    Loading,
    /// DOM parsed, subresources pending
    Interactive,
    /// Fully loaded
    Complete,
}

impl ReadyState {
    /// DOM is usable (interactive or complete)
    #[must_use]
    pub const fn is_loaded(self) -> bool {
        matches!(self, Self::Interactive | Self::Complete)
    }
}

/// A snapshot of one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Current URL
    pub url: String,
    /// Document title
    #[serde(default)]
    pub title: String,
    /// Loading state
    #[serde(default)]
    pub ready_state: ReadyState,
    /// Bumped on every navigation; handles from older generations are stale
    #[serde(default)]
    pub generation: u64,
    /// Root element (usually `html` or `body`)
    pub root: Node,
}

/// One element or text node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Lowercase tag name, or `#text`
    pub tag: String,
    /// Element attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Character data (text nodes only)
    #[serde(default)]
    pub text: String,
    /// Child nodes in document order
    #[serde(default)]
    pub children: Vec<Node>,
    /// Whether the element itself is rendered
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Current form-control value
    #[serde(default)]
    pub value: Option<String>,
    /// Selected live DOM properties (e.g. `validationMessage`)
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

const fn default_visible() -> bool {
    true
}

impl Node {
    /// Create an element node
    #[must_use]
    pub fn element(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            text: String::new(),
            children: Vec::new(),
            visible: true,
            value: None,
            properties: BTreeMap::new(),
        }
    }

    /// Create a text node
    #[must_use]
    pub fn text_node(text: impl Into<String>) -> Self {
        let mut node = Self::element(TEXT_TAG);
        node.text = text.into();
        node
    }

    /// Set an attribute
    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Append a text child
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.children.push(Self::text_node(text));
        self
    }

    /// Append a child
    #[must_use]
    pub fn child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Append several children
    #[must_use]
    pub fn children(mut self, children: impl IntoIterator<Item = Self>) -> Self {
        self.children.extend(children);
        self
    }

    /// Mark the element as not rendered
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Set the element's visibility
    #[must_use]
    pub const fn with_visible(mut self, visible: bool) -> Self {
        self.visible = visible;
        self
    }

    /// Set the form-control value
    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Set a live DOM property
    #[must_use]
    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Is this a text node?
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.tag == TEXT_TAG
    }

    /// Attribute lookup
    #[must_use]
    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Has the attribute at all (boolean attributes)
    #[must_use]
    pub fn has_attr(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Concatenated character data of all descendant text nodes
    #[must_use]
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        if self.is_text() {
            out.push_str(&self.text);
            return;
        }
        for child in &self.children {
            child.collect_text(out);
        }
    }

    /// Element children only
    pub fn element_children(&self) -> impl Iterator<Item = (usize, &Self)> {
        self.children
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_text())
    }

    /// Current value of a form control: live value, then `value` attribute
    #[must_use]
    pub fn current_value(&self) -> Option<String> {
        if self.tag == "select" {
            return self.selected_option().map(|o| o.option_value());
        }
        self.value
            .clone()
            .or_else(|| self.get_attr("value").map(str::to_string))
    }

    /// The selected `option` of a `select` (first option if none is marked)
    #[must_use]
    pub fn selected_option(&self) -> Option<&Self> {
        let options = self.descendant_options();
        options
            .iter()
            .copied()
            .find(|o| o.has_attr("selected"))
            .or_else(|| options.first().copied())
    }

    /// All `option` descendants in order
    #[must_use]
    pub fn descendant_options(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        self.collect_options(&mut out);
        out
    }

    fn collect_options<'a>(&'a self, out: &mut Vec<&'a Self>) {
        for child in &self.children {
            if child.tag == "option" {
                out.push(child);
            } else {
                child.collect_options(out);
            }
        }
    }

    /// Value of an `option` (attribute, else its text)
    #[must_use]
    pub fn option_value(&self) -> String {
        self.get_attr("value")
            .map_or_else(|| normalize_ws(&self.text_content()), str::to_string)
    }

    /// Disabled by its own attributes
    #[must_use]
    pub fn is_self_disabled(&self) -> bool {
        let form_control = matches!(
            self.tag.as_str(),
            "button" | "input" | "select" | "textarea" | "option" | "fieldset"
        );
        (form_control && self.has_attr("disabled")) || self.get_attr("aria-disabled") == Some("true")
    }
}

impl Document {
    /// Create a fully loaded document
    #[must_use]
    pub fn new(url: impl Into<String>, root: Node) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            ready_state: ReadyState::Complete,
            generation: 0,
            root,
        }
    }

    /// Set the title
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the ready state
    #[must_use]
    pub const fn with_ready_state(mut self, state: ReadyState) -> Self {
        self.ready_state = state;
        self
    }

    /// Set the navigation generation
    #[must_use]
    pub const fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Node at `path`
    #[must_use]
    pub fn node(&self, path: &[usize]) -> Option<&Node> {
        let mut node = &self.root;
        for &index in path {
            node = node.children.get(index)?;
        }
        Some(node)
    }

    /// Mutable node at `path`
    pub fn node_mut(&mut self, path: &[usize]) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for &index in path {
            node = node.children.get_mut(index)?;
        }
        Some(node)
    }

    /// Every element in document (pre-)order with its path
    #[must_use]
    pub fn elements(&self) -> Vec<(NodePath, &Node)> {
        let mut out = Vec::new();
        walk(&self.root, &mut Vec::new(), &mut out);
        out
    }

    /// Elements below `scope` (exclusive), in document order
    #[must_use]
    pub fn descendants(&self, scope: &[usize]) -> Vec<(NodePath, &Node)> {
        let Some(start) = self.node(scope) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut prefix = scope.to_vec();
        walk(start, &mut prefix, &mut out);
        out.retain(|(path, _)| path.len() > scope.len());
        out
    }

    /// Path of the element carrying `id`
    #[must_use]
    pub fn find_by_id(&self, id: &str) -> Option<NodePath> {
        self.elements()
            .into_iter()
            .find(|(_, n)| n.get_attr("id") == Some(id))
            .map(|(p, _)| p)
    }

    /// Ancestors of `path`, nearest first (excluding the node itself)
    pub fn ancestors<'a>(&'a self, path: &'a [usize]) -> impl Iterator<Item = (&'a [usize], &'a Node)> + 'a {
        (0..path.len())
            .rev()
            .filter_map(move |len| self.node(&path[..len]).map(|n| (&path[..len], n)))
    }

    /// Rendered: the node and every ancestor are visible and none is `hidden`
    #[must_use]
    pub fn is_visible(&self, path: &[usize]) -> bool {
        let Some(node) = self.node(path) else {
            return false;
        };
        let shown = |n: &Node| n.visible && !n.has_attr("hidden");
        shown(node) && self.ancestors(path).all(|(_, n)| shown(n))
    }

    /// Disabled by itself or by a disabled `fieldset` ancestor
    #[must_use]
    pub fn is_disabled(&self, path: &[usize]) -> bool {
        let Some(node) = self.node(path) else {
            return false;
        };
        node.is_self_disabled()
            || self
                .ancestors(path)
                .any(|(_, n)| n.tag == "fieldset" && n.has_attr("disabled"))
    }

    /// Whitespace-normalised text of the node at `path`
    #[must_use]
    pub fn text_of(&self, path: &[usize]) -> Option<String> {
        self.node(path).map(|n| normalize_ws(&n.text_content()))
    }
}

fn walk<'a>(node: &'a Node, path: &mut NodePath, out: &mut Vec<(NodePath, &'a Node)>) {
    if node.is_text() {
        return;
    }
    out.push((path.clone(), node));
    for (index, child) in node.children.iter().enumerate() {
        path.push(index);
        walk(child, path, out);
        path.pop();
    }
}

/// Collapse runs of whitespace and trim
#[must_use]
pub fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
