//! Tabular data extraction and oracles.
//!
//! [`extract`] reads one HTML table into a [`TableSnapshot`]; the oracle
//! methods on the snapshot are pure and return a genuine `bool` the runner
//! can branch on.
//!
//! Columns are addressed by 1-based *visual* position. There is no binding to
//! header names, so reordering columns breaks every oracle that reads them.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::action::{ActionExecutor, ActionKind};
use crate::context::PageContext;
use crate::dom::{normalize_ws, Document, Node, NodePath};
use crate::locator::{ElementQuery, Resolver};
use crate::result::{ProbeError, ProbeResult};
use crate::wait::{FnCondition, Poller, WaitSpec};

/// One table cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Whitespace-normalised text
    pub text: String,
    /// Columns spanned (at least 1)
    pub colspan: usize,
}

impl Cell {
    /// Single-column cell
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            colspan: 1,
        }
    }
}

/// One table row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Cells in visual order
    pub cells: Vec<Cell>,
    /// A single cell spanning the full width ("No SDOs found.")
    #[serde(default)]
    pub placeholder: bool,
}

impl Row {
    /// Row of single-column cells
    #[must_use]
    pub fn new<S: Into<String>>(cells: impl IntoIterator<Item = S>) -> Self {
        Self {
            cells: cells.into_iter().map(Cell::new).collect(),
            placeholder: false,
        }
    }

    /// Columns covered
    #[must_use]
    pub fn span(&self) -> usize {
        self.cells.iter().map(|c| c.colspan).sum()
    }

    /// Cell covering 1-based visual `column`
    #[must_use]
    pub fn cell(&self, column: usize) -> Option<&Cell> {
        let mut end = 0;
        self.cells.iter().find(|cell| {
            end += cell.colspan;
            column <= end
        })
    }

    /// Text of the cell covering `column`
    #[must_use]
    pub fn text(&self, column: usize) -> Option<&str> {
        self.cell(column).map(|c| c.text.as_str())
    }
}

/// Immutable point-in-time read of a table
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Header labels (expanded to one per column)
    pub header: Vec<String>,
    /// Body rows, including placeholder rows
    pub rows: Vec<Row>,
}

/// How to order two cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    /// [`parse_currency`] then numeric
    Currency,
    /// Calendar date/time; unparseable cells never compare
    Date,
    /// Plain string order
    Lexical,
}

impl Comparator {
    /// Compare two cell texts; `None` when they cannot be ordered
    #[must_use]
    pub fn compare(self, a: &str, b: &str) -> Option<Ordering> {
        match self {
            Self::Currency => parse_currency(Some(a)).partial_cmp(&parse_currency(Some(b))),
            Self::Date => Some(parse_date(a)?.cmp(&parse_date(b)?)),
            Self::Lexical => Some(a.cmp(b)),
        }
    }
}

/// Direction of a sort check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Non-decreasing
    Ascending,
    /// Non-increasing
    Descending,
}

impl SortOrder {
    /// Is `ordering` (of row i vs row i+1) allowed?
    #[must_use]
    pub const fn admits(self, ordering: Ordering) -> bool {
        match self {
            Self::Ascending => !matches!(ordering, Ordering::Greater),
            Self::Descending => !matches!(ordering, Ordering::Less),
        }
    }
}

/// Predicate over one cell's text
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellPredicate {
    /// Whitespace-normalised equality
    Equals(String),
    /// Negated equality
    NotEquals(String),
    /// Case-sensitive substring
    Contains(String),
    /// Regex search; an invalid regex never matches
    Matches(String),
    /// Blank cell
    IsEmpty,
}

impl CellPredicate {
    /// Evaluate against a cell's text
    #[must_use]
    pub fn test(&self, text: &str) -> bool {
        let text = normalize_ws(text);
        match self {
            Self::Equals(want) => text == normalize_ws(want),
            Self::NotEquals(want) => text != normalize_ws(want),
            Self::Contains(want) => text.contains(want.as_str()),
            Self::Matches(pattern) => regex::Regex::new(pattern).is_ok_and(|re| re.is_match(&text)),
            Self::IsEmpty => text.is_empty(),
        }
    }

    /// Reject an uncompilable regex
    pub fn validate(&self) -> ProbeResult<()> {
        if let Self::Matches(pattern) = self {
            regex::Regex::new(pattern).map_err(|e| ProbeError::Scenario {
                message: format!("invalid cell regex {pattern:?}: {e}"),
            })?;
        }
        Ok(())
    }

    /// Apply `f` to the operand text
    pub fn try_map_text<E>(&self, f: impl FnOnce(&str) -> Result<String, E>) -> Result<Self, E> {
        Ok(match self {
            Self::Equals(v) => Self::Equals(f(v)?),
            Self::NotEquals(v) => Self::NotEquals(f(v)?),
            Self::Contains(v) => Self::Contains(f(v)?),
            Self::Matches(v) => Self::Matches(f(v)?),
            Self::IsEmpty => Self::IsEmpty,
        })
    }
}

impl fmt::Display for CellPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(v) => write!(f, "equals {v:?}"),
            Self::NotEquals(v) => write!(f, "not equals {v:?}"),
            Self::Contains(v) => write!(f, "contains {v:?}"),
            Self::Matches(v) => write!(f, "matches /{v}/"),
            Self::IsEmpty => write!(f, "is empty"),
        }
    }
}

impl TableSnapshot {
    /// Build from header labels and rows
    #[must_use]
    pub fn new<S: Into<String>>(header: impl IntoIterator<Item = S>, rows: Vec<Row>) -> Self {
        Self {
            header: header.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// Column count
    #[must_use]
    pub fn width(&self) -> usize {
        if self.header.is_empty() {
            self.rows.first().map_or(0, Row::span)
        } else {
            self.header.len()
        }
    }

    /// Rows that carry data (placeholders excluded)
    pub fn data_rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter().filter(|r| !r.placeholder)
    }

    /// Number of data rows
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.data_rows().count()
    }

    /// The table shows only a placeholder row
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        !self.rows.is_empty() && self.rows.iter().all(|r| r.placeholder)
    }

    /// Texts of `column` over the data rows
    pub fn column_values(&self, column: usize) -> ProbeResult<Vec<String>> {
        self.check_column(column)?;
        Ok(self
            .data_rows()
            .map(|r| r.text(column).unwrap_or_default().to_string())
            .collect())
    }

    /// Every adjacent data-row pair is ordered by `comparator` in `order`.
    /// Vacuously true with fewer than two rows.
    pub fn is_sorted_by(&self, column: usize, comparator: Comparator, order: SortOrder) -> ProbeResult<bool> {
        let values = self.column_values(column)?;
        Ok(values.windows(2).all(|pair| {
            comparator
                .compare(&pair[0], &pair[1])
                .is_some_and(|ordering| order.admits(ordering))
        }))
    }

    /// Every data row satisfies `predicate`; vacuously true when empty
    pub fn all_rows_satisfy(&self, column: usize, predicate: &CellPredicate) -> ProbeResult<bool> {
        Ok(self.column_values(column)?.iter().all(|v| predicate.test(v)))
    }

    /// At least one data row satisfies `predicate`
    pub fn contains_row_where(&self, column: usize, predicate: &CellPredicate) -> ProbeResult<bool> {
        Ok(self.column_values(column)?.iter().any(|v| predicate.test(v)))
    }

    fn check_column(&self, column: usize) -> ProbeResult<()> {
        let width = self.width();
        if column == 0 || (width > 0 && column > width) {
            return Err(ProbeError::ColumnOutOfRange { column, width });
        }
        Ok(())
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Strip everything but `[0-9.-]` and parse the longest numeric prefix.
///
/// Missing or unparseable input is `0.0`, so `"₱1,000,000.00"` is `1000000.0`
/// and `""` is `0.0`.
#[must_use]
pub fn parse_currency(text: Option<&str>) -> f64 {
    let cleaned: String = text
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    let bytes = cleaned.as_bytes();
    let mut end = usize::from(bytes.first() == Some(&b'-'));
    let mut digits = 0;
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' => digits += 1,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        end += 1;
    }
    if digits == 0 {
        return 0.0;
    }
    cleaned[..end].trim_end_matches('.').parse().unwrap_or(0.0)
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%B %d, %Y %I:%M %p",
    "%b %d, %Y %I:%M %p",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%m/%d/%Y", "%d %B %Y", "%d %b %Y"];

/// Parse a calendar date or date-time cell
#[must_use]
pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let text = normalize_ws(text);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(&text, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(&text, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

// =============================================================================
// EXTRACTION
// =============================================================================

/// Default table query: any element with the `table` role
#[must_use]
pub fn any_table() -> ElementQuery {
    ElementQuery::any_role("table")
}

/// Extract the single table matching `table_query` from a fresh snapshot
pub async fn extract(page: &PageContext, table_query: &ElementQuery) -> ProbeResult<TableSnapshot> {
    let doc = page.snapshot().await?;
    extract_from(&doc, page.resolver(), table_query)
}

/// Extract from an existing snapshot
pub fn extract_from(doc: &Document, resolver: &Resolver, table_query: &ElementQuery) -> ProbeResult<TableSnapshot> {
    let mut tables: Vec<NodePath> = Vec::new();
    for element in resolver.resolve(doc, table_query)? {
        if element.tag == "table" {
            tables.push(element.handle.path);
        } else {
            tables.extend(
                doc.descendants(&element.handle.path)
                    .into_iter()
                    .filter(|(_, n)| n.tag == "table")
                    .map(|(p, _)| p),
            );
        }
    }
    tables.sort();
    tables.dedup();
    match tables.len() {
        0 => Err(ProbeError::NoMatchingTable {
            query: table_query.to_string(),
        }),
        1 => read_table(doc, &tables[0]),
        count => Err(ProbeError::AmbiguousTable {
            query: table_query.to_string(),
            count,
        }),
    }
}

fn read_table(doc: &Document, table: &[usize]) -> ProbeResult<TableSnapshot> {
    let Some(node) = doc.node(table) else {
        return Ok(TableSnapshot::default());
    };

    let mut head_rows: Vec<NodePath> = Vec::new();
    let mut body_rows: Vec<NodePath> = Vec::new();
    for (i, child) in node.element_children() {
        let path = child_path(table, i);
        match child.tag.as_str() {
            "thead" => head_rows.extend(rows_of(child, &path)),
            "tbody" => body_rows.extend(rows_of(child, &path)),
            "tr" => body_rows.push(path),
            _ => {}
        }
    }

    let header_row = if let Some(last) = head_rows.last() {
        Some(last.clone())
    } else if body_rows
        .first()
        .and_then(|p| doc.node(p))
        .is_some_and(|tr| tr.element_children().all(|(_, c)| c.tag == "th") && tr.element_children().next().is_some())
    {
        Some(body_rows.remove(0))
    } else {
        None
    };

    let header: Vec<String> = header_row
        .and_then(|p| doc.node(&p).map(read_cells))
        .map(|cells| {
            cells
                .into_iter()
                .flat_map(|c| std::iter::repeat(c.text).take(c.colspan))
                .collect()
        })
        .unwrap_or_default();

    let mut rows: Vec<Row> = body_rows
        .iter()
        .filter(|p| doc.is_visible(p))
        .filter_map(|p| doc.node(p))
        .map(|tr| Row {
            cells: read_cells(tr),
            placeholder: false,
        })
        .collect();

    let width = if header.is_empty() {
        rows.first().map_or(0, Row::span)
    } else {
        header.len()
    };
    for (i, row) in rows.iter_mut().enumerate() {
        let found = row.span();
        if found != width {
            return Err(ProbeError::MalformedTable {
                row: i + 1,
                expected: width,
                found,
            });
        }
        row.placeholder = width > 1 && row.cells.len() == 1;
    }
    Ok(TableSnapshot { header, rows })
}

fn child_path(parent: &[usize], index: usize) -> NodePath {
    let mut path = parent.to_vec();
    path.push(index);
    path
}

fn rows_of(section: &Node, path: &[usize]) -> Vec<NodePath> {
    section
        .element_children()
        .filter(|(_, c)| c.tag == "tr")
        .map(|(i, _)| child_path(path, i))
        .collect()
}

fn read_cells(tr: &Node) -> Vec<Cell> {
    tr.element_children()
        .filter(|(_, c)| c.tag == "td" || c.tag == "th")
        .map(|(_, c)| Cell {
            text: normalize_ws(&c.text_content()),
            colspan: c
                .get_attr("colspan")
                .and_then(|s| s.trim().parse::<usize>().ok())
                .unwrap_or(1)
                .max(1),
        })
        .collect()
}

// =============================================================================
// PAGINATION
// =============================================================================

/// Count data rows over every page of a paginated table.
///
/// Clicks `next` until it is missing, hidden or disabled, or `max_pages`
/// pages have been read. After each click the table must change within
/// `settle`, otherwise the wait times out.
pub async fn count_rows_across_pages(
    page: &PageContext,
    table_query: &ElementQuery,
    next: &ElementQuery,
    max_pages: usize,
    settle: WaitSpec,
) -> ProbeResult<usize> {
    let mut total = 0;
    for page_no in 1..=max_pages.max(1) {
        let doc = page.snapshot().await?;
        let snapshot = extract_from(&doc, page.resolver(), table_query)?;
        total += snapshot.row_count();
        tracing::debug!(page_no, rows = snapshot.row_count(), total, "counted table page");

        let buttons = page.resolver().resolve(&doc, next)?;
        let can_advance = matches!(buttons.as_slice(), [b] if b.visible && !b.disabled);
        if !can_advance || page_no == max_pages {
            break;
        }
        ActionExecutor::perform(page, next, ActionKind::Click, None).await?;

        let resolver = page.resolver();
        let changed = FnCondition::new(
            |doc: &Document| extract_from(doc, resolver, table_query).is_ok_and(|t| t != snapshot),
            format!("table {table_query} to show the next page"),
        );
        Poller::wait_for(page, &changed, settle).await?;
    }
    Ok(total)
}
