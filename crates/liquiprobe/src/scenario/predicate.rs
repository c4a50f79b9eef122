//! State predicates over a page context.
//!
//! A [`StatePredicate`] is what `AssertState`, `Skip` and the assertion block
//! check. Every predicate implements [`Condition`], so the poller re-evaluates
//! it against a fresh snapshot on each tick.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::context::{element_text, PageContext};
use crate::dom::{normalize_ws, Document};
use crate::driver::PRINT_REQUESTED_EXPR;
use crate::locator::ElementQuery;
use crate::result::{ProbeError, ProbeResult};
use crate::table::{self, CellPredicate, Comparator, SortOrder, TableSnapshot};
use crate::wait::{Condition, Probe, UrlPattern, WaitClass};

use super::vars::Variables;

fn any_table() -> ElementQuery {
    table::any_table()
}

/// Comparison of a count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountCheck {
    /// Exactly
    Equals(usize),
    /// At least
    AtLeast(usize),
    /// At most
    AtMost(usize),
}

impl CountCheck {
    /// Does `count` pass?
    #[must_use]
    pub const fn test(self, count: usize) -> bool {
        match self {
            Self::Equals(n) => count == n,
            Self::AtLeast(n) => count >= n,
            Self::AtMost(n) => count <= n,
        }
    }
}

impl fmt::Display for CountCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(n) => write!(f, "== {n}"),
            Self::AtLeast(n) => write!(f, ">= {n}"),
            Self::AtMost(n) => write!(f, "<= {n}"),
        }
    }
}

/// A checkable statement about one page context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatePredicate {
    /// URL contains a substring
    UrlContains(String),
    /// URL matches a pattern
    UrlMatches(UrlPattern),
    /// Title matches a regex
    TitleMatches(String),
    /// Exactly one match, rendered
    Visible(ElementQuery),
    /// No rendered match
    Hidden(ElementQuery),
    /// Exactly one match, not disabled
    Enabled(ElementQuery),
    /// Exactly one match, disabled
    Disabled(ElementQuery),
    /// Element text (value for controls) equals a literal
    TextEquals {
        /// Element
        query: ElementQuery,
        /// Expected text
        text: String,
    },
    /// Element text matches a regex
    TextMatches {
        /// Element
        query: ElementQuery,
        /// Regex
        pattern: String,
    },
    /// Element text equals a captured variable
    TextEqualsVar {
        /// Element
        query: ElementQuery,
        /// Variable name
        var: String,
    },
    /// Attribute equals a value
    AttributeEquals {
        /// Element
        query: ElementQuery,
        /// Attribute name
        name: String,
        /// Expected value
        value: String,
    },
    /// Native validation message of a form control
    ValidationMessage {
        /// Form control
        query: ElementQuery,
        /// Expected message
        message: String,
    },
    /// Last explicit navigation answered 2xx
    ResponseOk,
    /// Two interpolated values are equal
    VarEquals {
        /// Left operand, e.g. `${before}`
        left: String,
        /// Right operand
        right: String,
    },
    /// The stubbed `window.print` ran in the current document
    PrintRequested,
    /// Data-row count of a table
    RowCount {
        /// Table query
        #[serde(default = "any_table")]
        table: ElementQuery,
        /// Count check
        count: CountCheck,
    },
    /// Column ordered by a comparator
    TableSorted {
        /// Table query
        #[serde(default = "any_table")]
        table: ElementQuery,
        /// 1-based visual column
        column: usize,
        /// Comparator
        comparator: Comparator,
        /// Direction
        order: SortOrder,
    },
    /// Every data row satisfies a cell predicate
    TableAllRows {
        /// Table query
        #[serde(default = "any_table")]
        table: ElementQuery,
        /// 1-based visual column
        column: usize,
        /// Cell predicate
        predicate: CellPredicate,
    },
    /// Some data row satisfies a cell predicate
    TableContainsRow {
        /// Table query
        #[serde(default = "any_table")]
        table: ElementQuery,
        /// 1-based visual column
        column: usize,
        /// Cell predicate
        predicate: CellPredicate,
    },
    /// No data row satisfies a cell predicate
    TableLacksRow {
        /// Table query
        #[serde(default = "any_table")]
        table: ElementQuery,
        /// 1-based visual column
        column: usize,
        /// Cell predicate
        predicate: CellPredicate,
    },
    /// Negation
    Not(Box<StatePredicate>),
}

impl StatePredicate {
    /// Budget class: navigation-shaped predicates get the long timeout
    #[must_use]
    pub fn wait_class(&self) -> WaitClass {
        match self {
            Self::UrlContains(_) | Self::UrlMatches(_) | Self::TitleMatches(_) | Self::ResponseOk => {
                WaitClass::Navigation
            }
            Self::Not(inner) => inner.wait_class(),
            _ => WaitClass::Fast,
        }
    }

    /// Table this predicate reads, if any
    #[must_use]
    pub fn table_query(&self) -> Option<&ElementQuery> {
        match self {
            Self::RowCount { table, .. }
            | Self::TableSorted { table, .. }
            | Self::TableAllRows { table, .. }
            | Self::TableContainsRow { table, .. }
            | Self::TableLacksRow { table, .. } => Some(table),
            Self::Not(inner) => inner.table_query(),
            _ => None,
        }
    }

    /// Interpolate every text operand and replace variable references by
    /// their values
    pub fn bind(&self, vars: &Variables) -> ProbeResult<Self> {
        if let Self::Not(inner) = self {
            return Ok(Self::Not(Box::new(inner.bind(vars)?)));
        }
        if let Self::TextEqualsVar { query, var } = self {
            let text = vars
                .get(var.trim())
                .ok_or_else(|| ProbeError::UnknownVariable { name: var.clone() })?;
            return Ok(Self::TextEquals {
                query: query.try_map_text(|s| vars.interpolate(s))?,
                text: text.to_string(),
            });
        }
        self.try_map_text(&mut |s: &str| vars.interpolate(s))
    }

    /// Apply `f` to every text operand
    pub fn try_map_text<E>(&self, f: &mut impl FnMut(&str) -> Result<String, E>) -> Result<Self, E> {
        let q = map_query::<E>;
        Ok(match self {
            Self::UrlContains(s) => Self::UrlContains(f(s)?),
            Self::UrlMatches(p) => Self::UrlMatches(p.try_map_text(|s| f(s))?),
            Self::TitleMatches(s) => Self::TitleMatches(f(s)?),
            Self::Visible(query) => Self::Visible(q(query, f)?),
            Self::Hidden(query) => Self::Hidden(q(query, f)?),
            Self::Enabled(query) => Self::Enabled(q(query, f)?),
            Self::Disabled(query) => Self::Disabled(q(query, f)?),
            Self::TextEquals { query, text } => Self::TextEquals {
                query: q(query, f)?,
                text: f(text)?,
            },
            Self::TextMatches { query, pattern } => Self::TextMatches {
                query: q(query, f)?,
                pattern: f(pattern)?,
            },
            Self::TextEqualsVar { query, var } => Self::TextEqualsVar {
                query: q(query, f)?,
                var: var.clone(),
            },
            Self::AttributeEquals { query, name, value } => Self::AttributeEquals {
                query: q(query, f)?,
                name: name.clone(),
                value: f(value)?,
            },
            Self::ValidationMessage { query, message } => Self::ValidationMessage {
                query: q(query, f)?,
                message: f(message)?,
            },
            Self::ResponseOk => Self::ResponseOk,
            Self::PrintRequested => Self::PrintRequested,
            Self::VarEquals { left, right } => Self::VarEquals {
                left: f(left)?,
                right: f(right)?,
            },
            Self::RowCount { table, count } => Self::RowCount {
                table: q(table, f)?,
                count: *count,
            },
            Self::TableSorted {
                table,
                column,
                comparator,
                order,
            } => Self::TableSorted {
                table: q(table, f)?,
                column: *column,
                comparator: *comparator,
                order: *order,
            },
            Self::TableAllRows { table, column, predicate } => Self::TableAllRows {
                table: q(table, f)?,
                column: *column,
                predicate: predicate.try_map_text(|s| f(s))?,
            },
            Self::TableContainsRow { table, column, predicate } => Self::TableContainsRow {
                table: q(table, f)?,
                column: *column,
                predicate: predicate.try_map_text(|s| f(s))?,
            },
            Self::TableLacksRow { table, column, predicate } => Self::TableLacksRow {
                table: q(table, f)?,
                column: *column,
                predicate: predicate.try_map_text(|s| f(s))?,
            },
            Self::Not(inner) => Self::Not(Box::new(inner.try_map_text(f)?)),
        })
    }

    /// Compile-time problems: bad regexes, zero columns
    pub fn validate(&self) -> ProbeResult<()> {
        let regex = |pattern: &str| {
            regex::Regex::new(pattern).map(|_| ()).map_err(|e| ProbeError::Scenario {
                message: format!("invalid regex {pattern:?}: {e}"),
            })
        };
        match self {
            Self::UrlMatches(p) => p.validate(),
            Self::TitleMatches(p) | Self::TextMatches { pattern: p, .. } => regex(p),
            Self::TableSorted { column, .. } if *column == 0 => Err(zero_column()),
            Self::TableAllRows { column, predicate, .. }
            | Self::TableContainsRow { column, predicate, .. }
            | Self::TableLacksRow { column, predicate, .. } => {
                if *column == 0 {
                    return Err(zero_column());
                }
                predicate.validate()
            }
            Self::Not(inner) => inner.validate(),
            _ => Ok(()),
        }
    }

    /// Evaluate once against a fresh snapshot
    pub async fn evaluate(&self, page: &PageContext) -> ProbeResult<Probe> {
        let mut negate = false;
        let mut current = self;
        while let Self::Not(inner) = current {
            negate = !negate;
            current = inner;
        }
        let probe = current.evaluate_positive(page).await?;
        Ok(if negate {
            Probe::new(!probe.satisfied, probe.observed)
        } else {
            probe
        })
    }

    async fn evaluate_positive(&self, page: &PageContext) -> ProbeResult<Probe> {
        if let Self::ValidationMessage { query, message } = self {
            let shown = page.property_of(query, "validationMessage").await?.unwrap_or_default();
            return Ok(Probe::new(
                normalize_ws(&shown) == normalize_ws(message),
                format!("validation message {shown:?}"),
            ));
        }
        if let Self::ResponseOk = self {
            return Ok(match page.last_response() {
                Some(response) => Probe::new(
                    response.is_ok(),
                    format!("status {:?} for {}", response.status, response.url),
                ),
                None => Probe::new(false, "no navigation response"),
            });
        }
        if let Self::PrintRequested = self {
            let flag = page.evaluate(PRINT_REQUESTED_EXPR).await?;
            return Ok(match flag.as_bool() {
                Some(requested) => Probe::new(requested, format!("print requested={requested}")),
                None => Probe::new(false, "window.print is not stubbed in this document"),
            });
        }
        if let Self::VarEquals { left, right } = self {
            return Ok(Probe::new(left == right, format!("{left:?} vs {right:?}")));
        }
        let doc = page.snapshot().await?;
        self.evaluate_on(page, &doc)
    }

    fn evaluate_on(&self, page: &PageContext, doc: &Document) -> ProbeResult<Probe> {
        let resolver = page.resolver();
        Ok(match self {
            Self::UrlContains(part) => Probe::new(doc.url.contains(part.as_str()), format!("url was {}", doc.url)),
            Self::UrlMatches(pattern) => Probe::new(pattern.matches(&doc.url), format!("url was {}", doc.url)),
            Self::TitleMatches(pattern) => {
                let re = regex::Regex::new(pattern).map_err(|e| ProbeError::Scenario {
                    message: format!("invalid title regex {pattern:?}: {e}"),
                })?;
                Probe::new(re.is_match(&doc.title), format!("title was {:?}", doc.title))
            }
            Self::Visible(query) => {
                let found = resolver.resolve(doc, query)?;
                let visible = found.len() == 1 && found[0].visible;
                Probe::new(visible, describe_matches(&found))
            }
            Self::Hidden(query) => {
                let found = resolver.resolve(doc, query)?;
                Probe::new(found.iter().all(|e| !e.visible), describe_matches(&found))
            }
            Self::Enabled(query) | Self::Disabled(query) => {
                let element = page.resolve_one(doc, query)?;
                let want_disabled = matches!(self, Self::Disabled(_));
                Probe::new(
                    element.disabled == want_disabled,
                    format!("{} disabled={}", element.description, element.disabled),
                )
            }
            Self::TextEquals { query, text } => {
                let element = page.resolve_one(doc, query)?;
                let shown = element_text(doc, &element);
                Probe::new(normalize_ws(&shown) == normalize_ws(text), format!("text was {shown:?}"))
            }
            Self::TextMatches { query, pattern } => {
                let re = regex::Regex::new(pattern).map_err(|e| ProbeError::Scenario {
                    message: format!("invalid text regex {pattern:?}: {e}"),
                })?;
                let element = page.resolve_one(doc, query)?;
                let shown = element_text(doc, &element);
                Probe::new(re.is_match(&shown), format!("text was {shown:?}"))
            }
            Self::TextEqualsVar { var, .. } => {
                return Err(ProbeError::UnknownVariable { name: var.clone() });
            }
            Self::AttributeEquals { query, name, value } => {
                let element = page.resolve_one(doc, query)?;
                let actual = doc.node(&element.handle.path).and_then(|n| n.get_attr(name));
                Probe::new(actual == Some(value.as_str()), format!("{name}={actual:?}"))
            }
            Self::RowCount { table, count } => {
                let snapshot = table::extract_from(doc, resolver, table)?;
                let rows = snapshot.row_count();
                Probe::new(count.test(rows), format!("{rows} data rows"))
            }
            Self::TableSorted {
                table,
                column,
                comparator,
                order,
            } => {
                let snapshot = table::extract_from(doc, resolver, table)?;
                let sorted = snapshot.is_sorted_by(*column, *comparator, *order)?;
                Probe::new(sorted, describe_column(&snapshot, *column))
            }
            Self::TableAllRows { table, column, predicate } => {
                let snapshot = table::extract_from(doc, resolver, table)?;
                let holds = snapshot.all_rows_satisfy(*column, predicate)?;
                Probe::new(holds, describe_column(&snapshot, *column))
            }
            Self::TableContainsRow { table, column, predicate } | Self::TableLacksRow { table, column, predicate } => {
                let snapshot = table::extract_from(doc, resolver, table)?;
                let found = snapshot.contains_row_where(*column, predicate)?;
                let want = matches!(self, Self::TableContainsRow { .. });
                Probe::new(found == want, describe_column(&snapshot, *column))
            }
            Self::ValidationMessage { .. }
            | Self::ResponseOk
            | Self::PrintRequested
            | Self::VarEquals { .. }
            | Self::Not(_) => {
                return Err(ProbeError::Scenario {
                    message: format!("{self} cannot be evaluated against a snapshot"),
                })
            }
        })
    }
}

fn map_query<E>(query: &ElementQuery, f: &mut dyn FnMut(&str) -> Result<String, E>) -> Result<ElementQuery, E> {
    query.try_map_text(f)
}

fn zero_column() -> ProbeError {
    ProbeError::Scenario {
        message: "table columns are 1-based; column 0 does not exist".into(),
    }
}

fn describe_matches(found: &[crate::locator::ResolvedElement]) -> String {
    match found {
        [] => "no match".to_string(),
        [one] => format!("{} visible={}", one.description, one.visible),
        many => format!("{} matches", many.len()),
    }
}

fn describe_column(snapshot: &TableSnapshot, column: usize) -> String {
    if snapshot.is_placeholder() {
        let text = snapshot.rows.first().and_then(|r| r.text(1)).unwrap_or_default();
        return format!("placeholder row {text:?}");
    }
    let values = snapshot.column_values(column).unwrap_or_default();
    let shown: Vec<&str> = values.iter().take(10).map(String::as_str).collect();
    let more = values.len().saturating_sub(shown.len());
    if more > 0 {
        format!("column {column}: {shown:?} and {more} more")
    } else {
        format!("column {column}: {shown:?}")
    }
}

impl fmt::Display for StatePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UrlContains(s) => write!(f, "url contains {s:?}"),
            Self::UrlMatches(p) => write!(f, "{p}"),
            Self::TitleMatches(p) => write!(f, "title matches /{p}/"),
            Self::Visible(q) => write!(f, "{q} is visible"),
            Self::Hidden(q) => write!(f, "{q} is hidden"),
            Self::Enabled(q) => write!(f, "{q} is enabled"),
            Self::Disabled(q) => write!(f, "{q} is disabled"),
            Self::TextEquals { query, text } => write!(f, "{query} has text {text:?}"),
            Self::TextMatches { query, pattern } => write!(f, "{query} text matches /{pattern}/"),
            Self::TextEqualsVar { query, var } => write!(f, "{query} has text ${{{var}}}"),
            Self::AttributeEquals { query, name, value } => write!(f, "{query} has {name}={value:?}"),
            Self::ValidationMessage { query, message } => write!(f, "{query} reports {message:?}"),
            Self::ResponseOk => write!(f, "last response is 2xx"),
            Self::PrintRequested => write!(f, "print was requested"),
            Self::VarEquals { left, right } => write!(f, "{left:?} == {right:?}"),
            Self::RowCount { table, count } => write!(f, "{table} row count {count}"),
            Self::TableSorted {
                table,
                column,
                comparator,
                order,
            } => write!(f, "{table} column {column} sorted {order:?} by {comparator:?}"),
            Self::TableAllRows { table, column, predicate } => {
                write!(f, "every row of {table} has column {column} {predicate}")
            }
            Self::TableContainsRow { table, column, predicate } => {
                write!(f, "some row of {table} has column {column} {predicate}")
            }
            Self::TableLacksRow { table, column, predicate } => {
                write!(f, "no row of {table} has column {column} {predicate}")
            }
            Self::Not(inner) => write!(f, "not ({inner})"),
        }
    }
}

#[async_trait]
impl Condition for StatePredicate {
    async fn check(&self, page: &PageContext) -> ProbeResult<Probe> {
        self.evaluate(page).await
    }

    fn description(&self) -> String {
        self.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::ContextRole;
    use crate::dom::Node;
    use crate::driver::BrowserSession;
    use crate::fixture::Fixtures;
    use crate::locator::Resolver;
    use crate::mock::{MockBrowser, StaticSite};
    use std::sync::Arc;

    const URL: &str = "http://lg.test/cash-advances?status=liquidated";

    fn page_root() -> Node {
        let row = |n: &str, amount: &str, status: &str| {
            Node::element("tr")
                .child(Node::element("td").text(n))
                .child(Node::element("td").text(amount))
                .child(Node::element("td").text(status))
        };
        Node::element("body")
            .child(Node::element("div").attr("role", "alert").hidden().text("Saved"))
            .child(
                Node::element("input")
                    .attr("placeholder", "Search")
                    .property("validationMessage", "Please fill out this field."),
            )
            .child(Node::element("button").attr("disabled", "").text("Next"))
            .child(
                Node::element("table")
                    .child(
                        Node::element("thead").child(
                            Node::element("tr")
                                .child(Node::element("th").text("#"))
                                .child(Node::element("th").text("Amount"))
                                .child(Node::element("th").text("Status")),
                        ),
                    )
                    .child(
                        Node::element("tbody")
                            .child(row("1", "₱100.00", "Liquidated"))
                            .child(row("2", "₱2,000.00", "Liquidated")),
                    ),
            )
    }

    async fn page() -> PageContext {
        let site = StaticSite::new().document(Document::new(URL, page_root()).with_title("Cash Advances"));
        let browser = MockBrowser::new(site);
        let page = PageContext::new("primary", ContextRole::Primary, browser.new_page().await.unwrap(), Arc::new(Resolver::new()));
        page.navigate(URL).await.unwrap();
        page
    }

    async fn holds(page: &PageContext, yaml: &str) -> bool {
        let predicate: StatePredicate = crate::yaml::from_str(yaml).unwrap();
        predicate.validate().unwrap();
        predicate.evaluate(page).await.unwrap().satisfied
    }

    mod evaluate_tests {
        use super::*;

        #[tokio::test]
        async fn test_url_and_title() {
            let page = page().await;
            assert!(holds(&page, "url_contains: /cash-advances").await);
            assert!(holds(&page, "url_matches: { regex: 'status=liquidated$' }").await);
            assert!(holds(&page, "title_matches: ^Cash").await);
            assert!(holds(&page, "response_ok").await);
        }

        #[tokio::test]
        async fn test_visibility_and_enabled() {
            let page = page().await;
            assert!(holds(&page, "hidden: { by: role, role: alert }").await);
            assert!(!holds(&page, "visible: { by: role, role: alert }").await);
            assert!(holds(&page, "hidden: { by: text, text: nothing like this }").await);
            assert!(holds(&page, "disabled: { by: role, role: button, name: Next }").await);
            assert!(holds(&page, "not: { enabled: { by: role, role: button, name: Next } }").await);
        }

        #[tokio::test]
        async fn test_table_oracles() {
            let page = page().await;
            assert!(holds(&page, "row_count: { count: { equals: 2 } }").await);
            assert!(
                holds(
                    &page,
                    "table_sorted: { column: 2, comparator: currency, order: ascending }"
                )
                .await
            );
            assert!(holds(&page, "table_all_rows: { column: 3, predicate: { equals: Liquidated } }").await);
            assert!(holds(&page, "table_lacks_row: { column: 3, predicate: { equals: Unliquidated } }").await);
            assert!(!holds(&page, "table_contains_row: { column: 3, predicate: { equals: Unliquidated } }").await);
        }

        #[tokio::test]
        async fn test_validation_message() {
            let page = page().await;
            assert!(
                holds(
                    &page,
                    "validation_message: { query: { by: placeholder, text: Search }, message: Please fill out this field. }"
                )
                .await
            );
        }

        #[tokio::test]
        async fn test_failed_predicate_reports_observation() {
            let page = page().await;
            let predicate = StatePredicate::RowCount {
                table: table::any_table(),
                count: CountCheck::Equals(0),
            };
            let probe = predicate.evaluate(&page).await.unwrap();
            assert!(!probe.satisfied);
            assert_eq!(probe.observed, "2 data rows");
        }
    }

    mod bind_tests {
        use super::*;

        #[test]
        fn test_bind_interpolates_and_resolves_vars() {
            let mut vars = Variables::new(Fixtures::new().with_value("keyword", "Apple"));
            vars.set("amount", "₱100.00");
            let predicate = StatePredicate::TableContainsRow {
                table: table::any_table(),
                column: 2,
                predicate: CellPredicate::Equals("${keyword}".into()),
            };
            assert_eq!(
                predicate.bind(&vars).unwrap(),
                StatePredicate::TableContainsRow {
                    table: table::any_table(),
                    column: 2,
                    predicate: CellPredicate::Equals("Apple".into()),
                }
            );
            let by_var = StatePredicate::TextEqualsVar {
                query: ElementQuery::label("Amount"),
                var: "amount".into(),
            };
            assert_eq!(
                by_var.bind(&vars).unwrap(),
                StatePredicate::TextEquals {
                    query: ElementQuery::label("Amount"),
                    text: "₱100.00".into(),
                }
            );
            assert!(StatePredicate::UrlContains("${missing}".into()).bind(&vars).is_err());
        }

        #[test]
        fn test_wait_class() {
            assert_eq!(StatePredicate::UrlContains("/x".into()).wait_class(), WaitClass::Navigation);
            assert_eq!(
                StatePredicate::Not(Box::new(StatePredicate::ResponseOk)).wait_class(),
                WaitClass::Navigation
            );
            assert_eq!(StatePredicate::Visible(ElementQuery::text("x")).wait_class(), WaitClass::Fast);
        }

        #[test]
        fn test_validate_rejects_column_zero_and_bad_regex() {
            let zero = StatePredicate::TableSorted {
                table: table::any_table(),
                column: 0,
                comparator: Comparator::Lexical,
                order: SortOrder::Ascending,
            };
            assert!(zero.validate().is_err());
            assert!(StatePredicate::TitleMatches("(".into()).validate().is_err());
        }
    }
}
