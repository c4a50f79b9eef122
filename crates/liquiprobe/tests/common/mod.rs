//! A scripted Liquidation Generator site for end-to-end tests.
//!
//! Pages: `/login`, `/dashboard`, `/sdo` (searchable, filterable, sortable,
//! paginated table) and `/liquidation-report/<id>` (opened in a new tab, with
//! a Print button calling `window.print()`).

#![allow(dead_code, clippy::unwrap_used)]

use liquiprobe::config::RunnerConfig;
use liquiprobe::fixture::{Credentials, FixtureConfig};
use liquiprobe::mock::{Interaction, MockSite, Response};
use liquiprobe::wait::TimeoutPolicy;
use liquiprobe::{Document, Node};
use std::collections::BTreeMap;
use std::sync::Mutex;

pub const BASE: &str = "http://lg.test";
pub const EMAIL: &str = "admin@lg.test";
pub const PASSWORD: &str = "s3cret";
pub const SDO_COUNT: usize = 25;
pub const PAGE_SIZE: usize = 10;
pub const REQUIRED: &str = "Please fill out this field.";

#[derive(Debug, Clone)]
pub struct Sdo {
    pub id: String,
    pub name: String,
    pub office: &'static str,
    pub centavos: u64,
    pub status: &'static str,
}

const OFFICES: [&str; 3] = ["Accounting", "Budget", "Cashier"];

pub fn sdos() -> Vec<Sdo> {
    (1..=SDO_COUNT as u64)
        .map(|n| Sdo {
            id: format!("SDO-{n:03}"),
            name: format!("Officer {n}"),
            office: OFFICES[(n % 3) as usize],
            centavos: amount_rank(n) * 123_400 + n * 37 % 100,
            status: if n % 2 == 0 { "Pending" } else { "Liquidated" },
        })
        .collect()
}

/// 1..=25 shuffled, so the unsorted table is in no particular amount order
const fn amount_rank(n: u64) -> u64 {
    n * 11 % (SDO_COUNT as u64 + 1)
}

/// `₱12,345.67`
pub fn peso(centavos: u64) -> String {
    let whole = (centavos / 100).to_string();
    let mut grouped = String::new();
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("₱{grouped}.{:02}", centavos % 100)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sort {
    None,
    Ascending,
    Descending,
}

#[derive(Debug)]
struct State {
    logged_in: bool,
    login_error: Option<String>,
    typed: BTreeMap<String, String>,
    keyword: String,
    status: String,
    sort: Sort,
    page: usize,
    show_all: bool,
}

#[derive(Debug)]
pub struct LiquidationSite {
    state: Mutex<State>,
}

impl Default for LiquidationSite {
    fn default() -> Self {
        Self::new()
    }
}

impl LiquidationSite {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                logged_in: false,
                login_error: None,
                typed: BTreeMap::new(),
                keyword: String::new(),
                status: String::new(),
                sort: Sort::None,
                page: 0,
                show_all: false,
            }),
        }
    }

    fn visible_sdos(state: &State) -> Vec<Sdo> {
        let mut rows: Vec<Sdo> = sdos()
            .into_iter()
            .filter(|s| {
                state.keyword.is_empty()
                    || s.name.contains(&state.keyword)
                    || s.id.contains(&state.keyword)
                    || s.office.contains(&state.keyword)
            })
            .filter(|s| state.status.is_empty() || s.status == state.status)
            .collect();
        match state.sort {
            Sort::None => {}
            Sort::Ascending => rows.sort_by_key(|s| s.centavos),
            Sort::Descending => rows.sort_by_key(|s| std::cmp::Reverse(s.centavos)),
        }
        rows
    }

    fn login_page(state: &State) -> Node {
        let mut email = Node::element("input")
            .attr("id", "email")
            .attr("name", "email")
            .attr("type", "email")
            .attr("required", "");
        if state.typed.get("email").map_or(true, String::is_empty) {
            email = email.property("validationMessage", REQUIRED);
        }
        let mut form = Node::element("form")
            .child(Node::element("label").attr("for", "email").text("Email"))
            .child(email)
            .child(Node::element("label").attr("for", "password").text("Password"))
            .child(
                Node::element("input")
                    .attr("id", "password")
                    .attr("name", "password")
                    .attr("type", "password"),
            )
            .child(Node::element("button").attr("type", "submit").text("Log in"));
        if let Some(error) = &state.login_error {
            form = form.child(Node::element("p").attr("role", "alert").text(error.as_str()));
        }
        Node::element("body").child(Node::element("h1").text("Sign in")).child(form)
    }

    fn dashboard() -> Node {
        Node::element("body")
            .child(Node::element("h1").text("Dashboard"))
            .child(Node::element("nav").child(Node::element("a").attr("href", "/sdo").text("SDO List")))
    }

    fn sdo_page(state: &State) -> Node {
        let rows = Self::visible_sdos(state);
        let pages = rows.len().div_ceil(PAGE_SIZE).max(1);
        let shown: Vec<&Sdo> = if state.show_all {
            rows.iter().collect()
        } else {
            rows.iter().skip(state.page * PAGE_SIZE).take(PAGE_SIZE).collect()
        };

        let header = ["ID", "Name", "Office"]
            .into_iter()
            .fold(Node::element("tr"), |tr, h| tr.child(Node::element("th").text(h)))
            .child(Node::element("th").child(Node::element("button").text("Amount")))
            .child(Node::element("th").text("Status"))
            .child(Node::element("th").text("Actions"));

        let mut body = Node::element("tbody");
        if shown.is_empty() {
            body = body.child(
                Node::element("tr").child(
                    Node::element("td")
                        .attr("colspan", "6")
                        .text("No SDOs found."),
                ),
            );
        }
        for sdo in shown {
            body = body.child(
                Node::element("tr")
                    .child(Node::element("td").text(sdo.id.as_str()))
                    .child(Node::element("td").text(sdo.name.as_str()))
                    .child(Node::element("td").text(sdo.office))
                    .child(Node::element("td").text(peso(sdo.centavos)))
                    .child(Node::element("td").text(sdo.status))
                    .child(
                        Node::element("td").child(
                            Node::element("a")
                                .attr("href", format!("/liquidation-report/{}", sdo.id))
                                .attr("target", "_blank")
                                .attr("aria-label", format!("View report {}", sdo.id))
                                .text("Report"),
                        ),
                    ),
            );
        }

        let status = ["", "Liquidated", "Pending"].into_iter().fold(
            Node::element("select").attr("id", "status").attr("name", "status"),
            |select, s| {
                let mut option = Node::element("option")
                    .attr("value", s)
                    .text(if s.is_empty() { "All" } else { s });
                if s == state.status {
                    option = option.attr("selected", "");
                }
                select.child(option)
            },
        );

        let mut next = Node::element("button").text("Next");
        if state.show_all || state.page + 1 >= pages {
            next = next.attr("disabled", "");
        }

        Node::element("body")
            .child(Node::element("h1").text("SDO List"))
            .child(
                Node::element("div")
                    .child(
                        Node::element("input")
                            .attr("name", "keyword")
                            .attr("type", "search")
                            .attr("placeholder", "Search SDO"),
                    )
                    .child(Node::element("button").text("Search"))
                    .child(Node::element("label").attr("for", "status").text("Status"))
                    .child(status),
            )
            .child(
                Node::element("table")
                    .child(Node::element("thead").child(header))
                    .child(body),
            )
            .child(
                Node::element("div")
                    .child(next)
                    .child(Node::element("button").text("Show all"))
                    .child(Node::element("span").text(format!("Page {} of {pages}", state.page + 1))),
            )
    }

    fn report_page(id: &str) -> Option<Node> {
        let sdo = sdos().into_iter().find(|s| s.id == id)?;
        Some(
            Node::element("body")
                .child(Node::element("h1").text("Liquidation Report"))
                .child(
                    Node::element("dl")
                        .child(Node::element("dt").text("SDO"))
                        .child(Node::element("dd").attr("id", "sdo-id").text(sdo.id.as_str()))
                        .child(Node::element("dt").text("Total"))
                        .child(Node::element("dd").attr("id", "total-amount").text(peso(sdo.centavos))),
                )
                .child(Node::element("button").text("Print")),
        )
    }

    fn locked() -> Node {
        Node::element("body").child(Node::element("h1").text("Please log in"))
    }
}

fn path_of(url: &str) -> &str {
    url.strip_prefix(BASE).unwrap_or(url)
}

impl MockSite for LiquidationSite {
    fn render(&self, url: &str) -> Option<Document> {
        let state = self.state.lock().unwrap();
        let path = path_of(url);
        let (title, root) = match path {
            "/login" => ("Log in", Self::login_page(&state)),
            "/dashboard" if state.logged_in => ("Dashboard", Self::dashboard()),
            "/sdo" if state.logged_in => ("SDO List", Self::sdo_page(&state)),
            "/dashboard" | "/sdo" => ("Log in", Self::locked()),
            _ => {
                let id = path.strip_prefix("/liquidation-report/")?;
                if !state.logged_in {
                    ("Log in", Self::locked())
                } else {
                    ("Liquidation Report", Self::report_page(id)?)
                }
            }
        };
        Some(Document::new(url, root).with_title(title))
    }

    fn interact(&self, url: &str, interaction: &Interaction) -> Response {
        let mut state = self.state.lock().unwrap();
        match interaction {
            Interaction::Fill { target, value } => {
                if let Some(name) = target.get_attr("name") {
                    state.typed.insert(name.to_string(), value.clone());
                }
                Response::Rerender
            }
            Interaction::Select { target, option } if target.get_attr("name") == Some("status") => {
                state.status = option.clone();
                state.page = 0;
                Response::Rerender
            }
            Interaction::Click { text, .. } => match (path_of(url), text.as_str()) {
                ("/login", "Log in") => {
                    let email = state.typed.get("email").cloned().unwrap_or_default();
                    let password = state.typed.get("password").cloned().unwrap_or_default();
                    if email.is_empty() || password.is_empty() {
                        Response::Rerender
                    } else if email == EMAIL && password == PASSWORD {
                        state.logged_in = true;
                        state.login_error = None;
                        Response::Navigate("/dashboard".into())
                    } else {
                        state.login_error = Some("Invalid credentials.".into());
                        Response::Rerender
                    }
                }
                ("/sdo", "Search") => {
                    state.keyword = state.typed.get("keyword").cloned().unwrap_or_default();
                    state.page = 0;
                    state.show_all = false;
                    Response::Rerender
                }
                ("/sdo", "Amount") => {
                    state.sort = match state.sort {
                        Sort::Ascending => Sort::Descending,
                        Sort::None | Sort::Descending => Sort::Ascending,
                    };
                    state.page = 0;
                    Response::Rerender
                }
                ("/sdo", "Next") => {
                    state.page += 1;
                    Response::Rerender
                }
                ("/sdo", "Show all") => {
                    state.show_all = true;
                    Response::Rerender
                }
                (path, "Print") if path.starts_with("/liquidation-report/") => Response::Print,
                _ => Response::Rerender,
            },
            _ => Response::Rerender,
        }
    }
}

pub fn fixture_config() -> FixtureConfig {
    let mut fixtures = FixtureConfig::default();
    fixtures
        .credentials
        .insert("admin".into(), Credentials::new(EMAIL, PASSWORD));
    fixtures
        .credentials
        .insert("intruder".into(), Credentials::new(EMAIL, "wrong"));
    fixtures.values.insert("keyword".into(), "Apple".into());
    fixtures.values.insert("officer".into(), "Officer 7".into());
    fixtures
}

/// Route engine logs to the test harness; `RUST_LOG=liquiprobe=debug` shows them.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> RunnerConfig {
    init_logging();
    RunnerConfig::new()
        .with_base_url(BASE)
        .with_fixtures(fixture_config())
        .with_timeouts(TimeoutPolicy {
            fast_ms: 300,
            navigation_ms: 800,
            poll_interval_ms: 10,
        })
}

pub fn scenarios_dir() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scenarios")
}
