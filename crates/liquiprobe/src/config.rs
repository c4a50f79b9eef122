//! Runner configuration.
//!
//! Loaded from YAML, every field defaulted, then overridden from the
//! environment:
//!
//! | Variable               | Field      |
//! |------------------------|------------|
//! | `LIQUIPROBE_BASE_URL`  | `base_url` |
//! | `LIQUIPROBE_WORKERS`   | `workers`  |
//! | `LIQUIPROBE_HEADLESS`  | `browser.headless` |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::driver::join_url;
use crate::fixture::FixtureConfig;
use crate::locator::ElementQuery;
use crate::result::{ProbeError, ProbeResult};
use crate::wait::TimeoutPolicy;

/// Base URL environment override
pub const ENV_BASE_URL: &str = "LIQUIPROBE_BASE_URL";
/// Worker count environment override
pub const ENV_WORKERS: &str = "LIQUIPROBE_WORKERS";
/// Headless environment override
pub const ENV_HEADLESS: &str = "LIQUIPROBE_HEADLESS";

/// Browser launch options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    /// Run without a window
    pub headless: bool,
    /// Chromium binary; auto-detected when unset
    pub chromium_path: Option<PathBuf>,
    /// Keep the Chromium sandbox enabled
    pub sandbox: bool,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            chromium_path: None,
            sandbox: true,
        }
    }
}

/// How `Authenticate` drives the login form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginForm {
    /// Label of the email field
    pub email_label: String,
    /// Label of the password field
    pub password_label: String,
    /// Submit control
    pub submit: ElementQuery,
    /// The landing URL contains this after a successful login
    pub landing_url_contains: String,
}

impl Default for LoginForm {
    fn default() -> Self {
        Self {
            email_label: "Email".to_string(),
            password_label: "Password".to_string(),
            submit: ElementQuery::role("button", "Log in"),
            landing_url_contains: "/dashboard".to_string(),
        }
    }
}

/// Everything a run needs besides the scenarios
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Application base URL; relative navigations are joined onto it
    pub base_url: String,
    /// Wait budgets
    pub timeouts: TimeoutPolicy,
    /// Concurrent scenario workers
    pub workers: usize,
    /// Browser launch options
    pub browser: BrowserOptions,
    /// Login form description
    pub login: LoginForm,
    /// Fixture data
    pub fixtures: FixtureConfig,
    /// Where to write the JSON report
    pub report_path: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            timeouts: TimeoutPolicy::default(),
            workers: 1,
            browser: BrowserOptions::default(),
            login: LoginForm::default(),
            fixtures: FixtureConfig::default(),
            report_path: None,
        }
    }
}

impl RunnerConfig {
    /// Defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse YAML
    pub fn from_yaml_str(yaml: &str) -> ProbeResult<Self> {
        Ok(crate::yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> ProbeResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ProbeError::Config {
            message: format!("cannot read {}: {e}", path.display()),
        })?;
        Self::from_yaml_str(&text)
    }

    /// Serialize as YAML
    pub fn to_yaml(&self) -> ProbeResult<String> {
        Ok(crate::yaml::to_string(self)?)
    }

    /// Set base URL
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set worker count
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set headless mode
    #[must_use]
    pub const fn with_headless(mut self, headless: bool) -> Self {
        self.browser.headless = headless;
        self
    }

    /// Set wait budgets
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set fixtures
    #[must_use]
    pub fn with_fixtures(mut self, fixtures: FixtureConfig) -> Self {
        self.fixtures = fixtures;
        self
    }

    /// Set the JSON report path
    #[must_use]
    pub fn with_report_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.report_path = Some(path.into());
        self
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> ProbeResult<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> ProbeResult<Self> {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|u| !u.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(workers) = lookup(ENV_WORKERS) {
            self.workers = workers.trim().parse().map_err(|_| ProbeError::Config {
                message: format!("{ENV_WORKERS} must be a positive integer, got {workers:?}"),
            })?;
        }
        if let Some(headless) = lookup(ENV_HEADLESS) {
            self.browser.headless = parse_bool(&headless).ok_or_else(|| ProbeError::Config {
                message: format!("{ENV_HEADLESS} must be true or false, got {headless:?}"),
            })?;
        }
        Ok(self)
    }

    /// Reject settings no run could use
    pub fn validate(&self) -> ProbeResult<()> {
        self.timeouts.validate()?;
        if self.workers == 0 {
            return Err(ProbeError::Config {
                message: "workers must be at least 1".to_string(),
            });
        }
        if !self.base_url.contains("://") {
            return Err(ProbeError::Config {
                message: format!("base_url must be absolute, got {:?}", self.base_url),
            });
        }
        Ok(())
    }

    /// Resolve a scenario URL against `base_url`
    #[must_use]
    pub fn url(&self, href: &str) -> String {
        join_url(&self.base_url, href)
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
