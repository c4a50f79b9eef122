//! Result rendering

use console::{style, Term};
use liquiprobe::scenario::ValidationIssue;
use liquiprobe::{ScenarioReport, ScenarioResult, SuiteReport};
use std::fmt::Write as _;

/// Output format for suite results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON suite report
    Json,
}

/// Writes results to stdout
#[derive(Debug)]
pub struct Reporter {
    term: Term,
    /// Whether to use colors
    pub use_color: bool,
    /// Quiet mode
    pub quiet: bool,
    /// Print each scenario's trail
    pub show_trail: bool,
}

impl Reporter {
    /// Create a new reporter
    #[must_use]
    pub fn new(use_color: bool, quiet: bool) -> Self {
        console::set_colors_enabled(use_color);
        Self {
            term: Term::stdout(),
            use_color,
            quiet,
            show_trail: false,
        }
    }

    /// Also print diagnostic trails
    #[must_use]
    pub const fn with_trail(mut self, show: bool) -> Self {
        self.show_trail = show;
        self
    }

    /// Print a suite report in `format`
    pub fn suite(&self, report: &SuiteReport, format: OutputFormat) -> std::io::Result<()> {
        let text = match format {
            OutputFormat::Json => serde_json::to_string_pretty(report).map_err(std::io::Error::other)?,
            OutputFormat::Text => render_suite(report, self.quiet, self.show_trail),
        };
        self.term.write_line(text.trim_end())
    }

    /// Print validation results
    pub fn validation(&self, scenarios: usize, issues: &[ValidationIssue]) -> std::io::Result<()> {
        for issue in issues {
            self.term.write_line(&format!("{} {issue}", style("✗").red()))?;
        }
        if self.quiet {
            return Ok(());
        }
        let line = if issues.is_empty() {
            format!("{} {scenarios} scenario(s) valid", style("✓").green())
        } else {
            format!("{} issue(s) in {scenarios} scenario(s)", style(issues.len()).red().bold())
        };
        self.term.write_line(&line)
    }

    /// Print a plain line unless quiet
    pub fn info(&self, line: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        self.term.write_line(line)
    }
}

/// One line per scenario, then a summary
#[must_use]
pub fn render_suite(report: &SuiteReport, quiet: bool, show_trail: bool) -> String {
    let mut out = String::new();
    for scenario in &report.scenarios {
        if quiet && !scenario.result.is_failed() {
            continue;
        }
        let _ = writeln!(out, "{}", scenario_line(scenario));
        if show_trail || scenario.result.is_failed() {
            for entry in &scenario.trail.entries {
                let _ = writeln!(out, "    {}", style(entry).dim());
            }
        }
    }
    if !quiet {
        let _ = writeln!(out, "\n{}", summary_line(report));
    }
    out
}

fn scenario_line(report: &ScenarioReport) -> String {
    match &report.result {
        ScenarioResult::Passed => format!(
            "{} {} {}",
            style("✓").green(),
            report.name,
            style(format!("({}ms)", report.duration_ms)).dim()
        ),
        ScenarioResult::Failed {
            cause,
            message,
            last_observed,
        } => {
            let mut line = format!("{} {} [{cause}] {message}", style("✗").red().bold(), report.name);
            if let Some(observed) = last_observed {
                let _ = write!(line, "\n    last observed: {observed}");
            }
            line
        }
        ScenarioResult::Skipped { reason } => {
            format!("{} {} skipped: {reason}", style("-").yellow(), report.name)
        }
    }
}

fn summary_line(report: &SuiteReport) -> String {
    let passed = style(format!("{} passed", report.passed_count())).green();
    let failed = if report.failed_count() > 0 {
        style(format!("{} failed", report.failed_count())).red().bold()
    } else {
        style(format!("{} failed", report.failed_count())).dim()
    };
    let skipped = style(format!("{} skipped", report.skipped_count())).yellow();
    format!("{passed}, {failed}, {skipped} in {}ms", report.duration_ms)
}
