//! Command implementations

use crate::commands::{ConfigArgs, RunArgs, ValidateArgs};
use crate::config::CliConfig;
use crate::error::{CliError, CliResult};
use crate::output::Reporter;
use liquiprobe::scenario::ValidationIssue;
use liquiprobe::{RunnerConfig, Scenario, ScenarioFilter, ScenarioRunner, SessionFactory, SuiteRunner};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// Scenario discovery
// =============================================================================

fn is_scenario_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

/// Scenario files named by `paths`. Directories are searched recursively;
/// the result is sorted and free of duplicates.
pub fn collect_files(paths: &[PathBuf]) -> CliResult<Vec<PathBuf>> {
    let mut files = BTreeSet::new();
    for path in paths {
        if path.is_dir() {
            let root = glob::Pattern::escape(&path.to_string_lossy());
            let pattern = format!("{root}/**/*");
            let entries = glob::glob(&pattern)
                .map_err(|e| CliError::invalid_argument(format!("{}: {e}", path.display())))?;
            for entry in entries {
                let entry = entry.map_err(glob::GlobError::into_error)?;
                if entry.is_file() && is_scenario_file(&entry) {
                    files.insert(entry);
                }
            }
        } else if path.is_file() {
            files.insert(path.clone());
        } else {
            return Err(CliError::invalid_argument(format!("{} does not exist", path.display())));
        }
    }
    Ok(files.into_iter().collect())
}

/// Parse every scenario in `paths`, in file order
pub fn load_scenarios(paths: &[PathBuf]) -> CliResult<Vec<Scenario>> {
    let mut scenarios = Vec::new();
    for file in collect_files(paths)? {
        let loaded = Scenario::load_file(&file)?;
        tracing::debug!(file = %file.display(), count = loaded.len(), "loaded scenarios");
        scenarios.extend(loaded);
    }
    Ok(scenarios)
}

/// File, then `LIQUIPROBE_*` environment
pub fn load_config(path: Option<&Path>) -> CliResult<RunnerConfig> {
    let config = match path {
        Some(path) => RunnerConfig::from_file(path)?,
        None => RunnerConfig::new(),
    };
    Ok(config.with_env_overrides()?)
}

/// Names scenarios may reference without capturing them first
#[must_use]
pub fn known_names(config: &RunnerConfig) -> BTreeSet<String> {
    config
        .fixtures
        .values
        .keys()
        .chain(config.fixtures.generated.keys())
        .cloned()
        .collect()
}

/// Lint issues across scenarios, plus duplicate names
#[must_use]
pub fn lint_all(scenarios: &[Scenario], known: &BTreeSet<String>) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut seen = BTreeSet::new();
    for scenario in scenarios {
        if !seen.insert(scenario.name.as_str()) {
            issues.push(ValidationIssue {
                scenario: scenario.name.clone(),
                location: "name".into(),
                message: "duplicate scenario name".into(),
            });
        }
        issues.extend(scenario.lint(known));
    }
    issues
}

// =============================================================================
// Commands
// =============================================================================

/// `liquiprobe validate`
pub fn validate(cli: &CliConfig, args: &ValidateArgs) -> CliResult<()> {
    let config = load_config(args.config.as_deref())?;
    let scenarios = load_scenarios(&args.paths)?;
    let issues = lint_all(&scenarios, &known_names(&config));
    Reporter::new(cli.color.should_color(), cli.verbosity.is_quiet()).validation(scenarios.len(), &issues)?;
    if issues.is_empty() {
        Ok(())
    } else {
        Err(CliError::Invalid { count: issues.len() })
    }
}

/// `liquiprobe config`
pub fn config(cli: &CliConfig, args: &ConfigArgs) -> CliResult<()> {
    let reporter = Reporter::new(cli.color.should_color(), cli.verbosity.is_quiet());
    if let Some(path) = &args.init {
        if path.exists() && !args.force {
            return Err(CliError::config(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        std::fs::write(path, RunnerConfig::new().to_yaml()?)?;
        return reporter.info(&format!("wrote {}", path.display())).map_err(Into::into);
    }
    let config = load_config(args.config.as_deref())?;
    config.validate()?;
    // Always printed: the point of the command is the output.
    println!("{}", config.to_yaml()?.trim_end());
    Ok(())
}

/// Merge command-line flags over the loaded configuration
pub fn apply_flags(mut config: RunnerConfig, args: &RunArgs) -> CliResult<RunnerConfig> {
    if let Some(url) = &args.base_url {
        config = config.with_base_url(url.clone());
    }
    if let Some(workers) = args.workers {
        if workers == 0 {
            return Err(CliError::invalid_argument("--workers must be at least 1"));
        }
        config = config.with_workers(workers);
    }
    if args.headed {
        config = config.with_headless(false);
    }
    if let Some(path) = &args.report {
        config = config.with_report_path(path.clone());
    }
    config.validate()?;
    Ok(config)
}

/// Scenarios selected by `--filter` and `--tag`
#[must_use]
pub fn select(scenarios: Vec<Scenario>, args: &RunArgs) -> Vec<Scenario> {
    let mut filter = ScenarioFilter::new();
    if let Some(name) = &args.filter {
        filter = filter.with_name(name.clone());
    }
    for tag in &args.tags {
        filter = filter.with_tag(tag.clone());
    }
    scenarios.into_iter().filter(|s| filter.matches(s)).collect()
}

#[cfg(feature = "browser")]
fn session_factory(config: &RunnerConfig) -> CliResult<Arc<dyn SessionFactory>> {
    Ok(Arc::new(liquiprobe::ChromiumSessionFactory::new(config.browser.clone())))
}

#[cfg(not(feature = "browser"))]
fn session_factory(_config: &RunnerConfig) -> CliResult<Arc<dyn SessionFactory>> {
    Err(CliError::BrowserUnavailable)
}

/// `liquiprobe run`
pub async fn run(cli: &CliConfig, args: &RunArgs) -> CliResult<()> {
    let config = apply_flags(load_config(args.config.as_deref())?, args)?;
    let scenarios = select(load_scenarios(&args.paths)?, args);
    if scenarios.is_empty() {
        return Err(CliError::NothingToRun);
    }
    let issues = lint_all(&scenarios, &known_names(&config));
    if !issues.is_empty() {
        Reporter::new(cli.color.should_color(), false).validation(scenarios.len(), &issues)?;
        return Err(CliError::Invalid { count: issues.len() });
    }

    let factory = session_factory(&config)?;
    let report_path = config.report_path.clone();
    tracing::info!(
        scenarios = scenarios.len(),
        workers = config.workers,
        base_url = %config.base_url,
        "starting suite"
    );
    let mut suite = SuiteRunner::new(ScenarioRunner::new(config), factory);
    if args.fail_fast {
        suite = suite.with_fail_fast();
    }
    let report = suite.run(&scenarios).await;

    if let Some(path) = report_path {
        report.save_json(&path)?;
        tracing::info!(path = %path.display(), "report written");
    }
    Reporter::new(cli.color.should_color(), cli.verbosity.is_quiet())
        .with_trail(cli.verbosity.is_verbose())
        .suite(&report, args.format.into())?;

    if report.all_passed() {
        Ok(())
    } else {
        Err(CliError::ScenariosFailed {
            failed: report.failed_count(),
            total: report.total(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands};
    use clap::Parser;
    use std::fs;

    const LOGIN: &str = r"
name: login
tags: [auth]
setup:
  - navigate: { url: /login }
steps:
  - authenticate: { credentials: admin }
assertions:
  - predicate: { url_contains: /dashboard }
";

    const SEARCH: &str = r"
name: search
tags: [sdo]
steps:
  - act:
      query: { by: placeholder, text: Search SDO }
      action: fill
      value: '${keyword}'
assertions:
  - predicate: { url_contains: /sdo }
";

    fn run_args(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["liquiprobe", "run", "x.yaml"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Run(args) => args,
            _ => unreachable!(),
        }
    }

    mod discovery_tests {
        use super::*;

        #[test]
        fn test_collects_yaml_recursively_and_sorted() {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir(dir.path().join("nested")).unwrap();
            fs::write(dir.path().join("b.yaml"), LOGIN).unwrap();
            fs::write(dir.path().join("nested/a.yml"), SEARCH).unwrap();
            fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
            let files = collect_files(&[dir.path().to_path_buf()]).unwrap();
            assert_eq!(files.len(), 2);
            assert!(files[0].ends_with("b.yaml"));
            assert!(files[1].ends_with("nested/a.yml"));
        }

        #[test]
        fn test_directory_name_with_glob_characters() {
            let dir = tempfile::tempdir().unwrap();
            let odd = dir.path().join("suite [nightly]");
            fs::create_dir(&odd).unwrap();
            fs::write(odd.join("login.yaml"), LOGIN).unwrap();
            let files = collect_files(&[odd]).unwrap();
            assert_eq!(files.len(), 1);
            assert!(files[0].ends_with("login.yaml"));
        }

        #[test]
        fn test_missing_path_is_an_argument_error() {
            let err = collect_files(&[PathBuf::from("/nonexistent/scenarios")]).unwrap_err();
            assert!(matches!(err, CliError::InvalidArgument { .. }));
        }

        #[test]
        fn test_explicit_file_without_extension_is_kept() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("scenario");
            fs::write(&path, LOGIN).unwrap();
            assert_eq!(load_scenarios(&[path]).unwrap().len(), 1);
        }
    }

    mod lint_tests {
        use super::*;

        #[test]
        fn test_unknown_variable_reported_until_fixture_declared() {
            let scenarios = vec![Scenario::from_yaml(SEARCH).unwrap()];
            let config = RunnerConfig::new();
            assert!(!lint_all(&scenarios, &known_names(&config)).is_empty());

            let mut config = RunnerConfig::new();
            config.fixtures.values.insert("keyword".into(), "Apple".into());
            assert!(lint_all(&scenarios, &known_names(&config)).is_empty());
        }

        #[test]
        fn test_duplicate_names() {
            let scenarios = vec![Scenario::from_yaml(LOGIN).unwrap(), Scenario::from_yaml(LOGIN).unwrap()];
            let issues = lint_all(&scenarios, &BTreeSet::new());
            assert!(issues.iter().any(|i| i.message == "duplicate scenario name"));
        }
    }

    mod flag_tests {
        use super::*;

        #[test]
        fn test_flags_override_config() {
            let args = run_args(&["--base-url", "http://staging:9000", "-j", "3", "--headed"]);
            let config = apply_flags(RunnerConfig::new(), &args).unwrap();
            assert_eq!(config.base_url, "http://staging:9000");
            assert_eq!(config.workers, 3);
            assert!(!config.browser.headless);
        }

        #[test]
        fn test_zero_workers_rejected() {
            let args = run_args(&["-j", "0"]);
            assert!(apply_flags(RunnerConfig::new(), &args).is_err());
        }

        #[test]
        fn test_select_by_tag_and_name() {
            let scenarios = vec![Scenario::from_yaml(LOGIN).unwrap(), Scenario::from_yaml(SEARCH).unwrap()];
            assert_eq!(select(scenarios.clone(), &run_args(&["--tag", "sdo"]))[0].name, "search");
            assert_eq!(select(scenarios.clone(), &run_args(&["--filter", "log"]))[0].name, "login");
            assert!(select(scenarios, &run_args(&["--tag", "none"])).is_empty());
        }
    }
}
