//! The `analyze` subcommand: loads the model and the rules, runs the
//! engine and renders the report.

use anyhow::{bail, Context, Result};
use engine::EngineConfig;
use loader::LoadedRules;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::AnalyzeArgs;
use crate::config::load_config;
use crate::output::{self, Format};
use crate::{parse_entry, ui};

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Loads every rule path, merging into one set. Duplicate ids across
/// paths are a configuration error, same as within one load.
fn load_rule_paths(paths: &[PathBuf]) -> Result<LoadedRules> {
    let mut merged = LoadedRules::default();
    let mut seen: HashSet<String> = HashSet::new();
    for path in paths {
        let loaded = loader::load_rules(path)
            .with_context(|| format!("failed to load rules from {}", path.display()))?;
        for rule in loaded.set.rules {
            if !seen.insert(rule.id.clone()) {
                bail!("duplicate rule id: {}", rule.id);
            }
            merged.set.rules.push(rule);
        }
        merged.rejected.extend(loaded.rejected);
    }
    Ok(merged)
}

pub fn run_analyze(args: AnalyzeArgs) -> Result<()> {
    init_logging(args.debug);
    let config = load_config(args.config.as_deref())?;

    let threads = args
        .threads
        .or(config.analysis.threads)
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()));
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
    {
        error!("failed to build global thread pool: {e}");
    }

    let program = ir::load_program(&args.model)?;

    let rule_paths = if args.rules.is_empty() {
        config.rules.rule_dirs.clone()
    } else {
        args.rules.clone()
    };
    let rules = load_rule_paths(&rule_paths)?;
    if rules.set.is_empty() {
        warn!("no rules loaded, the analysis cannot produce findings");
    }

    let entries = args
        .entries
        .iter()
        .map(|s| parse_entry(s))
        .collect::<Result<Vec<_>>>()?;

    let defaults = EngineConfig::default();
    let engine_config = EngineConfig {
        max_summary_iterations: args
            .max_summary_iterations
            .or(config.analysis.max_summary_iterations)
            .unwrap_or(defaults.max_summary_iterations),
        timeout: args
            .timeout_ms
            .or(config.analysis.timeout_ms)
            .map(Duration::from_millis),
        entry_points: entries,
    };

    let show_ui = args.format == Format::Text && !args.quiet;
    if show_ui {
        ui::print_header();
    }
    info!(
        model = %args.model.display(),
        rules = rules.set.len(),
        threads,
        "analysis started"
    );

    let report = engine::analyze_with_config(&program, &rules, &engine_config);

    output::print_report(&report, args.format, show_ui)?;
    if args.metrics {
        let data = serde_json::to_string_pretty(&report.metrics)?;
        eprintln!("{data}");
    }
    info!(
        findings = report.findings.len(),
        diagnostics = report.diagnostics.len(),
        "analysis completed"
    );
    if let Some(threshold) = args.fail_on {
        if report.findings.iter().any(|f| f.severity >= threshold) {
            std::process::exit(1);
        }
    }
    Ok(())
}
