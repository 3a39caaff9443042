use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use loader::Severity;

use crate::output::Format;

fn parse_severity(s: &str) -> Result<Severity, String> {
    s.parse()
}

fn parse_threads(s: &str) -> Result<usize, String> {
    let v: usize = s
        .parse()
        .map_err(|e: std::num::ParseIntError| e.to_string())?;
    if v == 0 {
        Err("threads must be greater than 0".into())
    } else {
        Ok(v)
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "TaintScope - interprocedural taint-flow analysis for JVM program models",
    long_about = "TaintScope analyzes a JVM-shaped program model for taint flows: values
born at configured sources that reach configured sinks without passing
through a sanitizer, tracked across calls, fields and string
concatenation, with structural constraints (call sequences, scoped
cleaners, constant arguments, producer and call-chain requirements)
evaluated on witness paths.

Examples:
  taintscope analyze model.json --rules rules/       # Analyze a model
  taintscope analyze model.json --format sarif       # SARIF output
  taintscope rules verify rules/                     # Validate a ruleset",
    subcommand_required = true,
    disable_version_flag = true
)]
pub struct Cli {
    /// Show version information
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    pub version: Option<bool>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
#[allow(clippy::large_enum_variant)]
pub enum Commands {
    /// Analyze a program model for taint flows
    Analyze(AnalyzeArgs),
    /// Manage taint rules
    #[command(subcommand, alias = "rule")]
    Rules(RulesCmd),
}

#[derive(ClapArgs)]
pub struct AnalyzeArgs {
    /// Path to the program model (JSON)
    pub model: PathBuf,
    /// Rule file or directory; repeatable, defaults to the configured rule dirs
    #[arg(long)]
    pub rules: Vec<PathBuf>,
    /// Output format for findings
    #[arg(long, value_enum, default_value_t = Format::Text)]
    pub format: Format,
    /// Exit with code 1 if findings of this severity or higher exist
    #[arg(long = "fail-on", value_parser = parse_severity)]
    pub fail_on: Option<Severity>,
    /// Number of worker threads (default: available parallelism)
    #[arg(long, value_parser = parse_threads)]
    pub threads: Option<usize>,
    /// Entry-point override as `Class.name(params)`; repeatable
    #[arg(long = "entry")]
    pub entries: Vec<String>,
    /// Path to the configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Print engine metrics as JSON on stderr
    #[arg(long)]
    pub metrics: bool,
    /// Analysis wall-clock budget in milliseconds
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,
    /// Iteration budget for recursive summary refinement
    #[arg(long = "max-summary-iterations")]
    pub max_summary_iterations: Option<usize>,
    /// Enable debug output
    #[arg(long)]
    pub debug: bool,
    /// Suppress the header and statistics UI
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum RulesCmd {
    /// Verify that rules are correctly formatted
    Verify {
        /// Path to the rules directory or file
        path: PathBuf,
        /// Show all rejected rules without truncation
        #[arg(long)]
        full: bool,
    },
    /// Print the compiled form of each rule
    Inspect {
        /// Path to the rules directory or file
        path: PathBuf,
    },
}

/// Parses CLI arguments, exiting on `--help`/`--version`.
pub fn parse_cli() -> Cli {
    Cli::parse()
}
