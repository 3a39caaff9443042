//! Entry point for the command-line interface.
//! Delegates to dedicated modules for argument handling, analysis and
//! rule tooling.

use taintscope::analyze::run_analyze;
use taintscope::args::{parse_cli, Commands, RulesCmd};
use taintscope::rules::{inspect_rules, verify_rules};

fn main() {
    let cli = parse_cli();
    let result = match cli.command {
        Commands::Analyze(args) => run_analyze(args),
        Commands::Rules(RulesCmd::Verify { path, full }) => verify_rules(&path, full),
        Commands::Rules(RulesCmd::Inspect { path }) => inspect_rules(&path),
    };
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        // configuration errors: unloadable model, rules or config
        std::process::exit(2);
    }
}
