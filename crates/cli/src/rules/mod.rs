//! Rule tooling subcommands: `rules verify` and `rules inspect`.

use anyhow::{Context, Result};
use colored::Colorize;
use std::env;
use std::path::Path;

/// Check if colored output should be used
fn use_colored_output() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    if let Ok(term) = env::var("TERM") {
        if term == "dumb" || term == "unknown" {
            return false;
        }
    }
    if env::var("CI").is_ok() || env::var("CONTINUOUS_INTEGRATION").is_ok() {
        return false;
    }
    true
}

fn print_success(tag: &str, message: &str) {
    if use_colored_output() {
        println!("[{}] {}", tag.bright_green().bold(), message);
    } else {
        println!("[{tag}] {message}");
    }
}

fn print_error(tag: &str, message: &str) {
    if use_colored_output() {
        println!("[{}] {}", tag.bright_red().bold(), message);
    } else {
        println!("[{tag}] {message}");
    }
}

/// Loads the rules at `path` and reports per-rule validity. Rejected
/// rules exit with code 1; unreadable files and duplicate ids are
/// configuration errors and abort the load.
pub fn verify_rules(path: &Path, full: bool) -> Result<()> {
    let loaded = loader::load_rules(path)
        .with_context(|| format!("failed to load rules from {}", path.display()))?;

    println!(
        "Checked {} rule(s) in {}",
        loaded.set.len() + loaded.rejected.len(),
        path.display()
    );
    for rule in &loaded.set.rules {
        print_success("OK", &format!("{} ({})", rule.id, rule.severity));
    }
    if loaded.rejected.is_empty() {
        print_success("VALID", "all rules are well-formed");
        return Ok(());
    }
    println!();
    for (i, rejected) in loaded.rejected.iter().enumerate() {
        if full || i < 10 {
            print_error("INVALID", &format!("{}: {}", rejected.id, rejected.reason));
        } else {
            print_error(
                "INVALID",
                &format!("{} more invalid rule(s)...", loaded.rejected.len() - 10),
            );
            break;
        }
    }
    std::process::exit(1);
}

/// Prints the compiled form of every rule at `path`.
pub fn inspect_rules(path: &Path) -> Result<()> {
    let loaded = loader::load_rules(path)
        .with_context(|| format!("failed to load rules from {}", path.display()))?;
    for rule in &loaded.set.rules {
        if use_colored_output() {
            println!("{}", rule.id.bright_white().bold());
        } else {
            println!("{}", rule.id);
        }
        println!("{rule:#?}");
        println!();
    }
    for rejected in &loaded.rejected {
        print_error("INVALID", &format!("{}: {}", rejected.id, rejected.reason));
    }
    Ok(())
}
