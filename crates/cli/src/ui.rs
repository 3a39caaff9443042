//! User interface functions for the CLI.
//! Contains helpers for displaying headers and other visual elements.

pub fn print_header() {
    let version = env!("CARGO_PKG_VERSION");
    // Avoid panics when the version exceeds the expected width
    let spaces = " ".repeat(24usize.saturating_sub(version.len()));
    eprintln!(
        r#"
    ╭──────────────────────────────────────╮
    │                                      │
    │      TAINTSCOPE  ANALYZER            │
    │                                      │
    │     Interprocedural taint-flow       │
    │     analysis for JVM models          │
    │     Version: {version}{spaces}│
    │                                      │
    ╰──────────────────────────────────────╯
"#
    );
}
