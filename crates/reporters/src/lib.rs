//! Formatters for analysis reports in text, JSON and SARIF.
//! Provide human and tool-friendly output.

use engine::{AnalysisReport, EngineMetrics, Finding, StepKind};
use loader::Severity;
use std::io::{self, Write};
use std::str::FromStr;
use tracing::debug;

mod sarif;

/// Returns the severity colored with simple ANSI codes.
/// Adds no external dependencies.
fn color_severity(sev: Severity) -> String {
    let (code, text) = match sev {
        Severity::Info => ("\x1b[32m", "INFO"),
        Severity::Low => ("\x1b[32m", "LOW"),
        Severity::Medium => ("\x1b[33m", "MEDIUM"),
        Severity::High => ("\x1b[31m", "HIGH"),
        Severity::Critical => ("\x1b[31m", "CRITICAL"),
    };
    format!("{code}{text}\x1b[0m")
}

fn simple_box(title: &str) -> String {
    let width = title.len() + 2;
    format!(
        "╭{}╮\n│ {} │\n╰{}╯\n",
        "─".repeat(width),
        title,
        "─".repeat(width)
    )
}

/// Run statistics rendered above the results in text mode.
fn render_stats(metrics: &EngineMetrics) -> String {
    let mut output = String::new();
    output.push_str(&simple_box("Analysis Status"));
    output.push('\n');
    output.push_str(&format!(
        "    Analyzed {} methods from {} entry points with {} rules\n\n",
        metrics.methods, metrics.entry_points, metrics.rules
    ));
    output.push_str("    Metric                    Value\n");
    output.push_str(
        "    ──────────────────────────────────────────────\n",
    );
    output.push_str(&format!(
        "    Summaries computed        {}\n",
        metrics.summaries_computed
    ));
    output.push_str(&format!(
        "    Summaries recomputed      {}\n",
        metrics.summaries_recomputed
    ));
    output.push_str(&format!(
        "    Call events replayed      {}\n",
        metrics.events
    ));
    output.push_str(&format!(
        "    Summarize phase           {}ms\n",
        metrics.summarize_ms
    ));
    output.push_str(&format!(
        "    Replay phase              {}ms\n",
        metrics.replay_ms
    ));
    output
}

fn step_label(kind: StepKind) -> &'static str {
    match kind {
        StepKind::Source => "source",
        StepKind::Move => "move",
        StepKind::FieldHop => "field",
        StepKind::ConcatJoin => "concat",
        StepKind::Propagate => "propagate",
        StepKind::CallThrough => "call",
        StepKind::Conservative => "assumed",
        StepKind::Sink => "sink",
    }
}

fn render_finding(out: &mut impl Write, f: &Finding) -> io::Result<()> {
    let location = match &f.file {
        Some(file) => format!("{}:{}", file, f.line),
        None => f.method.clone(),
    };
    writeln!(
        out,
        "{} {} {}",
        color_severity(f.severity),
        location,
        f.rule_id
    )?;
    writeln!(out, "    {}", f.message)?;
    writeln!(out, "    in {}", f.method)?;
    for (i, step) in f.witness.iter().enumerate() {
        let note = step.note.as_deref().unwrap_or("");
        writeln!(
            out,
            "    {:>2}. {:<9} {}:{} {}",
            i + 1,
            step_label(step.kind),
            step.method,
            step.line,
            note
        )?;
    }
    if let Some(r) = &f.remediation {
        writeln!(out, "    • Remediation: {r}")?;
    }
    for a in &f.assumptions {
        writeln!(out, "    • Assumes: {a}")?;
    }
    writeln!(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Supported formats for printing reports.
pub enum Format {
    /// Human-readable output in plain text.
    Text,
    /// JSON structure for integrations.
    Json,
    /// Report conforming to the SARIF 2.1.0 specification.
    Sarif,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Format::Text),
            "json" => Ok(Format::Json),
            "sarif" => Ok(Format::Sarif),
            other => Err(format!("unknown format: {other}")),
        }
    }
}

/// Prints the report on stdout in the selected format.
///
/// `stats` controls the text-mode statistics header; JSON and SARIF
/// always carry the full report.
pub fn print_report(report: &AnalysisReport, fmt: Format, stats: bool) -> io::Result<()> {
    let mut out = io::stdout();
    write_report(&mut out, report, fmt, stats)
}

/// Writes the report to a generic `Write`, used for tests.
pub fn write_report<W: Write>(
    out: &mut W,
    report: &AnalysisReport,
    fmt: Format,
    stats: bool,
) -> io::Result<()> {
    debug!(
        ?fmt,
        findings = report.findings.len(),
        diagnostics = report.diagnostics.len(),
        "rendering report"
    );
    match fmt {
        Format::Text => {
            if stats {
                writeln!(out, "{}", render_stats(&report.metrics))?;
            }
            writeln!(out, "{}", simple_box("Results"))?;
            if report.findings.is_empty() {
                writeln!(out, "✔ No issues found.")?;
            } else {
                writeln!(out, "⚠ Found {} issue(s):\n", report.findings.len())?;
                for f in &report.findings {
                    render_finding(out, f)?;
                }
                writeln!(out, "Total: {}", report.findings.len())?;
            }
            if !report.diagnostics.is_empty() {
                writeln!(out)?;
                writeln!(out, "{}", simple_box("Diagnostics"))?;
                for d in &report.diagnostics {
                    match &d.rule {
                        Some(rule) => writeln!(out, "{:?} [{}] {}", d.kind, rule, d.message)?,
                        None => writeln!(out, "{:?} {}", d.kind, d.message)?,
                    }
                }
            }
        }
        Format::Json => {
            serde_json::to_writer_pretty(&mut *out, report)?;
            writeln!(out)?;
        }
        Format::Sarif => {
            let sarif = sarif::to_sarif(report);
            serde_json::to_writer_pretty(&mut *out, &sarif)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
