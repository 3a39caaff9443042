//! Conversion of analysis reports to SARIF 2.1.0.
//!
//! Each finding becomes one result whose witness path is carried as a
//! code flow; engine diagnostics become tool-execution notifications on
//! the run's invocation.

use engine::{AnalysisReport, Diagnostic, DiagnosticKind, Finding, TraceStep};
use loader::Severity;
use serde_sarif::sarif;
use std::collections::BTreeSet;

const TOOL_NAME: &str = "TaintScope";

fn level_of(sev: Severity) -> sarif::ResultLevel {
    match sev {
        Severity::Info => sarif::ResultLevel::Note,
        Severity::Low => sarif::ResultLevel::Note,
        Severity::Medium => sarif::ResultLevel::Warning,
        Severity::High => sarif::ResultLevel::Error,
        Severity::Critical => sarif::ResultLevel::Error,
    }
}

fn location(file: Option<&str>, line: usize, text: &str) -> sarif::Location {
    let region = sarif::Region::builder()
        .start_line(line.max(1) as i64)
        .build();
    let physical = sarif::PhysicalLocation::builder()
        .artifact_location(
            sarif::ArtifactLocation::builder()
                .uri(file.unwrap_or("<model>").to_string())
                .build(),
        )
        .region(region)
        .build();
    sarif::Location::builder()
        .physical_location(physical)
        .message(sarif::Message::builder().text(text.to_string()).build())
        .build()
}

fn code_flow(finding: &Finding) -> sarif::CodeFlow {
    let locations: Vec<sarif::ThreadFlowLocation> = finding
        .witness
        .iter()
        .map(|step: &TraceStep| {
            let text = match &step.note {
                Some(note) => format!("{:?}: {note}", step.kind),
                None => format!("{:?}", step.kind),
            };
            sarif::ThreadFlowLocation::builder()
                .location(location(finding.file.as_deref(), step.line, &text))
                .build()
        })
        .collect();
    sarif::CodeFlow::builder()
        .thread_flows(vec![sarif::ThreadFlow::builder()
            .locations(locations)
            .build()])
        .build()
}

fn result_of(finding: &Finding) -> sarif::Result {
    let sink = location(
        finding.file.as_deref(),
        finding.line,
        &format!("sink in {}", finding.method),
    );
    let builder = sarif::Result::builder()
        .rule_id(finding.rule_id.clone())
        .message(
            sarif::Message::builder()
                .text(finding.message.clone())
                .build(),
        )
        .level(level_of(finding.severity))
        .locations(vec![sink]);
    // Setting a field changes the builder's type, so each arm finishes
    // its own builder.
    if finding.witness.is_empty() {
        builder.build()
    } else {
        builder.code_flows(vec![code_flow(finding)]).build()
    }
}

fn notification_of(diag: &Diagnostic) -> sarif::Notification {
    // The level setter takes a raw JSON value in serde-sarif 0.8.
    let level = match diag.kind {
        DiagnosticKind::MalformedRule => "error",
        DiagnosticKind::UnresolvedCall => "warning",
        DiagnosticKind::SummaryDivergence => "warning",
        DiagnosticKind::Timeout => "warning",
    };
    sarif::Notification::builder()
        .message(
            sarif::Message::builder()
                .text(diag.message.clone())
                .build(),
        )
        .level(serde_json::json!(level))
        .build()
}

pub fn to_sarif(report: &AnalysisReport) -> sarif::Sarif {
    let results: Vec<sarif::Result> = report.findings.iter().map(result_of).collect();

    let rule_ids: BTreeSet<&str> = report
        .findings
        .iter()
        .map(|f| f.rule_id.as_str())
        .collect();
    let rules: Vec<sarif::ReportingDescriptor> = rule_ids
        .into_iter()
        .map(|id| sarif::ReportingDescriptor::builder().id(id.to_string()).build())
        .collect();

    let invocation = sarif::Invocation::builder()
        .execution_successful(true)
        .tool_execution_notifications(
            report
                .diagnostics
                .iter()
                .map(notification_of)
                .collect::<Vec<_>>(),
        )
        .build();

    sarif::Sarif::builder()
        .version(serde_json::json!("2.1.0"))
        .schema(sarif::SCHEMA_URL.to_string())
        .runs(vec![sarif::Run::builder()
            .tool(
                sarif::Tool::builder()
                    .driver(
                        sarif::ToolComponent::builder()
                            .name(TOOL_NAME)
                            .rules(rules)
                            .build(),
                    )
                    .build(),
            )
            .invocations(vec![invocation])
            .results(results)
            .build()])
        .build()
}
