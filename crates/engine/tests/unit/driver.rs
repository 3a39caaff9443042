//! End-to-end driver behavior: determinism, deduplication, entry-point
//! selection, budgets and malformed-rule handling.

use crate::{main_method, program, rules, run};
use engine::{analyze_with_config, DiagnosticKind, EngineConfig};
use ir::MethodSig;
use serde_json::json;
use std::time::Duration;

const SQLI: &str = "
rules:
  - id: web.sqli
    sources:
      - method: { class: Http, name: param }
    sinks:
      - method: { class: Db, name: exec }
";

fn source(result: &str) -> serde_json::Value {
    json!({ "op": "call", "result": result,
            "callee": { "class": "Http", "name": "param" }, "dispatch": "static" })
}

fn sink(arg: &str) -> serde_json::Value {
    json!({ "op": "call", "callee": { "class": "Db", "name": "exec" },
            "dispatch": "static", "args": [{ "local": arg }] })
}

fn two_entries_one_sink() -> serde_json::Value {
    // both entry points funnel into the same flagged statement
    json!({ "classes": [{ "name": "App", "methods": [
        {
            "sig": { "class": "App", "name": "e1", "params": [] },
            "is_static": true, "entry_point": true,
            "body": [
                source("t"),
                { "op": "call",
                  "callee": { "class": "App", "name": "report",
                              "params": ["java.lang.String"] },
                  "dispatch": "static", "args": [{ "local": "t" }] }
            ]
        },
        {
            "sig": { "class": "App", "name": "e2", "params": [] },
            "is_static": true, "entry_point": true,
            "body": [
                source("u"),
                { "op": "call",
                  "callee": { "class": "App", "name": "report",
                              "params": ["java.lang.String"] },
                  "dispatch": "static", "args": [{ "local": "u" }] }
            ]
        },
        {
            "sig": { "class": "App", "name": "report",
                     "params": ["java.lang.String"] },
            "is_static": true,
            "body": [sink("p0")]
        }
    ]}]})
}

#[test]
fn repeated_runs_are_identical() {
    let model = two_entries_one_sink();
    let a = run(model.clone(), SQLI);
    let b = run(model, SQLI);
    assert_eq!(a.findings, b.findings);
    assert_eq!(a.diagnostics, b.diagnostics);
}

#[test]
fn one_statement_yields_one_finding_across_entry_points() {
    let report = run(two_entries_one_sink(), SQLI);
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].method, "App.report(java.lang.String)");
}

#[test]
fn explicit_entry_points_replace_the_declared_ones() {
    // redirect analysis to a harmless method; the flagged entry is skipped
    let model = json!({ "classes": [{ "name": "App", "methods": [
        {
            "sig": { "class": "App", "name": "main", "params": [] },
            "is_static": true, "entry_point": true,
            "body": [source("t"), sink("t")]
        },
        {
            "sig": { "class": "App", "name": "idle", "params": [] },
            "is_static": true,
            "body": [{ "op": "return" }]
        }
    ]}]});
    let config = EngineConfig {
        entry_points: vec![MethodSig::new("App", "idle", &[])],
        ..EngineConfig::default()
    };
    let report = analyze_with_config(&program(model), &rules(SQLI), &config);
    assert!(report.findings.is_empty());
    assert_eq!(report.metrics.entry_points, 1);
}

#[test]
fn an_expired_deadline_stops_with_a_timeout_diagnostic() {
    let config = EngineConfig {
        timeout: Some(Duration::from_millis(0)),
        ..EngineConfig::default()
    };
    let report = analyze_with_config(
        &program(main_method(json!([source("t"), sink("t")]))),
        &rules(SQLI),
        &config,
    );
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::Timeout));
    assert!(report.findings.is_empty());
}

#[test]
fn a_malformed_rule_is_reported_and_skipped() {
    let loaded = rules(
        "
rules:
  - id: bad.rule
    sources:
      - method: { class: Http, name: param }
  - id: web.sqli
    sources:
      - method: { class: Http, name: param }
    sinks:
      - method: { class: Db, name: exec }
",
    );
    let report = analyze_with_config(
        &program(main_method(json!([source("t"), sink("t")]))),
        &loaded,
        &EngineConfig::default(),
    );
    assert!(report.diagnostics.iter().any(|d| {
        d.kind == DiagnosticKind::MalformedRule && d.rule.as_deref() == Some("bad.rule")
    }));
    assert_eq!(crate::fired(&report), vec!["web.sqli"]);
}

#[test]
fn metrics_reflect_the_run() {
    let report = run(main_method(json!([source("t"), sink("t")])), SQLI);
    assert_eq!(report.metrics.methods, 1);
    assert_eq!(report.metrics.entry_points, 1);
    assert_eq!(report.metrics.rules, 1);
    assert_eq!(report.metrics.findings, 1);
    assert!(report.metrics.events >= 2);
}
