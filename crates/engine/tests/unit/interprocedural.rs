//! Cross-method flow: descent into callees, summaries for recursion, and
//! the conservative unresolved-call policy.

use crate::{fired, program, rules};
use engine::{analyze_with_config, DiagnosticKind, EngineConfig};
use serde_json::json;

const SQLI: &str = "
rules:
  - id: web.sqli
    severity: HIGH
    sources:
      - method: { class: Http, name: param }
    sinks:
      - method: { class: Db, name: exec }
    sanitizers:
      - method: { class: Esc, name: clean }
";

fn source(result: &str) -> serde_json::Value {
    json!({ "op": "call", "result": result,
            "callee": { "class": "Http", "name": "param" }, "dispatch": "static" })
}

fn sink(arg: &str) -> serde_json::Value {
    json!({ "op": "call", "callee": { "class": "Db", "name": "exec" },
            "dispatch": "static", "args": [{ "local": arg }] })
}

#[test]
fn sink_inside_a_wrapper_callee() {
    let report = crate::run(
        json!({ "classes": [{ "name": "App", "methods": [
            {
                "sig": { "class": "App", "name": "main", "params": [] },
                "is_static": true, "entry_point": true,
                "body": [
                    source("t"),
                    { "op": "call",
                      "callee": { "class": "App", "name": "logQuery",
                                  "params": ["java.lang.String"] },
                      "dispatch": "static", "args": [{ "local": "t" }] }
                ]
            },
            {
                "sig": { "class": "App", "name": "logQuery",
                         "params": ["java.lang.String"] },
                "is_static": true,
                "body": [sink("p0")]
            }
        ]}]}),
        SQLI,
    );
    assert_eq!(fired(&report), vec!["web.sqli"]);
    assert_eq!(report.findings[0].method, "App.logQuery(java.lang.String)");
}

#[test]
fn source_inside_a_helper() {
    let report = crate::run(
        json!({ "classes": [{ "name": "App", "methods": [
            {
                "sig": { "class": "App", "name": "main", "params": [] },
                "is_static": true, "entry_point": true,
                "body": [
                    { "op": "call", "result": "u",
                      "callee": { "class": "App", "name": "fetch", "params": [] },
                      "dispatch": "static" },
                    sink("u")
                ]
            },
            {
                "sig": { "class": "App", "name": "fetch", "params": [] },
                "is_static": true,
                "body": [
                    source("t"),
                    { "op": "return", "value": { "local": "t" } }
                ]
            }
        ]}]}),
        SQLI,
    );
    assert_eq!(fired(&report), vec!["web.sqli"]);
    // the witness crosses the call boundary
    assert!(report.findings[0]
        .witness
        .iter()
        .any(|s| s.kind == engine::StepKind::CallThrough));
}

#[test]
fn taint_through_a_field_set_by_a_setter() {
    let report = crate::run(
        json!({ "classes": [{ "name": "Holder", "methods": [
            {
                "sig": { "class": "Holder", "name": "main", "params": [] },
                "is_static": true, "entry_point": true,
                "body": [
                    source("t"),
                    { "op": "call",
                      "callee": { "class": "Holder", "name": "set",
                                  "params": ["java.lang.String"] },
                      "receiver": { "local": "h" }, "args": [{ "local": "t" }] },
                    { "op": "call", "result": "u",
                      "callee": { "class": "Holder", "name": "get", "params": [] },
                      "receiver": { "local": "h" } },
                    sink("u")
                ]
            },
            {
                "sig": { "class": "Holder", "name": "set",
                         "params": ["java.lang.String"] },
                "body": [
                    { "op": "field_write", "object": "this",
                      "field": { "class": "Holder", "name": "data" },
                      "value": { "local": "p0" } }
                ]
            },
            {
                "sig": { "class": "Holder", "name": "get", "params": [] },
                "body": [
                    { "op": "field_read", "lhs": "x", "object": "this",
                      "field": { "class": "Holder", "name": "data" } },
                    { "op": "return", "value": { "local": "x" } }
                ]
            }
        ]}]}),
        SQLI,
    );
    assert_eq!(fired(&report), vec!["web.sqli"]);
}

#[test]
fn sanitizer_inside_a_callee_cleans_the_returned_value() {
    let report = crate::run(
        json!({ "classes": [{ "name": "App", "methods": [
            {
                "sig": { "class": "App", "name": "main", "params": [] },
                "is_static": true, "entry_point": true,
                "body": [
                    source("t"),
                    { "op": "call", "result": "u",
                      "callee": { "class": "App", "name": "escape",
                                  "params": ["java.lang.String"] },
                      "dispatch": "static", "args": [{ "local": "t" }] },
                    sink("u")
                ]
            },
            {
                "sig": { "class": "App", "name": "escape",
                         "params": ["java.lang.String"] },
                "is_static": true,
                "body": [
                    { "op": "call", "callee": { "class": "Esc", "name": "clean" },
                      "dispatch": "static", "args": [{ "local": "p0" }] },
                    { "op": "return", "value": { "local": "p0" } }
                ]
            }
        ]}]}),
        SQLI,
    );
    assert!(report.findings.is_empty());
}

fn recursive_model() -> serde_json::Value {
    json!({ "classes": [{ "name": "App", "methods": [
        {
            "sig": { "class": "App", "name": "main", "params": [] },
            "is_static": true, "entry_point": true,
            "body": [
                source("t"),
                { "op": "call", "result": "r",
                  "callee": { "class": "App", "name": "rec",
                              "params": ["java.lang.String"] },
                  "dispatch": "static", "args": [{ "local": "t" }] },
                sink("r")
            ]
        },
        {
            "sig": { "class": "App", "name": "rec", "params": ["java.lang.String"] },
            "is_static": true,
            "body": [
                { "op": "branch",
                  "then": [
                      { "op": "call", "result": "w",
                        "callee": { "class": "App", "name": "rec",
                                    "params": ["java.lang.String"] },
                        "dispatch": "static", "args": [{ "local": "p0" }] },
                      { "op": "return", "value": { "local": "w" } }
                  ],
                  "else": [
                      { "op": "return", "value": { "local": "p0" } }
                  ] }
            ]
        }
    ]}]})
}

#[test]
fn recursion_converges() {
    let report = crate::run(recursive_model(), SQLI);
    assert_eq!(fired(&report), vec!["web.sqli"]);
    assert!(!report
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::SummaryDivergence));
}

#[test]
fn exhausted_iteration_budget_freezes_with_a_diagnostic() {
    let config = EngineConfig {
        max_summary_iterations: 0,
        ..EngineConfig::default()
    };
    let report = analyze_with_config(&program(recursive_model()), &rules(SQLI), &config);
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.kind == DiagnosticKind::SummaryDivergence));
}

#[test]
fn unresolved_call_taints_conservatively_and_documents_it() {
    let report = crate::run(
        crate::main_method(json!([
            source("t"),
            { "op": "call", "result": "u",
              "callee": { "class": "Lib", "name": "transform",
                          "params": ["java.lang.String"] },
              "dispatch": "static", "args": [{ "local": "t" }] },
            sink("u")
        ])),
        SQLI,
    );
    assert_eq!(fired(&report), vec!["web.sqli"]);
    let f = &report.findings[0];
    assert!(f
        .assumptions
        .iter()
        .any(|a| a.contains("Lib.transform(java.lang.String)")));
    assert!(report.diagnostics.iter().any(|d| {
        d.kind == DiagnosticKind::UnresolvedCall
            && d.message.contains("Lib.transform(java.lang.String)")
    }));
}

#[test]
fn virtual_dispatch_reaches_overrides() {
    // The declared receiver type is Provider; the tainting override lives
    // in a subtype, and both candidates are analyzed.
    let report = crate::run(
        json!({ "classes": [
            { "name": "App", "methods": [{
                "sig": { "class": "App", "name": "main", "params": [] },
                "is_static": true, "entry_point": true,
                "body": [
                    { "op": "call", "result": "v",
                      "callee": { "class": "Provider", "name": "get", "params": [] },
                      "receiver": { "local": "p" } },
                    sink("v")
                ]
            }]},
            { "name": "Provider", "methods": [{
                "sig": { "class": "Provider", "name": "get", "params": [] },
                "body": [
                    { "op": "return", "value": { "const": { "str": "fixed" } } }
                ]
            }]},
            { "name": "Evil", "superclass": "Provider", "methods": [{
                "sig": { "class": "Evil", "name": "get", "params": [] },
                "body": [
                    source("t"),
                    { "op": "return", "value": { "local": "t" } }
                ]
            }]}
        ]}),
        SQLI,
    );
    assert_eq!(fired(&report), vec!["web.sqli"]);
}
