//! Synthetic program-model generators for the analysis benchmarks.

use ir::Program;
use loader::LoadedRules;
use serde_json::json;

const RULES: &str = "
rules:
  - id: bench.flow
    severity: HIGH
    sources:
      - method: { class: Http, name: param }
    sinks:
      - method: { class: Db, name: exec }
    sanitizers:
      - method: { class: Esc, name: clean }
";

pub fn taint_rules() -> LoadedRules {
    loader::load_rules_from_str(RULES).expect("benchmark rules must parse")
}

fn source(result: &str) -> serde_json::Value {
    json!({ "op": "call", "result": result,
            "callee": { "class": "Http", "name": "param" }, "dispatch": "static" })
}

fn sink(arg: &str) -> serde_json::Value {
    json!({ "op": "call", "callee": { "class": "Db", "name": "exec" },
            "dispatch": "static", "args": [{ "local": arg }] })
}

fn pass_sig(i: usize) -> serde_json::Value {
    json!({ "class": "Chain", "name": format!("pass{i}"),
            "params": ["java.lang.String"] })
}

/// A call chain of `depth` pass-through methods between one source and
/// one sink. Stresses summary demand depth and trace length.
pub fn chain_program(depth: usize) -> Program {
    let mut methods = vec![];
    for i in 0..=depth {
        let body = if i == 0 {
            json!([{ "op": "return", "value": { "local": "p0" } }])
        } else {
            json!([
                { "op": "call", "result": "v", "callee": pass_sig(i - 1),
                  "dispatch": "static", "args": [{ "local": "p0" }] },
                { "op": "return", "value": { "local": "v" } }
            ])
        };
        methods.push(json!({
            "sig": pass_sig(i), "is_static": true, "body": body
        }));
    }
    methods.push(json!({
        "sig": { "class": "Chain", "name": "main", "params": [] },
        "is_static": true, "entry_point": true,
        "body": [
            source("t"),
            { "op": "call", "result": "u", "callee": pass_sig(depth),
              "dispatch": "static", "args": [{ "local": "t" }] },
            sink("u")
        ]
    }));
    build(json!({ "classes": [{ "name": "Chain", "methods": methods }] }))
}

/// `width` entry points all funneling through one shared helper. The
/// helper is summarized once and replayed from every entry, so this
/// measures summary reuse and parallel replay.
pub fn diamond_program(width: usize) -> Program {
    let helper = json!({ "class": "Hub", "name": "helper",
                         "params": ["java.lang.String"] });
    let mut methods = vec![json!({
        "sig": helper.clone(), "is_static": true,
        "body": [{ "op": "return", "value": { "local": "p0" } }]
    })];
    for i in 0..width {
        methods.push(json!({
            "sig": { "class": "Hub", "name": format!("entry{i}"), "params": [] },
            "is_static": true, "entry_point": true,
            "body": [
                source("t"),
                { "op": "call", "result": "u", "callee": helper.clone(),
                  "dispatch": "static", "args": [{ "local": "t" }] },
                sink("u")
            ]
        }));
    }
    build(json!({ "classes": [{ "name": "Hub", "methods": methods }] }))
}

fn build(v: serde_json::Value) -> Program {
    Program::from_json(&v.to_string()).expect("generated model must be valid")
}
