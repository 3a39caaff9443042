//! Engine behavior tests over small hand-built program models.

use engine::AnalysisReport;
use ir::Program;
use loader::LoadedRules;

mod constraints;
mod driver;
mod interprocedural;

/// Builds a normalized program model from inline JSON.
pub fn program(v: serde_json::Value) -> Program {
    Program::from_json(&v.to_string()).expect("test model must be valid")
}

pub fn rules(yaml: &str) -> LoadedRules {
    loader::load_rules_from_str(yaml).expect("test rules must parse")
}

pub fn run(v: serde_json::Value, yaml: &str) -> AnalysisReport {
    engine::analyze(&program(v), &rules(yaml))
}

/// Rule ids of the findings, in report order.
pub fn fired(report: &AnalysisReport) -> Vec<&str> {
    report.findings.iter().map(|f| f.rule_id.as_str()).collect()
}

/// One entry-point method named `App.main` wrapping `body`.
pub fn main_method(body: serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "classes": [{
            "name": "App",
            "methods": [{
                "sig": { "class": "App", "name": "main", "params": [] },
                "is_static": true,
                "entry_point": true,
                "source_file": "App.java",
                "body": body
            }]
        }]
    })
}
