//! The TaintScope analysis engine.
//!
//! Takes a program model ([`ir::Program`]) and a compiled rule set
//! ([`loader::RuleSet`]) and produces findings with witness traces. The
//! run has two phases: a bottom-up parallel pre-summarization of every
//! method, then a top-down replay of each entry point whose event log the
//! structural-constraint matcher evaluates. See [`solver`] and
//! [`matcher`] for the phase internals.

pub mod access;
pub mod callgraph;
pub mod diag;
pub mod fact;
pub mod matcher;
pub mod solver;
pub mod summary;

pub use diag::{DiagSink, Diagnostic, DiagnosticKind};
pub use fact::{StepKind, Tag, Trace, TraceStep};
pub use solver::{ReplayRun, Solver};

use callgraph::Hierarchy;
use ir::{MethodSig, Program};
use loader::{LoadedRules, Severity};
use matcher::Matcher;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use summary::SummaryTable;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on chaotic-iteration passes over recursive summary cycles.
    pub max_summary_iterations: usize,
    /// Wall-clock budget for the whole analysis; exceeding it yields a
    /// partial result plus a diagnostic.
    pub timeout: Option<Duration>,
    /// Replaces the model's entry-point selection when non-empty.
    pub entry_points: Vec<MethodSig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_summary_iterations: 10,
            timeout: None,
            entry_points: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub methods: usize,
    pub entry_points: usize,
    pub rules: usize,
    pub summaries_computed: usize,
    pub summaries_recomputed: usize,
    pub events: usize,
    pub findings: usize,
    pub summarize_ms: u128,
    pub replay_ms: u128,
}

/// One rule violation, with the witness path from source to sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Stable content hash of (rule, method, sink statement).
    pub id: String,
    pub rule_id: String,
    pub severity: Severity,
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    /// Method containing the sink call.
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: usize,
    pub stmt: usize,
    /// Source-to-sink steps, oldest first.
    pub witness: Vec<TraceStep>,
    /// Over-approximations the finding depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assumptions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub findings: Vec<Finding>,
    pub diagnostics: Vec<Diagnostic>,
    pub metrics: EngineMetrics,
}

/// Runs the analysis with default configuration.
pub fn analyze(program: &Program, rules: &LoadedRules) -> AnalysisReport {
    analyze_with_config(program, rules, &EngineConfig::default())
}

pub fn analyze_with_config(
    program: &Program,
    rules: &LoadedRules,
    config: &EngineConfig,
) -> AnalysisReport {
    let hier = Hierarchy::build(program);
    let summaries = SummaryTable::default();
    let diags = DiagSink::default();
    for rejected in &rules.rejected {
        diags.push(Diagnostic {
            kind: DiagnosticKind::MalformedRule,
            message: rejected.reason.clone(),
            method: None,
            rule: Some(rejected.id.clone()),
        });
    }
    let deadline = config.timeout.map(|t| Instant::now() + t);
    let solver = Solver::new(
        &hier,
        &rules.set,
        &summaries,
        &diags,
        deadline,
        config.max_summary_iterations,
    );

    let entries: Vec<_> = if config.entry_points.is_empty() {
        hier.entry_points()
    } else {
        config
            .entry_points
            .iter()
            .filter_map(|sig| {
                let id = hier.lookup(sig);
                if id.is_none() {
                    warn!(entry = %sig, "requested entry point is not in the model");
                }
                id
            })
            .collect()
    };
    info!(
        methods = hier.len(),
        entry_points = entries.len(),
        rules = rules.set.len(),
        "analysis started"
    );

    let t0 = Instant::now();
    solver.presummarize();
    let summarize_ms = t0.elapsed().as_millis();
    debug!(
        rows = summaries.computed(),
        elapsed_ms = summarize_ms,
        "pre-summarization finished"
    );

    let t1 = Instant::now();
    let runs: Vec<ReplayRun> = entries.par_iter().map(|&id| solver.replay(id)).collect();
    let replay_ms = t1.elapsed().as_millis();

    let matcher = Matcher::new(&rules.set, &hier);
    let mut findings: Vec<Finding> = runs.iter().flat_map(|run| matcher.findings(run)).collect();
    let mut seen = HashSet::new();
    findings.retain(|f| seen.insert(f.id.clone()));
    findings.sort_by(|a, b| {
        (&a.rule_id, &a.file, a.line, &a.method, a.stmt)
            .cmp(&(&b.rule_id, &b.file, b.line, &b.method, b.stmt))
    });

    let metrics = EngineMetrics {
        methods: hier.len(),
        entry_points: entries.len(),
        rules: rules.set.len(),
        summaries_computed: summaries.computed(),
        summaries_recomputed: summaries.recomputed(),
        events: runs.iter().map(|r| r.log.len()).sum(),
        findings: findings.len(),
        summarize_ms,
        replay_ms,
    };
    info!(findings = findings.len(), "analysis finished");
    AnalysisReport {
        findings,
        diagnostics: diags.into_sorted(),
        metrics,
    }
}
