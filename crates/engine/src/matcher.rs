//! Structural-constraint evaluation over the replay event log.
//!
//! The solver decides reachability; this module decides whether a sink
//! call that tainted data reached actually violates its rule. Each sink
//! event is checked against the rule's tag coverage, the `via` producer,
//! the call-chain bound, constant-argument identity, concatenation
//! order, required call sequences and `not_inside` scopes, using the
//! intra-method value numbering and flow relations from the patterns
//! crate.

use crate::callgraph::Hierarchy;
use crate::fact::{StepKind, Tag, Trace, TraceStep};
use crate::solver::ReplayRun;
use crate::Finding;
use ir::MethodSig;
use loader::{CompiledRule, RuleSet, SinkSpec};
use patterns::events::{CallEvent, EventKind};
use patterns::flow::{flow_precedes, ValueTable};
use patterns::{ArgPos, ChainBound, Requires, ScopePosition};
use std::collections::HashMap;
use tracing::trace;

type TableCache = HashMap<MethodSig, Option<ValueTable>>;

pub struct Matcher<'a> {
    rules: &'a RuleSet,
    hier: &'a Hierarchy<'a>,
}

impl<'a> Matcher<'a> {
    pub fn new(rules: &'a RuleSet, hier: &'a Hierarchy<'a>) -> Self {
        Matcher { rules, hier }
    }

    /// All rule violations witnessed by one entry point's replay.
    pub fn findings(&self, run: &ReplayRun) -> Vec<Finding> {
        let mut tables = TableCache::new();
        let mut out = Vec::new();
        for event in &run.log.events {
            let Some(callee) = event.callee() else {
                continue;
            };
            for (ri, rule) in self.rules.rules.iter().enumerate() {
                let Some(sink) = rule.matches_sink(callee) else {
                    continue;
                };
                if let Some(finding) =
                    self.evaluate(run, event, ri as u16, rule, sink, &mut tables)
                {
                    out.push(finding);
                }
            }
        }
        out
    }

    fn evaluate(
        &self,
        run: &ReplayRun,
        event: &CallEvent,
        ri: u16,
        rule: &CompiledRule,
        sink: &SinkSpec,
        tables: &mut TableCache,
    ) -> Option<Finding> {
        let views: Vec<(ArgPos, &patterns::OperandView)> = sink
            .args
            .iter()
            .filter_map(|&pos| event.operand(pos).map(|v| (pos, v)))
            .collect();
        if !sink.args.is_empty() && views.is_empty() {
            return None;
        }

        // Tag coverage. A rule without sources, or a sink without checked
        // positions, is satisfied vacuously and reports at the sink.
        let tagged = !rule.sources.is_empty() && !sink.args.is_empty();
        let witness = views
            .iter()
            .find_map(|(pos, view)| {
                view.tags
                    .iter()
                    .find(|t| t.rule == ri)
                    .map(|t| (*pos, *t))
            });
        if tagged {
            witness?;
            if sink.requires == Requires::All {
                for si in 0..rule.sources.len() as u16 {
                    let covered = views
                        .iter()
                        .any(|(_, v)| v.tags.contains(&Tag { rule: ri, source: si }));
                    if !covered {
                        return None;
                    }
                }
            }
        }
        let trace = witness
            .and_then(|(pos, tag)| run.traces.get(&(event.order, pos, tag)))
            .cloned()
            .unwrap_or_default();

        if let Some(ca) = &rule.constraints.const_arg {
            let view = event.operand(ca.position)?;
            if view.constant_identity() != Some(&ca.field) {
                return None;
            }
        }

        let vt = tables
            .entry(event.method.clone())
            .or_insert_with(|| {
                self.hier
                    .lookup(&event.method)
                    .map(|id| ValueTable::build(self.hier.method(id).method))
            })
            .as_ref();

        // The value number the sink consumes, from the position carrying
        // the witness tag (or the first variable position).
        let sink_vn = vt.and_then(|vt| {
            let var = witness
                .and_then(|(pos, _)| event.operand(pos))
                .and_then(|v| v.var.as_deref())
                .or_else(|| views.iter().find_map(|(_, v)| v.var.as_deref()))?;
            vt.vn_read(event.stmt, var)
        });

        let producer = match (&sink.via, vt, sink_vn) {
            (Some(via), Some(vt), Some(vn)) => {
                let producer = latest_producer(run, event, vt, vn)?;
                if !via.matches(producer.callee()?) {
                    return None;
                }
                Some(producer)
            }
            (Some(_), _, _) => return None,
            _ => None,
        };

        if let Some(bound) = &rule.constraints.call_chain {
            let mut hops = trace.call_hops();
            // A hop charged for passing through the via producer itself
            // is not an intermediary between source and sink.
            if let Some(p) = producer {
                if trace_hops_through(&trace, p, &event.method) {
                    hops = hops.saturating_sub(1);
                }
            }
            if !within(bound, hops) {
                trace!(rule = %rule.id, hops, "call-chain bound rejected sink");
                return None;
            }
        }

        if let Some(order) = &rule.constraints.concat_order {
            let vt = vt?;
            let vn = sink_vn?;
            let concat = latest_concat(run, event, vt, vn)?;
            let EventKind::Concat { left, right, .. } = &concat.kind else {
                return None;
            };
            let left_idx = rule.source_index_by_name(&order.left)?;
            let right_idx = rule.source_index_by_name(&order.right)?;
            if !left.tags.contains(&Tag { rule: ri, source: left_idx })
                || !right.tags.contains(&Tag { rule: ri, source: right_idx })
            {
                return None;
            }
        }

        if !rule.constraints.sequence.is_empty() {
            let first = self.match_sequence(run, event, ri, rule, vt, sink_vn)?;
            // A sanitizer acting on the tracked value between the first
            // required call and the sink breaks the pattern.
            for e in &run.log.events {
                let Some(callee) = e.callee() else { continue };
                let Some(spec) = rule.matches_sanitizer(callee) else {
                    continue;
                };
                if holds_tracked(e, &spec.args, vt, sink_vn, ri)
                    && flow_precedes(first, e)
                    && flow_precedes(e, event)
                {
                    return None;
                }
            }
        }

        for scope in &rule.constraints.not_inside {
            for e in &run.log.events {
                let Some(callee) = e.callee() else { continue };
                if !scope.pattern.matches(callee) {
                    continue;
                }
                if !holds_tracked(e, &scope.args, vt, sink_vn, ri) {
                    continue;
                }
                let inside = match scope.position {
                    ScopePosition::Prefix => flow_precedes(e, event),
                    ScopePosition::Suffix => flow_precedes(event, e),
                };
                if inside {
                    return None;
                }
            }
        }

        Some(self.finding(event, rule, &trace))
    }

    /// Greedy ordered match of the rule's required call sequence; returns
    /// the first selected event.
    fn match_sequence<'r>(
        &self,
        run: &'r ReplayRun,
        sink: &CallEvent,
        ri: u16,
        rule: &CompiledRule,
        vt: Option<&ValueTable>,
        sink_vn: Option<u32>,
    ) -> Option<&'r CallEvent> {
        let mut first = None;
        let mut prev: Option<&CallEvent> = None;
        for step in &rule.constraints.sequence {
            let found = run.log.events.iter().find(|e| {
                let Some(callee) = e.callee() else {
                    return false;
                };
                step.pattern.matches(callee)
                    && holds_tracked(e, &step.args, vt, sink_vn, ri)
                    && flow_precedes(e, sink)
                    && prev.map_or(true, |p| flow_precedes(p, e))
            })?;
            if first.is_none() {
                first = Some(found);
            }
            prev = Some(found);
        }
        first
    }

    fn finding(&self, event: &CallEvent, rule: &CompiledRule, trace: &Trace) -> Finding {
        let method = event.method.to_string();
        let mut witness = trace.steps();
        witness.push(TraceStep {
            method: method.clone(),
            stmt: event.stmt,
            line: event.line,
            kind: StepKind::Sink,
            note: event.callee().map(|c| c.to_string()),
        });
        let assumptions = trace
            .conservative_notes()
            .into_iter()
            .map(|sig| {
                format!("effects of {sig} were over-approximated (no implementation in the model)")
            })
            .collect();
        let file = self
            .hier
            .lookup(&event.method)
            .and_then(|id| self.hier.method(id).method.source_file.clone());
        let id = blake3::hash(format!("{}|{}|{}", rule.id, method, event.stmt).as_bytes())
            .to_hex()
            .to_string();
        Finding {
            id,
            rule_id: rule.id.clone(),
            severity: rule.severity,
            category: rule.category.clone(),
            message: rule.message.clone(),
            remediation: rule.remediation.clone(),
            method,
            file,
            line: event.line,
            stmt: event.stmt,
            witness,
            assumptions,
        }
    }
}

fn within(bound: &ChainBound, hops: usize) -> bool {
    let hops = u32::try_from(hops).unwrap_or(u32::MAX);
    bound.min <= hops && hops <= bound.max
}

/// The latest call event before `sink` (in flow order) whose result holds
/// the sink's tracked value.
fn latest_producer<'r>(
    run: &'r ReplayRun,
    sink: &CallEvent,
    vt: &ValueTable,
    sink_vn: u32,
) -> Option<&'r CallEvent> {
    run.log
        .events
        .iter()
        .rev()
        .filter(|e| flow_precedes(e, sink))
        .find(|e| {
            matches!(e.kind, EventKind::Call { .. })
                && e.result_var()
                    .and_then(|r| vt.vn_def(e.stmt, r))
                    .is_some_and(|vn| vn == sink_vn)
        })
}

/// The latest concatenation before `sink` producing the tracked value.
fn latest_concat<'r>(
    run: &'r ReplayRun,
    sink: &CallEvent,
    vt: &ValueTable,
    sink_vn: u32,
) -> Option<&'r CallEvent> {
    run.log
        .events
        .iter()
        .rev()
        .filter(|e| flow_precedes(e, sink))
        .find(|e| {
            matches!(e.kind, EventKind::Concat { .. })
                && e.result_var()
                    .and_then(|r| vt.vn_def(e.stmt, r))
                    .is_some_and(|vn| vn == sink_vn)
        })
}

/// Whether an event acts on the sink's tracked value at one of
/// `positions`: the same value number, or a tag of the same rule when
/// numbering cannot relate them. Empty positions mean order alone
/// suffices.
fn holds_tracked(
    event: &CallEvent,
    positions: &[ArgPos],
    vt: Option<&ValueTable>,
    sink_vn: Option<u32>,
    ri: u16,
) -> bool {
    if positions.is_empty() {
        return true;
    }
    positions.iter().any(|&pos| {
        let Some(view) = event.operand(pos) else {
            return false;
        };
        let by_vn = match (vt, sink_vn, view.var.as_deref()) {
            (Some(vt), Some(vn), Some(var)) => vt.vn_read(event.stmt, var) == Some(vn),
            _ => false,
        };
        by_vn || view.tagged_for_rule(ri)
    })
}

/// Whether the witness passed through `producer`'s call on its way to the
/// sink: a pass-through hop after the last source, recorded at the
/// producer's statement in the sink's method.
fn trace_hops_through(trace: &Trace, producer: &CallEvent, method: &MethodSig) -> bool {
    let method = method.to_string();
    trace
        .steps()
        .iter()
        .rev()
        .take_while(|s| s.kind != StepKind::Source)
        .any(|s| s.kind == StepKind::CallThrough && s.stmt == producer.stmt && s.method == method)
}
