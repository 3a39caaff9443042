//! Two-phase interprocedural solver.
//!
//! **Summarize** runs a demand-driven tabulation: `(method, entry fact)`
//! rows are computed by an abstract walk of the method body, callee rows
//! applied recursively. A demand for a row still being computed is served
//! the conservative placeholder; rows that consumed one are refined by
//! bounded chaotic iteration and frozen (with a diagnostic) if they do
//! not stabilize.
//!
//! **Replay** walks each entry point with concrete facts, descending into
//! resolved callee bodies so sinks inside callees fire under the caller's
//! context. Descents are memoized on `(method, entry-state digest)`;
//! repeats fall back to summary application. The replay records the call
//! event log the pattern matcher consumes.
//!
//! Both phases share the flow functions: strong update on local
//! assignment, weak update on field and array writes, tag-union
//! concatenation with the allowed-constant exception, per-rule
//! source/sanitizer/propagator precedence at calls, and the conservative
//! policy for calls without a resolvable target.

use crate::access::{AccessPath, Root, Selector};
use crate::callgraph::{is_immutable_type, Hierarchy, MethodId, Resolution};
use crate::diag::{DiagSink, Diagnostic, DiagnosticKind};
use crate::fact::{is_marker, StepKind, Tag, TaintState, Trace, TraceStep, ENTRY_MARKER};
use crate::summary::{
    placeholder, EntryFact, ExitPos, FactRoot, RowKey, RowState, SummaryFlow, SummaryTable,
};
use ir::{CallStmt, MethodSig, Operand, Statement, StmtKind};
use loader::{PropagatorSpec, RuleSet, SanitizerSpec, SourceSpec};
use patterns::events::{CallEvent, EventKind, EventLog, OperandView};
use patterns::ArgPos;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// The replay output for one entry point: the event log plus the witness
/// trace of every tagged operand snapshot, keyed by event order and
/// position.
pub struct ReplayRun {
    pub entry: MethodId,
    pub log: EventLog,
    pub traces: HashMap<(usize, ArgPos, Tag), Trace>,
}

pub struct Solver<'p> {
    hier: &'p Hierarchy<'p>,
    rules: &'p RuleSet,
    summaries: &'p SummaryTable,
    diags: &'p DiagSink,
    deadline: Option<Instant>,
    max_iterations: usize,
}

/// Local state of one summarization demand chain.
#[derive(Default)]
struct SumCtx {
    /// Rows whose value consumed a placeholder or another approximate row.
    dirty: BTreeSet<RowKey>,
    /// Whether the computation in progress consumed an approximate value.
    approx: bool,
}

#[derive(Default)]
struct ReplayCtx {
    log: EventLog,
    traces: HashMap<(usize, ArgPos, Tag), Trace>,
    /// Enclosing branch arms, outermost first, for the current method.
    branch: Vec<(usize, bool)>,
    /// Descents already taken, by callee and entry-state digest.
    visited: HashSet<(MethodId, u64)>,
}

enum Mode<'m> {
    Summarize(&'m mut SumCtx),
    Replay(&'m mut ReplayCtx),
}

/// Per-method walk state shared by both phases.
struct WalkCtx {
    sig: MethodSig,
    sig_str: String,
    /// Variables whose facts are visible to the caller at exit.
    exit_roots: BTreeMap<String, ExitPos>,
    state: TaintState,
    exits: Vec<ExitFlow>,
}

/// One fact observed at a method exit, before conversion to a summary
/// flow or mapping back to a call site.
#[derive(Debug, Clone)]
struct ExitFlow {
    to: ExitPos,
    fields: Vec<Selector>,
    widened: bool,
    tag: Tag,
    trace: Trace,
}

/// How one rule treats a given call. Exactly one treatment applies per
/// rule: a predicate match overrides the callee's summary effects.
enum Gov<'r> {
    Source(u16, &'r SourceSpec),
    Sanitize(&'r SanitizerSpec),
    Propagate(&'r PropagatorSpec),
    None,
}

fn operand_base(op: &Operand) -> Option<AccessPath> {
    match op {
        Operand::Local(v) => Some(AccessPath::var(v)),
        Operand::StaticField(f) => Some(AccessPath::static_field(f.clone())),
        Operand::Const(_) => None,
    }
}

impl<'p> Solver<'p> {
    pub fn new(
        hier: &'p Hierarchy<'p>,
        rules: &'p RuleSet,
        summaries: &'p SummaryTable,
        diags: &'p DiagSink,
        deadline: Option<Instant>,
        max_iterations: usize,
    ) -> Self {
        Solver {
            hier,
            rules,
            summaries,
            diags,
            deadline,
            max_iterations,
        }
    }

    /// Bottom-up parallel pre-summarization: every method's `Zero` row,
    /// one SCC per worker so cycle refinement stays single-threaded.
    pub fn presummarize(&self) {
        for level in self.hier.scc_levels() {
            level.par_iter().for_each(|scc| {
                let mut ctx = SumCtx::default();
                for &id in scc {
                    self.demand((id, EntryFact::Zero), &mut ctx);
                }
                self.refine(&mut ctx);
            });
        }
    }

    /// Concrete top-down walk from one entry point.
    pub fn replay(&self, entry: MethodId) -> ReplayRun {
        let mut rctx = ReplayCtx::default();
        rctx.visited.insert((entry, TaintState::default().digest()));
        let _ = self.walk_method(entry, TaintState::default(), &mut Mode::Replay(&mut rctx));
        ReplayRun {
            entry,
            log: rctx.log,
            traces: rctx.traces,
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    // --- summarization -------------------------------------------------

    fn demand(&self, key: RowKey, ctx: &mut SumCtx) -> Arc<Vec<SummaryFlow>> {
        match self.summaries.get(&key) {
            Some(RowState::Done(flows)) | Some(RowState::Frozen(flows)) => return flows,
            Some(RowState::InProgress) => {
                ctx.approx = true;
                return placeholder(&key.1);
            }
            None => {}
        }
        self.summaries.begin(&key);
        let saved = std::mem::replace(&mut ctx.approx, false);
        let flows = Arc::new(self.compute_row(&key, ctx));
        self.summaries.complete(&key, flows.clone());
        if ctx.approx {
            ctx.dirty.insert(key);
        }
        ctx.approx |= saved;
        flows
    }

    fn compute_row(&self, key: &RowKey, ctx: &mut SumCtx) -> Vec<SummaryFlow> {
        let (id, entry) = key;
        let keep_real = matches!(entry, EntryFact::Zero);
        let mut state = TaintState::default();
        if let EntryFact::At {
            root,
            fields,
            widened,
        } = entry
        {
            let method = self.hier.method(*id).method;
            let base = match root {
                FactRoot::This => Root::Var("this".to_string()),
                FactRoot::Param(i) => match method.params.get(usize::from(*i)) {
                    Some(name) => Root::Var(name.clone()),
                    None => return Vec::new(),
                },
                FactRoot::StaticRoot(f) => Root::Static(f.clone()),
            };
            state.facts.insert(
                AccessPath::with_fields(base, fields.clone(), *widened),
                ENTRY_MARKER,
                Trace::default(),
            );
        }
        let exits = self.walk_method(*id, state, &mut Mode::Summarize(ctx));
        let mut seen = BTreeSet::new();
        let mut flows = Vec::new();
        for flow in exits {
            // `Zero` rows keep facts born inside; positional rows keep
            // only what derives from the entry marker (births are the
            // `Zero` row's business).
            if keep_real == is_marker(flow.tag) {
                continue;
            }
            if seen.insert((flow.to.clone(), flow.fields.clone(), flow.widened, flow.tag)) {
                flows.push(SummaryFlow {
                    to: flow.to,
                    fields: flow.fields,
                    widened: flow.widened,
                    tag: flow.tag,
                    trace: flow.trace.steps(),
                });
            }
        }
        flows.sort();
        flows
    }

    /// Chaotic iteration over rows computed under a placeholder, bounded
    /// by `max_iterations`. Rows that fail to stabilize are frozen at
    /// their last value, which is sound because placeholder input only
    /// over-approximates.
    fn refine(&self, ctx: &mut SumCtx) {
        if ctx.dirty.is_empty() {
            return;
        }
        for iteration in 0..self.max_iterations {
            let mut changed = false;
            for key in ctx.dirty.clone() {
                let old = match self.summaries.get(&key) {
                    Some(RowState::Frozen(_)) => continue,
                    Some(RowState::Done(flows)) => flows,
                    _ => Arc::new(Vec::new()),
                };
                let mut sub = SumCtx::default();
                let new = Arc::new(self.compute_row(&key, &mut sub));
                ctx.dirty.extend(sub.dirty);
                if !rows_equivalent(&old, &new) {
                    changed = true;
                }
                self.summaries.complete(&key, new);
            }
            if !changed {
                debug!(iterations = iteration + 1, rows = ctx.dirty.len(), "summary cycle stabilized");
                ctx.dirty.clear();
                return;
            }
        }
        for key in std::mem::take(&mut ctx.dirty) {
            let sig = self.hier.method(key.0).method.sig.to_string();
            self.summaries.freeze(&key);
            if self.diags.push_once(
                format!("divergence:{sig}"),
                Diagnostic {
                    kind: DiagnosticKind::SummaryDivergence,
                    message: format!(
                        "summary of {sig} did not stabilize after {} iterations; keeping last value",
                        self.max_iterations
                    ),
                    method: Some(sig.clone()),
                    rule: None,
                },
            ) {
                warn!(method = %sig, "summary iteration diverged; row frozen");
            }
        }
    }

    // --- the abstract/concrete walker ----------------------------------

    fn walk_method(&self, id: MethodId, state: TaintState, mode: &mut Mode<'_>) -> Vec<ExitFlow> {
        let mref = self.hier.method(id);
        let mut exit_roots = BTreeMap::new();
        if !mref.method.is_static {
            exit_roots.insert("this".to_string(), ExitPos::This);
        }
        for (i, name) in mref.method.params.iter().enumerate() {
            exit_roots.insert(name.clone(), ExitPos::Param(i as u16));
        }
        let mut w = WalkCtx {
            sig: mref.method.sig.clone(),
            sig_str: mref.method.sig.to_string(),
            exit_roots,
            state,
            exits: Vec::new(),
        };
        if self.walk_stmts(&mut w, mode, &mref.method.body) {
            let flows = self.exit_flows(&w, None);
            w.exits.extend(flows);
        }
        w.exits
    }

    /// Walks a statement list. Returns whether flow falls through to the
    /// code after it.
    fn walk_stmts(&self, w: &mut WalkCtx, mode: &mut Mode<'_>, stmts: &'p [Statement]) -> bool {
        for stmt in stmts {
            if self.expired() {
                if self.diags.push_once(
                    "timeout".to_string(),
                    Diagnostic {
                        kind: DiagnosticKind::Timeout,
                        message: "analysis deadline exceeded; results are partial".to_string(),
                        method: Some(w.sig_str.clone()),
                        rule: None,
                    },
                ) {
                    warn!(method = %w.sig_str, "deadline exceeded; abandoning remaining work");
                }
                return false;
            }
            match &stmt.kind {
                StmtKind::Assign { lhs, value } => self.apply_assign(w, stmt, lhs, value),
                StmtKind::Concat { lhs, left, right } => {
                    self.apply_concat(w, mode, stmt, lhs, left, right)
                }
                StmtKind::FieldRead { lhs, object, field } => {
                    self.apply_read(w, stmt, lhs, AccessPath::var(object).field(&field.name))
                }
                StmtKind::FieldWrite {
                    object,
                    field,
                    value,
                } => self.apply_write(w, stmt, AccessPath::var(object).field(&field.name), value),
                StmtKind::ArrayRead { lhs, array } => {
                    self.apply_read(w, stmt, lhs, AccessPath::var(array).index())
                }
                StmtKind::ArrayWrite { array, value } => {
                    self.apply_write(w, stmt, AccessPath::var(array).index(), value)
                }
                StmtKind::Call(call) => self.apply_call(w, mode, stmt, call),
                StmtKind::Return { value } => {
                    if let Mode::Replay(r) = mode {
                        r.log.push(CallEvent {
                            order: 0,
                            method: w.sig.clone(),
                            stmt: stmt.id,
                            line: stmt.line,
                            branch: r.branch.clone(),
                            exits: true,
                            kind: EventKind::Return,
                        });
                    }
                    let flows = self.exit_flows(w, value.as_ref());
                    w.exits.extend(flows);
                    return false;
                }
                StmtKind::Branch {
                    then_branch,
                    else_branch,
                } => {
                    if !self.apply_branch(w, mode, stmt, then_branch, else_branch) {
                        return false;
                    }
                }
            }
        }
        true
    }

    fn apply_branch(
        &self,
        w: &mut WalkCtx,
        mode: &mut Mode<'_>,
        stmt: &Statement,
        then_branch: &'p [Statement],
        else_branch: &'p [Statement],
    ) -> bool {
        let entry_state = w.state.clone();
        let mark = if let Mode::Replay(r) = mode {
            r.branch.push((stmt.id, true));
            r.log.len()
        } else {
            0
        };
        let then_fell = self.walk_stmts(w, mode, then_branch);
        if let Mode::Replay(r) = mode {
            r.branch.pop();
            if !then_fell {
                mark_no_exit(&mut r.log, mark, &w.sig);
            }
            r.branch.push((stmt.id, false));
        }
        let then_state = std::mem::replace(&mut w.state, entry_state);
        let mark = if let Mode::Replay(r) = mode {
            r.log.len()
        } else {
            0
        };
        let else_fell = self.walk_stmts(w, mode, else_branch);
        if let Mode::Replay(r) = mode {
            r.branch.pop();
            if !else_fell {
                mark_no_exit(&mut r.log, mark, &w.sig);
            }
        }
        match (then_fell, else_fell) {
            (true, true) => {
                w.state.join(&then_state);
                true
            }
            (true, false) => {
                w.state = then_state;
                true
            }
            (false, true) => true,
            (false, false) => false,
        }
    }

    fn apply_assign(&self, w: &mut WalkCtx, stmt: &Statement, lhs: &str, value: &Operand) {
        let mut add = Vec::new();
        if let Some(base) = operand_base(value) {
            let step = step_at(w, stmt, StepKind::Move, None);
            add = self.copied_facts(w, &base, &AccessPath::var(lhs), &step);
        }
        let (identity, benign) = match value {
            Operand::Local(y) => (
                w.state.identity.get(y).cloned(),
                w.state.benign.get(y).cloned(),
            ),
            Operand::StaticField(f) => (Some(f.clone()), None),
            Operand::Const(_) => (None, None),
        };
        w.state.clear_var(lhs);
        for (path, tag, trace) in add {
            w.state.facts.insert(path, tag, trace);
        }
        if let Some(f) = identity {
            w.state.identity.insert(lhs.to_string(), f);
        }
        if let Some(marks) = benign {
            if !marks.is_empty() {
                w.state.benign.insert(lhs.to_string(), marks);
            }
        }
    }

    /// Concatenation unions the root tags of both operands onto the
    /// result. An operand carrying a rule's allowed-constant mark does
    /// not contribute that rule's tags.
    fn apply_concat(
        &self,
        w: &mut WalkCtx,
        mode: &mut Mode<'_>,
        stmt: &Statement,
        lhs: &str,
        left: &Operand,
        right: &Operand,
    ) {
        if let Mode::Replay(r) = mode {
            let event = CallEvent {
                order: 0,
                method: w.sig.clone(),
                stmt: stmt.id,
                line: stmt.line,
                branch: r.branch.clone(),
                exits: true,
                kind: EventKind::Concat {
                    lhs: lhs.to_string(),
                    left: self.operand_view(w, left),
                    right: self.operand_view(w, right),
                },
            };
            r.log.push(event);
        }
        let step = step_at(w, stmt, StepKind::ConcatJoin, None);
        let mut add = Vec::new();
        for op in [left, right] {
            let Some(base) = operand_base(op) else { continue };
            for (tag, trace) in w.state.facts.tags_covering(&base) {
                if !is_marker(tag) {
                    if let Some(v) = op.as_local() {
                        if w.state.benign.get(v).is_some_and(|m| m.contains(&tag.rule)) {
                            continue;
                        }
                    }
                }
                add.push((AccessPath::var(lhs), tag, trace.push(step.clone())));
            }
        }
        w.state.clear_var(lhs);
        for (path, tag, trace) in add {
            w.state.facts.insert(path, tag, trace);
        }
    }

    /// Field/array load: facts implied at the source path (prefixes
    /// included) land on the destination root, deeper facts keep their
    /// suffix. Strong update on the destination.
    fn apply_read(&self, w: &mut WalkCtx, stmt: &Statement, lhs: &str, src: AccessPath) {
        let step = step_at(w, stmt, StepKind::FieldHop, None);
        let add = self.copied_facts(w, &src, &AccessPath::var(lhs), &step);
        w.state.clear_var(lhs);
        for (path, tag, trace) in add {
            w.state.facts.insert(path, tag, trace);
        }
    }

    /// Field/array store: weak update, the cell may be one of many.
    fn apply_write(&self, w: &mut WalkCtx, stmt: &Statement, dst: AccessPath, value: &Operand) {
        let Some(base) = operand_base(value) else {
            return;
        };
        let step = step_at(w, stmt, StepKind::FieldHop, None);
        let add = self.copied_facts(w, &base, &dst, &step);
        for (path, tag, trace) in add {
            w.state.facts.insert(path, tag, trace);
        }
    }

    /// Facts flowing from `src` (and below) onto `dst`, suffixes kept.
    fn copied_facts(
        &self,
        w: &WalkCtx,
        src: &AccessPath,
        dst: &AccessPath,
        step: &TraceStep,
    ) -> Vec<(AccessPath, Tag, Trace)> {
        let mut out = Vec::new();
        for (tag, trace) in w.state.facts.tags_covering(src) {
            out.push((dst.clone(), tag, trace.push(step.clone())));
        }
        for (path, tags) in w.state.facts.extensions_of(src) {
            let moved = path.rebase(src.fields.len(), dst);
            for (tag, trace) in &tags {
                out.push((moved.clone(), *tag, trace.push(step.clone())));
            }
        }
        out
    }

    // --- calls ---------------------------------------------------------

    fn governance(&self, call: &CallStmt) -> Vec<Gov<'p>> {
        self.rules
            .rules
            .iter()
            .map(|rule| {
                if let Some(si) = rule.matches_source(&call.callee) {
                    Gov::Source(si, &rule.sources[usize::from(si)])
                } else if let Some(spec) = rule.matches_sanitizer(&call.callee) {
                    Gov::Sanitize(spec)
                } else if let Some(spec) = rule.matches_propagator(&call.callee) {
                    Gov::Propagate(spec)
                } else {
                    Gov::None
                }
            })
            .collect()
    }

    /// Whether a fact flows through the callee rather than being handled
    /// by a predicate. Entry markers always flow through: they stand for
    /// caller tags of unknown rules.
    fn ungoverned(&self, gov: &[Gov<'_>], tag: Tag) -> bool {
        is_marker(tag)
            || gov
                .get(usize::from(tag.rule))
                .map_or(true, |g| matches!(g, Gov::None))
    }

    fn position_base(&self, call: &CallStmt, pos: ArgPos) -> Option<AccessPath> {
        match pos {
            ArgPos::Result => call.result.as_deref().map(AccessPath::var),
            ArgPos::This => call.receiver.as_ref().and_then(operand_base),
            ArgPos::Arg(i) => call.args.get(usize::from(i)).and_then(operand_base),
        }
    }

    fn apply_call(
        &self,
        w: &mut WalkCtx,
        mode: &mut Mode<'_>,
        stmt: &Statement,
        call: &'p CallStmt,
    ) {
        let gov = self.governance(call);
        if let Mode::Replay(r) = mode {
            self.record_call_event(w, r, stmt, call);
        }
        let mut add: Vec<(AccessPath, Tag, Trace)> = Vec::new();

        // Predicate effects, from the pre-call state.
        for (ri, g) in gov.iter().enumerate() {
            match g {
                Gov::Source(si, spec) => {
                    if let Some(dst) = self.position_base(call, spec.output) {
                        let tag = Tag {
                            rule: ri as u16,
                            source: *si,
                        };
                        let step =
                            step_at(w, stmt, StepKind::Source, Some(call.callee.to_string()));
                        add.push((dst, tag, Trace::single(step)));
                    }
                }
                Gov::Propagate(spec) => {
                    let step = step_at(w, stmt, StepKind::Propagate, Some(call.callee.to_string()));
                    let Some(dst) = self.position_base(call, spec.to) else {
                        continue;
                    };
                    for from in &spec.from {
                        let Some(base) = self.position_base(call, *from) else {
                            continue;
                        };
                        for (tag, trace) in w.state.facts.tags_covering(&base) {
                            if tag.rule == ri as u16 && !is_marker(tag) {
                                add.push((dst.clone(), tag, trace.push(step.clone())));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        // Callee effects for facts no predicate governs.
        match self.hier.resolve(call) {
            Resolution::Unresolved => {
                if self.diags.push_once(
                    call.callee.to_string(),
                    Diagnostic {
                        kind: DiagnosticKind::UnresolvedCall,
                        message: format!("no implementation of {} in the model", call.callee),
                        method: Some(w.sig_str.clone()),
                        rule: None,
                    },
                ) {
                    warn!(callee = %call.callee, "unresolved call; applying conservative effects");
                }
                self.conservative_effects(w, stmt, call, &gov, &mut add);
            }
            res => {
                if let Mode::Summarize(ctx) = mode {
                    for &target in res.targets() {
                        self.summary_effects(w, ctx, stmt, call, target, &gov, &mut add);
                    }
                } else if let Mode::Replay(r) = mode {
                    for &target in res.targets() {
                        self.replay_effects(w, r, stmt, call, target, &gov, &mut add);
                    }
                }
            }
        }

        // Point-in-time sanitizer kills, after the pre-call state has
        // been read.
        for (ri, g) in gov.iter().enumerate() {
            if let Gov::Sanitize(spec) = g {
                for pos in &spec.args {
                    if let Some(base) = self.position_base(call, *pos) {
                        w.state.facts.kill_rule_at_root(&base.root, ri as u16);
                    }
                }
            }
        }

        if let Some(result) = &call.result {
            w.state.clear_var(result);
            let marks: BTreeSet<u16> = self
                .rules
                .rules
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_allowed_constant(&call.callee))
                .map(|(ri, _)| ri as u16)
                .collect();
            if !marks.is_empty() {
                w.state.benign.insert(result.clone(), marks);
            }
        }
        for (path, tag, trace) in add {
            w.state.facts.insert(path, tag, trace);
        }
    }

    /// Summary application at a call site: the `Zero` row's births plus,
    /// per caller fact on an argument, receiver or static, the matching
    /// positional row with the entry marker replaced by the fact's tag.
    #[allow(clippy::too_many_arguments)]
    fn summary_effects(
        &self,
        w: &WalkCtx,
        ctx: &mut SumCtx,
        stmt: &Statement,
        call: &CallStmt,
        target: MethodId,
        gov: &[Gov<'_>],
        add: &mut Vec<(AccessPath, Tag, Trace)>,
    ) {
        let through = step_at(w, stmt, StepKind::CallThrough, Some(call.callee.to_string()));

        let zero = self.demand((target, EntryFact::Zero), ctx);
        for flow in zero.iter() {
            if is_marker(flow.tag) {
                continue;
            }
            if let Some(path) = self.exit_target(call, &flow.to, &flow.fields, flow.widened) {
                add.push((
                    path,
                    flow.tag,
                    Trace::default().extended(&flow.trace).push(through.clone()),
                ));
            }
        }

        for (froot, root) in self.entry_roots(w, call) {
            let demands: Vec<(EntryFact, Tag, Trace)> = w
                .state
                .facts
                .iter()
                .filter(|(path, _)| path.root == root)
                .flat_map(|(path, tags)| {
                    tags.iter()
                        .filter(|(tag, _)| self.ungoverned(gov, **tag))
                        .map(|(tag, trace)| {
                            (
                                EntryFact::At {
                                    root: froot.clone(),
                                    fields: path.fields.clone(),
                                    widened: path.widened,
                                },
                                *tag,
                                trace.clone(),
                            )
                        })
                        .collect::<Vec<_>>()
                })
                .collect();
            for (entry, tag, trace) in demands {
                let flows = self.demand((target, entry), ctx);
                for flow in flows.iter() {
                    if !is_marker(flow.tag) {
                        continue;
                    }
                    if let Some(path) = self.exit_target(call, &flow.to, &flow.fields, flow.widened)
                    {
                        add.push((
                            path,
                            tag,
                            trace.extended(&flow.trace).push(through.clone()),
                        ));
                    }
                }
            }
        }
    }

    /// The entry-fact roots a call site maps caller facts onto.
    fn entry_roots(&self, w: &WalkCtx, call: &CallStmt) -> Vec<(FactRoot, Root)> {
        let mut out = Vec::new();
        if let Some(base) = call.receiver.as_ref().and_then(operand_base) {
            out.push((FactRoot::This, base.root));
        }
        for (i, arg) in call.args.iter().enumerate() {
            if let Some(base) = operand_base(arg) {
                out.push((FactRoot::Param(i as u16), base.root));
            }
        }
        let mut statics = BTreeSet::new();
        for (path, _) in w.state.facts.iter() {
            if let Root::Static(f) = &path.root {
                statics.insert(f.clone());
            }
        }
        for f in statics {
            out.push((FactRoot::StaticRoot(f.clone()), Root::Static(f)));
        }
        out
    }

    /// Concrete descent into a resolved callee. First visit per entry
    /// digest walks the body (recording its events); repeats apply
    /// summaries instead.
    #[allow(clippy::too_many_arguments)]
    fn replay_effects(
        &self,
        w: &WalkCtx,
        rctx: &mut ReplayCtx,
        stmt: &Statement,
        call: &CallStmt,
        target: MethodId,
        gov: &[Gov<'_>],
        add: &mut Vec<(AccessPath, Tag, Trace)>,
    ) {
        let entry = self.callee_entry(w, call, target, gov);
        let key = (target, entry.digest());
        if rctx.visited.insert(key) {
            let saved = std::mem::take(&mut rctx.branch);
            let exits = self.walk_method(target, entry, &mut Mode::Replay(&mut *rctx));
            rctx.branch = saved;
            let through = step_at(w, stmt, StepKind::CallThrough, Some(call.callee.to_string()));
            for flow in exits {
                if let Some(path) = self.exit_target(call, &flow.to, &flow.fields, flow.widened) {
                    add.push((path, flow.tag, flow.trace.push(through.clone())));
                }
            }
        } else {
            let mut ctx = SumCtx::default();
            self.summary_effects(w, &mut ctx, stmt, call, target, gov, add);
            self.refine(&mut ctx);
        }
    }

    /// The callee-side state a descent starts from: caller facts on the
    /// receiver and arguments re-rooted onto `this` and the parameter
    /// names, statics passed through. Identity constants and benign marks
    /// are per-method and do not cross the call.
    fn callee_entry(
        &self,
        w: &WalkCtx,
        call: &CallStmt,
        target: MethodId,
        gov: &[Gov<'_>],
    ) -> TaintState {
        let callee = self.hier.method(target).method;
        let mut entry = TaintState::default();
        let map_onto = |src_root: &Root, dst: &AccessPath, entry: &mut TaintState| {
            for (path, tags) in w.state.facts.iter() {
                if &path.root != src_root {
                    continue;
                }
                let moved = path.rebase(0, dst);
                for (tag, trace) in tags {
                    if self.ungoverned(gov, *tag) {
                        entry.facts.insert(moved.clone(), *tag, trace.clone());
                    }
                }
            }
        };
        if !callee.is_static {
            if let Some(base) = call.receiver.as_ref().and_then(operand_base) {
                map_onto(&base.root, &AccessPath::var("this"), &mut entry);
            }
        }
        for (i, arg) in call.args.iter().enumerate() {
            let (Some(base), Some(name)) = (operand_base(arg), callee.params.get(i)) else {
                continue;
            };
            map_onto(&base.root, &AccessPath::var(name), &mut entry);
        }
        for (path, tags) in w.state.facts.iter() {
            if let Root::Static(_) = &path.root {
                for (tag, trace) in tags {
                    if self.ungoverned(gov, *tag) {
                        entry.facts.insert(path.clone(), *tag, trace.clone());
                    }
                }
            }
        }
        entry
    }

    /// Conservative unresolved-call policy: without taint on any input
    /// the result is a fresh clean value; with taint, it escapes into the
    /// result and every mutable argument, annotated for the finding.
    fn conservative_effects(
        &self,
        w: &WalkCtx,
        stmt: &Statement,
        call: &CallStmt,
        gov: &[Gov<'_>],
        add: &mut Vec<(AccessPath, Tag, Trace)>,
    ) {
        let step = step_at(
            w,
            stmt,
            StepKind::Conservative,
            Some(call.callee.to_string()),
        );
        let mut inflow: BTreeMap<Tag, Trace> = BTreeMap::new();
        for op in call.receiver.iter().chain(call.args.iter()) {
            let Some(base) = operand_base(op) else { continue };
            for (tag, trace) in w.state.facts.tags_covering(&base) {
                if self.ungoverned(gov, tag) {
                    inflow.entry(tag).or_insert(trace);
                }
            }
        }
        if inflow.is_empty() {
            return;
        }
        let mut targets: Vec<AccessPath> = Vec::new();
        if let Some(result) = &call.result {
            targets.push(AccessPath::var(result));
        }
        for (i, arg) in call.args.iter().enumerate() {
            let mutable = call
                .callee
                .params
                .get(i)
                .map_or(true, |ty| !is_immutable_type(ty));
            if mutable {
                if let Some(v) = arg.as_local() {
                    targets.push(AccessPath::var(v));
                }
            }
        }
        if !is_immutable_type(&call.callee.class) {
            if let Some(v) = call.receiver.as_ref().and_then(|op| op.as_local()) {
                targets.push(AccessPath::var(v));
            }
        }
        for dst in targets {
            for (tag, trace) in &inflow {
                add.push((dst.clone(), *tag, trace.push(step.clone())));
            }
        }
    }

    /// Maps a callee exit position back onto the call site.
    fn exit_target(
        &self,
        call: &CallStmt,
        to: &ExitPos,
        fields: &[Selector],
        widened: bool,
    ) -> Option<AccessPath> {
        let base = match to {
            ExitPos::Result => AccessPath::var(call.result.as_deref()?),
            ExitPos::This => operand_base(call.receiver.as_ref()?)?,
            ExitPos::Param(i) => operand_base(call.args.get(usize::from(*i))?)?,
            ExitPos::Static(f) => AccessPath::static_field(f.clone()),
        };
        let mut out = base;
        for sel in fields {
            out = out.child(sel.clone());
        }
        out.widened |= widened;
        Some(out)
    }

    // --- replay event recording ----------------------------------------

    fn operand_view(&self, w: &WalkCtx, op: &Operand) -> OperandView {
        let mut view = OperandView::default();
        match op {
            Operand::Local(v) => {
                view.var = Some(v.clone());
                view.identity = w.state.identity.get(v).cloned();
                if let Some(marks) = w.state.benign.get(v) {
                    view.benign = marks.clone();
                }
            }
            Operand::Const(c) => view.constant = Some(c.clone()),
            Operand::StaticField(f) => view.static_field = Some(f.clone()),
        }
        if let Some(base) = operand_base(op) {
            view.tags = w
                .state
                .facts
                .tags_covering(&base)
                .into_keys()
                .filter(|tag| !is_marker(*tag))
                .collect();
        }
        view
    }

    fn record_call_event(
        &self,
        w: &WalkCtx,
        rctx: &mut ReplayCtx,
        stmt: &Statement,
        call: &CallStmt,
    ) {
        let receiver = call.receiver.as_ref().map(|op| self.operand_view(w, op));
        let args: Vec<OperandView> = call
            .args
            .iter()
            .map(|op| self.operand_view(w, op))
            .collect();
        let order = rctx.log.push(CallEvent {
            order: 0,
            method: w.sig.clone(),
            stmt: stmt.id,
            line: stmt.line,
            branch: rctx.branch.clone(),
            exits: true,
            kind: EventKind::Call {
                callee: call.callee.clone(),
                receiver,
                args,
                result: call.result.clone(),
            },
        });
        let mut index = |pos: ArgPos, op: &Operand| {
            if let Some(base) = operand_base(op) {
                for (tag, trace) in w.state.facts.tags_covering(&base) {
                    rctx.traces.insert((order, pos, tag), trace);
                }
            }
        };
        if let Some(recv) = &call.receiver {
            index(ArgPos::This, recv);
        }
        for (i, arg) in call.args.iter().enumerate() {
            index(ArgPos::Arg(i as u16), arg);
        }
    }

    // --- exits ---------------------------------------------------------

    /// Facts visible to the caller at this exit point: everything under
    /// the returned value, writebacks below the receiver and parameters,
    /// and statics.
    fn exit_flows(&self, w: &WalkCtx, ret: Option<&Operand>) -> Vec<ExitFlow> {
        let mut out = Vec::new();
        if let Some(base) = ret.and_then(operand_base) {
            for (path, tags) in w.state.facts.iter() {
                if path.root != base.root {
                    continue;
                }
                for (tag, trace) in tags {
                    out.push(ExitFlow {
                        to: ExitPos::Result,
                        fields: path.fields.clone(),
                        widened: path.widened,
                        tag: *tag,
                        trace: trace.clone(),
                    });
                }
            }
        }
        for (path, tags) in w.state.facts.iter() {
            let to = match &path.root {
                Root::Var(name) => match w.exit_roots.get(name) {
                    // Reassigning a parameter root is caller-invisible;
                    // only writebacks below it escape.
                    Some(pos) if !path.fields.is_empty() || path.widened => pos.clone(),
                    _ => continue,
                },
                Root::Static(f) => ExitPos::Static(f.clone()),
            };
            for (tag, trace) in tags {
                out.push(ExitFlow {
                    to: to.clone(),
                    fields: path.fields.clone(),
                    widened: path.widened,
                    tag: *tag,
                    trace: trace.clone(),
                });
            }
        }
        out
    }
}

fn step_at(w: &WalkCtx, stmt: &Statement, kind: StepKind, note: Option<String>) -> TraceStep {
    TraceStep {
        method: w.sig_str.clone(),
        stmt: stmt.id,
        line: stmt.line,
        kind,
        note,
    }
}

/// Events of the current method recorded inside an arm that does not
/// fall through never reach the code after the branch.
fn mark_no_exit(log: &mut EventLog, from: usize, method: &MethodSig) {
    for event in &mut log.events[from..] {
        if &event.method == method {
            event.exits = false;
        }
    }
}

/// Row equality up to witnesses: refinement compares semantic content
/// only, traces legitimately differ between recomputations.
fn rows_equivalent(a: &[SummaryFlow], b: &[SummaryFlow]) -> bool {
    let key = |flows: &[SummaryFlow]| -> BTreeSet<(ExitPos, Vec<Selector>, bool, Tag)> {
        flows
            .iter()
            .map(|f| (f.to.clone(), f.fields.clone(), f.widened, f.tag))
            .collect()
    };
    key(a) == key(b)
}
