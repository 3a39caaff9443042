//! Flow relations over statement order and copy chains.
//!
//! Two helpers back the structural-constraint matcher: [`ValueTable`]
//! computes intra-method value numbers (copy-related variables share a
//! number, any other definition gets a fresh one), and [`flow_precedes`]
//! orders two events of the same method while respecting branch-arm
//! exclusivity and early returns.

use crate::events::CallEvent;
use ir::{Method, Operand, Statement, StmtKind};
use std::collections::BTreeMap;

/// Intra-method value numbering. `vn_read` answers "which value did this
/// variable hold when the statement executed"; `vn_def` answers "which
/// value does the statement's definition produce". Equal numbers mean the
/// same value flowed there through plain copies.
#[derive(Debug, Default)]
pub struct ValueTable {
    reads: BTreeMap<(usize, String), u32>,
    defs: BTreeMap<(usize, String), u32>,
    next: u32,
}

impl ValueTable {
    pub fn build(method: &Method) -> Self {
        let mut table = ValueTable::default();
        let mut state: BTreeMap<String, u32> = BTreeMap::new();
        state.insert("this".to_string(), table.fresh());
        for name in &method.params {
            let vn = table.fresh();
            state.insert(name.clone(), vn);
        }
        table.walk(&method.body, &mut state);
        table
    }

    pub fn vn_read(&self, stmt: usize, var: &str) -> Option<u32> {
        self.reads.get(&(stmt, var.to_string())).copied()
    }

    pub fn vn_def(&self, stmt: usize, var: &str) -> Option<u32> {
        self.defs.get(&(stmt, var.to_string())).copied()
    }

    fn fresh(&mut self) -> u32 {
        self.next += 1;
        self.next
    }

    fn read_of(&mut self, state: &mut BTreeMap<String, u32>, stmt: usize, var: &str) -> u32 {
        let vn = match state.get(var) {
            Some(vn) => *vn,
            None => {
                let vn = self.fresh();
                state.insert(var.to_string(), vn);
                vn
            }
        };
        self.reads.insert((stmt, var.to_string()), vn);
        vn
    }

    fn read_operand(&mut self, state: &mut BTreeMap<String, u32>, stmt: usize, op: &Operand) {
        if let Operand::Local(v) = op {
            self.read_of(state, stmt, v);
        }
    }

    fn walk(&mut self, body: &[Statement], state: &mut BTreeMap<String, u32>) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Assign { lhs, value } => {
                    let vn = match value {
                        Operand::Local(y) => self.read_of(state, stmt.id, y),
                        _ => self.fresh(),
                    };
                    state.insert(lhs.clone(), vn);
                    self.defs.insert((stmt.id, lhs.clone()), vn);
                }
                StmtKind::Concat { lhs, left, right } => {
                    self.read_operand(state, stmt.id, left);
                    self.read_operand(state, stmt.id, right);
                    let vn = self.fresh();
                    state.insert(lhs.clone(), vn);
                    self.defs.insert((stmt.id, lhs.clone()), vn);
                }
                StmtKind::FieldRead { lhs, object, .. } => {
                    self.read_of(state, stmt.id, object);
                    let vn = self.fresh();
                    state.insert(lhs.clone(), vn);
                    self.defs.insert((stmt.id, lhs.clone()), vn);
                }
                StmtKind::FieldWrite { object, value, .. } => {
                    self.read_of(state, stmt.id, object);
                    self.read_operand(state, stmt.id, value);
                }
                StmtKind::ArrayRead { lhs, array } => {
                    self.read_of(state, stmt.id, array);
                    let vn = self.fresh();
                    state.insert(lhs.clone(), vn);
                    self.defs.insert((stmt.id, lhs.clone()), vn);
                }
                StmtKind::ArrayWrite { array, value } => {
                    self.read_of(state, stmt.id, array);
                    self.read_operand(state, stmt.id, value);
                }
                StmtKind::Call(call) => {
                    if let Some(recv) = &call.receiver {
                        self.read_operand(state, stmt.id, recv);
                    }
                    for arg in &call.args {
                        self.read_operand(state, stmt.id, arg);
                    }
                    if let Some(result) = &call.result {
                        let vn = self.fresh();
                        state.insert(result.clone(), vn);
                        self.defs.insert((stmt.id, result.clone()), vn);
                    }
                }
                StmtKind::Return { value } => {
                    if let Some(op) = value {
                        self.read_operand(state, stmt.id, op);
                    }
                }
                StmtKind::Branch {
                    then_branch,
                    else_branch,
                } => {
                    let mut then_state = state.clone();
                    let mut else_state = state.clone();
                    self.walk(then_branch, &mut then_state);
                    self.walk(else_branch, &mut else_state);
                    state.clear();
                    for (var, tv) in &then_state {
                        match else_state.get(var) {
                            Some(ev) if ev == tv => {
                                state.insert(var.clone(), *tv);
                            }
                            Some(_) => {
                                let vn = self.fresh();
                                state.insert(var.clone(), vn);
                            }
                            // defined on one arm only: keep, the other
                            // arm never touched it
                            None => {
                                state.insert(var.clone(), *tv);
                            }
                        }
                    }
                    for (var, ev) in &else_state {
                        state.entry(var.clone()).or_insert(*ev);
                    }
                }
            }
        }
    }
}

/// Flow order between two events of the same method: `a` precedes `b`
/// when some program path executes `a` and then `b`. Events on opposite
/// arms of one branch are never ordered; an event inside an arm that
/// returns instead of rejoining precedes nothing outside its arms.
pub fn flow_precedes(a: &CallEvent, b: &CallEvent) -> bool {
    if a.method != b.method || a.order >= b.order {
        return false;
    }
    let mut shared = 0;
    while shared < a.branch.len() && shared < b.branch.len() {
        let (fa, fb) = (a.branch[shared], b.branch[shared]);
        if fa.0 != fb.0 {
            break;
        }
        if fa.1 != fb.1 {
            return false;
        }
        shared += 1;
    }
    if shared < a.branch.len() && !a.exits {
        return false;
    }
    true
}
