//! Class hierarchy and call resolution.
//!
//! Built once per run from the program model: a subtype table for
//! virtual dispatch, a per-signature method index, and an SCC
//! condensation of the static call graph that drives the bottom-up
//! parallel pre-summarization.

use ir::{CallStmt, ClassDef, Dispatch, Method, MethodSig, Program, StmtKind, Visibility};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;

pub type MethodId = usize;

#[derive(Debug, Clone, Copy)]
pub struct MethodRef<'a> {
    pub class: &'a str,
    pub method: &'a Method,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Single(MethodId),
    Candidates(Vec<MethodId>),
    Unresolved,
}

impl Resolution {
    pub fn targets(&self) -> &[MethodId] {
        match self {
            Resolution::Single(id) => std::slice::from_ref(id),
            Resolution::Candidates(ids) => ids,
            Resolution::Unresolved => &[],
        }
    }
}

pub struct Hierarchy<'a> {
    methods: Vec<MethodRef<'a>>,
    by_sig: HashMap<&'a MethodSig, MethodId>,
    classes: HashMap<&'a str, &'a ClassDef>,
    /// Direct subtypes: superclass and implemented-interface edges.
    subtypes: HashMap<&'a str, Vec<&'a str>>,
    resolutions: RwLock<HashMap<(&'a MethodSig, Dispatch), Resolution>>,
}

impl<'a> Hierarchy<'a> {
    pub fn build(program: &'a Program) -> Self {
        let mut methods = Vec::new();
        let mut by_sig = HashMap::new();
        let mut classes = HashMap::new();
        let mut subtypes: HashMap<&str, Vec<&str>> = HashMap::new();
        for class in &program.classes {
            classes.insert(class.name.as_str(), class);
            if let Some(sup) = &class.superclass {
                subtypes
                    .entry(sup.as_str())
                    .or_default()
                    .push(class.name.as_str());
            }
            for iface in &class.interfaces {
                subtypes
                    .entry(iface.as_str())
                    .or_default()
                    .push(class.name.as_str());
            }
            for method in &class.methods {
                let id = methods.len();
                methods.push(MethodRef {
                    class: class.name.as_str(),
                    method,
                });
                by_sig.insert(&method.sig, id);
            }
        }
        for subs in subtypes.values_mut() {
            subs.sort_unstable();
        }
        Hierarchy {
            methods,
            by_sig,
            classes,
            subtypes,
            resolutions: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    pub fn method(&self, id: MethodId) -> MethodRef<'a> {
        self.methods[id]
    }

    pub fn methods(&self) -> impl Iterator<Item = (MethodId, MethodRef<'a>)> + '_ {
        self.methods.iter().copied().enumerate()
    }

    pub fn lookup(&self, sig: &MethodSig) -> Option<MethodId> {
        self.by_sig.get(sig).copied()
    }

    /// The implementation executing for `name(params)` on `class`:
    /// the class's own declaration or the nearest inherited one.
    fn find_impl(&self, class: &str, sig: &MethodSig) -> Option<MethodId> {
        let mut cur = Some(class);
        let mut hops = 0;
        while let Some(name) = cur {
            if let Some(def) = self.classes.get(name) {
                if let Some(m) = def
                    .methods
                    .iter()
                    .find(|m| m.sig.name == sig.name && m.sig.params == sig.params)
                {
                    return self.by_sig.get(&m.sig).copied();
                }
                cur = def.superclass.as_deref();
            } else {
                return None;
            }
            // Hierarchies are shallow; this only guards malformed cycles.
            hops += 1;
            if hops > self.classes.len() {
                return None;
            }
        }
        None
    }

    /// Every method signature that could execute at this call site.
    pub fn resolve(&self, call: &'a CallStmt) -> Resolution {
        let key = (&call.callee, call.dispatch);
        {
            let cache = self.resolutions.read().unwrap_or_else(|e| e.into_inner());
            if let Some(res) = cache.get(&key) {
                return res.clone();
            }
        }
        let res = self.resolve_uncached(call);
        let mut cache = self.resolutions.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(key, res.clone());
        res
    }

    fn resolve_uncached(&self, call: &CallStmt) -> Resolution {
        let sig = &call.callee;
        let base = self.find_impl(&sig.class, sig);
        if call.dispatch == Dispatch::Static {
            return match base {
                Some(id) => Resolution::Single(id),
                None => Resolution::Unresolved,
            };
        }
        // Virtual dispatch: the inherited implementation plus every
        // override reachable from the declared receiver type.
        if let Some(id) = base {
            let m = self.method(id).method;
            if m.is_final || m.is_static || m.visibility == Visibility::Private {
                return Resolution::Single(id);
            }
        }
        let mut targets = BTreeSet::new();
        if let Some(id) = base {
            targets.insert(id);
        }
        let mut queue: Vec<&str> = vec![sig.class.as_str()];
        let mut seen: HashSet<&str> = queue.iter().copied().collect();
        while let Some(class) = queue.pop() {
            if let Some(subs) = self.subtypes.get(class) {
                for sub in subs {
                    if seen.insert(sub) {
                        queue.push(sub);
                        if let Some(def) = self.classes.get(sub) {
                            if let Some(m) = def
                                .methods
                                .iter()
                                .find(|m| m.sig.name == sig.name && m.sig.params == sig.params)
                            {
                                if let Some(id) = self.by_sig.get(&m.sig) {
                                    targets.insert(*id);
                                }
                            }
                        }
                    }
                }
            }
        }
        let targets: Vec<MethodId> = targets.into_iter().collect();
        match targets.len() {
            0 => Resolution::Unresolved,
            1 => Resolution::Single(targets[0]),
            _ => Resolution::Candidates(targets),
        }
    }

    /// Statically-resolved callees of a method body, branches included.
    pub fn callees(&self, id: MethodId) -> BTreeSet<MethodId> {
        let mut out = BTreeSet::new();
        let body = &self.methods[id].method.body;
        self.collect_callees(body, &mut out);
        out
    }

    fn collect_callees(&self, stmts: &'a [ir::Statement], out: &mut BTreeSet<MethodId>) {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Call(call) => {
                    out.extend(self.resolve(call).targets());
                }
                StmtKind::Branch {
                    then_branch,
                    else_branch,
                } => {
                    self.collect_callees(then_branch, out);
                    self.collect_callees(else_branch, out);
                }
                _ => {}
            }
        }
    }

    /// Analysis roots: methods the model flags as entry points, or every
    /// method without a static caller when none are flagged.
    pub fn entry_points(&self) -> Vec<MethodId> {
        let flagged: Vec<MethodId> = self
            .methods
            .iter()
            .enumerate()
            .filter(|(_, m)| m.method.entry_point)
            .map(|(id, _)| id)
            .collect();
        if !flagged.is_empty() {
            return flagged;
        }
        let mut called = BTreeSet::new();
        for id in 0..self.methods.len() {
            called.extend(self.callees(id));
        }
        (0..self.methods.len())
            .filter(|id| !called.contains(id))
            .collect()
    }

    /// SCC condensation of the call graph, grouped into bottom-up levels:
    /// a level's components only call into earlier levels or themselves.
    pub fn scc_levels(&self) -> Vec<Vec<Vec<MethodId>>> {
        let n = self.methods.len();
        let adj: Vec<BTreeSet<MethodId>> = (0..n).map(|id| self.callees(id)).collect();
        let comps = tarjan(&adj);
        let mut comp_of = vec![0usize; n];
        for (ci, members) in comps.iter().enumerate() {
            for &m in members {
                comp_of[m] = ci;
            }
        }
        // Component level = 1 + deepest callee component level.
        let mut level = vec![0usize; comps.len()];
        // Tarjan emits components in reverse topological order, so one
        // pass in emission order sees callees before callers.
        for (ci, members) in comps.iter().enumerate() {
            let mut lv = 0;
            for &m in members {
                for &callee in &adj[m] {
                    let cc = comp_of[callee];
                    if cc != ci {
                        lv = lv.max(level[cc] + 1);
                    }
                }
            }
            level[ci] = lv;
        }
        let depth = level.iter().copied().max().map_or(0, |d| d + 1);
        let mut out: Vec<Vec<Vec<MethodId>>> = vec![Vec::new(); depth];
        for (ci, members) in comps.iter().enumerate() {
            let mut members = members.clone();
            members.sort_unstable();
            out[level[ci]].push(members);
        }
        for sccs in &mut out {
            sccs.sort();
        }
        out
    }
}

/// Iterative Tarjan; components come out in reverse topological order.
fn tarjan(adj: &[BTreeSet<MethodId>]) -> Vec<Vec<MethodId>> {
    let n = adj.len();
    const UNSET: usize = usize::MAX;
    let mut index = vec![UNSET; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut comps: Vec<Vec<MethodId>> = Vec::new();

    for root in 0..n {
        if index[root] != UNSET {
            continue;
        }
        let mut frames: Vec<(usize, std::collections::btree_set::Iter<'_, usize>)> =
            vec![(root, adj[root].iter())];
        index[root] = next_index;
        low[root] = next_index;
        next_index += 1;
        stack.push(root);
        on_stack[root] = true;
        while let Some((v, children)) = frames.last_mut() {
            let v = *v;
            if let Some(&w) = children.next() {
                if index[w] == UNSET {
                    index[w] = next_index;
                    low[w] = next_index;
                    next_index += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    frames.push((w, adj[w].iter()));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
            } else {
                frames.pop();
                if let Some((parent, _)) = frames.last() {
                    low[*parent] = low[*parent].min(low[v]);
                }
                if low[v] == index[v] {
                    let mut comp = Vec::new();
                    loop {
                        let w = stack.pop().unwrap_or(v);
                        on_stack[w] = false;
                        comp.push(w);
                        if w == v {
                            break;
                        }
                    }
                    comps.push(comp);
                }
            }
        }
    }
    comps
}

/// Declared types the conservative unresolved-call policy treats as
/// unmodifiable by the callee.
pub fn is_immutable_type(ty: &str) -> bool {
    matches!(
        ty,
        "int"
            | "long"
            | "short"
            | "byte"
            | "char"
            | "boolean"
            | "float"
            | "double"
            | "void"
            | "String"
            | "java.lang.String"
    )
}
