//! Taint facts, witness traces and the per-point analysis state.

use crate::access::{AccessPath, Root};
use ir::FieldRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

pub use patterns::events::Tag;

/// Stand-in tag carried by summary rows: replaced with the caller fact's
/// tags when the row is applied at a call site.
pub const ENTRY_MARKER: Tag = Tag {
    rule: u16::MAX,
    source: u16::MAX,
};

pub fn is_marker(tag: Tag) -> bool {
    tag == ENTRY_MARKER
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Source,
    Move,
    FieldHop,
    ConcatJoin,
    Propagate,
    CallThrough,
    Conservative,
    Sink,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
/// One step of a witness path.
pub struct TraceStep {
    /// Enclosing method, rendered as `class.name(params)`.
    pub method: String,
    pub stmt: usize,
    pub line: usize,
    pub kind: StepKind,
    /// Callee signature for call-shaped steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Persistent source-to-here provenance. Pushing shares the prefix, so
/// facts copied across statements and calls stay cheap.
#[derive(Debug, Clone, Default)]
pub struct Trace(Option<Arc<TraceNode>>);

#[derive(Debug)]
struct TraceNode {
    step: TraceStep,
    prev: Trace,
}

impl Trace {
    pub fn single(step: TraceStep) -> Trace {
        Trace::default().push(step)
    }

    pub fn push(&self, step: TraceStep) -> Trace {
        Trace(Some(Arc::new(TraceNode {
            step,
            prev: self.clone(),
        })))
    }

    pub fn extended(&self, steps: &[TraceStep]) -> Trace {
        let mut out = self.clone();
        for step in steps {
            out = out.push(step.clone());
        }
        out
    }

    /// Steps in flow order, oldest first.
    pub fn steps(&self) -> Vec<TraceStep> {
        let mut out = Vec::new();
        let mut cur = &self.0;
        while let Some(node) = cur {
            out.push(node.step.clone());
            cur = &node.prev.0;
        }
        out.reverse();
        out
    }

    /// Pass-through call hops since the taint was last (re)born at a
    /// source.
    pub fn call_hops(&self) -> usize {
        let mut hops = 0;
        let mut cur = &self.0;
        while let Some(node) = cur {
            match node.step.kind {
                StepKind::Source => break,
                StepKind::CallThrough => hops += 1,
                _ => {}
            }
            cur = &node.prev.0;
        }
        hops
    }

    /// Callee signatures of conservative hops on this trace, oldest
    /// first.
    pub fn conservative_notes(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut cur = &self.0;
        while let Some(node) = cur {
            if node.step.kind == StepKind::Conservative {
                if let Some(note) = &node.step.note {
                    out.push(note.clone());
                }
            }
            cur = &node.prev.0;
        }
        out.reverse();
        out
    }
}

/// Taint facts at one program point: access path to tag-to-trace map.
/// Set semantics per (path, tag); the first witness for a pair is kept.
#[derive(Debug, Clone, Default)]
pub struct FactSet {
    facts: BTreeMap<AccessPath, BTreeMap<Tag, Trace>>,
}

impl FactSet {
    /// Adds a fact, keeping the existing witness on repeats. Returns
    /// whether the (path, tag) pair was new.
    pub fn insert(&mut self, path: AccessPath, tag: Tag, trace: Trace) -> bool {
        let tags = self.facts.entry(path).or_default();
        if tags.contains_key(&tag) {
            return false;
        }
        tags.insert(tag, trace);
        true
    }

    /// Strong update: removes every fact rooted at `root`.
    pub fn kill_root(&mut self, root: &Root) {
        self.facts.retain(|path, _| &path.root != root);
    }

    /// Sanitizer kill: drops `rule`'s tags from every path rooted at
    /// `root`, from this point forward.
    pub fn kill_rule_at_root(&mut self, root: &Root, rule: u16) {
        self.facts.retain(|path, tags| {
            if &path.root == root {
                tags.retain(|tag, _| tag.rule != rule);
            }
            !tags.is_empty()
        });
    }

    /// Tags implied at `path`: the union over facts whose path covers it.
    pub fn tags_covering(&self, path: &AccessPath) -> BTreeMap<Tag, Trace> {
        let mut out = BTreeMap::new();
        for (p, tags) in &self.facts {
            if p.covers(path) {
                for (tag, trace) in tags {
                    out.entry(*tag).or_insert_with(|| trace.clone());
                }
            }
        }
        out
    }

    /// Facts on strict extensions of `path`.
    pub fn extensions_of(&self, path: &AccessPath) -> Vec<(AccessPath, BTreeMap<Tag, Trace>)> {
        self.facts
            .iter()
            .filter(|(p, _)| path.covers(p) && p.fields.len() > path.fields.len())
            .map(|(p, tags)| (p.clone(), tags.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccessPath, &BTreeMap<Tag, Trace>)> {
        self.facts.iter()
    }

    pub fn join(&mut self, other: &FactSet) -> bool {
        let mut changed = false;
        for (path, tags) in &other.facts {
            for (tag, trace) in tags {
                changed |= self.insert(path.clone(), *tag, trace.clone());
            }
        }
        changed
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.facts.values().map(|tags| tags.len()).sum()
    }
}

/// Full abstract state at a program point: taint facts plus the two
/// auxiliary per-variable maps (identity constants and benign marks).
#[derive(Debug, Clone, Default)]
pub struct TaintState {
    pub facts: FactSet,
    /// Static-field constant a variable is known to hold. Conflicting
    /// joins drop the entry (absence is the lattice top).
    pub identity: BTreeMap<String, FieldRef>,
    /// Rules whose allowed-constant generator produced the variable.
    pub benign: BTreeMap<String, BTreeSet<u16>>,
}

impl TaintState {
    /// Strong update on a local: kills facts, identity and benign marks.
    pub fn clear_var(&mut self, name: &str) {
        self.facts.kill_root(&Root::Var(name.to_string()));
        self.identity.remove(name);
        self.benign.remove(name);
    }

    pub fn join(&mut self, other: &TaintState) -> bool {
        let mut changed = self.facts.join(&other.facts);
        self.identity.retain(|var, field| {
            let keep = other.identity.get(var) == Some(field);
            changed |= !keep;
            keep
        });
        // Benign marks survive a join only when both sides carry them;
        // a value that is generator output on one path only must not
        // suppress taint arriving on the other.
        self.benign.retain(|var, rules| {
            match other.benign.get(var) {
                Some(theirs) => {
                    let before = rules.len();
                    rules.retain(|r| theirs.contains(r));
                    changed |= rules.len() != before;
                    !rules.is_empty()
                }
                None => {
                    changed = true;
                    false
                }
            }
        });
        changed
    }

    /// FNV-1a digest of the semantic content (traces excluded), used to
    /// memoize replay descents.
    pub fn digest(&self) -> u64 {
        let mut h = Fnv::default();
        for (path, tags) in self.facts.iter() {
            h.write(path.to_string().as_bytes());
            for tag in tags.keys() {
                h.write_u16(tag.rule);
                h.write_u16(tag.source);
            }
            h.write_u8(0xff);
        }
        h.write_u8(0xfe);
        for (var, field) in &self.identity {
            h.write(var.as_bytes());
            h.write(field.class.as_bytes());
            h.write(field.name.as_bytes());
        }
        h.write_u8(0xfd);
        for (var, rules) in &self.benign {
            h.write(var.as_bytes());
            for rule in rules {
                h.write_u16(*rule);
            }
        }
        h.finish()
    }
}

/// Minimal FNV-1a, enough for stable state digests.
struct Fnv(u64);

impl Default for Fnv {
    fn default() -> Self {
        Fnv(0xcbf2_9ce4_8422_2325)
    }
}

impl Fnv {
    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 ^= u64::from(*b);
            self.0 = self.0.wrapping_mul(0x100_0000_01b3);
        }
    }

    fn write_u8(&mut self, v: u8) {
        self.write(&[v]);
    }

    fn write_u16(&mut self, v: u16) {
        self.write(&v.to_le_bytes());
    }

    fn finish(&self) -> u64 {
        self.0
    }
}
