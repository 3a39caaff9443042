//! Method summaries: memoized rows mapping one entry fact to the facts
//! true at exit.
//!
//! A row is keyed `(method, entry fact)`. `Zero` rows describe facts born
//! inside the method regardless of context; positional rows describe what
//! happens to taint assumed on one entry location and carry the
//! [`ENTRY_MARKER`](crate::fact::ENTRY_MARKER) tag, replaced by the caller
//! fact's tags on application. Rows move unvisited → in-progress →
//! summarized; cycles are served a conservative placeholder and refined
//! afterwards.

use crate::access::Selector;
use crate::callgraph::MethodId;
use crate::fact::{Tag, TraceStep, ENTRY_MARKER};
use ir::FieldRef;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FactRoot {
    This,
    Param(u16),
    StaticRoot(FieldRef),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryFact {
    /// No assumption about the caller: facts born inside the method.
    Zero,
    At {
        root: FactRoot,
        fields: Vec<Selector>,
        widened: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExitPos {
    Result,
    This,
    Param(u16),
    Static(FieldRef),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
/// One exit fact of a summary row. `tag` may be the entry marker.
pub struct SummaryFlow {
    pub to: ExitPos,
    pub fields: Vec<Selector>,
    pub widened: bool,
    pub tag: Tag,
    /// Trace segment accrued inside the callee, oldest first.
    pub trace: Vec<TraceStep>,
}

pub type RowKey = (MethodId, EntryFact);

#[derive(Debug, Clone)]
pub enum RowState {
    InProgress,
    Done(Arc<Vec<SummaryFlow>>),
    /// Value kept from the last iteration of a diverging cycle.
    Frozen(Arc<Vec<SummaryFlow>>),
}

/// Shared summary store. Completed rows are read-shared across workers;
/// two workers racing on the same row both compute it and write equal
/// values (duplicate compute is cheaper than cross-worker blocking).
#[derive(Debug, Default)]
pub struct SummaryTable {
    rows: RwLock<HashMap<RowKey, RowState>>,
    computed: AtomicUsize,
    recomputed: AtomicUsize,
}

impl SummaryTable {
    pub fn get(&self, key: &RowKey) -> Option<RowState> {
        let rows = self.rows.read().unwrap_or_else(|e| e.into_inner());
        rows.get(key).cloned()
    }

    /// Marks a row in-progress unless it already has a state.
    pub fn begin(&self, key: &RowKey) {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        rows.entry(key.clone()).or_insert(RowState::InProgress);
    }

    /// Stores a computed row. Frozen rows are never overwritten.
    pub fn complete(&self, key: &RowKey, flows: Arc<Vec<SummaryFlow>>) {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        match rows.get(key) {
            Some(RowState::Frozen(_)) => {}
            Some(RowState::Done(_)) => {
                self.recomputed.fetch_add(1, Ordering::Relaxed);
                rows.insert(key.clone(), RowState::Done(flows));
            }
            _ => {
                self.computed.fetch_add(1, Ordering::Relaxed);
                rows.insert(key.clone(), RowState::Done(flows));
            }
        }
    }

    pub fn freeze(&self, key: &RowKey) {
        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = rows.get(key) {
            let flows = match state {
                RowState::Done(f) | RowState::Frozen(f) => f.clone(),
                RowState::InProgress => Arc::new(Vec::new()),
            };
            rows.insert(key.clone(), RowState::Frozen(flows));
        }
    }

    pub fn computed(&self) -> usize {
        self.computed.load(Ordering::Relaxed)
    }

    pub fn recomputed(&self) -> usize {
        self.recomputed.load(Ordering::Relaxed)
    }
}

/// Conservative stand-in for a row demanded while it is being computed:
/// identity on the entry fact plus unknown taint on the result.
pub fn placeholder(entry: &EntryFact) -> Arc<Vec<SummaryFlow>> {
    let EntryFact::At {
        root,
        fields,
        widened,
    } = entry
    else {
        return Arc::new(Vec::new());
    };
    let identity_pos = match root {
        FactRoot::This => ExitPos::This,
        FactRoot::Param(i) => ExitPos::Param(*i),
        FactRoot::StaticRoot(f) => ExitPos::Static(f.clone()),
    };
    let mut flows = vec![SummaryFlow {
        to: ExitPos::Result,
        fields: Vec::new(),
        widened: false,
        tag: ENTRY_MARKER,
        trace: Vec::new(),
    }];
    // Writebacks only exist below the root, so the identity flow is
    // meaningful for paths with selectors (and for statics).
    if !fields.is_empty() || matches!(root, FactRoot::StaticRoot(_)) {
        flows.push(SummaryFlow {
            to: identity_pos,
            fields: fields.clone(),
            widened: *widened,
            tag: ENTRY_MARKER,
            trace: Vec::new(),
        });
    }
    flows.sort();
    Arc::new(flows)
}
