//! Call-event log recorded by the solver's replay phase.
//!
//! Structural constraints are not decided inside the flow functions; the
//! solver instead records one event per call, concatenation and return it
//! replays, with per-operand snapshots of the taint tags, the identity
//! constant and the benign marks in force at that point. The pattern
//! matcher consumes this log.

use crate::ArgPos;
use ir::{Constant, FieldRef, MethodSig};
use std::collections::BTreeSet;

/// Identifies which source predicate of which rule a taint fact derives
/// from. Rules are numbered by load order, sources by declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub rule: u16,
    pub source: u16,
}

#[derive(Debug, Clone, Default)]
/// Snapshot of one call operand at event time.
pub struct OperandView {
    /// Local variable name when the operand is one.
    pub var: Option<String>,
    pub constant: Option<Constant>,
    /// Static field read in place (enum constants arrive this way).
    pub static_field: Option<FieldRef>,
    pub tags: BTreeSet<Tag>,
    /// Identity-lattice value: the static constant this operand is known
    /// to hold, if exactly one.
    pub identity: Option<FieldRef>,
    /// Rules whose allowed-constant mark covers this operand.
    pub benign: BTreeSet<u16>,
}

impl OperandView {
    pub fn tagged_for_rule(&self, rule: u16) -> bool {
        self.tags.iter().any(|t| t.rule == rule)
    }

    /// The identity of the operand: an inline static-field read wins over
    /// a propagated identity fact.
    pub fn constant_identity(&self) -> Option<&FieldRef> {
        self.static_field.as_ref().or(self.identity.as_ref())
    }
}

#[derive(Debug, Clone)]
pub enum EventKind {
    Call {
        /// Declared callee signature (what rule patterns match).
        callee: MethodSig,
        receiver: Option<OperandView>,
        args: Vec<OperandView>,
        result: Option<String>,
    },
    Concat {
        lhs: String,
        left: OperandView,
        right: OperandView,
    },
    Return,
}

#[derive(Debug, Clone)]
/// One replayed event. `order` is the global flow order within the entry
/// point's replay; `branch` lists the enclosing branch arms as
/// `(branch statement id, then-arm?)` pairs, outermost first; `exits` is
/// whether flow from this event falls through its enclosing arms to the
/// code after them.
pub struct CallEvent {
    pub order: usize,
    pub method: MethodSig,
    pub stmt: usize,
    pub line: usize,
    pub branch: Vec<(usize, bool)>,
    pub exits: bool,
    pub kind: EventKind,
}

impl CallEvent {
    pub fn callee(&self) -> Option<&MethodSig> {
        match &self.kind {
            EventKind::Call { callee, .. } => Some(callee),
            _ => None,
        }
    }

    /// The operand snapshot at `pos`, for call events.
    pub fn operand(&self, pos: ArgPos) -> Option<&OperandView> {
        match (&self.kind, pos) {
            (EventKind::Call { receiver, .. }, ArgPos::This) => receiver.as_ref(),
            (EventKind::Call { args, .. }, ArgPos::Arg(i)) => args.get(usize::from(i)),
            _ => None,
        }
    }

    pub fn result_var(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Call { result, .. } => result.as_deref(),
            EventKind::Concat { lhs, .. } => Some(lhs.as_str()),
            EventKind::Return => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Ordered event log for one entry point.
pub struct EventLog {
    pub events: Vec<CallEvent>,
}

impl EventLog {
    /// Appends an event, assigning its global order.
    pub fn push(&mut self, mut event: CallEvent) -> usize {
        event.order = self.events.len();
        let order = event.order;
        self.events.push(event);
        order
    }

    /// Events belonging to one method, in flow order.
    pub fn for_method<'a>(
        &'a self,
        sig: &'a MethodSig,
    ) -> impl Iterator<Item = &'a CallEvent> + 'a {
        self.events.iter().filter(move |e| &e.method == sig)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
