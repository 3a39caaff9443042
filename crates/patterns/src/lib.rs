//! Pattern vocabulary for **TaintScope** rules.
//!
//! Rules name program elements through [`MethodPattern`]s (exact or
//! anchored-regex class/name matching, optional overload pin) and address
//! value positions through [`ArgPos`]. Structural requirements beyond
//! plain source-to-sink reachability live in [`Constraints`] and are
//! evaluated against the solver's call-event log (module [`events`])
//! using the flow relations of module [`flow`].

pub mod events;
pub mod flow;

use ir::{FieldRef, MethodSig};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use events::{CallEvent, EventKind, EventLog, OperandView, Tag};
pub use flow::{flow_precedes, ValueTable};

#[derive(Debug, Clone)]
/// String matcher: literal equality or an anchored regular expression.
pub enum StrMatch {
    Exact(String),
    Re(Regex),
}

impl StrMatch {
    pub fn exact(s: &str) -> Self {
        StrMatch::Exact(s.to_string())
    }

    /// Compiles `pattern` anchored at both ends, so `Random` does not
    /// match `SecureRandom`.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(StrMatch::Re(Regex::new(&format!("^(?:{pattern})$"))?))
    }

    pub fn matches(&self, s: &str) -> bool {
        match self {
            StrMatch::Exact(e) => e == s,
            StrMatch::Re(re) => re.is_match(s),
        }
    }

    /// True only when both sides are literals and equal; regex matchers
    /// are treated as opaque and never claimed to overlap.
    fn definitely_overlaps(&self, other: &StrMatch) -> bool {
        match (self, other) {
            (StrMatch::Exact(a), StrMatch::Exact(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
/// Matches a call's *declared* signature. A missing class matcher means
/// any class; a missing `params` list means any overload.
pub struct MethodPattern {
    pub class: Option<StrMatch>,
    pub name: StrMatch,
    pub params: Option<Vec<String>>,
}

impl MethodPattern {
    pub fn named(name: &str) -> Self {
        Self {
            class: None,
            name: StrMatch::exact(name),
            params: None,
        }
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.class = Some(StrMatch::exact(class));
        self
    }

    pub fn with_params(mut self, params: &[&str]) -> Self {
        self.params = Some(params.iter().map(|p| p.to_string()).collect());
        self
    }

    pub fn matches(&self, sig: &MethodSig) -> bool {
        if let Some(class) = &self.class {
            if !class.matches(&sig.class) {
                return false;
            }
        }
        if !self.name.matches(&sig.name) {
            return false;
        }
        if let Some(params) = &self.params {
            if params != &sig.params {
                return false;
            }
        }
        true
    }

    /// Load-time may-overlap check between two patterns of the same rule.
    /// Conservative in the decidable direction: only literal matchers are
    /// compared, and a missing side counts as a wildcard.
    pub fn overlaps(&self, other: &MethodPattern) -> bool {
        let class_overlap = match (&self.class, &other.class) {
            (Some(a), Some(b)) => a.definitely_overlaps(b),
            _ => true,
        };
        let params_overlap = match (&self.params, &other.params) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        class_overlap && params_overlap && self.name.definitely_overlaps(&other.name)
    }
}

/// A value position at a call: the receiver, the return value, or an
/// argument by zero-based index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgPos {
    This,
    Result,
    Arg(u16),
}

impl Serialize for ArgPos {
    fn serialize<S: serde::Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
        match self {
            ArgPos::This => ser.serialize_str("this"),
            ArgPos::Result => ser.serialize_str("result"),
            ArgPos::Arg(i) => ser.serialize_u16(*i),
        }
    }
}

impl<'de> Deserialize<'de> for ArgPos {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Num(u16),
            Name(String),
        }
        match Repr::deserialize(de)? {
            Repr::Num(i) => Ok(ArgPos::Arg(i)),
            Repr::Name(s) => match s.as_str() {
                "this" => Ok(ArgPos::This),
                "result" => Ok(ArgPos::Result),
                other => Err(serde::de::Error::custom(format!(
                    "invalid position {other:?}: expected \"this\", \"result\" or an index"
                ))),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Tag coverage a sink demands: any declared source, or all of them.
pub enum Requires {
    #[default]
    Any,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Inclusive pass-through hop range between source and sink.
pub struct ChainBound {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopePosition {
    Prefix,
    Suffix,
}

#[derive(Debug, Clone)]
/// One required call of an ordered sequence. `args` names the positions
/// that must hold the tracked value; empty means order alone suffices.
pub struct SeqStep {
    pub pattern: MethodPattern,
    pub args: Vec<ArgPos>,
}

#[derive(Debug, Clone)]
/// Scoped cleaner: a `prefix` cleaner suppresses when it flow-precedes
/// the sink, a `suffix` cleaner when it flow-follows it. Either way the
/// cleaner must act on the sink's tracked value.
pub struct ScopeRule {
    pub position: ScopePosition,
    pub pattern: MethodPattern,
    pub args: Vec<ArgPos>,
}

#[derive(Debug, Clone)]
/// Static-constant identity required at a sink argument position.
pub struct ConstArg {
    pub position: ArgPos,
    pub field: FieldRef,
}

#[derive(Debug, Clone)]
/// Named-source sides of the concatenation feeding the sink.
pub struct ConcatOrder {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Default)]
/// The structural constraints of one rule, all optional.
pub struct Constraints {
    pub sequence: Vec<SeqStep>,
    pub not_inside: Vec<ScopeRule>,
    pub call_chain: Option<ChainBound>,
    pub const_arg: Option<ConstArg>,
    pub concat_order: Option<ConcatOrder>,
    /// Generators whose results do not carry taint through concatenation.
    pub allowed_constants: Vec<MethodPattern>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
            && self.not_inside.is_empty()
            && self.call_chain.is_none()
            && self.const_arg.is_none()
            && self.concat_order.is_none()
            && self.allowed_constants.is_empty()
    }
}
