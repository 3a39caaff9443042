//! Raw YAML schema and compilation into executable rules.
//!
//! Rule files declare `rules:` with signature-based predicates. Unknown
//! fields are rejected so a typo never silently weakens a rule. The raw
//! shapes compile into [`CompiledRule`](crate::CompiledRule); every
//! compile failure carries a human-readable reason and rejects only the
//! rule it belongs to.

use crate::{
    CompiledRule, PropagatorSpec, SanitizerSpec, Severity, SinkSpec, SourceSpec,
};
use patterns::{
    ArgPos, ChainBound, ConcatOrder, ConstArg, Constraints, MethodPattern, Requires, ScopePosition,
    ScopeRule, SeqStep, StrMatch,
};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    pub rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRule {
    pub id: String,
    pub severity: Option<String>,
    pub category: Option<String>,
    pub message: Option<String>,
    pub remediation: Option<String>,
    #[serde(default)]
    pub sources: Vec<RawSource>,
    #[serde(default)]
    pub sinks: Vec<RawSink>,
    #[serde(default)]
    pub sanitizers: Vec<RawSanitizer>,
    #[serde(default)]
    pub propagators: Vec<RawPropagator>,
    #[serde(default)]
    pub constraints: RawConstraints,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
/// Signature matcher: literal `class`/`name` or anchored regex
/// `class_pattern`/`name_pattern`; optional `params` pins one overload.
pub struct RawMethod {
    pub class: Option<String>,
    pub class_pattern: Option<String>,
    pub name: Option<String>,
    pub name_pattern: Option<String>,
    pub params: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSource {
    pub method: RawMethod,
    /// Optional name, referenced by `concat_order`.
    pub name: Option<String>,
    pub output: Option<ArgPos>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSink {
    pub method: RawMethod,
    #[serde(default = "default_positions")]
    pub args: Vec<ArgPos>,
    #[serde(default)]
    pub requires: Requires,
    /// Producer pattern the sink argument must come from (chain-shaped
    /// sinks).
    pub via: Option<RawMethod>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSanitizer {
    pub method: RawMethod,
    #[serde(default = "default_positions")]
    pub args: Vec<ArgPos>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPropagator {
    pub method: RawMethod,
    pub from: Vec<ArgPos>,
    pub to: ArgPos,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConstraints {
    #[serde(default)]
    pub sequence: Vec<RawSeqStep>,
    #[serde(default)]
    pub not_inside: Vec<RawScope>,
    pub call_chain: Option<RawChain>,
    pub const_arg: Option<RawConstArg>,
    pub concat_order: Option<RawConcatOrder>,
    #[serde(default)]
    pub allowed_constants: Vec<RawMethod>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSeqStep {
    pub method: RawMethod,
    #[serde(default = "default_positions")]
    pub args: Vec<ArgPos>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawScope {
    pub position: ScopePosition,
    pub method: RawMethod,
    #[serde(default = "default_positions")]
    pub args: Vec<ArgPos>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
/// `call_chain: 2` means exactly two hops; the map form gives a range.
pub enum RawChain {
    Exact(u32),
    Range {
        #[serde(default)]
        min: u32,
        max: u32,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConstArg {
    pub position: ArgPos,
    pub class: String,
    pub field: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConcatOrder {
    pub left: String,
    pub right: String,
}

fn default_positions() -> Vec<ArgPos> {
    vec![ArgPos::Arg(0)]
}

fn compile_method(raw: &RawMethod) -> Result<MethodPattern, String> {
    let class = match (&raw.class, &raw.class_pattern) {
        (Some(_), Some(_)) => return Err("both class and class_pattern given".into()),
        (Some(c), None) => Some(StrMatch::exact(c)),
        (None, Some(p)) => {
            Some(StrMatch::regex(p).map_err(|e| format!("invalid class_pattern: {e}"))?)
        }
        (None, None) => None,
    };
    let name = match (&raw.name, &raw.name_pattern) {
        (Some(_), Some(_)) => return Err("both name and name_pattern given".into()),
        (Some(n), None) => StrMatch::exact(n),
        (None, Some(p)) => StrMatch::regex(p).map_err(|e| format!("invalid name_pattern: {e}"))?,
        (None, None) => return Err("method matcher needs name or name_pattern".into()),
    };
    Ok(MethodPattern {
        class,
        name,
        params: raw.params.clone(),
    })
}

/// Compiles one raw rule. Errors reject only this rule.
pub fn compile_rule(raw: &RawRule, file: Option<&PathBuf>) -> Result<CompiledRule, String> {
    let severity = match &raw.severity {
        Some(s) => s.parse::<Severity>()?,
        None => Severity::Medium,
    };
    let mut sources = Vec::with_capacity(raw.sources.len());
    for s in &raw.sources {
        sources.push(SourceSpec {
            pattern: compile_method(&s.method)?,
            name: s.name.clone(),
            output: s.output.unwrap_or(ArgPos::Result),
        });
    }
    let mut sinks = Vec::with_capacity(raw.sinks.len());
    for s in &raw.sinks {
        if s.args.is_empty() {
            return Err("sink declares no argument positions".into());
        }
        let via = match &s.via {
            Some(v) => Some(compile_method(v)?),
            None => None,
        };
        sinks.push(SinkSpec {
            pattern: compile_method(&s.method)?,
            args: s.args.clone(),
            requires: s.requires,
            via,
        });
    }
    if sinks.is_empty() {
        return Err("rule declares no sinks".into());
    }
    let mut sanitizers = Vec::with_capacity(raw.sanitizers.len());
    for s in &raw.sanitizers {
        sanitizers.push(SanitizerSpec {
            pattern: compile_method(&s.method)?,
            args: s.args.clone(),
        });
    }
    let mut propagators = Vec::with_capacity(raw.propagators.len());
    for p in &raw.propagators {
        if p.from.is_empty() {
            return Err("propagator declares no input positions".into());
        }
        if matches!(p.to, ArgPos::This) && p.from.contains(&ArgPos::This) {
            return Err("propagator maps this onto itself".into());
        }
        propagators.push(PropagatorSpec {
            pattern: compile_method(&p.method)?,
            from: p.from.clone(),
            to: p.to,
        });
    }

    let rc = &raw.constraints;
    let mut sequence = Vec::with_capacity(rc.sequence.len());
    for step in &rc.sequence {
        sequence.push(SeqStep {
            pattern: compile_method(&step.method)?,
            args: step.args.clone(),
        });
    }
    let mut not_inside = Vec::with_capacity(rc.not_inside.len());
    for scope in &rc.not_inside {
        not_inside.push(ScopeRule {
            position: scope.position,
            pattern: compile_method(&scope.method)?,
            args: scope.args.clone(),
        });
    }
    let call_chain = match &rc.call_chain {
        Some(RawChain::Exact(n)) => Some(ChainBound { min: *n, max: *n }),
        Some(RawChain::Range { min, max }) => {
            if min > max {
                return Err(format!("call_chain min {min} exceeds max {max}"));
            }
            Some(ChainBound {
                min: *min,
                max: *max,
            })
        }
        None => None,
    };
    let const_arg = rc.const_arg.as_ref().map(|c| ConstArg {
        position: c.position,
        field: ir::FieldRef::new(&c.class, &c.field),
    });
    let concat_order = match &rc.concat_order {
        Some(o) => {
            let resolve = |name: &str| {
                sources
                    .iter()
                    .any(|s| s.name.as_deref() == Some(name))
                    .then(|| name.to_string())
                    .ok_or_else(|| format!("concat_order references unknown source {name:?}"))
            };
            Some(ConcatOrder {
                left: resolve(&o.left)?,
                right: resolve(&o.right)?,
            })
        }
        None => None,
    };
    let mut allowed_constants = Vec::with_capacity(rc.allowed_constants.len());
    for m in &rc.allowed_constants {
        allowed_constants.push(compile_method(m)?);
    }

    let rule = CompiledRule {
        id: raw.id.clone(),
        severity,
        category: raw.category.clone().unwrap_or_else(|| "taint".into()),
        message: raw
            .message
            .clone()
            .unwrap_or_else(|| format!("tainted data reaches {}", raw.id)),
        remediation: raw.remediation.clone(),
        sources,
        sinks,
        sanitizers,
        propagators,
        constraints: Constraints {
            sequence,
            not_inside,
            call_chain,
            const_arg,
            concat_order,
            allowed_constants,
        },
        source_file: file.cloned(),
    };
    rule.validate()?;
    Ok(rule)
}
