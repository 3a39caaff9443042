//! Loads taint rules from YAML and compiles them to an executable
//! representation.
//!
//! A rule is a set of signature predicates (sources, sinks, sanitizers,
//! propagators) plus optional structural constraints. Compilation
//! validates each rule in isolation: an ill-formed rule is rejected and
//! reported without aborting the load, while duplicate rule ids abort it
//! (two rules fighting over one id is a configuration error, not a rule
//! error). The engine receives only validated rules and never re-reads
//! rule files mid-run.

use anyhow::{bail, Context};
use patterns::{ArgPos, Constraints, MethodPattern, Requires};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

pub mod schema;
pub use schema::{compile_rule, RawRule, RuleFile};

#[derive(Debug, Clone, Copy, serde::Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
/// Severity associated with a rule or finding.
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            "warning" => Ok(Severity::Medium),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
/// Taint source: calls matching `pattern` produce a fresh fact at
/// `output` (the return value unless the rule says otherwise).
pub struct SourceSpec {
    pub pattern: MethodPattern,
    /// Name referenced by `concat_order`.
    pub name: Option<String>,
    pub output: ArgPos,
}

#[derive(Debug, Clone)]
/// Taint sink: one overload shape and the argument positions it checks.
pub struct SinkSpec {
    pub pattern: MethodPattern,
    pub args: Vec<ArgPos>,
    pub requires: Requires,
    pub via: Option<MethodPattern>,
}

#[derive(Debug, Clone)]
pub struct SanitizerSpec {
    pub pattern: MethodPattern,
    pub args: Vec<ArgPos>,
}

#[derive(Debug, Clone)]
pub struct PropagatorSpec {
    pub pattern: MethodPattern,
    pub from: Vec<ArgPos>,
    pub to: ArgPos,
}

#[derive(Debug, Clone)]
/// Representation ready for analysis.
pub struct CompiledRule {
    pub id: String,
    pub severity: Severity,
    pub category: String,
    pub message: String,
    pub remediation: Option<String>,
    pub sources: Vec<SourceSpec>,
    pub sinks: Vec<SinkSpec>,
    pub sanitizers: Vec<SanitizerSpec>,
    pub propagators: Vec<PropagatorSpec>,
    pub constraints: Constraints,
    pub source_file: Option<PathBuf>,
}

impl CompiledRule {
    /// Index of the first source predicate matching the declared callee.
    pub fn matches_source(&self, callee: &ir::MethodSig) -> Option<u16> {
        self.sources
            .iter()
            .position(|s| s.pattern.matches(callee))
            .map(|i| i as u16)
    }

    /// The sink overload matching the declared callee, if any. Overloads
    /// with pinned parameter lists never cross-match arities.
    pub fn matches_sink(&self, callee: &ir::MethodSig) -> Option<&SinkSpec> {
        self.sinks.iter().find(|s| s.pattern.matches(callee))
    }

    pub fn matches_sanitizer(&self, callee: &ir::MethodSig) -> Option<&SanitizerSpec> {
        self.sanitizers.iter().find(|s| s.pattern.matches(callee))
    }

    pub fn matches_propagator(&self, callee: &ir::MethodSig) -> Option<&PropagatorSpec> {
        self.propagators.iter().find(|p| p.pattern.matches(callee))
    }

    pub fn is_allowed_constant(&self, callee: &ir::MethodSig) -> bool {
        self.constraints
            .allowed_constants
            .iter()
            .any(|p| p.matches(callee))
    }

    pub fn source_index_by_name(&self, name: &str) -> Option<u16> {
        self.sources
            .iter()
            .position(|s| s.name.as_deref() == Some(name))
            .map(|i| i as u16)
    }

    /// Per-rule well-formedness. Overlapping source and sink predicates
    /// would make one call both create and consume the same fact, so the
    /// rule is rejected outright.
    pub fn validate(&self) -> Result<(), String> {
        for source in &self.sources {
            for sink in &self.sinks {
                if source.pattern.overlaps(&sink.pattern) {
                    return Err("source and sink predicates overlap".into());
                }
            }
        }
        let mut names = HashSet::new();
        for source in &self.sources {
            if let Some(name) = &source.name {
                if !names.insert(name.as_str()) {
                    return Err(format!("duplicate source name {name:?}"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
/// All rules that survived compilation, in load order.
pub struct RuleSet {
    pub rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Debug, Clone)]
/// A rule that failed compilation, kept for reporting.
pub struct RejectedRule {
    pub id: String,
    pub file: Option<PathBuf>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct LoadedRules {
    pub set: RuleSet,
    pub rejected: Vec<RejectedRule>,
}

#[derive(Deserialize)]
struct LooseFile {
    rules: Vec<serde_yaml::Value>,
}

/// Loads rules from a YAML file or, recursively, a directory of
/// `.yaml`/`.yml` files. Ill-formed rules are rejected individually;
/// unreadable files and duplicate ids abort the load.
pub fn load_rules(path: &Path) -> anyhow::Result<LoadedRules> {
    let mut files = Vec::new();
    collect_rule_files(path, &mut files)?;
    files.sort();
    let mut loaded = LoadedRules::default();
    let mut seen = HashSet::new();
    for file in files {
        debug!(file = %file.display(), "parsing rule file");
        let text = fs::read_to_string(&file)
            .with_context(|| format!("failed to read rule file {}", file.display()))?;
        parse_into(&text, Some(file), &mut loaded, &mut seen)?;
    }
    log_rule_summary(&loaded.set);
    Ok(loaded)
}

/// Loads rules from YAML text. Same validation as [`load_rules`].
pub fn load_rules_from_str(text: &str) -> anyhow::Result<LoadedRules> {
    let mut loaded = LoadedRules::default();
    let mut seen = HashSet::new();
    parse_into(text, None, &mut loaded, &mut seen)?;
    log_rule_summary(&loaded.set);
    Ok(loaded)
}

fn parse_into(
    text: &str,
    file: Option<PathBuf>,
    loaded: &mut LoadedRules,
    seen: &mut HashSet<String>,
) -> anyhow::Result<()> {
    let loose: LooseFile = serde_yaml::from_str(text).with_context(|| match &file {
        Some(f) => format!("invalid rule file {}", f.display()),
        None => "invalid rule text".to_string(),
    })?;
    for value in loose.rules {
        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("<missing id>")
            .to_string();
        let raw: RawRule = match serde_yaml::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                reject(loaded, id, &file, e.to_string());
                continue;
            }
        };
        if !seen.insert(raw.id.clone()) {
            bail!("duplicate rule id: {}", raw.id);
        }
        match compile_rule(&raw, file.as_ref()) {
            Ok(rule) => loaded.set.rules.push(rule),
            Err(reason) => reject(loaded, raw.id.clone(), &file, reason),
        }
    }
    Ok(())
}

fn reject(loaded: &mut LoadedRules, id: String, file: &Option<PathBuf>, reason: String) {
    warn!(rule = %id, reason = %reason, "rejecting malformed rule");
    loaded.rejected.push(RejectedRule {
        id,
        file: file.clone(),
        reason,
    });
}

fn collect_rule_files(path: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    if path.is_file() {
        out.push(path.to_path_buf());
        return Ok(());
    }
    if !path.is_dir() {
        bail!("rule path {} does not exist", path.display());
    }
    let mut entries: Vec<_> = fs::read_dir(path)
        .with_context(|| format!("failed to read rule directory {}", path.display()))?
        .collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.path());
    for entry in entries {
        let p = entry.path();
        if p.is_dir() {
            collect_rule_files(&p, out)?;
        } else if matches!(
            p.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        ) {
            out.push(p);
        } else {
            debug!(file = %p.display(), "skipping non-rule file");
        }
    }
    Ok(())
}

fn log_rule_summary(set: &RuleSet) {
    for rule in &set.rules {
        debug!(
            rule = %rule.id,
            severity = %rule.severity,
            sources = rule.sources.len(),
            sinks = rule.sinks.len(),
            sanitizers = rule.sanitizers.len(),
            propagators = rule.propagators.len(),
            structural = !rule.constraints.is_empty(),
            "loaded rule"
        );
    }
}
