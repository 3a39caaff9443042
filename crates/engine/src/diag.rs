//! Structured diagnostics attached to an analysis run.
//!
//! None of these abort the run: malformed rules are dropped at load,
//! unresolved calls analyzed conservatively, diverging summaries frozen
//! and timeouts leave partial results. Path widening is a designed
//! approximation, not a condition worth reporting.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    MalformedRule,
    UnresolvedCall,
    SummaryDivergence,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

/// Thread-shared diagnostic collector with per-key deduplication, so one
/// unresolved signature warns once however many call sites hit it.
#[derive(Debug, Default)]
pub struct DiagSink {
    diags: Mutex<Vec<Diagnostic>>,
    seen: Mutex<HashSet<String>>,
}

impl DiagSink {
    pub fn push(&self, diag: Diagnostic) {
        let mut diags = self.diags.lock().unwrap_or_else(|e| e.into_inner());
        diags.push(diag);
    }

    /// Pushes unless `key` was already reported. Returns whether the key
    /// was new, so callers can pair the diagnostic with a single log line.
    pub fn push_once(&self, key: String, diag: Diagnostic) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        if seen.insert(key) {
            drop(seen);
            self.push(diag);
            return true;
        }
        false
    }

    /// Drains the collected diagnostics, sorted for stable output.
    pub fn into_sorted(self) -> Vec<Diagnostic> {
        let mut diags = self.diags.into_inner().unwrap_or_else(|e| e.into_inner());
        diags.sort();
        diags.dedup();
        diags
    }
}
