//! Access paths: the storage locations taint facts attach to.
//!
//! A path is a root (local variable or static field) plus a chain of
//! field and array-element selectors. Chains are capped at
//! [`MAX_FIELD_DEPTH`]; appending past the cap truncates and marks the
//! path widened, after which it stands for itself and every extension.

use ir::FieldRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Selector chains longer than this collapse to a widened suffix.
pub const MAX_FIELD_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Root {
    Var(String),
    Static(FieldRef),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Field(String),
    /// Array element, index-insensitive: one selector stands for every
    /// index.
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccessPath {
    pub root: Root,
    pub fields: Vec<Selector>,
    pub widened: bool,
}

impl AccessPath {
    pub fn var(name: &str) -> Self {
        AccessPath {
            root: Root::Var(name.to_string()),
            fields: Vec::new(),
            widened: false,
        }
    }

    pub fn static_field(field: FieldRef) -> Self {
        AccessPath {
            root: Root::Static(field),
            fields: Vec::new(),
            widened: false,
        }
    }

    pub fn with_fields(root: Root, fields: Vec<Selector>, widened: bool) -> Self {
        let mut path = AccessPath {
            root,
            fields: Vec::new(),
            widened: false,
        };
        for sel in fields {
            path = path.child(sel);
        }
        path.widened |= widened;
        path
    }

    /// Extends the path by one selector, truncating at the depth cap.
    pub fn child(&self, sel: Selector) -> Self {
        let mut next = self.clone();
        if next.widened {
            return next;
        }
        if next.fields.len() >= MAX_FIELD_DEPTH {
            next.widened = true;
            return next;
        }
        next.fields.push(sel);
        next
    }

    pub fn field(&self, name: &str) -> Self {
        self.child(Selector::Field(name.to_string()))
    }

    pub fn index(&self) -> Self {
        self.child(Selector::Index)
    }

    pub fn is_root(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn root_var(&self) -> Option<&str> {
        match &self.root {
            Root::Var(v) => Some(v),
            Root::Static(_) => None,
        }
    }

    /// Whether taint on `self` implies taint on `other`: same root and
    /// `self`'s selector chain is a prefix of `other`'s. A widened path
    /// additionally covers everything below its truncation point.
    pub fn covers(&self, other: &AccessPath) -> bool {
        if self.root != other.root {
            return false;
        }
        if self.fields.len() > other.fields.len() {
            return false;
        }
        self.fields[..] == other.fields[..self.fields.len()]
    }

    /// Re-roots the suffix after `skip` selectors onto `onto`, keeping
    /// the cap. Used to copy `y.f.g` onto `x.f.g` for `x = y`.
    pub fn rebase(&self, skip: usize, onto: &AccessPath) -> AccessPath {
        let mut out = onto.clone();
        for sel in self.fields.iter().skip(skip) {
            out = out.child(sel.clone());
        }
        if self.widened {
            out.widened = true;
        }
        out
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            Root::Var(v) => write!(f, "{v}")?,
            Root::Static(s) => write!(f, "{}.{}", s.class, s.name)?,
        }
        for sel in &self.fields {
            match sel {
                Selector::Field(name) => write!(f, ".{name}")?,
                Selector::Index => write!(f, "[*]")?,
            }
        }
        if self.widened {
            write!(f, ".*")?;
        }
        Ok(())
    }
}
