//! Program-model types for **TaintScope**.
//!
//! The model is the engine's input: a resolved, typed view of classes,
//! methods and statements, produced by an external front end and shipped
//! as JSON. Statements are three-address shaped — compound expressions
//! arrive flattened into temporaries, so every operand is a local, a
//! constant or a static field. The model is read-only once
//! [`Program::normalize`] has run; the engine never mutates it.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Method signature: declaring type, name and declared parameter types.
///
/// Overloads are distinct signatures. The `class` of a call's signature is
/// the *declared* type of the receiver, which is what rule predicates
/// match against.
///
/// # Example
/// ```
/// use ir::MethodSig;
/// let sig = MethodSig::new("java.util.Random", "nextInt", &[]);
/// assert_eq!(sig.to_string(), "java.util.Random.nextInt()");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodSig {
    pub class: String,
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl MethodSig {
    pub fn new(class: &str, name: &str, params: &[&str]) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.class, self.name, self.params.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Reference to a field by declaring class and name.
pub struct FieldRef {
    pub class: String,
    pub name: String,
}

impl FieldRef {
    pub fn new(class: &str, name: &str) -> Self {
        Self {
            class: class.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Declared visibility of a method.
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Package,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// How a call site dispatches: `static` covers static, private, final and
/// constructor calls (exactly one target); `virtual` goes through the
/// class hierarchy.
pub enum Dispatch {
    Static,
    #[default]
    Virtual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Literal constant operand.
pub enum Constant {
    Str(String),
    Int(i64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Operand of a statement: a local variable (parameters and the receiver
/// `this` included), a literal, or a static field read in place.
pub enum Operand {
    Local(String),
    Const(Constant),
    StaticField(FieldRef),
}

impl Operand {
    /// The local variable name, if this operand is one.
    pub fn as_local(&self) -> Option<&str> {
        match self {
            Operand::Local(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A call statement. `callee` is the declared signature; `dispatch`
/// decides whether the engine resolves it through the hierarchy.
pub struct CallStmt {
    #[serde(default)]
    pub result: Option<String>,
    pub callee: MethodSig,
    #[serde(default)]
    pub dispatch: Dispatch,
    #[serde(default)]
    pub receiver: Option<Operand>,
    #[serde(default)]
    pub args: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
/// Statement kinds. Array access is index-insensitive by design, so array
/// statements carry no index operand.
pub enum StmtKind {
    Assign {
        lhs: String,
        value: Operand,
    },
    /// String concatenation `lhs = left + right`.
    Concat {
        lhs: String,
        left: Operand,
        right: Operand,
    },
    FieldRead {
        lhs: String,
        object: String,
        field: FieldRef,
    },
    FieldWrite {
        object: String,
        field: FieldRef,
        value: Operand,
    },
    ArrayRead {
        lhs: String,
        array: String,
    },
    ArrayWrite {
        array: String,
        value: Operand,
    },
    Call(CallStmt),
    Return {
        #[serde(default)]
        value: Option<Operand>,
    },
    /// Opaque two-way branch. The condition is not modeled; both arms are
    /// considered possible and the engine joins them by set union.
    Branch {
        #[serde(rename = "then", default)]
        then_branch: Vec<Statement>,
        #[serde(rename = "else", default)]
        else_branch: Vec<Statement>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// One statement. `id` is assigned by [`Program::normalize`] in a
/// deterministic pre-order walk and is unique within the method; `line`
/// is the original source line (0 when unknown).
pub struct Statement {
    #[serde(default)]
    pub id: usize,
    #[serde(default)]
    pub line: usize,
    #[serde(flatten)]
    pub kind: StmtKind,
}

impl Statement {
    /// The local variable this statement defines, if any.
    pub fn defined_var(&self) -> Option<&str> {
        match &self.kind {
            StmtKind::Assign { lhs, .. }
            | StmtKind::Concat { lhs, .. }
            | StmtKind::FieldRead { lhs, .. }
            | StmtKind::ArrayRead { lhs, .. } => Some(lhs.as_str()),
            StmtKind::Call(call) => call.result.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Field declaration within a class.
pub struct FieldDef {
    pub name: String,
    pub ty: String,
    #[serde(default)]
    pub is_static: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A method with its resolved signature and flattened body. Instance
/// methods address the receiver as the local variable `this`.
pub struct Method {
    pub sig: MethodSig,
    /// Parameter names, positionally matching `sig.params`. Filled with
    /// `p0..pN` by [`Program::normalize`] when absent.
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub visibility: Visibility,
    /// Analysis root marker set by the front end.
    #[serde(default)]
    pub entry_point: bool,
    #[serde(default)]
    pub ret: Option<String>,
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A class with its supertypes, fields and methods.
pub struct ClassDef {
    pub name: String,
    #[serde(default)]
    pub superclass: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub methods: Vec<Method>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
/// The whole program model: every class the front end resolved.
///
/// # Example
/// ```
/// use ir::Program;
/// let text = r#"{ "classes": [{ "name": "A", "methods": [{
///     "sig": { "class": "A", "name": "main" },
///     "body": [{ "op": "return" }]
/// }]}]}"#;
/// let program = Program::from_json(text).unwrap();
/// assert_eq!(program.classes.len(), 1);
/// ```
pub struct Program {
    #[serde(default)]
    pub classes: Vec<ClassDef>,
}

impl Program {
    /// Parses, normalizes and validates a model from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let mut program: Program =
            serde_json::from_str(text).context("failed to parse program model")?;
        program.normalize();
        program.validate()?;
        Ok(program)
    }

    /// Assigns statement ids (pre-order, branch bodies included) and
    /// synthesizes missing parameter names as `p0..pN`. Deterministic:
    /// two loads of the same model produce identical ids.
    pub fn normalize(&mut self) {
        for class in &mut self.classes {
            for method in &mut class.methods {
                if method.params.is_empty() && !method.sig.params.is_empty() {
                    method.params = (0..method.sig.params.len()).map(|i| format!("p{i}")).collect();
                }
                let mut next = 0usize;
                number_statements(&mut method.body, &mut next);
            }
        }
    }

    /// Structural validation. Duplicate class names, duplicate method
    /// signatures and arity mismatches are configuration errors; anything
    /// beyond that (missing callees, unknown variables) is handled
    /// conservatively by the engine instead.
    pub fn validate(&self) -> Result<()> {
        let mut classes = std::collections::HashSet::new();
        let mut sigs = std::collections::HashSet::new();
        for class in &self.classes {
            if !classes.insert(class.name.as_str()) {
                bail!("duplicate class: {}", class.name);
            }
            for method in &class.methods {
                if method.sig.class != class.name {
                    bail!(
                        "method {} declared under class {}",
                        method.sig,
                        class.name
                    );
                }
                if !sigs.insert(&method.sig) {
                    bail!("duplicate method: {}", method.sig);
                }
                if method.params.len() != method.sig.params.len() {
                    bail!(
                        "method {}: {} parameter names for {} declared types",
                        method.sig,
                        method.params.len(),
                        method.sig.params.len()
                    );
                }
            }
        }
        Ok(())
    }

    /// Iterates every method of every class.
    pub fn methods(&self) -> impl Iterator<Item = (&ClassDef, &Method)> {
        self.classes
            .iter()
            .flat_map(|c| c.methods.iter().map(move |m| (c, m)))
    }

    /// Linear lookup by signature. The engine builds an indexed view; this
    /// is for tools and tests.
    pub fn find_method(&self, sig: &MethodSig) -> Option<&Method> {
        self.methods().map(|(_, m)| m).find(|m| &m.sig == sig)
    }
}

fn number_statements(body: &mut [Statement], next: &mut usize) {
    for stmt in body {
        stmt.id = *next;
        *next += 1;
        if let StmtKind::Branch {
            then_branch,
            else_branch,
        } = &mut stmt.kind
        {
            number_statements(then_branch, next);
            number_statements(else_branch, next);
        }
    }
}

/// Loads a program model from a JSON file.
pub fn load_program(path: &Path) -> Result<Program> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read program model {}", path.display()))?;
    Program::from_json(&text).with_context(|| format!("in program model {}", path.display()))
}

#[cfg(test)]
mod tests;
