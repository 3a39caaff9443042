//! Common utilities for the command line interface.

use anyhow::{anyhow, Result};
use ir::MethodSig;

pub mod analyze;
pub mod args;
pub mod config;
pub mod output;
pub mod rules;
pub mod ui;

/// Parses an entry-point override of the form `Class.name(p1,p2)`.
///
/// The class may be dotted; the method name is everything between the
/// last `.` before the parameter list and the opening parenthesis. An
/// empty parameter list selects the nullary overload.
///
/// # Example
///
/// ```
/// use taintscope::parse_entry;
/// let sig = parse_entry("com.acme.App.main(java.lang.String)").unwrap();
/// assert_eq!(sig.class, "com.acme.App");
/// assert_eq!(sig.name, "main");
/// assert_eq!(sig.params, vec!["java.lang.String"]);
/// ```
pub fn parse_entry(s: &str) -> Result<MethodSig> {
    let open = s
        .find('(')
        .ok_or_else(|| anyhow!("entry point '{s}' is missing a parameter list"))?;
    let close = s
        .rfind(')')
        .filter(|&c| c > open)
        .ok_or_else(|| anyhow!("entry point '{s}' has an unterminated parameter list"))?;
    let qualified = &s[..open];
    let dot = qualified
        .rfind('.')
        .ok_or_else(|| anyhow!("entry point '{s}' is missing a class qualifier"))?;
    let (class, name) = (&qualified[..dot], &qualified[dot + 1..]);
    if class.is_empty() || name.is_empty() {
        return Err(anyhow!("entry point '{s}' is missing a class or method name"));
    }
    let params: Vec<&str> = s[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    Ok(MethodSig::new(class, name, &params))
}
