//! Colon-separated HFS path syntax (TN1041).
//!
//! A leading colon makes the path relative to the volume root; a trailing
//! colon is ignored; an empty interior component is a parent-up and must
//! have a level to pop.

use crate::error::{MacFsError, Result};

/// A parsed quarry path. `relative` paths start below the volume root;
/// absolute paths name the volume as their first component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HfsPath {
    pub relative: bool,
    pub components: Vec<String>,
}

impl HfsPath {
    /// True when the quarry is a single bare name with no separators.
    pub fn is_bare_name(path: &str) -> bool {
        !path.contains(':')
    }
}

/// Parse a colon-separated HFS path.
///
/// `":Foo:Bar:"` -> relative, `["Foo", "Bar"]`;
/// `"Vol:Foo::Baz"` -> absolute, `["Vol", "Foo", "Baz"]` (the parent-up
/// is validated against the levels walked so far);
/// `":::"` -> `PathSyntax` (pops with nothing to pop).
pub fn parse(path: &str) -> Result<HfsPath> {
    if path.is_empty() {
        return Err(MacFsError::PathSyntax("empty path".into()));
    }

    let relative = path.starts_with(':');
    let body = path.strip_prefix(':').unwrap_or(path);

    let mut components = Vec::new();
    if body.is_empty() {
        return Ok(HfsPath {
            relative,
            components,
        });
    }

    let mut tokens: Vec<&str> = body.split(':').collect();
    // A trailing colon produces one final empty token; it is ignored
    // rather than treated as a parent-up.
    if tokens.last() == Some(&"") {
        tokens.pop();
    }

    let mut depth = 0usize;
    for token in tokens {
        if token.is_empty() {
            if depth == 0 {
                return Err(MacFsError::PathSyntax(format!(
                    "parent-up with no component to pop in '{path}'"
                )));
            }
            depth -= 1;
        } else {
            if token.len() > 255 {
                return Err(MacFsError::PathSyntax(format!(
                    "component longer than 255 in '{path}'"
                )));
            }
            components.push(token.to_string());
            depth += 1;
        }
    }

    Ok(HfsPath {
        relative,
        components,
    })
}
