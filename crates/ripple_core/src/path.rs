//! Dot-delimited property paths

use std::fmt;

use crate::value::Value;

/// A parsed `a.b.c` path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertyPath {
    segments: Vec<String>,
}

/// Parse a dot-delimited path.
///
/// Only letters, digits, `_`, `$` and `.` are accepted; anything else (such
/// as brackets or operators) yields `None`.
pub fn parse_path(path: &str) -> Option<PropertyPath> {
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '.'));
    if !valid {
        return None;
    }
    Some(PropertyPath {
        segments: path.split('.').map(str::to_string).collect(),
    })
}

impl PropertyPath {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Resolve the path from `root`, reading each object segment through its
    /// interceptor. Resolution stops with `Undefined` at the first
    /// non-container.
    pub fn get(&self, root: &Value) -> Value {
        let mut current = root.clone();
        for segment in &self.segments {
            current = match &current {
                Value::Object(obj) => obj.get(segment),
                Value::Array(arr) if segment == "length" => Value::from(arr.len()),
                Value::Array(arr) => match segment.parse::<usize>() {
                    Ok(index) => arr.get(index),
                    Err(_) => Value::Undefined,
                },
                _ => return Value::Undefined,
            };
        }
        current
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}
