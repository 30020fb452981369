//! Deep traversal
//!
//! Reads every property reachable from a value so that the active watcher
//! depends on all of them. Used by deep watchers.

use rustc_hash::FxHashSet;

use crate::value::Value;

#[derive(Default)]
struct Seen {
    /// Structural dep ids of observed containers
    deps: FxHashSet<u64>,
    /// Addresses of unobserved containers
    raw: FxHashSet<usize>,
}

impl Seen {
    fn first_visit(&mut self, value: &Value) -> bool {
        if let Some(observer) = value.observer() {
            return self.deps.insert(observer.dep().id());
        }
        match value {
            Value::Object(obj) => self.raw.insert(obj.addr()),
            Value::Array(arr) => self.raw.insert(arr.addr()),
            _ => false,
        }
    }
}

/// Recursively touch every element and property under `value`.
///
/// Primitives, render nodes and frozen containers are skipped. Each
/// container is visited once per call, so cycles terminate.
pub fn traverse(value: &Value) {
    let mut seen = Seen::default();
    walk(value, &mut seen);
}

fn walk(value: &Value, seen: &mut Seen) {
    match value {
        Value::Array(arr) => {
            if arr.is_frozen() || !seen.first_visit(value) {
                return;
            }
            for item in arr.iter().rev() {
                walk(&item, seen);
            }
        }
        Value::Object(obj) => {
            if obj.is_frozen() || !seen.first_visit(value) {
                return;
            }
            for key in obj.keys().iter().rev() {
                walk(&obj.get(key), seen);
            }
        }
        _ => {}
    }
}
