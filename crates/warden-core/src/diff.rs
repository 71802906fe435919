//! Structural diff of two JSON documents.
//!
//! Paths are dotted, with array indices as numeric segments
//! (`spec.containers.0.image`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One changed leaf (or subtree that appeared/disappeared).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    /// Dotted path of the field.
    pub path: String,
    /// Value before the change; `None` if the field was added.
    pub old: Option<Value>,
    /// Value after the change; `None` if the field was removed.
    pub new: Option<Value>,
}

/// Path include/ignore filter applied to update diffs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeFilters {
    /// Only changes at or under these paths count. Empty means all paths.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    /// Changes at or under these paths are dropped before diffing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
}

impl ChangeFilters {
    /// Returns true if no filter is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.ignore.is_empty()
    }

    /// Computes the filtered diff between two versions of an object.
    #[must_use]
    pub fn diff(&self, old: &Value, new: &Value) -> Vec<FieldDiff> {
        let mut old = old.clone();
        let mut new = new.clone();
        for path in &self.ignore {
            remove_path(&mut old, path);
            remove_path(&mut new, path);
        }
        let diffs = diff(&old, &new);
        if self.include.is_empty() {
            return diffs;
        }
        diffs
            .into_iter()
            .filter(|d| {
                self.include
                    .iter()
                    .any(|inc| is_under(&d.path, inc) || is_under(inc, &d.path))
            })
            .collect()
    }
}

/// Returns true if `path` equals `prefix` or lies beneath it.
#[must_use]
pub fn is_under(path: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Removes the value at a dotted path, if present.
pub fn remove_path(value: &mut Value, path: &str) {
    let Some((parent, last)) = path.rsplit_once('.') else {
        remove_child(value, path);
        return;
    };
    let mut current = value;
    for segment in parent.split('.') {
        let next = match current {
            Value::Object(map) => map.get_mut(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            _ => None,
        };
        match next {
            Some(v) => current = v,
            None => return,
        }
    }
    remove_child(current, last);
}

fn remove_child(value: &mut Value, key: &str) {
    match value {
        Value::Object(map) => {
            map.remove(key);
        }
        Value::Array(items) => {
            if let Ok(i) = key.parse::<usize>() {
                if i < items.len() {
                    items[i] = Value::Null;
                }
            }
        }
        _ => {}
    }
}

/// Computes every leaf difference between `old` and `new`.
#[must_use]
pub fn diff(old: &Value, new: &Value) -> Vec<FieldDiff> {
    let mut out = Vec::new();
    diff_into(String::new(), Some(old), Some(new), &mut out);
    out
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

fn diff_into(path: String, old: Option<&Value>, new: Option<&Value>, out: &mut Vec<FieldDiff>) {
    match (old, new) {
        (Some(Value::Object(a)), Some(Value::Object(b))) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                diff_into(join(&path, key), a.get(key), b.get(key), out);
            }
        }
        (Some(Value::Array(a)), Some(Value::Array(b))) => {
            for i in 0..a.len().max(b.len()) {
                diff_into(join(&path, &i.to_string()), a.get(i), b.get(i), out);
            }
        }
        (a, b) if a == b => {}
        (a, b) => out.push(FieldDiff {
            path,
            old: a.cloned(),
            new: b.cloned(),
        }),
    }
}
