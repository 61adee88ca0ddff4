// deposit-annex/src/diff.rs

use serde_json::Value;
use std::collections::BTreeSet;

/// Top-level keys whose values differ between two revisions of a record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Delta {
    changed: BTreeSet<String>,
}

impl Delta {
    /// Shallow key diff. Only object-to-object edits produce keyed changes;
    /// replacing the whole record with a non-object touches no key.
    pub fn between(prev: &Value, next: &Value) -> Self {
        let (Value::Object(a), Value::Object(b)) = (prev, next) else {
            return Self::default();
        };
        let changed = a.keys().chain(b.keys())
            .filter(|k| a.get(*k) != b.get(*k))
            .cloned()
            .collect();
        Self { changed }
    }

    pub fn touches(&self, key: &str) -> bool { self.changed.contains(key) }
    pub fn is_empty(&self) -> bool { self.changed.is_empty() }
    pub fn keys(&self) -> impl Iterator<Item = &str> { self.changed.iter().map(String::as_str) }
}
