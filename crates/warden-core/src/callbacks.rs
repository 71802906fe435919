//! Subscription table for interactive callback blocks.
//!
//! A callback block in a finding carries an opaque id. Invoking the id runs
//! the bound action as an external action. Entries live until they are
//! unsubscribed or purged by age.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Opaque callback identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(Uuid);

impl CallbackId {
    /// Generates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an id from its string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for CallbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a callback runs when invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackBinding {
    /// Registered action name.
    pub action: String,
    /// Raw action parameters.
    #[serde(default)]
    pub params: Value,
    /// Sinks the resulting finding goes to; `None` uses the default routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sinks: Option<Vec<String>>,
}

impl CallbackBinding {
    /// Creates a binding with empty parameters.
    #[must_use]
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Value::Object(serde_json::Map::new()),
            sinks: None,
        }
    }

    /// Sets the action parameters.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Sets the target sinks.
    #[must_use]
    pub fn with_sinks(mut self, sinks: Vec<String>) -> Self {
        self.sinks = Some(sinks);
        self
    }
}

#[derive(Debug)]
struct Entry {
    binding: CallbackBinding,
    created: Instant,
}

/// Table of live callback subscriptions.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    entries: RwLock<HashMap<CallbackId, Entry>>,
}

impl CallbackRegistry {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a binding and returns its id.
    pub fn subscribe(&self, binding: CallbackBinding) -> CallbackId {
        let id = CallbackId::new();
        self.entries.write().insert(
            id,
            Entry {
                binding,
                created: Instant::now(),
            },
        );
        id
    }

    /// Removes a subscription. Returns the binding if it existed.
    pub fn unsubscribe(&self, id: &CallbackId) -> Option<CallbackBinding> {
        self.entries.write().remove(id).map(|e| e.binding)
    }

    /// Looks up a binding.
    #[must_use]
    pub fn get(&self, id: &CallbackId) -> Option<CallbackBinding> {
        self.entries.read().get(id).map(|e| e.binding.clone())
    }

    /// Drops subscriptions older than `max_age`. Returns how many were removed.
    pub fn purge_older_than(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.created.elapsed() < max_age);
        before - entries.len()
    }

    /// Returns the number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_get_unsubscribe() {
        let registry = CallbackRegistry::new();
        let id = registry.subscribe(
            CallbackBinding::new("restart_pod")
                .with_params(json!({"name": "p1"}))
                .with_sinks(vec!["slack1".to_string()]),
        );

        let binding = registry.get(&id).unwrap();
        assert_eq!(binding.action, "restart_pod");
        assert_eq!(binding.sinks.as_deref(), Some(&["slack1".to_string()][..]));

        assert!(registry.unsubscribe(&id).is_some());
        assert!(registry.get(&id).is_none());
        assert!(registry.unsubscribe(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn purge_drops_only_old_entries() {
        let registry = CallbackRegistry::new();
        let id = registry.subscribe(CallbackBinding::new("restart_pod"));

        assert_eq!(registry.purge_older_than(Duration::from_secs(3600)), 0);
        assert!(registry.get(&id).is_some());

        assert_eq!(registry.purge_older_than(Duration::ZERO), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn ids_round_trip_through_strings() {
        let id = CallbackId::new();
        assert_eq!(CallbackId::parse(&id.to_string()), Some(id));
        assert_eq!(CallbackId::parse("not-a-uuid"), None);
    }
}
