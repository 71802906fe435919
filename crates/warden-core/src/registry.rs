//! The active playbook set and its dispatch index.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::warn;

use crate::action::ActionRegistry;
use crate::error::{EngineError, Result};
use crate::event::{EventKind, TriggerEvent};
use crate::playbook::{Playbook, PlaybookDefinition};

/// Immutable snapshot of the active playbooks.
///
/// Playbooks are indexed by the event kinds their triggers consume. Each
/// index bucket keeps declaration order.
#[derive(Debug, Default)]
pub struct PlaybooksRegistry {
    playbooks: Vec<Arc<Playbook>>,
    by_kind: HashMap<EventKind, Vec<Arc<Playbook>>>,
}

impl PlaybooksRegistry {
    /// Builds a registry from definitions.
    ///
    /// Any invalid definition fails the whole build. A definition repeating
    /// an earlier one is logged and kept once.
    pub fn build(
        definitions: &[PlaybookDefinition],
        actions: &ActionRegistry,
        global: &Map<String, Value>,
    ) -> Result<Self> {
        let mut playbooks = Vec::with_capacity(definitions.len());
        let mut seen = HashSet::new();
        for (i, def) in definitions.iter().enumerate() {
            let playbook = Playbook::build(def, actions, global).map_err(|e| match e {
                EngineError::Config { reason } => EngineError::config(format!("playbooks[{i}]: {reason}")),
                other => other,
            })?;
            if !seen.insert(playbook.id().to_string()) {
                warn!(
                    index = i,
                    playbook = playbook.name(),
                    playbook_id = %playbook.id(),
                    "duplicate playbook ignored"
                );
                continue;
            }
            playbooks.push(Arc::new(playbook));
        }
        Ok(Self::from_playbooks(playbooks))
    }

    /// Creates a registry from already-built playbooks.
    #[must_use]
    pub fn from_playbooks(playbooks: Vec<Arc<Playbook>>) -> Self {
        let mut by_kind: HashMap<EventKind, Vec<Arc<Playbook>>> = HashMap::new();
        for playbook in &playbooks {
            for kind in playbook.event_kinds() {
                by_kind.entry(kind).or_default().push(Arc::clone(playbook));
            }
        }
        Self { playbooks, by_kind }
    }

    /// Returns the candidate playbooks for an event, in declaration order.
    #[must_use]
    pub fn get_playbooks(&self, event: &TriggerEvent) -> &[Arc<Playbook>] {
        self.by_kind.get(&event.kind()).map(Vec::as_slice).unwrap_or_default()
    }

    /// Returns every playbook, in declaration order.
    #[must_use]
    pub fn playbooks(&self) -> &[Arc<Playbook>] {
        &self.playbooks
    }

    /// Returns the playbooks with a scheduled trigger.
    #[must_use]
    pub fn scheduled_playbooks(&self) -> Vec<Arc<Playbook>> {
        self.playbooks
            .iter()
            .filter(|p| p.schedule().is_some())
            .cloned()
            .collect()
    }

    /// Returns the longest throttle window any playbook uses.
    #[must_use]
    pub fn max_rate_limit(&self) -> Duration {
        self.playbooks
            .iter()
            .map(|p| p.max_rate_limit())
            .max()
            .unwrap_or_default()
    }

    /// Looks up a playbook by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<Playbook>> {
        self.playbooks.iter().find(|p| p.id() == id)
    }

    /// Returns the number of playbooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.playbooks.len()
    }

    /// Returns true if there are no playbooks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.playbooks.is_empty()
    }
}
