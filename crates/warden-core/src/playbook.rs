//! Playbooks: triggers plus an ordered action chain.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::action::{Action, ActionRegistry, BoundParams};
use crate::error::{ActionError, EngineError, ParamViolation, Result};
use crate::event::{EventKind, ExecutionContext, ExecutionEvent, TriggerEvent};
use crate::rate_limiter::RateLimiter;
use crate::schedule::Schedule;
use crate::trigger::{Trigger, TriggerDef, TriggerOutcome};

/// One action reference in a playbook definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionBindingDef {
    /// Registered action name.
    pub name: String,
    /// Raw parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl ActionBindingDef {
    /// Creates a binding.
    #[must_use]
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// A playbook as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookDefinition {
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Triggers; a single table or a list.
    #[serde(deserialize_with = "one_or_many")]
    pub triggers: Vec<TriggerDef>,
    /// Ordered action chain.
    pub actions: Vec<ActionBindingDef>,
    /// Target sinks; `None` routes to the default sinks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sinks: Option<Vec<String>>,
    /// Stop evaluating further playbooks once this one fires.
    #[serde(default)]
    pub stop: bool,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<TriggerDef>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(TriggerDef),
        Many(Vec<TriggerDef>),
    }
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(t) => vec![t],
        OneOrMany::Many(ts) => ts,
    })
}

impl PlaybookDefinition {
    /// Creates a definition with one trigger.
    #[must_use]
    pub fn new(trigger: TriggerDef, actions: Vec<ActionBindingDef>) -> Self {
        Self {
            name: None,
            triggers: vec![trigger],
            actions,
            sinks: None,
            stop: false,
        }
    }

    /// Sets the target sinks.
    #[must_use]
    pub fn with_sinks(mut self, sinks: Vec<String>) -> Self {
        self.sinks = Some(sinks);
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the stop flag.
    #[must_use]
    pub const fn with_stop(mut self, stop: bool) -> Self {
        self.stop = stop;
        self
    }

    /// Stable identity of a definition.
    ///
    /// The definition is serialized to JSON with sorted object keys and
    /// hashed, so identical definitions hash identically across processes
    /// and reloads.
    pub fn playbook_id(&self) -> Result<String> {
        let canonical = serde_json::to_vec(&serde_json::to_value(self)?)?;
        let hash = blake3::hash(&canonical);
        Ok(hash.to_hex().as_str()[..16].to_string())
    }
}

struct BoundAction {
    action: Arc<dyn Action>,
    params: BoundParams,
}

/// Result of running a playbook against an event.
#[derive(Debug)]
pub enum PlaybookOutcome {
    /// No trigger matched.
    NotMatched,
    /// A trigger matched but was throttled.
    RateLimited,
    /// Trigger evaluation failed.
    TriggerErrored(String),
    /// An action does not accept this event kind; nothing ran.
    Skipped {
        /// The incompatible action.
        action: String,
    },
    /// An action failed; the rest of the chain did not run.
    Failed {
        /// The failing action.
        action: String,
        /// The failure.
        error: ActionError,
    },
    /// Shutdown was requested before the chain finished.
    Cancelled,
    /// The chain ran to completion.
    Completed(Box<ExecutionEvent>),
}

/// An immutable, validated playbook.
pub struct Playbook {
    id: String,
    name: String,
    definition: PlaybookDefinition,
    triggers: Vec<Trigger>,
    actions: Vec<BoundAction>,
}

impl std::fmt::Debug for Playbook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playbook")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("triggers", &self.triggers.len())
            .field("actions", &self.action_names())
            .finish()
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Playbook {
    /// Validates a definition against the action registry.
    ///
    /// Every action must exist and accept every event kind the triggers
    /// produce. `global` values are merged into each parameter block for
    /// keys the action declares and the block leaves unset. All parameter
    /// violations across all actions are reported together.
    ///
    /// The id hashes the definition as written, so editing `[global]`
    /// keeps each playbook's throttle state.
    pub fn build(
        definition: &PlaybookDefinition,
        registry: &ActionRegistry,
        global: &Map<String, Value>,
    ) -> Result<Self> {
        if definition.triggers.is_empty() {
            return Err(EngineError::config("playbook has no triggers"));
        }
        if definition.actions.is_empty() {
            return Err(EngineError::config("playbook has no actions"));
        }

        let triggers = definition
            .triggers
            .iter()
            .enumerate()
            .map(|(i, def)| {
                Trigger::compile(def).map_err(|e| match e {
                    EngineError::Config { reason } => EngineError::config(format!("triggers[{i}]: {reason}")),
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut effective = definition.clone();
        let mut violations = Vec::new();
        let mut actions = Vec::with_capacity(definition.actions.len());
        for (i, binding) in effective.actions.iter_mut().enumerate() {
            let action = registry.get(&binding.name).ok_or_else(|| EngineError::UnknownAction {
                name: binding.name.clone(),
            })?;
            for trigger in &triggers {
                if !action.accepts_kind(trigger.event_kind()) {
                    return Err(EngineError::IncompatibleAction {
                        action: binding.name.clone(),
                        trigger: trigger.event_kind().to_string(),
                    });
                }
            }

            merge_global(&mut binding.params, action.as_ref(), global);
            match action.bind(&binding.params) {
                Ok(params) => actions.push(BoundAction { action, params }),
                Err(errs) => {
                    let prefix = format!("actions[{i}].params");
                    violations.extend(errs.into_iter().map(|v: ParamViolation| v.prefixed(&prefix)));
                }
            }
        }

        let id = definition.playbook_id()?;
        let name = effective
            .name
            .clone()
            .unwrap_or_else(|| definition.actions[0].name.clone());
        if !violations.is_empty() {
            return Err(EngineError::Validation {
                subject: format!("playbook '{name}'"),
                errors: violations,
            });
        }

        Ok(Self {
            id,
            name,
            definition: effective,
            triggers,
            actions,
        })
    }

    /// Returns the stable playbook id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the effective definition (global params merged).
    #[must_use]
    pub const fn definition(&self) -> &PlaybookDefinition {
        &self.definition
    }

    /// Returns the configured target sinks.
    #[must_use]
    pub fn sinks(&self) -> Option<&[String]> {
        self.definition.sinks.as_deref()
    }

    /// Returns the stop flag.
    #[must_use]
    pub const fn stop(&self) -> bool {
        self.definition.stop
    }

    /// Returns the action names in chain order.
    #[must_use]
    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|b| b.action.name()).collect()
    }

    /// Returns the distinct event kinds the triggers consume, in order.
    #[must_use]
    pub fn event_kinds(&self) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        for trigger in &self.triggers {
            if !kinds.contains(&trigger.event_kind()) {
                kinds.push(trigger.event_kind());
            }
        }
        kinds
    }

    /// Returns the longest throttle window across the triggers.
    #[must_use]
    pub fn max_rate_limit(&self) -> Duration {
        self.triggers
            .iter()
            .filter_map(Trigger::rate_limit)
            .max()
            .unwrap_or_default()
    }

    /// Returns the schedule of the first scheduled trigger.
    #[must_use]
    pub fn schedule(&self) -> Option<&Schedule> {
        self.triggers.iter().find_map(Trigger::schedule)
    }

    /// Evaluates the triggers and, on a match, runs the action chain.
    pub fn execute(
        &self,
        event: &TriggerEvent,
        limiter: &RateLimiter,
        context: &ExecutionContext,
    ) -> PlaybookOutcome {
        let mut fallback = PlaybookOutcome::NotMatched;
        for trigger in &self.triggers {
            let outcome = catch_unwind(AssertUnwindSafe(|| trigger.should_fire(event, &self.id, limiter)))
                .unwrap_or_else(|payload| TriggerOutcome::Errored(panic_message(payload.as_ref())));
            match outcome {
                TriggerOutcome::Fired { diffs } => {
                    debug!(playbook_id = %self.id, playbook = %self.name, event = %event.description(), "playbook fired");
                    let exec = ExecutionEvent::new(event.clone(), self.id.clone(), diffs, context.clone());
                    return self.run_chain(exec);
                }
                TriggerOutcome::RateLimited => fallback = PlaybookOutcome::RateLimited,
                TriggerOutcome::Errored(reason) => {
                    if !matches!(fallback, PlaybookOutcome::RateLimited) {
                        fallback = PlaybookOutcome::TriggerErrored(reason);
                    }
                }
                TriggerOutcome::NotMatched => {}
            }
        }

        match &fallback {
            PlaybookOutcome::RateLimited => {
                debug!(playbook_id = %self.id, playbook = %self.name, "playbook rate limited");
            }
            PlaybookOutcome::TriggerErrored(reason) => {
                warn!(playbook_id = %self.id, playbook = %self.name, error = %reason, "trigger evaluation failed");
            }
            _ => debug!(playbook_id = %self.id, playbook = %self.name, "playbook not matched"),
        }
        fallback
    }

    /// Runs the action chain against an execution event.
    ///
    /// Actions run strictly in order. The first failure ends the chain and
    /// its partial finding is dropped. Cancellation is honored between
    /// actions.
    pub fn run_chain(&self, mut event: ExecutionEvent) -> PlaybookOutcome {
        if let Some(bound) = self.actions.iter().find(|b| !b.action.accepts_kind(event.kind())) {
            debug!(
                playbook_id = %self.id,
                action = bound.action.name(),
                kind = %event.kind(),
                "action does not accept event kind, skipping playbook"
            );
            return PlaybookOutcome::Skipped {
                action: bound.action.name().to_string(),
            };
        }

        for bound in &self.actions {
            if event.context().cancel.is_cancelled() {
                debug!(playbook_id = %self.id, "shutdown requested, abandoning chain");
                event.discard_finding();
                return PlaybookOutcome::Cancelled;
            }
            if let Err(error) = run_action(bound.action.as_ref(), &mut event, &bound.params) {
                event.discard_finding();
                error!(
                    playbook_id = %self.id,
                    playbook = %self.name,
                    action = bound.action.name(),
                    error = %error,
                    "action failed"
                );
                return PlaybookOutcome::Failed {
                    action: bound.action.name().to_string(),
                    error,
                };
            }
        }
        PlaybookOutcome::Completed(Box::new(event))
    }
}

/// Runs one action, turning a panic into an action error.
fn run_action(
    action: &dyn Action,
    event: &mut ExecutionEvent,
    params: &BoundParams,
) -> std::result::Result<(), ActionError> {
    catch_unwind(AssertUnwindSafe(|| action.run(event, params)))
        .unwrap_or_else(|payload| Err(ActionError::Panicked(panic_message(payload.as_ref()))))
}

fn merge_global(params: &mut Value, action: &dyn Action, global: &Map<String, Value>) {
    let declared: Vec<(&String, &Value)> = global
        .iter()
        .filter(|(k, _)| action.schema().declares(k))
        .collect();
    if declared.is_empty() {
        return;
    }
    if params.is_null() {
        *params = Value::Object(Map::new());
    }
    if let Value::Object(map) = params {
        for (key, value) in declared {
            if map.get(key).is_none_or(Value::is_null) {
                map.insert(key.clone(), value.clone());
            }
        }
    }
}
