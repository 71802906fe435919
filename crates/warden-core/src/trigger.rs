//! Trigger definitions and matching.
//!
//! A trigger decides whether a playbook fires for an event. Evaluation runs
//! the checks in a fixed order:
//!
//! 1. event kind and trigger-specific filters (operation, prefixes, labels)
//! 2. exclusion list (any match short-circuits)
//! 3. inclusion list
//! 4. change filters (updates only)
//! 5. rate limiter
//!
//! The rate limiter is consulted last so that an event that would not fire
//! anyway never consumes a throttle window.

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::diff::{ChangeFilters, FieldDiff};
use crate::error::{EngineError, Result};
use crate::event::{EventKind, LogLine, Operation, PrometheusAlert, ResourceChange, TriggerEvent};
use crate::rate_limiter::RateLimiter;
use crate::schedule::{Schedule, ScheduleDef};
use crate::scope::{LabelSelector, Scope, ScopeRuleDef, prefix_matches};

/// Options shared by every trigger type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerOptions {
    /// Minimum seconds between two firings for the same resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u64>,
    /// Resources that never fire the trigger.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<ScopeRuleDef>,
    /// If non-empty, only matching resources fire the trigger.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<ScopeRuleDef>,
}

/// Kubernetes resource change trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChangeTriggerDef {
    /// Resource kind; `None` matches every kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Accepted operations; empty accepts all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<Operation>,
    /// Required prefix of `metadata.name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_prefix: Option<String>,
    /// Required prefix of `metadata.namespace`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_prefix: Option<String>,
    /// Label selector (`a=b,c=d`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels_selector: Option<String>,
    /// Field-level include/ignore filter for updates.
    #[serde(default, skip_serializing_if = "ChangeFilters::is_empty")]
    pub change_filters: ChangeFilters,
    /// Shared options.
    #[serde(flatten)]
    pub options: TriggerOptions,
}

/// Alert status accepted by a Prometheus trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatusFilter {
    /// Only firing alerts.
    #[default]
    Firing,
    /// Only resolved alerts.
    Resolved,
    /// Both.
    All,
}

impl AlertStatusFilter {
    fn accepts(self, status: &str) -> bool {
        match self {
            Self::Firing => status.eq_ignore_ascii_case("firing"),
            Self::Resolved => status.eq_ignore_ascii_case("resolved"),
            Self::All => true,
        }
    }
}

/// Prometheus alert trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrometheusTriggerDef {
    /// Exact alert name; `None` matches every alert.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_name: Option<String>,
    /// Accepted alert status.
    #[serde(default)]
    pub status: AlertStatusFilter,
    /// Required prefix of the `pod` label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name_prefix: Option<String>,
    /// Required prefix of the `namespace` label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_prefix: Option<String>,
    /// Required prefix of the `instance` label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name_prefix: Option<String>,
    /// Shared options.
    #[serde(flatten)]
    pub options: TriggerOptions,
}

/// Manual trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualTriggerDef {
    /// Trigger name; `None` fires for every manual event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Shared options.
    #[serde(flatten)]
    pub options: TriggerOptions,
}

/// Log line trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogTriggerDef {
    /// Required pod name prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name_prefix: Option<String>,
    /// Required namespace prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_prefix: Option<String>,
    /// Regex the line must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Shared options.
    #[serde(flatten)]
    pub options: TriggerOptions,
}

/// A trigger as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerDef {
    /// Kubernetes resource change.
    OnResourceChange(ResourceChangeTriggerDef),
    /// Prometheus alert.
    OnPrometheusAlert(PrometheusTriggerDef),
    /// Scheduler tick.
    OnSchedule(ScheduleDef),
    /// Manual trigger.
    OnManual(ManualTriggerDef),
    /// Log line.
    OnLog(LogTriggerDef),
}

impl TriggerDef {
    /// Returns the event kind this trigger consumes.
    #[must_use]
    pub const fn event_kind(&self) -> EventKind {
        match self {
            Self::OnResourceChange(_) => EventKind::ResourceChange,
            Self::OnPrometheusAlert(_) => EventKind::PrometheusAlert,
            Self::OnSchedule(_) => EventKind::Scheduled,
            Self::OnManual(_) => EventKind::Manual,
            Self::OnLog(_) => EventKind::Log,
        }
    }

    fn options(&self) -> Option<&TriggerOptions> {
        match self {
            Self::OnResourceChange(d) => Some(&d.options),
            Self::OnPrometheusAlert(d) => Some(&d.options),
            Self::OnManual(d) => Some(&d.options),
            Self::OnLog(d) => Some(&d.options),
            Self::OnSchedule(_) => None,
        }
    }
}

/// Result of evaluating a trigger against an event.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// The trigger fired. Carries the filtered diffs for updates.
    Fired {
        /// Field diffs after change filters; empty for non-updates.
        diffs: Vec<FieldDiff>,
    },
    /// The event does not match the trigger.
    NotMatched,
    /// The event matched but the rate limiter rejected it.
    RateLimited,
    /// Evaluation failed.
    Errored(String),
}

impl TriggerOutcome {
    /// Returns true if the trigger fired.
    #[must_use]
    pub const fn fired(&self) -> bool {
        matches!(self, Self::Fired { .. })
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    ResourceChange { selector: Option<LabelSelector> },
    Prometheus,
    Schedule(Schedule),
    Manual,
    Log { pattern: Option<Regex> },
}

/// A compiled trigger.
#[derive(Debug, Clone)]
pub struct Trigger {
    def: TriggerDef,
    matcher: Matcher,
    scope: Scope,
    rate_limit: Option<Duration>,
}

impl Trigger {
    /// Compiles a trigger definition.
    pub fn compile(def: &TriggerDef) -> Result<Self> {
        let matcher = match def {
            TriggerDef::OnResourceChange(d) => Matcher::ResourceChange {
                selector: d.labels_selector.as_deref().map(LabelSelector::parse).transpose()?,
            },
            TriggerDef::OnPrometheusAlert(_) => Matcher::Prometheus,
            TriggerDef::OnSchedule(s) => Matcher::Schedule(Schedule::compile(s)?),
            TriggerDef::OnManual(_) => Matcher::Manual,
            TriggerDef::OnLog(d) => Matcher::Log {
                pattern: d
                    .pattern
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|e| EngineError::config(format!("invalid log pattern: {e}")))?,
            },
        };
        let (scope, rate_limit) = match def.options() {
            Some(options) => (
                Scope::compile(&options.include, &options.exclude)?,
                options.rate_limit.map(Duration::from_secs),
            ),
            None => (Scope::default(), None),
        };
        Ok(Self {
            def: def.clone(),
            matcher,
            scope,
            rate_limit,
        })
    }

    /// Returns the definition.
    #[must_use]
    pub const fn def(&self) -> &TriggerDef {
        &self.def
    }

    /// Returns the event kind this trigger consumes.
    #[must_use]
    pub const fn event_kind(&self) -> EventKind {
        self.def.event_kind()
    }

    /// Returns the schedule for scheduled triggers.
    #[must_use]
    pub const fn schedule(&self) -> Option<&Schedule> {
        match &self.matcher {
            Matcher::Schedule(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the throttle window, if any.
    #[must_use]
    pub const fn rate_limit(&self) -> Option<Duration> {
        self.rate_limit
    }

    /// Decides whether the trigger fires for `event`.
    ///
    /// The only side effect is marking the rate limiter when every other
    /// check passed.
    pub fn should_fire(
        &self,
        event: &TriggerEvent,
        playbook_id: &str,
        limiter: &RateLimiter,
    ) -> TriggerOutcome {
        match self.evaluate(event, playbook_id) {
            Ok(Some((diffs, identity))) => {
                if let Some(window) = self.rate_limit {
                    if !limiter.mark_and_test(playbook_id, &identity, window) {
                        return TriggerOutcome::RateLimited;
                    }
                }
                TriggerOutcome::Fired { diffs }
            }
            Ok(None) => TriggerOutcome::NotMatched,
            Err(e) => TriggerOutcome::Errored(e.to_string()),
        }
    }

    /// Returns the diffs and throttle identity if every check except the
    /// rate limiter passes.
    fn evaluate(
        &self,
        event: &TriggerEvent,
        playbook_id: &str,
    ) -> Result<Option<(Vec<FieldDiff>, String)>> {
        let matched = match (&self.def, &self.matcher, event) {
            (
                TriggerDef::OnResourceChange(def),
                Matcher::ResourceChange { selector },
                TriggerEvent::ResourceChange(change),
            ) => return self.evaluate_resource(def, selector.as_ref(), change),
            (TriggerDef::OnPrometheusAlert(def), _, TriggerEvent::PrometheusAlert(alert)) => {
                self.matches_alert(def, alert).then(|| alert.identity())
            }
            (TriggerDef::OnSchedule(_), _, TriggerEvent::Scheduled(tick)) => {
                (tick.playbook_id == playbook_id).then(|| tick.playbook_id.clone())
            }
            (TriggerDef::OnManual(def), _, TriggerEvent::Manual(manual)) => {
                let name_ok = match (&def.name, &manual.name) {
                    (Some(expected), Some(actual)) => expected == actual,
                    _ => true,
                };
                (name_ok && self.scope.admits(None, None, &BTreeMap::new()))
                    .then(|| manual.name.clone().unwrap_or_default())
            }
            (TriggerDef::OnLog(def), Matcher::Log { pattern }, TriggerEvent::Log(line)) => {
                self.matches_log(def, pattern.as_ref(), line)
                    .then(|| format!("{}/{}", line.namespace, line.pod))
            }
            _ => None,
        };
        Ok(matched.map(|identity| (Vec::new(), identity)))
    }

    fn evaluate_resource(
        &self,
        def: &ResourceChangeTriggerDef,
        selector: Option<&LabelSelector>,
        change: &ResourceChange,
    ) -> Result<Option<(Vec<FieldDiff>, String)>> {
        if def.kind.as_deref().is_some_and(|k| !k.eq_ignore_ascii_case(&change.kind)) {
            return Ok(None);
        }
        if !def.operations.is_empty() && !def.operations.contains(&change.operation) {
            return Ok(None);
        }
        let name = change.name();
        let namespace = change.namespace();
        if !prefix_matches(def.name_prefix.as_deref(), name)
            || !prefix_matches(def.namespace_prefix.as_deref(), namespace)
        {
            return Ok(None);
        }
        let labels = change.labels();
        if selector.is_some_and(|s| !s.matches(&labels)) {
            return Ok(None);
        }
        if !self.scope.admits(name, namespace, &labels) {
            return Ok(None);
        }

        let diffs = if change.operation == Operation::Update {
            let Some(old) = change.old_obj.as_ref() else {
                if def.change_filters.is_empty() {
                    return Ok(Some((Vec::new(), change.identity())));
                }
                return Err(EngineError::Trigger {
                    reason: format!("update of {} carries no previous object", change.identity()),
                });
            };
            let diffs = def.change_filters.diff(old, &change.obj);
            if !def.change_filters.is_empty() && diffs.is_empty() {
                return Ok(None);
            }
            diffs
        } else {
            Vec::new()
        };
        Ok(Some((diffs, change.identity())))
    }

    fn matches_alert(&self, def: &PrometheusTriggerDef, alert: &PrometheusAlert) -> bool {
        if def.alert_name.as_deref().is_some_and(|n| Some(n) != alert.alert_name()) {
            return false;
        }
        if !def.status.accepts(&alert.status) {
            return false;
        }
        let pod = alert.label("pod");
        let namespace = alert.label("namespace");
        prefix_matches(def.pod_name_prefix.as_deref(), pod)
            && prefix_matches(def.namespace_prefix.as_deref(), namespace)
            && prefix_matches(def.instance_name_prefix.as_deref(), alert.label("instance"))
            && self.scope.admits(pod, namespace, &alert.labels)
    }

    fn matches_log(&self, def: &LogTriggerDef, pattern: Option<&Regex>, line: &LogLine) -> bool {
        prefix_matches(def.pod_name_prefix.as_deref(), Some(&line.pod))
            && prefix_matches(def.namespace_prefix.as_deref(), Some(&line.namespace))
            && pattern.is_none_or(|p| p.is_match(&line.line))
            && self
                .scope
                .admits(Some(&line.pod), Some(&line.namespace), &BTreeMap::new())
    }
}
