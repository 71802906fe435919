//! Incoming events and the execution event handed to actions.
//!
//! - [`TriggerEvent`]: a raw signal from a collaborator (watch stream,
//!   Alertmanager, scheduler, manual call, log tail)
//! - [`ExecutionEvent`]: the per-playbook event that actions read and mutate

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::callbacks::{CallbackBinding, CallbackId, CallbackRegistry};
use crate::diff::FieldDiff;
use crate::error::EngineError;
use crate::finding::{Block, Enrichment, Finding, FindingSource, FindingSubject};

/// Discriminator of event payloads, used to index playbooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A Kubernetes resource was created, updated or deleted.
    ResourceChange,
    /// A Prometheus alert.
    PrometheusAlert,
    /// A scheduler tick.
    Scheduled,
    /// A manual trigger.
    Manual,
    /// A log line.
    Log,
}

impl EventKind {
    /// Returns the kind as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceChange => "resource_change",
            Self::PrometheusAlert => "prometheus_alert",
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::Log => "log",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kubernetes change operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Object created.
    #[serde(alias = "CREATE")]
    Create,
    /// Object updated.
    #[serde(alias = "UPDATE")]
    Update,
    /// Object deleted.
    #[serde(alias = "DELETE")]
    Delete,
}

impl Operation {
    /// Returns the operation as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(EngineError::config(format!("unknown operation '{other}'"))),
        }
    }
}

/// A Kubernetes resource change as delivered by the watch stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChange {
    /// The operation.
    pub operation: Operation,
    /// Resource kind (`Pod`, `Deployment`, ...).
    pub kind: String,
    /// API version of the object.
    #[serde(default)]
    pub api_version: String,
    /// Free-form description from the watcher.
    #[serde(default)]
    pub description: String,
    /// The object after the change (before, for deletes).
    pub obj: Value,
    /// The object before the change; only present for updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_obj: Option<Value>,
}

impl ResourceChange {
    /// Creates a change event.
    #[must_use]
    pub fn new(operation: Operation, kind: impl Into<String>, obj: Value) -> Self {
        Self {
            operation,
            kind: kind.into(),
            api_version: String::new(),
            description: String::new(),
            obj,
            old_obj: None,
        }
    }

    /// Sets the previous object version.
    #[must_use]
    pub fn with_old(mut self, old_obj: Value) -> Self {
        self.old_obj = Some(old_obj);
        self
    }

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.obj.get("metadata")?.get(key)?.as_str()
    }

    /// Returns `metadata.name`.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.metadata_str("name")
    }

    /// Returns `metadata.namespace`.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.metadata_str("namespace")
    }

    /// Returns `metadata.labels` as string pairs; non-string values are skipped.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.obj
            .get("metadata")
            .and_then(|m| m.get("labels"))
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns `spec.nodeName`, set for scheduled pods.
    #[must_use]
    pub fn node(&self) -> Option<&str> {
        self.obj.get("spec")?.get("nodeName")?.as_str()
    }

    /// Returns `kind/namespace/name`.
    #[must_use]
    pub fn identity(&self) -> String {
        format!(
            "{}/{}/{}",
            self.kind,
            self.namespace().unwrap_or_default(),
            self.name().unwrap_or_default()
        )
    }
}

/// A single alert from an Alertmanager webhook payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusAlert {
    /// `firing` or `resolved`.
    pub status: String,
    /// Alert labels; `alertname` is expected.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Alert annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// When the alert started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    /// When the alert ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    /// Link back to the alert source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
    /// Alertmanager fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl PrometheusAlert {
    /// Creates a firing alert with the given name.
    #[must_use]
    pub fn firing(alert_name: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert("alertname".to_string(), alert_name.into());
        Self {
            status: "firing".to_string(),
            labels,
            annotations: BTreeMap::new(),
            starts_at: None,
            ends_at: None,
            generator_url: None,
            fingerprint: None,
        }
    }

    /// Adds a label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Returns the `alertname` label.
    #[must_use]
    pub fn alert_name(&self) -> Option<&str> {
        self.labels.get("alertname").map(String::as_str)
    }

    /// Returns a label value.
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Returns an identity for throttling: fingerprint if present, else name plus labels.
    #[must_use]
    pub fn identity(&self) -> String {
        if let Some(fp) = &self.fingerprint {
            return fp.clone();
        }
        let labels: Vec<String> = self.labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        labels.join(",")
    }
}

/// A scheduler tick addressed to one playbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTick {
    /// The playbook the tick belongs to.
    pub playbook_id: String,
    /// How many times this schedule has fired before (0 for the first run).
    pub recurrence: u64,
}

/// A manual trigger with free-form parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualTrigger {
    /// Name of the manual trigger to fire; `None` fires every manual trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form key-value parameters.
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
}

/// A log line tailed from a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// Pod name.
    pub pod: String,
    /// Pod namespace.
    pub namespace: String,
    /// Container name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// The line.
    pub line: String,
}

/// A raw event from one of the inbound sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Kubernetes resource change.
    ResourceChange(ResourceChange),
    /// Prometheus alert.
    PrometheusAlert(PrometheusAlert),
    /// Scheduler tick.
    Scheduled(ScheduledTick),
    /// Manual trigger.
    Manual(ManualTrigger),
    /// Log line.
    Log(LogLine),
}

impl TriggerEvent {
    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::ResourceChange(_) => EventKind::ResourceChange,
            Self::PrometheusAlert(_) => EventKind::PrometheusAlert,
            Self::Scheduled(_) => EventKind::Scheduled,
            Self::Manual(_) => EventKind::Manual,
            Self::Log(_) => EventKind::Log,
        }
    }

    /// Returns a short human-readable description.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::ResourceChange(c) => format!("{}-{}-{}", c.operation, c.kind, c.identity()),
            Self::PrometheusAlert(a) => format!(
                "PrometheusAlert-{}-{}",
                a.alert_name().unwrap_or("NA"),
                a.label("severity").unwrap_or("NA")
            ),
            Self::Scheduled(t) => format!("Scheduled-{}-{}", t.playbook_id, t.recurrence),
            Self::Manual(m) => format!("Manual-{}", m.name.as_deref().unwrap_or("any")),
            Self::Log(l) => format!("Log-{}/{}", l.namespace, l.pod),
        }
    }

    /// Returns the key under which events must be processed in arrival order.
    ///
    /// Resource changes are ordered per object so that each version is
    /// compared against its immediate predecessor.
    #[must_use]
    pub fn ordering_key(&self) -> String {
        match self {
            Self::ResourceChange(c) => format!("k8s/{}", c.identity()),
            Self::PrometheusAlert(a) => {
                format!("prometheus/{}", a.alert_name().unwrap_or_default())
            }
            Self::Scheduled(t) => format!("scheduler/{}", t.playbook_id),
            Self::Manual(_) => "manual".to_string(),
            Self::Log(l) => format!("log/{}/{}", l.namespace, l.pod),
        }
    }

    /// Returns the resource the event is about.
    #[must_use]
    pub fn subject(&self) -> FindingSubject {
        match self {
            Self::ResourceChange(c) => FindingSubject {
                name: c.name().map(ToString::to_string),
                namespace: c.namespace().map(ToString::to_string),
                kind: Some(c.kind.clone()),
                node: c.node().map(ToString::to_string),
            },
            Self::PrometheusAlert(a) => {
                let (kind, name) = ["pod", "deployment", "statefulset", "daemonset", "job_name"]
                    .iter()
                    .find_map(|label| a.label(label).map(|v| (*label, v)))
                    .map_or((None, None), |(label, v)| {
                        let kind = match label {
                            "pod" => "Pod",
                            "deployment" => "Deployment",
                            "statefulset" => "StatefulSet",
                            "daemonset" => "DaemonSet",
                            _ => "Job",
                        };
                        (Some(kind.to_string()), Some(v.to_string()))
                    });
                FindingSubject {
                    name,
                    namespace: a.label("namespace").map(ToString::to_string),
                    kind,
                    node: a.label("node").map(ToString::to_string),
                }
            }
            Self::Log(l) => FindingSubject {
                name: Some(l.pod.clone()),
                namespace: Some(l.namespace.clone()),
                kind: Some("Pod".to_string()),
                node: None,
            },
            Self::Scheduled(_) | Self::Manual(_) => FindingSubject::default(),
        }
    }

    /// Returns the finding source matching this event.
    #[must_use]
    pub const fn finding_source(&self) -> FindingSource {
        match self {
            Self::ResourceChange(_) => FindingSource::KubernetesApiServer,
            Self::PrometheusAlert(_) => FindingSource::Prometheus,
            Self::Scheduled(_) => FindingSource::Scheduler,
            Self::Manual(_) => FindingSource::Manual,
            Self::Log(_) => FindingSource::Log,
        }
    }
}

/// Process-wide context handed to each execution event.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Name of the cluster this process watches.
    pub cluster_name: String,
    /// Timeout every external call made by an action must respect.
    pub call_timeout: Duration,
    /// Shutdown signal; actions may check it between long steps.
    pub cancel: CancellationToken,
    /// Callback table for interactive blocks.
    pub callbacks: Arc<CallbackRegistry>,
}

impl ExecutionContext {
    /// Creates a context with a fresh callback table and cancellation token.
    #[must_use]
    pub fn new(cluster_name: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            call_timeout,
            cancel: CancellationToken::new(),
            callbacks: Arc::new(CallbackRegistry::new()),
        }
    }

    /// Unsubscribes every callback a finding carries. Returns how many
    /// subscriptions were removed.
    pub fn release_callbacks(&self, finding: &Finding) -> usize {
        finding
            .callback_ids()
            .filter_map(CallbackId::parse)
            .filter(|id| self.callbacks.unsubscribe(id).is_some())
            .count()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new("default", Duration::from_secs(30))
    }
}

/// The event an action chain runs against.
///
/// One instance is built per fired playbook. Actions mutate its finding and
/// routing; later actions in the chain see earlier mutations.
#[derive(Debug, Clone)]
pub struct ExecutionEvent {
    trigger: TriggerEvent,
    playbook_id: String,
    diffs: Vec<FieldDiff>,
    finding: Option<Finding>,
    /// Sink override set by an action; `None` keeps the playbook's routing.
    pub named_sinks: Option<Vec<String>>,
    /// Set by an action to stop evaluating further playbooks for this event.
    pub stop_processing: bool,
    context: ExecutionContext,
}

impl ExecutionEvent {
    /// Creates an execution event for a fired playbook.
    #[must_use]
    pub fn new(
        trigger: TriggerEvent,
        playbook_id: impl Into<String>,
        diffs: Vec<FieldDiff>,
        context: ExecutionContext,
    ) -> Self {
        Self {
            trigger,
            playbook_id: playbook_id.into(),
            diffs,
            finding: None,
            named_sinks: None,
            stop_processing: false,
            context,
        }
    }

    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.trigger.kind()
    }

    /// Returns the raw trigger event.
    #[must_use]
    pub const fn trigger(&self) -> &TriggerEvent {
        &self.trigger
    }

    /// Returns the id of the playbook being executed.
    #[must_use]
    pub fn playbook_id(&self) -> &str {
        &self.playbook_id
    }

    /// Returns the resource change, if this is one.
    #[must_use]
    pub const fn resource(&self) -> Option<&ResourceChange> {
        match &self.trigger {
            TriggerEvent::ResourceChange(c) => Some(c),
            _ => None,
        }
    }

    /// Returns the alert, if this is one.
    #[must_use]
    pub const fn alert(&self) -> Option<&PrometheusAlert> {
        match &self.trigger {
            TriggerEvent::PrometheusAlert(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the filtered field diffs computed by the trigger (updates only).
    #[must_use]
    pub fn diffs(&self) -> &[FieldDiff] {
        &self.diffs
    }

    /// Returns the execution context.
    #[must_use]
    pub const fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// Returns the finding, if any action created one.
    #[must_use]
    pub const fn finding(&self) -> Option<&Finding> {
        self.finding.as_ref()
    }

    /// Returns the finding, creating a default one from the trigger event.
    pub fn finding_mut(&mut self) -> &mut Finding {
        let trigger = &self.trigger;
        let playbook_id = &self.playbook_id;
        self.finding.get_or_insert_with(|| {
            Finding::new(trigger.description(), playbook_id.clone())
                .with_subject(trigger.subject())
                .with_source(trigger.finding_source())
        })
    }

    /// Replaces the finding.
    pub fn set_finding(&mut self, finding: Finding) {
        self.finding = Some(finding);
    }

    /// Takes the finding out of the event.
    pub fn take_finding(&mut self) -> Option<Finding> {
        self.finding.take()
    }

    /// Drops the finding and unsubscribes the callbacks it carried.
    ///
    /// Returns how many callbacks were released.
    pub fn discard_finding(&mut self) -> usize {
        self.finding
            .take()
            .map_or(0, |finding| self.context.release_callbacks(&finding))
    }

    /// Appends an enrichment to the finding, creating it if needed.
    pub fn add_enrichment(&mut self, enrichment: Enrichment) {
        self.finding_mut().add_enrichment(enrichment);
    }

    /// Registers a callback and appends a button block for it.
    pub fn add_callback(&mut self, text: impl Into<String>, binding: CallbackBinding) {
        let id = self.context.callbacks.subscribe(binding);
        self.add_enrichment(Enrichment::new(vec![Block::Callback {
            text: text.into(),
            callback_id: id.to_string(),
        }]));
    }

    /// Overrides the sinks the finding is routed to.
    pub fn route_to(&mut self, sinks: Vec<String>) {
        self.named_sinks = Some(sinks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(name: &str, phase: &str) -> Value {
        json!({
            "metadata": {"name": name, "namespace": "ns1", "labels": {"app": "web", "replicas": 3}},
            "spec": {"nodeName": "node-a"},
            "status": {"phase": phase}
        })
    }

    mod resource_change_tests {
        use super::*;

        #[test]
        fn metadata_accessors() {
            let change = ResourceChange::new(Operation::Update, "Pod", pod("p1", "Running"));
            assert_eq!(change.name(), Some("p1"));
            assert_eq!(change.namespace(), Some("ns1"));
            assert_eq!(change.node(), Some("node-a"));
            assert_eq!(change.identity(), "Pod/ns1/p1");

            let labels = change.labels();
            assert_eq!(labels.get("app").map(String::as_str), Some("web"));
            assert!(!labels.contains_key("replicas"));
        }

        #[test]
        fn deserializes_watcher_payload() {
            let payload = json!({
                "type": "resource_change",
                "operation": "UPDATE",
                "kind": "Pod",
                "apiVersion": "v1",
                "obj": pod("p1", "Running"),
                "oldObj": pod("p1", "Pending"),
            });
            let event: TriggerEvent = serde_json::from_value(payload).unwrap();
            let TriggerEvent::ResourceChange(change) = &event else {
                panic!("expected resource change");
            };
            assert_eq!(change.operation, Operation::Update);
            assert!(change.old_obj.is_some());
            assert_eq!(event.kind(), EventKind::ResourceChange);
            assert_eq!(event.ordering_key(), "k8s/Pod/ns1/p1");
        }
    }

    mod alert_tests {
        use super::*;

        #[test]
        fn alert_subject_prefers_pod_label() {
            let alert = PrometheusAlert::firing("KubePodCrashLooping")
                .with_label("pod", "p1")
                .with_label("namespace", "ns1");
            let subject = TriggerEvent::PrometheusAlert(alert).subject();
            assert_eq!(subject.kind.as_deref(), Some("Pod"));
            assert_eq!(subject.name.as_deref(), Some("p1"));
            assert_eq!(subject.namespace.as_deref(), Some("ns1"));
        }

        #[test]
        fn alert_identity_uses_fingerprint_when_present() {
            let mut alert = PrometheusAlert::firing("HighCPU").with_label("pod", "p1");
            assert_eq!(alert.identity(), "alertname=HighCPU,pod=p1");
            alert.fingerprint = Some("abc123".to_string());
            assert_eq!(alert.identity(), "abc123");
        }
    }

    mod execution_event_tests {
        use super::*;

        #[test]
        fn finding_is_created_lazily_from_trigger() {
            let change = ResourceChange::new(Operation::Update, "Pod", pod("p1", "Running"));
            let mut event = ExecutionEvent::new(
                TriggerEvent::ResourceChange(change),
                "pb-1",
                Vec::new(),
                ExecutionContext::default(),
            );
            assert!(event.finding().is_none());

            event.finding_mut().title = "pod crash".to_string();
            event.add_enrichment(Enrichment::new(vec![Block::markdown("details")]));

            let finding = event.finding().unwrap();
            assert_eq!(finding.title, "pod crash");
            assert_eq!(finding.aggregation_key, "pb-1");
            assert_eq!(finding.subject.name.as_deref(), Some("p1"));
            assert_eq!(finding.source, FindingSource::KubernetesApiServer);
            assert_eq!(finding.enrichments.len(), 1);
        }

        #[test]
        fn callbacks_are_registered_and_rendered() {
            let context = ExecutionContext::default();
            let callbacks = Arc::clone(&context.callbacks);
            let mut event = ExecutionEvent::new(
                TriggerEvent::Manual(ManualTrigger::default()),
                "pb-1",
                Vec::new(),
                context,
            );
            event.add_callback("restart", CallbackBinding::new("restart_pod"));

            assert_eq!(callbacks.len(), 1);
            let blocks = &event.finding().unwrap().enrichments[0].blocks;
            assert!(matches!(&blocks[0], Block::Callback { text, .. } if text == "restart"));
        }

        #[test]
        fn discarded_finding_releases_its_callbacks() {
            let context = ExecutionContext::default();
            let callbacks = Arc::clone(&context.callbacks);
            let kept = callbacks.subscribe(CallbackBinding::new("unrelated"));
            let mut event = ExecutionEvent::new(
                TriggerEvent::Manual(ManualTrigger::default()),
                "pb-1",
                Vec::new(),
                context,
            );
            event.add_callback("restart", CallbackBinding::new("restart_pod"));
            event.add_callback("silence", CallbackBinding::new("silence_alert"));
            assert_eq!(callbacks.len(), 3);

            assert_eq!(event.discard_finding(), 2);
            assert!(event.finding().is_none());
            assert_eq!(callbacks.len(), 1);
            assert!(callbacks.get(&kept).is_some());
        }
    }
}
