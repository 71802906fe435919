//! Integration tests: built-in actions inside playbooks and the dispatcher.

use std::sync::Arc;

use recording::Recorder;
use serde_json::{Map, Value, json};
use warden_core::{
    ActionBindingDef, Block, CallbackId, DispatcherConfig, EngineError, EventDispatcher,
    FindingSeverity, Operation, PlaybookDefinition, PrometheusTriggerDef, ResourceChange,
    ResourceChangeTriggerDef, SinkConfig, TriggerDef, TriggerEvent,
};
use warden_actions::builtin_registry;

mod recording {
    //! A sink factory whose sinks share one list of findings.

    use std::sync::{Arc, Mutex};

    use warden_core::{
        DeliveryError, Finding, Result, Sink, SinkBase, SinkConfig, SinkContext, SinkFactory,
    };

    pub struct RecordingSink {
        base: SinkBase,
        received: Arc<Mutex<Vec<Finding>>>,
    }

    impl Sink for RecordingSink {
        fn config(&self) -> &SinkConfig {
            self.base.config()
        }

        fn accepts(&self, finding: &Finding) -> bool {
            self.base.accepts(finding)
        }

        fn write_finding(&self, finding: Finding, _platform: bool) -> std::result::Result<(), DeliveryError> {
            self.received.lock().unwrap().push(finding);
            Ok(())
        }

        fn stop(&self) {
            self.base.mark_stopped();
        }
    }

    /// Factory whose sinks all write into one shared list.
    #[derive(Default, Clone)]
    pub struct Recorder {
        pub received: Arc<Mutex<Vec<Finding>>>,
    }

    impl Recorder {
        pub fn findings(&self) -> Vec<Finding> {
            self.received.lock().unwrap().clone()
        }
    }

    impl SinkFactory for Recorder {
        fn create(&self, config: &SinkConfig, _context: &SinkContext) -> Result<Arc<dyn Sink>> {
            Ok(Arc::new(RecordingSink {
                base: SinkBase::new(config)?,
                received: Arc::clone(&self.received),
            }))
        }
    }
}

fn dispatcher() -> EventDispatcher {
    EventDispatcher::new(Arc::new(builtin_registry().unwrap()), DispatcherConfig::default())
}

fn deployment_scaled() -> TriggerEvent {
    let old = json!({"metadata": {"name": "api", "namespace": "prod", "labels": {"app": "api"}}, "spec": {"replicas": 2}});
    let new = json!({"metadata": {"name": "api", "namespace": "prod", "labels": {"app": "api"}}, "spec": {"replicas": 5}});
    TriggerEvent::ResourceChange(ResourceChange::new(Operation::Update, "Deployment", new).with_old(old))
}

fn on_deployment() -> TriggerDef {
    TriggerDef::OnResourceChange(ResourceChangeTriggerDef {
        kind: Some("Deployment".to_string()),
        ..ResourceChangeTriggerDef::default()
    })
}

#[test]
fn resource_chain_builds_an_enriched_finding() {
    let dispatcher = dispatcher();
    let recorder = Recorder::default();
    let playbook = PlaybookDefinition::new(
        on_deployment(),
        vec![
            ActionBindingDef::new("create_finding", json!({"title": "Deployment scaled", "severity": "low"})),
            ActionBindingDef::new("add_labels_table", Value::Null),
            ActionBindingDef::new("add_diff_table", Value::Null),
        ],
    );
    dispatcher
        .reload(&[playbook], &[SinkConfig::new("rec", "memory")], &Map::new(), &recorder)
        .unwrap();

    let report = dispatcher.handle(&deployment_scaled());
    assert_eq!(report.delivered, vec!["rec".to_string()]);

    let findings = recorder.findings();
    let finding = &findings[0];
    assert_eq!(finding.title, "Deployment scaled");
    assert_eq!(finding.severity, FindingSeverity::Low);
    assert_eq!(finding.subject.name.as_deref(), Some("api"));
    assert_eq!(finding.enrichments.len(), 2);
    let Block::Table { rows, .. } = &finding.enrichments[1].blocks[0] else {
        panic!("expected diff table");
    };
    assert_eq!(rows, &vec![vec!["spec.replicas".to_string(), "2".to_string(), "5".to_string()]]);
}

#[test]
fn every_parameter_violation_is_reported() {
    let dispatcher = dispatcher();
    let playbook = PlaybookDefinition::new(
        on_deployment(),
        vec![
            ActionBindingDef::new("create_finding", json!({"severity": 3, "colour": "red"})),
            ActionBindingDef::new("http_probe", json!({"url": "gopher://old"})),
        ],
    );
    let err = dispatcher
        .reload(&[playbook], &[], &Map::new(), &Recorder::default())
        .unwrap_err();
    let EngineError::Validation { errors, .. } = err else {
        panic!("expected validation error, got {err:?}");
    };
    let paths: Vec<&str> = errors.iter().map(|v| v.path.as_str()).collect();
    assert!(paths.contains(&"actions[0].params.title"));
    assert!(paths.contains(&"actions[0].params.severity"));
    assert!(paths.contains(&"actions[0].params.colour"));
    assert!(paths.contains(&"actions[1].params.url"));
}

#[test]
fn resource_only_action_is_rejected_on_alert_trigger() {
    let dispatcher = dispatcher();
    let playbook = PlaybookDefinition::new(
        TriggerDef::OnPrometheusAlert(PrometheusTriggerDef::default()),
        vec![ActionBindingDef::new("add_diff_table", Value::Null)],
    );
    let err = dispatcher
        .reload(&[playbook], &[], &Map::new(), &Recorder::default())
        .unwrap_err();
    assert!(matches!(err, EngineError::IncompatibleAction { .. }));
}

#[test]
fn callback_button_runs_the_bound_action() {
    let dispatcher = dispatcher();
    let recorder = Recorder::default();
    let playbook = PlaybookDefinition::new(
        on_deployment(),
        vec![
            ActionBindingDef::new("create_finding", json!({"title": "Scaled"})),
            ActionBindingDef::new(
                "add_callback",
                json!({
                    "text": "Acknowledge",
                    "action": "create_finding",
                    "params": {"title": "Acknowledged"}
                }),
            ),
        ],
    );
    dispatcher
        .reload(&[playbook], &[SinkConfig::new("rec", "memory")], &Map::new(), &recorder)
        .unwrap();
    dispatcher.handle(&deployment_scaled());

    let callback_id = recorder.findings()[0]
        .enrichments
        .iter()
        .flat_map(|e| &e.blocks)
        .find_map(|b| match b {
            Block::Callback { callback_id, .. } => Some(callback_id.clone()),
            _ => None,
        })
        .unwrap();

    let report = dispatcher
        .invoke_callback(&CallbackId::parse(&callback_id).unwrap())
        .unwrap();
    assert_eq!(report.delivered, vec!["rec".to_string()]);
    assert_eq!(recorder.findings()[1].title, "Acknowledged");
}

#[test]
fn external_action_uses_global_defaults() {
    let dispatcher = dispatcher();
    let mut global = Map::new();
    global.insert("severity".to_string(), json!("high"));
    global.insert("unrelated".to_string(), json!(true));
    let recorder = Recorder::default();
    dispatcher
        .reload(&[], &[SinkConfig::new("rec", "memory")], &global, &recorder)
        .unwrap();

    dispatcher
        .run_external_action("create_finding", json!({"title": "manual check"}), None)
        .unwrap();
    let findings = recorder.findings();
    assert_eq!(findings[0].title, "manual check");
    assert_eq!(findings[0].severity, FindingSeverity::High);
}
