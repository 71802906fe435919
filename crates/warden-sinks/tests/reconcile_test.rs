//! Integration tests: built-in sinks behind the dispatcher and reconciler.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tempfile::TempDir;
use warden_core::{
    ActionBindingDef, ActionRegistry, DispatcherConfig, EventDispatcher, EventKind,
    FindingSeverity, ManualTrigger, ManualTriggerDef, NoParams, PlaybookDefinition, SinkConfig,
    SinkContext, SinksRegistry, TriggerDef, TriggerEvent,
};
use warden_sinks::DefaultSinkFactory;

fn file_sink(dir: &TempDir, name: &str, file: &str) -> SinkConfig {
    SinkConfig::new(name, "file").with_param("path", json!(dir.path().join(file).to_string_lossy()))
}

fn lines(dir: &TempDir, file: &str) -> Vec<Value> {
    std::fs::read_to_string(dir.path().join(file))
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn dispatcher() -> EventDispatcher {
    let mut actions = ActionRegistry::new();
    actions
        .register_fn::<NoParams, _>("severe", vec![EventKind::Manual], |event, _| {
            let finding = event.finding_mut();
            finding.title = "node pressure".to_string();
            finding.severity = FindingSeverity::High;
            Ok(())
        })
        .unwrap();
    actions
        .register_fn::<NoParams, _>("mild", vec![EventKind::Manual], |event, _| {
            event.finding_mut().title = "fyi".to_string();
            Ok(())
        })
        .unwrap();
    let config = DispatcherConfig {
        cluster_name: "staging".to_string(),
        ..DispatcherConfig::default()
    };
    EventDispatcher::new(Arc::new(actions), config)
}

fn manual_playbook(action: &str) -> PlaybookDefinition {
    PlaybookDefinition::new(
        TriggerDef::OnManual(ManualTriggerDef::default()),
        vec![ActionBindingDef::new(action, Value::Null)],
    )
}

#[test]
fn unchanged_file_sink_survives_reconfiguration() {
    let dir = TempDir::new().unwrap();
    let first = SinksRegistry::build(
        &[file_sink(&dir, "a", "a.jsonl"), file_sink(&dir, "b", "b.jsonl")],
        &DefaultSinkFactory,
        &SinkContext::default(),
    )
    .unwrap();

    let next = SinksRegistry::construct_new_sinks(
        &[file_sink(&dir, "a", "a.jsonl"), file_sink(&dir, "b", "b2.jsonl")],
        &first,
        &DefaultSinkFactory,
        &SinkContext::default(),
    )
    .unwrap();
    assert!(Arc::ptr_eq(next.registry.get("a").unwrap(), first.get("a").unwrap()));
    assert_eq!(next.retired.len(), 1);
    next.stop_retired();
    assert!(!first.get("b").unwrap().is_healthy());
    assert!(first.get("a").unwrap().is_healthy());
}

#[test]
fn match_rules_route_by_severity() {
    let dir = TempDir::new().unwrap();
    let sinks = vec![
        file_sink(&dir, "pager", "pager.jsonl").with_match("severity", "HIGH"),
        file_sink(&dir, "archive", "archive.jsonl"),
    ];
    let dispatcher = dispatcher();
    dispatcher
        .reload(
            &[manual_playbook("severe"), manual_playbook("mild")],
            &sinks,
            &Map::new(),
            &DefaultSinkFactory,
        )
        .unwrap();

    let report = dispatcher.handle(&TriggerEvent::Manual(ManualTrigger::default()));
    assert_eq!(report.fired, 2);
    assert_eq!(report.filtered, 1);

    let pager = lines(&dir, "pager.jsonl");
    assert_eq!(pager.len(), 1);
    assert_eq!(pager[0]["finding"]["title"], "node pressure");
    assert_eq!(pager[0]["cluster"], "staging");
    assert_eq!(lines(&dir, "archive.jsonl").len(), 2);
}

#[test]
fn invalid_sink_config_rejects_the_reload() {
    let dir = TempDir::new().unwrap();
    let dispatcher = dispatcher();
    let version = dispatcher
        .reload(&[manual_playbook("mild")], &[file_sink(&dir, "a", "a.jsonl")], &Map::new(), &DefaultSinkFactory)
        .unwrap();

    let broken = vec![
        file_sink(&dir, "a", "a.jsonl"),
        SinkConfig::new("hook", "webhook").with_param("url", json!("ftp://nowhere")),
    ];
    assert!(dispatcher
        .reload(&[manual_playbook("mild")], &broken, &Map::new(), &DefaultSinkFactory)
        .is_err());
    assert_eq!(dispatcher.current().version(), version);
    assert_eq!(dispatcher.current().sinks().names(), vec!["a"]);
}
