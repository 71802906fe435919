//! Enrichments built from the resource that changed.

use serde_json::Value;
use warden_core::{ActionError, Block, Enrichment, ExecutionEvent, NoParams};

/// Adds a table of the resource's labels.
pub fn add_labels_table(event: &mut ExecutionEvent, _params: &NoParams) -> Result<(), ActionError> {
    let Some(change) = event.resource() else {
        return Err(ActionError::failed("not a resource change event"));
    };
    let rows: Vec<Vec<String>> = change
        .labels()
        .into_iter()
        .map(|(key, value)| vec![key, value])
        .collect();
    if rows.is_empty() {
        return Ok(());
    }
    let table = Block::Table {
        name: Some("Labels".to_string()),
        headers: vec!["label".to_string(), "value".to_string()],
        rows,
    };
    event.add_enrichment(Enrichment::new(vec![table]));
    Ok(())
}

/// Adds a table of the changed fields computed by the trigger.
pub fn add_diff_table(event: &mut ExecutionEvent, _params: &NoParams) -> Result<(), ActionError> {
    if event.diffs().is_empty() {
        return Ok(());
    }
    let rows = event
        .diffs()
        .iter()
        .map(|d| vec![d.path.clone(), show(d.old.as_ref()), show(d.new.as_ref())])
        .collect();
    let table = Block::Table {
        name: Some("Changes".to_string()),
        headers: vec!["field".to_string(), "old".to_string(), "new".to_string()],
        rows,
    };
    event.add_enrichment(Enrichment::new(vec![table]));
    Ok(())
}

fn show(value: Option<&Value>) -> String {
    match value {
        None => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::{ExecutionContext, FieldDiff, Operation, ResourceChange, TriggerEvent};

    fn event(diffs: Vec<FieldDiff>) -> ExecutionEvent {
        let obj = json!({"metadata": {"name": "web", "namespace": "prod", "labels": {"tier": "front", "app": "web"}}});
        ExecutionEvent::new(
            TriggerEvent::ResourceChange(ResourceChange::new(Operation::Update, "Deployment", obj)),
            "pb",
            diffs,
            ExecutionContext::default(),
        )
    }

    fn only_table(event: &ExecutionEvent) -> (Vec<String>, Vec<Vec<String>>) {
        let finding = event.finding().unwrap();
        match &finding.enrichments[0].blocks[0] {
            Block::Table { headers, rows, .. } => (headers.clone(), rows.clone()),
            other => panic!("expected table, got {other:?}"),
        }
    }

    #[test]
    fn labels_are_sorted_by_key() {
        let mut event = event(Vec::new());
        add_labels_table(&mut event, &NoParams {}).unwrap();
        let (_, rows) = only_table(&event);
        assert_eq!(
            rows,
            vec![
                vec!["app".to_string(), "web".to_string()],
                vec!["tier".to_string(), "front".to_string()],
            ]
        );
    }

    #[test]
    fn diff_rows_show_old_and_new() {
        let diffs = vec![
            FieldDiff {
                path: "spec.replicas".to_string(),
                old: Some(json!(2)),
                new: Some(json!(3)),
            },
            FieldDiff {
                path: "spec.paused".to_string(),
                old: None,
                new: Some(json!(true)),
            },
        ];
        let mut event = event(diffs);
        add_diff_table(&mut event, &NoParams {}).unwrap();
        let (headers, rows) = only_table(&event);
        assert_eq!(headers, vec!["field", "old", "new"]);
        assert_eq!(rows[0], vec!["spec.replicas", "2", "3"]);
        assert_eq!(rows[1], vec!["spec.paused", "-", "true"]);
    }

    #[test]
    fn no_diffs_adds_nothing() {
        let mut event = event(Vec::new());
        add_diff_table(&mut event, &NoParams {}).unwrap();
        assert!(event.finding().is_none());
    }
}
