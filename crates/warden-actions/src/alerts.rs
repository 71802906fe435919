//! Enrichments for Prometheus alerts.

use warden_core::{ActionError, Block, Enrichment, ExecutionEvent, FindingSeverity, NoParams};

/// Copies the alert's annotations and severity onto the finding.
///
/// `summary` becomes the title, `description` the description, and the
/// `severity` label (`critical`, `warning`, `info`) maps onto the finding
/// severity. Remaining annotations are added as a table.
pub fn add_alert_annotations(event: &mut ExecutionEvent, _params: &NoParams) -> Result<(), ActionError> {
    let Some(alert) = event.alert().cloned() else {
        return Err(ActionError::failed("not a prometheus alert event"));
    };
    let severity = match alert.label("severity") {
        Some("critical") => Some(FindingSeverity::High),
        Some("warning") => Some(FindingSeverity::Medium),
        Some("info") => Some(FindingSeverity::Info),
        _ => None,
    };

    let finding = event.finding_mut();
    if let Some(summary) = alert.annotations.get("summary") {
        finding.title.clone_from(summary);
    }
    if let Some(description) = alert.annotations.get("description") {
        finding.description.clone_from(description);
    }
    if let Some(severity) = severity {
        finding.severity = severity;
    }

    let rows: Vec<Vec<String>> = alert
        .annotations
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "summary" | "description"))
        .map(|(k, v)| vec![k.clone(), v.clone()])
        .collect();
    if !rows.is_empty() {
        event.add_enrichment(Enrichment::new(vec![Block::table(
            vec!["annotation".to_string(), "value".to_string()],
            rows,
        )]));
    }
    Ok(())
}
