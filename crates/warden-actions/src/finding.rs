//! Actions that shape the finding.

use std::str::FromStr;

use serde::Deserialize;
use warden_core::{
    ActionError, ActionParams, Block, Enrichment, ExecutionEvent, FieldKind, FindingSeverity,
    ParamViolation, ParamsSchema,
};

/// Parameters of `create_finding`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateFindingParams {
    /// Finding title.
    pub title: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Severity name (`debug`, `info`, `low`, `medium`, `high`).
    #[serde(default)]
    pub severity: Option<String>,
    /// Overrides the default aggregation key (the playbook id).
    #[serde(default)]
    pub aggregation_key: Option<String>,
}

impl ActionParams for CreateFindingParams {
    fn schema() -> ParamsSchema {
        ParamsSchema::new()
            .required("title", FieldKind::String)
            .optional("description", FieldKind::String)
            .optional("severity", FieldKind::String)
            .optional("aggregation_key", FieldKind::String)
    }

    fn validate(&self) -> Vec<ParamViolation> {
        let mut violations = Vec::new();
        if self.title.trim().is_empty() {
            violations.push(ParamViolation::new("title", "must not be empty"));
        }
        if let Some(severity) = &self.severity {
            if FindingSeverity::from_str(severity).is_err() {
                violations.push(ParamViolation::new(
                    "severity",
                    format!("unknown severity '{severity}'"),
                ));
            }
        }
        violations
    }
}

/// Sets title, description, severity and aggregation key on the finding.
pub fn create_finding(event: &mut ExecutionEvent, params: &CreateFindingParams) -> Result<(), ActionError> {
    let severity = params
        .severity
        .as_deref()
        .map(FindingSeverity::from_str)
        .transpose()
        .map_err(|e| ActionError::failed(e.to_string()))?;
    let finding = event.finding_mut();
    finding.title.clone_from(&params.title);
    if let Some(description) = &params.description {
        finding.description.clone_from(description);
    }
    if let Some(severity) = severity {
        finding.severity = severity;
    }
    if let Some(key) = &params.aggregation_key {
        finding.aggregation_key.clone_from(key);
    }
    Ok(())
}

/// Parameters of `add_markdown`.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkdownParams {
    /// Markdown text.
    pub text: String,
    /// Optional section title.
    #[serde(default)]
    pub title: Option<String>,
}

impl ActionParams for MarkdownParams {
    fn schema() -> ParamsSchema {
        ParamsSchema::new()
            .required("text", FieldKind::String)
            .optional("title", FieldKind::String)
    }
}

/// Appends a markdown block.
pub fn add_markdown(event: &mut ExecutionEvent, params: &MarkdownParams) -> Result<(), ActionError> {
    let mut enrichment = Enrichment::new(vec![Block::markdown(params.text.clone())]);
    if let Some(title) = &params.title {
        enrichment = enrichment.with_title(title.clone());
    }
    event.add_enrichment(enrichment);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{ExecutionContext, ManualTrigger, TriggerEvent};

    fn event() -> ExecutionEvent {
        ExecutionEvent::new(
            TriggerEvent::Manual(ManualTrigger::default()),
            "pb-1",
            Vec::new(),
            ExecutionContext::default(),
        )
    }

    fn params(severity: Option<&str>) -> CreateFindingParams {
        CreateFindingParams {
            title: "disk almost full".to_string(),
            description: Some("92% used".to_string()),
            severity: severity.map(ToString::to_string),
            aggregation_key: None,
        }
    }

    #[test]
    fn create_finding_sets_fields_and_keeps_default_key() {
        let mut event = event();
        create_finding(&mut event, &params(Some("medium"))).unwrap();
        let finding = event.finding().unwrap();
        assert_eq!(finding.title, "disk almost full");
        assert_eq!(finding.description, "92% used");
        assert_eq!(finding.severity, FindingSeverity::Medium);
        assert_eq!(finding.aggregation_key, "pb-1");
    }

    #[test]
    fn unknown_severity_is_a_violation() {
        let violations = params(Some("catastrophic")).validate();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path, "severity");
    }

    #[test]
    fn markdown_is_appended_in_order() {
        let mut event = event();
        for text in ["one", "two"] {
            add_markdown(
                &mut event,
                &MarkdownParams {
                    text: text.to_string(),
                    title: None,
                },
            )
            .unwrap();
        }
        let blocks: Vec<&Block> = event
            .finding()
            .unwrap()
            .enrichments
            .iter()
            .flat_map(|e| &e.blocks)
            .collect();
        assert_eq!(blocks, vec![&Block::markdown("one"), &Block::markdown("two")]);
    }
}
