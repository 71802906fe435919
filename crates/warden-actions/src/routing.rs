//! Actions that steer dispatch rather than content.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use warden_core::{
    ActionError, ActionParams, CallbackBinding, ExecutionEvent, FieldKind, NoParams,
    ParamViolation, ParamsSchema,
};

/// Parameters of `route_to_sinks`.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteParams {
    /// Sink names that replace the playbook's routing for this event.
    pub sinks: Vec<String>,
}

impl ActionParams for RouteParams {
    fn schema() -> ParamsSchema {
        ParamsSchema::new().required("sinks", FieldKind::Array)
    }

    fn validate(&self) -> Vec<ParamViolation> {
        if self.sinks.is_empty() {
            vec![ParamViolation::new("sinks", "must name at least one sink")]
        } else {
            Vec::new()
        }
    }
}

/// Overrides the sinks the finding is delivered to.
pub fn route_to_sinks(event: &mut ExecutionEvent, params: &RouteParams) -> Result<(), ActionError> {
    debug!(playbook_id = %event.playbook_id(), sinks = ?params.sinks, "routing override");
    event.route_to(params.sinks.clone());
    Ok(())
}

/// Stops evaluation of later playbooks for the current event.
pub fn stop_processing(event: &mut ExecutionEvent, _params: &NoParams) -> Result<(), ActionError> {
    event.stop_processing = true;
    Ok(())
}

/// Parameters of `add_callback`.
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackParams {
    /// Button label.
    pub text: String,
    /// Action run when the button is pressed.
    pub action: String,
    /// Parameters for that action.
    #[serde(default)]
    pub params: Value,
    /// Sinks for the callback's finding.
    #[serde(default)]
    pub sinks: Option<Vec<String>>,
}

impl ActionParams for CallbackParams {
    fn schema() -> ParamsSchema {
        ParamsSchema::new()
            .required("text", FieldKind::String)
            .required("action", FieldKind::String)
            .optional("params", FieldKind::Object)
            .optional("sinks", FieldKind::Array)
    }
}

/// Registers a callback and appends its button to the finding.
pub fn add_callback(event: &mut ExecutionEvent, params: &CallbackParams) -> Result<(), ActionError> {
    let mut binding = CallbackBinding::new(params.action.clone());
    if !params.params.is_null() {
        binding = binding.with_params(params.params.clone());
    }
    if let Some(sinks) = &params.sinks {
        binding = binding.with_sinks(sinks.clone());
    }
    event.add_callback(params.text.clone(), binding);
    Ok(())
}
