//! Error types for the warden-core crate.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A single violation found while validating a parameter block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamViolation {
    /// Dotted path of the offending field (e.g. `actions[0].params.title`).
    pub path: String,
    /// What is wrong with it.
    pub message: String,
}

impl ParamViolation {
    /// Creates a new violation.
    #[must_use]
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns the violation with `prefix` prepended to its path.
    #[must_use]
    pub fn prefixed(mut self, prefix: &str) -> Self {
        self.path = if self.path.is_empty() {
            prefix.to_string()
        } else {
            format!("{prefix}.{}", self.path)
        };
        self
    }
}

impl fmt::Display for ParamViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

fn join_violations(errors: &[ParamViolation]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by an action while it runs.
#[derive(Debug, Clone, Error)]
pub enum ActionError {
    /// The action failed.
    #[error("{0}")]
    Failed(String),

    /// An external call made by the action timed out.
    #[error("timed out after {after:?}")]
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The action was handed parameters of the wrong type.
    #[error("parameters do not match action '{action}'")]
    ParamsMismatch {
        /// The action name.
        action: String,
    },

    /// The action panicked.
    #[error("action panicked: {0}")]
    Panicked(String),
}

impl ActionError {
    /// Creates a generic failure.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// Errors raised by a sink while delivering a finding.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The destination rejected the finding or could not be reached.
    #[error("{0}")]
    Failed(String),

    /// The delivery call timed out.
    #[error("timed out after {after:?}")]
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The sink has been stopped.
    #[error("sink is stopped")]
    Stopped,
}

/// Errors that can occur in the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed playbook, trigger or sink definition.
    #[error("configuration error: {reason}")]
    Config {
        /// Why the configuration is invalid.
        reason: String,
    },

    /// Parameter validation failed; every violation is listed.
    #[error("validation failed for {subject}: {}", join_violations(.errors))]
    Validation {
        /// What was being validated (playbook or action name).
        subject: String,
        /// All violations found.
        errors: Vec<ParamViolation>,
    },

    /// A playbook references an action that is not registered.
    #[error("unknown action: {name}")]
    UnknownAction {
        /// The action name.
        name: String,
    },

    /// An action is registered twice.
    #[error("action already registered: {name}")]
    DuplicateAction {
        /// The action name.
        name: String,
    },

    /// An action cannot be triggered by one of the playbook's triggers.
    #[error("action '{action}' cannot be triggered by {trigger} events")]
    IncompatibleAction {
        /// The action name.
        action: String,
        /// The event kind produced by the trigger.
        trigger: String,
    },

    /// Two sinks share the same name.
    #[error("duplicate sink name: {name}")]
    DuplicateSink {
        /// The sink name.
        name: String,
    },

    /// One or more sinks could not be constructed.
    #[error("sink construction failed: {}", .errors.join("; "))]
    SinkConstruction {
        /// One message per failed sink.
        errors: Vec<String>,
    },

    /// Running an action failed.
    #[error("action '{action}' failed: {source}")]
    Action {
        /// The action name.
        action: String,
        /// The underlying failure.
        #[source]
        source: ActionError,
    },

    /// Evaluating a trigger failed.
    #[error("trigger evaluation failed: {reason}")]
    Trigger {
        /// Why evaluation failed.
        reason: String,
    },

    /// Delivering a finding failed.
    #[error("delivery to sink '{sink}' failed: {source}")]
    Delivery {
        /// The sink name.
        sink: String,
        /// The underlying failure.
        #[source]
        source: DeliveryError,
    },

    /// The worker queue is full and the event was dropped.
    #[error("event queue is full (lane {lane})")]
    QueueFull {
        /// The lane that was full.
        lane: usize,
    },

    /// The engine is shutting down and no longer accepts events.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Callback id is not registered.
    #[error("callback not found: {id}")]
    CallbackNotFound {
        /// The callback id.
        id: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Returns true if this error was caused by configuration rather than runtime state.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::Validation { .. }
                | Self::UnknownAction { .. }
                | Self::DuplicateAction { .. }
                | Self::IncompatibleAction { .. }
                | Self::DuplicateSink { .. }
                | Self::SinkConstruction { .. }
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_config() {
        let err = EngineError::config("missing triggers");
        assert_eq!(err.to_string(), "configuration error: missing triggers");
    }

    #[test]
    fn error_display_validation_lists_every_violation() {
        let err = EngineError::Validation {
            subject: "create_finding".to_string(),
            errors: vec![
                ParamViolation::new("title", "required field is missing"),
                ParamViolation::new("severity", "expected string, got number"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "validation failed for create_finding: title: required field is missing; \
             severity: expected string, got number"
        );
    }

    #[test]
    fn error_display_action() {
        let err = EngineError::Action {
            action: "http_probe".to_string(),
            source: ActionError::Timeout {
                after: Duration::from_secs(3),
            },
        };
        assert_eq!(err.to_string(), "action 'http_probe' failed: timed out after 3s");
    }

    #[test]
    fn error_display_delivery() {
        let err = EngineError::Delivery {
            sink: "slack1".to_string(),
            source: DeliveryError::Failed("HTTP 500".to_string()),
        };
        assert_eq!(err.to_string(), "delivery to sink 'slack1' failed: HTTP 500");
    }

    #[test]
    fn config_errors_are_classified() {
        assert!(EngineError::config("x").is_config_error());
        assert!(EngineError::UnknownAction { name: "x".into() }.is_config_error());
        assert!(!EngineError::ShuttingDown.is_config_error());
        assert!(!EngineError::QueueFull { lane: 0 }.is_config_error());
    }

    #[test]
    fn violation_prefixing() {
        let v = ParamViolation::new("title", "missing").prefixed("actions[1].params");
        assert_eq!(v.path, "actions[1].params.title");

        let root = ParamViolation::new("", "expected object").prefixed("actions[0].params");
        assert_eq!(root.path, "actions[0].params");
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let err: EngineError = json_err.unwrap_err().into();
        assert!(matches!(err, EngineError::Serialization(_)));
    }
}
