//! The sink contract.
//!
//! A sink is a named, long-lived delivery destination. The dispatcher hands
//! each targeted sink its own copy of a finding; how the sink formats and
//! delivers it is its own business.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DeliveryError, EngineError, Result};
use crate::finding::Finding;

/// A sink as written in configuration.
///
/// Two configurations are the same sink if every field compares equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Unique sink name.
    pub name: String,
    /// Sink type, resolved by the factory.
    #[serde(rename = "type")]
    pub sink_type: String,
    /// Receives findings from playbooks that name no sinks.
    #[serde(default)]
    pub default: bool,
    /// Ends fan-out after this sink accepts a finding.
    #[serde(default)]
    pub stop: bool,
    /// Finding attribute to regex; every rule must match.
    #[serde(default, rename = "match", skip_serializing_if = "BTreeMap::is_empty")]
    pub match_rules: BTreeMap<String, String>,
    /// Type-specific fields.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl SinkConfig {
    /// Creates a config with no type-specific fields.
    #[must_use]
    pub fn new(name: impl Into<String>, sink_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sink_type: sink_type.into(),
            default: false,
            stop: false,
            match_rules: BTreeMap::new(),
            params: Map::new(),
        }
    }

    /// Sets a type-specific field.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Adds a match rule.
    #[must_use]
    pub fn with_match(mut self, attribute: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.match_rules.insert(attribute.into(), pattern.into());
        self
    }

    /// Marks the sink as default.
    #[must_use]
    pub const fn with_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    /// Returns a string field.
    #[must_use]
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Returns an integer field.
    #[must_use]
    pub fn u64_param(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(Value::as_u64)
    }

    /// Returns a required string field.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.str_param(key).ok_or_else(|| {
            EngineError::config(format!("sink '{}': missing string field '{key}'", self.name))
        })
    }
}

/// Regex filters over finding attributes.
#[derive(Debug, Clone, Default)]
pub struct FindingMatcher {
    rules: Vec<(String, Regex)>,
}

impl FindingMatcher {
    /// Compiles match rules. Patterns are anchored at the start of the value.
    pub fn compile(rules: &BTreeMap<String, String>) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|(attribute, pattern)| {
                if !Finding::ATTRIBUTES.contains(&attribute.as_str()) {
                    return Err(EngineError::config(format!(
                        "unknown finding attribute '{attribute}' in match rule"
                    )));
                }
                let regex = Regex::new(&format!("^(?:{pattern})")).map_err(|e| {
                    EngineError::config(format!("invalid match pattern for '{attribute}': {e}"))
                })?;
                Ok((attribute.clone(), regex))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Returns true if every rule matches.
    #[must_use]
    pub fn accepts(&self, finding: &Finding) -> bool {
        self.rules.iter().all(|(attribute, regex)| {
            finding
                .attribute(attribute)
                .is_some_and(|value| regex.is_match(&value))
        })
    }
}

/// Process-level settings handed to sinks at construction.
#[derive(Debug, Clone)]
pub struct SinkContext {
    /// Name of the watched cluster.
    pub cluster_name: String,
    /// Timeout for every delivery call.
    pub call_timeout: Duration,
}

impl Default for SinkContext {
    fn default() -> Self {
        Self {
            cluster_name: "default".to_string(),
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// A delivery destination.
pub trait Sink: Send + Sync {
    /// Returns the sink's configuration.
    fn config(&self) -> &SinkConfig;

    /// Returns true if the sink wants this finding.
    fn accepts(&self, finding: &Finding) -> bool;

    /// Delivers a finding.
    ///
    /// `platform_enabled` reports whether long-lived finding persistence is
    /// available to link to.
    fn write_finding(
        &self,
        finding: Finding,
        platform_enabled: bool,
    ) -> std::result::Result<(), DeliveryError>;

    /// Releases resources. Called once when the sink is retired.
    fn stop(&self);

    /// Returns the sink's name.
    fn name(&self) -> &str {
        &self.config().name
    }

    /// Returns false if the sink cannot currently deliver.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Tells the sink whether the cluster is being actively watched.
    fn set_cluster_active(&self, _active: bool) {}
}

impl fmt::Debug for dyn Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("name", &self.name())
            .field("type", &self.config().sink_type)
            .finish_non_exhaustive()
    }
}

/// Builds sinks from configuration.
pub trait SinkFactory: Send + Sync {
    /// Constructs a sink. Invalid configuration must return an error.
    fn create(&self, config: &SinkConfig, context: &SinkContext) -> Result<Arc<dyn Sink>>;
}

/// State shared by every concrete sink: its config, matcher and stop flag.
#[derive(Debug)]
pub struct SinkBase {
    config: SinkConfig,
    matcher: FindingMatcher,
    stopped: AtomicBool,
    cluster_active: AtomicBool,
}

impl SinkBase {
    /// Validates the shared parts of a sink config.
    pub fn new(config: &SinkConfig) -> Result<Self> {
        if config.name.trim().is_empty() {
            return Err(EngineError::config("sink name must not be empty"));
        }
        Ok(Self {
            matcher: FindingMatcher::compile(&config.match_rules)?,
            config: config.clone(),
            stopped: AtomicBool::new(false),
            cluster_active: AtomicBool::new(true),
        })
    }

    /// Returns the config.
    #[must_use]
    pub const fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Applies the match rules.
    #[must_use]
    pub fn accepts(&self, finding: &Finding) -> bool {
        self.matcher.accepts(finding)
    }

    /// Marks the sink stopped. Returns true the first time.
    pub fn mark_stopped(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    /// Returns true once the sink is stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Fails with [`DeliveryError::Stopped`] once the sink is stopped.
    pub fn ensure_running(&self) -> std::result::Result<(), DeliveryError> {
        if self.is_stopped() {
            Err(DeliveryError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Records cluster activity.
    pub fn set_cluster_active(&self, active: bool) {
        self.cluster_active.store(active, Ordering::SeqCst);
    }

    /// Returns the last recorded cluster activity.
    #[must_use]
    pub fn cluster_active(&self) -> bool {
        self.cluster_active.load(Ordering::SeqCst)
    }
}
