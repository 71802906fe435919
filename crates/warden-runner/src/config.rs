//! Runner configuration.
//!
//! One TOML file holds everything the process needs:
//! - `[global]` values merged into action parameters
//! - `[runner]` worker pool, receiver and reload settings
//! - `[[sinks]]` sink definitions
//! - `[[playbooks]]` playbook definitions

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use warden_core::{DispatcherConfig, PlaybookDefinition, PoolConfig, SinkConfig};

use crate::error::{RunnerError, RunnerResult};

const DEFAULT_CLUSTER_NAME: &str = "default";

/// Process settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    /// Worker lanes.
    pub workers: usize,
    /// Bounded queue size per lane.
    pub queue_capacity: usize,
    /// Receiver listen address.
    pub listen: SocketAddr,
    /// How long shutdown waits for queued events.
    pub shutdown_grace_secs: u64,
    /// Configuration file poll interval.
    pub reload_interval_secs: u64,
    /// Timeout for external calls made by actions and sinks.
    pub call_timeout_secs: u64,
    /// How long a callback button stays invocable.
    pub callback_ttl_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            listen: SocketAddr::from(([0, 0, 0, 0], 5000)),
            shutdown_grace_secs: 10,
            reload_interval_secs: 5,
            call_timeout_secs: 30,
            callback_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl RunnerConfig {
    /// Returns the worker pool settings.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }

    /// Returns the reload poll interval.
    #[must_use]
    pub const fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WardenConfig {
    /// Global action parameters; also carries `cluster_name` and
    /// `platform_enabled`.
    #[serde(default)]
    pub global: Map<String, Value>,
    /// Process settings.
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Sink definitions.
    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
    /// Playbook definitions.
    #[serde(default)]
    pub playbooks: Vec<PlaybookDefinition>,
}

impl WardenConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> RunnerResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| RunnerError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> RunnerResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the process settings.
    ///
    /// Playbooks and sinks are validated by the engine when they are
    /// installed.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> RunnerResult<()> {
        if self.runner.workers == 0 {
            return Err(RunnerError::Config(
                "runner.workers must be greater than 0".to_string(),
            ));
        }
        if self.runner.queue_capacity == 0 {
            return Err(RunnerError::Config(
                "runner.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.runner.reload_interval_secs == 0 {
            return Err(RunnerError::Config(
                "runner.reload_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.runner.call_timeout_secs == 0 {
            return Err(RunnerError::Config(
                "runner.call_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.runner.callback_ttl_secs == 0 {
            return Err(RunnerError::Config(
                "runner.callback_ttl_secs must be greater than 0".to_string(),
            ));
        }

        match self.global.get("cluster_name") {
            None => {}
            Some(Value::String(name)) if !name.is_empty() => {}
            Some(_) => {
                return Err(RunnerError::Config(
                    "global.cluster_name must be a non-empty string".to_string(),
                ));
            }
        }
        if self
            .global
            .get("platform_enabled")
            .is_some_and(|v| !v.is_boolean())
        {
            return Err(RunnerError::Config(
                "global.platform_enabled must be a boolean".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the cluster name, `default` if unset.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        self.global
            .get("cluster_name")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_CLUSTER_NAME)
    }

    /// Returns whether finding persistence is enabled.
    #[must_use]
    pub fn platform_enabled(&self) -> bool {
        self.global
            .get("platform_enabled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Returns the dispatcher settings.
    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            cluster_name: self.cluster_name().to_string(),
            platform_enabled: self.platform_enabled(),
            call_timeout: Duration::from_secs(self.runner.call_timeout_secs),
            callback_ttl: Duration::from_secs(self.runner.callback_ttl_secs),
        }
    }
}
