//! Active sinks and diff-based reconfiguration.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::sink::{Sink, SinkConfig, SinkContext, SinkFactory};

/// Ordered, name-indexed set of sinks.
#[derive(Default, Clone)]
pub struct SinksRegistry {
    sinks: Vec<Arc<dyn Sink>>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for SinksRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinksRegistry")
            .field("sinks", &self.names())
            .finish()
    }
}

/// Result of reconciling a new sink configuration against the active one.
#[derive(Debug, Default)]
pub struct SinksReconciliation {
    /// The new registry, in configuration order.
    pub registry: SinksRegistry,
    /// Sinks that were removed or replaced. Not yet stopped.
    pub retired: Vec<Arc<dyn Sink>>,
    /// Names reused as-is.
    pub reused: Vec<String>,
    /// Names constructed fresh.
    pub created: Vec<String>,
}

impl SinksReconciliation {
    /// Stops every retired sink.
    pub fn stop_retired(&self) {
        for sink in &self.retired {
            sink.stop();
        }
    }
}

impl SinksRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from constructed sinks. Names must be unique.
    pub fn from_sinks(sinks: Vec<Arc<dyn Sink>>) -> Result<Self> {
        let mut index = HashMap::with_capacity(sinks.len());
        for (i, sink) in sinks.iter().enumerate() {
            if index.insert(sink.name().to_string(), i).is_some() {
                return Err(EngineError::DuplicateSink {
                    name: sink.name().to_string(),
                });
            }
        }
        Ok(Self { sinks, index })
    }

    /// Builds a registry from scratch.
    pub fn build(
        configs: &[SinkConfig],
        factory: &dyn SinkFactory,
        context: &SinkContext,
    ) -> Result<Self> {
        Ok(Self::construct_new_sinks(configs, &Self::new(), factory, context)?.registry)
    }

    /// Reconciles `configs` against `existing`.
    ///
    /// A sink whose name and configuration are unchanged is reused as the
    /// same instance. A changed sink is rebuilt and the old instance
    /// retired; a sink missing from `configs` is retired. The result follows
    /// the order of `configs`.
    ///
    /// Every construction failure is collected. On failure the sinks built
    /// so far are stopped and `existing` is left untouched.
    pub fn construct_new_sinks(
        configs: &[SinkConfig],
        existing: &Self,
        factory: &dyn SinkFactory,
        context: &SinkContext,
    ) -> Result<SinksReconciliation> {
        let mut names = HashSet::new();
        for config in configs {
            if !names.insert(config.name.as_str()) {
                return Err(EngineError::DuplicateSink {
                    name: config.name.clone(),
                });
            }
        }

        let mut sinks = Vec::with_capacity(configs.len());
        let mut reused = Vec::new();
        let mut created = Vec::new();
        let mut fresh: Vec<Arc<dyn Sink>> = Vec::new();
        let mut errors = Vec::new();
        for config in configs {
            if let Some(current) = existing.get(&config.name) {
                if current.config() == config {
                    debug!(sink = %config.name, "sink unchanged, reusing");
                    sinks.push(Arc::clone(current));
                    reused.push(config.name.clone());
                    continue;
                }
            }
            match factory.create(config, context) {
                Ok(sink) => {
                    sinks.push(Arc::clone(&sink));
                    fresh.push(sink);
                    created.push(config.name.clone());
                }
                Err(e) => errors.push(format!("{}: {e}", config.name)),
            }
        }

        if !errors.is_empty() {
            for sink in &fresh {
                sink.stop();
            }
            return Err(EngineError::SinkConstruction { errors });
        }

        let retired: Vec<Arc<dyn Sink>> = existing
            .sinks
            .iter()
            .filter(|old| !reused.iter().any(|name| name == old.name()))
            .cloned()
            .collect();

        info!(
            reused = reused.len(),
            created = created.len(),
            retired = retired.len(),
            "sinks reconciled"
        );
        Ok(SinksReconciliation {
            registry: Self::from_sinks(sinks)?,
            retired,
            reused,
            created,
        })
    }

    /// Looks up a sink by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Sink>> {
        self.index.get(name).map(|&i| &self.sinks[i])
    }

    /// Returns every sink in configuration order.
    #[must_use]
    pub fn sinks(&self) -> &[Arc<dyn Sink>] {
        &self.sinks
    }

    /// Returns the sink names in configuration order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Returns the sinks marked default, or every sink if none is.
    #[must_use]
    pub fn default_sinks(&self) -> Vec<Arc<dyn Sink>> {
        let defaults: Vec<Arc<dyn Sink>> = self
            .sinks
            .iter()
            .filter(|s| s.config().default)
            .cloned()
            .collect();
        if defaults.is_empty() {
            self.sinks.clone()
        } else {
            defaults
        }
    }

    /// Returns the number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if there are no sinks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}
