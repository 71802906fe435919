//! Top-level event dispatch.
//!
//! The dispatcher owns the active [`Generation`] (playbooks plus sinks) and
//! swaps it atomically on reload. A dispatch clones the generation pointer
//! once and works against that snapshot to completion, so a reload never
//! becomes partially visible to an in-flight event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::action::ActionRegistry;
use crate::callbacks::{CallbackId, CallbackRegistry};
use crate::error::{EngineError, Result};
use crate::event::{ExecutionContext, ExecutionEvent, ManualTrigger, TriggerEvent};
use crate::finding::Finding;
use crate::playbook::{ActionBindingDef, Playbook, PlaybookDefinition, PlaybookOutcome, panic_message};
use crate::rate_limiter::RateLimiter;
use crate::registry::PlaybooksRegistry;
use crate::sink::{Sink, SinkConfig, SinkContext, SinkFactory};
use crate::sinks_registry::{SinksReconciliation, SinksRegistry};
use crate::trigger::{ManualTriggerDef, TriggerDef};

/// Process-level dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Name of the watched cluster.
    pub cluster_name: String,
    /// Whether finding persistence is available to sinks.
    pub platform_enabled: bool,
    /// Timeout for external calls made by actions and sinks.
    pub call_timeout: Duration,
    /// How long a callback subscription stays invocable.
    pub callback_ttl: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            cluster_name: "default".to_string(),
            platform_enabled: false,
            call_timeout: Duration::from_secs(30),
            callback_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl DispatcherConfig {
    /// Returns the context handed to sink constructors.
    #[must_use]
    pub fn sink_context(&self) -> SinkContext {
        SinkContext {
            cluster_name: self.cluster_name.clone(),
            call_timeout: self.call_timeout,
        }
    }
}

/// One immutable configuration generation.
///
/// Sinks retired by the reload that replaced this generation are stopped
/// when the last reference to it is dropped, which is after every dispatch
/// that started against it has finished delivering.
#[derive(Debug, Default)]
pub struct Generation {
    version: u64,
    playbooks: PlaybooksRegistry,
    sinks: SinksRegistry,
    global: Map<String, Value>,
    retired: Mutex<Vec<Arc<dyn Sink>>>,
}

impl Generation {
    /// Returns the generation number.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the playbooks.
    #[must_use]
    pub const fn playbooks(&self) -> &PlaybooksRegistry {
        &self.playbooks
    }

    /// Returns the sinks.
    #[must_use]
    pub const fn sinks(&self) -> &SinksRegistry {
        &self.sinks
    }

    /// Returns the global action parameters.
    #[must_use]
    pub const fn global(&self) -> &Map<String, Value> {
        &self.global
    }
}

impl Drop for Generation {
    fn drop(&mut self) {
        for sink in self.retired.get_mut().drain(..) {
            debug!(sink = sink.name(), generation = self.version, "stopping retired sink");
            sink.stop();
        }
    }
}

/// Summary of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Playbooks whose triggers were evaluated.
    pub evaluated: usize,
    /// Playbooks that fired and completed their chain.
    pub fired: usize,
    /// Playbooks whose triggers did not match.
    pub not_matched: usize,
    /// Playbooks throttled by the rate limiter.
    pub rate_limited: usize,
    /// Playbooks whose trigger evaluation failed.
    pub trigger_errors: usize,
    /// Playbooks skipped for event-kind mismatch.
    pub skipped: usize,
    /// Playbooks whose chain failed.
    pub action_failures: usize,
    /// Playbooks abandoned because of shutdown.
    pub cancelled: usize,
    /// Findings produced.
    pub findings: usize,
    /// Sink names that received a finding, in delivery order.
    pub delivered: Vec<String>,
    /// Failed deliveries.
    pub delivery_failures: usize,
    /// Findings a sink declined through its match rules.
    pub filtered: usize,
    /// True if a playbook or action stopped further processing.
    pub stopped: bool,
}

/// Entries dropped by [`EventDispatcher::purge_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Rate limiter entries older than the longest active window.
    pub rate_limits: usize,
    /// Callback subscriptions older than the configured TTL.
    pub callbacks: usize,
}

/// Routes events through playbooks and delivers findings to sinks.
pub struct EventDispatcher {
    generation: RwLock<Arc<Generation>>,
    actions: Arc<ActionRegistry>,
    limiter: Arc<RateLimiter>,
    config: DispatcherConfig,
    context: ExecutionContext,
    platform_enabled: AtomicBool,
    next_version: AtomicU64,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("generation", &self.current().version)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EventDispatcher {
    /// Creates a dispatcher with an empty generation.
    #[must_use]
    pub fn new(actions: Arc<ActionRegistry>, config: DispatcherConfig) -> Self {
        let context = ExecutionContext {
            cluster_name: config.cluster_name.clone(),
            call_timeout: config.call_timeout,
            cancel: CancellationToken::new(),
            callbacks: Arc::new(CallbackRegistry::new()),
        };
        Self {
            generation: RwLock::new(Arc::new(Generation::default())),
            actions,
            limiter: Arc::new(RateLimiter::new()),
            platform_enabled: AtomicBool::new(config.platform_enabled),
            config,
            context,
            next_version: AtomicU64::new(1),
        }
    }

    /// Replaces the rate limiter.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Returns the active generation.
    #[must_use]
    pub fn current(&self) -> Arc<Generation> {
        Arc::clone(&self.generation.read())
    }

    /// Returns the action registry.
    #[must_use]
    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    /// Returns the shared rate limiter.
    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Returns the callback table.
    #[must_use]
    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.context.callbacks
    }

    /// Returns the shutdown token shared with running actions.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.context.cancel.clone()
    }

    /// Returns the dispatcher settings.
    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Sets whether finding persistence is available.
    pub fn set_platform_enabled(&self, enabled: bool) {
        self.platform_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Builds a new generation and swaps it in.
    ///
    /// On any error nothing changes and the current generation stays
    /// active. Playbooks may name sinks the new generation lacks; those
    /// names are logged here and skipped at delivery.
    pub fn reload(
        &self,
        definitions: &[PlaybookDefinition],
        sink_configs: &[SinkConfig],
        global: &Map<String, Value>,
        factory: &dyn SinkFactory,
    ) -> Result<u64> {
        let playbooks = PlaybooksRegistry::build(definitions, &self.actions, global)?;
        let current = self.current();
        let reconciliation = SinksRegistry::construct_new_sinks(
            sink_configs,
            current.sinks(),
            factory,
            &self.config.sink_context(),
        )?;

        warn_unknown_sink_references(&playbooks, &reconciliation.registry);
        drop(current);
        Ok(self.install(playbooks, reconciliation, global.clone()))
    }

    /// Swaps in a generation built elsewhere. Returns its version.
    pub fn install(
        &self,
        playbooks: PlaybooksRegistry,
        reconciliation: SinksReconciliation,
        global: Map<String, Value>,
    ) -> u64 {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let SinksReconciliation {
            registry, retired, ..
        } = reconciliation;
        let next = Arc::new(Generation {
            version,
            playbooks,
            sinks: registry,
            global,
            retired: Mutex::new(Vec::new()),
        });
        for sink in next.sinks.sinks() {
            sink.set_cluster_active(!self.context.cancel.is_cancelled());
        }
        info!(
            generation = version,
            playbooks = next.playbooks.len(),
            sinks = next.sinks.len(),
            retired = retired.len(),
            "configuration generation activated"
        );

        let previous = std::mem::replace(&mut *self.generation.write(), next);
        previous.retired.lock().extend(retired);
        version
    }

    /// Runs an event through every candidate playbook and delivers the
    /// resulting findings.
    ///
    /// Failures are contained per playbook and per sink.
    pub fn handle(&self, event: &TriggerEvent) -> DispatchReport {
        let generation = self.current();
        let mut report = DispatchReport::default();
        for playbook in generation.playbooks.get_playbooks(event) {
            if self.context.cancel.is_cancelled() {
                debug!(event = %event.description(), "shutdown requested, skipping remaining playbooks");
                break;
            }
            report.evaluated += 1;
            match playbook.execute(event, &self.limiter, &self.context) {
                PlaybookOutcome::NotMatched => report.not_matched += 1,
                PlaybookOutcome::RateLimited => report.rate_limited += 1,
                PlaybookOutcome::TriggerErrored(_) => report.trigger_errors += 1,
                PlaybookOutcome::Skipped { .. } => report.skipped += 1,
                PlaybookOutcome::Failed { .. } => report.action_failures += 1,
                PlaybookOutcome::Cancelled => {
                    report.cancelled += 1;
                    break;
                }
                PlaybookOutcome::Completed(exec) => {
                    report.fired += 1;
                    let stop = exec.stop_processing || playbook.stop();
                    self.deliver(&generation, playbook, *exec, &mut report);
                    if stop {
                        debug!(playbook_id = %playbook.id(), "stop requested, skipping remaining playbooks");
                        report.stopped = true;
                        break;
                    }
                }
            }
        }
        report
    }

    /// Runs one registered action against a manual event, bypassing
    /// trigger matching, and delivers its finding.
    pub fn run_external_action(
        &self,
        name: &str,
        params: Value,
        sinks: Option<Vec<String>>,
    ) -> Result<DispatchReport> {
        let generation = self.current();
        let mut definition = PlaybookDefinition::new(
            TriggerDef::OnManual(ManualTriggerDef::default()),
            vec![ActionBindingDef::new(name, params.clone())],
        );
        definition.sinks = sinks;
        let playbook = Playbook::build(&definition, &self.actions, &generation.global)?;

        let manual = ManualTrigger {
            name: Some(name.to_string()),
            params: match params {
                Value::Object(map) => map,
                _ => Map::new(),
            },
        };
        let exec = ExecutionEvent::new(
            TriggerEvent::Manual(manual),
            playbook.id(),
            Vec::new(),
            self.context.clone(),
        );

        let mut report = DispatchReport {
            evaluated: 1,
            ..DispatchReport::default()
        };
        match playbook.run_chain(exec) {
            PlaybookOutcome::Completed(exec) => {
                report.fired = 1;
                self.deliver(&generation, &playbook, *exec, &mut report);
                Ok(report)
            }
            PlaybookOutcome::Failed { action, error } => Err(EngineError::Action {
                action,
                source: error,
            }),
            PlaybookOutcome::Cancelled => Err(EngineError::ShuttingDown),
            other => Err(EngineError::Trigger {
                reason: format!("external action '{name}' did not run: {other:?}"),
            }),
        }
    }

    /// Runs the action bound to a callback id.
    pub fn invoke_callback(&self, id: &CallbackId) -> Result<DispatchReport> {
        let binding = self
            .context
            .callbacks
            .get(id)
            .ok_or_else(|| EngineError::CallbackNotFound { id: id.to_string() })?;
        self.run_external_action(&binding.action, binding.params, binding.sinks)
    }

    /// Returns true if every active sink is healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.current().sinks.sinks().iter().all(|s| s.is_healthy())
    }

    /// Forwards cluster activity to every active sink.
    pub fn set_cluster_active(&self, active: bool) {
        info!(active, "setting cluster active");
        for sink in self.current().sinks.sinks() {
            sink.set_cluster_active(active);
        }
    }

    /// Drops throttle entries that can no longer reject anything and
    /// callbacks past their TTL.
    ///
    /// A throttle entry older than the longest window of the active
    /// playbooks cannot throttle any of them, so it is removed.
    pub fn purge_expired(&self) -> PurgeReport {
        let window = self.current().playbooks.max_rate_limit();
        let report = PurgeReport {
            rate_limits: self.limiter.purge_expired(window),
            callbacks: self.context.callbacks.purge_older_than(self.config.callback_ttl),
        };
        if report.rate_limits > 0 || report.callbacks > 0 {
            debug!(
                rate_limits = report.rate_limits,
                callbacks = report.callbacks,
                "expired state purged"
            );
        }
        report
    }

    /// Signals shutdown to running chains and marks the cluster inactive.
    pub fn shutdown(&self) {
        self.context.cancel.cancel();
        self.set_cluster_active(false);
    }

    fn deliver(
        &self,
        generation: &Generation,
        playbook: &Playbook,
        mut exec: ExecutionEvent,
        report: &mut DispatchReport,
    ) {
        let Some(finding) = exec.take_finding() else {
            return;
        };
        report.findings += 1;

        let targets = self.resolve_targets(generation, playbook, exec.named_sinks.as_deref());
        let platform_enabled = self.platform_enabled.load(Ordering::SeqCst);
        let delivered_before = report.delivered.len();
        for sink in targets {
            if !sink.accepts(&finding) {
                report.filtered += 1;
                continue;
            }
            match deliver_one(sink.as_ref(), &finding, platform_enabled) {
                Ok(()) => {
                    debug!(sink = sink.name(), aggregation_key = %finding.aggregation_key, "finding delivered");
                    report.delivered.push(sink.name().to_string());
                }
                Err(e) => {
                    error!(
                        sink = sink.name(),
                        aggregation_key = %finding.aggregation_key,
                        playbook_id = %playbook.id(),
                        error = %e,
                        "sink delivery failed"
                    );
                    report.delivery_failures += 1;
                }
            }
            if sink.config().stop {
                debug!(sink = sink.name(), "sink stops fan-out");
                break;
            }
        }
        if report.delivered.len() == delivered_before {
            self.context.release_callbacks(&finding);
        }
    }

    /// Event override, else the playbook's sinks, else the default sinks.
    fn resolve_targets(
        &self,
        generation: &Generation,
        playbook: &Playbook,
        named: Option<&[String]>,
    ) -> Vec<Arc<dyn Sink>> {
        let Some(names) = named.or_else(|| playbook.sinks()) else {
            return generation.sinks.default_sinks();
        };
        names
            .iter()
            .filter_map(|name| {
                let sink = generation.sinks.get(name).cloned();
                if sink.is_none() {
                    warn!(sink = %name, playbook_id = %playbook.id(), "finding routed to unknown sink");
                }
                sink
            })
            .collect()
    }
}

fn deliver_one(sink: &dyn Sink, finding: &Finding, platform_enabled: bool) -> Result<()> {
    let delivery = catch_unwind(AssertUnwindSafe(|| {
        sink.write_finding(finding.clone(), platform_enabled)
    }));
    match delivery {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(EngineError::Delivery {
            sink: sink.name().to_string(),
            source,
        }),
        Err(payload) => Err(EngineError::Delivery {
            sink: sink.name().to_string(),
            source: crate::error::DeliveryError::Failed(format!(
                "sink panicked: {}",
                panic_message(payload.as_ref())
            )),
        }),
    }
}

fn warn_unknown_sink_references(playbooks: &PlaybooksRegistry, sinks: &SinksRegistry) {
    for playbook in playbooks.playbooks() {
        for name in playbook.sinks().unwrap_or_default() {
            if sinks.get(name).is_none() {
                warn!(
                    playbook = playbook.name(),
                    playbook_id = %playbook.id(),
                    sink = %name,
                    "playbook references unknown sink, findings will skip it"
                );
            }
        }
    }
}
