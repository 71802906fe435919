//! Process wiring.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_core::{DispatchReport, EventDispatcher, SinkFactory, TriggerEvent, WorkerPool};
use warden_sinks::DefaultSinkFactory;

use crate::config::WardenConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::loader::{ConfigSource, ConfigWatcher, apply};
use crate::receiver::{ReceiverState, serve_with_shutdown};
use crate::scheduler::Scheduler;

/// Builds a dispatcher holding the built-in actions and installs `config`.
///
/// Blocking: constructs the configured sinks.
pub fn build_engine(
    config: &WardenConfig,
    factory: &dyn SinkFactory,
) -> RunnerResult<EventDispatcher> {
    let actions = Arc::new(warden_actions::builtin_registry()?);
    let dispatcher = EventDispatcher::new(actions, config.dispatcher_config());
    apply(&dispatcher, factory, config)?;
    Ok(dispatcher)
}

/// Loads a configuration file and checks it the way a reload would.
///
/// Sinks are constructed and stopped again, so a file sink creates its
/// output file.
pub fn validate(path: &Path) -> RunnerResult<WardenConfig> {
    let config = WardenConfig::from_file(path)?;
    let dispatcher = build_engine(&config, &DefaultSinkFactory)?;
    for sink in dispatcher.current().sinks().sinks() {
        sink.stop();
    }
    Ok(config)
}

/// Runs one event read from a JSON file through the configured playbooks.
pub fn dispatch_once(config_path: &Path, event_path: &Path) -> RunnerResult<DispatchReport> {
    let config = WardenConfig::from_file(config_path)?;
    let raw = std::fs::read_to_string(event_path).map_err(|source| RunnerError::Io {
        path: event_path.to_path_buf(),
        source,
    })?;
    let event: TriggerEvent = serde_json::from_str(&raw)
        .map_err(|e| RunnerError::InvalidRequest(format!("invalid event: {e}")))?;

    let dispatcher = build_engine(&config, &DefaultSinkFactory)?;
    let report = dispatcher.handle(&event);
    for sink in dispatcher.current().sinks().sinks() {
        sink.stop();
    }
    Ok(report)
}

/// A running engine: dispatcher, worker pool and scheduler.
#[derive(Debug)]
pub struct Warden {
    config: WardenConfig,
    source: Arc<ConfigSource>,
    dispatcher: Arc<EventDispatcher>,
    pool: Arc<WorkerPool>,
    scheduler: Arc<Scheduler>,
}

impl Warden {
    /// Loads the configuration, installs the first generation and starts
    /// the worker pool and schedules.
    pub async fn start(path: impl Into<PathBuf>) -> RunnerResult<Self> {
        let source = Arc::new(ConfigSource::new(path));
        let loading = Arc::clone(&source);
        let (config, dispatcher) = tokio::task::spawn_blocking(move || {
            let config = loading.load()?;
            let dispatcher = build_engine(&config, &DefaultSinkFactory)?;
            Ok::<_, RunnerError>((config, dispatcher))
        })
        .await
        .map_err(|e| RunnerError::Internal(format!("startup task failed: {e}")))??;

        let dispatcher = Arc::new(dispatcher);
        let pool = Arc::new(WorkerPool::start(
            Arc::clone(&dispatcher),
            &config.runner.pool_config(),
        ));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&pool)));
        scheduler.sync(&dispatcher.current());

        info!(
            path = %source.path().display(),
            cluster = config.cluster_name(),
            playbooks = config.playbooks.len(),
            sinks = config.sinks.len(),
            "warden started"
        );
        Ok(Self {
            config,
            source,
            dispatcher,
            pool,
            scheduler,
        })
    }

    /// Returns the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Returns the worker pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Serves the receiver and watches the configuration until `shutdown`
    /// completes, then drains the pool.
    ///
    /// Returns the receiver's error, if any, after teardown.
    pub async fn run<F>(self, shutdown: F) -> RunnerResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let watcher = ConfigWatcher::new(
            Arc::clone(&self.source),
            Arc::clone(&self.dispatcher),
            Arc::new(DefaultSinkFactory),
            Arc::clone(&self.scheduler),
            self.config.runner.clone(),
        )
        .spawn(self.config.runner.reload_interval(), cancel.clone());

        let state = Arc::new(ReceiverState::new(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.pool),
        ));
        let served = serve_with_shutdown(self.config.runner.listen, state, shutdown).await;

        cancel.cancel();
        self.scheduler.shutdown();
        if let Err(e) = watcher.await {
            warn!(error = %e, "configuration watcher task failed");
        }
        let drained = self.pool.shutdown().await;
        info!(
            drained,
            processed = self.pool.stats().processed(),
            dropped = self.pool.stats().dropped(),
            "warden stopped"
        );
        served
    }
}
