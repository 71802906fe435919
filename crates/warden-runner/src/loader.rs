//! Configuration loading and hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_core::{EventDispatcher, SinkFactory};

use crate::config::{RunnerConfig, WardenConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::scheduler::Scheduler;

/// Installs a configuration's playbooks and sinks as a new generation.
///
/// Blocking: sink construction may build HTTP clients. Run it on the
/// blocking pool from async code.
pub fn apply(
    dispatcher: &EventDispatcher,
    factory: &dyn SinkFactory,
    config: &WardenConfig,
) -> RunnerResult<u64> {
    let version = dispatcher.reload(&config.playbooks, &config.sinks, &config.global, factory)?;
    dispatcher.set_platform_enabled(config.platform_enabled());
    Ok(version)
}

/// A configuration file and the modification time last loaded from it.
#[derive(Debug)]
pub struct ConfigSource {
    path: PathBuf,
    loaded_at: Mutex<Option<SystemTime>>,
}

impl ConfigSource {
    /// Creates a source for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded_at: Mutex::new(None),
        }
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and validates the file, remembering its modification time.
    pub fn load(&self) -> RunnerResult<WardenConfig> {
        let modified = self.modified()?;
        let config = WardenConfig::from_file(&self.path)?;
        *self.loaded_at.lock() = Some(modified);
        Ok(config)
    }

    /// Returns true if the file changed since the last load.
    ///
    /// A file that cannot be inspected counts as unchanged.
    pub fn changed(&self) -> bool {
        match self.modified() {
            Ok(modified) => *self.loaded_at.lock() != Some(modified),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot inspect configuration file");
                false
            }
        }
    }

    /// Records the current modification time without loading.
    ///
    /// Used after a rejected reload so the same broken file is not retried
    /// every poll.
    pub fn mark_seen(&self) {
        if let Ok(modified) = self.modified() {
            *self.loaded_at.lock() = Some(modified);
        }
    }

    fn modified(&self) -> RunnerResult<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|source| RunnerError::Io {
                path: self.path.clone(),
                source,
            })
    }
}

/// Polls the configuration file and reloads the engine when it changes.
pub struct ConfigWatcher {
    source: Arc<ConfigSource>,
    dispatcher: Arc<EventDispatcher>,
    factory: Arc<dyn SinkFactory>,
    scheduler: Arc<Scheduler>,
    startup: RunnerConfig,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl ConfigWatcher {
    /// Creates a watcher. `startup` holds the process settings in effect,
    /// which a reload cannot change.
    #[must_use]
    pub fn new(
        source: Arc<ConfigSource>,
        dispatcher: Arc<EventDispatcher>,
        factory: Arc<dyn SinkFactory>,
        scheduler: Arc<Scheduler>,
        startup: RunnerConfig,
    ) -> Self {
        Self {
            source,
            dispatcher,
            factory,
            scheduler,
            startup,
        }
    }

    /// Checks the file once and reloads if it changed.
    ///
    /// Returns the new generation number, or `None` if nothing was
    /// installed.
    pub async fn poll(&self) -> Option<u64> {
        if !self.source.changed() {
            return None;
        }
        let source = Arc::clone(&self.source);
        let dispatcher = Arc::clone(&self.dispatcher);
        let factory = Arc::clone(&self.factory);
        let outcome = tokio::task::spawn_blocking(move || {
            let config = source.load()?;
            let version = apply(&dispatcher, &*factory, &config)?;
            Ok::<_, RunnerError>((version, config.runner))
        })
        .await
        .map_err(|e| RunnerError::Internal(format!("reload task failed: {e}")))
        .and_then(|r| r);

        match outcome {
            Ok((version, runner)) => {
                info!(
                    path = %self.source.path().display(),
                    generation = version,
                    "configuration reloaded"
                );
                if runner != self.startup {
                    warn!("changes to [runner] take effect on restart");
                }
                self.scheduler.sync(&self.dispatcher.current());
                Some(version)
            }
            Err(e) => {
                self.source.mark_seen();
                error!(
                    path = %self.source.path().display(),
                    error = %e,
                    "configuration rejected, keeping previous generation"
                );
                None
            }
        }
    }

    /// Polls the file, then purges expired throttle entries and callbacks.
    pub async fn tick(&self) -> Option<u64> {
        let reloaded = self.poll().await;
        self.dispatcher.purge_expired();
        reloaded
    }

    /// Ticks every `interval` until `cancel` fires.
    pub fn spawn(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                self.tick().await;
            }
            debug!("configuration watcher stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, Write};

    use tempfile::NamedTempFile;
    use warden_core::{DispatcherConfig, PoolConfig, WorkerPool};
    use warden_sinks::DefaultSinkFactory;

    const ONE_PLAYBOOK: &str = r#"
        [[sinks]]
        name = "console"
        type = "log"

        [[playbooks]]
        triggers = { on_manual = {} }
        actions = [{ name = "create_finding", params = { title = "manual" } }]
    "#;

    fn write(file: &mut NamedTempFile, content: &str) {
        file.as_file().set_len(0).unwrap();
        file.as_file_mut().rewind().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        // Coarse filesystem clocks may not move between two quick writes.
        let bumped = SystemTime::now() + Duration::from_secs(5);
        file.as_file().set_modified(bumped).unwrap();
    }

    fn dispatcher() -> Arc<EventDispatcher> {
        let actions = warden_actions::builtin_registry().unwrap();
        Arc::new(EventDispatcher::new(Arc::new(actions), DispatcherConfig::default()))
    }

    mod source_tests {
        use super::*;

        #[test]
        fn test_change_detection() {
            let mut file = NamedTempFile::new().unwrap();
            write(&mut file, ONE_PLAYBOOK);
            let source = ConfigSource::new(file.path());

            assert!(source.changed());
            source.load().unwrap();
            assert!(!source.changed());
        }

        #[test]
        fn test_missing_file_is_unchanged() {
            let source = ConfigSource::new("/nonexistent/warden.toml");
            assert!(!source.changed());
            assert!(matches!(source.load(), Err(RunnerError::Io { .. })));
        }

        #[test]
        fn test_apply_installs_generation() {
            let dispatcher = dispatcher();
            let config = WardenConfig::from_toml(ONE_PLAYBOOK).unwrap();
            let version = apply(&dispatcher, &DefaultSinkFactory, &config).unwrap();

            let generation = dispatcher.current();
            assert_eq!(generation.version(), version);
            assert_eq!(generation.playbooks().len(), 1);
            assert_eq!(generation.sinks().len(), 1);
        }
    }

    mod watcher_tests {
        use super::*;

        fn watcher(file: &NamedTempFile) -> (ConfigWatcher, Arc<EventDispatcher>) {
            let dispatcher = dispatcher();
            let source = Arc::new(ConfigSource::new(file.path()));
            let config = source.load().unwrap();
            apply(&dispatcher, &DefaultSinkFactory, &config).unwrap();

            let pool = Arc::new(WorkerPool::start(Arc::clone(&dispatcher), &PoolConfig::default()));
            let scheduler = Arc::new(Scheduler::new(pool));
            let watcher = ConfigWatcher::new(
                source,
                Arc::clone(&dispatcher),
                Arc::new(DefaultSinkFactory),
                scheduler,
                config.runner,
            );
            (watcher, dispatcher)
        }

        #[tokio::test]
        async fn test_unchanged_file_is_not_reloaded() {
            let mut file = NamedTempFile::new().unwrap();
            write(&mut file, ONE_PLAYBOOK);
            let (watcher, _) = watcher(&file);

            assert_eq!(watcher.poll().await, None);
        }

        #[tokio::test]
        async fn test_changed_file_installs_new_generation() {
            let mut file = NamedTempFile::new().unwrap();
            write(&mut file, ONE_PLAYBOOK);
            let (watcher, dispatcher) = watcher(&file);
            let before = dispatcher.current().version();

            write(&mut file, &format!("{ONE_PLAYBOOK}\n[[sinks]]\nname = \"second\"\ntype = \"log\"\n"));
            let version = watcher.poll().await.expect("reloaded");

            assert!(version > before);
            assert_eq!(dispatcher.current().sinks().len(), 2);
        }

        #[tokio::test]
        async fn test_rejected_file_keeps_previous_generation() {
            let mut file = NamedTempFile::new().unwrap();
            write(&mut file, ONE_PLAYBOOK);
            let (watcher, dispatcher) = watcher(&file);
            let before = dispatcher.current().version();

            write(
                &mut file,
                "[[playbooks]]\ntriggers = { on_manual = {} }\nactions = [{ name = \"no_such_action\" }]\n",
            );
            assert_eq!(watcher.poll().await, None);
            assert_eq!(dispatcher.current().version(), before);
            assert_eq!(dispatcher.current().playbooks().len(), 1);

            // The broken file is not retried until it changes again.
            assert_eq!(watcher.poll().await, None);
        }

        #[tokio::test]
        async fn test_tick_purges_stale_throttle_entries() {
            let mut file = NamedTempFile::new().unwrap();
            write(&mut file, ONE_PLAYBOOK);
            let (watcher, dispatcher) = watcher(&file);
            let limiter = dispatcher.rate_limiter();
            assert!(limiter.mark_and_test("removed-playbook", "Pod/prod/api-1", Duration::from_secs(60)));

            assert_eq!(watcher.tick().await, None);
            assert!(limiter.is_empty());
        }

        #[tokio::test]
        async fn test_tick_keeps_entries_inside_longest_window() {
            let mut file = NamedTempFile::new().unwrap();
            write(
                &mut file,
                r#"
                [[playbooks]]
                triggers = { on_manual = { rate_limit = 3600 } }
                actions = [{ name = "create_finding", params = { title = "throttled" } }]
                "#,
            );
            let (watcher, dispatcher) = watcher(&file);
            let limiter = dispatcher.rate_limiter();
            assert!(limiter.mark_and_test("pb", "manual", Duration::from_secs(3600)));

            watcher.tick().await;
            assert_eq!(limiter.len(), 1);
        }
    }
}
