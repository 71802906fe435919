//! Bounded worker pool in front of the dispatcher.
//!
//! Events are routed to a lane by their ordering key, so events about the
//! same object are handled one after another in arrival order. Each lane
//! has a bounded queue; [`WorkerPool::submit`] waits for room and
//! [`WorkerPool::try_submit`] drops with a warning when the lane is full.
//! Dispatch itself runs on the blocking thread pool because actions and
//! sinks perform blocking I/O.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatcher::EventDispatcher;
use crate::error::{EngineError, Result};
use crate::event::TriggerEvent;

/// Worker pool sizing.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of lanes, each processing one event at a time.
    pub workers: usize,
    /// Queue capacity per lane.
    pub queue_capacity: usize,
    /// How long shutdown waits for queued and in-flight events.
    pub shutdown_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Counters exposed by the pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    processed: AtomicU64,
    dropped: AtomicU64,
}

impl PoolStats {
    /// Events dispatched to completion.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }

    /// Events dropped because a lane was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Lane-partitioned worker pool.
#[derive(Debug)]
pub struct WorkerPool {
    senders: Mutex<Vec<mpsc::Sender<TriggerEvent>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dispatcher: Arc<EventDispatcher>,
    accepting: AtomicBool,
    lanes: usize,
    grace: Duration,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Starts the lanes. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(dispatcher: Arc<EventDispatcher>, config: &PoolConfig) -> Self {
        let lanes = config.workers.max(1);
        let capacity = config.queue_capacity.max(1);
        let stats = Arc::new(PoolStats::default());
        let mut senders = Vec::with_capacity(lanes);
        let mut workers = Vec::with_capacity(lanes);

        for lane in 0..lanes {
            let (tx, mut rx) = mpsc::channel::<TriggerEvent>(capacity);
            senders.push(tx);
            let dispatcher = Arc::clone(&dispatcher);
            let stats = Arc::clone(&stats);
            workers.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let dispatcher = Arc::clone(&dispatcher);
                    let description = event.description();
                    match tokio::task::spawn_blocking(move || dispatcher.handle(&event)).await {
                        Ok(report) => {
                            stats.processed.fetch_add(1, Ordering::SeqCst);
                            debug!(
                                lane,
                                event = %description,
                                fired = report.fired,
                                delivered = report.delivered.len(),
                                "event dispatched"
                            );
                        }
                        Err(e) => error!(lane, event = %description, error = %e, "dispatch task failed"),
                    }
                }
                debug!(lane, "worker lane drained");
            }));
        }

        info!(lanes, capacity, "worker pool started");
        Self {
            senders: Mutex::new(senders),
            workers: Mutex::new(workers),
            dispatcher,
            accepting: AtomicBool::new(true),
            lanes,
            grace: config.shutdown_grace,
            stats,
        }
    }

    /// Returns the lane an event is routed to.
    #[must_use]
    pub fn lane_for(&self, event: &TriggerEvent) -> usize {
        let mut hasher = DefaultHasher::new();
        event.ordering_key().hash(&mut hasher);
        (hasher.finish() as usize) % self.lanes
    }

    fn sender(&self, lane: usize) -> Result<mpsc::Sender<TriggerEvent>> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(EngineError::ShuttingDown);
        }
        self.senders
            .lock()
            .get(lane)
            .cloned()
            .ok_or(EngineError::ShuttingDown)
    }

    /// Queues an event, waiting for room in its lane.
    pub async fn submit(&self, event: TriggerEvent) -> Result<()> {
        let sender = self.sender(self.lane_for(&event))?;
        sender.send(event).await.map_err(|_| EngineError::ShuttingDown)
    }

    /// Queues an event without waiting. A full lane drops the event.
    pub fn try_submit(&self, event: TriggerEvent) -> Result<()> {
        let lane = self.lane_for(&event);
        let sender = self.sender(lane)?;
        match sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                self.stats.dropped.fetch_add(1, Ordering::SeqCst);
                warn!(lane, event = %event.description(), "event queue full, dropping event");
                Err(EngineError::QueueFull { lane })
            }
            Err(TrySendError::Closed(_)) => Err(EngineError::ShuttingDown),
        }
    }

    /// Returns the pool counters.
    #[must_use]
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Returns the number of lanes.
    #[must_use]
    pub const fn lanes(&self) -> usize {
        self.lanes
    }

    /// Stops accepting events and drains the queues.
    ///
    /// Waits up to the grace period for queued and in-flight events. After
    /// that the dispatcher is cancelled, so running chains stop before their
    /// next action and nothing partial is delivered. Returns true if every
    /// lane drained in time.
    pub async fn shutdown(&self) -> bool {
        self.accepting.store(false, Ordering::SeqCst);
        self.senders.lock().clear();
        let mut workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());

        let drained = tokio::time::timeout(self.grace, join_all(workers.iter_mut()))
            .await
            .is_ok();
        if drained {
            info!(processed = self.stats.processed(), "worker pool drained");
        } else {
            warn!(grace = ?self.grace, "worker pool did not drain in time, abandoning in-flight events");
            self.dispatcher.shutdown();
            for worker in &workers {
                worker.abort();
            }
        }
        self.dispatcher.set_cluster_active(false);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionRegistry, NoParams};
    use crate::dispatcher::DispatcherConfig;
    use crate::event::{ManualTrigger, Operation, ResourceChange};
    use crate::playbook::{ActionBindingDef, PlaybookDefinition};
    use crate::sink::{Sink, SinkConfig, SinkContext, SinkFactory};
    use crate::trigger::{ResourceChangeTriggerDef, TriggerDef};
    use serde_json::{Map, Value, json};

    struct NoSinks;

    impl SinkFactory for NoSinks {
        fn create(&self, _config: &SinkConfig, _context: &SinkContext) -> Result<Arc<dyn Sink>> {
            Err(EngineError::config("no sinks in this test"))
        }
    }

    fn dispatcher_with(delay: Duration, seen: Arc<Mutex<Vec<String>>>) -> Arc<EventDispatcher> {
        let mut actions = ActionRegistry::new();
        actions
            .register_fn::<NoParams, _>("record", Vec::new(), move |event, _| {
                std::thread::sleep(delay);
                let phase = event
                    .resource()
                    .and_then(|c| c.obj.pointer("/status/phase"))
                    .and_then(Value::as_str)
                    .unwrap_or("manual")
                    .to_string();
                seen.lock().push(phase);
                Ok(())
            })
            .unwrap();
        let dispatcher = EventDispatcher::new(Arc::new(actions), DispatcherConfig::default());
        let playbooks = [
            PlaybookDefinition::new(
                TriggerDef::OnResourceChange(ResourceChangeTriggerDef::default()),
                vec![ActionBindingDef::new("record", Value::Null)],
            ),
            PlaybookDefinition::new(
                TriggerDef::OnManual(crate::trigger::ManualTriggerDef::default()),
                vec![ActionBindingDef::new("record", Value::Null)],
            ),
        ];
        dispatcher.reload(&playbooks, &[], &Map::new(), &NoSinks).unwrap();
        Arc::new(dispatcher)
    }

    fn pod_event(phase: &str) -> TriggerEvent {
        TriggerEvent::ResourceChange(ResourceChange::new(
            Operation::Update,
            "Pod",
            json!({"metadata": {"name": "p1", "namespace": "ns1"}, "status": {"phase": phase}}),
        ))
    }

    #[tokio::test]
    async fn same_object_is_processed_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = dispatcher_with(Duration::from_millis(1), Arc::clone(&seen));
        let pool = WorkerPool::start(dispatcher, &PoolConfig::default());

        let phases: Vec<String> = (0..20).map(|i| format!("phase-{i}")).collect();
        for phase in &phases {
            pool.submit(pod_event(phase)).await.unwrap();
        }
        assert!(pool.shutdown().await);
        assert_eq!(*seen.lock(), phases);
        assert_eq!(pool.stats().processed(), 20);
    }

    #[tokio::test]
    async fn full_lane_drops_with_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = dispatcher_with(Duration::from_millis(200), Arc::clone(&seen));
        let pool = WorkerPool::start(
            dispatcher,
            &PoolConfig {
                workers: 1,
                queue_capacity: 1,
                shutdown_grace: Duration::from_secs(5),
            },
        );

        let mut results = Vec::new();
        for _ in 0..5 {
            results.push(pool.try_submit(TriggerEvent::Manual(ManualTrigger::default())));
        }
        assert!(results.iter().any(|r| matches!(r, Err(EngineError::QueueFull { lane: 0 }))));
        assert!(pool.stats().dropped() >= 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pool = WorkerPool::start(dispatcher_with(Duration::ZERO, seen), &PoolConfig::default());
        assert!(pool.shutdown().await);
        let err = pool.submit(TriggerEvent::Manual(ManualTrigger::default())).await.unwrap_err();
        assert!(matches!(err, EngineError::ShuttingDown));
        assert!(matches!(
            pool.try_submit(TriggerEvent::Manual(ManualTrigger::default())),
            Err(EngineError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn grace_timeout_cancels_dispatcher() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = dispatcher_with(Duration::from_millis(300), Arc::clone(&seen));
        let pool = WorkerPool::start(
            Arc::clone(&dispatcher),
            &PoolConfig {
                workers: 1,
                queue_capacity: 16,
                shutdown_grace: Duration::from_millis(50),
            },
        );
        for i in 0..4 {
            pool.submit(pod_event(&format!("p{i}"))).await.unwrap();
        }
        assert!(!pool.shutdown().await);
        assert!(dispatcher.cancellation_token().is_cancelled());
    }
}
