//! In-process scheduler for playbooks with scheduled triggers.
//!
//! Each scheduled playbook gets one task that sleeps for the next delay and
//! queues a [`ScheduledTick`] addressed to that playbook. Schedules are
//! re-derived from the active generation after every reload: tasks for
//! playbooks that disappeared are aborted, new playbooks get a task, and
//! unchanged playbooks keep their recurrence counter. Nothing is persisted
//! across restarts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use warden_core::{Generation, Schedule, ScheduledTick, TriggerEvent, WorkerPool};

/// Emits scheduler ticks into the worker pool.
#[derive(Debug)]
pub struct Scheduler {
    pool: Arc<WorkerPool>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler with no running schedules.
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            tasks: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Aligns the running schedules with a generation.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn sync(&self, generation: &Generation) {
        let wanted = generation.playbooks().scheduled_playbooks();
        let mut tasks = self.tasks.lock();

        tasks.retain(|id, handle| {
            let keep = wanted.iter().any(|p| p.id() == id);
            if !keep {
                debug!(playbook_id = %id, "schedule removed");
                handle.abort();
            }
            keep
        });

        let mut started = 0usize;
        for playbook in wanted {
            if tasks.contains_key(playbook.id()) {
                continue;
            }
            let Some(schedule) = playbook.schedule().cloned() else {
                continue;
            };
            let id = playbook.id().to_string();
            let handle = tokio::spawn(run_schedule(
                Arc::clone(&self.pool),
                id.clone(),
                schedule,
                self.cancel.child_token(),
            ));
            tasks.insert(id, handle);
            started += 1;
        }
        info!(
            generation = generation.version(),
            schedules = tasks.len(),
            started,
            "schedules synchronized"
        );
    }

    /// Returns the ids of playbooks whose schedule is still running.
    #[must_use]
    pub fn active(&self) -> Vec<String> {
        let tasks = self.tasks.lock();
        let mut ids: Vec<String> = tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Stops every schedule.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let mut tasks = self.tasks.lock();
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }
}

async fn run_schedule(
    pool: Arc<WorkerPool>,
    playbook_id: String,
    schedule: Schedule,
    cancel: CancellationToken,
) {
    let mut recurrence = 0u64;
    while let Some(delay) = schedule.next_delay(recurrence, Utc::now()) {
        tokio::select! {
            () = cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
        let tick = TriggerEvent::Scheduled(ScheduledTick {
            playbook_id: playbook_id.clone(),
            recurrence,
        });
        if let Err(e) = pool.submit(tick).await {
            debug!(playbook_id = %playbook_id, error = %e, "schedule stopped");
            return;
        }
        recurrence += 1;
    }
    debug!(playbook_id = %playbook_id, runs = recurrence, "schedule exhausted");
}
