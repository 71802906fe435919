//! Inbound HTTP receiver.
//!
//! Accepts events from Alertmanager, the Kubernetes watcher, log tailers
//! and operators, and queues them on the worker pool. Endpoints:
//!
//! | method | path                   | body                        |
//! |--------|------------------------|-----------------------------|
//! | GET    | `/health`              |                             |
//! | POST   | `/api/alerts`          | Alertmanager webhook        |
//! | POST   | `/api/k8s`             | resource change             |
//! | POST   | `/api/logs`            | log line                    |
//! | POST   | `/api/manual`          | manual trigger              |
//! | POST   | `/api/trigger`         | external action run         |
//! | POST   | `/api/callbacks/{id}`  |                             |
//! | DELETE | `/api/callbacks/{id}`  |                             |

pub mod handlers;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tracing::info;
use warden_core::{EventDispatcher, WorkerPool};

use crate::error::{RunnerError, RunnerResult};

pub use routes::create_router;

/// Shared state of the receiver handlers.
#[derive(Debug)]
pub struct ReceiverState {
    dispatcher: Arc<EventDispatcher>,
    pool: Arc<WorkerPool>,
    started: Instant,
}

impl ReceiverState {
    /// Creates the state.
    #[must_use]
    pub fn new(dispatcher: Arc<EventDispatcher>, pool: Arc<WorkerPool>) -> Self {
        Self {
            dispatcher,
            pool,
            started: Instant::now(),
        }
    }

    /// Returns the dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Returns the worker pool.
    #[must_use]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Seconds since the receiver was created.
    #[must_use]
    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Serves the receiver until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if binding to the address fails.
pub async fn serve_with_shutdown<F>(
    addr: SocketAddr,
    state: Arc<ReceiverState>,
    shutdown: F,
) -> RunnerResult<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| RunnerError::BindFailed(addr, e))?;

    info!(addr = %addr, "receiver listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| RunnerError::Internal(e.to_string()))?;

    info!("receiver shut down");
    Ok(())
}
