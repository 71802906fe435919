//! # warden-runner
//!
//! The Warden process: loads the TOML configuration, installs it into the
//! engine, and keeps it running.
//!
//! ## Features
//!
//! - **Hot reload**: the configuration file is polled and every change is
//!   installed as a new generation; a rejected file keeps the old one
//! - **Receiver**: an axum server queuing Alertmanager, Kubernetes, log and
//!   manual events on the worker pool
//! - **Scheduler**: ticks for playbooks with scheduled triggers
//! - **Graceful shutdown**: the pool drains within the configured grace
//!
//! ## Example
//!
//! ```rust,no_run
//! use warden_runner::Warden;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let warden = Warden::start("/etc/warden/warden.toml").await?;
//!     warden
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod app;
pub mod config;
pub mod error;
pub mod loader;
pub mod receiver;
pub mod scheduler;
pub mod telemetry;

// Re-export main types at crate root
pub use app::{Warden, build_engine, dispatch_once, validate};
pub use config::{RunnerConfig, WardenConfig};
pub use error::{RunnerError, RunnerResult};
pub use loader::{ConfigSource, ConfigWatcher};
pub use receiver::{ReceiverState, create_router, serve_with_shutdown};
pub use scheduler::Scheduler;
pub use telemetry::LogFormat;
