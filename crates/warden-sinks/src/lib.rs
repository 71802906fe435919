//! Built-in finding sinks for Warden.
//!
//! - [`LogSink`]: one structured log record per finding
//! - [`FileSink`]: JSON lines appended to a local file
//! - [`WebhookSink`]: JSON POST to an HTTP endpoint
//!
//! [`DefaultSinkFactory`] maps a sink's `type` field to one of these and is
//! what the runner hands to the dispatcher on every reload.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod factory;
pub mod file;
pub mod log;
pub mod render;
pub mod webhook;

pub use factory::{DefaultSinkFactory, SINK_TYPES};
pub use file::FileSink;
pub use log::{LogLevel, LogSink};
pub use render::{FindingPayload, render_markdown};
pub use webhook::WebhookSink;
