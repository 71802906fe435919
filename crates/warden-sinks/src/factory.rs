//! Builds the built-in sinks from configuration.

use std::sync::Arc;

use warden_core::{EngineError, Result, Sink, SinkConfig, SinkContext, SinkFactory};

use crate::file::FileSink;
use crate::log::LogSink;
use crate::webhook::WebhookSink;

/// Sink types this factory knows.
pub const SINK_TYPES: &[&str] = &["log", "file", "webhook"];

/// Resolves `type` to one of the built-in sinks.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSinkFactory;

impl SinkFactory for DefaultSinkFactory {
    fn create(&self, config: &SinkConfig, context: &SinkContext) -> Result<Arc<dyn Sink>> {
        match config.sink_type.as_str() {
            "log" => Ok(Arc::new(LogSink::new(config)?)),
            "file" => Ok(Arc::new(FileSink::new(config, context)?)),
            "webhook" => Ok(Arc::new(WebhookSink::new(config, context)?)),
            other => Err(EngineError::config(format!(
                "sink '{}': unknown type '{other}' (expected one of {})",
                config.name,
                SINK_TYPES.join(", ")
            ))),
        }
    }
}
