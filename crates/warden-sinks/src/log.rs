//! Sink that writes findings to the process log.

use tracing::{info, warn};
use warden_core::{DeliveryError, EngineError, Finding, Result, Sink, SinkBase, SinkConfig};

use crate::render::render_markdown;

/// Log level a [`LogSink`] writes at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// `info`.
    Info,
    /// `warn`.
    Warn,
}

/// Writes each finding as one structured log record.
///
/// Config fields: `level` (`info` or `warn`, default `info`).
#[derive(Debug)]
pub struct LogSink {
    base: SinkBase,
    level: LogLevel,
}

impl LogSink {
    /// Creates a log sink from configuration.
    pub fn new(config: &SinkConfig) -> Result<Self> {
        let level = match config.str_param("level").unwrap_or("info") {
            "info" => LogLevel::Info,
            "warn" => LogLevel::Warn,
            other => {
                return Err(EngineError::config(format!(
                    "sink '{}': unknown log level '{other}'",
                    config.name
                )));
            }
        };
        Ok(Self {
            base: SinkBase::new(config)?,
            level,
        })
    }

    /// Returns the configured level.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        self.level
    }
}

impl Sink for LogSink {
    fn config(&self) -> &SinkConfig {
        self.base.config()
    }

    fn accepts(&self, finding: &Finding) -> bool {
        self.base.accepts(finding)
    }

    fn write_finding(&self, finding: Finding, _platform_enabled: bool) -> std::result::Result<(), DeliveryError> {
        self.base.ensure_running()?;
        let text = render_markdown(&finding);
        match self.level {
            LogLevel::Info => info!(
                sink = self.name(),
                title = %finding.title,
                severity = %finding.severity,
                aggregation_key = %finding.aggregation_key,
                subject = %finding.subject.identity(),
                text = %text,
                "FINDING"
            ),
            LogLevel::Warn => warn!(
                sink = self.name(),
                title = %finding.title,
                severity = %finding.severity,
                aggregation_key = %finding.aggregation_key,
                subject = %finding.subject.identity(),
                text = %text,
                "FINDING"
            ),
        }
        Ok(())
    }

    fn stop(&self) {
        self.base.mark_stopped();
    }
}
