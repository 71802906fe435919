//! Sink that appends findings to a file as JSON lines.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};
use warden_core::{DeliveryError, EngineError, Finding, Result, Sink, SinkBase, SinkConfig, SinkContext};

use crate::render::FindingPayload;

/// Appends one JSON object per finding to `path`.
///
/// Config fields: `path` (required).
#[derive(Debug)]
pub struct FileSink {
    base: SinkBase,
    path: PathBuf,
    cluster: String,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileSink {
    /// Opens the target file for appending, creating it if needed.
    pub fn new(config: &SinkConfig, context: &SinkContext) -> Result<Self> {
        let base = SinkBase::new(config)?;
        let path = PathBuf::from(config.require_str("path")?);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                EngineError::config(format!(
                    "sink '{}': cannot open {}: {e}",
                    config.name,
                    path.display()
                ))
            })?;
        debug!(sink = %config.name, path = %path.display(), "file sink opened");
        Ok(Self {
            base,
            path,
            cluster: context.cluster_name.clone(),
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    /// Returns the target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for FileSink {
    fn config(&self) -> &SinkConfig {
        self.base.config()
    }

    fn accepts(&self, finding: &Finding) -> bool {
        self.base.accepts(finding)
    }

    fn write_finding(&self, finding: Finding, platform_enabled: bool) -> std::result::Result<(), DeliveryError> {
        self.base.ensure_running()?;
        let payload = FindingPayload::new(&self.cluster, &finding, platform_enabled);
        let line = serde_json::to_string(&payload).map_err(|e| DeliveryError::Failed(e.to_string()))?;

        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(DeliveryError::Stopped)?;
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(|e| DeliveryError::Failed(format!("{}: {e}", self.path.display())))
    }

    fn stop(&self) {
        if !self.base.mark_stopped() {
            return;
        }
        if let Some(mut writer) = self.writer.lock().take() {
            if let Err(e) = writer.flush() {
                warn!(sink = self.name(), error = %e, "flush on stop failed");
            }
        }
    }

    fn is_healthy(&self) -> bool {
        !self.base.is_stopped()
    }
}
