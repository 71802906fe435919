//! Sink that POSTs findings as JSON to an HTTP endpoint.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use reqwest::blocking::Client;
use tracing::{debug, warn};
use url::Url;
use warden_core::{DeliveryError, EngineError, Finding, Result, Sink, SinkBase, SinkConfig, SinkContext};

use crate::render::FindingPayload;

/// Consecutive failures after which the sink reports itself unhealthy.
const UNHEALTHY_AFTER: u32 = 3;

/// Posts each finding to `url`.
///
/// Config fields: `url` (required, http or https), `headers` (table of
/// strings), `timeout_secs` (defaults to the process call timeout).
///
/// The client is blocking; deliveries run on dispatch worker threads.
#[derive(Debug)]
pub struct WebhookSink {
    base: SinkBase,
    url: Url,
    headers: BTreeMap<String, String>,
    timeout: Duration,
    cluster: String,
    client: Client,
    failures: AtomicU32,
}

impl WebhookSink {
    /// Validates the configuration and builds the HTTP client.
    pub fn new(config: &SinkConfig, context: &SinkContext) -> Result<Self> {
        let base = SinkBase::new(config)?;
        let raw = config.require_str("url")?;
        let url = Url::parse(raw)
            .map_err(|e| EngineError::config(format!("sink '{}': invalid url '{raw}': {e}", config.name)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(EngineError::config(format!(
                "sink '{}': unsupported url scheme '{}'",
                config.name,
                url.scheme()
            )));
        }

        let headers = match config.params.get("headers") {
            None => BTreeMap::new(),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                EngineError::config(format!("sink '{}': headers must be a table of strings: {e}", config.name))
            })?,
        };
        let timeout = config
            .u64_param("timeout_secs")
            .map_or(context.call_timeout, Duration::from_secs);

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::config(format!("sink '{}': cannot build http client: {e}", config.name)))?;

        Ok(Self {
            base,
            url,
            headers,
            timeout,
            cluster: context.cluster_name.clone(),
            client,
            failures: AtomicU32::new(0),
        })
    }

    /// Returns the target URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn post(&self, finding: &Finding, platform_enabled: bool) -> std::result::Result<(), DeliveryError> {
        let payload = FindingPayload::new(&self.cluster, finding, platform_enabled);
        let mut request = self.client.post(self.url.clone()).json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout { after: self.timeout }
            } else {
                DeliveryError::Failed(e.to_string())
            }
        })?;
        let status = response.status();
        if status.is_success() {
            debug!(sink = self.name(), status = status.as_u16(), "webhook accepted finding");
            Ok(())
        } else {
            Err(DeliveryError::Failed(format!("endpoint returned {status}")))
        }
    }
}

impl Sink for WebhookSink {
    fn config(&self) -> &SinkConfig {
        self.base.config()
    }

    fn accepts(&self, finding: &Finding) -> bool {
        self.base.accepts(finding)
    }

    fn write_finding(&self, finding: Finding, platform_enabled: bool) -> std::result::Result<(), DeliveryError> {
        self.base.ensure_running()?;
        let result = self.post(&finding, platform_enabled);
        if result.is_ok() {
            self.failures.store(0, Ordering::SeqCst);
        } else {
            let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
            if failures == UNHEALTHY_AFTER {
                warn!(sink = self.name(), failures, "webhook marked unhealthy");
            }
        }
        result
    }

    fn stop(&self) {
        self.base.mark_stopped();
    }

    fn is_healthy(&self) -> bool {
        !self.base.is_stopped() && self.failures.load(Ordering::SeqCst) < UNHEALTHY_AFTER
    }

    fn set_cluster_active(&self, active: bool) {
        self.base.set_cluster_active(active);
    }
}
