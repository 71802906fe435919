//! HTTP reachability probe.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;
use warden_core::{
    ActionError, ActionParams, Block, Enrichment, ExecutionEvent, FieldKind, ParamViolation,
    ParamsSchema,
};

/// Parameters of `http_probe`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeParams {
    /// URL to GET.
    pub url: String,
    /// Status that counts as healthy; any 2xx if unset.
    #[serde(default)]
    pub expect_status: Option<u16>,
    /// Request timeout; the process call timeout if unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ActionParams for ProbeParams {
    fn schema() -> ParamsSchema {
        ParamsSchema::new()
            .required("url", FieldKind::String)
            .optional("expect_status", FieldKind::Integer)
            .optional("timeout_secs", FieldKind::Integer)
    }

    fn validate(&self) -> Vec<ParamViolation> {
        match Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Vec::new(),
            Ok(url) => vec![ParamViolation::new(
                "url",
                format!("unsupported scheme '{}'", url.scheme()),
            )],
            Err(e) => vec![ParamViolation::new("url", format!("invalid url: {e}"))],
        }
    }
}

/// GETs a URL and records the outcome on the finding.
///
/// An unexpected status fails the action; so does a timeout.
pub fn http_probe(event: &mut ExecutionEvent, params: &ProbeParams) -> Result<(), ActionError> {
    if event.context().cancel.is_cancelled() {
        return Err(ActionError::failed("shutdown in progress"));
    }
    let timeout = params
        .timeout_secs
        .map_or(event.context().call_timeout, Duration::from_secs);
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ActionError::failed(format!("cannot build http client: {e}")))?;

    let response = client.get(&params.url).send().map_err(|e| {
        if e.is_timeout() {
            ActionError::Timeout { after: timeout }
        } else {
            ActionError::failed(format!("probe of {} failed: {e}", params.url))
        }
    })?;
    let status = response.status().as_u16();
    debug!(url = %params.url, status, "probe finished");

    let healthy = params
        .expect_status
        .map_or_else(|| response.status().is_success(), |expected| expected == status);
    event.add_enrichment(
        Enrichment::new(vec![Block::markdown(format!(
            "`GET {}` returned {status}",
            params.url
        ))])
        .with_title("HTTP probe"),
    );
    if healthy {
        Ok(())
    } else {
        Err(ActionError::failed(format!(
            "probe of {} returned {status}",
            params.url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use test_case::test_case;
    use warden_core::{ExecutionContext, ManualTrigger, TriggerEvent};

    fn event() -> ExecutionEvent {
        ExecutionEvent::new(
            TriggerEvent::Manual(ManualTrigger::default()),
            "pb",
            Vec::new(),
            ExecutionContext::default(),
        )
    }

    fn serve(status: &'static str) -> (String, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/healthz", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf).unwrap();
            write!(stream, "HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").unwrap();
        });
        (url, handle)
    }

    fn params(url: String, expect_status: Option<u16>) -> ProbeParams {
        ProbeParams {
            url,
            expect_status,
            timeout_secs: Some(5),
        }
    }

    #[test_case("200 OK", None, true ; "2xx is healthy by default")]
    #[test_case("503 Service Unavailable", None, false ; "5xx fails")]
    #[test_case("503 Service Unavailable", Some(503), true ; "expected status wins")]
    fn probe_outcome(status: &'static str, expect: Option<u16>, ok: bool) {
        let (url, server) = serve(status);
        let mut event = event();
        let result = http_probe(&mut event, &params(url, expect));
        server.join().unwrap();
        assert_eq!(result.is_ok(), ok);
        assert_eq!(event.finding().unwrap().enrichments.len(), 1);
    }

    #[test]
    fn non_http_url_is_rejected() {
        let violations = params("file:///etc/passwd".to_string(), None).validate();
        assert_eq!(violations[0].path, "url");
    }

    #[test]
    fn cancelled_context_skips_the_request() {
        let mut event = event();
        event.context().cancel.cancel();
        let result = http_probe(&mut event, &params("http://127.0.0.1:9/".to_string(), None));
        assert!(matches!(result, Err(ActionError::Failed(msg)) if msg.contains("shutdown")));
    }
}
