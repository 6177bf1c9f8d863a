//! Connectivity diagnostic
//!
//! The [`ConnectivityProbe`] performs one proxy-aware HTTP(S) fetch of a
//! known-good endpoint and succeeds only if the body contains the expected
//! substring within the timeout. It is run when a login hangs, purely to
//! tell the user whether the network is the problem; it never aborts the
//! login itself.
//!
//! A probe is consumed by [`ConnectivityProbe::start_check`], which spawns
//! the check and yields exactly one outcome.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use cloudmirror_core::config::ConnectivityConfig;
use cloudmirror_core::domain::ProxyEndpoint;

/// Errors reported by a connectivity check
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Invalid proxy configuration: {0}")]
    Proxy(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Response did not contain the expected text")]
    UnexpectedBody,

    #[error("Connectivity check was dropped before finishing")]
    Aborted,
}

/// Parameters of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub proxy: Option<ProxyEndpoint>,
    pub url: String,
    pub expected_substring: String,
    pub timeout: Duration,
}

impl ProbeRequest {
    pub fn from_config(config: &ConnectivityConfig, proxy: Option<ProxyEndpoint>) -> Self {
        Self {
            proxy,
            url: config.test_url.clone(),
            expected_substring: config.test_substring.clone(),
            timeout: config.timeout(),
        }
    }
}

/// Outcome delivered once per check
pub type ProbeOutcome = Result<(), ProbeError>;

/// One-shot reachability check
#[derive(Debug)]
pub struct ConnectivityProbe {
    client: reqwest::Client,
    request: ProbeRequest,
}

impl ConnectivityProbe {
    /// Builds the HTTP client for `request`
    pub fn new(request: ProbeRequest) -> Result<Self, ProbeError> {
        let mut builder = reqwest::Client::builder();
        builder = match &request.proxy {
            None => builder.no_proxy(),
            Some(endpoint) => {
                let mut proxy = reqwest::Proxy::all(endpoint.url())
                    .map_err(|e| ProbeError::Proxy(e.to_string()))?;
                if let Some(credentials) = &endpoint.credentials {
                    proxy = proxy.basic_auth(&credentials.username, &credentials.password);
                }
                builder.proxy(proxy)
            }
        };
        let client = builder
            .build()
            .map_err(|e| ProbeError::Http(e.to_string()))?;

        Ok(Self { client, request })
    }

    /// Runs the check to completion
    pub async fn run(self) -> ProbeOutcome {
        let timeout = self.request.timeout;
        let proxy = self.request.proxy.as_ref().map(ProxyEndpoint::url);
        debug!(url = %self.request.url, proxy = ?proxy, "Starting connectivity check");

        let outcome = match tokio::time::timeout(timeout, self.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        };

        match &outcome {
            Ok(()) => info!("Connectivity test finished OK"),
            Err(e) => warn!(error = %e, "Connectivity test failed"),
        }
        outcome
    }

    async fn fetch(&self) -> ProbeOutcome {
        let response = self
            .client
            .get(&self.request.url)
            .send()
            .await
            .map_err(|e| ProbeError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Http(e.to_string()))?;
        if body.contains(&self.request.expected_substring) {
            Ok(())
        } else {
            Err(ProbeError::UnexpectedBody)
        }
    }

    /// Spawns the check on the current runtime
    ///
    /// The receiver yields exactly one outcome; the probe is dropped with the
    /// task.
    pub fn start_check(self) -> oneshot::Receiver<ProbeOutcome> {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = self.run().await;
            if tx.send(outcome).is_err() {
                debug!("Connectivity check finished after its receiver was dropped");
            }
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request(server: &MockServer, expected: &str, timeout: Duration) -> ProbeRequest {
        ProbeRequest {
            proxy: None,
            url: format!("{}/cs", server.uri()),
            expected_substring: expected.to_string(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_probe_succeeds_when_body_matches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("-2"))
            .expect(1)
            .mount(&server)
            .await;

        let probe = ConnectivityProbe::new(request(&server, "-2", Duration::from_secs(5))).unwrap();
        assert_eq!(probe.start_check().await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_probe_fails_on_unexpected_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>captive portal</html>"))
            .mount(&server)
            .await;

        let probe = ConnectivityProbe::new(request(&server, "-2", Duration::from_secs(5))).unwrap();
        assert_eq!(probe.run().await, Err(ProbeError::UnexpectedBody));
    }

    #[tokio::test]
    async fn test_probe_fails_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cs"))
            .respond_with(ResponseTemplate::new(503).set_body_string("-2"))
            .mount(&server)
            .await;

        let probe = ConnectivityProbe::new(request(&server, "-2", Duration::from_secs(5))).unwrap();
        assert_eq!(probe.run().await, Err(ProbeError::Status(503)));
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("-2")
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let timeout = Duration::from_millis(100);
        let probe = ConnectivityProbe::new(request(&server, "-2", timeout)).unwrap();
        assert_eq!(probe.run().await, Err(ProbeError::Timeout(timeout)));
    }

    #[tokio::test]
    async fn test_probe_reports_unreachable_host() {
        let req = ProbeRequest {
            proxy: None,
            url: "http://127.0.0.1:1/cs".to_string(),
            expected_substring: "-2".to_string(),
            timeout: Duration::from_secs(5),
        };
        let outcome = ConnectivityProbe::new(req).unwrap().run().await;
        assert!(matches!(outcome, Err(ProbeError::Http(_))));
    }

    #[test]
    fn test_request_from_config() {
        let config = ConnectivityConfig::default();
        let req = ProbeRequest::from_config(&config, None);
        assert_eq!(req.url, config.test_url);
        assert_eq!(req.timeout, Duration::from_secs(30));
    }
}
