//! HTTP health oracle.
//!
//! Probes `http://{member.address}{endpoint}` and maps the response:
//! 2xx is HEALTHY, any other status is UNHEALTHY, and a refused or timed
//! out connection is UNKNOWN since the member may still be booting.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use fleetroll_core::config::{HttpHealthConfig, resolve_duration};
use fleetroll_core::{CollaboratorError, ConfigError, FleetMember, HealthStatus};

use crate::oracle::HealthOracle;

/// Health oracle that probes each member's HTTP endpoint directly.
#[derive(Debug, Clone)]
pub struct HttpHealthOracle {
    endpoint: String,
    timeout: Duration,
}

impl HttpHealthOracle {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }

    /// Build from the `[health]` section of `fleet.toml`.
    pub fn from_config(config: &HttpHealthConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            endpoint: config.endpoint.clone().unwrap_or(defaults.endpoint),
            timeout: resolve_duration("health.timeout", config.timeout.as_deref(), defaults.timeout)?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for HttpHealthOracle {
    fn default() -> Self {
        Self::new("/healthz", Duration::from_secs(2))
    }
}

#[async_trait]
impl HealthOracle for HttpHealthOracle {
    async fn check(&self, member: &FleetMember) -> Result<HealthStatus, CollaboratorError> {
        let address = member.address.as_deref().ok_or_else(|| {
            CollaboratorError::Permanent(format!("member {} has no probe address", member.id))
        })?;
        http_probe(address, &self.endpoint, self.timeout).await
    }
}

/// Perform a single HTTP GET against `address` + `path`.
pub async fn http_probe(
    address: &str,
    path: &str,
    timeout: Duration,
) -> Result<HealthStatus, CollaboratorError> {
    let uri = format!("http://{address}{path}");
    let req = http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", address)
        .header("user-agent", "fleetroll-health/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .map_err(|e| CollaboratorError::Permanent(format!("invalid probe request {uri}: {e}")))?;

    let result = tokio::time::timeout(timeout, async {
        let stream = match tokio::net::TcpStream::connect(address).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %uri, "health probe connection failed");
                return HealthStatus::Unknown;
            }
        };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "health probe handshake failed");
                return HealthStatus::Unknown;
            }
        };

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => HealthStatus::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "health probe non-2xx");
                HealthStatus::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, %uri, "health probe request failed");
                HealthStatus::Unknown
            }
        }
    })
    .await;

    match result {
        Ok(status) => Ok(status),
        Err(_) => {
            debug!(%uri, "health probe timed out");
            Ok(HealthStatus::Unknown)
        }
    }
}
