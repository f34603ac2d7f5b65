// reqwest-backed HttpProbe

use async_trait::async_trait;
use shiparr_core::error::{AppError, Result};
use shiparr_core::port::{HttpProbe, ProbeError};
use std::time::Duration;

/// Healthcheck client
///
/// Certificates are not verified: probes target the unit's own endpoints,
/// which commonly serve self-signed certificates.
pub struct ReqwestHttpProbe {
    client: reqwest::Client,
}

impl ReqwestHttpProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .user_agent(concat!("shiparr/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpProbe for ReqwestHttpProbe {
    async fn get_status(
        &self,
        url: &str,
        timeout: Duration,
    ) -> std::result::Result<u16, ProbeError> {
        match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) if e.is_timeout() => Err(ProbeError::Timeout {
                url: url.to_string(),
            }),
            Err(e) => Err(ProbeError::Request {
                url: url.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
