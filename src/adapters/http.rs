//! HTTP client for service health endpoints

use crate::adapters::{AdapterError, HealthEndpoint, HealthResponse};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Health endpoint reached over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpHealthEndpoint {
    client: Client,
}

impl HttpHealthEndpoint {
    pub fn new() -> Result<Self, AdapterError> {
        let client = Client::builder()
            .user_agent(concat!("shipwright/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AdapterError::Http(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl HealthEndpoint for HttpHealthEndpoint {
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<HealthResponse, AdapterError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout(timeout.as_secs())
                } else {
                    AdapterError::Http(e.to_string())
                }
            })?;

        let status_code = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))?;

        debug!("GET {} -> {} ({} bytes)", url, status_code, body.len());
        Ok(HealthResponse { status_code, body })
    }
}
