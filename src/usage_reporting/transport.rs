//! Report transmission.

use super::config::ResolvedConfig;
use super::proto::Report;
use crate::error::{Error, Result};
use async_trait::async_trait;
use prost::Message;
use reqwest::header::{ACCEPT, CONTENT_TYPE};

/// Sends an encoded report to the ingestion service.
#[async_trait]
pub trait ReportTransport: Send + Sync + 'static {
    async fn send(&self, report: Report) -> Result<()>;
}

/// HTTP POST transport for the ingestion endpoint.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(config: &ResolvedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl ReportTransport for HttpTransport {
    async fn send(&self, report: Report) -> Result<()> {
        let body = bytes::Bytes::from(report.encode_to_vec());
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/protobuf")
            .header("x-api-key", &self.api_key)
            .header(ACCEPT, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ReportRejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
