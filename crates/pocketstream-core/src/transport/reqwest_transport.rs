use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderValue};

use super::{IngestRequest, IngestResponse, IngestTransport};
use crate::errors::TransportError;

const USER_AGENT: &str = concat!("pocketstream/", env!("CARGO_PKG_VERSION"));

/// Default transport backed by a pooled async reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl IngestTransport for ReqwestTransport {
    async fn post(&self, request: IngestRequest) -> Result<IngestResponse, TransportError> {
        let authorization = HeaderValue::from_str(&request.authorization)
            .map_err(|e| TransportError::Request(format!("invalid authorization header: {e}")))?;
        let mut builder = self
            .client
            .post(&request.url)
            .header(AUTHORIZATION, authorization)
            .body(request.body);
        if let Some(content_type) = request.content_type {
            builder = builder.header(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        let http_request = builder
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let response = self
            .client
            .execute(http_request)
            .await
            .map_err(|e| TransportError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Ok(IngestResponse { status, body })
    }
}
