//! HTTP client seam shared by the notifier and the delivery workers.
//! Construct one transport per run and pass it around as `Arc<dyn IngestTransport>`.

mod reqwest_transport;

use reqwest::StatusCode;

use crate::errors::TransportError;

pub use reqwest_transport::ReqwestTransport;

/// One POST against the ingest server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub url: String,
    /// Sent verbatim as the `Authorization` header value.
    pub authorization: String,
    pub content_type: Option<&'static str>,
    pub body: Vec<u8>,
}

impl IngestRequest {
    pub fn post(url: impl Into<String>, authorization: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            authorization: authorization.into(),
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_content_type(mut self, content_type: Option<&'static str>) -> Self {
        self.content_type = content_type;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestResponse {
    pub status: StatusCode,
    pub body: String,
}

#[async_trait::async_trait]
pub trait IngestTransport: Send + Sync {
    async fn post(&self, request: IngestRequest) -> Result<IngestResponse, TransportError>;
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Records every request and answers from a script, falling back to 200 OK.
    #[derive(Default)]
    pub struct MockTransport {
        requests: Mutex<Vec<IngestRequest>>,
        replies: Mutex<VecDeque<Result<IngestResponse, TransportError>>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, status: StatusCode, body: &str) -> Self {
            self.replies.lock().unwrap().push_back(Ok(IngestResponse {
                status,
                body: body.to_string(),
            }));
            self
        }

        pub fn fail(self, err: TransportError) -> Self {
            self.replies.lock().unwrap().push_back(Err(err));
            self
        }

        pub fn requests(&self) -> Vec<IngestRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn urls(&self) -> Vec<String> {
            self.requests().into_iter().map(|r| r.url).collect()
        }
    }

    #[async_trait::async_trait]
    impl IngestTransport for MockTransport {
        async fn post(&self, request: IngestRequest) -> Result<IngestResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            self.replies.lock().unwrap().pop_front().unwrap_or(Ok(IngestResponse {
                status: StatusCode::OK,
                body: String::new(),
            }))
        }
    }

    /// Accepts every request and never answers.
    pub struct StalledTransport;

    #[async_trait::async_trait]
    impl IngestTransport for StalledTransport {
        async fn post(&self, _request: IngestRequest) -> Result<IngestResponse, TransportError> {
            std::future::pending().await
        }
    }
}
