use std::sync::Arc;

use reqwest::StatusCode;
use tracing::{error, info};

use crate::errors::StartError;
use crate::session::StreamSession;
use crate::transport::{IngestRequest, IngestTransport};

/// Tells the ingest server a session is starting. Must succeed before ffmpeg is launched.
pub struct LifecycleNotifier {
    transport: Arc<dyn IngestTransport>,
}

impl LifecycleNotifier {
    pub fn new(transport: Arc<dyn IngestTransport>) -> Self {
        Self { transport }
    }

    /// POST the start endpoint. Anything but `200 OK` is an error carrying the response body.
    pub async fn notify_start(&self, session: &StreamSession) -> Result<(), StartError> {
        let url = session.start_url();
        info!(
            event = "session.start_requested",
            domain = "lifecycle",
            url = %url
        );
        let response = self
            .transport
            .post(IngestRequest::post(url, session.token()))
            .await
            .inspect_err(|err| {
                error!(
                    event = "session.start_failed",
                    domain = "lifecycle",
                    error = %err
                );
            })?;
        if response.status != StatusCode::OK {
            error!(
                event = "session.start_rejected",
                domain = "lifecycle",
                status = %response.status,
                body = %response.body
            );
            return Err(StartError::Rejected {
                status: response.status,
                body: response.body,
            });
        }
        info!(
            event = "session.start_acknowledged",
            domain = "lifecycle",
            status = %response.status
        );
        Ok(())
    }
}
