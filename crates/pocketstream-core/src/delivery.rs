//! Upload of finalized files to the ingest server.
//!
//! [`SegmentDeliveryClient`] performs one upload. [`DeliveryPool`] runs a fixed set of
//! workers over a queue of [`DeliveryTask`]s and tallies what happened, so the
//! orchestrator can report every failure when the run ends.
//!
//! Submitting never waits: the stderr reader feeding the queue must keep draining ffmpeg's
//! pipe no matter how slow the server is. Only the worker count bounds in-flight uploads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::StatusCode;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::errors::DeliveryError;
use crate::session::{PLAYLIST_CONTENT_TYPE, PLAYLIST_EXTENSION, StreamSession};
use crate::transport::{IngestRequest, IngestTransport};

/// One finalized file waiting for upload. `sequence` is its finalization order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTask {
    pub sequence: u64,
    pub path: PathBuf,
}

pub struct SegmentDeliveryClient {
    session: Arc<StreamSession>,
    transport: Arc<dyn IngestTransport>,
}

impl SegmentDeliveryClient {
    pub fn new(session: Arc<StreamSession>, transport: Arc<dyn IngestTransport>) -> Self {
        Self { session, transport }
    }

    /// Upload the file at `path` and return the server's status, whatever it is.
    /// A file that is gone by now is reported as [`DeliveryError::Missing`] without a request.
    pub async fn deliver(&self, path: &Path) -> Result<StatusCode, DeliveryError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DeliveryError::NoFileName {
                path: path.to_path_buf(),
            })?;
        let data = tokio::fs::read(path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                DeliveryError::Missing(path.to_path_buf())
            } else {
                DeliveryError::Read {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        debug!(
            event = "delivery.uploading",
            domain = "delivery",
            path = %path.display(),
            size_bytes = data.len() as u64
        );
        let request = IngestRequest::post(self.session.upload_url(file_name), self.session.token())
            .with_content_type(content_type_for(file_name))
            .with_body(data);
        let response =
            self.transport
                .post(request)
                .await
                .map_err(|source| DeliveryError::Transport {
                    path: path.to_path_buf(),
                    source,
                })?;
        if response.status.is_success() {
            info!(
                event = "delivery.uploaded",
                domain = "delivery",
                path = %path.display(),
                status = %response.status
            );
        } else {
            error!(
                event = "delivery.rejected",
                domain = "delivery",
                path = %path.display(),
                status = %response.status,
                body = %response.body
            );
        }
        Ok(response.status)
    }
}

pub fn content_type_for(file_name: &str) -> Option<&'static str> {
    file_name
        .ends_with(PLAYLIST_EXTENSION)
        .then_some(PLAYLIST_CONTENT_TYPE)
}

/// Tally of delivery outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// The server answered with a non-success status.
    pub rejected: usize,
    /// The file was gone before it could be read.
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<String>,
}

impl DeliveryReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.rejected + self.skipped + self.failed
    }

    fn record(&mut self, task: &DeliveryTask, result: Result<StatusCode, DeliveryError>) {
        match result {
            Ok(status) if status.is_success() => self.delivered += 1,
            Ok(status) => {
                self.rejected += 1;
                self.failures
                    .push(format!("{}: status {status}", task.path.display()));
            }
            Err(err @ DeliveryError::Missing(_)) => {
                error!(
                    event = "delivery.skipped",
                    domain = "delivery",
                    sequence = task.sequence,
                    error = %err
                );
                self.skipped += 1;
            }
            Err(err) => {
                error!(
                    event = "delivery.failed",
                    domain = "delivery",
                    sequence = task.sequence,
                    error = %err
                );
                self.failed += 1;
                self.failures.push(err.to_string());
            }
        }
    }

    fn merge(&mut self, other: DeliveryReport) {
        self.delivered += other.delivered;
        self.rejected += other.rejected;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.failures.extend(other.failures);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPoolConfig {
    /// Maximum number of uploads in flight at once.
    pub workers: usize,
}

impl Default for DeliveryPoolConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Fixed pool of upload workers fed through an unbounded channel.
pub struct DeliveryPool {
    sender: mpsc::UnboundedSender<DeliveryTask>,
    workers: Vec<JoinHandle<DeliveryReport>>,
}

impl DeliveryPool {
    pub fn start(client: Arc<SegmentDeliveryClient>, config: DeliveryPoolConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let client = Arc::clone(&client);
                let receiver = Arc::clone(&receiver);
                tokio::spawn(run_worker(worker, client, receiver))
            })
            .collect();
        Self { sender, workers }
    }

    /// Handle for submitting tasks. The pool drains once every handle is dropped.
    pub fn sender(&self) -> mpsc::UnboundedSender<DeliveryTask> {
        self.sender.clone()
    }

    /// Close the queue, wait for queued and in-flight uploads, and merge the worker tallies.
    pub async fn finish(self) -> DeliveryReport {
        drop(self.sender);
        let mut report = DeliveryReport::default();
        for joined in futures::future::join_all(self.workers).await {
            match joined {
                Ok(worker_report) => report.merge(worker_report),
                Err(err) => {
                    error!(
                        event = "delivery.worker_crashed",
                        domain = "delivery",
                        error = %err
                    );
                    report.failed += 1;
                    report.failures.push(format!("delivery worker crashed: {err}"));
                }
            }
        }
        report
    }
}

async fn run_worker(
    worker: usize,
    client: Arc<SegmentDeliveryClient>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<DeliveryTask>>>,
) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };
        debug!(
            event = "delivery.task_started",
            domain = "delivery",
            worker = worker,
            sequence = task.sequence
        );
        let result = client.deliver(&task.path).await;
        report.record(&task, result);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::session::test_session;
    use crate::transport::mock::MockTransport;

    fn client_for(dir: &Path, transport: Arc<MockTransport>) -> Arc<SegmentDeliveryClient> {
        Arc::new(SegmentDeliveryClient::new(
            Arc::new(test_session("https://example.com/", Some(dir))),
            transport,
        ))
    }

    #[tokio::test]
    async fn segment_upload_has_no_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream0.ts");
        std::fs::write(&path, b"segment bytes").unwrap();
        let transport = Arc::new(MockTransport::new());
        let status = client_for(dir.path(), transport.clone())
            .deliver(&path)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].url,
            "https://example.com/api/stream/upload/stream0.ts"
        );
        assert_eq!(requests[0].authorization, "secret-token");
        assert_eq!(requests[0].content_type, None);
        assert_eq!(requests[0].body, b"segment bytes");
    }

    #[tokio::test]
    async fn playlist_upload_is_tagged_as_mpegurl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.m3u8");
        std::fs::write(&path, "#EXTM3U\n").unwrap();
        let transport = Arc::new(MockTransport::new());
        client_for(dir.path(), transport.clone())
            .deliver(&path)
            .await
            .unwrap();
        let requests = transport.requests();
        assert_eq!(
            requests[0].url,
            "https://example.com/api/stream/upload/stream.m3u8"
        );
        assert_eq!(
            requests[0].content_type,
            Some("application/vnd.apple.mpegurl")
        );
    }

    #[tokio::test]
    async fn deleted_file_is_skipped_without_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream4.ts");
        let transport = Arc::new(MockTransport::new());
        let err = client_for(dir.path(), transport.clone())
            .deliver(&path)
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Missing(_)));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn rejected_status_is_returned_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream1.ts");
        std::fs::write(&path, b"x").unwrap();
        let transport = Arc::new(MockTransport::new().reply(StatusCode::UNAUTHORIZED, "nope"));
        let status = client_for(dir.path(), transport)
            .deliver(&path)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn pool_keeps_going_after_individual_failures() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["stream0.ts", "stream1.ts", "stream2.ts"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        let transport = Arc::new(
            MockTransport::new()
                .fail(TransportError::Transport("connection reset".into()))
                .reply(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        );
        let pool = DeliveryPool::start(
            client_for(dir.path(), transport.clone()),
            DeliveryPoolConfig { workers: 1 },
        );
        let sender = pool.sender();
        for (sequence, name) in ["stream0.ts", "stream1.ts", "missing.ts", "stream2.ts"]
            .into_iter()
            .enumerate()
        {
            sender
                .send(DeliveryTask {
                    sequence: sequence as u64,
                    path: dir.path().join(name),
                })
                .unwrap();
        }
        drop(sender);
        let report = pool.finish().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.attempted(), 4);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn rejected_and_skipped_uploads_reach_the_error_log() {
        use tracing_subscriber::layer::SubscriberExt as _;

        use crate::observability::{ERROR_LOG_FILE, error_log_writer, persisted_error_layer};

        let log_dir = tempfile::tempdir().unwrap();
        let subscriber = tracing_subscriber::registry()
            .with(persisted_error_layer(error_log_writer(log_dir.path()).unwrap()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("stream1.ts");
        std::fs::write(&present, b"x").unwrap();
        let transport = Arc::new(
            MockTransport::new().reply(StatusCode::INTERNAL_SERVER_ERROR, "ingest down"),
        );
        let client = client_for(dir.path(), transport);
        let mut report = DeliveryReport::default();
        for (sequence, path) in [present, dir.path().join("stream2.ts")].into_iter().enumerate() {
            let task = DeliveryTask {
                sequence: sequence as u64,
                path,
            };
            let result = client.deliver(&task.path).await;
            report.record(&task, result);
        }
        assert_eq!((report.rejected, report.skipped), (1, 1));

        let logged = std::fs::read_to_string(log_dir.path().join(ERROR_LOG_FILE)).unwrap();
        assert!(logged.contains("delivery.rejected"), "{logged}");
        assert!(logged.contains("ingest down"), "{logged}");
        assert!(logged.contains("delivery.skipped"), "{logged}");
    }

    #[tokio::test]
    async fn pool_with_many_workers_delivers_everything() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MockTransport::new());
        let pool = DeliveryPool::start(
            client_for(dir.path(), transport.clone()),
            DeliveryPoolConfig { workers: 3 },
        );
        let sender = pool.sender();
        for i in 0..10u64 {
            let path = dir.path().join(format!("stream{i}.ts"));
            std::fs::write(&path, b"x").unwrap();
            sender.send(DeliveryTask { sequence: i, path }).unwrap();
        }
        drop(sender);
        let report = pool.finish().await;
        assert_eq!(report.delivered, 10);
        let mut urls = transport.urls();
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), 10);
    }
}
