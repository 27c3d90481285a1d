//! Background consumer of ffmpeg's stderr in local-file mode.

use tokio::io::{AsyncBufRead, AsyncBufReadExt as _};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::delivery::DeliveryTask;
use crate::parser::{DiagnosticParser, PendingSegment, SegmentObservation};

/// What the consumer saw before the stream ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailReport {
    pub lines: u64,
    pub observations: u64,
    pub dispatched: u64,
    /// Last observation, never finalized because no later one arrived.
    pub pending: Option<SegmentObservation>,
    pub read_error: Option<String>,
}

/// Read `reader` line by line until EOF, forwarding every finalized observation to `tasks`.
/// Forwarding never waits on uploads, so a slow server cannot stall the reader.
///
/// Lines are decoded lossily since ffmpeg echoes stream metadata verbatim. With `echo` set,
/// each line is mirrored to this process's stderr.
pub async fn tail_diagnostics<R, P>(
    mut reader: R,
    parser: &P,
    tasks: mpsc::UnboundedSender<DeliveryTask>,
    echo: bool,
) -> TailReport
where
    R: AsyncBufRead + Unpin,
    P: DiagnosticParser + ?Sized,
{
    let mut report = TailReport::default();
    let mut pending = PendingSegment::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(
                    event = "tail.read_failed",
                    domain = "tail",
                    error = %err,
                    "diagnostic stream lost; no further segments will be delivered"
                );
                report.read_error = Some(err.to_string());
                break;
            }
        }
        let decoded = String::from_utf8_lossy(&buf);
        let line = decoded.trim_end_matches(['\r', '\n']);
        report.lines += 1;
        if echo {
            eprintln!("{line}");
        }
        let Some(observation) = parser.parse(line) else {
            continue;
        };
        report.observations += 1;
        debug!(
            event = "tail.segment_observed",
            domain = "tail",
            path = %observation.path().display()
        );
        let Some(finalized) = pending.advance(observation) else {
            continue;
        };
        let task = DeliveryTask {
            sequence: report.dispatched,
            path: finalized.into_path(),
        };
        if let Err(mpsc::error::SendError(task)) = tasks.send(task) {
            warn!(
                event = "tail.dispatch_dropped",
                domain = "tail",
                path = %task.path.display(),
                "delivery queue closed"
            );
            continue;
        }
        report.dispatched += 1;
    }
    report.pending = pending.into_pending();
    report
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::delivery::{DeliveryPool, DeliveryPoolConfig, SegmentDeliveryClient};
    use crate::parser::HlsOpeningParser;
    use crate::session::test_session;
    use crate::transport::mock::StalledTransport;

    fn opening(path: &str) -> String {
        format!("[hls @ 0x55d5c8a0] Opening '{path}' for writing\n")
    }

    async fn run(input: String) -> (TailReport, Vec<DeliveryTask>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let collector = tokio::spawn(async move {
            let mut tasks = Vec::new();
            while let Some(task) = rx.recv().await {
                tasks.push(task);
            }
            tasks
        });
        let report = tail_diagnostics(input.as_bytes(), &HlsOpeningParser, tx, false).await;
        (report, collector.await.unwrap())
    }

    #[tokio::test]
    async fn n_observations_yield_n_minus_one_deliveries() {
        let mut input = String::from("ffmpeg version 6.1 Copyright (c) 2000-2023\n");
        for i in 0..5 {
            input.push_str(&opening(&format!("out/stream{i}.ts.tmp")));
            input.push_str("frame=   60 fps=30 q=-1.0 size=N/A time=00:00:02.00\n");
        }
        let (report, tasks) = run(input).await;
        assert_eq!(report.observations, 5);
        assert_eq!(report.dispatched, 4);
        assert_eq!(tasks.len(), 4);
        let paths: Vec<PathBuf> = tasks.iter().map(|t| t.path.clone()).collect();
        let expected: Vec<PathBuf> = (0..4)
            .map(|i| PathBuf::from(format!("out/stream{i}.ts")))
            .collect();
        assert_eq!(paths, expected);
        assert_eq!(
            tasks.iter().map(|t| t.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(
            report.pending,
            Some(SegmentObservation::new("out/stream4.ts"))
        );
        assert_eq!(report.lines, 11);
    }

    #[tokio::test]
    async fn playlist_is_delivered_when_next_segment_opens() {
        let input = [
            opening("out/stream0.ts"),
            opening("out/stream.m3u8.tmp"),
            opening("out/stream1.ts"),
        ]
        .concat();
        let (report, tasks) = run(input).await;
        assert_eq!(
            tasks.iter().map(|t| t.path.clone()).collect::<Vec<_>>(),
            vec![
                PathBuf::from("out/stream0.ts"),
                PathBuf::from("out/stream.m3u8")
            ]
        );
        assert_eq!(
            report.pending,
            Some(SegmentObservation::new("out/stream1.ts"))
        );
    }

    #[tokio::test]
    async fn single_observation_is_never_dispatched() {
        let (report, tasks) = run(opening("out/stream0.ts")).await;
        assert!(tasks.is_empty());
        assert_eq!(report.dispatched, 0);
        assert!(report.pending.is_some());
    }

    #[tokio::test]
    async fn non_utf8_and_unterminated_lines_are_tolerated() {
        let mut bytes = b"title : caf\xe9\n".to_vec();
        bytes.extend_from_slice(opening("a.ts").as_bytes());
        bytes.extend_from_slice(b"[hls @ 0x1] Opening 'b.ts' for writing");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = tail_diagnostics(bytes.as_slice(), &HlsOpeningParser, tx, false).await;
        assert_eq!(report.lines, 3);
        assert_eq!(rx.recv().await.unwrap().path, PathBuf::from("a.ts"));
    }

    #[tokio::test]
    async fn closed_queue_does_not_stop_the_reader() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let input = [opening("a.ts"), opening("b.ts"), opening("c.ts")].concat();
        let report = tail_diagnostics(input.as_bytes(), &HlsOpeningParser, tx, false).await;
        assert_eq!(report.observations, 3);
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.pending, Some(SegmentObservation::new("c.ts")));
    }

    #[tokio::test]
    async fn stalled_server_does_not_stop_the_reader() {
        let dir = tempfile::tempdir().unwrap();
        let mut input = String::new();
        for i in 0..10 {
            let path = dir.path().join(format!("stream{i}.ts"));
            std::fs::write(&path, b"x").unwrap();
            input.push_str(&opening(&path.display().to_string()));
        }
        let transport = Arc::new(StalledTransport);
        let client = Arc::new(SegmentDeliveryClient::new(
            Arc::new(test_session("https://example.com", Some(dir.path()))),
            transport,
        ));
        let pool = DeliveryPool::start(client, DeliveryPoolConfig { workers: 1 });

        let report = tokio::time::timeout(
            Duration::from_secs(2),
            tail_diagnostics(input.as_bytes(), &HlsOpeningParser, pool.sender(), false),
        )
        .await
        .expect("reader reaches EOF while every upload hangs");
        assert_eq!(report.observations, 10);
        assert_eq!(report.dispatched, 9);
    }
}
