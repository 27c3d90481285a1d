//! Run sequencing: notify start, launch ffmpeg, confirm readiness, deliver, wait for exit.

use std::process::ExitStatus;
use std::sync::Arc;

use tokio::io::BufReader;
use tracing::{Instrument as _, error, info, info_span, warn};
use uuid::Uuid;

use crate::delivery::{DeliveryPool, DeliveryPoolConfig, DeliveryReport, SegmentDeliveryClient};
use crate::errors::{PipelineError, SupervisorError};
use crate::notifier::LifecycleNotifier;
use crate::parser::{DiagnosticParser, HlsOpeningParser};
use crate::readiness::{ProbeOutcome, ProbePolicy, ProcNetSocketTable, ReadinessProbe, SocketTable};
use crate::session::{DeliveryMode, SessionArgs, StreamSession};
use crate::supervisor::{ProcessSupervisor, ToolConfig};
use crate::tail::{TailReport, tail_diagnostics};
use crate::transport::IngestTransport;

/// How a run ended once ffmpeg exited.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub mode: DeliveryMode,
    pub exit_status: ExitStatus,
    pub readiness: ProbeOutcome,
    /// Local-file mode only.
    pub tail: Option<TailReport>,
    /// Local-file mode only.
    pub deliveries: Option<DeliveryReport>,
}

pub struct Orchestrator {
    transport: Arc<dyn IngestTransport>,
    socket_table: Arc<dyn SocketTable>,
    probe_policy: ProbePolicy,
    tool: ToolConfig,
    delivery: DeliveryPoolConfig,
    parser: Arc<dyn DiagnosticParser>,
    echo_diagnostics: bool,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn IngestTransport>) -> Self {
        Self {
            transport,
            socket_table: Arc::new(ProcNetSocketTable::default()),
            probe_policy: ProbePolicy::default(),
            tool: ToolConfig::default(),
            delivery: DeliveryPoolConfig::default(),
            parser: Arc::new(HlsOpeningParser),
            echo_diagnostics: true,
        }
    }

    pub fn with_socket_table(mut self, socket_table: Arc<dyn SocketTable>) -> Self {
        self.socket_table = socket_table;
        self
    }

    pub fn with_probe_policy(mut self, probe_policy: ProbePolicy) -> Self {
        self.probe_policy = probe_policy;
        self
    }

    pub fn with_tool(mut self, tool: ToolConfig) -> Self {
        self.tool = tool;
        self
    }

    pub fn with_delivery_pool(mut self, delivery: DeliveryPoolConfig) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn DiagnosticParser>) -> Self {
        self.parser = parser;
        self
    }

    /// Mirror ffmpeg's stderr to the console in local-file mode (default on).
    pub fn with_echo_diagnostics(mut self, echo: bool) -> Self {
        self.echo_diagnostics = echo;
        self
    }

    /// Validate raw arguments, then [`run`](Self::run).
    pub async fn run_args(&self, args: SessionArgs) -> Result<RunSummary, PipelineError> {
        let session = StreamSession::validate(args).inspect_err(|err| {
            error!(event = "session.invalid", domain = "config", error = %err);
        })?;
        self.run(session).await
    }

    /// Drive one run to completion. Returns once ffmpeg has exited and queued uploads drained.
    pub async fn run(&self, session: StreamSession) -> Result<RunSummary, PipelineError> {
        let run_id = Uuid::new_v4();
        let span = info_span!("stream_run", run_id = %run_id, mode = ?session.mode());
        self.run_inner(run_id, Arc::new(session))
            .instrument(span)
            .await
            .inspect_err(|err| {
                error!(
                    event = "run.failed",
                    domain = "orchestrator",
                    run_id = %run_id,
                    error = %err
                );
            })
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        session: Arc<StreamSession>,
    ) -> Result<RunSummary, PipelineError> {
        info!(
            event = "run.starting",
            domain = "orchestrator",
            session = ?session
        );
        LifecycleNotifier::new(Arc::clone(&self.transport))
            .notify_start(&session)
            .await?;

        let supervisor = ProcessSupervisor::new(self.tool.clone());
        supervisor.prepare(&session).await?;
        let mut process = supervisor.launch(&session)?;

        let tailing = match session.mode() {
            DeliveryMode::SelfPush => None,
            DeliveryMode::LocalFile => {
                let stderr =
                    process
                        .take_diagnostics()
                        .ok_or_else(|| SupervisorError::MissingDiagnostics {
                            program: process.program().to_string(),
                        })?;
                let client = Arc::new(SegmentDeliveryClient::new(
                    Arc::clone(&session),
                    Arc::clone(&self.transport),
                ));
                let pool = DeliveryPool::start(client, self.delivery);
                let tasks = pool.sender();
                let parser = Arc::clone(&self.parser);
                let echo = self.echo_diagnostics;
                let reader = tokio::spawn(
                    async move {
                        tail_diagnostics(BufReader::new(stderr), parser.as_ref(), tasks, echo).await
                    }
                    .in_current_span(),
                );
                Some((reader, pool))
            }
        };

        let readiness = ReadinessProbe::new(Arc::clone(&self.socket_table), self.probe_policy)
            .wait_until_bound(session.source())
            .await?;
        info!(event = "pipeline.ready", domain = "orchestrator", "PocketStream is ready");

        let exit_status = process.wait().await?;

        let (tail, deliveries) = match tailing {
            None => (None, None),
            Some((reader, pool)) => {
                let tail = match reader.await {
                    Ok(report) => report,
                    Err(err) => {
                        error!(event = "tail.crashed", domain = "tail", error = %err);
                        TailReport {
                            read_error: Some(err.to_string()),
                            ..TailReport::default()
                        }
                    }
                };
                if let Some(pending) = &tail.pending {
                    info!(
                        event = "tail.pending_undelivered",
                        domain = "tail",
                        path = %pending.path().display(),
                        "last observed file was never finalized and is not uploaded"
                    );
                }
                let deliveries = pool.finish().await;
                (Some(tail), Some(deliveries))
            }
        };

        let summary = RunSummary {
            run_id,
            mode: session.mode(),
            exit_status,
            readiness,
            tail,
            deliveries,
        };
        log_summary(&summary);
        Ok(summary)
    }
}

fn log_summary(summary: &RunSummary) {
    let Some(report) = &summary.deliveries else {
        info!(
            event = "run.finished",
            domain = "orchestrator",
            exit_status = %summary.exit_status,
            readiness_confirmed = summary.readiness.is_confirmed()
        );
        return;
    };
    let observations = summary.tail.as_ref().map_or(0, |t| t.observations);
    if report.failures.is_empty() {
        info!(
            event = "run.finished",
            domain = "orchestrator",
            exit_status = %summary.exit_status,
            readiness_confirmed = summary.readiness.is_confirmed(),
            observations = observations,
            delivered = report.delivered,
            skipped = report.skipped
        );
    } else {
        warn!(
            event = "run.finished",
            domain = "orchestrator",
            exit_status = %summary.exit_status,
            readiness_confirmed = summary.readiness.is_confirmed(),
            observations = observations,
            delivered = report.delivered,
            rejected = report.rejected,
            skipped = report.skipped,
            failed = report.failed,
            failures = ?report.failures
        );
    }
}
