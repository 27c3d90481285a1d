//! Relay a live RTMP stream to a remote HLS ingest server through ffmpeg.
//!
//! ffmpeg does the media work. This crate announces the session to the server, launches
//! ffmpeg, confirms it is listening, and in local-file mode discovers finished segments
//! from ffmpeg's stderr and uploads them.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use pocketstream_core::{Orchestrator, ReqwestTransport, SessionArgs, StreamSession};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = StreamSession::validate(SessionArgs {
//!     token: "OBHWYICqacQK2yFQGdQNe72O752SBVti3sU5w-Ri8KM=".into(),
//!     source: "localhost:9000".into(),
//!     destination: "https://example.com".into(),
//!     segment_duration: "2".into(),
//!     output_directory: Some("stream".into()),
//!     ..SessionArgs::default()
//! })?;
//! let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(30))?);
//! let summary = Orchestrator::new(transport).run(session).await?;
//! println!("ffmpeg exited with {}", summary.exit_status);
//! # Ok(())
//! # }
//! ```

pub mod delivery;
pub mod errors;
pub mod notifier;
pub mod observability;
pub mod orchestrator;
pub mod parser;
pub mod readiness;
pub mod session;
pub mod supervisor;
pub mod tail;
pub mod transport;

pub use delivery::{
    DeliveryPool, DeliveryPoolConfig, DeliveryReport, DeliveryTask, SegmentDeliveryClient,
};
pub use errors::{
    ConfigError, DeliveryError, PipelineError, ProbeError, StartError, SupervisorError,
    TransportError,
};
pub use notifier::LifecycleNotifier;
pub use observability::{ObservabilityConfig, init_observability};
pub use orchestrator::{Orchestrator, RunSummary};
pub use parser::{DiagnosticParser, HlsOpeningParser, PendingSegment, SegmentObservation};
pub use readiness::{ProbeOutcome, ProbePolicy, ProcNetSocketTable, ReadinessProbe, SocketTable};
pub use session::{DeliveryMode, SegmentDuration, SessionArgs, StreamSession};
pub use supervisor::{ProcessSupervisor, ToolConfig};
pub use tail::TailReport;
pub use transport::{IngestRequest, IngestResponse, IngestTransport, ReqwestTransport};
