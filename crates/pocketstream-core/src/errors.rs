use std::path::PathBuf;

use reqwest::StatusCode;

/// Invalid run configuration, detected before anything is contacted or spawned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("no token specified")]
    MissingToken,
    #[error("no RTMP source specified")]
    MissingSource,
    #[error("invalid RTMP source {value:?}: {reason}")]
    InvalidSource { value: String, reason: String },
    #[error("no destination specified")]
    MissingDestination,
    #[error("invalid destination URL {value:?}: {reason}")]
    InvalidDestination { value: String, reason: String },
    #[error("invalid segment duration {value:?}")]
    InvalidSegmentDuration { value: String },
    #[error("invalid (negative) segment duration {value:?}")]
    NegativeSegmentDuration { value: String },
    #[error("no output directory specified for local-file delivery")]
    MissingOutputDirectory,
}

/// Failure to build or send a single HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be constructed (bad URL, invalid header value, client setup).
    #[error("request construction failed: {0}")]
    Request(String),
    /// The request was built but sending it or reading the response failed.
    #[error("transport failed: {0}")]
    Transport(String),
}

/// The remote server did not acknowledge the session start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("server responded with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The OS socket table could not be read, so readiness cannot be determined at all.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to read socket table {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed socket table {path} line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("socket table read did not complete: {0}")]
    Interrupted(String),
}

/// Failure of one delivery task. Never affects sibling deliveries.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("file at {0} doesn't exist")]
    Missing(PathBuf),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} has no file name")]
    NoFileName { path: PathBuf },
    #[error("upload of {path} failed: {source}")]
    Transport {
        path: PathBuf,
        #[source]
        source: TransportError,
    },
}

/// Failure while preparing, launching or waiting on the external tool.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("error creating output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} was launched without a piped stderr")]
    MissingDiagnostics { program: String },
    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Fatal failure of a run. Every variant maps to a non-zero process exit.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("stream start failed: {0}")]
    Start(#[from] StartError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("readiness check failed: {0}")]
    Probe(#[from] ProbeError),
}
