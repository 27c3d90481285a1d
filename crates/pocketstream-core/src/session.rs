//! Validated, immutable configuration for one streaming run.

use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

use crate::errors::ConfigError;

pub const START_ENDPOINT: &str = "/api/stream/start";
pub const UPLOAD_ENDPOINT: &str = "/api/stream/upload/";
pub const PLAYLIST_NAME: &str = "stream.m3u8";
pub const PLAYLIST_EXTENSION: &str = ".m3u8";
pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

pub const DEFAULT_SOURCE: &str = "localhost:9000";
pub const DEFAULT_SEGMENT_DURATION: &str = "2";
pub const DEFAULT_OUTPUT_DIRECTORY: &str = "stream";

/// Who performs the HTTP upload of segments and playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// ffmpeg POSTs every segment and playlist revision itself.
    SelfPush,
    /// ffmpeg writes to a local directory; segments are tailed from its stderr and uploaded here.
    LocalFile,
}

/// Unvalidated values as they come from the command line or environment.
#[derive(Debug, Clone, Default)]
pub struct SessionArgs {
    pub token: String,
    pub source: String,
    pub destination: String,
    pub segment_duration: String,
    pub output_directory: Option<PathBuf>,
    pub self_push: bool,
    pub persist_errors: bool,
}

/// Target segment length in seconds. Fractional, never negative.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct SegmentDuration(f64);

impl SegmentDuration {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidSegmentDuration {
                value: raw.to_string(),
            })?;
        if !value.is_finite() {
            return Err(ConfigError::InvalidSegmentDuration {
                value: raw.to_string(),
            });
        }
        if value < 0.0 {
            return Err(ConfigError::NegativeSegmentDuration {
                value: raw.to_string(),
            });
        }
        Ok(Self(value))
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for SegmentDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for one run. Built once by [`StreamSession::validate`] and never mutated.
#[derive(Clone)]
pub struct StreamSession {
    source: String,
    destination: String,
    token: String,
    segment_duration: SegmentDuration,
    output_directory: Option<PathBuf>,
    mode: DeliveryMode,
    persist_errors: bool,
}

impl StreamSession {
    /// Validate raw arguments. The destination's trailing slashes are stripped so endpoint
    /// paths can be appended directly.
    pub fn validate(args: SessionArgs) -> Result<Self, ConfigError> {
        let token = args.token.trim();
        if token.is_empty() {
            return Err(ConfigError::MissingToken);
        }
        let source = validate_source(&args.source)?;
        let destination = validate_destination(&args.destination)?;
        let segment_duration = SegmentDuration::parse(&args.segment_duration)?;
        let mode = if args.self_push {
            DeliveryMode::SelfPush
        } else {
            DeliveryMode::LocalFile
        };
        let output_directory = args
            .output_directory
            .filter(|dir| !dir.as_os_str().is_empty());
        if mode == DeliveryMode::LocalFile && output_directory.is_none() {
            return Err(ConfigError::MissingOutputDirectory);
        }
        Ok(Self {
            source,
            destination,
            token: token.to_string(),
            segment_duration,
            output_directory,
            mode,
            persist_errors: args.persist_errors,
        })
    }

    /// Ingest address as `host:port`.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Destination base URL without trailing slash.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn segment_duration(&self) -> SegmentDuration {
        self.segment_duration
    }

    pub fn output_directory(&self) -> Option<&Path> {
        self.output_directory.as_deref()
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn persist_errors(&self) -> bool {
        self.persist_errors
    }

    pub fn rtmp_input(&self) -> String {
        format!("rtmp://{}", self.source)
    }

    pub fn start_url(&self) -> String {
        format!("{}{}", self.destination, START_ENDPOINT)
    }

    pub fn upload_url(&self, file_name: &str) -> String {
        format!("{}{}{}", self.destination, UPLOAD_ENDPOINT, file_name)
    }

    pub fn playlist_upload_url(&self) -> String {
        self.upload_url(PLAYLIST_NAME)
    }

    /// Local playlist path; `None` in self-push mode.
    pub fn playlist_path(&self) -> Option<PathBuf> {
        self.output_directory
            .as_ref()
            .map(|dir| dir.join(PLAYLIST_NAME))
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("token", &"<redacted>")
            .field("segment_duration", &self.segment_duration)
            .field("output_directory", &self.output_directory)
            .field("mode", &self.mode)
            .field("persist_errors", &self.persist_errors)
            .finish()
    }
}

fn validate_source(raw: &str) -> Result<String, ConfigError> {
    let source = raw.trim();
    if source.is_empty() {
        return Err(ConfigError::MissingSource);
    }
    if source.contains("://") {
        return Err(ConfigError::InvalidSource {
            value: raw.to_string(),
            reason: "expected host:port without a scheme".into(),
        });
    }
    let parsed = Url::parse(&format!("rtmp://{source}")).map_err(|e| ConfigError::InvalidSource {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::InvalidSource {
            value: raw.to_string(),
            reason: "missing host".into(),
        });
    }
    Ok(source.to_string())
}

fn validate_destination(raw: &str) -> Result<String, ConfigError> {
    let destination = raw.trim().trim_end_matches('/');
    if destination.is_empty() {
        return Err(ConfigError::MissingDestination);
    }
    let parsed = Url::parse(destination).map_err(|e| ConfigError::InvalidDestination {
        value: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidDestination {
            value: raw.to_string(),
            reason: format!("unsupported scheme {:?}", parsed.scheme()),
        });
    }
    Ok(destination.to_string())
}

#[cfg(test)]
pub(crate) fn test_session(destination: &str, output_directory: Option<&Path>) -> StreamSession {
    StreamSession::validate(SessionArgs {
        token: "secret-token".into(),
        source: DEFAULT_SOURCE.into(),
        destination: destination.into(),
        segment_duration: DEFAULT_SEGMENT_DURATION.into(),
        output_directory: output_directory.map(Path::to_path_buf),
        self_push: output_directory.is_none(),
        persist_errors: false,
    })
    .expect("valid test session")
}
