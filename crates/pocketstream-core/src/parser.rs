//! Segment discovery from ffmpeg's stderr.
//!
//! ffmpeg never reports that a segment is closed. Its HLS muxer does log every file it
//! opens, so a segment is known to be finished once the muxer opens the next file.
//! [`DiagnosticParser`] turns one line into an optional [`SegmentObservation`] and
//! [`PendingSegment`] applies the one-behind rule on top of it.

use std::path::{Path, PathBuf};

/// Prefix of every line emitted by the HLS muxer.
pub const MUXER_MARKER: &str = "[hls @";
/// Muxer message announcing a new output file.
pub const OPENING_MARKER: &str = "Opening";
/// Suffix ffmpeg writes to before renaming the file into place.
pub const TEMP_SUFFIX: &str = ".tmp";

/// A file path the muxer announced it is opening, with any temporary suffix stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentObservation {
    path: PathBuf,
}

impl SegmentObservation {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

/// Line to event mapping for the external tool's diagnostic output.
pub trait DiagnosticParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<SegmentObservation>;
}

/// Parser for ffmpeg HLS muxer lines such as
/// `[hls @ 0x55d5c8a0] Opening 'stream/stream3.ts.tmp' for writing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HlsOpeningParser;

impl DiagnosticParser for HlsOpeningParser {
    fn parse(&self, line: &str) -> Option<SegmentObservation> {
        parse_opening_line(line)
    }
}

pub fn parse_opening_line(line: &str) -> Option<SegmentObservation> {
    let muxer = line.find(MUXER_MARKER)?;
    let rest = &line[muxer + MUXER_MARKER.len()..];
    let opening = rest.find(OPENING_MARKER)?;
    let rest = &rest[opening + OPENING_MARKER.len()..];
    let start = rest.find('\'')? + 1;
    let len = rest[start..].find('\'')?;
    let raw = &rest[start..start + len];
    if raw.is_empty() {
        return None;
    }
    let path = raw.strip_suffix(TEMP_SUFFIX).unwrap_or(raw);
    Some(SegmentObservation::new(path))
}

/// The most recent observation that has not been superseded yet.
///
/// ffmpeg may still be writing the newest file, so only the observation it replaces is
/// finalized. The last observation of a run is therefore never released.
#[derive(Debug, Default)]
pub struct PendingSegment {
    current: Option<SegmentObservation>,
}

impl PendingSegment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `next` and return the observation it finalizes, if any.
    pub fn advance(&mut self, next: SegmentObservation) -> Option<SegmentObservation> {
        self.current.replace(next)
    }

    pub fn pending(&self) -> Option<&SegmentObservation> {
        self.current.as_ref()
    }

    pub fn into_pending(self) -> Option<SegmentObservation> {
        self.current
    }
}
