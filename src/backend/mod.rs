//! Recording backends
//!
//! A backend does the actual encoding and muxing. The session drives it
//! through [`RecorderBackend`] after validating arguments and state, and
//! the backend reports asynchronous happenings (limits, progress, failures,
//! buffer consumption) through the [`EventSink`] it was attached to.
//!
//! Available backends:
//! - [`dump::FileDumpBackend`]: writes pushed payloads straight to disk,
//!   always built
//! - `gst::GstBackend`: GStreamer appsrc pipelines (feature `gstreamer`)
//! - `mock::ScriptedBackend`: scripted test double (tests and the
//!   `test-harness` feature)

pub mod dump;
#[cfg(feature = "gstreamer")]
pub mod gst;
#[cfg(any(test, feature = "test-harness"))]
pub mod mock;

pub use crate::events::EventSink;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::buffer::{BufferToken, MediaPacket, VideoFrameDescriptor};
use crate::encoding::{AudioCodec, FileFormat, VideoCodec};
use crate::error::{BackendError, BackendResult};
use crate::recorder::{Attribute, RecordingLimitType, RecordingSettings, Resolution, Sources};

/// Limit conditions a backend can hit while recording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendLimit {
    MaxSize,
    NoFreeSpace,
    TimeLimit,
}

impl From<BackendLimit> for RecordingLimitType {
    fn from(limit: BackendLimit) -> Self {
        match limit {
            BackendLimit::MaxSize => RecordingLimitType::Size,
            BackendLimit::NoFreeSpace => RecordingLimitType::FreeSpace,
            BackendLimit::TimeLimit => RecordingLimitType::Time,
        }
    }
}

/// Asynchronous backend notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    LimitReached(BackendLimit),
    RecordingStatus { elapsed_ms: u64, file_size_kb: u64 },
    Error(BackendError),
    /// The backend no longer reads the buffer behind this token
    ConsumeComplete(BufferToken),
}

/// A buffer handed to the backend.
///
/// The packet shares its payload with the session's ledger entry. Once the
/// backend has finished with it, it must emit exactly one
/// [`BackendEvent::ConsumeComplete`] carrying `token`. When `push` returns
/// an error it must emit nothing for the token: the session takes the entry
/// back itself and returns the packet to the caller.
#[derive(Debug, Clone)]
pub struct PushedBuffer {
    pub token: BufferToken,
    pub packet: MediaPacket,
    /// Present for semi-planar video frames
    pub descriptor: Option<VideoFrameDescriptor>,
}

/// What a backend can record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub file_formats: Vec<FileFormat>,
    pub audio_codecs: Vec<AudioCodec>,
    pub video_codecs: Vec<VideoCodec>,
    pub resolutions: Vec<Resolution>,
}

impl Capabilities {
    pub const STANDARD_RESOLUTIONS: &'static [Resolution] = &[
        Resolution::new(176, 144),
        Resolution::new(320, 240),
        Resolution::new(640, 480),
        Resolution::new(1280, 720),
        Resolution::new(1920, 1080),
    ];

    /// Every format and codec, standard resolutions
    pub fn full() -> Self {
        Self {
            file_formats: FileFormat::ALL.to_vec(),
            audio_codecs: AudioCodec::ALL.to_vec(),
            video_codecs: VideoCodec::ALL.to_vec(),
            resolutions: Self::STANDARD_RESOLUTIONS.to_vec(),
        }
    }

    /// Largest advertised resolution by pixel count
    pub fn max_resolution(&self) -> Option<Resolution> {
        self.resolutions
            .iter()
            .copied()
            .max_by_key(|r| u64::from(r.width) * u64::from(r.height))
    }

    /// Check an attribute against these capabilities. Resolutions other than
    /// the advertised ones are accepted up to the largest advertised size.
    pub fn check(&self, attribute: &Attribute) -> BackendResult<()> {
        match attribute {
            Attribute::FileFormat(format) if !self.file_formats.contains(format) => {
                Err(BackendError::OutOfArray(format.display_name().to_string()))
            }
            Attribute::AudioCodec(codec) if !self.audio_codecs.contains(codec) => {
                Err(BackendError::OutOfArray(codec.display_name().to_string()))
            }
            Attribute::VideoCodec(codec) if !self.video_codecs.contains(codec) => {
                Err(BackendError::OutOfArray(codec.display_name().to_string()))
            }
            Attribute::VideoResolution(res) => match self.max_resolution() {
                Some(max) if res.width > max.width || res.height > max.height => {
                    Err(BackendError::OutOfRange(format!("{} exceeds {}", res, max)))
                }
                _ => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

/// Summary of a finished recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingReport {
    pub path: PathBuf,
    pub bytes_written: u64,
    /// Recorded media time, pauses excluded
    pub duration: Duration,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

/// Encoding/muxing engine behind a session
///
/// Calls arrive from the session owner's thread, already validated against
/// the lifecycle state. Events may be emitted from any thread.
pub trait RecorderBackend: Send {
    fn name(&self) -> &'static str;

    /// Wire the backend to the session's notification channel
    fn attach(&mut self, sink: EventSink);

    fn capabilities(&self) -> Capabilities;

    /// Accept or reject one attribute change (session is in Created)
    fn apply(&mut self, attribute: &Attribute) -> BackendResult<()>;

    /// Build whatever is needed to record with `settings`
    fn realize(&mut self, settings: &RecordingSettings, sources: Sources) -> BackendResult<()>;

    fn unrealize(&mut self) -> BackendResult<()>;

    /// Start recording, or resume after `pause`
    fn record(&mut self) -> BackendResult<()>;

    fn pause(&mut self) -> BackendResult<()>;

    /// Flush and finalize the output file
    fn commit(&mut self) -> BackendResult<RecordingReport>;

    /// Stop and discard everything recorded since `record`
    fn cancel(&mut self) -> BackendResult<()>;

    /// Take a buffer. Backends that keep it clone the packet, which only
    /// bumps the payload's reference count.
    fn push(&mut self, buffer: &PushedBuffer) -> BackendResult<()>;

    /// Release every resource. Called exactly once, when the session goes away.
    fn destroy(&mut self);
}

pub(crate) const NANOS_PER_MS: u64 = 1_000_000;

/// Media timeline of the recording, derived from buffer timestamps
#[derive(Debug, Default)]
pub(crate) struct MediaTimeline {
    first_pts: Option<u64>,
    last_pts: u64,
    /// Time skipped over while paused
    paused_ns: u64,
    /// Set on resume; the next buffer closes the gap
    resume_pending: bool,
}

impl MediaTimeline {
    /// Account for a buffer and return the recorded media time in ns
    pub(crate) fn advance(&mut self, pts: u64) -> u64 {
        let first = *self.first_pts.get_or_insert(pts);
        if self.resume_pending {
            self.paused_ns += pts.saturating_sub(self.last_pts);
            self.resume_pending = false;
        }
        self.last_pts = self.last_pts.max(pts);
        self.last_pts.saturating_sub(first).saturating_sub(self.paused_ns)
    }

    /// Position of one buffer on the recorded timeline
    pub(crate) fn media_time(&self, pts: u64) -> u64 {
        match self.first_pts {
            Some(first) => pts.saturating_sub(first).saturating_sub(self.paused_ns),
            None => 0,
        }
    }

    /// Next buffer continues the timeline where the last one left off
    pub(crate) fn resume(&mut self) {
        self.resume_pending = self.first_pts.is_some();
    }

    pub(crate) fn elapsed_ns(&self) -> u64 {
        match self.first_pts {
            Some(first) => self.last_pts.saturating_sub(first).saturating_sub(self.paused_ns),
            None => 0,
        }
    }
}

/// Staging path used while a recording is in progress
pub(crate) fn staging_path(target: &std::path::Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_mapping() {
        assert_eq!(RecordingLimitType::from(BackendLimit::MaxSize), RecordingLimitType::Size);
        assert_eq!(RecordingLimitType::from(BackendLimit::TimeLimit), RecordingLimitType::Time);
        assert_eq!(RecordingLimitType::from(BackendLimit::NoFreeSpace), RecordingLimitType::FreeSpace);
    }

    #[test]
    fn capability_check() {
        let mut caps = Capabilities::full();
        caps.file_formats.retain(|f| *f != FileFormat::Wav);

        assert!(matches!(
            caps.check(&Attribute::FileFormat(FileFormat::Wav)),
            Err(BackendError::OutOfArray(_))
        ));
        assert!(caps.check(&Attribute::FileFormat(FileFormat::Mp4)).is_ok());
        assert!(caps.check(&Attribute::VideoResolution(Resolution::new(800, 600))).is_ok());
        assert!(matches!(
            caps.check(&Attribute::VideoResolution(Resolution::new(3840, 2160))),
            Err(BackendError::OutOfRange(_))
        ));
    }

    #[test]
    fn timeline_skips_paused_gap() {
        let ms = NANOS_PER_MS;
        let mut timeline = MediaTimeline::default();
        assert_eq!(timeline.advance(1_000 * ms), 0);
        assert_eq!(timeline.advance(1_200 * ms), 200 * ms);

        timeline.resume();
        assert_eq!(timeline.advance(5_000 * ms), 200 * ms);
        assert_eq!(timeline.advance(5_100 * ms), 300 * ms);
        assert_eq!(timeline.media_time(5_050 * ms), 250 * ms);
        assert_eq!(timeline.elapsed_ns(), 300 * ms);
    }

    #[test]
    fn staging_path_appends_suffix() {
        assert_eq!(
            staging_path(std::path::Path::new("/tmp/out.mp4")),
            PathBuf::from("/tmp/out.mp4.part")
        );
    }
}
