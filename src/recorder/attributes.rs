// Recording attributes: the values a session is configured with before it
// is prepared, and the validation every setter runs before the backend sees
// the change.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::RecorderConfig;
use crate::encoding::{AudioCodec, FileFormat, VideoCodec, VideoSourceFormat};
use crate::error::{BackendError, BackendResult, RecorderError};

use super::Sources;

/// Which recording limit a value or notification refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingLimitType {
    /// Recording duration, in seconds
    Time,
    /// Output size, in kilobytes
    Size,
    /// Storage ran out of free space (notification only)
    FreeSpace,
}

impl TryFrom<i32> for RecordingLimitType {
    type Error = RecorderError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RecordingLimitType::Time),
            1 => Ok(RecordingLimitType::Size),
            2 => Ok(RecordingLimitType::FreeSpace),
            _ => Err(RecorderError::invalid_param(format!("invalid limit type {}", value))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A single attribute change, as handed to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    Filename(PathBuf),
    FileFormat(FileFormat),
    AudioCodec(AudioCodec),
    VideoCodec(VideoCodec),
    VideoResolution(Resolution),
    VideoFramerate(u32),
    VideoSourceFormat(VideoSourceFormat),
    TimeLimit(u32),
    SizeLimit(u32),
    AudioSamplerate(u32),
    AudioEncoderBitrate(u32),
    VideoEncoderBitrate(u32),
    AudioChannels(u32),
}

impl Attribute {
    /// Setter name used in log lines and state errors
    pub fn setter(&self) -> &'static str {
        match self {
            Attribute::Filename(_) => "set_filename",
            Attribute::FileFormat(_) => "set_file_format",
            Attribute::AudioCodec(_) => "set_audio_encoder",
            Attribute::VideoCodec(_) => "set_video_encoder",
            Attribute::VideoResolution(_) => "set_video_resolution",
            Attribute::VideoFramerate(_) => "set_video_framerate",
            Attribute::VideoSourceFormat(_) => "set_video_source_format",
            Attribute::TimeLimit(_) | Attribute::SizeLimit(_) => "set_recording_limit",
            Attribute::AudioSamplerate(_) => "set_audio_samplerate",
            Attribute::AudioEncoderBitrate(_) => "set_audio_encoder_bitrate",
            Attribute::VideoEncoderBitrate(_) => "set_video_encoder_bitrate",
            Attribute::AudioChannels(_) => "set_audio_channel",
        }
    }

    /// Local range checks, run before the state check and the backend
    pub fn validate(&self) -> Result<(), RecorderError> {
        match self {
            Attribute::Filename(path) if path.as_os_str().is_empty() => {
                Err(RecorderError::invalid_param("empty filename"))
            }
            Attribute::VideoResolution(res) if res.width == 0 || res.height == 0 => {
                Err(RecorderError::invalid_param(format!("invalid resolution {}", res)))
            }
            Attribute::VideoFramerate(0) => Err(RecorderError::invalid_param("framerate must be positive")),
            Attribute::AudioSamplerate(0) => Err(RecorderError::invalid_param("samplerate must be positive")),
            Attribute::AudioEncoderBitrate(0) | Attribute::VideoEncoderBitrate(0) => {
                Err(RecorderError::invalid_param("bitrate must be positive"))
            }
            Attribute::AudioChannels(0) => Err(RecorderError::invalid_param("channel count must be at least 1")),
            _ => Ok(()),
        }
    }
}

/// Current attribute values of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSettings {
    pub filename: Option<PathBuf>,
    pub file_format: FileFormat,
    pub audio_codec: AudioCodec,
    pub video_codec: VideoCodec,
    pub resolution: Resolution,
    pub framerate: u32,
    pub source_format: VideoSourceFormat,
    /// Seconds, 0 = unlimited
    pub time_limit: u32,
    /// Kilobytes, 0 = unlimited
    pub size_limit: u32,
    pub audio_samplerate: u32,
    pub audio_bitrate: u32,
    pub video_bitrate: u32,
    pub audio_channels: u32,
}

impl RecordingSettings {
    pub fn from_config(config: &RecorderConfig) -> Self {
        Self {
            filename: None,
            file_format: config.file_format,
            audio_codec: config.audio_codec,
            video_codec: config.video_codec,
            resolution: Resolution::new(config.video_width, config.video_height),
            framerate: config.video_framerate,
            source_format: config.video_source_format,
            time_limit: config.time_limit_secs,
            size_limit: config.size_limit_kb,
            audio_samplerate: config.audio_samplerate,
            audio_bitrate: config.audio_bitrate,
            video_bitrate: config.video_bitrate,
            audio_channels: config.audio_channels,
        }
    }

    /// Store an already accepted attribute
    pub fn store(&mut self, attribute: Attribute) {
        match attribute {
            Attribute::Filename(path) => self.filename = Some(path),
            Attribute::FileFormat(v) => self.file_format = v,
            Attribute::AudioCodec(v) => self.audio_codec = v,
            Attribute::VideoCodec(v) => self.video_codec = v,
            Attribute::VideoResolution(v) => self.resolution = v,
            Attribute::VideoFramerate(v) => self.framerate = v,
            Attribute::VideoSourceFormat(v) => self.source_format = v,
            Attribute::TimeLimit(v) => self.time_limit = v,
            Attribute::SizeLimit(v) => self.size_limit = v,
            Attribute::AudioSamplerate(v) => self.audio_samplerate = v,
            Attribute::AudioEncoderBitrate(v) => self.audio_bitrate = v,
            Attribute::VideoEncoderBitrate(v) => self.video_bitrate = v,
            Attribute::AudioChannels(v) => self.audio_channels = v,
        }
    }

    /// Check that the container can hold the enabled streams with the
    /// selected codecs. Backends call this when realizing.
    pub fn check_streams(&self, sources: Sources) -> BackendResult<()> {
        if sources.video {
            if !self.file_format.supports_video() {
                return Err(BackendError::EncoderWrongType(format!(
                    "{} cannot hold video",
                    self.file_format.display_name()
                )));
            }
            if !self.file_format.accepts_video(self.video_codec) {
                return Err(BackendError::EncoderWrongType(format!(
                    "{} cannot hold {}",
                    self.file_format.display_name(),
                    self.video_codec.display_name()
                )));
            }
        }
        if sources.audio && !self.file_format.accepts_audio(self.audio_codec) {
            return Err(BackendError::EncoderWrongType(format!(
                "{} cannot hold {}",
                self.file_format.display_name(),
                self.audio_codec.display_name()
            )));
        }
        Ok(())
    }
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self::from_config(&RecorderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_checks() {
        assert!(Attribute::AudioChannels(0).validate().is_err());
        assert!(Attribute::AudioChannels(1).validate().is_ok());
        assert!(Attribute::VideoEncoderBitrate(0).validate().is_err());
        assert!(Attribute::VideoResolution(Resolution::new(0, 480)).validate().is_err());
        assert!(Attribute::VideoFramerate(0).validate().is_err());
        assert!(Attribute::Filename(PathBuf::new()).validate().is_err());
        // Zero disables a limit
        assert!(Attribute::TimeLimit(0).validate().is_ok());
    }

    #[test]
    fn store_updates_the_matching_field() {
        let mut settings = RecordingSettings::default();
        settings.store(Attribute::VideoResolution(Resolution::new(640, 480)));
        settings.store(Attribute::SizeLimit(2048));
        settings.store(Attribute::Filename("/tmp/out.mp4".into()));
        assert_eq!(settings.resolution, Resolution::new(640, 480));
        assert_eq!(settings.size_limit, 2048);
        assert_eq!(settings.filename.as_deref(), Some(std::path::Path::new("/tmp/out.mp4")));
    }

    #[test]
    fn stream_compatibility() {
        let mut settings = RecordingSettings::default();
        let av = Sources { video: true, audio: true };
        assert!(settings.check_streams(av).is_ok());

        settings.file_format = FileFormat::Wav;
        assert!(matches!(settings.check_streams(av), Err(BackendError::EncoderWrongType(_))));

        settings.audio_codec = AudioCodec::Pcm;
        assert!(settings.check_streams(Sources { video: false, audio: true }).is_ok());
    }

    #[test]
    fn limit_type_from_int() {
        assert_eq!(RecordingLimitType::try_from(1).unwrap(), RecordingLimitType::Size);
        assert!(RecordingLimitType::try_from(-1).is_err());
    }
}
