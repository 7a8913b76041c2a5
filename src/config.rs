// Configuration for streamrecorder sessions

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::buffer::DEFAULT_LEDGER_CAPACITY;
use crate::encoding::{AudioCodec, FileFormat, VideoCodec, VideoSourceFormat};
use crate::error::ConfigError;

/// Defaults a new session starts from, plus session tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Maximum number of pushed buffers the backend may hold at once
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,

    /// Interval between recording status notifications, in milliseconds
    /// of recorded media
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,

    #[serde(default = "default_file_format")]
    pub file_format: FileFormat,

    #[serde(default = "default_video_codec")]
    pub video_codec: VideoCodec,

    #[serde(default = "default_audio_codec")]
    pub audio_codec: AudioCodec,

    #[serde(default = "default_video_width")]
    pub video_width: u32,

    #[serde(default = "default_video_height")]
    pub video_height: u32,

    #[serde(default = "default_video_framerate")]
    pub video_framerate: u32,

    /// Pixel layout of pushed video frames
    #[serde(default = "default_video_source_format")]
    pub video_source_format: VideoSourceFormat,

    /// Bits per second
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: u32,

    /// Bits per second
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: u32,

    #[serde(default = "default_audio_samplerate")]
    pub audio_samplerate: u32,

    #[serde(default = "default_audio_channels")]
    pub audio_channels: u32,

    /// 0 = unlimited
    #[serde(default)]
    pub time_limit_secs: u32,

    /// 0 = unlimited
    #[serde(default)]
    pub size_limit_kb: u32,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            ledger_capacity: default_ledger_capacity(),
            status_interval_ms: default_status_interval_ms(),
            file_format: default_file_format(),
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            video_width: default_video_width(),
            video_height: default_video_height(),
            video_framerate: default_video_framerate(),
            video_source_format: default_video_source_format(),
            video_bitrate: default_video_bitrate(),
            audio_bitrate: default_audio_bitrate(),
            audio_samplerate: default_audio_samplerate(),
            audio_channels: default_audio_channels(),
            time_limit_secs: 0,
            size_limit_kb: 0,
        }
    }
}

impl RecorderConfig {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from disk or return default
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Failed to load config from {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to disk
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Reject values no session could start with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger_capacity == 0 {
            return Err(ConfigError::Invalid("ledger_capacity must be at least 1".into()));
        }
        if self.status_interval_ms == 0 {
            return Err(ConfigError::Invalid("status_interval_ms must be positive".into()));
        }
        if self.video_width == 0 || self.video_height == 0 || self.video_framerate == 0 {
            return Err(ConfigError::Invalid(format!(
                "invalid video geometry {}x{}@{}",
                self.video_width, self.video_height, self.video_framerate
            )));
        }
        if self.video_bitrate == 0 || self.audio_bitrate == 0 {
            return Err(ConfigError::Invalid("bitrates must be positive".into()));
        }
        if self.audio_samplerate == 0 || self.audio_channels == 0 {
            return Err(ConfigError::Invalid("audio samplerate and channels must be positive".into()));
        }
        Ok(())
    }
}

/// Get the config file path
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("streamrecorder")
        .join("config.toml")
}

/// Get the default directory for recordings
pub fn default_output_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_ledger_capacity() -> usize {
    DEFAULT_LEDGER_CAPACITY
}

fn default_status_interval_ms() -> u64 {
    1000
}

fn default_file_format() -> FileFormat {
    FileFormat::Mp4
}

fn default_video_codec() -> VideoCodec {
    VideoCodec::Mpeg4
}

fn default_audio_codec() -> AudioCodec {
    AudioCodec::Aac
}

fn default_video_width() -> u32 {
    1280
}

fn default_video_height() -> u32 {
    720
}

fn default_video_framerate() -> u32 {
    30
}

fn default_video_source_format() -> VideoSourceFormat {
    VideoSourceFormat::Nv12
}

fn default_video_bitrate() -> u32 {
    3_000_000
}

fn default_audio_bitrate() -> u32 {
    128_000
}

fn default_audio_samplerate() -> u32 {
    44100
}

fn default_audio_channels() -> u32 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let config: RecorderConfig = toml::from_str("video_width = 640\nvideo_height = 480\n").unwrap();
        assert_eq!(config.video_width, 640);
        assert_eq!(config.video_height, 480);
        assert_eq!(config.file_format, FileFormat::Mp4);
        assert_eq!(config.ledger_capacity, DEFAULT_LEDGER_CAPACITY);
    }

    #[test]
    fn enums_use_lowercase_names() {
        let config: RecorderConfig = toml::from_str("file_format = \"3gp\"\nvideo_codec = \"h263\"\n").unwrap();
        assert_eq!(config.file_format, FileFormat::ThreeGp);
        assert_eq!(config.video_codec, VideoCodec::H263);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = RecorderConfig::default();
        config.time_limit_secs = 90;
        config.audio_codec = AudioCodec::Amr;
        config.save(&path).unwrap();
        assert_eq!(RecorderConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn broken_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "ledger_capacity = \"lots\"").unwrap();
        assert_eq!(RecorderConfig::load_or_default(&path), RecorderConfig::default());
    }

    #[test]
    fn zero_capacity_is_invalid() {
        let config = RecorderConfig {
            ledger_capacity: 0,
            ..RecorderConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
