// StreamRecorder - record externally captured audio/video buffers
// Main library entry point

pub mod backend;
pub mod buffer;
pub mod capi;
pub mod config;
pub mod encoding;
pub mod error;
pub mod events;
#[cfg(feature = "gstreamer")]
pub mod gstreamer_init;
pub mod recorder;

pub use backend::{dump::FileDumpBackend, Capabilities, RecorderBackend, RecordingReport};
pub use buffer::{MediaPacket, StreamKind};
pub use config::RecorderConfig;
pub use encoding::{AudioCodec, FileFormat, VideoCodec, VideoSourceFormat};
pub use error::{ErrorCode, PushError, RecorderError, Result};
pub use events::{EventKind, RecordingStatus};
pub use recorder::{RecorderState, RecordingLimitType, Resolution, Session, SourceKind};

/// Backend used when the caller does not bring one: GStreamer when the
/// feature is enabled and GStreamer initializes, the file dump otherwise.
pub fn default_backend(config: &RecorderConfig) -> Box<dyn RecorderBackend> {
    #[cfg(feature = "gstreamer")]
    {
        match backend::gst::GstBackend::from_config(config) {
            Ok(backend) => return Box::new(backend),
            Err(e) => log::warn!("GStreamer backend unavailable, falling back to file dump: {}", e),
        }
    }

    Box::new(FileDumpBackend::from_config(config))
}

/// Create a session on the default backend
pub fn open_session(config: &RecorderConfig) -> Result<Session> {
    Session::with_config(default_backend(config), config)
}
