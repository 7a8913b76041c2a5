//! Recorder session
//!
//! [`Session`] is the single entry point callers use. Every operation runs
//! the same sequence: validate arguments, check the lifecycle state, forward
//! to the backend, and only on success record the new state or attribute
//! value. A backend failure leaves the session untouched and comes back as a
//! translated [`RecorderError`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::attributes::{Attribute, RecordingLimitType, RecordingSettings, Resolution};
use super::state::{Operation, RecorderState, SourceKind, Sources};
use crate::backend::{Capabilities, PushedBuffer, RecorderBackend, RecordingReport};
use crate::buffer::ledger::BufferEntry;
use crate::buffer::{BufferLedger, MediaPacket, StreamKind, VideoFrameDescriptor};
use crate::config::RecorderConfig;
use crate::encoding::{AudioCodec, FileFormat, VideoCodec, VideoSourceFormat};
use crate::error::{translate, ErrorCode, PushError, RecorderError, Result};
use crate::events::{CallbackSlots, Dispatcher, EventKind, RecordingStatus};

/// State shared with the dispatch thread
#[derive(Debug)]
pub(crate) struct SessionCore {
    pub(crate) state: RecorderState,
    pub(crate) ledger: BufferLedger,
}

/// Failed [`Session::destroy`]; the session is handed back unchanged
#[derive(thiserror::Error)]
#[error("{error}")]
pub struct DestroyError {
    pub error: RecorderError,
    pub session: Box<Session>,
}

impl std::fmt::Debug for DestroyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestroyError")
            .field("error", &self.error)
            .field("session", &self.session.id)
            .finish()
    }
}

impl DestroyError {
    pub fn into_session(self) -> Session {
        *self.session
    }
}

/// A recorder instance
pub struct Session {
    id: Uuid,
    backend: Box<dyn RecorderBackend>,
    core: Arc<Mutex<SessionCore>>,
    callbacks: Arc<CallbackSlots>,
    dispatcher: Dispatcher,
    settings: RecordingSettings,
    sources: Sources,
}

impl Session {
    /// Create a session in the Created state with default settings
    pub fn new(backend: Box<dyn RecorderBackend>) -> Result<Self> {
        Self::with_config(backend, &RecorderConfig::default())
    }

    pub fn with_config(mut backend: Box<dyn RecorderBackend>, config: &RecorderConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RecorderError::invalid_param(e.to_string()))?;

        let id = Uuid::new_v4();
        let core = Arc::new(Mutex::new(SessionCore {
            state: RecorderState::Created,
            ledger: BufferLedger::new(config.ledger_capacity),
        }));
        let callbacks = Arc::new(CallbackSlots::new());

        let dispatcher = Dispatcher::spawn(id, Arc::clone(&core), Arc::clone(&callbacks))
            .map_err(|e| RecorderError::OutOfMemory(format!("failed to spawn dispatch thread: {}", e)))?;
        backend.attach(dispatcher.sink());

        log::info!("[{}] Session created with {} backend", id, backend.name());

        Ok(Self {
            id,
            backend,
            core,
            callbacks,
            dispatcher,
            settings: RecordingSettings::from_config(config),
            sources: Sources::default(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RecorderState {
        self.core.lock().state
    }

    /// Number of pushed buffers the backend still holds
    pub fn buffers_in_flight(&self) -> usize {
        self.core.lock().ledger.len()
    }

    pub fn sources(&self) -> Sources {
        self.sources
    }

    pub fn settings(&self) -> &RecordingSettings {
        &self.settings
    }

    fn set_state(&self, previous: RecorderState, current: RecorderState) {
        self.core.lock().state = current;
        log::info!("[{}] {:?} -> {:?}", self.id, previous, current);
        self.dispatcher.state_changed(previous, current, false);
    }

    // ---- lifecycle ----

    /// Destroy the session. Only legal in Created; otherwise the session is
    /// returned along with the state error.
    pub fn destroy(self) -> std::result::Result<(), DestroyError> {
        let state = self.state();
        if let Err(error) = Operation::Destroy.check(state) {
            return Err(DestroyError {
                error,
                session: Box::new(self),
            });
        }
        log::info!("[{}] Destroying session", self.id);
        // Backend and dispatcher are released by Drop
        drop(self);
        Ok(())
    }

    /// Enable a media source. Enabling is cumulative.
    pub fn enable_source(&mut self, kind: SourceKind) -> Result<()> {
        Operation::EnableSource.check(self.state())?;
        self.sources.enable(kind);
        log::debug!("[{}] Enabled source {:?} -> {:?}", self.id, kind, self.sources);
        Ok(())
    }

    pub fn prepare(&mut self) -> Result<()> {
        let state = self.state();
        let next = Operation::Prepare.check(state)?;

        if !self.sources.any() {
            log::error!("[{}] prepare: no source enabled", self.id);
            return Err(RecorderError::InvalidOperation("no source enabled".into()));
        }

        self.backend
            .realize(&self.settings, self.sources)
            .map_err(|e| translate("prepare", state, e))?;

        self.set_state(state, next);
        Ok(())
    }

    pub fn unprepare(&mut self) -> Result<()> {
        let state = self.state();
        let next = Operation::Unprepare.check(state)?;

        self.backend.unrealize().map_err(|e| translate("unprepare", state, e))?;

        self.set_state(state, next);
        Ok(())
    }

    /// Start recording, or resume a paused recording
    pub fn start(&mut self) -> Result<()> {
        let state = self.state();
        let next = Operation::Start.check(state)?;

        if self.settings.filename.is_none() {
            log::error!("[{}] start: filename is not set", self.id);
            return Err(RecorderError::InvalidOperation("filename is not set".into()));
        }

        self.backend.record().map_err(|e| translate("start", state, e))?;

        self.set_state(state, next);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        let state = self.state();
        let next = Operation::Pause.check(state)?;

        self.backend.pause().map_err(|e| translate("pause", state, e))?;

        self.set_state(state, next);
        Ok(())
    }

    /// Finalize the output file and return to Prepared
    pub fn commit(&mut self) -> Result<RecordingReport> {
        let state = self.state();
        let next = Operation::Commit.check(state)?;

        let report = self.backend.commit().map_err(|e| translate("commit", state, e))?;
        log::info!(
            "[{}] Committed {} ({} bytes, {:.1}s)",
            self.id,
            report.path.display(),
            report.bytes_written,
            report.duration.as_secs_f64()
        );

        self.set_state(state, next);
        Ok(report)
    }

    /// Discard the recording in progress and return to Prepared
    pub fn cancel(&mut self) -> Result<()> {
        let state = self.state();
        let next = Operation::Cancel.check(state)?;

        self.backend.cancel().map_err(|e| translate("cancel", state, e))?;

        self.set_state(state, next);
        Ok(())
    }

    // ---- buffers ----

    /// Hand a buffer to the backend.
    ///
    /// The packet comes back through the buffer-consumed callback once the
    /// backend is done with it, or inside the error if the push fails.
    pub fn push_buffer(&mut self, packet: MediaPacket) -> std::result::Result<(), PushError> {
        let state = self.state();
        if let Err(e) = Operation::PushBuffer.check(state) {
            return Err(PushError::new(e, packet));
        }
        if let Err(e) = packet.validate() {
            log::error!("[{}] push_buffer: {}", self.id, e);
            return Err(PushError::new(e, packet));
        }

        let kind = packet.kind();
        let enabled = match kind {
            StreamKind::Video => self.sources.video,
            StreamKind::Audio => self.sources.audio,
        };
        if !enabled {
            let e = RecorderError::invalid_param(format!("{:?} source is not enabled", kind));
            log::error!("[{}] push_buffer: {}", self.id, e);
            return Err(PushError::new(e, packet));
        }

        let descriptor = VideoFrameDescriptor::for_packet(&packet);
        let pushed_packet = packet.clone();
        let entry = BufferEntry {
            packet,
            kind,
            descriptor: descriptor.clone(),
        };

        let token = match self.core.lock().ledger.insert(entry) {
            Ok(token) => token,
            Err(entry) => {
                log::error!("[{}] push_buffer: buffer ledger is full", self.id);
                return Err(PushError::new(
                    RecorderError::OutOfMemory("buffer ledger is full".into()),
                    entry.packet,
                ));
            }
        };

        let pushed = PushedBuffer {
            token,
            packet: pushed_packet,
            descriptor,
        };

        if let Err(e) = self.backend.push(&pushed) {
            let error = translate("push_buffer", state, e);
            if let Err(miss) = self.core.lock().ledger.release(token) {
                log::warn!("[{}] Failed push {} was already released: {:?}", self.id, token, miss);
            }
            return Err(PushError::new(error, pushed.packet));
        }

        log::debug!("[{}] Pushed {:?} buffer {}", self.id, kind, token);
        Ok(())
    }

    // ---- attributes ----

    /// Shared setter path: range check, state check, backend, store
    fn configure(&mut self, attribute: Attribute) -> Result<()> {
        let setter = attribute.setter();
        if let Err(e) = attribute.validate() {
            log::error!("[{}] {}: {}", self.id, setter, e);
            return Err(e);
        }

        let state = self.state();
        if !Operation::Configure.allowed_from(state) {
            log::error!("[{}] {}: invalid state {:?}", self.id, setter, state);
            return Err(RecorderError::InvalidState {
                operation: setter,
                state,
            });
        }

        self.backend.apply(&attribute).map_err(|e| translate(setter, state, e))?;
        log::debug!("[{}] {:?}", self.id, attribute);
        self.settings.store(attribute);
        Ok(())
    }

    pub fn set_filename(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.configure(Attribute::Filename(path.into()))
    }

    pub fn filename(&self) -> Option<&Path> {
        self.settings.filename.as_deref()
    }

    pub fn set_file_format(&mut self, format: FileFormat) -> Result<()> {
        self.configure(Attribute::FileFormat(format))
    }

    pub fn file_format(&self) -> FileFormat {
        self.settings.file_format
    }

    pub fn set_audio_encoder(&mut self, codec: AudioCodec) -> Result<()> {
        self.configure(Attribute::AudioCodec(codec))
    }

    /// Fails when no audio source is enabled
    pub fn audio_encoder(&self) -> Result<AudioCodec> {
        if !self.sources.audio {
            return Err(RecorderError::InvalidOperation("audio source is not enabled".into()));
        }
        Ok(self.settings.audio_codec)
    }

    pub fn set_video_encoder(&mut self, codec: VideoCodec) -> Result<()> {
        self.configure(Attribute::VideoCodec(codec))
    }

    /// Fails when no video source is enabled
    pub fn video_encoder(&self) -> Result<VideoCodec> {
        if !self.sources.video {
            return Err(RecorderError::InvalidOperation("video source is not enabled".into()));
        }
        Ok(self.settings.video_codec)
    }

    pub fn set_video_resolution(&mut self, width: u32, height: u32) -> Result<()> {
        self.configure(Attribute::VideoResolution(Resolution::new(width, height)))
    }

    pub fn video_resolution(&self) -> Resolution {
        self.settings.resolution
    }

    pub fn set_video_framerate(&mut self, framerate: u32) -> Result<()> {
        self.configure(Attribute::VideoFramerate(framerate))
    }

    pub fn video_framerate(&self) -> u32 {
        self.settings.framerate
    }

    pub fn set_video_source_format(&mut self, format: VideoSourceFormat) -> Result<()> {
        self.configure(Attribute::VideoSourceFormat(format))
    }

    pub fn video_source_format(&self) -> VideoSourceFormat {
        self.settings.source_format
    }

    /// Seconds for [`RecordingLimitType::Time`], kilobytes for
    /// [`RecordingLimitType::Size`]; 0 disables the limit.
    pub fn set_recording_limit(&mut self, kind: RecordingLimitType, limit: u32) -> Result<()> {
        match kind {
            RecordingLimitType::Time => self.configure(Attribute::TimeLimit(limit)),
            RecordingLimitType::Size => self.configure(Attribute::SizeLimit(limit)),
            RecordingLimitType::FreeSpace => {
                Err(RecorderError::invalid_param("free space limit cannot be configured"))
            }
        }
    }

    pub fn recording_limit(&self, kind: RecordingLimitType) -> Result<u32> {
        match kind {
            RecordingLimitType::Time => Ok(self.settings.time_limit),
            RecordingLimitType::Size => Ok(self.settings.size_limit),
            RecordingLimitType::FreeSpace => {
                Err(RecorderError::invalid_param("free space limit cannot be queried"))
            }
        }
    }

    pub fn set_audio_samplerate(&mut self, samplerate: u32) -> Result<()> {
        self.configure(Attribute::AudioSamplerate(samplerate))
    }

    pub fn audio_samplerate(&self) -> u32 {
        self.settings.audio_samplerate
    }

    pub fn set_audio_encoder_bitrate(&mut self, bitrate: u32) -> Result<()> {
        self.configure(Attribute::AudioEncoderBitrate(bitrate))
    }

    pub fn audio_encoder_bitrate(&self) -> u32 {
        self.settings.audio_bitrate
    }

    pub fn set_video_encoder_bitrate(&mut self, bitrate: u32) -> Result<()> {
        self.configure(Attribute::VideoEncoderBitrate(bitrate))
    }

    pub fn video_encoder_bitrate(&self) -> u32 {
        self.settings.video_bitrate
    }

    pub fn set_audio_channel(&mut self, channels: u32) -> Result<()> {
        self.configure(Attribute::AudioChannels(channels))
    }

    pub fn audio_channel(&self) -> u32 {
        self.settings.audio_channels
    }

    // ---- capabilities ----

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    /// Visit supported containers until the visitor returns false
    pub fn foreach_supported_file_format(&self, mut visitor: impl FnMut(FileFormat) -> bool) {
        for format in self.backend.capabilities().file_formats {
            if !visitor(format) {
                break;
            }
        }
    }

    pub fn foreach_supported_audio_encoder(&self, mut visitor: impl FnMut(AudioCodec) -> bool) {
        for codec in self.backend.capabilities().audio_codecs {
            if !visitor(codec) {
                break;
            }
        }
    }

    pub fn foreach_supported_video_encoder(&self, mut visitor: impl FnMut(VideoCodec) -> bool) {
        for codec in self.backend.capabilities().video_codecs {
            if !visitor(codec) {
                break;
            }
        }
    }

    pub fn foreach_supported_video_resolution(&self, mut visitor: impl FnMut(u32, u32) -> bool) {
        for res in self.backend.capabilities().resolutions {
            if !visitor(res.width, res.height) {
                break;
            }
        }
    }

    // ---- callbacks ----

    pub fn set_state_changed_callback(
        &self,
        callback: impl Fn(RecorderState, RecorderState, bool) + Send + Sync + 'static,
    ) {
        self.callbacks.state_changed.set(Arc::new(callback));
    }

    pub fn set_recording_limit_reached_callback(&self, callback: impl Fn(RecordingLimitType) + Send + Sync + 'static) {
        self.callbacks.limit_reached.set(Arc::new(callback));
    }

    pub fn set_recording_status_callback(&self, callback: impl Fn(RecordingStatus) + Send + Sync + 'static) {
        self.callbacks.recording_status.set(Arc::new(callback));
    }

    pub fn set_error_callback(&self, callback: impl Fn(ErrorCode, RecorderState) + Send + Sync + 'static) {
        self.callbacks.error.set(Arc::new(callback));
    }

    pub fn set_buffer_consumed_callback(&self, callback: impl Fn(MediaPacket) + Send + Sync + 'static) {
        self.callbacks.buffer_consumed.set(Arc::new(callback));
    }

    pub fn unset_callback(&self, kind: EventKind) {
        self.callbacks.clear(kind);
    }

    pub fn unset_state_changed_callback(&self) {
        self.unset_callback(EventKind::StateChanged);
    }

    pub fn unset_recording_limit_reached_callback(&self) {
        self.unset_callback(EventKind::LimitReached);
    }

    pub fn unset_recording_status_callback(&self) {
        self.unset_callback(EventKind::RecordingStatus);
    }

    pub fn unset_error_callback(&self) {
        self.unset_callback(EventKind::Error);
    }

    pub fn unset_buffer_consumed_callback(&self) {
        self.unset_callback(EventKind::BufferConsumed);
    }

    pub fn has_callback(&self, kind: EventKind) -> bool {
        self.callbacks.is_set(kind)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let state = self.state();

        // Dropped without going through destroy: wind the backend down first
        if state.is_recording() {
            if let Err(e) = self.backend.cancel() {
                log::warn!("[{}] Cancel on drop failed: {}", self.id, e);
            }
        }
        if matches!(state, RecorderState::Prepared | RecorderState::Recording | RecorderState::Paused) {
            if let Err(e) = self.backend.unrealize() {
                log::warn!("[{}] Unrealize on drop failed: {}", self.id, e);
            }
        }
        self.backend.destroy();

        // Let pending consumption notices reach the caller before stopping
        self.dispatcher.shutdown();

        let mut core = self.core.lock();
        let leftover = core.ledger.drain();
        if !leftover.is_empty() {
            log::warn!("[{}] {} buffers were never consumed", self.id, leftover.len());
        }
        core.state = RecorderState::None;
        drop(core);

        log::info!("[{}] Session destroyed", self.id);
    }
}
