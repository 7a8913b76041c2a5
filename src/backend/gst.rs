//! GStreamer recording backend
//!
//! Each recording runs its own pipeline, built when recording starts:
//!
//! ```text
//! appsrc(video) ! queue ! videoconvert ! <encoder> ! <parser> ─┐
//!                                                              ├─ <muxer> ! filesink
//! appsrc(audio) ! queue ! audioconvert ! audioresample ! [<encoder> ! <parser>] ─┘
//! ```
//!
//! Pushed payloads are wrapped, not copied. The wrapper reports the buffer
//! consumed when GStreamer frees it. A monitor thread watches the bus for
//! errors and emits progress and size-limit events.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_audio as gst_audio;
use gstreamer_video as gst_video;

use super::{
    staging_path, BackendEvent, BackendLimit, Capabilities, EventSink, MediaTimeline, PushedBuffer,
    RecorderBackend, RecordingReport, NANOS_PER_MS,
};
use crate::buffer::{BufferToken, StreamKind};
use crate::config::RecorderConfig;
use crate::encoding::{AudioCodec, FileFormat, VideoCodec, VideoSourceFormat};
use crate::error::{BackendError, BackendResult};
use crate::gstreamer_init::{self, element_available};
use crate::recorder::{Attribute, RecordingSettings, Sources};

const EOS_TIMEOUT_SECS: u64 = 30;
const BUS_POLL_MS: u64 = 100;

/// Elements every pipeline may need, independent of codec choice
const BASE_ELEMENTS: &[&str] = &[
    "appsrc",
    "queue",
    "videoconvert",
    "audioconvert",
    "audioresample",
    "filesink",
];

/// Every element a recording pipeline can use
pub fn pipeline_elements() -> Vec<&'static str> {
    let mut names = BASE_ELEMENTS.to_vec();
    names.extend(FileFormat::ALL.iter().map(|f| f.gst_muxer()));
    names.extend(AudioCodec::ALL.iter().filter_map(|c| c.gst_encoder()));
    names.extend(AudioCodec::ALL.iter().filter_map(|c| c.gst_parser()));
    names.extend(VideoCodec::ALL.iter().map(|c| c.gst_encoder()));
    names.extend(VideoCodec::ALL.iter().map(|c| c.gst_parser()));
    names
}

/// Elements the pipeline for `settings` will be built from
fn required_elements(settings: &RecordingSettings, sources: Sources) -> Vec<&'static str> {
    let mut names = vec!["appsrc", "queue", "filesink", settings.file_format.gst_muxer()];
    if sources.video {
        names.extend([
            "videoconvert",
            settings.video_codec.gst_encoder(),
            settings.video_codec.gst_parser(),
        ]);
    }
    if sources.audio {
        names.extend(["audioconvert", "audioresample"]);
        names.extend(settings.audio_codec.gst_encoder());
        names.extend(settings.audio_codec.gst_parser());
    }
    names
}

fn probe_capabilities() -> Capabilities {
    let capabilities = Capabilities {
        file_formats: FileFormat::ALL
            .iter()
            .copied()
            .filter(|f| element_available(f.gst_muxer()))
            .collect(),
        audio_codecs: AudioCodec::ALL
            .iter()
            .copied()
            .filter(|c| c.gst_encoder().map_or(true, element_available))
            .collect(),
        video_codecs: VideoCodec::ALL
            .iter()
            .copied()
            .filter(|c| element_available(c.gst_encoder()))
            .collect(),
        resolutions: Capabilities::STANDARD_RESOLUTIONS.to_vec(),
    };
    log::info!(
        "GStreamer capabilities: formats {:?}, audio {:?}, video {:?}",
        capabilities.file_formats,
        capabilities.audio_codecs,
        capabilities.video_codecs
    );
    capabilities
}

fn make_element(name: &str) -> BackendResult<gst::Element> {
    gst::ElementFactory::make(name)
        .build()
        .map_err(|e| BackendError::ResourceCreation(format!("{}: {}", name, e)))
}

/// Set an encoder's bitrate if it has one
fn set_bitrate(encoder: &gst::Element, value: u32) {
    if encoder.find_property("bitrate").is_some() {
        encoder.set_property_from_str("bitrate", &value.to_string());
    } else {
        log::debug!("{} has no bitrate property", encoder.name());
    }
}

fn video_format(format: VideoSourceFormat) -> gst_video::VideoFormat {
    match format {
        VideoSourceFormat::Nv12 => gst_video::VideoFormat::Nv12,
        VideoSourceFormat::Nv21 => gst_video::VideoFormat::Nv21,
        VideoSourceFormat::I420 => gst_video::VideoFormat::I420,
    }
}

/// Map a GStreamer error message onto a backend status
fn map_error(error: &glib::Error, debug: Option<glib::GString>) -> BackendError {
    let message = match debug {
        Some(debug) => format!("{} ({})", error, debug),
        None => error.to_string(),
    };

    if let Some(kind) = error.kind::<gst::ResourceError>() {
        return match kind {
            gst::ResourceError::NoSpaceLeft => BackendError::OutOfStorage,
            gst::ResourceError::NotAuthorized => BackendError::InvalidPermission(message),
            gst::ResourceError::NotFound => BackendError::FileNotFound(message),
            _ => BackendError::GstResource(message),
        };
    }
    if let Some(kind) = error.kind::<gst::StreamError>() {
        return match kind {
            gst::StreamError::Format | gst::StreamError::WrongType => BackendError::GstNegotiation(message),
            _ => BackendError::GstStream(message),
        };
    }
    if error.is::<gst::CoreError>() {
        BackendError::GstCore(message)
    } else if error.is::<gst::LibraryError>() {
        BackendError::GstLibrary(message)
    } else {
        BackendError::Internal(message)
    }
}

/// Payload handed to GStreamer; reports consumption when freed unless disarmed
struct ConsumeGuard {
    data: Arc<[u8]>,
    token: BufferToken,
    sink: EventSink,
    armed: Arc<AtomicBool>,
}

impl AsRef<[u8]> for ConsumeGuard {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for ConsumeGuard {
    fn drop(&mut self) {
        if self.armed.load(Ordering::SeqCst) {
            self.sink.emit(BackendEvent::ConsumeComplete(self.token));
        }
    }
}

/// A GStreamer buffer over a pushed payload.
///
/// A push that fails hands the packet back to the caller, so the guard is
/// disarmed before our last reference goes away.
struct WrappedBuffer {
    buffer: gst::Buffer,
    armed: Arc<AtomicBool>,
}

impl WrappedBuffer {
    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    fn annotate(&mut self, pushed: &PushedBuffer, pts: u64) -> BackendResult<()> {
        let buffer_ref = self
            .buffer
            .get_mut()
            .ok_or_else(|| BackendError::Internal("fresh buffer is not writable".into()))?;
        buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts));

        if let Some(descriptor) = &pushed.descriptor {
            let [luma, chroma] = &descriptor.planes;
            gst_video::VideoMeta::add_full(
                buffer_ref,
                gst_video::VideoFrameFlags::empty(),
                video_format(descriptor.format),
                descriptor.width,
                descriptor.height,
                &[luma.offset, chroma.offset],
                &[luma.stride as i32, chroma.stride as i32],
            )
            .map_err(|e| BackendError::GstLibrary(format!("video meta: {}", e)))?;
        }
        Ok(())
    }
}

fn wrap_buffer(pushed: &PushedBuffer, pts: u64, sink: EventSink) -> BackendResult<WrappedBuffer> {
    let armed = Arc::new(AtomicBool::new(true));
    let guard = ConsumeGuard {
        data: pushed.packet.shared_data(),
        token: pushed.token,
        sink,
        armed: Arc::clone(&armed),
    };
    let mut wrapped = WrappedBuffer {
        buffer: gst::Buffer::from_slice(guard),
        armed,
    };
    if let Err(e) = wrapped.annotate(pushed, pts) {
        wrapped.disarm();
        return Err(e);
    }
    Ok(wrapped)
}

/// State shared between the pushing thread and the monitor
#[derive(Default)]
struct Progress {
    elapsed_ns: AtomicU64,
    limit_hit: AtomicBool,
}

impl Progress {
    /// True for the first caller only
    fn hit_limit(&self) -> bool {
        !self.limit_hit.swap(true, Ordering::SeqCst)
    }

    fn limited(&self) -> bool {
        self.limit_hit.load(Ordering::SeqCst)
    }
}

struct Monitor {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Monitor {
    fn stop(&mut self) {
        // Dropping the sender disconnects the monitor's receiver
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Pipeline monitor thread panicked");
            }
        }
    }
}

struct MonitorContext {
    bus: gst::Bus,
    stop: Receiver<()>,
    progress: Arc<Progress>,
    sink: EventSink,
    staging: PathBuf,
    size_limit_bytes: u64,
    status_interval_ms: u64,
}

fn run_monitor(ctx: MonitorContext) {
    let mut next_status_ms = ctx.status_interval_ms;
    let mut failed = false;

    loop {
        match ctx.stop.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => break,
        }

        if let Some(msg) = ctx.bus.timed_pop(gst::ClockTime::from_mseconds(BUS_POLL_MS)) {
            match msg.view() {
                gst::MessageView::Error(err) => {
                    let error = map_error(&err.error(), err.debug());
                    log::error!(
                        "Pipeline error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        error
                    );
                    if error == BackendError::OutOfStorage && ctx.progress.hit_limit() {
                        ctx.sink.emit(BackendEvent::LimitReached(BackendLimit::NoFreeSpace));
                    }
                    ctx.sink.emit(BackendEvent::Error(error));
                    failed = true;
                }
                gst::MessageView::Warning(w) => {
                    log::warn!("Pipeline warning: {} ({:?})", w.error(), w.debug());
                }
                _ => {}
            }
        }

        if failed {
            continue;
        }

        let file_size = fs::metadata(&ctx.staging).map(|m| m.len()).unwrap_or(0);
        if ctx.size_limit_bytes > 0 && file_size >= ctx.size_limit_bytes && ctx.progress.hit_limit() {
            log::info!("Size limit reached at {} bytes", file_size);
            ctx.sink.emit(BackendEvent::LimitReached(BackendLimit::MaxSize));
        }

        let elapsed_ms = ctx.progress.elapsed_ns.load(Ordering::Relaxed) / NANOS_PER_MS;
        if elapsed_ms >= next_status_ms {
            next_status_ms = (elapsed_ms / ctx.status_interval_ms + 1) * ctx.status_interval_ms;
            ctx.sink.emit(BackendEvent::RecordingStatus {
                elapsed_ms,
                file_size_kb: file_size / 1024,
            });
        }
    }

    log::debug!("Pipeline monitor for {} stopped", ctx.staging.display());
}

struct ActivePipeline {
    pipeline: gst::Pipeline,
    video_src: Option<gst_app::AppSrc>,
    audio_src: Option<gst_app::AppSrc>,
    target: PathBuf,
    staging: PathBuf,
    progress: Arc<Progress>,
    monitor: Monitor,
    timeline: MediaTimeline,
    paused: bool,
    started_at: DateTime<Local>,
}

impl ActivePipeline {
    fn appsrc(&self, kind: StreamKind) -> Option<&gst_app::AppSrc> {
        match kind {
            StreamKind::Video => self.video_src.as_ref(),
            StreamKind::Audio => self.audio_src.as_ref(),
        }
    }

    /// Stop the monitor and the pipeline; the staging file is left alone
    fn halt(&mut self) {
        self.monitor.stop();
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("Failed to stop pipeline: {}", e);
        }
    }

    fn finish(&mut self) -> BackendResult<()> {
        self.monitor.stop();

        for appsrc in [&self.video_src, &self.audio_src].into_iter().flatten() {
            if let Err(e) = appsrc.end_of_stream() {
                log::warn!("Failed to send EOS to {}: {:?}", appsrc.name(), e);
            }
        }

        let result = wait_for_eos(&self.pipeline);
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::warn!("Failed to stop pipeline: {}", e);
        }
        result
    }
}

fn wait_for_eos(pipeline: &gst::Pipeline) -> BackendResult<()> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| BackendError::GstCore("pipeline has no bus".into()))?;

    for msg in bus.iter_timed(gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS)) {
        match msg.view() {
            gst::MessageView::Eos(..) => return Ok(()),
            gst::MessageView::Error(err) => return Err(map_error(&err.error(), err.debug())),
            _ => {}
        }
    }
    log::error!("Timed out waiting for EOS");
    Err(BackendError::ResponseTimeout)
}

fn remove_staging(staging: &Path) -> BackendResult<()> {
    match fs::remove_file(staging) {
        Ok(()) => {
            log::info!("Discarded {}", staging.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn build_video_branch(
    pipeline: &gst::Pipeline,
    settings: &RecordingSettings,
    muxer: &gst::Element,
) -> BackendResult<gst_app::AppSrc> {
    let info = gst_video::VideoInfo::builder(
        video_format(settings.source_format),
        settings.resolution.width,
        settings.resolution.height,
    )
    .fps(gst::Fraction::new(settings.framerate as i32, 1))
    .build()
    .map_err(|e| BackendError::GstNegotiation(format!("video caps: {}", e)))?;
    let caps = info
        .to_caps()
        .map_err(|e| BackendError::GstNegotiation(format!("video caps: {}", e)))?;

    let appsrc = gst_app::AppSrc::builder()
        .name("video_src")
        .caps(&caps)
        .format(gst::Format::Time)
        .is_live(true)
        .build();

    let queue = make_element("queue")?;
    let convert = make_element("videoconvert")?;
    let encoder = make_element(settings.video_codec.gst_encoder())?;
    let parser = make_element(settings.video_codec.gst_parser())?;

    // x264enc takes kbit/s, the libav encoders bit/s
    let bitrate = match settings.video_codec {
        VideoCodec::H264 => (settings.video_bitrate / 1000).max(1),
        _ => settings.video_bitrate,
    };
    set_bitrate(&encoder, bitrate);

    pipeline
        .add_many([appsrc.upcast_ref(), &queue, &convert, &encoder, &parser])
        .map_err(|e| BackendError::GstCore(format!("add video branch: {}", e)))?;
    gst::Element::link_many([appsrc.upcast_ref(), &queue, &convert, &encoder, &parser, muxer])
        .map_err(|e| BackendError::GstLink(format!("video branch: {}", e)))?;

    Ok(appsrc)
}

fn build_audio_branch(
    pipeline: &gst::Pipeline,
    settings: &RecordingSettings,
    muxer: &gst::Element,
) -> BackendResult<gst_app::AppSrc> {
    let info = gst_audio::AudioInfo::builder(
        gst_audio::AudioFormat::S16le,
        settings.audio_samplerate,
        settings.audio_channels,
    )
    .build()
    .map_err(|e| BackendError::GstNegotiation(format!("audio caps: {}", e)))?;
    let caps = info
        .to_caps()
        .map_err(|e| BackendError::GstNegotiation(format!("audio caps: {}", e)))?;

    let appsrc = gst_app::AppSrc::builder()
        .name("audio_src")
        .caps(&caps)
        .format(gst::Format::Time)
        .is_live(true)
        .build();

    let mut chain = vec![
        appsrc.clone().upcast::<gst::Element>(),
        make_element("queue")?,
        make_element("audioconvert")?,
        make_element("audioresample")?,
    ];
    if let Some(name) = settings.audio_codec.gst_encoder() {
        let encoder = make_element(name)?;
        set_bitrate(&encoder, settings.audio_bitrate);
        chain.push(encoder);
    }
    if let Some(name) = settings.audio_codec.gst_parser() {
        chain.push(make_element(name)?);
    }

    pipeline
        .add_many(&chain)
        .map_err(|e| BackendError::GstCore(format!("add audio branch: {}", e)))?;
    chain.push(muxer.clone());
    gst::Element::link_many(&chain).map_err(|e| BackendError::GstLink(format!("audio branch: {}", e)))?;

    Ok(appsrc)
}

type BuiltPipeline = (gst::Pipeline, Option<gst_app::AppSrc>, Option<gst_app::AppSrc>);

fn build_pipeline(settings: &RecordingSettings, sources: Sources, location: &Path) -> BackendResult<BuiltPipeline> {
    let pipeline = gst::Pipeline::new();

    let muxer = make_element(settings.file_format.gst_muxer())?;
    let filesink = gst::ElementFactory::make("filesink")
        .property("location", location.to_string_lossy().to_string())
        .property("async", false)
        .build()
        .map_err(|e| BackendError::ResourceCreation(format!("filesink: {}", e)))?;

    pipeline
        .add_many([&muxer, &filesink])
        .map_err(|e| BackendError::GstCore(format!("add muxer: {}", e)))?;
    muxer
        .link(&filesink)
        .map_err(|e| BackendError::GstLink(format!("muxer to filesink: {}", e)))?;

    let video_src = if sources.video {
        Some(build_video_branch(&pipeline, settings, &muxer)?)
    } else {
        None
    };
    let audio_src = if sources.audio {
        Some(build_audio_branch(&pipeline, settings, &muxer)?)
    } else {
        None
    };

    Ok((pipeline, video_src, audio_src))
}

pub struct GstBackend {
    sink: Option<EventSink>,
    capabilities: Capabilities,
    status_interval_ms: u64,
    settings: Option<RecordingSettings>,
    sources: Sources,
    active: Option<ActivePipeline>,
}

impl GstBackend {
    /// Initialize GStreamer and probe the installed encoders and muxers
    pub fn new() -> BackendResult<Self> {
        Self::with_status_interval(Duration::from_secs(1))
    }

    pub fn from_config(config: &RecorderConfig) -> BackendResult<Self> {
        Self::with_status_interval(Duration::from_millis(config.status_interval_ms))
    }

    pub fn with_status_interval(interval: Duration) -> BackendResult<Self> {
        gstreamer_init::init()?;
        Ok(Self {
            sink: None,
            capabilities: probe_capabilities(),
            status_interval_ms: (interval.as_millis() as u64).max(1),
            settings: None,
            sources: Sources::default(),
            active: None,
        })
    }

    fn start(&self) -> BackendResult<ActivePipeline> {
        let settings = self.settings.as_ref().ok_or(BackendError::NotInitialized)?;
        let sink = self.sink.clone().ok_or(BackendError::NotInitialized)?;
        let target = settings
            .filename
            .clone()
            .ok_or_else(|| BackendError::InvalidArgument("filename is not set".into()))?;
        let staging = staging_path(&target);

        let (pipeline, video_src, audio_src) = build_pipeline(settings, self.sources, &staging)?;
        let bus = pipeline
            .bus()
            .ok_or_else(|| BackendError::GstCore("pipeline has no bus".into()))?;

        if let Err(e) = pipeline.set_state(gst::State::Playing) {
            let _ = pipeline.set_state(gst::State::Null);
            remove_staging(&staging)?;
            return Err(BackendError::GstStateChange(e.to_string()));
        }

        let progress = Arc::new(Progress::default());
        let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
        let ctx = MonitorContext {
            bus,
            stop: stop_rx,
            progress: Arc::clone(&progress),
            sink,
            staging: staging.clone(),
            size_limit_bytes: u64::from(settings.size_limit) * 1024,
            status_interval_ms: self.status_interval_ms,
        };
        let thread = std::thread::Builder::new()
            .name("streamrecorder-gst-monitor".into())
            .spawn(move || run_monitor(ctx));
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                let _ = pipeline.set_state(gst::State::Null);
                remove_staging(&staging)?;
                return Err(e.into());
            }
        };

        log::info!(
            "Recording {:?} to {} via {}",
            self.sources,
            target.display(),
            settings.file_format.gst_muxer()
        );

        Ok(ActivePipeline {
            pipeline,
            video_src,
            audio_src,
            target,
            staging,
            progress,
            monitor: Monitor {
                stop: Some(stop_tx),
                thread: Some(thread),
            },
            timeline: MediaTimeline::default(),
            paused: false,
            started_at: Local::now(),
        })
    }

    fn discard(&mut self) -> BackendResult<()> {
        if let Some(mut active) = self.active.take() {
            active.halt();
            remove_staging(&active.staging)?;
        }
        Ok(())
    }
}

impl RecorderBackend for GstBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn attach(&mut self, sink: EventSink) {
        self.sink = Some(sink);
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.clone()
    }

    fn apply(&mut self, attribute: &Attribute) -> BackendResult<()> {
        self.capabilities.check(attribute)
    }

    fn realize(&mut self, settings: &RecordingSettings, sources: Sources) -> BackendResult<()> {
        settings.check_streams(sources)?;
        if let Some(missing) = required_elements(settings, sources)
            .into_iter()
            .find(|name| !element_available(name))
        {
            return Err(BackendError::ResourceCreation(format!(
                "GStreamer element '{}' is not installed",
                missing
            )));
        }
        self.settings = Some(settings.clone());
        self.sources = sources;
        Ok(())
    }

    fn unrealize(&mut self) -> BackendResult<()> {
        self.discard()?;
        self.settings = None;
        self.sources = Sources::default();
        Ok(())
    }

    fn record(&mut self) -> BackendResult<()> {
        match self.active.as_mut() {
            Some(active) => {
                active.paused = false;
                active.timeline.resume();
                log::debug!("Resumed at {} ms", active.timeline.elapsed_ns() / NANOS_PER_MS);
            }
            None => {
                let active = self.start()?;
                self.active = Some(active);
            }
        }
        Ok(())
    }

    fn pause(&mut self) -> BackendResult<()> {
        let active = self.active.as_mut().ok_or(BackendError::NotInitialized)?;
        active.paused = true;
        Ok(())
    }

    fn commit(&mut self) -> BackendResult<RecordingReport> {
        let mut active = self.active.take().ok_or(BackendError::NotInitialized)?;

        if let Err(e) = active.finish() {
            remove_staging(&active.staging)?;
            return Err(e);
        }

        fs::rename(&active.staging, &active.target)?;
        let bytes_written = fs::metadata(&active.target)?.len();
        log::info!("Recording saved: {} ({} bytes)", active.target.display(), bytes_written);

        Ok(RecordingReport {
            path: active.target,
            bytes_written,
            duration: Duration::from_nanos(active.timeline.elapsed_ns()),
            started_at: active.started_at,
            finished_at: Local::now(),
        })
    }

    fn cancel(&mut self) -> BackendResult<()> {
        self.discard()
    }

    fn push(&mut self, buffer: &PushedBuffer) -> BackendResult<()> {
        let sink = self.sink.clone().ok_or(BackendError::NotInitialized)?;
        let settings = self.settings.as_ref().ok_or(BackendError::NotInitialized)?;
        let time_limit_ns = u64::from(settings.time_limit) * 1000 * NANOS_PER_MS;
        let active = self.active.as_mut().ok_or(BackendError::NotInitialized)?;

        if active.paused || active.progress.limited() {
            sink.emit(BackendEvent::ConsumeComplete(buffer.token));
            return Ok(());
        }

        let elapsed_ns = active.timeline.advance(buffer.packet.pts());
        if time_limit_ns > 0 && elapsed_ns >= time_limit_ns {
            if active.progress.hit_limit() {
                log::info!("Time limit reached at {} ms", elapsed_ns / NANOS_PER_MS);
                sink.emit(BackendEvent::LimitReached(BackendLimit::TimeLimit));
            }
            sink.emit(BackendEvent::ConsumeComplete(buffer.token));
            return Ok(());
        }
        active.progress.elapsed_ns.fetch_max(elapsed_ns, Ordering::Relaxed);

        let kind = buffer.packet.kind();
        let appsrc = active
            .appsrc(kind)
            .ok_or_else(|| BackendError::InvalidArgument(format!("{:?} stream is not enabled", kind)))?;
        let pts = active.timeline.media_time(buffer.packet.pts());
        let wrapped = wrap_buffer(buffer, pts, sink)?;

        // Keep a reference so a refused buffer is freed here, after disarming
        if let Err(e) = appsrc.push_buffer(wrapped.buffer.clone()) {
            wrapped.disarm();
            return Err(BackendError::GstFlow(format!("{:?}", e)));
        }
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(e) = self.discard() {
            log::warn!("Failed to discard recording: {}", e);
        }
        self.settings = None;
        self.sink = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ledger::BufferEntry;
    use crate::buffer::{BufferLedger, MediaPacket, VideoFrameDescriptor};
    use crate::events::DispatchMessage;

    #[test]
    fn required_elements_follow_sources() {
        let settings = RecordingSettings::default();
        let audio_only = required_elements(&settings, Sources { video: false, audio: true });
        assert!(audio_only.contains(&"audioresample"));
        assert!(!audio_only.contains(&"videoconvert"));

        let video_only = required_elements(&settings, Sources { video: true, audio: false });
        assert!(video_only.contains(&settings.video_codec.gst_encoder()));
        assert!(!video_only.contains(&"audioconvert"));
    }

    #[test]
    fn pcm_needs_no_encoder() {
        let mut settings = RecordingSettings::default();
        settings.file_format = FileFormat::Wav;
        settings.audio_codec = AudioCodec::Pcm;
        let names = required_elements(&settings, Sources { video: false, audio: true });
        assert_eq!(names, vec!["appsrc", "queue", "filesink", "wavenc", "audioconvert", "audioresample"]);
    }

    #[test]
    fn error_domains_map_to_statuses() {
        let no_space = glib::Error::new(gst::ResourceError::NoSpaceLeft, "disk full");
        assert_eq!(map_error(&no_space, None), BackendError::OutOfStorage);

        let denied = glib::Error::new(gst::ResourceError::NotAuthorized, "denied");
        assert!(matches!(map_error(&denied, None), BackendError::InvalidPermission(_)));

        let negotiation = glib::Error::new(gst::StreamError::Format, "bad caps");
        assert!(matches!(map_error(&negotiation, None), BackendError::GstNegotiation(_)));

        let core = glib::Error::new(gst::CoreError::Failed, "boom");
        assert!(matches!(map_error(&core, Some("detail".into())), BackendError::GstCore(m) if m.contains("detail")));
    }

    fn pushed(ledger: &mut BufferLedger) -> PushedBuffer {
        let packet = MediaPacket::video(VideoSourceFormat::Nv12, 64, 3, 0, vec![0u8; 320]);
        let descriptor = VideoFrameDescriptor::for_packet(&packet);
        let token = ledger
            .insert(BufferEntry {
                packet: packet.clone(),
                kind: StreamKind::Video,
                descriptor: descriptor.clone(),
            })
            .unwrap();
        PushedBuffer { token, packet, descriptor }
    }

    fn consumed(rx: &Receiver<DispatchMessage>) -> usize {
        rx.try_iter()
            .filter(|m| matches!(m, DispatchMessage::Backend(BackendEvent::ConsumeComplete(_))))
            .count()
    }

    #[test]
    fn wrapped_buffer_reports_consumption_once_freed() {
        gstreamer_init::init().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut ledger = BufferLedger::new(4);

        let wrapped = wrap_buffer(&pushed(&mut ledger), 0, EventSink::new(tx)).unwrap();
        let downstream = wrapped.buffer.clone();
        drop(wrapped);
        assert_eq!(consumed(&rx), 0);
        drop(downstream);
        assert_eq!(consumed(&rx), 1);
    }

    #[test]
    fn disarmed_buffer_is_freed_silently() {
        gstreamer_init::init().unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut ledger = BufferLedger::new(4);

        let wrapped = wrap_buffer(&pushed(&mut ledger), 0, EventSink::new(tx)).unwrap();
        let refused = wrapped.buffer.clone();
        wrapped.disarm();
        drop(refused);
        drop(wrapped);
        assert_eq!(consumed(&rx), 0);
    }

    #[test]
    fn limit_fires_once() {
        let progress = Progress::default();
        assert!(progress.hit_limit());
        assert!(!progress.hit_limit());
        assert!(progress.limited());
    }
}
