//! StreamRecorder demo
//!
//! Records synthetic video frames (and optionally a sine tone) through a
//! session, pausing halfway, then prints the commit report as JSON.
//!
//! Usage:
//!   cargo run --bin streamrecorder-demo [-- [OPTIONS]]
//!
//! Options:
//!   --output <path>     Output file; the container follows the extension
//!                       (default: streamrecorder-demo.mp4 in the user's video directory)
//!   --pixel <fmt>       nv12 | nv21 | i420 (default: nv12)
//!   --frames <n>        Number of frames to push (default: 90)
//!   --size <WxH>        Frame size (default: 640x480)
//!   --fps <n>           Frame rate (default: 30)
//!   --audio             Also record a 440 Hz tone
//!   --dump              Use the file dump backend even when GStreamer is available
//!   --config <path>     Load session defaults from this TOML file
//!   --info              Print GStreamer diagnostics and exit
//!   --verbose           Extra debug output

use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};

use streamrecorder::config::{default_config_path, default_output_dir};
use streamrecorder::encoding::format_from_extension;
use streamrecorder::{
    default_backend, ErrorCode, FileDumpBackend, MediaPacket, RecorderBackend, RecorderConfig,
    RecorderError, RecorderState, RecordingLimitType, RecordingStatus, Session, SourceKind,
    VideoSourceFormat,
};

const DEFAULT_FRAMES: u64 = 90;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_SIZE: (u32, u32) = (640, 480);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.split_once('x')?;
    Some((w.parse().ok()?, h.parse().ok()?))
}

fn parse_pixel(value: &str) -> Option<VideoSourceFormat> {
    match value.to_ascii_lowercase().as_str() {
        "nv12" => Some(VideoSourceFormat::Nv12),
        "nv21" => Some(VideoSourceFormat::Nv21),
        "i420" => Some(VideoSourceFormat::I420),
        _ => None,
    }
}

/// Diagonal luma gradient that moves with `index`, neutral chroma
fn synthetic_frame(format: VideoSourceFormat, width: u32, height: u32, index: u64) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut data = vec![0u8; format.frame_size(width, height)];
    let (luma, chroma) = data.split_at_mut(w * h);
    for y in 0..h {
        for x in 0..w {
            luma[y * w + x] = ((x + y + index as usize * 4) & 0xff) as u8;
        }
    }
    chroma.fill(128);
    data
}

/// Interleaved S16LE sine samples
fn tone(samplerate: u32, channels: u32, first_sample: u64, samples: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples * channels as usize * 2);
    for i in 0..samples {
        let t = (first_sample + i as u64) as f32 / samplerate as f32;
        let value = ((t * 440.0 * 2.0 * PI).sin() * 8000.0) as i16;
        for _ in 0..channels {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}

/// Push, waiting for the backend to drain when the ledger is full
fn push(session: &mut Session, mut packet: MediaPacket) -> anyhow::Result<()> {
    loop {
        match session.push_buffer(packet) {
            Ok(()) => return Ok(()),
            Err(e) if e.code() == ErrorCode::OutOfMemory => {
                packet = e.into_packet();
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => return Err(e.error).context("push_buffer failed"),
        }
    }
}

fn wait_for_drain(session: &Session) {
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while session.buffers_in_flight() > 0 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    if session.buffers_in_flight() > 0 {
        log::warn!("{} buffers still in flight", session.buffers_in_flight());
    }
}

fn install_callbacks(session: &Session, consumed: Arc<AtomicU64>) {
    session.set_state_changed_callback(|previous: RecorderState, current: RecorderState, by_policy: bool| {
        println!("  state: {:?} -> {:?}{}", previous, current, if by_policy { " (policy)" } else { "" });
    });
    session.set_recording_status_callback(|status: RecordingStatus| {
        println!("  status: {} ms, {} KB", status.elapsed_ms, status.file_size_kb);
    });
    session.set_recording_limit_reached_callback(|limit: RecordingLimitType| {
        println!("  limit reached: {:?}", limit);
    });
    session.set_error_callback(|error: ErrorCode, state: RecorderState| {
        eprintln!("  error {} in {:?}", error.name(), state);
    });
    session.set_buffer_consumed_callback(move |_packet: MediaPacket| {
        consumed.fetch_add(1, Ordering::Relaxed);
    });
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let verbose = args.iter().any(|a| a == "--verbose");
    let log_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    if args.iter().any(|a| a == "--info") {
        #[cfg(feature = "gstreamer")]
        {
            let info = streamrecorder::gstreamer_init::get_gstreamer_info();
            println!("{}", serde_json::to_string_pretty(&info)?);
            return Ok(());
        }
        #[cfg(not(feature = "gstreamer"))]
        {
            bail!("built without the gstreamer feature");
        }
    }

    let output = match arg_value(&args, "--output") {
        Some(path) => PathBuf::from(path),
        None => {
            let dir = default_output_dir();
            std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
            dir.join("streamrecorder-demo.mp4")
        }
    };
    let pixel = match arg_value(&args, "--pixel") {
        Some(value) => parse_pixel(value).ok_or_else(|| anyhow!("unknown pixel format {}", value))?,
        None => VideoSourceFormat::Nv12,
    };
    let (width, height) = match arg_value(&args, "--size") {
        Some(value) => parse_size(value).ok_or_else(|| anyhow!("invalid size {}", value))?,
        None => DEFAULT_SIZE,
    };
    let frames = arg_value(&args, "--frames")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(DEFAULT_FRAMES);
    let fps = arg_value(&args, "--fps")
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|fps| *fps > 0)
        .unwrap_or(DEFAULT_FPS);
    let with_audio = args.iter().any(|a| a == "--audio");

    let config_path = arg_value(&args, "--config")
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);
    let config = RecorderConfig::load_or_default(&config_path);

    let file_format = output
        .extension()
        .and_then(|e| e.to_str())
        .and_then(format_from_extension)
        .ok_or_else(|| anyhow!("cannot tell the container from {}", output.display()))?;
    if !file_format.supports_video() {
        bail!("{} cannot hold video", file_format.display_name());
    }

    let backend: Box<dyn RecorderBackend> = if args.iter().any(|a| a == "--dump") {
        Box::new(FileDumpBackend::from_config(&config))
    } else {
        default_backend(&config)
    };

    println!("\n=== StreamRecorder Demo ===\n");
    println!("  Output:  {} ({})", output.display(), file_format.display_name());
    println!("  Video:   {}x{} @ {} fps, {:?}, {} frames", width, height, fps, pixel, frames);
    println!("  Audio:   {}", if with_audio { "440 Hz tone" } else { "none" });

    let mut session = Session::with_config(backend, &config)?;
    let consumed = Arc::new(AtomicU64::new(0));
    install_callbacks(&session, Arc::clone(&consumed));

    session.enable_source(if with_audio { SourceKind::VideoAudio } else { SourceKind::Video })?;
    session.set_filename(&output)?;
    session.set_file_format(file_format)?;
    session.set_video_resolution(width, height)?;
    session.set_video_framerate(fps)?;
    session.set_video_source_format(pixel)?;

    session.prepare()?;
    session.start()?;

    let frame_ns = 1_000_000_000 / u64::from(fps);
    let samplerate = session.audio_samplerate();
    let channels = session.audio_channel();
    let samples_per_frame = (samplerate / fps) as usize;
    let started = Instant::now();

    for index in 0..frames {
        if index == frames / 2 {
            session.pause()?;
            std::thread::sleep(Duration::from_millis(200));
            session.start()?;
        }

        let pts = index * frame_ns;
        let frame = synthetic_frame(pixel, width, height, index);
        push(&mut session, MediaPacket::video(pixel, width, height, pts, frame))?;

        if with_audio {
            let samples = tone(samplerate, channels, index * samples_per_frame as u64, samples_per_frame);
            push(&mut session, MediaPacket::audio(samplerate, channels, pts, samples))?;
        }
    }

    let report = match session.commit() {
        Ok(report) => report,
        Err(RecorderError::InvalidState { state, .. }) => bail!("commit refused in state {:?}", state),
        Err(e) => return Err(e.into()),
    };
    wait_for_drain(&session);

    println!("\n  Pushed in {:.2?}, {} buffers returned", started.elapsed(), consumed.load(Ordering::Relaxed));
    println!("{}", serde_json::to_string_pretty(&report)?);

    session.unprepare()?;
    session
        .destroy()
        .map_err(|e| anyhow!("destroy failed: {}", e.error))?;

    Ok(())
}
