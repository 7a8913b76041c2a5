//! End-to-end session lifecycle against the file dump backend

use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use streamrecorder::{
    AudioCodec, ErrorCode, FileDumpBackend, FileFormat, MediaPacket, RecorderConfig, RecorderState,
    RecordingLimitType, Session, SourceKind, VideoCodec, VideoSourceFormat,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const MS: u64 = 1_000_000;

fn nv12_frame(width: u32, height: u32, pts: u64) -> MediaPacket {
    let size = VideoSourceFormat::Nv12.frame_size(width, height);
    MediaPacket::video(VideoSourceFormat::Nv12, width, height, pts, vec![16u8; size])
}

fn audio(pts_ms: u64, len: usize) -> MediaPacket {
    MediaPacket::audio(44100, 2, pts_ms * MS, vec![0u8; len])
}

fn collect<T>(rx: &Receiver<T>, n: usize) -> Vec<T> {
    (0..n)
        .map(|_| rx.recv_timeout(TIMEOUT).expect("notification"))
        .collect()
}

/// Audio-only WAV session in Prepared
fn prepared_wav(dir: &std::path::Path, config: &RecorderConfig) -> Session {
    let mut session = Session::with_config(Box::new(FileDumpBackend::from_config(config)), config).unwrap();
    session.enable_source(SourceKind::Audio).unwrap();
    session.set_filename(dir.join("out.wav")).unwrap();
    session.set_file_format(FileFormat::Wav).unwrap();
    session.set_audio_encoder(AudioCodec::Pcm).unwrap();
    session.prepare().unwrap();
    session
}

#[test]
fn video_sequence_ends_prepared() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.mp4");

    let mut session = Session::new(Box::new(FileDumpBackend::new())).unwrap();
    let (tx, rx) = unbounded();
    session.set_state_changed_callback(move |previous: RecorderState, current: RecorderState, _: bool| {
        let _ = tx.send((previous, current));
    });

    session.enable_source(SourceKind::Video).unwrap();
    session.set_filename(&path).unwrap();
    session.set_file_format(FileFormat::Mp4).unwrap();
    session.set_video_encoder(VideoCodec::Mpeg4).unwrap();
    session.set_video_resolution(1280, 720).unwrap();
    assert_eq!(session.state(), RecorderState::Created);

    session.prepare().unwrap();
    session.start().unwrap();
    session.push_buffer(nv12_frame(1280, 720, 0)).unwrap();
    session.pause().unwrap();
    session.start().unwrap();
    let report = session.commit().unwrap();

    assert_eq!(session.state(), RecorderState::Prepared);
    let frame_size = VideoSourceFormat::Nv12.frame_size(1280, 720) as u64;
    assert_eq!(report.path, path);
    assert_eq!(report.bytes_written, frame_size);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), frame_size);

    use RecorderState::*;
    assert_eq!(
        collect(&rx, 5),
        vec![
            (Created, Prepared),
            (Prepared, Recording),
            (Recording, Paused),
            (Paused, Recording),
            (Recording, Prepared),
        ]
    );

    session.unprepare().unwrap();
    session.destroy().unwrap();
}

#[test]
fn commit_overwrites_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.wav");
    std::fs::write(&path, vec![1u8; 4096]).unwrap();

    let mut session = prepared_wav(dir.path(), &RecorderConfig::default());
    session.start().unwrap();
    session.push_buffer(audio(0, 100)).unwrap();
    session.commit().unwrap();

    assert_eq!(std::fs::metadata(&path).unwrap().len(), 100);
}

#[test]
fn cancel_discards_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = prepared_wav(dir.path(), &RecorderConfig::default());

    session.start().unwrap();
    session.push_buffer(audio(0, 512)).unwrap();
    session.cancel().unwrap();

    assert_eq!(session.state(), RecorderState::Prepared);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn consumed_callback_returns_packets_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = prepared_wav(dir.path(), &RecorderConfig::default());
    let (tx, rx) = unbounded();
    session.set_buffer_consumed_callback(move |packet: MediaPacket| {
        let _ = tx.send(packet);
    });

    session.start().unwrap();
    for pts_ms in [0, 10, 20] {
        session.push_buffer(audio(pts_ms, 64)).unwrap();
    }

    let returned: Vec<u64> = collect(&rx, 3).iter().map(|p| p.pts() / MS).collect();
    assert_eq!(returned, vec![0, 10, 20]);
    assert_eq!(session.buffers_in_flight(), 0);
    session.commit().unwrap();
}

#[test]
fn ledger_overflow_keeps_earlier_entries() {
    let dir = tempfile::tempdir().unwrap();
    let config = RecorderConfig {
        ledger_capacity: 2,
        ..RecorderConfig::default()
    };
    let mut session = prepared_wav(dir.path(), &config);

    // The first consumed callback parks the dispatch thread until the gate
    // closes, so later consumption signals queue up behind it.
    let (entered_tx, entered_rx) = unbounded();
    let (gate_tx, gate_rx) = unbounded::<()>();
    let (returned_tx, returned_rx) = unbounded();
    session.set_buffer_consumed_callback(move |packet: MediaPacket| {
        let _ = entered_tx.send(());
        let _ = gate_rx.recv();
        let _ = returned_tx.send(packet.pts() / MS);
    });

    session.start().unwrap();
    session.push_buffer(audio(0, 64)).unwrap();
    entered_rx.recv_timeout(TIMEOUT).unwrap();

    session.push_buffer(audio(10, 64)).unwrap();
    session.push_buffer(audio(20, 64)).unwrap();
    assert_eq!(session.buffers_in_flight(), 2);

    let err = session.push_buffer(audio(30, 64)).unwrap_err();
    assert_eq!(err.code(), ErrorCode::OutOfMemory);
    assert_eq!(err.into_packet().pts(), 30 * MS);
    assert_eq!(session.buffers_in_flight(), 2);

    drop(gate_tx);
    assert_eq!(collect(&returned_rx, 3), vec![0, 10, 20]);
    session.commit().unwrap();
}

#[test]
fn size_limit_notifies_once_and_keeps_recording() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = prepared_wav(dir.path(), &RecorderConfig::default());
    session.unprepare().unwrap();
    session.set_recording_limit(RecordingLimitType::Size, 1).unwrap();
    session.prepare().unwrap();

    let (tx, rx) = unbounded();
    session.set_recording_limit_reached_callback(move |limit: RecordingLimitType| {
        let _ = tx.send(limit);
    });

    session.start().unwrap();
    for pts_ms in [0, 10, 20] {
        session.push_buffer(audio(pts_ms, 600)).unwrap();
    }

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), RecordingLimitType::Size);
    assert_eq!(session.state(), RecorderState::Recording);

    let report = session.commit().unwrap();
    assert_eq!(report.bytes_written, 600);
    assert!(rx.try_recv().is_err());
}

#[test]
fn settings_are_locked_after_prepare() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = prepared_wav(dir.path(), &RecorderConfig::default());

    let err = session.set_audio_samplerate(8000).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    assert_eq!(session.audio_samplerate(), 44100);
    assert_eq!(session.state(), RecorderState::Prepared);
}

#[test]
fn failed_commit_can_be_retried_then_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.wav");
    std::fs::create_dir(&target).unwrap();

    let mut session = prepared_wav(dir.path(), &RecorderConfig::default());
    session.start().unwrap();
    session.push_buffer(audio(0, 64)).unwrap();

    assert!(session.commit().is_err());
    assert_eq!(session.state(), RecorderState::Recording);
    let retry = session.commit().unwrap_err();
    assert_ne!(retry.code(), ErrorCode::InvalidState);

    session.cancel().unwrap();
    assert_eq!(session.state(), RecorderState::Prepared);
    assert!(!dir.path().join("out.wav.part").exists());
    assert!(target.is_dir());
}
