//! File dump backend
//!
//! Writes every pushed payload verbatim, in push order, to the output file.
//! No encoding or muxing happens, which makes this backend useful wherever
//! the buffers are already encoded, for capturing raw streams, and as the
//! reference backend in tests.
//!
//! While recording, data goes to a staging file next to the target
//! (`<target>.part`). Commit renames it over the target, cancel deletes it.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};

use super::{
    staging_path, BackendEvent, BackendLimit, Capabilities, EventSink, MediaTimeline, PushedBuffer,
    RecorderBackend, RecordingReport, NANOS_PER_MS,
};
use crate::config::RecorderConfig;
use crate::error::{BackendError, BackendResult};
use crate::recorder::{Attribute, RecordingSettings, Sources};

struct ActiveRecording {
    target: PathBuf,
    staging: PathBuf,
    writer: BufWriter<File>,
    bytes_written: u64,
    timeline: MediaTimeline,
    paused: bool,
    /// A limit fired; later buffers are consumed without being written
    limit_hit: bool,
    next_status_ms: u64,
    started_at: DateTime<Local>,
}

pub struct FileDumpBackend {
    sink: Option<EventSink>,
    capabilities: Capabilities,
    status_interval_ms: u64,
    settings: Option<RecordingSettings>,
    sources: Sources,
    active: Option<ActiveRecording>,
}

impl FileDumpBackend {
    pub fn new() -> Self {
        Self::with_status_interval(Duration::from_secs(1))
    }

    pub fn from_config(config: &RecorderConfig) -> Self {
        Self::with_status_interval(Duration::from_millis(config.status_interval_ms))
    }

    /// Status notifications are emitted every `interval` of recorded media
    pub fn with_status_interval(interval: Duration) -> Self {
        Self {
            sink: None,
            capabilities: Capabilities::full(),
            status_interval_ms: (interval.as_millis() as u64).max(1),
            settings: None,
            sources: Sources::default(),
            active: None,
        }
    }

    fn emit(&self, event: BackendEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    fn open(&self) -> BackendResult<ActiveRecording> {
        let settings = self.settings.as_ref().ok_or(BackendError::NotInitialized)?;
        let target = settings
            .filename
            .clone()
            .ok_or_else(|| BackendError::InvalidArgument("filename is not set".into()))?;
        let staging = staging_path(&target);

        let file = File::create(&staging)?;
        log::info!(
            "Dumping {:?} to {} (staging {})",
            self.sources,
            target.display(),
            staging.display()
        );

        Ok(ActiveRecording {
            target,
            staging,
            writer: BufWriter::new(file),
            bytes_written: 0,
            timeline: MediaTimeline::default(),
            paused: false,
            limit_hit: false,
            next_status_ms: self.status_interval_ms,
            started_at: Local::now(),
        })
    }

    /// Write one buffer; returns the events it produced
    fn write(&mut self, buffer: &PushedBuffer) -> BackendResult<Vec<BackendEvent>> {
        let settings = self.settings.as_ref().ok_or(BackendError::NotInitialized)?;
        let time_limit_ms = u64::from(settings.time_limit) * 1000;
        let size_limit_bytes = u64::from(settings.size_limit) * 1024;
        let interval = self.status_interval_ms;

        let rec = self.active.as_mut().ok_or(BackendError::NotInitialized)?;
        let mut events = Vec::new();

        if rec.paused || rec.limit_hit {
            return Ok(events);
        }

        let elapsed_ms = rec.timeline.advance(buffer.packet.pts()) / NANOS_PER_MS;

        if time_limit_ms > 0 && elapsed_ms >= time_limit_ms {
            rec.limit_hit = true;
            events.push(BackendEvent::LimitReached(BackendLimit::TimeLimit));
            return Ok(events);
        }

        let data = buffer.packet.data();
        if size_limit_bytes > 0 && rec.bytes_written + data.len() as u64 > size_limit_bytes {
            rec.limit_hit = true;
            events.push(BackendEvent::LimitReached(BackendLimit::MaxSize));
            return Ok(events);
        }

        match rec.writer.write_all(data) {
            Ok(()) => rec.bytes_written += data.len() as u64,
            Err(e) if e.kind() == std::io::ErrorKind::StorageFull => {
                log::error!("Storage full after {} bytes", rec.bytes_written);
                rec.limit_hit = true;
                events.push(BackendEvent::LimitReached(BackendLimit::NoFreeSpace));
                return Ok(events);
            }
            Err(e) => return Err(e.into()),
        }

        while elapsed_ms >= rec.next_status_ms {
            rec.next_status_ms += interval;
            events.push(BackendEvent::RecordingStatus {
                elapsed_ms,
                file_size_kb: rec.bytes_written / 1024,
            });
        }

        Ok(events)
    }

    fn discard(&mut self) -> BackendResult<()> {
        if let Some(rec) = self.active.take() {
            drop(rec.writer);
            match fs::remove_file(&rec.staging) {
                Ok(()) => log::info!("Discarded {}", rec.staging.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Default for FileDumpBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderBackend for FileDumpBackend {
    fn name(&self) -> &'static str {
        "file-dump"
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
            Some(rec) => {
                rec.paused = false;
                rec.timeline.resume();
                log::debug!("Resumed at {} ms", rec.timeline.elapsed_ns() / NANOS_PER_MS);
            }
            None => {
                let rec = self.open()?;
                self.active = Some(rec);
            }
        }
        Ok(())
    }

    fn pause(&mut self) -> BackendResult<()> {
        let rec = self.active.as_mut().ok_or(BackendError::NotInitialized)?;
        rec.paused = true;
        rec.writer.flush()?;
        Ok(())
    }

    fn commit(&mut self) -> BackendResult<RecordingReport> {
        let mut rec = self.active.take().ok_or(BackendError::NotInitialized)?;

        let finalize = rec
            .writer
            .flush()
            .and_then(|_| rec.writer.get_ref().sync_all());
        if let Err(e) = finalize {
            // Put it back so the caller can still cancel
            self.active = Some(rec);
            return Err(e.into());
        }
        drop(rec.writer);

        if let Err(e) = fs::rename(&rec.staging, &rec.target) {
            log::error!("Failed to move {} into place: {}", rec.staging.display(), e);
            // Reopen for append so commit can be retried or the staging file cancelled
            match OpenOptions::new().append(true).open(&rec.staging) {
                Ok(file) => {
                    rec.writer = BufWriter::new(file);
                    self.active = Some(rec);
                }
                Err(reopen) => {
                    log::warn!("Failed to reopen {}: {}", rec.staging.display(), reopen);
                    let _ = fs::remove_file(&rec.staging);
                }
            }
            return Err(e.into());
        }

        Ok(RecordingReport {
            path: rec.target,
            bytes_written: rec.bytes_written,
            duration: Duration::from_nanos(rec.timeline.elapsed_ns()),
            started_at: rec.started_at,
            finished_at: Local::now(),
        })
    }

    fn cancel(&mut self) -> BackendResult<()> {
        self.discard()
    }

    fn push(&mut self, buffer: &PushedBuffer) -> BackendResult<()> {
        let events = self.write(buffer)?;
        for event in events {
            self.emit(event);
        }
        self.emit(BackendEvent::ConsumeComplete(buffer.token));
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(e) = self.discard() {
            log::warn!("Failed to discard staging file: {}", e);
        }
        self.settings = None;
        self.sink = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferLedger, MediaPacket, StreamKind};
    use crate::buffer::ledger::BufferEntry;
    use crate::events::DispatchMessage;
    use crossbeam_channel::Receiver;

    fn backend(dir: &std::path::Path, time_limit: u32, size_limit: u32) -> (FileDumpBackend, Receiver<DispatchMessage>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut backend = FileDumpBackend::with_status_interval(Duration::from_millis(100));
        backend.attach(EventSink::new(tx));

        let mut settings = RecordingSettings::default();
        settings.filename = Some(dir.join("out.aac"));
        settings.file_format = crate::encoding::FileFormat::Adts;
        settings.time_limit = time_limit;
        settings.size_limit = size_limit;
        backend
            .realize(&settings, Sources { video: false, audio: true })
            .unwrap();
        (backend, rx)
    }

    /// Tokens come from a real ledger so they are well formed
    fn buffer(ledger: &mut BufferLedger, pts_ms: u64, len: usize) -> PushedBuffer {
        let packet = MediaPacket::audio(44100, 2, pts_ms * NANOS_PER_MS, vec![0xAB; len]);
        let token = ledger
            .insert(BufferEntry {
                packet: packet.clone(),
                kind: StreamKind::Audio,
                descriptor: None,
            })
            .unwrap();
        PushedBuffer {
            token,
            packet,
            descriptor: None,
        }
    }

    fn events(rx: &Receiver<DispatchMessage>) -> Vec<BackendEvent> {
        rx.try_iter()
            .filter_map(|m| match m {
                DispatchMessage::Backend(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn commit_renames_staging_over_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.aac");
        fs::write(&target, b"old contents").unwrap();

        let (mut backend, rx) = backend(dir.path(), 0, 0);
        let mut ledger = BufferLedger::new(8);
        backend.record().unwrap();
        assert!(dir.path().join("out.aac.part").exists());

        for i in 0..4 {
            backend.push(&buffer(&mut ledger, i * 50, 100)).unwrap();
        }
        let report = backend.commit().unwrap();

        assert_eq!(report.bytes_written, 400);
        assert_eq!(report.duration, Duration::from_millis(150));
        assert_eq!(fs::read(&target).unwrap(), vec![0xAB; 400]);
        assert!(!dir.path().join("out.aac.part").exists());

        let consumed = events(&rx)
            .into_iter()
            .filter(|e| matches!(e, BackendEvent::ConsumeComplete(_)))
            .count();
        assert_eq!(consumed, 4);
    }

    #[test]
    fn failed_rename_keeps_recording_cancellable() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, _rx) = backend(dir.path(), 0, 0);
        let mut ledger = BufferLedger::new(4);
        // A directory sits where the output should go
        fs::create_dir(dir.path().join("out.aac")).unwrap();

        backend.record().unwrap();
        backend.push(&buffer(&mut ledger, 0, 64)).unwrap();
        assert!(backend.commit().is_err());
        assert!(backend.active.is_some());

        // Retry fails the same way rather than losing the recording
        assert!(!matches!(backend.commit(), Err(BackendError::NotInitialized)));

        backend.cancel().unwrap();
        assert!(backend.active.is_none());
        assert!(!dir.path().join("out.aac.part").exists());
        assert!(dir.path().join("out.aac").is_dir());
    }

    #[test]
    fn cancel_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, _rx) = backend(dir.path(), 0, 0);
        let mut ledger = BufferLedger::new(4);
        backend.record().unwrap();
        backend.push(&buffer(&mut ledger, 0, 64)).unwrap();
        backend.cancel().unwrap();

        assert!(!dir.path().join("out.aac").exists());
        assert!(!dir.path().join("out.aac.part").exists());
    }

    #[test]
    fn size_limit_fires_once_and_drops_later_buffers() {
        let dir = tempfile::tempdir().unwrap();
        // 1 KB limit
        let (mut backend, rx) = backend(dir.path(), 0, 1);
        let mut ledger = BufferLedger::new(8);
        backend.record().unwrap();
        for i in 0..5 {
            backend.push(&buffer(&mut ledger, i * 10, 400)).unwrap();
        }

        let events = events(&rx);
        let limits: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, BackendEvent::LimitReached(_)))
            .collect();
        assert_eq!(limits, vec![&BackendEvent::LimitReached(BackendLimit::MaxSize)]);
        // Every buffer is still consumed
        assert_eq!(
            events.iter().filter(|e| matches!(e, BackendEvent::ConsumeComplete(_))).count(),
            5
        );

        let report = backend.commit().unwrap();
        assert_eq!(report.bytes_written, 800);
    }

    #[test]
    fn time_limit_uses_media_time() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, rx) = backend(dir.path(), 1, 0);
        let mut ledger = BufferLedger::new(8);
        backend.record().unwrap();
        backend.push(&buffer(&mut ledger, 0, 10)).unwrap();
        backend.push(&buffer(&mut ledger, 999, 10)).unwrap();
        backend.push(&buffer(&mut ledger, 1000, 10)).unwrap();

        assert!(events(&rx).contains(&BackendEvent::LimitReached(BackendLimit::TimeLimit)));
        assert_eq!(backend.commit().unwrap().bytes_written, 20);
    }

    #[test]
    fn status_every_interval() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, rx) = backend(dir.path(), 0, 0);
        let mut ledger = BufferLedger::new(8);
        backend.record().unwrap();
        for ms in [0, 50, 100, 150, 250] {
            let b = buffer(&mut ledger, ms, 10);
            backend.push(&b).unwrap();
            ledger.release(b.token).unwrap();
        }

        let status: Vec<_> = events(&rx)
            .into_iter()
            .filter_map(|e| match e {
                BackendEvent::RecordingStatus { elapsed_ms, .. } => Some(elapsed_ms),
                _ => None,
            })
            .collect();
        assert_eq!(status, vec![100, 250]);
    }

    #[test]
    fn pause_excludes_gap_from_duration() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, _rx) = backend(dir.path(), 0, 0);
        let mut ledger = BufferLedger::new(8);
        backend.record().unwrap();
        backend.push(&buffer(&mut ledger, 0, 10)).unwrap();
        backend.push(&buffer(&mut ledger, 100, 10)).unwrap();
        backend.pause().unwrap();
        // Dropped while paused
        backend.push(&buffer(&mut ledger, 200, 10)).unwrap();
        backend.record().unwrap();
        backend.push(&buffer(&mut ledger, 5000, 10)).unwrap();
        backend.push(&buffer(&mut ledger, 5100, 10)).unwrap();

        let report = backend.commit().unwrap();
        assert_eq!(report.bytes_written, 40);
        assert_eq!(report.duration, Duration::from_millis(200));
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (mut backend, _rx) = backend(&dir.path().join("missing"), 0, 0);
        assert!(matches!(backend.record(), Err(BackendError::FileNotFound(_))));
    }

    #[test]
    fn incompatible_streams_fail_realize() {
        let mut backend = FileDumpBackend::new();
        let mut settings = RecordingSettings::default();
        settings.file_format = crate::encoding::FileFormat::Amr;
        let err = backend
            .realize(&settings, Sources { video: true, audio: false })
            .unwrap_err();
        assert!(matches!(err, BackendError::EncoderWrongType(_)));
    }
}
