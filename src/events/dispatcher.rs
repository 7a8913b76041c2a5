// Single consumer thread routing backend events to the registered callbacks
//
// Backends and the session post DispatchMessages into an unbounded channel.
// The dispatch thread handles them strictly in order, so at most one
// callback runs at a time for a given session.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{CallbackSlots, RecordingStatus};
use crate::backend::BackendEvent;
use crate::buffer::ledger::ReleaseMiss;
use crate::buffer::BufferToken;
use crate::error::translate_async;
use crate::recorder::session::SessionCore;
use crate::recorder::{RecorderState, RecordingLimitType};

/// Messages consumed by the dispatch thread
#[derive(Debug)]
pub enum DispatchMessage {
    Backend(BackendEvent),
    StateChanged {
        previous: RecorderState,
        current: RecorderState,
        by_policy: bool,
    },
    Shutdown,
}

/// Handle a backend uses to report events
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<DispatchMessage>,
}

impl EventSink {
    pub fn new(tx: Sender<DispatchMessage>) -> Self {
        Self { tx }
    }

    /// Post an event. Returns false once the session is gone.
    pub fn emit(&self, event: BackendEvent) -> bool {
        match self.tx.send(DispatchMessage::Backend(event)) {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Dropping backend event, dispatcher closed: {:?}", e.into_inner());
                false
            }
        }
    }
}

pub struct Dispatcher {
    tx: Sender<DispatchMessage>,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn the dispatch thread for a session
    pub(crate) fn spawn(
        session_id: Uuid,
        core: Arc<Mutex<SessionCore>>,
        callbacks: Arc<CallbackSlots>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<DispatchMessage>();

        let thread = std::thread::Builder::new()
            .name("streamrecorder-dispatch".into())
            .spawn(move || run(session_id, rx, core, callbacks))?;

        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    pub fn sink(&self) -> EventSink {
        EventSink::new(self.tx.clone())
    }

    pub fn state_changed(&self, previous: RecorderState, current: RecorderState, by_policy: bool) {
        let _ = self.tx.send(DispatchMessage::StateChanged {
            previous,
            current,
            by_policy,
        });
    }

    /// Deliver everything already queued, then stop the thread
    pub fn shutdown(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        let _ = self.tx.send(DispatchMessage::Shutdown);

        // A callback dropping the last session handle ends up here on the
        // dispatch thread itself; it exits on its own after this message.
        if handle.thread().id() == std::thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            log::error!("Dispatch thread panicked");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(session_id: Uuid, rx: Receiver<DispatchMessage>, core: Arc<Mutex<SessionCore>>, callbacks: Arc<CallbackSlots>) {
    log::debug!("[{}] Dispatch thread started", session_id);

    for message in rx.iter() {
        if !dispatch(session_id, message, &core, &callbacks) {
            break;
        }
    }

    log::debug!("[{}] Dispatch thread finished", session_id);
}

/// Handle one message. Returns false when the thread should stop.
pub(crate) fn dispatch(
    session_id: Uuid,
    message: DispatchMessage,
    core: &Mutex<SessionCore>,
    callbacks: &CallbackSlots,
) -> bool {
    match message {
        DispatchMessage::Shutdown => return false,

        DispatchMessage::StateChanged {
            previous,
            current,
            by_policy,
        } => {
            if let Some(cb) = callbacks.state_changed.get() {
                cb(previous, current, by_policy);
            }
        }

        DispatchMessage::Backend(BackendEvent::LimitReached(limit)) => {
            let kind = RecordingLimitType::from(limit);
            log::info!("[{}] Recording limit reached: {:?}", session_id, kind);
            if let Some(cb) = callbacks.limit_reached.get() {
                cb(kind);
            }
        }

        DispatchMessage::Backend(BackendEvent::RecordingStatus {
            elapsed_ms,
            file_size_kb,
        }) => {
            if let Some(cb) = callbacks.recording_status.get() {
                cb(RecordingStatus {
                    elapsed_ms,
                    file_size_kb,
                });
            }
        }

        DispatchMessage::Backend(BackendEvent::Error(error)) => {
            let code = translate_async(&error);
            let state = core.lock().state;
            log::error!(
                "[{}] Backend error in state {:?}: {} -> {}",
                session_id,
                state,
                error,
                code.name()
            );
            if let Some(cb) = callbacks.error.get() {
                cb(code, state);
            }
        }

        DispatchMessage::Backend(BackendEvent::ConsumeComplete(token)) => {
            consume_complete(session_id, token, core, callbacks);
        }
    }
    true
}

fn consume_complete(session_id: Uuid, token: BufferToken, core: &Mutex<SessionCore>, callbacks: &CallbackSlots) {
    let released = core.lock().ledger.release(token);

    match released {
        Ok(entry) => {
            log::debug!(
                "[{}] Buffer {} consumed ({:?}, {} bytes)",
                session_id,
                token,
                entry.kind,
                entry.packet.len()
            );
            // The frame descriptor goes with the entry; only the caller's
            // packet is handed back.
            match callbacks.buffer_consumed.get() {
                Some(cb) => cb(entry.packet),
                None => log::debug!("[{}] No consumed callback, releasing {}", session_id, token),
            }
        }
        Err(ReleaseMiss::Stale { current_generation }) => {
            log::warn!(
                "[{}] Stale consumption token {} (slot now at generation {})",
                session_id,
                token,
                current_generation
            );
        }
        Err(miss) => {
            log::warn!("[{}] Consumption token {} matches no buffer: {:?}", session_id, token, miss);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ledger::BufferEntry;
    use crate::buffer::{BufferLedger, MediaPacket, StreamKind};
    use crate::error::{BackendError, ErrorCode};
    use crate::backend::BackendLimit;

    fn core_with(state: RecorderState) -> Mutex<SessionCore> {
        Mutex::new(SessionCore {
            state,
            ledger: BufferLedger::new(4),
        })
    }

    fn audio_entry(pts: u64) -> BufferEntry {
        BufferEntry {
            packet: MediaPacket::audio(8000, 1, pts, vec![7u8; 32]),
            kind: StreamKind::Audio,
            descriptor: None,
        }
    }

    #[test]
    fn consumed_buffer_goes_back_to_the_caller() {
        let core = core_with(RecorderState::Recording);
        let token = core.lock().ledger.insert(audio_entry(5)).unwrap();

        let callbacks = CallbackSlots::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        callbacks.buffer_consumed.set(Arc::new(move |packet: MediaPacket| {
            tx.send(packet.pts()).unwrap();
        }));

        let msg = DispatchMessage::Backend(BackendEvent::ConsumeComplete(token));
        assert!(dispatch(Uuid::nil(), msg, &core, &callbacks));
        assert_eq!(rx.try_recv().unwrap(), 5);
        assert!(core.lock().ledger.is_empty());
    }

    #[test]
    fn consumed_without_callback_still_releases() {
        let core = core_with(RecorderState::Recording);
        let token = core.lock().ledger.insert(audio_entry(1)).unwrap();
        let callbacks = CallbackSlots::new();

        dispatch(Uuid::nil(), DispatchMessage::Backend(BackendEvent::ConsumeComplete(token)), &core, &callbacks);
        assert!(core.lock().ledger.is_empty());
    }

    #[test]
    fn stale_token_is_ignored() {
        let core = core_with(RecorderState::Recording);
        let old = core.lock().ledger.insert(audio_entry(1)).unwrap();
        core.lock().ledger.release(old).unwrap();
        let live = core.lock().ledger.insert(audio_entry(2)).unwrap();

        let callbacks = CallbackSlots::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        callbacks.buffer_consumed.set(Arc::new(move |packet: MediaPacket| {
            tx.send(packet.pts()).unwrap();
        }));

        dispatch(Uuid::nil(), DispatchMessage::Backend(BackendEvent::ConsumeComplete(old)), &core, &callbacks);
        assert!(rx.try_recv().is_err());
        assert!(core.lock().ledger.get(live).is_some());
    }

    #[test]
    fn error_reports_translated_code_and_current_state() {
        let core = core_with(RecorderState::Paused);
        let callbacks = CallbackSlots::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        callbacks.error.set(Arc::new(move |code: ErrorCode, state: RecorderState| {
            tx.send((code, state)).unwrap();
        }));

        let msg = DispatchMessage::Backend(BackendEvent::Error(BackendError::OutOfStorage));
        dispatch(Uuid::nil(), msg, &core, &callbacks);
        let msg = DispatchMessage::Backend(BackendEvent::Error(BackendError::GstStream("eos".into())));
        dispatch(Uuid::nil(), msg, &core, &callbacks);

        assert_eq!(rx.try_recv().unwrap(), (ErrorCode::OutOfStorage, RecorderState::Paused));
        assert_eq!(rx.try_recv().unwrap(), (ErrorCode::InvalidOperation, RecorderState::Paused));
    }

    #[test]
    fn limit_kinds_are_translated() {
        let core = core_with(RecorderState::Recording);
        let callbacks = CallbackSlots::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        callbacks.limit_reached.set(Arc::new(move |kind: RecordingLimitType| {
            tx.send(kind).unwrap();
        }));

        for limit in [BackendLimit::MaxSize, BackendLimit::TimeLimit, BackendLimit::NoFreeSpace] {
            dispatch(Uuid::nil(), DispatchMessage::Backend(BackendEvent::LimitReached(limit)), &core, &callbacks);
        }
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![RecordingLimitType::Size, RecordingLimitType::Time, RecordingLimitType::FreeSpace]
        );
    }

    #[test]
    fn shutdown_stops_the_loop() {
        let core = core_with(RecorderState::Created);
        let callbacks = CallbackSlots::new();
        assert!(!dispatch(Uuid::nil(), DispatchMessage::Shutdown, &core, &callbacks));
    }

    #[test]
    fn thread_delivers_in_order_before_shutdown() {
        let core = Arc::new(core_with(RecorderState::Created));
        let callbacks = Arc::new(CallbackSlots::new());
        let (tx, rx) = crossbeam_channel::unbounded();
        callbacks.state_changed.set(Arc::new(move |prev: RecorderState, cur: RecorderState, _: bool| {
            tx.send((prev, cur)).unwrap();
        }));

        let mut dispatcher = Dispatcher::spawn(Uuid::nil(), core, callbacks).unwrap();
        dispatcher.state_changed(RecorderState::Created, RecorderState::Prepared, false);
        dispatcher.state_changed(RecorderState::Prepared, RecorderState::Recording, false);
        dispatcher.shutdown();

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                (RecorderState::Created, RecorderState::Prepared),
                (RecorderState::Prepared, RecorderState::Recording),
            ]
        );
    }
}
