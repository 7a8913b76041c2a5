//! Caller-facing notifications
//!
//! Every session owns one [`CallbackSlots`] with a single slot per
//! [`EventKind`]. Setting a slot replaces the previous registration and
//! clearing it drops the closure together with whatever it captured.
//! Callbacks run on the session's dispatch thread, never on the caller's.

pub mod dispatcher;

pub use dispatcher::{DispatchMessage, Dispatcher, EventSink};

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::buffer::MediaPacket;
use crate::error::ErrorCode;
use crate::recorder::{RecorderState, RecordingLimitType};

/// Kinds of notification a session can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    LimitReached,
    RecordingStatus,
    Error,
    BufferConsumed,
}

impl EventKind {
    pub const ALL: &'static [EventKind] = &[
        EventKind::StateChanged,
        EventKind::LimitReached,
        EventKind::RecordingStatus,
        EventKind::Error,
        EventKind::BufferConsumed,
    ];
}

/// Progress report delivered while recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingStatus {
    /// Recorded media time, pauses excluded
    pub elapsed_ms: u64,
    pub file_size_kb: u64,
}

/// `(previous, current, by_policy)`
pub type StateChangedCallback = dyn Fn(RecorderState, RecorderState, bool) + Send + Sync;
pub type LimitReachedCallback = dyn Fn(RecordingLimitType) + Send + Sync;
pub type RecordingStatusCallback = dyn Fn(RecordingStatus) + Send + Sync;
/// `(error, state at the time of the error)`
pub type ErrorCallback = dyn Fn(ErrorCode, RecorderState) + Send + Sync;
/// Receives the pushed packet back once the backend is done with it
pub type BufferConsumedCallback = dyn Fn(MediaPacket) + Send + Sync;

/// One registration slot
pub struct Slot<F: ?Sized> {
    inner: Mutex<Option<Arc<F>>>,
}

impl<F: ?Sized> Slot<F> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub fn set(&self, callback: Arc<F>) {
        *self.inner.lock() = Some(callback);
    }

    pub fn clear(&self) {
        self.inner.lock().take();
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Snapshot of the current registration. Callers invoke it after the
    /// slot lock is released, so a callback may itself set or clear slots.
    pub fn get(&self) -> Option<Arc<F>> {
        self.inner.lock().clone()
    }
}

/// Per-session callback registrations
pub struct CallbackSlots {
    pub state_changed: Slot<StateChangedCallback>,
    pub limit_reached: Slot<LimitReachedCallback>,
    pub recording_status: Slot<RecordingStatusCallback>,
    pub error: Slot<ErrorCallback>,
    pub buffer_consumed: Slot<BufferConsumedCallback>,
}

impl CallbackSlots {
    pub fn new() -> Self {
        Self {
            state_changed: Slot::new(),
            limit_reached: Slot::new(),
            recording_status: Slot::new(),
            error: Slot::new(),
            buffer_consumed: Slot::new(),
        }
    }

    pub fn clear(&self, kind: EventKind) {
        match kind {
            EventKind::StateChanged => self.state_changed.clear(),
            EventKind::LimitReached => self.limit_reached.clear(),
            EventKind::RecordingStatus => self.recording_status.clear(),
            EventKind::Error => self.error.clear(),
            EventKind::BufferConsumed => self.buffer_consumed.clear(),
        }
    }

    pub fn is_set(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::StateChanged => self.state_changed.is_set(),
            EventKind::LimitReached => self.limit_reached.is_set(),
            EventKind::RecordingStatus => self.recording_status.is_set(),
            EventKind::Error => self.error.is_set(),
            EventKind::BufferConsumed => self.buffer_consumed.is_set(),
        }
    }
}

impl Default for CallbackSlots {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn setting_a_slot_overwrites() {
        let slots = CallbackSlots::new();
        let hits = Arc::new(AtomicU32::new(0));

        let first = Arc::clone(&hits);
        slots.limit_reached.set(Arc::new(move |_: RecordingLimitType| {
            first.fetch_add(1, Ordering::SeqCst);
        }));
        let second = Arc::clone(&hits);
        slots.limit_reached.set(Arc::new(move |_: RecordingLimitType| {
            second.fetch_add(10, Ordering::SeqCst);
        }));

        (slots.limit_reached.get().unwrap())(RecordingLimitType::Time);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn clearing_drops_captured_context() {
        let slots = CallbackSlots::new();
        let context = Arc::new(());
        let captured = Arc::clone(&context);
        slots.error.set(Arc::new(move |_: ErrorCode, _: RecorderState| {
            let _ = &captured;
        }));
        assert_eq!(Arc::strong_count(&context), 2);

        slots.clear(EventKind::Error);
        assert!(!slots.is_set(EventKind::Error));
        assert_eq!(Arc::strong_count(&context), 1);
    }

    #[test]
    fn clearing_an_empty_slot_is_fine() {
        let slots = CallbackSlots::new();
        for kind in EventKind::ALL {
            slots.clear(*kind);
            assert!(!slots.is_set(*kind));
        }
    }
}
