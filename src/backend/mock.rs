//! Scripted backend for exercising sessions without a media framework
//!
//! The backend records every call, fails the next call on request, and
//! holds pushed buffers until the test tells it to consume them. Tests
//! drive it through a [`ScriptHandle`] that stays valid after the backend
//! has been moved into a session.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;

use super::{BackendEvent, Capabilities, EventSink, PushedBuffer, RecorderBackend, RecordingReport};
use crate::error::{BackendError, BackendResult};
use crate::recorder::{Attribute, RecordingSettings, Sources};

/// One call the session made into the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Apply(Attribute),
    Realize(Sources),
    Unrealize,
    Record,
    Pause,
    Commit,
    Cancel,
    Push(crate::buffer::BufferToken),
    Destroy,
}

#[derive(Default)]
struct Script {
    calls: Vec<BackendCall>,
    fail_next: Option<BackendError>,
    held: Vec<PushedBuffer>,
    sink: Option<EventSink>,
    settings: Option<RecordingSettings>,
    capabilities: Option<Capabilities>,
}

/// Test-side view of a [`ScriptedBackend`]
#[derive(Clone)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptHandle {
    pub fn calls(&self) -> Vec<BackendCall> {
        self.script.lock().calls.clone()
    }

    /// Make the next backend call fail with `error`
    pub fn fail_next(&self, error: BackendError) {
        self.script.lock().fail_next = Some(error);
    }

    /// Buffers pushed and not yet consumed
    pub fn held(&self) -> Vec<PushedBuffer> {
        self.script.lock().held.clone()
    }

    /// Signal consumption of every held buffer, oldest first
    pub fn consume_all(&self) {
        let (held, sink) = {
            let mut script = self.script.lock();
            (std::mem::take(&mut script.held), script.sink.clone())
        };
        if let Some(sink) = sink {
            for buffer in held {
                sink.emit(BackendEvent::ConsumeComplete(buffer.token));
            }
        }
    }

    /// Inject an arbitrary backend event
    pub fn emit(&self, event: BackendEvent) {
        let sink = self.script.lock().sink.clone();
        match sink {
            Some(sink) => {
                sink.emit(event);
            }
            None => log::warn!("Scripted backend is not attached, dropping {:?}", event),
        }
    }

    /// Advertise a narrower capability set
    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.script.lock().capabilities = Some(capabilities);
    }
}

pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle {
            script: Arc::clone(&self.script),
        }
    }

    fn call(&self, call: BackendCall) -> BackendResult<()> {
        let mut script = self.script.lock();
        script.calls.push(call);
        match script.fail_next.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn attach(&mut self, sink: EventSink) {
        self.script.lock().sink = Some(sink);
    }

    fn capabilities(&self) -> Capabilities {
        self.script
            .lock()
            .capabilities
            .clone()
            .unwrap_or_else(Capabilities::full)
    }

    fn apply(&mut self, attribute: &Attribute) -> BackendResult<()> {
        self.call(BackendCall::Apply(attribute.clone()))?;
        self.capabilities().check(attribute)
    }

    fn realize(&mut self, settings: &RecordingSettings, sources: Sources) -> BackendResult<()> {
        self.call(BackendCall::Realize(sources))?;
        self.script.lock().settings = Some(settings.clone());
        Ok(())
    }

    fn unrealize(&mut self) -> BackendResult<()> {
        self.call(BackendCall::Unrealize)?;
        self.script.lock().settings = None;
        Ok(())
    }

    fn record(&mut self) -> BackendResult<()> {
        self.call(BackendCall::Record)
    }

    fn pause(&mut self) -> BackendResult<()> {
        self.call(BackendCall::Pause)
    }

    fn commit(&mut self) -> BackendResult<RecordingReport> {
        self.call(BackendCall::Commit)?;
        let path = self
            .script
            .lock()
            .settings
            .as_ref()
            .and_then(|s| s.filename.clone())
            .ok_or(BackendError::NotInitialized)?;
        let now = Local::now();
        Ok(RecordingReport {
            path,
            bytes_written: 0,
            duration: Duration::ZERO,
            started_at: now,
            finished_at: now,
        })
    }

    fn cancel(&mut self) -> BackendResult<()> {
        self.call(BackendCall::Cancel)
    }

    fn push(&mut self, buffer: &PushedBuffer) -> BackendResult<()> {
        self.call(BackendCall::Push(buffer.token))?;
        self.script.lock().held.push(buffer.clone());
        Ok(())
    }

    fn destroy(&mut self) {
        let mut script = self.script.lock();
        script.calls.push(BackendCall::Destroy);
        script.sink = None;
    }
}
