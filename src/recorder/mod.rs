// Recorder session: lifecycle state machine, attribute facade and the
// buffer push path

pub mod attributes;
pub mod session;
pub mod state;

pub use attributes::{Attribute, RecordingLimitType, RecordingSettings, Resolution};
pub use session::{DestroyError, Session};
pub use state::{Operation, RecorderState, SourceKind, Sources};
