//! Recorder lifecycle states and the transition table
//!
//! ```text
//! None -> Created -> Prepared -> Recording <-> Paused
//!                       ^            |            |
//!                       +--commit/cancel----------+
//! ```

use serde::{Deserialize, Serialize};

use crate::error::RecorderError;

/// Lifecycle state of a recorder session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecorderState {
    /// Not created, or destroyed
    None,
    /// Created, not prepared; the only state where attributes can change
    Created,
    /// Backend pipeline realized and ready to record
    Prepared,
    /// Recording media
    Recording,
    /// Recording paused
    Paused,
}

impl Default for RecorderState {
    fn default() -> Self {
        Self::None
    }
}

impl RecorderState {
    pub fn is_recording(&self) -> bool {
        matches!(self, RecorderState::Recording | RecorderState::Paused)
    }
}

/// Operations that are gated by the lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    EnableSource,
    Configure,
    Prepare,
    Unprepare,
    Start,
    Pause,
    Commit,
    Cancel,
    PushBuffer,
    Destroy,
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::EnableSource => "enable_source",
            Operation::Configure => "configure",
            Operation::Prepare => "prepare",
            Operation::Unprepare => "unprepare",
            Operation::Start => "start",
            Operation::Pause => "pause",
            Operation::Commit => "commit",
            Operation::Cancel => "cancel",
            Operation::PushBuffer => "push_buffer",
            Operation::Destroy => "destroy",
        }
    }

    /// Whether the operation may run from `state`
    pub fn allowed_from(&self, state: RecorderState) -> bool {
        use RecorderState::*;
        match self {
            Operation::EnableSource | Operation::Configure | Operation::Prepare | Operation::Destroy => {
                state == Created
            }
            Operation::Unprepare => state == Prepared,
            Operation::Start => matches!(state, Prepared | Paused),
            Operation::Pause => state == Recording,
            Operation::Commit | Operation::Cancel | Operation::PushBuffer => matches!(state, Recording | Paused),
        }
    }

    /// State the session ends up in after the operation succeeds
    pub fn target(&self, from: RecorderState) -> RecorderState {
        use RecorderState::*;
        match self {
            Operation::EnableSource | Operation::Configure => Created,
            Operation::Prepare => Prepared,
            Operation::Unprepare => Created,
            Operation::Start => Recording,
            Operation::Pause => Paused,
            Operation::Commit | Operation::Cancel => Prepared,
            Operation::PushBuffer => from,
            Operation::Destroy => None,
        }
    }

    /// Check the operation against `state`, producing the state error if it is
    /// not allowed
    pub fn check(&self, state: RecorderState) -> Result<RecorderState, RecorderError> {
        if self.allowed_from(state) {
            Ok(self.target(state))
        } else {
            log::error!("{}: invalid state {:?}", self.name(), state);
            Err(RecorderError::InvalidState {
                operation: self.name(),
                state,
            })
        }
    }
}

/// Which elementary streams feed the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Video,
    Audio,
    VideoAudio,
}

impl SourceKind {
    pub fn includes_video(&self) -> bool {
        matches!(self, SourceKind::Video | SourceKind::VideoAudio)
    }

    pub fn includes_audio(&self) -> bool {
        matches!(self, SourceKind::Audio | SourceKind::VideoAudio)
    }
}

impl TryFrom<i32> for SourceKind {
    type Error = RecorderError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SourceKind::Video),
            1 => Ok(SourceKind::Audio),
            2 => Ok(SourceKind::VideoAudio),
            _ => Err(RecorderError::invalid_param(format!("invalid source type {}", value))),
        }
    }
}

/// Set of enabled sources; enabling is cumulative
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sources {
    pub video: bool,
    pub audio: bool,
}

impl Sources {
    pub fn enable(&mut self, kind: SourceKind) {
        self.video |= kind.includes_video();
        self.audio |= kind.includes_audio();
    }

    pub fn any(&self) -> bool {
        self.video || self.audio
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [RecorderState; 5] = [
        RecorderState::None,
        RecorderState::Created,
        RecorderState::Prepared,
        RecorderState::Recording,
        RecorderState::Paused,
    ];

    #[test]
    fn transition_table() {
        use RecorderState::*;
        let cases = [
            (Operation::Prepare, Created, Prepared),
            (Operation::Unprepare, Prepared, Created),
            (Operation::Start, Prepared, Recording),
            (Operation::Start, Paused, Recording),
            (Operation::Pause, Recording, Paused),
            (Operation::Commit, Recording, Prepared),
            (Operation::Commit, Paused, Prepared),
            (Operation::Cancel, Recording, Prepared),
            (Operation::Cancel, Paused, Prepared),
            (Operation::Destroy, Created, None),
        ];
        for (op, from, to) in cases {
            assert_eq!(op.check(from).unwrap(), to, "{:?} from {:?}", op, from);
        }
    }

    #[test]
    fn configure_only_from_created() {
        for state in ALL_STATES {
            let allowed = Operation::Configure.allowed_from(state);
            assert_eq!(allowed, state == RecorderState::Created, "{:?}", state);
            assert_eq!(Operation::EnableSource.allowed_from(state), allowed);
        }
    }

    #[test]
    fn destroy_rejected_outside_created() {
        for state in ALL_STATES.into_iter().filter(|s| *s != RecorderState::Created) {
            let err = Operation::Destroy.check(state).unwrap_err();
            assert_eq!(
                err,
                RecorderError::InvalidState {
                    operation: "destroy",
                    state
                }
            );
        }
    }

    #[test]
    fn pause_needs_recording() {
        assert!(Operation::Pause.check(RecorderState::Paused).is_err());
        assert!(Operation::Pause.check(RecorderState::Prepared).is_err());
    }

    #[test]
    fn sources_accumulate() {
        let mut sources = Sources::default();
        assert!(!sources.any());
        sources.enable(SourceKind::Video);
        sources.enable(SourceKind::Audio);
        assert_eq!(sources, Sources { video: true, audio: true });
    }

    #[test]
    fn source_kind_from_int() {
        assert_eq!(SourceKind::try_from(2).unwrap(), SourceKind::VideoAudio);
        assert!(SourceKind::try_from(3).is_err());
    }
}
