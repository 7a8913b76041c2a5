//! Error types and backend status translation
//!
//! Every public operation returns [`RecorderError`]. Validation failures are
//! produced locally; anything the backend reports comes in as a
//! [`BackendError`] and goes through [`translate`], the one place where
//! backend status codes are mapped onto the public taxonomy.

use crate::buffer::MediaPacket;
use crate::recorder::RecorderState;

/// Public error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecorderError {
    /// Null handle/pointer, out-of-range enum or numeric value
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation not legal in the current lifecycle state
    #[error("{operation} is not allowed in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: RecorderState,
    },

    /// Allocation failure, including a full buffer ledger
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Requested format/codec/resolution is not supported by the backend
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Storage access denied
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No space left while recording
    #[error("out of storage: {0}")]
    OutOfStorage(String),

    /// Every other backend-reported failure
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

pub type Result<T> = std::result::Result<T, RecorderError>;

impl RecorderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RecorderError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            RecorderError::InvalidState { .. } => ErrorCode::InvalidState,
            RecorderError::OutOfMemory(_) => ErrorCode::OutOfMemory,
            RecorderError::NotSupported(_) => ErrorCode::NotSupported,
            RecorderError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            RecorderError::OutOfStorage(_) => ErrorCode::OutOfStorage,
            RecorderError::InvalidOperation(_) => ErrorCode::InvalidOperation,
        }
    }

    pub(crate) fn invalid_param(msg: impl Into<String>) -> Self {
        RecorderError::InvalidParameter(msg.into())
    }
}

const ERROR_CLASS: i32 = -0x0194_0000;

/// Stable numeric codes, shared with the C ABI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    None = 0,
    InvalidParameter = -22,
    InvalidState = ERROR_CLASS | 0x02,
    OutOfMemory = -12,
    InvalidOperation = -38,
    OutOfStorage = ERROR_CLASS | 0x0a,
    PermissionDenied = -13,
    NotSupported = -95,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::None => "ERROR_NONE",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::OutOfMemory => "OUT_OF_MEMORY",
            ErrorCode::InvalidOperation => "INVALID_OPERATION",
            ErrorCode::OutOfStorage => "OUT_OF_STORAGE",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::NotSupported => "NOT_SUPPORTED",
        }
    }
}

impl From<&RecorderError> for ErrorCode {
    fn from(error: &RecorderError) -> Self {
        error.code()
    }
}

/// Status codes a recording backend can report
///
/// These mirror the classes of failure a media framework distinguishes;
/// each backend maps its own native errors onto them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid attribute type: {0}")]
    InvalidAttrType(String),
    #[error("invalid permission: {0}")]
    InvalidPermission(String),
    #[error("backend not initialized")]
    NotInitialized,

    #[error("pipeline core error: {0}")]
    GstCore(String),
    #[error("pipeline library error: {0}")]
    GstLibrary(String),
    #[error("pipeline resource error: {0}")]
    GstResource(String),
    #[error("pipeline stream error: {0}")]
    GstStream(String),
    #[error("pipeline state change failed: {0}")]
    GstStateChange(String),
    #[error("caps negotiation failed: {0}")]
    GstNegotiation(String),
    #[error("element link failed: {0}")]
    GstLink(String),
    #[error("data flow error: {0}")]
    GstFlow(String),

    #[error("encoder error: {0}")]
    Encoder(String),
    #[error("encoder buffer error: {0}")]
    EncoderBuffer(String),
    #[error("encoder type mismatch: {0}")]
    EncoderWrongType(String),
    #[error("encoder busy: {0}")]
    EncoderWorking(String),

    #[error("response timeout")]
    ResponseTimeout,
    #[error("command already running")]
    CommandRunning,
    #[error("resource creation failed: {0}")]
    ResourceCreation(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("out of storage")]
    OutOfStorage,
    #[error("index out of array: {0}")]
    OutOfArray(String),
    #[error("value out of range: {0}")]
    OutOfRange(String),
    #[error("attribute does not exist: {0}")]
    AttrNotExist(String),

    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("file read error: {0}")]
    FileRead(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::PermissionDenied => BackendError::InvalidPermission(e.to_string()),
            ErrorKind::StorageFull => BackendError::OutOfStorage,
            ErrorKind::NotFound => BackendError::FileNotFound(e.to_string()),
            ErrorKind::OutOfMemory => BackendError::OutOfMemory,
            _ => BackendError::Internal(e.to_string()),
        }
    }
}

/// Map a backend status onto the public taxonomy.
///
/// `op` names the public operation for the log line; `state` is the session
/// state the operation was attempted in.
pub fn translate(op: &'static str, state: RecorderState, error: BackendError) -> RecorderError {
    let message = error.to_string();
    let translated = match error {
        BackendError::InvalidArgument(_) | BackendError::InvalidAttrType(_) => {
            RecorderError::InvalidParameter(message.clone())
        }
        BackendError::InvalidPermission(_) => RecorderError::PermissionDenied(message.clone()),
        BackendError::NotInitialized => RecorderError::InvalidState { operation: op, state },
        BackendError::ResourceCreation(_) | BackendError::OutOfMemory => {
            RecorderError::OutOfMemory(message.clone())
        }
        BackendError::OutOfStorage => RecorderError::OutOfStorage(message.clone()),
        BackendError::OutOfArray(_)
        | BackendError::OutOfRange(_)
        | BackendError::AttrNotExist(_) => RecorderError::NotSupported(message.clone()),
        _ => RecorderError::InvalidOperation(message.clone()),
    };

    log::error!(
        "[{}] {}({}) : backend error ({})",
        op,
        translated.code().name(),
        translated.code().as_i32(),
        message
    );

    translated
}

/// Map an asynchronous backend error onto the code delivered to the
/// error callback. Storage exhaustion keeps its identity; every other
/// runtime failure is fatal for the session and reported as an invalid
/// operation.
pub fn translate_async(error: &BackendError) -> ErrorCode {
    match error {
        BackendError::OutOfStorage => ErrorCode::OutOfStorage,
        _ => ErrorCode::InvalidOperation,
    }
}

/// Failure to push a buffer. The caller gets its packet back.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct PushError {
    pub error: RecorderError,
    pub packet: Box<MediaPacket>,
}

impl PushError {
    pub(crate) fn new(error: RecorderError, packet: MediaPacket) -> Self {
        Self {
            error,
            packet: Box::new(packet),
        }
    }

    pub fn into_packet(self) -> MediaPacket {
        *self.packet
    }

    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }
}

/// Configuration file errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}
