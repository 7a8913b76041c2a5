//! C ABI
//!
//! Every function returns an `ErrorCode` as `c_int` (0 on success). A session
//! handle is an opaque `*mut Session` obtained from
//! [`streamrecorder_create`] and released by [`streamrecorder_destroy`].
//! Enums cross the boundary as their index in the corresponding `ALL`
//! table; out-of-range values fail with `INVALID_PARAMETER`.
//!
//! Packets are heap objects owned by whoever holds the pointer. Pushing
//! transfers ownership to the session; the buffer-consumed callback hands
//! a packet back, to be freed with [`streamrecorder_packet_destroy`]. A
//! failed push leaves the packet with the caller.
//!
//! Callbacks run on the session's dispatch thread.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::mem::ManuallyDrop;
use std::path::Path;
use std::ptr;

use crate::buffer::MediaPacket;
use crate::config::{default_config_path, RecorderConfig};
use crate::encoding::{AudioCodec, FileFormat, VideoCodec, VideoSourceFormat};
use crate::error::{ErrorCode, RecorderError, Result};
use crate::events::RecordingStatus;
use crate::recorder::{Operation, RecorderState, RecordingLimitType, Session, SourceKind};

pub type StateChangedCb = extern "C" fn(previous: c_int, current: c_int, by_policy: bool, user_data: *mut c_void);
pub type LimitReachedCb = extern "C" fn(limit_type: c_int, user_data: *mut c_void);
pub type RecordingStatusCb = extern "C" fn(elapsed_ms: u64, file_size_kb: u64, user_data: *mut c_void);
pub type ErrorCb = extern "C" fn(error: c_int, state: c_int, user_data: *mut c_void);
pub type BufferConsumedCb = extern "C" fn(packet: *mut MediaPacket, user_data: *mut c_void);

pub type SupportedFileFormatCb = extern "C" fn(format: c_int, user_data: *mut c_void) -> bool;
pub type SupportedEncoderCb = extern "C" fn(codec: c_int, user_data: *mut c_void) -> bool;
pub type SupportedResolutionCb = extern "C" fn(width: c_int, height: c_int, user_data: *mut c_void) -> bool;

/// Caller context carried into callbacks. Stored as an address so the
/// closures holding it stay `Send + Sync`.
#[derive(Clone, Copy)]
struct UserData(usize);

impl UserData {
    fn new(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }

    fn ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }
}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => ErrorCode::None.as_i32(),
        Err(e) => e.code().as_i32(),
    }
}

fn state_code(state: RecorderState) -> c_int {
    match state {
        RecorderState::None => 0,
        RecorderState::Created => 1,
        RecorderState::Prepared => 2,
        RecorderState::Recording => 3,
        RecorderState::Paused => 4,
    }
}

fn limit_code(limit: RecordingLimitType) -> c_int {
    match limit {
        RecordingLimitType::Time => 0,
        RecordingLimitType::Size => 1,
        RecordingLimitType::FreeSpace => 2,
    }
}

fn index_of<T: PartialEq>(all: &[T], value: &T) -> c_int {
    all.iter().position(|v| v == value).map_or(-1, |i| i as c_int)
}

fn to_u32(value: c_int, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| RecorderError::invalid_param(format!("negative {}: {}", what, value)))
}

unsafe fn with_session(handle: *mut Session, f: impl FnOnce(&mut Session) -> Result<()>) -> c_int {
    let result = match handle.as_mut() {
        Some(session) => f(session),
        None => Err(RecorderError::invalid_param("null session handle")),
    };
    status(result)
}

unsafe fn out_slot<'a, T>(out: *mut T) -> Result<&'a mut T> {
    out.as_mut().ok_or_else(|| RecorderError::invalid_param("null out pointer"))
}

unsafe fn write_out<T>(out: *mut T, value: T) -> Result<()> {
    *out_slot(out)? = value;
    Ok(())
}

unsafe fn copy_payload(data: *const u8, len: usize) -> Result<Vec<u8>> {
    if data.is_null() {
        return Err(RecorderError::invalid_param("null payload"));
    }
    Ok(std::slice::from_raw_parts(data, len).to_vec())
}

// Lifecycle

/// Create a session on the default backend, with defaults from the user's
/// config file when one exists.
#[no_mangle]
pub unsafe extern "C" fn streamrecorder_create(out: *mut *mut Session) -> c_int {
    if out.is_null() {
        return ErrorCode::InvalidParameter.as_i32();
    }
    create_from(out, &default_config_path())
}

/// Like [`streamrecorder_create`], reading defaults from `config_path`.
/// A missing file means built-in defaults.
#[no_mangle]
pub unsafe extern "C" fn streamrecorder_create_with_config(
    config_path: *const c_char,
    out: *mut *mut Session,
) -> c_int {
    if out.is_null() || config_path.is_null() {
        return ErrorCode::InvalidParameter.as_i32();
    }
    match CStr::from_ptr(config_path).to_str() {
        Ok(path) => create_from(out, Path::new(path)),
        Err(_) => ErrorCode::InvalidParameter.as_i32(),
    }
}

unsafe fn create_from(out: *mut *mut Session, config_path: &Path) -> c_int {
    let config = RecorderConfig::load_or_default(config_path);
    match crate::open_session(&config) {
        Ok(session) => {
            *out = Box::into_raw(Box::new(session));
            ErrorCode::None.as_i32()
        }
        Err(e) => e.code().as_i32(),
    }
}

/// Release a session. Only legal in the Created state; on failure the
/// handle stays valid.
#[no_mangle]
pub unsafe extern "C" fn streamrecorder_destroy(handle: *mut Session) -> c_int {
    let Some(session) = handle.as_ref() else {
        return ErrorCode::InvalidParameter.as_i32();
    };
    if let Err(e) = Operation::Destroy.check(session.state()) {
        return e.code().as_i32();
    }

    let session = *Box::from_raw(handle);
    match session.destroy() {
        Ok(()) => ErrorCode::None.as_i32(),
        Err(e) => {
            // The state was checked above; the session is dropped regardless
            log::error!("Destroy failed after state check: {}", e);
            e.error.code().as_i32()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_enable_source(handle: *mut Session, kind: c_int) -> c_int {
    with_session(handle, |s| s.enable_source(SourceKind::try_from(kind)?))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_prepare(handle: *mut Session) -> c_int {
    with_session(handle, |s| s.prepare())
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_unprepare(handle: *mut Session) -> c_int {
    with_session(handle, |s| s.unprepare())
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_start(handle: *mut Session) -> c_int {
    with_session(handle, |s| s.start())
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_pause(handle: *mut Session) -> c_int {
    with_session(handle, |s| s.pause())
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_commit(handle: *mut Session) -> c_int {
    with_session(handle, |s| {
        let report = s.commit()?;
        log::debug!("Committed {} ({} bytes)", report.path.display(), report.bytes_written);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_cancel(handle: *mut Session) -> c_int {
    with_session(handle, |s| s.cancel())
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_state(handle: *mut Session, state: *mut c_int) -> c_int {
    with_session(handle, |s| write_out(state, state_code(s.state())))
}

// Packets

/// Copy a raw video frame into a new packet
#[no_mangle]
pub unsafe extern "C" fn streamrecorder_packet_create_video(
    format: c_int,
    width: c_int,
    height: c_int,
    stride: c_int,
    pts: u64,
    data: *const u8,
    len: usize,
    out: *mut *mut MediaPacket,
) -> c_int {
    let result = (|| {
        let format = VideoSourceFormat::try_from(format)?;
        let width = to_u32(width, "width")?;
        let height = to_u32(height, "height")?;
        let stride = to_u32(stride, "stride")?;
        let payload = copy_payload(data, len)?;
        let packet = MediaPacket::video_with_stride(format, width, height, stride, pts, payload);
        write_out(out, Box::into_raw(Box::new(packet)))
    })();
    status(result)
}

/// Copy interleaved S16LE samples into a new packet
#[no_mangle]
pub unsafe extern "C" fn streamrecorder_packet_create_audio(
    samplerate: c_int,
    channels: c_int,
    pts: u64,
    data: *const u8,
    len: usize,
    out: *mut *mut MediaPacket,
) -> c_int {
    let result = (|| {
        let samplerate = to_u32(samplerate, "samplerate")?;
        let channels = to_u32(channels, "channels")?;
        let payload = copy_payload(data, len)?;
        let packet = MediaPacket::audio(samplerate, channels, pts, payload);
        write_out(out, Box::into_raw(Box::new(packet)))
    })();
    status(result)
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_packet_get_data(
    packet: *const MediaPacket,
    data: *mut *const u8,
    len: *mut usize,
) -> c_int {
    let result = match packet.as_ref() {
        Some(packet) => write_out(data, packet.data().as_ptr()).and_then(|_| write_out(len, packet.len())),
        None => Err(RecorderError::invalid_param("null packet")),
    };
    status(result)
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_packet_destroy(packet: *mut MediaPacket) -> c_int {
    if packet.is_null() {
        return ErrorCode::InvalidParameter.as_i32();
    }
    drop(Box::from_raw(packet));
    ErrorCode::None.as_i32()
}

/// Push a packet. On success the session owns it and `packet` must not be
/// used again; on failure it still belongs to the caller.
#[no_mangle]
pub unsafe extern "C" fn streamrecorder_push_buffer(handle: *mut Session, packet: *mut MediaPacket) -> c_int {
    let Some(session) = handle.as_mut() else {
        return ErrorCode::InvalidParameter.as_i32();
    };
    if packet.is_null() {
        return ErrorCode::InvalidParameter.as_i32();
    }

    let value = ptr::read(packet);
    match session.push_buffer(value) {
        Ok(()) => {
            // Free the allocation; its contents moved into the session
            drop(Box::from_raw(packet.cast::<ManuallyDrop<MediaPacket>>()));
            ErrorCode::None.as_i32()
        }
        Err(e) => {
            let code = e.code();
            ptr::write(packet, e.into_packet());
            code.as_i32()
        }
    }
}

// Attributes

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_filename(handle: *mut Session, filename: *const c_char) -> c_int {
    with_session(handle, |s| {
        if filename.is_null() {
            return Err(RecorderError::invalid_param("null filename"));
        }
        let path = CStr::from_ptr(filename)
            .to_str()
            .map_err(|_| RecorderError::invalid_param("filename is not UTF-8"))?;
        s.set_filename(path)
    })
}

/// Writes a newly allocated string, or null when no filename is set. Free
/// it with [`streamrecorder_string_free`].
#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_filename(handle: *mut Session, filename: *mut *mut c_char) -> c_int {
    with_session(handle, |s| {
        let slot = out_slot(filename)?;
        *slot = match s.filename() {
            Some(path) => CString::new(path.to_string_lossy().into_owned())
                .map_err(|_| RecorderError::InvalidOperation("filename contains NUL".into()))?
                .into_raw(),
            None => ptr::null_mut(),
        };
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_string_free(value: *mut c_char) {
    if !value.is_null() {
        drop(CString::from_raw(value));
    }
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_file_format(handle: *mut Session, format: c_int) -> c_int {
    with_session(handle, |s| s.set_file_format(FileFormat::try_from(format)?))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_file_format(handle: *mut Session, format: *mut c_int) -> c_int {
    with_session(handle, |s| write_out(format, index_of(FileFormat::ALL, &s.file_format())))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_audio_encoder(handle: *mut Session, codec: c_int) -> c_int {
    with_session(handle, |s| s.set_audio_encoder(AudioCodec::try_from(codec)?))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_audio_encoder(handle: *mut Session, codec: *mut c_int) -> c_int {
    with_session(handle, |s| {
        let slot = out_slot(codec)?;
        *slot = index_of(AudioCodec::ALL, &s.audio_encoder()?);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_video_encoder(handle: *mut Session, codec: c_int) -> c_int {
    with_session(handle, |s| s.set_video_encoder(VideoCodec::try_from(codec)?))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_video_encoder(handle: *mut Session, codec: *mut c_int) -> c_int {
    with_session(handle, |s| {
        let slot = out_slot(codec)?;
        *slot = index_of(VideoCodec::ALL, &s.video_encoder()?);
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_video_resolution(handle: *mut Session, width: c_int, height: c_int) -> c_int {
    with_session(handle, |s| {
        s.set_video_resolution(to_u32(width, "width")?, to_u32(height, "height")?)
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_video_resolution(
    handle: *mut Session,
    width: *mut c_int,
    height: *mut c_int,
) -> c_int {
    with_session(handle, |s| {
        let (width, height) = (out_slot(width)?, out_slot(height)?);
        let resolution = s.video_resolution();
        *width = resolution.width as c_int;
        *height = resolution.height as c_int;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_video_framerate(handle: *mut Session, framerate: c_int) -> c_int {
    with_session(handle, |s| s.set_video_framerate(to_u32(framerate, "framerate")?))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_video_framerate(handle: *mut Session, framerate: *mut c_int) -> c_int {
    with_session(handle, |s| write_out(framerate, s.video_framerate() as c_int))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_video_source_format(handle: *mut Session, format: c_int) -> c_int {
    with_session(handle, |s| s.set_video_source_format(VideoSourceFormat::try_from(format)?))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_video_source_format(handle: *mut Session, format: *mut c_int) -> c_int {
    with_session(handle, |s| {
        write_out(format, index_of(VideoSourceFormat::ALL, &s.video_source_format()))
    })
}

/// `limit_type` 0 = time (seconds), 1 = size (KB)
#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_recording_limit(handle: *mut Session, limit_type: c_int, limit: c_int) -> c_int {
    with_session(handle, |s| {
        s.set_recording_limit(RecordingLimitType::try_from(limit_type)?, to_u32(limit, "limit")?)
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_recording_limit(
    handle: *mut Session,
    limit_type: c_int,
    limit: *mut c_int,
) -> c_int {
    with_session(handle, |s| {
        let slot = out_slot(limit)?;
        *slot = s.recording_limit(RecordingLimitType::try_from(limit_type)?)? as c_int;
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_audio_samplerate(handle: *mut Session, samplerate: c_int) -> c_int {
    with_session(handle, |s| s.set_audio_samplerate(to_u32(samplerate, "samplerate")?))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_audio_samplerate(handle: *mut Session, samplerate: *mut c_int) -> c_int {
    with_session(handle, |s| write_out(samplerate, s.audio_samplerate() as c_int))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_audio_encoder_bitrate(handle: *mut Session, bitrate: c_int) -> c_int {
    with_session(handle, |s| s.set_audio_encoder_bitrate(to_u32(bitrate, "bitrate")?))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_audio_encoder_bitrate(handle: *mut Session, bitrate: *mut c_int) -> c_int {
    with_session(handle, |s| write_out(bitrate, s.audio_encoder_bitrate() as c_int))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_video_encoder_bitrate(handle: *mut Session, bitrate: c_int) -> c_int {
    with_session(handle, |s| s.set_video_encoder_bitrate(to_u32(bitrate, "bitrate")?))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_video_encoder_bitrate(handle: *mut Session, bitrate: *mut c_int) -> c_int {
    with_session(handle, |s| write_out(bitrate, s.video_encoder_bitrate() as c_int))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_audio_channel(handle: *mut Session, channels: c_int) -> c_int {
    with_session(handle, |s| s.set_audio_channel(to_u32(channels, "channels")?))
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_get_audio_channel(handle: *mut Session, channels: *mut c_int) -> c_int {
    with_session(handle, |s| write_out(channels, s.audio_channel() as c_int))
}

// Capabilities

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_foreach_supported_file_format(
    handle: *mut Session,
    callback: Option<SupportedFileFormatCb>,
    user_data: *mut c_void,
) -> c_int {
    with_session(handle, |s| {
        let callback = callback.ok_or_else(|| RecorderError::invalid_param("null callback"))?;
        s.foreach_supported_file_format(|f| callback(index_of(FileFormat::ALL, &f), user_data));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_foreach_supported_audio_encoder(
    handle: *mut Session,
    callback: Option<SupportedEncoderCb>,
    user_data: *mut c_void,
) -> c_int {
    with_session(handle, |s| {
        let callback = callback.ok_or_else(|| RecorderError::invalid_param("null callback"))?;
        s.foreach_supported_audio_encoder(|c| callback(index_of(AudioCodec::ALL, &c), user_data));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_foreach_supported_video_encoder(
    handle: *mut Session,
    callback: Option<SupportedEncoderCb>,
    user_data: *mut c_void,
) -> c_int {
    with_session(handle, |s| {
        let callback = callback.ok_or_else(|| RecorderError::invalid_param("null callback"))?;
        s.foreach_supported_video_encoder(|c| callback(index_of(VideoCodec::ALL, &c), user_data));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_foreach_supported_video_resolution(
    handle: *mut Session,
    callback: Option<SupportedResolutionCb>,
    user_data: *mut c_void,
) -> c_int {
    with_session(handle, |s| {
        let callback = callback.ok_or_else(|| RecorderError::invalid_param("null callback"))?;
        s.foreach_supported_video_resolution(|w, h| callback(w as c_int, h as c_int, user_data));
        Ok(())
    })
}

// Callbacks

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_state_changed_cb(
    handle: *mut Session,
    callback: Option<StateChangedCb>,
    user_data: *mut c_void,
) -> c_int {
    with_session(handle, |s| {
        let callback = callback.ok_or_else(|| RecorderError::invalid_param("null callback"))?;
        let user_data = UserData::new(user_data);
        s.set_state_changed_callback(move |previous, current, by_policy| {
            callback(state_code(previous), state_code(current), by_policy, user_data.ptr())
        });
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_unset_state_changed_cb(handle: *mut Session) -> c_int {
    with_session(handle, |s| {
        s.unset_state_changed_callback();
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_recording_limit_reached_cb(
    handle: *mut Session,
    callback: Option<LimitReachedCb>,
    user_data: *mut c_void,
) -> c_int {
    with_session(handle, |s| {
        let callback = callback.ok_or_else(|| RecorderError::invalid_param("null callback"))?;
        let user_data = UserData::new(user_data);
        s.set_recording_limit_reached_callback(move |limit| callback(limit_code(limit), user_data.ptr()));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_unset_recording_limit_reached_cb(handle: *mut Session) -> c_int {
    with_session(handle, |s| {
        s.unset_recording_limit_reached_callback();
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_recording_status_cb(
    handle: *mut Session,
    callback: Option<RecordingStatusCb>,
    user_data: *mut c_void,
) -> c_int {
    with_session(handle, |s| {
        let callback = callback.ok_or_else(|| RecorderError::invalid_param("null callback"))?;
        let user_data = UserData::new(user_data);
        s.set_recording_status_callback(move |status: RecordingStatus| {
            callback(status.elapsed_ms, status.file_size_kb, user_data.ptr())
        });
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_unset_recording_status_cb(handle: *mut Session) -> c_int {
    with_session(handle, |s| {
        s.unset_recording_status_callback();
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_error_cb(
    handle: *mut Session,
    callback: Option<ErrorCb>,
    user_data: *mut c_void,
) -> c_int {
    with_session(handle, |s| {
        let callback = callback.ok_or_else(|| RecorderError::invalid_param("null callback"))?;
        let user_data = UserData::new(user_data);
        s.set_error_callback(move |error, state| callback(error.as_i32(), state_code(state), user_data.ptr()));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_unset_error_cb(handle: *mut Session) -> c_int {
    with_session(handle, |s| {
        s.unset_error_callback();
        Ok(())
    })
}

/// The callback receives ownership of the packet
#[no_mangle]
pub unsafe extern "C" fn streamrecorder_set_buffer_consumed_cb(
    handle: *mut Session,
    callback: Option<BufferConsumedCb>,
    user_data: *mut c_void,
) -> c_int {
    with_session(handle, |s| {
        let callback = callback.ok_or_else(|| RecorderError::invalid_param("null callback"))?;
        let user_data = UserData::new(user_data);
        s.set_buffer_consumed_callback(move |packet| callback(Box::into_raw(Box::new(packet)), user_data.ptr()));
        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn streamrecorder_unset_buffer_consumed_cb(handle: *mut Session) -> c_int {
    with_session(handle, |s| {
        s.unset_buffer_consumed_callback();
        Ok(())
    })
}
