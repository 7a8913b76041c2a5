// Externally supplied media buffers and their in-flight bookkeeping

pub mod ledger;

pub use ledger::{BufferLedger, BufferToken, DEFAULT_LEDGER_CAPACITY};

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::encoding::VideoSourceFormat;
use crate::error::RecorderError;

/// Which elementary stream a buffer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Audio,
    Video,
}

/// Layout of a pushed buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketFormat {
    Video {
        format: VideoSourceFormat,
        width: u32,
        height: u32,
        /// Bytes per luma row; equals `width` for tightly packed frames
        stride: u32,
    },
    Audio {
        sample_rate: u32,
        channels: u32,
    },
}

/// A media buffer captured elsewhere and handed to the recorder.
///
/// Ownership moves into the session on push and comes back through the
/// buffer-consumed callback once the backend no longer reads it. The payload
/// is reference counted so backends can hold it without copying.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    format: PacketFormat,
    /// Presentation timestamp in nanoseconds
    pts: u64,
    data: Arc<[u8]>,
}

impl MediaPacket {
    /// Tightly packed raw video frame (stride == width)
    pub fn video(format: VideoSourceFormat, width: u32, height: u32, pts: u64, data: impl Into<Arc<[u8]>>) -> Self {
        Self::video_with_stride(format, width, height, width, pts, data)
    }

    pub fn video_with_stride(
        format: VideoSourceFormat,
        width: u32,
        height: u32,
        stride: u32,
        pts: u64,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            format: PacketFormat::Video { format, width, height, stride },
            pts,
            data: data.into(),
        }
    }

    /// Interleaved signed 16-bit little-endian PCM
    pub fn audio(sample_rate: u32, channels: u32, pts: u64, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            format: PacketFormat::Audio { sample_rate, channels },
            pts,
            data: data.into(),
        }
    }

    pub fn kind(&self) -> StreamKind {
        match self.format {
            PacketFormat::Video { .. } => StreamKind::Video,
            PacketFormat::Audio { .. } => StreamKind::Audio,
        }
    }

    pub fn format(&self) -> &PacketFormat {
        &self.format
    }

    pub fn pts(&self) -> u64 {
        self.pts
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Shared handle to the payload, for backends that keep it past `push`
    pub fn shared_data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    /// Check the packet describes a usable buffer
    pub(crate) fn validate(&self) -> Result<(), RecorderError> {
        if self.data.is_empty() {
            return Err(RecorderError::invalid_param("empty media packet"));
        }
        match self.format {
            PacketFormat::Video { format, width, height, stride } => {
                if width == 0 || height == 0 {
                    return Err(RecorderError::invalid_param(format!(
                        "invalid frame dimensions {}x{}",
                        width, height
                    )));
                }
                if stride < width {
                    return Err(RecorderError::invalid_param(format!(
                        "stride {} is smaller than width {}",
                        stride, width
                    )));
                }
                let needed = format.frame_size(stride, height);
                if self.data.len() < needed {
                    return Err(RecorderError::invalid_param(format!(
                        "{} frame {}x{} needs {} bytes, got {}",
                        format.gst_format(),
                        width,
                        height,
                        needed,
                        self.data.len()
                    )));
                }
            }
            PacketFormat::Audio { sample_rate, channels } => {
                if sample_rate == 0 || channels == 0 {
                    return Err(RecorderError::invalid_param("audio packet without rate or channels"));
                }
            }
        }
        Ok(())
    }
}

/// One plane of a semi-planar frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offset: usize,
    pub stride: u32,
    pub width: u32,
    pub height: u32,
    pub size: usize,
}

/// Backend-native description of a semi-planar frame (NV12/NV21)
///
/// Created when such a frame is pushed and released when the backend
/// reports the frame consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrameDescriptor {
    pub format: VideoSourceFormat,
    pub width: u32,
    pub height: u32,
    pub planes: [PlaneLayout; 2],
    /// Total bytes of the frame inside the payload
    pub size: usize,
}

impl VideoFrameDescriptor {
    /// Describe a semi-planar frame; None for formats passed through raw
    pub fn for_packet(packet: &MediaPacket) -> Option<Self> {
        let PacketFormat::Video { format, width, height, stride } = *packet.format() else {
            return None;
        };
        if !format.is_semi_planar() {
            return None;
        }

        let luma_size = stride as usize * height as usize;
        let chroma_height = height.div_ceil(2);
        let chroma_size = stride as usize * chroma_height as usize;

        Some(Self {
            format,
            width,
            height,
            planes: [
                PlaneLayout {
                    offset: 0,
                    stride,
                    width,
                    height,
                    size: luma_size,
                },
                PlaneLayout {
                    offset: luma_size,
                    stride,
                    width,
                    height: chroma_height,
                    size: chroma_size,
                },
            ],
            size: luma_size + chroma_size,
        })
    }
}
