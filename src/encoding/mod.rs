// Container formats, codecs and source pixel formats
//
// Each enum carries the integer value used on the C ABI (its declaration
// order) and the GStreamer element names the pipeline backend builds with.
// To add a new codec:
// 1. Add the variant (append it, the integer values are stable)
// 2. Extend ALL and the TryFrom<i32> arm
// 3. Map it to its GStreamer elements in the gst_* helpers
// 4. Declare which containers accept it in FileFormat::accepts_*

use serde::{Deserialize, Serialize};

use crate::error::RecorderError;

/// Output container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    /// 3GPP container
    #[serde(rename = "3gp")]
    ThreeGp,
    /// MPEG-4 Part 14
    Mp4,
    /// Raw AMR-NB storage format
    Amr,
    /// AAC in ADTS framing
    Adts,
    /// RIFF WAVE (PCM only)
    Wav,
}

impl FileFormat {
    pub const ALL: &'static [FileFormat] = &[
        FileFormat::ThreeGp,
        FileFormat::Mp4,
        FileFormat::Amr,
        FileFormat::Adts,
        FileFormat::Wav,
    ];

    /// Get the file extension for this container
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::ThreeGp => "3gp",
            FileFormat::Mp4 => "mp4",
            FileFormat::Amr => "amr",
            FileFormat::Adts => "aac",
            FileFormat::Wav => "wav",
        }
    }

    /// GStreamer element producing this container
    pub fn gst_muxer(&self) -> &'static str {
        match self {
            FileFormat::ThreeGp => "3gppmux",
            FileFormat::Mp4 => "mp4mux",
            FileFormat::Amr => "avmux_amr",
            FileFormat::Adts => "avmux_adts",
            FileFormat::Wav => "wavenc",
        }
    }

    /// Whether the container can hold a video track at all
    pub fn supports_video(&self) -> bool {
        matches!(self, FileFormat::ThreeGp | FileFormat::Mp4)
    }

    pub fn accepts_audio(&self, codec: AudioCodec) -> bool {
        match self {
            FileFormat::ThreeGp => matches!(codec, AudioCodec::Amr | AudioCodec::Aac),
            FileFormat::Mp4 => matches!(codec, AudioCodec::Amr | AudioCodec::Aac),
            FileFormat::Amr => codec == AudioCodec::Amr,
            FileFormat::Adts => codec == AudioCodec::Aac,
            FileFormat::Wav => codec == AudioCodec::Pcm,
        }
    }

    pub fn accepts_video(&self, codec: VideoCodec) -> bool {
        match self {
            FileFormat::ThreeGp => matches!(codec, VideoCodec::H263 | VideoCodec::H264 | VideoCodec::Mpeg4),
            FileFormat::Mp4 => true,
            _ => false,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FileFormat::ThreeGp => "3GP",
            FileFormat::Mp4 => "MP4",
            FileFormat::Amr => "AMR",
            FileFormat::Adts => "ADTS",
            FileFormat::Wav => "WAV",
        }
    }
}

impl TryFrom<i32> for FileFormat {
    type Error = RecorderError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| FileFormat::ALL.get(i).copied())
            .ok_or_else(|| RecorderError::invalid_param(format!("invalid file format {}", value)))
    }
}

/// Audio encoders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// AMR narrowband
    Amr,
    /// Advanced Audio Coding
    Aac,
    /// Uncompressed PCM
    Pcm,
}

impl AudioCodec {
    pub const ALL: &'static [AudioCodec] = &[AudioCodec::Amr, AudioCodec::Aac, AudioCodec::Pcm];

    /// GStreamer encoder element, None for PCM
    pub fn gst_encoder(&self) -> Option<&'static str> {
        match self {
            AudioCodec::Amr => Some("amrnbenc"),
            AudioCodec::Aac => Some("avenc_aac"),
            AudioCodec::Pcm => None,
        }
    }

    /// GStreamer parser placed after the encoder
    pub fn gst_parser(&self) -> Option<&'static str> {
        match self {
            AudioCodec::Amr => Some("amrparse"),
            AudioCodec::Aac => Some("aacparse"),
            AudioCodec::Pcm => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AudioCodec::Amr => "AMR",
            AudioCodec::Aac => "AAC",
            AudioCodec::Pcm => "PCM",
        }
    }
}

impl TryFrom<i32> for AudioCodec {
    type Error = RecorderError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| AudioCodec::ALL.get(i).copied())
            .ok_or_else(|| RecorderError::invalid_param(format!("invalid audio codec {}", value)))
    }
}

/// Video encoders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.263 baseline
    H263,
    /// H.264/AVC
    H264,
    /// MPEG-4 Part 2 visual
    Mpeg4,
}

impl VideoCodec {
    pub const ALL: &'static [VideoCodec] = &[VideoCodec::H263, VideoCodec::H264, VideoCodec::Mpeg4];

    /// Get the GStreamer encoder element for this codec
    pub fn gst_encoder(&self) -> &'static str {
        match self {
            VideoCodec::H263 => "avenc_h263",
            VideoCodec::H264 => "x264enc",
            VideoCodec::Mpeg4 => "avenc_mpeg4",
        }
    }

    /// Get the GStreamer parser element for this codec
    pub fn gst_parser(&self) -> &'static str {
        match self {
            VideoCodec::H263 => "h263parse",
            VideoCodec::H264 => "h264parse",
            VideoCodec::Mpeg4 => "mpeg4videoparse",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            VideoCodec::H263 => "H.263",
            VideoCodec::H264 => "H.264",
            VideoCodec::Mpeg4 => "MPEG-4",
        }
    }
}

impl TryFrom<i32> for VideoCodec {
    type Error = RecorderError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| VideoCodec::ALL.get(i).copied())
            .ok_or_else(|| RecorderError::invalid_param(format!("invalid video codec {}", value)))
    }
}

/// Pixel layout of pushed video buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoSourceFormat {
    /// Y plane followed by interleaved UV
    Nv12,
    /// Y plane followed by interleaved VU
    Nv21,
    /// Three planes Y, U, V, packed back to back
    I420,
}

impl VideoSourceFormat {
    pub const ALL: &'static [VideoSourceFormat] =
        &[VideoSourceFormat::Nv12, VideoSourceFormat::Nv21, VideoSourceFormat::I420];

    /// Semi-planar formats are handed to the backend as a frame descriptor
    pub fn is_semi_planar(&self) -> bool {
        matches!(self, VideoSourceFormat::Nv12 | VideoSourceFormat::Nv21)
    }

    /// GStreamer raw video format string
    pub fn gst_format(&self) -> &'static str {
        match self {
            VideoSourceFormat::Nv12 => "NV12",
            VideoSourceFormat::Nv21 => "NV21",
            VideoSourceFormat::I420 => "I420",
        }
    }

    /// Size in bytes of one tightly packed frame; chroma rounds odd sizes up
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        let chroma_rows = height.div_ceil(2) as usize;
        match self {
            VideoSourceFormat::Nv12 | VideoSourceFormat::Nv21 => luma + width as usize * chroma_rows,
            VideoSourceFormat::I420 => luma + 2 * width.div_ceil(2) as usize * chroma_rows,
        }
    }
}

impl TryFrom<i32> for VideoSourceFormat {
    type Error = RecorderError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| VideoSourceFormat::ALL.get(i).copied())
            .ok_or_else(|| RecorderError::invalid_param(format!("invalid video source format {}", value)))
    }
}

/// Detect container from file extension
pub fn format_from_extension(ext: &str) -> Option<FileFormat> {
    match ext.to_lowercase().as_str() {
        "3gp" | "3gpp" => Some(FileFormat::ThreeGp),
        "mp4" | "m4v" | "m4a" => Some(FileFormat::Mp4),
        "amr" => Some(FileFormat::Amr),
        "aac" | "adts" => Some(FileFormat::Adts),
        "wav" => Some(FileFormat::Wav),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_values_follow_declaration_order() {
        assert_eq!(FileFormat::try_from(1).unwrap(), FileFormat::Mp4);
        assert_eq!(VideoCodec::try_from(2).unwrap(), VideoCodec::Mpeg4);
        assert_eq!(AudioCodec::try_from(0).unwrap(), AudioCodec::Amr);
        assert_eq!(VideoSourceFormat::try_from(2).unwrap(), VideoSourceFormat::I420);
    }

    #[test]
    fn out_of_range_values_are_invalid_parameters() {
        for v in [-1, 5, 100] {
            assert!(matches!(FileFormat::try_from(v), Err(RecorderError::InvalidParameter(_))));
        }
        assert!(matches!(AudioCodec::try_from(3), Err(RecorderError::InvalidParameter(_))));
        assert!(matches!(AudioCodec::try_from(-1), Err(RecorderError::InvalidParameter(_))));
        assert!(matches!(VideoCodec::try_from(3), Err(RecorderError::InvalidParameter(_))));
    }

    #[test]
    fn audio_only_containers_reject_video() {
        assert!(!FileFormat::Wav.supports_video());
        assert!(!FileFormat::Amr.accepts_video(VideoCodec::H264));
        assert!(FileFormat::Mp4.accepts_video(VideoCodec::Mpeg4));
        assert!(FileFormat::Wav.accepts_audio(AudioCodec::Pcm));
        assert!(!FileFormat::Wav.accepts_audio(AudioCodec::Aac));
    }

    #[test]
    fn extension_lookup() {
        assert_eq!(format_from_extension("MP4"), Some(FileFormat::Mp4));
        assert_eq!(format_from_extension("3gp"), Some(FileFormat::ThreeGp));
        assert_eq!(format_from_extension("mkv"), None);
    }

    #[test]
    fn semi_planar_classification() {
        assert!(VideoSourceFormat::Nv12.is_semi_planar());
        assert!(VideoSourceFormat::Nv21.is_semi_planar());
        assert!(!VideoSourceFormat::I420.is_semi_planar());
        assert_eq!(VideoSourceFormat::Nv12.frame_size(1280, 720), 1280 * 720 * 3 / 2);
    }

    #[test]
    fn odd_dimensions_round_chroma_up() {
        assert_eq!(VideoSourceFormat::Nv12.frame_size(64, 3), 64 * 3 + 64 * 2);
        assert_eq!(VideoSourceFormat::Nv21.frame_size(64, 3), 320);
        assert_eq!(VideoSourceFormat::I420.frame_size(5, 3), 15 + 2 * 3 * 2);
    }
}
