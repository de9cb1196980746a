//! Container detection and start-time extraction dispatch.

use std::fmt;

use crate::error::Result;
use crate::{id3, mp4, ts};

/// Container family of a segment, derived from its basic mime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerFormat {
    /// ISO BMFF (`video/mp4`, `audio/mp4`).
    Mp4,
    /// MPEG-2 transport stream (`video/mp2t`).
    Mpeg2Ts,
    /// Packed audio elementary stream (`audio/aac`, `audio/mpeg`), usually
    /// prefixed with an ID3 tag.
    RawAudio,
    WebM,
    Text,
    Unknown,
}

impl ContainerFormat {
    /// Classify a basic mime type (no parameters), case-insensitively.
    pub fn from_mime(basic_type: &str) -> Self {
        match basic_type.trim().to_ascii_lowercase().as_str() {
            "video/mp4" | "audio/mp4" => ContainerFormat::Mp4,
            "video/mp2t" | "audio/mp2t" => ContainerFormat::Mpeg2Ts,
            "audio/aac" | "audio/mpeg" | "audio/mp3" | "audio/ac3" | "audio/ec3" => {
                ContainerFormat::RawAudio
            }
            "video/webm" | "audio/webm" => ContainerFormat::WebM,
            t if t.starts_with("text/") || t == "application/mp4" || t == "application/ttml+xml" => {
                ContainerFormat::Text
            }
            _ => ContainerFormat::Unknown,
        }
    }

    /// Whether segments of this format embed a decode timestamp we can read.
    pub fn has_embedded_timestamp(self) -> bool {
        matches!(self, ContainerFormat::Mp4 | ContainerFormat::Mpeg2Ts)
    }

    /// Whether segments of this format carry out-of-band ID3 metadata.
    pub fn carries_id3(self) -> bool {
        matches!(self, ContainerFormat::RawAudio)
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mpeg2Ts => "mpeg2-ts",
            ContainerFormat::RawAudio => "raw-audio",
            ContainerFormat::WebM => "webm",
            ContainerFormat::Text => "text",
            ContainerFormat::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Extract the decode start time (seconds) embedded in `data`.
///
/// MP4 needs the track timescale from the init segment; without one no time
/// is returned. Formats without an embedded timestamp always yield `None`.
pub fn extract_start_time(
    format: ContainerFormat,
    data: &[u8],
    timescale: Option<u32>,
) -> Result<Option<f64>> {
    match format {
        ContainerFormat::Mp4 => match timescale {
            Some(ts) => mp4::segment_start_time(data, ts),
            None => Ok(None),
        },
        ContainerFormat::Mpeg2Ts => ts::start_time(data),
        _ => Ok(None),
    }
}

/// ID3 frames at the start of a packed audio segment. Empty for other
/// formats.
pub fn extract_metadata(format: ContainerFormat, data: &[u8]) -> Result<Vec<id3::Id3Frame>> {
    if !format.carries_id3() {
        return Ok(Vec::new());
    }
    id3::parse_frames(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_mime_types() {
        assert_eq!(ContainerFormat::from_mime("video/mp4"), ContainerFormat::Mp4);
        assert_eq!(ContainerFormat::from_mime("Audio/MP4"), ContainerFormat::Mp4);
        assert_eq!(ContainerFormat::from_mime("video/mp2t"), ContainerFormat::Mpeg2Ts);
        assert_eq!(ContainerFormat::from_mime("audio/aac"), ContainerFormat::RawAudio);
        assert_eq!(ContainerFormat::from_mime("text/vtt"), ContainerFormat::Text);
        assert_eq!(ContainerFormat::from_mime("video/webm"), ContainerFormat::WebM);
        assert_eq!(ContainerFormat::from_mime("image/png"), ContainerFormat::Unknown);
    }

    #[test]
    fn mp4_requires_timescale() {
        let seg = mp4::write_media_segment(1, 1, 96_000, &[]);
        assert_eq!(extract_start_time(ContainerFormat::Mp4, &seg, None).unwrap(), None);
        assert_eq!(
            extract_start_time(ContainerFormat::Mp4, &seg, Some(48_000)).unwrap(),
            Some(2.0)
        );
    }

    #[test]
    fn ts_start_time() {
        let seg = ts::write_pes_packet(0x100, 180_000, &[]);
        assert_eq!(
            extract_start_time(ContainerFormat::Mpeg2Ts, &seg, None).unwrap(),
            Some(2.0)
        );
    }

    #[test]
    fn raw_audio_has_metadata_but_no_timestamp() {
        let seg = id3::write_tag(&[("TIT2", &b"\x03x"[..])]);
        assert_eq!(
            extract_start_time(ContainerFormat::RawAudio, &seg, Some(1)).unwrap(),
            None
        );
        assert_eq!(extract_metadata(ContainerFormat::RawAudio, &seg).unwrap().len(), 1);
        assert!(extract_metadata(ContainerFormat::Mp4, &seg).unwrap().is_empty());
    }
}
