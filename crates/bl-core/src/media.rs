//! Media-domain model consumed by the orchestrator: content types, type
//! signatures, track descriptors and segment references.
//!
//! Enums serialize in lowercase and implement `Display` manually for a
//! consistent string representation in logs and events.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ContentType
// ---------------------------------------------------------------------------

/// Content category of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Audio,
    Video,
    Text,
}

impl ContentType {
    /// The content types that are backed by a platform buffer resource.
    pub const MEDIA: [ContentType; 2] = [ContentType::Audio, ContentType::Video];

    /// Whether this content type is appended through the text sink instead
    /// of a queued buffer resource.
    pub fn is_text(self) -> bool {
        matches!(self, ContentType::Text)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
            Self::Text => write!(f, "text"),
        }
    }
}

// ---------------------------------------------------------------------------
// ManifestKind
// ---------------------------------------------------------------------------

/// Manifest family the session was loaded from.
///
/// Only HLS content relies on container timestamps for offset correction;
/// DASH and MSS declare offsets that match the segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ManifestKind {
    #[default]
    Dash,
    Hls,
    Mss,
}

impl fmt::Display for ManifestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dash => write!(f, "dash"),
            Self::Hls => write!(f, "hls"),
            Self::Mss => write!(f, "mss"),
        }
    }
}

// ---------------------------------------------------------------------------
// EndOfStreamReason
// ---------------------------------------------------------------------------

/// Optional reason passed to the session's end-of-stream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndOfStreamReason {
    Network,
    Decode,
}

impl fmt::Display for EndOfStreamReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Decode => write!(f, "decode"),
        }
    }
}

// ---------------------------------------------------------------------------
// TypeSignature
// ---------------------------------------------------------------------------

/// Full type signature of a buffer: container mime type plus codec string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeSignature {
    /// Container mime type, e.g. `video/mp4`.
    pub mime_type: String,
    /// Comma-separated codec string, e.g. `avc1.64001f,mp4a.40.2`.
    pub codecs: String,
}

impl TypeSignature {
    pub fn new(mime_type: impl Into<String>, codecs: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            codecs: codecs.into(),
        }
    }

    /// Parse a full signature such as `video/mp4; codecs="avc1.4d401f"`.
    pub fn parse(full: &str) -> Self {
        let mut parts = full.split(';');
        let mime_type = parts.next().unwrap_or_default().trim().to_string();
        let codecs = parts
            .filter_map(|p| {
                let (key, value) = p.split_once('=')?;
                (key.trim().eq_ignore_ascii_case("codecs"))
                    .then(|| value.trim().trim_matches('"').to_string())
            })
            .next()
            .unwrap_or_default();
        Self { mime_type, codecs }
    }

    /// Lowercased container type without parameters (`video/mp4`).
    pub fn basic_type(&self) -> String {
        self.mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }

    /// Base codec tokens with profile/level stripped, aliases folded, sorted
    /// and joined with commas (`avc1.64001f,mp4a.40.2` -> `aac,avc`).
    pub fn codec_base(&self) -> String {
        let mut bases: Vec<String> = self
            .codecs
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(normalize_codec)
            .collect();
        bases.sort();
        bases.join(",")
    }

    /// Normalized (container, base codec) pair used to compare signatures.
    pub fn normalized(&self) -> (String, String) {
        (self.basic_type(), self.codec_base())
    }

    /// Whether the codec string names both an audio and a video codec.
    pub fn is_muxed(&self) -> bool {
        let bases: Vec<String> = self.codecs.split(',').map(normalize_codec).collect();
        bases.iter().any(|c| is_audio_codec(c)) && bases.iter().any(|c| !is_audio_codec(c))
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.codecs.is_empty() {
            write!(f, "{}", self.mime_type)
        } else {
            write!(f, "{}; codecs=\"{}\"", self.mime_type, self.codecs)
        }
    }
}

/// Fold a single codec token to its base family.
pub fn normalize_codec(token: &str) -> String {
    let token = token.trim().to_ascii_lowercase();
    let mut parts = token.split('.');
    let base = parts.next().unwrap_or_default();
    match base {
        "avc1" | "avc3" => "avc".into(),
        "hvc1" | "hev1" => "hevc".into(),
        "dvh1" | "dvhe" => "dovi-hevc".into(),
        "dva1" | "dvav" => "dovi-avc".into(),
        "dav1" => "dovi-av1".into(),
        "av01" => "av1".into(),
        "vp09" | "vp9" => "vp9".into(),
        "vp08" | "vp8" => "vp8".into(),
        "mp4a" => {
            let object_type = parts.next().unwrap_or_default();
            let audio_type = parts.next().unwrap_or_default();
            match (object_type, audio_type) {
                ("40", "34") | ("69", _) | ("6b", _) => "mp3".into(),
                ("a5", _) => "ac-3".into(),
                ("a6", _) => "ec-3".into(),
                _ => "aac".into(),
            }
        }
        "fla" | "flac" => "flac".into(),
        other => other.into(),
    }
}

fn is_audio_codec(base: &str) -> bool {
    matches!(
        base,
        "aac" | "mp3" | "ac-3" | "ec-3" | "ac-4" | "opus" | "flac" | "vorbis" | "dtsc" | "dtse"
    )
}

// ---------------------------------------------------------------------------
// Tracks and segments
// ---------------------------------------------------------------------------

/// DRM system declared for a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrmInfo {
    /// Key system identifier, e.g. `com.widevine.alpha`.
    pub key_system: String,
}

/// Track (variant stream) selected for a content type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub mime_type: String,
    pub codecs: String,
    #[serde(default)]
    pub drm_infos: Vec<DrmInfo>,
}

impl TrackDescriptor {
    pub fn new(mime_type: impl Into<String>, codecs: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            codecs: codecs.into(),
            drm_infos: Vec::new(),
        }
    }

    /// Builder: declare a DRM system for this track.
    pub fn with_drm(mut self, key_system: impl Into<String>) -> Self {
        self.drm_infos.push(DrmInfo {
            key_system: key_system.into(),
        });
        self
    }

    /// Full type signature of this track.
    pub fn signature(&self) -> TypeSignature {
        TypeSignature::new(self.mime_type.clone(), self.codecs.clone())
    }

    /// Whether segments of this track are expected to be encrypted.
    pub fn expects_encryption(&self) -> bool {
        !self.drm_infos.is_empty()
    }
}

/// Reference to an initialization segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InitSegmentReference {
    #[serde(default)]
    pub uris: Vec<String>,
    /// Media timescale declared by the init segment, when already known.
    #[serde(default)]
    pub timescale: Option<u32>,
}

/// Reference to a media segment as produced by the manifest model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentReference {
    /// Presentation start time in seconds.
    pub start_time: f64,
    /// Presentation end time in seconds.
    pub end_time: f64,
    /// Offset declared by the manifest for this segment's period.
    #[serde(default)]
    pub timestamp_offset: f64,
    #[serde(default)]
    pub uris: Vec<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub codecs: Option<String>,
    #[serde(default)]
    pub init_segment: Option<InitSegmentReference>,
}

impl SegmentReference {
    pub fn new(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
            timestamp_offset: 0.0,
            uris: Vec::new(),
            mime_type: None,
            codecs: None,
            init_segment: None,
        }
    }

    /// Builder: add a URI.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uris.push(uri.into());
        self
    }

    /// Builder: set the declared timestamp offset.
    pub fn with_timestamp_offset(mut self, offset: f64) -> Self {
        self.timestamp_offset = offset;
        self
    }

    /// Builder: attach an init segment reference.
    pub fn with_init_segment(mut self, init: InitSegmentReference) -> Self {
        self.init_segment = Some(init);
        self
    }

    pub fn uris(&self) -> &[String] {
        &self.uris
    }

    /// First URI, used as the diagnostic URI for queued operations.
    pub fn first_uri(&self) -> Option<String> {
        self.uris.first().cloned()
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_signature() {
        let sig = TypeSignature::parse("video/mp4; codecs=\"avc1.4d401f,mp4a.40.2\"");
        assert_eq!(sig.mime_type, "video/mp4");
        assert_eq!(sig.codecs, "avc1.4d401f,mp4a.40.2");
        assert_eq!(
            sig.to_string(),
            "video/mp4; codecs=\"avc1.4d401f,mp4a.40.2\""
        );
    }

    #[test]
    fn parse_without_codecs() {
        let sig = TypeSignature::parse("audio/aac");
        assert_eq!(sig.basic_type(), "audio/aac");
        assert!(sig.codecs.is_empty());
        assert_eq!(sig.to_string(), "audio/aac");
    }

    #[test]
    fn codec_base_strips_profile_and_sorts() {
        let sig = TypeSignature::new("video/mp4", "mp4a.40.2, avc1.64001f");
        assert_eq!(sig.codec_base(), "aac,avc");
    }

    #[test]
    fn codec_aliases_fold() {
        assert_eq!(normalize_codec("avc3.640028"), "avc");
        assert_eq!(normalize_codec("hev1.1.6.L93.90"), "hevc");
        assert_eq!(normalize_codec("hvc1.2.4.L120.90"), "hevc");
        assert_eq!(normalize_codec("mp4a.40.34"), "mp3");
        assert_eq!(normalize_codec("mp4a.a6"), "ec-3");
        assert_eq!(normalize_codec("vp09.00.10.08"), "vp9");
        assert_eq!(normalize_codec("av01.0.04M.08"), "av1");
    }

    #[test]
    fn same_family_normalizes_equal() {
        let a = TypeSignature::new("video/mp4", "avc1.42e01e");
        let b = TypeSignature::new("VIDEO/MP4", "avc3.640028");
        assert_eq!(a.normalized(), b.normalized());
    }

    #[test]
    fn muxed_detection() {
        assert!(TypeSignature::new("video/mp2t", "avc1.4d401f,mp4a.40.2").is_muxed());
        assert!(!TypeSignature::new("video/mp4", "avc1.4d401f").is_muxed());
        assert!(!TypeSignature::new("audio/mp4", "mp4a.40.2").is_muxed());
    }

    #[test]
    fn track_encryption_flag() {
        let clear = TrackDescriptor::new("video/mp4", "avc1.4d401f");
        assert!(!clear.expects_encryption());
        let protected = clear.clone().with_drm("com.widevine.alpha");
        assert!(protected.expects_encryption());
    }

    #[test]
    fn segment_reference_builders() {
        let seg = SegmentReference::new(10.0, 14.0)
            .with_uri("https://cdn.test/seg-5.m4s")
            .with_timestamp_offset(-2.0);
        assert_eq!(seg.uris().len(), 1);
        assert_eq!(seg.first_uri().as_deref(), Some("https://cdn.test/seg-5.m4s"));
        assert_eq!(seg.duration(), 4.0);
        assert_eq!(seg.timestamp_offset, -2.0);
    }

    #[test]
    fn content_type_display_and_serde() {
        assert_eq!(ContentType::Video.to_string(), "video");
        let json = serde_json::to_string(&ContentType::Text).unwrap();
        assert_eq!(json, "\"text\"");
        assert!(ContentType::Text.is_text());
    }
}
