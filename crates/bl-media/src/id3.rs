//! ID3v2 tag reader for raw audio segments (AAC / MP3 elementary streams).
//!
//! HLS packed audio prefixes each segment with an ID3 tag carrying timed
//! metadata. Frames are returned verbatim with a decoded string value where
//! the frame type has one.

use crate::error::{Error, Result};

const HEADER_SIZE: usize = 10;

/// A single ID3v2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Id3Frame {
    /// Four-character frame identifier (e.g. `TXXX`, `PRIV`).
    pub id: String,
    /// Frame payload after the textual part (`PRIV` owner data, raw bytes
    /// for unknown frames, empty for text frames).
    pub data: Vec<u8>,
    /// Decoded text value, or the owner identifier for `PRIV` frames.
    pub value: Option<String>,
}

/// Whether `data` starts with an ID3v2 tag header.
pub fn has_tag(data: &[u8]) -> bool {
    data.len() >= HEADER_SIZE
        && &data[0..3] == b"ID3"
        && data[3] != 0xFF
        && data[4] != 0xFF
        && data[6..10].iter().all(|b| b & 0x80 == 0)
}

/// Total length (header + body + optional footer) of the tag at the start of
/// `data`, or `None` if there is no tag.
pub fn tag_len(data: &[u8]) -> Option<usize> {
    if !has_tag(data) {
        return None;
    }
    let footer = if data[5] & 0x10 != 0 { HEADER_SIZE } else { 0 };
    Some(HEADER_SIZE + syncsafe(&data[6..10]) as usize + footer)
}

/// Parse every consecutive ID3v2 tag at the start of `data`.
pub fn parse_frames(data: &[u8]) -> Result<Vec<Id3Frame>> {
    let mut frames = Vec::new();
    let mut rest = data;

    while let Some(len) = tag_len(rest) {
        if len > rest.len() {
            return Err(Error::BufferUnderflow {
                need: len,
                have: rest.len(),
            });
        }
        parse_tag(&rest[..len], &mut frames)?;
        rest = &rest[len..];
    }

    Ok(frames)
}

fn parse_tag(tag: &[u8], frames: &mut Vec<Id3Frame>) -> Result<()> {
    let major = tag[3];
    if !(2..=4).contains(&major) {
        return Err(Error::InvalidId3(format!("unsupported version 2.{major}")));
    }
    if major == 2 {
        // v2.2 uses three-character frame ids; nothing we forward.
        return Ok(());
    }

    let flags = tag[5];
    let body_end = HEADER_SIZE + syncsafe(&tag[6..10]) as usize;
    let mut pos = HEADER_SIZE;

    if flags & 0x40 != 0 {
        let ext = tag
            .get(pos..pos + 4)
            .ok_or_else(|| Error::InvalidId3("truncated extended header".into()))?;
        pos += if major == 4 {
            syncsafe(ext) as usize
        } else {
            4 + u32::from_be_bytes([ext[0], ext[1], ext[2], ext[3]]) as usize
        };
    }

    while pos + HEADER_SIZE <= body_end {
        let header = &tag[pos..pos + HEADER_SIZE];
        if header[0] == 0 {
            // padding
            break;
        }
        let id = String::from_utf8_lossy(&header[0..4]).into_owned();
        let size = if major == 4 {
            syncsafe(&header[4..8])
        } else {
            u32::from_be_bytes([header[4], header[5], header[6], header[7]])
        } as usize;
        let start = pos + HEADER_SIZE;
        let end = start + size;
        if end > body_end {
            return Err(Error::InvalidId3(format!(
                "frame {id} of {size} bytes overruns tag"
            )));
        }
        frames.push(decode_frame(id, &tag[start..end]));
        pos = end;
    }

    Ok(())
}

fn decode_frame(id: String, body: &[u8]) -> Id3Frame {
    if id == "PRIV" {
        let split = body.iter().position(|&b| b == 0).unwrap_or(body.len());
        let owner = String::from_utf8_lossy(&body[..split]).into_owned();
        let data = body.get(split + 1..).unwrap_or_default().to_vec();
        return Id3Frame {
            id,
            data,
            value: Some(owner),
        };
    }

    if id.starts_with('T') && id != "TXXX" && !body.is_empty() {
        let value = decode_text(body[0], &body[1..]);
        return Id3Frame {
            id,
            data: Vec::new(),
            value: Some(value),
        };
    }

    if id == "TXXX" && !body.is_empty() {
        // description \0 value
        let encoding = body[0];
        let text = decode_text(encoding, &body[1..]);
        let value = text.split('\0').nth(1).map(str::to_owned).unwrap_or(text);
        return Id3Frame {
            id,
            data: Vec::new(),
            value: Some(value),
        };
    }

    Id3Frame {
        id,
        data: body.to_vec(),
        value: None,
    }
}

fn decode_text(encoding: u8, bytes: &[u8]) -> String {
    let text: String = match encoding {
        0 => bytes.iter().map(|&b| b as char).collect(),
        1 | 2 => {
            let (big_endian, body) = match bytes {
                [0xFF, 0xFE, rest @ ..] => (false, rest),
                [0xFE, 0xFF, rest @ ..] => (true, rest),
                _ => (encoding == 2, bytes),
            };
            let units: Vec<u16> = body
                .chunks_exact(2)
                .map(|c| {
                    if big_endian {
                        u16::from_be_bytes([c[0], c[1]])
                    } else {
                        u16::from_le_bytes([c[0], c[1]])
                    }
                })
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    };
    text.trim_end_matches('\0').to_owned()
}

fn syncsafe(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .take(4)
        .fold(0u32, |acc, &b| (acc << 7) | u32::from(b & 0x7F))
}

/// Write an ID3v2.4 tag from `(id, body)` pairs. Used to synthesize packed
/// audio segments.
pub fn write_tag(frames: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (id, data) in frames {
        let mut id_bytes = [b' '; 4];
        for (slot, b) in id_bytes.iter_mut().zip(id.bytes()) {
            *slot = b;
        }
        body.extend_from_slice(&id_bytes);
        body.extend_from_slice(&to_syncsafe(data.len() as u32));
        body.extend_from_slice(&[0, 0]);
        body.extend_from_slice(data);
    }

    let mut tag = Vec::with_capacity(HEADER_SIZE + body.len());
    tag.extend_from_slice(b"ID3");
    tag.extend_from_slice(&[4, 0, 0]);
    tag.extend_from_slice(&to_syncsafe(body.len() as u32));
    tag.extend_from_slice(&body);
    tag
}

fn to_syncsafe(n: u32) -> [u8; 4] {
    [
        ((n >> 21) & 0x7F) as u8,
        ((n >> 14) & 0x7F) as u8,
        ((n >> 7) & 0x7F) as u8,
        (n & 0x7F) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_tag_header() {
        let tag = write_tag(&[]);
        assert!(has_tag(&tag));
        assert_eq!(tag_len(&tag), Some(10));
        assert!(!has_tag(b"\xFF\xF1\x50\x80"));
    }

    #[test]
    fn parses_priv_and_text_frames() {
        let mut priv_body = b"com.apple.streaming.transportStreamTimestamp\0".to_vec();
        priv_body.extend_from_slice(&[0, 0, 0, 0, 0, 0x01, 0x5F, 0x90]);
        let tag = write_tag(&[("PRIV", &priv_body[..]), ("TIT2", &b"\x03Live"[..])]);
        let mut segment = tag.clone();
        segment.extend_from_slice(&[0xFF, 0xF1, 0x50, 0x80]);

        let frames = parse_frames(&segment).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].id, "PRIV");
        assert_eq!(
            frames[0].value.as_deref(),
            Some("com.apple.streaming.transportStreamTimestamp")
        );
        assert_eq!(frames[0].data.len(), 8);
        assert_eq!(frames[1].id, "TIT2");
        assert_eq!(frames[1].value.as_deref(), Some("Live"));
    }

    #[test]
    fn txxx_keeps_value_after_description() {
        let tag = write_tag(&[("TXXX", &b"\x03cue\0ad-break"[..])]);
        let frames = parse_frames(&tag).unwrap();
        assert_eq!(frames[0].value.as_deref(), Some("ad-break"));
    }

    #[test]
    fn utf16_text_with_bom() {
        let body = [1u8, 0xFF, 0xFE, b'h', 0, b'i', 0];
        let tag = write_tag(&[("TIT2", &body[..])]);
        let frames = parse_frames(&tag).unwrap();
        assert_eq!(frames[0].value.as_deref(), Some("hi"));
    }

    #[test]
    fn truncated_tag_is_underflow() {
        let tag = write_tag(&[("TIT2", &b"\x03abc"[..])]);
        let err = parse_frames(&tag[..tag.len() - 2]).unwrap_err();
        assert!(matches!(err, Error::BufferUnderflow { .. }));
    }

    #[test]
    fn syncsafe_round_trip() {
        assert_eq!(syncsafe(&to_syncsafe(0x0FFF_FFFF)), 0x0FFF_FFFF);
        assert_eq!(syncsafe(&[0x00, 0x00, 0x02, 0x01]), 257);
    }

    #[test]
    fn no_tag_yields_no_frames() {
        assert!(parse_frames(&[0xFF, 0xF1]).unwrap().is_empty());
    }
}
