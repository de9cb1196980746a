//! ISO BMFF (fragmented MP4) inspection.
//!
//! Reads the few fields the orchestrator needs from in-memory segments: the
//! media timescale declared by an init segment's `mdhd`, whether its sample
//! entry is protected, and a media segment's `tfdt` base media decode time.

pub mod atoms;
pub mod writer;

use atoms::{find_path, read_box_header, read_fullbox_header, read_u32, read_u64};
pub use writer::{write_init_segment, write_media_segment, InitSegmentSpec, TrackKind};

use crate::error::Result;

/// Whether `data` carries a top-level `moov` box.
pub fn is_init_segment(data: &[u8]) -> bool {
    matches!(find_path(data, &[b"moov"]), Ok(Some(_)))
}

/// Media timescale of the first track in an init segment.
pub fn read_timescale(init: &[u8]) -> Result<Option<u32>> {
    let Some((mut cursor, _)) = find_path(init, &[b"moov", b"trak", b"mdia", b"mdhd"])? else {
        return Ok(None);
    };
    let (version, _flags) = read_fullbox_header(&mut cursor)?;
    let timescale = if version == 1 {
        let _creation = read_u64(&mut cursor)?;
        let _modification = read_u64(&mut cursor)?;
        read_u32(&mut cursor)?
    } else {
        let _creation = read_u32(&mut cursor)?;
        let _modification = read_u32(&mut cursor)?;
        read_u32(&mut cursor)?
    };
    Ok((timescale > 0).then_some(timescale))
}

/// Whether the first sample entry of the first track is protected
/// (`encv` / `enca`).
pub fn is_encrypted(init: &[u8]) -> Result<bool> {
    let path: [&[u8; 4]; 6] = [b"moov", b"trak", b"mdia", b"minf", b"stbl", b"stsd"];
    let Some((mut cursor, stsd)) = find_path(init, &path)? else {
        return Ok(false);
    };
    let content_start = cursor.position();
    let _fullbox = read_fullbox_header(&mut cursor)?;
    let entry_count = read_u32(&mut cursor)?;
    if entry_count == 0 {
        return Ok(false);
    }
    let limit = content_start + stsd.content_size();
    let Some(entry) = read_box_header(&mut cursor, limit)? else {
        return Ok(false);
    };
    Ok(matches!(&entry.box_type, b"encv" | b"enca"))
}

/// Base media decode time (`moof/traf/tfdt`) of a media segment, in
/// timescale units.
pub fn base_media_decode_time(segment: &[u8]) -> Result<Option<u64>> {
    let Some((mut cursor, _)) = find_path(segment, &[b"moof", b"traf", b"tfdt"])? else {
        return Ok(None);
    };
    let (version, _flags) = read_fullbox_header(&mut cursor)?;
    let time = if version == 1 {
        read_u64(&mut cursor)?
    } else {
        read_u32(&mut cursor)? as u64
    };
    Ok(Some(time))
}

/// Start time in seconds of a media segment, given the track timescale.
pub fn segment_start_time(segment: &[u8], timescale: u32) -> Result<Option<f64>> {
    if timescale == 0 {
        return Ok(None);
    }
    Ok(base_media_decode_time(segment)?.map(|t| t as f64 / timescale as f64))
}
