//! Segment inspection: what the orchestrator would read from a segment.

use anyhow::{Context, Result};
use bl_media::{id3, mp4, ts, ContainerFormat};
use serde::Serialize;

/// Facts extracted from one segment.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentReport {
    pub format: String,
    pub size: usize,
    /// Whether this is an ISO BMFF init segment.
    pub init_segment: bool,
    pub timescale: Option<u32>,
    pub encrypted: Option<bool>,
    /// Embedded decode start time, in seconds.
    pub start_time: Option<f64>,
    pub id3_frames: Vec<FrameReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub id: String,
    pub value: Option<String>,
    pub size: usize,
}

/// Guess the container from the leading bytes.
pub fn sniff_format(data: &[u8]) -> ContainerFormat {
    if id3::has_tag(data) {
        return ContainerFormat::RawAudio;
    }
    if data.len() >= ts::PACKET_SIZE && data[0] == ts::SYNC_BYTE {
        // A second packet, when present, must also be in sync.
        let next = data[ts::PACKET_SIZE..].first();
        if next.map_or(true, |b| *b == ts::SYNC_BYTE) {
            return ContainerFormat::Mpeg2Ts;
        }
    }
    if data.len() >= 8 && matches!(&data[4..8], b"ftyp" | b"styp" | b"moov" | b"moof" | b"sidx") {
        return ContainerFormat::Mp4;
    }
    ContainerFormat::Unknown
}

/// Inspect a segment. `mime` overrides format sniffing; `timescale` scales
/// an MP4 media segment that has no init segment alongside it.
pub fn inspect_segment(data: &[u8], mime: Option<&str>, timescale: Option<u32>) -> Result<SegmentReport> {
    let format = match mime {
        Some(mime) => ContainerFormat::from_mime(mime.split(';').next().unwrap_or(mime)),
        None => sniff_format(data),
    };

    let mut report = SegmentReport {
        format: format.to_string(),
        size: data.len(),
        init_segment: false,
        timescale,
        encrypted: None,
        start_time: None,
        id3_frames: Vec::new(),
    };

    match format {
        ContainerFormat::Mp4 if mp4::is_init_segment(data) => {
            report.init_segment = true;
            report.timescale = mp4::read_timescale(data).context("Failed to read mdhd timescale")?;
            report.encrypted = Some(mp4::is_encrypted(data).context("Failed to read sample entries")?);
        }
        ContainerFormat::Mp4 | ContainerFormat::Mpeg2Ts => {
            report.start_time = bl_media::extract_start_time(format, data, timescale)
                .with_context(|| format!("Failed to read {format} start time"))?;
        }
        ContainerFormat::RawAudio => {
            report.id3_frames = bl_media::extract_metadata(format, data)
                .context("Failed to parse ID3 tag")?
                .into_iter()
                .map(|frame| FrameReport {
                    size: frame.data.len(),
                    id: frame.id,
                    value: frame.value,
                })
                .collect();
        }
        _ => {}
    }

    Ok(report)
}
