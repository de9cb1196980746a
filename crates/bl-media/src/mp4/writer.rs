//! Minimal fragmented MP4 serialization.
//!
//! Produces just enough ISO BMFF structure for the orchestrator's timestamp
//! and encryption inspection: an init segment (ftyp + moov with a single
//! track) and media segments (moof with tfdt + mdat). The simulator and the
//! tests use these to synthesize segments.

/// Write a complete box: size (u32 BE) + type (4 ASCII bytes) + content.
pub(crate) fn write_box(box_type: &[u8; 4], content: &[u8]) -> Vec<u8> {
    let size = (8 + content.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(box_type);
    out.extend_from_slice(content);
    out
}

/// Write a container box (size + type + children concatenated).
pub(crate) fn write_container_box(box_type: &[u8; 4], children: &[&[u8]]) -> Vec<u8> {
    let children_len: usize = children.iter().map(|c| c.len()).sum();
    let size = (8 + children_len) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(box_type);
    for child in children {
        out.extend_from_slice(child);
    }
    out
}

/// Full box header (version + flags).
pub(crate) fn fullbox_header(version: u8, flags: u32) -> [u8; 4] {
    let val = ((version as u32) << 24) | (flags & 0x00FFFFFF);
    val.to_be_bytes()
}

/// Track kind of a synthesized init segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    fn handler(self) -> &'static [u8; 4] {
        match self {
            TrackKind::Video => b"vide",
            TrackKind::Audio => b"soun",
        }
    }

    fn clear_entry(self) -> &'static [u8; 4] {
        match self {
            TrackKind::Video => b"avc1",
            TrackKind::Audio => b"mp4a",
        }
    }

    fn protected_entry(self) -> &'static [u8; 4] {
        match self {
            TrackKind::Video => b"encv",
            TrackKind::Audio => b"enca",
        }
    }
}

/// Parameters of a synthesized single-track init segment.
#[derive(Debug, Clone)]
pub struct InitSegmentSpec {
    pub kind: TrackKind,
    pub track_id: u32,
    pub timescale: u32,
    pub encrypted: bool,
}

impl InitSegmentSpec {
    pub fn new(kind: TrackKind, timescale: u32) -> Self {
        Self {
            kind,
            track_id: 1,
            timescale,
            encrypted: false,
        }
    }

    /// Builder: use a protected sample entry (`encv`/`enca`).
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }
}

/// Write an init segment: ftyp + moov(mvhd, trak, mvex).
pub fn write_init_segment(spec: &InitSegmentSpec) -> Vec<u8> {
    let ftyp = {
        let mut content = Vec::with_capacity(16);
        content.extend_from_slice(b"iso6");
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(b"iso6");
        content.extend_from_slice(b"cmfc");
        write_box(b"ftyp", &content)
    };

    let mvhd = {
        let mut content = Vec::with_capacity(100);
        content.extend_from_slice(&fullbox_header(0, 0));
        content.extend_from_slice(&0u32.to_be_bytes()); // creation
        content.extend_from_slice(&0u32.to_be_bytes()); // modification
        content.extend_from_slice(&1000u32.to_be_bytes()); // timescale
        content.extend_from_slice(&0u32.to_be_bytes()); // duration
        content.extend_from_slice(&0x00010000u32.to_be_bytes()); // rate 1.0
        content.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
        content.extend_from_slice(&[0u8; 10]);
        content.extend_from_slice(&identity_matrix());
        content.extend_from_slice(&[0u8; 24]);
        content.extend_from_slice(&(spec.track_id + 1).to_be_bytes());
        write_box(b"mvhd", &content)
    };

    let tkhd = {
        let mut content = Vec::with_capacity(84);
        content.extend_from_slice(&fullbox_header(0, 0x000003));
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&spec.track_id.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes()); // duration
        content.extend_from_slice(&[0u8; 8]);
        content.extend_from_slice(&[0u8; 4]); // layer + alternate group
        content.extend_from_slice(&0u16.to_be_bytes()); // volume
        content.extend_from_slice(&[0u8; 2]);
        content.extend_from_slice(&identity_matrix());
        content.extend_from_slice(&0u32.to_be_bytes()); // width
        content.extend_from_slice(&0u32.to_be_bytes()); // height
        write_box(b"tkhd", &content)
    };

    let mdhd = {
        let mut content = Vec::with_capacity(24);
        content.extend_from_slice(&fullbox_header(0, 0));
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&spec.timescale.to_be_bytes());
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(&0x55c4u16.to_be_bytes()); // "und"
        content.extend_from_slice(&0u16.to_be_bytes());
        write_box(b"mdhd", &content)
    };

    let hdlr = {
        let mut content = Vec::with_capacity(25);
        content.extend_from_slice(&fullbox_header(0, 0));
        content.extend_from_slice(&0u32.to_be_bytes());
        content.extend_from_slice(spec.kind.handler());
        content.extend_from_slice(&[0u8; 12]);
        content.push(0);
        write_box(b"hdlr", &content)
    };

    let entry_type = if spec.encrypted {
        spec.kind.protected_entry()
    } else {
        spec.kind.clear_entry()
    };
    let mut entry_content = vec![0u8; 6];
    entry_content.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    let entry = write_box(entry_type, &entry_content);

    let stsd = {
        let mut content = Vec::with_capacity(8 + entry.len());
        content.extend_from_slice(&fullbox_header(0, 0));
        content.extend_from_slice(&1u32.to_be_bytes());
        content.extend_from_slice(&entry);
        write_box(b"stsd", &content)
    };
    let stbl = write_container_box(b"stbl", &[&stsd]);
    let minf = write_container_box(b"minf", &[&stbl]);
    let mdia = write_container_box(b"mdia", &[&mdhd, &hdlr, &minf]);
    let trak = write_container_box(b"trak", &[&tkhd, &mdia]);

    let trex = {
        let mut content = Vec::with_capacity(24);
        content.extend_from_slice(&fullbox_header(0, 0));
        content.extend_from_slice(&spec.track_id.to_be_bytes());
        content.extend_from_slice(&1u32.to_be_bytes());
        content.extend_from_slice(&[0u8; 12]);
        write_box(b"trex", &content)
    };
    let mvex = write_container_box(b"mvex", &[&trex]);
    let moov = write_container_box(b"moov", &[&mvhd, &trak, &mvex]);

    [ftyp, moov].concat()
}

/// Write a media segment: moof(mfhd, traf(tfhd, tfdt)) + mdat.
pub fn write_media_segment(
    sequence_number: u32,
    track_id: u32,
    base_media_decode_time: u64,
    payload: &[u8],
) -> Vec<u8> {
    let mfhd = {
        let mut content = Vec::with_capacity(8);
        content.extend_from_slice(&fullbox_header(0, 0));
        content.extend_from_slice(&sequence_number.to_be_bytes());
        write_box(b"mfhd", &content)
    };
    // default-base-is-moof
    let tfhd = {
        let mut content = Vec::with_capacity(8);
        content.extend_from_slice(&fullbox_header(0, 0x020000));
        content.extend_from_slice(&track_id.to_be_bytes());
        write_box(b"tfhd", &content)
    };
    let tfdt = {
        let mut content = Vec::with_capacity(12);
        content.extend_from_slice(&fullbox_header(1, 0));
        content.extend_from_slice(&base_media_decode_time.to_be_bytes());
        write_box(b"tfdt", &content)
    };
    let traf = write_container_box(b"traf", &[&tfhd, &tfdt]);
    let moof = write_container_box(b"moof", &[&mfhd, &traf]);
    let mdat = write_box(b"mdat", payload);

    [moof, mdat].concat()
}

fn identity_matrix() -> [u8; 36] {
    let mut m = [0u8; 36];
    m[0..4].copy_from_slice(&0x00010000u32.to_be_bytes());
    m[16..20].copy_from_slice(&0x00010000u32.to_be_bytes());
    m[32..36].copy_from_slice(&0x40000000u32.to_be_bytes());
    m
}
