//! ISO BMFF box header parsing and navigation over in-memory segments.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

/// A parsed box header.
#[derive(Debug, Clone)]
pub struct BoxHeader {
    /// 4-byte box type (e.g. b"moof").
    pub box_type: [u8; 4],
    /// Total size of the box including the header.
    pub size: u64,
    /// Size of the header itself (8 or 16 for extended-size boxes).
    pub header_size: u64,
}

impl BoxHeader {
    /// Size of the box content (size - header_size).
    pub fn content_size(&self) -> u64 {
        self.size.saturating_sub(self.header_size)
    }
}

/// Read a box header from the current position.
///
/// Returns `Ok(None)` at EOF. A size of zero (box extends to the end of the
/// buffer) is resolved against `limit`, the end of the enclosing region.
pub fn read_box_header<R: Read + Seek>(
    reader: &mut R,
    limit: u64,
) -> io::Result<Option<BoxHeader>> {
    let start = reader.stream_position()?;
    let mut buf = [0u8; 8];
    match reader.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let size32 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let box_type = [buf[4], buf[5], buf[6], buf[7]];

    let (size, header_size) = match size32 {
        1 => {
            let size64 = read_u64(reader)?;
            (size64, 16u64)
        }
        0 => (limit.saturating_sub(start), 8u64),
        n => (n as u64, 8u64),
    };

    if size < header_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "box {} declares size {size} smaller than its header",
                String::from_utf8_lossy(&box_type)
            ),
        ));
    }

    Ok(Some(BoxHeader {
        box_type,
        size,
        header_size,
    }))
}

/// Search for a child box with the given type within `parent_content_size` bytes.
///
/// If found, the reader is positioned at the start of the child's content
/// (just past its header). Returns the child's header.
pub fn find_child_box<R: Read + Seek>(
    reader: &mut R,
    parent_content_size: u64,
    target: &[u8; 4],
) -> io::Result<Option<BoxHeader>> {
    let start = reader.stream_position()?;
    let end = start + parent_content_size;

    while reader.stream_position()? < end {
        let box_start = reader.stream_position()?;
        let Some(header) = read_box_header(reader, end)? else {
            return Ok(None);
        };
        if &header.box_type == target {
            return Ok(Some(header));
        }
        reader.seek(SeekFrom::Start(box_start + header.size))?;
    }

    Ok(None)
}

/// Descend through a path of nested boxes starting at the top level of
/// `data`, e.g. `[b"moof", b"traf", b"tfdt"]`.
///
/// On success the returned cursor is positioned at the start of the last
/// box's content.
pub fn find_path<'a>(
    data: &'a [u8],
    path: &[&[u8; 4]],
) -> io::Result<Option<(Cursor<&'a [u8]>, BoxHeader)>> {
    let mut cursor = Cursor::new(data);
    let mut region = data.len() as u64;
    let mut found = None;

    for target in path {
        let Some(header) = find_child_box(&mut cursor, region, target)? else {
            return Ok(None);
        };
        region = header.content_size();
        found = Some(header);
    }

    Ok(found.map(|header| (cursor, header)))
}

/// Read a big-endian u16.
pub fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

/// Read a big-endian u32.
pub fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Read a big-endian u64.
pub fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Read a fullbox header (1 byte version + 3 bytes flags) and return (version, flags).
pub fn read_fullbox_header<R: Read>(reader: &mut R) -> io::Result<(u8, u32)> {
    let val = read_u32(reader)?;
    let version = (val >> 24) as u8;
    let flags = val & 0x00FFFFFF;
    Ok((version, flags))
}
