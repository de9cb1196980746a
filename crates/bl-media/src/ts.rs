//! MPEG-2 transport stream PTS extraction.
//!
//! Only the first presentation timestamp of the segment is of interest: the
//! reader walks 188-byte packets until it finds a payload-unit-start packet
//! carrying a PES header with a PTS.

use crate::error::{Error, Result};

/// Size of a transport stream packet.
pub const PACKET_SIZE: usize = 188;
/// Sync byte that starts every packet.
pub const SYNC_BYTE: u8 = 0x47;
/// PTS clock rate.
pub const PTS_CLOCK_HZ: u32 = 90_000;

const PAT_PID: u16 = 0x0000;
const NULL_PID: u16 = 0x1FFF;

/// First PES presentation timestamp in the segment, in 90 kHz ticks.
pub fn first_pts(data: &[u8]) -> Result<Option<u64>> {
    if data.is_empty() {
        return Ok(None);
    }
    if data[0] != SYNC_BYTE {
        return Err(Error::invalid_ts(format!(
            "expected sync byte 0x47, found {:#04x}",
            data[0]
        )));
    }

    for packet in data.chunks_exact(PACKET_SIZE) {
        if packet[0] != SYNC_BYTE {
            return Err(Error::invalid_ts("lost packet sync"));
        }
        let payload_unit_start = packet[1] & 0x40 != 0;
        let pid = (u16::from(packet[1] & 0x1F) << 8) | u16::from(packet[2]);
        if !payload_unit_start || pid == PAT_PID || pid == NULL_PID {
            continue;
        }
        let Some(payload) = payload(packet)? else {
            continue;
        };
        if let Some(pts) = pes_pts(payload) {
            return Ok(Some(pts));
        }
    }

    Ok(None)
}

/// Start time in seconds of a transport stream segment.
pub fn start_time(data: &[u8]) -> Result<Option<f64>> {
    Ok(first_pts(data)?.map(|pts| pts as f64 / PTS_CLOCK_HZ as f64))
}

fn payload(packet: &[u8]) -> Result<Option<&[u8]>> {
    let adaptation_control = (packet[3] >> 4) & 0x03;
    let mut offset = 4usize;
    if adaptation_control & 0x02 != 0 {
        let length = packet[4] as usize;
        offset += 1 + length;
        if offset > PACKET_SIZE {
            return Err(Error::invalid_ts(format!(
                "adaptation field of {length} bytes overruns packet"
            )));
        }
    }
    if adaptation_control & 0x01 == 0 || offset >= PACKET_SIZE {
        return Ok(None);
    }
    Ok(Some(&packet[offset..]))
}

/// PTS of a PES header, if the payload starts with one and carries a PTS.
fn pes_pts(payload: &[u8]) -> Option<u64> {
    if payload.len() < 14 || payload[0..3] != [0x00, 0x00, 0x01] {
        return None;
    }
    let pts_dts_flags = payload[7] >> 6;
    if pts_dts_flags & 0x02 == 0 {
        return None;
    }
    let p = &payload[9..14];
    let pts = (u64::from((p[0] >> 1) & 0x07) << 30)
        | (u64::from(p[1]) << 22)
        | (u64::from(p[2] >> 1) << 15)
        | (u64::from(p[3]) << 7)
        | u64::from(p[4] >> 1);
    Some(pts)
}

/// Write a single packet starting a PES with the given PTS, stuffed to 188
/// bytes. Used to synthesize transport stream segments.
pub fn write_pes_packet(pid: u16, pts: u64, payload: &[u8]) -> [u8; PACKET_SIZE] {
    let mut pes = Vec::with_capacity(14 + payload.len());
    pes.extend_from_slice(&[0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x80, 0x05]);
    pes.push(0x21 | (((pts >> 30) as u8 & 0x07) << 1));
    pes.push((pts >> 22) as u8);
    pes.push((((pts >> 15) as u8) << 1) | 0x01);
    pes.push((pts >> 7) as u8);
    pes.push(((pts as u8) << 1) | 0x01);
    pes.extend_from_slice(payload);
    pes.truncate(PACKET_SIZE - 4);

    let mut packet = [0xFFu8; PACKET_SIZE];
    packet[0] = SYNC_BYTE;
    packet[1] = 0x40 | ((pid >> 8) as u8 & 0x1F);
    packet[2] = pid as u8;
    let stuffing = PACKET_SIZE - 4 - pes.len();
    if stuffing == 0 {
        packet[3] = 0x10;
        packet[4..].copy_from_slice(&pes);
    } else {
        // Adaptation field followed by payload; the field absorbs the stuffing.
        packet[3] = 0x30;
        packet[4] = (stuffing - 1) as u8;
        if stuffing > 1 {
            packet[5] = 0x00;
        }
        packet[4 + stuffing..].copy_from_slice(&pes);
    }
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat_packet() -> [u8; PACKET_SIZE] {
        let mut packet = [0xFFu8; PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = 0x40;
        packet[2] = 0x00;
        packet[3] = 0x10;
        packet
    }

    #[test]
    fn extracts_first_pts() {
        let data = [pat_packet(), write_pes_packet(0x100, 900_000, &[0u8; 32])].concat();
        assert_eq!(first_pts(&data).unwrap(), Some(900_000));
        assert_eq!(start_time(&data).unwrap(), Some(10.0));
    }

    #[test]
    fn large_pts_round_trips_33_bits() {
        let pts = (1u64 << 33) - 1;
        let data = write_pes_packet(0x101, pts, &[]);
        assert_eq!(first_pts(&data).unwrap(), Some(pts));
    }

    #[test]
    fn full_payload_packet_has_no_adaptation_field() {
        let data = write_pes_packet(0x100, 90_000, &[0xAB; 200]);
        assert_eq!(data[3], 0x10);
        assert_eq!(first_pts(&data).unwrap(), Some(90_000));
    }

    #[test]
    fn bad_sync_byte_is_error() {
        let mut data = write_pes_packet(0x100, 0, &[]);
        data[0] = 0x00;
        assert!(matches!(first_pts(&data), Err(Error::InvalidTs(_))));
    }

    #[test]
    fn no_pes_yields_none() {
        assert_eq!(first_pts(&pat_packet()).unwrap(), None);
        assert_eq!(first_pts(&[]).unwrap(), None);
    }
}
