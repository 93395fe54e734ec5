//! UDI: a raw MFM-decoded byte stream per track (no sector framing at
//! the file level). Sectors are recovered by scanning each track for ID
//! address marks (0xFE) followed by a data mark (0xFB) within a bounded
//! gap, mirroring how a real WD1793 finds sectors on an unformatted
//! bit-stream. Index-mark bitmaps aren't modelled — only the sector
//! payloads the controller actually reads/writes matter here.

use crate::trackstore::{Sector, Track, TrackStore};

const HEADER_SIZE: usize = 12;
const SIGNATURE: &[u8; 4] = b"UDI!";
const ID_MARK: u8 = 0xFE;
const DATA_MARK: u8 = 0xFB;
const DATA_MARK_SEARCH_WINDOW: usize = 64;

/// Parse a UDI raw-track image.
///
/// # Errors
///
/// Fails on a bad signature or a payload too short for the declared
/// cylinder/side count.
pub fn parse(data: &[u8]) -> Result<TrackStore, String> {
    if data.len() < HEADER_SIZE || &data[0..4] != SIGNATURE {
        return Err("invalid UDI signature (expected \"UDI!\")".to_string());
    }

    let length = u32::from(data[4])
        | (u32::from(data[5]) << 8)
        | (u32::from(data[6]) << 16)
        | (u32::from(data[7]) << 24);
    let cylinders = data[9] as usize;
    let sides = data[10] as usize;
    let _flags = data[11];

    if cylinders == 0 || sides == 0 {
        return Err("UDI image declares zero cylinders or sides".to_string());
    }

    let payload = &data[HEADER_SIZE..];
    let payload_len = (length as usize).min(payload.len());
    let payload = &payload[..payload_len];

    let tracks_total = cylinders * sides;
    if payload.len() < tracks_total {
        return Err(format!(
            "UDI payload too short for {cylinders} cylinders x {sides} sides"
        ));
    }
    let track_len = payload.len() / tracks_total;

    let mut store = TrackStore::new(cylinders, sides);
    for cyl in 0..cylinders {
        for side in 0..sides {
            let track_index = cyl * sides + side;
            let start = track_index * track_len;
            let raw = &payload[start..start + track_len];
            store.set_track(cyl as u8, side as u8, Track { sectors: scan_track(raw) });
        }
    }

    Ok(store)
}

fn scan_track(raw: &[u8]) -> Vec<Sector> {
    let mut sectors = Vec::new();
    let mut i = 0;

    while i + 4 < raw.len() {
        if raw[i] != ID_MARK {
            i += 1;
            continue;
        }

        let cylinder = raw[i + 1];
        let head = raw[i + 2];
        let record = raw[i + 3];
        let size_code = raw[i + 4];
        let after_crc = i + 5 + 2;

        let window_end = (after_crc + DATA_MARK_SEARCH_WINDOW).min(raw.len());
        let data_mark = raw[after_crc..window_end].iter().position(|&b| b == DATA_MARK);

        match data_mark {
            Some(offset) => {
                let start = after_crc + offset + 1;
                let len = 128usize << size_code;
                let end = (start + len).min(raw.len());
                let mut sector_data = raw[start..end].to_vec();
                sector_data.resize(len, 0);
                sectors.push(Sector { cylinder, head, record, size_code, data: sector_data, crc_ok: true });
                i = end + 2;
            }
            None => {
                sectors.push(Sector { cylinder, head, record, size_code, data: Vec::new(), crc_ok: false });
                i = after_crc;
            }
        }
    }

    sectors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_udi_with_sector(cylinders: u8, sides: u8, sector_data: &[u8]) -> Vec<u8> {
        let mut track = Vec::new();
        track.extend_from_slice(&[0x4E; 8]); // gap
        track.push(ID_MARK);
        track.extend_from_slice(&[0, 0, 1, 1]); // C=0,H=0,R=1,N=1 (256 bytes)
        track.extend_from_slice(&[0, 0]); // ID CRC (unchecked)
        track.extend_from_slice(&[0x4E; 4]); // gap before data mark
        track.push(DATA_MARK);
        track.extend_from_slice(sector_data);
        track.extend_from_slice(&[0, 0]); // data CRC (unchecked)
        track.extend_from_slice(&[0x4E; 8]);

        let track_len = track.len();
        let total = cylinders as usize * sides as usize;

        let mut out = Vec::new();
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&((track_len * total) as u32).to_le_bytes());
        out.push(0); // byte 8 reserved
        out.push(cylinders);
        out.push(sides);
        out.push(0); // flags

        for _ in 0..total {
            out.extend_from_slice(&track);
        }
        out
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = make_udi_with_sector(1, 1, &[0u8; 256]);
        data[0] = b'X';
        assert!(parse(&data).is_err());
    }

    #[test]
    fn finds_sector_via_id_and_data_marks() {
        let mut sector_data = vec![0u8; 256];
        sector_data[0] = 0x99;
        let data = make_udi_with_sector(1, 1, &sector_data);
        let store = parse(&data).expect("valid UDI");
        let (bytes, crc_ok) = store.read_sector(0, 0, 1).unwrap();
        assert_eq!(bytes[0], 0x99);
        assert!(crc_ok);
    }

    #[test]
    fn missing_data_mark_flags_crc_error() {
        let mut track = Vec::new();
        track.push(ID_MARK);
        track.extend_from_slice(&[0, 0, 1, 1, 0, 0]);
        track.extend_from_slice(&[0x4E; 80]); // no data mark within the window

        let mut out = Vec::new();
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&(track.len() as u32).to_le_bytes());
        out.push(0);
        out.push(1);
        out.push(1);
        out.push(0);
        out.extend_from_slice(&track);

        let store = parse(&out).expect("valid UDI header");
        let (_, crc_ok) = store.read_sector(0, 0, 1).unwrap();
        assert!(!crc_ok);
    }
}
