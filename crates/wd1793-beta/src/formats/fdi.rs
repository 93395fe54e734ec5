//! FDI: a 14-byte file header, followed by one 7-byte track header per
//! track, each immediately followed by that track's 7-byte-per-sector
//! descriptor array. Each descriptor carries an absolute file offset to
//! its sector's data rather than relying on a fixed sector size, which is
//! how FDI images represent the irregular CHRN values copy-protected
//! disks use.

use crate::trackstore::{Sector, Track, TrackStore};

const HEADER_SIZE: usize = 14;
const SIGNATURE: &[u8; 4] = b"FDI\0";
const TRACK_HEADER_SIZE: usize = 7;
const SECTOR_DESCRIPTOR_SIZE: usize = 7;

/// Parse an FDI disk image.
///
/// # Errors
///
/// Fails on a bad signature or a truncated track/sector table.
pub fn parse(data: &[u8]) -> Result<TrackStore, String> {
    if data.len() < HEADER_SIZE || &data[0..4] != SIGNATURE {
        return Err("invalid FDI signature (expected \"FDI\\0\")".to_string());
    }

    let cylinders = (u16::from(data[4]) | (u16::from(data[5]) << 8)) as usize;
    let heads = (u16::from(data[6]) | (u16::from(data[7]) << 8)) as usize;

    let mut store = TrackStore::new(cylinders, heads.max(1));
    let mut pos = HEADER_SIZE;

    for cyl in 0..cylinders {
        for head in 0..heads.max(1) {
            if pos + TRACK_HEADER_SIZE > data.len() {
                return Err(format!(
                    "FDI track header for cylinder {cyl} head {head} truncated at offset {pos}"
                ));
            }
            let sector_count = data[pos] as usize;
            pos += TRACK_HEADER_SIZE;

            let mut sectors = Vec::with_capacity(sector_count);
            for _ in 0..sector_count {
                if pos + SECTOR_DESCRIPTOR_SIZE > data.len() {
                    return Err(format!("FDI sector descriptor truncated at offset {pos}"));
                }
                let c = data[pos];
                let h = data[pos + 1];
                let r = data[pos + 2];
                let n = data[pos + 3];
                let flags = data[pos + 4];
                let data_offset = (u16::from(data[pos + 5]) | (u16::from(data[pos + 6]) << 8)) as usize;
                pos += SECTOR_DESCRIPTOR_SIZE;

                let len = 128usize << n;
                let end = data_offset + len;
                if end > data.len() {
                    return Err(format!(
                        "FDI sector data at offset {data_offset} (len {len}) runs past end of file"
                    ));
                }

                sectors.push(Sector {
                    cylinder: c,
                    head: h,
                    record: r,
                    size_code: n,
                    data: data[data_offset..end].to_vec(),
                    crc_ok: flags & 0x01 == 0,
                });
            }

            store.set_track(cyl as u8, head as u8, Track { sectors });
        }
    }

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_fdi_single_sector(sector_data: &[u8], flags: u8) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(SIGNATURE);
        out.extend_from_slice(&1u16.to_le_bytes()); // 1 cylinder
        out.extend_from_slice(&1u16.to_le_bytes()); // 1 head
        out.extend_from_slice(&[0u8; 4]); // reserved

        out.push(1); // 1 sector
        out.extend_from_slice(&[0u8; 6]); // track header reserved

        let data_offset = out.len() + SECTOR_DESCRIPTOR_SIZE;
        out.push(0); // C
        out.push(0); // H
        out.push(1); // R
        out.push(1); // N -> 256 bytes
        out.push(flags);
        out.extend_from_slice(&(data_offset as u16).to_le_bytes());

        out.extend_from_slice(sector_data);
        out
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = make_fdi_single_sector(&[0u8; 256], 0);
        data[0] = b'X';
        assert!(parse(&data).is_err());
    }

    #[test]
    fn reads_sector_from_offset() {
        let mut sector_data = vec![0u8; 256];
        sector_data[0] = 0x77;
        let data = make_fdi_single_sector(&sector_data, 0);
        let store = parse(&data).expect("valid FDI");
        let (bytes, crc_ok) = store.read_sector(0, 0, 1).unwrap();
        assert_eq!(bytes[0], 0x77);
        assert!(crc_ok);
    }

    #[test]
    fn flags_bit0_marks_crc_error() {
        let data = make_fdi_single_sector(&[0u8; 256], 0x01);
        let store = parse(&data).expect("valid FDI");
        let (_, crc_ok) = store.read_sector(0, 0, 1).unwrap();
        assert!(!crc_ok);
    }

    #[test]
    fn truncated_sector_data_errors() {
        let mut data = make_fdi_single_sector(&[0u8; 256], 0);
        data.truncate(data.len() - 10);
        assert!(parse(&data).is_err());
    }
}
