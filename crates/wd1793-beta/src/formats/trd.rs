//! TRD: a raw sector dump of a TR-DOS disk, track-major then side-minor,
//! with no header at all — geometry is read from the disk descriptor at
//! track 0, sector 9, or inferred from file size if that sector doesn't
//! carry a valid TR-DOS signature.

use crate::trackstore::{Sector, Track, TrackStore};

const SECTOR_SIZE: usize = 256;
const SECTORS_PER_TRACK: usize = 16;
const BYTES_PER_TRACK: usize = SECTOR_SIZE * SECTORS_PER_TRACK;
const DESCRIPTOR_SECTOR: usize = 9;
const SIGNATURE_OFFSET: usize = 0xE7;
const DISK_TYPE_OFFSET: usize = 0xE3;

/// Sector ordering applied when serializing a track back to bytes
/// (`conf.trdos_interleave`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interleave {
    #[default]
    None,
    Single,
    Double,
}

/// Parse a raw TRD dump into a [`TrackStore`].
///
/// # Errors
///
/// Fails if the image is shorter than one track or its length isn't a
/// multiple of the 256-byte sector size.
pub fn parse(data: &[u8]) -> Result<TrackStore, String> {
    if data.len() < BYTES_PER_TRACK {
        return Err(format!(
            "TRD image too short: need at least {BYTES_PER_TRACK} bytes, got {}",
            data.len()
        ));
    }
    if data.len() % SECTOR_SIZE != 0 {
        return Err(format!(
            "TRD image size {} is not a multiple of the {SECTOR_SIZE}-byte sector size",
            data.len()
        ));
    }

    let descriptor_offset = (DESCRIPTOR_SECTOR - 1) * SECTOR_SIZE;
    let descriptor = data.get(descriptor_offset..descriptor_offset + SECTOR_SIZE);

    let (cylinders, heads) = match descriptor {
        Some(sector) if sector[SIGNATURE_OFFSET] == 0x10 => match sector[DISK_TYPE_OFFSET] {
            0x16 => (80, 2),
            0x17 => (40, 2),
            0x18 => (80, 1),
            0x19 => (40, 1),
            other => return Err(format!("unrecognised TRD disk type byte 0x{other:02X}")),
        },
        _ => {
            let total_tracks = data.len() / BYTES_PER_TRACK;
            if total_tracks % 2 == 0 {
                (total_tracks / 2, 2)
            } else {
                (total_tracks, 1)
            }
        }
    };

    if cylinders * heads * BYTES_PER_TRACK > data.len() {
        return Err(format!(
            "TRD image too short for {cylinders}-cylinder {heads}-side geometry"
        ));
    }

    let order = interleave_order(Interleave::None);
    let mut store = TrackStore::new(cylinders, heads);
    let mut pos = 0;
    for cyl in 0..cylinders {
        for head in 0..heads {
            let mut sectors = Vec::with_capacity(SECTORS_PER_TRACK);
            for (physical, &record) in order.iter().enumerate() {
                let start = pos + physical * SECTOR_SIZE;
                let mut sector_data = data[start..start + SECTOR_SIZE].to_vec();
                sector_data.resize(SECTOR_SIZE, 0);
                sectors.push(Sector {
                    cylinder: cyl as u8,
                    head: head as u8,
                    record,
                    size_code: 1,
                    data: sector_data,
                    crc_ok: true,
                });
            }
            store.set_track(cyl as u8, head as u8, Track { sectors });
            pos += BYTES_PER_TRACK;
        }
    }

    Ok(store)
}

/// Serialize a [`TrackStore`] back to a raw TRD dump. Round-trips
/// byte-identical when parsed with the same interleave and no sector has
/// been modified.
#[must_use]
pub fn to_bytes(store: &TrackStore, interleave: Interleave) -> Vec<u8> {
    let order = interleave_order(interleave);
    let mut out = Vec::with_capacity(store.cylinders * store.heads * BYTES_PER_TRACK);

    for cyl in 0..store.cylinders {
        for head in 0..store.heads {
            let mut buf = vec![0u8; BYTES_PER_TRACK];
            if let Some(track) = store.track(cyl as u8, head as u8) {
                for (physical, &record) in order.iter().enumerate() {
                    if let Some(sector) = track.sectors.iter().find(|s| s.record == record) {
                        let start = physical * SECTOR_SIZE;
                        let len = SECTOR_SIZE.min(sector.data.len());
                        buf[start..start + len].copy_from_slice(&sector.data[..len]);
                    }
                }
            }
            out.extend_from_slice(&buf);
        }
    }

    out
}

/// Build the physical-position -> logical-record mapping for a track,
/// per the configured interleave factor.
fn interleave_order(interleave: Interleave) -> [u8; SECTORS_PER_TRACK] {
    let step = match interleave {
        Interleave::None => 1,
        Interleave::Single => 2,
        Interleave::Double => 3,
    };

    let mut order = [0u8; SECTORS_PER_TRACK];
    let mut slot = 0usize;
    for record in 1..=SECTORS_PER_TRACK as u8 {
        while order[slot] != 0 {
            slot = (slot + 1) % SECTORS_PER_TRACK;
        }
        order[slot] = record;
        slot = (slot + step) % SECTORS_PER_TRACK;
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_640k() -> Vec<u8> {
        vec![0u8; 80 * 2 * BYTES_PER_TRACK]
    }

    #[test]
    fn parses_geometry_from_descriptor() {
        let mut data = blank_640k();
        let descriptor_offset = (DESCRIPTOR_SECTOR - 1) * SECTOR_SIZE;
        data[descriptor_offset + DISK_TYPE_OFFSET] = 0x16;
        data[descriptor_offset + SIGNATURE_OFFSET] = 0x10;

        let store = parse(&data).expect("valid TRD");
        assert_eq!(store.cylinders, 80);
        assert_eq!(store.heads, 2);
    }

    #[test]
    fn falls_back_to_size_when_descriptor_missing_signature() {
        let data = vec![0u8; 40 * BYTES_PER_TRACK]; // single-sided 40 tracks
        let store = parse(&data).expect("valid TRD");
        assert_eq!(store.cylinders, 40);
        assert_eq!(store.heads, 1);
    }

    #[test]
    fn too_short_errors() {
        assert!(parse(&[0u8; 100]).is_err());
    }

    #[test]
    fn round_trips_with_default_interleave() {
        let mut data = blank_640k();
        data[0] = 0xAA;
        data[BYTES_PER_TRACK] = 0xBB;

        let store = parse(&data).expect("valid TRD");
        let out = to_bytes(&store, Interleave::None);
        assert_eq!(out, data);
    }

    #[test]
    fn none_interleave_is_sequential() {
        let order = interleave_order(Interleave::None);
        assert_eq!(order, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
    }
}
