//! PRO: a 7-byte header (signature "PRO", version, cylinder count, side
//! count, sectors-per-track), followed by each track's sectors stored
//! inline — a 6-byte descriptor immediately followed by that sector's
//! raw data, then the next descriptor, and so on. Unlike ISD's flat
//! descriptor-array-then-data-blob layout, PRO interleaves descriptor
//! and data per sector, track by track.

use crate::trackstore::{Sector, Track, TrackStore};

const HEADER_SIZE: usize = 7;
const SIGNATURE: &[u8; 3] = b"PRO";
const DESCRIPTOR_SIZE: usize = 6;

/// Parse a PRO disk image.
///
/// # Errors
///
/// Fails on a bad signature or a track whose descriptor/data stream
/// runs past the end of the file.
pub fn parse(data: &[u8]) -> Result<TrackStore, String> {
    if data.len() < HEADER_SIZE || &data[0..3] != SIGNATURE {
        return Err("invalid PRO signature (expected \"PRO\")".to_string());
    }

    let cylinders = data[4] as usize;
    let heads = data[5].max(1) as usize;
    let sectors_per_track = data[6] as usize;
    if cylinders == 0 || sectors_per_track == 0 {
        return Err("PRO image declares zero cylinders or sectors per track".to_string());
    }

    let mut store = TrackStore::new(cylinders, heads);
    let mut pos = HEADER_SIZE;

    for cyl in 0..cylinders {
        for head in 0..heads {
            let mut sectors = Vec::with_capacity(sectors_per_track);
            for _ in 0..sectors_per_track {
                if pos + DESCRIPTOR_SIZE > data.len() {
                    return Err(format!(
                        "PRO sector descriptor for cylinder {cyl} head {head} truncated at offset {pos}"
                    ));
                }
                let c = data[pos];
                let h = data[pos + 1];
                let r = data[pos + 2];
                let n = data[pos + 3];
                let flags = data[pos + 4];
                pos += DESCRIPTOR_SIZE;

                let len = 128usize << n;
                let end = pos + len;
                if end > data.len() {
                    return Err(format!(
                        "PRO sector data at offset {pos} (len {len}) runs past end of file"
                    ));
                }
                sectors.push(Sector {
                    cylinder: c,
                    head: h,
                    record: r,
                    size_code: n,
                    data: data[pos..end].to_vec(),
                    crc_ok: flags & 0x01 == 0,
                });
                pos = end;
            }
            store.set_track(cyl as u8, head as u8, Track { sectors });
        }
    }

    Ok(store)
}
