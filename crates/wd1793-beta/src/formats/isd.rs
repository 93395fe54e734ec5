//! ISD: a 6-byte header (signature "ISD", a 1-byte version, cylinder
//! count, side count), followed by a flat descriptor array covering
//! every sector on the disk (16 sectors/track assumed), and finally all
//! sector payloads concatenated in the same order as the descriptors.
//! Unlike FDI, descriptors carry no explicit data offset — data position
//! is implied purely by descriptor order.

use crate::trackstore::{Sector, Track, TrackStore, SECTORS_PER_TRACK};

const HEADER_SIZE: usize = 6;
const SIGNATURE: &[u8; 3] = b"ISD";
const DESCRIPTOR_SIZE: usize = 5;

/// Parse an ISD disk image.
///
/// # Errors
///
/// Fails on a bad signature or a descriptor/data table too short for
/// the declared geometry.
pub fn parse(data: &[u8]) -> Result<TrackStore, String> {
    if data.len() < HEADER_SIZE || &data[0..3] != SIGNATURE {
        return Err("invalid ISD signature (expected \"ISD\")".to_string());
    }

    let cylinders = data[4] as usize;
    let heads = data[5].max(1) as usize;
    if cylinders == 0 {
        return Err("ISD image declares zero cylinders".to_string());
    }

    let sector_total = cylinders * heads * SECTORS_PER_TRACK;
    let descriptor_table_end = HEADER_SIZE + sector_total * DESCRIPTOR_SIZE;
    if data.len() < descriptor_table_end {
        return Err(format!(
            "ISD descriptor table truncated: need {descriptor_table_end} bytes, got {}",
            data.len()
        ));
    }

    struct Desc {
        cylinder: u8,
        head: u8,
        record: u8,
        size_code: u8,
        flags: u8,
    }

    let mut descriptors = Vec::with_capacity(sector_total);
    for i in 0..sector_total {
        let d = &data[HEADER_SIZE + i * DESCRIPTOR_SIZE..HEADER_SIZE + (i + 1) * DESCRIPTOR_SIZE];
        descriptors.push(Desc { cylinder: d[0], head: d[1], record: d[2], size_code: d[3], flags: d[4] });
    }

    let mut store = TrackStore::new(cylinders, heads);
    let mut tracks: Vec<Vec<Sector>> = vec![Vec::new(); cylinders * heads];
    let mut pos = descriptor_table_end;

    for desc in descriptors {
        let len = 128usize << desc.size_code;
        let end = pos + len;
        if end > data.len() {
            return Err(format!("ISD sector data at offset {pos} (len {len}) runs past end of file"));
        }
        let idx = desc.cylinder as usize * heads + desc.head as usize;
        if idx >= tracks.len() {
            return Err(format!(
                "ISD descriptor references cylinder {} head {} outside declared geometry",
                desc.cylinder, desc.head
            ));
        }
        tracks[idx].push(Sector {
            cylinder: desc.cylinder,
            head: desc.head,
            record: desc.record,
            size_code: desc.size_code,
            data: data[pos..end].to_vec(),
            crc_ok: desc.flags & 0x01 == 0,
        });
        pos = end;
    }

    for cyl in 0..cylinders {
        for head in 0..heads {
            let idx = cyl * heads + head;
            store.set_track(cyl as u8, head as u8, Track { sectors: std::mem::take(&mut tracks[idx]) });
        }
    }

    Ok(store)
}
