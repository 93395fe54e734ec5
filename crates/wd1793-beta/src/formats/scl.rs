//! SCL: a TR-DOS archive — "SINCLAIR" signature, a file count, a flat
//! catalog of 14-byte entries, then the files' sector data concatenated
//! in catalog order. The loader synthesizes a standard 80-track
//! double-sided TR-DOS disk: the catalog goes into track 0's first 8
//! sectors, the disk descriptor into sector 9, and each file's data is
//! placed at sequential sectors starting at track 0 sector 10.

use crate::trackstore::{sector_location, Sector, Track, TrackStore};

const SIGNATURE: &[u8; 8] = b"SINCLAIR";
const ENTRY_SIZE: usize = 14;
const SECTOR_SIZE: usize = 256;
const CATALOG_ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / 16;
const MAX_CATALOG_ENTRIES: usize = 8 * CATALOG_ENTRIES_PER_SECTOR;

pub(crate) struct Entry {
    pub(crate) name: [u8; 8],
    pub(crate) ext: u8,
    pub(crate) start: u16,
    pub(crate) length: u16,
    pub(crate) sectors: u8,
}

/// Parse an SCL archive into a freshly formatted [`TrackStore`].
///
/// # Errors
///
/// Fails on a bad signature, a truncated catalog, or more files than fit
/// in the standard TR-DOS catalog (128 entries).
pub fn parse(data: &[u8]) -> Result<TrackStore, String> {
    if data.len() < 9 || &data[0..8] != SIGNATURE {
        return Err("invalid SCL signature (expected \"SINCLAIR\")".to_string());
    }

    let file_count = data[8] as usize;
    if file_count > MAX_CATALOG_ENTRIES {
        return Err(format!(
            "SCL archive has {file_count} files, more than the {MAX_CATALOG_ENTRIES} a TR-DOS catalog holds"
        ));
    }

    let catalog_start = 9;
    let catalog_end = catalog_start + file_count * ENTRY_SIZE;
    if data.len() < catalog_end {
        return Err(format!(
            "SCL catalog truncated: need {catalog_end} bytes, got {}",
            data.len()
        ));
    }

    let mut entries = Vec::with_capacity(file_count);
    for i in 0..file_count {
        let e = &data[catalog_start + i * ENTRY_SIZE..catalog_start + (i + 1) * ENTRY_SIZE];
        let mut name = [0u8; 8];
        name.copy_from_slice(&e[0..8]);
        entries.push(Entry {
            name,
            ext: e[8],
            start: u16::from(e[9]) | (u16::from(e[10]) << 8),
            length: u16::from(e[11]) | (u16::from(e[12]) << 8),
            sectors: e[13],
        });
    }

    let heads = 2;
    let cylinders = 80;
    let mut tracks: Vec<Vec<Sector>> = vec![Vec::new(); cylinders * heads];

    tracks[0] = build_catalog_track(&entries);

    let mut global_index = 9; // sectors 1-9 (catalog + descriptor) already placed.
    let mut offset = catalog_end;
    for entry in &entries {
        (global_index, offset) =
            place_file_data(&mut tracks, heads, global_index, offset, data, entry.sectors);
    }

    let mut store = TrackStore::new(cylinders, heads);
    for cyl in 0..cylinders {
        for head in 0..heads {
            let idx = cyl * heads + head;
            store.set_track(cyl as u8, head as u8, Track { sectors: std::mem::take(&mut tracks[idx]) });
        }
    }

    Ok(store)
}

/// Place one file's raw data into sequential disk sectors starting at
/// `global_index`/`offset`, returning the updated cursor for the next
/// file. Shared by the SCL and HOB loaders, which differ only in how
/// they build their catalogs.
pub(crate) fn place_file_data(
    tracks: &mut [Vec<Sector>],
    heads: usize,
    mut global_index: usize,
    mut offset: usize,
    data: &[u8],
    sector_count: u8,
) -> (usize, usize) {
    for _ in 0..sector_count {
        let (cyl, head, record) = sector_location(global_index, heads);
        let start = offset.min(data.len());
        let end = (start + SECTOR_SIZE).min(data.len());
        let mut sector_data = data[start..end].to_vec();
        sector_data.resize(SECTOR_SIZE, 0);

        let idx = cyl as usize * heads + head as usize;
        tracks[idx].push(Sector {
            cylinder: cyl,
            head,
            record,
            size_code: 1,
            data: sector_data,
            crc_ok: true,
        });

        offset += SECTOR_SIZE;
        global_index += 1;
    }
    (global_index, offset)
}

pub(crate) fn build_catalog_track(entries: &[Entry]) -> Vec<Sector> {
    let mut sectors = Vec::with_capacity(9);

    for sector_num in 1u8..=8 {
        let mut sector_data = vec![0u8; SECTOR_SIZE];
        for slot in 0..CATALOG_ENTRIES_PER_SECTOR {
            let idx = (sector_num as usize - 1) * CATALOG_ENTRIES_PER_SECTOR + slot;
            let Some(entry) = entries.get(idx) else {
                break;
            };
            let off = slot * 16;
            sector_data[off..off + 8].copy_from_slice(&entry.name);
            sector_data[off + 8] = entry.ext;
            sector_data[off + 9] = entry.start as u8;
            sector_data[off + 10] = (entry.start >> 8) as u8;
            sector_data[off + 11] = entry.length as u8;
            sector_data[off + 12] = (entry.length >> 8) as u8;
            sector_data[off + 13] = entry.sectors;
        }
        sectors.push(Sector {
            cylinder: 0,
            head: 0,
            record: sector_num,
            size_code: 1,
            data: sector_data,
            crc_ok: true,
        });
    }

    let total_sectors: usize = entries.iter().map(|e| e.sectors as usize).sum();
    let mut descriptor = vec![0u8; SECTOR_SIZE];
    descriptor[0xE3] = 0x16; // double-sided, 80 tracks
    descriptor[0xE4] = entries.len() as u8;
    let used = 9 + total_sectors;
    let free = (80 * 2 * 16).saturating_sub(used) as u16;
    descriptor[0xE5] = free as u8;
    descriptor[0xE6] = (free >> 8) as u8;
    descriptor[0xE7] = 0x10;
    sectors.push(Sector {
        cylinder: 0,
        head: 0,
        record: 9,
        size_code: 1,
        data: descriptor,
        crc_ok: true,
    });

    sectors
}
