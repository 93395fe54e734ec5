//! HOB: a single-file TR-DOS archive — a 17-byte file header followed
//! directly by the file's data. Loaded the same way as an SCL with one
//! entry: a freshly formatted TR-DOS disk with the file placed at
//! sequential sectors after the catalog.

use crate::formats::scl::{self, Entry};
use crate::trackstore::TrackStore;

const HEADER_SIZE: usize = 17;

/// Parse a HOB (or the equivalent `$B`/`$C`/`$D`/`$#` variants) archive.
///
/// # Errors
///
/// Fails if the file is shorter than the 17-byte header.
pub fn parse(data: &[u8]) -> Result<TrackStore, String> {
    if data.len() < HEADER_SIZE {
        return Err(format!(
            "HOB file too short: need at least {HEADER_SIZE} bytes, got {}",
            data.len()
        ));
    }

    let mut name = [0u8; 8];
    name.copy_from_slice(&data[0..8]);
    let entry = Entry {
        name,
        ext: data[8],
        start: u16::from(data[9]) | (u16::from(data[10]) << 8),
        length: u16::from(data[11]) | (u16::from(data[12]) << 8),
        sectors: data[13],
        // data[14..17] reserved, unused.
    };

    let heads = 2;
    let cylinders = 80;
    let mut tracks: Vec<Vec<_>> = vec![Vec::new(); cylinders * heads];
    tracks[0] = scl::build_catalog_track(std::slice::from_ref(&entry));

    let file_data = &data[HEADER_SIZE..];
    scl::place_file_data(&mut tracks, heads, 9, 0, file_data, entry.sectors);

    let mut store = TrackStore::new(cylinders, heads);
    for cyl in 0..cylinders {
        for head in 0..heads {
            let idx = cyl * heads + head;
            store.set_track(cyl as u8, head as u8, crate::trackstore::Track {
                sectors: std::mem::take(&mut tracks[idx]),
            });
        }
    }

    Ok(store)
}
