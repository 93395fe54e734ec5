//! TD0 (Teledisk): a 12-byte header (signature "TD" for an uncompressed
//! image, "td" for the LZH-compressed variant), an optional comment
//! block, then per-track records terminated by a sector count of 0xFF.
//! Each sector has a 6-byte descriptor and, unless flagged as having no
//! data, a length-prefixed data block encoded with a small per-sector
//! compression method.
//!
//! The "td" signature wraps everything past the header in the
//! [`lzhuf`] compression scheme; it's unwrapped up front so the rest of
//! the parser never has to care which signature it saw.

use crate::formats::lzhuf;
use crate::trackstore::{Sector, Track, TrackStore};

const HEADER_SIZE: usize = 12;
const COMMENT_HEADER_SIZE: usize = 10;

/// Parse a TD0 image, uncompressed or LZH-compressed.
///
/// # Errors
///
/// Fails on an unrecognized signature, a truncated header/track table,
/// or a sector using an unsupported encoding method.
pub fn parse(data: &[u8]) -> Result<TrackStore, String> {
    if data.len() < HEADER_SIZE {
        return Err(format!(
            "TD0 file too short: need at least {HEADER_SIZE} bytes, got {}",
            data.len()
        ));
    }

    let compressed = match &data[0..2] {
        b"TD" => false,
        b"td" => true,
        other => return Err(format!("invalid TD0 signature {other:02X?}")),
    };

    if compressed {
        let mut full = data[..HEADER_SIZE].to_vec();
        full.extend(lzhuf::decompress(&data[HEADER_SIZE..])?);
        parse_body(&full)
    } else {
        parse_body(data)
    }
}

fn parse_body(data: &[u8]) -> Result<TrackStore, String> {
    let stepping = data[6];
    let sides = data[9].max(1) as usize;

    let mut pos = HEADER_SIZE;
    if stepping & 0x80 != 0 {
        if pos + COMMENT_HEADER_SIZE > data.len() {
            return Err("TD0 comment block header truncated".to_string());
        }
        let comment_len = (u16::from(data[pos + 2]) | (u16::from(data[pos + 3]) << 8)) as usize;
        pos += COMMENT_HEADER_SIZE + comment_len;
    }

    let mut tracks: Vec<(u8, u8, Vec<Sector>)> = Vec::new();
    let mut max_cylinder = 0u8;

    loop {
        if pos >= data.len() {
            break;
        }
        let sector_count = data[pos];
        if sector_count == 0xFF {
            break;
        }
        if pos + 4 > data.len() {
            return Err(format!("TD0 track header truncated at offset {pos}"));
        }
        let cylinder = data[pos + 1];
        let head = data[pos + 2] & 0x7F;
        pos += 4;
        max_cylinder = max_cylinder.max(cylinder);

        let mut sectors = Vec::with_capacity(sector_count as usize);
        for _ in 0..sector_count {
            if pos + 6 > data.len() {
                return Err(format!("TD0 sector descriptor truncated at offset {pos}"));
            }
            let sec_cyl = data[pos];
            let sec_head = data[pos + 1];
            let record = data[pos + 2];
            let size_code = data[pos + 3];
            let flags = data[pos + 4];
            pos += 6;

            let len = 128usize << size_code;
            let no_data = flags & 0x04 != 0;
            let crc_ok = flags & 0x02 == 0;

            let sector_data = if no_data {
                vec![0u8; len]
            } else {
                if pos + 3 > data.len() {
                    return Err(format!("TD0 sector data block truncated at offset {pos}"));
                }
                let data_size = (u16::from(data[pos]) | (u16::from(data[pos + 1]) << 8)) as usize;
                let method = data[pos + 2];
                let block_start = pos + 3;
                let block_end = block_start + data_size.saturating_sub(1);
                if block_end > data.len() {
                    return Err(format!("TD0 sector data block at offset {pos} runs past end of file"));
                }
                let encoded = &data[block_start..block_end];
                pos = block_end;
                decode_sector(encoded, method, len)?
            };

            sectors.push(Sector {
                cylinder: sec_cyl,
                head: sec_head,
                record,
                size_code,
                data: sector_data,
                crc_ok,
            });
        }

        tracks.push((cylinder, head, sectors));
    }

    let cylinders = usize::from(max_cylinder) + 1;
    let mut store = TrackStore::new(cylinders, sides);
    for (cylinder, head, sectors) in tracks {
        store.set_track(cylinder, head, Track { sectors });
    }

    Ok(store)
}

fn decode_sector(encoded: &[u8], method: u8, len: usize) -> Result<Vec<u8>, String> {
    match method {
        0 => {
            let mut out = encoded.to_vec();
            out.resize(len, 0);
            Ok(out)
        }
        1 => {
            let mut out = Vec::with_capacity(len);
            let mut i = 0;
            while i + 4 <= encoded.len() && out.len() < len {
                let count = u16::from(encoded[i]) | (u16::from(encoded[i + 1]) << 8);
                let pattern = [encoded[i + 2], encoded[i + 3]];
                for _ in 0..count {
                    out.extend_from_slice(&pattern);
                }
                i += 4;
            }
            out.resize(len, 0);
            Ok(out)
        }
        2 => {
            let mut out = Vec::with_capacity(len);
            let mut i = 0;
            while i < encoded.len() && out.len() < len {
                let block_type = encoded[i];
                i += 1;
                if block_type == 0 {
                    if i >= encoded.len() {
                        break;
                    }
                    let count = encoded[i] as usize;
                    i += 1;
                    let end = (i + count).min(encoded.len());
                    out.extend_from_slice(&encoded[i..end]);
                    i = end;
                } else {
                    if i + 2 > encoded.len() {
                        break;
                    }
                    let pattern = [encoded[i], encoded[i + 1]];
                    i += 2;
                    for _ in 0..block_type {
                        out.extend_from_slice(&pattern);
                    }
                }
            }
            out.resize(len, 0);
            Ok(out)
        }
        other => Err(format!("unsupported TD0 sector encoding method {other}")),
    }
}
