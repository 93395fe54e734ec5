//! SP snapshot loader for 48K and 128K Spectrum models.
//!
//! An SP file is a 38-byte register header — carrying `PC` directly,
//! unlike SNA 48K which pops it from the stack — followed by raw RAM
//! page data. The header alone doesn't say which model the snapshot is
//! for; like SNA, that's determined by the total file size: 49,190 bytes
//! (header + 3 banks) for 48K, 131,110 bytes (header + 8 banks) for 128K.
//!
//! Bytes 32-37 beyond the 128K paging register are reserved/unused.

#![allow(clippy::cast_possible_truncation)]

use zilog_z80::Registers;

const HEADER_SIZE: usize = 38;
/// Size of one paged RAM bank, matching `format_sna`/`format_z80`.
pub const PAGE_SIZE: usize = 16_384;
/// Total SP file size for a 48K snapshot (header + 3 banks).
pub const SP_48K_SIZE: usize = HEADER_SIZE + 3 * PAGE_SIZE;
/// Total SP file size for a 128K snapshot (header + 8 banks).
pub const SP_128K_SIZE: usize = HEADER_SIZE + 8 * PAGE_SIZE;

const SIGNATURE: &[u8; 2] = b"SP";

/// A parsed SP snapshot: register state, border colour, and the 8
/// possible 16 KiB RAM pages (only populated pages are non-empty).
#[derive(Debug, Clone)]
pub struct SpSnapshot {
    pub registers: Registers,
    pub border: u8,
    /// 16 KiB RAM pages indexed 0-7, matching `format_sna`'s numbering.
    pub pages: [Vec<u8>; 8],
    /// `0x7FFD` paging register value. `None` for 48K snapshots.
    pub port_7ffd: Option<u8>,
}

/// Parse an SP snapshot from raw bytes.
///
/// # Errors
///
/// Fails on a bad signature or a file size matching neither the 48K nor
/// 128K layout.
pub fn parse(data: &[u8]) -> Result<SpSnapshot, String> {
    if data.len() < HEADER_SIZE || &data[0..2] != SIGNATURE {
        return Err("invalid SP signature (expected \"SP\")".to_string());
    }

    let mut registers = Registers {
        a: data[2],
        f: data[3],
        c: data[4],
        b: data[5],
        e: data[6],
        d: data[7],
        l: data[8],
        h: data[9],
        a_alt: data[10],
        f_alt: data[11],
        c_alt: data[12],
        b_alt: data[13],
        e_alt: data[14],
        d_alt: data[15],
        l_alt: data[16],
        h_alt: data[17],
        ix: u16::from(data[18]) | (u16::from(data[19]) << 8),
        iy: u16::from(data[20]) | (u16::from(data[21]) << 8),
        i: data[22],
        r: data[23],
        sp: u16::from(data[24]) | (u16::from(data[25]) << 8),
        ..Registers::default()
    };

    let iff_byte = data[26];
    registers.iff1 = iff_byte & 0x01 != 0;
    registers.iff2 = iff_byte & 0x02 != 0;
    registers.im = data[27] & 0x03;
    let border = data[28] & 0x07;
    registers.pc = u16::from(data[29]) | (u16::from(data[30]) << 8);
    let flags = data[31];
    let is_128k = flags & 0x01 != 0;

    let mut pages: [Vec<u8>; 8] = Default::default();
    let mut port_7ffd = None;

    if is_128k {
        if data.len() != SP_128K_SIZE {
            return Err(format!(
                "SP 128K snapshot has wrong size: expected {SP_128K_SIZE}, got {}",
                data.len()
            ));
        }
        port_7ffd = Some(data[32]);
        for page in 0..8 {
            let start = HEADER_SIZE + page * PAGE_SIZE;
            pages[page] = data[start..start + PAGE_SIZE].to_vec();
        }
    } else {
        if data.len() != SP_48K_SIZE {
            return Err(format!(
                "SP 48K snapshot has wrong size: expected {SP_48K_SIZE}, got {}",
                data.len()
            ));
        }
        // 48K layout: three consecutive banks mapping to pages 5, 2, 0
        // (addresses 0x4000, 0x8000, 0xC000), matching SNA's convention.
        let bank_pages = [5usize, 2, 0];
        for (i, &page) in bank_pages.iter().enumerate() {
            let start = HEADER_SIZE + i * PAGE_SIZE;
            pages[page] = data[start..start + PAGE_SIZE].to_vec();
        }
    }

    Ok(SpSnapshot { registers, border, pages, port_7ffd })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sp_48k() -> Vec<u8> {
        let mut out = vec![0u8; HEADER_SIZE];
        out[0] = b'S';
        out[1] = b'P';
        out[2] = 0x12; // A
        out[29] = 0x34; // PC lo
        out[30] = 0x56; // PC hi
        out[28] = 3; // border
        out.extend(std::iter::repeat_n(0xAAu8, PAGE_SIZE)); // page 5
        out.extend(std::iter::repeat_n(0xBBu8, PAGE_SIZE)); // page 2
        out.extend(std::iter::repeat_n(0xCCu8, PAGE_SIZE)); // page 0
        out
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = make_sp_48k();
        data[0] = b'X';
        assert!(parse(&data).is_err());
    }

    #[test]
    fn parses_48k_registers_and_pc() {
        let data = make_sp_48k();
        let snap = parse(&data).expect("valid SP");
        assert_eq!(snap.registers.a, 0x12);
        assert_eq!(snap.registers.pc, 0x5634);
        assert_eq!(snap.border, 3);
        assert_eq!(snap.pages[5][0], 0xAA);
        assert_eq!(snap.pages[2][0], 0xBB);
        assert_eq!(snap.pages[0][0], 0xCC);
        assert!(snap.port_7ffd.is_none());
    }

    #[test]
    fn wrong_size_errors() {
        let mut data = make_sp_48k();
        data.truncate(data.len() - 10);
        assert!(parse(&data).is_err());
    }

    #[test]
    fn parses_128k_pages_and_paging_register() {
        let mut out = vec![0u8; HEADER_SIZE];
        out[0] = b'S';
        out[1] = b'P';
        out[31] = 0x01; // 128K flag
        out[32] = 0x10; // 0x7FFD value
        for page in 0..8u8 {
            out.extend(std::iter::repeat_n(page, PAGE_SIZE));
        }
        let snap = parse(&out).expect("valid SP 128K");
        assert_eq!(snap.port_7ffd, Some(0x10));
        for page in 0..8usize {
            assert_eq!(snap.pages[page][0], page as u8);
        }
    }
}
