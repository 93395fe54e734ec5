//! .Z80 snapshot loader for ZX Spectrum (v1, v2, v3 formats).
//!
//! **Version 1** (offset 6–7 PC ≠ 0): 30-byte header + one memory block.
//! 48K only.
//!
//! **Version 2/3** (offset 6–7 PC = 0): 30-byte base header + extended
//! header + page-based memory blocks. Supports 48K and 128K.

#![allow(clippy::cast_possible_truncation)]

use format_sna::PAGE_SIZE;
use zilog_z80::Registers;

/// Minimum size for a v1 header.
const V1_HEADER_SIZE: usize = 30;

/// A parsed .Z80 snapshot: register state, border colour, and the 16 KiB
/// RAM pages it populated.
#[derive(Debug, Clone)]
pub struct Z80Snapshot {
    pub registers: Registers,
    pub border: u8,
    /// 16 KiB RAM pages indexed 0-7, matching the same physical page
    /// numbering `format_sna::SnaSnapshot` uses.
    pub pages: [Vec<u8>; 8],
    /// `0x7FFD` paging register value, for 128K snapshots.
    pub port_7ffd: Option<u8>,
}

/// Parse a .Z80 snapshot, auto-detecting v1/v2/v3 from the header.
///
/// # Errors
///
/// Returns an error if the data is too short, the format is unrecognised,
/// or a compressed block is truncated.
pub fn parse(data: &[u8]) -> Result<Z80Snapshot, String> {
    if data.len() < V1_HEADER_SIZE {
        return Err(format!(
            "Z80 file too short: need at least {V1_HEADER_SIZE} bytes, got {}",
            data.len()
        ));
    }

    let version = detect_version(data);
    match version {
        1 => parse_v1(data),
        _ => parse_v2v3(data),
    }
}

fn detect_version(data: &[u8]) -> u8 {
    let pc = u16::from(data[6]) | (u16::from(data[7]) << 8);
    if pc != 0 {
        return 1;
    }

    if data.len() < 32 {
        return 2;
    }

    let ext_len = u16::from(data[30]) | (u16::from(data[31]) << 8);
    match ext_len {
        23 => 2,
        54 | 55 => 3,
        _ => 3,
    }
}

/// Load the base 30-byte header into a register file.
///
/// Returns the flags byte 1 (offset 12) for the caller to extract
/// compression and border info.
fn parse_base_header(data: &[u8]) -> (Registers, u8) {
    let mut regs = Registers::default();

    regs.a = data[0];
    regs.f = data[1];
    regs.c = data[2];
    regs.b = data[3];
    regs.l = data[4];
    regs.h = data[5];
    // PC at offsets 6-7 is handled by the caller (v1 reads it here, v2/v3
    // takes it from the extended header instead).
    regs.sp = u16::from(data[8]) | (u16::from(data[9]) << 8);
    regs.i = data[10];

    // R register: low 7 bits from offset 11, bit 7 from flags byte 1 bit 0.
    // Recorded upstream quirk: a flags byte of 0xFF is treated as 0x01.
    let flags1 = if data[12] == 255 { 1 } else { data[12] };
    regs.r = (data[11] & 0x7F) | ((flags1 & 0x01) << 7);

    regs.e = data[13];
    regs.d = data[14];
    regs.c_alt = data[15];
    regs.b_alt = data[16];
    regs.e_alt = data[17];
    regs.d_alt = data[18];
    regs.l_alt = data[19];
    regs.h_alt = data[20];
    regs.a_alt = data[21];
    regs.f_alt = data[22];
    regs.iy = u16::from(data[23]) | (u16::from(data[24]) << 8);
    regs.ix = u16::from(data[25]) | (u16::from(data[26]) << 8);

    regs.iff1 = data[27] != 0;
    regs.iff2 = data[28] != 0;

    let flags2 = data[29];
    regs.im = flags2 & 0x03;

    (regs, flags1)
}

fn parse_v1(data: &[u8]) -> Result<Z80Snapshot, String> {
    let (mut regs, flags1) = parse_base_header(data);

    regs.pc = u16::from(data[6]) | (u16::from(data[7]) << 8);

    let border = (flags1 >> 1) & 0x07;
    let compressed = flags1 & 0x20 != 0;
    let mem_data = &data[V1_HEADER_SIZE..];

    let mut ram = vec![0u8; 3 * PAGE_SIZE];
    if compressed {
        decompress_z80(mem_data, &mut ram)?;
    } else {
        let len = mem_data.len().min(ram.len());
        ram[..len].copy_from_slice(&mem_data[..len]);
    }

    let mut pages: [Vec<u8>; 8] = Default::default();
    pages[5] = ram[0..PAGE_SIZE].to_vec();
    pages[2] = ram[PAGE_SIZE..2 * PAGE_SIZE].to_vec();
    pages[0] = ram[2 * PAGE_SIZE..3 * PAGE_SIZE].to_vec();

    Ok(Z80Snapshot {
        registers: regs,
        border,
        pages,
        port_7ffd: None,
    })
}

fn parse_v2v3(data: &[u8]) -> Result<Z80Snapshot, String> {
    let (mut regs, flags1) = parse_base_header(data);

    if data.len() < 32 {
        return Err("Z80 v2/v3 file too short for extended header".to_string());
    }

    let ext_len = u16::from(data[30]) | (u16::from(data[31]) << 8);
    let ext_header_start = 32;
    let ext_header_end = ext_header_start + ext_len as usize;

    if data.len() < ext_header_end {
        return Err(format!(
            "Z80 file too short: extended header needs {ext_header_end} bytes"
        ));
    }

    regs.pc = u16::from(data[32]) | (u16::from(data[33]) << 8);

    let hw_mode = data[34];
    let port_7ffd = data[35];
    let border = (flags1 >> 1) & 0x07;
    let is_128k = is_128k_hardware(hw_mode, ext_len);

    let mut pages: [Vec<u8>; 8] = Default::default();

    let mut pos = ext_header_end;
    while pos + 3 <= data.len() {
        let block_len = u16::from(data[pos]) | (u16::from(data[pos + 1]) << 8);
        let page = data[pos + 2];
        pos += 3;

        let (block_data, compressed) = if block_len == 0xFFFF {
            if pos + PAGE_SIZE > data.len() {
                return Err(format!("Z80 uncompressed block at page {page} truncated"));
            }
            (&data[pos..pos + PAGE_SIZE], false)
        } else {
            let bl = block_len as usize;
            if pos + bl > data.len() {
                return Err(format!("Z80 compressed block at page {page} truncated"));
            }
            (&data[pos..pos + bl], true)
        };

        let mut page_ram = vec![0u8; PAGE_SIZE];
        if compressed {
            decompress_z80(block_data, &mut page_ram)?;
        } else {
            let len = block_data.len().min(PAGE_SIZE);
            page_ram[..len].copy_from_slice(&block_data[..len]);
        }

        let bank = if is_128k {
            z80_128k_page_to_bank(page)
        } else {
            z80_48k_page_to_bank(page)
        };
        if let Some(bank) = bank {
            pages[bank] = page_ram;
        }

        pos += if block_len == 0xFFFF {
            PAGE_SIZE
        } else {
            block_len as usize
        };
    }

    Ok(Z80Snapshot {
        registers: regs,
        border,
        pages,
        port_7ffd: is_128k.then_some(port_7ffd),
    })
}

/// Whether the hardware-mode byte indicates a 128K machine. The same byte
/// value means different things in v2 vs v3 extended headers.
fn is_128k_hardware(hw_mode: u8, ext_len: u16) -> bool {
    if ext_len == 23 {
        matches!(hw_mode, 3 | 4)
    } else {
        matches!(hw_mode, 4 | 5 | 6 | 7 | 12 | 13)
    }
}

/// Page mapping for 48K snapshots: 4 -> bank 2 ($8000), 5 -> bank 0
/// ($C000), 8 -> bank 5 ($4000). Other page numbers are ROM and ignored.
fn z80_48k_page_to_bank(page: u8) -> Option<usize> {
    match page {
        4 => Some(2),
        5 => Some(0),
        8 => Some(5),
        _ => None,
    }
}

/// Page mapping for 128K snapshots: page N maps directly to bank N-3.
fn z80_128k_page_to_bank(page: u8) -> Option<usize> {
    match page {
        3..=10 => Some((page - 3) as usize),
        _ => None,
    }
}

/// Decompress Z80-format RLE data. Escape sequence `ED ED xx yy` repeats
/// byte `yy` `xx` times; anything else is copied literally.
fn decompress_z80(src: &[u8], dst: &mut [u8]) -> Result<(), String> {
    let mut si = 0;
    let mut di = 0;

    while si < src.len() && di < dst.len() {
        if si + 3 < src.len() && src[si] == 0xED && src[si + 1] == 0xED {
            let count = src[si + 2] as usize;
            let value = src[si + 3];
            for _ in 0..count {
                if di < dst.len() {
                    dst[di] = value;
                    di += 1;
                }
            }
            si += 4;
        } else {
            dst[di] = src[si];
            di += 1;
            si += 1;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_v1_uncompressed(pc: u16) -> Vec<u8> {
        let mut data = vec![0u8; V1_HEADER_SIZE + 3 * PAGE_SIZE];

        data[0] = 0xAA; // A
        data[1] = 0xFF; // F
        data[2] = 0x34; // C
        data[3] = 0x12; // B
        data[4] = 0x78; // L
        data[5] = 0x56; // H
        data[6] = pc as u8;
        data[7] = (pc >> 8) as u8;
        data[8] = 0x00; // SP low
        data[9] = 0x80; // SP high
        data[10] = 0x3F; // I
        data[11] = 0x42; // R
        data[12] = 0x04; // border=2, R bit7=0, uncompressed

        data[27] = 1;
        data[28] = 1;
        data[29] = 1; // IM=1

        data[V1_HEADER_SIZE] = 0x55; // page 8 ($4000) first byte
        data[V1_HEADER_SIZE + PAGE_SIZE] = 0x88; // page 4 ($8000) first byte
        data[V1_HEADER_SIZE + 2 * PAGE_SIZE] = 0xCC; // page 5 ($C000) first byte

        data
    }

    #[test]
    fn v1_uncompressed_sets_registers() {
        let z80_data = make_v1_uncompressed(0xABCD);
        let snap = parse(&z80_data).expect("v1 should parse");

        assert_eq!(snap.registers.a, 0xAA);
        assert_eq!(snap.registers.f, 0xFF);
        assert_eq!(snap.registers.b, 0x12);
        assert_eq!(snap.registers.c, 0x34);
        assert_eq!(snap.registers.pc, 0xABCD);
        assert_eq!(snap.registers.sp, 0x8000);
        assert_eq!(snap.registers.i, 0x3F);
        assert_eq!(snap.registers.im, 1);
        assert!(snap.registers.iff1);
        assert_eq!(snap.border, 2);
    }

    #[test]
    fn v1_uncompressed_loads_memory() {
        let z80_data = make_v1_uncompressed(0x0100);
        let snap = parse(&z80_data).expect("v1 should parse");

        assert_eq!(snap.pages[5][0], 0x55);
        assert_eq!(snap.pages[2][0], 0x88);
        assert_eq!(snap.pages[0][0], 0xCC);
    }

    #[test]
    fn v1_compressed_decompresses() {
        let mut header = vec![0u8; V1_HEADER_SIZE];
        header[6] = 0x00;
        header[7] = 0x01; // PC=0x0100 (non-zero -> v1)
        header[8] = 0x00;
        header[9] = 0x80;
        header[12] = 0x26; // compressed, border=3

        let mut body: Vec<u8> = Vec::new();
        body.extend_from_slice(&[0xED, 0xED, 10, 0xAA]);
        body.push(0x55);
        body.push(0x66);

        let mut data = header;
        data.extend_from_slice(&body);

        let snap = parse(&data).expect("v1 compressed should parse");
        assert_eq!(&snap.pages[5][0..10], &[0xAA; 10]);
        assert_eq!(snap.pages[5][10], 0x55);
        assert_eq!(snap.pages[5][11], 0x66);
        assert_eq!(snap.border, 3);
    }

    fn make_v2_128k(pc: u16, port_7ffd: u8) -> Vec<u8> {
        let mut data = Vec::new();

        let mut header = vec![0u8; 30];
        header[0] = 0xBB;
        header[1] = 0xCC;
        header[6] = 0;
        header[7] = 0;
        header[8] = 0x00;
        header[9] = 0x80;
        header[10] = 0x3F;
        header[12] = 0x04;
        header[27] = 1;
        header[28] = 1;
        header[29] = 1;
        data.extend_from_slice(&header);

        data.push(23);
        data.push(0);

        let mut ext = vec![0u8; 23];
        ext[0] = pc as u8;
        ext[1] = (pc >> 8) as u8;
        ext[2] = 3; // hardware mode: 128K (v2 value)
        ext[3] = port_7ffd;
        data.extend_from_slice(&ext);

        let mut page8 = vec![0u8; PAGE_SIZE];
        page8[0] = 0x55;
        data.push((page8.len() & 0xFF) as u8);
        data.push(((page8.len() >> 8) & 0xFF) as u8);
        data.push(8); // page 8 -> bank 5, $4000
        data.extend_from_slice(&page8);

        let mut page5 = vec![0u8; PAGE_SIZE];
        page5[0] = 0x22;
        data.push((page5.len() & 0xFF) as u8);
        data.push(((page5.len() >> 8) & 0xFF) as u8);
        data.push(5); // page 5 -> bank 2, $8000
        data.extend_from_slice(&page5);

        data
    }

    #[test]
    fn v2_128k_sets_pc_from_ext_header() {
        let z80_data = make_v2_128k(0xABCD, 0x00);
        let snap = parse(&z80_data).expect("v2 128K should parse");
        assert_eq!(snap.registers.pc, 0xABCD);
        assert_eq!(snap.registers.a, 0xBB);
        assert_eq!(snap.port_7ffd, Some(0x00));
    }

    #[test]
    fn v2_128k_loads_banks_by_page_number() {
        let z80_data = make_v2_128k(0x0000, 0x00);
        let snap = parse(&z80_data).expect("v2 128K should parse");
        assert_eq!(snap.pages[5][0], 0x55);
        assert_eq!(snap.pages[2][0], 0x22);
    }

    #[test]
    fn truncated_data_errors() {
        let result = parse(&[0u8; 10]);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("too short"));
    }

    #[test]
    fn decompress_z80_rle() {
        let src = [0xED, 0xED, 5, 0xAA, 0x11, 0x22];
        let mut dst = [0u8; 8];
        decompress_z80(&src, &mut dst).unwrap();
        assert_eq!(&dst[..7], &[0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0x11, 0x22]);
    }

    #[test]
    fn decompress_z80_literal_ed() {
        let src = [0xED, 0x55, 0x66];
        let mut dst = [0u8; 3];
        decompress_z80(&src, &mut dst).unwrap();
        assert_eq!(dst, [0xED, 0x55, 0x66]);
    }
}
