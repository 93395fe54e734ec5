//! ZX Spectrum TAP tape image reader and writer, and the shared pulse
//! store that every tape format (TAP, TZX, CSW) encodes into.
//!
//! TAP is the simplest Spectrum tape format: sequential blocks of data,
//! each preceded by a 2-byte little-endian length word. Each block
//! contains a flag byte, data bytes, and a checksum byte (XOR of flag +
//! data). A typical program consists of two blocks: a header block
//! (flag $00, 17 bytes of metadata) and a data block (flag $FF).

mod pulse_store;

pub use pulse_store::{BlockMeta, PulseStore};

/// Pilot tone pulse length, in T-states at 3.5MHz.
pub const PILOT_PULSE: u32 = 2168;
/// First sync pulse length.
pub const SYNC1_PULSE: u32 = 667;
/// Second sync pulse length.
pub const SYNC2_PULSE: u32 = 735;
/// Pulse length encoding a zero data bit (half-cycle).
pub const ZERO_PULSE: u32 = 855;
/// Pulse length encoding a one data bit (half-cycle).
pub const ONE_PULSE: u32 = 1710;
/// Pilot pulse count preceding a header block (flag byte < 4).
pub const HEADER_PILOT_COUNT: u32 = 8064;
/// Pilot pulse count preceding a data block (flag byte >= 4).
pub const DATA_PILOT_COUNT: u32 = 3220;
/// Trailing silence appended after each block, in milliseconds.
pub const TRAILING_PAUSE_MS: u32 = 1000;

/// A single block from a TAP file.
#[derive(Debug, Clone)]
pub struct TapBlock {
    /// Flag byte: $00 = header, $FF = data, conventionally.
    pub flag: u8,
    /// Block data (excludes the flag and checksum bytes).
    pub data: Vec<u8>,
}

/// A parsed TAP file containing sequential blocks.
#[derive(Debug, Clone, Default)]
pub struct TapFile {
    /// The blocks in the TAP file, in order.
    pub blocks: Vec<TapBlock>,
}

impl TapFile {
    /// Parse a TAP file from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is malformed (truncated block, bad
    /// length, or checksum mismatch).
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        let mut blocks = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            if offset + 2 > data.len() {
                return Err(format!(
                    "truncated TAP file: expected 2-byte length at offset {offset}"
                ));
            }

            let block_len = u16::from(data[offset]) | (u16::from(data[offset + 1]) << 8);
            offset += 2;

            let block_len = block_len as usize;
            if block_len < 2 {
                return Err(format!(
                    "TAP block at offset {} has length {block_len}, minimum is 2",
                    offset - 2
                ));
            }

            if offset + block_len > data.len() {
                return Err(format!(
                    "truncated TAP block at offset {}: need {block_len} bytes, only {} remain",
                    offset - 2,
                    data.len() - offset
                ));
            }

            let flag = data[offset];
            let checksum = data[offset + block_len - 1];
            let block_data = &data[offset + 1..offset + block_len - 1];

            let mut expected = flag;
            for &byte in block_data {
                expected ^= byte;
            }
            if expected != checksum {
                return Err(format!(
                    "TAP block at offset {}: checksum mismatch (expected ${expected:02X}, got ${checksum:02X})",
                    offset - 2
                ));
            }

            blocks.push(TapBlock {
                flag,
                data: block_data.to_vec(),
            });

            offset += block_len;
        }

        Ok(Self { blocks })
    }

    /// Serialize back to TAP bytes (length word + flag + data + checksum
    /// per block).
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for block in &self.blocks {
            let len = (block.data.len() + 2) as u16;
            out.push(len as u8);
            out.push((len >> 8) as u8);
            out.push(block.flag);
            out.extend_from_slice(&block.data);
            let mut checksum = block.flag;
            for &b in &block.data {
                checksum ^= b;
            }
            out.push(checksum);
        }
        out
    }
}

/// Encode a single TAP-style block (flag + data + checksum) as pilot
/// tone, sync pulses, data bits, and a trailing pause, appending the
/// result to `store`. This is how a loaded TAP/TZX-standard-speed block
/// becomes playable pulses. Mirrors what the 48K ROM's SAVE routine
/// produces on tape.
pub fn make_block(store: &mut PulseStore, flag: u8, data: &[u8]) {
    let pilot_count = if flag < 4 {
        HEADER_PILOT_COUNT
    } else {
        DATA_PILOT_COUNT
    };

    let name = format!("block ${flag:02X} ({} bytes)", data.len());
    store.begin_block(&name);

    for _ in 0..pilot_count {
        store.push_pulse(PILOT_PULSE);
    }
    store.push_pulse(SYNC1_PULSE);
    store.push_pulse(SYNC2_PULSE);

    let mut checksum = flag;
    push_byte(store, flag);
    for &byte in data {
        push_byte(store, byte);
        checksum ^= byte;
    }
    push_byte(store, checksum);

    store.push_pause_ms(TRAILING_PAUSE_MS);
    store.end_block();
}

fn push_byte(store: &mut PulseStore, byte: u8) {
    for bit_pos in (0..8).rev() {
        let bit = (byte >> bit_pos) & 1;
        let pulse = if bit == 1 { ONE_PULSE } else { ZERO_PULSE };
        store.push_pulse(pulse);
        store.push_pulse(pulse);
    }
}

/// Encode arbitrary data as two-pulse-per-bit, MSB-first pulses, with the
/// final byte only contributing its top `used_bits_last` bits. TAP blocks
/// always use all 8 bits of every byte; TZX turbo-speed and pure-data
/// blocks can declare a partial final byte, so this is shared rather than
/// folded into `make_block`.
pub fn encode_bits(store: &mut PulseStore, data: &[u8], zero_pulse: u32, one_pulse: u32, used_bits_last: u8) {
    let used = if used_bits_last == 0 {
        8
    } else {
        used_bits_last.min(8)
    };
    for (i, &byte) in data.iter().enumerate() {
        let bits = if i + 1 == data.len() { used } else { 8 };
        for bit_pos in (8 - bits..8).rev() {
            let bit = (byte >> bit_pos) & 1;
            let pulse = if bit == 1 { one_pulse } else { zero_pulse };
            store.push_pulse(pulse);
            store.push_pulse(pulse);
        }
    }
}

/// Encode every block of a `TapFile` onto a fresh pulse store.
#[must_use]
pub fn tap_to_pulse_store(tap: &TapFile) -> PulseStore {
    let mut store = PulseStore::new();
    for block in &tap.blocks {
        make_block(&mut store, block.flag, &block.data);
    }
    store
}
