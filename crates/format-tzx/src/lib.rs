//! TZX file format parser and playback-order interpreter.
//!
//! TZX encodes tape signals as T-state-accurate pulse sequences. Unlike TAP
//! (which relies on a ROM trap for instant loading), TZX drives the EAR bit
//! in real time — supporting turbo loaders, custom protection, and any
//! non-ROM loading routine. A handful of block types (jump, loop, call,
//! select) are control-flow directives rather than signal data: [`flatten`]
//! walks them at parse time and produces a single linear [`PulseStore`].
//!
//! # Format
//!
//! A TZX file starts with a 10-byte header (`"ZXTape!" + 0x1A + major + minor`)
//! followed by a sequence of blocks. Each block starts with an ID byte that
//! determines its structure.
//!
//! Reference: <https://worldofspectrum.net/TZXformat.html>

#![allow(clippy::cast_possible_truncation)]

use format_spectrum_tap::{encode_bits, make_block, PulseStore};

/// A parsed TZX file.
#[derive(Debug, Clone)]
pub struct TzxFile {
    pub major: u8,
    pub minor: u8,
    pub blocks: Vec<TzxBlock>,
}

/// A single TZX block.
#[derive(Debug, Clone)]
pub enum TzxBlock {
    /// Block $10: Standard speed data (ROM timing).
    StandardSpeed { pause_ms: u16, data: Vec<u8> },
    /// Block $11: Turbo speed data (custom timing).
    TurboSpeed {
        pilot_pulse: u16,
        sync1: u16,
        sync2: u16,
        zero_pulse: u16,
        one_pulse: u16,
        pilot_count: u16,
        used_bits: u8,
        pause_ms: u16,
        data: Vec<u8>,
    },
    /// Block $12: Pure tone (repeated single pulse).
    PureTone { pulse_len: u16, count: u16 },
    /// Block $13: Pulse sequence (arbitrary pulse lengths).
    PulseSequence { pulses: Vec<u16> },
    /// Block $14: Pure data (no pilot or sync, just data bits).
    PureData {
        zero_pulse: u16,
        one_pulse: u16,
        used_bits: u8,
        pause_ms: u16,
        data: Vec<u8>,
    },
    /// Block $15: Direct recording — raw sampled polarity bits.
    DirectRecording {
        t_per_sample: u16,
        pause_ms: u16,
        used_bits: u8,
        samples: Vec<u8>,
    },
    /// Block $20: Pause / stop the tape.
    Pause { duration_ms: u16 },
    /// Block $21: Group start.
    GroupStart { name: String },
    /// Block $22: Group end.
    GroupEnd,
    /// Block $23: Relative jump (signed, in blocks).
    Jump { offset: i16 },
    /// Block $24: Loop start.
    LoopStart { repetitions: u16 },
    /// Block $25: Loop end.
    LoopEnd,
    /// Block $26: Call sequence (one or more relative targets).
    CallSequence { targets: Vec<i16> },
    /// Block $27: Return from sequence.
    Return,
    /// Block $28: Select block (metadata; the offered choices).
    SelectBlock { options: Vec<(i16, String)> },
    /// Block $2A: Stop the tape if in 48K mode.
    StopIf48K,
    /// Block $2B: Set signal level.
    SetSignalLevel { level: bool },
    /// Block $30: Text description.
    TextDescription { text: String },
    /// Block $32: Archive info.
    ArchiveInfo { entries: Vec<(u8, String)> },
    /// Block $40: Embedded snapshot. Playback encountering this mid-stream
    /// is not a signal-level event; `flatten` rejects it.
    EmbeddedSnapshot { data: Vec<u8> },
    /// Unknown or unsupported block (skipped gracefully).
    Unknown { block_id: u8 },
}

/// TZX header magic: "ZXTape!" + 0x1A.
const MAGIC: &[u8; 8] = b"ZXTape!\x1A";

impl TzxFile {
    /// Parse a TZX file from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is invalid or a block is malformed.
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        if data.len() < 10 {
            return Err("TZX file too short for header (need 10 bytes)".to_string());
        }

        if &data[0..8] != MAGIC {
            return Err("Invalid TZX magic (expected \"ZXTape!\" + 0x1A)".to_string());
        }

        let major = data[8];
        let minor = data[9];
        let mut blocks = Vec::new();
        let mut pos = 10;

        while pos < data.len() {
            let block_id = data[pos];
            pos += 1;

            let block = match block_id {
                0x10 => parse_standard_speed(data, &mut pos)?,
                0x11 => parse_turbo_speed(data, &mut pos)?,
                0x12 => parse_pure_tone(data, &mut pos)?,
                0x13 => parse_pulse_sequence(data, &mut pos)?,
                0x14 => parse_pure_data(data, &mut pos)?,
                0x15 => parse_direct_recording(data, &mut pos)?,
                0x20 => parse_pause(data, &mut pos)?,
                0x21 => parse_group_start(data, &mut pos)?,
                0x22 => TzxBlock::GroupEnd,
                0x23 => parse_jump(data, &mut pos)?,
                0x24 => parse_loop_start(data, &mut pos)?,
                0x25 => TzxBlock::LoopEnd,
                0x26 => parse_call_sequence(data, &mut pos)?,
                0x27 => TzxBlock::Return,
                0x28 => parse_select_block(data, &mut pos)?,
                0x2A => parse_stop_if_48k(data, &mut pos)?,
                0x2B => parse_set_signal_level(data, &mut pos)?,
                0x30 => parse_text_description(data, &mut pos)?,
                0x32 => parse_archive_info(data, &mut pos)?,
                0x40 => parse_embedded_snapshot(data, &mut pos)?,
                _ => skip_unknown_block(block_id, data, &mut pos)?,
            };

            blocks.push(block);
        }

        Ok(Self {
            major,
            minor,
            blocks,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn need(data: &[u8], pos: usize, n: usize, ctx: &str) -> Result<(), String> {
    if pos + n > data.len() {
        Err(format!(
            "Truncated TZX {ctx} at offset {pos}: need {n} bytes, {} remain",
            data.len() - pos
        ))
    } else {
        Ok(())
    }
}

fn read_u16_le(data: &[u8], pos: usize) -> u16 {
    u16::from(data[pos]) | (u16::from(data[pos + 1]) << 8)
}

fn read_i16_le(data: &[u8], pos: usize) -> i16 {
    read_u16_le(data, pos) as i16
}

fn read_u24_le(data: &[u8], pos: usize) -> u32 {
    u32::from(data[pos]) | (u32::from(data[pos + 1]) << 8) | (u32::from(data[pos + 2]) << 16)
}

fn read_u32_le(data: &[u8], pos: usize) -> u32 {
    u32::from(data[pos])
        | (u32::from(data[pos + 1]) << 8)
        | (u32::from(data[pos + 2]) << 16)
        | (u32::from(data[pos + 3]) << 24)
}

// ---------------------------------------------------------------------------
// Block parsers
// ---------------------------------------------------------------------------

/// Block $10: Standard speed data block.
fn parse_standard_speed(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 4, "Standard Speed header")?;
    let pause_ms = read_u16_le(data, *pos);
    let data_len = read_u16_le(data, *pos + 2) as usize;
    *pos += 4;

    need(data, *pos, data_len, "Standard Speed data")?;
    let block_data = data[*pos..*pos + data_len].to_vec();
    *pos += data_len;

    Ok(TzxBlock::StandardSpeed {
        pause_ms,
        data: block_data,
    })
}

/// Block $11: Turbo speed data block.
fn parse_turbo_speed(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 18, "Turbo Speed header")?;
    let pilot_pulse = read_u16_le(data, *pos);
    let sync1 = read_u16_le(data, *pos + 2);
    let sync2 = read_u16_le(data, *pos + 4);
    let zero_pulse = read_u16_le(data, *pos + 6);
    let one_pulse = read_u16_le(data, *pos + 8);
    let pilot_count = read_u16_le(data, *pos + 10);
    let used_bits = data[*pos + 12];
    let pause_ms = read_u16_le(data, *pos + 13);
    let data_len = read_u24_le(data, *pos + 15) as usize;
    *pos += 18;

    need(data, *pos, data_len, "Turbo Speed data")?;
    let block_data = data[*pos..*pos + data_len].to_vec();
    *pos += data_len;

    Ok(TzxBlock::TurboSpeed {
        pilot_pulse,
        sync1,
        sync2,
        zero_pulse,
        one_pulse,
        pilot_count,
        used_bits,
        pause_ms,
        data: block_data,
    })
}

/// Block $12: Pure tone.
fn parse_pure_tone(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 4, "Pure Tone")?;
    let pulse_len = read_u16_le(data, *pos);
    let count = read_u16_le(data, *pos + 2);
    *pos += 4;
    Ok(TzxBlock::PureTone { pulse_len, count })
}

/// Block $13: Pulse sequence.
fn parse_pulse_sequence(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 1, "Pulse Sequence count")?;
    let count = data[*pos] as usize;
    *pos += 1;

    need(data, *pos, count * 2, "Pulse Sequence data")?;
    let mut pulses = Vec::with_capacity(count);
    for i in 0..count {
        pulses.push(read_u16_le(data, *pos + i * 2));
    }
    *pos += count * 2;

    Ok(TzxBlock::PulseSequence { pulses })
}

/// Block $14: Pure data block.
fn parse_pure_data(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 10, "Pure Data header")?;
    let zero_pulse = read_u16_le(data, *pos);
    let one_pulse = read_u16_le(data, *pos + 2);
    let used_bits = data[*pos + 4];
    let pause_ms = read_u16_le(data, *pos + 5);
    let data_len = read_u24_le(data, *pos + 7) as usize;
    *pos += 10;

    need(data, *pos, data_len, "Pure Data data")?;
    let block_data = data[*pos..*pos + data_len].to_vec();
    *pos += data_len;

    Ok(TzxBlock::PureData {
        zero_pulse,
        one_pulse,
        used_bits,
        pause_ms,
        data: block_data,
    })
}

/// Block $15: Direct recording. Header is sample period (u16) + pause_ms
/// (u16) + used bits in last byte (u8) + 3-byte sample data length.
fn parse_direct_recording(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 8, "Direct Recording header")?;
    let t_per_sample = read_u16_le(data, *pos);
    let pause_ms = read_u16_le(data, *pos + 2);
    let used_bits = data[*pos + 4];
    let data_len = read_u24_le(data, *pos + 5) as usize;
    *pos += 8;

    need(data, *pos, data_len, "Direct Recording samples")?;
    let samples = data[*pos..*pos + data_len].to_vec();
    *pos += data_len;

    Ok(TzxBlock::DirectRecording {
        t_per_sample,
        pause_ms,
        used_bits,
        samples,
    })
}

/// Block $20: Pause / stop the tape.
fn parse_pause(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 2, "Pause")?;
    let duration_ms = read_u16_le(data, *pos);
    *pos += 2;
    Ok(TzxBlock::Pause { duration_ms })
}

/// Block $21: Group start.
fn parse_group_start(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 1, "Group Start length")?;
    let len = data[*pos] as usize;
    *pos += 1;

    need(data, *pos, len, "Group Start name")?;
    let name = String::from_utf8_lossy(&data[*pos..*pos + len]).to_string();
    *pos += len;

    Ok(TzxBlock::GroupStart { name })
}

/// Block $23: Relative jump — a signed 16-bit block delta.
fn parse_jump(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 2, "Jump")?;
    let offset = read_i16_le(data, *pos);
    *pos += 2;
    Ok(TzxBlock::Jump { offset })
}

/// Block $24: Loop start.
fn parse_loop_start(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 2, "Loop Start")?;
    let repetitions = read_u16_le(data, *pos);
    *pos += 2;
    Ok(TzxBlock::LoopStart { repetitions })
}

/// Block $26: Call sequence — a count followed by that many relative
/// block-delta targets.
fn parse_call_sequence(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 2, "Call Sequence count")?;
    let count = read_u16_le(data, *pos) as usize;
    *pos += 2;

    need(data, *pos, count * 2, "Call Sequence targets")?;
    let mut targets = Vec::with_capacity(count);
    for i in 0..count {
        targets.push(read_i16_le(data, *pos + i * 2));
    }
    *pos += count * 2;

    Ok(TzxBlock::CallSequence { targets })
}

/// Block $28: Select block — a menu of named jump targets, offered to
/// the user but otherwise inert to playback.
fn parse_select_block(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 2, "Select Block length")?;
    let block_len = read_u16_le(data, *pos) as usize;
    *pos += 2;
    let block_end = *pos + block_len;
    need(data, *pos, block_len, "Select Block body")?;

    let num_selections = data[*pos] as usize;
    *pos += 1;

    let mut options = Vec::with_capacity(num_selections);
    for _ in 0..num_selections {
        if *pos + 3 > block_end {
            break;
        }
        let offset = read_i16_le(data, *pos);
        let text_len = data[*pos + 2] as usize;
        *pos += 3;
        let text_end = (*pos + text_len).min(block_end);
        let text = String::from_utf8_lossy(&data[*pos..text_end]).to_string();
        *pos = text_end;
        options.push((offset, text));
    }

    *pos = block_end;
    Ok(TzxBlock::SelectBlock { options })
}

/// Block $2A: Stop the tape if in 48K mode.
fn parse_stop_if_48k(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 4, "Stop If 48K")?;
    // 4-byte block length (always 0 for this block type)
    *pos += 4;
    Ok(TzxBlock::StopIf48K)
}

/// Block $2B: Set signal level.
fn parse_set_signal_level(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 5, "Set Signal Level")?;
    // 4-byte block length (always 1) + 1-byte level
    let level = data[*pos + 4] != 0;
    *pos += 5;
    Ok(TzxBlock::SetSignalLevel { level })
}

/// Block $30: Text description.
fn parse_text_description(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 1, "Text Description length")?;
    let len = data[*pos] as usize;
    *pos += 1;

    need(data, *pos, len, "Text Description text")?;
    let text = String::from_utf8_lossy(&data[*pos..*pos + len]).to_string();
    *pos += len;

    Ok(TzxBlock::TextDescription { text })
}

/// Block $32: Archive info.
fn parse_archive_info(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 2, "Archive Info header")?;
    let block_len = read_u16_le(data, *pos) as usize;
    *pos += 2;

    need(data, *pos, block_len, "Archive Info data")?;
    let block_end = *pos + block_len;

    if block_len < 1 {
        return Err("Archive Info block too short".to_string());
    }

    let num_entries = data[*pos] as usize;
    *pos += 1;

    let mut entries = Vec::with_capacity(num_entries);
    for _ in 0..num_entries {
        if *pos + 2 > block_end {
            break;
        }
        let entry_id = data[*pos];
        let entry_len = data[*pos + 1] as usize;
        *pos += 2;

        let text_end = (*pos + entry_len).min(block_end);
        let text = String::from_utf8_lossy(&data[*pos..text_end]).to_string();
        *pos = text_end;

        entries.push((entry_id, text));
    }

    // Skip any remaining bytes in the block
    *pos = block_end;

    Ok(TzxBlock::ArchiveInfo { entries })
}

/// Block $40: Embedded snapshot — a 3-byte length prefix followed by
/// snapshot data in a loader-defined format. Parsed but never played.
fn parse_embedded_snapshot(data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    need(data, *pos, 3, "Embedded Snapshot length")?;
    let len = read_u24_le(data, *pos) as usize;
    *pos += 3;

    need(data, *pos, len, "Embedded Snapshot data")?;
    let snapshot_data = data[*pos..*pos + len].to_vec();
    *pos += len;

    Ok(TzxBlock::EmbeddedSnapshot {
        data: snapshot_data,
    })
}

/// Skip an unknown block using known length schemes, or a 4-byte length prefix.
fn skip_unknown_block(block_id: u8, data: &[u8], pos: &mut usize) -> Result<TzxBlock, String> {
    // Blocks with known length layout
    let skip_len = match block_id {
        // $18: CSW recording — 4-byte block length
        // $19: Generalized data — 4-byte block length
        0x18 | 0x19 => {
            need(data, *pos, 4, "block length")?;
            read_u32_le(data, *pos) as usize + 4
        }
        // $31: Message block — 1-byte display time + 1-byte text length + text
        0x31 => {
            need(data, *pos, 2, "Message block header")?;
            2 + data[*pos + 1] as usize
        }
        // $33: Hardware type — 1-byte count * 3 + 1
        0x33 => {
            need(data, *pos, 1, "Hardware Type count")?;
            let count = data[*pos] as usize;
            1 + count * 3
        }
        // $34: Emulation info — fixed 8 bytes
        0x34 => 8,
        // $35: Custom info — 16-byte ID + 4-byte length
        0x35 => {
            need(data, *pos, 20, "Custom Info header")?;
            let len = read_u32_le(data, *pos + 16) as usize;
            20 + len
        }
        // $5A: "Glue" block (merge point) — 9 bytes
        0x5A => 9,
        // For truly unknown blocks, try 4-byte length prefix as a last resort
        _ => {
            if *pos + 4 <= data.len() {
                let len = read_u32_le(data, *pos) as usize;
                4 + len
            } else {
                return Err(format!(
                    "Unknown TZX block ${block_id:02X} at offset {} with no way to determine length",
                    *pos - 1
                ));
            }
        }
    };

    need(data, *pos, skip_len, &format!("Unknown block ${block_id:02X}"))?;
    *pos += skip_len;

    Ok(TzxBlock::Unknown { block_id })
}

// ---------------------------------------------------------------------------
// Playback-order interpreter
// ---------------------------------------------------------------------------

struct CallFrame {
    pending_targets: Vec<i64>,
    return_pc: i64,
}

/// Walk a parsed TZX file's control-flow blocks (jump/loop/call/return) and
/// produce a single linear [`PulseStore`] in the order the tape would
/// actually play. Select blocks are metadata and are skipped without
/// affecting control flow — picking a selection is a host/UI concern, not
/// something this interpreter decides on its own.
///
/// # Errors
///
/// Fails if a block 0x40 (embedded snapshot) is reached during playback, or
/// if control flow does not terminate within a generous step budget.
pub fn flatten(tzx: &TzxFile) -> Result<PulseStore, String> {
    let mut store = PulseStore::new();
    let blocks = &tzx.blocks;
    let mut pc: i64 = 0;
    let mut loop_stack: Vec<(i64, u16)> = Vec::new();
    let mut call_stack: Vec<CallFrame> = Vec::new();

    let max_steps = blocks.len().saturating_mul(1000).max(10_000);
    let mut steps = 0usize;

    while (pc as usize) < blocks.len() {
        steps += 1;
        if steps > max_steps {
            return Err("TZX control flow did not terminate (possible infinite loop)".to_string());
        }

        let idx = pc as usize;
        match &blocks[idx] {
            TzxBlock::Jump { offset } => {
                pc += i64::from(*offset);
                continue;
            }
            TzxBlock::LoopStart { repetitions } => {
                loop_stack.push((pc, *repetitions));
                pc += 1;
                continue;
            }
            TzxBlock::LoopEnd => {
                if let Some((start, remaining)) = loop_stack.last_mut() {
                    if *remaining > 1 {
                        *remaining -= 1;
                        pc = *start + 1;
                        continue;
                    }
                    loop_stack.pop();
                }
                pc += 1;
                continue;
            }
            TzxBlock::CallSequence { targets } => {
                let mut pending: Vec<i64> = targets
                    .iter()
                    .rev()
                    .map(|&t| idx as i64 + i64::from(t))
                    .collect();
                let Some(first) = pending.pop() else {
                    pc += 1;
                    continue;
                };
                call_stack.push(CallFrame {
                    pending_targets: pending,
                    return_pc: idx as i64 + 1,
                });
                pc = first;
                continue;
            }
            TzxBlock::Return => {
                if let Some(frame) = call_stack.last_mut() {
                    if let Some(next) = frame.pending_targets.pop() {
                        pc = next;
                    } else {
                        pc = frame.return_pc;
                        call_stack.pop();
                    }
                } else {
                    pc += 1;
                }
                continue;
            }
            TzxBlock::SelectBlock { .. } | TzxBlock::GroupStart { .. } | TzxBlock::GroupEnd => {
                pc += 1;
                continue;
            }
            TzxBlock::StandardSpeed { pause_ms, data } => {
                encode_standard_or_turbo(&mut store, data, *pause_ms);
            }
            TzxBlock::TurboSpeed {
                pilot_pulse,
                sync1,
                sync2,
                zero_pulse,
                one_pulse,
                pilot_count,
                used_bits,
                pause_ms,
                data,
            } => {
                store.begin_block("turbo speed block");
                for _ in 0..*pilot_count {
                    store.push_pulse(u32::from(*pilot_pulse));
                }
                store.push_pulse(u32::from(*sync1));
                store.push_pulse(u32::from(*sync2));
                encode_bits(
                    &mut store,
                    data,
                    u32::from(*zero_pulse),
                    u32::from(*one_pulse),
                    *used_bits,
                );
                store.push_pause_ms(u32::from(*pause_ms));
                store.end_block();
            }
            TzxBlock::PureTone { pulse_len, count } => {
                store.begin_block("pure tone");
                for _ in 0..*count {
                    store.push_pulse(u32::from(*pulse_len));
                }
                store.end_block();
            }
            TzxBlock::PulseSequence { pulses } => {
                store.begin_block("pulse sequence");
                for &p in pulses {
                    store.push_pulse(u32::from(p));
                }
                store.end_block();
            }
            TzxBlock::PureData {
                zero_pulse,
                one_pulse,
                used_bits,
                pause_ms,
                data,
            } => {
                store.begin_block("pure data");
                encode_bits(
                    &mut store,
                    data,
                    u32::from(*zero_pulse),
                    u32::from(*one_pulse),
                    *used_bits,
                );
                store.push_pause_ms(u32::from(*pause_ms));
                store.end_block();
            }
            TzxBlock::DirectRecording {
                t_per_sample,
                pause_ms,
                used_bits,
                samples,
            } => {
                encode_direct_recording(&mut store, samples, u32::from(*t_per_sample), *used_bits);
                store.push_pause_ms(u32::from(*pause_ms));
            }
            TzxBlock::Pause { duration_ms } => {
                store.begin_block("pause");
                store.push_pause_ms(u32::from(*duration_ms));
                store.end_block();
            }
            TzxBlock::StopIf48K | TzxBlock::SetSignalLevel { .. } => {}
            TzxBlock::TextDescription { .. } | TzxBlock::ArchiveInfo { .. } => {}
            TzxBlock::EmbeddedSnapshot { .. } => {
                return Err(
                    "embedded snapshot block (0x40) reached during tape playback".to_string(),
                );
            }
            TzxBlock::Unknown { .. } => {}
        }

        pc += 1;
    }

    Ok(store)
}

fn encode_standard_or_turbo(store: &mut PulseStore, data: &[u8], pause_ms: u16) {
    if data.is_empty() {
        return;
    }
    let flag = data[0];
    make_block(store, flag, &data[1..]);
    if pause_ms != 1000 {
        // `make_block` always appends the canonical 1s ROM gap; TZX lets a
        // standard-speed block declare its own pause, so top up or leave as
        // is rather than re-deriving make_block from scratch.
        store.push_pause_ms(u32::from(pause_ms).saturating_sub(1000));
    }
}

fn encode_direct_recording(store: &mut PulseStore, samples: &[u8], t_per_sample: u32, used_bits: u8) {
    store.begin_block("direct recording");
    let total_bits = samples.len().saturating_mul(8);
    let used = if used_bits == 0 { 8 } else { used_bits.min(8) } as usize;
    let last_byte_bits = if samples.is_empty() { 0 } else { used };
    let valid_bits = total_bits.saturating_sub(8 - last_byte_bits);

    let mut run = 0u32;
    let mut current_level: Option<u8> = None;
    for bit_index in 0..valid_bits {
        let byte = samples[bit_index / 8];
        let bit = (byte >> (7 - (bit_index % 8))) & 1;
        match current_level {
            None => {
                current_level = Some(bit);
                run = 1;
            }
            Some(level) if level == bit => run += 1,
            Some(_) => {
                store.push_pulse(run * t_per_sample);
                current_level = Some(bit);
                run = 1;
            }
        }
    }
    if run > 0 {
        store.push_pulse(run * t_per_sample);
    }
    store.end_block();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a minimal TZX file from a header + raw block bytes.
    fn tzx_header() -> Vec<u8> {
        let mut h = MAGIC.to_vec();
        h.push(1); // major
        h.push(20); // minor
        h
    }

    #[test]
    fn parse_valid_header_empty() {
        let data = tzx_header();
        let tzx = TzxFile::parse(&data).expect("valid empty TZX");
        assert_eq!(tzx.major, 1);
        assert_eq!(tzx.minor, 20);
        assert!(tzx.blocks.is_empty());
    }

    #[test]
    fn parse_too_short() {
        assert!(TzxFile::parse(&[]).is_err());
        assert!(TzxFile::parse(&[0; 9]).is_err());
    }

    #[test]
    fn parse_bad_magic() {
        let mut data = tzx_header();
        data[0] = b'X';
        assert!(TzxFile::parse(&data).is_err());
    }

    #[test]
    fn parse_standard_speed_block() {
        let mut data = tzx_header();
        data.push(0x10); // block ID
        data.extend_from_slice(&1000u16.to_le_bytes()); // pause_ms
        let payload = [0x00, 0x01, 0x02, 0x03]; // flag + 3 bytes
        data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        data.extend_from_slice(&payload);

        let tzx = TzxFile::parse(&data).expect("standard speed block");
        assert_eq!(tzx.blocks.len(), 1);
        match &tzx.blocks[0] {
            TzxBlock::StandardSpeed {
                pause_ms,
                data: block_data,
            } => {
                assert_eq!(*pause_ms, 1000);
                assert_eq!(block_data, &[0x00, 0x01, 0x02, 0x03]);
            }
            _ => panic!("Expected StandardSpeed"),
        }
    }

    #[test]
    fn parse_jump_block() {
        let mut data = tzx_header();
        data.push(0x23);
        data.extend_from_slice(&(-1i16).to_le_bytes());
        let tzx = TzxFile::parse(&data).expect("jump block");
        match &tzx.blocks[0] {
            TzxBlock::Jump { offset } => assert_eq!(*offset, -1),
            _ => panic!("Expected Jump"),
        }
    }

    #[test]
    fn parse_call_and_return() {
        let mut data = tzx_header();
        data.push(0x26);
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&3i16.to_le_bytes());
        data.extend_from_slice(&5i16.to_le_bytes());
        data.push(0x27);

        let tzx = TzxFile::parse(&data).expect("call sequence");
        assert_eq!(tzx.blocks.len(), 2);
        match &tzx.blocks[0] {
            TzxBlock::CallSequence { targets } => assert_eq!(targets, &[3, 5]),
            _ => panic!("Expected CallSequence"),
        }
        assert!(matches!(tzx.blocks[1], TzxBlock::Return));
    }

    #[test]
    fn parse_select_block() {
        let mut data = tzx_header();
        data.push(0x28);
        // length = 1 (num) + (2+1+4) + (2+1+4) = 15
        data.extend_from_slice(&15u16.to_le_bytes());
        data.push(2);
        data.extend_from_slice(&2i16.to_le_bytes());
        data.push(4);
        data.extend_from_slice(b"Side");
        data.extend_from_slice(&9i16.to_le_bytes());
        data.push(4);
        data.extend_from_slice(b"Game");

        let tzx = TzxFile::parse(&data).expect("select block");
        match &tzx.blocks[0] {
            TzxBlock::SelectBlock { options } => {
                assert_eq!(options.len(), 2);
                assert_eq!(options[0], (2, "Side".to_string()));
                assert_eq!(options[1], (9, "Game".to_string()));
            }
            _ => panic!("Expected SelectBlock"),
        }
    }

    #[test]
    fn parse_embedded_snapshot_block() {
        let mut data = tzx_header();
        data.push(0x40);
        let payload = [1, 2, 3, 4];
        data.extend_from_slice(&[payload.len() as u8, 0, 0]);
        data.extend_from_slice(&payload);

        let tzx = TzxFile::parse(&data).expect("embedded snapshot");
        match &tzx.blocks[0] {
            TzxBlock::EmbeddedSnapshot { data } => assert_eq!(data, &payload),
            _ => panic!("Expected EmbeddedSnapshot"),
        }
    }

    #[test]
    fn unknown_block_skipped() {
        let mut data = tzx_header();
        data.push(0x5A);
        data.extend_from_slice(&[0u8; 9]);

        let tzx = TzxFile::parse(&data).expect("unknown block skipped");
        assert_eq!(tzx.blocks.len(), 1);
        match &tzx.blocks[0] {
            TzxBlock::Unknown { block_id } => assert_eq!(*block_id, 0x5A),
            _ => panic!("Expected Unknown"),
        }
    }

    #[test]
    fn truncated_block_errors() {
        let mut data = tzx_header();
        data.push(0x10); // Standard speed, but no data following
        assert!(TzxFile::parse(&data).is_err());
    }

    fn make_tap_block(flag: u8, data: &[u8]) -> Vec<u8> {
        let mut checksum = flag;
        for &b in data {
            checksum ^= b;
        }
        let mut block = vec![flag];
        block.extend_from_slice(data);
        block.push(checksum);
        block
    }

    #[test]
    fn flatten_standard_speed_block_produces_pulses() {
        let mut data = tzx_header();
        data.push(0x10);
        data.extend_from_slice(&1000u16.to_le_bytes());
        let payload = make_tap_block(0xFF, &[1, 2, 3]);
        data.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        data.extend_from_slice(&payload);

        let tzx = TzxFile::parse(&data).unwrap();
        let store = flatten(&tzx).expect("flatten should succeed");
        assert!(store.image_len() > 0);
        assert_eq!(store.blocks().len(), 1);
    }

    #[test]
    fn flatten_loop_repeats_enclosed_blocks() {
        let mut data = tzx_header();
        data.push(0x24); // loop start
        data.extend_from_slice(&3u16.to_le_bytes());
        data.push(0x12); // pure tone
        data.extend_from_slice(&1000u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.push(0x25); // loop end

        let tzx = TzxFile::parse(&data).unwrap();
        let store = flatten(&tzx).expect("loop should terminate");
        // Three iterations of a single one-pulse tone block.
        assert_eq!(store.image_len(), 3);
    }

    #[test]
    fn flatten_jump_skips_a_block() {
        let mut data = tzx_header();
        data.push(0x23); // jump past the next block
        data.extend_from_slice(&2i16.to_le_bytes());
        data.push(0x12); // pure tone (skipped)
        data.extend_from_slice(&1000u16.to_le_bytes());
        data.extend_from_slice(&5u16.to_le_bytes());
        data.push(0x20); // pause (reached)
        data.extend_from_slice(&10u16.to_le_bytes());

        let tzx = TzxFile::parse(&data).unwrap();
        let store = flatten(&tzx).expect("jump should succeed");
        assert_eq!(store.blocks().len(), 1);
        assert_eq!(store.blocks()[0].name, "pause");
    }

    #[test]
    fn flatten_rejects_embedded_snapshot() {
        let mut data = tzx_header();
        data.push(0x40);
        data.extend_from_slice(&[1, 0, 0]);
        data.push(0xAA);

        let tzx = TzxFile::parse(&data).unwrap();
        assert!(flatten(&tzx).is_err());
    }

    #[test]
    fn flatten_call_sequence_visits_targets_in_order() {
        // Realistic TZX shape: the main line jumps straight past the blocks
        // that exist only to be called, so they contribute pulses exactly
        // once (via the call), not again as the linear scan reaches them.
        let mut data = tzx_header();
        // Block 0: call sequence -> targets at block 2 and block 4.
        data.push(0x26);
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&2i16.to_le_bytes());
        data.extend_from_slice(&4i16.to_le_bytes());
        // Block 1: jump past the call-only blocks to the trailing pause.
        data.push(0x23);
        data.extend_from_slice(&5i16.to_le_bytes());
        // Block 2: pure tone "first" + return.
        data.push(0x12);
        data.extend_from_slice(&111u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.push(0x27);
        // Block 4: pure tone "second" + return.
        data.push(0x12);
        data.extend_from_slice(&222u16.to_le_bytes());
        data.extend_from_slice(&1u16.to_le_bytes());
        data.push(0x27);
        // Block 6: pause, reached only after both calls return.
        data.push(0x20);
        data.extend_from_slice(&1u16.to_le_bytes());

        let tzx = TzxFile::parse(&data).unwrap();
        let store = flatten(&tzx).expect("call sequence should resolve");
        // first tone, second tone, then the trailing pause block.
        assert_eq!(store.blocks().len(), 3);
        assert_eq!(store.blocks()[2].name, "pause");
    }
}
