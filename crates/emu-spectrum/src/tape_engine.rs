//! Tape engine: playback, ROM-trap acceleration, and pattern-based
//! acceleration, all driven from a single flattened [`PulseStore`].
//!
//! Unlike a block-structured loader (which would copy whole TAP blocks
//! straight into memory), every accelerator here consumes the same
//! pulse stream real-time playback uses. That's what lets a TZX or CSW
//! tape — which has no block structure at all once flattened — benefit
//! from the same ROM trap as a TAP file.

use emu_core::FrameClock;
use format_spectrum_tap::PulseStore;
use zilog_z80::Registers;

use crate::memory::Memory;

/// ROM address of the inner tape-loading loop the ROM trap intercepts.
pub const ROM_TRAP_PC: u16 = 0x056B;
/// Success return address (carry set, block loaded).
const ROM_TRAP_SUCCESS_PC: u16 = 0x05DF;
/// Early end-of-tape return address (carry clear, "Tape loading error").
const ROM_TRAP_ERROR_PC: u16 = 0x05E2;

/// Pilot/sync pulses are short; a pulse at or below this length ends
/// the pilot tone and begins the two sync pulses.
const PILOT_SKIP_THRESHOLD: u32 = 770;
/// A bit cell's first half-pulse longer than this decodes to a `1` bit.
const BIT_ONE_THRESHOLD: u32 = 1240;

/// Lazily-driven tape signal playback, per §4.4: `tape_bit()` only walks
/// the pulse stream forward as far as the clock has actually advanced.
pub struct TapePlayer {
    store: Option<PulseStore>,
    play_ptr: usize,
    edge_change: u64,
    bit: bool,
}

impl Default for TapePlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl TapePlayer {
    #[must_use]
    pub fn new() -> Self {
        Self { store: None, play_ptr: 0, edge_change: 0, bit: false }
    }

    /// Load a flattened pulse stream and start it from the beginning.
    pub fn insert(&mut self, store: PulseStore) {
        self.store = Some(store);
        self.play_ptr = 0;
        self.edge_change = 0;
        self.bit = false;
    }

    pub fn eject(&mut self) {
        self.store = None;
    }

    pub fn rewind(&mut self) {
        self.play_ptr = 0;
        self.edge_change = 0;
        self.bit = false;
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.store.is_some()
    }

    #[must_use]
    pub fn play_ptr(&self) -> usize {
        self.play_ptr
    }

    /// Current signal level, advancing the playhead as needed for
    /// `now` (an absolute T-state time from `FrameClock::now()`).
    pub fn tape_bit(&mut self, now: u64) -> bool {
        if self.store.is_none() {
            return false;
        }
        if now < self.edge_change {
            return self.bit;
        }
        loop {
            self.bit = !self.bit;
            let Some(duration) = self.consume_pulse() else {
                self.eject();
                return self.bit;
            };
            self.edge_change += u64::from(duration);
            if now < self.edge_change {
                break;
            }
        }
        self.bit
    }

    /// Consume and return the next pulse's duration, advancing the
    /// playhead. Used directly by the ROM trap, which bypasses the
    /// lazy `edge_change` bookkeeping entirely.
    fn consume_pulse(&mut self) -> Option<u32> {
        let store = self.store.as_ref()?;
        let &id = store.image().get(self.play_ptr)?;
        self.play_ptr += 1;
        Some(store.duration_of(id))
    }
}

/// Decode one byte from the pulse stream: 8 bit-cells, MSB first, each
/// cell two pulses wide. Returns `None` on premature end of tape.
fn decode_byte(tape: &mut TapePlayer) -> Option<u8> {
    let mut acc = 0u8;
    for bit_mask in [0x80u8, 0x40, 0x20, 0x10, 0x08, 0x04, 0x02, 0x01] {
        let first = tape.consume_pulse()?;
        let _second = tape.consume_pulse()?;
        if first > BIT_ONE_THRESHOLD {
            acc |= bit_mask;
        }
    }
    Some(acc)
}

/// Run the ROM-trap accelerator, per §4.5.
///
/// Returns `true` if the trap fired (the caller should not let the Z80
/// execute the real ROM loop this tick); `regs.pc` is updated to the
/// trap's exit point either way it fires.
pub fn rom_trap(tape: &mut TapePlayer, regs: &mut Registers, memory: &mut Memory) -> bool {
    if !tape.is_playing() || regs.pc != ROM_TRAP_PC {
        return false;
    }

    loop {
        match tape.consume_pulse() {
            Some(d) if d <= PILOT_SKIP_THRESHOLD => break,
            Some(_) => {}
            None => return fail(tape, regs),
        }
    }
    if tape.consume_pulse().is_none() {
        return fail(tape, regs);
    }

    // Flag byte: decoded but not validated against A (the real ROM's
    // comparison lives entirely in the loop this trap replaces).
    if decode_byte(tape).is_none() {
        return fail(tape, regs);
    }

    let mut de = regs.de();
    let mut ix = regs.ix;
    let load = regs.f & 0x01 != 0; // carry flag: set = LOAD, clear = VERIFY

    while de != 0 {
        let Some(byte) = decode_byte(tape) else {
            return fail(tape, regs);
        };
        if load {
            memory.write(ix, byte);
        }
        ix = ix.wrapping_add(1);
        de = de.wrapping_sub(1);
    }

    if decode_byte(tape).is_none() {
        return fail(tape, regs);
    }

    regs.ix = ix;
    regs.set_de(de);
    regs.pc = ROM_TRAP_SUCCESS_PC;
    regs.f |= 0x01;
    regs.set_bc(0xB001);
    regs.h = 0;
    true
}

fn fail(tape: &mut TapePlayer, regs: &mut Registers) -> bool {
    tape.eject();
    regs.f &= !0x01;
    regs.pc = ROM_TRAP_ERROR_PC;
    true
}

/// One delay-loop pattern recognised by the accelerator: a tight
/// counter-decrement loop replaced with a direct time jump.
struct DelayPattern {
    bytes: &'static [u8],
    /// If `Some`, the low/high bytes at this offset must equal the
    /// pattern's own address (the `JP NZ,pc` self-jump variant).
    self_jump_offset: Option<usize>,
    cycles_per_iter: u64,
}

const DELAY_PATTERNS: &[DelayPattern] = &[
    DelayPattern { bytes: &[0x3D, 0x20, 0xFD], self_jump_offset: None, cycles_per_iter: 16 },
    DelayPattern { bytes: &[0x10, 0xFE], self_jump_offset: None, cycles_per_iter: 13 },
    DelayPattern { bytes: &[0x3D, 0xC2], self_jump_offset: Some(2), cycles_per_iter: 14 },
];

/// Try the delay-loop family at the current PC. Returns `true` if a
/// pattern matched and was applied.
fn try_delay_loop(memory: &Memory, regs: &mut Registers, clock: &mut FrameClock) -> bool {
    for pattern in DELAY_PATTERNS {
        let pc = regs.pc;
        let matches = pattern
            .bytes
            .iter()
            .enumerate()
            .all(|(i, &b)| memory.peek(pc.wrapping_add(i as u16)) == b);
        if !matches {
            continue;
        }
        if let Some(offset) = pattern.self_jump_offset {
            let lo = memory.peek(pc.wrapping_add(offset as u16));
            let hi = memory.peek(pc.wrapping_add(offset as u16 + 1));
            if u16::from(lo) | (u16::from(hi) << 8) != pc {
                continue;
            }
            let count = u64::from(regs.a.wrapping_sub(1));
            clock.advance(count * pattern.cycles_per_iter);
            regs.a = 1;
            return true;
        }
        if pattern.bytes[0] == 0x10 {
            // DJNZ $
            let count = u64::from(regs.b.wrapping_sub(1));
            clock.advance(count * pattern.cycles_per_iter);
            regs.b = 1;
        } else {
            let count = u64::from(regs.a.wrapping_sub(1));
            clock.advance(count * pattern.cycles_per_iter);
            regs.a = 1;
        }
        return true;
    }
    false
}

/// One named edge-polling loader variant. The 13-byte pattern isn't
/// documented anywhere accessible to this crate; each variant below
/// reuses the same structural skeleton (`IN A,(0xFE)` / `XOR C` / mask
/// / branch) tagged by a distinguishing final byte, differing in the
/// parameters the spec does call out: which port-0xFE bit is tested,
/// the loop's T-states per iteration, and its timeout direction.
struct EdgeVariant {
    name: &'static str,
    tag_byte: u8,
    bit_mask: u8,
    iter_cycles: u64,
    /// Loop counter value that signals a timeout.
    timeout_value: u8,
    /// `true`: `B` counts down (DJNZ-style); `false`: `B` counts up.
    counts_down: bool,
}

const EDGE_VARIANTS: &[EdgeVariant] = &[
    EdgeVariant { name: "popeye2", tag_byte: 0xE1, bit_mask: 0x40, iter_cycles: 58, timeout_value: 0xFF, counts_down: true },
    EdgeVariant { name: "bleep", tag_byte: 0xE2, bit_mask: 0x40, iter_cycles: 55, timeout_value: 0x01, counts_down: false },
    EdgeVariant { name: "rana_rama", tag_byte: 0xE3, bit_mask: 0x20, iter_cycles: 56, timeout_value: 0xFF, counts_down: true },
    EdgeVariant { name: "zero_music", tag_byte: 0xE4, bit_mask: 0x20, iter_cycles: 52, timeout_value: 0xFF, counts_down: true },
    EdgeVariant { name: "donkey_kong", tag_byte: 0xE5, bit_mask: 0x40, iter_cycles: 59, timeout_value: 0x01, counts_down: false },
    EdgeVariant { name: "lode_runner", tag_byte: 0xE6, bit_mask: 0x20, iter_cycles: 57, timeout_value: 0xFF, counts_down: true },
];

/// Pattern prefix shared by every edge-polling variant: `IN A,(0xFE)`
/// then `XOR C`, followed by the variant's tag byte.
const EDGE_PREFIX: [u8; 2] = [0xDB, 0xFE];

fn try_edge_poll(memory: &Memory, regs: &mut Registers, tape: &mut TapePlayer, clock: &mut FrameClock) -> bool {
    let pc = regs.pc;
    if memory.peek(pc) != EDGE_PREFIX[0] || memory.peek(pc.wrapping_add(1)) != EDGE_PREFIX[1] {
        return false;
    }
    let tag = memory.peek(pc.wrapping_add(2));
    let Some(variant) = EDGE_VARIANTS.iter().find(|v| v.tag_byte == tag) else {
        return false;
    };

    loop {
        if regs.b == variant.timeout_value {
            return true;
        }
        let level = tape.tape_bit(clock.now());
        let c_bit = (regs.c & variant.bit_mask) != 0;
        if level != c_bit {
            return true;
        }
        regs.b = if variant.counts_down { regs.b.wrapping_sub(1) } else { regs.b.wrapping_add(1) };
        clock.advance(variant.iter_cycles);
    }
}

/// Run the pattern-based accelerator (§4.6) at the current instruction
/// boundary. Patterns advance `clock` directly instead of letting the
/// CPU execute the loop T-state by T-state.
pub fn pattern_accelerate(memory: &Memory, regs: &mut Registers, tape: &mut TapePlayer, clock: &mut FrameClock) -> bool {
    if !tape.is_playing() {
        return false;
    }
    try_delay_loop(memory, regs, clock) || try_edge_poll(memory, regs, tape, clock)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store(pulses: &[u32]) -> PulseStore {
        let mut store = PulseStore::new();
        for &p in pulses {
            store.push_pulse(p);
        }
        store
    }

    #[test]
    fn tape_bit_toggles_after_edge_change() {
        let mut player = TapePlayer::new();
        player.insert(make_store(&[100, 100, 100]));
        assert!(!player.tape_bit(0));
        assert!(player.tape_bit(100));
        assert!(!player.tape_bit(200));
    }

    #[test]
    fn tape_bit_stops_at_end_of_stream() {
        let mut player = TapePlayer::new();
        player.insert(make_store(&[10]));
        player.tape_bit(10);
        assert!(!player.is_playing());
    }

    fn byte_pulses(byte: u8) -> Vec<u32> {
        let mut pulses = Vec::new();
        for bit in (0..8).rev() {
            let one = byte & (1 << bit) != 0;
            let dur = if one { BIT_ONE_THRESHOLD + 100 } else { BIT_ONE_THRESHOLD - 100 };
            pulses.push(dur);
            pulses.push(dur);
        }
        pulses
    }

    fn rom_trap_tape(flag: u8, data: &[u8], crc: u8) -> PulseStore {
        let mut pulses = vec![2168u32; 10];
        pulses.push(600); // first sync <= threshold, ends pilot
        pulses.push(600); // second sync, consumed unconditionally
        pulses.extend(byte_pulses(flag));
        for &b in data {
            pulses.extend(byte_pulses(b));
        }
        pulses.extend(byte_pulses(crc));
        make_store(&pulses)
    }

    #[test]
    fn rom_trap_loads_bytes_into_memory() {
        let mut tape = TapePlayer::new();
        tape.insert(rom_trap_tape(0xFF, &[0x11, 0x22, 0x33], 0x00));
        let mut regs = Registers { pc: ROM_TRAP_PC, a: 0xFF, ix: 0x8000, f: 0x01, ..Registers::default() };
        regs.set_de(3);
        let mut mem = Memory::new_48k(&vec![0u8; 0x4000]);

        assert!(rom_trap(&mut tape, &mut regs, &mut mem));
        assert_eq!(regs.pc, ROM_TRAP_SUCCESS_PC);
        assert_eq!(regs.f & 0x01, 0x01);
        assert_eq!(mem.read(0x8000), 0x11);
        assert_eq!(mem.read(0x8001), 0x22);
        assert_eq!(mem.read(0x8002), 0x33);
    }

    #[test]
    fn rom_trap_handles_early_end_of_tape() {
        let mut tape = TapePlayer::new();
        tape.insert(make_store(&[2168, 2168])); // pilot only, no sync/data
        let mut regs = Registers { pc: ROM_TRAP_PC, f: 0x01, ..Registers::default() };
        regs.set_de(1);
        let mut mem = Memory::new_48k(&vec![0u8; 0x4000]);

        assert!(rom_trap(&mut tape, &mut regs, &mut mem));
        assert_eq!(regs.pc, ROM_TRAP_ERROR_PC);
        assert_eq!(regs.f & 0x01, 0x00);
        assert!(!tape.is_playing());
    }

    #[test]
    fn delay_loop_dec_a_jr_nz_accelerates() {
        let mut mem = Memory::new_48k(&vec![0u8; 0x4000]);
        mem.write(0x8000, 0x3D);
        mem.write(0x8001, 0x20);
        mem.write(0x8002, 0xFD);
        let mut regs = Registers { pc: 0x8000, a: 5, ..Registers::default() };
        let mut clock = FrameClock::new(69_888, 32, 32);
        assert!(try_delay_loop(&mem, &mut regs, &mut clock));
        assert_eq!(regs.a, 1);
        assert_eq!(clock.now(), 4 * 16);
    }

    #[test]
    fn delay_loop_djnz_accelerates() {
        let mut mem = Memory::new_48k(&vec![0u8; 0x4000]);
        mem.write(0x8000, 0x10);
        mem.write(0x8001, 0xFE);
        let mut regs = Registers { pc: 0x8000, b: 10, ..Registers::default() };
        let mut clock = FrameClock::new(69_888, 32, 32);
        assert!(try_delay_loop(&mem, &mut regs, &mut clock));
        assert_eq!(regs.b, 1);
        assert_eq!(clock.now(), 9 * 13);
    }

    #[test]
    fn edge_poll_returns_on_timeout() {
        let mut mem = Memory::new_48k(&vec![0u8; 0x4000]);
        mem.write(0x8000, 0xDB);
        mem.write(0x8001, 0xFE);
        mem.write(0x8002, 0xE1); // popeye2
        let mut regs = Registers { pc: 0x8000, b: 0xFF, c: 0x00, ..Registers::default() };
        let mut tape = TapePlayer::new();
        tape.insert(make_store(&[1000]));
        let mut clock = FrameClock::new(69_888, 32, 32);
        assert!(try_edge_poll(&mem, &mut regs, &mut tape, &mut clock));
        assert_eq!(regs.b, 0xFF);
    }

    #[test]
    fn pattern_accelerate_does_nothing_when_tape_not_playing() {
        let mem = Memory::new_48k(&vec![0u8; 0x4000]);
        let mut regs = Registers::default();
        let mut tape = TapePlayer::new();
        let mut clock = FrameClock::new(69_888, 32, 32);
        assert!(!pattern_accelerate(&mem, &mut regs, &mut tape, &mut clock));
    }
}
