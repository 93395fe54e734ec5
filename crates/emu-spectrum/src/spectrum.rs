//! Top-level Spectrum system: wires the Z80 core, bus, frame clock, tape
//! engine, and disk trap accelerator together and drives the tick loop.
//!
//! No video, audio, or keyboard state lives here — those collaborators
//! are external to this core. `run_frame()` only advances T-states; it
//! has nothing to hand back but how many elapsed.

use emu_core::{Cpu, FrameClock, Observable, Tickable, Value};
use format_csw::CswFile;
use format_sna::SnaSnapshot;
use format_sp::SpSnapshot;
use format_spectrum_tap::{tap_to_pulse_store, TapFile};
use format_tzx::{self, TzxFile};
use format_z80::Z80Snapshot;
use wd1793_beta::TrackStore;
use zilog_z80::Z80;

use crate::bus::SpectrumBus;
use crate::config::{SpectrumConfig, SpectrumModel};
use crate::disk_traps;
use crate::memory::Memory;
use crate::tape_engine::{self, TapePlayer};

/// Start of the Beta Disk ROM's ID-vector window: a CPU fetch landing
/// here pages the TR-DOS ROM in for the duration of its service call.
const TRDOS_ENTRY_START: u16 = 0x3D00;
const TRDOS_ENTRY_END: u16 = 0x3DFF;

/// ZX Spectrum core: CPU timing, tape engine, and disk controller.
pub struct Spectrum {
    cpu: Z80,
    bus: SpectrumBus,
    clock: FrameClock,
    tape: TapePlayer,
    model: SpectrumModel,
    /// Tape ROM-trap and pattern acceleration. Always on by default;
    /// hosts wanting cycle-exact playback for timing-sensitive loaders
    /// can disable it.
    pub tape_traps_enabled: bool,
    /// Disk trap acceleration (§4.8). Independent of the tape flag.
    pub disk_traps_enabled: bool,
}

impl Spectrum {
    /// Create a new Spectrum from the given configuration.
    ///
    /// # Panics
    ///
    /// Panics if the ROM size doesn't match the model (see
    /// [`Memory::new_48k`]/[`Memory::new_128k`]).
    #[must_use]
    pub fn new(config: &SpectrumConfig) -> Self {
        let memory = if config.model.is_banked() {
            Memory::new_128k(&config.rom)
        } else {
            Memory::new_48k(&config.rom)
        };
        let mut bus = SpectrumBus::new(memory);
        bus.fdc.no_delay = config.disk_no_delay;

        Self {
            cpu: Z80::new(),
            bus,
            clock: FrameClock::new(config.model.frame_len(), config.model.int_pos(), config.model.int_len()),
            tape: TapePlayer::new(),
            model: config.model,
            tape_traps_enabled: true,
            disk_traps_enabled: true,
        }
    }

    /// Run one complete frame. Returns the number of CPU T-states
    /// executed (close to, but not always exactly, the model's nominal
    /// frame length — instruction boundaries rarely align perfectly
    /// with it).
    pub fn run_frame(&mut self) -> u64 {
        let start = self.cpu.total_ticks();
        loop {
            self.tick();
            if self.clock.frame_done() {
                break;
            }
        }
        self.cpu.total_ticks() - start
    }

    #[must_use]
    pub fn cpu(&self) -> &Z80 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    #[must_use]
    pub fn bus(&self) -> &SpectrumBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut SpectrumBus {
        &mut self.bus
    }

    #[must_use]
    pub fn model(&self) -> SpectrumModel {
        self.model
    }

    #[must_use]
    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    /// Insert a TAP file and start playback from the beginning.
    pub fn insert_tap(&mut self, tap: &TapFile) {
        self.tape.insert(tap_to_pulse_store(tap));
    }

    /// Insert a TZX file (flattened to a single pulse stream) and start
    /// playback.
    ///
    /// # Errors
    ///
    /// Propagates `format_tzx::flatten`'s error if the file contains a
    /// block type that can't be reduced to a pulse stream.
    pub fn insert_tzx(&mut self, tzx: &TzxFile) -> Result<(), String> {
        let store = format_tzx::flatten(tzx)?;
        self.tape.insert(store);
        Ok(())
    }

    /// Insert a CSW file and start playback.
    pub fn insert_csw(&mut self, csw: CswFile) {
        self.tape.insert(csw.store);
    }

    pub fn eject_tape(&mut self) {
        self.tape.eject();
    }

    pub fn rewind_tape(&mut self) {
        self.tape.rewind();
    }

    #[must_use]
    pub fn is_tape_playing(&self) -> bool {
        self.tape.is_playing()
    }

    /// Insert a disk image into one of the four Beta Disk drives.
    pub fn insert_disk(&mut self, drive: usize, store: TrackStore) {
        self.bus.fdc.insert_disk(drive, store);
    }

    pub fn eject_disk(&mut self, drive: usize) -> Option<TrackStore> {
        self.bus.fdc.eject_disk(drive)
    }

    /// Restore state from an SNA snapshot.
    pub fn load_sna(&mut self, snap: &SnaSnapshot) {
        self.cpu.regs = snap.registers;
        self.bus.last_fe_write = (self.bus.last_fe_write & !0x07) | (snap.border & 0x07);
        if let Some(p7ffd) = snap.port_7ffd {
            self.bus.memory.write_7ffd(p7ffd);
        }
        for (page, data) in snap.pages.iter().enumerate() {
            if !data.is_empty() {
                self.bus.memory.load_page(page, data);
            }
        }
    }

    /// Restore state from a Z80 snapshot.
    pub fn load_z80(&mut self, snap: &Z80Snapshot) {
        self.cpu.regs = snap.registers;
        self.bus.last_fe_write = (self.bus.last_fe_write & !0x07) | (snap.border & 0x07);
        if let Some(p7ffd) = snap.port_7ffd {
            self.bus.memory.write_7ffd(p7ffd);
        }
        for (page, data) in snap.pages.iter().enumerate() {
            if !data.is_empty() {
                self.bus.memory.load_page(page, data);
            }
        }
    }

    /// Restore state from an SP snapshot.
    pub fn load_sp(&mut self, snap: &SpSnapshot) {
        self.cpu.regs = snap.registers;
        self.bus.last_fe_write = (self.bus.last_fe_write & !0x07) | (snap.border & 0x07);
        if let Some(p7ffd) = snap.port_7ffd {
            self.bus.memory.write_7ffd(p7ffd);
        }
        for (page, data) in snap.pages.iter().enumerate() {
            if !data.is_empty() {
                self.bus.memory.load_page(page, data);
            }
        }
    }

    /// Page the Beta Disk ROM in/out based on where the CPU is
    /// fetching from: entering the `0x3D00-0x3DFF` ID vector latches
    /// it in; any fetch at or above `0x4000` (back into system RAM)
    /// releases it, matching the real Beta interface's address-decode
    /// latch.
    fn update_trdos_paging(&mut self) {
        let pc = self.cpu.regs.pc;
        if (TRDOS_ENTRY_START..=TRDOS_ENTRY_END).contains(&pc) {
            self.bus.trdos_active = true;
        } else if pc >= 0x4000 {
            self.bus.trdos_active = false;
        }
    }

    fn run_accelerators(&mut self) {
        if !self.cpu.at_instruction_boundary() {
            return;
        }

        if self.tape_traps_enabled {
            tape_engine::rom_trap(&mut self.tape, &mut self.cpu.regs, &mut self.bus.memory);

            tape_engine::pattern_accelerate(&self.bus.memory, &mut self.cpu.regs, &mut self.tape, &mut self.clock);
        }

        if self.disk_traps_enabled && self.bus.trdos_active {
            disk_traps::run(&mut self.cpu.regs, &mut self.bus.memory, &mut self.bus.fdc);
        }
    }
}

impl Tickable for Spectrum {
    fn tick(&mut self) {
        self.update_trdos_paging();

        if self.clock.interrupt_due(self.cpu.regs.iff1) {
            self.cpu.interrupt();
        }

        self.cpu.tick(&mut self.bus);
        self.clock.advance(1);

        self.bus.tape_ear = Some(self.tape.tape_bit(self.clock.now()));

        self.run_accelerators();

        if self.clock.frame_done() {
            self.clock.cross_frame(0);
        }
    }
}

impl Observable for Spectrum {
    fn query(&self, path: &str) -> Option<Value> {
        if let Some(rest) = path.strip_prefix("cpu.") {
            return query_cpu(&self.cpu, rest);
        }
        if let Some(rest) = path.strip_prefix("memory.") {
            let addr = if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
                u16::from_str_radix(hex, 16).ok()
            } else if let Some(hex) = rest.strip_prefix('$') {
                u16::from_str_radix(hex, 16).ok()
            } else {
                rest.parse().ok()
            };
            return addr.map(|a| Value::U8(self.bus.memory.peek(a)));
        }
        if let Some(rest) = path.strip_prefix("fdc.") {
            return match rest {
                "track" => Some(Value::U8(self.bus.fdc.track())),
                "busy" => Some(Value::Bool(self.bus.fdc.busy())),
                "state" => Some(Value::String(format!("{:?}", self.bus.fdc.state()))),
                _ => None,
            };
        }
        match path {
            "clock.t" => Some(Value::U64(self.clock.t)),
            "clock.t_total" => Some(Value::U64(self.clock.t_total)),
            "clock.now" => Some(Value::U64(self.clock.now())),
            "clock.frame_counter" => Some(Value::U64(self.clock.frame_counter)),
            "tape.playing" => Some(Value::Bool(self.tape.is_playing())),
            "trdos_active" => Some(Value::Bool(self.bus.trdos_active)),
            _ => None,
        }
    }

    fn query_paths(&self) -> &'static [&'static str] {
        &[
            "cpu.<register>",
            "memory.<address>",
            "fdc.track",
            "fdc.busy",
            "fdc.state",
            "clock.t",
            "clock.t_total",
            "clock.now",
            "clock.frame_counter",
            "tape.playing",
            "trdos_active",
        ]
    }
}

fn query_cpu(cpu: &Z80, path: &str) -> Option<Value> {
    match path {
        "pc" => Some(Value::U16(cpu.regs.pc)),
        "sp" => Some(Value::U16(cpu.regs.sp)),
        "af" => Some(Value::U16(cpu.regs.af())),
        "bc" => Some(Value::U16(cpu.regs.bc())),
        "de" => Some(Value::U16(cpu.regs.de())),
        "hl" => Some(Value::U16(cpu.regs.hl())),
        "ix" => Some(Value::U16(cpu.regs.ix)),
        "iy" => Some(Value::U16(cpu.regs.iy)),
        "i" => Some(Value::U8(cpu.regs.i)),
        "r" => Some(Value::U8(cpu.regs.r)),
        "iff1" => Some(Value::Bool(cpu.regs.iff1)),
        "iff2" => Some(Value::Bool(cpu.regs.iff2)),
        "im" => Some(Value::U8(cpu.regs.im)),
        "halted" => Some(Value::Bool(cpu.regs.halted)),
        "total_ticks" => Some(Value::U64(cpu.total_ticks())),
        _ => None,
    }
}
