//! Spectrum bus: memory and I/O routing.
//!
//! Port `0xFE`'s EAR bit (bit 6) is driven by the tape engine. The WD1793
//! disk controller only answers its ports (`0x1F`/`0x3F`/`0x5F`/`0x7F`/
//! `0xFF`) while TR-DOS paging is active, tracked by `trdos_active` (set
//! by the host whenever the CPU is executing inside the Beta Disk ROM
//! window, `0x3D00-0x3FFF`).

use emu_core::{Bus, ReadResult};
use wd1793_beta::Wd1793;

use crate::memory::Memory;

/// The Spectrum bus, implementing `emu_core::Bus`.
pub struct SpectrumBus {
    pub memory: Memory,
    pub fdc: Wd1793,
    /// Last value written to port `0xFE` (border + MIC bits).
    pub last_fe_write: u8,
    /// Current tape EAR level, driven by the tape engine each CPU tick.
    /// `None` means no tape is playing (EAR floats high).
    pub tape_ear: Option<bool>,
    /// Whether the CPU is currently executing inside the paged-in
    /// Beta Disk ROM, gating the WD1793 port window.
    pub trdos_active: bool,
}

impl SpectrumBus {
    #[must_use]
    pub fn new(memory: Memory) -> Self {
        Self {
            memory,
            fdc: Wd1793::new(),
            last_fe_write: 0,
            tape_ear: None,
            trdos_active: false,
        }
    }

    fn ear_bit(&self) -> u8 {
        match self.tape_ear {
            Some(true) => 0x40,
            Some(false) => 0x00,
            None => (self.last_fe_write & 0x08) << 3,
        }
    }
}

impl Bus for SpectrumBus {
    fn read(&mut self, addr: u32) -> ReadResult {
        ReadResult::new(self.memory.read(addr as u16))
    }

    fn write(&mut self, addr: u32, value: u8) -> u8 {
        self.memory.write(addr as u16, value);
        0
    }

    fn io_read(&mut self, addr: u32) -> ReadResult {
        let port = addr as u16;

        if self.trdos_active {
            match port & 0xFF {
                0x1F => return ReadResult::new(self.fdc.read_port(0x1F)),
                0x3F => return ReadResult::new(self.fdc.read_port(0x3F)),
                0x5F => return ReadResult::new(self.fdc.read_port(0x5F)),
                0x7F => return ReadResult::new(self.fdc.read_port(0x7F)),
                0xFF => return ReadResult::new(self.fdc.read_port(0xFF)),
                _ => {}
            }
        }

        if port & 0x01 == 0 {
            let ear = self.ear_bit();
            return ReadResult::new(0xA0 | ear | 0x1F);
        }

        ReadResult::new(0xFF)
    }

    fn io_write(&mut self, addr: u32, value: u8) -> u8 {
        let port = addr as u16;

        if port & 0x01 == 0 {
            self.last_fe_write = value;
        }

        if port & 0xFFFF == 0x7FFD {
            self.memory.write_7ffd(value);
        }
        if port & 0xFFFF == 0x1FFD {
            self.memory.write_1ffd(value);
        }

        if self.trdos_active {
            match port & 0xFF {
                0x1F => self.fdc.write_port(0x1F, value),
                0x3F => self.fdc.write_port(0x3F, value),
                0x5F => self.fdc.write_port(0x5F, value),
                0x7F => self.fdc.write_port(0x7F, value),
                0xFF => self.fdc.write_port(0xFF, value),
                _ => {}
            }
        }

        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bus() -> SpectrumBus {
        SpectrumBus::new(Memory::new_48k(&vec![0u8; 0x4000]))
    }

    #[test]
    fn memory_read_write() {
        let mut bus = make_bus();
        bus.write(0x8000, 0xAB);
        assert_eq!(bus.read(0x8000).value, 0xAB);
    }

    #[test]
    fn ear_reflects_mic_when_no_tape_playing() {
        let mut bus = make_bus();
        bus.io_write(0x00FE, 0x08);
        assert_eq!(bus.io_read(0xFEFE).value & 0x40, 0x40);
    }

    #[test]
    fn tape_ear_overrides_mic() {
        let mut bus = make_bus();
        bus.io_write(0x00FE, 0x08);
        bus.tape_ear = Some(false);
        assert_eq!(bus.io_read(0xFEFE).value & 0x40, 0x00);
    }

    #[test]
    fn disk_ports_silent_when_trdos_inactive() {
        let mut bus = make_bus();
        bus.fdc.write_port(0xFF, 0x00); // select drive 0, arbitrary state
        let status_before = bus.fdc.read_port(0x1F);
        bus.io_write(0x001F, 0x80); // would be a command write if active
        assert_eq!(bus.fdc.read_port(0x1F), status_before);
    }

    #[test]
    fn disk_ports_respond_when_trdos_active() {
        let mut bus = make_bus();
        bus.trdos_active = true;
        bus.io_write(0x003F, 0x05); // set track register
        assert_eq!(bus.io_read(0x003F).value, 0x05);
    }

    #[test]
    fn banking_register_writes_route_to_memory() {
        let mut bus = SpectrumBus::new(Memory::new_128k(&vec![0u8; 2 * 0x4000]));
        bus.io_write(0x7FFD, 0x03);
        assert_eq!(bus.memory.p7ffd(), 0x03);
    }
}
