//! WD1793 floppy disk controller + Beta Disk interface.
//!
//! Standalone IC emulation with no dependencies, following the project's
//! chip-level library pattern (like `nec-upd765`, `mos-via-6522`).
//!
//! The WD1793 backs the Beta Disk (TR-DOS) interface found on most
//! Eastern Bloc ZX Spectrum clones. Unlike the uPD765, it has no
//! command-length table — each command type has its own fixed parameter
//! shape, taken from the track/sector registers rather than bytes written
//! to the data register.
//!
//! # Register interface
//!
//! | Port | Read | Write |
//! |------|------|-------|
//! | 0x1F | status | command |
//! | 0x3F | track register | set track |
//! | 0x5F | sector register | set sector |
//! | 0x7F | data register | data write |
//! | 0xFF | DRQ bit 6 \| INTRQ bit 7 | drive (bits 0-1), side (bit 4), HLT (bit 3), density (bit 6) |

#![allow(clippy::cast_possible_truncation)]

pub mod commands;
pub mod formats;
pub mod trackstore;

pub use trackstore::{Sector, Track, TrackStore};

/// Controller state machine phase, following the read/write-sector flows
/// described for the real hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    CmdRw,
    FoundNextId,
    Rdsec,
    Read,
    Wrsec,
    Write,
    WriteTrack,
}

/// WD1793 floppy disk controller with an attached Beta Disk drive unit.
pub struct Wd1793 {
    status: u8,
    track: u8,
    sector: u8,
    data: u8,
    state: ControllerState,
    drive: usize,
    side: u8,
    step_direction: i8,
    multiple: bool,
    rwbuf: Vec<u8>,
    rwptr: usize,
    drq: bool,
    intrq: bool,
    /// When set, all modelled timing delays collapse to zero (`wd93_nodelay`).
    pub no_delay: bool,
    drives: [Option<TrackStore>; 4],
}

impl Wd1793 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: 0,
            track: 0,
            sector: 1,
            data: 0,
            state: ControllerState::Idle,
            drive: 0,
            side: 0,
            step_direction: -1,
            multiple: false,
            rwbuf: Vec::new(),
            rwptr: 0,
            drq: false,
            intrq: false,
            no_delay: false,
            drives: [None, None, None, None],
        }
    }

    pub fn insert_disk(&mut self, drive: usize, store: TrackStore) {
        if drive < 4 {
            self.drives[drive] = Some(store);
        }
    }

    pub fn eject_disk(&mut self, drive: usize) -> Option<TrackStore> {
        if drive < 4 {
            self.drives[drive].take()
        } else {
            None
        }
    }

    #[must_use]
    pub fn drive_present(&self) -> bool {
        self.drives.get(self.drive).is_some_and(Option::is_some)
    }

    #[must_use]
    pub fn current_track_store(&self) -> Option<&TrackStore> {
        self.drives.get(self.drive).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        self.state
    }

    #[must_use]
    pub fn track(&self) -> u8 {
        self.track
    }

    #[must_use]
    pub fn busy(&self) -> bool {
        self.status & 0x01 != 0
    }

    /// Bytes still to be transferred in the current read/write-sector
    /// operation. Used by the disk trap accelerator's bulk-transfer
    /// fast path instead of stepping one byte at a time.
    #[must_use]
    pub fn remaining_transfer_len(&self) -> usize {
        self.rwbuf.len().saturating_sub(self.rwptr)
    }

    #[must_use]
    pub fn drq(&self) -> bool {
        self.drq
    }

    /// Read one of the five WD1793/system registers. `port` is the low
    /// byte of the I/O address (0x1F, 0x3F, 0x5F, 0x7F, or 0xFF).
    #[must_use]
    pub fn read_port(&mut self, port: u8) -> u8 {
        match port {
            0x1F => self.status,
            0x3F => self.track,
            0x5F => self.sector,
            0x7F => self.read_data(),
            0xFF => {
                let mut v = 0;
                if self.drq {
                    v |= 0x40;
                }
                if self.intrq {
                    v |= 0x80;
                }
                v
            }
            _ => 0xFF,
        }
    }

    pub fn write_port(&mut self, port: u8, value: u8) {
        match port {
            0x1F => self.write_command(value),
            0x3F => self.track = value,
            0x5F => self.sector = value,
            0x7F => self.write_data(value),
            0xFF => {
                self.drive = (value & 0x03) as usize;
                self.side = (value >> 4) & 0x01;
            }
            _ => {}
        }
    }

    fn write_command(&mut self, command: u8) {
        if self.busy() && command >> 4 != commands::CMD_FORCE_INTERRUPT {
            // BSY set and the new command isn't Type IV: ignored per the
            // WD1793's "command register writable only when BSY clear"
            // rule.
            return;
        }
        self.intrq = false;
        self.drq = false;
        commands::execute(self, command);
    }

    fn read_data(&mut self) -> u8 {
        match self.state {
            ControllerState::Read => {
                if self.rwptr < self.rwbuf.len() {
                    let byte = self.rwbuf[self.rwptr];
                    self.rwptr += 1;
                    if self.rwptr >= self.rwbuf.len() {
                        self.finish_read();
                    }
                    byte
                } else {
                    self.finish_read();
                    0xFF
                }
            }
            _ => self.data,
        }
    }

    fn finish_read(&mut self) {
        self.drq = false;
        self.status &= !0x02; // clear DRQ
        self.status &= !0x01; // clear BUSY
        self.state = ControllerState::Idle;
        self.intrq = true;
        self.rwbuf.clear();
        self.rwptr = 0;
    }

    fn write_data(&mut self, value: u8) {
        match self.state {
            ControllerState::Wrsec | ControllerState::WriteTrack => {
                if self.rwptr < self.rwbuf.len() {
                    self.rwbuf[self.rwptr] = value;
                    self.rwptr += 1;
                    if self.rwptr >= self.rwbuf.len() {
                        self.finish_write();
                    }
                }
            }
            _ => self.data = value,
        }
    }

    fn finish_write(&mut self) {
        self.drq = false;
        self.status &= !0x02;
        self.status &= !0x01;

        if self.state == ControllerState::WriteTrack {
            let track = commands::parse_raw_track(&self.rwbuf);
            if let Some(store) = self.drives.get_mut(self.drive).and_then(Option::as_mut) {
                store.set_track(self.track, self.side, track);
            }
        } else {
            let ok = self
                .drives
                .get_mut(self.drive)
                .and_then(Option::as_mut)
                .is_some_and(|store| store.write_sector(self.track, self.side, self.sector, &self.rwbuf));
            if !ok {
                self.status |= 0x10; // RECORD NOT FOUND
            }
        }

        self.state = ControllerState::Idle;
        self.intrq = true;
        self.rwbuf.clear();
        self.rwptr = 0;
    }
}

impl Default for Wd1793 {
    fn default() -> Self {
        Self::new()
    }
}
