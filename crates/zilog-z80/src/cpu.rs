//! Z80 CPU core: micro-op driven, one T-state per `tick()`.
//!
//! Decoding happens the instant the opcode byte (or, for DD/FD-prefixed
//! instructions, the displacement/opcode pair) has been fetched; the
//! decode step queues whatever further bus cycles the instruction needs
//! and, for anything that depends on data not yet read, a terminal
//! `Execute` micro-op that re-enters decoding once the data has arrived.
//! See `cpu/execute.rs` for the instruction tables themselves.

mod execute;

use emu_core::{Bus, Cpu};

use crate::flags::{CF, ZF};
use crate::microcode::{MicroOp, MicroOpQueue};
use crate::registers::Registers;

/// Z80 CPU.
#[derive(Debug, Clone)]
pub struct Z80 {
    pub regs: Registers,
    pub(crate) micro_ops: MicroOpQueue,
    mop_elapsed: u8,
    pub(crate) opcode: u8,
    /// Active prefix byte: 0x00 (none), 0xCB, 0xDD, 0xED, or 0xFD.
    pub(crate) prefix: u8,
    /// Secondary prefix for DDCB/FDCB chains (0xCB) or 0x00.
    pub(crate) prefix2: u8,
    pub(crate) addr: u16,
    pub(crate) data_lo: u8,
    pub(crate) data_hi: u8,
    pub(crate) displacement: i8,
    /// Counts how many times `queue_execute_followup` has fired within
    /// the instruction currently decoding; distinguishes "operand just
    /// fetched" from "operand read back after a queued memory access".
    pub(crate) followup_stage: u8,
    /// Set by EI; suppresses interrupt acceptance for exactly one more
    /// instruction boundary.
    pub ei_delay: bool,
    /// The "Q" register: flags as last written by `set_f`, sampled by
    /// SCF/CCF for their undocumented X/Y flag behaviour.
    pub last_q: u8,
    pub(crate) prev_q: u8,
    pub last_was_ld_a_ir: bool,
    int_pending: bool,
    nmi_pending: bool,
    /// T-states still to burn for an interrupt acknowledge cycle in
    /// progress (the ack sequence writes the stack directly rather than
    /// going through the micro-op queue).
    ack_burn: u8,
    total_ticks: u64,
}

impl Default for Z80 {
    fn default() -> Self {
        Self::new()
    }
}

impl Z80 {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: Registers::default(),
            micro_ops: MicroOpQueue::new(),
            mop_elapsed: 0,
            opcode: 0,
            prefix: 0,
            prefix2: 0,
            addr: 0,
            data_lo: 0,
            data_hi: 0,
            displacement: 0,
            followup_stage: 0,
            ei_delay: false,
            last_q: 0,
            prev_q: 0,
            last_was_ld_a_ir: false,
            int_pending: false,
            nmi_pending: false,
            ack_burn: 0,
            total_ticks: 0,
        }
    }

    /// Total T-states elapsed since construction or the last `reset()`.
    #[must_use]
    pub const fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    #[cfg(feature = "test-utils")]
    #[must_use]
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    /// True exactly when the currently decoding instruction has no more
    /// queued bus cycles — i.e. the CPU is between instructions. Used by
    /// the host to run instruction-granular acceleration hooks only at
    /// safe points.
    #[must_use]
    pub fn at_instruction_boundary(&self) -> bool {
        self.micro_ops.current().is_none() && self.ack_burn == 0
    }

    /// Force the program counter. Only safe to call between instructions;
    /// used by hosts warming up a loaded snapshot or CP/M-style harness.
    pub fn set_pc(&mut self, pc: u16) {
        self.regs.pc = pc;
    }

    #[must_use]
    pub const fn c(&self) -> u8 {
        self.regs.c
    }

    #[must_use]
    pub const fn e(&self) -> u8 {
        self.regs.e
    }

    #[must_use]
    pub const fn de(&self) -> u16 {
        self.regs.de()
    }

    /// The micro-op the CPU is about to execute, if any.
    #[cfg(feature = "test-utils")]
    #[must_use]
    pub fn current_micro_op(&self) -> Option<MicroOp> {
        self.micro_ops.current()
    }

    /// T-states elapsed within the current micro-op.
    #[must_use]
    pub const fn t_state(&self) -> u8 {
        self.mop_elapsed
    }

    /// Pop a return address off the stack and jump to it, bypassing
    /// normal instruction decode. Used by hosts that intercept a CALL
    /// target (e.g. a CP/M BDOS trap) and need to simulate the matching
    /// RET without re-decoding it.
    pub fn ret<B: Bus>(&mut self, bus: &mut B) {
        let lo = bus.read(u32::from(self.regs.sp)).value;
        self.regs.sp = self.regs.sp.wrapping_add(1);
        let hi = bus.read(u32::from(self.regs.sp)).value;
        self.regs.sp = self.regs.sp.wrapping_add(1);
        self.regs.pc = u16::from(lo) | (u16::from(hi) << 8);
    }

    fn inc_r(&mut self) {
        self.regs.r = (self.regs.r & 0x80) | (self.regs.r.wrapping_add(1) & 0x7F);
    }

    pub(crate) fn set_f(&mut self, value: u8) {
        self.regs.f = value;
        self.last_q = value;
    }

    pub(crate) fn queue_internal(&mut self, n: u8) {
        for _ in 0..n {
            self.micro_ops.push(MicroOp::Internal);
        }
    }

    pub(crate) fn queue_execute_followup(&mut self) {
        self.followup_stage += 1;
        self.micro_ops.push(MicroOp::Execute);
    }

    pub(crate) fn get_reg8(&self, r: u8) -> u8 {
        match r & 7 {
            0 => self.regs.b,
            1 => self.regs.c,
            2 => self.regs.d,
            3 => self.regs.e,
            4 => self.regs.h,
            5 => self.regs.l,
            7 => self.regs.a,
            _ => 0,
        }
    }

    pub(crate) fn set_reg8(&mut self, r: u8, value: u8) {
        match r & 7 {
            0 => self.regs.b = value,
            1 => self.regs.c = value,
            2 => self.regs.d = value,
            3 => self.regs.e = value,
            4 => self.regs.h = value,
            5 => self.regs.l = value,
            7 => self.regs.a = value,
            _ => {}
        }
    }

    pub(crate) fn get_reg16(&self, rp: u8) -> u16 {
        match rp & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.sp,
        }
    }

    pub(crate) fn set_reg16(&mut self, rp: u8, value: u16) {
        match rp & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.sp = value,
        }
    }

    pub(crate) fn get_reg16_af(&self, rp: u8) -> u16 {
        match rp & 3 {
            0 => self.regs.bc(),
            1 => self.regs.de(),
            2 => self.regs.hl(),
            _ => self.regs.af(),
        }
    }

    pub(crate) fn set_reg16_af(&mut self, rp: u8, value: u16) {
        match rp & 3 {
            0 => self.regs.set_bc(value),
            1 => self.regs.set_de(value),
            2 => self.regs.set_hl(value),
            _ => self.regs.set_af(value),
        }
    }

    pub(crate) fn get_index_reg(&self) -> u16 {
        if self.prefix == 0xFD {
            self.regs.iy
        } else {
            self.regs.ix
        }
    }

    pub(crate) fn set_index_reg(&mut self, value: u16) {
        if self.prefix == 0xFD {
            self.regs.iy = value;
        } else {
            self.regs.ix = value;
        }
    }

    pub(crate) fn get_reg8_indexed(&self, r: u8) -> u8 {
        match r & 7 {
            4 => (self.get_index_reg() >> 8) as u8,
            5 => self.get_index_reg() as u8,
            _ => self.get_reg8(r),
        }
    }

    pub(crate) fn set_reg8_indexed(&mut self, r: u8, value: u8) {
        match r & 7 {
            4 => {
                let idx = self.get_index_reg();
                self.set_index_reg((idx & 0x00FF) | (u16::from(value) << 8));
            }
            5 => {
                let idx = self.get_index_reg();
                self.set_index_reg((idx & 0xFF00) | u16::from(value));
            }
            _ => self.set_reg8(r, value),
        }
    }

    pub(crate) fn condition(&self, cc: u8) -> bool {
        match cc & 7 {
            0 => self.regs.f & ZF == 0,
            1 => self.regs.f & ZF != 0,
            2 => self.regs.f & CF == 0,
            3 => self.regs.f & CF != 0,
            4 => self.regs.f & crate::flags::PF == 0,
            5 => self.regs.f & crate::flags::PF != 0,
            6 => self.regs.f & crate::flags::SF == 0,
            _ => self.regs.f & crate::flags::SF != 0,
        }
    }

    fn on_opcode_fetched(&mut self) {
        if self.prefix == 0xDD || self.prefix == 0xFD {
            if self.opcode == 0xCB {
                self.prefix2 = 0xCB;
                self.micro_ops.push(MicroOp::FetchDisplacement);
                self.micro_ops.push(MicroOp::ReadImm8);
                self.queue_execute_followup();
            } else {
                self.execute_dd_fd();
            }
            return;
        }
        match self.prefix {
            0xCB => self.execute_cb(),
            0xED => self.execute_ed(),
            _ => self.execute_unprefixed(),
        }
    }

    fn push_pc<B: Bus>(&mut self, bus: &mut B) {
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(u32::from(self.regs.sp), (self.regs.pc >> 8) as u8);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        bus.write(u32::from(self.regs.sp), self.regs.pc as u8);
    }

    fn begin_nmi<B: Bus>(&mut self, bus: &mut B) {
        self.regs.halted = false;
        self.regs.iff2 = self.regs.iff1;
        self.regs.iff1 = false;
        self.push_pc(bus);
        self.regs.pc = 0x0066;
        self.ack_burn = 10;
    }

    fn begin_int<B: Bus>(&mut self, bus: &mut B) {
        self.regs.halted = false;
        self.regs.iff1 = false;
        self.regs.iff2 = false;
        match self.regs.im {
            2 => {
                let vector_addr = (u16::from(self.regs.i) << 8) | 0xFE;
                let lo = bus.read(u32::from(vector_addr)).value;
                let hi = bus.read(u32::from(vector_addr.wrapping_add(1))).value;
                self.push_pc(bus);
                self.regs.pc = u16::from(lo) | (u16::from(hi) << 8);
                self.ack_burn = 18;
            }
            _ => {
                self.push_pc(bus);
                self.regs.pc = 0x0038;
                self.ack_burn = 12;
            }
        }
    }

    fn begin_next_instruction<B: Bus>(&mut self, bus: &mut B) {
        self.micro_ops.clear();
        self.prefix = 0;
        self.prefix2 = 0;
        self.followup_stage = 0;
        self.prev_q = self.last_q;
        self.last_q = 0;
        self.last_was_ld_a_ir = false;

        let suppress_interrupt = self.ei_delay;
        self.ei_delay = false;

        if !suppress_interrupt {
            if self.nmi_pending {
                self.nmi_pending = false;
                self.begin_nmi(bus);
                return;
            }
            if self.int_pending && self.regs.iff1 {
                self.int_pending = false;
                self.begin_int(bus);
                return;
            }
        }
        self.micro_ops.push(MicroOp::FetchOpcode);
    }

    fn complete_micro_op<B: Bus>(&mut self, bus: &mut B, op: MicroOp) {
        match op {
            MicroOp::FetchOpcode => {
                self.opcode = bus.read(u32::from(self.regs.pc)).value;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.inc_r();
                self.on_opcode_fetched();
            }
            MicroOp::FetchDisplacement => {
                let d = bus.read(u32::from(self.regs.pc)).value;
                self.regs.pc = self.regs.pc.wrapping_add(1);
                self.displacement = d as i8;
                let base = self.get_index_reg();
                self.addr = base.wrapping_add(self.displacement as i16 as u16);
            }
            MicroOp::ReadImm8 | MicroOp::ReadImm16Lo => {
                self.data_lo = bus.read(u32::from(self.regs.pc)).value;
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            MicroOp::ReadImm16Hi => {
                self.data_hi = bus.read(u32::from(self.regs.pc)).value;
                self.regs.pc = self.regs.pc.wrapping_add(1);
            }
            MicroOp::ReadMem | MicroOp::ReadMem16Lo => {
                self.data_lo = bus.read(u32::from(self.addr)).value;
                if matches!(op, MicroOp::ReadMem16Lo) {
                    self.addr = self.addr.wrapping_add(1);
                }
            }
            MicroOp::ReadMem16Hi => {
                self.data_hi = bus.read(u32::from(self.addr)).value;
            }
            MicroOp::WriteMem | MicroOp::WriteMem16Lo => {
                bus.write(u32::from(self.addr), self.data_lo);
                if matches!(op, MicroOp::WriteMem16Lo) {
                    self.addr = self.addr.wrapping_add(1);
                }
            }
            MicroOp::WriteMem16Hi => {
                bus.write(u32::from(self.addr), self.data_hi);
            }
            MicroOp::WriteMemHiFirst => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                bus.write(u32::from(self.regs.sp), self.data_hi);
            }
            MicroOp::WriteMemLoSecond => {
                self.regs.sp = self.regs.sp.wrapping_sub(1);
                bus.write(u32::from(self.regs.sp), self.data_lo);
            }
            MicroOp::IoRead => {
                self.data_lo = bus.io_read(u32::from(self.addr)).value;
            }
            MicroOp::IoWrite => {
                bus.io_write(u32::from(self.addr), self.data_lo);
            }
            MicroOp::Internal => {}
            MicroOp::Execute => self.execute_followup(),
        }
    }
}

impl Cpu for Z80 {
    type Registers = Registers;

    fn tick<B: Bus>(&mut self, bus: &mut B) {
        self.total_ticks += 1;

        if self.ack_burn > 0 {
            self.ack_burn -= 1;
            return;
        }

        if self.regs.halted {
            if self.nmi_pending {
                self.nmi_pending = false;
                self.begin_nmi(bus);
            } else if self.int_pending && self.regs.iff1 {
                self.int_pending = false;
                self.begin_int(bus);
            } else {
                self.inc_r();
            }
            return;
        }

        if self.micro_ops.current().is_none() {
            self.begin_next_instruction(bus);
            if self.ack_burn > 0 {
                return;
            }
        }

        let Some(op) = self.micro_ops.current() else {
            return;
        };

        self.mop_elapsed += 1;
        let duration = if matches!(op, MicroOp::Internal) {
            1
        } else {
            op.t_states().max(1)
        };

        if self.mop_elapsed >= duration {
            self.complete_micro_op(bus, op);
            self.micro_ops.advance();
            self.mop_elapsed = 0;
        }
    }

    fn pc(&self) -> u32 {
        u32::from(self.regs.pc)
    }

    fn registers(&self) -> Self::Registers {
        self.regs
    }

    fn is_halted(&self) -> bool {
        self.regs.halted
    }

    fn interrupt(&mut self) -> bool {
        if self.regs.iff1 {
            self.int_pending = true;
            true
        } else {
            false
        }
    }

    fn nmi(&mut self) {
        self.nmi_pending = true;
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}
