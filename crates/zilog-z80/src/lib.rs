//! Cycle-accurate Z80 CPU emulator.
//!
//! Each call to `tick()` advances exactly one T-state. Instruction timing,
//! undocumented flag behaviour (the `wz`/MEMPTR register, X/Y flag copies),
//! and interrupt-mode vectoring all follow the real silicon rather than the
//! commonly-published (and slightly wrong) instruction tables.

mod alu;
mod cpu;
mod flags;
mod microcode;
mod registers;

pub use cpu::Z80;
pub use flags::{CF, HF, NF, PF, SF, XF, YF, ZF};
pub use registers::Registers;

#[cfg(feature = "test-utils")]
pub use microcode::MicroOp;
