//! Master clock configuration and frame-relative time base.

use crate::Ticks;

/// Master clock configuration for a system.
///
/// Each system has a master crystal that drives all timing. Components may
/// run at divided rates, but everything derives from this frequency.
#[derive(Debug, Clone, Copy)]
pub struct MasterClock {
    /// Crystal frequency in Hz (e.g., `3_546_895` for PAL Spectrum).
    pub frequency_hz: u64,
}

impl MasterClock {
    #[must_use]
    pub const fn new(frequency_hz: u64) -> Self {
        Self { frequency_hz }
    }

    /// Ticks per frame at the given frame rate (integer division).
    #[must_use]
    pub const fn ticks_per_frame(&self, frames_per_second: u64) -> Ticks {
        Ticks::new(self.frequency_hz / frames_per_second)
    }
}

/// The shared T-state time base: a frame-relative counter that resets at
/// every frame boundary, plus a monotonic counter of whole frames elapsed.
///
/// Absolute time is always `T_total + t`. Event timestamps (tape edge
/// changes, WD1793 motor timers) are stored in absolute form so they
/// survive the frame wrap untouched.
#[derive(Debug, Clone, Copy)]
pub struct FrameClock {
    /// Frame-relative T-state counter. May briefly exceed `frame_len`
    /// between the last instruction of a frame and the next
    /// `cross_frame` call.
    pub t: u64,
    /// Monotonic count of T-states from all completed frames.
    pub t_total: u64,
    /// T-states per frame.
    pub frame_len: u64,
    /// Frame-relative position of the interrupt window.
    pub int_pos: u64,
    /// Duration of the interrupt window, in T-states.
    pub int_len: u64,
    /// Number of frames completed since the last hard reset.
    pub frame_counter: u64,
}

impl FrameClock {
    #[must_use]
    pub const fn new(frame_len: u64, int_pos: u64, int_len: u64) -> Self {
        Self {
            t: 0,
            t_total: 0,
            frame_len,
            int_pos,
            int_len,
            frame_counter: 0,
        }
    }

    /// Advance the frame-relative counter by `n` T-states.
    pub fn advance(&mut self, n: u64) {
        self.t += n;
    }

    /// Absolute T-state time: `T_total + t`.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.t_total + self.t
    }

    /// True once `t` has reached or passed the end of the frame.
    #[must_use]
    pub const fn frame_done(&self) -> bool {
        self.t >= self.frame_len
    }

    /// Roll `t` back across the frame boundary into `T_total`, carrying
    /// any overshoot forward. `ei_pos` is an absolute timestamp tracked
    /// by the Z80 core that must be rebased by the same amount so it
    /// remains valid after the wrap; the caller passes it in and gets
    /// the rebased value back.
    pub fn cross_frame(&mut self, ei_pos: u64) -> u64 {
        self.t_total += self.frame_len;
        self.t -= self.frame_len;
        self.frame_counter += 1;
        ei_pos.saturating_sub(self.frame_len)
    }

    /// Whether the frame interrupt should fire right now: `IFF1` is set
    /// and the frame-relative time is within 10 T-states of `int_pos`
    /// (the `int_len` window tapers off after that).
    #[must_use]
    pub fn interrupt_due(&self, iff1: bool) -> bool {
        iff1 && self.t + 10 < self.int_pos + self.int_len && self.t >= self.int_pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_accumulates() {
        let mut clock = FrameClock::new(71680, 0, 32);
        clock.advance(100);
        clock.advance(50);
        assert_eq!(clock.t, 150);
        assert_eq!(clock.now(), 150);
    }

    #[test]
    fn cross_frame_wraps_with_carry() {
        let mut clock = FrameClock::new(71680, 0, 32);
        clock.advance(71680 + 10);
        assert!(clock.frame_done());
        let rebased = clock.cross_frame(71680 + 5);
        assert_eq!(clock.t, 10);
        assert_eq!(clock.t_total, 71680);
        assert_eq!(clock.frame_counter, 1);
        assert_eq!(rebased, 5);
        assert_eq!(clock.now(), 71690);
        assert_eq!(clock.t_total % clock.frame_len, 0);
    }

    #[test]
    fn interrupt_window() {
        let clock = FrameClock::new(71680, 0, 32);
        assert!(clock.interrupt_due(true));
        assert!(!clock.interrupt_due(false));
    }
}
