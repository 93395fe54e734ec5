//! Spectrum model configuration.

/// Supported Spectrum models. Each carries its own frame timing; the
/// 48K/128K split also determines which `Memory` constructor applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumModel {
    Spectrum48K,
    Spectrum128K,
    SpectrumPlus3,
    Pentagon128,
}

impl SpectrumModel {
    /// T-states per frame.
    #[must_use]
    pub const fn frame_len(self) -> u64 {
        match self {
            Self::Spectrum48K => 69_888,
            Self::Spectrum128K | Self::SpectrumPlus3 => 70_908,
            Self::Pentagon128 => 71_680,
        }
    }

    /// Frame-relative position of the interrupt window.
    #[must_use]
    pub const fn int_pos(self) -> u64 {
        0
    }

    /// Duration of the interrupt window, in T-states.
    #[must_use]
    pub const fn int_len(self) -> u64 {
        32
    }

    /// Whether this model has 128K-style paged memory (`0x7FFD`/`0x1FFD`).
    #[must_use]
    pub const fn is_banked(self) -> bool {
        !matches!(self, Self::Spectrum48K)
    }
}

/// Configuration for creating a Spectrum instance.
pub struct SpectrumConfig {
    pub model: SpectrumModel,
    /// ROM data: 16,384 bytes for 48K, 32,768 bytes (two pages) for
    /// banked models.
    pub rom: Vec<u8>,
    /// Disable all WD1793 timing delays, resolving state transitions
    /// instantly. Useful for trap-accelerated disk loading and tests.
    pub disk_no_delay: bool,
}
