//! CSW (Compressed Square Wave) tape signal format reader.
//!
//! CSW stores a tape as a literal edge-transition waveform rather than a
//! block structure: a 32-byte header describing the sample rate and
//! compression, followed by RLE-encoded run lengths. Each run is a number
//! of samples at the current polarity before the signal flips. This is
//! the lowest-level tape format — there is no pilot/sync/data framing to
//! interpret, only raw polarity-change timing, which is exactly what
//! [`format_spectrum_tap::PulseStore`] already represents.

use format_spectrum_tap::PulseStore;

const HEADER_LEN: usize = 32;
const SIGNATURE: &[u8; 23] = b"Compressed Square Wave\x1A";
const Z80_CLOCK_HZ: u64 = 3_500_000;

/// A parsed CSW v1 file: its sample rate, initial polarity, and the
/// flattened pulse stream it decodes to.
#[derive(Debug, Clone)]
pub struct CswFile {
    pub sample_rate: u16,
    pub initial_polarity: bool,
    pub store: PulseStore,
}

impl CswFile {
    /// Parse a CSW v1 file from raw bytes.
    ///
    /// # Errors
    ///
    /// Fails on a bad signature, unsupported compression type, or a zero
    /// sample rate, per the format's documented header layout.
    pub fn parse(data: &[u8]) -> Result<Self, String> {
        if data.len() < HEADER_LEN {
            return Err(format!(
                "CSW file too short for header: need {HEADER_LEN} bytes, got {}",
                data.len()
            ));
        }

        if &data[0..23] != SIGNATURE {
            return Err("invalid CSW signature (expected \"Compressed Square Wave\\x1A\")".to_string());
        }

        let sample_rate = u16::from(data[0x19]) | (u16::from(data[0x19 + 1]) << 8);
        if sample_rate == 0 {
            return Err("CSW sample rate is zero".to_string());
        }

        let compression_type = data[0x1B];
        if compression_type != 1 {
            return Err(format!(
                "unsupported CSW compression type {compression_type} (only RLE, type 1, is supported)"
            ));
        }

        let initial_polarity = data[0x1C] & 1 != 0;

        let t_per_sample = (Z80_CLOCK_HZ / u64::from(sample_rate)) as u32;

        let mut store = PulseStore::new();
        store.begin_block("csw stream");

        let body = &data[HEADER_LEN..];
        let mut pos = 0;
        while pos < body.len() {
            let (run_samples, consumed) = if body[pos] == 0x00 {
                if pos + 5 > body.len() {
                    return Err(format!(
                        "truncated CSW RLE escape at offset {}: need 4 bytes, {} remain",
                        HEADER_LEN + pos,
                        body.len() - pos - 1
                    ));
                }
                let run = u32::from(body[pos + 1])
                    | (u32::from(body[pos + 2]) << 8)
                    | (u32::from(body[pos + 3]) << 16)
                    | (u32::from(body[pos + 4]) << 24);
                (run, 5)
            } else {
                (u32::from(body[pos]), 1)
            };
            pos += consumed;

            store.push_pulse(run_samples * t_per_sample);
        }

        store.push_pulse((Z80_CLOCK_HZ / 10) as u32);
        store.end_block();

        Ok(Self {
            sample_rate,
            initial_polarity,
            store,
        })
    }
}
