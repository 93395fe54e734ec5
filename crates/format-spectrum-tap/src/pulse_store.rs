//! Pulse store: a byte-indexed stream of pulse durations.
//!
//! Tape formats produce millions of individual pulses (a single TAP
//! header block alone is over 16,000). Storing each as a 32-bit
//! duration would be wasteful, and most pulses in a real tape repeat
//! the same handful of durations (pilot, sync1, sync2, zero, one).
//! `PulseStore` interns up to 256 distinct durations into a lookup
//! table and stores the tape itself as a `Vec<u8>` of table indices.
//!
//! When the table fills up, a pulse with no exact match is interned to
//! its nearest existing entry rather than rejected — real-world tapes
//! occasionally carry direct-recording or CSW pulses with durations
//! that don't quite round-trip, and refusing to load over it would be
//! worse than a few T-states of drift.

/// Metadata for one block's span within the pulse image.
#[derive(Debug, Clone)]
pub struct BlockMeta {
    /// Human-readable label (e.g. "block $00 (17 bytes)").
    pub name: String,
    /// Start offset into the pulse image, inclusive.
    pub start: usize,
    /// End offset into the pulse image, exclusive.
    pub end: usize,
}

/// A byte-indexed stream of pulse durations plus the lookup table that
/// decodes each byte back to a T-state count.
#[derive(Debug, Clone)]
pub struct PulseStore {
    lookup: Vec<u32>,
    image: Vec<u8>,
    blocks: Vec<BlockMeta>,
    current_block_start: Option<usize>,
}

impl Default for PulseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lookup: Vec::with_capacity(256),
            image: Vec::new(),
            blocks: Vec::new(),
            current_block_start: None,
        }
    }

    /// Intern a pulse duration, returning its index into the lookup
    /// table. Exact matches are found by a linear scan (the table never
    /// exceeds 256 entries, so this stays cheap). If the table is full
    /// and no exact match exists, the nearest entry is reused instead.
    fn intern(&mut self, duration: u32) -> u8 {
        if let Some(pos) = self.lookup.iter().position(|&d| d == duration) {
            return pos as u8;
        }
        if self.lookup.len() < 256 {
            self.lookup.push(duration);
            return (self.lookup.len() - 1) as u8;
        }
        self.nearest(duration)
    }

    fn nearest(&self, duration: u32) -> u8 {
        self.lookup
            .iter()
            .enumerate()
            .min_by_key(|&(_, &d)| duration.abs_diff(d))
            .map(|(i, _)| i as u8)
            .unwrap_or(0)
    }

    /// Append a pulse of the given duration (T-states) to the image.
    pub fn push_pulse(&mut self, duration: u32) {
        let id = self.intern(duration);
        self.image.push(id);
    }

    /// Append a pause, expressed in milliseconds at 3.5MHz, as a single
    /// low-edge pulse covering the whole duration. Matches how TZX pause
    /// blocks and the TAP trailing gap are represented: one long pulse,
    /// not millions of individual T-state entries.
    pub fn push_pause_ms(&mut self, ms: u32) {
        const Z80_CLOCK_HZ: u64 = 3_500_000;
        let t_states = (u64::from(ms) * Z80_CLOCK_HZ / 1000) as u32;
        if t_states > 0 {
            self.push_pulse(t_states);
        }
    }

    /// Look up the duration a pulse id represents.
    #[must_use]
    pub fn duration_of(&self, id: u8) -> u32 {
        self.lookup.get(id as usize).copied().unwrap_or(0)
    }

    /// The pulse id stream itself.
    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    #[must_use]
    pub fn image_len(&self) -> usize {
        self.image.len()
    }

    /// Mark the start of a new named block (a TAP block, a TZX block, a
    /// CSW run). Must be paired with `end_block`.
    pub fn begin_block(&mut self, name: &str) {
        self.current_block_start = Some(self.image.len());
        self.blocks.push(BlockMeta {
            name: name.to_string(),
            start: self.image.len(),
            end: self.image.len(),
        });
    }

    /// Close the most recently opened block, recording its end offset.
    pub fn end_block(&mut self) {
        if self.current_block_start.take().is_some() {
            if let Some(last) = self.blocks.last_mut() {
                last.end = self.image.len();
            }
        }
    }

    #[must_use]
    pub fn blocks(&self) -> &[BlockMeta] {
        &self.blocks
    }

    /// Number of distinct pulse durations interned so far.
    #[must_use]
    pub fn table_len(&self) -> usize {
        self.lookup.len()
    }

    /// A cursor over the pulse image, used to drive playback.
    #[must_use]
    pub fn cursor(&self) -> PulseCursor<'_> {
        PulseCursor {
            store: self,
            pos: 0,
        }
    }
}

/// Lazily walks a `PulseStore`'s image, one pulse at a time.
pub struct PulseCursor<'a> {
    store: &'a PulseStore,
    pos: usize,
}

impl<'a> PulseCursor<'a> {
    /// Return the next pulse duration and advance, or `None` at the end
    /// of the tape.
    pub fn next_pulse(&mut self) -> Option<u32> {
        let id = *self.store.image.get(self.pos)?;
        self.pos += 1;
        Some(self.store.duration_of(id))
    }

    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.store.image.len());
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.pos >= self.store.image.len()
    }

    /// Name of the block the cursor currently sits within, if any.
    #[must_use]
    pub fn current_block(&self) -> Option<&'a BlockMeta> {
        self.store
            .blocks
            .iter()
            .find(|b| self.pos >= b.start && self.pos < b.end)
    }
}
