//! Track Store: the uniform in-memory disk representation every image
//! loader produces.
//!
//! A track is modelled as its sector list (cylinder/head/record/size-code
//! plus data and a CRC-valid flag) rather than a literal bit-level MFM
//! stream — callers never need anything below sector granularity, and
//! keeping sectors first-class lets `TrackStore` serve `read_sector` /
//! `write_sector` / `track_ids` directly without re-parsing a byte stream
//! on every access.

/// Standard TR-DOS-geometry sectors per track, reused by loaders for
/// formats that store sectors in flat disk-order rather than per-track
/// groups (SCL, HOB).
pub const SECTORS_PER_TRACK: usize = 16;

/// Translate a 0-based global sector index (sequential in track-major,
/// side-minor order: cyl0/head0, cyl0/head1, cyl1/head0, ...) into
/// `(cylinder, head, record)`, assuming [`SECTORS_PER_TRACK`] sectors
/// per track.
#[must_use]
pub fn sector_location(global_index: usize, heads: usize) -> (u8, u8, u8) {
    let heads = heads.max(1);
    let track_index = global_index / SECTORS_PER_TRACK;
    let within = global_index % SECTORS_PER_TRACK;
    let cylinder = (track_index / heads) as u8;
    let head = (track_index % heads) as u8;
    (cylinder, head, (within + 1) as u8)
}

/// One physical sector: its address-mark fields (C, H, R, N) and payload.
#[derive(Debug, Clone)]
pub struct Sector {
    pub cylinder: u8,
    pub head: u8,
    pub record: u8,
    /// Sector length is `128 << size_code` bytes.
    pub size_code: u8,
    pub data: Vec<u8>,
    /// `false` if this sector was flagged with a bad CRC at load time.
    pub crc_ok: bool,
}

impl Sector {
    #[must_use]
    pub fn len(&self) -> usize {
        128usize << self.size_code
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One physical track: its sectors in on-disk order (not necessarily
/// sorted by record number — real tracks are interleaved).
#[derive(Debug, Clone, Default)]
pub struct Track {
    pub sectors: Vec<Sector>,
}

/// Per-drive track store: every loader (TRD, SCL, HOB, FDI, TD0, UDI,
/// ISD, PRO) parses its source format into one of these.
#[derive(Debug, Clone)]
pub struct TrackStore {
    pub cylinders: usize,
    pub heads: usize,
    tracks: Vec<Track>,
    pub write_protected: bool,
}

impl TrackStore {
    #[must_use]
    pub fn new(cylinders: usize, heads: usize) -> Self {
        Self {
            cylinders,
            heads,
            tracks: vec![Track::default(); cylinders * heads.max(1)],
            write_protected: false,
        }
    }

    fn index(&self, cylinder: u8, head: u8) -> Option<usize> {
        let cylinder = cylinder as usize;
        let head = head as usize;
        if cylinder >= self.cylinders || head >= self.heads {
            return None;
        }
        Some(cylinder * self.heads + head)
    }

    #[must_use]
    pub fn track(&self, cylinder: u8, head: u8) -> Option<&Track> {
        self.index(cylinder, head).map(|i| &self.tracks[i])
    }

    pub fn set_track(&mut self, cylinder: u8, head: u8, track: Track) {
        if let Some(i) = self.index(cylinder, head) {
            self.tracks[i] = track;
        }
    }

    /// The (C, H, R, N) tuples of every sector on a track, in physical
    /// (interleaved) order — as READ ID / READ ADDRESS return them.
    #[must_use]
    pub fn track_ids(&self, cylinder: u8, head: u8) -> Vec<(u8, u8, u8, u8)> {
        self.track(cylinder, head)
            .map(|t| {
                t.sectors
                    .iter()
                    .map(|s| (s.cylinder, s.head, s.record, s.size_code))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[must_use]
    pub fn find_sector(&self, cylinder: u8, head: u8, record: u8) -> Option<&Sector> {
        self.track(cylinder, head)?
            .sectors
            .iter()
            .find(|s| s.record == record)
    }

    #[must_use]
    pub fn read_sector(&self, cylinder: u8, head: u8, record: u8) -> Option<(&[u8], bool)> {
        self.find_sector(cylinder, head, record)
            .map(|s| (s.data.as_slice(), s.crc_ok))
    }

    /// Overwrite a sector's data in place. Returns `false` if no sector
    /// with that record number exists on the track (SECTOR_NOT_FOUND).
    pub fn write_sector(&mut self, cylinder: u8, head: u8, record: u8, data: &[u8]) -> bool {
        let Some(i) = self.index(cylinder, head) else {
            return false;
        };
        let Some(sector) = self.tracks[i].sectors.iter_mut().find(|s| s.record == record) else {
            return false;
        };
        let len = sector.len().min(data.len());
        sector.data.clear();
        sector.data.extend_from_slice(&data[..len]);
        sector.data.resize(sector.len(), 0);
        sector.crc_ok = true;
        true
    }
}
