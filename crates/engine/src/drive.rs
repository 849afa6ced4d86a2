//! The virtual drive.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use protocol::SECTOR_SIZE;
use tracing::{debug, warn};

use crate::activity::ActivityIndicator;
use crate::cache::SectorMap;
use crate::error::DriveError;

/// One 256-byte sector.
pub type Sector = [u8; SECTOR_SIZE];

/// Upper bound on read-cache entries per drive.
pub const READ_CACHE_CAPACITY: usize = 8;

/// Largest logical sector number the 24-bit wire encoding can carry.
const MAX_LSN: u32 = 0x00FF_FFFF;

/// Counters kept per drive for the status surface.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DriveStats {
    /// Reads satisfied from the dirty map or the read cache.
    pub read_hits: u64,
    /// Reads that had to consult the backing file.
    pub read_misses: u64,
    /// Accepted sector writes.
    pub write_count: u64,
}

/// A sector-addressed virtual drive over a raw image file.
///
/// Writes land in the dirty map and are deferred until [`flush`]
/// (flash-wear protection); reads resolve dirty map, then read cache,
/// then the backing file. Opening never fails outright: when the image
/// cannot be opened the drive exists in a file-less state where reads
/// return `None` and writes are refused, so a host probing the slot
/// sees a unit error instead of a crashed server.
///
/// [`flush`]: VirtualDrive::flush
pub struct VirtualDrive {
    path: PathBuf,
    file: Option<File>,
    dirty: SectorMap,
    read_cache: SectorMap,
    stats: DriveStats,
    indicator: Arc<dyn ActivityIndicator>,
}

impl std::fmt::Debug for VirtualDrive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualDrive")
            .field("path", &self.path)
            .field("has_file", &self.file.is_some())
            .field("dirty", &self.dirty.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl VirtualDrive {
    /// Opens the image at `path` for read/write.
    ///
    /// On open failure the drive is still constructed, without a
    /// backing file; the failure is logged and surfaced later as unit
    /// errors on the wire.
    pub fn open(path: impl AsRef<Path>, indicator: Arc<dyn ActivityIndicator>) -> Self {
        let path = path.as_ref().to_path_buf();
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => Some(file),
            Err(error) => {
                warn!(path = %path.display(), %error, "failed to open drive image");
                None
            }
        };
        Self {
            path,
            file,
            dirty: SectorMap::new(),
            read_cache: SectorMap::new(),
            stats: DriveStats::default(),
            indicator,
        }
    }

    /// Returns `true` when the backing image opened successfully.
    #[must_use]
    pub const fn has_backing_file(&self) -> bool {
        self.file.is_some()
    }

    /// Path of the backing image.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Basename of the backing image, for status reporting.
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |name| name.to_string_lossy().into_owned())
    }

    /// Per-drive counters.
    #[must_use]
    pub const fn stats(&self) -> DriveStats {
        self.stats
    }

    /// Number of sectors awaiting flush.
    #[must_use]
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// Number of sectors currently in the read cache.
    #[must_use]
    pub fn read_cache_len(&self) -> usize {
        self.read_cache.len()
    }

    /// Reads one sector.
    ///
    /// Resolution order is dirty map, read cache, backing file. A short
    /// read from the file (image smaller than `lsn * 256 + 256`) is
    /// zero-padded. Returns `None` when there is no backing file or the
    /// file read fails; the caller maps that to a unit error.
    pub fn read_sector(&mut self, lsn: u32) -> Option<Sector> {
        if let Some(sector) = self.dirty.get(lsn) {
            self.stats.read_hits += 1;
            return Some(*sector);
        }
        if let Some(sector) = self.read_cache.get(lsn) {
            self.stats.read_hits += 1;
            return Some(*sector);
        }

        self.stats.read_misses += 1;
        let file = self.file.as_mut()?;

        let mut sector = [0u8; SECTOR_SIZE];
        match read_sector_at(file, lsn, &mut sector) {
            Ok(()) => {}
            Err(error) => {
                warn!(lsn, %error, "sector read failed");
                return None;
            }
        }
        self.indicator.blink();

        self.read_cache.insert(lsn, sector);
        while self.read_cache.len() > READ_CACHE_CAPACITY {
            self.read_cache.pop_oldest();
        }
        Some(sector)
    }

    /// Writes one sector into the write-back cache.
    ///
    /// No file I/O happens here; the sector becomes dirty and is
    /// mirrored into the read cache so subsequent reads observe it. A
    /// rejected write leaves both caches untouched.
    pub fn write_sector(&mut self, lsn: u32, data: &[u8]) -> Result<(), DriveError> {
        if lsn > MAX_LSN {
            return Err(DriveError::InvalidLsn { lsn });
        }
        if data.len() != SECTOR_SIZE {
            return Err(DriveError::BadSectorLength {
                len: data.len(),
                expected: SECTOR_SIZE,
            });
        }
        if self.file.is_none() {
            return Err(DriveError::NoBackingFile);
        }

        let mut sector = [0u8; SECTOR_SIZE];
        sector.copy_from_slice(data);

        self.stats.write_count += 1;
        self.dirty.insert(lsn, sector);
        self.indicator.blink();

        self.read_cache.insert(lsn, sector);
        while self.read_cache.len() > READ_CACHE_CAPACITY {
            self.read_cache.pop_oldest();
        }
        Ok(())
    }

    /// Persists the dirty map to the backing file.
    ///
    /// Sectors are written in insertion order and removed from the dirty
    /// map only once written; a mid-flush failure therefore leaves the
    /// unwritten remainder dirty for the next cycle. Returns the number
    /// of sectors persisted.
    pub fn flush(&mut self) -> Result<usize, DriveError> {
        if self.file.is_none() || self.dirty.is_empty() {
            return Ok(0);
        }

        self.indicator.on();
        let result = self.flush_inner();
        self.indicator.off();

        match &result {
            Ok(0) => {}
            Ok(flushed) => {
                debug!(path = %self.path.display(), flushed = *flushed, "flushed dirty sectors");
            }
            Err(error) => warn!(path = %self.path.display(), %error, "flush failed"),
        }
        result
    }

    fn flush_inner(&mut self) -> Result<usize, DriveError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };

        let mut written = Vec::new();
        let mut failure = None;
        for (lsn, sector) in self.dirty.iter() {
            let offset = u64::from(lsn) * SECTOR_SIZE as u64;
            match file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| file.write_all(sector))
            {
                Ok(()) => written.push(lsn),
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        if failure.is_none() {
            if let Err(error) = file.flush().and_then(|()| file.sync_data()) {
                failure = Some(error);
            }
        }

        let flushed = written.len();
        for lsn in written {
            self.dirty.remove(lsn);
        }

        match failure {
            None => Ok(flushed),
            Some(source) => Err(DriveError::PartialFlush {
                flushed,
                remaining: self.dirty.len(),
                source,
            }),
        }
    }

    /// Flushes what it can and closes the backing file.
    ///
    /// Both steps are best-effort; a failing flush is logged and the
    /// file handle is released regardless.
    pub fn close(&mut self) {
        if let Err(error) = self.flush() {
            warn!(path = %self.path.display(), %error, "flush during close failed");
        }
        self.file = None;
    }
}

fn read_sector_at(file: &mut File, lsn: u32, sector: &mut Sector) -> std::io::Result<()> {
    let offset = u64::from(lsn) * SECTOR_SIZE as u64;
    file.seek(SeekFrom::Start(offset))?;

    // Fill as much as the image holds; the tail stays zeroed.
    let mut filled = 0;
    while filled < SECTOR_SIZE {
        let count = file.read(&mut sector[filled..])?;
        if count == 0 {
            break;
        }
        filled += count;
    }
    Ok(())
}
