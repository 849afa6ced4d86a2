//! The four drive slots.

use std::sync::Arc;

use engine::{ActivityIndicator, VirtualDrive};
use protocol::DRIVE_COUNT;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::DwConfig;
use crate::status::DriveStatus;

/// Drive slots shared by the dispatcher, the flush loop, reload and the
/// status surface. The lock is only ever held for synchronous sector
/// work, never across a link await.
pub(crate) type SharedDrives = Arc<Mutex<DriveBank>>;

/// The server's drive slots.
pub struct DriveBank {
    slots: [Option<VirtualDrive>; DRIVE_COUNT],
    indicator: Arc<dyn ActivityIndicator>,
}

impl DriveBank {
    /// Creates an empty bank pulsing `indicator` on drive I/O.
    #[must_use]
    pub fn new(indicator: Arc<dyn ActivityIndicator>) -> Self {
        Self {
            slots: [const { None }; DRIVE_COUNT],
            indicator,
        }
    }

    /// Rebinds every slot from `config`, closing whatever was mounted.
    ///
    /// A path that fails to open still occupies its slot in the
    /// file-less state so the host sees consistent unit numbering; the
    /// failure is logged by the drive itself.
    pub fn mount_from_config(&mut self, config: &DwConfig) {
        self.close_all();
        for (index, path) in config.drives.iter().enumerate() {
            self.slots[index] = path.as_ref().map(|path| {
                info!(slot = index, path = %path.display(), "binding drive");
                VirtualDrive::open(path, Arc::clone(&self.indicator))
            });
        }
    }

    /// Mounts `name` into the next free slot.
    ///
    /// Unlike config binding, a mount by name must open its image; on
    /// open failure the slot stays empty and `None` is returned so the
    /// wire reply can report failure.
    pub fn mount_named(&mut self, name: &str) -> Option<u8> {
        let free = self.slots.iter().position(Option::is_none)?;
        let drive = VirtualDrive::open(name, Arc::clone(&self.indicator));
        if !drive.has_backing_file() {
            return None;
        }
        info!(slot = free, name, "mounted named object");
        self.slots[free] = Some(drive);
        Some(free as u8)
    }

    /// The drive in `slot`, when the slot is in range and bound.
    pub fn get_mut(&mut self, slot: u8) -> Option<&mut VirtualDrive> {
        self.slots.get_mut(usize::from(slot))?.as_mut()
    }

    /// Flushes every mounted drive; failures are logged and the
    /// affected sectors stay dirty for the next cycle.
    pub fn flush_all(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(drive) = slot {
                if let Err(error) = drive.flush() {
                    warn!(slot = index, %error, "periodic flush failed");
                }
            }
        }
    }

    /// Final flush and close of every mounted drive; slots end empty.
    pub fn close_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(drive) = slot.as_mut() {
                drive.close();
            }
            *slot = None;
        }
    }

    /// Per-slot status for the management plane.
    #[must_use]
    pub fn status(&self) -> [Option<DriveStatus>; DRIVE_COUNT] {
        std::array::from_fn(|index| {
            self.slots[index].as_ref().map(|drive| {
                let stats = drive.stats();
                DriveStatus {
                    filename: drive.file_name(),
                    dirty_count: drive.dirty_len(),
                    read_hits: stats.read_hits,
                    read_misses: stats.read_misses,
                    write_count: stats.write_count,
                }
            })
        })
    }
}
