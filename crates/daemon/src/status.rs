//! The read-only status surface consumed by the management plane.

use protocol::DRIVE_COUNT;
use serde::Serialize;

use crate::clock::WallTime;
use crate::telemetry::TelemetrySnapshot;

/// Point-in-time view of the whole server.
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    /// Server-local time at snapshot.
    pub time: WallTime,
    /// Protocol and channel telemetry.
    #[serde(flatten)]
    pub telemetry: TelemetrySnapshot,
    /// Per-slot drive state; `None` for empty slots.
    pub drives: [Option<DriveStatus>; DRIVE_COUNT],
}

/// Status of one mounted drive.
#[derive(Clone, Debug, Serialize)]
pub struct DriveStatus {
    /// Basename of the backing image.
    pub filename: String,
    /// Sectors awaiting flush.
    pub dirty_count: usize,
    /// Reads satisfied by a cache.
    pub read_hits: u64,
    /// Reads that consulted the backing file.
    pub read_misses: u64,
    /// Accepted writes.
    pub write_count: u64,
}
