//! Error types for the sector engine.

use std::io;

/// Errors reported by [`VirtualDrive`](crate::VirtualDrive) operations.
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    /// The logical sector number does not fit the 24-bit wire encoding.
    #[error("logical sector number {lsn} exceeds the 24-bit range")]
    InvalidLsn {
        /// The rejected sector number.
        lsn: u32,
    },

    /// The payload is not exactly one sector long.
    #[error("sector payload is {len} bytes, expected {expected}")]
    BadSectorLength {
        /// Length of the rejected payload.
        len: usize,
        /// Required sector size.
        expected: usize,
    },

    /// The drive was opened in the file-less state; writes are refused.
    #[error("drive has no usable backing file")]
    NoBackingFile,

    /// A flush persisted only part of the dirty map.
    #[error("flush stopped after {flushed} sectors, {remaining} remain dirty: {source}")]
    PartialFlush {
        /// Sectors persisted before the failure.
        flushed: usize,
        /// Sectors still dirty for the next attempt.
        remaining: usize,
        /// The underlying I/O failure.
        source: io::Error,
    },
}
