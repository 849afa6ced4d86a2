//! The DriveWire sector checksum.
//!
//! Both READ and WRITE families protect sector payloads with a 16-bit
//! checksum computed as the unsigned sum of all payload bytes truncated
//! to 16 bits. The host computes the same sum on its side; a disagreement
//! is reported with the `E_CRC` reply code.

/// Incremental 16-bit modular sum over a byte stream.
///
/// The accumulator wraps at 2^16, matching the host's arithmetic. For a
/// whole sector in memory, [`sector_checksum`] is the convenient
/// one-shot form.
///
/// # Examples
///
/// ```
/// use protocol::SectorChecksum;
///
/// let mut checksum = SectorChecksum::new();
/// checksum.update(b"XYZ");
/// checksum.update(&[b' '; 253]);
/// assert_eq!(checksum.value(), 0x20AB);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SectorChecksum {
    sum: u16,
}

impl SectorChecksum {
    /// Creates a checksum with a zeroed accumulator.
    #[must_use]
    pub const fn new() -> Self {
        Self { sum: 0 }
    }

    /// Folds `bytes` into the accumulator.
    pub fn update(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.sum = self.sum.wrapping_add(u16::from(byte));
        }
    }

    /// Returns the current 16-bit checksum value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u16 {
        self.sum
    }

    /// Resets the accumulator to zero.
    pub const fn reset(&mut self) {
        self.sum = 0;
    }
}

/// Computes the 16-bit modular checksum of `bytes` in one shot.
#[must_use]
pub fn sector_checksum(bytes: &[u8]) -> u16 {
    let mut checksum = SectorChecksum::new();
    checksum.update(bytes);
    checksum.value()
}
