#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `protocol` defines the DriveWire 4 wire protocol as seen on the serial
//! link between the vintage host and the server: the single-byte opcode
//! catalogue, the reply error codes, the big-endian integer encodings and
//! the 16-bit modular sector checksum.
//!
//! The crate is deliberately dependency-free. Higher layers (the sector
//! engine and the daemon) consume these definitions so that every frame
//! shape and numeric contract lives in exactly one place.
//!
//! # Invariants
//!
//! - All multi-byte integers on the wire are big-endian.
//! - Sectors are exactly [`SECTOR_SIZE`] (256) bytes; logical sector
//!   numbers are 24-bit unsigned.
//! - The checksum over a sector is the plain byte sum truncated to 16
//!   bits. It is not a CRC.
//!
//! # Examples
//!
//! ```
//! use protocol::{Opcode, sector_checksum};
//!
//! assert_eq!(Opcode::classify(0x52), Some(Opcode::Read));
//! assert_eq!(Opcode::classify(0x85), Some(Opcode::FastWrite { channel: 5 }));
//! assert_eq!(sector_checksum(&[1u8, 2, 3]), 6);
//! ```

mod checksum;
mod opcode;
mod wire;

pub use checksum::{SectorChecksum, sector_checksum};
pub use opcode::Opcode;
pub use wire::{
    CHANNEL_COUNT, DRIVE_COUNT, ERR_CRC, ERR_OK, ERR_UNIT, SECTOR_SIZE, decode_lsn, decode_u16,
    encode_u16,
};
