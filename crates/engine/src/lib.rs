#![deny(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `engine` implements the virtual-drive sector engine: a
//! sector-addressed view over a raw image file with a write-back dirty
//! map and a small bounded read cache. The design targets flash-backed
//! storage, so writes never touch the backing file directly; they
//! accumulate in the dirty map until an explicit [`VirtualDrive::flush`].
//!
//! # Invariants
//!
//! - A sector present in the dirty map always wins over the read cache
//!   and the backing file.
//! - A successful write is immediately visible to reads, before and
//!   after flushing.
//! - The read cache never holds more than [`READ_CACHE_CAPACITY`]
//!   sectors; eviction removes the least-recently-inserted entry.
//! - A failed flush keeps every unwritten sector dirty for retry.

mod activity;
mod cache;
mod drive;
mod error;

pub use activity::{ActivityIndicator, NullIndicator};
pub use cache::SectorMap;
pub use drive::{DriveStats, READ_CACHE_CAPACITY, Sector, VirtualDrive};
pub use error::DriveError;
