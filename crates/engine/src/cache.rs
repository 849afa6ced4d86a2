//! Insertion-ordered sector maps.
//!
//! Both drive caches need an LSN-keyed map that remembers the order in
//! which keys first arrived: the dirty map flushes sectors in that order
//! and the read cache evicts its oldest insertion. A hash map paired
//! with an order deque gives both without a dedicated ordered-map
//! dependency. Re-inserting an existing key updates the payload in place
//! and keeps its original position.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::drive::Sector;

/// LSN-to-sector map with stable insertion order.
#[derive(Debug, Default)]
pub struct SectorMap {
    entries: FxHashMap<u32, Sector>,
    order: VecDeque<u32>,
}

impl SectorMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sectors currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the map holds no sectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the sector stored for `lsn`, if any.
    #[must_use]
    pub fn get(&self, lsn: u32) -> Option<&Sector> {
        self.entries.get(&lsn)
    }

    /// Inserts or replaces the sector for `lsn`.
    ///
    /// A replacement keeps the key's original insertion position.
    pub fn insert(&mut self, lsn: u32, sector: Sector) {
        if self.entries.insert(lsn, sector).is_none() {
            self.order.push_back(lsn);
        }
    }

    /// Removes and returns the sector for `lsn`.
    pub fn remove(&mut self, lsn: u32) -> Option<Sector> {
        let sector = self.entries.remove(&lsn)?;
        self.order.retain(|&key| key != lsn);
        Some(sector)
    }

    /// Removes and returns the least-recently-inserted sector.
    pub fn pop_oldest(&mut self) -> Option<(u32, Sector)> {
        while let Some(lsn) = self.order.pop_front() {
            if let Some(sector) = self.entries.remove(&lsn) {
                return Some((lsn, sector));
            }
        }
        None
    }

    /// Drops every sector.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Iterates `(lsn, sector)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Sector)> {
        self.order
            .iter()
            .filter_map(|&lsn| self.entries.get(&lsn).map(|sector| (lsn, sector)))
    }

    /// The keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.order.iter().copied()
    }
}
