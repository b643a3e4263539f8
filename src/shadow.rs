//! # shadow
//! The validity shadow records, per fixed-size cell, whether the device
//! copy and the host copy of a mapped range currently hold a valid value.
//! Cells are keyed by host address (device accesses translate through the
//! registry first) and grouped into pages of atomics behind an `RwLock`ed
//! page table: the read-mostly checker path takes the read lock and a
//! per-cell atomic load, so it never serializes behind mapping updates on
//! unrelated addresses. All cell accesses are `Relaxed`; cross-thread
//! ordering between lifecycle events and checks is provided by the
//! caller's task-synchronization points.
use core::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;

use hashbrown::HashMap;
use log::debug;
use thiserror::Error;

use crate::{Addr, interval::Interval, registry::Side};

/// Default cell granule in bytes, mirroring the shadow granularity of the
/// underlying race detector.
pub const DEFAULT_CELL_SIZE: usize = 8;

/// Cells per shadow page.
const PAGE_CELLS: usize = 4096;

const MAPPED: u8 = 1 << 0;
const DEVICE_HAS_VALUE: u8 = 1 << 1;
const HOST_HAS_VALUE: u8 = 1 << 2;

#[derive(Debug)]
pub struct ValidityShadow {
    shift: u32,
    pages: RwLock<HashMap<Addr, Box<[AtomicU8]>>>,
}

impl ValidityShadow {
    pub fn new(cell_size: usize) -> Result<Self, ShadowError> {
        if !cell_size.is_power_of_two() {
            Err(ShadowError::BadCellSize(cell_size))?;
        }
        Ok(ValidityShadow {
            shift: cell_size.trailing_zeros(),
            pages: RwLock::new(HashMap::new()),
        })
    }

    pub fn cell_size(&self) -> usize {
        1 << self.shift
    }

    /// Reserves cells for a fresh allocation. No value assumption on
    /// either side yet.
    pub fn reserve(&self, range: Interval) {
        debug!("reserve - range: {range}");
        self.set_bits(range, MAPPED);
    }

    /// A host→device copy covered the range.
    pub fn set_device_valid(&self, range: Interval) {
        debug!("set_device_valid - range: {range}");
        self.set_bits(range, MAPPED | DEVICE_HAS_VALUE);
    }

    /// A device→host copy covered the range.
    pub fn set_host_valid(&self, range: Interval) {
        debug!("set_host_valid - range: {range}");
        self.set_bits(range, MAPPED | HOST_HAS_VALUE);
    }

    /// Associate-without-copy: the device copy must not be trusted until a
    /// `To` refreshes it.
    pub fn clear_device_valid(&self, range: Interval) {
        debug!("clear_device_valid - range: {range}");
        self.clear_bits(range, DEVICE_HAS_VALUE);
    }

    /// Exit-without-copy-back: the host copy is stale.
    pub fn clear_host_valid(&self, range: Interval) {
        debug!("clear_host_valid - range: {range}");
        self.clear_bits(range, HOST_HAS_VALUE);
    }

    /// Destroys the cells backing a released allocation and drops pages
    /// that no longer track anything.
    pub fn release(&self, range: Interval) {
        debug!("release - range: {range}");
        let cells = self.cell_range(range);
        let mut pages = self.pages.write().unwrap();
        for idx in cells.clone() {
            if let Some(page) = pages.get(&(idx / PAGE_CELLS)) {
                page[idx % PAGE_CELLS].store(0, Ordering::Relaxed);
            }
        }
        if cells.is_empty() {
            return;
        }
        for key in (cells.start / PAGE_CELLS)..=((cells.end - 1) / PAGE_CELLS) {
            let empty = pages
                .get(&key)
                .is_some_and(|page| page.iter().all(|cell| cell.load(Ordering::Relaxed) == 0));
            if empty {
                pages.remove(&key);
            }
        }
    }

    /// Cell-aligned addresses (clamped to `range.begin`) of every covered
    /// cell that does not hold a valid value on `side`. Cells that were
    /// never reserved count as invalid.
    pub fn invalid_cells(&self, range: Interval, side: Side) -> Vec<Addr> {
        let want = match side {
            Side::Device => DEVICE_HAS_VALUE,
            Side::Host => HOST_HAS_VALUE,
        };
        let pages = self.pages.read().unwrap();
        let mut found = Vec::new();
        for idx in self.cell_range(range) {
            let valid = pages.get(&(idx / PAGE_CELLS)).is_some_and(|page| {
                let state = page[idx % PAGE_CELLS].load(Ordering::Relaxed);
                state & MAPPED != 0 && state & want != 0
            });
            if !valid {
                found.push(range.begin.max(idx << self.shift));
            }
        }
        found
    }

    pub fn first_invalid(&self, range: Interval, side: Side) -> Option<Addr> {
        self.invalid_cells(range, side).into_iter().next()
    }

    pub fn is_tracked(&self, addr: Addr) -> bool {
        let idx = addr >> self.shift;
        self.pages
            .read()
            .unwrap()
            .get(&(idx / PAGE_CELLS))
            .is_some_and(|page| page[idx % PAGE_CELLS].load(Ordering::Relaxed) & MAPPED != 0)
    }

    /// Cell indices covering `range`, end-exclusive and rounded outward.
    fn cell_range(&self, range: Interval) -> core::ops::Range<usize> {
        if range.is_empty() {
            return 0..0;
        }
        (range.begin >> self.shift)..(((range.end - 1) >> self.shift) + 1)
    }

    fn set_bits(&self, range: Interval, bits: u8) {
        let mut pages = self.pages.write().unwrap();
        for idx in self.cell_range(range) {
            let page = pages.entry(idx / PAGE_CELLS).or_insert_with(new_page);
            page[idx % PAGE_CELLS].fetch_or(bits, Ordering::Relaxed);
        }
    }

    fn clear_bits(&self, range: Interval, bits: u8) {
        let pages = self.pages.read().unwrap();
        for idx in self.cell_range(range) {
            if let Some(page) = pages.get(&(idx / PAGE_CELLS)) {
                page[idx % PAGE_CELLS].fetch_and(!bits, Ordering::Relaxed);
            }
        }
    }
}

fn new_page() -> Box<[AtomicU8]> {
    (0..PAGE_CELLS).map(|_| AtomicU8::new(0)).collect()
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShadowError {
    #[error("Cell size is not a power of two: {0}")]
    BadCellSize(usize),
}
