//! # registry
//! The bidirectional mapping registry: two independent sorted interval
//! stores, host→device and device→host. The two sides are maintained as a
//! consistent pair by the lifecycle dispatcher but carry asymmetric
//! conflict policies: host entries may be overwritten when the runtime
//! reuses a buffer (remove-then-insert, the newest association wins), while
//! a device conflict means the tracked program double-mapped a live device
//! address and is surfaced as a protocol violation by the caller.
use std::collections::BTreeMap;

use log::debug;
use thiserror::Error;

use crate::{Addr, interval::Interval};

/// The record kept per mapped interval: the base address on the *other*
/// side of the host/device pair, the mapped length and an optional symbolic
/// name used in diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapInfo {
    pub counterpart: Addr,
    pub len: usize,
    pub name: Option<String>,
}

impl MapInfo {
    pub fn new(counterpart: Addr, len: usize, name: Option<&str>) -> Self {
        MapInfo {
            counterpart,
            len,
            name: name.map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Host,
    Device,
}

impl core::fmt::Display for Side {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Side::Host => write!(f, "host"),
            Side::Device => write!(f, "device"),
        }
    }
}

/// A sorted map of non-overlapping intervals. Lookups are range scans over
/// the ordered keys, so point queries and overlap queries are logarithmic
/// plus the size of the overlap run.
#[derive(Debug, Default)]
pub struct IntervalMap {
    entries: BTreeMap<Interval, MapInfo>,
}

impl IntervalMap {
    /// Inserts without overwriting: an overlap with any live entry leaves
    /// the map untouched and reports a conflict. Callers decide whether a
    /// conflict is repairable (host side) or fatal (device side).
    pub fn insert(&mut self, interval: Interval, info: MapInfo) -> Result<(), RegistryError> {
        if let Some((existing, _)) = self.overlapping(interval).next() {
            Err(RegistryError::Conflict(interval, *existing))?;
        }
        self.entries.insert(interval, info);
        Ok(())
    }

    /// Deletes every entry overlapping `interval`, returning how many were
    /// removed. Used to repair the host side before re-inserting a
    /// conflicting association.
    pub fn remove_overlapping(&mut self, interval: Interval) -> usize {
        let doomed = self
            .overlapping(interval)
            .map(|(iv, _)| *iv)
            .collect::<Vec<_>>();
        for iv in &doomed {
            self.entries.remove(iv);
        }
        doomed.len()
    }

    /// Point lookup of the entry covering `addr`.
    pub fn find(&self, addr: Addr) -> Option<(Interval, &MapInfo)> {
        self.entries
            .range(..=Interval::new(addr, Addr::MAX))
            .next_back()
            .filter(|(iv, _)| iv.contains(addr))
            .map(|(iv, info)| (*iv, info))
    }

    /// Removes the single entry covering `addr`.
    pub fn remove(&mut self, addr: Addr) -> Result<(Interval, MapInfo), RegistryError> {
        let interval = self
            .find(addr)
            .map(|(iv, _)| iv)
            .ok_or(RegistryError::NotMapped(addr))?;
        let info = self
            .entries
            .remove(&interval)
            .ok_or(RegistryError::NotMapped(addr))?;
        Ok((interval, info))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Interval, &MapInfo)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries overlapping `probe`, rightmost first. Entries are
    /// non-overlapping and sorted by `begin`, so the overlap run is
    /// contiguous and ends at the first entry whose `end` is at or below
    /// `probe.begin`.
    fn overlapping(&self, probe: Interval) -> impl Iterator<Item = (&Interval, &MapInfo)> {
        self.entries
            .range(..Interval::new(probe.end, probe.end))
            .rev()
            .take_while(move |(iv, _)| iv.end > probe.begin)
            .filter(move |(iv, _)| iv.overlaps(&probe))
    }
}

/// The host→device and device→host stores as one unit. Side selection is
/// explicit at every operation; the asymmetric conflict policy lives in the
/// lifecycle dispatcher, not here.
#[derive(Debug, Default)]
pub struct MappingRegistry {
    host_to_device: IntervalMap,
    device_to_host: IntervalMap,
}

impl MappingRegistry {
    pub fn new() -> Self {
        MappingRegistry::default()
    }

    pub fn insert(
        &mut self,
        side: Side,
        interval: Interval,
        info: MapInfo,
    ) -> Result<(), RegistryError> {
        debug!("insert - side: {side}, interval: {interval}, counterpart: {:#x}", info.counterpart);
        self.side_mut(side).insert(interval, info)
    }

    pub fn remove_overlapping(&mut self, side: Side, interval: Interval) -> usize {
        debug!("remove_overlapping - side: {side}, interval: {interval}");
        self.side_mut(side).remove_overlapping(interval)
    }

    pub fn find(&self, side: Side, addr: Addr) -> Option<(Interval, &MapInfo)> {
        self.side(side).find(addr)
    }

    pub fn remove(&mut self, side: Side, addr: Addr) -> Result<(Interval, MapInfo), RegistryError> {
        debug!("remove - side: {side}, addr: {addr:#x}");
        self.side_mut(side).remove(addr)
    }

    pub fn iter(&self, side: Side) -> impl Iterator<Item = (&Interval, &MapInfo)> {
        self.side(side).iter()
    }

    pub fn len(&self, side: Side) -> usize {
        self.side(side).len()
    }

    pub fn is_empty(&self, side: Side) -> bool {
        self.side(side).is_empty()
    }

    fn side(&self, side: Side) -> &IntervalMap {
        match side {
            Side::Host => &self.host_to_device,
            Side::Device => &self.device_to_host,
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut IntervalMap {
        match side {
            Side::Host => &mut self.host_to_device,
            Side::Device => &mut self.device_to_host,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Mapping conflict: {0} overlaps live entry {1}")]
    Conflict(Interval, Interval),
    #[error("Address not involved in any mapping: {0:#x}")]
    NotMapped(Addr),
}
