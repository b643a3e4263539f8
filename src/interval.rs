//! # interval
//! Half-open `[begin, end)` address intervals and the overlap arithmetic
//! used by the mapping registry. The derived ordering (by `begin`, then
//! `end`) is what keeps the per-side interval stores sorted.
use core::fmt;

use crate::Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    pub begin: Addr,
    pub end: Addr,
}

impl Interval {
    /// Invariant: `begin <= end`.
    pub fn new(begin: Addr, end: Addr) -> Self {
        debug_assert!(begin <= end);
        Interval { begin, end }
    }

    pub fn from_len(begin: Addr, len: usize) -> Self {
        debug_assert!(begin.checked_add(len).is_some());
        Interval {
            begin,
            end: begin + len,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// The half-open range excludes `end` itself.
    pub fn contains(&self, addr: Addr) -> bool {
        self.begin <= addr && addr < self.end
    }

    pub fn contains_interval(&self, other: &Interval) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }

    /// Two intervals overlap iff `max(begin) < min(end)`; empty intervals
    /// overlap nothing.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.begin.max(other.begin) < self.end.min(other.end)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.begin, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::Interval;

    #[test]
    fn test_contains_is_half_open() {
        let iv = Interval::from_len(0x1000, 0x10);
        assert!(iv.contains(0x1000));
        assert!(iv.contains(0x100f));
        assert!(!iv.contains(0x1010));
        assert!(!iv.contains(0xfff));
    }

    #[test]
    fn test_overlap() {
        let a = Interval::new(0x1000, 0x1010);
        assert!(a.overlaps(&Interval::new(0x1008, 0x1018)));
        assert!(a.overlaps(&Interval::new(0xff8, 0x1001)));
        assert!(a.overlaps(&a));
        // touching at the boundary is not an overlap
        assert!(!a.overlaps(&Interval::new(0x1010, 0x1020)));
        assert!(!a.overlaps(&Interval::new(0xff0, 0x1000)));
    }

    #[test]
    fn test_empty_overlaps_nothing() {
        let empty = Interval::new(0x1008, 0x1008);
        let a = Interval::new(0x1000, 0x1010);
        assert!(!empty.overlaps(&a));
        assert!(!a.overlaps(&empty));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_containment() {
        let a = Interval::new(0x1000, 0x1010);
        assert!(a.contains_interval(&Interval::new(0x1004, 0x1008)));
        assert!(a.contains_interval(&a));
        assert!(!a.contains_interval(&Interval::new(0x1004, 0x1011)));
    }

    #[test]
    fn test_ordering_by_begin_then_end() {
        let mut v = [
            Interval::new(0x20, 0x30),
            Interval::new(0x10, 0x18),
            Interval::new(0x10, 0x14),
        ];
        v.sort();
        assert_eq!(v[0], Interval::new(0x10, 0x14));
        assert_eq!(v[1], Interval::new(0x10, 0x18));
        assert_eq!(v[2], Interval::new(0x20, 0x30));
    }
}
