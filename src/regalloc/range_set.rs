//! A collection of integer ranges grouped by an ownership id.
//!
//! Each range is half-open (`[start, end)`) and associated with an owner.
//! All ranges of one owner must be disjoint; ranges of different owners may
//! overlap freely. The allocator uses one of these per register class, with
//! the hardware register number as the owner, to model where pinned
//! registers are already consumed.

use std::collections::BTreeMap;
use std::ops::Bound;

/// Sorted range collection. Keys map `(owner, range end)` to the range
/// start, which makes "first range at or after a position" a single
/// ordered-map probe.
#[derive(Clone, Debug, Default)]
pub struct RangeSet {
    data: BTreeMap<(u32, u32), u32>,
}

impl RangeSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Erase all ranges.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Add `[start, end)` for `owner`, merging with adjacent ranges of the
    /// same owner. The range must not overlap any existing range of the
    /// same owner.
    pub fn add_range(&mut self, owner: u32, mut start: u32, mut end: u32) {
        assert!(end > start);
        debug_assert!(
            !self.is_contended_range(owner, start, end),
            "overlapping range [{start}, {end}) for owner {owner}"
        );

        // A range ending exactly at `start` merges from the left.
        if let Some(before_start) = self.data.remove(&(owner, start)) {
            start = before_start;
        }

        // A range starting exactly at `end` merges from the right.
        let after = self
            .data
            .range((Bound::Excluded((owner, end)), Bound::Unbounded))
            .next()
            .map(|(&key, &range_start)| (key, range_start));
        if let Some(((id, after_end), after_start)) = after {
            if id == owner && after_start == end {
                self.data.remove(&(owner, after_end));
                end = after_end;
            }
        }

        self.data.insert((owner, end), start);
    }

    /// Does a range of `owner` cover `position`?
    pub fn is_contended(&self, owner: u32, position: u32) -> bool {
        match self
            .data
            .range((Bound::Excluded((owner, position)), Bound::Unbounded))
            .next()
        {
            Some((&(id, _end), &start)) if id == owner => start <= position,
            _ => false,
        }
    }

    /// Does any range of `owner` intersect `[start, end)`?
    pub fn is_contended_range(&self, owner: u32, start: u32, end: u32) -> bool {
        match self
            .data
            .range((Bound::Excluded((owner, start)), Bound::Unbounded))
            .next()
        {
            Some((&(id, _range_end), &range_start)) if id == owner => range_start < end,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_inside_and_outside() {
        let mut set = RangeSet::new();
        set.add_range(0, 5, 10);
        set.add_range(0, 20, 21);
        set.add_range(1, 7, 13);

        assert!(!set.is_contended(0, 3));
        assert!(set.is_contended(0, 5));
        assert!(set.is_contended(0, 9));
        assert!(!set.is_contended(0, 10));
        assert!(set.is_contended(0, 20));
        assert!(!set.is_contended(0, 21));
        assert!(set.is_contended(1, 7));
        assert!(!set.is_contended(1, 3));
    }

    #[test]
    fn adjacent_ranges_merge() {
        let mut set = RangeSet::new();
        set.add_range(0, 5, 10);
        set.add_range(0, 11, 12);
        set.add_range(0, 13, 15);
        set.add_range(0, 12, 13);
        // [11, 12) + [12, 13) + [13, 15) collapsed into [11, 15).
        assert!(set.is_contended_range(0, 11, 15));
        assert!((11..15).all(|p| set.is_contended(0, p)));
        assert!(!set.is_contended(0, 10));
        assert!(!set.is_contended(0, 15));
    }

    #[test]
    fn range_overlap_queries() {
        let mut set = RangeSet::new();
        set.add_range(0, 5, 10);
        set.add_range(1, 7, 13);

        assert!(!set.is_contended_range(0, 1, 5));
        assert!(set.is_contended_range(0, 3, 7));
        assert!(set.is_contended_range(0, 0, 50));
        assert!(!set.is_contended_range(0, 25, 50));
        assert!(set.is_contended_range(1, 12, 20));
        assert!(!set.is_contended_range(1, 13, 20));
    }

    #[test]
    fn owners_do_not_interfere() {
        let mut set = RangeSet::new();
        set.add_range(3, 0, 100);
        assert!(!set.is_contended(2, 50));
        assert!(!set.is_contended_range(4, 0, 100));
    }
}
