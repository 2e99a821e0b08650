// Copyright (C) 2025, Cloudflare, Inc.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::ops::RangeInclusive;

use std::collections::btree_map;
use std::collections::BTreeMap;

/// A set of disjoint, non-adjacent, inclusive intervals of packet numbers.
///
/// Intervals are keyed by their start and store their (inclusive) end.
/// Inserting a range that overlaps or touches existing intervals merges
/// them, withdrawing a range splits the intervals it cuts through.
#[derive(Clone, PartialEq, Eq)]
pub struct IntervalSet {
    inner: BTreeMap<u64, u64>,

    capacity: usize,
}

impl IntervalSet {
    /// Creates a set that holds at most `capacity` intervals. When full, the
    /// lowest interval is evicted to make room for a new one.
    pub fn new(capacity: usize) -> Self {
        IntervalSet {
            inner: BTreeMap::default(),
            capacity,
        }
    }

    pub fn insert(&mut self, item: RangeInclusive<u64>) {
        let mut start = *item.start();
        let mut end = *item.end();

        if start > end {
            return;
        }

        // Merge with the preceding interval if it overlaps or is adjacent.
        if let Some((s, e)) = self.prev_to(start) {
            if e.saturating_add(1) >= start {
                self.inner.remove(&s);

                start = s;
                end = end.max(e);
            }
        }

        // Swallow every following interval that starts at most one past the
        // merged end.
        while let Some((s, e)) = self.next_to(start) {
            if s > end.saturating_add(1) {
                break;
            }

            self.inner.remove(&s);

            end = end.max(e);
        }

        if self.inner.len() >= self.capacity {
            if let Some(first) = self.inner.keys().next().copied() {
                self.inner.remove(&first);
            }
        }

        self.inner.insert(start, end);
    }

    pub fn push_item(&mut self, item: u64) {
        self.insert(item..=item);
    }

    /// Removes every packet number in `item` from the set.
    pub fn withdraw(&mut self, item: RangeInclusive<u64>) {
        let start = *item.start();
        let end = *item.end();

        if start > end {
            return;
        }

        // Intervals are disjoint and sorted, so walking back from the last
        // interval starting at or before `end` visits exactly the ones that
        // intersect `item`.
        let cut: Vec<(u64, u64)> = self
            .inner
            .range(..=end)
            .rev()
            .take_while(|&(_, &e)| e >= start)
            .map(|(&s, &e)| (s, e))
            .collect();

        for (s, e) in cut {
            self.inner.remove(&s);

            if s < start {
                self.inner.insert(s, start - 1);
            }

            if e > end {
                self.inner.insert(end + 1, e);
            }
        }
    }

    pub fn contains(&self, item: u64) -> bool {
        self.prev_to(item).filter(|&(_, e)| item <= e).is_some()
    }

    /// Returns the smallest packet number in the set.
    pub fn first(&self) -> Option<u64> {
        self.inner.keys().next().copied()
    }

    /// Returns the largest packet number in the set.
    pub fn last(&self) -> Option<u64> {
        self.inner.values().next_back().copied()
    }

    /// Returns the number of intervals.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates over the intervals in ascending order.
    pub fn iter(&self) -> Iter {
        Iter {
            inner: self.inner.iter(),
        }
    }

    fn prev_to(&self, item: u64) -> Option<(u64, u64)> {
        self.inner
            .range(..=item)
            .map(|(&s, &e)| (s, e))
            .next_back()
    }

    fn next_to(&self, item: u64) -> Option<(u64, u64)> {
        self.inner.range(item..).map(|(&s, &e)| (s, e)).next()
    }
}

impl Default for IntervalSet {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

impl std::fmt::Debug for IntervalSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

pub struct Iter<'a> {
    inner: btree_map::Iter<'a, u64, u64>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = RangeInclusive<u64>;

    fn next(&mut self) -> Option<RangeInclusive<u64>> {
        let (&start, &end) = self.inner.next()?;
        Some(start..=end)
    }
}

impl<'a> DoubleEndedIterator for Iter<'a> {
    fn next_back(&mut self) -> Option<RangeInclusive<u64>> {
        let (&start, &end) = self.inner.next_back()?;
        Some(start..=end)
    }
}

impl<'a> ExactSizeIterator for Iter<'a> {
    fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intervals(s: &IntervalSet) -> Vec<RangeInclusive<u64>> {
        s.iter().collect()
    }

    #[test]
    fn insert_disjoint() {
        let mut s = IntervalSet::default();
        assert!(s.is_empty());

        s.insert(4..=6);
        s.insert(9..=11);
        assert_eq!(intervals(&s), vec![4..=6, 9..=11]);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn insert_merges_adjacent() {
        let mut s = IntervalSet::default();

        s.insert(4..=6);
        s.insert(7..=8);
        assert_eq!(intervals(&s), vec![4..=8]);

        s.insert(1..=3);
        assert_eq!(intervals(&s), vec![1..=8]);
    }

    #[test]
    fn insert_merges_overlapping() {
        let mut s = IntervalSet::default();

        s.insert(3..=5);
        s.insert(10..=10);
        s.insert(13..=13);
        s.insert(16..=19);
        assert_eq!(s.len(), 4);

        s.insert(4..=16);
        assert_eq!(intervals(&s), vec![3..=19]);

        s.insert(5..=7);
        assert_eq!(intervals(&s), vec![3..=19]);
    }

    #[test]
    fn push_item() {
        let mut s = IntervalSet::default();

        for pn in [1, 2, 3, 5, 7, 6] {
            s.push_item(pn);
        }

        assert_eq!(intervals(&s), vec![1..=3, 5..=7]);

        s.push_item(4);
        assert_eq!(intervals(&s), vec![1..=7]);
    }

    #[test]
    fn withdraw_splits() {
        let mut s = IntervalSet::default();

        s.insert(0..=20);
        s.withdraw(5..=9);
        assert_eq!(intervals(&s), vec![0..=4, 10..=20]);

        s.withdraw(20..=30);
        assert_eq!(intervals(&s), vec![0..=4, 10..=19]);

        s.withdraw(0..=0);
        assert_eq!(intervals(&s), vec![1..=4, 10..=19]);
    }

    #[test]
    fn withdraw_across_intervals() {
        let mut s = IntervalSet::default();

        s.insert(1..=3);
        s.insert(6..=8);
        s.insert(11..=15);
        s.insert(20..=25);

        s.withdraw(2..=12);
        assert_eq!(intervals(&s), vec![1..=1, 13..=15, 20..=25]);

        s.withdraw(0..=30);
        assert!(s.is_empty());
    }

    #[test]
    fn withdraw_missing_is_noop() {
        let mut s = IntervalSet::default();

        s.insert(10..=12);
        s.withdraw(0..=9);
        s.withdraw(13..=100);
        assert_eq!(intervals(&s), vec![10..=12]);
    }

    #[test]
    fn contains() {
        let mut s = IntervalSet::default();

        s.insert(4..=6);
        s.insert(9..=9);

        assert!(!s.contains(3));
        assert!(s.contains(4));
        assert!(s.contains(6));
        assert!(!s.contains(7));
        assert!(s.contains(9));
        assert!(!s.contains(10));
    }

    #[test]
    fn first_last() {
        let mut s = IntervalSet::default();
        assert_eq!(s.first(), None);
        assert_eq!(s.last(), None);

        s.insert(10..=10);
        s.insert(3..=5);
        s.insert(16..=19);
        assert_eq!(s.first(), Some(3));
        assert_eq!(s.last(), Some(19));
        assert_eq!(s.iter().next_back(), Some(16..=19));
    }

    #[test]
    fn capacity() {
        let mut s = IntervalSet::new(3);

        s.insert(10..=10);
        s.insert(13..=13);
        s.insert(3..=5);
        assert_eq!(s.first(), Some(3));

        s.insert(16..=19);
        assert_eq!(intervals(&s), vec![10..=10, 13..=13, 16..=19]);
    }

    #[test]
    fn debug_fmt() {
        let mut s = IntervalSet::default();

        s.insert(1..=2);
        s.insert(5..=5);
        assert_eq!(format!("{s:?}"), "[1..=2, 5..=5]");
    }
}
