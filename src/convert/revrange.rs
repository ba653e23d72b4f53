//! Closed revision-range sets and the per-subpath mergeinfo tree built on top
//! of them. A [`RangeSet`] is always kept sorted and merged: no two stored
//! ranges are adjacent or overlapping, so `parse`/`serialize` round-trip the
//! `lo-hi,lo-hi,...` grammar `svn:mergeinfo` uses for a single path, and
//! `combine`/`subtract`/`contains` can all assume that normal form.

use crate::FHashMap;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(super) struct RangeSet {
    ranges: Vec<std::ops::RangeInclusive<u32>>,
}

impl RangeSet {
    pub(super) fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    pub(super) fn from_ranges(
        ranges: impl IntoIterator<Item = std::ops::RangeInclusive<u32>>,
    ) -> Self {
        let mut set = Self::new();
        for r in ranges {
            set.insert(r);
        }
        set
    }

    pub(super) fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub(super) fn ranges(&self) -> &[std::ops::RangeInclusive<u32>] {
        &self.ranges
    }

    pub(super) fn insert(&mut self, range: std::ops::RangeInclusive<u32>) {
        if range.is_empty() {
            return;
        }
        self.ranges.push(range);
        self.normalize();
    }

    pub(super) fn contains(&self, rev: u32) -> bool {
        self.ranges
            .binary_search_by(|r| {
                if rev < *r.start() {
                    std::cmp::Ordering::Greater
                } else if rev > *r.end() {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    pub(super) fn contains_range(&self, other: &RangeSet) -> bool {
        other
            .ranges
            .iter()
            .all(|r| (*r.start()..=*r.end()).all(|rev| self.contains(rev)))
    }

    /// Union: every revision present in either set.
    pub(super) fn combine(&self, other: &RangeSet) -> RangeSet {
        let mut ranges = self.ranges.clone();
        ranges.extend(other.ranges.iter().cloned());
        let mut set = RangeSet { ranges };
        set.normalize();
        set
    }

    /// Every revision present in `self` but not in `other`.
    pub(super) fn subtract(&self, other: &RangeSet) -> RangeSet {
        let mut result = Vec::new();
        for r in &self.ranges {
            let mut cur_lo = *r.start();
            let cur_hi = *r.end();
            for o in &other.ranges {
                if *o.end() < cur_lo || *o.start() > cur_hi {
                    continue;
                }
                if *o.start() > cur_lo {
                    result.push(cur_lo..=(*o.start() - 1));
                }
                cur_lo = o.end().saturating_add(1);
                if cur_lo > cur_hi {
                    break;
                }
            }
            if cur_lo <= cur_hi {
                result.push(cur_lo..=cur_hi);
            }
        }
        RangeSet { ranges: result }
    }

    /// Sorts ranges and merges overlapping/directly-adjacent ones. Called
    /// automatically by `insert`/`combine`; exposed so mergeinfo parsed
    /// incrementally (one `path:ranges` line at a time, not merged as it
    /// goes) can be normalized once at the end.
    pub(super) fn normalize(&mut self) {
        self.ranges.sort_by_key(|r| (*r.start(), *r.end()));
        let mut merged: Vec<std::ops::RangeInclusive<u32>> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if *r.start() <= last.end().saturating_add(1) => {
                    if *r.end() > *last.end() {
                        *last = *last.start()..=*r.end();
                    }
                }
                _ => merged.push(r),
            }
        }
        self.ranges = merged;
    }

    pub(super) fn parse(s: &[u8]) -> Option<Self> {
        let mut set = Self::new();
        for raw_range in s.split(|&c| c == b',') {
            let raw_range = raw_range.strip_suffix(b"*").unwrap_or(raw_range);
            if raw_range.is_empty() {
                continue;
            }
            let text = std::str::from_utf8(raw_range).ok()?;
            let (lo, hi) = if let Some((lo, hi)) = text.split_once('-') {
                (lo.parse::<u32>().ok()?, hi.parse::<u32>().ok()?)
            } else {
                let n = text.parse::<u32>().ok()?;
                (n, n)
            };
            if lo > hi {
                return None;
            }
            set.ranges.push(lo..=hi);
        }
        set.normalize();
        Some(set)
    }

    pub(super) fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for (i, r) in self.ranges.iter().enumerate() {
            if i != 0 {
                out.push(b',');
            }
            if r.start() == r.end() {
                out.extend(r.start().to_string().into_bytes());
            } else {
                out.extend(r.start().to_string().into_bytes());
                out.push(b'-');
                out.extend(r.end().to_string().into_bytes());
            }
        }
        out
    }
}

/// Reserved subpath keys in [`TreeMergeinfo`]: `""` holds the mergeinfo
/// recorded directly on a directory's own `svn:mergeinfo` property, `".."`
/// holds mergeinfo inherited from an ancestor directory that has not been
/// overridden below it. Every other key is a real relative subpath.
pub(super) const OWN_KEY: &[u8] = b"";
pub(super) const INHERITED_KEY: &[u8] = b"..";

/// A directory's mergeinfo, broken down per subpath (including the two
/// reserved keys above) so that a merge source recorded against a
/// particular branch subtree can be distinguished from mergeinfo recorded
/// against the directory itself or inherited from further up.
#[derive(Clone, Debug, Default)]
pub(super) struct TreeMergeinfo {
    by_subpath: FHashMap<Vec<u8>, RangeSet>,
}

impl TreeMergeinfo {
    pub(super) fn new() -> Self {
        Self {
            by_subpath: FHashMap::default(),
        }
    }

    pub(super) fn own(&self) -> &RangeSet {
        static EMPTY: std::sync::OnceLock<RangeSet> = std::sync::OnceLock::new();
        self.by_subpath
            .get(OWN_KEY)
            .unwrap_or_else(|| EMPTY.get_or_init(RangeSet::new))
    }

    pub(super) fn inherited(&self) -> &RangeSet {
        static EMPTY: std::sync::OnceLock<RangeSet> = std::sync::OnceLock::new();
        self.by_subpath
            .get(INHERITED_KEY)
            .unwrap_or_else(|| EMPTY.get_or_init(RangeSet::new))
    }

    pub(super) fn at(&self, subpath: &[u8]) -> &RangeSet {
        static EMPTY: std::sync::OnceLock<RangeSet> = std::sync::OnceLock::new();
        self.by_subpath
            .get(subpath)
            .unwrap_or_else(|| EMPTY.get_or_init(RangeSet::new))
    }

    pub(super) fn set_own(&mut self, ranges: RangeSet) {
        self.by_subpath.insert(OWN_KEY.to_vec(), ranges);
    }

    pub(super) fn set_inherited(&mut self, ranges: RangeSet) {
        self.by_subpath.insert(INHERITED_KEY.to_vec(), ranges);
    }

    pub(super) fn set_at(&mut self, subpath: Vec<u8>, ranges: RangeSet) {
        self.by_subpath.insert(subpath, ranges);
    }

    /// The effective mergeinfo for `subpath`, folding in inherited ranges
    /// that aren't already covered by `subpath`'s own entry.
    pub(super) fn effective(&self, subpath: &[u8]) -> RangeSet {
        self.at(subpath).combine(self.inherited())
    }

    /// The full `own` + `inherited` view used when recording mergeinfo on
    /// the directory itself (subpath `""`).
    pub(super) fn flatten(&self) -> RangeSet {
        self.own().combine(self.inherited())
    }

    /// Revisions present in `new_state` that were not already covered by
    /// this mergeinfo's effective ranges for `subpath` — the set of newly
    /// merged revisions a `svn:mergeinfo` change at `subpath` represents.
    pub(super) fn get_diff(&self, subpath: &[u8], new_state: &RangeSet) -> RangeSet {
        new_state.subtract(&self.effective(subpath))
    }

    pub(super) fn normalize(&mut self) {
        for ranges in self.by_subpath.values_mut() {
            ranges.normalize();
        }
        self.by_subpath.retain(|_, ranges| !ranges.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::RangeSet;

    #[test]
    fn parse_serialize_round_trip() {
        let set = RangeSet::parse(b"1-3,5,8-10").unwrap();
        assert_eq!(set.serialize(), b"1-3,5,8-10");
    }

    #[test]
    fn normalize_merges_adjacent_and_overlapping() {
        let set = RangeSet::from_ranges([1..=3, 4..=6, 10..=12, 11..=15]);
        assert_eq!(set.serialize(), b"1-6,10-15");
    }

    // property 5: subtract(a, combine(a, b)) is always empty.
    #[test]
    fn subtract_of_combine_is_empty() {
        let a = RangeSet::parse(b"1-5,10").unwrap();
        let b = RangeSet::parse(b"3-8,20").unwrap();
        let combined = a.combine(&b);
        assert!(a.subtract(&combined).is_empty());
    }

    // property 6: after normalize(), no two ranges intersect or touch.
    #[test]
    fn normalized_ranges_never_intersect_or_touch() {
        let set = RangeSet::from_ranges([1..=3, 3..=5, 7..=7, 9..=20, 21..=25]);
        for pair in set.ranges().windows(2) {
            assert!(*pair[0].end() + 1 < *pair[1].start());
        }
    }

    #[test]
    fn subtract_splits_around_hole() {
        let a = RangeSet::parse(b"1-10").unwrap();
        let b = RangeSet::parse(b"4-6").unwrap();
        assert_eq!(a.subtract(&b).serialize(), b"1-3,7-10");
    }

    #[test]
    fn contains_checks_membership() {
        let set = RangeSet::parse(b"1-5,10").unwrap();
        assert!(set.contains(1));
        assert!(set.contains(5));
        assert!(set.contains(10));
        assert!(!set.contains(6));
        assert!(!set.contains(11));
    }
}
