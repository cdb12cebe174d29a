//! Ordered, duplicate-free sets of logical CPU identifiers.
//!
//! A [`CpuSet`] is what the selector hands back to callers. It renders to and parses from the
//! Linux cpulist format (`0-3,8,10-11`), which is what cgroup `cpuset.cpus` and `taskset -c`
//! accept, so a launcher can apply it without further translation.

use std::collections::btree_set;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::select::{self, SharingPolicy};
use crate::topology::CpuInfo;

/// Widest `a-b` range a cpulist may contain.
pub const MAX_RANGE_WIDTH: usize = 1 << 16;

/// An ordered set of logical CPU identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuSet {
    cpus: BTreeSet<usize>,
}

impl CpuSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether the given logical CPU is in the set
    pub fn contains(&self, cpu: usize) -> bool {
        self.cpus.contains(&cpu)
    }

    /// Number of logical CPUs in the set
    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    /// Whether the set holds no CPUs
    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    /// Add a CPU. Returns `false` if it was already present, in which case nothing changes.
    pub fn insert(&mut self, cpu: usize) -> bool {
        self.cpus.insert(cpu)
    }

    /// Remove a CPU. Returns `true` if it was present.
    pub fn remove(&mut self, cpu: usize) -> bool {
        self.cpus.remove(&cpu)
    }

    /// Remove every CPU
    pub fn clear(&mut self) {
        self.cpus.clear();
    }

    /// Iterate in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.cpus.iter().copied()
    }

    /// Collect the members in ascending order
    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }

    /// Lowest CPU in the set, if any
    pub fn first(&self) -> Option<usize> {
        self.cpus.first().copied()
    }

    /// CPUs present in either set
    pub fn union(&self, other: &CpuSet) -> CpuSet {
        self.cpus.union(&other.cpus).copied().collect()
    }

    /// CPUs present in both sets
    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        self.cpus.intersection(&other.cpus).copied().collect()
    }

    /// CPUs present in `self` but not in `other`
    pub fn difference(&self, other: &CpuSet) -> CpuSet {
        self.cpus.difference(&other.cpus).copied().collect()
    }

    /// Whether the two sets share no CPU
    pub fn is_disjoint(&self, other: &CpuSet) -> bool {
        self.cpus.is_disjoint(&other.cpus)
    }

    /// Fill this set with `count` CPUs from `topology` that satisfy `policy`.
    ///
    /// On success the set holds exactly the selection; whatever it held before is replaced.
    /// On failure the set is left exactly as it was.
    pub fn select(
        &mut self,
        topology: &CpuInfo,
        count: usize,
        policy: SharingPolicy,
    ) -> Result<()> {
        let selected = select::select_cpus(topology, count, policy)?;
        *self = selected;
        Ok(())
    }

    /// Translate the set into `core_affinity` identifiers for a pinning collaborator.
    ///
    /// Nothing is pinned here.
    pub fn to_core_ids(&self) -> Vec<core_affinity::CoreId> {
        self.iter().map(|id| core_affinity::CoreId { id }).collect()
    }

    /// Parse a Linux cpulist such as `"0-2,4,6-10:2"`.
    pub fn parse_cpulist(cpulist: &str) -> Result<Self> {
        let mut set = CpuSet::new();
        let trimmed = cpulist.trim();
        if trimmed.is_empty() {
            return Ok(set);
        }

        for part in trimmed.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(Error::invalid_cpulist(cpulist, "empty element"));
            }

            let (range, stride) = match part.split_once(':') {
                Some((range, stride)) => (range, parse_number(part, stride)?),
                None => (part, 1),
            };
            if stride == 0 {
                return Err(Error::invalid_cpulist(part, "stride must be positive"));
            }

            match range.split_once('-') {
                Some((start, end)) => {
                    let start = parse_number(part, start)?;
                    let end = parse_number(part, end)?;
                    if end < start {
                        return Err(Error::invalid_cpulist(part, "range end is before its start"));
                    }
                    if end - start >= MAX_RANGE_WIDTH {
                        return Err(Error::invalid_cpulist(
                            part,
                            format!("range spans more than {MAX_RANGE_WIDTH} CPUs"),
                        ));
                    }
                    set.extend((start..=end).step_by(stride));
                }
                None => {
                    if stride != 1 {
                        return Err(Error::invalid_cpulist(part, "stride without a range"));
                    }
                    set.insert(parse_number(part, range)?);
                }
            }
        }

        Ok(set)
    }
}

fn parse_number(part: &str, text: &str) -> Result<usize> {
    text.trim()
        .parse::<usize>()
        .map_err(|e| {
            let problem = format!("'{}' is not a CPU number: {e}", text.trim());
            Error::invalid_cpulist(part, problem)
        })
}

impl fmt::Display for CpuSet {
    /// Renders the cpulist form, collapsing consecutive runs into ranges.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.iter().peekable();
        let mut first = true;

        while let Some(start) = iter.next() {
            let mut end = start;
            while let Some(next) = end.checked_add(1).filter(|next| iter.peek() == Some(next)) {
                end = next;
                iter.next();
            }

            if !first {
                f.write_str(",")?;
            }
            first = false;

            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }

        Ok(())
    }
}

impl FromStr for CpuSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_cpulist(s)
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self {
            cpus: iter.into_iter().collect(),
        }
    }
}

impl Extend<usize> for CpuSet {
    fn extend<I: IntoIterator<Item = usize>>(&mut self, iter: I) {
        self.cpus.extend(iter);
    }
}

impl<'a> IntoIterator for &'a CpuSet {
    type Item = usize;
    type IntoIter = std::iter::Copied<btree_set::Iter<'a, usize>>;

    fn into_iter(self) -> Self::IntoIter {
        self.cpus.iter().copied()
    }
}

impl IntoIterator for CpuSet {
    type Item = usize;
    type IntoIter = btree_set::IntoIter<usize>;

    fn into_iter(self) -> Self::IntoIter {
        self.cpus.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut set = CpuSet::new();
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert_eq!(set.len(), 1);
        assert!(set.contains(3));
        assert!(!set.contains(4));
    }

    #[test]
    fn test_iterates_in_ascending_order() {
        let set: CpuSet = [9, 1, 5, 1, 0].into_iter().collect();
        assert_eq!(set.to_vec(), vec![0, 1, 5, 9]);
        assert_eq!((&set).into_iter().collect::<Vec<_>>(), vec![0, 1, 5, 9]);
        assert_eq!(set.first(), Some(0));
    }

    #[test]
    fn test_set_algebra() {
        let a: CpuSet = [0, 1, 2, 3].into_iter().collect();
        let b: CpuSet = [2, 3, 4].into_iter().collect();

        assert_eq!(a.union(&b).to_vec(), vec![0, 1, 2, 3, 4]);
        assert_eq!(a.intersection(&b).to_vec(), vec![2, 3]);
        assert_eq!(a.difference(&b).to_vec(), vec![0, 1]);
        assert!(!a.is_disjoint(&b));
        assert!(a.difference(&b).is_disjoint(&b));
    }

    #[test]
    fn test_display_collapses_ranges() {
        let set: CpuSet = [0, 1, 2, 3, 8, 10, 11].into_iter().collect();
        assert_eq!(set.to_string(), "0-3,8,10-11");
        assert_eq!(CpuSet::new().to_string(), "");
        let single: CpuSet = [7].into_iter().collect();
        assert_eq!(single.to_string(), "7");
    }

    #[test]
    fn test_parse_cpulist() {
        assert_eq!(CpuSet::parse_cpulist("0-2,4,6-8").unwrap().to_vec(), vec![0, 1, 2, 4, 6, 7, 8]);
        assert_eq!(CpuSet::parse_cpulist("0").unwrap().to_vec(), vec![0]);
        assert_eq!(CpuSet::parse_cpulist("0-3\n").unwrap().to_vec(), vec![0, 1, 2, 3]);
        assert_eq!(CpuSet::parse_cpulist("0-10:4").unwrap().to_vec(), vec![0, 4, 8]);
        assert!(CpuSet::parse_cpulist("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_cpulist_rejects_garbage() {
        for bad in ["a", "3-1", "0,,1", "0-4:0", "5:2", "1-", "-1"] {
            let result = bad.parse::<CpuSet>();
            assert!(
                matches!(result, Err(Error::InvalidCpuList { .. })),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_parse_cpulist_rejects_huge_range() {
        let result = CpuSet::parse_cpulist(&format!("0-{}", usize::MAX));
        assert!(matches!(result, Err(Error::InvalidCpuList { .. })));

        let widest = format!("0-{}", MAX_RANGE_WIDTH - 1);
        assert_eq!(CpuSet::parse_cpulist(&widest).unwrap().len(), MAX_RANGE_WIDTH);
    }

    #[test]
    fn test_display_at_usize_max() {
        let set: CpuSet = usize::MAX.to_string().parse().unwrap();
        assert_eq!(set.to_string(), usize::MAX.to_string());

        let tail: CpuSet = [usize::MAX - 1, usize::MAX, 3].into_iter().collect();
        let text = tail.to_string();
        assert_eq!(text, format!("3,{}-{}", usize::MAX - 1, usize::MAX));
        assert_eq!(text.parse::<CpuSet>().unwrap(), tail);
    }

    #[test]
    fn test_display_parses_back() {
        let set: CpuSet = [0, 2, 3, 4, 15].into_iter().collect();
        assert_eq!(set.to_string().parse::<CpuSet>().unwrap(), set);
    }

    #[test]
    fn test_to_core_ids() {
        let set: CpuSet = [4, 1].into_iter().collect();
        let ids: Vec<usize> = set.to_core_ids().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[test]
    fn test_select_replaces_contents_on_success() {
        let topology = CpuInfo::synthetic(1, 2, 2);
        let mut set: CpuSet = [3].into_iter().collect();

        set.select(&topology, 2, SharingPolicy::ShareLLCButNotL1L2).unwrap();
        assert_eq!(set.to_vec(), vec![0, 1]);
    }

    #[test]
    fn test_select_leaves_set_untouched_on_failure() {
        let topology = CpuInfo::synthetic(1, 2, 2);
        let mut set: CpuSet = [3].into_iter().collect();

        assert!(set.select(&topology, 3, SharingPolicy::ShareLLCButNotL1L2).is_err());
        assert!(set.select(&topology, 0, SharingPolicy::ShareL1L2).is_err());
        assert_eq!(set.to_vec(), vec![3]);
    }
}
