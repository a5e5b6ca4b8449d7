//! Counted multiset of training-sample indices, one per tree.

use crate::random::Fnv1a;

/// Largest number of times one sample may appear in a bag.
///
/// Matches the 3-bit per-sample counters used on the device side.
pub const MAX_MULTIPLICITY: u8 = 7;

/// Per-tree sample membership with bounded multiplicity.
///
/// Members are indices into the training dataset. Iteration yields each
/// member in ascending order, repeated by its count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bag {
    counts: Vec<u8>,
    len: usize,
}

impl Bag {
    /// Create an empty bag over a universe of `universe` sample indices.
    #[must_use]
    pub fn new(universe: usize) -> Self {
        Self {
            counts: vec![0; universe],
            len: 0,
        }
    }

    /// Add one occurrence of `index`.
    ///
    /// Returns `false` without changing the bag when `index` is already at
    /// [`MAX_MULTIPLICITY`].
    pub(crate) fn try_insert(&mut self, index: usize) -> bool {
        let slot = &mut self.counts[index];
        if *slot >= MAX_MULTIPLICITY {
            return false;
        }
        *slot += 1;
        self.len += 1;
        true
    }

    pub(crate) fn clear(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.len = 0;
    }

    /// Return how many times `index` was drawn.
    #[must_use]
    pub fn count(&self, index: usize) -> u8 {
        self.counts.get(index).copied().unwrap_or(0)
    }

    /// Return `true` if `index` was drawn at least once.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.count(index) > 0
    }

    /// Total number of draws, counting repeats.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Return `true` if nothing was drawn.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the index universe the bag was drawn from.
    #[must_use]
    pub fn universe(&self) -> usize {
        self.counts.len()
    }

    /// Number of distinct members.
    #[must_use]
    pub fn distinct(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 0).count()
    }

    /// Members in ascending order, each repeated by its count.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.counts
            .iter()
            .enumerate()
            .flat_map(|(i, &c)| std::iter::repeat_n(i, c as usize))
    }

    /// Indices of the universe that were never drawn.
    pub fn out_of_bag(&self) -> impl Iterator<Item = usize> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == 0)
            .map(|(i, _)| i)
    }

    /// Materialize [`Bag::iter`] into a vector.
    #[must_use]
    pub fn to_indices(&self) -> Vec<usize> {
        self.iter().collect()
    }

    /// FNV-1a over the members (as `u32`) followed by the draw count (as `u64`).
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Fnv1a::new();
        for index in self.iter() {
            hasher.write_u32(index as u32);
        }
        hasher.write_u64(self.len as u64);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_counts_and_len() {
        let mut bag = Bag::new(4);
        assert!(bag.try_insert(2));
        assert!(bag.try_insert(2));
        assert!(bag.try_insert(0));
        assert_eq!(bag.count(2), 2);
        assert_eq!(bag.len(), 3);
        assert_eq!(bag.distinct(), 2);
        assert_eq!(bag.to_indices(), vec![0, 2, 2]);
    }

    #[test]
    fn multiplicity_is_capped() {
        let mut bag = Bag::new(1);
        for _ in 0..MAX_MULTIPLICITY {
            assert!(bag.try_insert(0));
        }
        assert!(!bag.try_insert(0));
        assert_eq!(bag.count(0), MAX_MULTIPLICITY);
        assert_eq!(bag.len(), MAX_MULTIPLICITY as usize);
    }

    #[test]
    fn out_of_bag_complements_members() {
        let mut bag = Bag::new(5);
        bag.try_insert(1);
        bag.try_insert(3);
        let oob: Vec<usize> = bag.out_of_bag().collect();
        assert_eq!(oob, vec![0, 2, 4]);
    }

    #[test]
    fn fingerprint_depends_on_multiplicity() {
        let mut a = Bag::new(3);
        a.try_insert(0);
        a.try_insert(1);
        let mut b = Bag::new(3);
        b.try_insert(0);
        b.try_insert(0);
        assert_ne!(a.fingerprint(), b.fingerprint());

        let mut c = Bag::new(3);
        c.try_insert(1);
        c.try_insert(0);
        assert_eq!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn clear_resets() {
        let mut bag = Bag::new(2);
        bag.try_insert(1);
        bag.clear();
        assert!(bag.is_empty());
        assert!(!bag.contains(1));
    }
}
