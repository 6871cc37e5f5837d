//! Which quorum owners have approved a digest.

/// Approval bits over owner indices.
///
/// Owner index `i` refers to the `i`-th owner in ascending address order,
/// so [`ApprovalBitfield::set_indices`] yields approvers in the order the
/// quorum contract expects their signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalBitfield {
    words: Vec<u64>,
    num_owners: usize,
}

impl ApprovalBitfield {
    pub fn new(num_owners: usize) -> Self {
        Self {
            words: vec![0; num_owners.div_ceil(64)],
            num_owners,
        }
    }

    /// Mark the owner at `index` as approved. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize) {
        if index < self.num_owners {
            self.words[index / 64] |= 1 << (index % 64);
        }
    }

    fn is_set(&self, index: usize) -> bool {
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Approving owner indices, ascending.
    pub fn set_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_owners).filter(|&i| self.is_set(i))
    }

    /// Whether at least `threshold` owners have approved.
    pub fn meets(&self, threshold: usize) -> bool {
        self.count_ones() >= threshold
    }
}
