//! Approval tracking for one quorum digest.

use arbiter_types::{Address, ApprovalBitfield, Hash};

/// Tag byte marking a signature entry as "approved via on-chain digest
/// record" rather than a cryptographic signature.
pub const APPROVED_HASH_SIGNATURE_TAG: u8 = 1;

/// Length of one signature entry.
pub const SIGNATURE_ENTRY_LEN: usize = 65;

/// Signature entry for an owner that approved on-chain: the owner address
/// as a left-padded word, a zero word, then the tag byte.
pub fn approved_hash_signature(owner: &Address) -> [u8; SIGNATURE_ENTRY_LEN] {
    let mut entry = [0u8; SIGNATURE_ENTRY_LEN];
    entry[..32].copy_from_slice(&owner.to_word());
    entry[64] = APPROVED_HASH_SIGNATURE_TAG;
    entry
}

/// Tracks which owners have approved a digest.
///
/// Owners are held in ascending address order, so the signature blob built
/// by [`ApprovalTracker::signatures`] is ordered the way the quorum contract
/// requires.
#[derive(Debug)]
pub struct ApprovalTracker<'a> {
    /// Digest being approved.
    digest: Hash,
    /// Owners, ascending.
    owners: &'a [Address],
    /// Which owners approved.
    approved: ApprovalBitfield,
    /// Approvals required.
    threshold: u64,
}

impl<'a> ApprovalTracker<'a> {
    /// Create a tracker.
    ///
    /// # Arguments
    ///
    /// * `digest` - The action digest being approved
    /// * `owners` - Quorum owners, sorted ascending
    /// * `threshold` - Approvals required to execute
    pub fn new(digest: Hash, owners: &'a [Address], threshold: u64) -> Self {
        debug_assert!(owners.windows(2).all(|w| w[0] < w[1]), "owners must be sorted");
        Self {
            digest,
            owners,
            approved: ApprovalBitfield::new(owners.len()),
            threshold,
        }
    }

    /// Get the digest this tracker is for.
    pub fn digest(&self) -> Hash {
        self.digest
    }

    /// Record that the owner at `index` approved.
    pub fn record(&mut self, index: usize) {
        self.approved.set(index);
    }

    /// Number of approvals recorded.
    pub fn approval_count(&self) -> usize {
        self.approved.count_ones()
    }

    /// Whether enough owners approved.
    pub fn has_quorum(&self) -> bool {
        self.approved.meets(self.threshold as usize)
    }

    /// Approving owners in ascending order.
    pub fn approvers(&self) -> impl Iterator<Item = &Address> + '_ {
        self.approved.set_indices().map(|i| &self.owners[i])
    }

    /// Concatenated signature entries of every approving owner.
    pub fn signatures(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.approval_count() * SIGNATURE_ENTRY_LEN);
        for owner in self.approvers() {
            out.extend_from_slice(&approved_hash_signature(owner));
        }
        out
    }
}
