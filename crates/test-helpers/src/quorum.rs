//! In-memory threshold-approval contract.

use crate::chain::ChainState;
use arbiter_core::abi::{keccak256, uint_word};
use arbiter_core::{LedgerError, QuorumContract, SafeTransaction};
use arbiter_types::{Address, Hash};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Length of one approved-hash signature entry.
const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Clone)]
pub(crate) struct QuorumState {
    /// Owners in deployment order (not sorted).
    pub(crate) owners: Vec<Address>,
    pub(crate) threshold: u64,
    pub(crate) nonce: u64,
    pub(crate) approvals: BTreeSet<(Address, Hash)>,
}

impl QuorumState {
    pub(crate) fn new(owners: Vec<Address>, threshold: u64) -> Self {
        Self {
            owners,
            threshold,
            nonce: 0,
            approvals: BTreeSet::new(),
        }
    }

    /// Validate an approved-hash signature blob sent by `sender`.
    ///
    /// Entries must name strictly ascending owners, each of which either sent
    /// the execution itself or approved `digest` on-chain.
    pub(crate) fn check_signatures(
        &self,
        sender: Address,
        digest: Hash,
        signatures: &[u8],
    ) -> Result<(), LedgerError> {
        if signatures.len() % SIGNATURE_LEN != 0 {
            return Err(LedgerError::Reverted("GS020".into()));
        }
        let mut last = Address::ZERO;
        let mut count = 0u64;
        for entry in signatures.chunks(SIGNATURE_LEN) {
            if entry[32..64].iter().any(|&b| b != 0) || entry[64] != 1 {
                return Err(LedgerError::Reverted("GS021".into()));
            }
            let mut raw = [0u8; 20];
            raw.copy_from_slice(&entry[12..32]);
            let owner = Address::new(raw);
            if owner <= last || !self.owners.contains(&owner) {
                return Err(LedgerError::Reverted("GS026".into()));
            }
            if owner != sender && !self.approvals.contains(&(owner, digest)) {
                return Err(LedgerError::Reverted("GS025".into()));
            }
            last = owner;
            count += 1;
        }
        if count < self.threshold {
            return Err(LedgerError::Reverted("GS020".into()));
        }
        Ok(())
    }
}

/// Digest of `tx` proposed to the quorum at `safe`.
pub fn quorum_digest(safe: Address, tx: &SafeTransaction) -> Hash {
    let mut buf = Vec::with_capacity(32 * 5);
    buf.extend_from_slice(&safe.to_word());
    buf.extend_from_slice(&tx.to.to_word());
    buf.extend_from_slice(&uint_word(tx.value));
    buf.extend_from_slice(&keccak256(&tx.data));
    buf.extend_from_slice(&uint_word(tx.nonce as u128));
    Hash::from_raw(keccak256(&buf))
}

/// Handle to a quorum contract living in a [`crate::MockChain`].
#[derive(Debug, Clone)]
pub struct MockQuorum {
    state: Arc<Mutex<ChainState>>,
    address: Address,
}

impl MockQuorum {
    pub(crate) fn new(state: Arc<Mutex<ChainState>>, address: Address) -> Self {
        Self { state, address }
    }

    fn read<T>(&self, f: impl FnOnce(&QuorumState) -> T) -> Result<T, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        st.quorums
            .get(&self.address)
            .map(f)
            .ok_or_else(|| LedgerError::Reverted("call to non-contract".into()))
    }
}

#[async_trait]
impl QuorumContract for MockQuorum {
    fn address(&self) -> Address {
        self.address
    }

    async fn nonce(&self) -> Result<u64, LedgerError> {
        self.read(|q| q.nonce)
    }

    async fn get_transaction_hash(&self, tx: &SafeTransaction) -> Result<Hash, LedgerError> {
        self.read(|_| quorum_digest(self.address, tx))
    }

    async fn approved_hashes(&self, owner: Address, digest: Hash) -> Result<bool, LedgerError> {
        self.read(|q| q.approvals.contains(&(owner, digest)))
    }

    async fn get_owners(&self) -> Result<Vec<Address>, LedgerError> {
        self.read(|q| q.owners.clone())
    }

    async fn get_threshold(&self) -> Result<u64, LedgerError> {
        self.read(|q| q.threshold)
    }

    async fn is_owner(&self, addr: Address) -> Result<bool, LedgerError> {
        self.read(|q| q.owners.contains(&addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(owner: Address) -> Vec<u8> {
        let mut out = owner.to_word().to_vec();
        out.extend_from_slice(&[0u8; 32]);
        out.push(1);
        out
    }

    #[test]
    fn test_signatures_must_ascend() {
        let (a, b) = (Address::from_low_u8(1), Address::from_low_u8(2));
        let mut q = QuorumState::new(vec![b, a], 2);
        let digest = Hash::from_bytes(b"d");
        q.approvals.insert((a, digest));
        q.approvals.insert((b, digest));

        let ascending = [entry(a), entry(b)].concat();
        assert!(q.check_signatures(Address::ZERO, digest, &ascending).is_ok());

        let descending = [entry(b), entry(a)].concat();
        assert!(q.check_signatures(Address::ZERO, digest, &descending).is_err());
    }

    #[test]
    fn test_sender_counts_without_approval() {
        let (a, b) = (Address::from_low_u8(1), Address::from_low_u8(2));
        let mut q = QuorumState::new(vec![a, b], 2);
        let digest = Hash::from_bytes(b"d");
        q.approvals.insert((a, digest));

        let blob = [entry(a), entry(b)].concat();
        assert!(q.check_signatures(Address::ZERO, digest, &blob).is_err());
        assert!(q.check_signatures(b, digest, &blob).is_ok());
    }

    #[test]
    fn test_below_threshold_rejected() {
        let a = Address::from_low_u8(1);
        let mut q = QuorumState::new(vec![a, Address::from_low_u8(2)], 2);
        let digest = Hash::from_bytes(b"d");
        q.approvals.insert((a, digest));
        assert!(q.check_signatures(Address::ZERO, digest, &entry(a)).is_err());
    }
}
