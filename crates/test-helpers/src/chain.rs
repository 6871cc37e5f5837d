//! In-memory rollup ledger.
//!
//! `MockChain` keeps just enough ledger state to exercise the agent end to
//! end: a node tree, staker records, withdrawable balances, quorum contracts
//! and per-account nonces. Submitted transactions are applied atomically;
//! a revert anywhere in a wallet batch leaves the state untouched.

use crate::quorum::{quorum_digest, MockQuorum, QuorumState};
use arbiter_core::{
    Call, LedgerClient, LedgerError, OutgoingTx, QuorumConnector, QuorumContract, TxPayload,
    TxSubmitter,
};
use arbiter_types::{
    Address, Assertion, BlockNumber, ChallengeId, ConfirmType, ConflictKind, ConflictRecord,
    Hash, NodeNum, NodeRecord, StakerRecord, TxHash, Wei,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Module root recorded on every node created through the mock.
pub const MOCK_WASM_MODULE_ROOT: Hash = Hash::from_raw([0x77; 32]);

#[derive(Debug, Clone)]
struct MockNode {
    record: NodeRecord,
    parent: Option<NodeNum>,
    stakers: BTreeSet<Address>,
}

#[derive(Debug, Clone)]
pub(crate) struct ChainState {
    rollup: Address,
    nodes: BTreeMap<NodeNum, MockNode>,
    latest_confirmed: NodeNum,
    first_unresolved: NodeNum,
    staker_order: Vec<Address>,
    stakers: HashMap<Address, StakerRecord>,
    withdrawable: HashMap<Address, Wei>,
    balances: HashMap<Address, Wei>,
    nonces: HashMap<Address, u64>,
    pending_nonce_offset: HashMap<Address, i64>,
    required_stake: Wei,
    base_stake: Wei,
    whitelist_disabled: bool,
    whitelist: HashSet<Address>,
    fast_confirmer: Address,
    gas_price_gwei: f64,
    block: u64,
    successor_deployed: bool,
    decidable: ConfirmType,
    timed_out: Vec<ChallengeId>,
    scripted_conflicts: HashMap<(Address, Address), ConflictRecord>,
    next_challenge: u64,
    pub(crate) quorums: HashMap<Address, QuorumState>,
    sent: Vec<(TxHash, OutgoingTx)>,
    fail_next_send: Option<LedgerError>,
    pub(crate) offline: bool,
}

fn revert(reason: &str) -> LedgerError {
    LedgerError::Reverted(reason.to_string())
}

impl ChainState {
    fn new(rollup: Address) -> Self {
        let genesis = NodeRecord {
            num: NodeNum::GENESIS,
            parent_chain_block_proposed: BlockNumber(0),
            assertion: Assertion::default(),
            inbox_max_count: 1,
            node_hash: Hash::from_bytes(b"genesis"),
            wasm_module_root: MOCK_WASM_MODULE_ROOT,
        };
        let mut nodes = BTreeMap::new();
        nodes.insert(
            NodeNum::GENESIS,
            MockNode {
                record: genesis,
                parent: None,
                stakers: BTreeSet::new(),
            },
        );

        Self {
            rollup,
            nodes,
            latest_confirmed: NodeNum::GENESIS,
            first_unresolved: NodeNum(1),
            staker_order: Vec::new(),
            stakers: HashMap::new(),
            withdrawable: HashMap::new(),
            balances: HashMap::new(),
            nonces: HashMap::new(),
            pending_nonce_offset: HashMap::new(),
            required_stake: 1_000,
            base_stake: 1_000,
            whitelist_disabled: true,
            whitelist: HashSet::new(),
            fast_confirmer: Address::ZERO,
            gas_price_gwei: 1.0,
            block: 100,
            successor_deployed: false,
            decidable: ConfirmType::None,
            timed_out: Vec::new(),
            scripted_conflicts: HashMap::new(),
            next_challenge: 1,
            quorums: HashMap::new(),
            sent: Vec::new(),
            fail_next_send: None,
            offline: false,
        }
    }

    pub(crate) fn check_online(&self) -> Result<(), LedgerError> {
        if self.offline {
            Err(LedgerError::Transport("connection refused".into()))
        } else {
            Ok(())
        }
    }

    fn node(&self, num: NodeNum) -> Result<&MockNode, LedgerError> {
        self.nodes
            .get(&num)
            .ok_or_else(|| LedgerError::NotFound(format!("{num}")))
    }

    fn latest_node_created(&self) -> NodeNum {
        self.nodes.keys().next_back().copied().unwrap_or_default()
    }

    fn ancestors(&self, mut num: NodeNum) -> Vec<NodeNum> {
        let mut path = vec![num];
        while let Some(parent) = self.nodes.get(&num).and_then(|n| n.parent) {
            path.push(parent);
            num = parent;
        }
        path
    }

    fn check_whitelist(&self, sender: Address) -> Result<(), LedgerError> {
        if self.whitelist_disabled || self.whitelist.contains(&sender) {
            Ok(())
        } else {
            Err(revert("NOT_VALIDATOR"))
        }
    }

    fn create_node(
        &mut self,
        parent: NodeNum,
        assertion: Assertion,
        node_hash: Hash,
        inbox_max_count: u64,
    ) -> NodeNum {
        let num = self.latest_node_created().next();
        let record = NodeRecord {
            num,
            parent_chain_block_proposed: BlockNumber(self.block),
            assertion,
            inbox_max_count,
            node_hash,
            wasm_module_root: MOCK_WASM_MODULE_ROOT,
        };
        self.nodes.insert(
            num,
            MockNode {
                record,
                parent: Some(parent),
                stakers: BTreeSet::new(),
            },
        );
        num
    }

    fn stake_on(&mut self, staker: Address, node: NodeNum) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.stakers.insert(staker);
        }
    }

    fn new_stake(&mut self, staker: Address, value: Wei, node: NodeNum) -> Result<(), LedgerError> {
        if self.stakers.contains_key(&staker) {
            return Err(revert("ALREADY_STAKED"));
        }
        self.check_whitelist(staker)?;
        if value < self.required_stake {
            return Err(revert("NOT_ENOUGH_STAKE"));
        }
        self.stakers.insert(
            staker,
            StakerRecord {
                amount_staked: value,
                latest_staked_node: node,
                current_challenge: None,
            },
        );
        self.staker_order.push(staker);
        self.stake_on(staker, node);
        Ok(())
    }

    fn movable_stake(&self, staker: Address) -> Result<NodeNum, LedgerError> {
        let record = self.stakers.get(&staker).ok_or_else(|| revert("NOT_STAKED"))?;
        if record.in_challenge() {
            return Err(revert("IN_CHAL"));
        }
        Ok(record.latest_staked_node)
    }

    fn check_existing(&self, node: NodeNum, hash: Hash, parent: NodeNum) -> Result<(), LedgerError> {
        let n = self.node(node).map_err(|_| revert("NODE_NUM_OUT_OF_RANGE"))?;
        if n.record.node_hash != hash {
            return Err(revert("NODE_REORG"));
        }
        if n.parent != Some(parent) {
            return Err(revert("NOT_STAKED_PREV"));
        }
        Ok(())
    }

    fn confirm_first_unresolved(&mut self) {
        self.latest_confirmed = self.first_unresolved;
        self.first_unresolved = self.first_unresolved.next();
        self.decidable = ConfirmType::None;
    }

    fn apply_call(
        &mut self,
        sender: Address,
        to: Address,
        value: Wei,
        call: &Call,
    ) -> Result<(), LedgerError> {
        if call.is_quorum() {
            if !self.quorums.contains_key(&to) {
                return Err(revert("no quorum at target"));
            }
        } else if to != self.rollup {
            return Err(revert("wrong target"));
        }

        match call {
            Call::NewStakeOnExistingNode { node, node_hash } => {
                self.check_existing(*node, *node_hash, self.latest_confirmed)?;
                self.new_stake(sender, value, *node)
            }
            Call::NewStakeOnNewNode {
                assertion,
                expected_node_hash,
                prev_inbox_max_count,
            } => {
                let parent = self.latest_confirmed;
                let num = self.create_node(
                    parent,
                    *assertion,
                    *expected_node_hash,
                    prev_inbox_max_count + 1,
                );
                self.new_stake(sender, value, num)
            }
            Call::StakeOnExistingNode { node, node_hash } => {
                let current = self.movable_stake(sender)?;
                self.check_existing(*node, *node_hash, current)?;
                if let Some(rec) = self.stakers.get_mut(&sender) {
                    rec.latest_staked_node = *node;
                }
                self.stake_on(sender, *node);
                Ok(())
            }
            Call::StakeOnNewNode {
                assertion,
                expected_node_hash,
                prev_inbox_max_count,
            } => {
                let current = self.movable_stake(sender)?;
                let num = self.create_node(
                    current,
                    *assertion,
                    *expected_node_hash,
                    prev_inbox_max_count + 1,
                );
                if let Some(rec) = self.stakers.get_mut(&sender) {
                    rec.latest_staked_node = num;
                }
                self.stake_on(sender, num);
                Ok(())
            }
            Call::ReturnOldDeposit { staker } => {
                let record = self.stakers.get(staker).ok_or_else(|| revert("NOT_STAKED"))?;
                if record.latest_staked_node > self.latest_confirmed {
                    return Err(revert("TOO_RECENT"));
                }
                if record.in_challenge() {
                    return Err(revert("IN_CHAL"));
                }
                let amount = record.amount_staked;
                self.stakers.remove(staker);
                self.staker_order.retain(|s| s != staker);
                *self.withdrawable.entry(*staker).or_default() += amount;
                Ok(())
            }
            Call::WithdrawStakerFunds => {
                let amount = self.withdrawable.remove(&sender).unwrap_or(0);
                *self.balances.entry(sender).or_default() += amount;
                Ok(())
            }
            Call::ConfirmNextNode {
                block_hash,
                send_root,
            } => {
                if self.decidable != ConfirmType::Valid {
                    return Err(revert("NOT_DECIDABLE"));
                }
                let gs = self.node(self.first_unresolved)?.record.assertion.after_state.global_state;
                if gs.block_hash != *block_hash || gs.send_root != *send_root {
                    return Err(revert("CONFIRM_DATA"));
                }
                self.confirm_first_unresolved();
                Ok(())
            }
            Call::RejectNextNode { staker } => {
                if self.decidable != ConfirmType::Invalid {
                    return Err(revert("NOT_DECIDABLE"));
                }
                if !self.stakers.contains_key(staker) {
                    return Err(revert("NOT_STAKED"));
                }
                self.first_unresolved = self.first_unresolved.next();
                self.decidable = ConfirmType::None;
                Ok(())
            }
            Call::FastConfirmNextNode {
                block_hash,
                send_root,
                node_hash,
            } => {
                if sender != self.fast_confirmer || sender.is_zero() {
                    return Err(revert("NFC"));
                }
                let record = &self.node(self.first_unresolved)?.record;
                let gs = record.assertion.after_state.global_state;
                if record.node_hash != *node_hash
                    || gs.block_hash != *block_hash
                    || gs.send_root != *send_root
                {
                    return Err(revert("WRONG_NODE"));
                }
                self.confirm_first_unresolved();
                Ok(())
            }
            Call::CreateChallenge(params) => {
                for staker in &params.stakers {
                    let rec = self.stakers.get(staker).ok_or_else(|| revert("NOT_STAKED"))?;
                    if rec.in_challenge() {
                        return Err(revert("IN_CHAL"));
                    }
                }
                if params.nodes[0] >= params.nodes[1] {
                    return Err(revert("WRONG_ORDER"));
                }
                if params.nodes[0] <= self.latest_confirmed {
                    return Err(revert("NODE1_CONFIRMED"));
                }
                let id = ChallengeId(self.next_challenge);
                self.next_challenge += 1;
                for staker in &params.stakers {
                    if let Some(rec) = self.stakers.get_mut(staker) {
                        rec.current_challenge = Some(id);
                    }
                }
                Ok(())
            }
            Call::TimeoutChallenges { challenges } => {
                for id in challenges {
                    if !self.timed_out.contains(id) {
                        return Err(revert("NOT_TIMED_OUT"));
                    }
                }
                self.timed_out.retain(|id| !challenges.contains(id));
                for rec in self.stakers.values_mut() {
                    if rec.current_challenge.is_some_and(|c| challenges.contains(&c)) {
                        rec.current_challenge = None;
                    }
                }
                Ok(())
            }
            Call::ApproveHash { safe, digest } => {
                let quorum = self.quorums.get_mut(safe).ok_or_else(|| revert("no quorum"))?;
                if !quorum.owners.contains(&sender) {
                    return Err(revert("GS030"));
                }
                quorum.approvals.insert((sender, *digest));
                Ok(())
            }
            Call::ExecTransaction {
                safe,
                tx,
                signatures,
            } => {
                let quorum = self.quorums.get_mut(safe).ok_or_else(|| revert("no quorum"))?;
                if tx.nonce != quorum.nonce {
                    return Err(revert("GS026"));
                }
                let digest = quorum_digest(*safe, tx);
                quorum.check_signatures(sender, digest, signatures)?;
                quorum.nonce += 1;

                let inner = self.decode_quorum_call(&tx.data)?;
                self.apply_call(*safe, tx.to, tx.value, &inner)
            }
        }
    }

    /// Quorum payloads are opaque bytes; the only one the agent proposes is a
    /// fast confirmation of the first unresolved node.
    fn decode_quorum_call(&self, data: &[u8]) -> Result<Call, LedgerError> {
        let record = &self.node(self.first_unresolved)?.record;
        let gs = record.assertion.after_state.global_state;
        let expected = Call::FastConfirmNextNode {
            block_hash: gs.block_hash,
            send_root: gs.send_root,
            node_hash: record.node_hash,
        };
        if expected.calldata() == data {
            Ok(expected)
        } else {
            Err(revert("GS013"))
        }
    }

    fn conflict(&self, a: Address, b: Address) -> Result<ConflictRecord, LedgerError> {
        if let Some(scripted) = self.scripted_conflicts.get(&(a, b)) {
            return Ok(*scripted);
        }
        let a_node = self
            .stakers
            .get(&a)
            .ok_or_else(|| revert("NOT_STAKED"))?
            .latest_staked_node;
        let b_node = self
            .stakers
            .get(&b)
            .ok_or_else(|| revert("NOT_STAKED"))?
            .latest_staked_node;

        let path_a = self.ancestors(a_node);
        let path_b = self.ancestors(b_node);
        if path_a.contains(&b_node) || path_b.contains(&a_node) {
            return Ok(ConflictRecord::none());
        }
        let on_b: HashSet<NodeNum> = path_b.iter().copied().collect();
        let Some(lca_idx) = path_a.iter().position(|n| on_b.contains(n)) else {
            return Ok(ConflictRecord {
                kind: ConflictKind::Indeterminate,
                ..ConflictRecord::none()
            });
        };
        let lca = path_a[lca_idx];
        let lca_idx_b = path_b.iter().position(|n| *n == lca).unwrap_or(0);
        Ok(ConflictRecord {
            kind: ConflictKind::Found,
            node1: path_a[lca_idx - 1],
            node2: path_b[lca_idx_b - 1],
        })
    }
}

/// In-memory ledger implementing [`LedgerClient`], [`TxSubmitter`] and
/// [`QuorumConnector`].
///
/// Cloning yields another handle to the same chain.
#[derive(Debug, Clone)]
pub struct MockChain {
    pub(crate) state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    /// Create a chain holding only the confirmed genesis node.
    pub fn new(rollup: Address) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState::new(rollup))),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Scenario setup
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a node on top of `parent` proposed by nobody in particular.
    pub fn add_node(&self, parent: NodeNum, assertion: Assertion) -> NodeNum {
        let mut st = self.state.lock();
        let hash = Hash::from_parts(&[
            b"node",
            &parent.0.to_be_bytes(),
            assertion.execution_hash().as_bytes(),
        ]);
        st.create_node(parent, assertion, hash, 1)
    }

    /// Register a stake held by `staker` on `node`.
    pub fn add_staker(&self, staker: Address, node: NodeNum, amount: Wei) {
        let mut st = self.state.lock();
        st.stakers.insert(
            staker,
            StakerRecord {
                amount_staked: amount,
                latest_staked_node: node,
                current_challenge: None,
            },
        );
        st.staker_order.push(staker);
        for n in st.ancestors(node) {
            if n > st.latest_confirmed {
                st.stake_on(staker, n);
            }
        }
    }

    /// Put `staker` into dispute `challenge`.
    pub fn set_challenge(&self, staker: Address, challenge: Option<ChallengeId>) {
        if let Some(rec) = self.state.lock().stakers.get_mut(&staker) {
            rec.current_challenge = challenge;
        }
    }

    /// Confirm nodes up to and including `num` without any checks.
    pub fn force_confirm(&self, num: NodeNum) {
        let mut st = self.state.lock();
        st.latest_confirmed = num;
        st.first_unresolved = num.next();
    }

    pub fn set_required_stake(&self, required: Wei) {
        self.state.lock().required_stake = required;
    }

    pub fn set_base_stake(&self, base: Wei) {
        self.state.lock().base_stake = base;
    }

    pub fn set_withdrawable(&self, staker: Address, amount: Wei) {
        self.state.lock().withdrawable.insert(staker, amount);
    }

    pub fn set_balance(&self, addr: Address, amount: Wei) {
        self.state.lock().balances.insert(addr, amount);
    }

    /// Enable the whitelist and admit only `validators`.
    pub fn set_whitelist(&self, validators: &[Address]) {
        let mut st = self.state.lock();
        st.whitelist_disabled = false;
        st.whitelist = validators.iter().copied().collect();
    }

    pub fn set_fast_confirmer(&self, addr: Address) {
        self.state.lock().fast_confirmer = addr;
    }

    pub fn set_gas_price_gwei(&self, gwei: f64) {
        self.state.lock().gas_price_gwei = gwei;
    }

    pub fn advance_blocks(&self, n: u64) {
        self.state.lock().block += n;
    }

    /// Make the locally observed pending nonce of `addr` differ from the
    /// ledger's by `offset`.
    pub fn set_pending_nonce_offset(&self, addr: Address, offset: i64) {
        self.state.lock().pending_nonce_offset.insert(addr, offset);
    }

    pub fn set_decidable(&self, decidable: ConfirmType) {
        self.state.lock().decidable = decidable;
    }

    pub fn add_timed_out_challenge(&self, challenge: ChallengeId) {
        self.state.lock().timed_out.push(challenge);
    }

    /// Return `record` for the next conflict search between `a` and `b`.
    pub fn script_conflict(&self, a: Address, b: Address, record: ConflictRecord) {
        self.state.lock().scripted_conflicts.insert((a, b), record);
    }

    /// Deploy the successor protocol's contract.
    pub fn deploy_successor(&self) {
        self.state.lock().successor_deployed = true;
    }

    /// Fail the next submitted transaction with `err`.
    pub fn fail_next_send(&self, err: LedgerError) {
        self.state.lock().fail_next_send = Some(err);
    }

    /// Make every read and write fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Deploy a quorum contract. `owners` are stored in the given order.
    pub fn add_quorum(&self, address: Address, owners: Vec<Address>, threshold: u64) -> MockQuorum {
        self.state
            .lock()
            .quorums
            .insert(address, QuorumState::new(owners, threshold));
        MockQuorum::new(self.state.clone(), address)
    }

    /// Record an approval of `digest` by `owner` directly, as if the owner
    /// had sent it from elsewhere.
    pub fn approve_as(&self, safe: Address, owner: Address, digest: Hash) {
        if let Some(q) = self.state.lock().quorums.get_mut(&safe) {
            q.approvals.insert((owner, digest));
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inspection
    // ═══════════════════════════════════════════════════════════════════════

    pub fn node_record(&self, num: NodeNum) -> Option<NodeRecord> {
        self.state.lock().nodes.get(&num).map(|n| n.record.clone())
    }

    pub fn node_hash(&self, num: NodeNum) -> Hash {
        self.node_record(num).map(|r| r.node_hash).unwrap_or_default()
    }

    /// Children of `num`, lowest number first.
    pub fn children(&self, num: NodeNum) -> Vec<NodeRecord> {
        self.state
            .lock()
            .nodes
            .values()
            .filter(|n| n.parent == Some(num))
            .map(|n| n.record.clone())
            .collect()
    }

    pub fn staker(&self, addr: Address) -> Option<StakerRecord> {
        self.state.lock().stakers.get(&addr).cloned()
    }

    pub fn confirmed(&self) -> NodeNum {
        self.state.lock().latest_confirmed
    }

    pub fn balance(&self, addr: Address) -> Wei {
        self.state.lock().balances.get(&addr).copied().unwrap_or(0)
    }

    pub fn withdrawable(&self, addr: Address) -> Wei {
        self.state.lock().withdrawable.get(&addr).copied().unwrap_or(0)
    }

    /// All transactions accepted so far.
    pub fn sent_txs(&self) -> Vec<OutgoingTx> {
        self.state.lock().sent.iter().map(|(_, tx)| tx.clone()).collect()
    }

    /// Every call carried by accepted transactions, in order.
    pub fn sent_calls(&self) -> Vec<Call> {
        self.state
            .lock()
            .sent
            .iter()
            .flat_map(|(_, tx)| tx.calls().iter().map(|c| c.call.clone()))
            .collect()
    }

    pub fn quorum_nonce(&self, safe: Address) -> Option<u64> {
        self.state.lock().quorums.get(&safe).map(|q| q.nonce)
    }
}

#[async_trait]
impl LedgerClient for MockChain {
    fn rollup_address(&self) -> Address {
        self.state.lock().rollup
    }

    async fn latest_staked(&self, staker: Address) -> Result<(NodeNum, Hash), LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        let num = st
            .stakers
            .get(&staker)
            .map(|s| s.latest_staked_node)
            .unwrap_or(st.latest_confirmed);
        Ok((num, st.node(num)?.record.node_hash))
    }

    async fn latest_confirmed(&self) -> Result<NodeNum, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.latest_confirmed)
    }

    async fn first_unresolved_node(&self) -> Result<NodeNum, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.first_unresolved)
    }

    async fn lookup_node(&self, num: NodeNum) -> Result<NodeRecord, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.node(num)?.record.clone())
    }

    async fn node_has_staker(&self, num: NodeNum, staker: Address) -> Result<bool, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.nodes.get(&num).is_some_and(|n| n.stakers.contains(&staker)))
    }

    async fn are_unresolved_nodes_linear(&self) -> Result<bool, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        let first = st.first_unresolved;
        for (num, node) in st.nodes.range(first..) {
            let expected = if *num == first {
                st.latest_confirmed
            } else {
                NodeNum(num.0 - 1)
            };
            if node.parent != Some(expected) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn check_decidable_next_node(&self) -> Result<ConfirmType, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.decidable)
    }

    async fn staker_info(&self, staker: Address) -> Result<Option<StakerRecord>, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.stakers.get(&staker).cloned())
    }

    async fn get_stakers(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<Address>, bool), LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        let page: Vec<Address> = st
            .staker_order
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .copied()
            .collect();
        let more = (offset + limit) < st.staker_order.len() as u64;
        Ok((page, more))
    }

    async fn find_staker_conflict(
        &self,
        staker1: Address,
        staker2: Address,
        _depth_limit: u64,
    ) -> Result<ConflictRecord, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        st.conflict(staker1, staker2)
    }

    async fn current_required_stake(&self) -> Result<Wei, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.required_stake)
    }

    async fn base_stake(&self) -> Result<Wei, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.base_stake)
    }

    async fn withdrawable_funds(&self, staker: Address) -> Result<Wei, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.withdrawable.get(&staker).copied().unwrap_or(0))
    }

    async fn timed_out_challenges(
        &self,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<ChallengeId>, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st
            .timed_out
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .copied()
            .collect())
    }

    async fn validator_whitelist_disabled(&self) -> Result<bool, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.whitelist_disabled)
    }

    async fn is_validator(&self, addr: Address) -> Result<bool, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.whitelist.contains(&addr))
    }

    async fn any_trust_fast_confirmer(&self) -> Result<Address, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.fast_confirmer)
    }

    async fn challenge_grace_period_blocks(&self) -> Result<u64, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        if st.successor_deployed {
            Ok(14_400)
        } else {
            Err(revert("unknown selector"))
        }
    }

    async fn suggest_gas_price_gwei(&self) -> Result<f64, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.gas_price_gwei)
    }

    async fn block_number(&self) -> Result<BlockNumber, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(BlockNumber(st.block))
    }

    async fn nonce_at(&self, addr: Address) -> Result<u64, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.nonces.get(&addr).copied().unwrap_or(0))
    }

    async fn balance_at(&self, addr: Address) -> Result<Wei, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        Ok(st.balances.get(&addr).copied().unwrap_or(0))
    }

    async fn wait_for_tx_approval(&self, tx: TxHash) -> Result<(), LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        if st.sent.iter().any(|(hash, _)| *hash == tx) {
            Ok(())
        } else {
            Err(LedgerError::NotFound(format!("transaction {tx}")))
        }
    }
}

#[async_trait]
impl TxSubmitter for MockChain {
    async fn send(&self, tx: OutgoingTx) -> Result<TxHash, LedgerError> {
        let mut st = self.state.lock();
        st.check_online()?;
        if let Some(err) = st.fail_next_send.take() {
            return Err(err);
        }

        let sender = match &tx.payload {
            TxPayload::Direct(_) => tx.from,
            TxPayload::WalletBatch(_) => tx.to,
        };

        let mut draft = st.clone();
        for pending in tx.calls() {
            draft.apply_call(sender, pending.to, pending.value, &pending.call)?;
        }
        let nonce = draft.nonces.entry(tx.from).or_default();
        *nonce += 1;
        let hash = Hash::from_parts(&[b"tx", &(draft.sent.len() as u64).to_be_bytes()]);
        draft.sent.push((hash, tx));
        *st = draft;
        Ok(hash)
    }

    async fn pending_nonce(&self, addr: Address) -> Result<u64, LedgerError> {
        let st = self.state.lock();
        st.check_online()?;
        let nonce = st.nonces.get(&addr).copied().unwrap_or(0) as i64;
        let offset = st.pending_nonce_offset.get(&addr).copied().unwrap_or(0);
        Ok((nonce + offset).max(0) as u64)
    }
}

#[async_trait]
impl QuorumConnector for MockChain {
    async fn connect(&self, address: Address) -> Result<Arc<dyn QuorumContract>, LedgerError> {
        self.state.lock().check_online()?;
        Ok(Arc::new(MockQuorum::new(self.state.clone(), address)))
    }
}
