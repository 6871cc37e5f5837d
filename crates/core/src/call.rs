//! Ledger write operations.

use crate::abi::{encode_call, Token};
use arbiter_types::{
    Address, Assertion, BlockNumber, ChallengeId, ExecutionState, Hash, NodeNum, Wei,
};

/// Everything needed to open a dispute between two stakers.
///
/// Index 0 always refers to the lower-numbered node and the staker staked
/// on it; index 1 to the higher one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeParams {
    pub stakers: [Address; 2],
    pub nodes: [NodeNum; 2],
    pub assertions: [Assertion; 2],
    pub proposed_blocks: [BlockNumber; 2],
    pub wasm_module_roots: [Hash; 2],
}

/// Quorum operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operation {
    #[default]
    Call,
    DelegateCall,
}

/// A proposed quorum action.
///
/// Gas and refund parameters are always zero for actions proposed by the
/// agent. The nonce ties the action to one slot in the quorum's sequence,
/// so a transaction is single-use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeTransaction {
    pub to: Address,
    pub value: Wei,
    pub data: Vec<u8>,
    pub operation: Operation,
    pub safe_tx_gas: u128,
    pub base_gas: u128,
    pub gas_price: u128,
    pub gas_token: Address,
    pub refund_receiver: Address,
    pub nonce: u64,
}

impl SafeTransaction {
    /// A plain zero-value call with no gas refund.
    pub fn call(to: Address, data: Vec<u8>, nonce: u64) -> Self {
        Self {
            to,
            value: 0,
            data,
            operation: Operation::Call,
            safe_tx_gas: 0,
            base_gas: 0,
            gas_price: 0,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            nonce,
        }
    }
}

/// A write to the rollup ledger or to a quorum contract.
///
/// This is a closed set: every on-chain effect the agent can have is one
/// of these variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    // ═══════════════════════════════════════════════════════════════════════
    // Staking
    // ═══════════════════════════════════════════════════════════════════════
    /// Move an existing stake onto a newly created node.
    StakeOnNewNode {
        assertion: Assertion,
        expected_node_hash: Hash,
        prev_inbox_max_count: u64,
    },

    /// Move an existing stake onto an existing node.
    StakeOnExistingNode { node: NodeNum, node_hash: Hash },

    /// Place a new stake on a newly created node. Carries the deposit.
    NewStakeOnNewNode {
        assertion: Assertion,
        expected_node_hash: Hash,
        prev_inbox_max_count: u64,
    },

    /// Place a new stake on an existing node. Carries the deposit.
    NewStakeOnExistingNode { node: NodeNum, node_hash: Hash },

    /// Release the deposit of a staker whose stake is behind confirmation.
    ReturnOldDeposit { staker: Address },

    /// Withdraw funds credited to the sender.
    WithdrawStakerFunds,

    // ═══════════════════════════════════════════════════════════════════════
    // Node resolution
    // ═══════════════════════════════════════════════════════════════════════
    /// Confirm the first unresolved node.
    ConfirmNextNode { block_hash: Hash, send_root: Hash },

    /// Reject the first unresolved node. `staker` must be staked on a
    /// competing branch.
    RejectNextNode { staker: Address },

    /// Confirm the first unresolved node through the fast-confirmer.
    FastConfirmNextNode {
        block_hash: Hash,
        send_root: Hash,
        node_hash: Hash,
    },

    // ═══════════════════════════════════════════════════════════════════════
    // Disputes
    // ═══════════════════════════════════════════════════════════════════════
    /// Open a dispute between two stakers on conflicting nodes.
    CreateChallenge(Box<ChallengeParams>),

    /// Close disputes whose deadline has passed.
    TimeoutChallenges { challenges: Vec<ChallengeId> },

    // ═══════════════════════════════════════════════════════════════════════
    // Quorum
    // ═══════════════════════════════════════════════════════════════════════
    /// Record an on-chain approval of a quorum action digest.
    ApproveHash { safe: Address, digest: Hash },

    /// Execute a quorum action with the collected approvals.
    ExecTransaction {
        safe: Address,
        tx: Box<SafeTransaction>,
        signatures: Vec<u8>,
    },
}

impl Call {
    /// Get a human-readable name for this call type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Call::StakeOnNewNode { .. } => "StakeOnNewNode",
            Call::StakeOnExistingNode { .. } => "StakeOnExistingNode",
            Call::NewStakeOnNewNode { .. } => "NewStakeOnNewNode",
            Call::NewStakeOnExistingNode { .. } => "NewStakeOnExistingNode",
            Call::ReturnOldDeposit { .. } => "ReturnOldDeposit",
            Call::WithdrawStakerFunds => "WithdrawStakerFunds",
            Call::ConfirmNextNode { .. } => "ConfirmNextNode",
            Call::RejectNextNode { .. } => "RejectNextNode",
            Call::FastConfirmNextNode { .. } => "FastConfirmNextNode",
            Call::CreateChallenge(_) => "CreateChallenge",
            Call::TimeoutChallenges { .. } => "TimeoutChallenges",
            Call::ApproveHash { .. } => "ApproveHash",
            Call::ExecTransaction { .. } => "ExecTransaction",
        }
    }

    /// Check if this call places, moves or releases a stake.
    pub fn is_stake_affecting(&self) -> bool {
        matches!(
            self,
            Call::StakeOnNewNode { .. }
                | Call::StakeOnExistingNode { .. }
                | Call::NewStakeOnNewNode { .. }
                | Call::NewStakeOnExistingNode { .. }
                | Call::ReturnOldDeposit { .. }
        )
    }

    /// Check if this call is addressed to a quorum contract.
    pub fn is_quorum(&self) -> bool {
        matches!(self, Call::ApproveHash { .. } | Call::ExecTransaction { .. })
    }

    /// The contract this call is sent to.
    pub fn target(&self, rollup: Address) -> Address {
        match self {
            Call::ApproveHash { safe, .. } | Call::ExecTransaction { safe, .. } => *safe,
            _ => rollup,
        }
    }

    /// Deterministic calldata for this call.
    pub fn calldata(&self) -> Vec<u8> {
        match self {
            Call::StakeOnNewNode {
                assertion,
                expected_node_hash,
                prev_inbox_max_count,
            } => encode_call(
                "stakeOnNewNode(((bytes32[2],uint64[2]),uint8),((bytes32[2],uint64[2]),uint8),uint64),bytes32,uint256)",
                &new_node_tokens(assertion, expected_node_hash, *prev_inbox_max_count),
            ),
            Call::NewStakeOnNewNode {
                assertion,
                expected_node_hash,
                prev_inbox_max_count,
            } => encode_call(
                "newStakeOnNewNode(((bytes32[2],uint64[2]),uint8),((bytes32[2],uint64[2]),uint8),uint64),bytes32,uint256)",
                &new_node_tokens(assertion, expected_node_hash, *prev_inbox_max_count),
            ),
            Call::StakeOnExistingNode { node, node_hash } => encode_call(
                "stakeOnExistingNode(uint64,bytes32)",
                &[Token::uint(node.0 as u128), Token::hash(node_hash)],
            ),
            Call::NewStakeOnExistingNode { node, node_hash } => encode_call(
                "newStakeOnExistingNode(uint64,bytes32)",
                &[Token::uint(node.0 as u128), Token::hash(node_hash)],
            ),
            Call::ReturnOldDeposit { staker } => {
                encode_call("returnOldDeposit(address)", &[Token::address(staker)])
            }
            Call::WithdrawStakerFunds => encode_call("withdrawStakerFunds()", &[]),
            Call::ConfirmNextNode {
                block_hash,
                send_root,
            } => encode_call(
                "confirmNextNode(bytes32,bytes32)",
                &[Token::hash(block_hash), Token::hash(send_root)],
            ),
            Call::RejectNextNode { staker } => {
                encode_call("rejectNextNode(address)", &[Token::address(staker)])
            }
            Call::FastConfirmNextNode {
                block_hash,
                send_root,
                node_hash,
            } => encode_call(
                "fastConfirmNextNode(bytes32,bytes32,bytes32)",
                &[
                    Token::hash(block_hash),
                    Token::hash(send_root),
                    Token::hash(node_hash),
                ],
            ),
            Call::CreateChallenge(params) => encode_call(
                "createChallenge(address[2],uint64[2],(((bytes32[2],uint64[2]),uint8),((bytes32[2],uint64[2]),uint8),uint64)[2],uint256[2],bytes32[2])",
                &challenge_tokens(params),
            ),
            Call::TimeoutChallenges { challenges } => encode_call(
                "timeoutChallenges(uint64[])",
                &[Token::Array(
                    challenges.iter().map(|c| Token::uint(c.0 as u128)).collect(),
                )],
            ),
            Call::ApproveHash { digest, .. } => {
                encode_call("approveHash(bytes32)", &[Token::hash(digest)])
            }
            Call::ExecTransaction { tx, signatures, .. } => encode_call(
                "execTransaction(address,uint256,bytes,uint8,uint256,uint256,uint256,address,address,bytes)",
                &[
                    Token::address(&tx.to),
                    Token::uint(tx.value),
                    Token::Bytes(tx.data.clone()),
                    Token::uint(match tx.operation {
                        Operation::Call => 0,
                        Operation::DelegateCall => 1,
                    }),
                    Token::uint(tx.safe_tx_gas),
                    Token::uint(tx.base_gas),
                    Token::uint(tx.gas_price),
                    Token::address(&tx.gas_token),
                    Token::address(&tx.refund_receiver),
                    Token::Bytes(signatures.clone()),
                ],
            ),
        }
    }
}

fn execution_state_tokens(state: &ExecutionState, out: &mut Vec<Token>) {
    let gs = &state.global_state;
    out.push(Token::hash(&gs.block_hash));
    out.push(Token::hash(&gs.send_root));
    out.push(Token::uint(gs.batch as u128));
    out.push(Token::uint(gs.pos_in_batch as u128));
    out.push(Token::uint(state.machine_status.code() as u128));
}

fn assertion_tokens(assertion: &Assertion, out: &mut Vec<Token>) {
    execution_state_tokens(&assertion.before_state, out);
    execution_state_tokens(&assertion.after_state, out);
    out.push(Token::uint(assertion.num_blocks as u128));
}

fn new_node_tokens(assertion: &Assertion, node_hash: &Hash, prev_inbox: u64) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(13);
    assertion_tokens(assertion, &mut tokens);
    tokens.push(Token::hash(node_hash));
    tokens.push(Token::uint(prev_inbox as u128));
    tokens
}

fn challenge_tokens(params: &ChallengeParams) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(30);
    for staker in &params.stakers {
        tokens.push(Token::address(staker));
    }
    for node in &params.nodes {
        tokens.push(Token::uint(node.0 as u128));
    }
    for assertion in &params.assertions {
        assertion_tokens(assertion, &mut tokens);
    }
    for block in &params.proposed_blocks {
        tokens.push(Token::uint(block.0 as u128));
    }
    for root in &params.wasm_module_roots {
        tokens.push(Token::hash(root));
    }
    tokens
}

/// A call addressed to a contract, ready for a wallet to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    pub to: Address,
    pub value: Wei,
    pub call: Call,
}

/// What a raw transaction carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxPayload {
    /// A single contract call sent straight from the sender.
    Direct(PendingCall),
    /// Several calls executed atomically through a contract wallet.
    WalletBatch(Vec<PendingCall>),
}

/// A raw transaction handed to the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingTx {
    pub from: Address,
    pub to: Address,
    pub value: Wei,
    pub payload: TxPayload,
}

impl OutgoingTx {
    /// Calldata of the outer transaction.
    pub fn data(&self) -> Vec<u8> {
        match &self.payload {
            TxPayload::Direct(pending) => pending.call.calldata(),
            TxPayload::WalletBatch(calls) => encode_call(
                "executeTransactions(bytes[],address[],uint256[])",
                &[
                    Token::Array(
                        calls
                            .iter()
                            .map(|c| Token::Bytes(c.call.calldata()))
                            .collect(),
                    ),
                    Token::Array(calls.iter().map(|c| Token::address(&c.to)).collect()),
                    Token::Array(calls.iter().map(|c| Token::uint(c.value)).collect()),
                ],
            ),
        }
    }

    /// The calls carried by this transaction, in execution order.
    pub fn calls(&self) -> &[PendingCall] {
        match &self.payload {
            TxPayload::Direct(pending) => std::slice::from_ref(pending),
            TxPayload::WalletBatch(calls) => calls,
        }
    }
}
