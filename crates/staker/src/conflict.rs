//! Dispute creation against stakers on conflicting nodes.

use crate::error::{ResultExt, StakerError};
use arbiter_core::{Call, ChallengeParams, LedgerClient};
use arbiter_txbatch::TxBatcher;
use arbiter_types::{Address, ConflictKind, NodeNum, StakerRecord};
use std::sync::Arc;
use tracing::{debug, warn};

/// Stakers fetched per page.
pub const STAKER_PAGE_SIZE: u64 = 1024;

/// How far back the ledger searches for a common ancestor.
pub const CONFLICT_DEPTH_LIMIT: u64 = 1024;

/// A dispute queued by [`ConflictResolver::create_conflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedDispute {
    pub other_staker: Address,
    pub nodes: [NodeNum; 2],
}

/// Finds a staker whose claim conflicts with ours and opens a dispute.
pub struct ConflictResolver {
    ledger: Arc<dyn LedgerClient>,
}

impl ConflictResolver {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// All stakers, following pagination to the end.
    async fn all_stakers(&self) -> Result<Vec<Address>, StakerError> {
        let mut stakers = Vec::new();
        loop {
            let (page, more) = self
                .ledger
                .get_stakers(stakers.len() as u64, STAKER_PAGE_SIZE)
                .await
                .context("getting stakers list")?;
            let empty = page.is_empty();
            stakers.extend(page);
            if !more || empty {
                return Ok(stakers);
            }
        }
    }

    /// Queue a dispute against the first staker found on a conflicting,
    /// unconfirmed node.
    ///
    /// At most one dispute is queued per call. Stakers already in a dispute,
    /// and conflicts whose lower node is already confirmed, are skipped.
    /// Returns the dispute queued, if any.
    pub async fn create_conflict(
        &self,
        batcher: &mut TxBatcher,
        own: &StakerRecord,
    ) -> Result<Option<OpenedDispute>, StakerError> {
        if own.in_challenge() {
            return Ok(None);
        }
        let Some(wallet) = batcher.wallet_address() else {
            return Ok(None);
        };

        let stakers = self.all_stakers().await?;
        let latest_confirmed = self.ledger.latest_confirmed().await?;

        for staker in stakers {
            if staker == wallet {
                continue;
            }
            let record = self
                .ledger
                .staker_info(staker)
                .await
                .with_context(|| format!("getting staker {staker} info"))?
                .ok_or_else(|| {
                    StakerError::Invariant(format!(
                        "staker {staker} returned by get_stakers not found in rollup"
                    ))
                })?;
            if record.in_challenge() {
                continue;
            }

            let found = self
                .ledger
                .find_staker_conflict(wallet, staker, CONFLICT_DEPTH_LIMIT)
                .await
                .with_context(|| format!("finding conflict with staker {staker}"))?;
            if found.kind != ConflictKind::Found {
                continue;
            }

            let (conflict, swapped) = found.normalized();
            let stakers = if swapped {
                [staker, wallet]
            } else {
                [wallet, staker]
            };
            if conflict.node1 <= latest_confirmed {
                debug!(node1 = %conflict.node1, other = %staker, "Skipping zombie conflict");
                continue;
            }

            let node1 = self
                .ledger
                .lookup_node(conflict.node1)
                .await
                .with_context(|| format!("looking up {}", conflict.node1))?;
            let node2 = self
                .ledger
                .lookup_node(conflict.node2)
                .await
                .with_context(|| format!("looking up {}", conflict.node2))?;

            warn!(
                node1 = %conflict.node1,
                node2 = %conflict.node2,
                other_staker = %staker,
                "Creating challenge"
            );
            batcher
                .auth()
                .call(Call::CreateChallenge(Box::new(ChallengeParams {
                    stakers,
                    nodes: [conflict.node1, conflict.node2],
                    assertions: [node1.assertion, node2.assertion],
                    proposed_blocks: [
                        node1.parent_chain_block_proposed,
                        node2.parent_chain_block_proposed,
                    ],
                    wasm_module_roots: [node1.wasm_module_root, node2.wasm_module_root],
                })));
            return Ok(Some(OpenedDispute {
                other_staker: staker,
                nodes: [conflict.node1, conflict.node2],
            }));
        }
        Ok(None)
    }
}
