// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - BLOCK-FEE INTEGRATION
//
// Per-block hook between finalization and the fee engine: a finalized
// block's fees run through the distributor and the resulting shares are
// credited to sequencer balances through the state manager, the only
// state writer besides the block executor, and strictly additive.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::{Arc, Mutex};

use emb_core::block::L2Block;
use emb_core::state::StateManager;
use emb_crypto::{Address, Hash256};
use serde::{Deserialize, Serialize};

use crate::fees::{FeeDistribution, FeeDistributor, FeeError};

/// Block-fee-distributed event payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFeeEvent {
    pub block_number: u64,
    pub block_hash: Hash256,
    pub sequencer: Address,
    pub total_fees: i64,
    pub tx_count: usize,
    pub timestamp: u64,
}

pub type BlockFeeCallback = Arc<dyn Fn(&BlockFeeEvent) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationError {
    BlockNotFinalized(u64),
    Fees(FeeError),
    State(String),
}

impl std::fmt::Display for IntegrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            IntegrationError::BlockNotFinalized(n) => {
                write!(f, "Block {} is not finalized", n)
            }
            IntegrationError::Fees(e) => write!(f, "{}", e),
            IntegrationError::State(e) => write!(f, "State credit failed: {}", e),
        }
    }
}

impl std::error::Error for IntegrationError {}

impl From<FeeError> for IntegrationError {
    fn from(e: FeeError) -> Self {
        IntegrationError::Fees(e)
    }
}

pub struct BlockFeeIntegration {
    distributor: Arc<FeeDistributor>,
    state: Arc<StateManager>,
    callback: Mutex<Option<BlockFeeCallback>>,
}

impl BlockFeeIntegration {
    pub fn new(distributor: Arc<FeeDistributor>, state: Arc<StateManager>) -> Self {
        Self {
            distributor,
            state,
            callback: Mutex::new(None),
        }
    }

    pub fn distributor(&self) -> &Arc<FeeDistributor> {
        &self.distributor
    }

    pub fn on_fees_distributed(&self, callback: BlockFeeCallback) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    /// Settle a finalized block: split the fees, credit every share to
    /// the earning sequencer's balance, emit the event. The burn share is
    /// credited to nobody.
    pub fn on_block_finalized(
        &self,
        block: &L2Block,
        total_fees: i64,
        active_sequencers: &[Address],
    ) -> Result<FeeDistribution, IntegrationError> {
        if !block.is_finalized {
            return Err(IntegrationError::BlockNotFinalized(
                block.header.block_number,
            ));
        }

        let distribution = self.distributor.distribute_block_fees(
            block.header.block_number,
            block.hash(),
            block.header.sequencer,
            total_fees,
            active_sequencers,
            block.header.timestamp,
        )?;

        let timestamp = block.header.timestamp;
        if distribution.producer_amount > 0 {
            self.state
                .credit(&distribution.producer, distribution.producer_amount, timestamp)
                .map_err(|e| IntegrationError::State(e.to_string()))?;
        }
        if distribution.per_peer_amount > 0 {
            for peer in active_sequencers
                .iter()
                .filter(|a| **a != distribution.producer)
            {
                self.state
                    .credit(peer, distribution.per_peer_amount, timestamp)
                    .map_err(|e| IntegrationError::State(e.to_string()))?;
            }
        }

        let event = BlockFeeEvent {
            block_number: block.header.block_number,
            block_hash: block.hash(),
            sequencer: block.header.sequencer,
            total_fees,
            tx_count: block.transactions.len(),
            timestamp,
        };
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(&event);
        }
        Ok(distribution)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
