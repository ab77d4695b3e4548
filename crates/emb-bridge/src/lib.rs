// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - BRIDGE INGRESS PIPELINE
//
// Everything between an L1 OP_RETURN burn and an L2 mint:
// burn payload parsing, callback-injected validation, the durable burn
// registry, the L1 chain monitor, and the 2/3 mint-consensus manager.
//
// The bridge never talks to an L1 node directly: every L1 lookup is an
// injected callback, so the pipeline runs against live RPC and against
// test fixtures alike.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Arc;

use emb_crypto::{Address, Hash256};
use serde::{Deserialize, Serialize};

pub mod burn;
pub mod consensus;
pub mod monitor;
pub mod registry;
pub mod validator;

// ─────────────────────────────────────────────────────────────────
// L1 view
// ─────────────────────────────────────────────────────────────────

/// One output of an L1 transaction: value plus locking script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1TxOut {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
}

/// The slice of an L1 transaction the bridge needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Transaction {
    pub txid: Hash256,
    pub outputs: Vec<L1TxOut>,
}

/// An L1 block as delivered to the chain monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Block {
    pub height: u64,
    pub hash: Hash256,
    pub timestamp: u64,
    pub transactions: Vec<L1Transaction>,
}

// ─────────────────────────────────────────────────────────────────
// Collaborator callbacks
// ─────────────────────────────────────────────────────────────────

/// Fetch a raw L1 transaction by txid.
pub type TxFetcher = Arc<dyn Fn(&Hash256) -> Option<L1Transaction> + Send + Sync>;

/// Confirmation count of an L1 transaction.
pub type ConfirmationGetter = Arc<dyn Fn(&Hash256) -> u32 + Send + Sync>;

/// Containing block (hash, height) of an L1 transaction.
pub type BlockInfoGetter = Arc<dyn Fn(&Hash256) -> Option<(Hash256, u64)> + Send + Sync>;

/// Has this burn already been minted? Usually delegates to the registry.
pub type ProcessedChecker = Arc<dyn Fn(&Hash256) -> bool + Send + Sync>;

/// Current active sequencer count.
pub type SequencerCountGetter = Arc<dyn Fn() -> usize + Send + Sync>;

/// Is this address an active sequencer?
pub type SequencerVerifier = Arc<dyn Fn(&Address) -> bool + Send + Sync>;

pub use emb_core::block::SequencerPubKeyGetter;
