// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - CORE MODULE
//
// L2 primitives: canonical codec, sparse Merkle tree, account state,
// transactions, blocks, timestamp discipline, and chain configuration.
// All financial arithmetic uses i64 satoshi units (no floating-point).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod block;
pub mod codec;
pub mod config;
pub mod smt;
pub mod state;
pub mod timestamp;
pub mod transaction;

pub use emb_crypto::{Address, Hash256};

/// 1 coin = 100,000,000 satoshi (Bitcoin-compatible 10^8 precision)
pub const SATS_PER_COIN: i64 = 100_000_000;

/// Maximum money supply: 21,000,000 coin in satoshi.
/// Burn amounts above this bound are invalid by construction.
pub const MAX_MONEY_SATS: i64 = 21_000_000 * SATS_PER_COIN;

/// L1 confirmations required before a burn may be validated
pub const REQUIRED_L1_CONFIRMATIONS: u32 = 6;

/// Minimum active sequencer count for mint consensus to be reachable
pub const MIN_ACTIVE_SEQUENCERS: usize = 3;

/// A pending mint-consensus state older than this is marked FAILED
pub const MINT_CONSENSUS_TIMEOUT_SECS: u64 = 600;

/// Minimum challenge bond for a fraud proof (10 coin)
pub const MIN_CHALLENGE_BOND_SATS: i64 = 10 * SATS_PER_COIN;

/// Upper bound on an interactive fraud-proof execution trace
pub const MAX_INTERACTIVE_STEPS: u64 = 256;

/// Per-move deadline in an interactive proof session (1 hour)
pub const STEP_DEADLINE_SECS: u64 = 3600;

/// Fraction of a slashed stake credited to the successful challenger
pub const CHALLENGER_REWARD_PCT: u32 = 50;

/// Fee split: producer / shared pool / burn, in percent. Sums to 100;
/// integer-division residue is added to the burn share.
pub const FEE_PRODUCER_PCT: i64 = 70;
pub const FEE_POOL_PCT: i64 = 20;
pub const FEE_BURN_PCT: i64 = 10;

/// Producer-share bonus for sequencers above the uptime threshold (+10%)
pub const UPTIME_BONUS_PCT: i64 = 10;

/// Uptime (permille of produced vs expected blocks) required for the bonus
pub const UPTIME_BONUS_THRESHOLD_PERMILLE: u64 = 950;

/// Producer-share reduction while a missed-block penalty window is open (−50%)
pub const MISSED_BLOCK_PENALTY_PCT: i64 = 50;

/// Aggregate reputation score granting instant soft-finality
pub const FAST_WITHDRAWAL_SCORE: u8 = 80;

/// Aggregate reputation score where the gas discount starts
pub const GAS_DISCOUNT_SCORE: u8 = 70;

/// Blocks between L1 reputation imports
pub const L1_REPUTATION_SYNC_INTERVAL: u64 = 1000;

/// Block-header timestamp may lead the validator clock by at most 60 s
pub const MAX_FUTURE_BLOCK_TIME_SECS: u64 = 60;

/// Timestamp-validator wall-clock bound (120 s ahead at most)
pub const MAX_CLOCK_AHEAD_SECS: u64 = 120;

/// Maximum drift between a block timestamp and the L1 reference (300 s)
pub const MAX_L1_DRIFT_SECS: u64 = 300;

/// A block timestamp must exceed its predecessor by at least 1 s
pub const MIN_BLOCK_TIME_DELTA_SECS: u64 = 1;

/// Serialized Merkle proofs above 10 KiB are rejected
pub const MAX_PROOF_SIZE: usize = 10 * 1024;

/// Fraud-proof state proof bound (100 KiB)
pub const MAX_STATE_PROOF_SIZE: usize = 100 * 1024;

/// Fraud-proof execution trace bound (1 MiB)
pub const MAX_EXECUTION_TRACE_SIZE: usize = 1024 * 1024;

/// A fraud proof may carry at most 100 relevant transactions
pub const MAX_RELEVANT_TXS: usize = 100;

/// Maximum transactions per L2 block
pub const MAX_BLOCK_TXS: usize = 10_000;

/// Intrinsic gas floor for every transaction
pub const MIN_TX_GAS: u64 = 21_000;

/// Per-transaction gas ceiling
pub const MAX_TX_GAS_LIMIT: u64 = 15_000_000;

/// Per-transaction calldata bound
pub const MAX_TX_DATA_SIZE: usize = 128 * 1024;

/// Access-list bounds
pub const MAX_ACCESS_LIST_ENTRIES: usize = 64;
pub const MAX_STORAGE_KEYS_PER_ENTRY: usize = 32;

/// Block-header extraData bound
pub const MAX_EXTRA_DATA_SIZE: usize = 32;

/// ⌈2n/3⌉: signatures (or confirmations) required out of `n` active
/// sequencers. Pure integer math.
pub const fn consensus_threshold(active: usize) -> usize {
    (2 * active).div_ceil(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consensus_threshold() {
        assert_eq!(consensus_threshold(3), 2);
        assert_eq!(consensus_threshold(4), 3);
        assert_eq!(consensus_threshold(5), 4);
        assert_eq!(consensus_threshold(6), 4);
        assert_eq!(consensus_threshold(7), 5);
        assert_eq!(consensus_threshold(100), 67);
    }

    #[test]
    fn test_fee_split_percentages_sum() {
        assert_eq!(FEE_PRODUCER_PCT + FEE_POOL_PCT + FEE_BURN_PCT, 100);
    }

    #[test]
    fn test_money_bounds() {
        assert_eq!(MAX_MONEY_SATS, 2_100_000_000_000_000);
        assert_eq!(MIN_CHALLENGE_BOND_SATS, 1_000_000_000);
    }
}
