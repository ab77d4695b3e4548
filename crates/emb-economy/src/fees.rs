// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - FEE DISTRIBUTOR
//
// Per finalized block with total fees F:
//   producer ⌊0.70·F⌋ · shared pool ⌊0.20·F⌋ · burn ⌊0.10·F⌋ + residual
// The pool divides equally among the other active sequencers; division
// remainders go to the burn so producer + Σpeers + burn == F exactly.
// A penalized producer loses 50% of its share to the burn; an eligible
// producer's +10% uptime bonus is paid out of the burn share.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use emb_core::{
    FEE_POOL_PCT, FEE_PRODUCER_PCT, MISSED_BLOCK_PENALTY_PCT, UPTIME_BONUS_PCT,
    UPTIME_BONUS_THRESHOLD_PERMILLE,
};
use emb_crypto::{Address, Hash256};
use serde::{Deserialize, Serialize};

/// Blocks a missed-block penalty lasts; refreshed by half on repeat
pub const PENALTY_DURATION_BLOCKS: u64 = 100;

/// Minimum observed blocks before the uptime bonus can apply
pub const UPTIME_BONUS_MIN_BLOCKS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    NegativeFees(i64),
    NoActiveSequencers,
    /// The producer must be part of the active set
    ProducerNotActive(Address),
    NothingToClaim(Address),
}

impl std::fmt::Display for FeeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FeeError::NegativeFees(v) => write!(f, "Negative fee total {}", v),
            FeeError::NoActiveSequencers => write!(f, "No active sequencers to pay"),
            FeeError::ProducerNotActive(a) => write!(f, "Producer {} not in active set", a),
            FeeError::NothingToClaim(a) => write!(f, "No claimable rewards for {}", a),
        }
    }
}

impl std::error::Error for FeeError {}

/// Per-sequencer reward bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SequencerRewardInfo {
    pub total_rewards: i64,
    pub block_production_rewards: i64,
    pub shared_pool_rewards: i64,
    pub uptime_bonus: i64,
    pub claimed_rewards: i64,
    pub blocks_produced: u64,
    pub blocks_missed: u64,
    /// Producer share is halved while this exceeds the current block
    pub penalty_expires_block: u64,
    pub reputation_score: u8,
    pub stake_amount: i64,
    pub last_active_block: u64,
}

impl SequencerRewardInfo {
    pub fn claimable(&self) -> i64 {
        self.total_rewards - self.claimed_rewards
    }

    /// Produced blocks per 1000 observed (produced + missed).
    pub fn uptime_permille(&self) -> u64 {
        let observed = self.blocks_produced + self.blocks_missed;
        if observed == 0 {
            return 1000;
        }
        self.blocks_produced * 1000 / observed
    }

    pub fn is_penalized(&self, current_block: u64) -> bool {
        self.penalty_expires_block > current_block
    }

    pub fn uptime_bonus_eligible(&self) -> bool {
        self.blocks_produced + self.blocks_missed >= UPTIME_BONUS_MIN_BLOCKS
            && self.uptime_permille() >= UPTIME_BONUS_THRESHOLD_PERMILLE
    }
}

/// One block's settled distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeDistribution {
    pub block_number: u64,
    pub block_hash: Hash256,
    pub producer: Address,
    pub total_fees: i64,
    /// Producer share after penalty / bonus adjustments
    pub producer_amount: i64,
    pub per_peer_amount: i64,
    pub peer_count: usize,
    pub burn_amount: i64,
    pub penalty_applied: i64,
    pub bonus_applied: i64,
    pub timestamp: u64,
}

struct FeeInner {
    rewards: BTreeMap<Address, SequencerRewardInfo>,
    history: VecDeque<FeeDistribution>,
    total_burned: i64,
}

pub struct FeeDistributor {
    max_history: usize,
    inner: Mutex<FeeInner>,
}

impl FeeDistributor {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history,
            inner: Mutex::new(FeeInner {
                rewards: BTreeMap::new(),
                history: VecDeque::new(),
                total_burned: 0,
            }),
        }
    }

    /// Settle one finalized block's fees. Pure integer arithmetic;
    /// the returned shares always sum to `total_fees` exactly.
    pub fn distribute_block_fees(
        &self,
        block_number: u64,
        block_hash: Hash256,
        producer: Address,
        total_fees: i64,
        active_sequencers: &[Address],
        timestamp: u64,
    ) -> Result<FeeDistribution, FeeError> {
        if total_fees < 0 {
            return Err(FeeError::NegativeFees(total_fees));
        }
        if active_sequencers.is_empty() {
            return Err(FeeError::NoActiveSequencers);
        }
        if !active_sequencers.contains(&producer) {
            return Err(FeeError::ProducerNotActive(producer));
        }

        let producer_base = total_fees * FEE_PRODUCER_PCT / 100;
        let pool = total_fees * FEE_POOL_PCT / 100;
        // Burn takes its floor share plus every residual satoshi
        let mut burn = total_fees - producer_base - pool;

        let peers: Vec<Address> = active_sequencers
            .iter()
            .copied()
            .filter(|a| *a != producer)
            .collect();

        let (mut producer_amount, per_peer_amount) = if peers.is_empty() {
            // Sole sequencer keeps the pool too
            (producer_base + pool, 0)
        } else {
            let per_peer = pool / peers.len() as i64;
            burn += pool - per_peer * peers.len() as i64;
            (producer_base, per_peer)
        };

        let mut inner = self.inner.lock().unwrap();

        let info = inner.rewards.entry(producer).or_default();
        let penalty_applied = if info.is_penalized(block_number) {
            let penalty = producer_amount * MISSED_BLOCK_PENALTY_PCT / 100;
            producer_amount -= penalty;
            burn += penalty;
            penalty
        } else {
            0
        };
        let bonus_applied = if penalty_applied == 0 && info.uptime_bonus_eligible() {
            // The bonus is funded from the burn share, never inflated
            let bonus = (producer_base * UPTIME_BONUS_PCT / 100).min(burn);
            producer_amount += bonus;
            burn -= bonus;
            bonus
        } else {
            0
        };

        info.blocks_produced += 1;
        info.last_active_block = block_number;
        info.block_production_rewards += producer_amount - bonus_applied;
        info.uptime_bonus += bonus_applied;
        info.total_rewards += producer_amount;

        for peer in &peers {
            let info = inner.rewards.entry(*peer).or_default();
            info.shared_pool_rewards += per_peer_amount;
            info.total_rewards += per_peer_amount;
        }

        inner.total_burned += burn;

        let distribution = FeeDistribution {
            block_number,
            block_hash,
            producer,
            total_fees,
            producer_amount,
            per_peer_amount,
            peer_count: peers.len(),
            burn_amount: burn,
            penalty_applied,
            bonus_applied,
            timestamp,
        };
        inner.history.push_back(distribution.clone());
        while inner.history.len() > self.max_history {
            inner.history.pop_front();
        }

        log::debug!(
            "Block {} fees {}: producer {}, {} peers × {}, burn {}",
            block_number,
            total_fees,
            distribution.producer_amount,
            distribution.peer_count,
            distribution.per_peer_amount,
            distribution.burn_amount
        );
        Ok(distribution)
    }

    /// A missed slot opens (or refreshes) the penalty window: a fresh
    /// penalty runs the full duration, a repeat extends by half of it.
    pub fn record_missed_block(&self, sequencer: &Address, current_block: u64) {
        let mut inner = self.inner.lock().unwrap();
        let info = inner.rewards.entry(*sequencer).or_default();
        info.blocks_missed += 1;
        if info.is_penalized(current_block) {
            info.penalty_expires_block += PENALTY_DURATION_BLOCKS / 2;
        } else {
            info.penalty_expires_block = current_block + PENALTY_DURATION_BLOCKS;
        }
        log::warn!(
            "Sequencer {} missed block {}; penalty until block {}",
            sequencer,
            current_block,
            info.penalty_expires_block
        );
    }

    /// Draw everything earned and not yet claimed.
    pub fn claim_rewards(&self, sequencer: &Address) -> Result<i64, FeeError> {
        let mut inner = self.inner.lock().unwrap();
        let info = inner
            .rewards
            .get_mut(sequencer)
            .ok_or(FeeError::NothingToClaim(*sequencer))?;
        let claimable = info.claimable();
        if claimable <= 0 {
            return Err(FeeError::NothingToClaim(*sequencer));
        }
        info.claimed_rewards += claimable;
        Ok(claimable)
    }

    pub fn reward_info(&self, sequencer: &Address) -> Option<SequencerRewardInfo> {
        self.inner.lock().unwrap().rewards.get(sequencer).cloned()
    }

    pub fn update_stake(&self, sequencer: &Address, stake: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.rewards.entry(*sequencer).or_default().stake_amount = stake;
    }

    pub fn update_reputation(&self, sequencer: &Address, score: u8) {
        let mut inner = self.inner.lock().unwrap();
        inner.rewards.entry(*sequencer).or_default().reputation_score = score;
    }

    pub fn total_burned(&self) -> i64 {
        self.inner.lock().unwrap().total_burned
    }

    pub fn history(&self) -> Vec<FeeDistribution> {
        self.inner.lock().unwrap().history.iter().cloned().collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use emb_crypto::{hash160, sha3_256};
    use proptest::prelude::*;

    const NOW: u64 = 1_750_000_000;

    fn addr(n: u8) -> Address {
        hash160(&[n])
    }

    fn active(n: u8) -> Vec<Address> {
        (0..n).map(addr).collect()
    }

    fn distribute(
        d: &FeeDistributor,
        block: u64,
        fees: i64,
        sequencers: &[Address],
    ) -> FeeDistribution {
        d.distribute_block_fees(block, sha3_256(&block.to_le_bytes()), sequencers[0], fees, sequencers, NOW)
            .unwrap()
    }

    fn total_out(d: &FeeDistribution) -> i64 {
        d.producer_amount + d.per_peer_amount * d.peer_count as i64 + d.burn_amount
    }

    #[test]
    fn test_canonical_thousand_split() {
        let distributor = FeeDistributor::new(100);
        let sequencers = active(3);
        let d = distribute(&distributor, 1, 1000, &sequencers);
        assert_eq!(d.producer_amount, 700);
        assert_eq!(d.per_peer_amount, 100);
        assert_eq!(d.peer_count, 2);
        assert_eq!(d.burn_amount, 100);
        assert_eq!(total_out(&d), 1000);
        assert_eq!(distributor.total_burned(), 100);
    }

    #[test]
    fn test_seven_sat_split_residual_to_burn() {
        let distributor = FeeDistributor::new(100);
        let sequencers = active(3);
        let d = distribute(&distributor, 1, 7, &sequencers);
        // ⌊0.7·7⌋=4, ⌊0.2·7⌋=1, burn = 7−4−1 = 2; the 1-sat pool splits
        // 0/0 across two peers with its remainder burned
        assert_eq!(d.producer_amount, 4);
        assert_eq!(d.per_peer_amount, 0);
        assert_eq!(d.burn_amount, 2 + 1);
        assert_eq!(total_out(&d), 7);
    }

    #[test]
    fn test_sole_producer_takes_pool() {
        let distributor = FeeDistributor::new(100);
        let sequencers = active(1);
        let d = distribute(&distributor, 1, 1000, &sequencers);
        assert_eq!(d.producer_amount, 900);
        assert_eq!(d.peer_count, 0);
        assert_eq!(d.burn_amount, 100);
        assert_eq!(total_out(&d), 1000);
    }

    #[test]
    fn test_penalty_halves_producer_share() {
        let distributor = FeeDistributor::new(100);
        let sequencers = active(3);
        distributor.record_missed_block(&sequencers[0], 5);

        let d = distribute(&distributor, 6, 1000, &sequencers);
        assert_eq!(d.penalty_applied, 350);
        assert_eq!(d.producer_amount, 350);
        assert_eq!(d.burn_amount, 100 + 350);
        assert_eq!(total_out(&d), 1000);

        // Past the window the share recovers
        let d = distribute(&distributor, 5 + PENALTY_DURATION_BLOCKS + 1, 1000, &sequencers);
        assert_eq!(d.penalty_applied, 0);
        assert_eq!(d.producer_amount, 700);
    }

    #[test]
    fn test_penalty_refresh_extends_by_half() {
        let distributor = FeeDistributor::new(100);
        let seq = addr(0);
        distributor.record_missed_block(&seq, 10);
        assert_eq!(
            distributor.reward_info(&seq).unwrap().penalty_expires_block,
            10 + PENALTY_DURATION_BLOCKS
        );
        // Second miss inside the window adds half the duration
        distributor.record_missed_block(&seq, 20);
        assert_eq!(
            distributor.reward_info(&seq).unwrap().penalty_expires_block,
            10 + PENALTY_DURATION_BLOCKS + PENALTY_DURATION_BLOCKS / 2
        );
    }

    #[test]
    fn test_uptime_bonus_from_burn() {
        let distributor = FeeDistributor::new(1000);
        let sequencers = active(3);
        // 10 clean blocks establish 1000‰ uptime
        for block in 1..=UPTIME_BONUS_MIN_BLOCKS {
            distribute(&distributor, block, 0, &sequencers);
        }
        let d = distribute(&distributor, 11, 1000, &sequencers);
        assert_eq!(d.bonus_applied, 70);
        assert_eq!(d.producer_amount, 770);
        assert_eq!(d.burn_amount, 30);
        assert_eq!(total_out(&d), 1000);

        let info = distributor.reward_info(&sequencers[0]).unwrap();
        assert_eq!(info.uptime_bonus, 70);
        assert!(info.uptime_bonus_eligible());
    }

    #[test]
    fn test_low_uptime_no_bonus() {
        let distributor = FeeDistributor::new(1000);
        let sequencers = active(3);
        for block in 1..=9 {
            distribute(&distributor, block, 0, &sequencers);
        }
        // 9 produced, 1 missed → 900‰ < 950‰
        distributor.record_missed_block(&sequencers[0], 10);
        let d = distribute(
            &distributor,
            10 + PENALTY_DURATION_BLOCKS + 1,
            1000,
            &sequencers,
        );
        assert_eq!(d.bonus_applied, 0);
        assert_eq!(d.producer_amount, 700);
    }

    #[test]
    fn test_claims_draw_down_once() {
        let distributor = FeeDistributor::new(100);
        let sequencers = active(3);
        distribute(&distributor, 1, 1000, &sequencers);

        assert_eq!(distributor.claim_rewards(&sequencers[0]).unwrap(), 700);
        assert_eq!(
            distributor.claim_rewards(&sequencers[0]),
            Err(FeeError::NothingToClaim(sequencers[0]))
        );
        assert_eq!(distributor.claim_rewards(&sequencers[1]).unwrap(), 100);

        distribute(&distributor, 2, 1000, &sequencers);
        assert_eq!(distributor.claim_rewards(&sequencers[0]).unwrap(), 700);
    }

    #[test]
    fn test_history_capped() {
        let distributor = FeeDistributor::new(3);
        let sequencers = active(3);
        for block in 1..=5 {
            distribute(&distributor, block, 100, &sequencers);
        }
        let history = distributor.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].block_number, 3);
        assert_eq!(history[2].block_number, 5);
    }

    #[test]
    fn test_input_validation() {
        let distributor = FeeDistributor::new(100);
        let sequencers = active(3);
        assert_eq!(
            distributor.distribute_block_fees(1, Hash256::ZERO, sequencers[0], -1, &sequencers, NOW),
            Err(FeeError::NegativeFees(-1))
        );
        assert_eq!(
            distributor.distribute_block_fees(1, Hash256::ZERO, sequencers[0], 100, &[], NOW),
            Err(FeeError::NoActiveSequencers)
        );
        assert_eq!(
            distributor.distribute_block_fees(1, Hash256::ZERO, addr(99), 100, &sequencers, NOW),
            Err(FeeError::ProducerNotActive(addr(99)))
        );
    }

    proptest! {
        #[test]
        fn prop_split_is_exact(fees in 0i64..10_000_000_000, n_active in 1u8..12) {
            let distributor = FeeDistributor::new(16);
            let sequencers = active(n_active);
            let d = distribute(&distributor, 1, fees, &sequencers);
            prop_assert_eq!(total_out(&d), fees);
            prop_assert!(d.burn_amount >= 0);
            prop_assert!(d.producer_amount >= 0);
        }

        #[test]
        fn prop_split_exact_under_penalty_and_bonus(
            fees in 0i64..1_000_000_000,
            penalized in any::<bool>(),
        ) {
            let distributor = FeeDistributor::new(64);
            let sequencers = active(4);
            if penalized {
                distributor.record_missed_block(&sequencers[0], 0);
            } else {
                for block in 1..=UPTIME_BONUS_MIN_BLOCKS {
                    distribute(&distributor, block, 0, &sequencers);
                }
            }
            let d = distribute(&distributor, UPTIME_BONUS_MIN_BLOCKS + 2, fees, &sequencers);
            prop_assert_eq!(total_out(&d), fees);
        }
    }
}
