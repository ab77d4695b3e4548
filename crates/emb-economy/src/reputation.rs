// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - REPUTATION AGGREGATOR
//
// Imports L1 HAT scores, tracks L2 behaviour and economic activity, and
// aggregates them into one 0–100 score:
//   clip100((60·L1 + 25·behaviour + 15·economic) / 100)
// Users below the qualifying transaction count keep their raw L1 score.
// A flagged user's aggregate is capped at 50 until the flag is cleared.
// Benefits are pure functions of the aggregate score.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::sync::Mutex;

use emb_core::{FAST_WITHDRAWAL_SCORE, GAS_DISCOUNT_SCORE, SATS_PER_COIN};
use emb_crypto::Address;
use serde::{Deserialize, Serialize};

/// L2 transactions required before L2 sub-scores count
pub const MIN_QUALIFYING_TXS: u64 = 10;

/// Flagged users cannot exceed this aggregate
pub const FLAGGED_SCORE_CAP: u8 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GamingReason {
    /// ≥ 100 transactions with trivial total volume
    WashPattern,
    /// > 50% failures over ≥ 20 transactions
    HighFailureRate,
    /// Locally computed scores implausibly above the imported L1 score
    ScoreGap,
    AlreadyFlagged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReputationError {
    ScoreOutOfRange(u8),
    NegativeVolume(i64),
}

impl std::fmt::Display for ReputationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ReputationError::ScoreOutOfRange(s) => write!(f, "HAT score {} exceeds 100", s),
            ReputationError::NegativeVolume(v) => write!(f, "Negative volume {}", v),
        }
    }
}

impl std::error::Error for ReputationError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReputationData {
    pub l1_hat_score: u8,
    pub behaviour_score: u8,
    pub economic_score: u8,
    pub aggregate_score: u8,
    pub tx_count: u64,
    pub successful_txs: u64,
    pub failed_txs: u64,
    pub contract_interactions: u64,
    pub total_volume_sats: i64,
    pub flagged: bool,
    pub last_updated: u64,
}

impl ReputationData {
    /// Activity band, ≤ 40 points.
    fn activity_band(&self) -> u32 {
        match self.tx_count {
            0..=9 => 0,
            10..=49 => 10,
            50..=249 => 20,
            250..=999 => 30,
            _ => 40,
        }
    }

    /// Contract-interaction band, ≤ 20 points.
    fn contract_band(&self) -> u32 {
        match self.contract_interactions {
            0..=4 => 0,
            5..=24 => 5,
            25..=99 => 10,
            _ => 20,
        }
    }

    /// Behaviour = activity band + success-rate·40/100 + contract band.
    pub fn compute_behaviour_score(&self) -> u8 {
        let success_component = if self.tx_count == 0 {
            0
        } else {
            (self.successful_txs * 40 / self.tx_count) as u32
        };
        (self.activity_band() + success_component + self.contract_band()).min(100) as u8
    }

    /// Economic = 10·log₁₀(volumeCoin + 1) + high-volume bonuses, ≤ 100.
    pub fn compute_economic_score(&self) -> u8 {
        let volume_coin = (self.total_volume_sats / SATS_PER_COIN) as u64;
        let mut score = 10 * (volume_coin + 1).ilog10();
        if volume_coin >= 100_000 {
            score += 20;
        } else if volume_coin >= 10_000 {
            score += 10;
        }
        score.min(100) as u8
    }

    /// Weighted clip of the three sub-scores; pre-qualification users
    /// keep their L1 score; a flag caps the result at 50.
    pub fn compute_aggregate(&self) -> u8 {
        let aggregate = if self.tx_count < MIN_QUALIFYING_TXS {
            self.l1_hat_score
        } else {
            let weighted = 60 * self.l1_hat_score as u32
                + 25 * self.behaviour_score as u32
                + 15 * self.economic_score as u32;
            (weighted / 100).min(100) as u8
        };
        if self.flagged {
            aggregate.min(FLAGGED_SCORE_CAP)
        } else {
            aggregate
        }
    }

    fn refresh(&mut self, now: u64) {
        self.behaviour_score = self.compute_behaviour_score();
        self.economic_score = self.compute_economic_score();
        self.aggregate_score = self.compute_aggregate();
        self.last_updated = now;
    }
}

/// Graduated user benefits, a pure function of the aggregate score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Benefits {
    /// 0% at ≤70, scaling linearly to 50% at 100
    pub gas_discount_pct: u8,
    pub challenge_period_secs: u64,
    pub rate_limit_multiplier: u32,
    /// Soft-finality before the challenge window closes
    pub instant_soft_finality: bool,
    pub max_unverified_transfer_sats: i64,
}

impl Benefits {
    pub fn for_score(score: u8) -> Benefits {
        let gas_discount_pct = if score <= GAS_DISCOUNT_SCORE {
            0
        } else {
            ((score - GAS_DISCOUNT_SCORE) as u32 * 50 / 30).min(50) as u8
        };
        let challenge_period_secs = if score >= FAST_WITHDRAWAL_SCORE {
            24 * 3600
        } else if score >= 60 {
            3 * 24 * 3600
        } else {
            7 * 24 * 3600
        };
        let rate_limit_multiplier = match score {
            90..=100 => 10,
            80..=89 => 7,
            70..=79 => 5,
            50..=69 => 2,
            _ => 1,
        };
        let max_unverified_transfer_sats = match score {
            90..=100 => 1000 * SATS_PER_COIN,
            80..=89 => 100 * SATS_PER_COIN,
            60..=79 => 10 * SATS_PER_COIN,
            _ => SATS_PER_COIN,
        };
        Benefits {
            gas_discount_pct,
            challenge_period_secs,
            rate_limit_multiplier,
            instant_soft_finality: score > FAST_WITHDRAWAL_SCORE,
            max_unverified_transfer_sats,
        }
    }
}

pub struct ReputationManager {
    users: Mutex<BTreeMap<Address, ReputationData>>,
}

impl Default for ReputationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ReputationManager {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(BTreeMap::new()),
        }
    }

    /// Import one L1 HAT score (0–100).
    pub fn import_l1_score(
        &self,
        address: &Address,
        score: u8,
        now: u64,
    ) -> Result<(), ReputationError> {
        if score > 100 {
            return Err(ReputationError::ScoreOutOfRange(score));
        }
        let mut users = self.users.lock().unwrap();
        let data = users.entry(*address).or_default();
        data.l1_hat_score = score;
        data.refresh(now);
        Ok(())
    }

    /// Bulk import for the periodic L1 sync (scheduling is the caller's).
    pub fn sync_l1_scores<I>(&self, scores: I, now: u64) -> usize
    where
        I: IntoIterator<Item = (Address, u8)>,
    {
        let mut users = self.users.lock().unwrap();
        let mut imported = 0;
        for (address, score) in scores {
            if score > 100 {
                log::warn!("Skipping out-of-range L1 score {} for {}", score, address);
                continue;
            }
            let data = users.entry(address).or_default();
            data.l1_hat_score = score;
            data.refresh(now);
            imported += 1;
        }
        imported
    }

    /// Record one L2 transaction outcome for the sender.
    pub fn record_transaction(
        &self,
        address: &Address,
        success: bool,
        volume_sats: i64,
        is_contract: bool,
        now: u64,
    ) -> Result<(), ReputationError> {
        if volume_sats < 0 {
            return Err(ReputationError::NegativeVolume(volume_sats));
        }
        let mut users = self.users.lock().unwrap();
        let data = users.entry(*address).or_default();
        data.tx_count += 1;
        if success {
            data.successful_txs += 1;
            data.total_volume_sats = data.total_volume_sats.saturating_add(volume_sats);
        } else {
            data.failed_txs += 1;
        }
        if is_contract {
            data.contract_interactions += 1;
        }
        data.refresh(now);
        Ok(())
    }

    /// Suspicious-pattern check. Does not flag by itself.
    pub fn detect_gaming(&self, address: &Address) -> Option<GamingReason> {
        let users = self.users.lock().unwrap();
        let data = users.get(address)?;
        if data.flagged {
            return Some(GamingReason::AlreadyFlagged);
        }
        // Wash pattern: lots of traffic, trivial value (< 0.00001 coin/tx)
        if data.tx_count >= 100 && data.total_volume_sats < data.tx_count as i64 * 1000 {
            return Some(GamingReason::WashPattern);
        }
        if data.tx_count >= 20 && data.failed_txs * 100 / data.tx_count > 50 {
            return Some(GamingReason::HighFailureRate);
        }
        let local = (data.behaviour_score as u32 + data.economic_score as u32) / 2;
        if local > data.l1_hat_score as u32 + 30 {
            return Some(GamingReason::ScoreGap);
        }
        None
    }

    /// Flag a user: the aggregate is capped at 50 until cleared.
    pub fn flag_user(&self, address: &Address, now: u64) {
        let mut users = self.users.lock().unwrap();
        let data = users.entry(*address).or_default();
        data.flagged = true;
        data.refresh(now);
        log::warn!("Flagged {} for reputation gaming", address);
    }

    pub fn clear_flag(&self, address: &Address, now: u64) -> bool {
        let mut users = self.users.lock().unwrap();
        match users.get_mut(address) {
            Some(data) if data.flagged => {
                data.flagged = false;
                data.refresh(now);
                true
            }
            _ => false,
        }
    }

    pub fn get_aggregated_reputation(&self, address: &Address) -> u8 {
        self.users
            .lock()
            .unwrap()
            .get(address)
            .map(|d| d.aggregate_score)
            .unwrap_or(0)
    }

    /// Benefits are derived from the aggregate alone.
    pub fn get_benefits(&self, address: &Address) -> Benefits {
        Benefits::for_score(self.get_aggregated_reputation(address))
    }

    pub fn get_data(&self, address: &Address) -> Option<ReputationData> {
        self.users.lock().unwrap().get(address).cloned()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
