// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - TIMESTAMP DISCIPLINE
//
// Per-block timestamp checks and per-sequencer behaviour records.
// A block timestamp must be strictly after its predecessor (≥ 1 s), at
// most 120 s ahead of the validator clock, and within 300 s of the L1
// reference. Repeat offenders are flagged for manipulation; the flag is
// sticky until explicitly cleared.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::sync::Mutex;

use emb_crypto::Address;
use serde::{Deserialize, Serialize};

use crate::{MAX_CLOCK_AHEAD_SECS, MAX_L1_DRIFT_SECS, MIN_BLOCK_TIME_DELTA_SECS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampViolation {
    /// Timestamp not at least 1 s after the predecessor
    NotAfterParent { timestamp: u64, parent: u64 },
    /// More than 120 s ahead of the validator wall clock
    AheadOfClock { timestamp: u64, now: u64 },
    /// Outside the 300 s band around the L1 reference
    ExcessiveL1Drift { drift_secs: i64 },
}

impl std::fmt::Display for TimestampViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TimestampViolation::NotAfterParent { timestamp, parent } => write!(
                f,
                "Timestamp {} not after parent {} (min delta {}s)",
                timestamp, parent, MIN_BLOCK_TIME_DELTA_SECS
            ),
            TimestampViolation::AheadOfClock { timestamp, now } => write!(
                f,
                "Timestamp {} more than {}s ahead of clock {}",
                timestamp, MAX_CLOCK_AHEAD_SECS, now
            ),
            TimestampViolation::ExcessiveL1Drift { drift_secs } => {
                write!(f, "L1 drift {}s exceeds {}s bound", drift_secs, MAX_L1_DRIFT_SECS)
            }
        }
    }
}

impl std::error::Error for TimestampViolation {}

#[derive(Debug, Clone)]
pub struct TimestampValidatorConfig {
    pub max_clock_ahead_secs: u64,
    pub max_l1_drift_secs: u64,
    /// Consecutive violations that trigger the manipulation flag
    pub consecutive_violation_threshold: u32,
    /// Violation-rate flag: rate above this percent over ≥ 10 blocks
    pub violation_rate_threshold_pct: u64,
    /// EMA-drift flag: |EMA| above this with any violation over ≥ 10 blocks
    pub manipulation_drift_threshold_secs: u64,
}

impl Default for TimestampValidatorConfig {
    fn default() -> Self {
        Self {
            max_clock_ahead_secs: MAX_CLOCK_AHEAD_SECS,
            max_l1_drift_secs: MAX_L1_DRIFT_SECS,
            consecutive_violation_threshold: 3,
            violation_rate_threshold_pct: 20,
            manipulation_drift_threshold_secs: MAX_L1_DRIFT_SECS,
        }
    }
}

/// Behaviour record for one sequencer.
/// The drift EMA (α = 0.1) is kept in centiseconds, pure integer math.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SequencerTimingRecord {
    pub blocks_produced: u64,
    pub violation_count: u64,
    pub consecutive_violations: u32,
    /// EMA of signed L1 drift, centiseconds
    pub avg_l1_drift_centi: i64,
    /// Largest absolute drift observed, seconds
    pub max_l1_drift_secs: u64,
    pub flagged_for_manipulation: bool,
}

impl SequencerTimingRecord {
    /// EMA update: new = 0.9·old + 0.1·sample, in centiseconds.
    fn update_drift(&mut self, drift_secs: i64) {
        let sample_centi = drift_secs.saturating_mul(100);
        self.avg_l1_drift_centi = (9 * self.avg_l1_drift_centi + sample_centi) / 10;
        self.max_l1_drift_secs = self.max_l1_drift_secs.max(drift_secs.unsigned_abs());
    }

    pub fn violation_rate_pct(&self) -> u64 {
        if self.blocks_produced == 0 {
            return 0;
        }
        self.violation_count * 100 / self.blocks_produced
    }
}

/// Stateful timestamp validator shared by block import.
#[derive(Debug, Default)]
pub struct TimestampValidator {
    config: TimestampValidatorConfig,
    records: Mutex<BTreeMap<Address, SequencerTimingRecord>>,
}

impl TimestampValidator {
    pub fn new(config: TimestampValidatorConfig) -> Self {
        Self {
            config,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// Check one block timestamp and update the sequencer's record.
    /// `parent_timestamp` is None for the first block after genesis import.
    pub fn validate_block_timestamp(
        &self,
        sequencer: &Address,
        timestamp: u64,
        parent_timestamp: Option<u64>,
        now: u64,
        l1_reference: u64,
    ) -> Result<(), TimestampViolation> {
        let drift_secs = timestamp as i64 - l1_reference as i64;

        let violation = if let Some(parent) = parent_timestamp.filter(|p| {
            timestamp < p.saturating_add(MIN_BLOCK_TIME_DELTA_SECS)
        }) {
            Some(TimestampViolation::NotAfterParent { timestamp, parent })
        } else if timestamp > now + self.config.max_clock_ahead_secs {
            Some(TimestampViolation::AheadOfClock { timestamp, now })
        } else if drift_secs.unsigned_abs() > self.config.max_l1_drift_secs {
            Some(TimestampViolation::ExcessiveL1Drift { drift_secs })
        } else {
            None
        };

        let mut records = self.records.lock().unwrap();
        let record = records.entry(*sequencer).or_default();
        record.blocks_produced += 1;
        record.update_drift(drift_secs);

        if violation.is_some() {
            record.violation_count += 1;
            record.consecutive_violations += 1;
        } else {
            record.consecutive_violations = 0;
        }

        // Sticky manipulation flag
        if !record.flagged_for_manipulation {
            let by_streak =
                record.consecutive_violations >= self.config.consecutive_violation_threshold;
            let by_rate = record.blocks_produced >= 10
                && record.violation_rate_pct() > self.config.violation_rate_threshold_pct;
            let by_drift = record.blocks_produced >= 10
                && record.violation_count > 0
                && record.avg_l1_drift_centi.unsigned_abs()
                    > self.config.manipulation_drift_threshold_secs * 100;
            if by_streak || by_rate || by_drift {
                record.flagged_for_manipulation = true;
                log::warn!(
                    "Sequencer {} flagged for timestamp manipulation ({} violations / {} blocks)",
                    sequencer,
                    record.violation_count,
                    record.blocks_produced
                );
            }
        }

        match violation {
            Some(v) => Err(v),
            None => Ok(()),
        }
    }

    pub fn record(&self, sequencer: &Address) -> Option<SequencerTimingRecord> {
        self.records.lock().unwrap().get(sequencer).cloned()
    }

    pub fn is_flagged(&self, sequencer: &Address) -> bool {
        self.records
            .lock()
            .unwrap()
            .get(sequencer)
            .map(|r| r.flagged_for_manipulation)
            .unwrap_or(false)
    }

    /// Explicitly clear a sticky manipulation flag (also resets the streak).
    pub fn clear_flag(&self, sequencer: &Address) -> bool {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(sequencer) {
            Some(record) if record.flagged_for_manipulation => {
                record.flagged_for_manipulation = false;
                record.consecutive_violations = 0;
                true
            }
            _ => false,
        }
    }

    pub fn flagged_sequencers(&self) -> Vec<Address> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r)| r.flagged_for_manipulation)
            .map(|(a, _)| *a)
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
