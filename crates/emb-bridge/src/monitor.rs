// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - L1 CHAIN MONITOR
//
// Scans every incoming L1 block for burns targeting the local chain,
// tracks confirmations (lastProcessedHeight − burnHeight + 1), triggers
// validation exactly once at 6 confirmations, and forwards each success
// to mint consensus as a confirmation signed by the local sequencer.
// An L1 reorg at height H drops all detections at or above H and rewinds
// lastProcessedHeight to H−1.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use emb_crypto::{Hash256, KeyPair};
use serde::{Deserialize, Serialize};

use crate::burn::{parse_burn_transaction, BurnData};
use crate::consensus::MintConfirmation;
use crate::validator::{BurnValidationError, BurnValidator, ValidatedBurn};
use crate::L1Block;

/// Tracked-set bound; beyond it, stale validated burns are discarded
pub const MAX_TRACKED_BURNS: usize = 10_000;

/// Validated burns older than this are prunable (seconds)
pub const PRUNE_AGE_SECS: u64 = 3600;

/// A burn seen on L1, not yet (or just) validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedBurn {
    pub l1_tx_hash: Hash256,
    pub l1_block_number: u64,
    pub data: BurnData,
    pub confirmations: u32,
    /// Validation has been kicked off (exactly-once gate)
    pub validation_triggered: bool,
    /// Validation succeeded
    pub validated: bool,
    pub first_seen: u64,
}

pub type BurnDetectedCallback = Arc<dyn Fn(&DetectedBurn) + Send + Sync>;
pub type BurnValidatedCallback =
    Arc<dyn Fn(&Hash256, &Result<ValidatedBurn, BurnValidationError>) + Send + Sync>;
/// Receives the locally signed confirmation; usually wired to
/// `MintConsensusManager::submit_confirmation`.
pub type ConfirmationSink = Arc<dyn Fn(MintConfirmation) + Send + Sync>;

struct MonitorInner {
    detected: BTreeMap<Hash256, DetectedBurn>,
    last_processed_height: u64,
}

pub struct L1ChainMonitor {
    validator: BurnValidator,
    signer: KeyPair,
    detected_callback: Mutex<Option<BurnDetectedCallback>>,
    validated_callback: Mutex<Option<BurnValidatedCallback>>,
    confirmation_sink: Mutex<Option<ConfirmationSink>>,
    required_confirmations: u32,
    inner: Mutex<MonitorInner>,
}

impl L1ChainMonitor {
    pub fn new(validator: BurnValidator, required_confirmations: u32, signer: KeyPair) -> Self {
        Self {
            validator,
            signer,
            detected_callback: Mutex::new(None),
            validated_callback: Mutex::new(None),
            confirmation_sink: Mutex::new(None),
            required_confirmations,
            inner: Mutex::new(MonitorInner {
                detected: BTreeMap::new(),
                last_processed_height: 0,
            }),
        }
    }

    pub fn on_burn_detected(&self, callback: BurnDetectedCallback) {
        *self.detected_callback.lock().unwrap() = Some(callback);
    }

    pub fn on_burn_validated(&self, callback: BurnValidatedCallback) {
        *self.validated_callback.lock().unwrap() = Some(callback);
    }

    pub fn on_confirmation(&self, sink: ConfirmationSink) {
        *self.confirmation_sink.lock().unwrap() = Some(sink);
    }

    pub fn last_processed_height(&self) -> u64 {
        self.inner.lock().unwrap().last_processed_height
    }

    pub fn detected_burn(&self, l1_tx_hash: &Hash256) -> Option<DetectedBurn> {
        self.inner.lock().unwrap().detected.get(l1_tx_hash).cloned()
    }

    pub fn detected_count(&self) -> usize {
        self.inner.lock().unwrap().detected.len()
    }

    /// Ingest one L1 block: detect new burns, recompute confirmations,
    /// kick validation for burns that just crossed the threshold.
    pub fn process_l1_block(&self, block: &L1Block, now: u64) {
        let mut newly_detected: Vec<DetectedBurn> = Vec::new();
        let mut to_validate: Vec<Hash256> = Vec::new();

        {
            let mut inner = self.inner.lock().unwrap();
            inner.last_processed_height = block.height;

            for tx in &block.transactions {
                let Some(data) = parse_burn_transaction(tx) else {
                    continue;
                };
                if data.chain_id != self.validator.chain_id() {
                    continue;
                }
                if inner.detected.contains_key(&tx.txid) {
                    continue;
                }
                let burn = DetectedBurn {
                    l1_tx_hash: tx.txid,
                    l1_block_number: block.height,
                    data,
                    confirmations: 1,
                    validation_triggered: false,
                    validated: false,
                    first_seen: now,
                };
                inner.detected.insert(tx.txid, burn.clone());
                newly_detected.push(burn);
            }

            // Recompute confirmations for everything tracked
            let last = inner.last_processed_height;
            for burn in inner.detected.values_mut() {
                if last >= burn.l1_block_number {
                    burn.confirmations = (last - burn.l1_block_number + 1) as u32;
                }
                if burn.confirmations >= self.required_confirmations && !burn.validation_triggered {
                    burn.validation_triggered = true;
                    to_validate.push(burn.l1_tx_hash);
                }
            }

            Self::prune(&mut inner.detected, now);
        }

        // Callbacks fire without the monitor lock held
        if !newly_detected.is_empty() {
            let callback = self.detected_callback.lock().unwrap().clone();
            for burn in &newly_detected {
                log::info!(
                    "Detected burn {} at L1 height {} ({} sats)",
                    burn.l1_tx_hash,
                    burn.l1_block_number,
                    burn.data.amount
                );
                if let Some(callback) = &callback {
                    callback(burn);
                }
            }
        }

        for tx_hash in to_validate {
            self.run_validation(&tx_hash, now);
        }
    }

    fn run_validation(&self, l1_tx_hash: &Hash256, now: u64) {
        let result = self.validator.validate_burn(l1_tx_hash);

        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(burn) = inner.detected.get_mut(l1_tx_hash) {
                match &result {
                    Ok(validated) => {
                        burn.validated = true;
                        burn.confirmations = validated.confirmations;
                    }
                    // The fetcher had nothing yet; allow a retry on the
                    // next block instead of burning the exactly-once gate
                    Err(BurnValidationError::TxNotFound(_)) => {
                        burn.validation_triggered = false;
                    }
                    Err(_) => {}
                }
            }
        }

        let callback = self.validated_callback.lock().unwrap().clone();
        if let Some(callback) = &callback {
            callback(l1_tx_hash, &result);
        }

        match result {
            Ok(validated) => {
                let confirmation = match MintConfirmation::signed(
                    *l1_tx_hash,
                    validated.data.recipient_address(),
                    validated.data.amount,
                    &self.signer,
                    now,
                ) {
                    Ok(c) => c,
                    Err(e) => {
                        log::warn!("Failed to sign mint confirmation: {}", e);
                        return;
                    }
                };
                let sink = self.confirmation_sink.lock().unwrap().clone();
                if let Some(sink) = sink {
                    sink(confirmation);
                }
            }
            Err(e) => log::warn!("Burn {} failed validation: {}", l1_tx_hash, e),
        }
    }

    /// L1 reorg at `height`: drop detections at or above it and rewind.
    /// Returns the number of detections dropped.
    pub fn handle_reorg(&self, height: u64) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.detected.len();
        inner.detected.retain(|_, burn| burn.l1_block_number < height);
        inner.last_processed_height = height.saturating_sub(1);
        let dropped = before - inner.detected.len();
        if dropped > 0 {
            log::warn!("L1 reorg at height {}: dropped {} detected burns", height, dropped);
        }
        dropped
    }

    /// Above the tracked-set bound, discard validated burns older than an
    /// hour (they are in the registry by then).
    fn prune(detected: &mut BTreeMap<Hash256, DetectedBurn>, now: u64) {
        if detected.len() <= MAX_TRACKED_BURNS {
            return;
        }
        detected.retain(|_, burn| !(burn.validated && burn.first_seen + PRUNE_AGE_SECS < now));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
