// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - MINT CONSENSUS
//
// Collects signed MintConfirmations per L1 burn and fires once ⌈2n/3⌉ of
// the active sequencers (n ≥ 3) agree. Confirmations from unknown senders
// or with bad signatures are dropped; duplicates are idempotent no-ops.
// PENDING states older than 600 s are failed by the periodic sweep; the
// state set is pruned to the most recent 10,000 entries.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use emb_core::codec;
use emb_core::{consensus_threshold, MINT_CONSENSUS_TIMEOUT_SECS, MIN_ACTIVE_SEQUENCERS};
use emb_crypto::{sha3_256, verify_signature, Address, Hash256, KeyPair};
use serde::{Deserialize, Serialize};

use crate::{SequencerCountGetter, SequencerPubKeyGetter, SequencerVerifier};

/// Bound on retained consensus states
pub const MAX_TRACKED_STATES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusStatus {
    Pending,
    Reached,
    Minted,
    Failed,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    UnknownSequencer(Address),
    BadSignature(Address),
    /// Confirmation disagrees with the recipient/amount already on file
    ConflictingConfirmation(Hash256),
    /// Burn is already past PENDING
    AlreadySettled(Hash256, ConsensusStatus),
}

impl std::fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConsensusError::UnknownSequencer(a) => write!(f, "Unknown sequencer {}", a),
            ConsensusError::BadSignature(a) => write!(f, "Bad signature from sequencer {}", a),
            ConsensusError::ConflictingConfirmation(h) => {
                write!(f, "Conflicting confirmation for burn {}", h)
            }
            ConsensusError::AlreadySettled(h, s) => {
                write!(f, "Burn {} already settled as {:?}", h, s)
            }
        }
    }
}

impl std::error::Error for ConsensusError {}

/// One sequencer's signed attestation that a burn validated locally.
/// The signature covers the hash of the signature-free form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintConfirmation {
    pub l1_tx_hash: Hash256,
    pub l2_recipient: Address,
    pub amount: i64,
    pub sequencer: Address,
    pub signature: Vec<u8>,
    pub timestamp: u64,
}

impl MintConfirmation {
    pub fn signing_hash(&self) -> Hash256 {
        let mut out = Vec::with_capacity(32 + 20 + 8 + 20 + 8);
        codec::write_hash(&mut out, &self.l1_tx_hash);
        codec::write_address(&mut out, &self.l2_recipient);
        codec::write_i64_le(&mut out, self.amount);
        codec::write_address(&mut out, &self.sequencer);
        codec::write_u64_le(&mut out, self.timestamp);
        sha3_256(&out)
    }

    /// Build and sign a confirmation with the local sequencer key.
    pub fn signed(
        l1_tx_hash: Hash256,
        l2_recipient: Address,
        amount: i64,
        keypair: &KeyPair,
        timestamp: u64,
    ) -> Result<MintConfirmation, emb_crypto::CryptoError> {
        let mut confirmation = MintConfirmation {
            l1_tx_hash,
            l2_recipient,
            amount,
            sequencer: keypair.address(),
            signature: Vec::new(),
            timestamp,
        };
        let sig = emb_crypto::sign_recoverable(&confirmation.signing_hash(), &keypair.secret_key)?;
        confirmation.signature = sig.to_vec();
        Ok(confirmation)
    }

    pub fn verify(&self, pubkey: &[u8; 33]) -> bool {
        verify_signature(&self.signing_hash(), &self.signature, pubkey)
    }
}

/// Consensus bookkeeping for one burn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintConsensusState {
    pub l1_tx_hash: Hash256,
    pub l2_recipient: Address,
    pub amount: i64,
    pub confirmations: BTreeMap<Address, MintConfirmation>,
    pub first_seen: u64,
    pub status: ConsensusStatus,
}

impl MintConsensusState {
    pub fn confirmation_count(&self) -> usize {
        self.confirmations.len()
    }
}

/// Fired (after the lock is released) when a burn reaches consensus.
pub type ConsensusReachedCallback = Arc<dyn Fn(&MintConsensusState) + Send + Sync>;
/// Fired when a pending burn times out.
pub type ConsensusFailedCallback = Arc<dyn Fn(&MintConsensusState) + Send + Sync>;

pub struct MintConsensusManager {
    timeout_secs: u64,
    sequencer_count: SequencerCountGetter,
    sequencer_verifier: SequencerVerifier,
    sequencer_pubkeys: SequencerPubKeyGetter,
    reached_callback: Mutex<Option<ConsensusReachedCallback>>,
    failed_callback: Mutex<Option<ConsensusFailedCallback>>,
    states: Mutex<BTreeMap<Hash256, MintConsensusState>>,
}

impl MintConsensusManager {
    pub fn new(
        sequencer_count: SequencerCountGetter,
        sequencer_verifier: SequencerVerifier,
        sequencer_pubkeys: SequencerPubKeyGetter,
    ) -> Self {
        Self {
            timeout_secs: MINT_CONSENSUS_TIMEOUT_SECS,
            sequencer_count,
            sequencer_verifier,
            sequencer_pubkeys,
            reached_callback: Mutex::new(None),
            failed_callback: Mutex::new(None),
            states: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn on_consensus_reached(&self, callback: ConsensusReachedCallback) {
        *self.reached_callback.lock().unwrap() = Some(callback);
    }

    pub fn on_consensus_failed(&self, callback: ConsensusFailedCallback) {
        *self.failed_callback.lock().unwrap() = Some(callback);
    }

    /// Route one confirmation. Returns Ok(true) if it was accepted and
    /// counted, Ok(false) for an idempotent duplicate.
    pub fn submit_confirmation(
        &self,
        confirmation: MintConfirmation,
        now: u64,
    ) -> Result<bool, ConsensusError> {
        // Sender gating happens before any state is touched
        if !(self.sequencer_verifier)(&confirmation.sequencer) {
            return Err(ConsensusError::UnknownSequencer(confirmation.sequencer));
        }
        let pubkey = (self.sequencer_pubkeys)(&confirmation.sequencer)
            .ok_or(ConsensusError::UnknownSequencer(confirmation.sequencer))?;
        if !confirmation.verify(&pubkey) {
            return Err(ConsensusError::BadSignature(confirmation.sequencer));
        }

        let mut reached: Option<MintConsensusState> = None;
        let accepted = {
            let mut states = self.states.lock().unwrap();
            let state = states
                .entry(confirmation.l1_tx_hash)
                .or_insert_with(|| MintConsensusState {
                    l1_tx_hash: confirmation.l1_tx_hash,
                    l2_recipient: confirmation.l2_recipient,
                    amount: confirmation.amount,
                    confirmations: BTreeMap::new(),
                    first_seen: now,
                    status: ConsensusStatus::Pending,
                });

            match state.status {
                ConsensusStatus::Pending => {}
                // Late confirmations after REACHED are harmless duplicates
                ConsensusStatus::Reached | ConsensusStatus::Minted => return Ok(false),
                status => {
                    return Err(ConsensusError::AlreadySettled(
                        confirmation.l1_tx_hash,
                        status,
                    ))
                }
            }

            if state.l2_recipient != confirmation.l2_recipient
                || state.amount != confirmation.amount
            {
                return Err(ConsensusError::ConflictingConfirmation(
                    confirmation.l1_tx_hash,
                ));
            }

            if state.confirmations.contains_key(&confirmation.sequencer) {
                return Ok(false);
            }
            state
                .confirmations
                .insert(confirmation.sequencer, confirmation);

            // Re-evaluate the threshold after every accepted confirmation
            let active = (self.sequencer_count)();
            if active >= MIN_ACTIVE_SEQUENCERS
                && state.confirmation_count() >= consensus_threshold(active)
            {
                state.status = ConsensusStatus::Reached;
                reached = Some(state.clone());
            }

            Self::prune(&mut states);
            true
        };

        if let Some(state) = reached {
            log::info!(
                "Mint consensus reached for burn {} ({} confirmations)",
                state.l1_tx_hash,
                state.confirmation_count()
            );
            let callback = self.reached_callback.lock().unwrap().clone();
            if let Some(callback) = callback {
                callback(&state);
            }
        }
        Ok(accepted)
    }

    /// Mark a reached burn as minted (called once the BURN_MINT lands).
    pub fn mark_minted(&self, l1_tx_hash: &Hash256) -> bool {
        let mut states = self.states.lock().unwrap();
        match states.get_mut(l1_tx_hash) {
            Some(state) if state.status == ConsensusStatus::Reached => {
                state.status = ConsensusStatus::Minted;
                true
            }
            _ => false,
        }
    }

    /// Periodic sweep: PENDING states older than the timeout become FAILED
    /// and fire the failed callback once each. Returns the failed hashes.
    pub fn process_timeouts(&self, now: u64) -> Vec<Hash256> {
        let mut failed = Vec::new();
        {
            let mut states = self.states.lock().unwrap();
            for state in states.values_mut() {
                if state.status == ConsensusStatus::Pending
                    && now > state.first_seen + self.timeout_secs
                {
                    state.status = ConsensusStatus::Failed;
                    failed.push(state.clone());
                }
            }
        }

        let hashes: Vec<Hash256> = failed.iter().map(|s| s.l1_tx_hash).collect();
        if !failed.is_empty() {
            let callback = self.failed_callback.lock().unwrap().clone();
            for state in &failed {
                log::warn!(
                    "Mint consensus failed for burn {} after {}s ({}/{} confirmations)",
                    state.l1_tx_hash,
                    self.timeout_secs,
                    state.confirmation_count(),
                    consensus_threshold((self.sequencer_count)())
                );
                if let Some(callback) = &callback {
                    callback(state);
                }
            }
        }
        hashes
    }

    pub fn status(&self, l1_tx_hash: &Hash256) -> Option<ConsensusStatus> {
        self.states
            .lock()
            .unwrap()
            .get(l1_tx_hash)
            .map(|s| s.status)
    }

    pub fn state(&self, l1_tx_hash: &Hash256) -> Option<MintConsensusState> {
        self.states.lock().unwrap().get(l1_tx_hash).cloned()
    }

    pub fn tracked_count(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    /// Keep only the most recent MAX_TRACKED_STATES entries by first-seen.
    fn prune(states: &mut BTreeMap<Hash256, MintConsensusState>) {
        if states.len() <= MAX_TRACKED_STATES {
            return;
        }
        let mut by_age: Vec<(u64, Hash256)> = states
            .values()
            .map(|s| (s.first_seen, s.l1_tx_hash))
            .collect();
        by_age.sort_unstable();
        let excess = states.len() - MAX_TRACKED_STATES;
        for (_, hash) in by_age.into_iter().take(excess) {
            states.remove(&hash);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
