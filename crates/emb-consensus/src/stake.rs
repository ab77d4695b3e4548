// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - SEQUENCER STAKE LEDGER
//
// Registered sequencers with their compressed public keys and staked
// satoshi. Active ⇔ registered ∧ stake > 0; the active set drives the
// 2/3 thresholds in block finalization and mint consensus.
// Stake is reduced only by the fraud-proof system.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::sync::Mutex;

use emb_crypto::{pubkey_hex, Address, Hash256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StakeError {
    AlreadyRegistered(Address),
    UnknownSequencer(Address),
    NonPositiveAmount(i64),
    /// Public key does not hash to the registering address
    KeyAddressMismatch(Address),
}

impl std::fmt::Display for StakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StakeError::AlreadyRegistered(a) => write!(f, "Sequencer {} already registered", a),
            StakeError::UnknownSequencer(a) => write!(f, "Sequencer {} not registered", a),
            StakeError::NonPositiveAmount(v) => write!(f, "Stake amount {} must be positive", v),
            StakeError::KeyAddressMismatch(a) => {
                write!(f, "Public key does not derive address {}", a)
            }
        }
    }
}

impl std::error::Error for StakeError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerInfo {
    pub address: Address,
    #[serde(with = "pubkey_hex")]
    pub public_key: [u8; 33],
    /// Staked satoshi; zero after a full slash
    pub stake: i64,
    pub registered_at: u64,
    /// Cumulative satoshi removed by slashing
    pub total_slashed: i64,
    /// Hash of the last block this sequencer produced (liveness anchor)
    pub last_produced_block: Hash256,
}

impl SequencerInfo {
    pub fn is_active(&self) -> bool {
        self.stake > 0
    }
}

/// The registered sequencer set. One mutex guards the whole map; reads
/// and writes serialize through it.
#[derive(Debug, Default)]
pub struct SequencerSet {
    inner: Mutex<BTreeMap<Address, SequencerInfo>>,
}

impl SequencerSet {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a sequencer. The address must be Hash160 of the key.
    pub fn register(
        &self,
        public_key: [u8; 33],
        stake: i64,
        now: u64,
    ) -> Result<Address, StakeError> {
        if stake <= 0 {
            return Err(StakeError::NonPositiveAmount(stake));
        }
        let address = emb_crypto::pubkey_to_address(&public_key)
            .ok_or(StakeError::KeyAddressMismatch(Address::ZERO))?;
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(&address) {
            return Err(StakeError::AlreadyRegistered(address));
        }
        inner.insert(
            address,
            SequencerInfo {
                address,
                public_key,
                stake,
                registered_at: now,
                total_slashed: 0,
                last_produced_block: Hash256::ZERO,
            },
        );
        log::info!("Registered sequencer {} with {} sats staked", address, stake);
        Ok(address)
    }

    pub fn deposit_stake(&self, address: &Address, amount: i64) -> Result<i64, StakeError> {
        if amount <= 0 {
            return Err(StakeError::NonPositiveAmount(amount));
        }
        let mut inner = self.inner.lock().unwrap();
        let info = inner
            .get_mut(address)
            .ok_or(StakeError::UnknownSequencer(*address))?;
        info.stake = info.stake.saturating_add(amount);
        Ok(info.stake)
    }

    /// Remove up to `amount` from the stake; returns what was actually
    /// removed (capped at the available stake). Fraud-system use only.
    pub(crate) fn slash(&self, address: &Address, amount: i64) -> Result<i64, StakeError> {
        if amount <= 0 {
            return Err(StakeError::NonPositiveAmount(amount));
        }
        let mut inner = self.inner.lock().unwrap();
        let info = inner
            .get_mut(address)
            .ok_or(StakeError::UnknownSequencer(*address))?;
        let removed = info.stake.min(amount);
        info.stake -= removed;
        info.total_slashed = info.total_slashed.saturating_add(removed);
        Ok(removed)
    }

    pub fn record_produced_block(&self, address: &Address, block_hash: Hash256) {
        if let Some(info) = self.inner.lock().unwrap().get_mut(address) {
            info.last_produced_block = block_hash;
        }
    }

    pub fn get(&self, address: &Address) -> Option<SequencerInfo> {
        self.inner.lock().unwrap().get(address).cloned()
    }

    pub fn stake_of(&self, address: &Address) -> i64 {
        self.inner
            .lock()
            .unwrap()
            .get(address)
            .map(|i| i.stake)
            .unwrap_or(0)
    }

    pub fn public_key_of(&self, address: &Address) -> Option<[u8; 33]> {
        self.inner
            .lock()
            .unwrap()
            .get(address)
            .map(|i| i.public_key)
    }

    /// Registered and stake > 0: the denominator of every 2/3 threshold.
    pub fn is_active(&self, address: &Address) -> bool {
        self.inner
            .lock()
            .unwrap()
            .get(address)
            .map(|i| i.is_active())
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.is_active())
            .count()
    }

    pub fn active_sequencers(&self) -> Vec<Address> {
        self.inner
            .lock()
            .unwrap()
            .values()
            .filter(|i| i.is_active())
            .map(|i| i.address)
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
