// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - L2 CHAIN REGISTRY
//
// Per-chain deployment descriptors kept on L1: name, deployer, stake,
// deployment parameters, status machine, and the state-root pointer.
// Registration validates names, stake and parameter ranges; chain ids are
// generated deterministically from (name, deployer, timestamp, counter)
// hashed into the configured range, retried on collision. Descriptors are
// immutable after registration except for the targeted update channels.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::sync::Mutex;

use emb_core::codec;
use emb_core::config::{
    MAX_BLOCK_TIME_SECS, MAX_CHALLENGE_PERIOD_SECS, MIN_BLOCK_TIME_SECS,
    MIN_CHALLENGE_PERIOD_SECS,
};
use emb_core::{MIN_ACTIVE_SEQUENCERS, SATS_PER_COIN};
use emb_crypto::{sha3_256, Address, Hash256};
use serde::{Deserialize, Serialize};

/// Name length bounds for registered chains
pub const MIN_CHAIN_NAME_LEN: usize = 3;
pub const MAX_CHAIN_NAME_LEN: usize = 64;

/// Stake a deployer must post to register a chain (100 coin)
pub const MIN_DEPLOYER_STAKE_SATS: i64 = 100 * SATS_PER_COIN;

/// Chain ids below this are reserved for well-known networks
pub const CHAIN_ID_FLOOR: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainStatus {
    Bootstrapping,
    Active,
    Paused,
    Emergency,
    Deprecated,
}

impl ChainStatus {
    /// Allowed transitions: BOOTSTRAPPING→ACTIVE→{PAUSED, EMERGENCY,
    /// DEPRECATED}; paused and emergency chains may resume or deprecate;
    /// DEPRECATED is terminal.
    pub fn can_transition_to(&self, next: ChainStatus) -> bool {
        use ChainStatus::*;
        matches!(
            (self, next),
            (Bootstrapping, Active)
                | (Active, Paused)
                | (Active, Emergency)
                | (Active, Deprecated)
                | (Paused, Active)
                | (Paused, Emergency)
                | (Paused, Deprecated)
                | (Emergency, Active)
                | (Emergency, Deprecated)
        )
    }

    pub fn accepts_deposits(&self) -> bool {
        matches!(self, ChainStatus::Active | ChainStatus::Bootstrapping)
    }

    pub fn accepts_withdrawals(&self) -> bool {
        !matches!(self, ChainStatus::Deprecated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainRegistryError {
    NameLengthOutOfRange(usize),
    NameTaken(String),
    StakeTooLow { have: i64, need: i64 },
    BlockTimeOutOfRange(u64),
    ZeroGasLimit,
    ChallengePeriodOutOfRange(u64),
    TooFewSequencers(usize),
    UnknownChain(u32),
    InvalidTransition { from: ChainStatus, to: ChainStatus },
    DepositsClosed(ChainStatus),
    WithdrawalsClosed(ChainStatus),
    NegativeAmount(i64),
}

impl std::fmt::Display for ChainRegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ChainRegistryError::NameLengthOutOfRange(n) => write!(
                f,
                "Chain name of {} chars outside [{}, {}]",
                n, MIN_CHAIN_NAME_LEN, MAX_CHAIN_NAME_LEN
            ),
            ChainRegistryError::NameTaken(name) => write!(f, "Chain name '{}' taken", name),
            ChainRegistryError::StakeTooLow { have, need } => {
                write!(f, "Deployer stake {} below minimum {}", have, need)
            }
            ChainRegistryError::BlockTimeOutOfRange(v) => {
                write!(f, "Block time {}s out of range", v)
            }
            ChainRegistryError::ZeroGasLimit => write!(f, "Block gas limit must be positive"),
            ChainRegistryError::ChallengePeriodOutOfRange(v) => {
                write!(f, "Challenge period {}s out of range", v)
            }
            ChainRegistryError::TooFewSequencers(n) => {
                write!(f, "Minimum sequencer count {} below {}", n, MIN_ACTIVE_SEQUENCERS)
            }
            ChainRegistryError::UnknownChain(id) => write!(f, "No chain {}", id),
            ChainRegistryError::InvalidTransition { from, to } => {
                write!(f, "Cannot transition {:?} → {:?}", from, to)
            }
            ChainRegistryError::DepositsClosed(s) => {
                write!(f, "Deposits closed while {:?}", s)
            }
            ChainRegistryError::WithdrawalsClosed(s) => {
                write!(f, "Withdrawals closed while {:?}", s)
            }
            ChainRegistryError::NegativeAmount(v) => write!(f, "Negative amount {}", v),
        }
    }
}

impl std::error::Error for ChainRegistryError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentParams {
    pub block_time_secs: u64,
    pub block_gas_limit: u64,
    pub challenge_period_secs: u64,
    pub min_sequencers: usize,
}

impl DeploymentParams {
    pub fn validate(&self) -> Result<(), ChainRegistryError> {
        if !(MIN_BLOCK_TIME_SECS..=MAX_BLOCK_TIME_SECS).contains(&self.block_time_secs) {
            return Err(ChainRegistryError::BlockTimeOutOfRange(self.block_time_secs));
        }
        if self.block_gas_limit == 0 {
            return Err(ChainRegistryError::ZeroGasLimit);
        }
        if !(MIN_CHALLENGE_PERIOD_SECS..=MAX_CHALLENGE_PERIOD_SECS)
            .contains(&self.challenge_period_secs)
        {
            return Err(ChainRegistryError::ChallengePeriodOutOfRange(
                self.challenge_period_secs,
            ));
        }
        if self.min_sequencers < MIN_ACTIVE_SEQUENCERS {
            return Err(ChainRegistryError::TooFewSequencers(self.min_sequencers));
        }
        Ok(())
    }
}

/// Everything the L1 side records about one L2 chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub chain_id: u32,
    pub name: String,
    pub deployer: Address,
    pub deployer_stake: i64,
    pub params: DeploymentParams,
    pub status: ChainStatus,
    /// Latest published state root and the L2 block it covers
    pub state_root: Hash256,
    pub state_block: u64,
    pub tvl_sats: i64,
    pub registered_at: u64,
}

struct RegistryInner {
    chains: BTreeMap<u32, ChainInfo>,
    by_name: BTreeMap<String, u32>,
    id_counter: u64,
}

pub struct L2Registry {
    inner: Mutex<RegistryInner>,
}

impl Default for L2Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl L2Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                chains: BTreeMap::new(),
                by_name: BTreeMap::new(),
                id_counter: 0,
            }),
        }
    }

    /// Register a new chain; returns its generated chain id.
    pub fn register_chain(
        &self,
        name: &str,
        deployer: Address,
        deployer_stake: i64,
        params: DeploymentParams,
        now: u64,
    ) -> Result<u32, ChainRegistryError> {
        if !(MIN_CHAIN_NAME_LEN..=MAX_CHAIN_NAME_LEN).contains(&name.len()) {
            return Err(ChainRegistryError::NameLengthOutOfRange(name.len()));
        }
        if deployer_stake < MIN_DEPLOYER_STAKE_SATS {
            return Err(ChainRegistryError::StakeTooLow {
                have: deployer_stake,
                need: MIN_DEPLOYER_STAKE_SATS,
            });
        }
        params.validate()?;

        let mut inner = self.inner.lock().unwrap();
        if inner.by_name.contains_key(name) {
            return Err(ChainRegistryError::NameTaken(name.to_string()));
        }

        // Deterministic id from (name, deployer, timestamp, counter),
        // hashed into [CHAIN_ID_FLOOR, u32::MAX), retried on collision
        let chain_id = loop {
            inner.id_counter += 1;
            let candidate = derive_chain_id(name, &deployer, now, inner.id_counter);
            if !inner.chains.contains_key(&candidate) {
                break candidate;
            }
        };

        let info = ChainInfo {
            chain_id,
            name: name.to_string(),
            deployer,
            deployer_stake,
            params,
            status: ChainStatus::Bootstrapping,
            state_root: Hash256::ZERO,
            state_block: 0,
            tvl_sats: 0,
            registered_at: now,
        };
        inner.by_name.insert(name.to_string(), chain_id);
        inner.chains.insert(chain_id, info);
        log::info!("Registered chain '{}' as id {}", name, chain_id);
        Ok(chain_id)
    }

    /// Targeted updater: advance the published state-root pointer.
    pub fn update_chain_state(
        &self,
        chain_id: u32,
        state_root: Hash256,
        state_block: u64,
    ) -> Result<(), ChainRegistryError> {
        let mut inner = self.inner.lock().unwrap();
        let info = inner
            .chains
            .get_mut(&chain_id)
            .ok_or(ChainRegistryError::UnknownChain(chain_id))?;
        info.state_root = state_root;
        info.state_block = state_block;
        Ok(())
    }

    /// Targeted updater: drive the status machine.
    pub fn update_chain_status(
        &self,
        chain_id: u32,
        status: ChainStatus,
    ) -> Result<(), ChainRegistryError> {
        let mut inner = self.inner.lock().unwrap();
        let info = inner
            .chains
            .get_mut(&chain_id)
            .ok_or(ChainRegistryError::UnknownChain(chain_id))?;
        if !info.status.can_transition_to(status) {
            return Err(ChainRegistryError::InvalidTransition {
                from: info.status,
                to: status,
            });
        }
        log::info!("Chain {} status {:?} → {:?}", chain_id, info.status, status);
        info.status = status;
        Ok(())
    }

    /// Targeted updater: overwrite the tracked TVL.
    pub fn update_chain_tvl(&self, chain_id: u32, tvl_sats: i64) -> Result<(), ChainRegistryError> {
        if tvl_sats < 0 {
            return Err(ChainRegistryError::NegativeAmount(tvl_sats));
        }
        let mut inner = self.inner.lock().unwrap();
        let info = inner
            .chains
            .get_mut(&chain_id)
            .ok_or(ChainRegistryError::UnknownChain(chain_id))?;
        info.tvl_sats = tvl_sats;
        Ok(())
    }

    /// Deposits are accepted while ACTIVE or BOOTSTRAPPING.
    pub fn record_deposit(&self, chain_id: u32, amount: i64) -> Result<i64, ChainRegistryError> {
        if amount <= 0 {
            return Err(ChainRegistryError::NegativeAmount(amount));
        }
        let mut inner = self.inner.lock().unwrap();
        let info = inner
            .chains
            .get_mut(&chain_id)
            .ok_or(ChainRegistryError::UnknownChain(chain_id))?;
        if !info.status.accepts_deposits() {
            return Err(ChainRegistryError::DepositsClosed(info.status));
        }
        info.tvl_sats = info.tvl_sats.saturating_add(amount);
        Ok(info.tvl_sats)
    }

    /// Withdrawals are blocked only while DEPRECATED.
    pub fn record_withdrawal(&self, chain_id: u32, amount: i64) -> Result<i64, ChainRegistryError> {
        if amount <= 0 {
            return Err(ChainRegistryError::NegativeAmount(amount));
        }
        let mut inner = self.inner.lock().unwrap();
        let info = inner
            .chains
            .get_mut(&chain_id)
            .ok_or(ChainRegistryError::UnknownChain(chain_id))?;
        if !info.status.accepts_withdrawals() {
            return Err(ChainRegistryError::WithdrawalsClosed(info.status));
        }
        info.tvl_sats = info.tvl_sats.saturating_sub(amount).max(0);
        Ok(info.tvl_sats)
    }

    pub fn get_chain(&self, chain_id: u32) -> Option<ChainInfo> {
        self.inner.lock().unwrap().chains.get(&chain_id).cloned()
    }

    pub fn get_chain_by_name(&self, name: &str) -> Option<ChainInfo> {
        let inner = self.inner.lock().unwrap();
        let id = inner.by_name.get(name)?;
        inner.chains.get(id).cloned()
    }

    pub fn chain_count(&self) -> usize {
        self.inner.lock().unwrap().chains.len()
    }

    pub fn list_chains(&self) -> Vec<ChainInfo> {
        self.inner.lock().unwrap().chains.values().cloned().collect()
    }
}

/// Hash (name, deployer, timestamp, counter) into the id range.
fn derive_chain_id(name: &str, deployer: &Address, timestamp: u64, counter: u64) -> u32 {
    let mut buf = Vec::with_capacity(name.len() + 20 + 16);
    buf.extend_from_slice(name.as_bytes());
    codec::write_address(&mut buf, deployer);
    codec::write_u64_le(&mut buf, timestamp);
    codec::write_u64_le(&mut buf, counter);
    let digest = sha3_256(&buf);
    let raw = u32::from_le_bytes(digest.0[..4].try_into().expect("4 bytes"));
    CHAIN_ID_FLOOR + raw % (u32::MAX - CHAIN_ID_FLOOR)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
