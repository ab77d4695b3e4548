// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - CHAIN CONFIGURATION
//
// TOML-backed chain parameters. Defaults are the wire-compatibility
// constants; validation mirrors the registry's deployment-parameter
// ranges so a config that loads is a config a chain can run with.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::{
    MAX_TX_GAS_LIMIT, MINT_CONSENSUS_TIMEOUT_SECS, MIN_ACTIVE_SEQUENCERS, MIN_CHALLENGE_BOND_SATS,
    REQUIRED_L1_CONFIRMATIONS,
};

/// Allowed block-time range, seconds
pub const MIN_BLOCK_TIME_SECS: u64 = 1;
pub const MAX_BLOCK_TIME_SECS: u64 = 60;

/// Allowed challenge-period range, seconds (1 hour – 30 days)
pub const MIN_CHALLENGE_PERIOD_SECS: u64 = 3600;
pub const MAX_CHALLENGE_PERIOD_SECS: u64 = 30 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroChainId,
    BlockTimeOutOfRange(u64),
    GasLimitOutOfRange(u64),
    ChallengePeriodOutOfRange(u64),
    TooFewSequencers(usize),
    BondTooLow(i64),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ConfigError::ZeroChainId => write!(f, "Chain id must be non-zero"),
            ConfigError::BlockTimeOutOfRange(v) => write!(
                f,
                "Block time {}s outside [{}, {}]",
                v, MIN_BLOCK_TIME_SECS, MAX_BLOCK_TIME_SECS
            ),
            ConfigError::GasLimitOutOfRange(v) => write!(f, "Block gas limit {} out of range", v),
            ConfigError::ChallengePeriodOutOfRange(v) => write!(
                f,
                "Challenge period {}s outside [{}, {}]",
                v, MIN_CHALLENGE_PERIOD_SECS, MAX_CHALLENGE_PERIOD_SECS
            ),
            ConfigError::TooFewSequencers(n) => {
                write!(f, "Minimum sequencer count {} below {}", n, MIN_ACTIVE_SEQUENCERS)
            }
            ConfigError::BondTooLow(v) => write!(
                f,
                "Challenge bond {} below minimum {}",
                v, MIN_CHALLENGE_BOND_SATS
            ),
            ConfigError::Parse(e) => write!(f, "Config parse error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Runtime parameters for one L2 chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// L2 runtime chain id (u64); burn payloads carry the low 32 bits
    pub chain_id: u64,
    pub block_time_secs: u64,
    pub block_gas_limit: u64,
    pub challenge_period_secs: u64,
    pub min_sequencers: usize,
    pub required_l1_confirmations: u32,
    pub mint_consensus_timeout_secs: u64,
    pub min_challenge_bond_sats: i64,
    /// Blocks between L1 reputation imports
    pub l1_reputation_sync_interval: u64,
    /// Cap on retained fee-distribution history entries
    pub max_distribution_history: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            block_time_secs: 2,
            block_gas_limit: 30_000_000,
            challenge_period_secs: 7 * 24 * 3600,
            min_sequencers: MIN_ACTIVE_SEQUENCERS,
            required_l1_confirmations: REQUIRED_L1_CONFIRMATIONS,
            mint_consensus_timeout_secs: MINT_CONSENSUS_TIMEOUT_SECS,
            min_challenge_bond_sats: MIN_CHALLENGE_BOND_SATS,
            l1_reputation_sync_interval: crate::L1_REPUTATION_SYNC_INTERVAL,
            max_distribution_history: 1000,
        }
    }
}

impl ChainConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ChainConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("ChainConfig serializes to TOML")
    }

    /// The 32-bit chain id carried in L1 burn payloads.
    pub fn payload_chain_id(&self) -> u32 {
        self.chain_id as u32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chain_id == 0 {
            return Err(ConfigError::ZeroChainId);
        }
        if !(MIN_BLOCK_TIME_SECS..=MAX_BLOCK_TIME_SECS).contains(&self.block_time_secs) {
            return Err(ConfigError::BlockTimeOutOfRange(self.block_time_secs));
        }
        if self.block_gas_limit == 0 || self.block_gas_limit > 100 * MAX_TX_GAS_LIMIT {
            return Err(ConfigError::GasLimitOutOfRange(self.block_gas_limit));
        }
        if !(MIN_CHALLENGE_PERIOD_SECS..=MAX_CHALLENGE_PERIOD_SECS)
            .contains(&self.challenge_period_secs)
        {
            return Err(ConfigError::ChallengePeriodOutOfRange(
                self.challenge_period_secs,
            ));
        }
        if self.min_sequencers < MIN_ACTIVE_SEQUENCERS {
            return Err(ConfigError::TooFewSequencers(self.min_sequencers));
        }
        if self.min_challenge_bond_sats < MIN_CHALLENGE_BOND_SATS {
            return Err(ConfigError::BondTooLow(self.min_challenge_bond_sats));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SATS_PER_COIN;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = ChainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.required_l1_confirmations, 6);
        assert_eq!(config.mint_consensus_timeout_secs, 600);
        assert_eq!(config.min_challenge_bond_sats, 10 * SATS_PER_COIN);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ChainConfig {
            chain_id: 42,
            ..ChainConfig::default()
        };
        let toml_str = config.to_toml_string();
        let parsed = ChainConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
        assert_eq!(parsed.payload_chain_id(), 42);
    }

    #[test]
    fn test_load_from_file() {
        let config = ChainConfig::default();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().as_bytes()).unwrap();
        let loaded = ChainConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);

        assert!(ChainConfig::load_from_file(Path::new("/nonexistent/chain.toml")).is_err());
    }

    #[test]
    fn test_range_validation() {
        let mut config = ChainConfig::default();
        config.chain_id = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroChainId));

        let mut config = ChainConfig::default();
        config.block_time_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::BlockTimeOutOfRange(0)));
        config.block_time_secs = 61;
        assert_eq!(config.validate(), Err(ConfigError::BlockTimeOutOfRange(61)));

        let mut config = ChainConfig::default();
        config.challenge_period_secs = 60;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ChallengePeriodOutOfRange(60))
        ));

        let mut config = ChainConfig::default();
        config.min_sequencers = 2;
        assert_eq!(config.validate(), Err(ConfigError::TooFewSequencers(2)));

        let mut config = ChainConfig::default();
        config.min_challenge_bond_sats = SATS_PER_COIN;
        assert!(matches!(config.validate(), Err(ConfigError::BondTooLow(_))));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(matches!(
            ChainConfig::from_toml_str("chain_id = \"not a number\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
