// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - BURN VALIDATOR
//
// Gates a candidate L1 burn on, in order: idempotency, transaction
// existence, payload structure, chain id, confirmation depth, and the
// containing block. All L1 lookups are injected callbacks, so the validator
// has no direct L1 dependency.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use emb_crypto::Hash256;
use serde::{Deserialize, Serialize};

use crate::burn::{parse_burn_transaction, BurnData, BurnParseError};
use crate::{BlockInfoGetter, ConfirmationGetter, ProcessedChecker, TxFetcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BurnValidationError {
    /// Burn already minted; idempotency stop
    AlreadyProcessed(Hash256),
    /// Fetcher returned nothing; the caller may retry later
    TxNotFound(Hash256),
    /// No output carries a valid burn payload
    NoBurnOutput(Hash256),
    Parse(BurnParseError),
    ChainIdMismatch { expected: u32, got: u32 },
    InsufficientConfirmations { have: u32, need: u32 },
    BlockInfoUnavailable(Hash256),
}

impl std::fmt::Display for BurnValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BurnValidationError::AlreadyProcessed(h) => {
                write!(f, "Burn {} already processed", h)
            }
            BurnValidationError::TxNotFound(h) => write!(f, "L1 transaction {} not found", h),
            BurnValidationError::NoBurnOutput(h) => {
                write!(f, "L1 transaction {} has no valid burn output", h)
            }
            BurnValidationError::Parse(e) => write!(f, "{}", e),
            BurnValidationError::ChainIdMismatch { expected, got } => {
                write!(f, "Burn targets chain {}, local chain is {}", got, expected)
            }
            BurnValidationError::InsufficientConfirmations { have, need } => {
                write!(f, "{} confirmations, need {}", have, need)
            }
            BurnValidationError::BlockInfoUnavailable(h) => {
                write!(f, "No block info for L1 transaction {}", h)
            }
        }
    }
}

impl std::error::Error for BurnValidationError {}

impl From<BurnParseError> for BurnValidationError {
    fn from(e: BurnParseError) -> Self {
        BurnValidationError::Parse(e)
    }
}

/// Fully validated burn, ready for a signed mint confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedBurn {
    pub data: BurnData,
    pub confirmations: u32,
    pub l1_block_hash: Hash256,
    pub l1_block_number: u64,
}

pub struct BurnValidator {
    chain_id: u32,
    required_confirmations: u32,
    fetcher: TxFetcher,
    confirmations: ConfirmationGetter,
    block_info: BlockInfoGetter,
    processed: ProcessedChecker,
}

impl BurnValidator {
    pub fn new(
        chain_id: u32,
        required_confirmations: u32,
        fetcher: TxFetcher,
        confirmations: ConfirmationGetter,
        block_info: BlockInfoGetter,
        processed: ProcessedChecker,
    ) -> Self {
        Self {
            chain_id,
            required_confirmations,
            fetcher,
            confirmations,
            block_info,
            processed,
        }
    }

    pub fn chain_id(&self) -> u32 {
        self.chain_id
    }

    /// The six ordered checks of the ingress pipeline.
    pub fn validate_burn(&self, l1_tx_hash: &Hash256) -> Result<ValidatedBurn, BurnValidationError> {
        // 1. Idempotency
        if (self.processed)(l1_tx_hash) {
            return Err(BurnValidationError::AlreadyProcessed(*l1_tx_hash));
        }

        // 2. Fetch
        let tx = (self.fetcher)(l1_tx_hash).ok_or(BurnValidationError::TxNotFound(*l1_tx_hash))?;

        // 3. Structural parse; first valid output wins
        let data = parse_burn_transaction(&tx)
            .ok_or(BurnValidationError::NoBurnOutput(*l1_tx_hash))?;
        data.validate()?;

        // 4. Chain id
        if data.chain_id != self.chain_id {
            return Err(BurnValidationError::ChainIdMismatch {
                expected: self.chain_id,
                got: data.chain_id,
            });
        }

        // 5. Confirmation depth
        let confirmations = (self.confirmations)(l1_tx_hash);
        if confirmations < self.required_confirmations {
            return Err(BurnValidationError::InsufficientConfirmations {
                have: confirmations,
                need: self.required_confirmations,
            });
        }

        // 6. Containing block
        let (l1_block_hash, l1_block_number) = (self.block_info)(l1_tx_hash)
            .ok_or(BurnValidationError::BlockInfoUnavailable(*l1_tx_hash))?;

        Ok(ValidatedBurn {
            data,
            confirmations,
            l1_block_hash,
            l1_block_number,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burn::create_burn_script;
    use crate::{L1Transaction, L1TxOut};
    use emb_core::REQUIRED_L1_CONFIRMATIONS;
    use emb_crypto::{generate_keypair, sha3_256};
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    struct Fixture {
        txs: Arc<Mutex<BTreeMap<Hash256, L1Transaction>>>,
        confs: Arc<Mutex<BTreeMap<Hash256, u32>>>,
        processed: Arc<Mutex<Vec<Hash256>>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                txs: Arc::new(Mutex::new(BTreeMap::new())),
                confs: Arc::new(Mutex::new(BTreeMap::new())),
                processed: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn validator(&self, chain_id: u32) -> BurnValidator {
            let txs = Arc::clone(&self.txs);
            let confs = Arc::clone(&self.confs);
            let processed = Arc::clone(&self.processed);
            BurnValidator::new(
                chain_id,
                REQUIRED_L1_CONFIRMATIONS,
                Arc::new(move |h| txs.lock().unwrap().get(h).cloned()),
                Arc::new({
                    let confs = Arc::clone(&confs);
                    move |h| confs.lock().unwrap().get(h).copied().unwrap_or(0)
                }),
                Arc::new(|h| Some((sha3_256(&h.0), 100))),
                Arc::new(move |h| processed.lock().unwrap().contains(h)),
            )
        }

        fn insert_burn(&self, chain_id: u32, amount: i64, confirmations: u32) -> Hash256 {
            let pk = generate_keypair().public_key;
            let txid = sha3_256(&amount.to_le_bytes());
            let tx = L1Transaction {
                txid,
                outputs: vec![L1TxOut {
                    value: 0,
                    script_pubkey: create_burn_script(chain_id, &pk, amount),
                }],
            };
            self.txs.lock().unwrap().insert(txid, tx);
            self.confs.lock().unwrap().insert(txid, confirmations);
            txid
        }
    }

    #[test]
    fn test_valid_burn_passes() {
        let fx = Fixture::new();
        let txid = fx.insert_burn(1, 50 * emb_core::SATS_PER_COIN, 6);
        let validated = fx.validator(1).validate_burn(&txid).unwrap();
        assert_eq!(validated.data.amount, 50 * emb_core::SATS_PER_COIN);
        assert_eq!(validated.confirmations, 6);
        assert_eq!(validated.l1_block_number, 100);
    }

    #[test]
    fn test_confirmation_boundary() {
        let fx = Fixture::new();
        let five = fx.insert_burn(1, 1000, 5);
        assert_eq!(
            fx.validator(1).validate_burn(&five),
            Err(BurnValidationError::InsufficientConfirmations { have: 5, need: 6 })
        );

        let six = fx.insert_burn(1, 2000, 6);
        assert!(fx.validator(1).validate_burn(&six).is_ok());
    }

    #[test]
    fn test_idempotency_first() {
        let fx = Fixture::new();
        let txid = fx.insert_burn(1, 1000, 6);
        fx.processed.lock().unwrap().push(txid);
        assert_eq!(
            fx.validator(1).validate_burn(&txid),
            Err(BurnValidationError::AlreadyProcessed(txid))
        );
    }

    #[test]
    fn test_missing_tx_stalls() {
        let fx = Fixture::new();
        let missing = sha3_256(b"nowhere");
        assert_eq!(
            fx.validator(1).validate_burn(&missing),
            Err(BurnValidationError::TxNotFound(missing))
        );
    }

    #[test]
    fn test_chain_id_mismatch() {
        let fx = Fixture::new();
        let txid = fx.insert_burn(2, 1000, 6);
        assert_eq!(
            fx.validator(1).validate_burn(&txid),
            Err(BurnValidationError::ChainIdMismatch {
                expected: 1,
                got: 2
            })
        );
    }

    #[test]
    fn test_no_burn_output() {
        let fx = Fixture::new();
        let txid = sha3_256(b"plain");
        fx.txs.lock().unwrap().insert(
            txid,
            L1Transaction {
                txid,
                outputs: vec![L1TxOut {
                    value: 1000,
                    script_pubkey: vec![0x76, 0xa9],
                }],
            },
        );
        fx.confs.lock().unwrap().insert(txid, 6);
        assert_eq!(
            fx.validator(1).validate_burn(&txid),
            Err(BurnValidationError::NoBurnOutput(txid))
        );
    }
}
