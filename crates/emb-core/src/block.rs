// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - L2 BLOCKS
//
// Block structure, structural validation, sequencer signature sets and
// finalization, plus the block executor that is the sole writer of live
// account state during execution.
//
// The block hash is the SHA3-256 of the canonical header encoding;
// sequencer signatures are recoverable ECDSA over that hash. A block is
// finalized once ⌈2n/3⌉ distinct active sequencers have signed it.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeSet;
use std::sync::Arc;

use emb_crypto::{sha3_256, sha3_256_pair, verify_signature, Address, Hash256};
use serde::{Deserialize, Serialize};

use crate::codec::{self, ByteReader};
use crate::state::{StateError, StateManager};
use crate::transaction::{L2Transaction, TxError, TxType};
use crate::{
    consensus_threshold, MAX_BLOCK_TXS, MAX_EXTRA_DATA_SIZE, MAX_FUTURE_BLOCK_TIME_SECS,
    MIN_TX_GAS,
};

/// Pre-registered sequencer public key lookup (33-byte compressed form).
pub type SequencerPubKeyGetter = Arc<dyn Fn(&Address) -> Option<[u8; 33]> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    MissingParentHash,
    MissingSequencer,
    TimestampTooFarInFuture { timestamp: u64, now: u64 },
    GasUsedExceedsLimit { used: u64, limit: u64 },
    ZeroGasLimit,
    ExtraDataTooLarge(usize),
    TooManyTransactions(usize),
    InvalidTransaction { index: usize, reason: TxError },
    TransactionGasAboveBlockLimit { total: u64, limit: u64 },
    TransactionsRootMismatch,
    UnknownSequencer(Address),
    InvalidSequencerSignature(Address),
}

impl std::fmt::Display for BlockError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BlockError::MissingParentHash => write!(f, "Non-genesis block requires parent hash"),
            BlockError::MissingSequencer => write!(f, "Non-genesis block requires a sequencer"),
            BlockError::TimestampTooFarInFuture { timestamp, now } => write!(
                f,
                "Block timestamp {} more than {}s ahead of {}",
                timestamp, MAX_FUTURE_BLOCK_TIME_SECS, now
            ),
            BlockError::GasUsedExceedsLimit { used, limit } => {
                write!(f, "gasUsed {} exceeds gasLimit {}", used, limit)
            }
            BlockError::ZeroGasLimit => write!(f, "Block gas limit must be positive"),
            BlockError::ExtraDataTooLarge(n) => write!(f, "extraData of {} bytes exceeds 32", n),
            BlockError::TooManyTransactions(n) => {
                write!(f, "{} transactions exceed the {} bound", n, MAX_BLOCK_TXS)
            }
            BlockError::InvalidTransaction { index, reason } => {
                write!(f, "Transaction {}: {}", index, reason)
            }
            BlockError::TransactionGasAboveBlockLimit { total, limit } => {
                write!(f, "Sum of tx gas limits {} exceeds block limit {}", total, limit)
            }
            BlockError::TransactionsRootMismatch => {
                write!(f, "Header transactions root does not match body")
            }
            BlockError::UnknownSequencer(a) => write!(f, "Unknown sequencer {}", a),
            BlockError::InvalidSequencerSignature(a) => {
                write!(f, "Invalid signature from sequencer {}", a)
            }
        }
    }
}

impl std::error::Error for BlockError {}

// ─────────────────────────────────────────────────────────────────
// Header and block
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    pub block_number: u64,
    pub parent_hash: Hash256,
    pub state_root: Hash256,
    pub transactions_root: Hash256,
    pub receipts_root: Hash256,
    pub sequencer: Address,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub l2_chain_id: u64,
    pub l1_anchor_block: u64,
    pub l1_anchor_hash: Hash256,
    pub slot_number: u64,
    /// At most 32 bytes
    pub extra_data: Vec<u8>,
}

impl BlockHeader {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        codec::write_u64_le(&mut out, self.block_number);
        codec::write_hash(&mut out, &self.parent_hash);
        codec::write_hash(&mut out, &self.state_root);
        codec::write_hash(&mut out, &self.transactions_root);
        codec::write_hash(&mut out, &self.receipts_root);
        codec::write_address(&mut out, &self.sequencer);
        codec::write_u64_le(&mut out, self.timestamp);
        codec::write_u64_le(&mut out, self.gas_limit);
        codec::write_u64_le(&mut out, self.gas_used);
        codec::write_u64_le(&mut out, self.l2_chain_id);
        codec::write_u64_le(&mut out, self.l1_anchor_block);
        codec::write_hash(&mut out, &self.l1_anchor_hash);
        codec::write_u64_le(&mut out, self.slot_number);
        codec::write_bytes(&mut out, &self.extra_data);
        out
    }

    pub fn decode(data: &[u8]) -> Option<BlockHeader> {
        let mut r = ByteReader::new(data);
        let header = Self::decode_from(&mut r)?;
        if !r.is_empty() {
            return None;
        }
        Some(header)
    }

    fn decode_from(r: &mut ByteReader) -> Option<BlockHeader> {
        Some(BlockHeader {
            block_number: r.read_u64_le()?,
            parent_hash: r.read_hash()?,
            state_root: r.read_hash()?,
            transactions_root: r.read_hash()?,
            receipts_root: r.read_hash()?,
            sequencer: r.read_address()?,
            timestamp: r.read_u64_le()?,
            gas_limit: r.read_u64_le()?,
            gas_used: r.read_u64_le()?,
            l2_chain_id: r.read_u64_le()?,
            l1_anchor_block: r.read_u64_le()?,
            l1_anchor_hash: r.read_hash()?,
            slot_number: r.read_u64_le()?,
            extra_data: r.read_bytes(MAX_EXTRA_DATA_SIZE)?,
        })
    }

    /// Block hash = SHA3-256 of the canonical header encoding.
    pub fn hash(&self) -> Hash256 {
        sha3_256(&self.encode())
    }
}

/// One sequencer's signature over the block hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerSignature {
    pub sequencer: Address,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct L2Block {
    pub header: BlockHeader,
    pub transactions: Vec<L2Transaction>,
    pub l1_message_hashes: Vec<Hash256>,
    pub signatures: Vec<SequencerSignature>,
    pub is_finalized: bool,
}

/// Merkle root over transaction hashes: SHA3 pairs, odd node duplicated,
/// empty set collapses to the zero hash.
pub fn compute_transactions_root(transactions: &[L2Transaction]) -> Hash256 {
    let mut layer: Vec<Hash256> = transactions.iter().map(|tx| tx.hash()).collect();
    if layer.is_empty() {
        return Hash256::ZERO;
    }
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        for pair in layer.chunks(2) {
            let right = if pair.len() == 2 { &pair[1] } else { &pair[0] };
            next.push(sha3_256_pair(&pair[0], right));
        }
        layer = next;
    }
    layer[0]
}

impl L2Block {
    /// Genesis: block 0, null parent/state/tx roots, finalized from birth.
    pub fn genesis(l2_chain_id: u64, timestamp: u64) -> L2Block {
        L2Block {
            header: BlockHeader {
                block_number: 0,
                timestamp,
                l2_chain_id,
                gas_limit: 1,
                ..BlockHeader::default()
            },
            transactions: Vec::new(),
            l1_message_hashes: Vec::new(),
            signatures: Vec::new(),
            is_finalized: true,
        }
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.header.block_number == 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.header.encode();
        codec::write_varint(&mut out, self.transactions.len() as u64);
        for tx in &self.transactions {
            codec::write_bytes(&mut out, &tx.encode());
        }
        codec::write_varint(&mut out, self.l1_message_hashes.len() as u64);
        for h in &self.l1_message_hashes {
            codec::write_hash(&mut out, h);
        }
        codec::write_varint(&mut out, self.signatures.len() as u64);
        for sig in &self.signatures {
            codec::write_address(&mut out, &sig.sequencer);
            codec::write_bytes(&mut out, &sig.signature);
        }
        codec::write_u8(&mut out, self.is_finalized as u8);
        out
    }

    pub fn decode(data: &[u8]) -> Option<L2Block> {
        let mut r = ByteReader::new(data);
        let header = BlockHeader::decode_from(&mut r)?;

        let tx_count = r.read_varint()?;
        if tx_count > MAX_BLOCK_TXS as u64 {
            return None;
        }
        let mut transactions = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            let bytes = r.read_bytes(usize::MAX / 2)?;
            transactions.push(L2Transaction::decode(&bytes)?);
        }

        let msg_count = r.read_varint()?;
        if msg_count > MAX_BLOCK_TXS as u64 {
            return None;
        }
        let mut l1_message_hashes = Vec::with_capacity(msg_count as usize);
        for _ in 0..msg_count {
            l1_message_hashes.push(r.read_hash()?);
        }

        let sig_count = r.read_varint()?;
        if sig_count > 10_000 {
            return None;
        }
        let mut signatures = Vec::with_capacity(sig_count as usize);
        for _ in 0..sig_count {
            let sequencer = r.read_address()?;
            let signature = r.read_bytes(emb_crypto::RECOVERABLE_SIG_LEN)?;
            signatures.push(SequencerSignature {
                sequencer,
                signature,
            });
        }
        let is_finalized = match r.read_u8()? {
            0 => false,
            1 => true,
            _ => return None,
        };
        if !r.is_empty() {
            return None;
        }
        Some(L2Block {
            header,
            transactions,
            l1_message_hashes,
            signatures,
            is_finalized,
        })
    }

    /// Header, transaction and transactions-root consistency checks.
    pub fn validate_structure(&self, now: u64) -> Result<(), BlockError> {
        if !self.is_genesis() {
            if self.header.parent_hash.is_zero() {
                return Err(BlockError::MissingParentHash);
            }
            if self.header.sequencer.is_zero() {
                return Err(BlockError::MissingSequencer);
            }
        }
        if self.header.timestamp > now + MAX_FUTURE_BLOCK_TIME_SECS {
            return Err(BlockError::TimestampTooFarInFuture {
                timestamp: self.header.timestamp,
                now,
            });
        }
        if self.header.gas_limit == 0 {
            return Err(BlockError::ZeroGasLimit);
        }
        if self.header.gas_used > self.header.gas_limit {
            return Err(BlockError::GasUsedExceedsLimit {
                used: self.header.gas_used,
                limit: self.header.gas_limit,
            });
        }
        if self.header.extra_data.len() > MAX_EXTRA_DATA_SIZE {
            return Err(BlockError::ExtraDataTooLarge(self.header.extra_data.len()));
        }
        if self.transactions.len() > MAX_BLOCK_TXS {
            return Err(BlockError::TooManyTransactions(self.transactions.len()));
        }

        let mut total_gas: u64 = 0;
        for (index, tx) in self.transactions.iter().enumerate() {
            tx.validate()
                .map_err(|reason| BlockError::InvalidTransaction { index, reason })?;
            total_gas = total_gas.saturating_add(tx.gas_limit);
        }
        if total_gas > self.header.gas_limit {
            return Err(BlockError::TransactionGasAboveBlockLimit {
                total: total_gas,
                limit: self.header.gas_limit,
            });
        }

        if compute_transactions_root(&self.transactions) != self.header.transactions_root {
            return Err(BlockError::TransactionsRootMismatch);
        }
        Ok(())
    }

    /// Append a signature unless this sequencer already signed.
    pub fn add_signature(&mut self, sequencer: Address, signature: Vec<u8>) -> bool {
        if self.signatures.iter().any(|s| s.sequencer == sequencer) {
            return false;
        }
        self.signatures.push(SequencerSignature {
            sequencer,
            signature,
        });
        true
    }

    /// Verify every included signature against the block hash using the
    /// pre-registered sequencer keys. Returns the count of distinct valid
    /// signers; any invalid or unknown signer fails the whole set.
    pub fn verify_signatures(&self, pubkeys: &SequencerPubKeyGetter) -> Result<usize, BlockError> {
        let block_hash = self.hash();
        let mut seen: BTreeSet<Address> = BTreeSet::new();
        for sig in &self.signatures {
            let pubkey = pubkeys(&sig.sequencer)
                .ok_or(BlockError::UnknownSequencer(sig.sequencer))?;
            if !verify_signature(&block_hash, &sig.signature, &pubkey) {
                return Err(BlockError::InvalidSequencerSignature(sig.sequencer));
            }
            seen.insert(sig.sequencer);
        }
        Ok(seen.len())
    }

    /// Finalize when the verified distinct signer count reaches ⌈2n/3⌉ of
    /// the active sequencer set. Idempotent.
    pub fn try_finalize(
        &mut self,
        active_sequencers: usize,
        pubkeys: &SequencerPubKeyGetter,
    ) -> Result<bool, BlockError> {
        if self.is_finalized {
            return Ok(true);
        }
        let valid = self.verify_signatures(pubkeys)?;
        if active_sequencers > 0 && valid >= consensus_threshold(active_sequencers) {
            self.is_finalized = true;
        }
        Ok(self.is_finalized)
    }
}

// ─────────────────────────────────────────────────────────────────
// Execution
// ─────────────────────────────────────────────────────────────────

/// Outcome of routing a contract transaction through the execution oracle.
#[derive(Debug, Clone)]
pub struct ContractOutcome {
    pub ok: bool,
    pub gas_used: u64,
    pub error: Option<String>,
}

/// Opaque contract execution oracle (the VM is out of scope).
pub type ContractOracle = Arc<dyn Fn(&L2Transaction) -> ContractOutcome + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub state_root: Hash256,
    pub gas_used: u64,
    /// Sum of fees charged, in satoshi; input to the fee distributor
    pub total_fees: i64,
    pub executed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    Invalid { index: usize, reason: TxError },
    SignatureInvalid(usize),
    BadNonce { index: usize, expected: u64, got: u64 },
    State { index: usize, reason: StateError },
    FeeOverflow(usize),
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ExecError::Invalid { index, reason } => write!(f, "Transaction {}: {}", index, reason),
            ExecError::SignatureInvalid(i) => write!(f, "Transaction {}: bad signature", i),
            ExecError::BadNonce {
                index,
                expected,
                got,
            } => write!(f, "Transaction {}: nonce {} expected {}", index, got, expected),
            ExecError::State { index, reason } => write!(f, "Transaction {}: {}", index, reason),
            ExecError::FeeOverflow(i) => write!(f, "Transaction {}: fee overflow", i),
        }
    }
}

impl std::error::Error for ExecError {}

/// Applies validated transactions to the state manager. The executor (and
/// the post-finalization fee credit) are the only writers of live state.
pub struct Executor {
    state: Arc<StateManager>,
    contract_oracle: Option<ContractOracle>,
}

impl Executor {
    pub fn new(state: Arc<StateManager>) -> Self {
        Self {
            state,
            contract_oracle: None,
        }
    }

    pub fn with_contract_oracle(state: Arc<StateManager>, oracle: ContractOracle) -> Self {
        Self {
            state,
            contract_oracle: Some(oracle),
        }
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    /// Execute every transaction of `block` in order. On error the state
    /// may be partially applied; callers execute against a scratch state
    /// first when atomicity matters.
    pub fn execute_block(&self, block: &L2Block) -> Result<ExecutionOutcome, ExecError> {
        let timestamp = block.header.timestamp;
        let mut gas_used: u64 = 0;
        let mut total_fees: i64 = 0;

        for (index, tx) in block.transactions.iter().enumerate() {
            tx.validate()
                .map_err(|reason| ExecError::Invalid { index, reason })?;
            if !tx.verify_signature() {
                return Err(ExecError::SignatureInvalid(index));
            }
            let (gas, fee) = self.apply(index, tx, timestamp)?;
            gas_used = gas_used.saturating_add(gas);
            total_fees = total_fees
                .checked_add(fee)
                .ok_or(ExecError::FeeOverflow(index))?;
        }

        Ok(ExecutionOutcome {
            state_root: self.state.root(),
            gas_used,
            total_fees,
            executed: block.transactions.len(),
        })
    }

    fn effective_gas_price(tx: &L2Transaction) -> i64 {
        if tx.gas_price > 0 {
            tx.gas_price
        } else {
            tx.max_fee_per_gas
        }
    }

    fn apply(
        &self,
        index: usize,
        tx: &L2Transaction,
        timestamp: u64,
    ) -> Result<(u64, i64), ExecError> {
        match tx.tx_type {
            TxType::BurnMint => {
                // Credit minted from a verified L1 burn; no gas is charged.
                self.state
                    .credit(&tx.to, tx.value, timestamp)
                    .map_err(|reason| ExecError::State { index, reason })?;
                Ok((0, 0))
            }
            TxType::Transfer | TxType::CrossLayerMsg => {
                self.check_and_bump_nonce(index, tx, timestamp)?;
                let gas = MIN_TX_GAS;
                let fee = Self::effective_gas_price(tx)
                    .checked_mul(gas as i64)
                    .ok_or(ExecError::FeeOverflow(index))?;
                let debit = tx
                    .value
                    .checked_add(fee)
                    .ok_or(ExecError::FeeOverflow(index))?;
                self.state
                    .debit(&tx.from, debit, timestamp)
                    .map_err(|reason| ExecError::State { index, reason })?;
                self.state
                    .credit(&tx.to, tx.value, timestamp)
                    .map_err(|reason| ExecError::State { index, reason })?;
                Ok((gas, fee))
            }
            TxType::ContractDeploy | TxType::ContractCall => {
                self.check_and_bump_nonce(index, tx, timestamp)?;
                let gas = match &self.contract_oracle {
                    Some(oracle) => {
                        let outcome = oracle(tx);
                        outcome.gas_used.clamp(MIN_TX_GAS, tx.gas_limit)
                    }
                    None => MIN_TX_GAS,
                };
                let fee = Self::effective_gas_price(tx)
                    .checked_mul(gas as i64)
                    .ok_or(ExecError::FeeOverflow(index))?;
                let debit = tx
                    .value
                    .checked_add(fee)
                    .ok_or(ExecError::FeeOverflow(index))?;
                self.state
                    .debit(&tx.from, debit, timestamp)
                    .map_err(|reason| ExecError::State { index, reason })?;
                if !tx.to.is_zero() && tx.value > 0 {
                    self.state
                        .credit(&tx.to, tx.value, timestamp)
                        .map_err(|reason| ExecError::State { index, reason })?;
                }
                Ok((gas, fee))
            }
            TxType::ForcedInclusion | TxType::SequencerAnnounce => {
                self.check_and_bump_nonce(index, tx, timestamp)?;
                let gas = MIN_TX_GAS;
                let fee = Self::effective_gas_price(tx)
                    .checked_mul(gas as i64)
                    .ok_or(ExecError::FeeOverflow(index))?;
                self.state
                    .debit(&tx.from, fee, timestamp)
                    .map_err(|reason| ExecError::State { index, reason })?;
                Ok((gas, fee))
            }
            // validate() already rejected these
            TxType::Deposit | TxType::Withdrawal => Err(ExecError::Invalid {
                index,
                reason: TxError::DeprecatedType(tx.tx_type),
            }),
        }
    }

    fn check_and_bump_nonce(
        &self,
        index: usize,
        tx: &L2Transaction,
        timestamp: u64,
    ) -> Result<(), ExecError> {
        let mut account = self.state.get(&tx.from);
        if account.nonce != tx.nonce {
            return Err(ExecError::BadNonce {
                index,
                expected: account.nonce,
                got: tx.nonce,
            });
        }
        account.nonce += 1;
        account.last_activity = timestamp;
        self.state
            .set(&tx.from, &account)
            .map_err(|reason| ExecError::State { index, reason })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
