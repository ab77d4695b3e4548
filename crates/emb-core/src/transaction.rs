// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - L2 TRANSACTIONS
//
// Typed transactions with compact-recoverable ECDSA signatures.
// The signing hash covers the canonical encoding WITHOUT the signature;
// the transaction id covers the full encoding including it.
// BURN_MINT is the system mint transaction: zero sender, zero gas price,
// mandatory L1 burn reference. The legacy DEPOSIT/WITHDRAWAL types decode
// but never validate.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use emb_crypto::{recover_signer, sha3_256, Address, Hash256, KeyPair};
use serde::{Deserialize, Serialize};

use crate::codec::{self, ByteReader};
use crate::{
    MAX_ACCESS_LIST_ENTRIES, MAX_STORAGE_KEYS_PER_ENTRY, MAX_TX_DATA_SIZE, MAX_TX_GAS_LIMIT,
    MIN_TX_GAS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    Transfer,
    ContractDeploy,
    ContractCall,
    BurnMint,
    ForcedInclusion,
    CrossLayerMsg,
    SequencerAnnounce,
    /// Legacy type, always invalid
    Deposit,
    /// Legacy type, always invalid
    Withdrawal,
}

impl TxType {
    pub fn tag(&self) -> u8 {
        match self {
            TxType::Transfer => 0,
            TxType::ContractDeploy => 1,
            TxType::ContractCall => 2,
            TxType::BurnMint => 3,
            TxType::ForcedInclusion => 4,
            TxType::CrossLayerMsg => 5,
            TxType::SequencerAnnounce => 6,
            TxType::Deposit => 7,
            TxType::Withdrawal => 8,
        }
    }

    pub fn from_tag(tag: u8) -> Option<TxType> {
        Some(match tag {
            0 => TxType::Transfer,
            1 => TxType::ContractDeploy,
            2 => TxType::ContractCall,
            3 => TxType::BurnMint,
            4 => TxType::ForcedInclusion,
            5 => TxType::CrossLayerMsg,
            6 => TxType::SequencerAnnounce,
            7 => TxType::Deposit,
            8 => TxType::Withdrawal,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    /// DEPOSIT / WITHDRAWAL are invalid by construction
    DeprecatedType(TxType),
    MissingRecipient,
    /// CONTRACT_DEPLOY must not carry a recipient
    RecipientForbidden,
    EmptyDeployData,
    MissingL1TxHash,
    NonPositiveValue(i64),
    /// TRANSFER needs gasPrice > 0 or maxFeePerGas > 0
    NoGasPricing,
    /// BURN_MINT sender must be the zero address with gasPrice = 0
    NotSystemSender,
    GasLimitOutOfRange(u64),
    DataTooLarge(usize),
    AccessListTooLarge(usize),
    TooManyStorageKeys(usize),
    NegativeAmount(i64),
}

impl std::fmt::Display for TxError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TxError::DeprecatedType(t) => write!(f, "Transaction type {:?} is no longer valid", t),
            TxError::MissingRecipient => write!(f, "Recipient address required"),
            TxError::RecipientForbidden => write!(f, "Contract deployment must omit recipient"),
            TxError::EmptyDeployData => write!(f, "Contract deployment requires bytecode"),
            TxError::MissingL1TxHash => write!(f, "L1 transaction hash required"),
            TxError::NonPositiveValue(v) => write!(f, "Value must be positive, got {}", v),
            TxError::NoGasPricing => write!(f, "gas_price or max_fee_per_gas must be set"),
            TxError::NotSystemSender => {
                write!(f, "System transaction requires zero sender and zero gas price")
            }
            TxError::GasLimitOutOfRange(g) => write!(f, "Gas limit {} out of range", g),
            TxError::DataTooLarge(n) => write!(f, "Calldata of {} bytes exceeds bound", n),
            TxError::AccessListTooLarge(n) => write!(f, "Access list of {} entries exceeds bound", n),
            TxError::TooManyStorageKeys(n) => {
                write!(f, "Access-list entry with {} storage keys exceeds bound", n)
            }
            TxError::NegativeAmount(v) => write!(f, "Negative amount {}", v),
        }
    }
}

impl std::error::Error for TxError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AccessListEntry {
    pub address: Address,
    pub storage_keys: Vec<Hash256>,
}

impl AccessListEntry {
    fn encode(&self, out: &mut Vec<u8>) {
        codec::write_address(out, &self.address);
        codec::write_varint(out, self.storage_keys.len() as u64);
        for key in &self.storage_keys {
            codec::write_hash(out, key);
        }
    }

    fn decode(r: &mut ByteReader) -> Option<AccessListEntry> {
        let address = r.read_address()?;
        let count = r.read_varint()?;
        if count > MAX_STORAGE_KEYS_PER_ENTRY as u64 {
            return None;
        }
        let mut storage_keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            storage_keys.push(r.read_hash()?);
        }
        Some(AccessListEntry {
            address,
            storage_keys,
        })
    }
}

/// An L2 transaction. The zero address / zero hash stand for "absent" in
/// `to` and `l1_tx_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Transaction {
    pub tx_type: TxType,
    pub chain_id: u64,
    pub nonce: u64,
    pub from: Address,
    pub to: Address,
    /// Amount in satoshi
    pub value: i64,
    pub gas_limit: u64,
    pub gas_price: i64,
    pub max_fee_per_gas: i64,
    pub data: Vec<u8>,
    pub access_list: Vec<AccessListEntry>,
    /// Mandatory for BURN_MINT and FORCED_INCLUSION
    pub l1_tx_hash: Hash256,
    /// 65-byte recoverable signature; empty on system transactions
    pub signature: Vec<u8>,
}

impl L2Transaction {
    /// Plain value transfer skeleton (unsigned).
    pub fn transfer(
        chain_id: u64,
        nonce: u64,
        from: Address,
        to: Address,
        value: i64,
        gas_price: i64,
    ) -> L2Transaction {
        L2Transaction {
            tx_type: TxType::Transfer,
            chain_id,
            nonce,
            from,
            to,
            value,
            gas_limit: MIN_TX_GAS,
            gas_price,
            max_fee_per_gas: 0,
            data: Vec::new(),
            access_list: Vec::new(),
            l1_tx_hash: Hash256::ZERO,
            signature: Vec::new(),
        }
    }

    /// System mint transaction crediting `recipient` for a verified L1 burn.
    pub fn burn_mint(
        chain_id: u64,
        recipient: Address,
        amount: i64,
        l1_tx_hash: Hash256,
    ) -> L2Transaction {
        L2Transaction {
            tx_type: TxType::BurnMint,
            chain_id,
            nonce: 0,
            from: Address::ZERO,
            to: recipient,
            value: amount,
            gas_limit: MIN_TX_GAS,
            gas_price: 0,
            max_fee_per_gas: 0,
            data: Vec::new(),
            access_list: Vec::new(),
            l1_tx_hash,
            signature: Vec::new(),
        }
    }

    fn encode_common(&self, out: &mut Vec<u8>) {
        codec::write_u8(out, self.tx_type.tag());
        codec::write_u64_le(out, self.chain_id);
        codec::write_u64_le(out, self.nonce);
        codec::write_address(out, &self.from);
        codec::write_address(out, &self.to);
        codec::write_i64_le(out, self.value);
        codec::write_u64_le(out, self.gas_limit);
        codec::write_i64_le(out, self.gas_price);
        codec::write_i64_le(out, self.max_fee_per_gas);
        codec::write_bytes(out, &self.data);
        codec::write_varint(out, self.access_list.len() as u64);
        for entry in &self.access_list {
            entry.encode(out);
        }
        codec::write_hash(out, &self.l1_tx_hash);
    }

    /// Canonical encoding without the signature: the signed preimage.
    pub fn encode_signing(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_common(&mut out);
        out
    }

    /// Full canonical encoding including the signature.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_common(&mut out);
        codec::write_bytes(&mut out, &self.signature);
        out
    }

    pub fn decode(data: &[u8]) -> Option<L2Transaction> {
        let mut r = ByteReader::new(data);
        let tx = Self::decode_from(&mut r)?;
        if !r.is_empty() {
            return None;
        }
        Some(tx)
    }

    pub(crate) fn decode_from(r: &mut ByteReader) -> Option<L2Transaction> {
        let tx_type = TxType::from_tag(r.read_u8()?)?;
        let chain_id = r.read_u64_le()?;
        let nonce = r.read_u64_le()?;
        let from = r.read_address()?;
        let to = r.read_address()?;
        let value = r.read_i64_le()?;
        let gas_limit = r.read_u64_le()?;
        let gas_price = r.read_i64_le()?;
        let max_fee_per_gas = r.read_i64_le()?;
        let data = r.read_bytes(MAX_TX_DATA_SIZE)?;
        let list_len = r.read_varint()?;
        if list_len > MAX_ACCESS_LIST_ENTRIES as u64 {
            return None;
        }
        let mut access_list = Vec::with_capacity(list_len as usize);
        for _ in 0..list_len {
            access_list.push(AccessListEntry::decode(r)?);
        }
        let l1_tx_hash = r.read_hash()?;
        let signature = r.read_bytes(emb_crypto::RECOVERABLE_SIG_LEN)?;
        Some(L2Transaction {
            tx_type,
            chain_id,
            nonce,
            from,
            to,
            value,
            gas_limit,
            gas_price,
            max_fee_per_gas,
            data,
            access_list,
            l1_tx_hash,
            signature,
        })
    }

    /// Hash signed by the sender (signature-free form).
    pub fn signing_hash(&self) -> Hash256 {
        sha3_256(&self.encode_signing())
    }

    /// Transaction id: hash of the full encoding, signature included.
    pub fn hash(&self) -> Hash256 {
        sha3_256(&self.encode())
    }

    pub fn sign(&mut self, keypair: &KeyPair) -> Result<(), emb_crypto::CryptoError> {
        let sig = emb_crypto::sign_recoverable(&self.signing_hash(), &keypair.secret_key)?;
        self.signature = sig.to_vec();
        Ok(())
    }

    /// Recover the signer and compare Hash160(pubkey) to the declared
    /// sender. System BURN_MINT transactions carry no signature and are
    /// accepted on structural grounds alone.
    pub fn verify_signature(&self) -> bool {
        if self.tx_type == TxType::BurnMint {
            return self.from.is_zero() && !self.l1_tx_hash.is_zero();
        }
        match recover_signer(&self.signing_hash(), &self.signature) {
            Some(signer) => signer == self.from,
            None => false,
        }
    }

    /// Structural validation: the per-type field table plus global limits.
    pub fn validate(&self) -> Result<(), TxError> {
        if self.value < 0 {
            return Err(TxError::NegativeAmount(self.value));
        }
        if self.gas_price < 0 {
            return Err(TxError::NegativeAmount(self.gas_price));
        }
        if self.max_fee_per_gas < 0 {
            return Err(TxError::NegativeAmount(self.max_fee_per_gas));
        }
        if self.gas_limit < MIN_TX_GAS || self.gas_limit > MAX_TX_GAS_LIMIT {
            return Err(TxError::GasLimitOutOfRange(self.gas_limit));
        }
        if self.data.len() > MAX_TX_DATA_SIZE {
            return Err(TxError::DataTooLarge(self.data.len()));
        }
        if self.access_list.len() > MAX_ACCESS_LIST_ENTRIES {
            return Err(TxError::AccessListTooLarge(self.access_list.len()));
        }
        for entry in &self.access_list {
            if entry.storage_keys.len() > MAX_STORAGE_KEYS_PER_ENTRY {
                return Err(TxError::TooManyStorageKeys(entry.storage_keys.len()));
            }
        }

        match self.tx_type {
            TxType::Deposit | TxType::Withdrawal => Err(TxError::DeprecatedType(self.tx_type)),
            TxType::Transfer => {
                if self.to.is_zero() {
                    return Err(TxError::MissingRecipient);
                }
                if self.gas_price == 0 && self.max_fee_per_gas == 0 {
                    return Err(TxError::NoGasPricing);
                }
                Ok(())
            }
            TxType::ContractDeploy => {
                if self.data.is_empty() {
                    return Err(TxError::EmptyDeployData);
                }
                if !self.to.is_zero() {
                    return Err(TxError::RecipientForbidden);
                }
                Ok(())
            }
            TxType::ContractCall => {
                if self.to.is_zero() {
                    return Err(TxError::MissingRecipient);
                }
                Ok(())
            }
            TxType::BurnMint => {
                if self.to.is_zero() {
                    return Err(TxError::MissingRecipient);
                }
                if self.value <= 0 {
                    return Err(TxError::NonPositiveValue(self.value));
                }
                if self.l1_tx_hash.is_zero() {
                    return Err(TxError::MissingL1TxHash);
                }
                if !self.from.is_zero() || self.gas_price != 0 {
                    return Err(TxError::NotSystemSender);
                }
                Ok(())
            }
            TxType::ForcedInclusion => {
                if self.l1_tx_hash.is_zero() {
                    return Err(TxError::MissingL1TxHash);
                }
                Ok(())
            }
            TxType::CrossLayerMsg => {
                if self.to.is_zero() {
                    return Err(TxError::MissingRecipient);
                }
                Ok(())
            }
            TxType::SequencerAnnounce => Ok(()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
