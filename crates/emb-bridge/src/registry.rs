// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - BURN REGISTRY
//
// Durable record of every processed burn, triple-indexed:
//   by L1 txid (primary, uniqueness-enforced)
//   by L2 recipient
//   by L2 mint block (for reorg rollback)
//
// Persistence is an optional sled tree with stable key prefixes:
//   burn_record_<hex txid>            → canonical record bytes
//   burn_addr_<hex addr>_<hex txid>   → ∅ (index entry)
//   burn_block_<block:020>_<hex txid> → ∅ (index entry)
//   burn_total / burn_count           → LE aggregates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

use emb_core::codec::{self, ByteReader};
use emb_crypto::{Address, Hash256};
use serde::{Deserialize, Serialize};

const RECORD_PREFIX: &str = "burn_record_";
const ADDR_PREFIX: &str = "burn_addr_";
const BLOCK_PREFIX: &str = "burn_block_";
const TOTAL_KEY: &str = "burn_total";
const COUNT_KEY: &str = "burn_count";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    Storage(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            RegistryError::Storage(e) => write!(f, "Registry storage error: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<sled::Error> for RegistryError {
    fn from(e: sled::Error) -> Self {
        RegistryError::Storage(e.to_string())
    }
}

/// One processed burn. `l1_tx_hash` is the registry's unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnRecord {
    pub l1_tx_hash: Hash256,
    pub l1_block_number: u64,
    pub l1_block_hash: Hash256,
    pub l2_recipient: Address,
    pub amount: i64,
    pub l2_mint_block: u64,
    pub l2_mint_tx_hash: Hash256,
    pub timestamp: u64,
}

impl BurnRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 8 + 32 + 20 + 8 + 8 + 32 + 8);
        codec::write_hash(&mut out, &self.l1_tx_hash);
        codec::write_u64_le(&mut out, self.l1_block_number);
        codec::write_hash(&mut out, &self.l1_block_hash);
        codec::write_address(&mut out, &self.l2_recipient);
        codec::write_i64_le(&mut out, self.amount);
        codec::write_u64_le(&mut out, self.l2_mint_block);
        codec::write_hash(&mut out, &self.l2_mint_tx_hash);
        codec::write_u64_le(&mut out, self.timestamp);
        out
    }

    pub fn decode(data: &[u8]) -> Option<BurnRecord> {
        let mut r = ByteReader::new(data);
        let record = BurnRecord {
            l1_tx_hash: r.read_hash()?,
            l1_block_number: r.read_u64_le()?,
            l1_block_hash: r.read_hash()?,
            l2_recipient: r.read_address()?,
            amount: r.read_i64_le()?,
            l2_mint_block: r.read_u64_le()?,
            l2_mint_tx_hash: r.read_hash()?,
            timestamp: r.read_u64_le()?,
        };
        if !r.is_empty() {
            return None;
        }
        Some(record)
    }
}

#[derive(Default)]
struct RegistryInner {
    by_tx: BTreeMap<Hash256, BurnRecord>,
    by_recipient: BTreeMap<Address, BTreeSet<Hash256>>,
    by_mint_block: BTreeMap<u64, BTreeSet<Hash256>>,
    total_burned: i64,
    db: Option<sled::Db>,
}

impl RegistryInner {
    fn index(&mut self, record: &BurnRecord) {
        self.by_recipient
            .entry(record.l2_recipient)
            .or_default()
            .insert(record.l1_tx_hash);
        self.by_mint_block
            .entry(record.l2_mint_block)
            .or_default()
            .insert(record.l1_tx_hash);
    }

    fn unindex(&mut self, record: &BurnRecord) {
        if let Some(set) = self.by_recipient.get_mut(&record.l2_recipient) {
            set.remove(&record.l1_tx_hash);
            if set.is_empty() {
                self.by_recipient.remove(&record.l2_recipient);
            }
        }
        if let Some(set) = self.by_mint_block.get_mut(&record.l2_mint_block) {
            set.remove(&record.l1_tx_hash);
            if set.is_empty() {
                self.by_mint_block.remove(&record.l2_mint_block);
            }
        }
    }

    fn persist_record(&self, record: &BurnRecord) -> Result<(), RegistryError> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let tx_hex = record.l1_tx_hash.to_hex();
        db.insert(
            format!("{}{}", RECORD_PREFIX, tx_hex).as_bytes(),
            record.encode(),
        )?;
        db.insert(
            format!("{}{}_{}", ADDR_PREFIX, record.l2_recipient.to_hex(), tx_hex).as_bytes(),
            vec![],
        )?;
        db.insert(
            format!("{}{:020}_{}", BLOCK_PREFIX, record.l2_mint_block, tx_hex).as_bytes(),
            vec![],
        )?;
        self.persist_aggregates()?;
        Ok(())
    }

    fn remove_persisted(&self, record: &BurnRecord) -> Result<(), RegistryError> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let tx_hex = record.l1_tx_hash.to_hex();
        db.remove(format!("{}{}", RECORD_PREFIX, tx_hex).as_bytes())?;
        db.remove(
            format!("{}{}_{}", ADDR_PREFIX, record.l2_recipient.to_hex(), tx_hex).as_bytes(),
        )?;
        db.remove(
            format!("{}{:020}_{}", BLOCK_PREFIX, record.l2_mint_block, tx_hex).as_bytes(),
        )?;
        Ok(())
    }

    fn persist_aggregates(&self) -> Result<(), RegistryError> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        db.insert(TOTAL_KEY.as_bytes(), self.total_burned.to_le_bytes().to_vec())?;
        db.insert(COUNT_KEY.as_bytes(), (self.by_tx.len() as u64).to_le_bytes().to_vec())?;
        Ok(())
    }
}

/// Authoritative processed-burn set. `is_processed` here is the source of
/// truth behind the validator's idempotency check.
pub struct BurnRegistry {
    inner: Mutex<RegistryInner>,
}

impl Default for BurnRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BurnRegistry {
    /// In-memory registry (tests, ephemeral nodes).
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Sled-backed registry. Existing records are loaded; a corrupt record
    /// is skipped with a warning rather than poisoning startup.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let db = sled::open(path)?;

        let mut records = Vec::new();
        for kv in db.scan_prefix(RECORD_PREFIX.as_bytes()) {
            let (key, value) = kv?;
            match BurnRecord::decode(&value) {
                Some(record) => records.push(record),
                None => log::warn!(
                    "Skipping corrupt burn record at key {}",
                    String::from_utf8_lossy(&key)
                ),
            }
        }

        let mut inner = RegistryInner {
            db: Some(db),
            ..RegistryInner::default()
        };
        for record in records {
            inner.total_burned = inner.total_burned.saturating_add(record.amount);
            inner.index(&record);
            inner.by_tx.insert(record.l1_tx_hash, record);
        }

        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Record a processed burn. Returns Ok(false) if the L1 txid is
    /// already present (a silent idempotency no-op, never fatal).
    pub fn record_burn(&self, record: BurnRecord) -> Result<bool, RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.by_tx.contains_key(&record.l1_tx_hash) {
            return Ok(false);
        }
        inner.total_burned = inner.total_burned.saturating_add(record.amount);
        inner.index(&record);
        inner.by_tx.insert(record.l1_tx_hash, record.clone());
        inner.persist_record(&record)?;
        log::info!(
            "Recorded burn {} → {} ({} sats, mint block {})",
            record.l1_tx_hash,
            record.l2_recipient,
            record.amount,
            record.l2_mint_block
        );
        Ok(true)
    }

    pub fn is_processed(&self, l1_tx_hash: &Hash256) -> bool {
        self.inner.lock().unwrap().by_tx.contains_key(l1_tx_hash)
    }

    pub fn get_by_tx_hash(&self, l1_tx_hash: &Hash256) -> Option<BurnRecord> {
        self.inner.lock().unwrap().by_tx.get(l1_tx_hash).cloned()
    }

    pub fn get_by_recipient(&self, recipient: &Address) -> Vec<BurnRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_recipient
            .get(recipient)
            .map(|set| {
                set.iter()
                    .filter_map(|h| inner.by_tx.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_by_mint_block(&self, l2_block: u64) -> Vec<BurnRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .by_mint_block
            .get(&l2_block)
            .map(|set| {
                set.iter()
                    .filter_map(|h| inner.by_tx.get(h).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn total_burned(&self) -> i64 {
        self.inner.lock().unwrap().total_burned
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().unwrap().by_tx.len()
    }

    /// Drop every record minted at or above `from_block`, decrementing the
    /// burned total. Returns the number removed. Idempotent: a second call
    /// with the same height removes nothing.
    pub fn handle_reorg(&self, from_block: u64) -> Result<usize, RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        let doomed: Vec<Hash256> = inner
            .by_mint_block
            .range(from_block..)
            .flat_map(|(_, set)| set.iter().copied())
            .collect();

        for tx_hash in &doomed {
            if let Some(record) = inner.by_tx.remove(tx_hash) {
                inner.total_burned = inner.total_burned.saturating_sub(record.amount);
                inner.unindex(&record);
                inner.remove_persisted(&record)?;
            }
        }
        inner.persist_aggregates()?;
        if !doomed.is_empty() {
            log::warn!(
                "Reorg from L2 block {}: rolled back {} burn records",
                from_block,
                doomed.len()
            );
        }
        Ok(doomed.len())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
