// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - ACCOUNT STATE
//
// AccountState and the StateManager: the single authority for account
// mutation. Addresses (160-bit) map byte-exactly into the low 20 bytes of
// the 256-bit SMT key space; the canonical account encoding is what hashes
// into the tree. Writing an empty account deletes its leaf.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Mutex;

use emb_crypto::{Address, Hash256};
use serde::{Deserialize, Serialize};

use crate::codec::{self, ByteReader};
use crate::smt::{MerkleProof, SmtError, SparseMerkleTree};

/// Maximum HAT reputation score carried in account state
pub const MAX_HAT_SCORE: u8 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// hat_score above 100
    InvalidHatScore(u8),
    /// Negative balance write
    NegativeBalance(i64),
    /// Debit larger than the current balance
    InsufficientBalance { have: i64, need: i64 },
    /// Balance arithmetic overflow
    BalanceOverflow,
    Proof(SmtError),
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            StateError::InvalidHatScore(s) => write!(f, "HAT score {} exceeds 100", s),
            StateError::NegativeBalance(b) => write!(f, "Negative balance {}", b),
            StateError::InsufficientBalance { have, need } => {
                write!(f, "Insufficient balance: have {}, need {}", have, need)
            }
            StateError::BalanceOverflow => write!(f, "Balance arithmetic overflow"),
            StateError::Proof(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StateError {}

impl From<SmtError> for StateError {
    fn from(e: SmtError) -> Self {
        StateError::Proof(e)
    }
}

// ─────────────────────────────────────────────────────────────────
// Account state
// ─────────────────────────────────────────────────────────────────

/// Per-account state committed into the SMT.
/// Empty ⇔ balance, nonce, code_hash and storage_root are all zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AccountState {
    /// Balance in satoshi
    pub balance: i64,
    /// Monotonically increasing per-address transaction counter
    pub nonce: u64,
    /// Non-zero for contract accounts
    pub code_hash: Hash256,
    /// Root of the account's storage trie
    pub storage_root: Hash256,
    /// Imported L1 HAT reputation score, 0–100
    pub hat_score: u8,
    /// Unix timestamp of the last state-changing transaction
    pub last_activity: u64,
}

impl AccountState {
    pub fn is_empty(&self) -> bool {
        self.balance == 0
            && self.nonce == 0
            && self.code_hash.is_zero()
            && self.storage_root.is_zero()
    }

    pub fn is_contract(&self) -> bool {
        !self.code_hash.is_zero()
    }

    /// Canonical encoding: the exact bytes hashed into the SMT.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 8 + 32 + 32 + 1 + 8);
        codec::write_i64_le(&mut out, self.balance);
        codec::write_u64_le(&mut out, self.nonce);
        codec::write_hash(&mut out, &self.code_hash);
        codec::write_hash(&mut out, &self.storage_root);
        codec::write_u8(&mut out, self.hat_score);
        codec::write_u64_le(&mut out, self.last_activity);
        out
    }

    pub fn decode(data: &[u8]) -> Option<AccountState> {
        let mut r = ByteReader::new(data);
        let state = AccountState {
            balance: r.read_i64_le()?,
            nonce: r.read_u64_le()?,
            code_hash: r.read_hash()?,
            storage_root: r.read_hash()?,
            hat_score: r.read_u8()?,
            last_activity: r.read_u64_le()?,
        };
        if !r.is_empty() || state.hat_score > MAX_HAT_SCORE {
            return None;
        }
        Some(state)
    }
}

/// Address → SMT key: the 20 address bytes occupy the low 20 bytes of the
/// 256-bit key, high 12 bytes zero. Byte-preserving in both directions.
pub fn address_to_key(addr: &Address) -> Hash256 {
    let mut key = [0u8; 32];
    key[12..].copy_from_slice(&addr.0);
    Hash256(key)
}

/// Inverse of `address_to_key`. Returns None if the high 12 bytes are
/// non-zero (the key does not encode an address).
pub fn key_to_address(key: &Hash256) -> Option<Address> {
    if key.0[..12] != [0u8; 12] {
        return None;
    }
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&key.0[12..]);
    Some(Address(addr))
}

// ─────────────────────────────────────────────────────────────────
// State manager
// ─────────────────────────────────────────────────────────────────

/// Exclusive owner of the account SMT. All reads and writes serialize
/// through one mutex; the block executor and the post-finalization fee
/// credit are the only writers by convention.
#[derive(Debug, Default)]
pub struct StateManager {
    tree: Mutex<SparseMerkleTree>,
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(SparseMerkleTree::new()),
        }
    }

    /// Scratch manager over a snapshot (fraud-proof re-execution runs
    /// against these, never against live state).
    pub fn from_snapshot(tree: SparseMerkleTree) -> Self {
        Self {
            tree: Mutex::new(tree),
        }
    }

    /// Account for `addr`; missing accounts read as the all-zero default.
    pub fn get(&self, addr: &Address) -> AccountState {
        let tree = self.tree.lock().unwrap();
        tree.get(&address_to_key(addr))
            .and_then(AccountState::decode)
            .unwrap_or_default()
    }

    /// Upsert the canonical encoding of `account` under the address key.
    /// An empty account deletes the leaf instead.
    pub fn set(&self, addr: &Address, account: &AccountState) -> Result<(), StateError> {
        if account.balance < 0 {
            return Err(StateError::NegativeBalance(account.balance));
        }
        if account.hat_score > MAX_HAT_SCORE {
            return Err(StateError::InvalidHatScore(account.hat_score));
        }
        let key = address_to_key(addr);
        let mut tree = self.tree.lock().unwrap();
        if account.is_empty() {
            tree.delete(&key);
        } else {
            tree.set(key, account.encode());
        }
        Ok(())
    }

    pub fn exists(&self, addr: &Address) -> bool {
        self.tree.lock().unwrap().exists(&address_to_key(addr))
    }

    /// Current state root.
    pub fn root(&self) -> Hash256 {
        self.tree.lock().unwrap().root()
    }

    pub fn account_count(&self) -> usize {
        self.tree.lock().unwrap().len()
    }

    /// Strictly additive balance credit (fee payouts, mints).
    pub fn credit(&self, addr: &Address, amount: i64, timestamp: u64) -> Result<(), StateError> {
        if amount < 0 {
            return Err(StateError::NegativeBalance(amount));
        }
        let mut account = self.get(addr);
        account.balance = account
            .balance
            .checked_add(amount)
            .ok_or(StateError::BalanceOverflow)?;
        account.last_activity = timestamp;
        self.set(addr, &account)
    }

    /// Balance debit; fails rather than going negative.
    pub fn debit(&self, addr: &Address, amount: i64, timestamp: u64) -> Result<(), StateError> {
        if amount < 0 {
            return Err(StateError::NegativeBalance(amount));
        }
        let mut account = self.get(addr);
        if account.balance < amount {
            return Err(StateError::InsufficientBalance {
                have: account.balance,
                need: amount,
            });
        }
        account.balance -= amount;
        account.last_activity = timestamp;
        self.set(addr, &account)
    }

    /// Inclusion (or transparent exclusion) proof for the account leaf.
    pub fn prove_account(&self, addr: &Address) -> Result<MerkleProof, StateError> {
        let tree = self.tree.lock().unwrap();
        Ok(tree.generate_inclusion_proof(&address_to_key(addr))?)
    }

    /// Snapshot of the full account set (for deriving scratch states).
    pub fn snapshot(&self) -> SparseMerkleTree {
        self.tree.lock().unwrap().clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smt::verify_proof;
    use emb_crypto::hash160;

    fn addr(n: u8) -> Address {
        hash160(&[n])
    }

    #[test]
    fn test_address_key_mapping_byte_preserving() {
        let a = addr(1);
        let key = address_to_key(&a);
        assert_eq!(&key.0[..12], &[0u8; 12]);
        assert_eq!(&key.0[12..], &a.0);
        assert_eq!(key_to_address(&key), Some(a));

        let mut non_address = key;
        non_address.0[0] = 1;
        assert_eq!(key_to_address(&non_address), None);
    }

    #[test]
    fn test_account_codec_roundtrip() {
        let account = AccountState {
            balance: 50 * crate::SATS_PER_COIN,
            nonce: 7,
            code_hash: emb_crypto::sha3_256(b"code"),
            storage_root: emb_crypto::sha3_256(b"storage"),
            hat_score: 88,
            last_activity: 1_700_000_000,
        };
        let bytes = account.encode();
        assert_eq!(AccountState::decode(&bytes), Some(account));

        assert_eq!(AccountState::decode(&bytes[..bytes.len() - 1]), None);
        assert_eq!(AccountState::decode(&[]), None);

        // hat_score above 100 never decodes
        let mut bad = bytes.clone();
        bad[80] = 101;
        assert_eq!(AccountState::decode(&bad), None);
    }

    #[test]
    fn test_missing_account_reads_default() {
        let sm = StateManager::new();
        let account = sm.get(&addr(9));
        assert_eq!(account, AccountState::default());
        assert!(account.is_empty());
        assert!(!sm.exists(&addr(9)));
    }

    #[test]
    fn test_set_then_get() {
        let sm = StateManager::new();
        let mut account = AccountState::default();
        account.balance = 1234;
        account.nonce = 1;
        sm.set(&addr(1), &account).unwrap();

        assert_eq!(sm.get(&addr(1)), account);
        assert!(sm.exists(&addr(1)));
        assert_eq!(sm.account_count(), 1);
    }

    #[test]
    fn test_empty_write_deletes() {
        let sm = StateManager::new();
        let empty_root = sm.root();

        let mut account = AccountState::default();
        account.balance = 10;
        sm.set(&addr(1), &account).unwrap();
        assert_ne!(sm.root(), empty_root);

        account.balance = 0;
        sm.set(&addr(1), &account).unwrap();
        assert_eq!(sm.root(), empty_root);
        assert!(!sm.exists(&addr(1)));
    }

    #[test]
    fn test_negative_and_oversized_writes_rejected() {
        let sm = StateManager::new();
        let mut account = AccountState::default();
        account.balance = -1;
        assert_eq!(
            sm.set(&addr(1), &account),
            Err(StateError::NegativeBalance(-1))
        );

        account.balance = 0;
        account.hat_score = 101;
        assert_eq!(
            sm.set(&addr(1), &account),
            Err(StateError::InvalidHatScore(101))
        );
    }

    #[test]
    fn test_credit_debit() {
        let sm = StateManager::new();
        sm.credit(&addr(1), 1000, 42).unwrap();
        assert_eq!(sm.get(&addr(1)).balance, 1000);
        assert_eq!(sm.get(&addr(1)).last_activity, 42);

        sm.debit(&addr(1), 400, 43).unwrap();
        assert_eq!(sm.get(&addr(1)).balance, 600);

        assert_eq!(
            sm.debit(&addr(1), 601, 44),
            Err(StateError::InsufficientBalance {
                have: 600,
                need: 601
            })
        );
        assert_eq!(sm.credit(&addr(1), -5, 44), Err(StateError::NegativeBalance(-5)));
    }

    #[test]
    fn test_credit_overflow_guard() {
        let sm = StateManager::new();
        sm.credit(&addr(1), i64::MAX, 1).unwrap();
        assert_eq!(sm.credit(&addr(1), 1, 2), Err(StateError::BalanceOverflow));
    }

    #[test]
    fn test_account_proof_roundtrip() {
        let sm = StateManager::new();
        let mut account = AccountState::default();
        account.balance = 5;
        sm.set(&addr(1), &account).unwrap();
        let root = sm.root();

        let proof = sm.prove_account(&addr(1)).unwrap();
        assert!(proof.is_inclusion);
        assert!(verify_proof(
            &proof,
            &root,
            &address_to_key(&addr(1)),
            &account.encode()
        ));

        // Absent account yields a verifying exclusion proof
        let exclusion = sm.prove_account(&addr(2)).unwrap();
        assert!(!exclusion.is_inclusion);
        assert!(verify_proof(&exclusion, &root, &address_to_key(&addr(2)), &[]));
    }

    #[test]
    fn test_root_deterministic_across_managers() {
        let sm1 = StateManager::new();
        let sm2 = StateManager::new();
        for i in 0u8..5 {
            let mut account = AccountState::default();
            account.balance = (i as i64 + 1) * 100;
            sm1.set(&addr(i), &account).unwrap();
        }
        for i in (0u8..5).rev() {
            let mut account = AccountState::default();
            account.balance = (i as i64 + 1) * 100;
            sm2.set(&addr(i), &account).unwrap();
        }
        assert_eq!(sm1.root(), sm2.root());
    }
}
