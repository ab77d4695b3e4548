// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - SPARSE MERKLE TREE
//
// 256-bit-keyed authenticated map over arbitrary byte values.
// - Fixed depth 256; path bits are read LSB→MSB from the key
// - Empty subtrees collapse to the precomputed default-hash ladder:
//   D[0] = H(∅), D[i] = H(D[i-1] ‖ D[i-1])
// - Leaf hash H(key ‖ value), internal node H(left ‖ right)
// - The root is a pure function of the unordered (key, value) set
// - Inclusion and exclusion proofs share one serialized form (≤ 10 KiB)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::sync::LazyLock;

use emb_crypto::{sha3_256, sha3_256_pair, Hash256};
use serde::{Deserialize, Serialize};

use crate::codec::{self, ByteReader};
use crate::MAX_PROOF_SIZE;

/// Tree depth: one level per key bit.
pub const SMT_DEPTH: usize = 256;

static DEFAULT_HASHES: LazyLock<Box<[Hash256; SMT_DEPTH + 1]>> = LazyLock::new(|| {
    let mut d = Box::new([Hash256::ZERO; SMT_DEPTH + 1]);
    d[0] = sha3_256(&[]);
    for i in 1..=SMT_DEPTH {
        d[i] = sha3_256_pair(&d[i - 1], &d[i - 1]);
    }
    d
});

/// Hash of an empty subtree rooted at `height` (0 = leaf level).
pub fn default_hash(height: usize) -> Hash256 {
    DEFAULT_HASHES[height]
}

/// Bit `i` of the key, LSB-first over the big-endian 256-bit value.
/// Bit 0 is the lowest bit of the last byte.
fn key_bit(key: &Hash256, i: usize) -> bool {
    (key.0[31 - i / 8] >> (i % 8)) & 1 == 1
}

/// Leaf hash: H(key ‖ value).
fn leaf_hash(key: &Hash256, value: &[u8]) -> Hash256 {
    let mut buf = Vec::with_capacity(32 + value.len());
    buf.extend_from_slice(&key.0);
    buf.extend_from_slice(value);
    sha3_256(&buf)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtError {
    /// Serialized proof would exceed MAX_PROOF_SIZE
    ProofTooLarge(usize),
    /// Exclusion proof requested for a key that is present
    KeyPresent,
}

impl std::fmt::Display for SmtError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SmtError::ProofTooLarge(n) => {
                write!(f, "Proof of {} bytes exceeds {} byte bound", n, MAX_PROOF_SIZE)
            }
            SmtError::KeyPresent => write!(f, "Key is present; exclusion proof unavailable"),
        }
    }
}

impl std::error::Error for SmtError {}

// ─────────────────────────────────────────────────────────────────
// Proofs
// ─────────────────────────────────────────────────────────────────

/// Authentication path for one key at one root.
///
/// `siblings[i]` is the sibling hash at height `i` (0 = adjacent to the
/// leaf). For an exclusion proof the leaf hash is the empty default D[0]
/// and `value` is empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub siblings: Vec<Hash256>,
    pub leaf_hash: Hash256,
    pub key: Hash256,
    pub value: Vec<u8>,
    pub is_inclusion: bool,
}

impl MerkleProof {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        codec::write_varint(&mut out, self.siblings.len() as u64);
        for s in &self.siblings {
            codec::write_hash(&mut out, s);
        }
        codec::write_hash(&mut out, &self.leaf_hash);
        codec::write_hash(&mut out, &self.key);
        codec::write_bytes(&mut out, &self.value);
        codec::write_u8(&mut out, self.is_inclusion as u8);
        out
    }

    pub fn decode(data: &[u8]) -> Option<MerkleProof> {
        if data.len() > MAX_PROOF_SIZE {
            return None;
        }
        let mut r = ByteReader::new(data);
        let count = r.read_varint()?;
        if count != SMT_DEPTH as u64 {
            return None;
        }
        let mut siblings = Vec::with_capacity(SMT_DEPTH);
        for _ in 0..SMT_DEPTH {
            siblings.push(r.read_hash()?);
        }
        let leaf_hash = r.read_hash()?;
        let key = r.read_hash()?;
        let value = r.read_bytes(MAX_PROOF_SIZE)?;
        let is_inclusion = match r.read_u8()? {
            0 => false,
            1 => true,
            _ => return None,
        };
        if !r.is_empty() {
            return None;
        }
        Some(MerkleProof {
            siblings,
            leaf_hash,
            key,
            value,
            is_inclusion,
        })
    }

    pub fn serialized_size(&self) -> usize {
        codec::varint_len(self.siblings.len() as u64)
            + self.siblings.len() * 32
            + 32
            + 32
            + codec::varint_len(self.value.len() as u64)
            + self.value.len()
            + 1
    }
}

/// Pure verification: fold the leaf up through the 256 sibling levels and
/// compare against `root`. For inclusion, `value` must match the committed
/// value; for exclusion, `value` must be empty.
pub fn verify_proof(proof: &MerkleProof, root: &Hash256, key: &Hash256, value: &[u8]) -> bool {
    if proof.key != *key || proof.siblings.len() != SMT_DEPTH {
        return false;
    }
    if proof.serialized_size() > MAX_PROOF_SIZE {
        return false;
    }
    let expected_leaf = if proof.is_inclusion {
        if proof.value != value {
            return false;
        }
        leaf_hash(key, value)
    } else {
        if !value.is_empty() || !proof.value.is_empty() {
            return false;
        }
        default_hash(0)
    };
    if proof.leaf_hash != expected_leaf {
        return false;
    }

    let mut current = expected_leaf;
    for (i, sibling) in proof.siblings.iter().enumerate() {
        current = if key_bit(key, i) {
            sha3_256_pair(sibling, &current)
        } else {
            sha3_256_pair(&current, sibling)
        };
    }
    current == *root
}

// ─────────────────────────────────────────────────────────────────
// Tree
// ─────────────────────────────────────────────────────────────────

/// Lazily-hashed sparse Merkle tree. Only non-empty leaves are stored;
/// BTreeMap keeps keys in big-endian numeric order, which makes every
/// subtree a contiguous key range.
#[derive(Debug, Clone, Default)]
pub struct SparseMerkleTree {
    leaves: BTreeMap<Hash256, Vec<u8>>,
    cached_root: Option<Hash256>,
}

impl SparseMerkleTree {
    pub fn new() -> Self {
        Self {
            leaves: BTreeMap::new(),
            cached_root: None,
        }
    }

    pub fn get(&self, key: &Hash256) -> Option<&[u8]> {
        self.leaves.get(key).map(|v| v.as_slice())
    }

    pub fn exists(&self, key: &Hash256) -> bool {
        self.leaves.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Insert or overwrite. Invalidates the cached root.
    pub fn set(&mut self, key: Hash256, value: Vec<u8>) {
        self.leaves.insert(key, value);
        self.cached_root = None;
    }

    /// Remove a key. Returns true if it was present. The root reverts to
    /// the value it had before the key was ever inserted (modulo other keys).
    pub fn delete(&mut self, key: &Hash256) -> bool {
        let removed = self.leaves.remove(key).is_some();
        if removed {
            self.cached_root = None;
        }
        removed
    }

    /// Current root. Cached until the next mutation.
    pub fn root(&mut self) -> Hash256 {
        if let Some(r) = self.cached_root {
            return r;
        }
        let entries: Vec<(&Hash256, &Vec<u8>)> = self.leaves.iter().collect();
        let root = Self::node_hash(&entries, SMT_DEPTH);
        self.cached_root = Some(root);
        root
    }

    /// Root without mutating the cache (for shared-reference callers).
    pub fn compute_root(&self) -> Hash256 {
        if let Some(r) = self.cached_root {
            return r;
        }
        let entries: Vec<(&Hash256, &Vec<u8>)> = self.leaves.iter().collect();
        Self::node_hash(&entries, SMT_DEPTH)
    }

    /// Hash of the subtree at `height` containing exactly `entries`.
    /// Children at height h are split on key bit h-1; entries stay sorted,
    /// so the split is a partition point.
    fn node_hash(entries: &[(&Hash256, &Vec<u8>)], height: usize) -> Hash256 {
        if entries.is_empty() {
            return default_hash(height);
        }
        if height == 0 {
            let (k, v) = entries[0];
            return leaf_hash(k, v);
        }
        let bit = height - 1;
        let split = entries.partition_point(|(k, _)| !key_bit(k, bit));
        let left = Self::node_hash(&entries[..split], height - 1);
        let right = Self::node_hash(&entries[split..], height - 1);
        sha3_256_pair(&left, &right)
    }

    /// Inclusion proof for `key`. Falls back to an exclusion proof
    /// transparently when the key is absent.
    pub fn generate_inclusion_proof(&self, key: &Hash256) -> Result<MerkleProof, SmtError> {
        let siblings = self.collect_siblings(key);
        let proof = match self.leaves.get(key) {
            Some(value) => MerkleProof {
                siblings,
                leaf_hash: leaf_hash(key, value),
                key: *key,
                value: value.clone(),
                is_inclusion: true,
            },
            None => MerkleProof {
                siblings,
                leaf_hash: default_hash(0),
                key: *key,
                value: Vec::new(),
                is_inclusion: false,
            },
        };
        let size = proof.serialized_size();
        if size > MAX_PROOF_SIZE {
            return Err(SmtError::ProofTooLarge(size));
        }
        Ok(proof)
    }

    /// Exclusion proof for `key`. Fails if the key is present.
    pub fn generate_exclusion_proof(&self, key: &Hash256) -> Result<MerkleProof, SmtError> {
        if self.leaves.contains_key(key) {
            return Err(SmtError::KeyPresent);
        }
        self.generate_inclusion_proof(key)
    }

    /// Sibling hashes along the path of `key`, indexed by height.
    fn collect_siblings(&self, key: &Hash256) -> Vec<Hash256> {
        let mut siblings = vec![Hash256::ZERO; SMT_DEPTH];
        let mut current: Vec<(&Hash256, &Vec<u8>)> = self.leaves.iter().collect();
        for height in (1..=SMT_DEPTH).rev() {
            let bit = height - 1;
            let split = current.partition_point(|(k, _)| !key_bit(k, bit));
            let (zeros, ones) = current.split_at(split);
            let (same, other) = if key_bit(key, bit) {
                (ones, zeros)
            } else {
                (zeros, ones)
            };
            siblings[bit] = Self::node_hash(other, height - 1);
            current = same.to_vec();
        }
        siblings
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
