// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - CRYPTOGRAPHY MODULE
//
// secp256k1 compact-recoverable ECDSA over SHA3-256 digests.
// - Key generation (random and deterministic from a 32-byte seed)
// - Signing produces 65-byte signatures: 64-byte compact ‖ 1-byte recovery id
// - Address derivation: Hash160 (RIPEMD160 ∘ SHA-256) of the 33-byte
//   compressed public key, giving a 160-bit account identifier
// - SHA3-256 is the canonical structure hash everywhere else in the system
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use ripemd::Ripemd160;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::{Digest, Sha3_256};
use zeroize::Zeroize;

/// Length of a compressed SEC1 public key (prefix byte 0x02/0x03 + X coord)
pub const COMPRESSED_PUBKEY_LEN: usize = 33;

/// Length of a recoverable signature: 64-byte compact form + recovery id
pub const RECOVERABLE_SIG_LEN: usize = 65;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    InvalidSecretKey,
    InvalidPublicKey,
    InvalidSignature,
    InvalidRecoveryId(u8),
    RecoveryFailed,
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CryptoError::InvalidSecretKey => write!(f, "Invalid secret key bytes"),
            CryptoError::InvalidPublicKey => write!(f, "Invalid compressed public key"),
            CryptoError::InvalidSignature => write!(f, "Invalid signature encoding"),
            CryptoError::InvalidRecoveryId(v) => write!(f, "Invalid recovery id: {}", v),
            CryptoError::RecoveryFailed => write!(f, "Public key recovery failed"),
        }
    }
}

impl std::error::Error for CryptoError {}

// ─────────────────────────────────────────────────────────────────
// Fixed-width identifiers
// ─────────────────────────────────────────────────────────────────

/// 160-bit account identifier: Hash160 of a compressed public key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Address> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Address(arr))
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// 256-bit hash: state roots, block hashes, transaction ids, SMT keys.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Hash256> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Hash256(arr))
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ─────────────────────────────────────────────────────────────────
// Hashing
// ─────────────────────────────────────────────────────────────────

/// Canonical structure hash: SHA3-256 over the canonical serialization.
pub fn sha3_256(data: &[u8]) -> Hash256 {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    Hash256(hasher.finalize().into())
}

/// SHA3-256 over the concatenation of two 32-byte hashes.
/// Used for Merkle node hashing so intermediate buffers are not allocated.
pub fn sha3_256_pair(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = Sha3_256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    Hash256(hasher.finalize().into())
}

/// Hash160 = RIPEMD160(SHA256(data)). Account addresses are the Hash160 of
/// the 33-byte compressed public key.
pub fn hash160(data: &[u8]) -> Address {
    let sha = Sha256::digest(data);
    let rip = Ripemd160::digest(sha);
    Address(rip.into())
}

/// Derive the account address for a compressed public key.
/// Returns None if the bytes are not a valid compressed SEC1 point.
pub fn pubkey_to_address(pubkey_bytes: &[u8]) -> Option<Address> {
    if pubkey_bytes.len() != COMPRESSED_PUBKEY_LEN {
        return None;
    }
    // Parse to reject off-curve / malformed points before hashing
    PublicKey::from_slice(pubkey_bytes).ok()?;
    Some(hash160(pubkey_bytes))
}

/// Returns true if `bytes` parse as a compressed SEC1 public key
/// (prefix 0x02 or 0x03, valid curve point).
pub fn is_valid_compressed_pubkey(bytes: &[u8]) -> bool {
    if bytes.len() != COMPRESSED_PUBKEY_LEN {
        return false;
    }
    if bytes[0] != 0x02 && bytes[0] != 0x03 {
        return false;
    }
    PublicKey::from_slice(bytes).is_ok()
}

/// Serde adapter for 33-byte compressed public keys: serde only derives
/// for arrays up to 32 elements, so these round-trip as hex strings.
pub mod pubkey_hex {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 33], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 33], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| Error::custom("expected 33 bytes"))
    }
}

// ─────────────────────────────────────────────────────────────────
// Key pairs
// ─────────────────────────────────────────────────────────────────

/// secp256k1 key pair. The public key is stored compressed (33 bytes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    #[serde(with = "pubkey_hex")]
    pub public_key: [u8; 33],
    pub secret_key: [u8; 32],
}

/// Secret key material is wiped on drop.
impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl KeyPair {
    pub fn address(&self) -> Address {
        hash160(&self.public_key)
    }
}

/// Generate a fresh random key pair.
pub fn generate_keypair() -> KeyPair {
    let mut rng = rand::thread_rng();
    let sk = SecretKey::new(&mut rng);
    let pk = PublicKey::from_secret_key(SECP256K1, &sk);
    KeyPair {
        public_key: pk.serialize(),
        secret_key: sk.secret_bytes(),
    }
}

/// Deterministic key pair from a 32-byte seed. The seed is hashed once more
/// so a caller passing low-entropy bytes still lands on a valid scalar in
/// all but astronomically unlikely cases; on failure the hash is iterated.
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    let mut candidate = sha3_256(seed);
    loop {
        if let Ok(sk) = SecretKey::from_slice(&candidate.0) {
            let pk = PublicKey::from_secret_key(SECP256K1, &sk);
            return KeyPair {
                public_key: pk.serialize(),
                secret_key: sk.secret_bytes(),
            };
        }
        candidate = sha3_256(&candidate.0);
    }
}

/// Rebuild a key pair from raw secret key bytes.
pub fn keypair_from_secret(secret: &[u8]) -> Result<KeyPair, CryptoError> {
    let sk = SecretKey::from_slice(secret).map_err(|_| CryptoError::InvalidSecretKey)?;
    let pk = PublicKey::from_secret_key(SECP256K1, &sk);
    Ok(KeyPair {
        public_key: pk.serialize(),
        secret_key: sk.secret_bytes(),
    })
}

// ─────────────────────────────────────────────────────────────────
// Recoverable signatures
// ─────────────────────────────────────────────────────────────────

/// Sign a 32-byte digest. Returns the 65-byte recoverable signature:
/// bytes 0..64 are the compact signature, byte 64 is the recovery id (0–3).
pub fn sign_recoverable(
    digest: &Hash256,
    secret_key: &[u8; 32],
) -> Result<[u8; 65], CryptoError> {
    let sk = SecretKey::from_slice(secret_key).map_err(|_| CryptoError::InvalidSecretKey)?;
    let msg = Message::from_digest(digest.0);
    let sig = SECP256K1.sign_ecdsa_recoverable(&msg, &sk);
    let (recid, compact) = sig.serialize_compact();
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&compact);
    out[64] = recid.to_i32() as u8;
    Ok(out)
}

/// Recover the compressed public key that signed `digest`.
pub fn recover_pubkey(digest: &Hash256, signature: &[u8]) -> Result<[u8; 33], CryptoError> {
    if signature.len() != RECOVERABLE_SIG_LEN {
        return Err(CryptoError::InvalidSignature);
    }
    let recid = RecoveryId::from_i32(signature[64] as i32)
        .map_err(|_| CryptoError::InvalidRecoveryId(signature[64]))?;
    let sig = RecoverableSignature::from_compact(&signature[..64], recid)
        .map_err(|_| CryptoError::InvalidSignature)?;
    let msg = Message::from_digest(digest.0);
    let pk = SECP256K1
        .recover_ecdsa(&msg, &sig)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(pk.serialize())
}

/// Recover the signer's address. Returns None on any malformed input.
pub fn recover_signer(digest: &Hash256, signature: &[u8]) -> Option<Address> {
    let pubkey = recover_pubkey(digest, signature).ok()?;
    Some(hash160(&pubkey))
}

/// Verify that `signature` over `digest` was produced by the holder of
/// `expected_pubkey` (33-byte compressed form).
pub fn verify_signature(digest: &Hash256, signature: &[u8], expected_pubkey: &[u8]) -> bool {
    match recover_pubkey(digest, signature) {
        Ok(recovered) => recovered[..] == expected_pubkey[..],
        Err(_) => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
