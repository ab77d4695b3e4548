//! Fuzz target: Merkle proof deserialization and verification
//!
//! Arbitrary bytes through MerkleProof::decode, and any decoded proof
//! through verify_proof: no panics, no out-of-bounds sibling access.
//!
//! Run: cargo +nightly fuzz run fuzz_proof_decode -- -max_len=16384

#![no_main]
use emb_core::smt::{verify_proof, MerkleProof};
use emb_crypto::sha3_256;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(proof) = MerkleProof::decode(data) {
        let root = sha3_256(b"fuzz root");
        let key = proof.key;
        let value = proof.value.clone();
        let _ = verify_proof(&proof, &root, &key, &value);
        assert_eq!(MerkleProof::decode(&proof.encode()), Some(proof));
    }
});
