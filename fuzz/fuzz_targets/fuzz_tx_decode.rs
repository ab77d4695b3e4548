//! Fuzz target: L2 transaction deserialization
//!
//! Raw bytes and JSON through the transaction decoders; whatever decodes
//! must survive an encode/decode round trip.
//!
//! Run: cargo +nightly fuzz run fuzz_tx_decode

#![no_main]
use emb_core::transaction::L2Transaction;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(tx) = L2Transaction::decode(data) {
        let bytes = tx.encode();
        assert_eq!(L2Transaction::decode(&bytes), Some(tx));
    }

    // JSON deserialization must not panic
    let _: Result<L2Transaction, _> = serde_json::from_slice(data);
});
