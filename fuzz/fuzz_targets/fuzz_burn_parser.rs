//! Fuzz target: OP_RETURN burn payload parser
//!
//! Feeds arbitrary scripts to parse_burn_output() to ensure:
//! 1. No panics on any input
//! 2. Anything that parses re-encodes to the same 51-byte payload
//!
//! Run: cargo +nightly fuzz run fuzz_burn_parser -- -max_len=128

#![no_main]
use emb_bridge::burn::{parse_burn_output, BurnData};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(parsed) = parse_burn_output(data) {
        // Round-trip: a parsed burn re-encodes canonically
        let payload = parsed.encode_payload();
        assert_eq!(BurnData::decode_payload(&payload), Ok(parsed));
    }
});
