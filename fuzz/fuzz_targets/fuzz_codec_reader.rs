//! Fuzz target: canonical byte reader
//!
//! Arbitrary byte streams through every reader primitive; must never
//! panic or read out of bounds.
//!
//! Run: cargo +nightly fuzz run fuzz_codec_reader

#![no_main]
use emb_core::codec::ByteReader;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut r = ByteReader::new(data);
    let _ = r.read_varint();
    let _ = r.read_bytes(1024);
    let _ = r.read_hash();
    let _ = r.read_address();
    let _ = r.read_u64_le();
    let _ = r.read_i64_le();
    let _ = r.read_u32_le();
    let _ = r.read_u16_le();
    while r.read_u8().is_some() {}
    assert!(r.is_empty());
});
