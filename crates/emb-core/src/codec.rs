// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - CANONICAL CODEC
//
// Byte-exact serialization shared by every on-wire and hashed structure:
// - fixed-width little-endian integers
// - CompactSize varints prefixing variable-length arrays
// - structure-by-structure concatenation in declared field order
//
// Decoding malformed input returns None; it never panics and never
// reads past the end of the buffer.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use emb_crypto::{Address, Hash256};

// ─────────────────────────────────────────────────────────────────
// Writing
// ─────────────────────────────────────────────────────────────────

pub fn write_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn write_u16_le(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u32_le(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_u64_le(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn write_i64_le(out: &mut Vec<u8>, v: i64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// CompactSize varint: 1, 3, 5 or 9 bytes depending on magnitude.
pub fn write_varint(out: &mut Vec<u8>, v: u64) {
    if v < 0xfd {
        out.push(v as u8);
    } else if v <= 0xffff {
        out.push(0xfd);
        write_u16_le(out, v as u16);
    } else if v <= 0xffff_ffff {
        out.push(0xfe);
        write_u32_le(out, v as u32);
    } else {
        out.push(0xff);
        write_u64_le(out, v);
    }
}

/// Varint length prefix followed by the raw bytes.
pub fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

pub fn write_hash(out: &mut Vec<u8>, h: &Hash256) {
    out.extend_from_slice(&h.0);
}

pub fn write_address(out: &mut Vec<u8>, a: &Address) {
    out.extend_from_slice(&a.0);
}

/// Byte length of the varint encoding of `v`.
pub fn varint_len(v: u64) -> usize {
    if v < 0xfd {
        1
    } else if v <= 0xffff {
        3
    } else if v <= 0xffff_ffff {
        5
    } else {
        9
    }
}

// ─────────────────────────────────────────────────────────────────
// Reading
// ─────────────────────────────────────────────────────────────────

/// Bounds-checked sequential reader over a byte slice.
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub fn read_slice(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        if end > self.data.len() {
            return None;
        }
        let s = &self.data[self.pos..end];
        self.pos = end;
        Some(s)
    }

    pub fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let s = self.read_slice(N)?;
        s.try_into().ok()
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        Some(u16::from_le_bytes(self.read_array::<2>()?))
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.read_array::<4>()?))
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.read_array::<8>()?))
    }

    pub fn read_i64_le(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.read_array::<8>()?))
    }

    pub fn read_varint(&mut self) -> Option<u64> {
        match self.read_u8()? {
            v @ 0..=0xfc => Some(v as u64),
            0xfd => self.read_u16_le().map(|v| v as u64),
            0xfe => self.read_u32_le().map(|v| v as u64),
            0xff => self.read_u64_le(),
        }
    }

    /// Varint-prefixed byte vector, capped at `max_len` to bound allocation
    /// from hostile length prefixes.
    pub fn read_bytes(&mut self, max_len: usize) -> Option<Vec<u8>> {
        let len = self.read_varint()?;
        if len > max_len as u64 || len > self.remaining() as u64 {
            return None;
        }
        Some(self.read_slice(len as usize)?.to_vec())
    }

    pub fn read_hash(&mut self) -> Option<Hash256> {
        Some(Hash256(self.read_array::<32>()?))
    }

    pub fn read_address(&mut self) -> Option<Address> {
        Some(Address(self.read_array::<20>()?))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
