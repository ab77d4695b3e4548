// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - BURN PAYLOAD PARSER
//
// Byte-exact OP_RETURN burn payload, 51 bytes total:
//   "L2BURN" (6) ‖ chainId (u32 LE) ‖ compressed pubkey (33) ‖ amount (i64 LE)
// The outer script is the OP_RETURN opcode followed by a standard push of
// the payload. Parsing rejects wrong markers, wrong sizes, off-curve or
// uncompressed keys, zero chain ids and out-of-range amounts.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use emb_core::codec::{self, ByteReader};
use emb_core::MAX_MONEY_SATS;
use emb_crypto::{hash160, is_valid_compressed_pubkey, Address};
use serde::{Deserialize, Serialize};

use crate::L1Transaction;

/// ASCII marker opening every burn payload
pub const BURN_MARKER: &[u8; 6] = b"L2BURN";

/// Exact burn payload length: 6 + 4 + 33 + 8
pub const BURN_PAYLOAD_LEN: usize = 51;

/// Bitcoin script opcodes the parser understands
pub const OP_RETURN: u8 = 0x6a;
pub const OP_PUSHDATA1: u8 = 0x4c;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BurnParseError {
    /// Script does not begin with OP_RETURN
    NotOpReturn,
    /// Push structure malformed or payload size ≠ 51
    WrongPayloadLength(usize),
    BadMarker,
    ZeroChainId,
    /// Pubkey bytes are not a valid compressed SEC1 point
    InvalidPubKey,
    NonPositiveAmount(i64),
    AmountAboveSupply(i64),
}

impl std::fmt::Display for BurnParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            BurnParseError::NotOpReturn => write!(f, "Script is not an OP_RETURN"),
            BurnParseError::WrongPayloadLength(n) => {
                write!(f, "Burn payload of {} bytes, expected {}", n, BURN_PAYLOAD_LEN)
            }
            BurnParseError::BadMarker => write!(f, "Missing L2BURN marker"),
            BurnParseError::ZeroChainId => write!(f, "Chain id must be non-zero"),
            BurnParseError::InvalidPubKey => write!(f, "Recipient key is not a compressed point"),
            BurnParseError::NonPositiveAmount(v) => write!(f, "Burn amount {} must be positive", v),
            BurnParseError::AmountAboveSupply(v) => {
                write!(f, "Burn amount {} exceeds max supply", v)
            }
        }
    }
}

impl std::error::Error for BurnParseError {}

/// Parsed burn payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnData {
    pub chain_id: u32,
    #[serde(with = "emb_crypto::pubkey_hex")]
    pub recipient_pubkey: [u8; 33],
    /// Satoshi destroyed on L1 (and minted on L2)
    pub amount: i64,
}

impl BurnData {
    /// L2 account credited by the mint: Hash160 of the recipient key.
    pub fn recipient_address(&self) -> Address {
        hash160(&self.recipient_pubkey)
    }

    pub fn validate(&self) -> Result<(), BurnParseError> {
        if self.chain_id == 0 {
            return Err(BurnParseError::ZeroChainId);
        }
        if !is_valid_compressed_pubkey(&self.recipient_pubkey) {
            return Err(BurnParseError::InvalidPubKey);
        }
        if self.amount <= 0 {
            return Err(BurnParseError::NonPositiveAmount(self.amount));
        }
        if self.amount > MAX_MONEY_SATS {
            return Err(BurnParseError::AmountAboveSupply(self.amount));
        }
        Ok(())
    }

    /// The 51 payload bytes, marker included.
    pub fn encode_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BURN_PAYLOAD_LEN);
        out.extend_from_slice(BURN_MARKER);
        codec::write_u32_le(&mut out, self.chain_id);
        out.extend_from_slice(&self.recipient_pubkey);
        codec::write_i64_le(&mut out, self.amount);
        out
    }

    /// Parse and fully validate a 51-byte payload.
    pub fn decode_payload(payload: &[u8]) -> Result<BurnData, BurnParseError> {
        if payload.len() != BURN_PAYLOAD_LEN {
            return Err(BurnParseError::WrongPayloadLength(payload.len()));
        }
        if &payload[..6] != BURN_MARKER {
            return Err(BurnParseError::BadMarker);
        }
        let mut r = ByteReader::new(&payload[6..]);
        let chain_id = r.read_u32_le().ok_or(BurnParseError::BadMarker)?;
        let recipient_pubkey: [u8; 33] =
            r.read_array().ok_or(BurnParseError::InvalidPubKey)?;
        let amount = r
            .read_i64_le()
            .ok_or(BurnParseError::WrongPayloadLength(payload.len()))?;

        let data = BurnData {
            chain_id,
            recipient_pubkey,
            amount,
        };
        data.validate()?;
        Ok(data)
    }
}

/// Build the full OP_RETURN script for a burn.
pub fn create_burn_script(chain_id: u32, recipient_pubkey: &[u8; 33], amount: i64) -> Vec<u8> {
    let payload = BurnData {
        chain_id,
        recipient_pubkey: *recipient_pubkey,
        amount,
    }
    .encode_payload();
    let mut script = Vec::with_capacity(2 + payload.len());
    script.push(OP_RETURN);
    script.push(payload.len() as u8);
    script.extend_from_slice(&payload);
    script
}

/// Extract and validate the burn payload from an output script.
/// Accepts the direct-push form and the OP_PUSHDATA1 form.
pub fn parse_burn_output(script: &[u8]) -> Result<BurnData, BurnParseError> {
    if script.first() != Some(&OP_RETURN) {
        return Err(BurnParseError::NotOpReturn);
    }
    let payload = match script.get(1) {
        Some(&len) if (1..=75).contains(&len) => {
            let len = len as usize;
            if script.len() != 2 + len {
                return Err(BurnParseError::WrongPayloadLength(script.len().saturating_sub(2)));
            }
            &script[2..]
        }
        Some(&OP_PUSHDATA1) => {
            let len = *script.get(2).ok_or(BurnParseError::WrongPayloadLength(0))? as usize;
            if script.len() != 3 + len {
                return Err(BurnParseError::WrongPayloadLength(script.len().saturating_sub(3)));
            }
            &script[3..]
        }
        _ => return Err(BurnParseError::WrongPayloadLength(0)),
    };
    BurnData::decode_payload(payload)
}

/// Scan every output in order; return the first valid burn.
pub fn parse_burn_transaction(tx: &L1Transaction) -> Option<BurnData> {
    tx.outputs
        .iter()
        .find_map(|out| parse_burn_output(&out.script_pubkey).ok())
}

/// Index of the first valid burn output, if any.
pub fn burn_output_index(tx: &L1Transaction) -> Option<usize> {
    tx.outputs
        .iter()
        .position(|out| parse_burn_output(&out.script_pubkey).is_ok())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
