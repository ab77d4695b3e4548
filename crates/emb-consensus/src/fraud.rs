// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - SINGLE-ROUND FRAUD PROOFS
//
// State roots register with a challenge deadline; inside the window any
// observer may post a bonded proof. Verification re-executes the relevant
// transactions from the previous root through the injected execution
// oracle: a recomputed root that DIFFERS from the disputed root upholds
// the proof. Upheld proofs slash the sequencer by a type-dependent
// percentage and credit the challenger half of the slashed amount.
// `deadline` is the last admissible instant (now > deadline ⇒ expired).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use emb_core::codec;
use emb_core::transaction::L2Transaction;
use emb_core::{
    CHALLENGER_REWARD_PCT, MAX_EXECUTION_TRACE_SIZE, MAX_RELEVANT_TXS, MAX_STATE_PROOF_SIZE,
    MIN_CHALLENGE_BOND_SATS, SATS_PER_COIN,
};
use emb_crypto::{recover_signer, sha3_256, Address, Hash256};
use serde::{Deserialize, Serialize};

use crate::stake::SequencerSet;

/// Floor for any slash where the stake allows it (1 coin)
pub const MIN_SLASH_SATS: i64 = SATS_PER_COIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FraudProofType {
    DoubleSpend,
    InvalidStateTransition,
    DataWithholding,
    InvalidTransaction,
    InvalidSignature,
    TimestampManipulation,
}

impl FraudProofType {
    /// Stake percentage removed when a proof of this type is upheld.
    pub fn slash_pct(&self) -> i64 {
        match self {
            FraudProofType::DoubleSpend => 100,
            FraudProofType::InvalidStateTransition => 100,
            FraudProofType::DataWithholding => 75,
            FraudProofType::InvalidTransaction => 75,
            FraudProofType::InvalidSignature => 50,
            FraudProofType::TimestampManipulation => 50,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            FraudProofType::DoubleSpend => 0,
            FraudProofType::InvalidStateTransition => 1,
            FraudProofType::DataWithholding => 2,
            FraudProofType::InvalidTransaction => 3,
            FraudProofType::InvalidSignature => 4,
            FraudProofType::TimestampManipulation => 5,
        }
    }
}

/// Terminal and intermediate proof states. VALID and INVALID are both
/// normal completions, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FraudProofStatus {
    Pending,
    Valid,
    Invalid,
    Expired,
    InsufficientBond,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FraudError {
    BondTooLow { have: i64, need: i64 },
    ChainMismatch { expected: u64, got: u64 },
    UnknownStateRoot(Hash256),
    ChallengeWindowClosed { deadline: u64, now: u64 },
    TooManyTransactions(usize),
    StateProofTooLarge(usize),
    TraceTooLarge(usize),
    BadChallengerSignature,
    SequencerMismatch { registered: Address, claimed: Address },
    UnknownProof(Hash256),
    AlreadyVerified(Hash256),
    Stake(crate::stake::StakeError),
}

impl std::fmt::Display for FraudError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FraudError::BondTooLow { have, need } => {
                write!(f, "Challenge bond {} below minimum {}", have, need)
            }
            FraudError::ChainMismatch { expected, got } => {
                write!(f, "Proof targets chain {}, local chain is {}", got, expected)
            }
            FraudError::UnknownStateRoot(h) => write!(f, "State root {} not registered", h),
            FraudError::ChallengeWindowClosed { deadline, now } => {
                write!(f, "Challenge window closed at {}, now {}", deadline, now)
            }
            FraudError::TooManyTransactions(n) => {
                write!(f, "{} relevant transactions exceed {}", n, MAX_RELEVANT_TXS)
            }
            FraudError::StateProofTooLarge(n) => {
                write!(f, "State proof of {} bytes exceeds bound", n)
            }
            FraudError::TraceTooLarge(n) => {
                write!(f, "Execution trace of {} bytes exceeds bound", n)
            }
            FraudError::BadChallengerSignature => write!(f, "Challenger signature invalid"),
            FraudError::SequencerMismatch {
                registered,
                claimed,
            } => write!(
                f,
                "Root registered by {}, proof names {}",
                registered, claimed
            ),
            FraudError::UnknownProof(h) => write!(f, "No fraud proof {}", h),
            FraudError::AlreadyVerified(h) => write!(f, "Fraud proof {} already verified", h),
            FraudError::Stake(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for FraudError {}

impl From<crate::stake::StakeError> for FraudError {
    fn from(e: crate::stake::StakeError) -> Self {
        FraudError::Stake(e)
    }
}

/// A bonded claim that `disputed_state_root` is wrong.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudProof {
    pub proof_type: FraudProofType,
    pub disputed_state_root: Hash256,
    pub disputed_block_number: u64,
    pub previous_state_root: Hash256,
    pub l2_chain_id: u64,
    pub relevant_transactions: Vec<L2Transaction>,
    pub state_proof: Vec<u8>,
    pub execution_trace: Vec<u8>,
    pub challenger: Address,
    pub challenge_bond: i64,
    pub challenger_signature: Vec<u8>,
    pub submitted_at: u64,
    pub sequencer: Address,
}

impl FraudProof {
    /// Hash over the signature-free form; doubles as the proof id.
    pub fn signing_hash(&self) -> Hash256 {
        let mut out = Vec::new();
        codec::write_u8(&mut out, self.proof_type.tag());
        codec::write_hash(&mut out, &self.disputed_state_root);
        codec::write_u64_le(&mut out, self.disputed_block_number);
        codec::write_hash(&mut out, &self.previous_state_root);
        codec::write_u64_le(&mut out, self.l2_chain_id);
        codec::write_varint(&mut out, self.relevant_transactions.len() as u64);
        for tx in &self.relevant_transactions {
            codec::write_hash(&mut out, &tx.hash());
        }
        codec::write_bytes(&mut out, &self.state_proof);
        codec::write_bytes(&mut out, &self.execution_trace);
        codec::write_address(&mut out, &self.challenger);
        codec::write_i64_le(&mut out, self.challenge_bond);
        codec::write_u64_le(&mut out, self.submitted_at);
        codec::write_address(&mut out, &self.sequencer);
        sha3_256(&out)
    }

    pub fn id(&self) -> Hash256 {
        self.signing_hash()
    }

    pub fn sign(&mut self, keypair: &emb_crypto::KeyPair) -> Result<(), emb_crypto::CryptoError> {
        let sig = emb_crypto::sign_recoverable(&self.signing_hash(), &keypair.secret_key)?;
        self.challenger_signature = sig.to_vec();
        Ok(())
    }

    pub fn verify_challenger_signature(&self) -> bool {
        match recover_signer(&self.signing_hash(), &self.challenger_signature) {
            Some(signer) => signer == self.challenger,
            None => false,
        }
    }
}

/// A published state root inside (or past) its challenge window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredStateRoot {
    pub root: Hash256,
    pub block_number: u64,
    pub sequencer: Address,
    pub challenge_deadline: u64,
}

/// Slashing record, appended per upheld proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashEvent {
    pub sequencer: Address,
    pub proof_type: FraudProofType,
    pub slashed_amount: i64,
    pub challenger: Address,
    pub challenger_reward: i64,
    pub block_number: u64,
    pub timestamp: u64,
}

/// One re-executed transaction, as reported by the execution oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReExecution {
    pub ok: bool,
    pub gas_used: u64,
    pub post_root: Hash256,
    pub error: Option<String>,
}

/// Execution oracle: re-run `tx` on top of `pre_root`, report the post
/// root. Runs to completion on the calling thread.
pub type ExecutionOracle = Arc<dyn Fn(&L2Transaction, &Hash256) -> ReExecution + Send + Sync>;

struct FraudInner {
    roots: BTreeMap<Hash256, RegisteredStateRoot>,
    proofs: BTreeMap<Hash256, (FraudProof, FraudProofStatus)>,
    slash_events: Vec<SlashEvent>,
    /// Satoshi owed to challengers (bond refunds + rewards)
    challenger_credits: BTreeMap<Address, i64>,
    /// Forfeited bonds from rejected proofs
    forfeited_bonds: i64,
    /// Reputation penalties recorded per slashed sequencer
    reputation_penalties: BTreeMap<Address, u32>,
}

/// Owner of the stake ledger and the slashing path.
pub struct FraudProofSystem {
    chain_id: u64,
    min_bond: i64,
    oracle: ExecutionOracle,
    sequencers: Arc<SequencerSet>,
    inner: Mutex<FraudInner>,
}

impl FraudProofSystem {
    pub fn new(chain_id: u64, sequencers: Arc<SequencerSet>, oracle: ExecutionOracle) -> Self {
        Self {
            chain_id,
            min_bond: MIN_CHALLENGE_BOND_SATS,
            oracle,
            sequencers,
            inner: Mutex::new(FraudInner {
                roots: BTreeMap::new(),
                proofs: BTreeMap::new(),
                slash_events: Vec::new(),
                challenger_credits: BTreeMap::new(),
                forfeited_bonds: 0,
                reputation_penalties: BTreeMap::new(),
            }),
        }
    }

    pub fn sequencers(&self) -> &Arc<SequencerSet> {
        &self.sequencers
    }

    /// Publish a state root with its challenge deadline.
    pub fn register_state_root(
        &self,
        root: Hash256,
        block_number: u64,
        sequencer: Address,
        challenge_deadline: u64,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.roots.insert(
            root,
            RegisteredStateRoot {
                root,
                block_number,
                sequencer,
                challenge_deadline,
            },
        );
    }

    pub fn registered_root(&self, root: &Hash256) -> Option<RegisteredStateRoot> {
        self.inner.lock().unwrap().roots.get(root).cloned()
    }

    /// Admit a well-formed, bonded, in-window proof. Returns Ok(None) for
    /// an idempotent duplicate, Ok(Some(id)) when admitted.
    pub fn submit_fraud_proof(
        &self,
        proof: FraudProof,
        now: u64,
    ) -> Result<Option<Hash256>, FraudError> {
        if proof.challenge_bond < self.min_bond {
            return Err(FraudError::BondTooLow {
                have: proof.challenge_bond,
                need: self.min_bond,
            });
        }
        if proof.l2_chain_id != self.chain_id {
            return Err(FraudError::ChainMismatch {
                expected: self.chain_id,
                got: proof.l2_chain_id,
            });
        }
        if proof.relevant_transactions.len() > MAX_RELEVANT_TXS {
            return Err(FraudError::TooManyTransactions(
                proof.relevant_transactions.len(),
            ));
        }
        if proof.state_proof.len() > MAX_STATE_PROOF_SIZE {
            return Err(FraudError::StateProofTooLarge(proof.state_proof.len()));
        }
        if proof.execution_trace.len() > MAX_EXECUTION_TRACE_SIZE {
            return Err(FraudError::TraceTooLarge(proof.execution_trace.len()));
        }
        if !proof.verify_challenger_signature() {
            return Err(FraudError::BadChallengerSignature);
        }

        let mut inner = self.inner.lock().unwrap();
        let registered = inner
            .roots
            .get(&proof.disputed_state_root)
            .ok_or(FraudError::UnknownStateRoot(proof.disputed_state_root))?;
        // deadline itself is still admissible
        if now > registered.challenge_deadline {
            return Err(FraudError::ChallengeWindowClosed {
                deadline: registered.challenge_deadline,
                now,
            });
        }
        if registered.sequencer != proof.sequencer {
            return Err(FraudError::SequencerMismatch {
                registered: registered.sequencer,
                claimed: proof.sequencer,
            });
        }

        let id = proof.id();
        if inner.proofs.contains_key(&id) {
            return Ok(None);
        }
        inner.proofs.insert(id, (proof, FraudProofStatus::Pending));
        log::info!("Admitted fraud proof {}", id);
        Ok(Some(id))
    }

    /// Re-execute the proof's transactions and settle it. VALID slashes
    /// the sequencer and credits the challenger; INVALID forfeits the
    /// bond. Both are normal completions.
    pub fn verify_fraud_proof(&self, proof_id: &Hash256, now: u64) -> Result<FraudProofStatus, FraudError> {
        let proof = {
            let inner = self.inner.lock().unwrap();
            let (proof, status) = inner
                .proofs
                .get(proof_id)
                .ok_or(FraudError::UnknownProof(*proof_id))?;
            if *status != FraudProofStatus::Pending {
                return Err(FraudError::AlreadyVerified(*proof_id));
            }
            proof.clone()
        };

        // Long-running re-execution happens outside the lock, against a
        // temporary state derived from previous_state_root.
        let mut root = proof.previous_state_root;
        for tx in &proof.relevant_transactions {
            let result = (self.oracle)(tx, &root);
            if !result.ok {
                // A transaction the oracle cannot replay is itself proof
                // that the published root is unverifiable
                root = result.post_root;
                break;
            }
            root = result.post_root;
        }

        let status = if root != proof.disputed_state_root {
            FraudProofStatus::Valid
        } else {
            FraudProofStatus::Invalid
        };

        match status {
            FraudProofStatus::Valid => {
                self.settle_valid(&proof, now)?;
            }
            _ => self.settle_invalid(&proof),
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.proofs.get_mut(proof_id) {
            entry.1 = status;
        }
        Ok(status)
    }

    fn settle_valid(&self, proof: &FraudProof, now: u64) -> Result<i64, FraudError> {
        let stake = self.sequencers.stake_of(&proof.sequencer);
        let pct_amount = stake.saturating_mul(proof.proof_type.slash_pct()) / 100;
        // Floored at the minimum where the stake allows it
        let target = pct_amount.max(MIN_SLASH_SATS.min(stake));
        let slashed = if target > 0 {
            self.sequencers.slash(&proof.sequencer, target)?
        } else {
            0
        };
        let reward = slashed.saturating_mul(CHALLENGER_REWARD_PCT as i64) / 100;

        let mut inner = self.inner.lock().unwrap();
        // Bond refund + challenger reward
        let credit = inner.challenger_credits.entry(proof.challenger).or_insert(0);
        *credit = credit
            .saturating_add(proof.challenge_bond)
            .saturating_add(reward);
        *inner
            .reputation_penalties
            .entry(proof.sequencer)
            .or_insert(0) += 1;
        inner.slash_events.push(SlashEvent {
            sequencer: proof.sequencer,
            proof_type: proof.proof_type,
            slashed_amount: slashed,
            challenger: proof.challenger,
            challenger_reward: reward,
            block_number: proof.disputed_block_number,
            timestamp: now,
        });
        log::warn!(
            "Slashed sequencer {} by {} sats ({:?}); challenger {} rewarded {}",
            proof.sequencer,
            slashed,
            proof.proof_type,
            proof.challenger,
            reward
        );
        Ok(slashed)
    }

    fn settle_invalid(&self, proof: &FraudProof) {
        let mut inner = self.inner.lock().unwrap();
        inner.forfeited_bonds = inner.forfeited_bonds.saturating_add(proof.challenge_bond);
        log::info!(
            "Fraud proof against {} rejected; {} sat bond forfeited",
            proof.disputed_state_root,
            proof.challenge_bond
        );
    }

    pub fn proof_status(&self, proof_id: &Hash256) -> Option<FraudProofStatus> {
        self.inner
            .lock()
            .unwrap()
            .proofs
            .get(proof_id)
            .map(|(_, s)| *s)
    }

    pub fn challenger_credit(&self, challenger: &Address) -> i64 {
        self.inner
            .lock()
            .unwrap()
            .challenger_credits
            .get(challenger)
            .copied()
            .unwrap_or(0)
    }

    pub fn forfeited_bonds(&self) -> i64 {
        self.inner.lock().unwrap().forfeited_bonds
    }

    pub fn reputation_penalties(&self, sequencer: &Address) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .reputation_penalties
            .get(sequencer)
            .copied()
            .unwrap_or(0)
    }

    pub fn slash_events(&self) -> Vec<SlashEvent> {
        self.inner.lock().unwrap().slash_events.clone()
    }

    pub fn slash_events_for(&self, sequencer: &Address) -> Vec<SlashEvent> {
        self.inner
            .lock()
            .unwrap()
            .slash_events
            .iter()
            .filter(|e| e.sequencer == *sequencer)
            .cloned()
            .collect()
    }

    /// Slashing entry point for the interactive protocol (challenger won
    /// a bisection): same accounting as an upheld single-round proof.
    pub fn slash_for_bisection(
        &self,
        sequencer: &Address,
        challenger: &Address,
        block_number: u64,
        now: u64,
    ) -> Result<i64, FraudError> {
        let proof = FraudProof {
            proof_type: FraudProofType::InvalidStateTransition,
            disputed_state_root: Hash256::ZERO,
            disputed_block_number: block_number,
            previous_state_root: Hash256::ZERO,
            l2_chain_id: self.chain_id,
            relevant_transactions: Vec::new(),
            state_proof: Vec::new(),
            execution_trace: Vec::new(),
            challenger: *challenger,
            challenge_bond: 0,
            challenger_signature: Vec::new(),
            submitted_at: now,
            sequencer: *sequencer,
        };
        self.settle_valid(&proof, now)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
