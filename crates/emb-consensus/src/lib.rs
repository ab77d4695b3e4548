// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - FRAUD-PROOF SYSTEM
//
// Sequencer stake ledger, single-round fraud proofs over registered state
// roots, and the interactive bisection protocol. Slashing and challenger
// rewards are mutated only through this crate.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod bisection;
pub mod fraud;
pub mod stake;

pub use bisection::{InteractiveProofManager, InteractiveProofSession, SessionState};
pub use fraud::{FraudProof, FraudProofStatus, FraudProofSystem, FraudProofType};
pub use stake::SequencerSet;
