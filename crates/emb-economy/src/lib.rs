// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - FEE & REPUTATION ENGINE
//
// Deterministic 70/20/10 fee split with penalty and uptime adjustments,
// sequencer reward accounting, the cross-layer reputation aggregator with
// graduated user benefits, and the per-block hook wiring finalization to
// fee distribution and state credit. Integer arithmetic throughout.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod fees;
pub mod integration;
pub mod reputation;

pub use fees::{FeeDistribution, FeeDistributor, SequencerRewardInfo};
pub use integration::{BlockFeeEvent, BlockFeeIntegration};
pub use reputation::{Benefits, ReputationData, ReputationManager};
