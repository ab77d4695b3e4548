// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// E2E: fraud proofs. Single-round with a real re-execution oracle, and
// the interactive bisection of an 8-step trace ending in slashing with
// the challenger credited half of the slashed stake.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use emb_consensus::bisection::{ExecutionStep, InteractiveProofManager, StepVerifier};
use emb_consensus::fraud::{
    ExecutionOracle, FraudProof, FraudProofStatus, FraudProofSystem, FraudProofType, ReExecution,
};
use emb_consensus::stake::SequencerSet;
use emb_consensus::SessionState;
use emb_core::block::{compute_transactions_root, BlockHeader, Executor, L2Block};
use emb_core::state::StateManager;
use emb_core::transaction::L2Transaction;
use emb_core::{MIN_CHALLENGE_BOND_SATS, SATS_PER_COIN};
use emb_crypto::{generate_keypair, sha3_256, Hash256};

const NOW: u64 = 1_750_000_000;
const DEADLINE: u64 = NOW + 7 * 24 * 3600;

/// Oracle that genuinely re-executes: it keeps a snapshot per known state
/// root and applies the transaction to a scratch copy.
fn replaying_oracle(
    snapshots: Arc<Mutex<BTreeMap<Hash256, emb_core::smt::SparseMerkleTree>>>,
) -> ExecutionOracle {
    Arc::new(move |tx: &L2Transaction, pre_root: &Hash256| {
        let snapshot = snapshots.lock().unwrap().get(pre_root).cloned();
        let Some(tree) = snapshot else {
            return ReExecution {
                ok: false,
                gas_used: 0,
                post_root: *pre_root,
                error: Some("unknown pre-state".to_string()),
            };
        };
        let scratch = Arc::new(StateManager::from_snapshot(tree));
        let executor = Executor::new(Arc::clone(&scratch));
        let transactions = vec![tx.clone()];
        let block = L2Block {
            header: BlockHeader {
                block_number: 1,
                parent_hash: sha3_256(b"parent"),
                transactions_root: compute_transactions_root(&transactions),
                sequencer: emb_crypto::hash160(b"seq"),
                timestamp: NOW,
                gas_limit: 30_000_000,
                l2_chain_id: 1,
                ..BlockHeader::default()
            },
            transactions,
            ..L2Block::default()
        };
        match executor.execute_block(&block) {
            Ok(outcome) => {
                // Remember the post state so chained re-execution works
                snapshots
                    .lock()
                    .unwrap()
                    .insert(outcome.state_root, scratch.snapshot());
                ReExecution {
                    ok: true,
                    gas_used: outcome.gas_used,
                    post_root: outcome.state_root,
                    error: None,
                }
            }
            Err(e) => ReExecution {
                ok: false,
                gas_used: 0,
                post_root: *pre_root,
                error: Some(e.to_string()),
            },
        }
    })
}

#[test]
fn single_round_proof_with_real_reexecution() {
    // Live chain state: one funded account
    let state = Arc::new(StateManager::new());
    let recipient = generate_keypair().address();
    let previous_root = state.root();

    let snapshots = Arc::new(Mutex::new(BTreeMap::new()));
    snapshots
        .lock()
        .unwrap()
        .insert(previous_root, state.snapshot());

    // The block's one transaction mints 5 coin
    let mint = L2Transaction::burn_mint(1, recipient, 5 * SATS_PER_COIN, sha3_256(b"l1burn"));

    // Honest root: what re-execution actually produces
    let honest = {
        let scratch = Arc::new(StateManager::from_snapshot(state.snapshot()));
        scratch
            .credit(&recipient, 5 * SATS_PER_COIN, NOW)
            .unwrap();
        scratch.root()
    };

    // A lying sequencer publishes a root crediting 500 coin instead
    let fraudulent = {
        let scratch = Arc::new(StateManager::from_snapshot(state.snapshot()));
        scratch
            .credit(&recipient, 500 * SATS_PER_COIN, NOW)
            .unwrap();
        scratch.root()
    };
    assert_ne!(honest, fraudulent);

    let sequencers = Arc::new(SequencerSet::new());
    let sequencer_kp = generate_keypair();
    let stake = 200 * SATS_PER_COIN;
    let sequencer = sequencers.register(sequencer_kp.public_key, stake, NOW).unwrap();

    let system = FraudProofSystem::new(1, sequencers, replaying_oracle(Arc::clone(&snapshots)));
    system.register_state_root(fraudulent, 9, sequencer, DEADLINE);

    let challenger_kp = generate_keypair();
    let mut proof = FraudProof {
        proof_type: FraudProofType::InvalidStateTransition,
        disputed_state_root: fraudulent,
        disputed_block_number: 9,
        previous_state_root: previous_root,
        l2_chain_id: 1,
        relevant_transactions: vec![mint],
        state_proof: Vec::new(),
        execution_trace: Vec::new(),
        challenger: challenger_kp.address(),
        challenge_bond: MIN_CHALLENGE_BOND_SATS,
        challenger_signature: Vec::new(),
        submitted_at: NOW,
        sequencer,
    };
    proof.sign(&challenger_kp).unwrap();

    let id = system.submit_fraud_proof(proof, NOW).unwrap().unwrap();
    let status = system.verify_fraud_proof(&id, NOW + 60).unwrap();
    assert_eq!(status, FraudProofStatus::Valid);

    // 100% slash for an invalid state transition; challenger gets the
    // bond back plus half the slash
    assert_eq!(system.sequencers().stake_of(&sequencer), 0);
    assert_eq!(
        system.challenger_credit(&challenger_kp.address()),
        MIN_CHALLENGE_BOND_SATS + stake / 2
    );
}

#[test]
fn honest_sequencer_survives_proof() {
    let state = Arc::new(StateManager::new());
    let recipient = generate_keypair().address();
    let previous_root = state.root();

    let snapshots = Arc::new(Mutex::new(BTreeMap::new()));
    snapshots
        .lock()
        .unwrap()
        .insert(previous_root, state.snapshot());

    let mint = L2Transaction::burn_mint(1, recipient, 5 * SATS_PER_COIN, sha3_256(b"l1burn"));
    let honest = {
        let scratch = Arc::new(StateManager::from_snapshot(state.snapshot()));
        scratch.credit(&recipient, 5 * SATS_PER_COIN, NOW).unwrap();
        scratch.root()
    };

    let sequencers = Arc::new(SequencerSet::new());
    let sequencer_kp = generate_keypair();
    let stake = 200 * SATS_PER_COIN;
    let sequencer = sequencers.register(sequencer_kp.public_key, stake, NOW).unwrap();
    let system = FraudProofSystem::new(1, sequencers, replaying_oracle(snapshots));
    system.register_state_root(honest, 9, sequencer, DEADLINE);

    let challenger_kp = generate_keypair();
    let mut proof = FraudProof {
        proof_type: FraudProofType::InvalidStateTransition,
        disputed_state_root: honest,
        disputed_block_number: 9,
        previous_state_root: previous_root,
        l2_chain_id: 1,
        relevant_transactions: vec![mint],
        state_proof: Vec::new(),
        execution_trace: Vec::new(),
        challenger: challenger_kp.address(),
        challenge_bond: MIN_CHALLENGE_BOND_SATS,
        challenger_signature: Vec::new(),
        submitted_at: NOW,
        sequencer,
    };
    proof.sign(&challenger_kp).unwrap();

    let id = system.submit_fraud_proof(proof, NOW).unwrap().unwrap();
    assert_eq!(
        system.verify_fraud_proof(&id, NOW + 60).unwrap(),
        FraudProofStatus::Invalid
    );
    assert_eq!(system.sequencers().stake_of(&sequencer), stake);
    assert_eq!(system.forfeited_bonds(), MIN_CHALLENGE_BOND_SATS);
}

#[test]
fn interactive_bisection_slashes_sequencer() {
    // Stake ledger shared between the fraud system and the bisection hook
    let sequencers = Arc::new(SequencerSet::new());
    let sequencer_kp = generate_keypair();
    let challenger_kp = generate_keypair();
    let stake = 100 * SATS_PER_COIN;
    let sequencer = sequencers.register(sequencer_kp.public_key, stake, NOW).unwrap();
    let challenger = challenger_kp.address();

    let noop_oracle: ExecutionOracle = Arc::new(|_tx, pre| ReExecution {
        ok: true,
        gas_used: 0,
        post_root: *pre,
        error: None,
    });
    let system = Arc::new(FraudProofSystem::new(1, sequencers, noop_oracle));

    // Step 6 of the trace is the broken transition
    let verifier: StepVerifier = Arc::new(|step: &ExecutionStep| step.step_number != 6);
    let manager = InteractiveProofManager::new(verifier);

    // When the challenger wins, the resolution hook slashes through the
    // fraud system (invalid-state-transition percentage)
    let hook_system = Arc::clone(&system);
    manager.on_session_resolved(Arc::new(move |session| {
        if session.state == SessionState::Resolved && session.winner == Some(session.challenger) {
            hook_system
                .slash_for_bisection(
                    &session.sequencer,
                    &session.challenger,
                    42,
                    session.last_activity_at,
                )
                .expect("slash applies");
        }
    }));

    let step = |n: u64| ExecutionStep {
        step_number: n,
        pre_state_root: sha3_256(&[n as u8]),
        instruction: vec![0xee, n as u8],
        post_state_root: sha3_256(&[n as u8, 1]),
    };

    let id = manager
        .start_session(challenger, sequencer, 8, NOW)
        .unwrap();
    manager.submit_step(&id, sequencer, step(4), NOW + 10).unwrap();
    manager.submit_step(&id, challenger, step(7), NOW + 20).unwrap();
    manager.submit_step(&id, sequencer, step(6), NOW + 30).unwrap();
    let state = manager
        .submit_step(&id, challenger, step(5), NOW + 40)
        .unwrap();
    assert_eq!(state, SessionState::Resolved);

    let session = manager.session(&id).unwrap();
    assert_eq!(session.winner, Some(challenger));
    assert_eq!(session.invalid_step_number, Some(6));
    assert_eq!((session.search_lower, session.search_upper), (5, 6));

    // Invalid state transition: 100% of the stake, half to the challenger
    assert_eq!(system.sequencers().stake_of(&sequencer), 0);
    assert_eq!(system.challenger_credit(&challenger), stake / 2);
    let events = system.slash_events_for(&sequencer);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].slashed_amount, stake);
    assert_eq!(events[0].challenger_reward, stake / 2);
    assert_eq!(system.reputation_penalties(&sequencer), 1);
}
