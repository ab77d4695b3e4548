// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EMBERNET (EMB) - INTERACTIVE BISECTION PROTOCOL
//
// Two-party search over a claimed execution trace of ≤ 256 steps.
// Turns alternate; the sequencer opens at the midpoint of [0, totalSteps].
// Every attested step narrows the interval:
//   stepNumber ≤ midpoint ⇒ searchLower := stepNumber
//   stepNumber > midpoint ⇒ searchUpper := stepNumber
// Convergence at searchUpper − searchLower ≤ 1, then the lone disputed
// step's (pre, instruction) → post transition is checked: verifies ⇒
// sequencer wins, otherwise challenger wins. Missing the 1-hour step
// deadline forfeits the session.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use emb_core::codec;
use emb_core::{MAX_INTERACTIVE_STEPS, STEP_DEADLINE_SECS};
use emb_crypto::{sha3_256, Address, Hash256};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Initiated,
    ChallengerTurn,
    SequencerTurn,
    Resolved,
    TimedOut,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Resolved | SessionState::TimedOut | SessionState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    TooManySteps(u64),
    ZeroSteps,
    NotFound(Hash256),
    SessionClosed(SessionState),
    NotYourTurn { expected: Address },
    UnknownParty(Address),
    /// Step number outside the open interval (lower, upper)
    StepOutOfInterval { step: u64, lower: u64, upper: u64 },
    /// Move arrived after the step deadline; the mover forfeits
    DeadlineMissed { deadline: u64, now: u64 },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SessionError::TooManySteps(n) => {
                write!(f, "Trace of {} steps exceeds {}", n, MAX_INTERACTIVE_STEPS)
            }
            SessionError::ZeroSteps => write!(f, "Trace must have at least one step"),
            SessionError::NotFound(id) => write!(f, "No session {}", id),
            SessionError::SessionClosed(s) => write!(f, "Session already {:?}", s),
            SessionError::NotYourTurn { expected } => {
                write!(f, "Not your turn; expected a move from {}", expected)
            }
            SessionError::UnknownParty(a) => write!(f, "{} is not a party to this session", a),
            SessionError::StepOutOfInterval { step, lower, upper } => {
                write!(f, "Step {} outside the open interval ({}, {})", step, lower, upper)
            }
            SessionError::DeadlineMissed { deadline, now } => {
                write!(f, "Step deadline {} missed at {}", deadline, now)
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// One attested instruction of the disputed trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_number: u64,
    pub pre_state_root: Hash256,
    pub instruction: Vec<u8>,
    pub post_state_root: Hash256,
}

/// Verifies a single (pre, instruction) → post transition.
pub type StepVerifier = Arc<dyn Fn(&ExecutionStep) -> bool + Send + Sync>;

/// Fired after a session resolves, times out, or is cancelled.
pub type SessionResolvedCallback = Arc<dyn Fn(&InteractiveProofSession) + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractiveProofSession {
    pub session_id: Hash256,
    pub challenger: Address,
    pub sequencer: Address,
    pub state: SessionState,
    /// Attested steps in arrival order
    pub steps: Vec<ExecutionStep>,
    pub search_lower: u64,
    pub search_upper: u64,
    pub total_steps: u64,
    pub created_at: u64,
    pub last_activity_at: u64,
    pub step_deadline: u64,
    pub winner: Option<Address>,
    pub invalid_step_number: Option<u64>,
}

impl InteractiveProofSession {
    pub fn midpoint(&self) -> u64 {
        (self.search_lower + self.search_upper) / 2
    }

    pub fn converged(&self) -> bool {
        self.search_upper - self.search_lower <= 1
    }

    fn on_turn(&self) -> Address {
        match self.state {
            SessionState::ChallengerTurn => self.challenger,
            // The sequencer opens from Initiated
            _ => self.sequencer,
        }
    }

    fn opponent(&self, party: &Address) -> Address {
        if *party == self.challenger {
            self.sequencer
        } else {
            self.challenger
        }
    }
}

pub struct InteractiveProofManager {
    verifier: StepVerifier,
    resolved_callback: Mutex<Option<SessionResolvedCallback>>,
    sessions: Mutex<BTreeMap<Hash256, InteractiveProofSession>>,
    session_counter: Mutex<u64>,
}

impl InteractiveProofManager {
    pub fn new(verifier: StepVerifier) -> Self {
        Self {
            verifier,
            resolved_callback: Mutex::new(None),
            sessions: Mutex::new(BTreeMap::new()),
            session_counter: Mutex::new(0),
        }
    }

    pub fn on_session_resolved(&self, callback: SessionResolvedCallback) {
        *self.resolved_callback.lock().unwrap() = Some(callback);
    }

    /// Open a session over a claimed trace. The search interval starts at
    /// [0, total_steps]; the sequencer moves first.
    pub fn start_session(
        &self,
        challenger: Address,
        sequencer: Address,
        total_steps: u64,
        now: u64,
    ) -> Result<Hash256, SessionError> {
        if total_steps == 0 {
            return Err(SessionError::ZeroSteps);
        }
        if total_steps > MAX_INTERACTIVE_STEPS {
            return Err(SessionError::TooManySteps(total_steps));
        }

        let session_id = {
            let mut counter = self.session_counter.lock().unwrap();
            *counter += 1;
            let mut buf = Vec::with_capacity(20 + 20 + 8 + 8);
            codec::write_address(&mut buf, &challenger);
            codec::write_address(&mut buf, &sequencer);
            codec::write_u64_le(&mut buf, now);
            codec::write_u64_le(&mut buf, *counter);
            sha3_256(&buf)
        };

        let session = InteractiveProofSession {
            session_id,
            challenger,
            sequencer,
            state: SessionState::Initiated,
            steps: Vec::new(),
            search_lower: 0,
            search_upper: total_steps,
            total_steps,
            created_at: now,
            last_activity_at: now,
            step_deadline: now + STEP_DEADLINE_SECS,
            winner: None,
            invalid_step_number: None,
        };
        self.sessions.lock().unwrap().insert(session_id, session);
        log::info!(
            "Opened bisection session {} over {} steps",
            session_id,
            total_steps
        );
        Ok(session_id)
    }

    /// Submit one step attestation. Narrows the interval, flips the turn,
    /// and on convergence verifies the disputed step and resolves.
    pub fn submit_step(
        &self,
        session_id: &Hash256,
        party: Address,
        step: ExecutionStep,
        now: u64,
    ) -> Result<SessionState, SessionError> {
        let resolved = {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get_mut(session_id)
                .ok_or(SessionError::NotFound(*session_id))?;

            if session.state.is_terminal() {
                return Err(SessionError::SessionClosed(session.state));
            }
            if party != session.challenger && party != session.sequencer {
                return Err(SessionError::UnknownParty(party));
            }

            // A move past the deadline forfeits to the opponent
            if now > session.step_deadline {
                session.state = SessionState::TimedOut;
                session.winner = Some(session.opponent(&party));
                let snapshot = session.clone();
                drop(sessions);
                self.fire_resolved(&snapshot);
                return Err(SessionError::DeadlineMissed {
                    deadline: snapshot.step_deadline,
                    now,
                });
            }

            let expected = session.on_turn();
            if party != expected {
                return Err(SessionError::NotYourTurn { expected });
            }

            // Progress requires a step strictly inside the interval
            if step.step_number <= session.search_lower
                || step.step_number >= session.search_upper
            {
                return Err(SessionError::StepOutOfInterval {
                    step: step.step_number,
                    lower: session.search_lower,
                    upper: session.search_upper,
                });
            }

            let midpoint = session.midpoint();
            if step.step_number <= midpoint {
                session.search_lower = step.step_number;
            } else {
                session.search_upper = step.step_number;
            }
            session.steps.push(step);
            session.last_activity_at = now;
            session.step_deadline = now + STEP_DEADLINE_SECS;
            session.state = if party == session.sequencer {
                SessionState::ChallengerTurn
            } else {
                SessionState::SequencerTurn
            };

            if session.converged() {
                let disputed = session.search_upper;
                // The transition under dispute is the attested step at the
                // upper bound; a sequencer that never attested it forfeits.
                let verdict = session
                    .steps
                    .iter()
                    .rev()
                    .find(|s| s.step_number == disputed)
                    .map(|s| (self.verifier)(s));
                match verdict {
                    Some(true) => {
                        session.winner = Some(session.sequencer);
                    }
                    Some(false) | None => {
                        session.winner = Some(session.challenger);
                        session.invalid_step_number = Some(disputed);
                    }
                }
                session.state = SessionState::Resolved;
                Some(session.clone())
            } else {
                None
            }
        };

        if let Some(session) = resolved {
            if let Some(winner) = session.winner {
                log::info!(
                    "Bisection session {} resolved; winner {}",
                    session.session_id,
                    winner
                );
            }
            self.fire_resolved(&session);
            return Ok(SessionState::Resolved);
        }
        Ok(self
            .session(session_id)
            .map(|s| s.state)
            .unwrap_or(SessionState::Resolved))
    }

    /// Periodic sweep: forfeit every live session whose deadline passed.
    /// The party on turn is the defaulter; the opponent wins.
    pub fn check_timeouts(&self, now: u64) -> Vec<Hash256> {
        let mut timed_out = Vec::new();
        {
            let mut sessions = self.sessions.lock().unwrap();
            for session in sessions.values_mut() {
                if !session.state.is_terminal() && now > session.step_deadline {
                    let defaulter = session.on_turn();
                    session.winner = Some(session.opponent(&defaulter));
                    session.state = SessionState::TimedOut;
                    timed_out.push(session.clone());
                }
            }
        }
        let ids: Vec<Hash256> = timed_out.iter().map(|s| s.session_id).collect();
        for session in &timed_out {
            log::warn!("Bisection session {} timed out", session.session_id);
            self.fire_resolved(session);
        }
        ids
    }

    /// Challenger-initiated withdrawal. No winner is assigned.
    pub fn cancel_session(&self, session_id: &Hash256, by: &Address) -> Result<(), SessionError> {
        let snapshot = {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get_mut(session_id)
                .ok_or(SessionError::NotFound(*session_id))?;
            if session.state.is_terminal() {
                return Err(SessionError::SessionClosed(session.state));
            }
            if *by != session.challenger {
                return Err(SessionError::UnknownParty(*by));
            }
            session.state = SessionState::Cancelled;
            session.clone()
        };
        self.fire_resolved(&snapshot);
        Ok(())
    }

    pub fn session(&self, session_id: &Hash256) -> Option<InteractiveProofSession> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    pub fn live_session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| !s.state.is_terminal())
            .count()
    }

    fn fire_resolved(&self, session: &InteractiveProofSession) {
        let callback = self.resolved_callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(session);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TESTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use emb_crypto::hash160;

    const NOW: u64 = 1_750_000_000;

    fn addr(n: u8) -> Address {
        hash160(&[n])
    }

    fn step(n: u64) -> ExecutionStep {
        ExecutionStep {
            step_number: n,
            pre_state_root: sha3_256(&[n as u8]),
            instruction: vec![0x01, n as u8],
            post_state_root: sha3_256(&[n as u8, 0xff]),
        }
    }

    /// Verifier that fails exactly the given step number.
    fn failing_at(bad_step: u64) -> StepVerifier {
        Arc::new(move |s: &ExecutionStep| s.step_number != bad_step)
    }

    fn open_session(manager: &InteractiveProofManager, total: u64) -> (Hash256, Address, Address) {
        let challenger = addr(1);
        let sequencer = addr(2);
        let id = manager
            .start_session(challenger, sequencer, total, NOW)
            .unwrap();
        (id, challenger, sequencer)
    }

    #[test]
    fn test_step_bounds() {
        let manager = InteractiveProofManager::new(failing_at(u64::MAX));
        assert_eq!(
            manager.start_session(addr(1), addr(2), 0, NOW),
            Err(SessionError::ZeroSteps)
        );
        assert_eq!(
            manager.start_session(addr(1), addr(2), 257, NOW),
            Err(SessionError::TooManySteps(257))
        );
        assert!(manager.start_session(addr(1), addr(2), 256, NOW).is_ok());
    }

    #[test]
    fn test_eight_step_bisection_challenger_wins() {
        // Disputed trace of 8 steps; step 6 is the broken transition.
        let manager = InteractiveProofManager::new(failing_at(6));
        let (id, challenger, sequencer) = open_session(&manager, 8);

        // Sequencer opens at the midpoint of [0,8]
        let state = manager.submit_step(&id, sequencer, step(4), NOW + 10).unwrap();
        assert_eq!(state, SessionState::ChallengerTurn);
        let s = manager.session(&id).unwrap();
        assert_eq!((s.search_lower, s.search_upper), (4, 8));

        // Challenger contests the upper half
        let state = manager.submit_step(&id, challenger, step(7), NOW + 20).unwrap();
        assert_eq!(state, SessionState::SequencerTurn);
        let s = manager.session(&id).unwrap();
        assert_eq!((s.search_lower, s.search_upper), (4, 7));

        // Sequencer answers at step 6
        let state = manager.submit_step(&id, sequencer, step(6), NOW + 30).unwrap();
        assert_eq!(state, SessionState::ChallengerTurn);
        let s = manager.session(&id).unwrap();
        assert_eq!((s.search_lower, s.search_upper), (4, 6));

        // Challenger narrows to (5, 6): convergence; step 6 fails to verify
        let state = manager.submit_step(&id, challenger, step(5), NOW + 40).unwrap();
        assert_eq!(state, SessionState::Resolved);
        let s = manager.session(&id).unwrap();
        assert_eq!((s.search_lower, s.search_upper), (5, 6));
        assert!(s.converged());
        assert_eq!(s.winner, Some(challenger));
        assert_eq!(s.invalid_step_number, Some(6));
    }

    #[test]
    fn test_sequencer_wins_when_disputed_step_verifies() {
        // Nothing actually fails; every attested transition checks out.
        let manager = InteractiveProofManager::new(failing_at(u64::MAX));
        let (id, challenger, sequencer) = open_session(&manager, 8);

        manager.submit_step(&id, sequencer, step(4), NOW + 1).unwrap();
        manager.submit_step(&id, challenger, step(7), NOW + 2).unwrap();
        manager.submit_step(&id, sequencer, step(6), NOW + 3).unwrap();
        let state = manager.submit_step(&id, challenger, step(5), NOW + 4).unwrap();
        assert_eq!(state, SessionState::Resolved);

        let s = manager.session(&id).unwrap();
        assert_eq!(s.winner, Some(sequencer));
        assert_eq!(s.invalid_step_number, None);
    }

    #[test]
    fn test_turn_order_enforced() {
        let manager = InteractiveProofManager::new(failing_at(u64::MAX));
        let (id, challenger, sequencer) = open_session(&manager, 8);

        // Challenger cannot open; the sequencer moves first
        assert_eq!(
            manager.submit_step(&id, challenger, step(4), NOW + 1),
            Err(SessionError::NotYourTurn {
                expected: sequencer
            })
        );

        manager.submit_step(&id, sequencer, step(4), NOW + 1).unwrap();
        assert_eq!(
            manager.submit_step(&id, sequencer, step(6), NOW + 2),
            Err(SessionError::NotYourTurn {
                expected: challenger
            })
        );

        // Outsiders are rejected outright
        assert_eq!(
            manager.submit_step(&id, addr(9), step(6), NOW + 2),
            Err(SessionError::UnknownParty(addr(9)))
        );
    }

    #[test]
    fn test_no_progress_steps_rejected() {
        let manager = InteractiveProofManager::new(failing_at(u64::MAX));
        let (id, _, sequencer) = open_session(&manager, 8);

        for bad in [0, 8, 9] {
            assert!(matches!(
                manager.submit_step(&id, sequencer, step(bad), NOW + 1),
                Err(SessionError::StepOutOfInterval { .. })
            ));
        }
    }

    #[test]
    fn test_deadline_forfeit_on_late_move() {
        let manager = InteractiveProofManager::new(failing_at(u64::MAX));
        let (id, challenger, sequencer) = open_session(&manager, 8);

        // Deadline instant itself is admissible
        manager
            .submit_step(&id, sequencer, step(4), NOW + STEP_DEADLINE_SECS)
            .unwrap();

        // Challenger shows up an hour and one second later and forfeits
        let late = NOW + 2 * STEP_DEADLINE_SECS + 1;
        assert!(matches!(
            manager.submit_step(&id, challenger, step(7), late),
            Err(SessionError::DeadlineMissed { .. })
        ));
        let s = manager.session(&id).unwrap();
        assert_eq!(s.state, SessionState::TimedOut);
        assert_eq!(s.winner, Some(sequencer));
    }

    #[test]
    fn test_timeout_sweep_forfeits_party_on_turn() {
        let manager = InteractiveProofManager::new(failing_at(u64::MAX));
        let (id, challenger, sequencer) = open_session(&manager, 8);
        manager.submit_step(&id, sequencer, step(4), NOW + 1).unwrap();

        // Challenger is on turn and never moves
        let ids = manager.check_timeouts(NOW + 1 + STEP_DEADLINE_SECS + 1);
        assert_eq!(ids, vec![id]);
        let s = manager.session(&id).unwrap();
        assert_eq!(s.state, SessionState::TimedOut);
        assert_eq!(s.winner, Some(sequencer));
        assert_eq!(manager.live_session_count(), 0);

        // Terminal sessions reject further moves
        assert!(matches!(
            manager.submit_step(&id, challenger, step(7), NOW),
            Err(SessionError::SessionClosed(SessionState::TimedOut))
        ));
    }

    #[test]
    fn test_cancel_by_challenger_only() {
        let manager = InteractiveProofManager::new(failing_at(u64::MAX));
        let (id, challenger, sequencer) = open_session(&manager, 8);

        assert_eq!(
            manager.cancel_session(&id, &sequencer),
            Err(SessionError::UnknownParty(sequencer))
        );
        manager.cancel_session(&id, &challenger).unwrap();
        let s = manager.session(&id).unwrap();
        assert_eq!(s.state, SessionState::Cancelled);
        assert_eq!(s.winner, None);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// Midpoint play from both sides always terminates within
            /// ~log₂(total) moves, whatever the trace length.
            #[test]
            fn prop_midpoint_play_converges(total in 2u64..=256) {
                let manager = InteractiveProofManager::new(Arc::new(|_s: &ExecutionStep| true));
                let challenger = addr(1);
                let sequencer = addr(2);
                let id = manager
                    .start_session(challenger, sequencer, total, NOW)
                    .unwrap();

                let mut moves = 0u32;
                loop {
                    let session = manager.session(&id).unwrap();
                    if session.state.is_terminal() {
                        break;
                    }
                    prop_assert!(moves <= 64, "no convergence after {} moves", moves);
                    let party = match session.state {
                        SessionState::ChallengerTurn => challenger,
                        _ => sequencer,
                    };
                    let midpoint = session
                        .midpoint()
                        .clamp(session.search_lower + 1, session.search_upper - 1);
                    let _ = manager.submit_step(&id, party, step(midpoint), NOW + moves as u64);
                    moves += 1;
                }

                let session = manager.session(&id).unwrap();
                prop_assert_eq!(session.state, SessionState::Resolved);
                prop_assert!(session.converged());
                prop_assert!(session.winner.is_some());
                prop_assert!(session.search_upper <= total);
            }
        }
    }

    #[test]
    fn test_resolved_callback_fires() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let manager = InteractiveProofManager::new(failing_at(2));
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_count = Arc::clone(&fired);
        manager.on_session_resolved(Arc::new(move |session| {
            assert_eq!(session.state, SessionState::Resolved);
            fired_count.fetch_add(1, Ordering::SeqCst);
        }));

        let (id, challenger, sequencer) = open_session(&manager, 4);
        manager.submit_step(&id, sequencer, step(2), NOW + 1).unwrap();
        // [2,4] → challenger at 3 narrows to [3,4]: converged. Step 4 was
        // never attested, so the sequencer forfeits the disputed step.
        manager.submit_step(&id, challenger, step(3), NOW + 2).unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
