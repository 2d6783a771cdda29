//! Evaluation state machine.
//!
//! ```text
//! Idle ──begin──▶ Dispatching ──▶ Awaiting ──▶ Completed
//!                      │              │
//!                      └──────────────┴──────▶ Failed { reason }
//! ```
//!
//! One [`EvaluationSession`] per caller session. Its current state lives in a
//! `watch` channel so UI layers can follow every transition. `Completed` and
//! `Failed` accept a new `begin`; the busy states reject it.

use crate::error::FailureReason;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;
use verdict_common::{Mode, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EvaluationState {
    Idle,
    Dispatching { mode: Mode },
    Awaiting { mode: Mode, pending: usize },
    Completed { mode: Mode, status: Verdict },
    Failed { mode: Mode, reason: FailureReason },
}

impl EvaluationState {
    /// An evaluation is in flight on this session
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            EvaluationState::Dispatching { .. } | EvaluationState::Awaiting { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EvaluationState::Completed { .. } | EvaluationState::Failed { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            EvaluationState::Idle => "idle",
            EvaluationState::Dispatching { .. } => "dispatching",
            EvaluationState::Awaiting { .. } => "awaiting",
            EvaluationState::Completed { .. } => "completed",
            EvaluationState::Failed { .. } => "failed",
        }
    }

    fn allows(&self, next: &EvaluationState) -> bool {
        use EvaluationState::*;
        matches!(
            (self, next),
            (Dispatching { .. }, Awaiting { .. })
                | (Dispatching { .. }, Failed { .. })
                | (Awaiting { .. }, Completed { .. })
                | (Awaiting { .. }, Failed { .. })
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("an evaluation is already in progress for this session")]
    EvaluationInProgress,

    #[error("invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

pub struct EvaluationSession {
    id: String,
    state: watch::Sender<EvaluationState>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl EvaluationSession {
    pub fn new(id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(EvaluationState::Idle);
        Self {
            id: id.into(),
            state,
            cancel: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> EvaluationState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EvaluationState> {
        self.state.subscribe()
    }

    /// Atomically claim the session for a new evaluation.
    ///
    /// Returns the cancellation token of the new evaluation. A session that is
    /// already dispatching or awaiting rejects the call; nothing is queued.
    pub fn begin(&self, mode: Mode) -> Result<CancellationToken, StateError> {
        // Slot lock spans the state change: the token always matches the state
        let mut slot = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            if state.is_busy() {
                return false;
            }
            *state = EvaluationState::Dispatching { mode };
            claimed = true;
            true
        });

        if !claimed {
            return Err(StateError::EvaluationInProgress);
        }

        let token = CancellationToken::new();
        *slot = Some(token.clone());
        debug!(session_id = %self.id, mode = %mode, "Evaluation started");
        Ok(token)
    }

    pub fn transition(&self, next: EvaluationState) -> Result<(), StateError> {
        let mut slot = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        let mut rejected = None;
        let terminal = next.is_terminal();
        self.state.send_if_modified(|state| {
            if !state.allows(&next) {
                rejected = Some(StateError::InvalidTransition {
                    from: state.name(),
                    to: next.name(),
                });
                return false;
            }
            debug!(session_id = %self.id, from = state.name(), to = next.name(), "State transition");
            *state = next;
            true
        });

        if let Some(err) = rejected {
            return Err(err);
        }
        if terminal {
            slot.take();
        }
        Ok(())
    }

    /// Request cancellation of the in-flight evaluation, if any
    pub fn cancel(&self) -> bool {
        match self.cancel.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Session lookup for callers that address sessions by id
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<EvaluationSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, id: &str) -> Arc<EvaluationSession> {
        if let Some(session) = self.get(id) {
            return session;
        }
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(EvaluationSession::new(id)))
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<EvaluationSession>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Register a session under a generated id for the lifetime of the guard
    pub fn transient(&self) -> TransientSession<'_> {
        let id = Uuid::new_v4().to_string();
        let session = self.get_or_create(&id);
        TransientSession {
            registry: self,
            session,
        }
    }

    pub fn remove(&self, id: &str) -> Option<Arc<EvaluationSession>> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A session nobody can address after the request that created it ends
pub struct TransientSession<'a> {
    registry: &'a SessionRegistry,
    session: Arc<EvaluationSession>,
}

impl TransientSession<'_> {
    pub fn session(&self) -> &Arc<EvaluationSession> {
        &self.session
    }
}

impl Drop for TransientSession<'_> {
    fn drop(&mut self) {
        self.registry.remove(self.session.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_from_idle() {
        let session = EvaluationSession::new("s1");
        session.begin(Mode::Run).unwrap();
        assert_eq!(session.state(), EvaluationState::Dispatching { mode: Mode::Run });
    }

    #[test]
    fn test_begin_while_busy_is_rejected() {
        let session = EvaluationSession::new("s1");
        session.begin(Mode::Run).unwrap();
        assert_eq!(session.begin(Mode::Submit), Err(StateError::EvaluationInProgress));

        session
            .transition(EvaluationState::Awaiting { mode: Mode::Run, pending: 2 })
            .unwrap();
        assert_eq!(session.begin(Mode::Run), Err(StateError::EvaluationInProgress));
    }

    #[test]
    fn test_full_lifecycle_and_restart() {
        let session = EvaluationSession::new("s1");
        session.begin(Mode::Submit).unwrap();
        session
            .transition(EvaluationState::Awaiting { mode: Mode::Submit, pending: 1 })
            .unwrap();
        session
            .transition(EvaluationState::Completed {
                mode: Mode::Submit,
                status: Verdict::Accepted,
            })
            .unwrap();
        assert!(session.state().is_terminal());

        session.begin(Mode::Run).unwrap();
        session
            .transition(EvaluationState::Failed {
                mode: Mode::Run,
                reason: FailureReason::Cancelled,
            })
            .unwrap();
        session.begin(Mode::Run).unwrap();
    }

    #[test]
    fn test_illegal_transitions() {
        let session = EvaluationSession::new("s1");
        let err = session
            .transition(EvaluationState::Awaiting { mode: Mode::Run, pending: 1 })
            .unwrap_err();
        assert_eq!(err, StateError::InvalidTransition { from: "idle", to: "awaiting" });

        session.begin(Mode::Run).unwrap();
        let err = session
            .transition(EvaluationState::Completed { mode: Mode::Run, status: Verdict::Accepted })
            .unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTransition { from: "dispatching", to: "completed" }
        );
        assert_eq!(session.state().name(), "dispatching");
    }

    #[test]
    fn test_cancel_only_while_in_flight() {
        let session = EvaluationSession::new("s1");
        assert!(!session.cancel());

        let token = session.begin(Mode::Run).unwrap();
        assert!(session.cancel());
        assert!(token.is_cancelled());

        session
            .transition(EvaluationState::Failed { mode: Mode::Run, reason: FailureReason::Cancelled })
            .unwrap();
        assert!(!session.cancel());
    }

    #[tokio::test]
    async fn test_subscribers_see_transitions() {
        let session = EvaluationSession::new("s1");
        let mut rx = session.subscribe();

        session.begin(Mode::Run).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().name(), "dispatching");

        session
            .transition(EvaluationState::Awaiting { mode: Mode::Run, pending: 3 })
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(
            *rx.borrow_and_update(),
            EvaluationState::Awaiting { mode: Mode::Run, pending: 3 }
        );
    }

    #[test]
    fn test_state_serialization() {
        let state = EvaluationState::Failed {
            mode: Mode::Submit,
            reason: FailureReason::Timeout { unresolved: 2, timeout_ms: 5000 },
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["mode"], "submit");
        assert_eq!(json["reason"]["kind"], "timeout");
    }

    #[test]
    fn test_registry_reuses_sessions() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create("abc");
        let b = registry.get_or_create("abc");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_transient_sessions_are_evicted() {
        let registry = SessionRegistry::new();
        registry.get_or_create("alice");

        let id = {
            let transient = registry.transient();
            let id = transient.session().id().to_string();
            assert!(registry.get(&id).is_some());
            assert_eq!(registry.len(), 2);
            id
        };

        assert!(registry.get(&id).is_none());
        assert_eq!(registry.len(), 1);
        assert!(registry.remove("alice").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_token_follows_new_evaluation_after_restart() {
        let session = EvaluationSession::new("s1");
        session.begin(Mode::Run).unwrap();
        session
            .transition(EvaluationState::Failed { mode: Mode::Run, reason: FailureReason::Cancelled })
            .unwrap();

        let token = session.begin(Mode::Submit).unwrap();
        assert!(session.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_concurrent_finish_and_begin_keep_token_consistent() {
        use std::sync::Barrier;
        use std::thread;

        for _ in 0..200 {
            let session = Arc::new(EvaluationSession::new("race"));
            session.begin(Mode::Run).unwrap();
            session
                .transition(EvaluationState::Awaiting { mode: Mode::Run, pending: 1 })
                .unwrap();

            let barrier = Arc::new(Barrier::new(2));
            let finisher = {
                let session = session.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    session
                        .transition(EvaluationState::Completed {
                            mode: Mode::Run,
                            status: Verdict::Accepted,
                        })
                        .unwrap();
                })
            };
            let starter = {
                let session = session.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    session.begin(Mode::Submit).ok()
                })
            };

            finisher.join().unwrap();
            let token = starter.join().unwrap();

            // Whoever ran last decides the state; the token slot must agree
            match token {
                Some(token) => {
                    assert!(session.state().is_busy());
                    assert!(session.cancel());
                    assert!(token.is_cancelled());
                }
                None => {
                    assert!(session.state().is_terminal());
                    assert!(!session.cancel());
                }
            }
        }
    }
}
