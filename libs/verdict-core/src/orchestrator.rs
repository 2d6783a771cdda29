/// Evaluation Orchestrator
///
/// **Flow for one evaluation:**
/// 1. claim the session (`begin`) - a busy session is rejected, never queued
/// 2. build the request - bad input fails before the judge is contacted
/// 3. dispatch, racing the overall deadline and cancellation
/// 4. await every job concurrently, then aggregate by index
/// 5. Submit only: persist exactly once
/// 6. publish the terminal state
///
/// Run and Submit share every step except 5.
use crate::aggregator;
use crate::backend::JudgeBackend;
use crate::builder::{self, EvaluationRequest};
use crate::dispatch::{DispatchClient, RetryPolicy};
use crate::error::FailureReason;
use crate::persistence::{SubmissionRecord, SubmissionStore};
use crate::poller::{AwaitError, Poller};
use crate::state::{EvaluationSession, EvaluationState, StateError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use verdict_common::{Config, ExecutionResult, Mode, SubmissionId};

/// Caller input for one evaluation, validated only when the evaluation starts
#[derive(Debug, Clone, Default)]
pub struct SubmissionDraft {
    pub source_code: String,
    pub language: String,
    pub stdin: Vec<String>,
    pub expected_outputs: Vec<String>,
    pub problem_ref: String,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: RetryPolicy::from_config(config),
            poll_interval: config.poll_interval(),
            timeout: config.evaluation_timeout(),
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Terminal view of an evaluation
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationOutcome {
    pub state: EvaluationState,
    pub result: Option<ExecutionResult>,
    pub submission_id: Option<SubmissionId>,
    /// Set when a Submit result could not be persisted; the result stands
    pub persistence_warning: Option<String>,
}

#[derive(Clone)]
pub struct Orchestrator {
    dispatcher: DispatchClient,
    poller: Poller,
    store: Option<Arc<dyn SubmissionStore>>,
    timeout: Duration,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn JudgeBackend>, settings: OrchestratorSettings) -> Self {
        Self {
            dispatcher: DispatchClient::new(backend.clone(), settings.retry),
            poller: Poller::new(backend, settings.poll_interval),
            store: None,
            timeout: settings.timeout,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SubmissionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn run_code(
        &self,
        session: &Arc<EvaluationSession>,
        draft: SubmissionDraft,
    ) -> Result<EvaluationHandle, StateError> {
        self.start(session, draft, Mode::Run, None)
    }

    pub fn submit_code(
        &self,
        session: &Arc<EvaluationSession>,
        draft: SubmissionDraft,
        user_ref: impl Into<String>,
    ) -> Result<EvaluationHandle, StateError> {
        self.start(session, draft, Mode::Submit, Some(user_ref.into()))
    }

    fn start(
        &self,
        session: &Arc<EvaluationSession>,
        draft: SubmissionDraft,
        mode: Mode,
        user_ref: Option<String>,
    ) -> Result<EvaluationHandle, StateError> {
        let cancel = session.begin(mode)?;

        let span = info_span!(
            "evaluation",
            session_id = %session.id(),
            mode = %mode,
            problem = %draft.problem_ref
        );
        let orchestrator = self.clone();
        let task_session = session.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(
            async move {
                orchestrator
                    .evaluate(&task_session, draft, mode, user_ref, task_cancel)
                    .await
            }
            .instrument(span),
        );

        Ok(EvaluationHandle {
            session: session.clone(),
            mode,
            cancel,
            task,
        })
    }

    async fn evaluate(
        &self,
        session: &EvaluationSession,
        draft: SubmissionDraft,
        mode: Mode,
        user_ref: Option<String>,
        cancel: CancellationToken,
    ) -> EvaluationOutcome {
        let request = match builder::build(
            draft.source_code,
            &draft.language,
            draft.stdin,
            draft.expected_outputs,
            draft.problem_ref,
            mode,
        ) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Rejected evaluation request");
                let state = EvaluationState::Failed {
                    mode,
                    reason: FailureReason::Construction(e),
                };
                publish(session, &state);
                return EvaluationOutcome {
                    state,
                    result: None,
                    submission_id: None,
                    persistence_warning: None,
                };
            }
        };

        let total = request.test_cases().len();
        let timeout_ms = self.timeout.as_millis() as u64;
        let deadline = Instant::now() + self.timeout;
        info!(
            request_id = %request.id(),
            language = %request.language(),
            test_cases = total,
            "Evaluation request built"
        );

        let dispatched = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FailureReason::Cancelled),
            res = tokio::time::timeout_at(deadline, self.dispatcher.dispatch(&request)) => match res {
                Ok(Ok(handles)) => Ok(handles),
                Ok(Err(e)) => Err(FailureReason::Dispatch(e)),
                Err(_) => Err(FailureReason::Timeout { unresolved: total, timeout_ms }),
            },
        };

        let handles = match dispatched {
            Ok(handles) => handles,
            Err(reason) => {
                warn!(request_id = %request.id(), reason = %reason, "Dispatch did not complete");
                return self.conclude(session, &request, user_ref, None, Some(reason)).await;
            }
        };

        publish(
            session,
            &EvaluationState::Awaiting {
                mode,
                pending: handles.len(),
            },
        );

        let remaining = deadline.saturating_duration_since(Instant::now());
        let (result, failure) = match self
            .poller
            .await_all(&request, &handles, remaining, &cancel)
            .await
        {
            Ok(results) => (aggregator::aggregate(&request, results), None),
            Err(AwaitError::TimedOut { partial, unresolved }) => (
                aggregator::aggregate(&request, partial),
                Some(FailureReason::Timeout { unresolved, timeout_ms }),
            ),
            Err(AwaitError::Cancelled { partial, .. }) => (
                aggregator::aggregate(&request, partial),
                Some(FailureReason::Cancelled),
            ),
        };

        self.conclude(session, &request, user_ref, Some(result), failure)
            .await
    }

    /// Persist (Submit only) and then publish the terminal state
    async fn conclude(
        &self,
        session: &EvaluationSession,
        request: &EvaluationRequest,
        user_ref: Option<String>,
        result: Option<ExecutionResult>,
        failure: Option<FailureReason>,
    ) -> EvaluationOutcome {
        let mode = request.mode();
        let state = match (&failure, &result) {
            (Some(reason), _) => EvaluationState::Failed {
                mode,
                reason: reason.clone(),
            },
            (None, Some(result)) => EvaluationState::Completed {
                mode,
                status: result.status,
            },
            (None, None) => EvaluationState::Failed {
                mode,
                reason: FailureReason::Internal("evaluation produced no result".to_string()),
            },
        };

        let mut submission_id = None;
        let mut persistence_warning = None;
        if mode.persists() {
            match (&self.store, user_ref) {
                (Some(store), Some(user_ref)) => {
                    let record =
                        SubmissionRecord::new(request, user_ref, result.as_ref(), failure.clone());
                    match store.record(&record).await {
                        Ok(id) => submission_id = Some(id),
                        Err(e) => {
                            warn!(request_id = %request.id(), error = %e, "Failed to persist submission");
                            persistence_warning = Some(format!("submission not saved: {}", e));
                        }
                    }
                }
                (None, _) => {
                    warn!(request_id = %request.id(), "No submission store configured");
                    persistence_warning = Some("submission store not configured".to_string());
                }
                (Some(_), None) => {
                    warn!(request_id = %request.id(), "Submit without user reference");
                    persistence_warning = Some("missing user reference".to_string());
                }
            }
        }

        match &state {
            EvaluationState::Completed { status, .. } => info!(
                request_id = %request.id(),
                status = %status,
                passed = result.as_ref().map(|r| r.passed_test_cases).unwrap_or(0),
                total = request.test_cases().len(),
                "Evaluation completed"
            ),
            EvaluationState::Failed { reason, .. } => {
                warn!(request_id = %request.id(), reason = %reason, "Evaluation failed")
            }
            _ => {}
        }

        publish(session, &state);

        EvaluationOutcome {
            state,
            result,
            submission_id,
            persistence_warning,
        }
    }
}

fn publish(session: &EvaluationSession, state: &EvaluationState) {
    if let Err(e) = session.transition(state.clone()) {
        error!(session_id = %session.id(), error = %e, "Rejected state transition");
    }
}

/// Caller-side handle to a running evaluation
pub struct EvaluationHandle {
    session: Arc<EvaluationSession>,
    mode: Mode,
    cancel: CancellationToken,
    task: JoinHandle<EvaluationOutcome>,
}

impl EvaluationHandle {
    pub fn state(&self) -> EvaluationState {
        self.session.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<EvaluationState> {
        self.session.subscribe()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn outcome(self) -> EvaluationOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(session_id = %self.session.id(), error = %e, "Evaluation task aborted");
                let state = EvaluationState::Failed {
                    mode: self.mode,
                    reason: FailureReason::Internal(e.to_string()),
                };
                publish(&self.session, &state);
                EvaluationOutcome {
                    state,
                    result: None,
                    submission_id: None,
                    persistence_warning: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::error::{ConstructionError, DispatchError};
    use crate::test_support::{MemoryStore, Script, ScriptedBackend};
    use verdict_common::{ErrorKind, Verdict};

    fn settings(timeout_ms: u64) -> OrchestratorSettings {
        OrchestratorSettings {
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    fn draft(expected: &[&str]) -> SubmissionDraft {
        SubmissionDraft {
            source_code: "print(input())".into(),
            language: "python".into(),
            stdin: expected.iter().map(|s| s.to_string()).collect(),
            expected_outputs: expected.iter().map(|s| s.to_string()).collect(),
            problem_ref: "echo".into(),
        }
    }

    fn setup(
        scripts: Vec<Script>,
        timeout_ms: u64,
    ) -> (Orchestrator, Arc<ScriptedBackend>, Arc<MemoryStore>, Arc<EvaluationSession>) {
        let backend = Arc::new(ScriptedBackend::batched(scripts));
        let store = Arc::new(MemoryStore::default());
        let orchestrator =
            Orchestrator::new(backend.clone(), settings(timeout_ms)).with_store(store.clone());
        (orchestrator, backend, store, Arc::new(EvaluationSession::new("session")))
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_without_persisting() {
        let (orchestrator, _, store, session) =
            setup(vec![Script::finished("a", 1), Script::finished("b", 0)], 30_000);

        let outcome = orchestrator
            .run_code(&session, draft(&["a", "b"]))
            .unwrap()
            .outcome()
            .await;

        assert_eq!(
            outcome.state,
            EvaluationState::Completed { mode: Mode::Run, status: Verdict::Accepted }
        );
        let result = outcome.result.unwrap();
        assert!(result.all_passed);
        assert_eq!(result.test_results.len(), 2);
        assert_eq!(store.record_calls(), 0);
        assert_eq!(outcome.submission_id, None);
        assert_eq!(session.state(), outcome.state);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_persists_once_on_success() {
        let (orchestrator, _, store, session) = setup(
            vec![
                Script::finished("a", 0).time(Some(100)),
                Script::finished("b", 2).time(Some(120)),
                Script::failed(ErrorKind::RuntimeError, 1).time(None),
            ],
            30_000,
        );

        let outcome = orchestrator
            .submit_code(&session, draft(&["a", "b", "c"]), "alice")
            .unwrap()
            .outcome()
            .await;

        let result = outcome.result.unwrap();
        assert_eq!(result.passed_test_cases, 2);
        assert_eq!(result.total_test_cases, 3);
        assert_eq!(result.status, Verdict::RuntimeError);
        assert_eq!(result.average_time_ms(), Some(110.0));

        assert_eq!(store.record_calls(), 1);
        let records = store.records();
        assert_eq!(Some(records[0].id), outcome.submission_id);
        assert_eq!(records[0].user_ref, "alice");
        assert_eq!(records[0].average_time_ms, Some(110.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_timeout_persists_internal_error() {
        let (orchestrator, _, store, session) =
            setup(vec![Script::never(), Script::never(), Script::never()], 5_000);

        let outcome = orchestrator
            .submit_code(&session, draft(&["a", "b", "c"]), "alice")
            .unwrap()
            .outcome()
            .await;

        assert!(matches!(
            outcome.state,
            EvaluationState::Failed {
                reason: FailureReason::Timeout { unresolved: 3, timeout_ms: 5_000 },
                ..
            }
        ));
        let result = outcome.result.unwrap();
        assert_eq!(result.status, Verdict::InternalError);
        assert_eq!(result.test_results.len(), 3);
        assert!(result.test_results.iter().all(|r| !r.passed));
        assert_eq!(store.record_calls(), 1);
        assert_eq!(store.records()[0].status, Verdict::InternalError);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_dispatch_failure_persists_failed_record() {
        let (orchestrator, backend, store, session) = setup(vec![Script::finished("a", 0)], 30_000);
        backend.fail_next_submits(vec![BackendError::Rejected {
            status: 400,
            message: "bad".into(),
        }]);

        let outcome = orchestrator
            .submit_code(&session, draft(&["a"]), "alice")
            .unwrap()
            .outcome()
            .await;

        assert!(matches!(
            outcome.state,
            EvaluationState::Failed { reason: FailureReason::Dispatch(DispatchError::Rejected(_)), .. }
        ));
        assert!(outcome.result.is_none());
        assert_eq!(store.record_calls(), 1);
        assert!(store.records()[0].test_results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_construction_error_never_contacts_judge() {
        let (orchestrator, backend, store, session) = setup(vec![Script::finished("a", 0)], 30_000);
        let mut bad = draft(&["a"]);
        bad.expected_outputs.push("extra".into());

        let outcome = orchestrator
            .submit_code(&session, bad, "alice")
            .unwrap()
            .outcome()
            .await;

        assert!(matches!(
            outcome.state,
            EvaluationState::Failed {
                reason: FailureReason::Construction(ConstructionError::LengthMismatch { stdin: 1, expected: 2 }),
                ..
            }
        ));
        assert_eq!(backend.submit_calls(), 0);
        assert_eq!(store.record_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_evaluation_rejected() {
        let (orchestrator, _, _, session) = setup(vec![Script::finished("a", 3)], 30_000);

        let first = orchestrator.run_code(&session, draft(&["a"])).unwrap();
        let second = orchestrator.run_code(&session, draft(&["a"]));
        assert_eq!(second.err(), Some(StateError::EvaluationInProgress));

        let outcome = first.outcome().await;
        assert!(outcome.state.is_terminal());

        // terminal sessions accept a new evaluation
        assert!(orchestrator.run_code(&session, draft(&["a"])).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_polling() {
        let (orchestrator, backend, store, session) =
            setup(vec![Script::never(), Script::finished("b", 0)], 60_000);

        let handle = orchestrator
            .submit_code(&session, draft(&["a", "b"]), "alice")
            .unwrap();
        let token = handle.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            token.cancel();
        });

        let outcome = handle.outcome().await;

        assert!(matches!(
            outcome.state,
            EvaluationState::Failed { reason: FailureReason::Cancelled, .. }
        ));
        let result = outcome.result.unwrap();
        assert_eq!(result.test_results.len(), 2);
        assert!(result.test_results[1].passed);
        assert_eq!(result.test_results[0].error_kind, Some(ErrorKind::InternalError));
        assert_eq!(store.record_calls(), 1);

        let polls = backend.poll_calls();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.poll_calls(), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_dispatch_backoff() {
        let (orchestrator, backend, store, session) = setup(vec![Script::finished("a", 0)], 30_000);
        backend.fail_next_submits(vec![
            BackendError::Unavailable("connection refused".into()),
            BackendError::Unavailable("connection refused".into()),
        ]);

        let handle = orchestrator
            .submit_code(&session, draft(&["a"]), "alice")
            .unwrap();

        // first attempt failed, now sleeping 200ms before the retry
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(session.state().name(), "dispatching");
        assert_eq!(backend.submit_calls(), 1);
        handle.cancellation_token().cancel();

        let outcome = handle.outcome().await;

        assert_eq!(
            outcome.state,
            EvaluationState::Failed { mode: Mode::Submit, reason: FailureReason::Cancelled }
        );
        assert!(outcome.result.is_none());
        assert_eq!(store.record_calls(), 1);
        assert_eq!(store.records()[0].failure, Some(FailureReason::Cancelled));
        assert!(store.records()[0].test_results.is_empty());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.submit_calls(), 1);
        assert_eq!(backend.poll_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistence_failure_is_a_warning() {
        let backend = Arc::new(ScriptedBackend::batched(vec![Script::finished("a", 0)]));
        let store = Arc::new(MemoryStore::failing());
        let orchestrator =
            Orchestrator::new(backend, settings(30_000)).with_store(store.clone());
        let session = Arc::new(EvaluationSession::new("s"));

        let outcome = orchestrator
            .submit_code(&session, draft(&["a"]), "alice")
            .unwrap()
            .outcome()
            .await;

        assert_eq!(
            outcome.state,
            EvaluationState::Completed { mode: Mode::Submit, status: Verdict::Accepted }
        );
        assert!(outcome.persistence_warning.is_some());
        assert_eq!(outcome.submission_id, None);
        assert_eq!(store.record_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_stream_reports_each_stage() {
        let (orchestrator, _, _, session) = setup(vec![Script::finished("a", 2)], 30_000);
        let mut rx = session.subscribe();

        let handle = orchestrator.run_code(&session, draft(&["a"])).unwrap();
        let mut seen = vec![rx.borrow_and_update().name()];
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            seen.push(state.name());
            if state.is_terminal() {
                break;
            }
        }
        handle.outcome().await;

        assert_eq!(seen, vec!["dispatching", "awaiting", "completed"]);
    }
}
