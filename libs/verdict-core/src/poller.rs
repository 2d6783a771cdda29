/// Poller / Awaiter - waits for every dispatched job to reach a terminal state
///
/// **Concurrency model:**
/// One polling loop per handle, all driven together with `join_all`, so total
/// latency tracks the slowest test case rather than the sum of all of them.
/// Each loop yields only its own slot; slots are placed by index afterwards.
///
/// **Stop conditions:**
/// - every handle terminal → `Ok(results)`
/// - overall deadline hit → `AwaitError::TimedOut` with unresolved slots failed
/// - cancellation token fired → `AwaitError::Cancelled`, same partial shape
use crate::aggregator;
use crate::backend::{JobHandle, JobOutcome, JobState, JudgeBackend};
use crate::builder::EvaluationRequest;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use verdict_common::TestCaseResult;

#[derive(Debug, Error)]
pub enum AwaitError {
    #[error("{unresolved} job(s) unresolved at deadline")]
    TimedOut {
        partial: Vec<TestCaseResult>,
        unresolved: usize,
    },

    #[error("awaiting cancelled with {unresolved} job(s) unresolved")]
    Cancelled {
        partial: Vec<TestCaseResult>,
        unresolved: usize,
    },
}

#[derive(Clone)]
pub struct Poller {
    backend: Arc<dyn JudgeBackend>,
    interval: Duration,
}

impl Poller {
    pub fn new(backend: Arc<dyn JudgeBackend>, interval: Duration) -> Self {
        Self { backend, interval }
    }

    pub async fn await_all(
        &self,
        request: &EvaluationRequest,
        handles: &[JobHandle],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<TestCaseResult>, AwaitError> {
        let deadline = Instant::now() + timeout;

        let polls = handles.iter().map(|handle| async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = tokio::time::timeout_at(deadline, self.poll_until_terminal(handle)) => res.ok(),
            };
            (handle.index, outcome)
        });
        let settled = join_all(polls).await;

        let total = request.test_cases().len();
        let mut slots: Vec<Option<TestCaseResult>> = vec![None; total];
        for (index, outcome) in settled {
            let Some(outcome) = outcome else { continue };
            if index >= total {
                warn!(index, total, "Ignoring outcome for unknown test case index");
                continue;
            }
            slots[index] = Some(aggregator::evaluate_case(
                index,
                request.expected_output(index),
                outcome,
            ));
        }

        let unresolved = slots.iter().filter(|s| s.is_none()).count();
        let results: Vec<TestCaseResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| TestCaseResult::unresolved(index, request.expected_output(index)))
            })
            .collect();

        if unresolved == 0 {
            return Ok(results);
        }
        if cancel.is_cancelled() {
            warn!(request_id = %request.id(), unresolved, "Polling cancelled");
            return Err(AwaitError::Cancelled { partial: results, unresolved });
        }
        warn!(
            request_id = %request.id(),
            unresolved,
            timeout_ms = timeout.as_millis() as u64,
            "Polling deadline reached"
        );
        Err(AwaitError::TimedOut { partial: results, unresolved })
    }

    async fn poll_until_terminal(&self, handle: &JobHandle) -> JobOutcome {
        let mut polls = 0u32;
        loop {
            polls += 1;
            match self.backend.poll(&handle.token).await {
                Ok(JobState::Terminal(outcome)) => {
                    debug!(index = handle.index, token = %handle.token, polls, "Job terminal");
                    return outcome;
                }
                Ok(JobState::Pending) => {}
                Err(e) if e.is_retryable_poll() => {
                    warn!(index = handle.index, token = %handle.token, error = %e, "Poll failed, retrying next tick");
                }
                Err(e) => {
                    error!(index = handle.index, token = %handle.token, error = %e, "Unusable poll response");
                    return JobOutcome::internal_error(e.to_string());
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
