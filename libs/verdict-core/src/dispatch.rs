/// Dispatch Client - hands a built request to the judge
///
/// **Strategy:**
/// - Batch-capable backend: one call carrying every test case
/// - Otherwise: one call per test case, in index order
///
/// Either way handle `i` belongs to test case `i`.
///
/// **Retry Rules:**
/// - Transient (`Unavailable`, 5xx): bounded exponential backoff
/// - Permanent (4xx, unsupported language, malformed): fail immediately
/// - Ambiguous (request may have landed): never resent
use crate::backend::{BackendError, JobHandle, JobSpec, JobToken, JudgeBackend};
use crate::builder::EvaluationRequest;
use crate::error::DispatchError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use verdict_common::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.dispatch_max_attempts.max(1),
            base_delay: config.dispatch_backoff_base(),
            ..Self::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.base_delay
            .saturating_mul(self.factor.saturating_pow(exponent))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            factor: 2,
        }
    }
}

#[derive(Clone)]
pub struct DispatchClient {
    backend: Arc<dyn JudgeBackend>,
    policy: RetryPolicy,
}

impl DispatchClient {
    pub fn new(backend: Arc<dyn JudgeBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub async fn dispatch(&self, request: &EvaluationRequest) -> Result<Vec<JobHandle>, DispatchError> {
        let specs: Vec<JobSpec<'_>> = request
            .test_cases()
            .iter()
            .map(|tc| JobSpec {
                language: request.language(),
                source_code: request.source_code(),
                stdin: &tc.stdin,
            })
            .collect();

        let backend = &self.backend;
        let tokens = if backend.supports_batch() {
            let batch = &specs;
            let tokens = self
                .with_retry("batch", move || backend.submit_batch(batch))
                .await?;
            if tokens.len() != specs.len() {
                return Err(DispatchError::MalformedResponse(format!(
                    "judge returned {} tokens for {} test cases",
                    tokens.len(),
                    specs.len()
                )));
            }
            tokens
        } else {
            let mut tokens: Vec<JobToken> = Vec::with_capacity(specs.len());
            for (index, spec) in specs.iter().enumerate() {
                let label = format!("case {}", index);
                match self.with_retry(&label, move || backend.submit(spec)).await {
                    Ok(token) => tokens.push(token),
                    Err(e) => {
                        if !tokens.is_empty() {
                            warn!(
                                request_id = %request.id(),
                                abandoned = tokens.len(),
                                "Abandoning already dispatched jobs"
                            );
                        }
                        return Err(e);
                    }
                }
            }
            tokens
        };

        info!(
            request_id = %request.id(),
            jobs = tokens.len(),
            batched = backend.supports_batch(),
            "Request dispatched"
        );

        Ok(tokens
            .into_iter()
            .enumerate()
            .map(|(index, token)| JobHandle { index, token })
            .collect())
    }

    async fn with_retry<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T, DispatchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => {
                    debug!(target_job = label, attempt, "Dispatch accepted");
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        target_job = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient dispatch failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(target_job = label, attempt, error = %e, "Dispatch failed");
                    return Err(into_dispatch_error(e, attempt));
                }
            }
        }
    }
}

fn into_dispatch_error(err: BackendError, attempts: u32) -> DispatchError {
    match err {
        BackendError::Unavailable(message) => DispatchError::Exhausted { attempts, message },
        BackendError::Server { status, message } => DispatchError::Exhausted {
            attempts,
            message: format!("HTTP {}: {}", status, message),
        },
        BackendError::Ambiguous(message) => DispatchError::Ambiguous(message),
        BackendError::Rejected { status, message } => {
            DispatchError::Rejected(format!("HTTP {}: {}", status, message))
        }
        BackendError::UnsupportedLanguage(message) => DispatchError::UnsupportedLanguage(message),
        BackendError::Malformed(message) => DispatchError::MalformedResponse(message),
    }
}
