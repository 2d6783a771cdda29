/// Judge Backend - Abstraction for Remote Execution
///
/// **Core Responsibility:**
/// Hand one (language, source, stdin) triple to an external judge and report
/// its terminal outcome when asked.
///
/// **Critical Architectural Boundary:**
/// - Backend knows HOW to talk to the judge (HTTP, auth, encoding)
/// - Backend does NOT compare outputs
/// - Backend does NOT retry or schedule polls (dispatch/poller do)
/// - Backend normalizes wire fields into typed numbers before returning
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use verdict_common::{ErrorKind, Language};

/// Opaque token identifying one in-flight execution on the judge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobToken(pub String);

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A job token correlated with the test case index it was dispatched for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub index: usize,
    pub token: JobToken,
}

/// Input for one test case execution
#[derive(Debug, Clone, Copy)]
pub struct JobSpec<'a> {
    pub language: Language,
    pub source_code: &'a str,
    pub stdin: &'a str,
}

/// Terminal outcome of a job, already normalized into typed fields
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobOutcome {
    /// `None` when the program ran to completion
    pub error_kind: Option<ErrorKind>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
}

impl JobOutcome {
    /// Outcome used when the judge answered with something unusable
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self {
            error_kind: Some(ErrorKind::InternalError),
            stderr: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Terminal(JobOutcome),
}

/// Backend failure classification
///
/// The distinction between `Unavailable` and `Ambiguous` matters for dispatch:
/// only a request that provably never landed may be sent again.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("judge unreachable: {0}")]
    Unavailable(String),

    #[error("judge server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("no confirmation from judge: {0}")]
    Ambiguous(String),

    #[error("judge rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("language not supported by judge: {0}")]
    UnsupportedLanguage(String),

    #[error("malformed judge response: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Safe to resend a submission after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Server { .. })
    }

    /// Worth polling the same token again on the next tick
    pub fn is_retryable_poll(&self) -> bool {
        matches!(
            self,
            BackendError::Unavailable(_) | BackendError::Server { .. } | BackendError::Ambiguous(_)
        )
    }
}

/// Judge backend trait
///
/// Any implementation must guarantee:
/// 1. `submit_batch` returns exactly one token per job, in input order
/// 2. `poll` is side-effect free on the judge
/// 3. Terminal outcomes carry typed time/memory figures
#[async_trait]
pub trait JudgeBackend: Send + Sync {
    /// Whether one call can carry every test case of a request
    fn supports_batch(&self) -> bool {
        false
    }

    async fn submit(&self, job: &JobSpec<'_>) -> Result<JobToken, BackendError>;

    /// Submit several jobs at once. Backends without a batch endpoint fall back
    /// to sequential single submissions.
    async fn submit_batch(&self, jobs: &[JobSpec<'_>]) -> Result<Vec<JobToken>, BackendError> {
        let mut tokens = Vec::with_capacity(jobs.len());
        for job in jobs {
            tokens.push(self.submit(job).await?);
        }
        Ok(tokens)
    }

    async fn poll(&self, token: &JobToken) -> Result<JobState, BackendError>;
}
