//! Error taxonomy for one evaluation.
//!
//! Construction and permanent dispatch errors abort before any result exists.
//! Timeouts and cancellations still produce a best-effort result, so they only
//! appear as a [`FailureReason`] on the terminal state.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use verdict_common::UnknownLanguage;

/// Bad input, detected before the judge is contacted
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum ConstructionError {
    #[error("source code is empty")]
    EmptySource,

    #[error("no test cases provided")]
    NoTestCases,

    #[error("stdin count ({stdin}) does not match expected output count ({expected})")]
    LengthMismatch { stdin: usize, expected: usize },

    #[error(transparent)]
    UnknownLanguage(#[from] UnknownLanguage),

    #[error("problem reference is missing")]
    MissingProblemRef,

    #[error("source code exceeds maximum size of {limit} bytes")]
    SourceTooLarge { limit: usize },

    #[error("stdin for test case {index} exceeds maximum size of {limit} bytes")]
    InputTooLarge { index: usize, limit: usize },
}

/// Failure to hand the request over to the judge
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum DispatchError {
    #[error("judge unavailable after {attempts} attempt(s): {message}")]
    Exhausted { attempts: u32, message: String },

    #[error("judge rejected the request: {0}")]
    Rejected(String),

    #[error("language not supported by the judge: {0}")]
    UnsupportedLanguage(String),

    #[error("dispatch outcome unknown, not retried: {0}")]
    Ambiguous(String),

    #[error("malformed judge response: {0}")]
    MalformedResponse(String),
}

/// Typed reason carried by the `Failed` state
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "error", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("invalid request: {0}")]
    Construction(ConstructionError),

    #[error("dispatch failed: {0}")]
    Dispatch(DispatchError),

    #[error("{unresolved} test case(s) unresolved after {timeout_ms}ms")]
    Timeout { unresolved: usize, timeout_ms: u64 },

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl FailureReason {
    /// Short label for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::Construction(_) => "construction",
            FailureReason::Dispatch(_) => "dispatch",
            FailureReason::Timeout { .. } => "timeout",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Internal(_) => "internal",
        }
    }
}
