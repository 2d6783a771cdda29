use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Evaluation mode
/// Run is an ephemeral preview, Submit is graded and recorded in submission history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Run,
    Submit,
}

impl Mode {
    pub fn persists(self) -> bool {
        matches!(self, Mode::Submit)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Run => f.write_str("run"),
            Mode::Submit => f.write_str("submit"),
        }
    }
}

/// Test Case Definition (Immutable Input)
/// Its position in the request is the correlation key for its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub stdin: String,
    pub expected_output: String,
}

impl TestCase {
    pub fn new(stdin: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            stdin: stdin.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// Per-test failure mode reported by the judge
/// Absent when the program ran to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    InternalError,
}

impl ErrorKind {
    pub fn verdict(self) -> Verdict {
        match self {
            ErrorKind::CompileError => Verdict::CompileError,
            ErrorKind::RuntimeError => Verdict::RuntimeError,
            ErrorKind::TimeLimitExceeded => Verdict::Tle,
            ErrorKind::MemoryLimitExceeded => Verdict::Mle,
            ErrorKind::InternalError => Verdict::InternalError,
        }
    }
}

/// Per-Test Result
/// `stdout == None` means the program crashed or never produced output,
/// which is distinct from a valid-but-wrong answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub index: usize,
    pub passed: bool,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    pub expected_output: String,
    pub time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    pub error_kind: Option<ErrorKind>,
}

impl TestCaseResult {
    /// Placeholder for a test case whose job never reached a terminal state
    pub fn unresolved(index: usize, expected_output: impl Into<String>) -> Self {
        Self {
            index,
            passed: false,
            stdout: None,
            stderr: None,
            compile_output: None,
            expected_output: expected_output.into(),
            time_ms: None,
            memory_kb: None,
            error_kind: Some(ErrorKind::InternalError),
        }
    }
}

/// Overall verdict of an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    CompileError,
    RuntimeError,
    #[serde(rename = "TLE")]
    Tle,
    #[serde(rename = "MLE")]
    Mle,
    InternalError,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Accepted => "ACCEPTED",
            Verdict::WrongAnswer => "WRONG_ANSWER",
            Verdict::CompileError => "COMPILE_ERROR",
            Verdict::RuntimeError => "RUNTIME_ERROR",
            Verdict::Tle => "TLE",
            Verdict::Mle => "MLE",
            Verdict::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated outcome of one evaluation
///
/// ## Semantics:
/// - status: ACCEPTED iff every case passed, else the first failing case's
///   error kind, else WRONG_ANSWER
/// - test_results: always ordered by original test case index
/// - averages are derived on demand and skip cases without figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: Verdict,
    pub test_results: Vec<TestCaseResult>,
    pub total_test_cases: usize,
    pub passed_test_cases: usize,
    pub all_passed: bool,
}

impl ExecutionResult {
    /// Average runtime over cases that reported one; `None` means unavailable
    pub fn average_time_ms(&self) -> Option<f64> {
        mean(self.test_results.iter().filter_map(|r| r.time_ms))
    }

    /// Average memory over cases that reported one; `None` means unavailable
    pub fn average_memory_kb(&self) -> Option<f64> {
        mean(self.test_results.iter().filter_map(|r| r.memory_kb))
    }

    /// Percentage of passed cases, `None` when there are no cases
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_test_cases == 0 {
            return None;
        }
        Some(self.passed_test_cases as f64 * 100.0 / self.total_test_cases as f64)
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            success_rate: self.success_rate(),
            average_time_ms: self.average_time_ms(),
            average_memory_kb: self.average_memory_kb(),
        }
    }
}

/// Headline figures of a result, each `None` when unavailable
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub success_rate: Option<f64>,
    pub average_time_ms: Option<f64>,
    pub average_memory_kb: Option<f64>,
}

fn mean(values: impl Iterator<Item = u64>) -> Option<f64> {
    let (sum, count) = values.fold((0u128, 0u64), |(sum, count), v| (sum + v as u128, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum as f64 / count as f64)
    }
}

/// Identifier of a persisted submission record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(pub Uuid);

impl SubmissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SubmissionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(SubmissionId)
    }
}
