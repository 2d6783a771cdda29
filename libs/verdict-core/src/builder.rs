/// Execution Request Builder
///
/// Turns loose caller input into an immutable [`EvaluationRequest`].
/// Nothing here touches the network; every failure is a [`ConstructionError`].
use crate::error::ConstructionError;
use serde::Serialize;
use uuid::Uuid;
use verdict_common::{language, Language, Mode, TestCase};

/// Safety limits to keep pathological inputs away from the judge
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// One evaluation, built fresh per invocation and never mutated afterwards
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRequest {
    id: Uuid,
    source_code: String,
    language: Language,
    test_cases: Vec<TestCase>,
    problem_ref: String,
    mode: Mode,
}

impl EvaluationRequest {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source_code(&self) -> &str {
        &self.source_code
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn test_cases(&self) -> &[TestCase] {
        &self.test_cases
    }

    pub fn problem_ref(&self) -> &str {
        &self.problem_ref
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Expected output for a test case index, empty when out of range
    pub fn expected_output(&self, index: usize) -> &str {
        self.test_cases
            .get(index)
            .map(|tc| tc.expected_output.as_str())
            .unwrap_or("")
    }
}

/// Build a request from separate stdin and expected-output lists
///
/// The lists are never zipped silently: a length difference is rejected.
pub fn build(
    source_code: impl Into<String>,
    language_name: &str,
    stdin: Vec<String>,
    expected_outputs: Vec<String>,
    problem_ref: impl Into<String>,
    mode: Mode,
) -> Result<EvaluationRequest, ConstructionError> {
    if stdin.len() != expected_outputs.len() {
        return Err(ConstructionError::LengthMismatch {
            stdin: stdin.len(),
            expected: expected_outputs.len(),
        });
    }

    let test_cases = stdin
        .into_iter()
        .zip(expected_outputs)
        .map(|(stdin, expected_output)| TestCase { stdin, expected_output })
        .collect();

    build_paired(source_code, language_name, test_cases, problem_ref, mode)
}

/// Build a request from already paired test cases
pub fn build_paired(
    source_code: impl Into<String>,
    language_name: &str,
    test_cases: Vec<TestCase>,
    problem_ref: impl Into<String>,
    mode: Mode,
) -> Result<EvaluationRequest, ConstructionError> {
    let source_code = source_code.into();
    let problem_ref = problem_ref.into();

    if source_code.trim().is_empty() {
        return Err(ConstructionError::EmptySource);
    }
    if source_code.len() > MAX_SOURCE_CODE_BYTES {
        return Err(ConstructionError::SourceTooLarge {
            limit: MAX_SOURCE_CODE_BYTES,
        });
    }

    let language = language::resolve(language_name)?;

    if problem_ref.trim().is_empty() {
        return Err(ConstructionError::MissingProblemRef);
    }
    if test_cases.is_empty() {
        return Err(ConstructionError::NoTestCases);
    }
    if let Some(index) = test_cases
        .iter()
        .position(|tc| tc.stdin.len() > MAX_TEST_INPUT_BYTES)
    {
        return Err(ConstructionError::InputTooLarge {
            index,
            limit: MAX_TEST_INPUT_BYTES,
        });
    }

    Ok(EvaluationRequest {
        id: Uuid::new_v4(),
        source_code,
        language,
        test_cases,
        problem_ref,
        mode,
    })
}
