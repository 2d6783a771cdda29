/// Result Aggregator - Language-Agnostic Verdict Logic
///
/// **Core Responsibility:**
/// Compare terminal job outcomes against expected outputs and fold them into
/// one `ExecutionResult`.
///
/// **Critical Properties:**
/// - Knows nothing about HTTP or the judge's wire format
/// - Knows nothing about polling or cancellation
/// - Pure function: (request, per-case results) → aggregate
///
/// **Verdict Rules:**
/// - ACCEPTED iff every test case passed (and there is at least one)
/// - otherwise the first failing case's error kind, in index order
/// - otherwise WRONG_ANSWER
///
/// **Normalization Rules (Applied to All Languages):**
/// - `\r\n` is treated as `\n`: YES
/// - Trailing whitespace on every line: IGNORED
/// - Trailing blank lines: IGNORED
/// - Leading whitespace: SIGNIFICANT
/// - Case sensitivity: YES (exact match required)
/// - Floating-point tolerance: NO
use crate::backend::JobOutcome;
use crate::builder::EvaluationRequest;
use tracing::{debug, warn};
use verdict_common::{ExecutionResult, TestCaseResult, Verdict};

/// Normalize program output for comparison
pub fn normalize_output(output: &str) -> String {
    let mut lines: Vec<&str> = output
        .split('\n')
        .map(|line| line.trim_end())
        .collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

/// Evaluate a single terminal outcome
///
/// A case passes only if the program ran to completion, produced stdout, and
/// that stdout matches the expected output under the normalization rules.
pub fn evaluate_case(index: usize, expected_output: &str, outcome: JobOutcome) -> TestCaseResult {
    let passed = outcome.error_kind.is_none()
        && outcome
            .stdout
            .as_deref()
            .is_some_and(|stdout| outputs_match(stdout, expected_output));

    debug!(index, passed, error_kind = ?outcome.error_kind, "Test case evaluated");

    TestCaseResult {
        index,
        passed,
        stdout: outcome.stdout,
        stderr: outcome.stderr,
        compile_output: outcome.compile_output,
        expected_output: expected_output.to_string(),
        time_ms: outcome.time_ms,
        memory_kb: outcome.memory_kb,
        error_kind: outcome.error_kind,
    }
}

/// Aggregate per-case results into the final execution result
///
/// Results are placed by index; an index with no result is filled with a
/// failing internal-error entry so no test case ever disappears.
pub fn aggregate(request: &EvaluationRequest, results: Vec<TestCaseResult>) -> ExecutionResult {
    let total = request.test_cases().len();
    let mut slots: Vec<Option<TestCaseResult>> = vec![None; total];

    for result in results {
        let index = result.index;
        match slots.get_mut(index) {
            Some(slot) => {
                if slot.is_some() {
                    warn!(index, "Duplicate result for test case, keeping the latest");
                }
                *slot = Some(result);
            }
            None => warn!(index, total, "Dropping result with out-of-range index"),
        }
    }

    let test_results: Vec<TestCaseResult> = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| {
                warn!(index, "Missing result for test case, marking as internal error");
                TestCaseResult::unresolved(index, request.expected_output(index))
            })
        })
        .collect();

    let passed_test_cases = test_results.iter().filter(|r| r.passed).count();
    let all_passed = total > 0 && passed_test_cases == total;

    let status = if total == 0 {
        Verdict::InternalError
    } else {
        match test_results.iter().find(|r| !r.passed) {
            None => Verdict::Accepted,
            Some(failing) => failing
                .error_kind
                .map(|kind| kind.verdict())
                .unwrap_or(Verdict::WrongAnswer),
        }
    };

    debug!(
        request_id = %request.id(),
        status = %status,
        passed = passed_test_cases,
        total,
        "Evaluation aggregated"
    );

    ExecutionResult {
        status,
        test_results,
        total_test_cases: total,
        passed_test_cases,
        all_passed,
    }
}
