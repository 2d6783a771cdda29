use crate::types::SubmissionId;

/// Redis key semantics for submission history - defines only key layout,
/// so the API, CLI and any reporting job agree on where records live

pub const SUBMISSION_PREFIX: &str = "verdict:submission";
pub const HISTORY_PREFIX: &str = "verdict:submissions";

/// Key holding one serialized submission record
pub fn submission_key(id: &SubmissionId) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, id)
}

/// List key holding submission ids for one user on one problem, newest first
pub fn history_key(problem_ref: &str, user_ref: &str) -> String {
    format!("{}:{}:{}", HISTORY_PREFIX, problem_ref, user_ref)
}
