pub mod config;
pub mod language;
pub mod redis;
pub mod types;

// Re-export commonly used types for convenience
pub use config::Config;
pub use language::{resolve, Language, UnknownLanguage};
pub use types::{
    ErrorKind, ExecutionResult, Mode, ResultSummary, SubmissionId, TestCase, TestCaseResult, Verdict,
};
