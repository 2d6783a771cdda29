pub mod aggregator;
pub mod backend;
pub mod builder;
pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod judge0;
pub mod orchestrator;
pub mod persistence;
pub mod poller;
pub mod state;

#[cfg(test)]
mod test_support;

pub use backend::{BackendError, JobHandle, JobOutcome, JobState, JobToken, JudgeBackend};
pub use builder::EvaluationRequest;
pub use catalog::{CatalogError, FileProblemCatalog, ProblemCatalog, ProblemTestData};
pub use error::{ConstructionError, DispatchError, FailureReason};
pub use judge0::Judge0Client;
pub use orchestrator::{
    EvaluationHandle, EvaluationOutcome, Orchestrator, OrchestratorSettings, SubmissionDraft,
};
pub use persistence::{PersistenceError, RedisSubmissionStore, SubmissionRecord, SubmissionStore};
pub use state::{
    EvaluationSession, EvaluationState, SessionRegistry, StateError, TransientSession,
};
