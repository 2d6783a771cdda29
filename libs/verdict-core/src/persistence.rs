/// Submission persistence
///
/// Only `Submit` evaluations are recorded. Records are append-only: one JSON
/// document per submission plus a per-(problem, user) history list.
use crate::builder::EvaluationRequest;
use crate::error::FailureReason;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use verdict_common::redis::{history_key, submission_key};
use verdict_common::{ExecutionResult, Language, SubmissionId, TestCaseResult, Verdict};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: SubmissionId,
    pub problem_ref: String,
    pub user_ref: String,
    pub language: Language,
    pub source_code: String,
    pub stdin: Vec<String>,
    pub expected_outputs: Vec<String>,
    pub status: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub test_results: Vec<TestCaseResult>,
    pub passed_test_cases: usize,
    pub total_test_cases: usize,
    pub average_time_ms: Option<f64>,
    pub average_memory_kb: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl SubmissionRecord {
    /// Snapshot an evaluation. A missing result (dispatch never succeeded)
    /// is recorded as an internal error with no per-case entries.
    pub fn new(
        request: &EvaluationRequest,
        user_ref: impl Into<String>,
        result: Option<&ExecutionResult>,
        failure: Option<FailureReason>,
    ) -> Self {
        let (stdin, expected_outputs): (Vec<String>, Vec<String>) = request
            .test_cases()
            .iter()
            .map(|tc| (tc.stdin.clone(), tc.expected_output.clone()))
            .unzip();

        Self {
            id: SubmissionId::new(),
            problem_ref: request.problem_ref().to_string(),
            user_ref: user_ref.into(),
            language: request.language(),
            source_code: request.source_code().to_string(),
            stdin,
            expected_outputs,
            status: result.map(|r| r.status).unwrap_or(Verdict::InternalError),
            failure,
            test_results: result.map(|r| r.test_results.clone()).unwrap_or_default(),
            passed_test_cases: result.map(|r| r.passed_test_cases).unwrap_or(0),
            total_test_cases: request.test_cases().len(),
            average_time_ms: result.and_then(|r| r.average_time_ms()),
            average_memory_kb: result.and_then(|r| r.average_memory_kb()),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn record(&self, record: &SubmissionRecord) -> Result<SubmissionId, PersistenceError>;

    async fn get(&self, id: &SubmissionId) -> Result<Option<SubmissionRecord>, PersistenceError>;

    /// Most recent first
    async fn list_for(
        &self,
        problem_ref: &str,
        user_ref: &str,
    ) -> Result<Vec<SubmissionRecord>, PersistenceError>;
}

#[derive(Clone)]
pub struct RedisSubmissionStore {
    conn: ConnectionManager,
}

impl RedisSubmissionStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn connect(redis_url: &str) -> Result<Self, PersistenceError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }
}

/// Record and history entry land together or not at all
fn record_pipeline(record: &SubmissionRecord, payload: String) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .set(submission_key(&record.id), payload)
        .ignore()
        .lpush(
            history_key(&record.problem_ref, &record.user_ref),
            record.id.to_string(),
        )
        .ignore();
    pipe
}

#[async_trait]
impl SubmissionStore for RedisSubmissionStore {
    async fn record(&self, record: &SubmissionRecord) -> Result<SubmissionId, PersistenceError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();

        let _: () = record_pipeline(record, payload)
            .query_async(&mut conn)
            .await?;

        debug!(submission_id = %record.id, status = %record.status, "Submission recorded");
        Ok(record.id)
    }

    async fn get(&self, id: &SubmissionId) -> Result<Option<SubmissionRecord>, PersistenceError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.get(submission_key(id)).await?;
        match payload {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn list_for(
        &self,
        problem_ref: &str,
        user_ref: &str,
    ) -> Result<Vec<SubmissionRecord>, PersistenceError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.lrange(history_key(problem_ref, user_ref), 0, -1).await?;

        let mut records = Vec::with_capacity(ids.len());
        for raw in ids {
            let Ok(id) = raw.parse::<SubmissionId>() else {
                warn!(id = %raw, "Skipping malformed submission id in history");
                continue;
            };
            if let Some(record) = self.get(&id).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}
