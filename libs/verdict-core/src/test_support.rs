//! Scripted judge backend and in-memory submission store for unit tests.

use crate::backend::{BackendError, JobOutcome, JobSpec, JobState, JobToken, JudgeBackend};
use crate::persistence::{PersistenceError, SubmissionRecord, SubmissionStore};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use verdict_common::{ErrorKind, SubmissionId};

/// Scripted behaviour of one job, addressed by dispatch order
#[derive(Debug, Clone)]
pub struct Script {
    outcome: JobOutcome,
    pending_polls: usize,
    resolves: bool,
}

impl Script {
    /// Answers `Pending` for `pending_polls` polls, then finishes with `stdout`
    pub fn finished(stdout: &str, pending_polls: usize) -> Self {
        Self {
            outcome: JobOutcome {
                stdout: Some(stdout.to_string()),
                time_ms: Some(10),
                memory_kb: Some(1024),
                ..Default::default()
            },
            pending_polls,
            resolves: true,
        }
    }

    pub fn failed(kind: ErrorKind, pending_polls: usize) -> Self {
        Self {
            outcome: JobOutcome {
                error_kind: Some(kind),
                ..Default::default()
            },
            pending_polls,
            resolves: true,
        }
    }

    /// Never leaves `Pending`
    pub fn never() -> Self {
        Self {
            outcome: JobOutcome::default(),
            pending_polls: 0,
            resolves: false,
        }
    }

    pub fn time(mut self, time_ms: Option<u64>) -> Self {
        self.outcome.time_ms = time_ms;
        self
    }
}

pub struct ScriptedBackend {
    batch: bool,
    scripts: Vec<Script>,
    next_index: AtomicUsize,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    submit_failures: Mutex<VecDeque<BackendError>>,
    poll_failures: Mutex<VecDeque<BackendError>>,
    poll_counts: Mutex<Vec<usize>>,
    completions: Mutex<Vec<usize>>,
    batch_limit: Mutex<Option<usize>>,
}

impl ScriptedBackend {
    pub fn batched(scripts: Vec<Script>) -> Self {
        Self::with_mode(true, scripts)
    }

    pub fn single(scripts: Vec<Script>) -> Self {
        Self::with_mode(false, scripts)
    }

    fn with_mode(batch: bool, scripts: Vec<Script>) -> Self {
        let jobs = scripts.len();
        Self {
            batch,
            scripts,
            next_index: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            submit_failures: Mutex::new(VecDeque::new()),
            poll_failures: Mutex::new(VecDeque::new()),
            poll_counts: Mutex::new(vec![0; jobs]),
            completions: Mutex::new(Vec::new()),
            batch_limit: Mutex::new(None),
        }
    }

    pub fn fail_next_submits(&self, errors: Vec<BackendError>) {
        self.submit_failures.lock().unwrap().extend(errors);
    }

    pub fn fail_next_polls(&self, errors: Vec<BackendError>) {
        self.poll_failures.lock().unwrap().extend(errors);
    }

    pub fn truncate_batch_to(&self, tokens: usize) {
        *self.batch_limit.lock().unwrap() = Some(tokens);
    }

    /// Submission attempts, failed ones included
    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn index_of(&self, token: &JobToken) -> Option<usize> {
        token.0.strip_prefix("job-")?.parse().ok()
    }

    /// Job indices in the order they first reported a terminal state
    pub fn completion_order(&self) -> Vec<usize> {
        self.completions.lock().unwrap().clone()
    }

    fn next_failure(queue: &Mutex<VecDeque<BackendError>>) -> Option<BackendError> {
        queue.lock().unwrap().pop_front()
    }

    fn issue_token(&self) -> JobToken {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        JobToken(format!("job-{}", index))
    }
}

#[async_trait]
impl JudgeBackend for ScriptedBackend {
    fn supports_batch(&self) -> bool {
        self.batch
    }

    async fn submit(&self, _job: &JobSpec<'_>) -> Result<JobToken, BackendError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = Self::next_failure(&self.submit_failures) {
            return Err(err);
        }
        Ok(self.issue_token())
    }

    async fn submit_batch(&self, jobs: &[JobSpec<'_>]) -> Result<Vec<JobToken>, BackendError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = Self::next_failure(&self.submit_failures) {
            return Err(err);
        }
        let count = match *self.batch_limit.lock().unwrap() {
            Some(limit) => limit.min(jobs.len()),
            None => jobs.len(),
        };
        Ok((0..count).map(|_| self.issue_token()).collect())
    }

    async fn poll(&self, token: &JobToken) -> Result<JobState, BackendError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = Self::next_failure(&self.poll_failures) {
            return Err(err);
        }

        let index = self
            .index_of(token)
            .filter(|i| *i < self.scripts.len())
            .ok_or_else(|| BackendError::Rejected {
                status: 404,
                message: format!("unknown token {}", token),
            })?;
        let script = &self.scripts[index];

        let polls = {
            let mut counts = self.poll_counts.lock().unwrap();
            counts[index] += 1;
            counts[index]
        };

        if !script.resolves || polls <= script.pending_polls {
            return Ok(JobState::Pending);
        }

        let mut completions = self.completions.lock().unwrap();
        if !completions.contains(&index) {
            completions.push(index);
        }
        Ok(JobState::Terminal(script.outcome.clone()))
    }
}

/// In-memory store with a switchable failure mode
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<SubmissionRecord>>,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.failing.store(true, Ordering::SeqCst);
        store
    }

    pub fn record_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<SubmissionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn record(&self, record: &SubmissionRecord) -> Result<SubmissionId, PersistenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistenceError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "store unavailable",
            ))));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(record.id)
    }

    async fn get(&self, id: &SubmissionId) -> Result<Option<SubmissionRecord>, PersistenceError> {
        Ok(self.records.lock().unwrap().iter().find(|r| r.id == *id).cloned())
    }

    async fn list_for(
        &self,
        problem_ref: &str,
        user_ref: &str,
    ) -> Result<Vec<SubmissionRecord>, PersistenceError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|r| r.problem_ref == problem_ref && r.user_ref == user_ref)
            .cloned()
            .collect())
    }
}
