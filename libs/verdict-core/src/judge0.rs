/// Judge0 HTTP backend
///
/// One pooled `reqwest::Client` serves both dispatch and polling.
/// All text travels base64-encoded so arbitrary program output survives the wire.
use crate::backend::{BackendError, JobOutcome, JobSpec, JobState, JobToken, JudgeBackend};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use verdict_common::{Config, ErrorKind};

const RESULT_FIELDS: &str = "stdout,stderr,compile_output,message,time,memory,status";

#[derive(Debug, Serialize)]
struct SubmissionBody {
    language_id: u32,
    source_code: String,
    stdin: String,
}

#[derive(Debug, Serialize)]
struct BatchBody {
    submissions: Vec<SubmissionBody>,
}

#[derive(Debug, Deserialize)]
struct StatusField {
    id: u32,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmissionResponse {
    stdout: Option<String>,
    stderr: Option<String>,
    compile_output: Option<String>,
    message: Option<String>,
    time: Option<Value>,
    memory: Option<Value>,
    status: Option<StatusField>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Pending,
    Finished,
    Failed(ErrorKind),
}

pub struct Judge0Client {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
    batch: bool,
}

impl Judge0Client {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(config.judge_http_timeout())
            .pool_max_idle_per_host(config.judge_pool_max_idle)
            .build()?;

        Ok(Self {
            http,
            base_url: config.judge_url.trim_end_matches('/').to_string(),
            auth_token: config.judge_auth_token.clone(),
            batch: config.judge_batch,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.auth_token {
            Some(token) => builder.header("X-Auth-Token", token),
            None => builder,
        }
    }

    /// Send a request and return the body of a 2xx response
    async fn send(&self, builder: RequestBuilder) -> Result<String, BackendError> {
        let response = builder.send().await.map_err(classify_send_error)?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::Ambiguous(format!("failed to read judge response: {}", e)))?;

        if status.is_server_error() {
            return Err(BackendError::Server {
                status: status.as_u16(),
                message: body,
            });
        }
        if status.is_client_error() {
            if status == StatusCode::UNPROCESSABLE_ENTITY && body.contains("language") {
                return Err(BackendError::UnsupportedLanguage(body));
            }
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl JudgeBackend for Judge0Client {
    fn supports_batch(&self) -> bool {
        self.batch
    }

    async fn submit(&self, job: &JobSpec<'_>) -> Result<JobToken, BackendError> {
        let builder = self
            .request(Method::POST, "/submissions?base64_encoded=true&wait=false")
            .json(&submission_body(job));
        let body = self.send(builder).await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| BackendError::Malformed(format!("submission response: {}", e)))?;
        token_from(&value)
    }

    async fn submit_batch(&self, jobs: &[JobSpec<'_>]) -> Result<Vec<JobToken>, BackendError> {
        let payload = BatchBody {
            submissions: jobs.iter().map(submission_body).collect(),
        };
        let builder = self
            .request(Method::POST, "/submissions/batch?base64_encoded=true")
            .json(&payload);
        let body = self.send(builder).await?;
        parse_batch_tokens(&body)
    }

    async fn poll(&self, token: &JobToken) -> Result<JobState, BackendError> {
        let path = format!(
            "/submissions/{}?base64_encoded=true&fields={}",
            token.0, RESULT_FIELDS
        );
        let body = self.send(self.request(Method::GET, &path)).await?;
        let response: SubmissionResponse = serde_json::from_str(&body)
            .map_err(|e| BackendError::Malformed(format!("submission status: {}", e)))?;
        parse_submission(response)
    }
}

fn submission_body(job: &JobSpec<'_>) -> SubmissionBody {
    SubmissionBody {
        language_id: job.language.judge_id(),
        source_code: general_purpose::STANDARD.encode(job.source_code),
        stdin: general_purpose::STANDARD.encode(job.stdin),
    }
}

fn classify_send_error(err: reqwest::Error) -> BackendError {
    if err.is_connect() {
        BackendError::Unavailable(err.to_string())
    } else if err.is_builder() {
        BackendError::Rejected {
            status: 0,
            message: err.to_string(),
        }
    } else {
        // timeouts and dropped connections: the request may already have landed
        BackendError::Ambiguous(err.to_string())
    }
}

fn token_from(value: &Value) -> Result<JobToken, BackendError> {
    if let Some(token) = value.get("token").and_then(Value::as_str) {
        return Ok(JobToken(token.to_string()));
    }
    if value.get("language_id").is_some() {
        return Err(BackendError::UnsupportedLanguage(value.to_string()));
    }
    Err(BackendError::Rejected {
        status: 201,
        message: value.to_string(),
    })
}

fn parse_batch_tokens(body: &str) -> Result<Vec<JobToken>, BackendError> {
    let items: Vec<Value> = serde_json::from_str(body)
        .map_err(|e| BackendError::Malformed(format!("batch response: {}", e)))?;
    items.iter().map(token_from).collect()
}

fn classify_status(id: u32, message: Option<&str>) -> Option<StatusClass> {
    let class = match id {
        1 | 2 => StatusClass::Pending,
        3 | 4 => StatusClass::Finished,
        5 => StatusClass::Failed(ErrorKind::TimeLimitExceeded),
        6 => StatusClass::Failed(ErrorKind::CompileError),
        7..=12 => {
            let oom = message
                .map(|m| m.to_lowercase().contains("memory"))
                .unwrap_or(false);
            if oom {
                StatusClass::Failed(ErrorKind::MemoryLimitExceeded)
            } else {
                StatusClass::Failed(ErrorKind::RuntimeError)
            }
        }
        13 | 14 => StatusClass::Failed(ErrorKind::InternalError),
        _ => return None,
    };
    Some(class)
}

fn parse_submission(response: SubmissionResponse) -> Result<JobState, BackendError> {
    let status = response
        .status
        .ok_or_else(|| BackendError::Malformed("missing status".to_string()))?;
    let message = decode(response.message)?;
    let class = classify_status(status.id, message.as_deref()).ok_or_else(|| {
        BackendError::Malformed(format!(
            "unknown status {} ({})",
            status.id,
            status.description.unwrap_or_default()
        ))
    })?;

    let error_kind = match class {
        StatusClass::Pending => return Ok(JobState::Pending),
        StatusClass::Finished => None,
        StatusClass::Failed(kind) => Some(kind),
    };

    let mut stdout = decode(response.stdout)?;
    if error_kind.is_none() && stdout.is_none() {
        // Judge0 reports empty output as null; a clean run still produced ""
        stdout = Some(String::new());
    }

    let mut stderr = decode(response.stderr)?;
    if let (None, Some(message)) = (&stderr, message) {
        stderr = Some(message);
    }

    let outcome = JobOutcome {
        error_kind,
        stdout,
        stderr,
        compile_output: decode(response.compile_output)?,
        time_ms: response.time.as_ref().and_then(seconds_to_ms),
        memory_kb: response.memory.as_ref().and_then(to_kb),
    };
    debug!(status = status.id, error_kind = ?outcome.error_kind, "Judge0 submission terminal");
    Ok(JobState::Terminal(outcome))
}

fn decode(field: Option<String>) -> Result<Option<String>, BackendError> {
    let Some(encoded) = field else {
        return Ok(None);
    };
    // Judge0 wraps base64 output every 60 characters
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| BackendError::Malformed(format!("invalid base64 field: {}", e)))?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Judge0 reports time in seconds, as a string ("0.012") or a number
fn seconds_to_ms(value: &Value) -> Option<u64> {
    let seconds = match value {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some((seconds * 1000.0).round() as u64)
}

fn to_kb(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.round() as u64)),
        Value::String(s) => s.split_whitespace().next()?.parse::<f64>().ok().map(|f| f.round() as u64),
        _ => None,
    }
}
