//! Batch API lifecycle management (spec.md §4.6).
//!
//! ```text
//! submitted --> validating --> in_progress --> finalizing --> completed
//!                          \--> failed
//!                          \--> expired
//! [any pre-terminal] --cancel--> cancelled
//! ```
//!
//! No repo in this codebase's lineage implements an async batch API, so the shape here
//! is grounded directly in spec.md §6's wire description (NDJSON request/result lines)
//! while the HTTP plumbing (shared client, retry middleware) reuses
//! [`crate::engine::transport`] the same way [`crate::engine::client`] does for the
//! synchronous path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::client::PromptRequest;
use crate::engine::error::BatchError;
use crate::engine::transport::{get_shared_http_client, is_reasoning_model};

/// Lifecycle state of a [`BatchJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Just created, not yet validated by the vendor.
    Submitted,
    /// Vendor is validating the input file.
    Validating,
    /// Requests are being processed.
    InProgress,
    /// Processing finished; output/error files are being assembled.
    Finalizing,
    /// Terminal success state.
    Completed,
    /// Terminal failure state.
    Failed,
    /// Terminal state: the job exceeded its processing window.
    Expired,
    /// Terminal state: cancelled by the caller.
    Cancelled,
}

impl BatchStatus {
    /// `true` for any state from which no further transition occurs.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Expired | BatchStatus::Cancelled
        )
    }
}

/// Per-status request counts reported by the vendor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RequestCounts {
    /// Total requests submitted in this job.
    pub total: u64,
    /// Requests that completed (successfully or with a per-line error).
    pub completed: u64,
    /// Requests that failed outright (distinct from a per-line `error` in the results file).
    pub failed: u64,
}

/// A heuristic, non-authoritative cost projection for a set of requests.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Estimated total input tokens across all requests.
    pub estimated_input_tokens: u64,
    /// Estimated total output tokens across all requests (a fixed per-request guess).
    pub estimated_output_tokens: u64,
    /// Declarative USD estimate; purely indicative, never billed against.
    pub estimated_usd: f64,
}

/// A submitted batch job and its vendor-reported state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    /// Vendor-assigned job id.
    pub id: String,
    /// Current lifecycle status.
    pub status: BatchStatus,
    /// File id of the uploaded NDJSON request file.
    pub input_file_id: String,
    /// File id of the NDJSON result file, once available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file_id: Option<String>,
    /// File id of the NDJSON error file, once available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_file_id: Option<String>,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal state, if it has.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-status request counts.
    pub counts: RequestCounts,
    /// Free-form metadata carried alongside the job.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Heuristic cost projection computed at submission time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<CostEstimate>,
}

/// Aggregated outcome of a completed batch job, keyed by `custom_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchResult {
    /// Assistant text content per successful request.
    pub content: HashMap<String, String>,
    /// Tool calls emitted per successful request, if any.
    pub tool_calls: HashMap<String, Vec<BatchToolCall>>,
    /// Token usage per successful request.
    pub usage: HashMap<String, BatchUsage>,
    /// Error message per failed request.
    pub errors: HashMap<String, String>,
    /// Count of requests that succeeded.
    pub successes: u64,
    /// Count of requests that failed.
    pub failures: u64,
}

/// A tool call as it appears in a batch result line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchToolCall {
    /// Provider-assigned call id.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Raw JSON arguments.
    pub arguments: String,
}

/// Token usage reported for a single batch result line.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchUsage {
    /// Input/prompt tokens; zero when the line carried no usage block.
    pub input_tokens: usize,
    /// Output/completion tokens; zero when the line carried no usage block.
    pub output_tokens: usize,
    /// Total tokens; zero when the line carried no usage block.
    pub total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ResultLine {
    custom_id: String,
    #[serde(default)]
    response: Option<ResultResponse>,
    #[serde(default)]
    error: Option<ResultError>,
    #[serde(default)]
    usage: Option<BatchUsage>,
}

#[derive(Debug, Deserialize)]
struct ResultResponse {
    body: ResultBody,
}

#[derive(Debug, Deserialize)]
struct ResultBody {
    choices: Vec<ResultChoice>,
}

#[derive(Debug, Deserialize)]
struct ResultChoice {
    message: ResultMessage,
}

#[derive(Debug, Deserialize)]
struct ResultMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ResultToolCall>,
}

#[derive(Debug, Deserialize)]
struct ResultToolCall {
    id: String,
    function: ResultFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ResultFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ResultError {
    message: String,
}

/// Serialize `requests` as newline-delimited JSON batch records, `{custom_id, method,
/// url, body}` per line, one per request.
///
/// A reasoning model's requests drop `tools` (with a warning) since the `/responses`
/// endpoint has no function-calling parameter shape defined in this request family.
pub fn serialize_batch_requests(requests: &[PromptRequest]) -> Result<String, BatchError> {
    let mut lines = Vec::with_capacity(requests.len());
    for request in requests {
        let custom_id = request
            .custom_id
            .clone()
            .ok_or_else(|| BatchError::Transport("batch request missing custom_id".to_string()))?;
        let model = request.model.clone().unwrap_or_default();
        let reasoning = is_reasoning_model(&model);
        let url = if reasoning { "/v1/responses" } else { "/v1/chat/completions" };

        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), serde_json::json!(model));
        if reasoning {
            if !request.tools.is_empty() {
                log::warn!(
                    "batch request {custom_id} targets a reasoning model; dropping {} tool definition(s)",
                    request.tools.len()
                );
            }
            body.insert("input".to_string(), serde_json::json!(request.messages));
            if let Some(max_tokens) = request.max_tokens {
                body.insert("max_output_tokens".to_string(), serde_json::json!(max_tokens));
            }
        } else {
            body.insert("messages".to_string(), serde_json::json!(request.messages));
            if let Some(max_tokens) = request.max_tokens {
                body.insert("max_tokens".to_string(), serde_json::json!(max_tokens));
            }
            if let Some(temperature) = request.temperature {
                body.insert("temperature".to_string(), serde_json::json!(temperature));
            }
            if !request.tools.is_empty() {
                body.insert("tools".to_string(), serde_json::json!(request.tools));
            }
        }

        let record = serde_json::json!({
            "custom_id": custom_id,
            "method": "POST",
            "url": url,
            "body": serde_json::Value::Object(body),
        });
        lines.push(record.to_string());
    }
    Ok(lines.join("\n"))
}

/// Parse one line of a batch results file into `(custom_id, outcome)`, merging into an
/// accumulating [`BatchResult`].
pub fn merge_batch_result_line(result: &mut BatchResult, line: &str) -> Result<(), BatchError> {
    if line.trim().is_empty() {
        return Ok(());
    }
    let parsed: ResultLine =
        serde_json::from_str(line).map_err(|e| BatchError::MalformedLine(e.to_string()))?;

    if let Some(error) = parsed.error {
        result.errors.insert(parsed.custom_id, error.message);
        result.failures += 1;
        return Ok(());
    }

    let Some(response) = parsed.response else {
        return Err(BatchError::MalformedLine(format!(
            "result line for {} carried neither response nor error",
            parsed.custom_id
        )));
    };
    let Some(choice) = response.body.choices.into_iter().next() else {
        return Err(BatchError::MalformedLine(format!(
            "result line for {} had an empty choices array",
            parsed.custom_id
        )));
    };

    result.content.insert(parsed.custom_id.clone(), choice.message.content);
    if !choice.message.tool_calls.is_empty() {
        result.tool_calls.insert(
            parsed.custom_id.clone(),
            choice
                .message
                .tool_calls
                .into_iter()
                .map(|tc| BatchToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                })
                .collect(),
        );
    }
    result.usage.insert(parsed.custom_id.clone(), parsed.usage.unwrap_or_default());
    result.successes += 1;
    Ok(())
}

/// Parse a full results file into a [`BatchResult`], one JSON object per line.
pub fn parse_batch_results(body: &str) -> Result<BatchResult, BatchError> {
    let mut result = BatchResult::default();
    for line in body.lines() {
        merge_batch_result_line(&mut result, line)?;
    }
    Ok(result)
}

/// Filters accepted by [`BatchManager::list_batches`].
#[derive(Debug, Clone, Default)]
pub struct ListBatchesFilter {
    /// Maximum number of jobs to return.
    pub limit: Option<u32>,
    /// Restrict to jobs currently in this status.
    pub status: Option<BatchStatus>,
    /// Cursor: only return jobs created after this job id.
    pub after: Option<String>,
}

/// Submits, polls, and reads back vendor batch jobs, persisting job/result snapshots to
/// disk under `data_dir` per spec.md §6.
pub struct BatchManager {
    base_url: String,
    data_dir: PathBuf,
    poll_interval: std::time::Duration,
}

impl BatchManager {
    /// Build a manager rooted at `data_dir` (created on first write if absent).
    pub fn new(base_url: String, data_dir: impl Into<PathBuf>, poll_interval: std::time::Duration) -> Self {
        Self {
            base_url,
            data_dir: data_dir.into(),
            poll_interval,
        }
    }

    fn job_path(&self, job_id: &str) -> PathBuf {
        self.data_dir.join("batch").join(format!("job_{job_id}.json"))
    }

    fn results_path(&self, job_id: &str) -> PathBuf {
        self.data_dir.join("batch").join(format!("results_{job_id}.json"))
    }

    fn persist_job(&self, job: &BatchJob) -> Result<(), BatchError> {
        let path = self.job_path(&job.id);
        persist_json(&path, job)
    }

    /// Submit `requests` as a new job. When `wait` is `true`, blocks on
    /// [`BatchManager::wait_for_completion`] before returning.
    pub async fn process_batch(&self, requests: Vec<PromptRequest>, wait: bool) -> Result<BatchJob, BatchError> {
        let ndjson = serialize_batch_requests(&requests)?;
        let upload_url = format!("{}/files", self.base_url);
        let response = get_shared_http_client()
            .post(&upload_url)
            .body(ndjson)
            .send()
            .await
            .map_err(|e| BatchError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BatchError::Transport(format!(
                "file upload returned status {}",
                response.status()
            )));
        }
        #[derive(Deserialize)]
        struct UploadResponse {
            id: String,
        }
        let upload: UploadResponse = response.json().await.map_err(|e| BatchError::Transport(e.to_string()))?;

        let create_url = format!("{}/batches", self.base_url);
        let response = get_shared_http_client()
            .post(&create_url)
            .json(&serde_json::json!({ "input_file_id": upload.id }))
            .send()
            .await
            .map_err(|e| BatchError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BatchError::Transport(format!(
                "batch creation returned status {}",
                response.status()
            )));
        }
        let job: BatchJob = response.json().await.map_err(|e| BatchError::Transport(e.to_string()))?;
        self.persist_job(&job)?;

        if wait {
            self.wait_for_completion(&job.id).await
        } else {
            Ok(job)
        }
    }

    /// Fetch the current status of `job_id` with a single request, no polling.
    pub async fn get_job_status(&self, job_id: &str) -> Result<BatchJob, BatchError> {
        let url = format!("{}/batches/{job_id}", self.base_url);
        let response = get_shared_http_client()
            .get(&url)
            .send()
            .await
            .map_err(|e| BatchError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BatchError::Transport(format!(
                "status fetch returned status {}",
                response.status()
            )));
        }
        let job: BatchJob = response.json().await.map_err(|e| BatchError::Transport(e.to_string()))?;
        self.persist_job(&job)?;
        Ok(job)
    }

    /// Poll `job_id` until it reaches a terminal status, sleeping `poll_interval`
    /// (jittered) between attempts. Returns [`BatchError::Terminal`] for any terminal
    /// status other than `completed`.
    pub async fn wait_for_completion(&self, job_id: &str) -> Result<BatchJob, BatchError> {
        loop {
            let job = self.get_job_status(job_id).await?;
            if job.status.is_terminal() {
                return if job.status == BatchStatus::Completed {
                    Ok(job)
                } else {
                    Err(BatchError::Terminal {
                        job_id: job.id,
                        status: format!("{:?}", job.status).to_lowercase(),
                    })
                };
            }
            let jitter = rand::random::<f64>() * 0.2 + 0.9;
            let delay = self.poll_interval.mul_f64(jitter);
            tokio::time::sleep(delay).await;
        }
    }

    /// Stream and parse the output file for a completed job, persisting the aggregated
    /// result alongside the job record.
    pub async fn get_results(&self, job: &BatchJob) -> Result<BatchResult, BatchError> {
        let Some(output_file_id) = &job.output_file_id else {
            return Err(BatchError::Transport(format!("job {} has no output file yet", job.id)));
        };
        let url = format!("{}/files/{output_file_id}/content", self.base_url);
        let response = get_shared_http_client()
            .get(&url)
            .send()
            .await
            .map_err(|e| BatchError::Transport(e.to_string()))?;
        let body = response.text().await.map_err(|e| BatchError::Transport(e.to_string()))?;
        let result = parse_batch_results(&body)?;
        persist_json(&self.results_path(&job.id), &result)?;
        Ok(result)
    }

    /// Stream and parse the error file for a job into `custom_id → message`.
    pub async fn get_error(&self, job: &BatchJob) -> Result<HashMap<String, String>, BatchError> {
        let Some(error_file_id) = &job.error_file_id else {
            return Ok(HashMap::new());
        };
        let url = format!("{}/files/{error_file_id}/content", self.base_url);
        let response = get_shared_http_client()
            .get(&url)
            .send()
            .await
            .map_err(|e| BatchError::Transport(e.to_string()))?;
        let body = response.text().await.map_err(|e| BatchError::Transport(e.to_string()))?;
        let mut result = BatchResult::default();
        for line in body.lines() {
            merge_batch_result_line(&mut result, line)?;
        }
        Ok(result.errors)
    }

    /// Cancel `job_id`. A no-op (not an error) if the job is already `cancelled`.
    pub async fn cancel_job(&self, job_id: &str) -> Result<BatchJob, BatchError> {
        let current = self.get_job_status(job_id).await?;
        if current.status == BatchStatus::Cancelled {
            return Ok(current);
        }
        let url = format!("{}/batches/{job_id}/cancel", self.base_url);
        let response = get_shared_http_client()
            .post(&url)
            .send()
            .await
            .map_err(|e| BatchError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BatchError::Transport(format!(
                "cancel returned status {}",
                response.status()
            )));
        }
        let job: BatchJob = response.json().await.map_err(|e| BatchError::Transport(e.to_string()))?;
        self.persist_job(&job)?;
        Ok(job)
    }

    /// List batches, optionally filtered/paginated.
    pub async fn list_batches(&self, filter: ListBatchesFilter) -> Result<Vec<BatchJob>, BatchError> {
        let mut url = format!("{}/batches", self.base_url);
        let mut query = Vec::new();
        if let Some(limit) = filter.limit {
            query.push(format!("limit={limit}"));
        }
        if let Some(after) = &filter.after {
            query.push(format!("after={after}"));
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        let response = get_shared_http_client()
            .get(&url)
            .send()
            .await
            .map_err(|e| BatchError::Transport(e.to_string()))?;
        let jobs: Vec<BatchJob> = response.json().await.map_err(|e| BatchError::Transport(e.to_string()))?;
        Ok(match filter.status {
            Some(status) => jobs.into_iter().filter(|j| j.status == status).collect(),
            None => jobs,
        })
    }

    /// Heuristic, non-authoritative cost projection for `requests`.
    ///
    /// Approximates input tokens as one token per four characters of message content
    /// (a common rough-order estimate for English text) and assumes a fixed output
    /// budget per request; the USD figure uses a placeholder blended rate and must
    /// never be treated as billing-accurate.
    pub fn estimate_cost(requests: &[PromptRequest]) -> CostEstimate {
        const CHARS_PER_TOKEN: f64 = 4.0;
        const ASSUMED_OUTPUT_TOKENS_PER_REQUEST: u64 = 300;
        const BLENDED_USD_PER_1K_TOKENS: f64 = 0.01;

        let estimated_input_tokens: u64 = requests
            .iter()
            .flat_map(|r| r.messages.iter())
            .map(|m| (m.content.len() as f64 / CHARS_PER_TOKEN).ceil() as u64)
            .sum();
        let estimated_output_tokens = ASSUMED_OUTPUT_TOKENS_PER_REQUEST * requests.len() as u64;
        let total_tokens = estimated_input_tokens + estimated_output_tokens;
        CostEstimate {
            estimated_input_tokens,
            estimated_output_tokens,
            estimated_usd: (total_tokens as f64 / 1000.0) * BLENDED_USD_PER_1K_TOKENS,
        }
    }
}

fn persist_json<T: Serialize>(path: &Path, value: &T) -> Result<(), BatchError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| BatchError::Transport(format!("failed to create {}: {e}", parent.display())))?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| BatchError::Transport(format!("failed to serialize batch artifact: {e}")))?;
    std::fs::write(path, json).map_err(|e| BatchError::Transport(format!("failed to write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::client::WireMessage;

    fn req(custom_id: &str, model: &str) -> PromptRequest {
        PromptRequest {
            model: Some(model.to_string()),
            messages: vec![WireMessage {
                role: "user".to_string(),
                content: "hello".to_string(),
                tool_call_id: None,
            }],
            custom_id: Some(custom_id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn standard_model_serializes_with_messages_url() {
        let ndjson = serialize_batch_requests(&[req("q1", "gpt-4o")]).unwrap();
        let line: serde_json::Value = serde_json::from_str(ndjson.lines().next().unwrap()).unwrap();
        assert_eq!(line["url"], "/v1/chat/completions");
        assert!(line["body"]["messages"].is_array());
    }

    #[test]
    fn reasoning_model_serializes_with_input_url_and_no_temperature() {
        let mut request = req("q1", "gpt-5-mini");
        request.temperature = Some(0.5);
        let ndjson = serialize_batch_requests(&[request]).unwrap();
        let line: serde_json::Value = serde_json::from_str(ndjson.lines().next().unwrap()).unwrap();
        assert_eq!(line["url"], "/v1/responses");
        assert!(line["body"]["input"].is_array());
        assert!(line["body"].get("temperature").is_none());
    }

    #[test]
    fn missing_custom_id_is_rejected() {
        let mut request = req("q1", "gpt-4o");
        request.custom_id = None;
        assert!(matches!(
            serialize_batch_requests(&[request]),
            Err(BatchError::Transport(_))
        ));
    }

    #[test]
    fn parse_batch_results_mixes_success_and_failure() {
        let body = r#"{"custom_id":"q1","response":{"body":{"choices":[{"message":{"content":"α"}}]}},"usage":{"input_tokens":1,"output_tokens":2,"total_tokens":3}}
{"custom_id":"q2","error":{"message":"bad"}}"#;
        let result = parse_batch_results(body).unwrap();
        assert_eq!(result.successes, 1);
        assert_eq!(result.failures, 1);
        assert_eq!(result.content.get("q1").unwrap(), "α");
        assert_eq!(result.errors.get("q2").unwrap(), "bad");
    }

    #[test]
    fn terminal_statuses_are_recognized() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(BatchStatus::Expired.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
        assert!(!BatchStatus::InProgress.is_terminal());
        assert!(!BatchStatus::Submitted.is_terminal());
    }

    #[test]
    fn estimate_cost_scales_with_request_count() {
        let one = BatchManager::estimate_cost(&[req("q1", "gpt-4o")]);
        let two = BatchManager::estimate_cost(&[req("q1", "gpt-4o"), req("q2", "gpt-4o")]);
        assert!(two.estimated_usd > one.estimated_usd);
    }

    #[test]
    fn persist_json_creates_parent_dirs_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BatchManager::new(
            "https://api.openai.com/v1".to_string(),
            dir.path(),
            std::time::Duration::from_secs(1),
        );
        let job = BatchJob {
            id: "b1".to_string(),
            status: BatchStatus::Completed,
            input_file_id: "file-in".to_string(),
            output_file_id: Some("file-out".to_string()),
            error_file_id: None,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
            counts: RequestCounts { total: 2, completed: 2, failed: 0 },
            metadata: HashMap::new(),
            cost_estimate: None,
        };
        manager.persist_job(&job).unwrap();
        let path = manager.job_path("b1");
        assert!(path.exists());
        let on_disk: BatchJob = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(on_disk.id, "b1");
        assert_eq!(on_disk.status, BatchStatus::Completed);
    }
}
