//! Optional task queue seam: async job dispatch with at-least-once delivery.
//!
//! The processor enqueues a job, polls for its result within a bounded
//! window, and falls back to in-process execution when the queue is absent,
//! rejects the job, or never completes it in time.

use async_trait::async_trait;
use dashmap::DashMap;
use findex_core::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Dispatch jobs and fetch their results. Implementations must tolerate
/// duplicate delivery; job payloads are self-contained JSON.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a job, returning its id.
    async fn enqueue(&self, kind: &str, payload: serde_json::Value) -> Result<String>;

    /// Fetch the result of a completed job; `None` while still pending.
    async fn fetch_result(&self, job_id: &str) -> Result<Option<serde_json::Value>>;
}

/// A queued job with its eventual result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// In-process queue. Jobs sit until an external worker (or a test) calls
/// `complete`; there is no implicit execution.
#[derive(Default)]
pub struct MemoryTaskQueue {
    jobs: DashMap<String, JobRecord>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a job finished with its result. Worker-side API.
    pub fn complete(&self, job_id: &str, result: serde_json::Value) -> bool {
        match self.jobs.get_mut(job_id) {
            Some(mut job) => {
                job.result = Some(result);
                true
            }
            None => false,
        }
    }

    /// Jobs that have not produced a result yet.
    pub fn pending(&self) -> Vec<JobRecord> {
        self.jobs
            .iter()
            .filter(|j| j.result.is_none())
            .map(|j| j.value().clone())
            .collect()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, kind: &str, payload: serde_json::Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.jobs.insert(
            id.clone(),
            JobRecord {
                id: id.clone(),
                kind: kind.to_string(),
                payload,
                result: None,
            },
        );
        Ok(id)
    }

    async fn fetch_result(&self, job_id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.jobs.get(job_id).and_then(|j| j.result.clone()))
    }
}
