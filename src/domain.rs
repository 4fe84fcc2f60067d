use serde::{Deserialize, Serialize};

/// A single input → output conversion task.
///
/// `id` is assigned by the job store on insert and stays stable for the
/// lifetime of the job; queue copies carry only the id and paths while the
/// `done`/`failed`/`retries` bookkeeping lives in the store row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    #[serde(default)]
    pub id: i64,
    #[serde(rename = "path")]
    pub input_path: String,
    #[serde(rename = "outPath")]
    pub output_path: String,
}

/// Terminal failure bookkeeping for a job: the combined output of the last
/// failing subprocess (possibly empty) plus the error headline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub id: i64,
    pub job_id: i64,
    pub process_output: String,
    pub error: String,
    pub job: Job,
}

/// Public snapshot of a worker's state, broadcast on every step transition
/// and whole-percent progress tick.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    pub id: usize,
    pub active: bool,
    pub step: String,
    pub progress: f64,
    pub job: Option<Job>,
}

impl WorkerInfo {
    pub fn idle(id: usize) -> Self {
        Self {
            id,
            active: false,
            step: String::new(),
            progress: 0.0,
            job: None,
        }
    }
}

/// Events fanned out to observers. The wire shape is `{type, ...payload}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    QueueUpdate { jobs: Vec<Job> },
    WorkerProgress(WorkerInfo),
}
