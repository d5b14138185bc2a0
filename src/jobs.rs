//! In-process registry of publish jobs.
//!
//! One worker thread per job is the sole writer of its record; pollers and
//! the cancel path only read fields or flip the status flag. The table mutex
//! is the only lock. Jobs are ephemeral: a record is evicted the first time a
//! poller observes a terminal status, so the result is delivered at most
//! once.

use anyhow::{Result, bail};
use rand::RngCore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::PublishError;
use crate::publish::PublishOutcome;

pub type JobId = String;

/// `Running -> Cancelling -> Done|Error`, or straight to a terminal state.
/// `Cancelling` is a request-to-stop flag the worker observes at its
/// checkpoints, never an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Cancelling,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error)
    }
}

#[derive(Debug)]
struct JobRecord {
    status: JobStatus,
    current_index: usize,
    total_count: usize,
    current_label: String,
    errors: Vec<String>,
    result: Option<PublishOutcome>,
}

impl JobRecord {
    fn new(total_count: usize) -> Self {
        Self {
            status: JobStatus::Running,
            current_index: 0,
            total_count,
            current_label: String::new(),
            errors: Vec::new(),
            result: None,
        }
    }
}

/// Point-in-time view of a job, safe to hand to pollers.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub current_index: usize,
    pub total_count: usize,
    pub current_label: String,
    pub errors: Vec<String>,
    pub result: Option<PublishOutcome>,
}

fn new_job_id() -> JobId {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Process-wide table of in-flight publish jobs. Create once at startup.
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a job record and start its worker. Returns immediately with
    /// the new job id.
    pub fn submit<F>(self: &Arc<Self>, total_count: usize, work: F) -> JobId
    where
        F: FnOnce(&JobHandle) -> Result<PublishOutcome, PublishError> + Send + 'static,
    {
        let id = new_job_id();
        self.lock().insert(id.clone(), JobRecord::new(total_count));

        let handle = JobHandle {
            registry: Arc::clone(self),
            id: id.clone(),
        };
        let registry = Arc::clone(self);
        let worker_id = id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("publish-{id}"))
            .spawn(move || {
                tracing::info!(job = %worker_id, "publish worker started");
                let outcome = work(&handle);
                registry.finish(&worker_id, outcome);
            });
        if let Err(err) = spawned {
            let mut jobs = self.lock();
            if let Some(job) = jobs.get_mut(&id) {
                job.errors.push(format!("failed to start worker: {err}"));
                job.status = JobStatus::Error;
            }
        }
        id
    }

    /// Ask a running job to stop at its next checkpoint. Already-terminal
    /// jobs are left alone; an unknown id is an error, not a silent no-op.
    pub fn request_cancel(&self, id: &str) -> Result<()> {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(id) else {
            bail!("unknown job: {id}");
        };
        if job.status == JobStatus::Running {
            tracing::info!(job = %id, "cancellation requested");
            job.status = JobStatus::Cancelling;
        }
        Ok(())
    }

    /// Current progress snapshot, or `None` for an unknown id. Observing a
    /// terminal status evicts the record: the snapshot carries the result and
    /// a repeat poll reports the job as unknown.
    pub fn poll(&self, id: &str) -> Option<JobSnapshot> {
        let mut jobs = self.lock();
        if jobs.get(id)?.status.is_terminal() {
            let job = jobs.remove(id)?;
            return Some(snapshot(id, &job));
        }
        jobs.get(id).map(|job| snapshot(id, job))
    }

    fn finish(&self, id: &str, outcome: Result<PublishOutcome, PublishError>) {
        let mut jobs = self.lock();
        let Some(job) = jobs.get_mut(id) else {
            return;
        };
        match outcome {
            Ok(result) => {
                tracing::info!(job = %id, tracks = result.track_count, "publish job done");
                job.result = Some(result);
                job.status = JobStatus::Done;
            }
            Err(err) => {
                tracing::warn!(job = %id, "publish job failed: {err}");
                job.errors.push(err.to_string());
                job.status = JobStatus::Error;
            }
        }
    }
}

fn snapshot(id: &str, job: &JobRecord) -> JobSnapshot {
    JobSnapshot {
        id: id.to_string(),
        status: job.status,
        current_index: job.current_index,
        total_count: job.total_count,
        current_label: job.current_label.clone(),
        errors: job.errors.clone(),
        result: job.result.clone(),
    }
}

/// Handed to the worker: its only way to touch the job record.
pub struct JobHandle {
    registry: Arc<JobRegistry>,
    id: JobId,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_progress(&self, index: usize, total: usize, label: &str) {
        let mut jobs = self.registry.lock();
        if let Some(job) = jobs.get_mut(&self.id) {
            job.current_index = index;
            job.total_count = total;
            job.current_label = label.to_string();
        }
    }

    pub fn push_error(&self, message: String) {
        let mut jobs = self.registry.lock();
        if let Some(job) = jobs.get_mut(&self.id) {
            job.errors.push(message);
        }
    }

    /// True once a cancel request has been observed for this job.
    pub fn is_cancelled(&self) -> bool {
        let jobs = self.registry.lock();
        jobs.get(&self.id)
            .is_some_and(|job| job.status == JobStatus::Cancelling)
    }
}
