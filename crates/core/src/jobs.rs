use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::{IngestProgress, ProgressReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ingestion,
    QuestionBatch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub subject: String,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// In-process registry of ingestion and question-batch jobs. Workers update
/// it through [`JobProgress`]; anything holding a clone can poll job state.
#[derive(Clone, Default)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, kind: JobKind, subject: impl Into<String>) -> Uuid {
        let job = Job {
            id: Uuid::new_v4(),
            kind,
            subject: subject.into(),
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        let id = job.id;
        self.write().insert(id, job);
        id
    }

    pub fn start(&self, id: Uuid) {
        let mut jobs = self.write();
        if let Some(job) = jobs.get_mut(&id) {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Processing;
                job.started_at = Some(Utc::now());
            }
        }
    }

    /// Raises the progress counter. Regressions and updates to finished
    /// jobs are ignored.
    pub fn set_progress(&self, id: Uuid, progress: u8) {
        let mut jobs = self.write();
        if let Some(job) = jobs.get_mut(&id) {
            if job.status.is_terminal() {
                return;
            }
            let progress = progress.min(100);
            if progress > job.progress {
                job.progress = progress;
            }
        }
    }

    pub fn complete(&self, id: Uuid) {
        let mut jobs = self.write();
        if let Some(job) = jobs.get_mut(&id) {
            if job.status.is_terminal() {
                return;
            }
            job.status = JobStatus::Completed;
            job.progress = 100;
            job.finished_at = Some(Utc::now());
        }
    }

    pub fn fail(&self, id: Uuid, error: impl Into<String>) {
        let mut jobs = self.write();
        if let Some(job) = jobs.get_mut(&id) {
            if job.status.is_terminal() {
                return;
            }
            job.status = JobStatus::Failed;
            job.error = Some(error.into());
            job.finished_at = Some(Utc::now());
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.read().get(&id).cloned()
    }

    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.read().values().cloned().collect();
        jobs.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        jobs
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Maps pipeline milestones onto a job's 0..=100 counter.
pub struct JobProgress {
    tracker: JobTracker,
    job_id: Uuid,
}

impl JobProgress {
    pub fn new(tracker: JobTracker, job_id: Uuid) -> Self {
        Self { tracker, job_id }
    }
}

impl ProgressReporter for JobProgress {
    fn report(&self, event: IngestProgress) {
        let progress = match event {
            IngestProgress::Extracted { .. } => 10,
            IngestProgress::RecordsBuilt { .. } => 20,
            IngestProgress::ParentBatches { done, total } => 20 + scaled(done, total, 20),
            IngestProgress::ChildBatches { done, total } => 40 + scaled(done, total, 55),
            IngestProgress::Completed => 100,
        };
        self.tracker.set_progress(self.job_id, progress);
    }
}

fn scaled(done: usize, total: usize, span: u8) -> u8 {
    if total == 0 {
        return span;
    }
    ((done.min(total) * span as usize) / total) as u8
}
