use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::pipeline::Stage;
use crate::repo::SyncMode;

/// Represents the status of a pipeline run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for the repository lock
    Queued,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "success" => Some(JobStatus::Success),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// One pipeline run for one accepted delivery
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub repository: String,
    pub sync_mode: Option<SyncMode>,
    pub status: JobStatus,
    pub failed_stage: Option<Stage>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new job in Queued status
    pub fn new(repository: String) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            repository,
            sync_mode: None,
            status: JobStatus::Queued,
            started_at: Utc::now(),
            completed_at: None,
            failed_stage: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
    }

    pub fn record_sync(&mut self, sync_mode: SyncMode) {
        self.sync_mode = Some(sync_mode);
    }

    pub fn mark_success(&mut self) {
        self.status = JobStatus::Success;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, stage: Stage, error: String) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.failed_stage = Some(stage);
        self.error = Some(error);
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.started_at).num_milliseconds())
    }
}

/// Bounded in-memory history of recent jobs, newest last
#[derive(Debug)]
pub struct JobStore {
    jobs: VecDeque<Job>,
    max_jobs: usize,
}

impl JobStore {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            jobs: VecDeque::with_capacity(max_jobs),
            max_jobs: max_jobs.max(1),
        }
    }

    /// Add a job, evicting the oldest finished job when full
    pub fn add_job(&mut self, job: Job) {
        while self.jobs.len() >= self.max_jobs {
            let finished = self
                .jobs
                .iter()
                .position(|j| matches!(j.status, JobStatus::Success | JobStatus::Failed));
            match finished {
                Some(idx) => {
                    self.jobs.remove(idx);
                }
                None => {
                    self.jobs.pop_front();
                }
            }
        }
        self.jobs.push_back(job);
    }

    /// Apply `f` to the job with `id`; returns false if it is no longer tracked
    pub fn update_job<F>(&mut self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Job),
    {
        match self.jobs.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.jobs.iter().find(|j| j.id == id).cloned()
    }

    /// Most recent first
    pub fn get_recent_jobs(&self, limit: usize) -> Vec<Job> {
        self.jobs.iter().rev().take(limit).cloned().collect()
    }

    pub fn get_jobs_by_repository(&self, repository: &str, limit: usize) -> Vec<Job> {
        self.jobs
            .iter()
            .rev()
            .filter(|j| j.repository == repository)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_jobs_by_status(&self, status: JobStatus, limit: usize) -> Vec<Job> {
        self.jobs
            .iter()
            .rev()
            .filter(|j| j.status == status)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
