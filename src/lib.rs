pub mod api;
pub mod config;
pub mod error;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod repo;
pub mod signature;
pub mod webhook;

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use config::VanatuConfig;
use error::VanatuError;
use job::JobStore;
use pipeline::{BuildSettings, ProcessLauncher};
use repo::RepoLocks;

pub struct AppState {
    pub config: VanatuConfig,
    pub build: BuildSettings,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub repo_locks: RepoLocks,
    pub job_store: Mutex<JobStore>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: VanatuConfig,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<Self, VanatuError> {
        let build = BuildSettings::from_config(&config)?;
        let job_store = Mutex::new(JobStore::new(config.max_jobs));
        Ok(Self {
            config,
            build,
            launcher,
            repo_locks: RepoLocks::new(),
            job_store,
            start_time: Instant::now(),
            started_at: Utc::now(),
        })
    }
}

pub type SharedState = Arc<AppState>;
