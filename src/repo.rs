//! Local checkouts: target resolution, clone-vs-pull decision and per-repository locks

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::config::VanatuConfig;
use crate::error::VanatuError;
use crate::pipeline::{PipelineOutcome, PipelineStep, ProcessPipeline, StepKind};
use crate::webhook::RepositoryRef;

/// Check that a repository name is a single plain path component.
///
/// This keeps `content_dir.join(name)` injective and inside the content root.
pub fn validate_repo_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("repository name is empty".to_string());
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(format!("repository name '{}' contains a path separator", name));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(format!("repository name '{}' is not a plain directory name", name)),
    }
}

/// Where a repository lives locally and where it is cloned from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryTarget {
    pub name: String,
    pub dir: PathBuf,
    pub remote_url: String,
}

impl RepositoryTarget {
    pub fn new(content_dir: &Path, name: &str, remote_url: &str) -> Result<Self, VanatuError> {
        validate_repo_name(name).map_err(VanatuError::PayloadInvalid)?;
        Ok(Self {
            name: name.to_string(),
            dir: content_dir.join(name),
            remote_url: remote_url.to_string(),
        })
    }

    /// Resolve the payload's repository against configuration.
    ///
    /// An inline clone URL wins over the configured one. Returns Ok(None) when
    /// no URL is known for the repository.
    pub fn resolve(
        repository: &RepositoryRef,
        config: &VanatuConfig,
    ) -> Result<Option<Self>, VanatuError> {
        let name = repository.name();
        validate_repo_name(name).map_err(VanatuError::PayloadInvalid)?;

        let url = repository
            .inline_url()
            .or_else(|| config.clone_url_for(name));
        match url {
            Some(url) => Self::new(&config.content_dir, name, url).map(Some),
            None => Ok(None),
        }
    }
}

/// Local state of a checkout, probed once per delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Directory absent: `git clone`
    Clone,
    /// Directory present: `git pull` inside it
    Pull,
}

impl SyncMode {
    pub fn from_step(kind: StepKind) -> Option<Self> {
        match kind {
            StepKind::Clone => Some(SyncMode::Clone),
            StepKind::Pull => Some(SyncMode::Pull),
            StepKind::Install | StepKind::Build => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RepoSyncEngine;

impl RepoSyncEngine {
    pub async fn probe(&self, target: &RepositoryTarget) -> SyncMode {
        match tokio::fs::try_exists(&target.dir).await {
            Ok(true) => SyncMode::Pull,
            Ok(false) => SyncMode::Clone,
            Err(e) => {
                // unreadable parent: let git report the real problem
                warn!("Could not probe '{}': {}", target.dir.display(), e);
                SyncMode::Clone
            }
        }
    }

    pub fn sync_step(&self, target: &RepositoryTarget, mode: SyncMode) -> PipelineStep {
        match mode {
            SyncMode::Clone => PipelineStep::clone_repo(&target.remote_url, &target.dir),
            SyncMode::Pull => PipelineStep::pull(&target.dir),
        }
    }

    /// Probe the target and build the matching sync step.
    pub async fn plan(&self, target: &RepositoryTarget) -> (SyncMode, PipelineStep) {
        let mode = self.probe(target).await;
        debug!("Repository '{}' sync mode: {:?}", target.name, mode);
        (mode, self.sync_step(target, mode))
    }

    /// Clone or pull the target as a single-step run.
    pub async fn sync(
        &self,
        pipeline: &ProcessPipeline<'_>,
        target: &RepositoryTarget,
    ) -> PipelineOutcome {
        let (_, step) = self.plan(target).await;
        pipeline.run(vec![step]).await
    }
}

/// One async lock per repository name.
///
/// Deliveries for the same repository serialize; different repositories run
/// concurrently.
#[derive(Default)]
pub struct RepoLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, repo_name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // drop entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(
                locks
                    .entry(repo_name.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Create the content root if needed and list the checkouts already in it.
pub async fn prepare_content_dir(content_dir: &Path) -> Result<Vec<String>, VanatuError> {
    if !tokio::fs::try_exists(content_dir).await? {
        info!("Content directory {} not found, creating...", content_dir.display());
        tokio::fs::create_dir_all(content_dir).await?;
    }

    let mut checkouts = Vec::new();
    let mut entries = tokio::fs::read_dir(content_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            checkouts.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    checkouts.sort();
    Ok(checkouts)
}
