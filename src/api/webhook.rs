//! Webhook handler for check completion events

use axum::{
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};

use crate::SharedState;
use crate::job::Job;
use crate::pipeline::{PipelineOutcome, ProcessPipeline, build_steps};
use crate::repo::{RepoSyncEngine, RepositoryTarget, SyncMode};
use crate::signature;
use crate::webhook::{WebhookEvent, should_process};

/// Ways a delivery is turned away
#[derive(Debug, thiserror::Error)]
pub enum WebhookRejection {
    #[error("signature verification failed")]
    Unauthenticated,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("pipeline failed")]
    PipelineFailed,
}

impl IntoResponse for WebhookRejection {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            WebhookRejection::Unauthenticated => (StatusCode::FORBIDDEN, "Forbidden"),
            WebhookRejection::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "Invalid payload"),
            WebhookRejection::PipelineFailed => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Pipeline failed")
            }
        };
        (status, body).into_response()
    }
}

/// Handles the webhook POST request.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, WebhookRejection> {
    // Authenticate against the raw bytes before looking at the payload
    let signature_header = headers
        .get(state.config.signature_header.as_str())
        .and_then(|v| v.to_str().ok());
    let secret = state.config.secret().unwrap_or_default();
    if !signature::verify_with(
        state.config.signature_algorithm,
        &body,
        signature_header,
        secret.as_bytes(),
    ) {
        warn!(
            "Signature verification failed (header '{}' {})",
            state.config.signature_header,
            if signature_header.is_some() {
                "mismatched"
            } else {
                "missing"
            }
        );
        return Err(WebhookRejection::Unauthenticated);
    }

    let event = WebhookEvent::parse(&body).map_err(|e| {
        warn!("Rejecting delivery: {}", e);
        WebhookRejection::InvalidPayload(e.to_string())
    })?;

    if !should_process(&event) {
        info!(
            "Ignoring '{}' event (conclusion {:?})",
            event.action, event.conclusion
        );
        return Ok(StatusCode::OK);
    }

    let repository = event.repository_ref().map_err(|e| {
        warn!("Rejecting delivery: {}", e);
        WebhookRejection::InvalidPayload(e.to_string())
    })?;
    let Some(repository) = repository.as_ref() else {
        warn!("Rejecting delivery: completed event without repository");
        return Err(WebhookRejection::InvalidPayload(
            "completed event without repository".to_string(),
        ));
    };

    let target = match RepositoryTarget::resolve(repository, &state.config) {
        Ok(Some(target)) => target,
        Ok(None) => {
            warn!(
                "No clone URL known for repository '{}', skipping.",
                repository.name()
            );
            return Ok(StatusCode::OK);
        }
        Err(e) => {
            warn!("Rejecting delivery: {}", e);
            return Err(WebhookRejection::InvalidPayload(e.to_string()));
        }
    };

    let job = Job::new(target.name.clone());
    let job_id = job.id.clone();
    state.job_store.lock().await.add_job(job);
    info!("Created job {} for repository '{}'", job_id, target.name);

    // The pipeline runs in its own task so a dropped connection never cancels it
    let task = tokio::spawn(execute_job(state.clone(), job_id.clone(), target));

    if !state.config.wait_for_pipeline {
        return Ok(StatusCode::OK);
    }

    match task.await {
        Ok(outcome) if outcome.is_success() => Ok(StatusCode::OK),
        Ok(_) => Err(WebhookRejection::PipelineFailed),
        Err(e) => {
            error!("Job {} task aborted: {}", job_id, e);
            Err(WebhookRejection::PipelineFailed)
        }
    }
}

/// Run sync, install and build for one target while holding its repository lock.
async fn execute_job(state: SharedState, job_id: String, target: RepositoryTarget) -> PipelineOutcome {
    let _guard = state.repo_locks.acquire(&target.name).await;

    state
        .job_store
        .lock()
        .await
        .update_job(&job_id, |j| j.mark_running());

    let pipeline = ProcessPipeline::new(state.launcher.as_ref(), state.config.step_timeout());
    let synced = RepoSyncEngine.sync(&pipeline, &target).await;
    let mode = synced.last_step().and_then(SyncMode::from_step);
    if let Some(mode) = mode {
        state
            .job_store
            .lock()
            .await
            .update_job(&job_id, |j| j.record_sync(mode));
    }

    let outcome = if synced.is_success() {
        info!(
            "Job {} - repository '{}' synced into {}. Installing and building.",
            job_id,
            target.name,
            target.dir.display()
        );
        let rest = pipeline.run(build_steps(&target.dir, &state.build)).await;
        synced.chain(rest)
    } else {
        synced
    };

    let mut store = state.job_store.lock().await;
    match &outcome {
        PipelineOutcome::Completed { .. } => {
            let mut elapsed = None;
            store.update_job(&job_id, |j| {
                j.mark_success();
                elapsed = j.duration_ms();
            });
            info!(
                "Job {} completed successfully in {}ms.",
                job_id,
                elapsed.unwrap_or_default()
            );
        }
        PipelineOutcome::Failed { step, error, .. } => {
            error!(
                "Job {} failed at {} stage: {}",
                job_id,
                step.stage(),
                error
            );
            store.update_job(&job_id, |j| j.mark_failed(step.stage(), error.to_string()));
        }
    }

    outcome
}
