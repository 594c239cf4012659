//! Health and job status endpoints

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use std::collections::HashMap;

use crate::SharedState;
use crate::job::{Job, JobStatus};

const STATUS_JOB_LIMIT: usize = 10;

/// Root health check endpoint
/// Supports ?format=json for detailed JSON response
pub async fn root(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if params.get("format").map(String::as_str) == Some("json") {
        let store = state.job_store.lock().await;
        Json(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_seconds": state.start_time.elapsed().as_secs(),
            "running_jobs": store.count_by_status(JobStatus::Running),
            "total_repositories": state.config.repositories.len(),
            "status": "healthy"
        }))
        .into_response()
    } else {
        "vanatu - healthy".into_response()
    }
}

/// Returns server info and recent jobs
/// Supports query parameters: ?repository=name or ?status=failed
pub async fn status(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let store = state.job_store.lock().await;

    let jobs: Vec<Job> = if let Some(repository) = params.get("repository") {
        store.get_jobs_by_repository(repository, STATUS_JOB_LIMIT)
    } else if let Some(status) = params.get("status").and_then(|s| JobStatus::parse(s)) {
        store.get_jobs_by_status(status, STATUS_JOB_LIMIT)
    } else {
        store.get_recent_jobs(STATUS_JOB_LIMIT)
    };

    let mut repositories: Vec<&String> = state.config.repositories.keys().collect();
    repositories.sort();

    Json(json!({
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "jobs": {
            "queued_count": store.count_by_status(JobStatus::Queued),
            "running_count": store.count_by_status(JobStatus::Running),
            "tracked_count": store.len(),
            "filtered": jobs,
            "filtered_count": jobs.len(),
        },
        "config": {
            "content_dir": state.config.content_dir,
            "build_target": state.config.build_target,
            "repositories": repositories,
        }
    }))
}

/// Returns a specific job by ID
pub async fn get_job(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let store = state.job_store.lock().await;
    match store.get_job(&id) {
        Some(job) => Json(job).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Job not found"})),
        )
            .into_response(),
    }
}
