//! Shared fixtures for the HTTP-level tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use vanatu::AppState;
use vanatu::api::router;
use vanatu::config::VanatuConfig;
use vanatu::pipeline::{PipelineStep, ProcessLauncher, StepKind, StepStatus};
use vanatu::signature::SignatureAlgorithm;

pub const SECRET: &str = "test-secret";
pub const HEADER: &str = "X-Hub-Signature";

/// What a launched step looked like from the outside
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spawn {
    pub program: String,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
}

impl Spawn {
    pub fn new(program: &str, args: &[&str], working_dir: Option<&Path>) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(OsString::from).collect(),
            working_dir: working_dir.map(Path::to_path_buf),
        }
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    pub spawns: Mutex<Vec<Spawn>>,
    pub fail_on: Option<StepKind>,
    pub launch_error_on: Option<StepKind>,
    pub delay: Option<Duration>,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl RecordingLauncher {
    pub fn spawns(&self) -> Vec<Spawn> {
        self.spawns.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLauncher for RecordingLauncher {
    async fn launch(&self, step: &PipelineStep) -> io::Result<StepStatus> {
        self.spawns.lock().unwrap().push(Spawn {
            program: step.program.clone(),
            args: step.args.clone(),
            working_dir: step.working_dir.clone(),
        });
        if self.launch_error_on == Some(step.kind) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "not found"));
        }

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.fail_on == Some(step.kind) {
            Ok(StepStatus { code: Some(1) })
        } else {
            Ok(StepStatus { code: Some(0) })
        }
    }
}

pub fn test_config(content_dir: &Path) -> VanatuConfig {
    let mut config = VanatuConfig::from_toml(
        r#"
webhook_secret = "test-secret"
step_timeout_secs = 5

[repositories]
charcoal-client = "git+ssh+stuff"
existing = "git+ssh+existing"
"#,
    )
    .unwrap();
    config.content_dir = content_dir.to_path_buf();
    config
}

pub fn app(config: VanatuConfig, launcher: Arc<RecordingLauncher>) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(config, launcher).unwrap());
    (router(state.clone()), state)
}

pub fn sign(body: &[u8]) -> String {
    SignatureAlgorithm::Sha1
        .sign(SECRET.as_bytes(), body)
        .unwrap()
}

pub fn signed_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .header(HEADER, sign(body.as_bytes()))
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}
