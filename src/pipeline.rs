//! Sequential execution of the sync -> install -> build steps
//!
//! Every step is an external process with inherited stdio. A step succeeds only
//! when its process exits with status 0; the first failure stops the run.

use async_trait::async_trait;
use serde::Serialize;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info};

use crate::config::VanatuConfig;
use crate::error::VanatuError;

/// Which command a step runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Clone,
    Pull,
    Install,
    Build,
}

impl StepKind {
    pub fn stage(&self) -> Stage {
        match self {
            StepKind::Clone | StepKind::Pull => Stage::Sync,
            StepKind::Install => Stage::Install,
            StepKind::Build => Stage::Build,
        }
    }
}

/// Step identity reported on failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Sync,
    Install,
    Build,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Sync => "sync",
            Stage::Install => "install",
            Stage::Build => "build",
        };
        f.write_str(name)
    }
}

/// One external command of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStep {
    pub kind: StepKind,
    pub program: String,
    /// Paths are passed through as-is, so they need not be UTF-8
    pub args: Vec<OsString>,
    /// None means the process default working directory
    pub working_dir: Option<PathBuf>,
}

impl PipelineStep {
    pub fn clone_repo(remote_url: &str, target_dir: &Path) -> Self {
        Self {
            kind: StepKind::Clone,
            program: "git".to_string(),
            args: vec![
                OsString::from("clone"),
                OsString::from(remote_url),
                target_dir.as_os_str().to_owned(),
            ],
            working_dir: None,
        }
    }

    pub fn pull(target_dir: &Path) -> Self {
        Self {
            kind: StepKind::Pull,
            program: "git".to_string(),
            args: vec![OsString::from("pull")],
            working_dir: Some(target_dir.to_path_buf()),
        }
    }

    pub fn install(target_dir: &Path, settings: &BuildSettings) -> Self {
        Self {
            kind: StepKind::Install,
            program: settings.install_program.clone(),
            args: settings.install_args.iter().map(OsString::from).collect(),
            working_dir: Some(target_dir.to_path_buf()),
        }
    }

    pub fn build(target_dir: &Path, settings: &BuildSettings) -> Self {
        Self {
            kind: StepKind::Build,
            program: "npm".to_string(),
            args: vec![
                OsString::from("run"),
                OsString::from(&settings.build_target),
            ],
            working_dir: Some(target_dir.to_path_buf()),
        }
    }

    /// Program and arguments joined for log lines
    pub fn command_line(&self) -> String {
        let mut cmd = self.program.clone();
        for arg in &self.args {
            cmd.push(' ');
            cmd.push_str(&arg.to_string_lossy());
        }
        cmd
    }
}

/// The install and build commands shared by every run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    pub install_program: String,
    pub install_args: Vec<String>,
    pub build_target: String,
}

impl BuildSettings {
    pub fn from_config(config: &VanatuConfig) -> Result<Self, VanatuError> {
        let mut parts = config.install_command.split_whitespace();
        let install_program = parts
            .next()
            .ok_or_else(|| VanatuError::ConfigError("install_command is empty".to_string()))?
            .to_string();
        Ok(Self {
            install_program,
            install_args: parts.map(String::from).collect(),
            build_target: config.build_target.clone(),
        })
    }
}

/// Steps that follow a successful sync: install, then build.
pub fn build_steps(target_dir: &Path, settings: &BuildSettings) -> Vec<PipelineStep> {
    vec![
        PipelineStep::install(target_dir, settings),
        PipelineStep::build(target_dir, settings),
    ]
}

/// Exit information of a finished process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepStatus {
    /// None when the process was terminated by a signal
    pub code: Option<i32>,
}

impl StepStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for StepStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// Spawns a step's process and resolves once it has exited
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, step: &PipelineStep) -> io::Result<StepStatus>;
}

/// Launches real OS processes through tokio
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

#[async_trait]
impl ProcessLauncher for SystemLauncher {
    async fn launch(&self, step: &PipelineStep) -> io::Result<StepStatus> {
        let mut cmd = Command::new(&step.program);
        cmd.args(&step.args).kill_on_drop(true);
        if let Some(dir) = &step.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let status = cmd.status().await?;
        Ok(status.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("process exited with {}", describe_code(.code))]
    NonZeroExit { code: Option<i32> },

    #[error("failed to launch process: {0}")]
    Launch(#[source] io::Error),

    #[error("timed out after {after:?}")]
    TimedOut { after: Duration },
}

fn describe_code(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

/// Aggregate result of a pipeline run
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed {
        steps: Vec<StepKind>,
    },
    Failed {
        /// Zero-based position of the failing step
        index: usize,
        step: StepKind,
        error: StepError,
    },
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineOutcome::Completed { .. })
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            PipelineOutcome::Completed { .. } => None,
            PipelineOutcome::Failed { step, .. } => Some(step.stage()),
        }
    }

    /// The last step that was started
    pub fn last_step(&self) -> Option<StepKind> {
        match self {
            PipelineOutcome::Completed { steps } => steps.last().copied(),
            PipelineOutcome::Failed { step, .. } => Some(*step),
        }
    }

    /// Append the outcome of a run that started after this one completed.
    ///
    /// A failure here is returned unchanged; indices of a later failure are
    /// shifted past the steps already completed.
    pub fn chain(self, next: PipelineOutcome) -> PipelineOutcome {
        match (self, next) {
            (
                PipelineOutcome::Completed { mut steps },
                PipelineOutcome::Completed { steps: more },
            ) => {
                steps.extend(more);
                PipelineOutcome::Completed { steps }
            }
            (PipelineOutcome::Completed { steps }, PipelineOutcome::Failed { index, step, error }) => {
                PipelineOutcome::Failed {
                    index: steps.len() + index,
                    step,
                    error,
                }
            }
            (failed, _) => failed,
        }
    }
}

pub struct ProcessPipeline<'a> {
    launcher: &'a dyn ProcessLauncher,
    step_timeout: Duration,
}

impl<'a> ProcessPipeline<'a> {
    pub fn new(launcher: &'a dyn ProcessLauncher, step_timeout: Duration) -> Self {
        Self {
            launcher,
            step_timeout,
        }
    }

    /// Run one step to completion under the step deadline.
    pub async fn run_step(&self, step: &PipelineStep) -> Result<(), StepError> {
        let cwd = step
            .working_dir
            .as_deref()
            .map(|d| d.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        info!("Running (cwd = '{}'): {}", cwd, step.command_line());

        let status = tokio::time::timeout(self.step_timeout, self.launcher.launch(step))
            .await
            .map_err(|_| StepError::TimedOut {
                after: self.step_timeout,
            })?
            .map_err(StepError::Launch)?;

        if status.success() {
            Ok(())
        } else {
            Err(StepError::NonZeroExit { code: status.code })
        }
    }

    /// Run `steps` in order, stopping at the first failure.
    pub async fn run(&self, steps: Vec<PipelineStep>) -> PipelineOutcome {
        let mut completed = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            if let Err(error) = self.run_step(step).await {
                error!(
                    stage = %step.kind.stage(),
                    command = %step.command_line(),
                    "Pipeline failed at step {} ({}): {}",
                    index + 1,
                    step.kind.stage(),
                    error
                );
                return PipelineOutcome::Failed {
                    index,
                    step: step.kind,
                    error,
                };
            }
            info!("{} step finished: {}", step.kind.stage(), step.command_line());
            completed.push(step.kind);
        }
        PipelineOutcome::Completed { steps: completed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fails the step whose kind matches `fail`, records everything it sees
    struct ScriptedLauncher {
        fail: Option<StepKind>,
        launch_error: bool,
        seen: Mutex<Vec<StepKind>>,
    }

    impl ScriptedLauncher {
        fn new(fail: Option<StepKind>) -> Self {
            Self {
                fail,
                launch_error: false,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ProcessLauncher for ScriptedLauncher {
        async fn launch(&self, step: &PipelineStep) -> io::Result<StepStatus> {
            self.seen.lock().unwrap().push(step.kind);
            if self.fail == Some(step.kind) {
                if self.launch_error {
                    return Err(io::Error::new(io::ErrorKind::NotFound, "npm: not found"));
                }
                return Ok(StepStatus { code: Some(1) });
            }
            Ok(StepStatus { code: Some(0) })
        }
    }

    fn settings() -> BuildSettings {
        BuildSettings {
            install_program: "npm".to_string(),
            install_args: vec!["ci".to_string()],
            build_target: "build:vanatu".to_string(),
        }
    }

    fn steps() -> Vec<PipelineStep> {
        let dir = Path::new("/test/vanatu/existing");
        let mut steps = vec![PipelineStep::pull(dir)];
        steps.extend(build_steps(dir, &settings()));
        steps
    }

    #[test]
    fn test_step_shapes() {
        let dir = Path::new("/test/vanatu/charcoal-client");
        let clone = PipelineStep::clone_repo("git+ssh+stuff", dir);
        assert_eq!(clone.command_line(), "git clone git+ssh+stuff /test/vanatu/charcoal-client");
        assert_eq!(clone.working_dir, None);

        let steps = build_steps(dir, &settings());
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].command_line(), "npm ci");
        assert_eq!(steps[0].working_dir.as_deref(), Some(dir));
        assert_eq!(steps[1].command_line(), "npm run build:vanatu");
        assert_eq!(steps[1].working_dir.as_deref(), Some(dir));
    }

    #[test]
    fn test_chain_shifts_later_failure() {
        let synced = PipelineOutcome::Completed {
            steps: vec![StepKind::Clone],
        };
        let rest = PipelineOutcome::Failed {
            index: 1,
            step: StepKind::Build,
            error: StepError::NonZeroExit { code: Some(2) },
        };

        match synced.chain(rest) {
            PipelineOutcome::Failed { index, step, .. } => {
                assert_eq!(index, 2);
                assert_eq!(step, StepKind::Build);
            }
            other => panic!("expected failure, got {:?}", other),
        }

        let done = PipelineOutcome::Completed {
            steps: vec![StepKind::Pull],
        }
        .chain(PipelineOutcome::Completed {
            steps: vec![StepKind::Install, StepKind::Build],
        });
        assert_eq!(done.last_step(), Some(StepKind::Build));
        assert!(done.is_success());

        let failed_sync = PipelineOutcome::Failed {
            index: 0,
            step: StepKind::Pull,
            error: StepError::NonZeroExit { code: Some(1) },
        };
        let kept = failed_sync.chain(PipelineOutcome::Completed { steps: vec![] });
        assert_eq!(kept.failed_stage(), Some(Stage::Sync));
    }

    #[cfg(unix)]
    #[test]
    fn test_clone_target_keeps_non_utf8_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = Path::new(OsStr::from_bytes(b"/srv/caf\xe9/charcoal-client"));
        let step = PipelineStep::clone_repo("git+ssh+stuff", dir);
        assert_eq!(step.args[2].as_os_str(), dir.as_os_str());

        let build = PipelineStep::build(dir, &settings());
        assert_eq!(build.working_dir.as_deref(), Some(dir));
    }

    #[test]
    fn test_stage_mapping() {
        assert_eq!(StepKind::Clone.stage(), Stage::Sync);
        assert_eq!(StepKind::Pull.stage(), Stage::Sync);
        assert_eq!(StepKind::Install.stage().to_string(), "install");
        assert_eq!(StepKind::Build.stage().to_string(), "build");
    }

    #[test]
    fn test_build_settings_split_install_command() {
        let mut config = crate::config::VanatuConfig::from_toml("webhook_secret = \"s\"").unwrap();
        config.install_command = "pnpm install --frozen-lockfile".to_string();
        let settings = BuildSettings::from_config(&config).unwrap();
        assert_eq!(settings.install_program, "pnpm");
        assert_eq!(settings.install_args, vec!["install", "--frozen-lockfile"]);

        config.install_command = "   ".to_string();
        assert!(BuildSettings::from_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_all_steps_run_in_order() {
        let launcher = ScriptedLauncher::new(None);
        let pipeline = ProcessPipeline::new(&launcher, Duration::from_secs(5));

        let outcome = pipeline.run(steps()).await;

        assert!(outcome.is_success());
        assert_eq!(
            *launcher.seen.lock().unwrap(),
            vec![StepKind::Pull, StepKind::Install, StepKind::Build]
        );
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_steps() {
        let launcher = ScriptedLauncher::new(Some(StepKind::Install));
        let pipeline = ProcessPipeline::new(&launcher, Duration::from_secs(5));

        let outcome = pipeline.run(steps()).await;

        match outcome {
            PipelineOutcome::Failed { index, step, error } => {
                assert_eq!(index, 1);
                assert_eq!(step, StepKind::Install);
                assert!(matches!(error, StepError::NonZeroExit { code: Some(1) }));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(
            *launcher.seen.lock().unwrap(),
            vec![StepKind::Pull, StepKind::Install]
        );
    }

    #[tokio::test]
    async fn test_launch_error_is_a_failure() {
        let mut launcher = ScriptedLauncher::new(Some(StepKind::Pull));
        launcher.launch_error = true;
        let pipeline = ProcessPipeline::new(&launcher, Duration::from_secs(5));

        let outcome = pipeline.run(steps()).await;

        assert_eq!(outcome.failed_stage(), Some(Stage::Sync));
        assert!(matches!(
            outcome,
            PipelineOutcome::Failed {
                error: StepError::Launch(_),
                ..
            }
        ));
        assert_eq!(*launcher.seen.lock().unwrap(), vec![StepKind::Pull]);
    }

    #[test]
    fn test_signal_termination_is_not_success() {
        assert!(!StepStatus { code: None }.success());
        assert!(!StepStatus { code: Some(2) }.success());
        assert!(StepStatus { code: Some(0) }.success());
    }

    #[cfg(unix)]
    fn shell_step(kind: StepKind, script: &str) -> PipelineStep {
        PipelineStep {
            kind,
            program: "sh".to_string(),
            args: vec![OsString::from("-c"), OsString::from(script)],
            working_dir: None,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_launcher_reports_exit_codes() {
        let launcher = SystemLauncher;
        let pipeline = ProcessPipeline::new(&launcher, Duration::from_secs(10));

        assert!(pipeline.run_step(&shell_step(StepKind::Build, "exit 0")).await.is_ok());
        let err = pipeline
            .run_step(&shell_step(StepKind::Build, "exit 3"))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::NonZeroExit { code: Some(3) }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_launcher_uses_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "x").unwrap();
        let launcher = SystemLauncher;
        let pipeline = ProcessPipeline::new(&launcher, Duration::from_secs(10));

        let mut step = shell_step(StepKind::Install, "test -f marker");
        assert!(pipeline.run_step(&step).await.is_err());

        step.working_dir = Some(dir.path().to_path_buf());
        assert!(pipeline.run_step(&step).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_executable_is_launch_error() {
        let launcher = SystemLauncher;
        let pipeline = ProcessPipeline::new(&launcher, Duration::from_secs(10));
        let step = PipelineStep {
            kind: StepKind::Install,
            program: "definitely-not-a-real-program-vanatu".to_string(),
            args: vec![],
            working_dir: None,
        };

        let err = pipeline.run_step(&step).await.unwrap_err();
        assert!(matches!(err, StepError::Launch(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_step_times_out() {
        let launcher = SystemLauncher;
        let pipeline = ProcessPipeline::new(&launcher, Duration::from_millis(200));
        let steps = vec![
            shell_step(StepKind::Pull, "sleep 30"),
            shell_step(StepKind::Install, "exit 0"),
        ];

        let outcome = pipeline.run(steps).await;

        match outcome {
            PipelineOutcome::Failed { step, error, .. } => {
                assert_eq!(step, StepKind::Pull);
                assert!(matches!(error, StepError::TimedOut { .. }));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
