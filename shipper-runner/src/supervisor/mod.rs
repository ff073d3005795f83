//! Process supervisor
//!
//! Owns the child process from start to exit and sequences the shutdown of
//! the capture pipeline around it:
//!
//! ```text
//! Starting -> Running -> Draining -> Terminated
//! ```
//!
//! - Starting: the uploader and signal handlers are set up, then the child
//!   is spawned and its output wired into two stream readers.
//! - Running: the child runs; signals are relayed to it.
//! - Draining: the child is gone. The relay stops, the readers finish the
//!   pipes, the queue is closed and the uploader gets until the drain
//!   deadline to deliver what is left.
//! - Terminated: the child's exit code is handed back to `main`.

mod exit;
mod signals;

pub use exit::exit_code;
pub use signals::SignalRelay;

use anyhow::{Context, Result};
use shipper_core::domain::log::Stream;
use std::ffi::OsString;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::config::{ChildEnv, PipelineSettings};
use crate::repository::LogRepository;
use crate::service::{BatchUploader, DeliveryQueue, StreamReader, UploadStats};

/// Lifecycle of the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    Draining,
    Terminated,
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorState::Starting => write!(f, "starting"),
            SupervisorState::Running => write!(f, "running"),
            SupervisorState::Draining => write!(f, "draining"),
            SupervisorState::Terminated => write!(f, "terminated"),
        }
    }
}

/// The program to run and the environment it gets
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: ChildEnv,
}

/// Runs one child process and ships its output
pub struct Supervisor {
    child: ChildSpec,
    repository: Arc<dyn LogRepository>,
    settings: PipelineSettings,
    state: SupervisorState,
}

impl Supervisor {
    /// Creates a supervisor
    ///
    /// # Arguments
    /// * `child` - Program, arguments and environment of the child
    /// * `repository` - Where captured lines are delivered
    /// * `settings` - Pipeline tunables
    pub fn new(
        child: ChildSpec,
        repository: Arc<dyn LogRepository>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            child,
            repository,
            settings,
            state: SupervisorState::Starting,
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Runs the child to completion and returns the code to exit with
    ///
    /// Errors are only returned for failures before the child runs.
    /// Everything after that, including log delivery trouble, is logged and
    /// never changes the returned exit code.
    pub async fn run(&mut self) -> Result<i32> {
        let (queue, receiver) = DeliveryQueue::bounded(self.settings.max_batch_size);

        let relay = SignalRelay::install().context("Error setting up signal relay")?;

        let uploader = tokio::spawn(
            BatchUploader::new(
                queue.clone(),
                receiver,
                Arc::clone(&self.repository),
                &self.settings,
            )
            .run(),
        );

        let mut child = match self.spawn_child() {
            Ok(child) => child,
            Err(e) => {
                queue.close();
                return Err(e);
            }
        };

        // Pipes buffer whatever the child writes before the readers get
        // scheduled, so no early output is lost.
        let stdout = child
            .stdout
            .take()
            .context("Error setting up stdout redirection")?;
        let stderr = child
            .stderr
            .take()
            .context("Error setting up stderr redirection")?;

        let stdout_reader = tokio::spawn(
            StreamReader::new(
                Stream::Stdout,
                stdout,
                tokio::io::stdout(),
                queue.clone(),
                &self.settings,
            )
            .run(),
        );
        let stderr_reader = tokio::spawn(
            StreamReader::new(
                Stream::Stderr,
                stderr,
                tokio::io::stderr(),
                queue.clone(),
                &self.settings,
            )
            .run(),
        );

        let pid = child.id().context("Child exited before it could be supervised")?;
        let relay = relay.start(pid);
        self.transition(SupervisorState::Running);
        info!(
            "Started {} (pid {})",
            self.child.program.to_string_lossy(),
            pid
        );

        let status = child.wait().await;
        self.transition(SupervisorState::Draining);
        relay.stop().await;

        let code = match status {
            Ok(status) => {
                let code = exit_code(status);
                info!("Process exited with status {}", code);
                code
            }
            Err(e) => {
                warn!("Error waiting for process to terminate: {}", e);
                1
            }
        };

        let deadline = Instant::now() + self.settings.drain_timeout;

        // Grandchildren may keep the pipes open after the child is gone
        match timeout_at(deadline, async { tokio::join!(stdout_reader, stderr_reader) }).await {
            Ok((stdout_stats, stderr_stats)) => debug!(
                "Readers finished (stdout: {:?}, stderr: {:?})",
                stdout_stats.ok(),
                stderr_stats.ok()
            ),
            Err(_) => warn!("Output streams still open after the process exited, abandoning them"),
        }

        queue.close();
        self.wait_for_uploader(deadline, uploader, &queue).await;

        self.transition(SupervisorState::Terminated);
        Ok(code)
    }

    fn spawn_child(&self) -> Result<Child> {
        Command::new(&self.child.program)
            .args(&self.child.args)
            .env_clear()
            .envs(self.child.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", self.child.program.to_string_lossy()))
    }

    async fn wait_for_uploader(
        &self,
        deadline: Instant,
        uploader: tokio::task::JoinHandle<UploadStats>,
        queue: &DeliveryQueue,
    ) {
        match timeout_at(deadline, uploader).await {
            Ok(Ok(stats)) => debug!("Uploader drained: {:?}", stats),
            Ok(Err(e)) => warn!("Uploader task failed: {}", e),
            Err(_) => warn!(
                "Timed out after {:?} waiting for logs to upload, exiting without {} queued line(s)",
                self.settings.drain_timeout,
                queue.len()
            ),
        }
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!("Supervisor {} -> {}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing::RecordingLogRepository;
    use std::time::Duration;

    fn sh(script: &str) -> ChildSpec {
        let env = std::env::var_os("PATH")
            .map(|path| vec![(OsString::from("PATH"), path)])
            .unwrap_or_default();

        ChildSpec {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env,
        }
    }

    fn fast_settings() -> PipelineSettings {
        PipelineSettings {
            batch_window: Duration::from_millis(50),
            drain_timeout: Duration::from_secs(5),
            ..PipelineSettings::default()
        }
    }

    async fn run(
        child: ChildSpec,
        repo: Arc<RecordingLogRepository>,
        settings: PipelineSettings,
    ) -> (Result<i32>, SupervisorState) {
        let mut supervisor = Supervisor::new(child, repo, settings);
        let result = supervisor.run().await;
        (result, supervisor.state())
    }

    #[tokio::test]
    async fn test_echo_is_delivered_and_exit_code_zero() {
        let repo = Arc::new(RecordingLogRepository::accepting());

        let (result, state) = run(sh("echo hi"), repo.clone(), fast_settings()).await;

        assert_eq!(result.unwrap(), 0);
        assert_eq!(state, SupervisorState::Terminated);

        let batches = repo.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0][0].content, "hi");
        assert_eq!(batches[0][0].stream, Stream::Stdout);
    }

    #[tokio::test]
    async fn test_stderr_lines_are_tagged() {
        let repo = Arc::new(RecordingLogRepository::accepting());

        let (result, _) = run(sh("echo oops >&2"), repo.clone(), fast_settings()).await;

        assert_eq!(result.unwrap(), 0);
        let lines = repo.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].content, "oops");
        assert_eq!(lines[0].stream, Stream::Stderr);
    }

    #[tokio::test]
    async fn test_stdout_order_is_preserved() {
        let repo = Arc::new(RecordingLogRepository::accepting());

        let (result, _) = run(
            sh("i=0; while [ $i -lt 50 ]; do echo line-$i; i=$((i+1)); done"),
            repo.clone(),
            fast_settings(),
        )
        .await;

        assert_eq!(result.unwrap(), 0);
        let lines: Vec<String> = repo.lines().into_iter().map(|l| l.content).collect();
        let expected: Vec<String> = (0..50).map(|i| format!("line-{i}")).collect();
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn test_exit_code_is_passed_through() {
        let repo = Arc::new(RecordingLogRepository::accepting());

        let (result, _) = run(sh("exit 3"), repo, fast_settings()).await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_signal_termination_maps_to_128_plus_signal() {
        let repo = Arc::new(RecordingLogRepository::accepting());

        let (result, _) = run(sh("kill -KILL $$"), repo, fast_settings()).await;

        assert_eq!(result.unwrap(), 137);
    }

    #[tokio::test]
    async fn test_child_sees_only_the_given_environment() {
        let repo = Arc::new(RecordingLogRepository::accepting());
        let mut child = sh("echo \"${FOO:-unset} ${_PRIVATE_ANVILOPS_LOG_TOKEN:-stripped}\"");
        child.env.push(("FOO".into(), "bar".into()));

        let (result, _) = run(child, repo.clone(), fast_settings()).await;

        assert_eq!(result.unwrap(), 0);
        assert_eq!(repo.lines()[0].content, "bar stripped");
    }

    #[tokio::test]
    async fn test_pending_lines_are_flushed_on_exit() {
        let repo = Arc::new(RecordingLogRepository::accepting());
        let settings = PipelineSettings {
            batch_window: Duration::from_secs(30),
            ..fast_settings()
        };

        let started = std::time::Instant::now();
        let (result, _) = run(sh("echo a; echo b; echo c"), repo.clone(), settings).await;

        assert_eq!(result.unwrap(), 0);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(repo.lines().len(), 3);
    }

    #[tokio::test]
    async fn test_slow_endpoint_is_abandoned_after_drain_timeout() {
        let repo = Arc::new(
            RecordingLogRepository::accepting().with_latency(Duration::from_secs(30)),
        );
        let settings = PipelineSettings {
            drain_timeout: Duration::from_millis(300),
            ..fast_settings()
        };

        let started = std::time::Instant::now();
        let (result, state) = run(sh("echo x; exit 4"), repo, settings).await;

        assert_eq!(result.unwrap(), 4);
        assert_eq!(state, SupervisorState::Terminated);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_failing_endpoint_does_not_change_exit_code() {
        let repo = Arc::new(RecordingLogRepository::failing());
        let settings = PipelineSettings {
            drain_timeout: Duration::from_millis(500),
            ..fast_settings()
        };

        let (result, _) = run(sh("echo x"), repo.clone(), settings).await;

        assert_eq!(result.unwrap(), 0);
        assert!(!repo.batches().is_empty());
    }

    #[tokio::test]
    async fn test_missing_program_is_a_startup_error() {
        let repo = Arc::new(RecordingLogRepository::accepting());
        let child = ChildSpec {
            program: "/nonexistent/definitely-not-here".into(),
            args: vec![],
            env: vec![],
        };

        let (result, state) = run(child, repo.clone(), fast_settings()).await;

        assert!(result.is_err());
        assert_eq!(state, SupervisorState::Starting);
        assert!(repo.batches().is_empty());
    }
}
