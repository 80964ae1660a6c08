//! Sandboxed step execution.
//!
//! Every attempt runs in its own process group with a cleared environment
//! and a hard wall-clock limit. On timeout the whole group is killed. Output
//! is captured up to a bound; the pipes keep draining past it so the child
//! never blocks on a full pipe.
//!
//! Host isolation cannot withhold the network, so it only runs steps when
//! the configuration allows network access outright.
//!
//! The executor runs exactly the command it is given. It never prompts and
//! never rewrites arguments.

use async_trait::async_trait;
use cortex_core::{ExecutionOutcome, ExecutionResult, Isolation, SandboxConfig, Step};
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How long to wait for output readers after the process group is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// Runs one step and reports how it ended. Never fails: launch problems are
/// reported as [`ExecutionOutcome::SandboxFailure`].
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: &Step, sandbox: &SandboxConfig) -> ExecutionResult;
}

#[derive(Debug, Default, Clone)]
pub struct SandboxedExecutor;

impl SandboxedExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepExecutor for SandboxedExecutor {
    async fn execute(&self, step: &Step, sandbox: &SandboxConfig) -> ExecutionResult {
        if sandbox.isolation == Isolation::Host && !sandbox.allow_network {
            return ExecutionResult::sandbox_failure(
                Uuid::new_v4(),
                "host isolation cannot withhold network access; \
                 set sandbox.allow_network or use bubblewrap"
                    .to_string(),
                1,
            );
        }
        let mut attempts = 1;
        loop {
            let result = run_once(step, sandbox, attempts).await;
            let retry = result.outcome == ExecutionOutcome::SandboxFailure
                && step.idempotent
                && sandbox.retry_transient
                && attempts < 2;
            if !retry {
                return result;
            }
            tracing::warn!(
                sandbox_id = %result.sandbox_id,
                command = %step.command,
                "Sandbox setup failed, retrying idempotent step: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
            attempts += 1;
        }
    }
}

async fn run_once(step: &Step, sandbox: &SandboxConfig, attempt: u32) -> ExecutionResult {
    let sandbox_id = Uuid::new_v4();
    let started = Instant::now();

    let mut child = match build_command(step, sandbox).spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecutionResult::sandbox_failure(
                sandbox_id,
                format!("failed to launch '{}': {}", step.command, e),
                attempt,
            );
        }
    };
    tracing::debug!(
        sandbox_id = %sandbox_id,
        pid = child.id(),
        isolation = ?sandbox.isolation,
        command = %step.command,
        "Step launched"
    );

    let limit = sandbox.max_output_bytes;
    let stdout = child.stdout.take().map(|r| spawn_reader(r, limit));
    let stderr = child.stderr.take().map(|r| spawn_reader(r, limit));

    let timeout = sandbox.step_timeout();
    let (outcome, exit_code) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => (ExecutionOutcome::Exited, status.code()),
        Ok(Err(e)) => {
            return ExecutionResult::sandbox_failure(
                sandbox_id,
                format!("failed to wait for '{}': {}", step.command, e),
                attempt,
            );
        }
        Err(_) => {
            kill_group(&mut child).await;
            tracing::warn!(
                sandbox_id = %sandbox_id,
                command = %step.command,
                timeout_secs = timeout.as_secs(),
                "Step timed out, process group killed"
            );
            (ExecutionOutcome::TimedOut, None)
        }
    };

    let (stdout, stdout_truncated) = collect(stdout).await;
    let (stderr, stderr_truncated) = collect(stderr).await;

    let mut result = ExecutionResult {
        sandbox_id,
        outcome,
        exit_code,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        duration_ms: started.elapsed().as_millis() as u64,
        attempts: attempt,
        error: None,
    };

    if sandbox.isolation == Isolation::Bubblewrap && is_bwrap_setup_failure(&result) {
        result.outcome = ExecutionOutcome::SandboxFailure;
        result.error = Some(result.stderr.trim().to_string());
    }
    result
}

fn build_command(step: &Step, sandbox: &SandboxConfig) -> Command {
    let mut cmd = match sandbox.isolation {
        Isolation::Host => {
            let mut cmd = Command::new(&step.command.program);
            cmd.args(&step.command.args).current_dir(&step.working_dir);
            cmd
        }
        Isolation::Bubblewrap => {
            let mut cmd = Command::new(&sandbox.bwrap_path);
            cmd.args(bwrap_args(step, sandbox)).current_dir("/");
            cmd
        }
    };
    cmd.env_clear()
        .env("PATH", &sandbox.search_path)
        .env("LC_ALL", "C")
        .env("DEBIAN_FRONTEND", "noninteractive")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);
    cmd
}

/// `bwrap` arguments: read-only root, writable binds for the configured
/// paths that exist, fresh `/dev` and `/proc`, no network unless the step's
/// effect is granted it.
fn bwrap_args(step: &Step, sandbox: &SandboxConfig) -> Vec<String> {
    let mut args: Vec<String> = ["--ro-bind", "/", "/", "--dev", "/dev", "--proc", "/proc"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for path in sandbox.writable_paths.iter().filter(|p| p.exists()) {
        let path = path.display().to_string();
        args.extend(["--bind".to_string(), path.clone(), path]);
    }
    args.extend(["--die-with-parent".to_string(), "--unshare-ipc".to_string()]);
    if !sandbox.network_for(&step.effect) {
        args.push("--unshare-net".to_string());
    }
    args.extend([
        "--chdir".to_string(),
        step.working_dir.display().to_string(),
        "--".to_string(),
        step.command.program.clone(),
    ]);
    args.extend(step.command.args.iter().cloned());
    args
}

/// `bwrap` reports its own setup errors on stderr with a `bwrap:` prefix
/// and exit code 1, before the step's program ever runs.
fn is_bwrap_setup_failure(result: &ExecutionResult) -> bool {
    result.outcome == ExecutionOutcome::Exited
        && result.exit_code == Some(1)
        && result.stdout.is_empty()
        && result.stderr.starts_with("bwrap:")
}

async fn kill_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        // The child leads its own group, so its pid is the group id.
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            tracing::debug!(pid, "killpg failed: {}", std::io::Error::last_os_error());
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!("kill after timeout: {}", e);
    }
}

/// Bytes kept from one output stream so far.
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

type SharedCapture = Arc<Mutex<Captured>>;

fn lock(capture: &SharedCapture) -> std::sync::MutexGuard<'_, Captured> {
    capture.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn spawn_reader<R>(reader: R, limit: usize) -> (JoinHandle<()>, SharedCapture)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let capture = SharedCapture::default();
    let handle = tokio::spawn(read_bounded(reader, limit, Arc::clone(&capture)));
    (handle, capture)
}

/// Read everything from `reader`, keeping at most `limit` bytes in `capture`.
async fn read_bounded<R>(mut reader: R, limit: usize, capture: SharedCapture)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut captured = lock(&capture);
                let room = limit.saturating_sub(captured.bytes.len());
                if n > room {
                    captured.truncated = true;
                }
                captured.bytes.extend_from_slice(&buf[..n.min(room)]);
            }
        }
    }
}

async fn collect(reader: Option<(JoinHandle<()>, SharedCapture)>) -> (String, bool) {
    let Some((mut handle, capture)) = reader else {
        return (String::new(), false);
    };
    let complete = match tokio::time::timeout(DRAIN_GRACE, &mut handle).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!("output reader failed: {}", e);
            false
        }
        Err(_) => {
            // A descendant still holds the pipe. Keep what was read so far.
            handle.abort();
            false
        }
    };
    let captured = std::mem::take(&mut *lock(&capture));
    (
        String::from_utf8_lossy(&captured.bytes).into_owned(),
        captured.truncated || !complete,
    )
}

/// Whether `bwrap` can be found, either as a path or on `search_path`.
pub fn bubblewrap_available(sandbox: &SandboxConfig) -> bool {
    let bwrap = &sandbox.bwrap_path;
    if bwrap.components().count() > 1 {
        return bwrap.exists();
    }
    sandbox
        .search_path
        .split(':')
        .any(|dir| Path::new(dir).join(bwrap).exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::{CommandSpec, Effect, PackageManager};

    fn step(program: &str, args: &[&str]) -> Step {
        Step::new(
            CommandSpec::new(program, args.iter().copied()),
            "/tmp",
            Effect::Command {
                summary: "test".to_string(),
            },
        )
    }

    fn sandbox() -> SandboxConfig {
        SandboxConfig {
            isolation: Isolation::Host,
            allow_network: true,
            step_timeout_secs: 5,
            ..SandboxConfig::default()
        }
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let result = SandboxedExecutor
            .execute(&step("sh", &["-c", "echo out; echo err >&2; exit 3"]), &sandbox())
            .await;
        assert_eq!(result.outcome, ExecutionOutcome::Exited);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn environment_is_cleared() {
        let result = SandboxedExecutor.execute(&step("env", &[]), &sandbox()).await;
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("PATH="));
        assert!(!result.stdout.contains("HOME="));
    }

    #[tokio::test]
    async fn runs_in_working_dir() {
        let result = SandboxedExecutor.execute(&step("pwd", &[]), &sandbox()).await;
        assert_eq!(result.stdout.trim(), "/tmp");
    }

    #[tokio::test]
    async fn timeout_kills_the_process_group() {
        let mut config = sandbox();
        config.step_timeout_secs = 1;
        // The background sleep shares the group and must die with it.
        let started = Instant::now();
        let result = SandboxedExecutor
            .execute(&step("sh", &["-c", "sleep 30 & sleep 30"]), &config)
            .await;
        assert_eq!(result.outcome, ExecutionOutcome::TimedOut);
        assert_eq!(result.exit_code, None);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn output_is_bounded_but_drained() {
        let mut config = sandbox();
        config.max_output_bytes = 100;
        let result = SandboxedExecutor
            .execute(
                &step("sh", &["-c", "head -c 200000 /dev/zero | tr '\\0' x"]),
                &config,
            )
            .await;
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout.len(), 100);
        assert!(result.stdout_truncated);
        assert!(!result.stderr_truncated);
    }

    #[tokio::test]
    async fn missing_program_is_a_sandbox_failure_retried_once_when_idempotent() {
        let missing = step("/nonexistent/cortex-test-binary", &[]);
        let result = SandboxedExecutor.execute(&missing, &sandbox()).await;
        assert_eq!(result.outcome, ExecutionOutcome::SandboxFailure);
        assert_eq!(result.attempts, 1);
        assert!(result.error.is_some());

        let result = SandboxedExecutor
            .execute(&missing.idempotent(true), &sandbox())
            .await;
        assert_eq!(result.outcome, ExecutionOutcome::SandboxFailure);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn output_read_before_an_escaped_descendant_is_kept() {
        // The background sleep keeps stdout open after the shell exits.
        let started = Instant::now();
        let result = SandboxedExecutor
            .execute(&step("sh", &["-c", "echo early; sleep 10 &"]), &sandbox())
            .await;
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "early\n");
        assert!(result.stdout_truncated);
        assert!(started.elapsed() < Duration::from_secs(8));
    }

    #[tokio::test]
    async fn host_isolation_without_network_grant_refuses_to_run() {
        let config = SandboxConfig {
            allow_network: false,
            ..sandbox()
        };
        let marker = tempfile::tempdir().unwrap();
        let touched = marker.path().join("ran");
        let touch = step("touch", &[touched.to_str().unwrap()]).idempotent(true);
        let result = SandboxedExecutor.execute(&touch, &config).await;
        assert_eq!(result.outcome, ExecutionOutcome::SandboxFailure);
        assert_eq!(result.attempts, 1);
        assert!(result.error.unwrap().contains("allow_network"));
        assert!(!touched.exists());
    }

    #[test]
    fn bwrap_arguments_confine_the_step() {
        let mut config = SandboxConfig::default();
        config.writable_paths = vec!["/tmp".into(), "/nonexistent/cortex".into()];
        let install = PackageManager::Apt.install_step("nginx", "/tmp", None);
        let args = bwrap_args(&install, &config);
        let joined = args.join(" ");
        assert!(joined.starts_with("--ro-bind / /"));
        assert!(joined.contains("--bind /tmp /tmp"));
        assert!(!joined.contains("/nonexistent/cortex"));
        assert!(!joined.contains("--unshare-net"));
        assert!(joined.contains("--chdir /tmp -- apt-get install"));

        let remove = PackageManager::Apt.remove_step("nginx", "/tmp", None);
        assert!(bwrap_args(&remove, &config).contains(&"--unshare-net".to_string()));
        assert!(bwrap_args(&step("true", &[]), &config).contains(&"--unshare-net".to_string()));

        config.allow_network = true;
        let args = bwrap_args(&step("true", &[]), &config);
        assert!(!args.contains(&"--unshare-net".to_string()));
    }
}
