//! Bounded shell command execution.
//!
//! Every command runs as `sh -c <command>` in a fresh process group with
//! stdin closed. Output is captured up to a per-pipe limit. On timeout or
//! overflow the whole group is killed, so grandchildren spawned by the
//! shell do not outlive the request.

use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};
use warlock_protocol::{CommandOutput, ExecRequest};

use crate::cache::ResultCache;

/// Per-pipe capture limit (100 MiB).
pub const MAX_OUTPUT_BYTES: usize = 100 * 1024 * 1024;

/// Errors from running a command. A non-zero exit is not an error.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The command did not finish in time and was killed.
    #[error("Command timeout after {timeout_ms}ms")]
    Timeout {
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The shell could not be started.
    #[error("Failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    /// A pipe produced more than the capture limit.
    #[error("{stream} exceeded the {limit} byte output limit")]
    OutputLimitExceeded {
        /// `stdout` or `stderr`.
        stream: &'static str,
        /// The limit in bytes.
        limit: usize,
    },

    /// Reading output or waiting on the process failed.
    #[error("I/O error while running command: {0}")]
    Io(#[from] std::io::Error),
}

/// One bounded execution request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDescriptor {
    /// Shell command line.
    pub command: String,
    /// Hard deadline; zero means none.
    pub timeout: Duration,
    /// Working directory; the executor's default when `None`.
    pub working_dir: Option<String>,
}

impl CommandDescriptor {
    /// Descriptor with no explicit working directory.
    #[must_use]
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
            working_dir: None,
        }
    }

    /// Set the working directory.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl From<ExecRequest> for CommandDescriptor {
    fn from(req: ExecRequest) -> Self {
        let timeout = Duration::from_millis(req.timeout_ms());
        Self {
            command: req.command,
            timeout,
            working_dir: req.cwd,
        }
    }
}

/// Spawns a command and collects its output.
///
/// The seam between the executor's caching logic and the operating system.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion or until `timeout` elapses. A zero
    /// `timeout` waits for completion.
    async fn run(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;
}

/// Production runner: `sh -c` in its own process group.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    max_output_bytes: usize,
}

impl ShellRunner {
    /// Runner with the default capture limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_output_bytes: MAX_OUTPUT_BYTES,
        }
    }

    /// Runner with a custom per-pipe capture limit.
    #[must_use]
    pub fn with_output_limit(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        command: &str,
        cwd: Option<&Path>,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(ExecError::Spawn)?;
        let limit = self.max_output_bytes;

        if timeout.is_zero() {
            let result = collect(&mut child, limit).await;
            if result.is_err() {
                kill_group(&mut child).await;
            }
            return result;
        }

        match tokio::time::timeout(timeout, collect(&mut child, limit)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => {
                kill_group(&mut child).await;
                Err(e)
            },
            Err(_) => {
                kill_group(&mut child).await;
                Err(ExecError::Timeout {
                    timeout_ms: millis(timeout),
                })
            },
        }
    }
}

async fn collect(child: &mut Child, limit: usize) -> Result<CommandOutput, ExecError> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (stdout, stderr) = tokio::try_join!(
        read_capped(stdout, limit, "stdout"),
        read_capped(stderr, limit, "stderr"),
    )?;
    let status = child.wait().await?;
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_code: exit_code(status),
    })
}

async fn read_capped<R>(
    pipe: Option<R>,
    limit: usize,
    stream: &'static str,
) -> Result<Vec<u8>, ExecError>
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return Ok(Vec::new());
    };
    // One byte past the limit is enough to detect overflow.
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut buf = Vec::new();
    pipe.take(cap).read_to_end(&mut buf).await?;
    if buf.len() > limit {
        return Err(ExecError::OutputLimitExceeded { stream, limit });
    }
    Ok(buf)
}

/// Exit code, or `128 + signal` for a signalled process.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|sig| sig.saturating_add(128)))
        .unwrap_or(1)
}

/// SIGKILL the child's process group, then reap the child.
pub(crate) async fn kill_group(child: &mut Child) {
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            debug!(pid, error = %e, "killpg failed, falling back to direct kill");
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "child already reaped");
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Runs commands through a [`CommandRunner`], serving the cacheable family
/// from a [`ResultCache`].
pub struct CommandExecutor {
    runner: Arc<dyn CommandRunner>,
    cache: ResultCache,
    default_dir: Option<PathBuf>,
}

impl CommandExecutor {
    /// Executor over an arbitrary runner.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cache: ResultCache,
        default_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            runner,
            cache,
            default_dir,
        }
    }

    /// Executor over [`ShellRunner`].
    #[must_use]
    pub fn shell(cache: ResultCache, default_dir: Option<PathBuf>) -> Self {
        Self::new(Arc::new(ShellRunner::new()), cache, default_dir)
    }

    /// Run `descriptor`, consulting the cache for the cacheable family.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecError`] on spawn failure, timeout, output overflow
    /// or I/O failure. Failed executions are never cached.
    pub async fn execute(
        &self,
        descriptor: &CommandDescriptor,
    ) -> Result<CommandOutput, ExecError> {
        let cache_key = ResultCache::is_cacheable(&descriptor.command).then(|| {
            ResultCache::key(descriptor.working_dir.as_deref(), &descriptor.command)
        });

        if let Some(key) = &cache_key
            && let Some(hit) = self.cache.get(key)
        {
            debug!(key = %key, "serving cached result");
            return Ok(hit);
        }

        let output = self.execute_uncached(descriptor).await?;

        if let Some(key) = cache_key {
            debug!(key = %key, "caching result");
            self.cache.insert(key, output.clone());
        }
        Ok(output)
    }

    /// Run `descriptor` without touching the cache.
    ///
    /// # Errors
    ///
    /// Same as [`CommandExecutor::execute`].
    pub async fn execute_uncached(
        &self,
        descriptor: &CommandDescriptor,
    ) -> Result<CommandOutput, ExecError> {
        let cwd = descriptor
            .working_dir
            .as_deref()
            .map(PathBuf::from)
            .or_else(|| self.default_dir.clone());

        debug!(
            command = %descriptor.command,
            cwd = ?cwd,
            timeout_ms = millis(descriptor.timeout),
            "executing command"
        );
        let result = self
            .runner
            .run(&descriptor.command, cwd.as_deref(), descriptor.timeout)
            .await;
        if let Err(e) = &result {
            warn!(command = %descriptor.command, error = %e, "command failed");
        }
        result
    }

    /// The result cache.
    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Directory used when a descriptor names none.
    #[must_use]
    pub fn default_dir(&self) -> Option<&Path> {
        self.default_dir.as_deref()
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("cache", &self.cache)
            .field("default_dir", &self.default_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts spawns and delegates to the real shell.
    struct CountingRunner {
        spawns: AtomicUsize,
        inner: ShellRunner,
    }

    impl CountingRunner {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                spawns: AtomicUsize::new(0),
                inner: ShellRunner::new(),
            })
        }

        fn spawns(&self) -> usize {
            self.spawns.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CommandRunner for CountingRunner {
        async fn run(
            &self,
            command: &str,
            cwd: Option<&Path>,
            timeout: Duration,
        ) -> Result<CommandOutput, ExecError> {
            self.spawns.fetch_add(1, Ordering::SeqCst);
            self.inner.run(command, cwd, timeout).await
        }
    }

    fn executor(runner: Arc<CountingRunner>, ttl: Duration) -> CommandExecutor {
        CommandExecutor::new(runner, ResultCache::new(16, ttl), None)
    }

    #[tokio::test]
    async fn echo_captures_stdout() {
        let out = ShellRunner::new()
            .run("echo hi", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            out,
            CommandOutput {
                stdout: "hi\n".into(),
                stderr: String::new(),
                exit_code: 0,
            }
        );
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let out = ShellRunner::new()
            .run("echo oops >&2; exit 3", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr, "oops\n");
    }

    #[tokio::test]
    async fn timeout_is_distinct_from_exit() {
        let err = ShellRunner::new()
            .run("sleep 5", None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { timeout_ms: 100 }));
        assert_eq!(err.to_string(), "Command timeout after 100ms");
    }

    #[tokio::test]
    async fn zero_timeout_waits_for_completion() {
        let exec = CommandExecutor::shell(ResultCache::new(16, Duration::from_secs(60)), None);
        let req: ExecRequest = serde_json::from_value(serde_json::json!({
            "command": "sleep 0.2; echo hi",
            "timeoutMs": 0
        }))
        .unwrap();
        let out = exec.execute(&CommandDescriptor::from(req)).await.unwrap();
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn timeout_kills_background_children() {
        let started = std::time::Instant::now();
        let err = ShellRunner::new()
            .run("sleep 5 & sleep 5; wait", None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn signalled_process_reports_128_plus_signal() {
        let out = ShellRunner::new()
            .run("kill -9 $$", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 137);
    }

    #[tokio::test]
    async fn output_limit_is_enforced() {
        let err = ShellRunner::with_output_limit(4)
            .run("echo 0123456789", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecError::OutputLimitExceeded {
                stream: "stdout",
                limit: 4
            }
        ));
    }

    #[tokio::test]
    async fn missing_directory_fails_to_spawn() {
        let err = ShellRunner::new()
            .run(
                "true",
                Some(Path::new("/definitely/not/here")),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn(_)));
    }

    #[tokio::test]
    async fn runs_in_requested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let exec = CommandExecutor::shell(ResultCache::new(4, Duration::ZERO), None);
        let desc = CommandDescriptor::new("pwd", Duration::from_secs(5))
            .in_dir(dir.path().to_string_lossy());
        let out = exec.execute(&desc).await.unwrap();
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn default_directory_applies_without_override() {
        let dir = tempfile::tempdir().unwrap();
        let exec = CommandExecutor::shell(
            ResultCache::new(4, Duration::ZERO),
            Some(dir.path().to_path_buf()),
        );
        let out = exec
            .execute(&CommandDescriptor::new("pwd", Duration::from_secs(5)))
            .await
            .unwrap();
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn cacheable_command_spawns_once_within_ttl() {
        let runner = CountingRunner::new();
        let exec = executor(Arc::clone(&runner), Duration::from_secs(60));
        let desc = CommandDescriptor::new(
            "echo services # manage.py --get-services",
            Duration::from_secs(5),
        );

        let first = exec.execute(&desc).await.unwrap();
        let second = exec.execute(&desc).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(runner.spawns(), 1);
    }

    #[tokio::test]
    async fn stale_entry_is_refreshed() {
        let runner = CountingRunner::new();
        let exec = executor(Arc::clone(&runner), Duration::from_millis(50));
        let desc = CommandDescriptor::new(
            "date +%s%N # manage.py --get-services",
            Duration::from_secs(5),
        );

        let first = exec.execute(&desc).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let second = exec.execute(&desc).await.unwrap();

        assert_eq!(runner.spawns(), 2);
        assert_ne!(first.stdout, second.stdout);
        assert_eq!(exec.cache().len(), 1);
    }

    #[tokio::test]
    async fn cache_keys_include_working_directory() {
        let runner = CountingRunner::new();
        let exec = executor(Arc::clone(&runner), Duration::from_secs(60));
        let cmd = "pwd # manage.py --get-services";
        let a = CommandDescriptor::new(cmd, Duration::from_secs(5)).in_dir("/");
        let b = CommandDescriptor::new(cmd, Duration::from_secs(5)).in_dir("/tmp");

        let out_a = exec.execute(&a).await.unwrap();
        let out_b = exec.execute(&b).await.unwrap();

        assert_eq!(runner.spawns(), 2);
        assert_ne!(out_a.stdout, out_b.stdout);
    }

    #[tokio::test]
    async fn other_commands_are_never_cached() {
        let runner = CountingRunner::new();
        let exec = executor(Arc::clone(&runner), Duration::from_secs(60));
        let desc = CommandDescriptor::new("echo hi", Duration::from_secs(5));

        exec.execute(&desc).await.unwrap();
        exec.execute(&desc).await.unwrap();

        assert_eq!(runner.spawns(), 2);
        assert!(exec.cache().is_empty());
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let runner = CountingRunner::new();
        let exec = executor(Arc::clone(&runner), Duration::from_secs(60));
        let desc = CommandDescriptor::new(
            "sleep 5 # manage.py --get-services",
            Duration::from_millis(50),
        );

        assert!(exec.execute(&desc).await.is_err());
        assert!(exec.cache().is_empty());
    }

    #[test]
    fn descriptor_from_request_uses_default_timeout() {
        let req = ExecRequest {
            command: "ls".into(),
            timeout: None,
            cwd: Some("/srv".into()),
        };
        let desc = CommandDescriptor::from(req);
        assert_eq!(desc.timeout, Duration::from_secs(30));
        assert_eq!(desc.working_dir.as_deref(), Some("/srv"));
    }
}
