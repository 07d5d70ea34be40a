//! Subprocess execution shared by the install, scraper, and git steps.
//!
//! Every child gets captured stdout/stderr, an optional working directory and
//! extra environment, and a hard timeout. Children run in their own process
//! group so a timeout (or a dropped run) kills whatever `sh -c` started too.

use crate::error::{Result, ScraperError};
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Describes one child process invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec<'a> {
    pub program: &'a str,
    pub args: Vec<String>,
    pub working_dir: &'a Path,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl<'a> CommandSpec<'a> {
    pub fn new(program: &'a str, working_dir: &'a Path, timeout: Duration) -> Self {
        Self {
            program,
            args: Vec::new(),
            working_dir,
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `program arg1 arg2`, for error messages and logs
    pub fn display(&self) -> String {
        std::iter::once(self.program)
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Run the command to completion. A non-zero exit is returned as output, not
/// as an error; only spawn failures and timeouts are errors.
pub async fn run_command(spec: &CommandSpec<'_>) -> Result<CommandOutput> {
    let mut cmd = Command::new(spec.program);
    cmd.args(&spec.args)
        .current_dir(spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    debug!("Running `{}` in {}", spec.display(), spec.working_dir.display());
    let start = Instant::now();
    let mut child = cmd.spawn()?;
    let mut group = GroupKill::new(child.id());

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();
    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    let status = match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(status) => {
            group.disarm();
            status?
        }
        Err(_elapsed) => {
            drop(group);
            stdout_task.abort();
            stderr_task.abort();
            return Err(ScraperError::Timeout {
                command: spec.display(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            });
        }
    };

    let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_task.await.unwrap_or_default()).into_owned();

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code: status.code().unwrap_or(-1),
        duration_ms: start.elapsed().as_millis() as u64,
    })
}

/// SIGKILLs the child's process group on drop unless the child exited first.
/// Covers both the timeout path and a caller dropping the future mid-run.
struct GroupKill {
    pgid: Option<u32>,
}

impl GroupKill {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    /// The leader was reaped; its group id may be reused from here on.
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pgid) = self.pgid.take() {
                debug!("Killing process group {}", pgid);
                // SAFETY: killpg only sends a signal. The group was created by
                // process_group(0) and its leader has not been reaped yet.
                unsafe {
                    libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
                }
            }
        }
    }
}

/// Like [`run_command`], but a non-zero exit becomes `ScraperError::Command`.
pub async fn run_checked(spec: &CommandSpec<'_>) -> Result<CommandOutput> {
    let output = run_command(spec).await?;
    if !output.success() {
        return Err(ScraperError::Command {
            command: spec.display(),
            code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

/// Run a free-form command line through `sh -c`.
pub async fn run_shell(command_line: &str, working_dir: &Path, timeout: Duration) -> Result<CommandOutput> {
    let spec = CommandSpec::new("sh", working_dir, timeout)
        .arg("-c")
        .arg(command_line);
    run_checked(&spec).await
}

async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        let _ = h.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await;
    }
    buf
}
