//! Synchronous subprocess execution with hard timeouts.
//!
//! Every external process Edison runs (git, validator CLIs, dependency
//! installers) goes through [`run_with_timeout`]. The child runs in its own
//! process group so a timeout can kill the whole tree, not just the direct
//! child.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured outcome of a finished (or killed) subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; -1 when killed by signal or timeout.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// True when the process was killed because it exceeded its timeout.
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Error raised when a command exceeds its timeout.
#[derive(Debug)]
pub struct TimeoutExpired {
    pub program: String,
    pub timeout: Duration,
}

impl std::fmt::Display for TimeoutExpired {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Command '{}' timed out after {}s",
            self.program,
            self.timeout.as_secs()
        )
    }
}

impl std::error::Error for TimeoutExpired {}

fn spawn_in_own_group(cmd: &mut Command) -> Result<Child> {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid() is async-signal-safe and runs before exec.
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    cmd.spawn().context("Failed to spawn command")
}

fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        let pid = child.id() as i32;
        // SAFETY: negative pid addresses the process group created by setsid.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
}

/// Run `program` with `args` in `cwd`, capturing output, killing on timeout.
///
/// Non-zero exit codes are NOT errors here; callers inspect
/// [`CommandOutput::exit_code`]. A timeout returns `Err(TimeoutExpired)`.
pub fn run_with_timeout(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput> {
    let started = Instant::now();

    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let mut child = spawn_in_own_group(&mut cmd)
        .with_context(|| format!("Failed to spawn '{program}'"))?;

    // Drain pipes on threads so a chatty child can't dead-lock on full pipes.
    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(pipe) = stdout_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut buf);
        }
        buf
    });

    let status = loop {
        match child.try_wait().context("Failed to poll child")? {
            Some(status) => break status,
            None => {
                if started.elapsed() >= timeout {
                    warn!(program, timeout_secs = timeout.as_secs(), "killing timed-out command");
                    kill_process_group(&mut child);
                    let _ = child.wait();
                    // Reader threads finish once the pipes close.
                    let _ = stdout_handle.join();
                    let _ = stderr_handle.join();
                    return Err(TimeoutExpired {
                        program: program.to_string(),
                        timeout,
                    }
                    .into());
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        duration: started.elapsed(),
        timed_out: false,
    })
}

/// Run a shell line (`sh -c`) in `cwd`; used for configured post-install hooks.
pub fn run_shell_with_timeout(
    line: &str,
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput> {
    run_with_timeout("sh", &["-c", line], cwd, timeout)
}

/// Last `n` lines of captured output, for failure diagnostics.
pub fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}
