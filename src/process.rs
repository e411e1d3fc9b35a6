// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Spawning external processes with bounded waits.
//!
//! Two wait modes exist and callers always choose one explicitly:
//! - [`WaitMode::KillOnTimeout`] for short requests (remote directives,
//!   focus helpers). A process still running at the deadline is killed.
//! - [`WaitMode::DetachOnTimeout`] for server launches. A process still
//!   running at the deadline is the expected outcome and is handed back
//!   untouched.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{HandoffError, Result};

/// Whether the spawned process may show a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// No window, stdio discarded.
    Hidden,
    /// Allowed to open a window (a new console on Windows).
    Visible,
}

/// How the program is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Exec the program directly with the given argv.
    Direct,
    /// Run the command line through the platform shell (`$SHELL -c` or `cmd.exe /C`).
    Shell,
}

/// What [`ProcessHandle::wait_or_kill`] does when the deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Kill the process and report [`WaitOutcome::Killed`].
    KillOnTimeout,
    /// Leave the process running and hand it back.
    DetachOnTimeout,
}

/// Options for [`ProcessHandle::spawn`].
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Window visibility.
    pub visibility: Visibility,
    /// Direct or shell execution.
    pub execution: Execution,
    /// Working directory, inherited when `None`.
    pub cwd: Option<PathBuf>,
    /// Variables added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Start the process in its own process group so it outlives us.
    pub detached: bool,
}

impl SpawnOptions {
    /// Hidden, direct execution: the shape of every remote directive.
    #[must_use]
    pub const fn hidden() -> Self {
        Self {
            visibility: Visibility::Hidden,
            execution: Execution::Direct,
            cwd: None,
            env: Vec::new(),
            detached: false,
        }
    }

    /// Visible, detached execution: the shape of a server launch.
    #[must_use]
    pub const fn detached_visible() -> Self {
        Self {
            visibility: Visibility::Visible,
            execution: Execution::Direct,
            cwd: None,
            env: Vec::new(),
            detached: true,
        }
    }

    /// Switches to shell execution.
    #[must_use]
    pub const fn through_shell(mut self) -> Self {
        self.execution = Execution::Shell;
        self
    }

    /// Adds environment variables.
    #[must_use]
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }
}

/// Result of a bounded wait.
#[derive(Debug)]
pub enum WaitOutcome {
    /// The process exited on its own; `None` when killed by a signal.
    Exited(Option<i32>),
    /// The process overran a kill-on-timeout wait and was killed.
    Killed,
    /// The process overran a detach-on-timeout wait and keeps running.
    StillRunningDetached(ProcessHandle),
}

/// Exclusive ownership of a spawned process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    program: String,
}

impl ProcessHandle {
    /// Spawns `program` with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::Spawn`] if the OS cannot create the process.
    pub fn spawn(program: &str, args: &[String], options: &SpawnOptions) -> Result<Self> {
        let mut cmd = match options.execution {
            Execution::Direct => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            Execution::Shell => shell_command(program, args),
        };

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(options.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd.stdin(Stdio::null());

        // A detached process must not keep the caller's pipes open.
        if options.visibility == Visibility::Hidden || options.detached {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        } else {
            cmd.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        #[cfg(windows)]
        {
            const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(match options.visibility {
                Visibility::Hidden => CREATE_NO_WINDOW,
                Visibility::Visible => CREATE_NEW_CONSOLE,
            });
        }
        #[cfg(unix)]
        if options.detached {
            cmd.process_group(0);
        }

        debug!("Spawning: {} {:?}", program, args);

        let child = cmd.spawn().map_err(|source| HandoffError::Spawn {
            program: program.to_string(),
            source,
        })?;

        Ok(Self {
            child,
            program: program.to_string(),
        })
    }

    /// Returns the OS process id, if the process has not been reaped yet.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Returns the program this handle was spawned from.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Waits up to `timeout` for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::Spawn`] if waiting on the process fails at
    /// the OS level.
    pub async fn wait_or_kill(mut self, timeout: Duration, mode: WaitMode) -> Result<WaitOutcome> {
        let waited = tokio::time::timeout(timeout, self.child.wait()).await;
        match waited {
            Ok(Ok(status)) => Ok(WaitOutcome::Exited(status.code())),
            Ok(Err(source)) => Err(HandoffError::Spawn {
                program: self.program,
                source,
            }),
            Err(_) => match mode {
                WaitMode::DetachOnTimeout => {
                    debug!(
                        "{} still running after {}ms, detaching",
                        self.program,
                        timeout.as_millis()
                    );
                    Ok(WaitOutcome::StillRunningDetached(self))
                }
                WaitMode::KillOnTimeout => {
                    if let Err(e) = self.child.kill().await {
                        // It may have exited between the deadline and the kill.
                        if let Ok(Some(status)) = self.child.try_wait() {
                            return Ok(WaitOutcome::Exited(status.code()));
                        }
                        warn!("Failed to kill {}: {}", self.program, e);
                    }
                    Ok(WaitOutcome::Killed)
                }
            },
        }
    }

    /// Waits for the process to exit without a bound.
    ///
    /// Only used by background watchers, never on a caller's path.
    pub async fn wait(mut self) -> Option<i32> {
        match self.child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("Failed to wait on {}: {}", self.program, e);
                None
            }
        }
    }
}

/// Spawns, then waits with `mode`.
///
/// # Errors
///
/// Propagates spawn and wait failures.
pub async fn run(
    program: &str,
    args: &[String],
    options: &SpawnOptions,
    timeout: Duration,
    mode: WaitMode,
) -> Result<WaitOutcome> {
    ProcessHandle::spawn(program, args, options)?
        .wait_or_kill(timeout, mode)
        .await
}

/// Builds a platform shell invocation for `program args...`.
fn shell_command(program: &str, args: &[String]) -> Command {
    let line = std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(shell_word)
        .collect::<Vec<_>>()
        .join(" ");

    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd.exe");
        cmd.arg("/C").arg(line);
        cmd
    }
    #[cfg(not(windows))]
    {
        let shell = std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string());
        let mut cmd = Command::new(shell);
        cmd.arg("-c").arg(line);
        cmd
    }
}

/// Quotes a word for the shell when it contains whitespace or quotes.
fn shell_word(word: &str) -> String {
    if !word.is_empty() && !word.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        return word.to_string();
    }
    if cfg!(windows) {
        format!("\"{}\"", word.replace('"', "\"\""))
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[cfg(all(test, unix))]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Tests use unwrap and panic for brevity"
)]
mod tests {
    use super::*;

    const SHORT: Duration = Duration::from_millis(2000);

    #[tokio::test]
    async fn test_exit_code_reported() {
        let outcome = run(
            "sh",
            &["-c".to_string(), "exit 3".to_string()],
            &SpawnOptions::hidden(),
            SHORT,
            WaitMode::KillOnTimeout,
        )
        .await;
        assert!(matches!(outcome, Ok(WaitOutcome::Exited(Some(3)))));
    }

    #[tokio::test]
    async fn test_kill_on_timeout() {
        let start = std::time::Instant::now();
        let outcome = run(
            "sleep",
            &["10".to_string()],
            &SpawnOptions::hidden(),
            Duration::from_millis(100),
            WaitMode::KillOnTimeout,
        )
        .await;
        assert!(matches!(outcome, Ok(WaitOutcome::Killed)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_detach_on_timeout_keeps_process() {
        let outcome = run(
            "sleep",
            &["10".to_string()],
            &SpawnOptions::detached_visible(),
            Duration::from_millis(100),
            WaitMode::DetachOnTimeout,
        )
        .await;
        let Ok(WaitOutcome::StillRunningDetached(handle)) = outcome else {
            panic!("expected a detached process, got {outcome:?}");
        };
        assert!(handle.pid().is_some());
        assert_eq!(handle.program(), "sleep");

        // Clean up: a second bounded wait in kill mode terminates it.
        let outcome = handle
            .wait_or_kill(Duration::from_millis(10), WaitMode::KillOnTimeout)
            .await;
        assert!(matches!(outcome, Ok(WaitOutcome::Killed)));
    }

    #[tokio::test]
    async fn test_spawn_error_carries_program() {
        let result = ProcessHandle::spawn(
            "definitely-not-a-real-program-7c1e",
            &[],
            &SpawnOptions::hidden(),
        );
        match result {
            Err(HandoffError::Spawn { program, source }) => {
                assert_eq!(program, "definitely-not-a-real-program-7c1e");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shell_execution_and_env_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let options = SpawnOptions::hidden()
            .through_shell()
            .with_env(vec![("HANDOFF_TEST_VALUE".to_string(), "forty two".to_string())]);
        let outcome = run(
            "printf",
            &[
                "%s-%s".to_string(),
                "$HANDOFF_TEST_VALUE".to_string(),
                ">".to_string(),
                out.display().to_string(),
            ],
            &options,
            SHORT,
            WaitMode::KillOnTimeout,
        )
        .await;
        assert!(matches!(outcome, Ok(WaitOutcome::Exited(Some(0)))));
        assert_eq!(std::fs::read_to_string(out).unwrap(), "forty-two");
    }

    #[test]
    fn test_shell_word_quoting() {
        assert_eq!(shell_word("plain"), "plain");
        assert_eq!(shell_word("two words"), "'two words'");
        assert_eq!(shell_word("it's"), r"'it'\''s'");
        assert_eq!(shell_word(""), "''");
    }
}
