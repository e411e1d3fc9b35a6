// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Remote directives sent to a running server.
//!
//! Every directive is its own short-lived editor process
//! (`nvim --server <addr> --remote-...`) spawned hidden and killed if it
//! overruns the configured wait bound. The editor only honours the last
//! directive of a combined invocation, so open-file and cursor-jump are
//! always two separate processes, issued one after the other.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::{ColumnBase, Config, RequestTemplates};
use crate::error::{HandoffError, Result};
use crate::launcher;
use crate::platform::ServerAddress;
use crate::process::{self, SpawnOptions, WaitMode, WaitOutcome};
use crate::template::{self, Bindings};

/// Kind of remote directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Open a file in a new tab.
    OpenFile,
    /// Move the cursor.
    CursorJump,
    /// Quit the server.
    Quit,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenFile => "open-file",
            Self::CursorJump => "cursor-jump",
            Self::Quit => "quit",
        })
    }
}

/// Cursor target; both values are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorPosition {
    /// Line number.
    pub line: u32,
    /// Column number.
    pub column: u32,
}

/// Sends remote directives using the configured request templates.
#[derive(Debug, Clone)]
pub struct RequestDispatcher {
    program: String,
    templates: RequestTemplates,
    column_base: ColumnBase,
    timeout: Duration,
}

impl RequestDispatcher {
    /// Builds a dispatcher from the current configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let program = launcher::resolve_editor(&config.editor)
            .map_or_else(|| config.editor.clone(), |p| p.display().to_string());
        Self {
            program,
            templates: config.requests.clone(),
            column_base: config.column_base,
            timeout: config.process_timeout(),
        }
    }

    /// Asks the server to open `file`.
    ///
    /// # Errors
    ///
    /// Returns the spawn, timeout or exit-status failure of the directive.
    pub async fn send_open_file(&self, address: &ServerAddress, file: &Path) -> Result<()> {
        let bindings = Bindings::new()
            .with(template::SERVER_SOCKET, address.to_string())
            .with(template::FILE_PATH, template::quote(&file.display().to_string()));
        self.send(RequestKind::OpenFile, &self.templates.open_file_args, &bindings)
            .await
    }

    /// Asks the server to move the cursor.
    ///
    /// # Errors
    ///
    /// Returns the spawn, timeout or exit-status failure of the directive.
    pub async fn send_cursor_jump(
        &self,
        address: &ServerAddress,
        position: CursorPosition,
    ) -> Result<()> {
        let bindings = Bindings::new()
            .with(template::SERVER_SOCKET, address.to_string())
            .with(template::LINE, position.line.to_string())
            .with(
                template::COLUMN,
                self.column_base.render(position.column).to_string(),
            );
        self.send(RequestKind::CursorJump, &self.templates.jump_args, &bindings)
            .await
    }

    /// Asks the server to quit.
    ///
    /// # Errors
    ///
    /// Returns the spawn, timeout or exit-status failure of the directive.
    pub async fn send_quit(&self, address: &ServerAddress) -> Result<()> {
        let bindings = Bindings::new().with(template::SERVER_SOCKET, address.to_string());
        self.send(RequestKind::Quit, &self.templates.quit_args, &bindings)
            .await
    }

    async fn send(&self, kind: RequestKind, args_template: &str, bindings: &Bindings) -> Result<()> {
        let rendered = template::render(args_template, bindings);
        debug!("Dispatching {}: {} {}", kind, self.program, rendered);
        let args = template::split_args(&rendered);

        let outcome = process::run(
            &self.program,
            &args,
            &SpawnOptions::hidden(),
            self.timeout,
            WaitMode::KillOnTimeout,
        )
        .await?;

        match outcome {
            WaitOutcome::Exited(Some(0)) => {
                info!("Sent {} directive", kind);
                Ok(())
            }
            WaitOutcome::Exited(code) => Err(HandoffError::DispatchFailed {
                request: kind,
                code,
            }),
            WaitOutcome::Killed | WaitOutcome::StillRunningDetached(_) => {
                Err(HandoffError::DispatchTimeout {
                    request: kind,
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
        }
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn dispatcher(program: &str, open: &str, jump: &str) -> RequestDispatcher {
        RequestDispatcher {
            program: program.to_string(),
            templates: RequestTemplates {
                open_file_args: open.to_string(),
                jump_args: jump.to_string(),
                quit_args: String::new(),
            },
            column_base: ColumnBase::Zero,
            timeout: Duration::from_millis(300),
        }
    }

    fn address() -> ServerAddress {
        ServerAddress::Socket(PathBuf::from("/tmp/s"))
    }

    #[tokio::test]
    async fn test_open_file_success_and_failure() {
        let ok = dispatcher("true", "{serverSocket} {filePath}", "");
        ok.send_open_file(&address(), Path::new("/a b.cs"))
            .await
            .unwrap();

        let failing = dispatcher("false", "{serverSocket} {filePath}", "");
        let err = failing
            .send_open_file(&address(), Path::new("/a.cs"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandoffError::DispatchFailed {
                request: RequestKind::OpenFile,
                code: Some(1)
            }
        ));
    }

    #[tokio::test]
    async fn test_hung_directive_times_out() {
        let hung = dispatcher("sleep", "10", "");
        let err = hung
            .send_open_file(&address(), Path::new("/a.cs"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HandoffError::DispatchTimeout {
                request: RequestKind::OpenFile,
                timeout_ms: 300
            }
        ));
    }

    #[tokio::test]
    async fn test_jump_renders_column_base() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("argv");
        let jump = format!(
            "-c 'printf %s \"$0\" > {}' {{line}}:{{column}}",
            out.display()
        );
        let sh = dispatcher("sh", "", &jump);
        sh.send_cursor_jump(&address(), CursorPosition { line: 10, column: 3 })
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "10:2");
    }

    #[test]
    fn test_request_kind_display() {
        assert_eq!(RequestKind::OpenFile.to_string(), "open-file");
        assert_eq!(RequestKind::CursorJump.to_string(), "cursor-jump");
        assert_eq!(RequestKind::Quit.to_string(), "quit");
    }
}
