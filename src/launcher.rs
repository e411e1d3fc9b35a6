// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Ensuring a server instance exists.
//!
//! ```text
//! NoServer -> Launching -> LaunchedWaiting -> LaunchConfirmedOrAssumed
//! ```
//!
//! A remembered address that passes the liveness check goes straight to
//! `LaunchConfirmedOrAssumed`. Otherwise a launch template is resolved, a
//! fresh address allocated, and the rendered command spawned in
//! fire-and-detach mode. There is no handshake with the new server: the
//! launch wait doubles as a startup grace period and later directives
//! tolerate a server that is still coming up.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::config::{Config, LaunchTemplate};
use crate::dispatch::CursorPosition;
use crate::error::{HandoffError, Result};
use crate::platform::{PlatformOps, ServerAddress};
use crate::process::{ProcessHandle, SpawnOptions, WaitMode, WaitOutcome};
use crate::state::StateStore;
use crate::template::{self, Bindings};

/// Launch progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    /// No reachable server.
    NoServer,
    /// Spawning the launch command.
    Launching,
    /// Spawned; waiting out the startup grace period.
    LaunchedWaiting,
    /// A server is assumed to be listening.
    LaunchConfirmedOrAssumed,
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoServer => "no-server",
            Self::Launching => "launching",
            Self::LaunchedWaiting => "launched-waiting",
            Self::LaunchConfirmedOrAssumed => "confirmed-or-assumed",
        })
    }
}

/// A server that directives can be sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsuredServer {
    /// Where it listens.
    pub address: ServerAddress,
    /// Whether this call launched it.
    pub launched: bool,
    /// Whether the launch command already carried the file to open.
    pub carried_file: bool,
    /// Host process id, when known.
    pub pid: Option<u32>,
    /// Whether the server is recorded in the state file, so later
    /// invocations can find it.
    pub remembered: bool,
}

/// Result of [`ServerLauncher::ensure_server`].
#[derive(Debug)]
pub struct Launch {
    /// The server to talk to.
    pub server: EnsuredServer,
    /// Host process still running after the launch wait, for exit watching.
    pub host: Option<ProcessHandle>,
    /// Fallback candidate that was picked because no template was configured.
    pub chosen_candidate: Option<LaunchTemplate>,
    /// States the machine passed through, ending in
    /// [`LaunchState::LaunchConfirmedOrAssumed`].
    pub transitions: Vec<LaunchState>,
}

fn advance(transitions: &mut Vec<LaunchState>, next: LaunchState) {
    debug!("Launch state: {}", next);
    transitions.push(next);
}

/// Resolves the editor executable bound to `{app}`.
#[must_use]
pub fn resolve_editor(editor: &str) -> Option<PathBuf> {
    which::which(editor).ok()
}

/// Whether `command` can be started: a `PATH`-resolvable executable, or
/// `{app}` with a resolvable editor.
#[must_use]
pub fn is_launchable(command: &str, editor: &str) -> bool {
    if command.contains(&format!("{{{}}}", template::APP)) {
        return resolve_editor(editor).is_some();
    }
    which::which(command).is_ok()
}

/// Picks the launch template: the configured one as-is, else the first
/// launchable fallback candidate.
///
/// Returns the template and whether it came from the candidate list.
///
/// # Errors
///
/// Returns [`HandoffError::ConfigurationMissing`] if nothing is usable.
pub fn resolve_template(config: &Config) -> Result<(LaunchTemplate, bool)> {
    if let Some(explicit) = &config.launch {
        return Ok((explicit.clone(), false));
    }

    for candidate in &config.launch_candidates {
        if is_launchable(&candidate.command, &config.editor) {
            debug!("Selected launch candidate '{}'", candidate.command);
            return Ok((candidate.clone(), true));
        }
        debug!("Launch candidate '{}' is not available", candidate.command);
    }

    Err(HandoffError::ConfigurationMissing(format!(
        "none of the {} launch candidates is installed",
        config.launch_candidates.len()
    )))
}

/// Drives the launch state machine for one call.
#[derive(Debug)]
pub struct ServerLauncher<'a> {
    config: &'a Config,
    platform: &'a PlatformOps,
    state: &'a StateStore,
}

impl<'a> ServerLauncher<'a> {
    /// Borrows everything a launch needs.
    #[must_use]
    pub const fn new(config: &'a Config, platform: &'a PlatformOps, state: &'a StateStore) -> Self {
        Self {
            config,
            platform,
            state,
        }
    }

    /// Reuses the remembered server if it looks alive, otherwise launches one.
    ///
    /// The liveness check runs once. A launch is attempted at most once:
    /// a failing spawn is reported, never retried with the next candidate.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::ConfigurationMissing`] when no launch
    /// template is usable and [`HandoffError::LaunchFailed`] when the
    /// launch itself fails.
    pub async fn ensure_server(
        &self,
        file: Option<&Path>,
        position: Option<CursorPosition>,
    ) -> Result<Launch> {
        let mut transitions = Vec::new();
        let remembered = self.state.snapshot().await;
        if let Some(address) = remembered.address {
            if self.platform.is_server_alive(&address).await {
                debug!("Server at {} is alive", address);
                advance(&mut transitions, LaunchState::LaunchConfirmedOrAssumed);
                return Ok(Launch {
                    server: EnsuredServer {
                        address,
                        launched: false,
                        carried_file: false,
                        pid: remembered.pid,
                        remembered: true,
                    },
                    host: None,
                    chosen_candidate: None,
                    transitions,
                });
            }
            info!("Remembered server at {} is gone", address);
        }
        advance(&mut transitions, LaunchState::NoServer);

        let (launch, from_candidates) = resolve_template(self.config)?;
        let address = self.platform.allocate_address()?;
        let bindings = self.bindings(&launch, &address, file, position);

        let command = template::render(&launch.command, &bindings);
        let rendered_args = template::render(&launch.args, &bindings);
        let args = template::split_args(&rendered_args);
        let env = template::parse_environment(&template::render(&launch.env, &bindings));
        let command_line = format!("{command} {rendered_args}");

        advance(&mut transitions, LaunchState::Launching);
        debug!("Launch command: {}", command_line);
        let handle =
            ProcessHandle::spawn(&command, &args, &SpawnOptions::detached_visible().with_env(env))
                .map_err(|e| HandoffError::LaunchFailed(e.to_string()))?;

        let outcome = handle
            .wait_or_kill(self.config.process_timeout(), WaitMode::DetachOnTimeout)
            .await
            .map_err(|e| HandoffError::LaunchFailed(e.to_string()))?;

        let (pid, host) = match outcome {
            WaitOutcome::StillRunningDetached(host) => (host.pid(), Some(host)),
            // Terminal launchers commonly hand off to a daemon and exit.
            WaitOutcome::Exited(Some(0)) => (None, None),
            WaitOutcome::Exited(code) => {
                return Err(HandoffError::LaunchFailed(format!(
                    "'{command}' exited with status {code:?} before the server came up"
                )));
            }
            WaitOutcome::Killed => {
                return Err(HandoffError::LaunchFailed(format!(
                    "'{command}' was killed during startup"
                )));
            }
        };
        advance(&mut transitions, LaunchState::LaunchedWaiting);
        debug!("Host pid {:?}", pid);

        let remembered = match self
            .state
            .record_launch(address.clone(), pid, command_line)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to record server at {} in {}; other invocations will not find it: {}",
                    address,
                    self.state.path().display(),
                    e
                );
                false
            }
        };
        info!("Launched server at {} via '{}'", address, command);
        advance(&mut transitions, LaunchState::LaunchConfirmedOrAssumed);

        let carried_file = file.is_some()
            && [&launch.command, &launch.args]
                .iter()
                .any(|t| t.contains(&format!("{{{}}}", template::FILE_PATH)));

        Ok(Launch {
            server: EnsuredServer {
                address,
                launched: true,
                carried_file,
                pid,
                remembered,
            },
            host,
            chosen_candidate: from_candidates.then_some(launch),
            transitions,
        })
    }

    fn bindings(
        &self,
        launch: &LaunchTemplate,
        address: &ServerAddress,
        file: Option<&Path>,
        position: Option<CursorPosition>,
    ) -> Bindings {
        let app = resolve_editor(&self.config.editor)
            .map_or_else(|| self.config.editor.clone(), |p| p.display().to_string());
        let file_path = file
            .map(|f| template::quote(&f.display().to_string()))
            .unwrap_or_default();
        let position = position.unwrap_or(CursorPosition { line: 1, column: 1 });

        let mut bindings = Bindings::new()
            .with(template::APP, app)
            .with(template::FILE_PATH, file_path)
            .with(template::SERVER_SOCKET, address.to_string())
            .with(template::LINE, position.line.to_string())
            .with(
                template::COLUMN,
                self.config.column_base.render(position.column).to_string(),
            );
        self.platform.extend_bindings(&mut bindings);

        // `{environment}` may appear in the arguments as well (e.g. `env {environment} ...`).
        let environment = template::render(&launch.env, &bindings);
        bindings.insert(template::ENVIRONMENT, environment);
        bindings
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
    use crate::config::Addressing;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Config,
        platform: PlatformOps,
        state: StateStore,
    }

    fn fixture(launch: Option<LaunchTemplate>, candidates: Vec<LaunchTemplate>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("server.json");
        fixture_with_state(dir, state_path, launch, candidates)
    }

    fn fixture_with_state(
        dir: tempfile::TempDir,
        state_path: PathBuf,
        launch: Option<LaunchTemplate>,
        candidates: Vec<LaunchTemplate>,
    ) -> Fixture {
        let mut config = Config::default();
        config.addressing = Addressing::Socket;
        config.socket_path = dir.path().join("nvimsocket");
        config.process_timeout_ms = 200;
        config.editor = "sh".to_string();
        config.launch = launch;
        config.launch_candidates = candidates;
        let platform = PlatformOps::from_config(&config).unwrap();
        let state = StateStore::open(state_path);
        Fixture {
            _dir: dir,
            config,
            platform,
            state,
        }
    }

    #[test]
    fn test_resolve_template_skips_missing_candidates() {
        let f = fixture(
            None,
            vec![
                LaunchTemplate::new("nonexistent-term-3f9a", "-e {app}", ""),
                LaunchTemplate::new("{app}", "--listen {serverSocket}", ""),
            ],
        );
        let (template, from_candidates) = resolve_template(&f.config).unwrap();
        assert_eq!(template.command, "{app}");
        assert!(from_candidates);
    }

    #[test]
    fn test_resolve_template_explicit_wins() {
        let explicit = LaunchTemplate::new("nonexistent-term-3f9a", "", "");
        let f = fixture(Some(explicit.clone()), Vec::new());
        assert_eq!(resolve_template(&f.config).unwrap(), (explicit, false));
    }

    #[test]
    fn test_resolve_template_nothing_usable() {
        let f = fixture(None, vec![LaunchTemplate::new("nonexistent-term-3f9a", "", "")]);
        assert!(matches!(
            resolve_template(&f.config),
            Err(HandoffError::ConfigurationMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_launch_failed() {
        let f = fixture(Some(LaunchTemplate::new("nonexistent-term-3f9a", "", "")), Vec::new());
        let launcher = ServerLauncher::new(&f.config, &f.platform, &f.state);
        let err = launcher.ensure_server(None, None).await.unwrap_err();
        assert!(matches!(err, HandoffError::LaunchFailed(_)));
        assert_eq!(f.state.snapshot().await.address, None);
    }

    #[tokio::test]
    async fn test_early_nonzero_exit_is_launch_failed() {
        let f = fixture(Some(LaunchTemplate::new("{app}", "-c 'exit 4'", "")), Vec::new());
        let launcher = ServerLauncher::new(&f.config, &f.platform, &f.state);
        let err = launcher.ensure_server(None, None).await.unwrap_err();
        assert!(matches!(err, HandoffError::LaunchFailed(m) if m.contains("Some(4)")));
    }

    #[tokio::test]
    async fn test_trampoline_launch_and_reuse() {
        // Creates the socket path and exits, like a terminal handing off to its daemon.
        let f = fixture(
            None,
            vec![LaunchTemplate::new(
                "{app}",
                "-c 'touch \"$0\"' {serverSocket} {filePath}",
                "",
            )],
        );
        let launcher = ServerLauncher::new(&f.config, &f.platform, &f.state);

        let first = launcher
            .ensure_server(Some(Path::new("/tmp/x.cs")), None)
            .await
            .unwrap();
        assert!(first.server.launched);
        assert!(first.server.carried_file);
        assert!(first.server.remembered);
        assert_eq!(
            first.transitions,
            vec![
                LaunchState::NoServer,
                LaunchState::Launching,
                LaunchState::LaunchedWaiting,
                LaunchState::LaunchConfirmedOrAssumed,
            ]
        );
        assert!(first.host.is_none());
        assert_eq!(first.server.pid, None);
        assert_eq!(
            first.chosen_candidate.map(|c| c.command),
            Some("{app}".to_string())
        );
        assert_eq!(
            f.state.snapshot().await.address,
            Some(ServerAddress::Socket(f.config.socket_path.clone()))
        );

        let second = launcher.ensure_server(None, None).await.unwrap();
        assert!(!second.server.launched);
        assert_eq!(second.server.address, first.server.address);
        assert_eq!(second.transitions, vec![LaunchState::LaunchConfirmedOrAssumed]);
    }

    #[tokio::test]
    async fn test_unsaved_launch_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let f = fixture_with_state(
            dir,
            blocker.join("server.json"),
            Some(LaunchTemplate::new("{app}", "-c 'touch \"$0\"' {serverSocket}", "")),
            Vec::new(),
        );
        let launcher = ServerLauncher::new(&f.config, &f.platform, &f.state);

        let launch = launcher.ensure_server(None, None).await.unwrap();
        assert!(launch.server.launched);
        assert!(!launch.server.remembered);
        assert_eq!(
            launch.transitions.last(),
            Some(&LaunchState::LaunchConfirmedOrAssumed)
        );
        // Still known to this process.
        assert_eq!(f.state.snapshot().await.address, Some(launch.server.address));
    }

    #[tokio::test]
    async fn test_long_running_host_is_detached() {
        let f = fixture(
            Some(LaunchTemplate::new("{app}", "-c 'sleep 5'", "")),
            Vec::new(),
        );
        let launcher = ServerLauncher::new(&f.config, &f.platform, &f.state);
        let launch = launcher.ensure_server(None, None).await.unwrap();
        let Some(host) = launch.host else {
            panic!("expected a detached host process");
        };
        assert_eq!(host.pid(), launch.server.pid);
        assert_eq!(f.state.snapshot().await.pid, launch.server.pid);
        assert!(!launch.server.carried_file);

        let outcome = host
            .wait_or_kill(std::time::Duration::from_millis(10), WaitMode::KillOnTimeout)
            .await;
        assert!(matches!(outcome, Ok(WaitOutcome::Killed)));
    }

    #[tokio::test]
    async fn test_environment_reaches_launched_process() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env");
        let f = fixture(
            Some(LaunchTemplate::new(
                "{app}",
                &format!("-c 'printf %s \"$NVIM_APPNAME\" > {}'", out.display()),
                "NVIM_APPNAME=unity",
            )),
            Vec::new(),
        );
        let launcher = ServerLauncher::new(&f.config, &f.platform, &f.state);
        launcher.ensure_server(None, None).await.unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "unity");
    }
}
