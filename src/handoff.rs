// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The `open_at` entry point tying launcher, dispatcher and focuser together.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dispatch::{CursorPosition, RequestDispatcher};
use crate::error::{HandoffError, Result};
use crate::focus::WindowFocuser;
use crate::launcher::{EnsuredServer, ServerLauncher};
use crate::lock::{self, LaunchLock};
use crate::platform::{FocusHint, PlatformOps, ServerAddress};
use crate::process::ProcessHandle;
use crate::state::{ServerState, StateStore};

/// How long to wait for another invocation's launch to finish.
const LAUNCH_LOCK_WAIT: Duration = Duration::from_secs(2 * lock::STALE_AFTER.as_secs());

/// What an `open_at` call achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenReport {
    /// Server the file was handed to.
    pub server: EnsuredServer,
    /// Whether the cursor-jump directive succeeded (false if none was sent).
    pub cursor_moved: bool,
    /// Whether the window was raised.
    pub focused: bool,
}

/// Remembered server plus a fresh liveness verdict.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    /// Addressing in use (`socket` or `tcp`).
    pub platform: &'static str,
    /// Remembered state.
    pub state: ServerState,
    /// Liveness of the remembered address; `false` when nothing is remembered.
    pub alive: bool,
}

/// Owns configuration, remembered state and the platform capability set.
///
/// Calls to [`Handoff::open_at`] are serialized, so overlapping requests
/// never launch a second server for the same address. Within one process a
/// mutex does this; across processes the launch step also holds a
/// [`LaunchLock`] next to the state file.
#[derive(Debug)]
pub struct Handoff {
    config: Mutex<Config>,
    state: Arc<StateStore>,
    platform: PlatformOps,
    focuser: WindowFocuser,
    gate: Mutex<()>,
}

impl Handoff {
    /// Builds a hand-off from loaded configuration.
    ///
    /// Addressing is fixed here; changing it takes effect on the next start.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::InvalidSetting`] for an unusable addressing setup.
    pub fn new(config: Config) -> Result<Self> {
        let platform = PlatformOps::from_config(&config)?;
        let state = Arc::new(StateStore::open(config.state_path()));
        debug!(
            "Hand-off ready ({} addressing, state at {})",
            platform.name(),
            state.path().display()
        );
        Ok(Self {
            config: Mutex::new(config),
            state,
            platform,
            focuser: WindowFocuser::new(),
            gate: Mutex::new(()),
        })
    }

    /// Opens `file` in the editor server, launching one if needed.
    ///
    /// `line` and `column` are 1-based; without a line no cursor jump is
    /// sent, a missing column means column 1. An empty path only brings up
    /// and focuses the server. Returns `false` when the caller should fall
    /// back to its own way of opening the file.
    pub async fn open_at(&self, file: &Path, line: Option<u32>, column: Option<u32>) -> bool {
        match self.try_open_at(file, line, column).await {
            Ok(report) => {
                debug!("Open finished: {:?}", report);
                true
            }
            Err(e) => {
                warn!("Could not open {} in the editor: {}", file.display(), e);
                false
            }
        }
    }

    /// Like [`Handoff::open_at`], reporting what happened.
    ///
    /// # Errors
    ///
    /// Returns the error that prevented the file from being opened. Cursor
    /// and focus failures are logged and reflected in the report instead.
    pub async fn try_open_at(
        &self,
        file: &Path,
        line: Option<u32>,
        column: Option<u32>,
    ) -> Result<OpenReport> {
        let file = (!file.as_os_str().is_empty()).then_some(file);
        if let Some(path) = file
            && !path.is_file()
        {
            return Err(HandoffError::FileNotFound(path.to_path_buf()));
        }
        let position = line.map(|line| CursorPosition {
            line,
            column: column.unwrap_or(1),
        });

        let _gate = self.gate.lock().await;
        let config = self.config.lock().await.clone();

        let launch = {
            let _launch_lock = self.launch_lock().await;
            self.state.reload().await;
            ServerLauncher::new(&config, &self.platform, &self.state)
                .ensure_server(file, position)
                .await?
        };
        let server = launch.server;

        if let Some(chosen) = launch.chosen_candidate {
            self.remember_candidate(chosen).await;
        }
        if let Some(host) = launch.host {
            self.watch_exit(host, server.address.clone());
        }

        let dispatcher = RequestDispatcher::new(&config);
        let mut cursor_moved = false;

        if let Some(path) = file {
            match dispatcher.send_open_file(&server.address, path).await {
                Ok(()) => {}
                Err(e) if server.carried_file => {
                    warn!("Open-file directive failed after launch, file was passed at startup: {e}");
                }
                Err(e) => return Err(e),
            }

            if let Some(position) = position {
                match dispatcher.send_cursor_jump(&server.address, position).await {
                    Ok(()) => cursor_moved = true,
                    Err(e) => warn!("Cursor jump failed, file is open: {e}"),
                }
            }
        }

        let hint = FocusHint {
            address: server.address.clone(),
            pid: server.pid,
        };
        let focused = self
            .focuser
            .try_focus(&self.platform, &config.focus, &hint, config.process_timeout())
            .await;

        Ok(OpenReport {
            server,
            cursor_moved,
            focused,
        })
    }

    /// Sends the quit directive to a live remembered server and forgets it.
    ///
    /// Returns whether a live server was asked to quit.
    ///
    /// # Errors
    ///
    /// Returns the quit dispatch failure; the remembered state is kept then.
    pub async fn close_server(&self) -> anyhow::Result<bool> {
        let _gate = self.gate.lock().await;
        let _launch_lock = self.launch_lock().await;
        self.state.reload().await;
        let remembered = self.state.snapshot().await;
        let Some(address) = remembered.address else {
            return Ok(false);
        };

        let alive = self.platform.is_server_alive(&address).await;
        if alive {
            let config = self.config.lock().await.clone();
            RequestDispatcher::new(&config).send_quit(&address).await?;
            info!("Asked server at {} to quit", address);
        }
        self.state.clear().await?;
        Ok(alive)
    }

    /// Remembered server and whether it currently looks alive.
    pub async fn status(&self) -> ServerStatus {
        self.state.reload().await;
        let state = self.state.snapshot().await;
        let alive = match &state.address {
            Some(address) => self.platform.is_server_alive(address).await,
            None => false,
        };
        ServerStatus {
            platform: self.platform.name(),
            state,
            alive,
        }
    }

    /// Applies a settings change and saves the configuration if it changed.
    ///
    /// # Errors
    ///
    /// Returns an error if saving fails.
    pub async fn update_config<R>(&self, change: impl FnOnce(&mut Config) -> R) -> anyhow::Result<R> {
        let mut config = self.config.lock().await;
        let result = change(&mut config);
        if config.save()? {
            info!("Saved configuration");
        }
        Ok(result)
    }

    /// Restores default settings and forgets the remembered server.
    ///
    /// # Errors
    ///
    /// Returns an error if the config or state file cannot be written.
    pub async fn reset(&self) -> anyhow::Result<()> {
        self.update_config(Config::reset).await?;
        self.state.clear().await
    }

    /// Copy of the current configuration.
    pub async fn config(&self) -> Config {
        self.config.lock().await.clone()
    }

    /// The remembered-state store.
    #[must_use]
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// The platform capability set in use.
    #[must_use]
    pub const fn platform(&self) -> &PlatformOps {
        &self.platform
    }

    /// Takes the cross-process launch lock. Without a writable lock file
    /// the hand-off still proceeds, unguarded against other processes.
    async fn launch_lock(&self) -> Option<LaunchLock> {
        let path = LaunchLock::path_for(self.state.path());
        match LaunchLock::acquire(&path, LAUNCH_LOCK_WAIT).await {
            Ok(held) => Some(held),
            Err(e) => {
                warn!("Proceeding without the launch lock: {e}");
                None
            }
        }
    }

    async fn remember_candidate(&self, chosen: crate::config::LaunchTemplate) {
        let command = chosen.command.clone();
        let saved = self
            .update_config(|config| config.set_launch_template(Some(chosen)))
            .await;
        match saved {
            Ok(()) => info!("Using '{}' as the launch command from now on", command),
            Err(e) => warn!("Failed to save launch command '{}': {}", command, e),
        }
    }

    /// Forgets the server once its host process exits, unless a newer
    /// launch replaced it.
    fn watch_exit(&self, host: ProcessHandle, address: ServerAddress) {
        let state = Arc::clone(&self.state);
        let pid = host.pid();
        tokio::spawn(async move {
            let code = host.wait().await;
            info!("Server at {} exited with {:?}", address, code);
            state.invalidate(&address, pid).await;
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::config::{Addressing, LaunchTemplate};

    fn handoff(dir: &Path) -> Handoff {
        let mut config = Config::default();
        config.addressing = Addressing::Socket;
        config.socket_path = dir.join("nvimsocket");
        config.state_file = Some(dir.join("server.json"));
        config.launch = Some(LaunchTemplate::new("nonexistent-term-3f9a", "", ""));
        config.focus.enabled = false;
        config.set_path(dir.join("config.toml"));
        Handoff::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let h = handoff(dir.path());
        let err = h
            .try_open_at(&dir.path().join("missing.cs"), Some(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, HandoffError::FileNotFound(_)));
        assert!(!h.open_at(&dir.path().join("missing.cs"), None, None).await);
    }

    #[tokio::test]
    async fn test_directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let h = handoff(dir.path());
        let err = h.try_open_at(dir.path(), Some(1), None).await.unwrap_err();
        assert!(matches!(err, HandoffError::FileNotFound(_)));
        assert!(!dir.path().join("server.lock").exists());
    }

    #[tokio::test]
    async fn test_launch_failure_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.cs");
        std::fs::write(&file, "").unwrap();
        let h = handoff(dir.path());
        assert!(!h.open_at(&file, None, None).await);
        assert!(!dir.path().join("server.lock").exists());
    }

    #[tokio::test]
    async fn test_launch_failure_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.cs");
        std::fs::write(&file, "").unwrap();
        let h = handoff(dir.path());
        assert!(!h.open_at(&file, Some(10), Some(3)).await);
        assert!(h.state().snapshot().await.address.is_none());
    }

    #[tokio::test]
    async fn test_close_without_server() {
        let dir = tempfile::tempdir().unwrap();
        let h = handoff(dir.path());
        assert!(!h.close_server().await.unwrap());
        let status = h.status().await;
        assert!(!status.alive);
        assert_eq!(status.platform, "socket");
    }

    #[tokio::test]
    async fn test_reset_saves_defaults_and_forgets_server() {
        let dir = tempfile::tempdir().unwrap();
        let h = handoff(dir.path());
        h.state()
            .record_launch(
                ServerAddress::Socket(dir.path().join("nvimsocket")),
                None,
                String::new(),
            )
            .await
            .unwrap();

        h.reset().await.unwrap();
        assert!(h.config().await.launch.is_none());
        assert!(dir.path().join("config.toml").exists());
        assert!(h.state().snapshot().await.address.is_none());
    }
}
