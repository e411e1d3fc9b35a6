// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Remembered server state.
//!
//! The address and process id of the last launched server survive across
//! invocations in a small JSON file, written atomically (temp file, then
//! rename). It is re-read under the launch lock at the start of every
//! hand-off, since another process may have launched a server meanwhile; the
//! exit watcher and `close` invalidate it.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::platform::ServerAddress;

/// What is known about the last launched server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    /// Address the server was told to listen on.
    #[serde(default)]
    pub address: Option<ServerAddress>,
    /// Process id of the launched host process, if it stayed alive past the
    /// launch wait (terminal launchers that fork and exit leave this empty).
    #[serde(default)]
    pub pid: Option<u32>,
    /// When the server was launched.
    #[serde(default)]
    pub launched_at: Option<DateTime<Utc>>,
    /// Rendered launch command line, for diagnostics.
    #[serde(default)]
    pub launch_command: Option<String>,
}

/// Mutex-guarded, file-backed [`ServerState`].
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: Mutex<ServerState>,
    /// Whether the file matches the in-memory state.
    synced: AtomicBool,
}

impl StateStore {
    /// Opens the store at `path`, starting empty if the file is missing or
    /// unreadable.
    #[must_use]
    pub fn open(path: PathBuf) -> Self {
        let state = read_state(&path);
        debug!("Loaded server state from {}: {:?}", path.display(), state);
        Self {
            path,
            state: Mutex::new(state),
            synced: AtomicBool::new(true),
        }
    }

    /// Replaces the in-memory state with the file's contents.
    ///
    /// A launch that could not be written to the file is kept instead, so
    /// this process still reuses the server it started.
    pub async fn reload(&self) {
        let mut state = self.state.lock().await;
        if !self.synced.load(Ordering::Acquire) {
            debug!("Keeping unsaved server state over {}", self.path.display());
            return;
        }
        *state = read_state(&self.path);
    }

    /// File backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the current state.
    pub async fn snapshot(&self) -> ServerState {
        self.state.lock().await.clone()
    }

    /// Records a freshly launched server.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written.
    pub async fn record_launch(
        &self,
        address: ServerAddress,
        pid: Option<u32>,
        launch_command: String,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = ServerState {
            address: Some(address),
            pid,
            launched_at: Some(Utc::now()),
            launch_command: Some(launch_command),
        };
        self.persist(&state)
    }

    /// Forgets the server at `address` launched as `pid`, unless a newer
    /// launch has replaced it in the meantime. Returns whether anything was
    /// cleared.
    pub async fn invalidate(&self, address: &ServerAddress, pid: Option<u32>) -> bool {
        let mut state = self.state.lock().await;
        if state.address.as_ref() != Some(address) || state.pid != pid {
            debug!("Not invalidating {}: state has moved on", address);
            return false;
        }
        *state = ServerState::default();
        if let Err(e) = self.persist(&state) {
            warn!("Failed to persist invalidated server state: {}", e);
        }
        info!("Forgot server at {}", address);
        true
    }

    /// Forgets whatever server is remembered.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be written.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        *state = ServerState::default();
        self.persist(&state)
    }

    fn persist(&self, state: &ServerState) -> Result<()> {
        let bytes =
            serde_json::to_vec_pretty(state).map_err(|e| anyhow!("JSON serialize: {e}"))?;
        let written = atomic_write(&self.path, &bytes);
        self.synced.store(written.is_ok(), Ordering::Release);
        written
    }
}

fn read_state(path: &Path) -> ServerState {
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
            warn!("Ignoring corrupt server state {}: {}", path.display(), e);
            ServerState::default()
        }),
        Err(_) => ServerState::default(),
    }
}

/// Atomically writes bytes to a file via temp + rename, creating parent
/// directories as needed.
///
/// # Errors
///
/// Returns an error if the directory, temp file or rename fails.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow!("Failed to create {}: {e}", parent.display()))?;
    }

    let pid = std::process::id();
    let temp_path = path.with_extension(format!("tmp.{pid}"));

    std::fs::write(&temp_path, data)
        .map_err(|e| anyhow!("Failed to write temp file {}: {e}", temp_path.display()))?;

    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        anyhow!(
            "Failed to rename {} -> {}: {e}",
            temp_path.display(),
            path.display()
        )
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    fn socket(path: &str) -> ServerAddress {
        ServerAddress::Socket(PathBuf::from(path))
    }

    #[tokio::test]
    async fn test_record_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("server.json");

        let store = StateStore::open(path.clone());
        assert_eq!(store.snapshot().await, ServerState::default());

        store
            .record_launch(socket("/tmp/nvimsocket"), Some(42), "kitty nvim".to_string())
            .await
            .unwrap();

        let reopened = StateStore::open(path);
        let state = reopened.snapshot().await;
        assert_eq!(state.address, Some(socket("/tmp/nvimsocket")));
        assert_eq!(state.pid, Some(42));
        assert_eq!(state.launch_command.as_deref(), Some("kitty nvim"));
        assert!(state.launched_at.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_only_matching_server() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("server.json"));
        store
            .record_launch(socket("/tmp/b"), Some(2), String::new())
            .await
            .unwrap();

        // A watcher for an older server must not clear the newer one.
        assert!(!store.invalidate(&socket("/tmp/a"), Some(1)).await);
        assert!(!store.invalidate(&socket("/tmp/b"), Some(1)).await);
        assert!(store.snapshot().await.address.is_some());

        assert!(store.invalidate(&socket("/tmp/b"), Some(2)).await);
        assert_eq!(store.snapshot().await, ServerState::default());
    }

    #[tokio::test]
    async fn test_reload_sees_other_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        let ours = StateStore::open(path.clone());
        let theirs = StateStore::open(path);

        theirs
            .record_launch(socket("/tmp/theirs"), Some(7), String::new())
            .await
            .unwrap();
        assert_eq!(ours.snapshot().await.address, None);

        ours.reload().await;
        assert_eq!(ours.snapshot().await.address, Some(socket("/tmp/theirs")));
    }

    #[tokio::test]
    async fn test_reload_keeps_unsaved_launch() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let store = StateStore::open(blocker.join("server.json"));

        let saved = store
            .record_launch(socket("/tmp/nvimsocket"), None, String::new())
            .await;
        assert!(saved.is_err());

        store.reload().await;
        assert_eq!(store.snapshot().await.address, Some(socket("/tmp/nvimsocket")));
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = StateStore::open(path);
        assert_eq!(store.snapshot().await, ServerState::default());
        store.clear().await.unwrap();
    }

    #[test]
    fn test_atomic_write_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("f.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
    }
}
