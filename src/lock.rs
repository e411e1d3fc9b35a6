// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Cross-process launch lock.
//!
//! Every `nvim-handoff open` is its own process, so the in-process gate in
//! [`crate::Handoff`] cannot stop two overlapping invocations from both
//! launching a server. They coordinate through a lock file next to the
//! state file instead.
//!
//! The claim is written to a temp file first and then published with a hard
//! link, which fails when a claim already exists. Unlike a rename, a link
//! never replaces someone else's claim. A claim older than [`STALE_AFTER`]
//! is considered abandoned and may be removed by the next contender.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Age after which a claim is treated as left behind by a crashed holder.
pub const STALE_AFTER: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

/// Contents of the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockClaim {
    /// Identifies the holder: process id plus a per-process counter.
    token: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// A held launch lock, released on drop.
#[derive(Debug)]
pub struct LaunchLock {
    path: PathBuf,
    token: String,
}

impl LaunchLock {
    /// Lock file belonging to the state file at `state_path`.
    #[must_use]
    pub fn path_for(state_path: &Path) -> PathBuf {
        state_path.with_extension("lock")
    }

    /// Waits up to `wait` for the lock at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be written, or if another
    /// live holder keeps it for longer than `wait`.
    pub async fn acquire(path: &Path, wait: Duration) -> Result<Self> {
        let token = format!(
            "{}-{}",
            std::process::id(),
            NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
        );
        let deadline = Instant::now() + wait;

        loop {
            if try_claim(path, &token)? {
                debug!("Took launch lock {}", path.display());
                return Ok(Self {
                    path: path.to_path_buf(),
                    token,
                });
            }

            if is_stale(path) {
                warn!("Removing abandoned launch lock {}", path.display());
                let _ = std::fs::remove_file(path);
                continue;
            }

            if Instant::now() >= deadline {
                let holder =
                    read_claim(path).map_or_else(|| "unknown".to_string(), |c| c.pid.to_string());
                bail!(
                    "Launch lock {} is still held by pid {holder} after {wait:?}",
                    path.display()
                );
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Lock file this guard holds.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LaunchLock {
    fn drop(&mut self) {
        // A stale-lock sweep may have handed the file to someone else.
        if read_claim(&self.path).is_some_and(|c| c.token == self.token) {
            let _ = std::fs::remove_file(&self.path);
            debug!("Released launch lock {}", self.path.display());
        }
    }
}

/// Publishes a claim via temp file + hard link. Returns `false` if another
/// claim is already in place.
fn try_claim(path: &Path, token: &str) -> Result<bool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| anyhow!("Failed to create {}: {e}", parent.display()))?;
    }

    let claim = LockClaim {
        token: token.to_string(),
        pid: std::process::id(),
        acquired_at: Utc::now(),
    };
    let bytes = serde_json::to_vec_pretty(&claim).map_err(|e| anyhow!("JSON serialize: {e}"))?;

    let temp_path = path.with_extension(format!("lock.{token}"));
    std::fs::write(&temp_path, bytes)
        .map_err(|e| anyhow!("Failed to write temp lock file {}: {e}", temp_path.display()))?;

    let linked = std::fs::hard_link(&temp_path, path);
    let _ = std::fs::remove_file(&temp_path);
    match linked {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(anyhow!(
            "Failed to link {} -> {}: {e}",
            temp_path.display(),
            path.display()
        )),
    }
}

fn read_claim(path: &Path) -> Option<LockClaim> {
    let data = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

/// Whether the claim at `path` is old enough to reclaim. An unreadable
/// claim is judged by the file's modification time.
fn is_stale(path: &Path) -> bool {
    if let Some(claim) = read_claim(path) {
        return (Utc::now() - claim.acquired_at)
            .to_std()
            .is_ok_and(|age| age > STALE_AFTER);
    }
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > STALE_AFTER)
}
