// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error taxonomy for the editor hand-off.
//!
//! Errors that decide whether the file was actually opened propagate up to
//! [`crate::Handoff::open_at`]. Errors from best-effort steps (cursor jump,
//! window focus) are logged where they happen and never reach the caller.

use std::path::PathBuf;

use thiserror::Error;

use crate::dispatch::RequestKind;

/// Failures raised while handing a file over to the editor server.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// No launch template is configured and no fallback candidate is usable.
    #[error("no usable launch command: {0} (run `nvim-handoff config set-launch` to configure one)")]
    ConfigurationMissing(String),

    /// The OS refused to create a process.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that could not be started.
        program: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A server launch was attempted and did not succeed.
    #[error("failed to launch editor server: {0}")]
    LaunchFailed(String),

    /// A fire-and-kill request exceeded its wait bound and was killed.
    #[error("{request} request did not finish within {timeout_ms}ms and was killed")]
    DispatchTimeout {
        /// Request that timed out.
        request: RequestKind,
        /// Wait bound that was exceeded.
        timeout_ms: u64,
    },

    /// A request process exited with a non-zero status.
    #[error("{request} request exited with status {}", .code.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    DispatchFailed {
        /// Request that failed.
        request: RequestKind,
        /// Exit code, if the process reported one.
        code: Option<i32>,
    },

    /// The liveness heuristic could not decide; callers treat this as "not alive".
    #[error("liveness check for {address} was inconclusive: {reason}")]
    LivenessCheckAmbiguous {
        /// Address that was probed.
        address: String,
        /// Why the probe was inconclusive.
        reason: String,
    },

    /// The window focusing mechanism is missing or failed.
    #[error("window focus unavailable: {0}")]
    FocusUnavailable(String),

    /// The file to open does not exist.
    #[error("file does not exist: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A setting was rejected.
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// Result alias for hand-off operations.
pub type Result<T> = std::result::Result<T, HandoffError>;
