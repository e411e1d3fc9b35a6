// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Hands files over to a long-lived Neovim server.
//!
//! An IDE that wants Neovim as its external editor calls
//! [`Handoff::open_at`]. The hand-off reuses a running server when the
//! liveness heuristic finds one, launches one through a templated terminal
//! command otherwise, sends the open-file and cursor-jump directives as two
//! separate short-lived processes, and tries to raise the editor window.

/// Terminal output helpers for the CLI.
pub mod cli;
/// Persisted settings, layered loading and saving.
pub mod config;
/// Remote directives to a running server.
pub mod dispatch;
/// Error taxonomy.
pub mod error;
/// Best-effort window focusing.
pub mod focus;
/// The `open_at` orchestrator.
pub mod handoff;
/// Launch template resolution and the launch state machine.
pub mod launcher;
/// Liveness heuristics and the bounded probe wrapper.
pub mod liveness;
/// Cross-process launch lock.
pub mod lock;
/// Platform capability sets.
pub mod platform;
/// Child processes with bounded waits.
pub mod process;
/// Remembered server state.
pub mod state;
/// Placeholder templates.
pub mod template;

pub use config::Config;
pub use error::{HandoffError, Result};
pub use handoff::{Handoff, OpenReport, ServerStatus};
pub use platform::ServerAddress;
