// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use std::path::{Path, PathBuf};

use super::ServerAddress;
use crate::liveness::{self, LIVENESS_TIMEOUT};

/// Domain socket addressing: every server listens on one well-known path.
#[derive(Debug, Clone)]
pub struct PosixSocketOps {
    socket_path: PathBuf,
}

impl PosixSocketOps {
    /// Uses `socket_path` for every launched server.
    #[must_use]
    pub const fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    /// The well-known socket path.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub(super) async fn is_alive(&self, path: &Path) -> bool {
        let probe_path = path.to_path_buf();
        liveness::bounded_probe(&path.display().to_string(), LIVENESS_TIMEOUT, move || {
            liveness::socket_path_exists(&probe_path)
        })
        .await
    }

    pub(super) fn allocate(&self) -> ServerAddress {
        ServerAddress::Socket(self.socket_path.clone())
    }
}
