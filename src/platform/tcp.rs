// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use super::ServerAddress;
use crate::error::{HandoffError, Result};
use crate::liveness::{self, LIVENESS_TIMEOUT};
use crate::template::{self, Bindings};

/// TCP addressing: each launch gets a fresh ephemeral port on `host`.
#[derive(Debug, Clone)]
pub struct WindowsTcpOps {
    host: IpAddr,
    ppid_script: Option<PathBuf>,
}

impl WindowsTcpOps {
    /// Listens on `host`; `ppid_script` is bound to `{getProcessPPIDScriptPath}`.
    #[must_use]
    pub const fn new(host: IpAddr, ppid_script: Option<PathBuf>) -> Self {
        Self { host, ppid_script }
    }

    pub(super) async fn is_alive(&self, addr: SocketAddr) -> bool {
        liveness::bounded_probe(&addr.to_string(), LIVENESS_TIMEOUT, move || {
            liveness::port_in_use(addr)
        })
        .await
    }

    pub(super) fn allocate(&self) -> Result<ServerAddress> {
        let port = liveness::free_port(self.host).map_err(|e| {
            HandoffError::LaunchFailed(format!("no free port on {}: {e}", self.host))
        })?;
        Ok(ServerAddress::Tcp(SocketAddr::new(self.host, port)))
    }

    pub(super) fn extend_bindings(&self, bindings: &mut Bindings) {
        if let Some(script) = &self.ppid_script {
            bindings.insert(
                template::PPID_SCRIPT_PATH,
                template::quote(&script.display().to_string()),
            );
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Tests use unwrap and panic for brevity"
)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, TcpListener};

    fn ops() -> WindowsTcpOps {
        WindowsTcpOps::new(IpAddr::V4(Ipv4Addr::LOCALHOST), None)
    }

    #[tokio::test]
    async fn test_allocated_port_is_free_until_bound() {
        let ops = ops();
        let ServerAddress::Tcp(addr) = ops.allocate().unwrap() else {
            panic!("expected a TCP address");
        };
        assert_eq!(addr.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(!ops.is_alive(addr).await);

        let _listener = TcpListener::bind(addr).unwrap();
        assert!(ops.is_alive(addr).await);
    }

    #[test]
    fn test_ppid_script_binding() {
        let mut bindings = Bindings::new();
        ops().extend_bindings(&mut bindings);
        assert!(bindings.get(template::PPID_SCRIPT_PATH).is_none());

        let with_script = WindowsTcpOps::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            Some(PathBuf::from("C:/scripts/ppid.ps1")),
        );
        with_script.extend_bindings(&mut bindings);
        assert_eq!(
            bindings.get(template::PPID_SCRIPT_PATH),
            Some("\"C:/scripts/ppid.ps1\"")
        );
    }
}
