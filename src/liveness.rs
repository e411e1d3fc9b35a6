// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Heuristics for "is an editor server already listening here?".
//!
//! Neither strategy is a correctness guarantee:
//! - A socket path can be a stale leftover or belong to something else.
//! - A port can be taken by an unrelated process, or a server can appear
//!   right after the probe released it.
//!
//! Every probe runs on the blocking pool under a deadline, so a hung
//! filesystem or network stack yields "not alive" instead of blocking the
//! caller.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::HandoffError;

/// Upper bound for a single liveness probe.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_millis(250);

/// Runs `probe` with a deadline.
///
/// Errors, panics and timeouts are all inconclusive and count as "not
/// alive"; the worst outcome is a redundant launch.
pub async fn bounded_probe<F>(address: &str, timeout: Duration, probe: F) -> bool
where
    F: FnOnce() -> io::Result<bool> + Send + 'static,
{
    let reason = match tokio::time::timeout(timeout, tokio::task::spawn_blocking(probe)).await {
        Ok(Ok(Ok(alive))) => {
            debug!("Liveness probe for {}: {}", address, alive);
            return alive;
        }
        Ok(Ok(Err(e))) => e.to_string(),
        Ok(Err(join)) => format!("probe task failed: {join}"),
        Err(_) => format!("no answer within {}ms", timeout.as_millis()),
    };

    let err = HandoffError::LivenessCheckAmbiguous {
        address: address.to_string(),
        reason,
    };
    warn!("{err}; assuming no server");
    false
}

/// Path strategy: the socket file existing stands in for a listening server.
///
/// # Errors
///
/// Returns the I/O error when existence cannot be determined (e.g. permissions).
pub fn socket_path_exists(path: &Path) -> io::Result<bool> {
    path.try_exists()
}

/// Port strategy: if binding the address fails because it is taken, a
/// server is assumed to own it. A successful bind means nobody is there;
/// the probe listener is released immediately.
///
/// # Errors
///
/// Returns bind errors other than "address in use" (and the Windows
/// exclusive-use "access denied"), which are inconclusive.
pub fn port_in_use(addr: SocketAddr) -> io::Result<bool> {
    match TcpListener::bind(addr) {
        Ok(listener) => {
            drop(listener);
            Ok(false)
        }
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => Ok(true),
        Err(e) if cfg!(windows) && e.kind() == io::ErrorKind::PermissionDenied => Ok(true),
        Err(e) => Err(e),
    }
}

/// Asks the OS for a currently free loopback-style port on `ip`.
///
/// # Errors
///
/// Returns the bind error if no port can be reserved.
pub fn free_port(ip: std::net::IpAddr) -> io::Result<u16> {
    let listener = TcpListener::bind(SocketAddr::new(ip, 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Instant;

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn test_hung_probe_returns_within_bound() {
        let start = Instant::now();
        let alive = bounded_probe("/hung/fs", Duration::from_millis(50), || {
            std::thread::sleep(Duration::from_secs(3));
            Ok(true)
        })
        .await;
        assert!(!alive);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_probe_error_counts_as_dead() {
        let alive = bounded_probe("/denied", LIVENESS_TIMEOUT, || {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
        })
        .await;
        assert!(!alive);
    }

    #[tokio::test]
    async fn test_probe_passes_result_through() {
        assert!(bounded_probe("x", LIVENESS_TIMEOUT, || Ok(true)).await);
        assert!(!bounded_probe("x", LIVENESS_TIMEOUT, || Ok(false)).await);
    }

    #[test]
    fn test_socket_path_exists() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("nvimsocket");
        assert!(!socket_path_exists(&sock).unwrap());
        std::fs::write(&sock, "").unwrap();
        assert!(socket_path_exists(&sock).unwrap());
    }

    #[test]
    fn test_port_in_use_tracks_listener() {
        let listener = TcpListener::bind(SocketAddr::new(LOOPBACK, 0)).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(port_in_use(addr).unwrap());

        drop(listener);
        assert!(!port_in_use(addr).unwrap());
        // The probe released its own listener.
        assert!(!port_in_use(addr).unwrap());
    }

    #[test]
    fn test_free_port_is_bindable() {
        let port = free_port(LOOPBACK).unwrap();
        assert_ne!(port, 0);
        assert!(!port_in_use(SocketAddr::new(LOOPBACK, port)).unwrap());
    }
}
