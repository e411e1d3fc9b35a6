// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Platform capability sets.
//!
//! Liveness, address allocation and window focusing differ between
//! domain-socket platforms and Windows. [`PlatformOps`] is chosen once at
//! startup from the configured addressing scheme and everything else goes
//! through it.

mod posix;
mod tcp;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use crate::config::{Addressing, Config, FocusSettings};
use crate::error::{HandoffError, Result};
use crate::process::{self, SpawnOptions, WaitMode, WaitOutcome};
use crate::template::{self, Bindings};

pub use posix::PosixSocketOps;
pub use tcp::WindowsTcpOps;

/// Endpoint a server instance listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ServerAddress {
    /// Domain socket path.
    Socket(PathBuf),
    /// `ip:port`.
    Tcp(SocketAddr),
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket(path) => write!(f, "{}", path.display()),
            Self::Tcp(addr) => write!(f, "{addr}"),
        }
    }
}

/// What the focus helper gets to work with.
#[derive(Debug, Clone)]
pub struct FocusHint {
    /// Server address.
    pub address: ServerAddress,
    /// Process id of the server host, when known.
    pub pid: Option<u32>,
}

/// Capability set selected at startup.
#[derive(Debug, Clone)]
pub enum PlatformOps {
    /// Domain sockets, liveness by path existence.
    PosixSocket(PosixSocketOps),
    /// TCP ports, liveness by bind attempt.
    WindowsTcp(WindowsTcpOps),
}

impl PlatformOps {
    /// Selects the capability set for the configured addressing.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::InvalidSetting`] if `tcp_host` is not an IP address.
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.effective_addressing() {
            Addressing::Tcp => {
                let host = config.tcp_host.parse().map_err(|e| {
                    HandoffError::InvalidSetting(format!(
                        "tcp_host '{}' is not an IP address: {e}",
                        config.tcp_host
                    ))
                })?;
                Ok(Self::WindowsTcp(WindowsTcpOps::new(
                    host,
                    config.ppid_script_path.clone(),
                )))
            }
            Addressing::Socket | Addressing::Auto => Ok(Self::PosixSocket(PosixSocketOps::new(
                config.socket_path.clone(),
            ))),
        }
    }

    /// Short name for logs and status output.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PosixSocket(_) => "socket",
            Self::WindowsTcp(_) => "tcp",
        }
    }

    /// Whether a server seems to be listening at `address`.
    ///
    /// Bounded in time; inconclusive answers are `false`.
    pub async fn is_server_alive(&self, address: &ServerAddress) -> bool {
        match (self, address) {
            (Self::PosixSocket(ops), ServerAddress::Socket(path)) => ops.is_alive(path).await,
            (Self::WindowsTcp(ops), ServerAddress::Tcp(addr)) => ops.is_alive(*addr).await,
            _ => {
                debug!(
                    "Remembered address {} does not match {} addressing",
                    address,
                    self.name()
                );
                false
            }
        }
    }

    /// Picks the address a new server should listen on.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::LaunchFailed`] if no address can be reserved.
    pub fn allocate_address(&self) -> Result<ServerAddress> {
        match self {
            Self::PosixSocket(ops) => Ok(ops.allocate()),
            Self::WindowsTcp(ops) => ops.allocate(),
        }
    }

    /// Adds platform-only placeholders (e.g. `{getProcessPPIDScriptPath}`).
    pub fn extend_bindings(&self, bindings: &mut Bindings) {
        if let Self::WindowsTcp(ops) = self {
            ops.extend_bindings(bindings);
        }
    }

    /// Runs the configured focus helper once.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::FocusUnavailable`] when the helper is missing,
    /// lacks the information it needs, or fails.
    pub async fn focus_window(
        &self,
        settings: &FocusSettings,
        hint: &FocusHint,
        timeout: Duration,
    ) -> Result<()> {
        let mut bindings = Bindings::new()
            .with(template::SERVER_SOCKET, hint.address.to_string())
            .with(template::WINDOW_TITLE, settings.window_title.clone());
        if let Some(pid) = hint.pid {
            bindings.insert(template::PID, pid.to_string());
        }
        self.extend_bindings(&mut bindings);

        let missing = template::unresolved(&settings.args, &bindings);
        if !missing.is_empty() {
            return Err(HandoffError::FocusUnavailable(format!(
                "helper needs {} which is unknown for this server",
                missing.join(", ")
            )));
        }

        if which::which(&settings.command).is_err() {
            return Err(HandoffError::FocusUnavailable(format!(
                "'{}' is not installed",
                settings.command
            )));
        }

        let args = template::split_args(&template::render(&settings.args, &bindings));
        let mut options = SpawnOptions::hidden();
        if settings.shell {
            options = options.through_shell();
        }

        match process::run(&settings.command, &args, &options, timeout, WaitMode::KillOnTimeout)
            .await
        {
            Ok(WaitOutcome::Exited(Some(0))) => Ok(()),
            Ok(WaitOutcome::Exited(code)) => Err(HandoffError::FocusUnavailable(format!(
                "'{}' exited with {code:?}",
                settings.command
            ))),
            Ok(WaitOutcome::Killed | WaitOutcome::StillRunningDetached(_)) => {
                Err(HandoffError::FocusUnavailable(format!(
                    "'{}' did not finish within {}ms",
                    settings.command,
                    timeout.as_millis()
                )))
            }
            Err(e) => Err(HandoffError::FocusUnavailable(e.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_and_serde() {
        let sock = ServerAddress::Socket(PathBuf::from("/tmp/nvimsocket"));
        let tcp = ServerAddress::Tcp("127.0.0.1:6666".parse().unwrap());
        assert_eq!(sock.to_string(), "/tmp/nvimsocket");
        assert_eq!(tcp.to_string(), "127.0.0.1:6666");

        let json = serde_json::to_string(&tcp).unwrap();
        assert_eq!(json, r#"{"kind":"tcp","value":"127.0.0.1:6666"}"#);
        let back: ServerAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tcp);
    }

    #[test]
    fn test_from_config_selects_variant() {
        let mut config = Config::default();
        config.addressing = Addressing::Socket;
        assert_eq!(PlatformOps::from_config(&config).unwrap().name(), "socket");

        config.addressing = Addressing::Tcp;
        assert_eq!(PlatformOps::from_config(&config).unwrap().name(), "tcp");

        config.tcp_host = "localhost-ish".to_string();
        assert!(matches!(
            PlatformOps::from_config(&config),
            Err(HandoffError::InvalidSetting(_))
        ));
    }

    #[tokio::test]
    async fn test_mismatched_address_is_dead() {
        let ops = PlatformOps::PosixSocket(PosixSocketOps::new(PathBuf::from("/tmp/x")));
        let tcp = ServerAddress::Tcp("127.0.0.1:1".parse().unwrap());
        assert!(!ops.is_server_alive(&tcp).await);
    }

    #[tokio::test]
    async fn test_focus_missing_helper() {
        let ops = PlatformOps::PosixSocket(PosixSocketOps::new(PathBuf::from("/tmp/x")));
        let settings = FocusSettings {
            command: "no-such-focus-helper-91b3".to_string(),
            ..FocusSettings::default()
        };
        let hint = FocusHint {
            address: ServerAddress::Socket(PathBuf::from("/tmp/x")),
            pid: None,
        };
        let result = ops
            .focus_window(&settings, &hint, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(HandoffError::FocusUnavailable(_))));
    }

    #[tokio::test]
    async fn test_focus_needs_pid_when_template_uses_it() {
        let ops = PlatformOps::PosixSocket(PosixSocketOps::new(PathBuf::from("/tmp/x")));
        let settings = FocusSettings {
            command: "true".to_string(),
            args: "{pid}".to_string(),
            ..FocusSettings::default()
        };
        let hint = FocusHint {
            address: ServerAddress::Socket(PathBuf::from("/tmp/x")),
            pid: None,
        };
        let result = ops
            .focus_window(&settings, &hint, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(HandoffError::FocusUnavailable(m)) if m.contains("pid")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_focus_helper_success() {
        let ops = PlatformOps::PosixSocket(PosixSocketOps::new(PathBuf::from("/tmp/x")));
        let settings = FocusSettings {
            command: "true".to_string(),
            args: "-a \"{windowTitle}\"".to_string(),
            ..FocusSettings::default()
        };
        let hint = FocusHint {
            address: ServerAddress::Socket(PathBuf::from("/tmp/x")),
            pid: Some(1),
        };
        ops.focus_window(&settings, &hint, Duration::from_millis(1000))
            .await
            .unwrap();
    }
}
