/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::HandoffError;

/// Smallest accepted process timeout in milliseconds.
pub const MIN_PROCESS_TIMEOUT_MS: u64 = 1;
/// Largest accepted process timeout; anything longer freezes the host editor.
pub const MAX_PROCESS_TIMEOUT_MS: u64 = 1000;

const DEFAULT_PROCESS_TIMEOUT_MS: u64 = 500;
const DEFAULT_EDITOR: &str = "nvim";
const DEFAULT_SOCKET_PATH: &str = "/tmp/nvimsocket";
const DEFAULT_TCP_HOST: &str = "127.0.0.1";

/// Persisted settings bundle.
///
/// Loaded once, mutated through the setter methods (which mark it dirty),
/// and written back by [`Config::save`] only when something changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Editor executable bound to `{app}`.
    #[serde(default = "default_editor")]
    pub editor: String,

    /// Wait bound for every short-lived helper process, in milliseconds.
    #[serde(default = "default_process_timeout_ms")]
    pub process_timeout_ms: u64,

    /// Server addressing scheme.
    #[serde(default)]
    pub addressing: Addressing,

    /// Well-known domain socket path (socket addressing).
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// IP the server listens on (TCP addressing).
    #[serde(default = "default_tcp_host")]
    pub tcp_host: String,

    /// How `{column}` is rendered.
    #[serde(default)]
    pub column_base: ColumnBase,

    /// Where the remembered server state lives (defaults under the state dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// Bound to `{getProcessPPIDScriptPath}` under TCP addressing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid_script_path: Option<PathBuf>,

    /// Analyzer assemblies passed through to project generation.
    #[serde(default)]
    pub analyzers: Vec<PathBuf>,

    /// Explicitly chosen launch template. When unset, the first usable
    /// entry of `launch_candidates` is picked and stored here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<LaunchTemplate>,

    /// Fallback launch templates, tried in order.
    #[serde(default = "default_launch_candidates")]
    pub launch_candidates: Vec<LaunchTemplate>,

    /// Remote directive templates.
    #[serde(default)]
    pub requests: RequestTemplates,

    /// Window focus helper.
    #[serde(default)]
    pub focus: FocusSettings,

    #[serde(skip)]
    path: Option<PathBuf>,

    #[serde(skip)]
    dirty: bool,
}

/// Recipe for starting a server instance, usually inside a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchTemplate {
    /// Terminal executable, or `{app}` to run the editor directly.
    pub command: String,
    /// Argument template.
    #[serde(default)]
    pub args: String,
    /// `{environment}` template: space-separated `KEY=VALUE` pairs.
    #[serde(default)]
    pub env: String,
}

impl LaunchTemplate {
    /// Creates a launch template.
    #[must_use]
    pub fn new(command: &str, args: &str, env: &str) -> Self {
        Self {
            command: command.to_string(),
            args: args.to_string(),
            env: env.to_string(),
        }
    }
}

/// Argument templates for the remote directives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTemplates {
    /// Open-file directive.
    #[serde(default = "default_open_file_args")]
    pub open_file_args: String,
    /// Cursor-jump directive.
    #[serde(default = "default_jump_args")]
    pub jump_args: String,
    /// Quit directive used by `close`.
    #[serde(default = "default_quit_args")]
    pub quit_args: String,
}

impl Default for RequestTemplates {
    fn default() -> Self {
        Self {
            open_file_args: default_open_file_args(),
            jump_args: default_jump_args(),
            quit_args: default_quit_args(),
        }
    }
}

/// Window focus helper settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusSettings {
    /// Whether to try focusing at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Helper executable.
    #[serde(default = "default_focus_command")]
    pub command: String,
    /// Helper argument template (`{pid}`, `{windowTitle}`, `{serverSocket}`).
    #[serde(default = "default_focus_args")]
    pub args: String,
    /// Run the helper through the platform shell.
    #[serde(default)]
    pub shell: bool,
    /// Bound to `{windowTitle}`.
    #[serde(default = "default_window_title")]
    pub window_title: String,
}

impl Default for FocusSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_focus_command(),
            args: default_focus_args(),
            shell: false,
            window_title: default_window_title(),
        }
    }
}

/// Server addressing scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Addressing {
    /// TCP on Windows, domain sockets elsewhere.
    #[default]
    Auto,
    /// Domain socket at `socket_path`.
    Socket,
    /// `tcp_host:<ephemeral port>`.
    Tcp,
}

/// Convention used to render `{column}` from a 1-based input column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnBase {
    /// Rendered as given (vim's `cursor()` is 1-based).
    #[default]
    One,
    /// Rendered minus one.
    Zero,
}

impl ColumnBase {
    /// Converts a 1-based column into this convention.
    #[must_use]
    pub const fn render(self, column: u32) -> u32 {
        match self {
            Self::One => column,
            Self::Zero => column.saturating_sub(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            editor: default_editor(),
            process_timeout_ms: DEFAULT_PROCESS_TIMEOUT_MS,
            addressing: Addressing::Auto,
            socket_path: default_socket_path(),
            tcp_host: default_tcp_host(),
            column_base: ColumnBase::One,
            state_file: None,
            ppid_script_path: None,
            launch: None,
            launch_candidates: default_launch_candidates(),
            requests: RequestTemplates::default(),
            focus: FocusSettings::default(),
            analyzers: Vec::new(),
            path: None,
            dirty: false,
        }
    }
}

fn default_editor() -> String {
    DEFAULT_EDITOR.to_string()
}

const fn default_process_timeout_ms() -> u64 {
    DEFAULT_PROCESS_TIMEOUT_MS
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_tcp_host() -> String {
    DEFAULT_TCP_HOST.to_string()
}

const fn default_true() -> bool {
    true
}

fn default_open_file_args() -> String {
    "--server {serverSocket} --remote-tab {filePath}".to_string()
}

fn default_jump_args() -> String {
    r#"--server {serverSocket} --remote-send ":call cursor({line},{column})<CR>""#.to_string()
}

fn default_quit_args() -> String {
    r#"--server {serverSocket} --remote-send "<C-\\><C-N>:qa<CR>""#.to_string()
}

fn default_window_title() -> String {
    "nvim".to_string()
}

fn default_focus_command() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        "wmctrl".to_string()
    }
}

fn default_focus_args() -> String {
    if cfg!(windows) {
        r#"-NoProfile -NonInteractive -Command "(New-Object -ComObject WScript.Shell).AppActivate({pid})""#
            .to_string()
    } else {
        r#"-a "{windowTitle}""#.to_string()
    }
}

/// Built-in launch candidates for the current platform.
#[must_use]
pub fn default_launch_candidates() -> Vec<LaunchTemplate> {
    if cfg!(windows) {
        vec![
            LaunchTemplate::new("wt", "nt {app} {filePath} --listen {serverSocket}", ""),
            LaunchTemplate::new("{app}", "{filePath} --listen {serverSocket}", ""),
        ]
    } else {
        vec![
            LaunchTemplate::new(
                "gnome-terminal",
                "-- {app} {filePath} --listen {serverSocket}",
                "",
            ),
            LaunchTemplate::new("alacritty", "-e {app} {filePath} --listen {serverSocket}", ""),
            LaunchTemplate::new("kitty", "{app} {filePath} --listen {serverSocket}", ""),
            LaunchTemplate::new(
                "wezterm",
                "start -- {app} {filePath} --listen {serverSocket}",
                "",
            ),
            LaunchTemplate::new("konsole", "-e {app} {filePath} --listen {serverSocket}", ""),
            LaunchTemplate::new("xterm", "-e {app} {filePath} --listen {serverSocket}", ""),
        ]
    }
}

/// Default location of the user config file.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("nvim-handoff").join("config.toml"))
}

/// Default location of the remembered server state.
#[must_use]
pub fn default_state_path() -> PathBuf {
    let state_dir = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir);
    state_dir.join("nvim-handoff").join("server.json")
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or a value is out of range.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults
        builder = builder
            .set_default("editor", DEFAULT_EDITOR)?
            .set_default("process_timeout_ms", DEFAULT_PROCESS_TIMEOUT_MS)?;

        // 2. Load from user config directory (~/.config/nvim-handoff/config.toml)
        let user_path = default_config_path();
        if let Some(config_path) = &user_path
            && config_path.exists()
        {
            builder = builder.add_source(config::File::from(config_path.clone()));
        }

        // 3. Load from explicit file if provided
        if let Some(path) = &explicit_file {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }

        // 4. Load from environment variables (NVIM_HANDOFF_PROCESS_TIMEOUT_MS, etc.)
        builder = builder.add_source(
            config::Environment::with_prefix("NVIM_HANDOFF")
                .prefix_separator("_")
                .separator("__"),
        );

        let mut config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        validate_timeout(config.process_timeout_ms)?;

        config.path = explicit_file.or(user_path);
        config.dirty = false;
        Ok(config)
    }

    /// Sets the file [`Config::save`] writes to.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = Some(path.into());
    }

    /// File this config is saved to, if known.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether there are unsaved changes.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes the config back if it changed. Returns whether anything was written.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no target path or the write fails.
    pub fn save(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let path = self
            .path
            .clone()
            .ok_or_else(|| anyhow!("No config file location to save to"))?;

        let body = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        crate::state::atomic_write(&path, body.as_bytes())?;
        self.dirty = false;
        Ok(true)
    }

    /// Bounded helper wait as a `Duration`.
    #[must_use]
    pub const fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }

    /// Addressing after resolving `auto` for the current platform.
    #[must_use]
    pub const fn effective_addressing(&self) -> Addressing {
        match self.addressing {
            Addressing::Auto if cfg!(windows) => Addressing::Tcp,
            Addressing::Auto => Addressing::Socket,
            other => other,
        }
    }

    /// Remembered state location.
    #[must_use]
    pub fn state_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(default_state_path)
    }

    /// Replaces the active launch template (`None` clears it).
    pub fn set_launch_template(&mut self, template: Option<LaunchTemplate>) {
        if self.launch != template {
            self.launch = template;
            self.dirty = true;
        }
    }

    /// Replaces the open-file directive template.
    pub fn set_open_file_args(&mut self, args: &str) {
        if self.requests.open_file_args != args {
            args.clone_into(&mut self.requests.open_file_args);
            self.dirty = true;
        }
    }

    /// Replaces the cursor-jump directive template.
    pub fn set_jump_args(&mut self, args: &str) {
        if self.requests.jump_args != args {
            args.clone_into(&mut self.requests.jump_args);
            self.dirty = true;
        }
    }

    /// Changes the helper wait bound.
    ///
    /// # Errors
    ///
    /// Returns [`HandoffError::InvalidSetting`] outside `1..=1000` ms.
    pub fn set_process_timeout_ms(&mut self, timeout_ms: u64) -> std::result::Result<(), HandoffError> {
        validate_timeout(timeout_ms)?;
        if self.process_timeout_ms != timeout_ms {
            self.process_timeout_ms = timeout_ms;
            self.dirty = true;
        }
        Ok(())
    }

    /// Registers an analyzer if the file exists and no analyzer with the
    /// same file name (case-insensitive) is registered yet.
    pub fn try_add_analyzer(&mut self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        let name = file_name_lower(path);
        if self.analyzers.iter().any(|a| file_name_lower(a) == name) {
            return false;
        }
        self.analyzers.push(path.to_path_buf());
        self.dirty = true;
        true
    }

    /// Unregisters an analyzer. Returns whether it was registered.
    pub fn try_remove_analyzer(&mut self, path: &Path) -> bool {
        let before = self.analyzers.len();
        self.analyzers.retain(|a| a != path);
        let removed = self.analyzers.len() != before;
        self.dirty |= removed;
        removed
    }

    /// Restores every setting to its default, keeping the save location.
    pub fn reset(&mut self) {
        let path = self.path.take();
        *self = Self {
            path,
            dirty: true,
            ..Self::default()
        };
    }
}

fn validate_timeout(timeout_ms: u64) -> std::result::Result<(), HandoffError> {
    if timeout_ms < MIN_PROCESS_TIMEOUT_MS {
        return Err(HandoffError::InvalidSetting(
            "process timeout must be positive (an unbounded wait would freeze the host)".to_string(),
        ));
    }
    if timeout_ms > MAX_PROCESS_TIMEOUT_MS {
        return Err(HandoffError::InvalidSetting(format!(
            "process timeout must not exceed {MAX_PROCESS_TIMEOUT_MS}ms"
        )));
    }
    Ok(())
}

fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}
