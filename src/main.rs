// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! nvim-handoff CLI.
//!
//! `open` is what a host IDE invokes as its external editor command; it
//! exits non-zero when the host should fall back to its own handler.
//! `listen` keeps one process alive and reads requests from stdin. The
//! remaining subcommands manage settings and inspect the remembered server.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]

use anyhow::{Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use nvim_handoff::cli::{self, ColorConfig};
use nvim_handoff::config::{Config, LaunchTemplate};
use nvim_handoff::launcher;
use nvim_handoff::template::{self, Bindings};
use nvim_handoff::{Handoff, HandoffError};

/// Command-line arguments for nvim-handoff.
#[derive(Parser, Debug)]
#[command(name = "nvim-handoff")]
#[command(about = "Open files from an IDE in a long-lived Neovim server")]
#[command(version = env!("NVIM_HANDOFF_VERSION"))]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

/// Subcommands supported by nvim-handoff.
#[derive(Subcommand, Debug)]
enum Command {
    /// Open a file in the editor server, launching it if needed.
    /// Without a file, only brings up the server.
    Open {
        /// File to open.
        file: Option<PathBuf>,

        /// 1-based line to jump to.
        #[arg(long, short)]
        line: Option<u32>,

        /// 1-based column to jump to.
        #[arg(long, short)]
        column: Option<u32>,
    },

    /// Serve open requests read from stdin as JSON lines
    /// (`{"file": "...", "line": 10, "column": 3}`), answering each with
    /// `{"success": true|false}` on stdout.
    Listen,

    /// Show the remembered server and whether it is alive.
    Status {
        /// Disable colored output.
        #[arg(long)]
        nocolor: bool,
    },

    /// Ask the remembered server to quit and forget it.
    Close,

    /// Check editor, launch commands and focus helper availability.
    Doctor {
        /// Disable colored output.
        #[arg(long)]
        nocolor: bool,
    },

    /// Restore default settings and forget the remembered server.
    Reset,

    /// Inspect or change settings.
    Config {
        /// The settings action to perform.
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage the analyzer list passed through to project generation.
    Analyzer {
        /// The analyzer action to perform.
        #[command(subcommand)]
        action: AnalyzerAction,
    },
}

/// Settings actions.
#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,

    /// Set the launch command (a terminal, or `{app}` to run the editor directly).
    SetLaunch {
        /// Executable.
        command: String,

        /// Argument template.
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        args: String,

        /// Environment template (`KEY=VALUE` pairs).
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        env: String,
    },

    /// Forget the launch command so the fallback candidates are tried again.
    ClearLaunch,

    /// Set the open-file directive template.
    SetOpenFileArgs {
        /// Argument template.
        #[arg(allow_hyphen_values = true)]
        args: String,
    },

    /// Set the cursor-jump directive template.
    SetJumpArgs {
        /// Argument template.
        #[arg(allow_hyphen_values = true)]
        args: String,
    },

    /// Set the helper process wait bound in milliseconds (1-1000).
    SetTimeout {
        /// Milliseconds.
        ms: u64,
    },
}

/// Analyzer list actions.
#[derive(Subcommand, Debug)]
enum AnalyzerAction {
    /// Register an analyzer file.
    Add {
        /// Path to the analyzer.
        path: PathBuf,
    },
    /// Unregister an analyzer file.
    Remove {
        /// Path to the analyzer.
        path: PathBuf,
    },
    /// List registered analyzers.
    List,
}

/// One request in `listen` mode.
#[derive(Debug, Deserialize)]
struct OpenRequest {
    #[serde(default)]
    file: PathBuf,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    column: Option<u32>,
}

/// One response in `listen` mode.
#[derive(Debug, Serialize)]
struct OpenResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Entry point for the nvim-handoff binary.
///
/// # Errors
///
/// Returns an error if configuration cannot be loaded or a subcommand fails.
#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nvim_handoff=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config)?;
    let handoff = Handoff::new(config)?;

    match args.command {
        Command::Open { file, line, column } => {
            let file = file.unwrap_or_default();
            if handoff.open_at(&file, line, column).await {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Listen => run_listen(&handoff).await.map(|()| ExitCode::SUCCESS),
        Command::Status { nocolor } => {
            run_status(&handoff, nocolor).await;
            Ok(ExitCode::SUCCESS)
        }
        Command::Close => {
            if handoff.close_server().await? {
                println!("Server closed.");
            } else {
                println!("No running server.");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Doctor { nocolor } => {
            run_doctor(&handoff, nocolor).await;
            Ok(ExitCode::SUCCESS)
        }
        Command::Reset => {
            handoff.reset().await?;
            println!("Settings restored to defaults.");
            Ok(ExitCode::SUCCESS)
        }
        Command::Config { action } => run_config(&handoff, action)
            .await
            .map(|()| ExitCode::SUCCESS),
        Command::Analyzer { action } => run_analyzer(&handoff, action)
            .await
            .map(|()| ExitCode::SUCCESS),
    }
}

/// Answers JSON-line open requests until stdin closes.
async fn run_listen(handoff: &Handoff) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<OpenRequest>(&line) {
            Ok(request) => {
                debug!("Request: {:?}", request);
                match handoff
                    .try_open_at(&request.file, request.line, request.column)
                    .await
                {
                    Ok(_) => OpenResponse {
                        success: true,
                        error: None,
                    },
                    Err(e) => {
                        warn!("Could not open {}: {}", request.file.display(), e);
                        OpenResponse {
                            success: false,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Malformed request: {}", e);
                OpenResponse {
                    success: false,
                    error: Some(format!("malformed request: {e}")),
                }
            }
        };

        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }
    Ok(())
}

async fn run_status(handoff: &Handoff, nocolor: bool) {
    let colors = ColorConfig::new(nocolor);
    let status = handoff.status().await;

    println!("{} {}", colors.bold("Addressing:"), status.platform);
    let Some(address) = &status.state.address else {
        println!("{} none remembered", colors.bold("Server:    "));
        return;
    };

    let liveness = if status.alive {
        colors.green("alive")
    } else {
        colors.red("not reachable")
    };
    println!(
        "{} {} ({})",
        colors.bold("Server:    "),
        colors.cyan(&address.to_string()),
        liveness
    );
    if let Some(pid) = status.state.pid {
        println!("{} {}", colors.bold("PID:       "), pid);
    }
    if let Some(launched) = status.state.launched_at {
        println!(
            "{} {}",
            colors.bold("Launched:  "),
            launched.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
    if let Some(command) = &status.state.launch_command {
        let width = cli::terminal_width().saturating_sub(12);
        println!("{} {}", colors.bold("Command:   "), cli::truncate(command, width));
    }
}

async fn run_doctor(handoff: &Handoff, nocolor: bool) {
    let colors = ColorConfig::new(nocolor);
    let config = handoff.config().await;

    println!("nvim-handoff {}", env!("NVIM_HANDOFF_VERSION"));
    println!();
    println!(
        "{} {}",
        colors.bold("Config:"),
        config
            .path()
            .map_or_else(|| "defaults only".to_string(), |p| p.display().to_string())
    );
    println!(
        "{} {}",
        colors.bold("State: "),
        handoff.state().path().display()
    );
    println!();

    match launcher::resolve_editor(&config.editor) {
        Some(path) => println!(
            "{}  {}  {}",
            colors.bold("editor"),
            config.editor,
            colors.green(&format!("✓ {}", path.display()))
        ),
        None => println!(
            "{}  {}  {}",
            colors.bold("editor"),
            config.editor,
            colors.red("✗ not found")
        ),
    }

    println!();
    println!("{}:", colors.bold("Launch"));
    if let Some(launch) = &config.launch {
        print_launch_line(&colors, launch, &config.editor, "configured");
    } else {
        let mut selected = false;
        for candidate in &config.launch_candidates {
            let launchable = launcher::is_launchable(&candidate.command, &config.editor);
            let label = if launchable && !selected {
                selected = true;
                "would be selected"
            } else {
                "fallback"
            };
            print_launch_line(&colors, candidate, &config.editor, label);
        }
        if !selected {
            println!(
                "  {}",
                colors.red("✗ no usable launch command; run `nvim-handoff config set-launch`")
            );
        }
    }

    println!();
    println!("{}:", colors.bold("Directives"));
    let every_placeholder: Bindings = template::KNOWN_PLACEHOLDERS
        .iter()
        .map(|key| (*key, "x"))
        .collect();
    for (name, args) in [
        ("open-file", &config.requests.open_file_args),
        ("cursor-jump", &config.requests.jump_args),
        ("quit", &config.requests.quit_args),
    ] {
        let unknown = template::unresolved(args, &every_placeholder);
        if unknown.is_empty() {
            println!("  {:<12} {}", name, colors.dim(args));
        } else {
            println!(
                "  {:<12} {}  {}",
                name,
                args,
                colors.yellow(&format!("unknown placeholders: {}", unknown.join(", ")))
            );
        }
    }

    println!();
    println!("{}:", colors.bold("Focus"));
    if !config.focus.enabled {
        println!("  {}", colors.dim("disabled"));
    } else if which::which(&config.focus.command).is_ok() {
        println!("  {}  {}", config.focus.command, colors.green("✓ available"));
    } else {
        println!(
            "  {}  {}",
            config.focus.command,
            colors.yellow("- not installed (windows will not be raised)")
        );
    }

    println!();
    println!("{}:", colors.bold("Server"));
    let status = handoff.status().await;
    match &status.state.address {
        Some(address) if status.alive => {
            println!("  {}  {}", address, colors.green("✓ alive"));
        }
        Some(address) => println!(
            "  {}  {}",
            address,
            colors.dim("- not reachable (next open launches a new one)")
        ),
        None => println!("  {}", colors.dim("none remembered")),
    }
}

fn print_launch_line(colors: &ColorConfig, launch: &LaunchTemplate, editor: &str, label: &str) {
    let mark = if launcher::is_launchable(&launch.command, editor) {
        colors.green("✓")
    } else {
        colors.red("✗")
    };
    println!(
        "  {} {:<16} {}  {}",
        mark,
        launch.command,
        colors.dim(&launch.args),
        colors.dim(label)
    );
}

async fn run_config(handoff: &Handoff, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = handoff.config().await;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::SetLaunch { command, args, env } => {
            let editor = handoff.config().await.editor;
            if !launcher::is_launchable(&command, &editor) {
                return Err(HandoffError::InvalidSetting(format!(
                    "'{command}' is not an executable on PATH"
                ))
                .into());
            }
            let launch = LaunchTemplate { command, args, env };
            handoff
                .update_config(|c| c.set_launch_template(Some(launch)))
                .await?;
            println!("Launch command updated.");
        }
        ConfigAction::ClearLaunch => {
            handoff.update_config(|c| c.set_launch_template(None)).await?;
            println!("Launch command cleared.");
        }
        ConfigAction::SetOpenFileArgs { args } => {
            handoff.update_config(|c| c.set_open_file_args(&args)).await?;
            println!("Open-file arguments updated.");
        }
        ConfigAction::SetJumpArgs { args } => {
            handoff.update_config(|c| c.set_jump_args(&args)).await?;
            println!("Cursor-jump arguments updated.");
        }
        ConfigAction::SetTimeout { ms } => {
            handoff
                .update_config(|c| c.set_process_timeout_ms(ms))
                .await??;
            println!("Process timeout set to {ms}ms.");
        }
    }
    Ok(())
}

async fn run_analyzer(handoff: &Handoff, action: AnalyzerAction) -> Result<()> {
    match action {
        AnalyzerAction::Add { path } => {
            if !handoff.update_config(|c| c.try_add_analyzer(&path)).await? {
                bail!(
                    "{} is missing or an analyzer with that name is already registered",
                    path.display()
                );
            }
            println!("Added {}.", path.display());
        }
        AnalyzerAction::Remove { path } => {
            if !handoff
                .update_config(|c| c.try_remove_analyzer(&path))
                .await?
            {
                bail!("{} is not registered", path.display());
            }
            println!("Removed {}.", path.display());
        }
        AnalyzerAction::List => {
            let config = handoff.config().await;
            if config.analyzers.is_empty() {
                println!("No analyzers registered.");
            }
            for analyzer in &config.analyzers {
                println!("{}", analyzer.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_open_request_defaults() {
        let parsed: std::result::Result<OpenRequest, _> = serde_json::from_str(r#"{"file": "/tmp/x.cs"}"#);
        assert!(matches!(
            parsed,
            Ok(OpenRequest { line: None, column: None, .. })
        ));
        let empty: std::result::Result<OpenRequest, _> = serde_json::from_str("{}");
        assert!(empty.is_ok_and(|r| r.file.as_os_str().is_empty()));
    }

    #[test]
    fn test_default_config_path_is_namespaced() {
        if let Some(path) = nvim_handoff::config::default_config_path() {
            assert!(path.ends_with("nvim-handoff/config.toml"));
        }
    }
}
