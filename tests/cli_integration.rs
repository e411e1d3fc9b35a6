#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Integration tests for the `nvim-handoff` binary.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use anyhow::{Context, Result};
use serde_json::Value;

use nvim_handoff::config::{Addressing, Config, LaunchTemplate};
use nvim_handoff::template;

/// Config that launches `mocknvim` directly.
fn mock_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.editor = env!("CARGO_BIN_EXE_mocknvim").to_string();
    config.addressing = Addressing::Socket;
    config.socket_path = dir.join("nvimsocket");
    config.state_file = Some(dir.join("server.json"));
    config.process_timeout_ms = 300;
    config.focus.enabled = false;
    config.launch_candidates = vec![LaunchTemplate::new(
        "{app}",
        &format!(
            "--log {} --lifetime-secs 10 --listen {{serverSocket}}",
            template::quote(&dir.join("events.jsonl").display().to_string())
        ),
        "",
    )];
    config
}

fn save_config(dir: &Path, config: &Config) -> Result<PathBuf> {
    let path = dir.join("config.toml");
    std::fs::write(&path, toml::to_string_pretty(config)?)?;
    Ok(path)
}

/// Writes [`mock_config`] to the directory.
fn write_config(dir: &Path) -> Result<PathBuf> {
    save_config(dir, &mock_config(dir))
}

fn count_events(dir: &Path, event: &str) -> Result<usize> {
    let log = std::fs::read_to_string(dir.join("events.jsonl"))?;
    let mut count = 0;
    for line in log.lines() {
        if serde_json::from_str::<Value>(line)?["event"] == event {
            count += 1;
        }
    }
    Ok(count)
}

fn run(config: &Path, args: &[&str]) -> Result<Output> {
    Command::new(env!("CARGO_BIN_EXE_nvim-handoff"))
        .arg("--config")
        .arg(config)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .context("Failed to run nvim-handoff")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_open_missing_file_exits_with_failure() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path())?;
    let missing = dir.path().join("missing.cs");

    let output = run(&config, &["open", &missing.display().to_string(), "--line", "3"])?;
    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.path().join("events.jsonl").exists());
    Ok(())
}

#[test]
fn test_open_status_close_round() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path())?;
    let file = dir.path().join("Enemy.cs");
    std::fs::write(&file, "")?;

    let output = run(&config, &["open", &file.display().to_string(), "-l", "4", "-c", "2"])?;
    assert!(output.status.success(), "open failed: {output:?}");

    let status = run(&config, &["status", "--nocolor"])?;
    let text = stdout(&status);
    assert!(text.contains("alive"), "unexpected status: {text}");
    assert!(text.contains("nvimsocket"));

    let close = run(&config, &["close"])?;
    assert!(stdout(&close).contains("Server closed."));

    let status = run(&config, &["status", "--nocolor"])?;
    assert!(stdout(&status).contains("none remembered"));
    Ok(())
}

#[test]
fn test_set_timeout_validates_and_saves() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path())?;

    let rejected = run(&config, &["config", "set-timeout", "0"])?;
    assert!(!rejected.status.success());

    let accepted = run(&config, &["config", "set-timeout", "250"])?;
    assert!(accepted.status.success());
    let saved = std::fs::read_to_string(&config)?;
    assert!(saved.contains("process_timeout_ms = 250"));
    Ok(())
}

#[test]
fn test_set_launch_rejects_unknown_terminal() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path())?;

    let output = run(
        &config,
        &["config", "set-launch", "nonexistent-term-5d21", "--args", "-e {app}"],
    )?;
    assert!(!output.status.success());

    let output = run(
        &config,
        &["config", "set-launch", "{app}", "--args", "--listen {serverSocket}"],
    )?;
    assert!(output.status.success());
    let shown = stdout(&run(&config, &["config", "show"])?);
    assert!(shown.contains("[launch]"));
    assert!(shown.contains("--listen {serverSocket}"));
    Ok(())
}

#[test]
fn test_doctor_reports_editor_and_candidates() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path())?;

    let output = run(&config, &["doctor", "--nocolor"])?;
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("editor"));
    assert!(text.contains("would be selected"));
    assert!(text.contains("none remembered"));
    Ok(())
}

#[test]
fn test_listen_answers_each_request() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = write_config(dir.path())?;
    let file = dir.path().join("Boss.cs");
    std::fs::write(&file, "")?;

    let mut child = Command::new(env!("CARGO_BIN_EXE_nvim-handoff"))
        .arg("--config")
        .arg(&config)
        .arg("listen")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("Failed to spawn listener")?;
    let mut stdin = child.stdin.take().context("Failed to get stdin")?;
    let mut responses = BufReader::new(child.stdout.take().context("Failed to get stdout")?);

    let requests = [
        serde_json::json!({"file": file, "line": 7, "column": 1}).to_string(),
        "not json".to_string(),
        serde_json::json!({"file": dir.path().join("missing.cs")}).to_string(),
    ];
    let mut answers = Vec::new();
    for request in &requests {
        writeln!(stdin, "{request}")?;
        stdin.flush()?;
        let mut line = String::new();
        responses.read_line(&mut line)?;
        answers.push(serde_json::from_str::<Value>(&line)?);
    }

    assert_eq!(answers[0]["success"], true);
    assert_eq!(answers[1]["success"], false);
    assert_eq!(answers[2]["success"], false);
    assert!(
        answers[2]["error"]
            .as_str()
            .is_some_and(|e| e.contains("does not exist"))
    );

    drop(stdin);
    child.wait()?;

    let close = run(&config, &["close"])?;
    assert!(close.status.success());
    Ok(())
}

#[test]
fn test_overlapping_open_processes_launch_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = mock_config(dir.path());
    config.launch = config.launch_candidates.first().cloned();
    let config = save_config(dir.path(), &config)?;
    let file = dir.path().join("Spawner.cs");
    std::fs::write(&file, "")?;

    let spawn_open = || {
        Command::new(env!("CARGO_BIN_EXE_nvim-handoff"))
            .arg("--config")
            .arg(&config)
            .args(["open", &file.display().to_string(), "-l", "5"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn nvim-handoff")
    };
    let mut first = spawn_open()?;
    let mut second = spawn_open()?;
    assert!(first.wait()?.success());
    assert!(second.wait()?.success());

    assert_eq!(count_events(dir.path(), "start")?, 1);
    assert_eq!(count_events(dir.path(), "remote-tab")?, 2);
    assert!(!dir.path().join("server.lock").exists());

    let close = run(&config, &["close"])?;
    assert!(close.status.success());
    Ok(())
}
