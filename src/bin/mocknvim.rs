// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A scriptable stand-in for `nvim` used by the integration tests.
//!
//! Server mode (`--listen <addr>`) binds a domain socket path or an
//! `ip:port` and accepts one JSON line per connection. Client mode
//! (`--server <addr> --remote-tab <file>` / `--remote-send <keys>`) delivers
//! directives to such a server. Every event is appended to `--log` as a
//! JSON line so tests can assert on what happened and in which order.
//! No tokio: plain blocking sockets and one timer thread.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// How long a client keeps retrying a server that is still starting.
const CONNECT_PATIENCE: Duration = Duration::from_millis(250);

/// Mock Neovim for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mocknvim")]
struct Args {
    /// Run as a server listening on this socket path or `ip:port`.
    #[arg(long)]
    listen: Option<String>,

    /// Send directives to the server at this address.
    #[arg(long)]
    server: Option<String>,

    /// Open-file directive.
    #[arg(long)]
    remote_tab: Option<String>,

    /// Key sequence directive.
    #[arg(long)]
    remote_send: Option<String>,

    /// Append events here as JSON lines.
    #[arg(long)]
    log: Option<PathBuf>,

    /// Server exits on its own after this many seconds.
    #[arg(long, default_value_t = 30)]
    lifetime_secs: u64,

    /// Client never finishes.
    #[arg(long)]
    hang: bool,

    /// Client exits with status 1 without sending anything.
    #[arg(long)]
    fail: bool,

    /// Files passed on the command line (opened at startup).
    files: Vec<String>,
}

/// Wire format between client and server.
#[derive(Debug, Serialize, Deserialize)]
struct Directive {
    kind: String,
    value: String,
}

enum Listener {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixListener),
    Tcp(TcpListener),
}

fn log_event(log: Option<&Path>, event: &serde_json::Value) {
    let Some(path) = log else { return };
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{event}");
    }
}

fn bind(address: &str) -> std::io::Result<Listener> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return TcpListener::bind(addr).map(Listener::Tcp);
    }
    #[cfg(unix)]
    {
        let path = PathBuf::from(address);
        let _ = std::fs::remove_file(&path);
        std::os::unix::net::UnixListener::bind(&path).map(Listener::Unix)
    }
    #[cfg(not(unix))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "domain sockets are not supported here",
        ))
    }
}

fn shutdown(listen: &str, log: Option<&Path>, reason: &str) -> ! {
    if listen.parse::<SocketAddr>().is_err() {
        let _ = std::fs::remove_file(listen);
    }
    log_event(log, &json!({"event": "exit", "reason": reason}));
    std::process::exit(0);
}

/// Reads one directive, acknowledges it, and reports whether it was a quit.
fn handle<S: Read + Write>(stream: S, log: Option<&Path>) -> bool {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line).is_err() {
        return false;
    }
    let Ok(directive) = serde_json::from_str::<Directive>(&line) else {
        return false;
    };
    log_event(
        log,
        &json!({"event": directive.kind, "value": directive.value}),
    );
    let _ = reader.get_mut().write_all(b"ok\n");
    directive.kind == "remote-send" && directive.value.contains(":qa")
}

fn serve(args: &Args, listen: &str) -> ExitCode {
    let log = args.log.as_deref();
    let listener = match bind(listen) {
        Ok(listener) => listener,
        Err(e) => {
            log_event(log, &json!({"event": "bind-failed", "error": e.to_string()}));
            return ExitCode::from(3);
        }
    };
    log_event(
        log,
        &json!({
            "event": "start",
            "pid": std::process::id(),
            "listen": listen,
            "files": args.files,
        }),
    );

    let lifetime = Duration::from_secs(args.lifetime_secs);
    let timer_listen = listen.to_string();
    let timer_log = args.log.clone();
    std::thread::spawn(move || {
        std::thread::sleep(lifetime);
        shutdown(&timer_listen, timer_log.as_deref(), "lifetime");
    });

    loop {
        let quit = match &listener {
            #[cfg(unix)]
            Listener::Unix(l) => match l.accept() {
                Ok((stream, _)) => handle(stream, log),
                Err(_) => false,
            },
            Listener::Tcp(l) => match l.accept() {
                Ok((stream, _)) => handle(stream, log),
                Err(_) => false,
            },
        };
        if quit {
            shutdown(listen, log, "quit");
        }
    }
}

fn connect_and_send(address: &str, directive: &Directive) -> std::io::Result<()> {
    let deadline = Instant::now() + CONNECT_PATIENCE;
    let payload = format!(
        "{}\n",
        serde_json::to_string(directive).map_err(std::io::Error::other)?
    );

    loop {
        let attempt = send_once(address, &payload);
        match attempt {
            Ok(()) => return Ok(()),
            Err(e) if Instant::now() >= deadline => return Err(e),
            Err(_) => std::thread::sleep(Duration::from_millis(10)),
        }
    }
}

fn send_once(address: &str, payload: &str) -> std::io::Result<()> {
    let mut ack = String::new();
    if let Ok(addr) = address.parse::<SocketAddr>() {
        let mut stream = TcpStream::connect(addr)?;
        stream.write_all(payload.as_bytes())?;
        BufReader::new(stream).read_line(&mut ack)?;
        return Ok(());
    }
    #[cfg(unix)]
    {
        let mut stream = std::os::unix::net::UnixStream::connect(address)?;
        stream.write_all(payload.as_bytes())?;
        BufReader::new(stream).read_line(&mut ack)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "domain sockets are not supported here",
        ))
    }
}

fn remote(args: &Args, server: &str) -> ExitCode {
    if args.hang {
        loop {
            std::thread::sleep(Duration::from_secs(60));
        }
    }
    if args.fail {
        return ExitCode::FAILURE;
    }

    let directives = [
        ("remote-tab", args.remote_tab.as_ref()),
        ("remote-send", args.remote_send.as_ref()),
    ];
    for (kind, value) in directives {
        let Some(value) = value else { continue };
        let directive = Directive {
            kind: kind.to_string(),
            value: value.clone(),
        };
        if connect_and_send(server, &directive).is_err() {
            return ExitCode::from(2);
        }
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let args = Args::parse();
    if let Some(listen) = args.listen.clone() {
        return serve(&args, &listen);
    }
    if let Some(server) = args.server.clone() {
        return remote(&args, &server);
    }
    // Plain `nvim file`: nothing to serve, just occupy the terminal for a while.
    log_event(
        args.log.as_deref(),
        &json!({"event": "start", "pid": std::process::id(), "files": args.files}),
    );
    std::thread::sleep(Duration::from_secs(args.lifetime_secs));
    ExitCode::SUCCESS
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn duplex(line: &str) -> Duplex {
        Duplex {
            input: Cursor::new(line.as_bytes().to_vec()),
            output: Vec::new(),
        }
    }

    #[test]
    fn test_handle_logs_and_detects_quit() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log.jsonl");

        assert!(!handle(
            duplex("{\"kind\":\"remote-tab\",\"value\":\"/a.cs\"}\n"),
            Some(&log)
        ));
        assert!(handle(
            duplex("{\"kind\":\"remote-send\",\"value\":\"<C-\\\\><C-N>:qa<CR>\"}\n"),
            Some(&log)
        ));
        assert!(!handle(duplex("garbage\n"), Some(&log)));

        let events: Vec<serde_json::Value> = std::fs::read_to_string(&log)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["event"], "remote-tab");
        assert_eq!(events[0]["value"], "/a.cs");
    }
}
