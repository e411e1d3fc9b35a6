// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Placeholder substitution for launch, request and focus command templates.
//!
//! Templates are plain strings such as
//! `--server {serverSocket} --remote-tab {filePath}`. Rendering replaces
//! every whole `{key}` token that has a binding and leaves every other
//! token verbatim, so a misspelled placeholder shows up in the logged
//! command line instead of silently disappearing. Rendering never quotes:
//! callers bind already-quoted values where a value may contain spaces.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Resolved editor executable path.
pub const APP: &str = "app";
/// Quoted path of the file to open.
pub const FILE_PATH: &str = "filePath";
/// Server address string (socket path or `ip:port`).
pub const SERVER_SOCKET: &str = "serverSocket";
/// Cursor line (1-based).
pub const LINE: &str = "line";
/// Cursor column (rendered per the configured column base).
pub const COLUMN: &str = "column";
/// Space-separated `KEY=VALUE` pairs.
pub const ENVIRONMENT: &str = "environment";
/// Helper script used to recover a parent process id (TCP addressing only).
pub const PPID_SCRIPT_PATH: &str = "getProcessPPIDScriptPath";
/// Process id of the server host, used by focus helpers.
pub const PID: &str = "pid";
/// Window title substring, used by focus helpers.
pub const WINDOW_TITLE: &str = "windowTitle";

/// Every placeholder the hand-off binds somewhere.
pub const KNOWN_PLACEHOLDERS: [&str; 9] = [
    APP,
    FILE_PATH,
    SERVER_SOCKET,
    LINE,
    COLUMN,
    ENVIRONMENT,
    PPID_SCRIPT_PATH,
    PID,
    WINDOW_TITLE,
];

static ENV_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

/// Values bound to placeholder names.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: HashMap<String, String>,
}

impl Bindings {
    /// Creates an empty set of bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `key` to `value`, replacing any previous binding.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Binds `key` to `value` in place.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Returns the value bound to `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Bindings {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Substitutes every bound `{key}` token in `template`.
///
/// Substituted values are not scanned again, and a token is only replaced
/// when the text between the braces matches a bound key exactly.
#[must_use]
pub fn render(template: &str, bindings: &Bindings) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        // The token ends at the first '}' unless another '{' comes first.
        let close = after.find('}');
        let reopen = after.find('{');
        match close {
            Some(end) if reopen.is_none_or(|r| r > end) => {
                let key = &after[..end];
                if let Some(value) = bindings.get(key) {
                    out.push_str(value);
                } else {
                    out.push('{');
                    out.push_str(key);
                    out.push('}');
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// Wraps `value` in double quotes, escaping embedded quotes.
///
/// [`split_args`] undoes this, so a quoted path survives as one argument.
#[must_use]
pub fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Splits a rendered argument string into an argv vector.
///
/// Whitespace separates arguments. Double or single quotes group text into a
/// single argument and are removed. Inside double quotes `\"` and `\\` are
/// escapes; every other backslash is kept, so Windows paths pass through.
#[must_use]
pub fn split_args(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_arg = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_arg = true;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => break,
                        '\\' if matches!(chars.peek(), Some('"' | '\\')) => {
                            if let Some(escaped) = chars.next() {
                                current.push(escaped);
                            }
                        }
                        other => current.push(other),
                    }
                }
            }
            '\'' => {
                in_arg = true;
                for q in chars.by_ref() {
                    if q == '\'' {
                        break;
                    }
                    current.push(q);
                }
            }
            c if c.is_whitespace() => {
                if in_arg {
                    args.push(std::mem::take(&mut current));
                    in_arg = false;
                }
            }
            other => {
                in_arg = true;
                current.push(other);
            }
        }
    }

    if in_arg {
        args.push(current);
    }
    args
}

/// Parses a rendered `{environment}` string into `(KEY, VALUE)` pairs.
///
/// Entries that are not `KEY=VALUE` with a valid variable name are skipped
/// with a warning.
#[must_use]
pub fn parse_environment(input: &str) -> Vec<(String, String)> {
    split_args(input)
        .into_iter()
        .filter_map(|entry| {
            let parsed = entry.split_once('=').and_then(|(key, value)| {
                ENV_KEY
                    .as_ref()
                    .is_some_and(|re| re.is_match(key))
                    .then(|| (key.to_string(), value.to_string()))
            });
            if parsed.is_none() {
                warn!("Ignoring malformed environment entry '{entry}' (expected KEY=VALUE)");
            }
            parsed
        })
        .collect()
}

/// Returns the placeholders in `template` that `bindings` leaves unresolved.
#[must_use]
pub fn unresolved(template: &str, bindings: &Bindings) -> Vec<String> {
    let mut missing = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(end) = after.find('}') else { break };
        let key = &after[..end];
        if !key.contains('{') && bindings.get(key).is_none() {
            missing.push(key.to_string());
        }
        rest = &after[end + 1..];
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_server_and_quoted_path() {
        let bindings = Bindings::new()
            .with(SERVER_SOCKET, "/tmp/s")
            .with(FILE_PATH, "\"/a b.cs\"");
        assert_eq!(
            render("--server {serverSocket} --remote-tab {filePath}", &bindings),
            "--server /tmp/s --remote-tab \"/a b.cs\""
        );
    }

    #[test]
    fn test_render_leaves_unbound_placeholders() {
        let bindings = Bindings::new().with(APP, "nvim");
        assert_eq!(
            render("{app} --listen {serverSocket}", &bindings),
            "nvim --listen {serverSocket}"
        );
    }

    #[test]
    fn test_render_every_bound_key_once() {
        let bindings: Bindings = [
            (APP, "/usr/bin/nvim"),
            (FILE_PATH, "\"/p.cs\""),
            (SERVER_SOCKET, "127.0.0.1:4242"),
            (LINE, "10"),
            (COLUMN, "3"),
            (ENVIRONMENT, "A=1"),
        ]
        .into_iter()
        .collect();
        let template = "{environment} {app} {filePath} {serverSocket} {line} {column}";
        let rendered = render(template, &bindings);

        assert_eq!(rendered, "A=1 /usr/bin/nvim \"/p.cs\" 127.0.0.1:4242 10 3");
        for key in [APP, FILE_PATH, SERVER_SOCKET, LINE, COLUMN, ENVIRONMENT] {
            assert!(!rendered.contains(&format!("{{{key}}}")));
        }
        assert!(unresolved(template, &bindings).is_empty());
    }

    #[test]
    fn test_render_is_whole_token_only() {
        let bindings = Bindings::new().with(APP, "nvim");
        assert_eq!(render("{ap} {app", &bindings), "{ap} {app");
        assert_eq!(render("{{app}}", &bindings), "{nvim}");
        assert_eq!(render("{ app }", &bindings), "{ app }");
    }

    #[test]
    fn test_render_does_not_rescan_values() {
        let bindings = Bindings::new()
            .with(FILE_PATH, "{app}")
            .with(APP, "nvim");
        assert_eq!(render("{filePath}", &bindings), "{app}");
    }

    #[test]
    fn test_render_vim_keys_survive() {
        let bindings = Bindings::new().with(LINE, "10").with(COLUMN, "3");
        assert_eq!(
            render(":call cursor({line},{column})<CR>", &bindings),
            ":call cursor(10,3)<CR>"
        );
    }

    #[test]
    fn test_split_args_quotes() {
        assert_eq!(
            split_args("--server /tmp/s --remote-tab \"/a b.cs\""),
            vec!["--server", "/tmp/s", "--remote-tab", "/a b.cs"]
        );
        assert_eq!(
            split_args("--remote-send \":call cursor(1,0)<CR>\""),
            vec!["--remote-send", ":call cursor(1,0)<CR>"]
        );
        assert_eq!(split_args("-c 'echo hi'"), vec!["-c", "echo hi"]);
        assert_eq!(split_args("  "), Vec::<String>::new());
        assert_eq!(split_args("\"\""), vec![""]);
    }

    #[test]
    fn test_split_args_keeps_windows_backslashes() {
        assert_eq!(
            split_args(r#"-File "C:\scripts\ppid.ps1" C:\a\b"#),
            vec!["-File", r"C:\scripts\ppid.ps1", r"C:\a\b"]
        );
    }

    #[test]
    fn test_quote_round_trips_through_split() {
        let path = r#"/tmp/we "ird"/fi\le.cs"#;
        assert_eq!(split_args(&quote(path)), vec![path.to_string()]);
    }

    #[test]
    fn test_parse_environment() {
        let env = parse_environment("FOO=1 BAR=\"two words\" bad 9X=1 EMPTY=");
        assert_eq!(
            env,
            vec![
                ("FOO".to_string(), "1".to_string()),
                ("BAR".to_string(), "two words".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_unresolved_lists_missing_keys() {
        let bindings = Bindings::new().with(APP, "nvim");
        assert_eq!(
            unresolved("{app} {serverSocket} {typo}", &bindings),
            vec!["serverSocket".to_string(), "typo".to_string()]
        );
    }
}
