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

//! CLI utilities for terminal output formatting and colors.

use crossterm::tty::IsTty;
use std::io::stdout;

/// Configuration for color output
#[derive(Debug, Clone)]
pub struct ColorConfig {
    /// Whether escape codes are emitted.
    pub enabled: bool,
}

impl ColorConfig {
    /// Create a new ColorConfig, auto-detecting TTY unless nocolor is true
    #[must_use]
    pub fn new(nocolor: bool) -> Self {
        Self {
            enabled: !nocolor && stdout().is_tty(),
        }
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    /// Green (available, alive)
    #[must_use]
    pub fn green(&self, s: &str) -> String {
        self.paint("32", s)
    }

    /// Yellow (degraded but usable)
    #[must_use]
    pub fn yellow(&self, s: &str) -> String {
        self.paint("33", s)
    }

    /// Red (missing, dead)
    #[must_use]
    pub fn red(&self, s: &str) -> String {
        self.paint("31", s)
    }

    /// Cyan (commands and addresses)
    #[must_use]
    pub fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    /// Dim text
    #[must_use]
    pub fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    /// Bold text
    #[must_use]
    pub fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }
}

/// Get the terminal width, defaulting to 80 if unable to detect
#[must_use]
pub fn terminal_width() -> usize {
    crossterm::terminal::size().map_or(80, |(w, _)| usize::from(w))
}

/// Truncate a string to max_len characters, adding "..." if truncated
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return ".".repeat(max_len);
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("test", 4), "test");
    }

    #[test]
    fn test_truncate_long_string() {
        assert_eq!(truncate("kitty nvim --listen /tmp/nvimsocket", 12), "kitty nvi...");
        assert_eq!(truncate("abcdefghij", 7), "abcd...");
    }

    #[test]
    fn test_truncate_edge_cases() {
        assert_eq!(truncate("hello", 3), "...");
        assert_eq!(truncate("hello", 2), "..");
        assert_eq!(truncate("hello", 0), "");
        assert_eq!(truncate("ünïcödé path", 6), "ünï...");
    }

    #[test]
    fn test_color_config_disabled() {
        let config = ColorConfig::new(true);
        assert!(!config.enabled);
        assert_eq!(config.green("test"), "test");
        assert_eq!(config.yellow("test"), "test");
        assert_eq!(config.red("test"), "test");
        assert_eq!(config.bold("test"), "test");
    }

    #[test]
    fn test_color_config_enabled() {
        let config = ColorConfig { enabled: true };
        assert_eq!(config.red("x"), "\x1b[31mx\x1b[0m");
        assert_eq!(config.dim("x"), "\x1b[2mx\x1b[0m");
    }
}
