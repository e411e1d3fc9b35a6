// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Best-effort window raising.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::FocusSettings;
use crate::platform::{FocusHint, PlatformOps};

/// Tries once per call to raise the editor window.
///
/// Failures never propagate. The first one per process is logged as a
/// warning, later ones only at debug level.
#[derive(Debug, Default)]
pub struct WindowFocuser {
    warned: AtomicBool,
}

impl WindowFocuser {
    /// Creates a focuser that has not warned yet.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            warned: AtomicBool::new(false),
        }
    }

    /// Returns whether the helper reported success.
    pub async fn try_focus(
        &self,
        platform: &PlatformOps,
        settings: &FocusSettings,
        hint: &FocusHint,
        timeout: Duration,
    ) -> bool {
        if !settings.enabled {
            debug!("Window focus disabled");
            return false;
        }

        match platform.focus_window(settings, hint, timeout).await {
            Ok(()) => {
                debug!("Focused window for {}", hint.address);
                true
            }
            Err(e) => {
                if self.warned.swap(true, Ordering::Relaxed) {
                    debug!("{e}");
                } else {
                    warn!("{e} (further focus failures are logged at debug level)");
                }
                false
            }
        }
    }

    /// Whether a focus failure has been reported already.
    #[must_use]
    pub fn has_warned(&self) -> bool {
        self.warned.load(Ordering::Relaxed)
    }
}
