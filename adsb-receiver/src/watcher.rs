//! Settings file watcher.
//!
//! Polls the file's modification time and pushes freshly parsed `Settings`
//! into a watch channel whenever it changes. Parse failures are logged and
//! the previous settings stay in effect.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use adsb_core::config::load_settings;
use adsb_core::Settings;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

pub struct SettingsWatcher {
    path: PathBuf,
    interval: Duration,
    last_modified: Option<SystemTime>,
}

impl SettingsWatcher {
    /// Start watching `path`. The current mtime is the baseline, so only
    /// later edits are reported.
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        SettingsWatcher {
            path,
            interval,
            last_modified,
        }
    }

    /// Reload if the mtime moved since the last check.
    pub fn check(&mut self) -> Option<Settings> {
        let current = modified(&self.path);
        if current == self.last_modified {
            return None;
        }
        self.last_modified = current;

        match load_settings(&self.path) {
            Ok(settings) => {
                info!(path = %self.path.display(), "settings file changed");
                Some(settings)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable settings");
                None
            }
        }
    }

    /// Poll until cancelled, publishing each reload through `tx`.
    ///
    /// `adjust` is applied to every reload (e.g. CLI overrides).
    pub async fn run<F>(mut self, tx: watch::Sender<Settings>, cancel: CancellationToken, adjust: F)
    where
        F: Fn(&mut Settings),
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            if let Some(mut settings) = self.check() {
                adjust(&mut settings);
                tx.send_replace(settings);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
