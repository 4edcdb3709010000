//! Store configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Where a store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A private in-memory database, gone when the store is dropped.
    InMemory,
    /// A store directory on disk.
    Directory(PathBuf),
}

impl Location {
    /// Returns the directory, if on disk.
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::InMemory => None,
            Self::Directory(path) => Some(path),
        }
    }
}

/// How old-schema rows are brought up to date after open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpgradeMode {
    /// A background thread drives the upgrade sequence.
    #[default]
    Background,
    /// The caller drives it with `upgrade_step`/`run_upgrades`.
    Manual,
}

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// How long a writer waits for another connection's lock.
    pub busy_timeout: Duration,

    /// Statements slower than this are logged as warnings.
    pub slow_statement_threshold: Duration,

    /// Growth of the object cache that triggers a sweep of dead entries.
    pub cache_sweep_threshold: usize,

    /// How old-schema rows are upgraded.
    pub upgrade_mode: UpgradeMode,

    /// File area for in-memory stores.
    pub files_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            busy_timeout: Duration::from_secs(5),
            slow_statement_threshold: Duration::from_secs(2),
            cache_sweep_threshold: 1024,
            upgrade_mode: UpgradeMode::Background,
            files_dir: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the backend busy timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets the slow statement threshold.
    #[must_use]
    pub const fn slow_statement_threshold(mut self, threshold: Duration) -> Self {
        self.slow_statement_threshold = threshold;
        self
    }

    /// Sets the cache sweep threshold.
    #[must_use]
    pub const fn cache_sweep_threshold(mut self, entries: usize) -> Self {
        self.cache_sweep_threshold = entries;
        self
    }

    /// Sets the upgrade mode.
    #[must_use]
    pub const fn upgrade_mode(mut self, mode: UpgradeMode) -> Self {
        self.upgrade_mode = mode;
        self
    }

    /// Sets the file area used by in-memory stores.
    #[must_use]
    pub fn files_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.files_dir = Some(dir.into());
        self
    }
}
