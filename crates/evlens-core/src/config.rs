//! Configuration types for evlens.
//!
//! [`Config::load`] reads `$XDG_CONFIG_HOME/evlens/config.toml` (falling back
//! to `~/.config`), creating it with the embedded defaults if it does not yet
//! exist, and applies `EVLENS__SECTION__KEY` environment overrides on top.
//! [`Config::defaults`] returns the same defaults without touching the
//! filesystem (useful in tests).

use serde::Deserialize;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[scanner]
batch_size           = 200
workers              = 8
progress_interval_ms = 1000

[buffer]
max_new_events      = 5000
continuously_update = true

[resolver]
kind           = "local"
database_paths = []
"#;

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// `[scanner]` section: bulk scan batching and worker pool size.
#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
}

fn default_batch_size() -> usize { 200 }
fn default_workers() -> usize { 8 }
fn default_progress_interval_ms() -> u64 { 1000 }

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            progress_interval_ms: default_progress_interval_ms(),
        }
    }
}

impl ScannerConfig {
    pub fn progress_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.progress_interval_ms.max(1))
    }
}

/// `[buffer]` section: pending-buffer bound and the initial update mode.
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    #[serde(default = "default_max_new_events")]
    pub max_new_events: usize,
    #[serde(default = "default_continuously_update")]
    pub continuously_update: bool,
}

fn default_max_new_events() -> usize { 5000 }
fn default_continuously_update() -> bool { true }

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_new_events: default_max_new_events(),
            continuously_update: default_continuously_update(),
        }
    }
}

/// Which resolver variant new logs are opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    Local,
    Database,
}

/// `[resolver]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_resolver_kind")]
    pub kind: ResolverKind,
    /// Directory holding one `<provider>.json` per provider, used by the
    /// local resolver.
    #[serde(default)]
    pub provider_dir: Option<PathBuf>,
    /// Provider database files, used by the database resolver.
    #[serde(default)]
    pub database_paths: Vec<PathBuf>,
}

fn default_resolver_kind() -> ResolverKind { ResolverKind::Local }

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            kind: default_resolver_kind(),
            provider_dir: None,
            database_paths: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load from the user config file, layered on top of the built-in
    /// defaults. Creates the file with defaults if it does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let path = config_path();

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, DEFAULT_CONFIG.trim_start())?;
            tracing::debug!(path = %path.display(), "wrote default config");
        }

        let cfg: Config = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::from(path.as_path()).required(false))
            .add_source(config::Environment::with_prefix("EVLENS").separator("__"))
            .build()?
            .try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .expect("built-in default config must be valid TOML")
            .try_deserialize()
            .expect("built-in default config must deserialize correctly")
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.scanner.batch_size > 0, "scanner.batch_size must be positive");
        anyhow::ensure!(self.scanner.workers > 0, "scanner.workers must be positive");
        anyhow::ensure!(self.buffer.max_new_events > 0, "buffer.max_new_events must be positive");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
                .join(".config")
        })
        .join("evlens")
        .join("config.toml")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
