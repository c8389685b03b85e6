//! TOML-based configuration for the NFC bridge.
//!
//! Reads and writes [`BridgeConfig`] to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\Patunay\nfc-bridge.toml`
//! - Linux:    `~/.config/patunay/nfc-bridge.toml`
//! - macOS:    `~/Library/Application Support/Patunay/nfc-bridge.toml`
//!
//! Example:
//!
//! ```toml
//! [reader]
//! backend = "pcsc"
//! poll_interval_ms = 500
//!
//! [tag]
//! start_block = 4
//! block_size = 4
//! capacity = 144
//!
//! [logging]
//! level = "info"
//!
//! [mock]
//! readers = ["Patunay Mock Reader"]
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default ...)]`, so a missing file, a missing
//! section, or a missing key all fall back to the defaults below.  Command
//! line flags are applied on top of the loaded file in `main.rs`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use patunay_core::{FormatError, TagCodec, TagLayout};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The `[tag]` section describes an unusable layout.
    #[error("invalid [tag] section: {0}")]
    InvalidTagLayout(#[from] FormatError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level bridge configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    #[serde(default)]
    pub reader: ReaderConfig,
    #[serde(default)]
    pub tag: TagLayout,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub mock: MockConfig,
}

/// Which reader backend drives the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReaderBackend {
    /// In-memory readers and tags (no hardware).
    Mock,
    /// PC/SC smart-card service.
    Pcsc,
}

/// Reader backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReaderConfig {
    #[serde(default = "default_backend")]
    pub backend: ReaderBackend,
    /// Upper bound on how long the PC/SC monitor blocks before re-checking
    /// whether the bridge is still running.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Logging settings.  `RUST_LOG` takes precedence when set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Settings for the mock backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MockConfig {
    /// Readers reported as attached from start-up.
    #[serde(default = "default_mock_readers")]
    pub readers: Vec<String>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_backend() -> ReaderBackend {
    if cfg!(feature = "pcsc") {
        ReaderBackend::Pcsc
    } else {
        ReaderBackend::Mock
    }
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_mock_readers() -> Vec<String> {
    vec!["Patunay Mock Reader".to_string()]
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            readers: default_mock_readers(),
        }
    }
}

impl ReaderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl BridgeConfig {
    /// Builds the tag codec described by the `[tag]` section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidTagLayout`] if the layout cannot hold a frame.
    pub fn codec(&self) -> Result<TagCodec, ConfigError> {
        Ok(TagCodec::new(self.tag)?)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("nfc-bridge.toml"))
}

/// Loads [`BridgeConfig`] from `path`, returning the defaults if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<BridgeConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BridgeConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &BridgeConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `Patunay` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Patunay"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("patunay"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Patunay")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
