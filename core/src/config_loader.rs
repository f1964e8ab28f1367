//! Layered gateway configuration.
//!
//! Precedence, later wins:
//! 1. Built-in defaults
//! 2. `config.toml` under `$CMDGATE_HOME` (default `<config_dir>/cmdgate`)
//! 3. `CMDGATE_*` environment overrides
//!
//! ```no_run
//! use cmdgate_core::ConfigLoader;
//!
//! let config = ConfigLoader::new().load().expect("config");
//! println!("{}", config.trace_path().display());
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::CLOCK_LOG_FILENAME;

pub const CONFIG_FILENAME: &str = "config.toml";
pub const DEFAULT_ENV_PREFIX: &str = "CMDGATE";
pub const DEFAULT_TRACE_FILE: &str = "latency_trace.jsonl";
pub const DEFAULT_TRACE_SOURCE: &str = "tool-app";
pub const DEFAULT_SYNC_CALL_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("I/O error loading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid value for ${var}: '{value}' (expected: {expected})")]
    InvalidEnvValue {
        var: String,
        value: String,
        expected: String,
    },

    #[error("Invalid value for {key} in config.toml: {value} (expected: {expected})")]
    InvalidFileValue {
        key: String,
        value: String,
        expected: String,
    },

    #[error("Cannot determine config directory; set $CMDGATE_HOME")]
    NoHome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Trace file. Relative paths resolve against the data directory.
    pub file: PathBuf,
    /// `source` written on every record.
    pub source: String,
    /// `fsync` after every append.
    pub fsync: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_TRACE_FILE),
            source: DEFAULT_TRACE_SOURCE.to_string(),
            fsync: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Holds the clock log and, by default, the trace file.
    pub data_dir: PathBuf,
    /// Daemon socket. `None` picks the runtime-dir default.
    pub socket_path: Option<PathBuf>,
    pub trace: TraceConfig,
    pub sync_call_timeout_ms: u64,
    /// Exit after this many idle seconds. 0 disables.
    pub idle_timeout_secs: u64,
    pub clock_in_today_writes_store: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            socket_path: None,
            trace: TraceConfig::default(),
            sync_call_timeout_ms: DEFAULT_SYNC_CALL_TIMEOUT_MS,
            idle_timeout_secs: 0,
            clock_in_today_writes_store: false,
        }
    }
}

impl GatewayConfig {
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(CLOCK_LOG_FILENAME)
    }

    pub fn trace_path(&self) -> PathBuf {
        if self.trace.file.is_absolute() {
            self.trace.file.clone()
        } else {
            self.data_dir.join(&self.trace.file)
        }
    }

    pub fn sync_call_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_call_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("cmdgate"))
        .unwrap_or_else(|| PathBuf::from(".cmdgate"))
}

pub struct ConfigLoader {
    home: Option<PathBuf>,
    env_prefix: String,
    skip_file: bool,
    skip_env: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            home: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            skip_file: false,
            skip_env: false,
        }
    }

    /// Directory holding `config.toml`.
    pub fn with_home(mut self, path: PathBuf) -> Self {
        self.home = Some(path);
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn skip_file_layer(mut self) -> Self {
        self.skip_file = true;
        self
    }

    pub fn skip_env_layer(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn load(self) -> Result<GatewayConfig, ConfigLoadError> {
        let mut config = if self.skip_file {
            GatewayConfig::default()
        } else {
            Self::load_from_file(&self.resolve_home()?)?
        };

        if !self.skip_env {
            Self::apply_env_overrides_with(&mut config, &self.env_prefix, |var| env::var(var).ok())?;
        }

        tracing::debug!(?config, "Gateway config loaded");
        Ok(config)
    }

    fn resolve_home(&self) -> Result<PathBuf, ConfigLoadError> {
        if let Some(ref path) = self.home {
            return Ok(path.clone());
        }
        if let Ok(path) = env::var(format!("{}_HOME", self.env_prefix))
            && !path.trim().is_empty()
        {
            return Ok(PathBuf::from(path));
        }
        dirs::config_dir()
            .map(|dir| dir.join("cmdgate"))
            .ok_or(ConfigLoadError::NoHome)
    }

    /// Defaults overlaid with `config.toml`. A missing file is not an error.
    pub fn load_from_file(home: &Path) -> Result<GatewayConfig, ConfigLoadError> {
        let config_path = home.join(CONFIG_FILENAME);
        let contents = match std::fs::read_to_string(&config_path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("config.toml not found at {:?}, using defaults", config_path);
                return Ok(GatewayConfig::default());
            }
            Err(e) => return Err(ConfigLoadError::Io(e)),
        };
        let config: GatewayConfig = toml::from_str(&contents)?;
        if config.sync_call_timeout_ms == 0 {
            return Err(ConfigLoadError::InvalidFileValue {
                key: "sync_call_timeout_ms".to_string(),
                value: "0".to_string(),
                expected: POSITIVE_MILLIS.to_string(),
            });
        }
        Ok(config)
    }

    /// Apply `{prefix}_*` overrides read through `lookup`. Blank values are
    /// ignored.
    pub fn apply_env_overrides_with(
        config: &mut GatewayConfig,
        prefix: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigLoadError> {
        let read = |suffix: &str| {
            let var = format!("{prefix}_{suffix}");
            let value = lookup(&var).filter(|v| !v.trim().is_empty());
            if let Some(ref value) = value {
                tracing::debug!("Applying env override: {}={}", var, value);
            }
            value.map(|value| (var, value))
        };

        if let Some((_, value)) = read("DATA_DIR") {
            config.data_dir = PathBuf::from(value);
        }
        if let Some((_, value)) = read("SOCKET") {
            config.socket_path = Some(PathBuf::from(value));
        }
        if let Some((_, value)) = read("TRACE_FILE") {
            config.trace.file = PathBuf::from(value);
        }
        if let Some((_, value)) = read("TRACE_SOURCE") {
            config.trace.source = value;
        }
        if let Some((var, value)) = read("TRACE_FSYNC") {
            config.trace.fsync = parse_bool(var, value)?;
        }
        if let Some((var, value)) = read("SYNC_TIMEOUT_MS") {
            config.sync_call_timeout_ms = parse_positive_u64(var, value)?;
        }
        if let Some((var, value)) = read("IDLE_TIMEOUT_SECS") {
            config.idle_timeout_secs = parse_u64(var, value)?;
        }
        if let Some((var, value)) = read("CLOCK_IN_TODAY_WRITES_STORE") {
            config.clock_in_today_writes_store = parse_bool(var, value)?;
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_bool(var: String, value: String) -> Result<bool, ConfigLoadError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigLoadError::InvalidEnvValue {
            var,
            value,
            expected: "true/false, 1/0, yes/no, on/off".to_string(),
        }),
    }
}

fn parse_u64(var: String, value: String) -> Result<u64, ConfigLoadError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigLoadError::InvalidEnvValue {
            var,
            value,
            expected: "non-negative integer".to_string(),
        })
}

/// A zero timeout would fail every synchronous call before dispatch.
fn parse_positive_u64(var: String, value: String) -> Result<u64, ConfigLoadError> {
    match parse_u64(var.clone(), value.clone())? {
        0 => Err(ConfigLoadError::InvalidEnvValue {
            var,
            value,
            expected: POSITIVE_MILLIS.to_string(),
        }),
        n => Ok(n),
    }
}

const POSITIVE_MILLIS: &str = "positive number of milliseconds";
