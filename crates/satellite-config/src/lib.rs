//! Configuration for the satellite debug engine.
//!
//! Settings are read from a TOML file; every section and key is optional and
//! falls back to the defaults below. Unknown keys are rejected so typos do
//! not silently fall back to defaults.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod logging;

pub use logging::{init_tracing, LoggingConfig};

/// Environment variable naming the config file when none is given explicitly.
pub const CONFIG_ENV_VAR: &str = "SATELLITE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid config value for `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The `Display` impl quotes the offending source line; keep only the message.
        ConfigError::Toml(err.message().to_owned())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SatelliteConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub debug_server: DebugServerConfig,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the Larky gateway's gRPC service listens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "GatewayConfig::default_port")]
    pub port: u16,
}

impl GatewayConfig {
    fn default_port() -> u16 {
        50051
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: Self::default_port(),
        }
    }
}

/// The Larky debug server and how patiently we talk to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebugServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "DebugServerConfig::default_port")]
    pub port: u16,
    #[serde(default = "DebugServerConfig::default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "DebugServerConfig::default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,
    /// How long stopping a session waits for the script to finish on its own.
    #[serde(default = "DebugServerConfig::default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

impl DebugServerConfig {
    fn default_port() -> u16 {
        7300
    }

    fn default_connect_attempts() -> u32 {
        5
    }

    fn default_connect_backoff_ms() -> u64 {
        1_000
    }

    fn default_stop_grace_ms() -> u64 {
        1_000
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

impl Default for DebugServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: Self::default_port(),
            connect_attempts: Self::default_connect_attempts(),
            connect_backoff_ms: Self::default_connect_backoff_ms(),
            stop_grace_ms: Self::default_stop_grace_ms(),
        }
    }
}

/// The external runner that evaluates scripts with debugging enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvaluatorConfig {
    #[serde(default = "EvaluatorConfig::default_program")]
    pub program: PathBuf,
    /// Extra arguments placed before the debug flags.
    #[serde(default)]
    pub args: Vec<String>,
}

impl EvaluatorConfig {
    fn default_program() -> PathBuf {
        PathBuf::from("larky-debug-eval")
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            program: Self::default_program(),
            args: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_owned()
}

impl SatelliteConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config file from TOML.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load `explicit`, else the file named by `SATELLITE_CONFIG`, else the
    /// defaults. Returns the path actually read, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = explicit.map(Path::to_path_buf).or_else(|| {
            std::env::var_os(CONFIG_ENV_VAR)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        });

        match path {
            Some(path) => {
                let config = Self::load_from_path(&path)?;
                Ok((config, Some(path)))
            }
            None => Ok((Self::default(), None)),
        }
    }

    /// Reject values that would only fail later at connect/spawn time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, message: &str) -> ConfigError {
            ConfigError::Invalid {
                field,
                message: message.to_owned(),
            }
        }

        if self.gateway.host.trim().is_empty() {
            return Err(invalid("gateway.host", "must not be empty"));
        }
        if self.gateway.port == 0 {
            return Err(invalid("gateway.port", "must be between 1 and 65535"));
        }
        if self.debug_server.host.trim().is_empty() {
            return Err(invalid("debug_server.host", "must not be empty"));
        }
        if self.debug_server.port == 0 {
            return Err(invalid("debug_server.port", "must be between 1 and 65535"));
        }
        if self.debug_server.connect_attempts == 0 {
            return Err(invalid("debug_server.connect_attempts", "must be at least 1"));
        }
        if self.evaluator.program.as_os_str().is_empty() {
            return Err(invalid("evaluator.program", "must not be empty"));
        }
        Ok(())
    }
}
