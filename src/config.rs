//! Driver configuration.
//!
//! Two layers live here. [`DriverConfig`] is the process-level settings
//! block loaded once via `ortho-config` (defaults, `machina.toml`, then
//! `MACHINA_*` environment variables). [`ConfigSource`] is the key-value
//! configuration service drivers query at `initialize` and per `refresh`.

use std::collections::HashMap;
use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use camino::Utf8Path;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::files::read_to_string_ambient;

/// Key holding the boot-delay toggle.
pub const SIMULATE_BOOT_DELAY_KEY: &str = "simulate_boot_delay";
/// Key holding the boot delay in milliseconds.
pub const BOOT_DELAY_MS_KEY: &str = "boot_delay_ms";
/// Key holding the static driver's machine list.
pub const MACHINES_KEY: &str = "machines";

/// Boot delay applied when the toggle is on and no explicit value is set.
pub const DEFAULT_BOOT_DELAY: Duration = Duration::from_millis(500);

/// Backend variants a process can be configured with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DriverKind {
    /// Deterministic in-memory driver with an optional session endpoint.
    Stub,
    /// Driver over a pre-declared list of machines.
    Static,
}

impl FromStr for DriverKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "static" => Ok(Self::Static),
            other => Err(ConfigError::InvalidValue {
                key: String::from("driver"),
                message: format!("unknown driver '{other}', expected 'stub' or 'static'"),
            }),
        }
    }
}

/// Process-level driver settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "MACHINA",
    discovery(
        app_name = "machina",
        env_var = "MACHINA_CONFIG_PATH",
        config_file_name = "machina.toml",
        dotfile_name = ".machina.toml",
        project_file_name = "machina.toml"
    )
)]
pub struct DriverConfig {
    /// Driver variant to load (`stub` or `static`).
    #[ortho_config(default = "stub".to_owned())]
    pub driver: String,
    /// Whether refresh delays the `running` transition to emulate boot time.
    #[ortho_config(default = false)]
    pub simulate_boot_delay: bool,
    /// Boot delay in milliseconds when the simulation is enabled.
    #[ortho_config(default = 500)]
    pub boot_delay_ms: u64,
    /// Whether the stub driver starts its local session endpoint.
    #[ortho_config(default = true)]
    pub session_endpoint: bool,
    /// JSON file listing the static driver's machines.
    pub machines_file: Option<String>,
}

impl DriverConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("machina")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Parses the configured driver variant.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unknown variants.
    pub fn kind(&self) -> Result<DriverKind, ConfigError> {
        self.driver.parse()
    }

    /// Performs semantic validation with guidance on where to fix values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the driver is unknown, the static driver
    /// has no machine list, or the boot delay is zero while enabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let kind = self.kind()?;
        if kind == DriverKind::Static
            && self
                .machines_file
                .as_deref()
                .is_none_or(|path| path.trim().is_empty())
        {
            return Err(ConfigError::MissingField(String::from(
                "missing static machine list: set MACHINA_MACHINES_FILE or add machines_file to machina.toml",
            )));
        }
        if self.simulate_boot_delay && self.boot_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: String::from(BOOT_DELAY_MS_KEY),
                message: String::from(
                    "must be positive when simulate_boot_delay is enabled (MACHINA_BOOT_DELAY_MS)",
                ),
            });
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and lookup.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader or JSON parsing.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
    /// Raised when a value exists but has the wrong shape.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Human-readable description of the problem.
        message: String,
    },
    /// Raised when a referenced file cannot be read.
    #[error("failed to read {path}: {message}")]
    Io {
        /// File that could not be read.
        path: String,
        /// Underlying error message.
        message: String,
    },
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

/// Future returned by configuration lookups.
pub type ConfigFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<Value>, ConfigError>> + Send + 'a>>;

/// Read-only key-value configuration service.
pub trait ConfigSource: Send + Sync {
    /// Returns the structured value stored under `key`, if any.
    fn get<'a>(&'a self, key: &'a str) -> ConfigFuture<'a>;
}

/// Reads `key` from `source` and deserialises it into `T`.
///
/// # Errors
///
/// Propagates lookup failures and returns [`ConfigError::InvalidValue`]
/// when the stored value does not match `T`.
pub async fn read_key<T: DeserializeOwned>(
    source: &dyn ConfigSource,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(raw) = source.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_value(raw)
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key: key.to_owned(),
            message: err.to_string(),
        })
}

/// Resolves the boot delay currently configured, or `None` when disabled.
///
/// # Errors
///
/// Propagates lookup and shape errors from [`read_key`].
pub async fn boot_delay(source: &dyn ConfigSource) -> Result<Option<Duration>, ConfigError> {
    let enabled = read_key::<bool>(source, SIMULATE_BOOT_DELAY_KEY)
        .await?
        .unwrap_or(false);
    if !enabled {
        return Ok(None);
    }
    let delay = read_key::<u64>(source, BOOT_DELAY_MS_KEY)
        .await?
        .map_or(DEFAULT_BOOT_DELAY, Duration::from_millis);
    Ok(Some(delay))
}

/// In-memory [`ConfigSource`] populated up front.
#[derive(Clone, Debug, Default)]
pub struct StaticConfigSource {
    values: HashMap<String, Value>,
}

impl StaticConfigSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous entry.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    /// Builds a source from process settings, loading the machine list file
    /// when one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the machine file cannot be read and
    /// [`ConfigError::Parse`] when it is not valid JSON.
    pub fn from_driver_config(config: &DriverConfig) -> Result<Self, ConfigError> {
        let mut source = Self::new()
            .with(
                SIMULATE_BOOT_DELAY_KEY,
                Value::Bool(config.simulate_boot_delay),
            )
            .with(BOOT_DELAY_MS_KEY, Value::from(config.boot_delay_ms));

        if let Some(path) = config
            .machines_file
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
        {
            let contents =
                read_to_string_ambient(Utf8Path::new(path)).map_err(|message| ConfigError::Io {
                    path: path.to_owned(),
                    message,
                })?;
            let machines: Value = serde_json::from_str(&contents)
                .map_err(|err| ConfigError::Parse(format!("{path}: {err}")))?;
            source = source.with(MACHINES_KEY, machines);
        }

        Ok(source)
    }
}

impl ConfigSource for StaticConfigSource {
    fn get<'a>(&'a self, key: &'a str) -> ConfigFuture<'a> {
        Box::pin(async move { Ok(self.values.get(key).cloned()) })
    }
}
