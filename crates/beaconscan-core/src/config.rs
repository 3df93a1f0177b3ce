//! Application configuration management.
//!
//! Handles loading, saving, and validating beaconscan configuration:
//! - HTTP bind address
//! - Bluetooth adapter and ranging cadence
//! - How location permission is obtained
//! - The ordered list of ranging regions
//!
//! Configuration is read from a TOML file and then overlaid with
//! environment variables of the form `BEACONSCAN__<SECTION>__<KEY>`, for
//! example `BEACONSCAN__SCANNER__ADAPTER=hci1`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::region::{validate_regions, Region, RegionSet};
use crate::sources::PermissionGrant;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "BEACONSCAN_CONFIG";

const ENV_PREFIX: &str = "BEACONSCAN";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file exists but could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    ReadError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// The configuration could not be serialized.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several invalid values.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl From<::config::ConfigError> for ConfigError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::ParseError(err.to_string())
    }
}

/// Main application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,

    /// Bluetooth scanner settings.
    pub scanner: ScannerConfig,

    /// Location permission settings.
    pub permission: PermissionConfig,

    /// Regions to range for, in presentation order.
    pub regions: Vec<Region>,
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,
}

/// Bluetooth scanner settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Adapter name (e.g. `hci0`). The default adapter is used when unset.
    pub adapter: Option<String>,

    /// How often a ranging batch is emitted per region, in milliseconds.
    pub ranging_interval_ms: u64,

    /// How long a beacon stays visible after its last advertisement, in seconds.
    pub beacon_ttl_secs: u64,
}

/// How location permission is obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Granted when the BlueZ daemon and an adapter are reachable.
    #[default]
    Bluez,
    /// Always granted.
    Granted,
    /// Always denied.
    Denied,
    /// Always restricted.
    Restricted,
}

impl PermissionMode {
    /// The fixed grant for non-BlueZ modes.
    #[must_use]
    pub const fn fixed_grant(self) -> Option<PermissionGrant> {
        match self {
            Self::Bluez => None,
            Self::Granted => Some(PermissionGrant::Granted),
            Self::Denied => Some(PermissionGrant::Denied),
            Self::Restricted => Some(PermissionGrant::Restricted),
        }
    }
}

/// Location permission settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Where the permission answer comes from.
    pub mode: PermissionMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            adapter: None,
            ranging_interval_ms: 1000,
            beacon_ttl_secs: 5,
        }
    }
}

impl ScannerConfig {
    /// Interval between ranging batches.
    #[must_use]
    pub const fn ranging_interval(&self) -> Duration {
        Duration::from_millis(self.ranging_interval_ms)
    }

    /// How long a sighting stays valid.
    #[must_use]
    pub const fn beacon_ttl(&self) -> Duration {
        Duration::from_secs(self.beacon_ttl_secs)
    }
}

/// Proximity UUID used by the example region in a fresh configuration.
pub const EXAMPLE_PROXIMITY_UUID: Uuid = Uuid::from_u128(0xb940_7f30_f5f8_466e_aff9_2555_6b57_fe6d);

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            scanner: ScannerConfig::default(),
            permission: PermissionConfig::default(),
            regions: vec![Region::new("default", EXAMPLE_PROXIMITY_UUID)],
        }
    }
}

impl Config {
    /// Load configuration from `path`, overlaid with environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist, a parse
    /// error if it is malformed, or validation errors for invalid values.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        Self::layered(Some(&content), None)
    }

    /// Load configuration from `path`, or defaults if the file is missing.
    ///
    /// # Errors
    ///
    /// Returns a read or parse error if the file exists but is unusable, or
    /// validation errors for invalid values.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        match Self::load(path) {
            Err(ConfigError::NotFound(_)) => {
                tracing::info!(path = %path.display(), "No configuration file; using defaults");
                Self::layered(None, None)
            }
            result => result,
        }
    }

    /// Parse configuration from a TOML string, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path` as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every value, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns a single [`ConfigError::ValidationError`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ConfigError::ValidationError {
                field: "server.bind_address".to_string(),
                message: format!("'{}' is not a socket address", self.server.bind_address),
            });
        }

        if self.scanner.ranging_interval_ms == 0 {
            errors.push(ConfigError::ValidationError {
                field: "scanner.ranging_interval_ms".to_string(),
                message: "Ranging interval must be greater than zero".to_string(),
            });
        }

        if self.scanner.beacon_ttl_secs == 0 {
            errors.push(ConfigError::ValidationError {
                field: "scanner.beacon_ttl_secs".to_string(),
                message: "Beacon TTL must be greater than zero".to_string(),
            });
        }

        if self
            .scanner
            .adapter
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            errors.push(ConfigError::ValidationError {
                field: "scanner.adapter".to_string(),
                message: "Adapter name cannot be empty; omit it to use the default".to_string(),
            });
        }

        if self.regions.is_empty() {
            errors.push(ConfigError::ValidationError {
                field: "regions".to_string(),
                message: "At least one region is required".to_string(),
            });
        }
        errors.extend(validate_regions(&self.regions));

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// The configured regions as a validated set.
    ///
    /// # Errors
    ///
    /// Returns validation errors for invalid regions.
    pub fn region_set(&self) -> ConfigResult<RegionSet> {
        RegionSet::new(self.regions.clone())
    }

    /// The bind address as a socket address.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the address does not parse.
    pub fn bind_address(&self) -> ConfigResult<SocketAddr> {
        self.server
            .bind_address
            .parse()
            .map_err(|_| ConfigError::ValidationError {
                field: "server.bind_address".to_string(),
                message: format!("'{}' is not a socket address", self.server.bind_address),
            })
    }

    /// The configuration file path.
    ///
    /// `BEACONSCAN_CONFIG` wins when set.
    #[must_use]
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        // On a Linux host: /etc/beaconscan/config.toml
        // For development elsewhere: the platform config directory
        #[cfg(target_os = "linux")]
        {
            PathBuf::from("/etc/beaconscan/config.toml")
        }
        #[cfg(not(target_os = "linux"))]
        {
            directories::ProjectDirs::from("", "", "beaconscan").map_or_else(
                || PathBuf::from("config.toml"),
                |dirs| dirs.config_dir().join("config.toml"),
            )
        }
    }

    /// Layer `file_content` under `BEACONSCAN__` variables taken from
    /// `env`, or from the process environment when `env` is `None`.
    fn layered(
        file_content: Option<&str>,
        env: Option<::config::Map<String, String>>,
    ) -> ConfigResult<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(content) = file_content {
            builder = builder.add_source(::config::File::from_str(
                content,
                ::config::FileFormat::Toml,
            ));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
