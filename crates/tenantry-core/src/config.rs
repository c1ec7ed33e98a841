//! Configuration parsing and management.
//!
//! An infrastructure root may carry a `tenantry.toml` file. Every field has a
//! default, so an absent file is equivalent to an empty one.
//!
//! ```toml
//! [layout]
//! units_dir = "apps"
//! generated_dir = "generated"
//! preferred_order = ["swimify", "swim_analyzer", "aquis"]
//!
//! [sync]
//! api_base_url = "https://firestore.googleapis.com/v1"
//! database = "(default)"
//! token_env = "FIRESTORE_ACCESS_TOKEN"
//! token_command = ["gcloud", "auth", "print-access-token"]
//! identity_attributes = ["order", "arrayConfig", "vectorConfig"]
//! max_pages = 1000
//! timeout_secs = 60
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::index::DEFAULT_IDENTITY_ATTRIBUTES;

/// Default configuration file name, resolved against the infrastructure root.
pub const CONFIG_FILE: &str = "tenantry.toml";

/// Units composed ahead of all others, in this order, when present.
pub const DEFAULT_PREFERRED_ORDER: [&str; 3] = ["swimify", "swim_analyzer", "aquis"];

/// Default base URL of the index admin API.
pub const DEFAULT_API_BASE_URL: &str = "https://firestore.googleapis.com/v1";

/// Default database identifier.
pub const DEFAULT_DATABASE: &str = "(default)";

/// Default listing page limit.
pub const DEFAULT_MAX_PAGES: u32 = 1000;

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InfraConfig {
    /// Directory layout and composition ordering.
    #[serde(default)]
    pub layout: LayoutConfig,

    /// Remote index synchronisation.
    #[serde(default)]
    pub sync: SyncConfig,
}

impl InfraConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read, parsed or
    /// validated.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, contains unknown keys, or
    /// fails [`InfraConfig::validate`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first offending
    /// field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.layout.units_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "layout.units_dir must not be empty".to_string(),
            ));
        }
        if self.layout.generated_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "layout.generated_dir must not be empty".to_string(),
            ));
        }
        if self.sync.token_command.is_empty() {
            return Err(ConfigError::Validation(
                "sync.token_command must name a program".to_string(),
            ));
        }
        if self.sync.max_pages == 0 {
            return Err(ConfigError::Validation(
                "sync.max_pages must be at least 1".to_string(),
            ));
        }
        if self.sync.api_base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "sync.api_base_url must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Directory layout and composition ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    /// Directory holding one subdirectory per unit, relative to the root.
    #[serde(default = "default_units_dir")]
    pub units_dir: PathBuf,

    /// Directory receiving composed artifacts, relative to the root.
    #[serde(default = "default_generated_dir")]
    pub generated_dir: PathBuf,

    /// Units composed first, in this order. Remaining units follow
    /// alphabetically.
    #[serde(default = "default_preferred_order")]
    pub preferred_order: Vec<String>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            units_dir: default_units_dir(),
            generated_dir: default_generated_dir(),
            preferred_order: default_preferred_order(),
        }
    }
}

/// Remote index synchronisation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Base URL of the index admin API.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Database identifier inside the project.
    #[serde(default = "default_database")]
    pub database: String,

    /// Environment variable holding a bearer token. Checked before
    /// `token_command`.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Program and arguments printing a bearer token on stdout.
    #[serde(default = "default_token_command")]
    pub token_command: Vec<String>,

    /// Per-field attributes that take part in index identity.
    #[serde(default = "default_identity_attributes")]
    pub identity_attributes: Vec<String>,

    /// Upper bound on listing pages fetched in one run.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            database: default_database(),
            token_env: None,
            token_command: default_token_command(),
            identity_attributes: default_identity_attributes(),
            max_pages: default_max_pages(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_units_dir() -> PathBuf {
    PathBuf::from("apps")
}

fn default_generated_dir() -> PathBuf {
    PathBuf::from("generated")
}

fn default_preferred_order() -> Vec<String> {
    DEFAULT_PREFERRED_ORDER.iter().map(ToString::to_string).collect()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_token_command() -> Vec<String> {
    ["gcloud", "auth", "print-access-token"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_identity_attributes() -> Vec<String> {
    DEFAULT_IDENTITY_ATTRIBUTES
        .iter()
        .map(ToString::to_string)
        .collect()
}

const fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
