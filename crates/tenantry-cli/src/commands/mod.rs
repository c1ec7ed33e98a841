//! Command implementations.

pub mod infra;
pub mod sync;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use tenantry_core::config::{CONFIG_FILE, InfraConfig};
use tenantry_core::layout::InfraLayout;

/// Configuration and layout shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    /// Loaded configuration, defaults when no file exists.
    pub config: InfraConfig,
    /// Directory layout under the root.
    pub layout: InfraLayout,
}

impl Context {
    /// Loads the configuration for `root`.
    ///
    /// An explicit `config` path must exist; the default
    /// `<root>/tenantry.toml` is optional.
    pub fn load(root: &Path, config: Option<&Path>) -> Result<Self> {
        let config = match config {
            Some(path) => InfraConfig::from_file(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?,
            None => {
                let path: PathBuf = root.join(CONFIG_FILE);
                InfraConfig::load_or_default(&path).with_context(|| {
                    format!("failed to load configuration from {}", path.display())
                })?
            },
        };
        let layout = InfraLayout::with_config(root, &config.layout);
        Ok(Self { config, layout })
    }
}
