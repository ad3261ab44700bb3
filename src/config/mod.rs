//! Configuration and deployment state
//!
//! Three YAML files are involved:
//!
//! - `~/.skyhook/config.yaml`: API tokens and user defaults ([`AppConfig`])
//! - `./deploy.yaml`: per-project build settings ([`DeployConfig`])
//! - `./deploy-state.yaml`: the VM currently deployed for the project ([`StateStore`])

pub mod deploy;
pub mod state;

pub use deploy::DeployConfig;
pub use state::{DeploymentRecord, StateStore};

use crate::cloud::Cloud;
use crate::error::{Result, SkyhookError};
use crate::sshkey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// User level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AppConfig {
    /// API token per cloud
    pub api_keys: BTreeMap<Cloud, String>,
    /// Cloud used when a build does not name one
    pub default_cloud: Option<Cloud>,
    pub default_region: Option<String>,
    pub default_size: Option<String>,
    /// Public key uploaded to providers, `~/.ssh/id_rsa.pub` if unset
    pub ssh_public_key: Option<PathBuf>,
    /// Display name for uploaded keys, the host name if unset
    pub ssh_key_name: Option<String>,
    /// Passphrase of the matching private key, if it has one
    pub ssh_key_passphrase: Option<String>,
    /// File this config was read from
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl AppConfig {
    /// `~/.skyhook/config.yaml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| SkyhookError::InvalidConfig("no home directory".to_string()))?;
        Ok(home.join(".skyhook").join("config.yaml"))
    }

    /// Read the config at `path`; a missing file is an empty config
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            if contents.trim().is_empty() {
                AppConfig::default()
            } else {
                serde_yaml::from_str(&contents).map_err(|e| {
                    SkyhookError::InvalidConfig(format!("{}: {}", path.display(), e))
                })?
            }
        } else {
            AppConfig::default()
        };

        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Read the user config and apply token overrides from the environment
    pub fn load_default() -> Result<Self> {
        let mut config = Self::load(&Self::default_path()?)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Override API tokens from environment variables
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for cloud in Cloud::ALL {
            if let Some(token) = lookup(cloud.token_env()).filter(|t| !t.trim().is_empty()) {
                tracing::debug!("using {} from the environment", cloud.token_env());
                self.api_keys.insert(cloud, token.trim().to_string());
            }
        }
    }

    /// Write the config back to where it was loaded from
    pub fn save(&self) -> Result<()> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => Self::default_path()?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn api_key(&self, cloud: Cloud) -> Option<String> {
        self.api_keys
            .get(&cloud)
            .filter(|k| !k.is_empty())
            .cloned()
    }

    pub fn set_api_key(&mut self, cloud: Cloud, key: &str) {
        self.api_keys.insert(cloud, key.trim().to_string());
    }

    /// Clouds with a usable token
    pub fn configured_clouds(&self) -> Vec<Cloud> {
        Cloud::ALL
            .into_iter()
            .filter(|c| self.api_key(*c).is_some())
            .collect()
    }

    pub fn public_key_path(&self) -> Option<PathBuf> {
        self.ssh_public_key
            .clone()
            .or_else(sshkey::default_public_key_path)
    }

    pub fn key_display_name(&self) -> String {
        self.ssh_key_name
            .clone()
            .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned())
    }
}
