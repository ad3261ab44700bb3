//! Per-project build settings

use crate::cloud::Cloud;
use crate::error::{Result, SkyhookError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEPLOY_CONFIG_FILE: &str = "deploy.yaml";

/// Contents of `deploy.yaml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DeployConfig {
    pub cloud: Option<Cloud>,
    /// Cluster name
    pub name: Option<String>,
    pub region: Option<String>,
    pub size: Option<String>,
    /// Channel or release to install
    pub k3s_version: Option<String>,
}

impl DeployConfig {
    /// Read `deploy.yaml` from `dir`, or an empty config if there is none
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(DEPLOY_CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&contents)
            .map_err(|e| SkyhookError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }
}
