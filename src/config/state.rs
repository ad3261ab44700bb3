//! Deployment record

use crate::cloud::Cloud;
use crate::error::{Result, SkyhookError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const STATE_FILE: &str = "deploy-state.yaml";

/// What was deployed for a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeploymentRecord {
    pub cloud: Cloud,
    /// Provider VM id
    pub id: String,
    /// Cluster name
    pub name: String,
    pub region: String,
    pub size: String,
    /// Public IPv4 address
    pub ip: String,
    /// Provider id of the SSH key the VM accepts
    pub ssh_key_id: String,
    /// Resolved k3s release
    pub k3s_version: String,
    /// Whether k3s finished installing
    #[serde(default)]
    pub installed: bool,
    pub created_at: DateTime<Utc>,
}

/// Reads and writes `deploy-state.yaml` in a project directory
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<DeploymentRecord> {
        if !self.exists() {
            return Err(SkyhookError::NotDeployed);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        serde_yaml::from_str(&contents)
            .map_err(|e| SkyhookError::InvalidConfig(format!("{}: {}", self.path.display(), e)))
    }

    pub fn save(&self, record: &DeploymentRecord) -> Result<()> {
        std::fs::write(&self.path, serde_yaml::to_string(record)?)?;
        tracing::debug!("saved deployment record to {}", self.path.display());
        Ok(())
    }

    /// Remove the record; a missing record is not an error
    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record() -> DeploymentRecord {
        DeploymentRecord {
            cloud: Cloud::DigitalOcean,
            id: "3164494".to_string(),
            name: "shop-feature-x".to_string(),
            region: "tor1".to_string(),
            size: "s-1vcpu-1gb".to_string(),
            ip: "203.0.113.5".to_string(),
            ssh_key_id: "512189".to_string(),
            k3s_version: "v1.18.10+k3s1".to_string(),
            installed: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_load_delete() {
        let dir = tempdir().unwrap();
        let store = StateStore::in_dir(dir.path());
        assert!(!store.exists());

        let record = record();
        store.save(&record).unwrap();
        assert!(store.exists());
        assert_eq!(store.load().unwrap(), record);

        store.delete().unwrap();
        assert!(!store.exists());
        store.delete().unwrap();
    }

    #[test]
    fn test_load_without_record() {
        let dir = tempdir().unwrap();
        let store = StateStore::in_dir(dir.path());
        assert!(matches!(store.load(), Err(SkyhookError::NotDeployed)));
    }

    #[test]
    fn test_record_file_format() {
        let dir = tempdir().unwrap();
        let store = StateStore::in_dir(dir.path());
        store.save(&record()).unwrap();

        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert!(contents.contains("cloud: digitalocean"));
        assert!(contents.contains("k3s-version:"));
        assert!(contents.contains("ssh-key-id:"));
    }
}
