//! Cloud provider abstraction
//!
//! Every supported cloud implements [`CloudProvider`]. The orchestrator only
//! ever holds an `Arc<dyn CloudProvider>`; [`connect`] is the one place that
//! names concrete adapters, so adding a cloud means adding an adapter and a
//! match arm here.
//!
//! # Supported Clouds
//!
//! - [`DigitalOceanProvider`]
//! - [`LinodeProvider`]
//! - [`VultrProvider`]

mod api;
mod digitalocean;
mod linode;
mod vultr;

pub use digitalocean::DigitalOceanProvider;
pub use linode::LinodeProvider;
pub use vultr::VultrProvider;

use crate::config::AppConfig;
use crate::error::{Result, SkyhookError};
use crate::sshkey::SshKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Tag put on every VM this tool creates
pub const TOOL_TAG: &str = "skyhook";

/// Supported cloud providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cloud {
    DigitalOcean,
    Linode,
    Vultr,
}

impl Cloud {
    pub const ALL: [Cloud; 3] = [Cloud::DigitalOcean, Cloud::Linode, Cloud::Vultr];

    pub fn name(&self) -> &'static str {
        match self {
            Cloud::DigitalOcean => "digitalocean",
            Cloud::Linode => "linode",
            Cloud::Vultr => "vultr",
        }
    }

    /// Environment variable that overrides the configured API token
    pub fn token_env(&self) -> &'static str {
        match self {
            Cloud::DigitalOcean => "DIGITALOCEAN_ACCESS_TOKEN",
            Cloud::Linode => "LINODE_TOKEN",
            Cloud::Vultr => "VULTR_API_KEY",
        }
    }
}

impl fmt::Display for Cloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Cloud {
    type Err = SkyhookError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "digitalocean" | "do" => Ok(Cloud::DigitalOcean),
            "linode" => Ok(Cloud::Linode),
            "vultr" => Ok(Cloud::Vultr),
            other => Err(SkyhookError::UnsupportedCloud(other.to_string())),
        }
    }
}

/// Provider independent VM status
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmStatus {
    Provisioning,
    Running,
    Failed,
    /// Anything else, with the provider's own wording
    Unknown(String),
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmStatus::Provisioning => f.write_str("provisioning"),
            VmStatus::Running => f.write_str("running"),
            VmStatus::Failed => f.write_str("failed"),
            VmStatus::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// An IPv4 address attached to a VM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub ip_address: String,
    /// `public` or `private`
    pub network_type: String,
}

impl NetworkAttachment {
    pub fn public(ip: &str) -> Self {
        Self {
            ip_address: ip.to_string(),
            network_type: "public".to_string(),
        }
    }

    pub fn private(ip: &str) -> Self {
        Self {
            ip_address: ip.to_string(),
            network_type: "private".to_string(),
        }
    }
}

/// A VM as last reported by its provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmInfo {
    pub id: String,
    pub name: String,
    pub status: VmStatus,
    pub networks: Vec<NetworkAttachment>,
    pub region: String,
    pub size: String,
    pub tags: Vec<String>,
    pub created_at: String,
}

impl VmInfo {
    /// Address of the first `public` network attachment
    pub fn public_ipv4(&self) -> Option<&str> {
        self.networks
            .iter()
            .find(|n| n.network_type == "public" && !n.ip_address.is_empty())
            .map(|n| n.ip_address.as_str())
    }
}

/// VM creation request
#[derive(Debug, Clone)]
pub struct VmSpec {
    pub name: String,
    pub image: String,
    pub size: String,
    pub region: String,
    /// Provider side id of the uploaded SSH key
    pub ssh_key_id: String,
    /// Public key, for providers that take the key itself
    pub ssh_public_key: String,
    pub tags: Vec<String>,
}

/// Operations every cloud adapter supports
#[async_trait]
pub trait CloudProvider: Send + Sync {
    fn cloud(&self) -> Cloud;

    /// Image used when none is configured
    fn default_image(&self) -> &str;

    /// Size used when none is configured
    fn default_size(&self) -> &str;

    /// Region used when latency probing finds nothing
    fn fallback_region(&self) -> &str;

    /// Provider id of `key` on the account, `SshKeyMissing` if absent
    async fn is_ssh_key_uploaded(&self, key: &SshKey) -> Result<String>;

    /// Upload `key` and return its provider id
    async fn upload_ssh_key(&self, display_name: &str, key: &SshKey) -> Result<String>;

    /// Region with the lowest measured latency
    async fn select_closest_region(&self) -> Result<String>;

    async fn create_vm(&self, spec: &VmSpec) -> Result<VmInfo>;

    async fn get_vm_info(&self, id: &str) -> Result<VmInfo>;

    /// VMs carrying [`TOOL_TAG`]
    async fn list_vms(&self) -> Result<Vec<VmInfo>>;

    async fn delete_vm(&self, id: &str) -> Result<()>;
}

/// Build the adapter for `cloud` using credentials from `config`
pub fn connect(cloud: Cloud, config: &AppConfig) -> Result<Arc<dyn CloudProvider>> {
    let token = config
        .api_key(cloud)
        .ok_or_else(|| SkyhookError::MissingCredentials(cloud.to_string()))?;

    tracing::debug!("connecting to {}", cloud);

    let provider: Arc<dyn CloudProvider> = match cloud {
        Cloud::DigitalOcean => Arc::new(DigitalOceanProvider::new(&token)?),
        Cloud::Linode => Arc::new(LinodeProvider::new(&token)?),
        Cloud::Vultr => Arc::new(VultrProvider::new(&token)?),
    };
    Ok(provider)
}

fn tagged(tags: &[String]) -> bool {
    tags.iter().any(|t| t == TOOL_TAG)
}
