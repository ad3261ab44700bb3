//! Linode adapter

use super::api::ApiClient;
use super::{tagged, Cloud, CloudProvider, NetworkAttachment, VmInfo, VmSpec, VmStatus};
use crate::error::{Result, SkyhookError};
use crate::probe::{IcmpPinger, LatencyProber, Pinger, ProbeConfig, ProbeTarget};
use crate::sshkey::SshKey;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::net::Ipv4Addr;
use std::sync::Arc;

const API_URL: &str = "https://api.linode.com";

const REGION_HOSTS: &[(&str, &str)] = &[
    ("us-east", "speedtest.newark.linode.com"),
    ("us-southeast", "speedtest.atlanta.linode.com"),
    ("us-central", "speedtest.dallas.linode.com"),
    ("us-west", "speedtest.fremont.linode.com"),
    ("ca-central", "speedtest.toronto1.linode.com"),
    ("eu-west", "speedtest.london.linode.com"),
    ("eu-central", "speedtest.frankfurt.linode.com"),
    ("ap-west", "speedtest.mumbai1.linode.com"),
    ("ap-south", "speedtest.singapore.linode.com"),
    ("ap-northeast", "speedtest.tokyo2.linode.com"),
    ("ap-southeast", "speedtest.syd1.linode.com"),
];

#[derive(Deserialize)]
struct Instance {
    id: u64,
    label: String,
    status: String,
    #[serde(default)]
    created: String,
    region: String,
    #[serde(rename = "type", default)]
    plan: String,
    #[serde(default)]
    ipv4: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct Page<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct ProfileKey {
    id: u64,
    ssh_key: String,
}

fn status(raw: &str) -> VmStatus {
    match raw {
        "provisioning" | "booting" => VmStatus::Provisioning,
        "running" => VmStatus::Running,
        other => VmStatus::Unknown(other.to_string()),
    }
}

fn attachment(ip: &str) -> NetworkAttachment {
    match ip.parse::<Ipv4Addr>() {
        Ok(addr) if addr.is_private() => NetworkAttachment::private(ip),
        _ => NetworkAttachment::public(ip),
    }
}

impl From<Instance> for VmInfo {
    fn from(instance: Instance) -> Self {
        VmInfo {
            id: instance.id.to_string(),
            name: instance.label,
            status: status(&instance.status),
            networks: instance.ipv4.iter().map(String::as_str).map(attachment).collect(),
            region: instance.region,
            size: instance.plan,
            tags: instance.tags,
            created_at: instance.created,
        }
    }
}

/// Root password Linode insists on; logins use the SSH key
fn root_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

/// Linodes over the Linode v4 API
pub struct LinodeProvider {
    api: ApiClient,
    pinger: Arc<dyn Pinger>,
}

impl LinodeProvider {
    pub fn new(token: &str) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new("linode", API_URL, token)?,
            pinger: Arc::new(IcmpPinger::new()),
        })
    }

    /// Measure region latency with `pinger` instead of ICMP
    pub fn with_pinger(mut self, pinger: Arc<dyn Pinger>) -> Self {
        self.pinger = pinger;
        self
    }

    pub fn region_targets() -> Vec<ProbeTarget> {
        REGION_HOSTS
            .iter()
            .map(|(id, host)| ProbeTarget::new(id, host))
            .collect()
    }
}

#[async_trait]
impl CloudProvider for LinodeProvider {
    fn cloud(&self) -> Cloud {
        Cloud::Linode
    }

    fn default_image(&self) -> &str {
        "linode/ubuntu20.04"
    }

    fn default_size(&self) -> &str {
        "g6-nanode-1"
    }

    fn fallback_region(&self) -> &str {
        "us-east"
    }

    async fn is_ssh_key_uploaded(&self, key: &SshKey) -> Result<String> {
        let keys: Page<ProfileKey> = self.api.get("/v4/profile/sshkeys?page_size=500").await?;
        keys.data
            .into_iter()
            .find(|k| key.matches(&k.ssh_key))
            .map(|k| k.id.to_string())
            .ok_or_else(|| SkyhookError::SshKeyMissing(key.fingerprint.clone()))
    }

    async fn upload_ssh_key(&self, display_name: &str, key: &SshKey) -> Result<String> {
        let body = json!({
            "label": key.upload_name(display_name),
            "ssh_key": key.public_key,
        });
        let created: ProfileKey = self.api.post("/v4/profile/sshkeys", &body).await?;
        Ok(created.id.to_string())
    }

    async fn select_closest_region(&self) -> Result<String> {
        let config = ProbeConfig::with_fallback(self.fallback_region());
        LatencyProber::new(self.pinger.clone(), config)
            .probe_all(&Self::region_targets())
            .await
    }

    async fn create_vm(&self, spec: &VmSpec) -> Result<VmInfo> {
        let body = json!({
            "label": spec.name,
            "region": spec.region,
            "type": spec.size,
            "image": spec.image,
            "root_pass": root_password(),
            "authorized_keys": [spec.ssh_public_key],
            "tags": spec.tags,
        });

        let created: Instance = self.api.post("/v4/linode/instances", &body).await?;
        tracing::debug!("linode {} created", created.id);
        Ok(created.into())
    }

    async fn get_vm_info(&self, id: &str) -> Result<VmInfo> {
        let instance: Instance = self.api.get(&format!("/v4/linode/instances/{}", id)).await?;
        Ok(instance.into())
    }

    async fn list_vms(&self) -> Result<Vec<VmInfo>> {
        let page: Page<Instance> = self.api.get("/v4/linode/instances?page_size=500").await?;
        Ok(page
            .data
            .into_iter()
            .filter(|i| tagged(&i.tags))
            .map(VmInfo::from)
            .collect())
    }

    async fn delete_vm(&self, id: &str) -> Result<()> {
        self.api.delete(&format!("/v4/linode/instances/{}", id)).await
    }
}
