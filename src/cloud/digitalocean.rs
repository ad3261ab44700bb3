//! DigitalOcean adapter

use super::api::ApiClient;
use super::{tagged, Cloud, CloudProvider, NetworkAttachment, VmInfo, VmSpec, VmStatus, TOOL_TAG};
use crate::error::{Result, SkyhookError};
use crate::probe::{IcmpPinger, LatencyProber, Pinger, ProbeConfig, ProbeTarget};
use crate::sshkey::SshKey;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const API_URL: &str = "https://api.digitalocean.com";

/// Regions and the speed test host in each
const REGION_HOSTS: &[(&str, &str)] = &[
    ("nyc1", "speedtest-nyc1.digitalocean.com"),
    ("nyc3", "speedtest-nyc3.digitalocean.com"),
    ("sfo3", "speedtest-sfo3.digitalocean.com"),
    ("tor1", "speedtest-tor1.digitalocean.com"),
    ("ams3", "speedtest-ams3.digitalocean.com"),
    ("lon1", "speedtest-lon1.digitalocean.com"),
    ("fra1", "speedtest-fra1.digitalocean.com"),
    ("blr1", "speedtest-blr1.digitalocean.com"),
    ("sgp1", "speedtest-sgp1.digitalocean.com"),
    ("syd1", "speedtest-syd1.digitalocean.com"),
];

#[derive(Deserialize)]
struct Droplet {
    id: u64,
    name: String,
    status: String,
    #[serde(default)]
    created_at: String,
    region: DropletRegion,
    #[serde(default)]
    size_slug: String,
    #[serde(default)]
    networks: DropletNetworks,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct DropletRegion {
    slug: String,
}

#[derive(Deserialize, Default)]
struct DropletNetworks {
    #[serde(default)]
    v4: Vec<DropletAddress>,
}

#[derive(Deserialize)]
struct DropletAddress {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Deserialize)]
struct DropletList {
    droplets: Vec<Droplet>,
}

#[derive(Deserialize)]
struct AccountKey {
    id: u64,
    fingerprint: String,
}

#[derive(Deserialize)]
struct AccountKeyList {
    ssh_keys: Vec<AccountKey>,
}

#[derive(Deserialize)]
struct AccountKeyEnvelope {
    ssh_key: AccountKey,
}

fn status(raw: &str) -> VmStatus {
    match raw {
        "new" => VmStatus::Provisioning,
        "active" => VmStatus::Running,
        "errored" => VmStatus::Failed,
        other => VmStatus::Unknown(other.to_string()),
    }
}

impl From<Droplet> for VmInfo {
    fn from(droplet: Droplet) -> Self {
        VmInfo {
            id: droplet.id.to_string(),
            name: droplet.name,
            status: status(&droplet.status),
            networks: droplet
                .networks
                .v4
                .into_iter()
                .map(|n| NetworkAttachment {
                    ip_address: n.ip_address,
                    network_type: n.kind,
                })
                .collect(),
            region: droplet.region.slug,
            size: droplet.size_slug,
            tags: droplet.tags,
            created_at: droplet.created_at,
        }
    }
}

/// Droplets over the DigitalOcean v2 API
pub struct DigitalOceanProvider {
    api: ApiClient,
    pinger: Arc<dyn Pinger>,
}

impl DigitalOceanProvider {
    pub fn new(token: &str) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new("digitalocean", API_URL, token)?,
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
impl CloudProvider for DigitalOceanProvider {
    fn cloud(&self) -> Cloud {
        Cloud::DigitalOcean
    }

    fn default_image(&self) -> &str {
        "ubuntu-20-04-x64"
    }

    fn default_size(&self) -> &str {
        "s-1vcpu-1gb"
    }

    fn fallback_region(&self) -> &str {
        "nyc1"
    }

    async fn is_ssh_key_uploaded(&self, key: &SshKey) -> Result<String> {
        let keys: AccountKeyList = self.api.get("/v2/account/keys?per_page=200").await?;
        keys.ssh_keys
            .into_iter()
            .find(|k| k.fingerprint == key.fingerprint)
            .map(|k| k.id.to_string())
            .ok_or_else(|| SkyhookError::SshKeyMissing(key.fingerprint.clone()))
    }

    async fn upload_ssh_key(&self, display_name: &str, key: &SshKey) -> Result<String> {
        let body = json!({
            "name": key.upload_name(display_name),
            "public_key": key.public_key,
        });
        let created: AccountKeyEnvelope = self.api.post("/v2/account/keys", &body).await?;
        Ok(created.ssh_key.id.to_string())
    }

    async fn select_closest_region(&self) -> Result<String> {
        let config = ProbeConfig::with_fallback(self.fallback_region());
        LatencyProber::new(self.pinger.clone(), config)
            .probe_all(&Self::region_targets())
            .await
    }

    async fn create_vm(&self, spec: &VmSpec) -> Result<VmInfo> {
        // ids are numeric, fingerprints are accepted as strings
        let ssh_key = match spec.ssh_key_id.parse::<u64>() {
            Ok(id) => json!(id),
            Err(_) => json!(spec.ssh_key_id),
        };
        let body = json!({
            "name": spec.name,
            "region": spec.region,
            "size": spec.size,
            "image": spec.image,
            "ssh_keys": [ssh_key],
            "tags": spec.tags,
        });

        let created: DropletEnvelope = self.api.post("/v2/droplets", &body).await?;
        tracing::debug!("droplet {} created", created.droplet.id);
        Ok(created.droplet.into())
    }

    async fn get_vm_info(&self, id: &str) -> Result<VmInfo> {
        let found: DropletEnvelope = self.api.get(&format!("/v2/droplets/{}", id)).await?;
        Ok(found.droplet.into())
    }

    async fn list_vms(&self) -> Result<Vec<VmInfo>> {
        let list: DropletList = self
            .api
            .get(&format!("/v2/droplets?tag_name={}&per_page=200", TOOL_TAG))
            .await?;
        Ok(list
            .droplets
            .into_iter()
            .filter(|d| tagged(&d.tags))
            .map(VmInfo::from)
            .collect())
    }

    async fn delete_vm(&self, id: &str) -> Result<()> {
        self.api.delete(&format!("/v2/droplets/{}", id)).await
    }
}
