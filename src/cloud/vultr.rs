//! Vultr adapter

use super::api::ApiClient;
use super::{tagged, Cloud, CloudProvider, NetworkAttachment, VmInfo, VmSpec, VmStatus};
use crate::error::{Result, SkyhookError};
use crate::probe::{IcmpPinger, LatencyProber, Pinger, ProbeConfig, ProbeTarget};
use crate::sshkey::SshKey;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

const API_URL: &str = "https://api.vultr.com";

const REGION_HOSTS: &[(&str, &str)] = &[
    ("dfw", "tx-us-ping.vultr.com"),
    ("lax", "lax-ca-us-ping.vultr.com"),
    ("mia", "fl-us-ping.vultr.com"),
    ("sjc", "sjo-ca-us-ping.vultr.com"),
    ("ord", "il-us-ping.vultr.com"),
    ("sea", "wa-us-ping.vultr.com"),
    ("ewr", "nj-us-ping.vultr.com"),
    ("atl", "ga-us-ping.vultr.com"),
    ("yto", "tor-ca-ping.vultr.com"),
    ("cdg", "par-fr-ping.vultr.com"),
    ("fra", "fra-de-ping.vultr.com"),
    ("ams", "ams-nl-ping.vultr.com"),
    ("lhr", "lon-gb-ping.vultr.com"),
    ("sgp", "sgp-ping.vultr.com"),
    ("icn", "sel-kor-ping.vultr.com"),
    ("nrt", "hnd-jp-ping.vultr.com"),
    ("syd", "syd-au-ping.vultr.com"),
];

/// Vultr reports this until an address is assigned
const UNASSIGNED_IP: &str = "0.0.0.0";

#[derive(Deserialize)]
struct Instance {
    id: String,
    label: String,
    status: String,
    #[serde(default)]
    server_status: String,
    #[serde(default)]
    main_ip: String,
    region: String,
    #[serde(default)]
    plan: String,
    #[serde(default)]
    date_created: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
struct InstanceEnvelope {
    instance: Instance,
}

#[derive(Deserialize)]
struct InstanceList {
    instances: Vec<Instance>,
}

#[derive(Deserialize)]
struct AccountKey {
    id: String,
    ssh_key: String,
}

#[derive(Deserialize)]
struct AccountKeyList {
    ssh_keys: Vec<AccountKey>,
}

#[derive(Deserialize)]
struct AccountKeyEnvelope {
    ssh_key: AccountKey,
}

/// `server_status` is only meaningful once `status` leaves `pending`
fn status(status: &str, server_status: &str) -> VmStatus {
    match (status, server_status) {
        (_, "ok") => VmStatus::Running,
        ("pending", _) => VmStatus::Provisioning,
        (_, "none" | "locked" | "installingbooting") => VmStatus::Provisioning,
        (_, other) => VmStatus::Unknown(other.to_string()),
    }
}

impl From<Instance> for VmInfo {
    fn from(instance: Instance) -> Self {
        let networks = if instance.main_ip.is_empty() || instance.main_ip == UNASSIGNED_IP {
            Vec::new()
        } else {
            vec![NetworkAttachment::public(&instance.main_ip)]
        };

        VmInfo {
            id: instance.id,
            name: instance.label,
            status: status(&instance.status, &instance.server_status),
            networks,
            region: instance.region,
            size: instance.plan,
            tags: instance.tags,
            created_at: instance.date_created,
        }
    }
}

/// Instances over the Vultr v2 API
pub struct VultrProvider {
    api: ApiClient,
    pinger: Arc<dyn Pinger>,
}

impl VultrProvider {
    pub fn new(token: &str) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new("vultr", API_URL, token)?,
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
impl CloudProvider for VultrProvider {
    fn cloud(&self) -> Cloud {
        Cloud::Vultr
    }

    /// Ubuntu 20.04 x64
    fn default_image(&self) -> &str {
        "387"
    }

    fn default_size(&self) -> &str {
        "vc2-1c-1gb"
    }

    fn fallback_region(&self) -> &str {
        "ewr"
    }

    async fn is_ssh_key_uploaded(&self, key: &SshKey) -> Result<String> {
        let keys: AccountKeyList = self.api.get("/v2/ssh-keys?per_page=500").await?;
        keys.ssh_keys
            .into_iter()
            .find(|k| key.matches(&k.ssh_key))
            .map(|k| k.id)
            .ok_or_else(|| SkyhookError::SshKeyMissing(key.fingerprint.clone()))
    }

    async fn upload_ssh_key(&self, display_name: &str, key: &SshKey) -> Result<String> {
        let body = json!({
            "name": key.upload_name(display_name),
            "ssh_key": key.public_key,
        });
        let created: AccountKeyEnvelope = self.api.post("/v2/ssh-keys", &body).await?;
        Ok(created.ssh_key.id)
    }

    async fn select_closest_region(&self) -> Result<String> {
        let config = ProbeConfig::with_fallback(self.fallback_region());
        LatencyProber::new(self.pinger.clone(), config)
            .probe_all(&Self::region_targets())
            .await
    }

    async fn create_vm(&self, spec: &VmSpec) -> Result<VmInfo> {
        let os_id: u32 = spec.image.parse().map_err(|_| {
            SkyhookError::InvalidConfig(format!("vultr image must be an os id, got {}", spec.image))
        })?;

        let body = json!({
            "region": spec.region,
            "plan": spec.size,
            "os_id": os_id,
            "label": spec.name,
            "hostname": spec.name,
            "sshkey_id": [spec.ssh_key_id],
            "enable_ipv6": true,
            "tags": spec.tags,
        });

        let created: InstanceEnvelope = self.api.post("/v2/instances", &body).await?;
        tracing::debug!("vultr instance {} created", created.instance.id);
        Ok(created.instance.into())
    }

    async fn get_vm_info(&self, id: &str) -> Result<VmInfo> {
        let found: InstanceEnvelope = self.api.get(&format!("/v2/instances/{}", id)).await?;
        Ok(found.instance.into())
    }

    async fn list_vms(&self) -> Result<Vec<VmInfo>> {
        let list: InstanceList = self.api.get("/v2/instances?per_page=500").await?;
        Ok(list
            .instances
            .into_iter()
            .filter(|i| tagged(&i.tags))
            .map(VmInfo::from)
            .collect())
    }

    async fn delete_vm(&self, id: &str) -> Result<()> {
        self.api.delete(&format!("/v2/instances/{}", id)).await
    }
}
