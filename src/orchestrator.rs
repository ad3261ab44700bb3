//! Provisioning orchestrator
//!
//! Ties the pieces together for one project directory: picks a cloud, makes
//! sure the SSH key is on the account, resolves the region and the k3s
//! release, creates the VM, waits for it, installs k3s and records what was
//! deployed in `deploy-state.yaml`.

use crate::cloud::{self, Cloud, CloudProvider, VmInfo, VmSpec, TOOL_TAG};
use crate::config::{AppConfig, DeployConfig, DeploymentRecord, StateStore};
use crate::error::{Result, SkyhookError};
use crate::install::{RemoteInstaller, Ssh2Connector, SshConnector, LOCAL_KUBECONFIG};
use crate::lifecycle::{VmLifecycle, DEFAULT_POLL_INTERVAL};
use crate::release::version::parse_channel;
use crate::release::{HttpReleaseFeed, ReleaseCatalog, ReleaseFeed};
use crate::retry::RetryConfig;
use crate::sshkey::SshKey;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Release installed when nothing else is asked for
pub const DEFAULT_K3S_VERSION: &str = "stable";

/// Builds a provider adapter for a cloud
pub type ProviderFactory =
    Arc<dyn Fn(Cloud, &AppConfig) -> Result<Arc<dyn CloudProvider>> + Send + Sync>;

/// Everything a run needs to know about its surroundings
#[derive(Debug, Clone)]
pub struct Context {
    /// User settings
    pub app: AppConfig,
    /// Project directory holding `deploy.yaml` and `deploy-state.yaml`
    pub work_dir: PathBuf,
}

impl Context {
    pub fn new(app: AppConfig, work_dir: PathBuf) -> Self {
        Self { app, work_dir }
    }

    /// User config from the home directory, project in the current directory
    pub fn load() -> Result<Self> {
        Ok(Self::new(AppConfig::load_default()?, std::env::current_dir()?))
    }

    pub fn state(&self) -> StateStore {
        StateStore::in_dir(&self.work_dir)
    }
}

/// Per-build settings given on the command line
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub cloud: Option<Cloud>,
    pub name: Option<String>,
    pub region: Option<String>,
    pub size: Option<String>,
    pub k3s_version: Option<String>,
}

impl BuildOptions {
    /// Fill unset options from `deploy.yaml`
    pub fn merged_with(self, deploy: DeployConfig) -> Self {
        Self {
            cloud: self.cloud.or(deploy.cloud),
            name: self.name.or(deploy.name),
            region: self.region.or(deploy.region),
            size: self.size.or(deploy.size),
            k3s_version: self.k3s_version.or(deploy.k3s_version),
        }
    }
}

/// Releases grouped for display, newest first
#[derive(Debug, Clone, Default)]
pub struct VersionListing {
    pub latest: Option<String>,
    pub stable: Option<String>,
    pub channels: Vec<(String, Vec<String>)>,
}

/// Drives provisioning and teardown for a project
pub struct Orchestrator {
    context: Context,
    catalog: ReleaseCatalog,
    providers: ProviderFactory,
    connector: Option<Arc<dyn SshConnector>>,
    poll_interval: Duration,
    dial_retry: Option<RetryConfig>,
}

impl Orchestrator {
    pub fn new(context: Context) -> Result<Self> {
        Ok(Self::with_feed(context, Arc::new(HttpReleaseFeed::new()?)))
    }

    pub fn with_feed(context: Context, feed: Arc<dyn ReleaseFeed>) -> Self {
        Self {
            context,
            catalog: ReleaseCatalog::new(feed),
            providers: Arc::new(cloud::connect),
            connector: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            dial_retry: None,
        }
    }

    pub fn with_providers(mut self, providers: ProviderFactory) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn SshConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_dial_retry(mut self, retry: RetryConfig) -> Self {
        self.dial_retry = Some(retry);
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn provider(&self, cloud: Cloud) -> Result<Arc<dyn CloudProvider>> {
        (self.providers)(cloud, &self.context.app)
    }

    /// Cloud for a build: option, then the user default
    pub fn select_cloud(&self, options: &BuildOptions) -> Result<Cloud> {
        options.cloud.or(self.context.app.default_cloud).ok_or_else(|| {
            SkyhookError::InvalidConfig(
                "no cloud selected; pass --cloud or set one with `skyhook default cloud`".to_string(),
            )
        })
    }

    /// Provision a VM and install k3s on it
    pub async fn build(&self, options: BuildOptions) -> Result<DeploymentRecord> {
        let state = self.context.state();
        if state.exists() {
            let existing = match state.load() {
                Ok(record) => format!("{} ({} on {})", record.name, record.id, record.cloud),
                Err(_) => state.path().display().to_string(),
            };
            return Err(SkyhookError::AlreadyDeployed(existing));
        }

        let options = options.merged_with(DeployConfig::load(&self.context.work_dir)?);
        let app = &self.context.app;

        let cloud = self.select_cloud(&options)?;
        let provider = self.provider(cloud)?;

        // user defaults only apply to the cloud they were set for
        let own_defaults = app.default_cloud == Some(cloud);
        let size = options
            .size
            .clone()
            .or_else(|| app.default_size.clone().filter(|_| own_defaults))
            .unwrap_or_else(|| provider.default_size().to_string());
        let region = options
            .region
            .clone()
            .or_else(|| app.default_region.clone().filter(|_| own_defaults));
        let name = match &options.name {
            Some(name) => name.clone(),
            None => default_cluster_name(&self.context.work_dir)?,
        };
        let requested_version = options
            .k3s_version
            .clone()
            .unwrap_or_else(|| DEFAULT_K3S_VERSION.to_string());

        let key = self.load_ssh_key()?;
        let ssh_key_id = self.ensure_ssh_key(provider.as_ref(), &key).await?;

        let (region, version) = tokio::try_join!(
            resolve_region(provider.as_ref(), region),
            self.catalog.resolve(&requested_version)
        )?;

        tracing::info!("creating {} in {} on {} with k3s {}", name, region, cloud, version);

        let spec = VmSpec {
            name: name.clone(),
            image: provider.default_image().to_string(),
            size: size.clone(),
            region: region.clone(),
            ssh_key_id: ssh_key_id.clone(),
            ssh_public_key: key.public_key.clone(),
            tags: vec![TOOL_TAG.to_string()],
        };
        let vm = provider.create_vm(&spec).await?;
        tracing::info!("vm {} requested", vm.id);

        let lifecycle = VmLifecycle::new(provider.clone()).with_poll_interval(self.poll_interval);
        let (_, ip) = lifecycle
            .wait_until_running(&vm)
            .await
            .map_err(|e| billable(cloud, &vm, e))?;
        tracing::info!("vm {} is running at {}", vm.id, ip);

        let mut record = DeploymentRecord {
            cloud,
            id: vm.id.clone(),
            name: name.clone(),
            region,
            size,
            ip: ip.clone(),
            ssh_key_id,
            k3s_version: version.clone(),
            installed: false,
            created_at: Utc::now(),
        };
        // saved before installing so a failed install can still be torn down
        state.save(&record).map_err(|e| billable(cloud, &vm, e))?;

        self.installer(&key)?
            .install(&ip, &version, &name)
            .await
            .map_err(|e| billable(cloud, &vm, e))?;

        record.installed = true;
        state.save(&record).map_err(|e| billable(cloud, &vm, e))?;

        Ok(record)
    }

    /// Delete the deployed VM, its kubeconfig and the deployment record
    pub async fn teardown(&self) -> Result<DeploymentRecord> {
        let state = self.context.state();
        let record = state.load()?;

        let provider = self.provider(record.cloud)?;
        tracing::info!("deleting vm {} on {}", record.id, record.cloud);
        provider.delete_vm(&record.id).await?;

        let kubeconfig = self.context.work_dir.join(LOCAL_KUBECONFIG);
        if kubeconfig.exists() {
            std::fs::remove_file(&kubeconfig)?;
        }
        state.delete()?;

        Ok(record)
    }

    /// VMs created by this tool on every configured cloud
    pub async fn list_vms(&self) -> Result<Vec<(Cloud, VmInfo)>> {
        let mut all = Vec::new();
        for cloud in self.context.app.configured_clouds() {
            let vms = match self.provider(cloud) {
                Ok(provider) => provider.list_vms().await,
                Err(e) => Err(e),
            };
            match vms {
                Ok(vms) => all.extend(vms.into_iter().map(|vm| (cloud, vm))),
                Err(e) => tracing::warn!("could not list vms on {}: {}", cloud, e),
            }
        }
        Ok(all)
    }

    /// Region with the lowest latency on `cloud`
    pub async fn closest_region(&self, cloud: Cloud) -> Result<String> {
        self.provider(cloud)?.select_closest_region().await
    }

    /// Installable releases, grouped by channel
    pub async fn k3s_versions(&self) -> Result<VersionListing> {
        tokio::try_join!(self.catalog.load_channels(), self.catalog.load_releases())?;

        let latest_of = |name: &str| {
            self.catalog
                .channels()
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.latest_release.clone())
        };

        let mut channels: Vec<(String, Vec<String>)> = self
            .catalog
            .releases()
            .map(|releases| {
                releases
                    .iter()
                    .filter(|(name, _)| parse_channel(name).is_some())
                    .map(|(name, list)| (name.clone(), list.clone()))
                    .collect()
            })
            .unwrap_or_default();
        channels.sort_by_key(|(name, _)| std::cmp::Reverse(parse_channel(name)));

        Ok(VersionListing {
            latest: latest_of("latest"),
            stable: latest_of("stable"),
            channels,
        })
    }

    fn load_ssh_key(&self) -> Result<SshKey> {
        let path = self.context.app.public_key_path().ok_or_else(|| {
            SkyhookError::InvalidSshKey("no public key configured and no home directory".to_string())
        })?;
        SshKey::load(&path)
    }

    /// Provider id of `key`, uploading it first if the account lacks it
    async fn ensure_ssh_key(&self, provider: &dyn CloudProvider, key: &SshKey) -> Result<String> {
        match provider.is_ssh_key_uploaded(key).await {
            Ok(id) => Ok(id),
            Err(SkyhookError::SshKeyMissing(_)) => {
                let name = self.context.app.key_display_name();
                tracing::info!("uploading ssh key {} to {}", key.upload_name(&name), provider.cloud());
                provider.upload_ssh_key(&name, key).await
            }
            Err(e) => Err(e),
        }
    }

    /// libssh2 connector for the private half of `key`
    fn ssh_connector(&self, key: &SshKey) -> Result<Ssh2Connector> {
        let private_key = key.private_key_path().ok_or_else(|| {
            SkyhookError::InvalidSshKey("cannot locate the private key".to_string())
        })?;
        Ok(Ssh2Connector::new(private_key)
            .with_passphrase(self.context.app.ssh_key_passphrase.clone()))
    }

    fn installer(&self, key: &SshKey) -> Result<RemoteInstaller> {
        let connector = match &self.connector {
            Some(connector) => connector.clone(),
            None => Arc::new(self.ssh_connector(key)?) as Arc<dyn SshConnector>,
        };

        let installer = RemoteInstaller::new(connector, &self.context.work_dir);
        Ok(match &self.dial_retry {
            Some(retry) => installer.with_dial_retry(retry.clone()),
            None => installer,
        })
    }
}

async fn resolve_region(provider: &dyn CloudProvider, requested: Option<String>) -> Result<String> {
    match requested {
        Some(region) => Ok(region),
        None => {
            tracing::info!("measuring latency to {} regions", provider.cloud());
            provider.select_closest_region().await
        }
    }
}

/// A VM exists past this point; say so before handing the error back
fn billable(cloud: Cloud, vm: &VmInfo, error: SkyhookError) -> SkyhookError {
    tracing::warn!(
        "vm {} on {} was created and may still be billing; run `skyhook teardown` or delete it from the {} console",
        vm.id,
        cloud,
        cloud
    );
    error
}

/// Project directory name, plus the git branch unless it is master/main
pub fn default_cluster_name(work_dir: &Path) -> Result<String> {
    let project = work_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| {
            SkyhookError::InvalidConfig(format!("cannot name a cluster after {}", work_dir.display()))
        })?;

    let name = match git_branch(work_dir) {
        Some(branch) if branch != "master" && branch != "main" => format!("{}-{}", project, branch),
        _ => project,
    };

    Ok(name.replace(['_', '/'], "-"))
}

/// Branch checked out in the repository containing `work_dir`
fn git_branch(work_dir: &Path) -> Option<String> {
    let head = std::fs::read_to_string(git_dir(work_dir)?.join("HEAD")).ok()?;
    head.trim()
        .strip_prefix("ref: refs/heads/")
        .map(str::to_string)
}

/// Nearest `.git` directory at or above `work_dir`
fn git_dir(work_dir: &Path) -> Option<PathBuf> {
    for dir in work_dir.ancestors() {
        let dot_git = dir.join(".git");
        if dot_git.is_dir() {
            return Some(dot_git);
        }
        if dot_git.is_file() {
            // worktrees and submodules point elsewhere with `gitdir: <path>`
            let link = std::fs::read_to_string(&dot_git).ok()?;
            let target = link.trim().strip_prefix("gitdir:")?.trim();
            return Some(dir.join(target));
        }
    }
    None
}
